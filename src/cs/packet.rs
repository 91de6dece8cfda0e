//! PM4 packet framing.
//!
//! Type-0 header: `[31:30]=0 [29:16]=count-1 [15:0]=base index`.
//! Type-3 header: `[31:30]=3 [29:16]=count-1 [15:8]=opcode`.

use crate::error::{CsError, CsResult};

/// Largest payload the 14-bit count field can describe.
pub const MAX_PAYLOAD_DWORDS: usize = 0x4000;

const COUNT_MASK: u32 = 0x3FFF;
const TYPE3_TAG: u32 = 0xC000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Direct write of `count` consecutive registers starting at `base_index` (address >> 2).
    Type0 { base_index: u16 },
    /// Opcode-addressed packet.
    Type3 { opcode: u8 },
}

impl PacketKind {
    /// Encodes the header dword for a packet carrying `count` payload dwords.
    ///
    /// # Errors
    /// Returns `InvalidPacketSize` if `count` is 0 or larger than [`MAX_PAYLOAD_DWORDS`].
    pub fn header(self, count: usize) -> CsResult<u32> {
        if count == 0 || count > MAX_PAYLOAD_DWORDS {
            return Err(CsError::InvalidPacketSize(count));
        }
        #[allow(clippy::cast_possible_truncation)]
        let count_field = ((count - 1) as u32 & COUNT_MASK) << 16;

        Ok(match self {
            Self::Type0 { base_index } => count_field | u32::from(base_index),
            Self::Type3 { opcode } => TYPE3_TAG | count_field | (u32::from(opcode) << 8),
        })
    }
}

/// A packet read back out of a dword stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketKind,
    /// Dword offset of the header within the decoded stream.
    pub offset: usize,
    pub payload: Vec<u32>,
}

/// Splits a dword stream into packets.
///
/// # Errors
/// Returns `Driver` for type-1/type-2 headers (not produced by this crate) and for a
/// packet whose payload runs past the end of `dwords`.
pub fn decode(dwords: &[u32]) -> CsResult<Vec<Packet>> {
    let mut packets = Vec::new();
    let mut pos = 0;

    while pos < dwords.len() {
        let header = dwords[pos];
        let count = ((header >> 16) & COUNT_MASK) as usize + 1;

        #[allow(clippy::cast_possible_truncation)]
        let kind = match header >> 30 {
            0 => PacketKind::Type0 {
                base_index: (header & 0xFFFF) as u16,
            },
            3 => PacketKind::Type3 {
                opcode: ((header >> 8) & 0xFF) as u8,
            },
            t => {
                return Err(CsError::Driver(format!(
                    "unsupported type-{t} packet header 0x{header:08x} at dword {pos}"
                )));
            }
        };

        let start = pos + 1;
        let end = start + count;
        if end > dwords.len() {
            return Err(CsError::Driver(format!(
                "packet at dword {pos} declares {count} dwords but only {} remain",
                dwords.len() - start
            )));
        }

        packets.push(Packet {
            kind,
            offset: pos,
            payload: dwords[start..end].to_vec(),
        });
        pos = end;
    }

    Ok(packets)
}
