use crate::cs::reloc::{ReferencedBuffer, RelocationEntry};
use crate::drm::device::RadeonDevice;
use crate::drm::ioctl::{
    CS_RELOC_DWORDS, CsArgs, CsChunk, CsReloc, RADEON_CHUNK_ID_IB, RADEON_CHUNK_ID_RELOCS,
};
use crate::error::{CsError, CsResult};

/// Everything a command processor needs to execute one flush.
#[derive(Debug, Clone, Copy)]
pub struct Submission<'a> {
    /// Encoded packets with relocation sites already patched.
    pub dwords: &'a [u32],
    pub relocations: &'a [RelocationEntry],
    /// Distinct buffers the stream references, in relocation-index order.
    pub buffers: &'a [ReferencedBuffer],
    pub vram_limit: Option<u64>,
    pub gtt_limit: Option<u64>,
}

/// Hands a finished command buffer to the command processor.
///
/// Submission is synchronous: when `submit` returns, the target no longer reads from
/// the submission's slices.
pub trait SubmitTarget {
    /// # Errors
    /// Any error is reported to the stream's caller as `SubmissionFailed`.
    fn submit(&mut self, submission: &Submission<'_>) -> CsResult<()>;

    /// Whether each relocation must be followed by a `NOP` packet holding the dword
    /// offset of its buffer's record in the RELOCS chunk.
    ///
    /// The radeon kernel parser reads these packets to resolve relocation sites.
    fn wants_reloc_packets(&self) -> bool {
        false
    }
}

/// Submits through the radeon `DRM_RADEON_CS` ioctl.
#[derive(Debug, Clone)]
pub struct DrmSubmitter {
    device: RadeonDevice,
}

impl DrmSubmitter {
    #[must_use]
    pub fn new(device: &RadeonDevice) -> Self {
        Self {
            device: device.clone(),
        }
    }

    /// The RELOCS chunk: one record per distinct buffer.
    #[must_use]
    pub fn reloc_records(buffers: &[ReferencedBuffer]) -> Vec<CsReloc> {
        buffers
            .iter()
            .map(|b| CsReloc {
                handle: b.handle,
                read_domains: b.read_domains.bits(),
                write_domain: b.write_domains.bits(),
                flags: 0,
            })
            .collect()
    }
}

impl SubmitTarget for DrmSubmitter {
    fn wants_reloc_packets(&self) -> bool {
        true
    }

    #[allow(clippy::cast_possible_truncation)]
    fn submit(&mut self, submission: &Submission<'_>) -> CsResult<()> {
        let relocs = Self::reloc_records(submission.buffers);

        let chunks = [
            CsChunk {
                chunk_id: RADEON_CHUNK_ID_IB,
                length_dw: submission.dwords.len() as u32,
                chunk_data: submission.dwords.as_ptr() as u64,
            },
            CsChunk {
                chunk_id: RADEON_CHUNK_ID_RELOCS,
                length_dw: relocs.len() as u32 * CS_RELOC_DWORDS,
                chunk_data: relocs.as_ptr() as u64,
            },
        ];
        let chunk_ptrs = [
            &raw const chunks[0] as u64,
            &raw const chunks[1] as u64,
        ];

        let mut args = CsArgs {
            num_chunks: chunk_ptrs.len() as u32,
            cs_id: 0,
            chunks: chunk_ptrs.as_ptr() as u64,
            gart_limit: submission.gtt_limit.unwrap_or(0),
            vram_limit: submission.vram_limit.unwrap_or(0),
        };

        self.device.cs(&mut args).map_err(|e| {
            CsError::Driver(format!(
                "DRM_RADEON_CS rejected {} dwords with {} buffers: {e}",
                submission.dwords.len(),
                relocs.len()
            ))
        })
    }
}
