use crate::cs::memory::{Domains, SharedBuffer, buffer_key};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelocationError {
    #[error("Buffer object has no submittable backing allocation")]
    Unsupported,
}

/// Width of the GPU address placeholder at a relocation site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressWidth {
    /// One dword holding the low 32 bits.
    Dword,
    /// Two dwords, low then high.
    Qword,
}

impl AddressWidth {
    #[must_use]
    pub const fn dwords(self) -> usize {
        match self {
            Self::Dword => 1,
            Self::Qword => 2,
        }
    }
}

/// One patch site in the command buffer.
#[derive(Debug, Clone)]
pub struct RelocationEntry {
    pub buffer: SharedBuffer,
    /// Byte offset of the placeholder within the stream.
    pub offset: usize,
    pub read_domains: Domains,
    pub write_domains: Domains,
    pub width: AddressWidth,
    /// Index into [`RelocationTable::buffers`].
    pub buffer_index: usize,
}

/// A distinct buffer referenced by the pending stream, with merged domains.
#[derive(Debug, Clone)]
pub struct ReferencedBuffer {
    pub buffer: SharedBuffer,
    pub handle: u32,
    pub read_domains: Domains,
    pub write_domains: Domains,
}

#[derive(Debug, Default)]
pub struct RelocationTable {
    entries: Vec<RelocationEntry>,
    buffers: Vec<ReferencedBuffer>,
    by_key: HashMap<usize, usize>,
}

impl RelocationTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a placeholder written at `offset` bytes into the stream.
    ///
    /// Returns the index of the buffer in the de-duplicated buffer list.
    ///
    /// # Errors
    /// `Unsupported` if the buffer has no handle the command processor can resolve.
    pub fn record(
        &mut self,
        buffer: &SharedBuffer,
        offset: usize,
        read_domains: Domains,
        write_domains: Domains,
        width: AddressWidth,
    ) -> Result<usize, RelocationError> {
        let handle = buffer.handle().ok_or(RelocationError::Unsupported)?;
        let buffer_index = self.reference(buffer, handle, read_domains, write_domains);

        self.entries.push(RelocationEntry {
            buffer: Arc::clone(buffer),
            offset,
            read_domains,
            write_domains,
            width,
            buffer_index,
        });

        Ok(buffer_index)
    }

    fn reference(
        &mut self,
        buffer: &SharedBuffer,
        handle: u32,
        read_domains: Domains,
        write_domains: Domains,
    ) -> usize {
        let key = buffer_key(buffer);
        if let Some(&idx) = self.by_key.get(&key) {
            let entry = &mut self.buffers[idx];
            entry.read_domains |= read_domains;
            entry.write_domains |= write_domains;
            return idx;
        }

        let idx = self.buffers.len();
        self.buffers.push(ReferencedBuffer {
            buffer: Arc::clone(buffer),
            handle,
            read_domains,
            write_domains,
        });
        self.by_key.insert(key, idx);
        idx
    }

    #[must_use]
    pub fn entries(&self) -> &[RelocationEntry] {
        &self.entries
    }

    #[must_use]
    pub fn buffers(&self) -> &[ReferencedBuffer] {
        &self.buffers
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry past the first `len`, rebuilding the buffer list.
    pub fn truncate(&mut self, len: usize) {
        if len >= self.entries.len() {
            return;
        }
        let kept: Vec<RelocationEntry> = self.entries.drain(..len).collect();
        self.clear();

        for mut entry in kept {
            // Handles were validated when the entry was first recorded.
            let handle = entry.buffer.handle().unwrap_or_default();
            entry.buffer_index =
                self.reference(&entry.buffer, handle, entry.read_domains, entry.write_domains);
            self.entries.push(entry);
        }
    }

    /// Writes each buffer's current GPU address into its placeholder.
    ///
    /// Sites that fall outside `dwords` are skipped.
    pub fn patch(&self, dwords: &mut [u32]) {
        for entry in &self.entries {
            let address = entry.buffer.gpu_address();
            let at = entry.offset / 4;

            #[allow(clippy::cast_possible_truncation)]
            let words = [address as u32, (address >> 32) as u32];

            let Some(site) = dwords.get_mut(at..at + entry.width.dwords()) else {
                log::error!(
                    "CS: relocation at byte {} lies outside the {} dword stream",
                    entry.offset,
                    dwords.len()
                );
                continue;
            };
            site.copy_from_slice(&words[..entry.width.dwords()]);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.buffers.clear();
        self.by_key.clear();
    }
}
