#![allow(clippy::cast_possible_truncation)]

use crate::cs::memory::{BufferObject, Domains};
use crate::drm::device::RadeonDevice;
use crate::drm::ioctl::{
    GemCreateArgs, RADEON_GEM_CPU_ACCESS, RADEON_GEM_GTT_UC, RADEON_GEM_GTT_WC,
    RADEON_GEM_NO_BACKING_STORE, RADEON_GEM_NO_CPU_ACCESS,
};
use crate::error::{CsError, CsResult};
use std::os::unix::io::AsRawFd;
use std::ptr;
use std::slice;
use std::sync::Arc;

const DEFAULT_ALIGN: u64 = 4096;

bitflags::bitflags! {
    /// Creation flags passed through to `DRM_RADEON_GEM_CREATE`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CreateFlags: u32 {
        const NO_BACKING_STORE = RADEON_GEM_NO_BACKING_STORE;
        const GTT_UC           = RADEON_GEM_GTT_UC;
        const GTT_WC           = RADEON_GEM_GTT_WC;
        const CPU_ACCESS       = RADEON_GEM_CPU_ACCESS;
        const NO_CPU_ACCESS    = RADEON_GEM_NO_CPU_ACCESS;
    }
}

/// Allocates GEM buffer objects on a radeon device.
#[derive(Debug, Clone)]
pub struct BufferManager {
    device: RadeonDevice,
}

impl BufferManager {
    #[must_use]
    pub fn new(device: &RadeonDevice) -> Self {
        Self {
            device: device.clone(),
        }
    }

    /// Creates a buffer object of `size` bytes placed in `domains`.
    ///
    /// An alignment of 0 selects page alignment. The GEM handle is closed when the last
    /// `Arc` to the returned buffer is dropped.
    pub fn allocate(
        &self,
        size: u64,
        alignment: u64,
        domains: Domains,
        flags: CreateFlags,
    ) -> CsResult<Arc<GemBuffer>> {
        let size = if size == 0 { DEFAULT_ALIGN } else { size };
        let alignment = if alignment == 0 {
            DEFAULT_ALIGN
        } else {
            alignment
        };

        let mut args = GemCreateArgs {
            size,
            alignment,
            initial_domain: domains.bits(),
            flags: flags.bits(),
            ..Default::default()
        };

        self.device.gem_create(&mut args).inspect_err(|e| {
            log::error!("GEM: create of {size} bytes in {domains:?} failed: {e}");
        })?;

        log::trace!(
            "GEM: created handle {} ({size} bytes, {domains:?})",
            args.handle
        );

        Ok(Arc::new(GemBuffer {
            device: self.device.clone(),
            handle: args.handle,
            size,
            domains,
        }))
    }
}

/// A GEM buffer object. Dropping it closes the handle.
#[derive(Debug)]
pub struct GemBuffer {
    device: RadeonDevice,
    handle: u32,
    size: u64,
    domains: Domains,
}

impl GemBuffer {
    /// Maps the whole buffer into the process address space.
    ///
    /// # Errors
    /// Returns `Io` if the kernel refuses the mmap offset lookup or `mmap` fails.
    pub fn map(&self, writable: bool) -> CsResult<BoMapping<'_>> {
        let offset = self.device.gem_mmap(self.handle, self.size)?;

        let prot = if writable {
            libc::PROT_READ | libc::PROT_WRITE
        } else {
            libc::PROT_READ
        };
        let len = self.size as usize;

        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                prot,
                libc::MAP_SHARED,
                self.device.as_raw_fd(),
                offset as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(CsError::Io(std::io::Error::last_os_error()));
        }

        Ok(BoMapping {
            buffer: self,
            ptr: ptr.cast::<u8>(),
            len,
            writable,
        })
    }

    /// Blocks until the GPU has finished with this buffer.
    pub fn wait_idle(&self) -> CsResult<()> {
        Ok(self.device.gem_wait_idle(self.handle)?)
    }
}

impl BufferObject for GemBuffer {
    fn handle(&self) -> Option<u32> {
        (self.handle != 0).then_some(self.handle)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn domains(&self) -> Domains {
        self.domains
    }

    // The kernel patches the real placement in while processing the relocation chunk.
    fn gpu_address(&self) -> u64 {
        0
    }
}

impl Drop for GemBuffer {
    fn drop(&mut self) {
        if let Err(e) = self.device.gem_close(self.handle) {
            log::error!("GEM: failed to close handle {}: {e}", self.handle);
        }
    }
}

/// A CPU mapping of a [`GemBuffer`]. Unmapped on drop.
#[derive(Debug)]
pub struct BoMapping<'a> {
    buffer: &'a GemBuffer,
    ptr: *mut u8,
    len: usize,
    writable: bool,
}

impl BoMapping<'_> {
    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // Safety: `ptr` is a live mapping of `len` bytes until `self` drops.
        unsafe { slice::from_raw_parts(self.ptr, self.len) }
    }

    /// Mutable view, or `None` for a read-only mapping.
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        if !self.writable {
            return None;
        }
        // Safety: as above, and the mapping was created with PROT_WRITE.
        Some(unsafe { slice::from_raw_parts_mut(self.ptr, self.len) })
    }

    #[must_use]
    pub fn buffer(&self) -> &GemBuffer {
        self.buffer
    }
}

impl Drop for BoMapping<'_> {
    fn drop(&mut self) {
        let ret = unsafe { libc::munmap(self.ptr.cast(), self.len) };
        if ret != 0 {
            log::error!(
                "GEM: munmap of handle {} failed: {}",
                self.buffer.handle,
                std::io::Error::last_os_error()
            );
        }
    }
}
