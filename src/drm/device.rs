use crate::drm::ioctl::{
    CsArgs, DRM_IOCTL_GEM_CLOSE, DRM_IOCTL_RADEON_CS, DRM_IOCTL_RADEON_GEM_CREATE,
    DRM_IOCTL_RADEON_GEM_INFO, DRM_IOCTL_RADEON_GEM_MMAP, DRM_IOCTL_RADEON_GEM_SET_DOMAIN,
    DRM_IOCTL_RADEON_GEM_WAIT_IDLE, DRM_IOCTL_SET_VERSION, GemCloseArgs, GemCreateArgs,
    GemInfoArgs, GemMmapArgs, GemSetDomainArgs, GemWaitIdleArgs, SetVersionArgs,
};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::RawFd;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::sync::Arc;

/// A handle to an opened radeon DRM node (e.g. `/dev/dri/card0`).
///
/// The file is wrapped in an `Arc`, so the handle is cheap to clone into the objects
/// (buffer objects, submitters) that must keep the node open for their own lifetime.
#[derive(Clone, Debug)]
pub struct RadeonDevice {
    pub file: Arc<File>,
}

impl RadeonDevice {
    /// Opens the DRM node at `path`.
    ///
    /// # Errors
    /// Returns an error if the node cannot be opened (driver not loaded, permissions).
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        Ok(Self {
            file: Arc::new(file),
        })
    }

    /// Generic unsafe helper to execute an IOCTL.
    ///
    /// Retries on `EINTR`/`EAGAIN` like libdrm's `drmIoctl`.
    ///
    /// # Safety
    /// The caller must ensure that `arg` points to valid memory appropriate for the specific `cmd`.
    unsafe fn ioctl<T>(&self, cmd: u32, arg: &mut T) -> io::Result<()> {
        loop {
            let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), cmd as _, arg as *mut T) };
            if ret >= 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR | libc::EAGAIN) => {}
                _ => return Err(err),
            }
        }
    }

    // ===========================================================================================
    // Versioning
    // ===========================================================================================

    /// Negotiate the DRM interface version.
    ///
    /// Passing `-1` for the driver version leaves it unchanged.
    pub fn set_interface_version(&self, di_major: i32, di_minor: i32) -> io::Result<SetVersionArgs> {
        let mut args = SetVersionArgs {
            drm_di_major: di_major,
            drm_di_minor: di_minor,
            drm_dd_major: -1,
            drm_dd_minor: -1,
        };
        unsafe {
            self.ioctl(DRM_IOCTL_SET_VERSION, &mut args)?;
        }
        Ok(args)
    }

    // ===========================================================================================
    // Memory Management
    // ===========================================================================================

    /// Query GART and VRAM sizes.
    pub fn gem_info(&self) -> io::Result<GemInfoArgs> {
        let mut args = GemInfoArgs::default();
        unsafe {
            self.ioctl(DRM_IOCTL_RADEON_GEM_INFO, &mut args)?;
        }
        Ok(args)
    }

    /// Create a GEM buffer object.
    ///
    /// On success, `args.handle` will contain the new object's handle.
    pub fn gem_create(&self, args: &mut GemCreateArgs) -> io::Result<()> {
        unsafe { self.ioctl(DRM_IOCTL_RADEON_GEM_CREATE, args) }
    }

    /// Look up the fake mmap offset for a GEM object.
    pub fn gem_mmap(&self, handle: u32, size: u64) -> io::Result<u64> {
        let mut args = GemMmapArgs {
            handle,
            size,
            ..Default::default()
        };
        unsafe {
            self.ioctl(DRM_IOCTL_RADEON_GEM_MMAP, &mut args)?;
        }
        Ok(args.addr_ptr)
    }

    /// Move a GEM object to the given domains before CPU access.
    pub fn gem_set_domain(
        &self,
        handle: u32,
        read_domains: u32,
        write_domain: u32,
    ) -> io::Result<()> {
        let mut args = GemSetDomainArgs {
            handle,
            read_domains,
            write_domain,
        };
        unsafe { self.ioctl(DRM_IOCTL_RADEON_GEM_SET_DOMAIN, &mut args) }
    }

    /// Block until the GPU is done with a GEM object.
    pub fn gem_wait_idle(&self, handle: u32) -> io::Result<()> {
        let mut args = GemWaitIdleArgs { handle, pad: 0 };
        unsafe { self.ioctl(DRM_IOCTL_RADEON_GEM_WAIT_IDLE, &mut args) }
    }

    /// Release a GEM handle.
    pub fn gem_close(&self, handle: u32) -> io::Result<()> {
        let mut args = GemCloseArgs { handle, pad: 0 };
        unsafe { self.ioctl(DRM_IOCTL_GEM_CLOSE, &mut args) }
    }

    // ===========================================================================================
    // Command Submission
    // ===========================================================================================

    /// Submit a command stream.
    ///
    /// `args.chunks` must point to an array of `args.num_chunks` chunk pointers that stay
    /// valid for the duration of the call.
    pub fn cs(&self, args: &mut CsArgs) -> io::Result<()> {
        unsafe { self.ioctl(DRM_IOCTL_RADEON_CS, args) }
    }
}

impl AsRawFd for RadeonDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}
