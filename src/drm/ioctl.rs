use crate::utils::{iow, iowr};

// ===============================================================================================
// DRM Core
// ===============================================================================================

pub const DRM_IOCTL_BASE: u32 = 0x64; // 'd'
pub const DRM_COMMAND_BASE: u32 = 0x40;

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct SetVersionArgs {
    pub drm_di_major: i32,
    pub drm_di_minor: i32,
    pub drm_dd_major: i32,
    pub drm_dd_minor: i32,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct GemCloseArgs {
    pub handle: u32,
    pub pad: u32,
}

// ===============================================================================================
// Radeon GEM
// ===============================================================================================

pub const RADEON_GEM_DOMAIN_CPU: u32 = 0x1;
pub const RADEON_GEM_DOMAIN_GTT: u32 = 0x2;
pub const RADEON_GEM_DOMAIN_VRAM: u32 = 0x4;

pub const RADEON_GEM_NO_BACKING_STORE: u32 = 1 << 0;
pub const RADEON_GEM_GTT_UC: u32 = 1 << 1;
pub const RADEON_GEM_GTT_WC: u32 = 1 << 2;
pub const RADEON_GEM_CPU_ACCESS: u32 = 1 << 3;
pub const RADEON_GEM_NO_CPU_ACCESS: u32 = 1 << 4;

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct GemInfoArgs {
    pub gart_size: u64,
    pub vram_size: u64,
    pub vram_visible: u64,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct GemCreateArgs {
    pub size: u64,
    pub alignment: u64,
    pub handle: u32,
    pub initial_domain: u32,
    pub flags: u32,
    pub pad: u32,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct GemMmapArgs {
    pub handle: u32,
    pub pad: u32,
    pub offset: u64,
    pub size: u64,
    /// Filled by the kernel with the fake offset to pass to `mmap`.
    pub addr_ptr: u64,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct GemSetDomainArgs {
    pub handle: u32,
    pub read_domains: u32,
    pub write_domain: u32,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct GemWaitIdleArgs {
    pub handle: u32,
    pub pad: u32,
}

// ===============================================================================================
// Radeon Command Submission
// ===============================================================================================

pub const RADEON_CHUNK_ID_RELOCS: u32 = 0x01;
pub const RADEON_CHUNK_ID_IB: u32 = 0x02;

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct CsChunk {
    pub chunk_id: u32,
    pub length_dw: u32,
    pub chunk_data: u64,
}

/// One entry of the `RADEON_CHUNK_ID_RELOCS` chunk.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct CsReloc {
    pub handle: u32,
    pub read_domains: u32,
    pub write_domain: u32,
    pub flags: u32,
}

/// Size of a `CsReloc` in dwords, as reported in the chunk's `length_dw`.
pub const CS_RELOC_DWORDS: u32 = (std::mem::size_of::<CsReloc>() / 4) as u32;

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct CsArgs {
    pub num_chunks: u32,
    pub cs_id: u32,
    /// Pointer to an array of `num_chunks` pointers, each to a `CsChunk`.
    pub chunks: u64,
    pub gart_limit: u64,
    pub vram_limit: u64,
}

const _: () = assert!(std::mem::size_of::<GemCreateArgs>() == 32);
const _: () = assert!(std::mem::size_of::<GemMmapArgs>() == 32);
const _: () = assert!(std::mem::size_of::<CsChunk>() == 16);
const _: () = assert!(std::mem::size_of::<CsArgs>() == 32);

// ===============================================================================================
// IOCTL Numbers
// ===============================================================================================

pub const DRM_IOCTL_SET_VERSION: u32 = iowr::<SetVersionArgs>(DRM_IOCTL_BASE, 0x07);
pub const DRM_IOCTL_GEM_CLOSE: u32 = iow::<GemCloseArgs>(DRM_IOCTL_BASE, 0x09);

pub const DRM_IOCTL_RADEON_GEM_INFO: u32 =
    iowr::<GemInfoArgs>(DRM_IOCTL_BASE, DRM_COMMAND_BASE + 0x1c);
pub const DRM_IOCTL_RADEON_GEM_CREATE: u32 =
    iowr::<GemCreateArgs>(DRM_IOCTL_BASE, DRM_COMMAND_BASE + 0x1d);
pub const DRM_IOCTL_RADEON_GEM_MMAP: u32 =
    iowr::<GemMmapArgs>(DRM_IOCTL_BASE, DRM_COMMAND_BASE + 0x1e);
pub const DRM_IOCTL_RADEON_GEM_SET_DOMAIN: u32 =
    iowr::<GemSetDomainArgs>(DRM_IOCTL_BASE, DRM_COMMAND_BASE + 0x23);
pub const DRM_IOCTL_RADEON_GEM_WAIT_IDLE: u32 =
    iow::<GemWaitIdleArgs>(DRM_IOCTL_BASE, DRM_COMMAND_BASE + 0x24);
pub const DRM_IOCTL_RADEON_CS: u32 = iowr::<CsArgs>(DRM_IOCTL_BASE, DRM_COMMAND_BASE + 0x26);
