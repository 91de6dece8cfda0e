pub mod manager;

use crate::drm::ioctl::{RADEON_GEM_DOMAIN_CPU, RADEON_GEM_DOMAIN_GTT, RADEON_GEM_DOMAIN_VRAM};
use std::fmt;
use std::sync::Arc;

bitflags::bitflags! {
    /// Memory residency classes a buffer may be read from or written to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Domains: u32 {
        const CPU  = RADEON_GEM_DOMAIN_CPU;
        const GTT  = RADEON_GEM_DOMAIN_GTT;
        const VRAM = RADEON_GEM_DOMAIN_VRAM;
    }
}

/// A single budgeted domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Vram,
    Gtt,
}

impl Domain {
    /// The domain a buffer with these placement flags is charged against.
    ///
    /// VRAM wins over GTT when both are allowed. CPU-only placement is not budgeted.
    #[must_use]
    pub fn from_domains(domains: Domains) -> Option<Self> {
        if domains.contains(Domains::VRAM) {
            Some(Self::Vram)
        } else if domains.contains(Domains::GTT) {
            Some(Self::Gtt)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn flags(self) -> Domains {
        match self {
            Self::Vram => Domains::VRAM,
            Self::Gtt => Domains::GTT,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vram => f.write_str("VRAM"),
            Self::Gtt => f.write_str("GTT"),
        }
    }
}

/// A GPU-visible buffer that command streams may reference.
///
/// Lifetime is owned by whoever allocated it; streams only hold `Arc` clones until the
/// next flush.
pub trait BufferObject: fmt::Debug {
    /// Handle the command processor knows this buffer by, or `None` if it is not
    /// registered with it and therefore cannot be submitted.
    fn handle(&self) -> Option<u32>;

    /// Size in bytes.
    fn size(&self) -> u64;

    /// Domains the buffer was created for.
    fn domains(&self) -> Domains;

    /// Current GPU address.
    ///
    /// Queried at flush time, since placement may change after a reference is recorded.
    /// Buffers relocated by the kernel return 0.
    fn gpu_address(&self) -> u64;
}

pub type SharedBuffer = Arc<dyn BufferObject>;

/// Identity key for a shared buffer, independent of vtable pointer.
pub(crate) fn buffer_key(buffer: &SharedBuffer) -> usize {
    Arc::as_ptr(buffer).cast::<()>() as usize
}

pub use manager::{BoMapping, BufferManager, GemBuffer};
