use crate::cs::reloc::RelocationError;
use crate::cs::space::SpaceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CsError {
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DRM Driver Error: {0}")]
    Driver(String),

    #[error("Packet of {declared} dwords cannot fit in a {capacity} dword command buffer")]
    CapacityExceeded { declared: usize, capacity: usize },

    #[error("Packet declared {declared} dwords but {written} were written")]
    TransactionMismatch { declared: usize, written: usize },

    #[error("Invalid packet payload size: {0} dwords")]
    InvalidPacketSize(usize),

    #[error("Invalid command stream state: {0}")]
    InvalidState(&'static str),

    #[error("Register 0x{0:05x} is outside every known register window")]
    UnmappedRegister(u32),

    #[error("Invalid register map: {0}")]
    InvalidRegisterMap(String),

    #[error(transparent)]
    Relocation(#[from] RelocationError),

    #[error(transparent)]
    Space(#[from] SpaceError),

    #[error("Command submission failed: {0}")]
    SubmissionFailed(String),
}

// A convenient alias
pub type CsResult<T> = Result<T, CsError>;
