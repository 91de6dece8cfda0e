pub mod cs;
pub mod drm;
pub mod error;
pub mod utils;

pub use cs::{CommandStream, CommandStreamBuilder};
pub use error::{CsError, CsResult};
