//! Command stream construction: packet encoding, register windows, relocations and
//! memory accounting.

pub mod builder;
pub mod memory;
pub mod packet;
pub mod registers;
pub mod reloc;
pub mod space;
pub mod stream;
pub mod submit;

pub use builder::CommandStreamBuilder;
pub use stream::CommandStream;
