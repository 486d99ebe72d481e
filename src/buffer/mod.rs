//! Buffer abstractions for CubeSQL frame encoding/decoding

mod read;
mod write;

pub use read::ReadBuffer;
pub use write::WriteBuffer;
