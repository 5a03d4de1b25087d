pub mod error;
pub mod version;
pub mod block;
pub mod aligned;
pub mod io_stream;
pub mod index;
pub mod room;

pub use error::{Result, RoomFileError};
pub use version::RoomFileVersion;
pub use block::{BlockHeader, BlockId, RoomBlockKind};
pub use aligned::{AlignedReader, AlignedWriter};
pub use io_stream::{ReadOptions, RoomFileReader, RoomFileWriter, WriteOptions};
pub use index::{BlockEntry, BlockIndex};
pub use room::RoomFile;
