//! Error taxonomy for room-file loading and saving.
//!
//! Every fallible operation in this crate returns [`RoomFileError`].  Each
//! variant renders a fixed description followed by a formatted detail string
//! (versions, offsets, block names, file names).  Malformed input never
//! panics; the caller decides how to surface the failure.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = RoomFileError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum RoomFileError {
    #[error("Room file was not found or could not be opened. Filename: {}.", path.display())]
    FileOpenFailed {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Format version not supported. Required format version: {found}, supported {min} - {max}.")]
    FormatNotSupported { found: u16, min: u16, max: u16 },

    #[error("Unexpected end of file. {0}")]
    UnexpectedEof(String),

    #[error("Unknown block type. {0}")]
    UnknownBlockType(String),

    #[error("Block type is too old and not supported by this version of the engine. {0}")]
    OldBlockNotSupported(String),

    #[error("Block data overlapping. {0}")]
    BlockDataOverlapping(String),

    #[error("This engine cannot handle requested room content. {0}")]
    IncompatibleEngine(String),

    #[error("Script load failed. {0}")]
    ScriptLoadFailed(String),

    #[error("Inconsistent room data, or file is corrupted. {0}")]
    InconsistentData(String),

    #[error("Unknown format of the custom properties block. {0}")]
    PropertiesBlockFormat(String),

    #[error("Errors encountered when reading custom properties. {0}")]
    InvalidPropertyValues(String),

    #[error("Required block was not found. {0}")]
    BlockNotFound(String),

    #[error("IO error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for RoomFileError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => RoomFileError::UnexpectedEof(e.to_string()),
            _ => RoomFileError::Io(e),
        }
    }
}

impl RoomFileError {
    /// True for the end-of-data family: a truncated stream or a read past
    /// the declared end of a block.
    pub fn is_eof(&self) -> bool {
        matches!(self, RoomFileError::UnexpectedEof(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eof_io_errors_become_unexpected_eof() {
        let e: RoomFileError = io::Error::new(io::ErrorKind::UnexpectedEof, "short").into();
        assert!(e.is_eof());

        let e: RoomFileError = io::Error::new(io::ErrorKind::PermissionDenied, "nope").into();
        assert!(matches!(e, RoomFileError::Io(_)));
    }

    #[test]
    fn format_error_embeds_versions() {
        let e = RoomFileError::FormatNotSupported { found: 40, min: 17, max: 35 };
        let msg = e.to_string();
        assert!(msg.contains("40"));
        assert!(msg.contains("17 - 35"));
    }
}
