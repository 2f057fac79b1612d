use crate::sst::SstState;
use std::{io, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// There was an error while opening a file
    #[error("Failed to open file `{}`: {error}", .path.display())]
    FileOpenError { path: PathBuf, error: io::Error },

    /// There was an error while creating a file
    #[error("Failed to create file `{}`: {error}", .path.display())]
    FileCreationError { path: PathBuf, error: io::Error },

    #[error("Failed to create directory `{}`: {error}", .path.display())]
    DirCreationError { path: PathBuf, error: io::Error },

    /// There was an error while enumerating the data directory
    #[error("Failed to read directory `{}`: {error}", .path.display())]
    DirReadError { path: PathBuf, error: io::Error },

    /// There was an error while attempting to read a file
    #[error("Failed to read file `{}`: {error}", .path.display())]
    FileReadError { path: PathBuf, error: io::Error },

    /// There was an error while attempting to write to a file
    #[error("Failed to write to file `{}`: {error}", .path.display())]
    FileWriteError { path: PathBuf, error: io::Error },

    /// There was an error while attempting to seek in a file
    #[error("File seek error: {0}")]
    FileSeekError(#[source] io::Error),

    /// There was an error while attempting to sync writes to a file
    #[error("Failed to sync writes to file: {error}")]
    FileSyncError { error: io::Error },

    #[error("Failed to get file metadata: {0}")]
    FileMetadataError(#[source] io::Error),

    /// There was an error while unlinking an sst file
    #[error("Failed to remove file `{}`: {error}", .path.display())]
    FileRemoveError { path: PathBuf, error: io::Error },

    /// Codec found inconsistent lengths while decoding a record
    #[error("Malformed sst record: {reason}")]
    MalformedRecord { reason: &'static str },

    /// No bytes remain in the sorted run
    #[error("End of sorted run")]
    EndOfRun,

    /// The sst file lacks the done marker, its write was interrupted
    #[error("Incomplete sst file `{}`", .path.display())]
    IncompleteSst { path: PathBuf },

    /// Lifecycle violation, transitions must follow the sst state machine
    #[error("Invalid sst state transition `{from:?}` -> `{to:?}` for `{filename}`")]
    InvalidTransition {
        from: SstState,
        to: SstState,
        filename: String,
    },

    /// A registry operation referenced a level that is not tracked
    #[error("Level `{level}` not found in registry")]
    LevelNotFound { level: u32 },

    /// A registry operation referenced an sst not present in its level
    #[error("Sst `{filename}` not found in level `{level}`")]
    SstNotFound { filename: String, level: u32 },

    /// The flush queue was closed while the engine still had tables to enqueue
    #[error("Flush queue has been closed")]
    FlushQueueClosed,

    #[error("Flush signal channel was overloaded with signals, please check all signal consumers")]
    FlushSignalOverflowError,
}
