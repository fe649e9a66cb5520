//! Error types and the related `Result<T>`

use std::path::PathBuf;

use thiserror::Error;

pub type ZipResult<T> = Result<T, ZipError>;

#[derive(Debug, Error)]
pub enum ZipError {
    /// An error from underlying I/O
    /// (reading a source file, compressing it, or writing the archive out)
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    /// Walking a source directory failed partway through,
    /// so we couldn't produce a list of files to add.
    #[error("Couldn't walk directory entry {}", .path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    /// A user-provided path couldn't be turned into a name in the archive.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// A value doesn't fit in its field in a classic (non-Zip64) archive.
    ///
    /// Zip64 isn't supported, so instead of silently truncating
    /// a size, offset, or count, we bail.
    #[error("{value} doesn't fit in the {field} field of a Zip archive")]
    Unrepresentable { field: &'static str, value: u64 },

    /// The archive was finished without any files in it.
    #[error("No files in Zip archive")]
    EmptyArchive,
}
