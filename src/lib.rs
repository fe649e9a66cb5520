//! stowzip builds Zip archives out of directory trees:
//!
//! ```no_run
//! # use stowzip::*;
//! let mut zip = ZipWriter::new();
//! zip.add_dir("photos", None, &WalkOptions::default())?;
//! let bytes_written = zip.finish_to_path("photos.zip")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Each file is streamed through a DEFLATE compressor (or stored as-is)
//! while its CRC-32 is computed on the fly.
//! Since we don't know a file's compressed size or CRC until we've read it,
//! its local header goes out with those fields zeroed,
//! and a data descriptor after the file's contents fills them in.
//! The central directory at the back of the archive has everything.
//!
//! Walking a directory can skip hidden files and anything under
//! a given set of directories:
//! ```no_run
//! # use stowzip::*;
//! # use camino::Utf8Path;
//! let mut zip = ZipWriter::with_options(WriterOptions::default().compression_level(9));
//! let walk = WalkOptions::default()
//!     .ignore_hidden(true)
//!     .exclude("project/target");
//! // Files that couldn't be read are logged and skipped,
//! // but we get a report of what happened to each one.
//! let outcomes = zip.add_dir("project", Some(Utf8Path::new("src")), &walk)?;
//! for outcome in &outcomes {
//!     if let Err(e) = &outcome.result {
//!         eprintln!("Skipped {}: {}", outcome.path.display(), e);
//!     }
//! }
//! zip.finish(std::fs::File::create("project.zip")?)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! The whole archive is built in memory and written out in one go
//! when it's finished, so it must fit in RAM.
//! Zip64 isn't supported either: files and archives over 4 GB,
//! or archives with more than 65534 entries, are errors.

pub mod result;
pub mod walk;
pub mod write;

pub use walk::WalkOptions;
pub use write::CompressionMethod;
pub use write::WriterOptions;
pub use write::ZipWriter;

mod crc_reader;
mod spec;
mod width;
