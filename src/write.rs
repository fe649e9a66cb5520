//! Tools for writing a ZIP archive.
//!
//! To start writing an archive, create a [`ZipWriter`], add files to it,
//! then [`finish()`] it into a file or any other `io::Write`.
//!
//! The whole archive is assembled in memory, and nothing is written out
//! until it's finished. If something goes wrong along the way,
//! there's no half-written archive lying around.
//!
//! [`ZipWriter`]: struct.ZipWriter.html
//! [`finish()`]: struct.ZipWriter.html#method.finish

use std::fmt;
use std::fs::File;
use std::io;
use std::io::prelude::*;
use std::path::{Path, PathBuf};

use camino::{Utf8Component, Utf8Path};
use chrono::{DateTime, Local, NaiveDateTime};
use flate2::write::DeflateEncoder;
use flate2::Compression;
use log::*;
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::crc_reader::Crc32Reader;
use crate::result::*;
use crate::spec;
use crate::walk::{self, WalkOptions};
use crate::width::u32_field;

/// The compression method used to store a file
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompressionMethod {
    /// The file is stored as-is.
    Stored,
    /// The file is [DEFLATE](https://en.wikipedia.org/wiki/DEFLATE)d.
    /// This is the most common format used by ZIP archives.
    Deflate,
}

/// Where a file's "last modified" time comes from
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Timestamps {
    /// The time the file was added to the archive
    #[default]
    Now,
    /// The source file's modification time
    FileModified,
}

impl Timestamps {
    fn for_file(self, file: &File) -> io::Result<NaiveDateTime> {
        match self {
            Timestamps::Now => Ok(Local::now().naive_local()),
            Timestamps::FileModified => {
                let modified = file.metadata()?.modified()?;
                Ok(DateTime::<Local>::from(modified).naive_local())
            }
        }
    }
}

/// Settings shared by every file added to a [`ZipWriter`]
///
/// [`ZipWriter`]: struct.ZipWriter.html
#[derive(Debug, Clone, Default)]
pub struct WriterOptions {
    /// DEFLATE compression level
    pub compression: Compression,

    /// Store files without compressing them.
    pub store_only: bool,

    pub timestamps: Timestamps,
}

impl WriterOptions {
    /// Sets the DEFLATE level, from 0 (fastest) to 9 (smallest).
    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression = Compression::new(level.min(9));
        self
    }

    pub fn store_only(mut self, store: bool) -> Self {
        self.store_only = store;
        self
    }

    pub fn timestamps(mut self, timestamps: Timestamps) -> Self {
        self.timestamps = timestamps;
        self
    }

    fn method(&self) -> CompressionMethod {
        if self.store_only {
            CompressionMethod::Stored
        } else {
            CompressionMethod::Deflate
        }
    }
}

/// Metadata for a file that's been added to the archive.
///
/// This is everything its central directory entry is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// The file's path in the archive, separated with `/`
    pub name: String,

    /// Compression algorithm used to store the file
    pub compression_method: CompressionMethod,

    /// General purpose bit flags, as written in the local header
    pub flags: u16,

    /// The date and time stamped on the file
    pub last_modified: NaiveDateTime,

    /// The CRC-32 of the uncompressed file
    pub crc32: u32,

    /// Compressed size of the file in bytes
    pub compressed_size: u64,

    /// Uncompressed size of the file in bytes
    pub size: u64,

    /// The offset to the local file header in the archive
    pub header_offset: u64,
}

/// The result of adding one file as part of a batch
/// (see [`ZipWriter::add_paths()`])
///
/// [`ZipWriter::add_paths()`]: struct.ZipWriter.html#method.add_paths
#[derive(Debug)]
pub struct AddOutcome {
    /// The file's path, relative to the directory it was added from
    pub path: PathBuf,
    pub result: ZipResult<()>,
}

/// Everything written to the archive so far, in order.
#[derive(Default)]
struct ByteQueue {
    chunks: Vec<Vec<u8>>,
    /// The sum of all chunk lengths, i.e., the current offset in the archive.
    len: u64,
}

/// A spot in a [`ByteQueue`] we can roll back to.
#[derive(Debug, Clone, Copy)]
struct QueueMark {
    chunks: usize,
    len: u64,
}

impl ByteQueue {
    fn len(&self) -> u64 {
        self.len
    }

    fn push(&mut self, chunk: Vec<u8>) {
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len() as u64;
        self.chunks.push(chunk);
    }

    fn mark(&self) -> QueueMark {
        QueueMark {
            chunks: self.chunks.len(),
            len: self.len,
        }
    }

    fn rollback(&mut self, mark: QueueMark) {
        self.chunks.truncate(mark.chunks);
        self.len = mark.len;
    }

    /// Writes out every chunk, in order, emptying the queue.
    fn drain_into<W: Write>(&mut self, sink: &mut W) -> io::Result<u64> {
        let mut written = 0;
        for chunk in self.chunks.drain(..) {
            sink.write_all(&chunk)?;
            written += chunk.len() as u64;
        }
        Ok(written)
    }
}

impl fmt::Debug for ByteQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteQueue")
            .field("chunks", &self.chunks.len())
            .field("len", &self.len)
            .finish()
    }
}

impl Write for ByteQueue {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.push(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Pumps `source` through the compressor into `sink`.
///
/// Returns the CRC-32 and length of what was read from `source`.
fn compress<R: Read, W: Write>(
    source: R,
    method: CompressionMethod,
    level: Compression,
    mut sink: W,
) -> io::Result<(u32, u64)> {
    let mut reader = Crc32Reader::new(source);
    match method {
        CompressionMethod::Stored => {
            io::copy(&mut reader, &mut sink)?;
            sink.flush()?;
        }
        CompressionMethod::Deflate => {
            let mut encoder = DeflateEncoder::new(sink, level);
            io::copy(&mut reader, &mut encoder)?;
            encoder.finish()?;
        }
    }
    Ok((reader.checksum(), reader.bytes_read()))
}

/// A file compressed off to the side, waiting to be placed in the archive.
#[cfg(feature = "parallel")]
struct StagedFile {
    name: String,
    method: CompressionMethod,
    last_modified: NaiveDateTime,
    crc32: u32,
    size: u64,
    body: Vec<u8>,
}

#[cfg(feature = "parallel")]
fn stage_file(
    options: &WriterOptions,
    root: &Path,
    relative: &Path,
    target_dir: Option<&Utf8Path>,
) -> ZipResult<StagedFile> {
    let name = archive_name(target_dir, relative)?;
    let source = File::open(root.join(relative))?;
    let last_modified = options.timestamps.for_file(&source)?;
    let method = options.method();
    let mut body = Vec::new();
    let (crc32, size) = compress(source, method, options.compression, &mut body)?;
    trace!("Staged {} ({} -> {} bytes)", name, size, body.len());
    Ok(StagedFile {
        name,
        method,
        last_modified,
        crc32,
        size,
        body,
    })
}

/// Builds a file's name in the archive from its path relative to the directory
/// it's being added from, nested under `target_dir` if one is given.
///
/// Components are joined with `/`, whatever the platform's separator is.
fn archive_name(target_dir: Option<&Utf8Path>, relative: &Path) -> ZipResult<String> {
    let relative = Utf8Path::from_path(relative).ok_or_else(|| {
        ZipError::InvalidPath(format!("{} isn't valid UTF-8", relative.display()))
    })?;
    let joined = match target_dir {
        Some(dir) => dir.join(relative),
        None => relative.to_owned(),
    };

    let mut name = String::new();
    for component in joined.components() {
        match component {
            Utf8Component::Prefix(prefix) => {
                return Err(ZipError::InvalidPath(format!(
                    "Prefix {} found in path {joined}",
                    prefix.as_str()
                )));
            }
            Utf8Component::RootDir => {
                warn!("Root directory found in path {joined}");
                // Archive names are always relative. Keep going.
            }
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                return Err(ZipError::InvalidPath(format!(
                    "Parent dir (..) found in path {joined}"
                )));
            }
            Utf8Component::Normal(component) => {
                if !name.is_empty() {
                    name.push('/');
                }
                name.push_str(component);
            }
        }
    }

    if name.is_empty() {
        return Err(ZipError::InvalidPath(format!("{joined} doesn't name a file")));
    }
    Ok(name)
}

/// A ZIP archive being written
///
/// ```no_run
/// # use stowzip::*;
/// let mut zip = ZipWriter::new();
/// let outcomes = zip.add_dir("some/dir", None, &WalkOptions::default())?;
/// for failed in outcomes.iter().filter(|o| o.result.is_err()) {
///     eprintln!("Skipped {}", failed.path.display());
/// }
/// let bytes_written = zip.finish_to_path("some-dir.zip")?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Default)]
pub struct ZipWriter {
    options: WriterOptions,
    /// Every byte of the archive so far
    queue: ByteQueue,
    /// The files we've finished adding, in the order they were added
    files: Vec<FileRecord>,
}

impl ZipWriter {
    pub fn new() -> Self {
        Self::with_options(WriterOptions::default())
    }

    pub fn with_options(options: WriterOptions) -> Self {
        Self {
            options,
            queue: ByteQueue::default(),
            files: Vec::new(),
        }
    }

    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    /// Returns the files added to the archive so far.
    pub fn files(&self) -> &[FileRecord] {
        &self.files
    }

    /// Returns the number of bytes in the archive so far,
    /// which is where the next thing added will start.
    pub fn offset(&self) -> u64 {
        self.queue.len()
    }

    /// Adds `root/relative` to the archive as `relative`,
    /// or `target_dir/relative` if `target_dir` is given.
    ///
    /// If the file can't be read, nothing is added to the archive.
    pub fn add_file<P: AsRef<Path>, Q: AsRef<Path>>(
        &mut self,
        root: P,
        relative: Q,
        target_dir: Option<&Utf8Path>,
    ) -> ZipResult<()> {
        let method = self.options.method();
        self.add_file_with_method(root, relative, target_dir, method)
    }

    /// Like [`add_file()`], but with a specific compression method
    /// instead of the writer's default.
    ///
    /// [`add_file()`]: struct.ZipWriter.html#method.add_file
    pub fn add_file_with_method<P: AsRef<Path>, Q: AsRef<Path>>(
        &mut self,
        root: P,
        relative: Q,
        target_dir: Option<&Utf8Path>,
        method: CompressionMethod,
    ) -> ZipResult<()> {
        let relative = relative.as_ref();
        let name = archive_name(target_dir, relative)?;
        let source = File::open(root.as_ref().join(relative))?;
        let last_modified = self.options.timestamps.for_file(&source)?;
        let level = self.options.compression;
        self.add_entry(name, method, last_modified, |queue| {
            compress(source, method, level, queue)
        })
    }

    /// Adds everything read from `reader` to the archive as `name`,
    /// stamped with the current time.
    pub fn add_reader<R: Read>(
        &mut self,
        name: &str,
        method: CompressionMethod,
        reader: R,
    ) -> ZipResult<()> {
        let last_modified = Local::now().naive_local();
        let level = self.options.compression;
        self.add_entry(name.to_owned(), method, last_modified, |queue| {
            compress(reader, method, level, queue)
        })
    }

    /// Adds each of `paths` (relative to `root`), one after another.
    ///
    /// A file that can't be added is logged and skipped,
    /// and doesn't stop the rest from being added.
    /// Check the returned outcomes to see what made it in.
    pub fn add_paths<P, I>(
        &mut self,
        root: P,
        paths: I,
        target_dir: Option<&Utf8Path>,
    ) -> Vec<AddOutcome>
    where
        P: AsRef<Path>,
        I: IntoIterator,
        I::Item: Into<PathBuf>,
    {
        let root = root.as_ref();
        paths
            .into_iter()
            .map(|path| {
                let path = path.into();
                let result = self.add_file(root, &path, target_dir);
                if let Err(e) = &result {
                    warn!("Couldn't add {} to the archive: {}", path.display(), e);
                }
                AddOutcome { path, result }
            })
            .collect()
    }

    /// Adds every file under `root`, as filtered by `walk_options`,
    /// nested under `target_dir` if one is given.
    ///
    /// Fails only if the directory can't be walked. Files that can't be added
    /// are skipped (see [`add_paths()`]).
    ///
    /// [`add_paths()`]: struct.ZipWriter.html#method.add_paths
    pub fn add_dir<P: AsRef<Path>>(
        &mut self,
        root: P,
        target_dir: Option<&Utf8Path>,
        walk_options: &WalkOptions,
    ) -> ZipResult<Vec<AddOutcome>> {
        let root = root.as_ref();
        let files = walk::list_files(root, walk_options)?;
        let outcomes = self.add_paths(root, files, target_dir);
        log_summary(root, &outcomes);
        Ok(outcomes)
    }

    /// Like [`add_dir()`], but compresses files on all cores.
    ///
    /// Files are still placed in the archive one at a time,
    /// in the same order `add_dir()` would place them.
    ///
    /// [`add_dir()`]: struct.ZipWriter.html#method.add_dir
    #[cfg(feature = "parallel")]
    pub fn add_dir_parallel<P: AsRef<Path>>(
        &mut self,
        root: P,
        target_dir: Option<&Utf8Path>,
        walk_options: &WalkOptions,
    ) -> ZipResult<Vec<AddOutcome>> {
        let root = root.as_ref();
        let files = walk::list_files(root, walk_options)?;

        let options = &self.options;
        let staged: Vec<ZipResult<StagedFile>> = files
            .par_iter()
            .map(|relative| stage_file(options, root, relative, target_dir))
            .collect();

        let outcomes: Vec<AddOutcome> = files
            .into_iter()
            .zip(staged)
            .map(|(path, staged)| {
                let result = staged.and_then(|staged| self.commit(staged));
                if let Err(e) = &result {
                    warn!("Couldn't add {} to the archive: {}", path.display(), e);
                }
                AddOutcome { path, result }
            })
            .collect();
        log_summary(root, &outcomes);
        Ok(outcomes)
    }

    #[cfg(feature = "parallel")]
    fn commit(&mut self, staged: StagedFile) -> ZipResult<()> {
        let StagedFile {
            name,
            method,
            last_modified,
            crc32,
            size,
            body,
        } = staged;
        self.add_entry(name, method, last_modified, move |queue| {
            queue.push(body);
            Ok((crc32, size))
        })
    }

    /// Places a file in the archive: its local header,
    /// its contents (as written by `write_body`), then its data descriptor.
    ///
    /// If anything fails, the archive is rolled back to how it was beforehand.
    fn add_entry<F>(
        &mut self,
        name: String,
        method: CompressionMethod,
        last_modified: NaiveDateTime,
        write_body: F,
    ) -> ZipResult<()>
    where
        F: FnOnce(&mut ByteQueue) -> io::Result<(u32, u64)>,
    {
        let mark = self.queue.mark();
        match self.push_entry(name, method, last_modified, write_body) {
            Ok(record) => {
                debug!(
                    "Added {} at offset {} ({} -> {} bytes)",
                    record.name, record.header_offset, record.size, record.compressed_size
                );
                self.files.push(record);
                Ok(())
            }
            Err(e) => {
                debug!(
                    "Rolling back {} bytes of a failed entry",
                    self.queue.len() - mark.len
                );
                self.queue.rollback(mark);
                Err(e)
            }
        }
    }

    fn push_entry<F>(
        &mut self,
        name: String,
        method: CompressionMethod,
        last_modified: NaiveDateTime,
        write_body: F,
    ) -> ZipResult<FileRecord>
    where
        F: FnOnce(&mut ByteQueue) -> io::Result<(u32, u64)>,
    {
        let header_offset = self.queue.len();
        // The central directory can only point to headers in the first 4 GB.
        u32_field("local header offset", header_offset)?;

        let header = spec::LocalFileHeader::new(&name, method, &last_modified);
        trace!("{:?}", header);
        let flags = header.flags;
        self.queue.push(header.to_bytes()?);

        let body_offset = self.queue.len();
        let (crc32, size) = write_body(&mut self.queue)?;
        let compressed_size = self.queue.len() - body_offset;

        let descriptor = spec::DataDescriptor::new(crc32, compressed_size, size)?;
        trace!("{:?}", descriptor);
        self.queue.push(descriptor.to_bytes());

        Ok(FileRecord {
            name,
            compression_method: method,
            flags,
            last_modified,
            crc32,
            compressed_size,
            size,
            header_offset,
        })
    }

    /// Appends the central directory and the End of central directory record.
    ///
    /// Everything is encoded before anything is queued,
    /// so a failure leaves the queue untouched.
    fn push_central_directory(&mut self) -> ZipResult<()> {
        if self.files.is_empty() {
            return Err(ZipError::EmptyArchive);
        }

        let central_directory_offset = self.queue.len();
        let mut central_directory = Vec::with_capacity(self.files.len());
        for record in &self.files {
            let entry = spec::CentralDirectoryEntry::from_record(record)?;
            trace!("{:?}", entry);
            central_directory.push(entry.to_bytes()?);
        }
        let central_directory_size = central_directory.iter().map(|e| e.len() as u64).sum();

        let eocdr = spec::EndOfCentralDirectory::new(
            self.files.len(),
            central_directory_size,
            central_directory_offset,
        )?;
        trace!("{:?}", eocdr);

        for entry in central_directory {
            self.queue.push(entry);
        }
        self.queue.push(eocdr.to_bytes());
        Ok(())
    }

    /// Finishes the archive and writes all of it to `sink`.
    ///
    /// Returns the size of the archive in bytes.
    /// Fails with [`ZipError::EmptyArchive`] (without writing anything)
    /// if no files were added.
    ///
    /// [`ZipError::EmptyArchive`]: ../result/enum.ZipError.html#variant.EmptyArchive
    pub fn finish<W: Write>(mut self, mut sink: W) -> ZipResult<u64> {
        self.push_central_directory()?;
        self.write_out(&mut sink)
    }

    /// Finishes the archive and writes it to a new file at `path`.
    ///
    /// The file isn't created unless the archive was successfully finished.
    pub fn finish_to_path<P: AsRef<Path>>(mut self, path: P) -> ZipResult<u64> {
        let path = path.as_ref();
        self.push_central_directory()?;
        info!("Writing {}", path.display());
        let mut sink = io::BufWriter::new(File::create(path)?);
        self.write_out(&mut sink)
    }

    fn write_out<W: Write>(&mut self, sink: &mut W) -> ZipResult<u64> {
        let expected = self.queue.len();
        let written = self.queue.drain_into(sink)?;
        sink.flush()?;
        debug_assert_eq!(written, expected);
        info!("Wrote {} files in {} bytes", self.files.len(), written);
        Ok(written)
    }
}

fn log_summary(root: &Path, outcomes: &[AddOutcome]) {
    let failures = outcomes.iter().filter(|o| o.result.is_err()).count();
    info!(
        "Added {} of {} files from {}",
        outcomes.len() - failures,
        outcomes.len(),
        root.display()
    );
}
