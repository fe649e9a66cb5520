//! Lists the files under a directory, for [`ZipWriter::add_dir()`].
//!
//! [`ZipWriter::add_dir()`]: ../write/struct.ZipWriter.html#method.add_dir

use std::path::{Path, PathBuf};

use log::*;
use walkdir::{DirEntry, WalkDir};

use crate::result::*;

/// Which entries to skip while walking a directory
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Skip anything (below the root) whose name starts with a `.`,
    /// along with everything inside it.
    pub ignore_hidden: bool,

    /// Skip anything whose absolute path contains one of these.
    ///
    /// This is a plain substring match, not a path prefix match:
    /// excluding `/src/build` also excludes `/src/build-old/foo`.
    pub exclude_directories: Vec<PathBuf>,
}

impl WalkOptions {
    pub fn ignore_hidden(mut self, ignore: bool) -> Self {
        self.ignore_hidden = ignore;
        self
    }

    pub fn exclude<P: Into<PathBuf>>(mut self, directory: P) -> Self {
        self.exclude_directories.push(directory.into());
        self
    }

    fn is_excluded(&self, path: &Path) -> Option<&Path> {
        let path = path.to_string_lossy();
        self.exclude_directories
            .iter()
            .filter(|dir| !dir.as_os_str().is_empty())
            .find(|dir| path.contains(&*dir.to_string_lossy()))
            .map(PathBuf::as_path)
    }
}

/// Returns every regular file under `root`, relative to `root`.
///
/// Directories themselves aren't listed, and symbolic links are neither
/// listed nor followed. Siblings are sorted by name, so the same tree
/// always lists in the same order.
pub fn list_files(root: &Path, options: &WalkOptions) -> ZipResult<Vec<PathBuf>> {
    let root = std::path::absolute(root)?;

    let walker = WalkDir::new(&root)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| keep(entry, options));

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|source| {
            let path = source.path().unwrap_or(root.as_path()).to_path_buf();
            ZipError::Walk { path, source }
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(&root).map_err(|_| {
            ZipError::InvalidPath(format!(
                "{} isn't under {}",
                entry.path().display(),
                root.display()
            ))
        })?;
        trace!("Found {}", relative.display());
        files.push(relative.to_path_buf());
    }
    debug!("Found {} files under {}", files.len(), root.display());
    Ok(files)
}

fn keep(entry: &DirEntry, options: &WalkOptions) -> bool {
    if options.ignore_hidden && entry.depth() > 0 && is_hidden(entry) {
        trace!("Skipping hidden {}", entry.path().display());
        return false;
    }
    if let Some(dir) = options.is_excluded(entry.path()) {
        trace!(
            "Skipping {} (excluded by {})",
            entry.path().display(),
            dir.display()
        );
        return false;
    }
    true
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().as_encoded_bytes().starts_with(b".")
}
