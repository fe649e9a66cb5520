use std::path::PathBuf;

use anyhow::*;
use camino::Utf8PathBuf;
use log::*;
use structopt::*;

use stowzip::write::{Timestamps, WriterOptions, ZipWriter};
use stowzip::WalkOptions;

#[derive(Debug, StructOpt)]
#[structopt(name = "zipdir", about = "Packs a directory into a .zip file")]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbosity: usize,

    /// Change to the given directory before perfoming any operations.
    #[structopt(short = "C", long)]
    directory: Option<PathBuf>,

    /// Skip files and directories whose names start with a dot.
    #[structopt(short = "H", long)]
    ignore_hidden: bool,

    /// Skip anything whose path contains the given directory.
    /// Can be passed multiple times.
    #[structopt(short = "x", long = "exclude")]
    exclude_directories: Vec<PathBuf>,

    /// DEFLATE level, from 0 (fastest) to 9 (smallest)
    #[structopt(short, long, default_value = "6")]
    level: u32,

    /// Store files without compressing them.
    #[structopt(short, long)]
    store: bool,

    /// Stamp files with their modification times instead of the current time.
    #[structopt(short = "m", long)]
    keep_mtimes: bool,

    /// Compress files on all cores.
    #[structopt(short = "j", long)]
    parallel: bool,

    /// Put everything in the archive under this directory.
    #[structopt(short, long)]
    target_dir: Option<Utf8PathBuf>,

    #[structopt(name("ZIP file"))]
    zip_path: PathBuf,

    #[structopt(name("source directory"))]
    source: PathBuf,
}

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    if let Some(chto) = &args.directory {
        std::env::set_current_dir(chto)
            .with_context(|| format!("Couldn't set working directory to {}", chto.display()))?;
    }

    let timestamps = if args.keep_mtimes {
        Timestamps::FileModified
    } else {
        Timestamps::Now
    };
    let options = WriterOptions::default()
        .compression_level(args.level)
        .store_only(args.store)
        .timestamps(timestamps);
    let walk = WalkOptions {
        ignore_hidden: args.ignore_hidden,
        exclude_directories: args.exclude_directories.clone(),
    };

    let mut zip = ZipWriter::with_options(options);
    let target_dir = args.target_dir.as_deref();
    let outcomes = if args.parallel {
        zip.add_dir_parallel(&args.source, target_dir, &walk)
    } else {
        zip.add_dir(&args.source, target_dir, &walk)
    }
    .with_context(|| format!("Couldn't walk {}", args.source.display()))?;

    let skipped = outcomes.iter().filter(|o| o.result.is_err()).count();
    if skipped > 0 {
        warn!("Skipped {} of {} files", skipped, outcomes.len());
    }

    let written = zip
        .finish_to_path(&args.zip_path)
        .with_context(|| format!("Couldn't write {}", args.zip_path.display()))?;
    println!("{} bytes written to {}", written, args.zip_path.display());
    Ok(())
}
