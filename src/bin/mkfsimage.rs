//! Archive-builder CLI: walks a directory tree and writes an archive image `honeypotd` can
//! serve, carrying the `0x7875`/`0x5455` UNIX extra-field records the reader expects
//! (SPEC_FULL §4.12, §6). Grounded on `original_source/cmd/createfs/createFSZip.go`'s walk
//! order and flag surface, not a translation of it.

use std::fs::{self, Metadata};
use std::io::Write as _;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use clap::Parser;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use syruphole::archive::extra::{self, ExtendedTimestamp, UnixOwner};
use syruphole::archive::Time;

#[derive(Debug, Parser)]
#[command(name = "mkfsimage", about = "Builds an archive image for the honeypot's virtual filesystem")]
struct Cli {
    /// Output archive path.
    #[arg(short = 'o', long = "out")]
    out: PathBuf,
    /// Import root: the directory tree to capture.
    #[arg(short = 'p', long = "path")]
    path: PathBuf,
    /// Strip file content, keeping metadata only.
    #[arg(short = 'b', long = "strip-data", default_value_t = true)]
    strip_data: bool,
    /// Semicolon-separated path prefixes to skip.
    #[arg(short = 'k', long = "skip", default_value = "")]
    skip: String,
    /// Explicit input file list, one path per line, in place of walking `-p`.
    #[arg(short = 'i', long = "input-file")]
    input_file: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    if cli.path.as_os_str().is_empty() {
        eprintln!("missing required argument -p/--path");
        std::process::exit(2);
    }
    if cli.out.as_os_str().is_empty() {
        eprintln!("missing required argument -o/--out");
        std::process::exit(2);
    }

    let skip_paths: Vec<&str> = cli.skip.split(';').filter(|s| !s.is_empty()).collect();

    let file = match fs::OpenOptions::new().write(true).create_new(true).open(&cli.out) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
            eprintln!("{}: file already exists", cli.out.display());
            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("cannot create {}: {err}", cli.out.display());
            std::process::exit(1);
        }
    };

    let mut archive = ZipWriter::new(file);

    let paths: Vec<PathBuf> = match &cli.input_file {
        Some(list) => match read_input_list(list) {
            Ok(paths) => paths,
            Err(err) => {
                eprintln!("cannot read input file {}: {err}", list.display());
                std::process::exit(1);
            }
        },
        None => walk(&cli.path),
    };

    for path in paths {
        if path == cli.path {
            continue;
        }
        if skip_paths.iter().any(|skip| path.to_string_lossy().starts_with(skip)) {
            continue;
        }
        let metadata = match fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) => {
                println!("skipping {} for unreadable metadata: {err}", path.display());
                continue;
            }
        };
        println!("writing {}", path.display());
        if let Err(err) = write_entry(&mut archive, &cli.path, &path, &metadata, cli.strip_data) {
            eprintln!("{}: {err}", path.display());
        }
    }

    if let Err(err) = archive.finish() {
        eprintln!("cannot finalize archive: {err}");
        std::process::exit(1);
    }
}

/// Reads an explicit input list, one path per line; blank lines are ignored.
fn read_input_list(path: &Path) -> std::io::Result<Vec<PathBuf>> {
    let contents = fs::read_to_string(path)?;
    Ok(contents.lines().map(str::trim).filter(|l| !l.is_empty()).map(PathBuf::from).collect())
}

/// Walks `root` depth-first, yielding every descendant path (directories before their
/// children), in the order `read_dir` returns them.
fn walk(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    walk_into(root, &mut out);
    out
}

fn walk_into(dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            println!("skipping {} for unreadable directory: {err}", dir.display());
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        out.push(path.clone());
        if let Ok(file_type) = entry.file_type() {
            if file_type.is_dir() {
                walk_into(&path, out);
            }
        }
    }
}

/// Strips the import root prefix and then exactly one leading `/`, producing an archive
/// name relative to the root regardless of whether `path` carries a leading slash.
fn archive_name(root: &Path, path: &Path) -> String {
    let root_str = root.to_string_lossy();
    let path_str = path.to_string_lossy();
    let stripped = path_str.strip_prefix(root_str.as_ref()).unwrap_or(&path_str);
    stripped.trim_start_matches('/').to_string()
}

fn write_entry<W: std::io::Write + std::io::Seek>(
    archive: &mut ZipWriter<W>,
    root: &Path,
    path: &Path,
    metadata: &Metadata,
    strip_data: bool,
) -> std::io::Result<()> {
    let mut name = archive_name(root, path);
    let is_dir = metadata.is_dir();
    let is_symlink = metadata.file_type().is_symlink();
    if is_dir {
        name.push('/');
    }

    let mode = metadata.permissions().mode();
    let owner = UnixOwner { uid: metadata.uid(), gid: metadata.gid() };
    let timestamp = ExtendedTimestamp {
        mtime: Some(Time::from_unix_i64(metadata.mtime())),
        atime: Some(Time::from_unix_i64(metadata.atime())),
        ctime: Some(Time::from_unix_i64(metadata.ctime())),
    };
    let real_size = metadata.size();
    let original_size = if strip_data && !is_dir { Some(real_size) } else { None };
    let extra_data = extra::encode(owner, timestamp, original_size);

    let effective_size = if strip_data && !is_dir { 0 } else { real_size };
    let method = if !is_dir && (effective_size > 0 || is_symlink) {
        CompressionMethod::Deflated
    } else {
        CompressionMethod::Stored
    };

    let options = FileOptions::default().compression_method(method).unix_permissions(mode);

    archive.start_file_with_extra_data(&name, options, &extra_data)?;
    archive.end_extra_data()?;

    if is_symlink {
        let target = fs::read_link(path)?;
        archive.write_all(target.to_string_lossy().as_bytes())?;
    } else if metadata.file_type().is_char_device() || metadata.file_type().is_block_device() {
        // Device nodes carry no readable content; the entry's metadata alone is enough for
        // the reader to classify it as `Kind::Device` and serve an empty read.
    } else if !is_dir && !strip_data {
        let bytes = fs::read(path)?;
        archive.write_all(&bytes)?;
    }

    Ok(())
}
