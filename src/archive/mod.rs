//! Archive reader: parses the bundled filesystem image and exposes a random-access index
//! of file entries with UNIX metadata (SPEC_FULL §4.1).
//!
//! The image is a standard ZIP central-directory archive; `zip` does the container
//! parsing, and the UNIX-specific extra-field records (`0x7875`, `0x5455`) are decoded by
//! hand in [`extra`], matching the teacher's `parser::primitive` approach of small
//! composable readers rather than one monolithic parse function.

pub mod entry;
pub mod extra;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub use entry::{Entry, Kind, Time};

/// Errors [`Index::open`] and lookups can produce.
#[derive(Debug)]
pub enum ArchiveError {
    /// The image file could not be found or opened.
    NotFound,
    /// The image exists but is not a well-formed archive.
    Corrupt,
    /// The image uses a feature this reader does not support.
    Unsupported,
}

impl std::fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiveError::NotFound => write!(f, "archive image not found"),
            ArchiveError::Corrupt => write!(f, "archive image is corrupt"),
            ArchiveError::Unsupported => write!(f, "archive image uses an unsupported feature"),
        }
    }
}

impl std::error::Error for ArchiveError {}

/// Random-access index of archive entries, built once at process start and never
/// mutated afterward (SPEC_FULL §3 lifecycle, §5 read-mostly global state).
#[derive(Debug)]
pub struct Index {
    entries: BTreeMap<String, Entry>,
}

impl Index {
    /// Opens and fully indexes the archive image at `path`.
    pub fn open(path: &Path) -> Result<Index, ArchiveError> {
        let file = File::open(path).map_err(|_| ArchiveError::NotFound)?;
        let mut zip = zip::ZipArchive::new(file).map_err(|_| ArchiveError::Corrupt)?;

        let mut entries = BTreeMap::new();
        for i in 0..zip.len() {
            let mut zipfile = zip.by_index(i).map_err(|_| ArchiveError::Corrupt)?;
            let raw_name = zipfile.name().to_string();
            let path = normalize_archive_name(&raw_name);
            if path.is_empty() {
                continue;
            }

            let extra = extra::parse(zipfile.extra_data());
            let (uid, gid) = match extra.owner {
                Some(owner) => (owner.uid, owner.gid),
                None => (0, 0),
            };

            let embedded_mtime = zipfile
                .last_modified()
                .to_time()
                .map(|t| Time::from_unix_i64(t.unix_timestamp()))
                .unwrap_or(Time::EPOCH);
            let (mtime, atime, ctime) = match extra.timestamp {
                Some(ts) => (
                    ts.mtime.unwrap_or(embedded_mtime),
                    ts.atime.unwrap_or(embedded_mtime),
                    ts.ctime.unwrap_or(embedded_mtime),
                ),
                None => (embedded_mtime, embedded_mtime, embedded_mtime),
            };

            let is_dir = raw_name.ends_with('/');
            let unix_mode = zipfile.unix_mode();
            let kind = classify(unix_mode, is_dir);

            let mut symlink_target = None;
            let mut body = None;
            match kind {
                Kind::Symlink => {
                    let mut target = String::new();
                    zipfile
                        .read_to_string(&mut target)
                        .map_err(|_| ArchiveError::Corrupt)?;
                    symlink_target = Some(target);
                }
                Kind::Regular if zipfile.size() > 0 => {
                    let mut buf = Vec::with_capacity(zipfile.size() as usize);
                    zipfile.read_to_end(&mut buf).map_err(|_| ArchiveError::Corrupt)?;
                    body = Some(buf);
                }
                _ => {}
            }

            let mode = unix_mode.unwrap_or(match kind {
                Kind::Directory => 0o755,
                _ => 0o644,
            }) & 0o7777;

            // Metadata-only mode stores the body-less entry's real size in a private
            // extra-field record (see archive::extra::TAG_ORIGINAL_SIZE) since the zip
            // header's own size field is necessarily 0 when no bytes were written.
            let size = if body.is_none() && kind == Kind::Regular {
                extra.original_size.unwrap_or(0)
            } else {
                zipfile.size()
            };

            let entry = Entry {
                path: path.clone(),
                kind,
                mode,
                size,
                uid,
                gid,
                mtime,
                atime,
                ctime,
                symlink_target,
                body,
            };
            entries.insert(path, entry);
        }

        synthesize_missing_directories(&mut entries);
        Ok(Index { entries })
    }

    /// Looks up a single entry by its normalized absolute path.
    pub fn lookup(&self, path: &str) -> Option<&Entry> {
        self.entries.get(path)
    }

    /// Iterates the direct children of `dir`, in lexicographic order.
    pub fn children(&self, dir: &str) -> impl Iterator<Item = &Entry> {
        let prefix = if dir == "/" { "/".to_string() } else { format!("{dir}/") };
        self.entries.values().filter(move |e| {
            e.path != dir
                && e.path.starts_with(&prefix)
                && e.path[prefix.len()..].find('/').is_none()
        })
    }

    /// Reads the full content of an entry, per [`Entry::read`].
    pub fn open(&self, entry: &Entry) -> Vec<u8> {
        entry.read()
    }

    /// Builds an index directly from a list of entries, bypassing ZIP parsing. Used by
    /// other modules' tests that need a small, fully-controlled archive without writing
    /// one to disk.
    #[cfg(test)]
    pub(crate) fn from_entries_for_test(entries: Vec<Entry>) -> Index {
        let mut map = BTreeMap::new();
        for entry in entries {
            map.insert(entry.path.clone(), entry);
        }
        Index { entries: map }
    }
}

fn classify(unix_mode: Option<u32>, is_dir: bool) -> Kind {
    const S_IFMT: u32 = 0o170000;
    const S_IFLNK: u32 = 0o120000;
    const S_IFCHR: u32 = 0o020000;
    const S_IFBLK: u32 = 0o060000;
    const S_IFDIR: u32 = 0o040000;

    if is_dir {
        return Kind::Directory;
    }
    match unix_mode.map(|m| m & S_IFMT) {
        Some(S_IFLNK) => Kind::Symlink,
        Some(S_IFCHR) | Some(S_IFBLK) => Kind::Device,
        Some(S_IFDIR) => Kind::Directory,
        _ => Kind::Regular,
    }
}

/// Strips a leading `/` and any trailing `/`, leaving a normalized absolute path with a
/// leading `/` re-added (the archive stores root-relative names; the VFS addresses
/// everything as an absolute path).
fn normalize_archive_name(raw: &str) -> String {
    let trimmed = raw.trim_start_matches('/').trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// Materializes intermediate directories missing from the archive (SPEC_FULL §3): if
/// `/a/b/c` exists but `/a/b` does not, `/a/b` is synthesized with mode 0755, uid/gid 0,
/// and mtime copied from the deepest present descendant.
fn synthesize_missing_directories(entries: &mut BTreeMap<String, Entry>) {
    let mut missing: BTreeMap<String, Time> = BTreeMap::new();
    for path in entries.keys() {
        let mut ancestor = parent_of(path);
        while let Some(p) = ancestor {
            if entries.contains_key(&p) || missing.contains_key(&p) {
                break;
            }
            let deepest_mtime = entries
                .get(path)
                .map(|e| e.mtime)
                .unwrap_or(Time::EPOCH);
            missing.insert(p.clone(), deepest_mtime);
            ancestor = parent_of(&p);
        }
    }
    if !entries.contains_key("/") {
        entries.insert(
            "/".to_string(),
            Entry::synthesize_dir("/".to_string(), Time::EPOCH),
        );
    }
    for (path, mtime) in missing {
        entries.insert(path.clone(), Entry::synthesize_dir(path, mtime));
    }
}

fn parent_of(path: &str) -> Option<String> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(path[..idx].to_string()),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_of_root_children() {
        assert_eq!(parent_of("/a"), Some("/".to_string()));
        assert_eq!(parent_of("/a/b"), Some("/a".to_string()));
        assert_eq!(parent_of("/"), None);
    }

    #[test]
    fn normalize_strips_slashes() {
        assert_eq!(normalize_archive_name("a/b/"), "/a/b");
        assert_eq!(normalize_archive_name("/a/b"), "/a/b");
        assert_eq!(normalize_archive_name(""), "");
    }

    #[test]
    fn synthesizes_missing_intermediate_directories() {
        let mut entries = BTreeMap::new();
        entries.insert(
            "/a/b/c".to_string(),
            Entry {
                path: "/a/b/c".to_string(),
                kind: Kind::Regular,
                mode: 0o644,
                size: 0,
                uid: 0,
                gid: 0,
                mtime: Time(42),
                atime: Time(42),
                ctime: Time(42),
                symlink_target: None,
                body: None,
            },
        );
        synthesize_missing_directories(&mut entries);
        let synthesized = entries.get("/a/b").expect("synthesized /a/b");
        assert_eq!(synthesized.kind, Kind::Directory);
        assert_eq!(synthesized.mode, 0o755);
        assert_eq!(synthesized.mtime, Time(42));
        assert!(entries.contains_key("/a"));
        assert!(entries.contains_key("/"));
    }
}
