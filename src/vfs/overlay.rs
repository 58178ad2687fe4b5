//! The writable, session-scoped overlay layer (SPEC_FULL §3 "Overlay layer").
//!
//! Grounded on `examples/shadow_fs/fs/shadow.rs` and `fs/state.rs`'s bookkeeping of a
//! relative-path table with explicit removal tracking, adapted from "identifiers for a
//! real host-backed shadow tree" to "an in-memory map from path to content-or-whiteout"
//! since this overlay never touches the real filesystem unless a save directory is
//! configured (handled one layer up, in [`super::compose`]).

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::archive::{Kind, Time};

use super::{DirEntry, Layer, Stat};

#[derive(Clone)]
enum OverlayEntry {
    File { content: Vec<u8>, mode: u32, mtime: Time },
    Dir { mode: u32, mtime: Time },
    Whiteout,
}

/// The writable scratch layer. One instance per session; dropped (or persisted, per
/// SPEC_FULL §3 lifecycle) when the session's channel closes.
pub struct Overlay {
    entries: Mutex<BTreeMap<String, OverlayEntry>>,
}

impl Overlay {
    pub fn new() -> Overlay {
        Overlay { entries: Mutex::new(BTreeMap::new()) }
    }

    /// Materializes an overlay file, creating missing parent directories as overlay dirs
    /// with mode 0755, per SPEC_FULL §4.2 `open_write`.
    pub fn write(&self, path: &str, content: Vec<u8>, mode: u32, now: Time) {
        let mut entries = self.entries.lock().unwrap();
        ensure_parents(&mut entries, path, now);
        entries.insert(path.to_string(), OverlayEntry::File { content, mode, mtime: now });
    }

    /// Sets a whiteout: the path (and, since directories are whiteable as a unit, its
    /// descendants conceptually) will read back as [`super::VfsError::NotFound`] even if
    /// the base archive still has the entry.
    pub fn remove(&self, path: &str) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(path.to_string(), OverlayEntry::Whiteout);
    }

    /// True if this path is whited out in the overlay (masks the base entirely).
    pub fn is_whiteout(&self, path: &str) -> bool {
        matches!(self.entries.lock().unwrap().get(path), Some(OverlayEntry::Whiteout))
    }
}

impl Default for Overlay {
    fn default() -> Overlay {
        Overlay::new()
    }
}

fn ensure_parents(entries: &mut BTreeMap<String, OverlayEntry>, path: &str, now: Time) {
    let mut ancestor = parent_of(path);
    while let Some(p) = ancestor {
        match entries.get(&p) {
            Some(OverlayEntry::Dir { .. }) => break,
            Some(OverlayEntry::File { .. }) => break,
            _ => {
                entries.insert(p.clone(), OverlayEntry::Dir { mode: 0o755, mtime: now });
                ancestor = parent_of(&p);
            }
        }
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

impl Layer for Overlay {
    fn stat(&self, path: &str) -> Option<Stat> {
        match self.entries.lock().unwrap().get(path) {
            Some(OverlayEntry::File { content, mode, mtime }) => Some(Stat {
                kind: Kind::Regular,
                mode: *mode,
                size: content.len() as u64,
                uid: 0,
                gid: 0,
                mtime: *mtime,
                atime: *mtime,
                ctime: *mtime,
            }),
            Some(OverlayEntry::Dir { mode, mtime }) => Some(Stat {
                kind: Kind::Directory,
                mode: *mode,
                size: 0,
                uid: 0,
                gid: 0,
                mtime: *mtime,
                atime: *mtime,
                ctime: *mtime,
            }),
            Some(OverlayEntry::Whiteout) | None => None,
        }
    }

    fn read(&self, path: &str) -> Option<Vec<u8>> {
        match self.entries.lock().unwrap().get(path) {
            Some(OverlayEntry::File { content, .. }) => Some(content.clone()),
            _ => None,
        }
    }

    fn readlink(&self, _path: &str) -> Option<String> {
        // The overlay never stores symlinks of its own in this implementation: writes
        // always create regular files, matching what `echo >`/`cat >` produce in a real
        // shell. Symlinks only ever come from the base archive.
        None
    }

    fn children(&self, dir: &str) -> Vec<DirEntry> {
        let prefix = if dir == "/" { "/".to_string() } else { format!("{dir}/") };
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(path, entry)| {
                if path == dir || !path.starts_with(&prefix) {
                    return None;
                }
                if path[prefix.len()..].contains('/') {
                    return None;
                }
                let kind = match entry {
                    OverlayEntry::File { .. } => Kind::Regular,
                    OverlayEntry::Dir { .. } => Kind::Directory,
                    OverlayEntry::Whiteout => return None,
                };
                Some(DirEntry { name: path.rsplit('/').next().unwrap_or("").to_string(), kind })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_same_overlay() {
        let overlay = Overlay::new();
        overlay.write("/tmp/x", b"hello".to_vec(), 0o644, Time(1));
        assert_eq!(overlay.read("/tmp/x"), Some(b"hello".to_vec()));
    }

    #[test]
    fn write_materializes_parent_directories() {
        let overlay = Overlay::new();
        overlay.write("/a/b/c", b"x".to_vec(), 0o644, Time(1));
        let stat = overlay.stat("/a/b").expect("parent materialized");
        assert_eq!(stat.kind, Kind::Directory);
        assert_eq!(stat.mode, 0o755);
    }

    #[test]
    fn remove_sets_a_whiteout() {
        let overlay = Overlay::new();
        overlay.write("/tmp/x", b"hello".to_vec(), 0o644, Time(1));
        overlay.remove("/tmp/x");
        assert!(overlay.read("/tmp/x").is_none());
        assert!(overlay.is_whiteout("/tmp/x"));
    }

    #[test]
    fn children_excludes_whiteouts() {
        let overlay = Overlay::new();
        overlay.write("/tmp/a", b"1".to_vec(), 0o644, Time(1));
        overlay.write("/tmp/b", b"2".to_vec(), 0o644, Time(1));
        overlay.remove("/tmp/b");
        let names: Vec<String> = overlay.children("/tmp").into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["a".to_string()]);
    }
}
