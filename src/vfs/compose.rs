//! Composes the archive-backed base and the per-session overlay into the public [`Vfs`]
//! surface the shell emulator and SFTP subsystem use.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::archive::{Index, Time};

use super::archive_backend::ArchiveBackend;
use super::overlay::Overlay;
use super::{canonicalize, DirEntry, Layer, Stat, Vfs, VfsError, VfsResult, MAX_SYMLINK_DEPTH};

/// The archive-plus-overlay VFS handed to one session. Cheap to construct: the archive
/// side is a shared `Arc`, the overlay side starts empty.
pub struct OverlayVfs {
    base: ArchiveBackend,
    overlay: Overlay,
    /// Host directory new-or-modified files are persisted under, namespaced by session id
    /// and a hash of the source address (SPEC_FULL §5 shared-resource policy). `None`
    /// means overlay writes are discarded when the session ends.
    save_dir: Option<PathBuf>,
    /// Memoizes the terminal stat of a path after symlink resolution, bounded so a
    /// session that `ls`s the same directory repeatedly doesn't re-walk symlink chains
    /// each time. Invalidated on any write/remove to the path.
    resolved_cache: moka::sync::Cache<String, Stat>,
}

impl OverlayVfs {
    pub fn new(index: Arc<Index>, save_dir: Option<PathBuf>) -> OverlayVfs {
        OverlayVfs {
            base: ArchiveBackend::new(index),
            overlay: Overlay::new(),
            save_dir,
            resolved_cache: moka::sync::Cache::new(256),
        }
    }

    fn now(&self) -> Time {
        let secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        Time::from_unix_i64(secs as i64)
    }

    /// Resolves symlinks along the way to a terminal stat, bounded by
    /// [`MAX_SYMLINK_DEPTH`] (SPEC_FULL §4.2 `open_read`). The terminal `(path, stat)` pair
    /// is memoized in `resolved_cache` so repeated lookups of the same path (e.g. a
    /// directory listing stat-ing every entry) skip the walk.
    fn resolve_symlinks(&self, path: &str) -> VfsResult<(String, Stat)> {
        if let Some(stat) = self.resolved_cache.get(path) {
            return Ok((path.to_string(), stat));
        }
        let mut current = path.to_string();
        for _ in 0..MAX_SYMLINK_DEPTH {
            let stat = self.lookup(&current).ok_or(VfsError::NotFound)?;
            if stat.kind != crate::archive::Kind::Symlink {
                self.resolved_cache.insert(path.to_string(), stat.clone());
                return Ok((current, stat));
            }
            let target = self.readlink_raw(&current).ok_or(VfsError::NotFound)?;
            current = if target.starts_with('/') {
                canonicalize(&target)?
            } else {
                let parent = current.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
                let parent = if parent.is_empty() { "/" } else { parent };
                canonicalize(&format!("{parent}/{target}"))?
            };
        }
        Err(VfsError::LoopDetected)
    }

    fn lookup(&self, path: &str) -> Option<Stat> {
        if self.overlay.is_whiteout(path) {
            return None;
        }
        self.overlay.stat(path).or_else(|| self.base.stat(path))
    }

    fn readlink_raw(&self, path: &str) -> Option<String> {
        if self.overlay.is_whiteout(path) {
            return None;
        }
        self.overlay.readlink(path).or_else(|| self.base.readlink(path))
    }

    fn persist_to_save_dir(&self, path: &str, content: &[u8]) {
        let Some(save_dir) = &self.save_dir else { return };
        let relative = path.trim_start_matches('/');
        let dest = save_dir.join(relative);
        if let Some(parent) = dest.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                warn!(path = %dest.display(), error = %err, "cannot create save directory parent");
                return;
            }
        }
        match std::fs::write(&dest, content) {
            Ok(()) => info!(path = %dest.display(), bytes = content.len(), "persisted overlay write"),
            Err(err) => warn!(path = %dest.display(), error = %err, "cannot persist overlay write"),
        }
    }
}

#[async_trait]
impl Vfs for OverlayVfs {
    async fn stat(&self, path: &str) -> VfsResult<Stat> {
        let path = canonicalize(path)?;
        let (_, stat) = self.resolve_symlinks(&path)?;
        Ok(stat)
    }

    async fn open_read(&self, path: &str) -> VfsResult<Vec<u8>> {
        let path = canonicalize(path)?;
        let (resolved, stat) = self.resolve_symlinks(&path)?;
        if stat.kind == crate::archive::Kind::Directory {
            return Err(VfsError::IsADirectory);
        }
        if self.overlay.is_whiteout(&resolved) {
            return Err(VfsError::NotFound);
        }
        self.overlay
            .read(&resolved)
            .or_else(|| self.base.read(&resolved))
            .ok_or(VfsError::NotFound)
    }

    async fn open_write(&self, path: &str, content: Vec<u8>, mode: u32) -> VfsResult<()> {
        let path = canonicalize(path)?;
        if let Some(existing) = self.lookup(&path) {
            if existing.kind == crate::archive::Kind::Directory {
                return Err(VfsError::IsADirectory);
            }
        }
        self.persist_to_save_dir(&path, &content);
        self.overlay.write(&path, content, mode, self.now());
        self.resolved_cache.invalidate(&path);
        Ok(())
    }

    async fn remove(&self, path: &str) -> VfsResult<()> {
        let path = canonicalize(path)?;
        let stat = self.lookup(&path).ok_or(VfsError::NotFound)?;
        if stat.kind == crate::archive::Kind::Directory {
            if !self.readdir(&path).await?.is_empty() {
                return Err(VfsError::NotEmpty);
            }
        }
        self.overlay.remove(&path);
        self.resolved_cache.invalidate(&path);
        Ok(())
    }

    async fn readdir(&self, path: &str) -> VfsResult<Vec<DirEntry>> {
        let path = canonicalize(path)?;
        let (resolved, stat) = self.resolve_symlinks(&path)?;
        if stat.kind != crate::archive::Kind::Directory {
            return Err(VfsError::NotADirectory);
        }

        let mut merged = std::collections::BTreeMap::new();
        for entry in self.base.children(&resolved) {
            let child_path = child_path(&resolved, &entry.name);
            if !self.overlay.is_whiteout(&child_path) {
                merged.insert(entry.name.clone(), entry);
            }
        }
        for entry in self.overlay.children(&resolved) {
            merged.insert(entry.name.clone(), entry);
        }
        // explicit whiteouts of entries that exist only in the overlay's own bookkeeping
        merged.retain(|name, _| !self.overlay.is_whiteout(&child_path(&resolved, name)));

        Ok(merged.into_values().collect())
    }

    async fn readlink(&self, path: &str) -> VfsResult<String> {
        let path = canonicalize(path)?;
        if self.overlay.is_whiteout(&path) {
            return Err(VfsError::NotFound);
        }
        let stat = self.lookup(&path).ok_or(VfsError::NotFound)?;
        if stat.kind != crate::archive::Kind::Symlink {
            return Err(VfsError::NotASymlink);
        }
        self.readlink_raw(&path).ok_or(VfsError::NotFound)
    }
}

fn child_path(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}
