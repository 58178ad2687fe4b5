//! The read-only [`super::Layer`] backed by the bundled [`crate::archive::Index`].

use std::sync::Arc;

use crate::archive::Index;

use super::{DirEntry, Layer, Stat};

pub(crate) struct ArchiveBackend {
    index: Arc<Index>,
}

impl ArchiveBackend {
    pub(crate) fn new(index: Arc<Index>) -> ArchiveBackend {
        ArchiveBackend { index }
    }
}

impl Layer for ArchiveBackend {
    fn stat(&self, path: &str) -> Option<Stat> {
        self.index.lookup(path).map(Stat::from)
    }

    fn read(&self, path: &str) -> Option<Vec<u8>> {
        self.index.lookup(path).map(|e| self.index.open(e))
    }

    fn readlink(&self, path: &str) -> Option<String> {
        self.index.lookup(path).and_then(|e| e.symlink_target.clone())
    }

    fn children(&self, dir: &str) -> Vec<DirEntry> {
        self.index
            .children(dir)
            .map(|e| DirEntry {
                name: e.path.rsplit('/').next().unwrap_or("").to_string(),
                kind: e.kind,
            })
            .collect()
    }
}
