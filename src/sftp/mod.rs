//! Minimal SFTPv3 server running over a session's [`Vfs`] (SPEC_FULL §4.11).
//!
//! Grounded on the teacher's `mount`/`nfs3` request-handler split: one `Server` holding
//! per-connection state (here, open handles rather than NFS file-handle mappings), with
//! wire decode and encode kept in their own sibling modules.

pub mod encode;
pub mod wire;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

pub use wire::ClientRequest;

use crate::archive::{Kind, Time};
use crate::vfs::{self, DirEntry, Stat, Vfs, VfsError};

const PROTOCOL_VERSION: u32 = 3;

/// One client-visible SFTP handle: either a file opened for read or write, or a
/// directory listing cursor. Handle ids are this server's own opaque `u32`s, never the
/// VFS path itself, so a client cannot forge access by guessing another handle's shape.
enum Handle {
    File { path: String, write_buffer: Option<Vec<u8>> },
    Dir { entries: Vec<(String, Stat)>, offset: usize },
}

/// Per-channel SFTP subsystem state. One `Server` is created per `subsystem=sftp`
/// channel request and lives as long as that channel. Holds the VFS behind an `Arc`
/// rather than a borrow so it can sit alongside the same channel's shell session in one
/// owned struct without a self-referential lifetime.
pub struct Server {
    vfs: Arc<dyn Vfs>,
    cwd: String,
    save_dir: Option<PathBuf>,
    handles: HashMap<u32, Handle>,
    next_handle: u32,
}

impl Server {
    pub fn new(vfs: Arc<dyn Vfs>, cwd: String, save_dir: Option<PathBuf>) -> Server {
        Server { vfs, cwd, save_dir, handles: HashMap::new(), next_handle: 1 }
    }

    fn allocate_handle(&mut self, handle: Handle) -> u32 {
        let id = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(id, handle);
        id
    }

    /// Handles one decoded client request and returns the encoded wire response.
    pub async fn handle(&mut self, request: ClientRequest) -> Vec<u8> {
        match request {
            ClientRequest::Init { version } => {
                debug!(client_version = version, "sftp INIT");
                encode::version(PROTOCOL_VERSION)
            }
            ClientRequest::RealPath { id, path } => self.real_path(id, &path).await,
            ClientRequest::Stat { id, path } | ClientRequest::LStat { id, path } => {
                match self.resolve_and_stat(&path).await {
                    Ok(stat) => encode::attrs(id, &stat),
                    Err(err) => encode::status_for(id, err),
                }
            }
            ClientRequest::OpenDir { id, path } => self.open_dir(id, &path).await,
            ClientRequest::ReadDir { id, handle } => self.read_dir(id, handle),
            ClientRequest::Open { id, path, write } => self.open(id, &path, write),
            ClientRequest::Read { id, handle, offset, len } => self.read(id, handle, offset, len).await,
            ClientRequest::Write { id, handle, offset, data } => self.write(id, handle, offset, data),
            ClientRequest::Close { id, handle } => self.close(id, handle).await,
        }
    }

    async fn resolve_and_stat(&self, path: &str) -> Result<Stat, VfsError> {
        let resolved = vfs::resolve(&self.cwd, path).map_err(|_| VfsError::PathInvalid)?;
        self.vfs.stat(&resolved).await
    }

    async fn real_path(&self, id: u32, path: &str) -> Vec<u8> {
        let resolved = match vfs::resolve(&self.cwd, path) {
            Ok(p) => p,
            Err(_) => return encode::status_for(id, VfsError::PathInvalid),
        };
        let stat = self.vfs.stat(&resolved).await.unwrap_or_else(|_| placeholder_dir_stat());
        encode::name(id, &[(resolved, stat)])
    }

    async fn open_dir(&mut self, id: u32, path: &str) -> Vec<u8> {
        let resolved = match vfs::resolve(&self.cwd, path) {
            Ok(p) => p,
            Err(_) => return encode::status_for(id, VfsError::PathInvalid),
        };
        let children = match self.vfs.readdir(&resolved).await {
            Ok(c) => c,
            Err(err) => return encode::status_for(id, err),
        };
        let mut entries = Vec::with_capacity(children.len());
        for child in children {
            let stat = self.child_stat(&resolved, &child).await;
            entries.push((child.name, stat));
        }
        let handle_id = self.allocate_handle(Handle::Dir { entries, offset: 0 });
        encode::handle(id, handle_id)
    }

    async fn child_stat(&self, dir: &str, child: &DirEntry) -> Stat {
        let child_path = if dir == "/" { format!("/{}", child.name) } else { format!("{dir}/{}", child.name) };
        self.vfs.stat(&child_path).await.unwrap_or_else(|_| placeholder_stat(child.kind))
    }

    fn read_dir(&mut self, id: u32, handle: u32) -> Vec<u8> {
        let Some(Handle::Dir { entries, offset }) = self.handles.get_mut(&handle) else {
            return encode::status_for(id, VfsError::NotFound);
        };
        if *offset >= entries.len() {
            return encode::status_eof(id);
        }
        let batch = entries[*offset..].to_vec();
        *offset = entries.len();
        encode::name(id, &batch)
    }

    fn open(&mut self, id: u32, path: &str, write: bool) -> Vec<u8> {
        let resolved = match vfs::resolve(&self.cwd, path) {
            Ok(p) => p,
            Err(_) => return encode::status_for(id, VfsError::PathInvalid),
        };
        let write_buffer = if write { Some(Vec::new()) } else { None };
        let handle_id = self.allocate_handle(Handle::File { path: resolved, write_buffer });
        encode::handle(id, handle_id)
    }

    async fn read(&mut self, id: u32, handle: u32, offset: u64, len: u32) -> Vec<u8> {
        let Some(Handle::File { path, .. }) = self.handles.get(&handle) else {
            return encode::status_for(id, VfsError::NotFound);
        };
        let path = path.clone();
        match self.vfs.open_read(&path).await {
            Ok(data) => {
                let start = offset as usize;
                if start >= data.len() {
                    return encode::status_eof(id);
                }
                let end = (start + len as usize).min(data.len());
                encode::data(id, &data[start..end])
            }
            Err(err) => encode::status_for(id, err),
        }
    }

    fn write(&mut self, id: u32, handle: u32, offset: u64, data: Vec<u8>) -> Vec<u8> {
        let Some(Handle::File { write_buffer: Some(buffer), .. }) = self.handles.get_mut(&handle) else {
            return encode::status_for(id, VfsError::PermissionDenied);
        };
        let end = offset as usize + data.len();
        if buffer.len() < end {
            buffer.resize(end, 0);
        }
        buffer[offset as usize..end].copy_from_slice(&data);
        encode::status_ok(id)
    }

    async fn close(&mut self, id: u32, handle: u32) -> Vec<u8> {
        match self.handles.remove(&handle) {
            Some(Handle::File { path, write_buffer: Some(buffer) }) => {
                match self.vfs.open_write(&path, buffer.clone(), 0o644).await {
                    Ok(()) => {
                        let digest = Sha256::digest(&buffer);
                        info!(path = %path, sha256 = %format!("{digest:x}"), bytes = buffer.len(), "sftp upload persisted");
                        if let Some(save_dir) = &self.save_dir {
                            if let Err(err) = persist_to_disk(save_dir, &path, &buffer) {
                                warn!(path = %path, error = %err, "failed to persist uploaded file to disk");
                            }
                        }
                        encode::status_ok(id)
                    }
                    Err(err) => encode::status_for(id, err),
                }
            }
            Some(_) => encode::status_ok(id),
            None => encode::status_for(id, VfsError::NotFound),
        }
    }
}

fn placeholder_stat(kind: Kind) -> Stat {
    Stat { kind, mode: 0o644, size: 0, uid: 0, gid: 0, mtime: Time::EPOCH, atime: Time::EPOCH, ctime: Time::EPOCH }
}

fn placeholder_dir_stat() -> Stat {
    placeholder_stat(Kind::Directory)
}

/// Writes an uploaded file's bytes under `save_dir`, keyed by its VFS path flattened into
/// a single filename component (SPEC_FULL §6.3 `saved file dir`).
fn persist_to_disk(save_dir: &Path, vfs_path: &str, content: &[u8]) -> std::io::Result<()> {
    std::fs::create_dir_all(save_dir)?;
    let flattened = vfs_path.trim_start_matches('/').replace('/', "_");
    let name = if flattened.is_empty() { "root".to_string() } else { flattened };
    std::fs::write(save_dir.join(name), content)
}
