//! File metadata carried by [`super::Index`].

/// Type of a [`super::Index`] entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Kind {
    Regular,
    Directory,
    Symlink,
    Device,
}

/// Timestamp as seconds since the UNIX epoch, clamped per the policy documented on
/// [`Time::from_unix_i64`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Time(pub u32);

impl Time {
    pub const EPOCH: Time = Time(0);

    /// Clamps an arbitrary signed UNIX timestamp into the `[0, u32::MAX]` range this
    /// archive format can represent (extra-field times are 32-bit little-endian seconds,
    /// see SPEC_FULL §6). Times before the epoch clamp to the epoch; times at or beyond
    /// 2^32 clamp to `u32::MAX`. This is the documented 2038-adjacent limitation.
    pub fn from_unix_i64(seconds: i64) -> Time {
        if seconds <= 0 {
            Time(0)
        } else if seconds >= u32::MAX as i64 {
            Time(u32::MAX)
        } else {
            Time(seconds as u32)
        }
    }
}

/// A single file record from the archive index.
///
/// Entries are immutable once the archive is opened; they never carry a live content
/// handle, only (for regular files) an optional inline blob.
#[derive(Debug, Clone)]
pub struct Entry {
    pub path: String,
    pub kind: Kind,
    pub mode: u32,
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    pub mtime: Time,
    pub atime: Time,
    pub ctime: Time,
    pub symlink_target: Option<String>,
    /// `None` in metadata-only mode, or for directories/symlinks/devices. `Some` holds the
    /// inline content blob for a regular file that was archived with its body intact.
    pub body: Option<Vec<u8>>,
}

impl Entry {
    /// Synthesizes an intermediate directory absent from the archive, per SPEC_FULL §3.
    pub fn synthesize_dir(path: String, mtime: Time) -> Entry {
        Entry {
            path,
            kind: Kind::Directory,
            mode: 0o755,
            size: 0,
            uid: 0,
            gid: 0,
            mtime,
            atime: mtime,
            ctime: mtime,
            symlink_target: None,
            body: None,
        }
    }

    /// Reads the full content of a regular file entry.
    ///
    /// Metadata-only entries (size `> 0` but no inline body) yield `size` zero bytes --
    /// the resolved choice for SPEC_FULL's Open Question 1. Directories, symlinks and
    /// devices always read as empty.
    pub fn read(&self) -> Vec<u8> {
        match self.kind {
            Kind::Regular => match &self.body {
                Some(body) => body.clone(),
                None => vec![0u8; self.size as usize],
            },
            _ => Vec::new(),
        }
    }
}
