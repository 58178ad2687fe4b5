//! SFTPv3 response encoding: turns server responses back into wire bytes.
//!
//! Grounded on the teacher's `serializer` module (the write-side counterpart to
//! `src/sftp/wire.rs`'s decode side), following the same per-field primitive writers.

use byteorder::{BigEndian, WriteBytesExt};

use crate::archive::Kind;
use crate::vfs::{Stat, VfsError};

const SSH_FXP_STATUS: u8 = 101;
const SSH_FXP_HANDLE: u8 = 102;
const SSH_FXP_DATA: u8 = 103;
const SSH_FXP_NAME: u8 = 104;
const SSH_FXP_ATTRS: u8 = 105;
const SSH_FXP_VERSION: u8 = 2;

const SSH_FX_OK: u32 = 0;
const SSH_FX_EOF: u32 = 1;
const SSH_FX_NO_SUCH_FILE: u32 = 2;
const SSH_FX_PERMISSION_DENIED: u32 = 3;
const SSH_FX_FAILURE: u32 = 4;

const ATTR_SIZE: u32 = 0x00000001;
const ATTR_UIDGID: u32 = 0x00000002;
const ATTR_PERMISSIONS: u32 = 0x00000004;
const ATTR_ACMODTIME: u32 = 0x00000008;

fn write_string(out: &mut Vec<u8>, s: &str) {
    out.write_u32::<BigEndian>(s.len() as u32).unwrap();
    out.extend_from_slice(s.as_bytes());
}

fn unix_mode(stat: &Stat) -> u32 {
    let type_bits: u32 = match stat.kind {
        Kind::Directory => 0o040000,
        Kind::Symlink => 0o120000,
        Kind::Device => 0o020000,
        Kind::Regular => 0o100000,
    };
    type_bits | (stat.mode & 0o7777)
}

fn write_attrs(out: &mut Vec<u8>, stat: &Stat) {
    out.write_u32::<BigEndian>(ATTR_SIZE | ATTR_UIDGID | ATTR_PERMISSIONS | ATTR_ACMODTIME).unwrap();
    out.write_u64::<BigEndian>(stat.size).unwrap();
    out.write_u32::<BigEndian>(stat.uid).unwrap();
    out.write_u32::<BigEndian>(stat.gid).unwrap();
    out.write_u32::<BigEndian>(unix_mode(stat)).unwrap();
    out.write_u32::<BigEndian>(stat.atime.0).unwrap();
    out.write_u32::<BigEndian>(stat.mtime.0).unwrap();
}

/// `ls -l`-style rendering for SFTP_NAME's `longname` field; clients that show a file
/// listing directly (rather than re-deriving it from `attrs`) read this.
fn long_name(filename: &str, stat: &Stat) -> String {
    let kind_char = match stat.kind {
        Kind::Directory => 'd',
        Kind::Symlink => 'l',
        _ => '-',
    };
    format!("{kind_char}rwxr-xr-x 1 {} {} {:>8} Jan  1  1970 {filename}", stat.uid, stat.gid, stat.size)
}

fn frame(packet_type: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 5);
    out.write_u32::<BigEndian>((body.len() + 1) as u32).unwrap();
    out.push(packet_type);
    out.extend_from_slice(body);
    out
}

pub fn version(ver: u32) -> Vec<u8> {
    let mut body = Vec::new();
    body.write_u32::<BigEndian>(ver).unwrap();
    frame(SSH_FXP_VERSION, &body)
}

pub fn handle(id: u32, handle_id: u32) -> Vec<u8> {
    let mut body = Vec::new();
    body.write_u32::<BigEndian>(id).unwrap();
    body.write_u32::<BigEndian>(4).unwrap();
    body.write_u32::<BigEndian>(handle_id).unwrap();
    frame(SSH_FXP_HANDLE, &body)
}

pub fn data(id: u32, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.write_u32::<BigEndian>(id).unwrap();
    body.write_u32::<BigEndian>(payload.len() as u32).unwrap();
    body.extend_from_slice(payload);
    frame(SSH_FXP_DATA, &body)
}

pub fn attrs(id: u32, stat: &Stat) -> Vec<u8> {
    let mut body = Vec::new();
    body.write_u32::<BigEndian>(id).unwrap();
    write_attrs(&mut body, stat);
    frame(SSH_FXP_ATTRS, &body)
}

pub fn name(id: u32, entries: &[(String, Stat)]) -> Vec<u8> {
    let mut body = Vec::new();
    body.write_u32::<BigEndian>(id).unwrap();
    body.write_u32::<BigEndian>(entries.len() as u32).unwrap();
    for (filename, stat) in entries {
        write_string(&mut body, filename);
        write_string(&mut body, &long_name(filename, stat));
        write_attrs(&mut body, stat);
    }
    frame(SSH_FXP_NAME, &body)
}

fn status(id: u32, code: u32, message: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.write_u32::<BigEndian>(id).unwrap();
    body.write_u32::<BigEndian>(code).unwrap();
    write_string(&mut body, message);
    write_string(&mut body, "en");
    frame(SSH_FXP_STATUS, &body)
}

pub fn status_ok(id: u32) -> Vec<u8> {
    status(id, SSH_FX_OK, "OK")
}

pub fn status_eof(id: u32) -> Vec<u8> {
    status(id, SSH_FX_EOF, "End of file")
}

/// Translates a [`VfsError`] into the nearest SFTP status code.
pub fn status_for(id: u32, err: VfsError) -> Vec<u8> {
    match err {
        VfsError::NotFound => status(id, SSH_FX_NO_SUCH_FILE, "No such file"),
        VfsError::PermissionDenied => status(id, SSH_FX_PERMISSION_DENIED, "Permission denied"),
        _ => status(id, SSH_FX_FAILURE, "Failure"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::Time;

    fn stat(kind: Kind, size: u64) -> Stat {
        Stat { kind, mode: 0o644, size, uid: 0, gid: 0, mtime: Time::EPOCH, atime: Time::EPOCH, ctime: Time::EPOCH }
    }

    #[test]
    fn frame_length_prefix_matches_body() {
        let packet = status_ok(42);
        let declared = u32::from_be_bytes(packet[0..4].try_into().unwrap());
        assert_eq!(declared as usize, packet.len() - 4);
        assert_eq!(packet[4], SSH_FXP_STATUS);
    }

    #[test]
    fn name_frame_carries_every_entry() {
        let packet = name(1, &[("a".to_string(), stat(Kind::Regular, 10)), ("b".to_string(), stat(Kind::Directory, 0))]);
        assert_eq!(packet[4], SSH_FXP_NAME);
        let count = u32::from_be_bytes(packet[9..13].try_into().unwrap());
        assert_eq!(count, 2);
    }

    #[test]
    fn unix_mode_sets_the_directory_type_bits() {
        let mode = unix_mode(&stat(Kind::Directory, 0));
        assert_eq!(mode & 0o170000, 0o040000);
    }
}
