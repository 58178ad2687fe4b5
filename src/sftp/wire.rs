//! SFTPv3 request decoding: turns wire bytes into typed [`ClientRequest`]s.
//!
//! Grounded on the teacher's `parser` module split (wire decode lives apart from wire
//! encode, see `src/sftp/encode.rs`) and on `parser/primitive.rs`'s small composable
//! `Cursor`-style readers.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};

const SSH_FXP_INIT: u8 = 1;
const SSH_FXP_OPEN: u8 = 3;
const SSH_FXP_CLOSE: u8 = 4;
const SSH_FXP_READ: u8 = 5;
const SSH_FXP_WRITE: u8 = 6;
const SSH_FXP_LSTAT: u8 = 7;
const SSH_FXP_OPENDIR: u8 = 11;
const SSH_FXP_READDIR: u8 = 12;
const SSH_FXP_REALPATH: u8 = 16;
const SSH_FXP_STAT: u8 = 17;

/// The `SSH_FXF_WRITE` bit of `OPEN`'s `pflags`; the only open-mode distinction this
/// server makes (SPEC_FULL §4.11: reads serve from the VFS, writes land in the overlay).
const SSH_FXF_WRITE: u32 = 0x00000002;

#[derive(Debug, Clone)]
pub enum ClientRequest {
    Init { version: u32 },
    Stat { id: u32, path: String },
    LStat { id: u32, path: String },
    RealPath { id: u32, path: String },
    OpenDir { id: u32, path: String },
    ReadDir { id: u32, handle: u32 },
    Open { id: u32, path: String, write: bool },
    Read { id: u32, handle: u32, offset: u64, len: u32 },
    Write { id: u32, handle: u32, offset: u64, data: Vec<u8> },
    Close { id: u32, handle: u32 },
}

fn read_string(cursor: &mut Cursor<&[u8]>) -> Option<String> {
    let len = cursor.read_u32::<BigEndian>().ok()? as usize;
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf).ok()?;
    String::from_utf8(buf).ok()
}

/// SFTP handles are themselves length-prefixed opaque strings; this server only ever
/// hands out its own 4-byte big-endian handle ids as that opaque payload, so decoding one
/// back is just reading a 4-byte string as a `u32`.
fn read_handle_id(cursor: &mut Cursor<&[u8]>) -> Option<u32> {
    let len = cursor.read_u32::<BigEndian>().ok()?;
    if len != 4 {
        return None;
    }
    cursor.read_u32::<BigEndian>().ok()
}

/// Decodes one SFTP request payload -- the bytes after the 4-byte length prefix the
/// subsystem channel framing has already stripped.
pub fn decode(payload: &[u8]) -> Option<ClientRequest> {
    let mut cursor = Cursor::new(payload);
    let packet_type = cursor.read_u8().ok()?;

    if packet_type == SSH_FXP_INIT {
        let version = cursor.read_u32::<BigEndian>().ok()?;
        return Some(ClientRequest::Init { version });
    }

    let id = cursor.read_u32::<BigEndian>().ok()?;
    match packet_type {
        SSH_FXP_STAT => Some(ClientRequest::Stat { id, path: read_string(&mut cursor)? }),
        SSH_FXP_LSTAT => Some(ClientRequest::LStat { id, path: read_string(&mut cursor)? }),
        SSH_FXP_REALPATH => Some(ClientRequest::RealPath { id, path: read_string(&mut cursor)? }),
        SSH_FXP_OPENDIR => Some(ClientRequest::OpenDir { id, path: read_string(&mut cursor)? }),
        SSH_FXP_READDIR => Some(ClientRequest::ReadDir { id, handle: read_handle_id(&mut cursor)? }),
        SSH_FXP_OPEN => {
            let path = read_string(&mut cursor)?;
            let pflags = cursor.read_u32::<BigEndian>().ok()?;
            // An attrs block follows; this server never honors client-supplied attrs on
            // open, so it is left unread here and simply absent from the cursor position.
            Some(ClientRequest::Open { id, path, write: pflags & SSH_FXF_WRITE != 0 })
        }
        SSH_FXP_READ => {
            let handle = read_handle_id(&mut cursor)?;
            let offset = cursor.read_u64::<BigEndian>().ok()?;
            let len = cursor.read_u32::<BigEndian>().ok()?;
            Some(ClientRequest::Read { id, handle, offset, len })
        }
        SSH_FXP_WRITE => {
            let handle = read_handle_id(&mut cursor)?;
            let offset = cursor.read_u64::<BigEndian>().ok()?;
            let len = cursor.read_u32::<BigEndian>().ok()? as usize;
            let mut data = vec![0u8; len];
            cursor.read_exact(&mut data).ok()?;
            Some(ClientRequest::Write { id, handle, offset, data })
        }
        SSH_FXP_CLOSE => Some(ClientRequest::Close { id, handle: read_handle_id(&mut cursor)? }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::Write;

    fn string_bytes(s: &str) -> Vec<u8> {
        let mut out = Vec::new();
        out.write_u32::<BigEndian>(s.len() as u32).unwrap();
        out.write_all(s.as_bytes()).unwrap();
        out
    }

    fn handle_bytes(id: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.write_u32::<BigEndian>(4).unwrap();
        out.write_u32::<BigEndian>(id).unwrap();
        out
    }

    #[test]
    fn decodes_init() {
        let mut payload = vec![SSH_FXP_INIT];
        payload.write_u32::<BigEndian>(3).unwrap();
        assert!(matches!(decode(&payload).unwrap(), ClientRequest::Init { version: 3 }));
    }

    #[test]
    fn decodes_realpath() {
        let mut payload = vec![SSH_FXP_REALPATH];
        payload.write_u32::<BigEndian>(7).unwrap();
        payload.extend(string_bytes("/etc"));
        match decode(&payload).unwrap() {
            ClientRequest::RealPath { id, path } => {
                assert_eq!(id, 7);
                assert_eq!(path, "/etc");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn decodes_open_with_write_flag() {
        let mut payload = vec![SSH_FXP_OPEN];
        payload.write_u32::<BigEndian>(1).unwrap();
        payload.extend(string_bytes("/tmp/x"));
        payload.write_u32::<BigEndian>(SSH_FXF_WRITE).unwrap();
        payload.write_u32::<BigEndian>(0).unwrap();
        match decode(&payload).unwrap() {
            ClientRequest::Open { id, path, write } => {
                assert_eq!(id, 1);
                assert_eq!(path, "/tmp/x");
                assert!(write);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn decodes_write_with_handle_and_data() {
        let mut payload = vec![SSH_FXP_WRITE];
        payload.write_u32::<BigEndian>(2).unwrap();
        payload.extend(handle_bytes(9));
        payload.write_u64::<BigEndian>(0).unwrap();
        payload.write_u32::<BigEndian>(5).unwrap();
        payload.extend_from_slice(b"hello");
        match decode(&payload).unwrap() {
            ClientRequest::Write { id, handle, offset, data } => {
                assert_eq!(id, 2);
                assert_eq!(handle, 9);
                assert_eq!(offset, 0);
                assert_eq!(data, b"hello".to_vec());
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
