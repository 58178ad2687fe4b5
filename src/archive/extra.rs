//! Decodes the ZIP extra-field records this archive format relies on for UNIX metadata.
//!
//! Mirrors the teacher's `parser::primitive` style: small, composable, fallible readers
//! over a byte slice rather than one monolithic parse function.

use byteorder::{ByteOrder, LittleEndian};

use super::entry::Time;

const TAG_UNIX_UGID: u16 = 0x7875;
const TAG_EXTENDED_TIMESTAMP: u16 = 0x5455;

/// Private-use tag (APPNOTE 4.5, ranges left to application discretion) this builder uses
/// to carry a regular file's true size when its body was stripped in metadata-only mode --
/// the zip header's own uncompressed-size field is necessarily 0 for such entries, since
/// nothing was actually written to the archive. Resolves SPEC_FULL's Open Question 1.
pub const TAG_ORIGINAL_SIZE: u16 = 0x4f53;

const FLAG_MTIME: u8 = 1;
const FLAG_ATIME: u8 = 2;
const FLAG_CTIME: u8 = 4;

/// UNIX ownership decoded from a `0x7875` extra-field record.
#[derive(Debug, Copy, Clone, Default)]
pub struct UnixOwner {
    pub uid: u32,
    pub gid: u32,
}

/// Timestamps decoded from a `0x5455` extra-field record. Absent fields are `None`.
#[derive(Debug, Copy, Clone, Default)]
pub struct ExtendedTimestamp {
    pub mtime: Option<Time>,
    pub atime: Option<Time>,
    pub ctime: Option<Time>,
}

/// Parsed extra-field content for one archive entry.
#[derive(Debug, Copy, Clone, Default)]
pub struct Extra {
    pub owner: Option<UnixOwner>,
    pub timestamp: Option<ExtendedTimestamp>,
    pub original_size: Option<u64>,
}

/// Walks the raw extra-field block of a ZIP central-directory entry, decoding the
/// `0x7875` and `0x5455` records and ignoring everything else. Malformed or truncated
/// records are skipped rather than treated as fatal -- a corrupt single record shouldn't
/// sink the whole archive open.
pub fn parse(mut data: &[u8]) -> Extra {
    let mut extra = Extra::default();
    while data.len() >= 4 {
        let tag = LittleEndian::read_u16(&data[0..2]);
        let len = LittleEndian::read_u16(&data[2..4]) as usize;
        data = &data[4..];
        if data.len() < len {
            break;
        }
        let body = &data[..len];
        match tag {
            TAG_UNIX_UGID => {
                if let Some(owner) = parse_unix_owner(body) {
                    extra.owner = Some(owner);
                }
            }
            TAG_EXTENDED_TIMESTAMP => {
                if let Some(ts) = parse_extended_timestamp(body) {
                    extra.timestamp = Some(ts);
                }
            }
            TAG_ORIGINAL_SIZE => {
                if body.len() >= 8 {
                    extra.original_size = Some(LittleEndian::read_u64(&body[0..8]));
                }
            }
            _ => {}
        }
        data = &data[len..];
    }
    extra
}

/// `0x7875`: `version(1) uid_size(1) uid(uid_size) gid_size(1) gid(gid_size)`.
/// Only the 4-byte-width form (`len == 11`) described in SPEC_FULL §6 is recognized.
fn parse_unix_owner(body: &[u8]) -> Option<UnixOwner> {
    if body.len() < 11 || body[0] != 1 {
        return None;
    }
    let uid_size = body[1] as usize;
    if uid_size != 4 || body.len() < 2 + uid_size + 1 {
        return None;
    }
    let uid = LittleEndian::read_u32(&body[2..6]);
    let gid_size_pos = 2 + uid_size;
    let gid_size = body[gid_size_pos] as usize;
    let gid_start = gid_size_pos + 1;
    if gid_size != 4 || body.len() < gid_start + 4 {
        return None;
    }
    let gid = LittleEndian::read_u32(&body[gid_start..gid_start + 4]);
    Some(UnixOwner { uid, gid })
}

/// `0x5455`: `flags(1)` then a 32-bit little-endian seconds value for each flag bit set,
/// in the fixed order {mtime, atime, ctime}.
fn parse_extended_timestamp(body: &[u8]) -> Option<ExtendedTimestamp> {
    if body.is_empty() {
        return None;
    }
    let flags = body[0];
    let mut pos = 1;
    let mut ts = ExtendedTimestamp::default();
    for (bit, slot) in [
        (FLAG_MTIME, &mut ts.mtime),
        (FLAG_ATIME, &mut ts.atime),
        (FLAG_CTIME, &mut ts.ctime),
    ] {
        if flags & bit != 0 {
            if body.len() < pos + 4 {
                break;
            }
            let raw = LittleEndian::read_u32(&body[pos..pos + 4]);
            *slot = Some(Time(raw));
            pos += 4;
        }
    }
    Some(ts)
}

/// Encodes a `0x7875` + `0x5455` + (optionally) a private original-size record into a
/// single extra-field block, the inverse of [`parse`]. Used by the archive-builder CLI.
pub fn encode(owner: UnixOwner, timestamp: ExtendedTimestamp, original_size: Option<u64>) -> Vec<u8> {
    let mut out = Vec::new();

    let mut ugid_body = vec![1u8, 4];
    ugid_body.extend_from_slice(&owner.uid.to_le_bytes());
    ugid_body.push(4);
    ugid_body.extend_from_slice(&owner.gid.to_le_bytes());
    out.extend_from_slice(&TAG_UNIX_UGID.to_le_bytes());
    out.extend_from_slice(&(ugid_body.len() as u16).to_le_bytes());
    out.extend_from_slice(&ugid_body);

    let mut flags = 0u8;
    let mut ts_body = Vec::new();
    for (bit, value) in [
        (FLAG_MTIME, timestamp.mtime),
        (FLAG_ATIME, timestamp.atime),
        (FLAG_CTIME, timestamp.ctime),
    ] {
        if let Some(t) = value {
            flags |= bit;
            ts_body.extend_from_slice(&t.0.to_le_bytes());
        }
    }
    if flags != 0 {
        let mut body = vec![flags];
        body.extend_from_slice(&ts_body);
        out.extend_from_slice(&TAG_EXTENDED_TIMESTAMP.to_le_bytes());
        out.extend_from_slice(&(body.len() as u16).to_le_bytes());
        out.extend_from_slice(&body);
    }

    if let Some(size) = original_size {
        out.extend_from_slice(&TAG_ORIGINAL_SIZE.to_le_bytes());
        out.extend_from_slice(&8u16.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tag: u16, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&(body.len() as u16).to_le_bytes());
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn decodes_unix_owner_record() {
        let mut body = vec![1u8, 4];
        body.extend_from_slice(&1000u32.to_le_bytes());
        body.push(4);
        body.extend_from_slice(&1000u32.to_le_bytes());
        let raw = record(TAG_UNIX_UGID, &body);
        let extra = parse(&raw);
        let owner = extra.owner.expect("owner record parsed");
        assert_eq!(owner.uid, 1000);
        assert_eq!(owner.gid, 1000);
    }

    #[test]
    fn decodes_extended_timestamp_mtime_only() {
        let mut body = vec![FLAG_MTIME];
        body.extend_from_slice(&1_700_000_000u32.to_le_bytes());
        let raw = record(TAG_EXTENDED_TIMESTAMP, &body);
        let extra = parse(&raw);
        let ts = extra.timestamp.expect("timestamp record parsed");
        assert_eq!(ts.mtime, Some(Time(1_700_000_000)));
        assert_eq!(ts.atime, None);
        assert_eq!(ts.ctime, None);
    }

    #[test]
    fn unrecognized_tags_are_skipped() {
        let raw = record(0x0001, &[0, 0, 0, 0]);
        let extra = parse(&raw);
        assert!(extra.owner.is_none());
        assert!(extra.timestamp.is_none());
    }

    #[test]
    fn truncated_record_does_not_panic() {
        let mut raw = record(TAG_UNIX_UGID, &[1, 4, 0, 0]);
        raw.truncate(raw.len() - 1);
        let extra = parse(&raw);
        assert!(extra.owner.is_none());
    }

    #[test]
    fn encode_then_parse_round_trips() {
        let owner = UnixOwner { uid: 1000, gid: 100 };
        let ts = ExtendedTimestamp {
            mtime: Some(Time(111)),
            atime: Some(Time(222)),
            ctime: None,
        };
        let raw = encode(owner, ts, Some(9));
        let parsed = parse(&raw);
        let parsed_owner = parsed.owner.expect("owner round-trips");
        assert_eq!(parsed_owner.uid, 1000);
        assert_eq!(parsed_owner.gid, 100);
        let parsed_ts = parsed.timestamp.expect("timestamp round-trips");
        assert_eq!(parsed_ts.mtime, Some(Time(111)));
        assert_eq!(parsed_ts.atime, Some(Time(222)));
        assert_eq!(parsed_ts.ctime, None);
        assert_eq!(parsed.original_size, Some(9));
    }
}
