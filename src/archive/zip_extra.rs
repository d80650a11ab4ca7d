//! ZIP extra-field timestamp codec.
//!
//! Two extra fields carry times beyond the DOS date-time every entry has:
//!
//! - `0x5455` (Info-ZIP extended timestamp): flag byte, then signed 32-bit
//!   Unix seconds for mtime / atime / ctime as flagged.
//! - `0x000A` (NTFS): 4 reserved bytes, then attribute tag `0x0001` of size 24
//!   holding mtime / atime / ctime as 64-bit NT ticks.
//!
//! Readers prefer NTFS (full range, 100ns), then `0x5455`, then DOS.

use super::times::{from_nt_ticks, from_unix_seconds, to_nt_ticks, unix_seconds, FileTimes};

pub const NTFS_ID: u16 = 0x000A;
pub const EXTENDED_TIMESTAMP_ID: u16 = 0x5455;

const NTFS_TIMES_TAG: u16 = 0x0001;
const NTFS_TIMES_SIZE: u16 = 24;

/// Iterate `(header id, data)` pairs of a raw extra-field block.
///
/// A truncated trailing field ends iteration.
pub fn fields(extra: &[u8]) -> impl Iterator<Item = (u16, &[u8])> {
    let mut rest = extra;
    std::iter::from_fn(move || {
        if rest.len() < 4 {
            return None;
        }
        let id = u16::from_le_bytes([rest[0], rest[1]]);
        let len = usize::from(u16::from_le_bytes([rest[2], rest[3]]));
        if rest.len() < 4 + len {
            return None;
        }
        let data = &rest[4..4 + len];
        rest = &rest[4 + len..];
        Some((id, data))
    })
}

fn fits_i32(secs: i64) -> bool {
    secs >= i64::from(i32::MIN) && secs <= i64::from(i32::MAX)
}

/// Encode the `0x5455` payload with every time that fits 32 bits.
pub fn encode_extended_timestamp(times: &FileTimes) -> Option<Vec<u8>> {
    let mut flags = 0u8;
    let mut body = Vec::with_capacity(12);
    for (bit, time) in [(1u8, times.modified), (2, times.accessed), (4, times.created)] {
        let Some(secs) = time.map(unix_seconds).filter(|s| fits_i32(*s)) else {
            continue;
        };
        flags |= bit;
        body.extend_from_slice(&(secs as i32).to_le_bytes());
    }
    if flags == 0 {
        return None;
    }
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(flags);
    out.extend_from_slice(&body);
    Some(out)
}

/// Encode the `0x000A` payload. Absent times are written as zero.
pub fn encode_ntfs(times: &FileTimes) -> Option<Vec<u8>> {
    if times.is_empty() {
        return None;
    }
    let ticks = |t: Option<std::time::SystemTime>| t.and_then(to_nt_ticks).unwrap_or(0);

    let mut out = Vec::with_capacity(32);
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&NTFS_TIMES_TAG.to_le_bytes());
    out.extend_from_slice(&NTFS_TIMES_SIZE.to_le_bytes());
    out.extend_from_slice(&ticks(times.modified).to_le_bytes());
    out.extend_from_slice(&ticks(times.accessed).to_le_bytes());
    out.extend_from_slice(&ticks(times.created).to_le_bytes());
    Some(out)
}

/// Extra fields to attach to an entry with these times.
///
/// `0x5455` whenever some time fits 32 bits; NTFS when a time does not fit,
/// has sub-second precision, or access / creation times are present, so
/// nothing is silently truncated.
pub fn timestamp_fields(times: &FileTimes) -> Vec<(u16, Vec<u8>)> {
    let mut out = Vec::new();
    if let Some(data) = encode_extended_timestamp(times) {
        out.push((EXTENDED_TIMESTAMP_ID, data));
    }
    let needs_ntfs = times.exceeds_unix32()
        || times.has_subsecond()
        || times.accessed.is_some()
        || times.created.is_some();
    if needs_ntfs {
        if let Some(data) = encode_ntfs(times) {
            out.push((NTFS_ID, data));
        }
    }
    out
}

pub fn decode_extended_timestamp(data: &[u8]) -> Option<FileTimes> {
    let (&flags, mut rest) = data.split_first()?;
    let mut times = FileTimes::default();
    for (bit, slot) in [
        (1u8, &mut times.modified),
        (2, &mut times.accessed),
        (4, &mut times.created),
    ] {
        if flags & bit == 0 {
            continue;
        }
        // Central directory copies may only carry mtime
        if rest.len() < 4 {
            break;
        }
        let secs = i32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
        *slot = Some(from_unix_seconds(i64::from(secs)));
        rest = &rest[4..];
    }
    (!times.is_empty()).then_some(times)
}

pub fn decode_ntfs(data: &[u8]) -> Option<FileTimes> {
    let mut rest = data.get(4..)?;
    while rest.len() >= 4 {
        let tag = u16::from_le_bytes([rest[0], rest[1]]);
        let size = usize::from(u16::from_le_bytes([rest[2], rest[3]]));
        let body = rest.get(4..4 + size)?;
        if tag == NTFS_TIMES_TAG && size >= 24 {
            let read = |i: usize| {
                let mut b = [0u8; 8];
                b.copy_from_slice(&body[i * 8..i * 8 + 8]);
                match u64::from_le_bytes(b) {
                    0 => None,
                    ticks => Some(from_nt_ticks(ticks)),
                }
            };
            let times = FileTimes {
                modified: read(0),
                accessed: read(1),
                created: read(2),
            };
            return (!times.is_empty()).then_some(times);
        }
        rest = &rest[4 + size..];
    }
    None
}

/// Best timestamps found in an extra-field block.
pub fn decode_times(extra: &[u8]) -> Option<FileTimes> {
    let mut ntfs = None;
    let mut unix = None;
    for (id, data) in fields(extra) {
        match id {
            NTFS_ID => ntfs = ntfs.or_else(|| decode_ntfs(data)),
            EXTENDED_TIMESTAMP_ID => unix = unix.or_else(|| decode_extended_timestamp(data)),
            _ => {}
        }
    }
    match (ntfs, unix) {
        (Some(n), Some(u)) => Some(FileTimes {
            modified: n.modified.or(u.modified),
            accessed: n.accessed.or(u.accessed),
            created: n.created.or(u.created),
        }),
        (n, u) => n.or(u),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::times::from_unix_parts;

    fn block(fields: &[(u16, Vec<u8>)]) -> Vec<u8> {
        let mut out = Vec::new();
        for (id, data) in fields {
            out.extend_from_slice(&id.to_le_bytes());
            out.extend_from_slice(&(data.len() as u16).to_le_bytes());
            out.extend_from_slice(data);
        }
        out
    }

    #[test]
    fn test_plain_time_gets_unix_field_only() {
        let times = FileTimes::modified_only(from_unix_seconds(1_600_000_000));
        let fields = timestamp_fields(&times);
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].0, EXTENDED_TIMESTAMP_ID);
        assert_eq!(fields[0].1, {
            let mut v = vec![1u8];
            v.extend_from_slice(&1_600_000_000i32.to_le_bytes());
            v
        });
    }

    #[test]
    fn test_post_2038_uses_ntfs() {
        // 2100-01-01
        let t = from_unix_seconds(4_102_444_800);
        let times = FileTimes::modified_only(t);
        let fields = timestamp_fields(&times);
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].0, NTFS_ID);
        assert_eq!(fields[0].1.len(), 32);

        let decoded = decode_times(&block(&fields)).unwrap();
        assert_eq!(decoded.modified, Some(t));
    }

    #[test]
    fn test_ntfs_preferred_over_unix() {
        let t = from_unix_parts(1_600_000_000, 250_000_000);
        let times = FileTimes {
            modified: Some(t),
            accessed: Some(from_unix_seconds(1_600_000_500)),
            created: None,
        };
        let fields = timestamp_fields(&times);
        assert_eq!(fields.len(), 2);

        let decoded = decode_times(&block(&fields)).unwrap();
        assert_eq!(decoded.modified, Some(t));
        assert_eq!(decoded.accessed, times.accessed);
        assert_eq!(decoded.created, None);
    }

    #[test]
    fn test_unix_field_with_mtime_only_in_central_copy() {
        // flags claim mtime+atime but only mtime follows
        let mut data = vec![3u8];
        data.extend_from_slice(&1_000i32.to_le_bytes());
        let decoded = decode_extended_timestamp(&data).unwrap();
        assert_eq!(decoded.modified, Some(from_unix_seconds(1_000)));
        assert_eq!(decoded.accessed, None);
    }

    #[test]
    fn test_fields_stops_on_truncation() {
        let mut raw = block(&[(0x7875, vec![1, 2, 3])]);
        raw.extend_from_slice(&[0x0A, 0x00, 0xFF]);
        let ids: Vec<u16> = fields(&raw).map(|(id, _)| id).collect();
        assert_eq!(ids, vec![0x7875]);
        assert!(decode_times(&raw).is_none());
    }
}
