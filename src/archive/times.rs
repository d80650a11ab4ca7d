//! File timestamps carried across format boundaries.
//!
//! Archive formats disagree on how time is stored: DOS date-time (2 second
//! resolution, 1980..=2107), 32-bit Unix seconds, NT ticks (100ns since 1601),
//! pax decimal seconds. `FileTimes` keeps full `SystemTime` precision and
//! converts to whichever encoding a format needs.

use std::fs::Metadata;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Datelike, Local, NaiveDate, Timelike, Utc};
use filetime::FileTime;

/// Seconds between 1601-01-01 and 1970-01-01.
const NT_EPOCH_OFFSET_SECS: i128 = 11_644_473_600;
const NT_TICKS_PER_SEC: i128 = 10_000_000;

/// Modified / accessed / created times of one file or entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileTimes {
    pub modified: Option<SystemTime>,
    pub accessed: Option<SystemTime>,
    pub created: Option<SystemTime>,
}

impl FileTimes {
    pub fn modified_only(modified: SystemTime) -> Self {
        FileTimes {
            modified: Some(modified),
            ..Default::default()
        }
    }

    /// Read what the platform exposes for a file on disk.
    pub fn from_metadata(meta: &Metadata) -> Self {
        FileTimes {
            modified: meta.modified().ok(),
            accessed: meta.accessed().ok(),
            created: meta.created().ok(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.modified.is_none() && self.accessed.is_none() && self.created.is_none()
    }

    fn iter(&self) -> impl Iterator<Item = SystemTime> {
        [self.modified, self.accessed, self.created].into_iter().flatten()
    }

    /// Same times with sub-second precision dropped.
    pub fn truncated_to_seconds(&self) -> Self {
        FileTimes {
            modified: self.modified.map(truncate_to_second),
            accessed: self.accessed.map(truncate_to_second),
            created: self.created.map(truncate_to_second),
        }
    }

    /// Equality at whole-second precision.
    pub fn same_second_as(&self, other: &FileTimes) -> bool {
        self.truncated_to_seconds() == other.truncated_to_seconds()
    }

    /// Whether any present time falls outside a signed 32-bit Unix time.
    ///
    /// Computed on whole seconds, so a time inside the last second of the
    /// range does not count as exceeding it.
    pub fn exceeds_unix32(&self) -> bool {
        self.iter().any(|t| {
            let secs = unix_seconds(t);
            secs > i64::from(i32::MAX) || secs < i64::from(i32::MIN)
        })
    }

    pub fn has_subsecond(&self) -> bool {
        self.iter().any(|t| subsec_nanos(t) != 0)
    }

    /// Restore times onto a file on disk. Creation time is not settable
    /// portably and is left alone.
    pub fn apply_to(&self, path: &Path) -> io::Result<()> {
        match (self.accessed, self.modified) {
            (Some(atime), Some(mtime)) => filetime::set_file_times(
                path,
                FileTime::from_system_time(atime),
                FileTime::from_system_time(mtime),
            ),
            (None, Some(mtime)) => {
                filetime::set_file_mtime(path, FileTime::from_system_time(mtime))
            }
            (Some(atime), None) => {
                filetime::set_file_atime(path, FileTime::from_system_time(atime))
            }
            (None, None) => Ok(()),
        }
    }
}

/// Signed offset from the Unix epoch in nanoseconds.
fn unix_nanos(t: SystemTime) -> i128 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos() as i128,
        Err(e) => -(e.duration().as_nanos() as i128),
    }
}

fn from_unix_nanos(nanos: i128) -> SystemTime {
    if nanos >= 0 {
        UNIX_EPOCH + Duration::new((nanos / 1_000_000_000) as u64, (nanos % 1_000_000_000) as u32)
    } else {
        let abs = -nanos;
        UNIX_EPOCH - Duration::new((abs / 1_000_000_000) as u64, (abs % 1_000_000_000) as u32)
    }
}

/// Whole seconds since the Unix epoch, rounded toward negative infinity.
pub fn unix_seconds(t: SystemTime) -> i64 {
    unix_nanos(t).div_euclid(1_000_000_000) as i64
}

/// Nanoseconds past the whole second returned by [`unix_seconds`].
pub fn subsec_nanos(t: SystemTime) -> u32 {
    unix_nanos(t).rem_euclid(1_000_000_000) as u32
}

pub fn from_unix_seconds(secs: i64) -> SystemTime {
    from_unix_nanos(i128::from(secs) * 1_000_000_000)
}

pub fn from_unix_parts(secs: i64, nanos: u32) -> SystemTime {
    from_unix_nanos(i128::from(secs) * 1_000_000_000 + i128::from(nanos))
}

pub fn truncate_to_second(t: SystemTime) -> SystemTime {
    from_unix_seconds(unix_seconds(t))
}

/// 100ns ticks since 1601-01-01, the 7z and NTFS native epoch.
///
/// Returns `None` for times before 1601 or past the u64 tick range.
pub fn to_nt_ticks(t: SystemTime) -> Option<u64> {
    let ticks = unix_nanos(t).div_euclid(100) + NT_EPOCH_OFFSET_SECS * NT_TICKS_PER_SEC;
    u64::try_from(ticks).ok()
}

pub fn from_nt_ticks(ticks: u64) -> SystemTime {
    let unix_ticks = i128::from(ticks) - NT_EPOCH_OFFSET_SECS * NT_TICKS_PER_SEC;
    from_unix_nanos(unix_ticks * 100)
}

/// Calendar fields of a DOS date-time, valid for 1980..=2107. DOS fields
/// carry no zone and are read and written as local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosParts {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// Split a time into local DOS fields, or `None` when out of DOS range.
pub fn to_dos_parts(t: SystemTime) -> Option<DosParts> {
    let dt = DateTime::<Utc>::from_timestamp(unix_seconds(t), subsec_nanos(t))?.with_timezone(&Local);
    let year = dt.year();
    if !(1980..=2107).contains(&year) {
        return None;
    }
    Some(DosParts {
        year: year as u16,
        month: dt.month() as u8,
        day: dt.day() as u8,
        hour: dt.hour() as u8,
        minute: dt.minute() as u8,
        second: dt.second() as u8,
    })
}

pub fn from_dos_parts(parts: DosParts) -> Option<SystemTime> {
    let date = NaiveDate::from_ymd_opt(
        i32::from(parts.year),
        u32::from(parts.month),
        u32::from(parts.day),
    )?;
    let dt = date.and_hms_opt(
        u32::from(parts.hour),
        u32::from(parts.minute),
        u32::from(parts.second),
    )?;
    // Local times skipped by a DST change have no instant; read them as UTC
    Some(match dt.and_local_timezone(Local).earliest() {
        Some(local) => local.into(),
        None => dt.and_utc().into(),
    })
}

/// Decode a packed DOS date-time (date in the high 16 bits), as used by RAR headers.
pub fn from_packed_dos(packed: u32) -> Option<SystemTime> {
    let date = (packed >> 16) as u16;
    let time = (packed & 0xFFFF) as u16;
    from_dos_parts(DosParts {
        year: 1980 + (date >> 9),
        month: ((date >> 5) & 0x0F) as u8,
        day: (date & 0x1F) as u8,
        hour: (time >> 11) as u8,
        minute: ((time >> 5) & 0x3F) as u8,
        second: ((time & 0x1F) * 2) as u8,
    })
}
