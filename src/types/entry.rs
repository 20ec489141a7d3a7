//! Directory entries as reported by the device filesystem

use serde::{Deserialize, Serialize};

/// FAT attribute byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Attributes(pub u8);

impl Attributes {
    pub const READ_ONLY: u8 = 0x01;
    pub const HIDDEN: u8 = 0x02;
    pub const SYSTEM: u8 = 0x04;
    pub const DIRECTORY: u8 = 0x10;
    pub const ARCHIVE: u8 = 0x20;

    /// Create from the raw attribute byte.
    pub fn new(value: u8) -> Self {
        Self(value)
    }

    /// Check if a specific bit is set.
    pub fn is_set(&self, bit: u32) -> bool {
        bit < 8 && (self.0 & (1 << bit)) != 0
    }

    /// Check if any bit of `flag` is set.
    pub fn has_flag(&self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }

    pub fn is_dir(&self) -> bool {
        self.has_flag(Self::DIRECTORY)
    }

    pub fn is_hidden(&self) -> bool {
        self.has_flag(Self::HIDDEN)
    }

    pub fn is_read_only(&self) -> bool {
        self.has_flag(Self::READ_ONLY)
    }

    /// Get the raw byte.
    pub fn value(&self) -> u8 {
        self.0
    }
}

/// Packed FAT date and time.
///
/// `date` is `(year - 1980) << 9 | month << 5 | day`,
/// `time` is `hour << 11 | minute << 5 | second / 2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct FatTimestamp {
    pub date: u16,
    pub time: u16,
}

impl FatTimestamp {
    /// Pack calendar fields. Out-of-range fields are clamped to what FAT can store.
    pub fn from_parts(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Self {
        let year = year.clamp(1980, 1980 + 127) - 1980;
        let month = u16::from(month.clamp(1, 12));
        let day = u16::from(day.clamp(1, 31));
        let date = (year << 9) | (month << 5) | day;
        let time = (u16::from(hour.min(23)) << 11)
            | (u16::from(minute.min(59)) << 5)
            | u16::from(second.min(59) / 2);
        Self { date, time }
    }

    /// Timestamp for a moment expressed as seconds since the Unix epoch (UTC).
    pub fn from_unix(secs: u64) -> Self {
        let days = secs / 86_400;
        let rem = secs % 86_400;
        let (year, month, day) = civil_from_days(days as i64);
        Self::from_parts(
            year.clamp(1980, 2107) as u16,
            month,
            day,
            (rem / 3600) as u8,
            ((rem % 3600) / 60) as u8,
            (rem % 60) as u8,
        )
    }

    pub fn year(&self) -> u16 {
        1980 + (self.date >> 9)
    }

    pub fn month(&self) -> u8 {
        ((self.date >> 5) & 0x0F) as u8
    }

    pub fn day(&self) -> u8 {
        (self.date & 0x1F) as u8
    }

    pub fn hour(&self) -> u8 {
        (self.time >> 11) as u8
    }

    pub fn minute(&self) -> u8 {
        ((self.time >> 5) & 0x3F) as u8
    }

    /// Seconds, at the two-second resolution FAT stores.
    pub fn second(&self) -> u8 {
        ((self.time & 0x1F) * 2) as u8
    }
}

impl std::fmt::Display for FatTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year(),
            self.month(),
            self.day(),
            self.hour(),
            self.minute(),
            self.second()
        )
    }
}

// Days since 1970-01-01 to (year, month, day), proleptic Gregorian.
fn civil_from_days(days: i64) -> (i64, u8, u8) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u8;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub size: u64,
    pub attributes: Attributes,
    pub modified: FatTimestamp,
}

impl DirEntry {
    pub fn is_dir(&self) -> bool {
        self.attributes.is_dir()
    }
}
