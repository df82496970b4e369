// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Archive filename codec: `db_<YYYY-MM-DD>_<HHMMSS>.<ext>`.
//!
//! Decoding is fixed-width field extraction. The layout is
//!
//! ```text
//! 0   3          13 14     20 21
//! db_ YYYY-MM-DD _  HHMMSS .  ext
//! ```
//!
//! and every byte position is checked against that layout. Nothing is trimmed by
//! character class, so a name either decodes to exactly the instant it was encoded
//! from or does not decode at all.

use time::macros::format_description;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

const PREFIX: &str = "db_";
const DATE_AT: usize = 3;
const SEP_AT: usize = 13;
const TIME_AT: usize = 14;
const DOT_AT: usize = 20;
const EXT_AT: usize = 21;

/// Errors raised while encoding an archive name.
#[derive(Debug, thiserror::Error)]
pub enum NameError {
    /// The timestamp's year does not fit the four-digit field.
    #[error("year {0} does not fit a four-digit archive name")]
    YearOutOfRange(i32),
    /// The timestamp could not be shifted into the codec's offset.
    #[error("timestamp cannot be represented at offset {0}")]
    OffsetOutOfRange(UtcOffset),
    /// Formatting failed inside the `time` crate.
    #[error("format error: {0}")]
    Format(#[from] time::error::Format),
}

/// Encodes and decodes archive names for one deployment.
///
/// The UTC offset and extension are fixed for the codec's lifetime; two codecs with
/// different offsets disagree on which wall-clock time a name denotes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameCodec {
    offset: UtcOffset,
    ext: String,
}

impl NameCodec {
    /// Create a codec rendering wall-clock fields at `offset` with extension `ext`
    /// (without the leading dot).
    pub fn new(offset: UtcOffset, ext: impl Into<String>) -> Self {
        Self {
            offset,
            ext: ext.into(),
        }
    }

    /// Codec pinned to UTC.
    pub fn utc(ext: impl Into<String>) -> Self {
        Self::new(UtcOffset::UTC, ext)
    }

    /// Offset used for the date and time fields.
    pub fn offset(&self) -> UtcOffset {
        self.offset
    }

    /// Archive extension without the leading dot.
    pub fn extension(&self) -> &str {
        &self.ext
    }

    /// Render the archive name for `at`. Sub-second precision is dropped.
    pub fn encode(&self, at: OffsetDateTime) -> Result<String, NameError> {
        let local = at
            .checked_to_offset(self.offset)
            .ok_or(NameError::OffsetOutOfRange(self.offset))?;
        let year = local.year();
        if !(0..=9999).contains(&year) {
            return Err(NameError::YearOutOfRange(year));
        }
        let stem = local.format(format_description!(
            "[year]-[month]-[day]_[hour][minute][second]"
        ))?;
        Ok(format!("{PREFIX}{stem}.{}", self.ext))
    }

    /// Recover the creation instant from `name`.
    ///
    /// Returns `None` for anything that does not match the exact layout produced by
    /// [`encode`](Self::encode), including impossible calendar dates. Absence is the
    /// normal answer for foreign files, not an error.
    pub fn decode(&self, name: &str) -> Option<OffsetDateTime> {
        let bytes = name.as_bytes();
        if bytes.len() != EXT_AT + self.ext.len()
            || !name.starts_with(PREFIX)
            || bytes[SEP_AT] != b'_'
            || bytes[DOT_AT] != b'.'
            || name.get(EXT_AT..)? != self.ext
        {
            return None;
        }

        let date = &bytes[DATE_AT..SEP_AT];
        if date[4] != b'-' || date[7] != b'-' {
            return None;
        }
        let year = digits(&date[0..4])?;
        let month = digits(&date[5..7])?;
        let day = digits(&date[8..10])?;

        let clock = &bytes[TIME_AT..DOT_AT];
        let hour = digits(&clock[0..2])?;
        let minute = digits(&clock[2..4])?;
        let second = digits(&clock[4..6])?;

        let month = Month::try_from(u8::try_from(month).ok()?).ok()?;
        let date =
            Date::from_calendar_date(i32::try_from(year).ok()?, month, u8::try_from(day).ok()?)
                .ok()?;
        let time = Time::from_hms(
            u8::try_from(hour).ok()?,
            u8::try_from(minute).ok()?,
            u8::try_from(second).ok()?,
        )
        .ok()?;
        Some(PrimitiveDateTime::new(date, time).assume_offset(self.offset))
    }
}

/// Parse a run of ASCII digits; any other byte rejects the whole field.
fn digits(field: &[u8]) -> Option<u32> {
    field.iter().try_fold(0u32, |acc, b| {
        b.is_ascii_digit()
            .then(|| acc * 10 + u32::from(b - b'0'))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use time::macros::{datetime, offset};

    #[test]
    fn encodes_documented_example() {
        let codec = NameCodec::utc("zip");
        let name = codec.encode(datetime!(2024-03-01 15:30:45 UTC)).unwrap();
        assert_eq!(name, "db_2024-03-01_153045.zip");
    }

    #[test]
    fn encode_drops_subseconds() {
        let codec = NameCodec::utc("zip");
        let name = codec
            .encode(datetime!(2024-03-01 15:30:45.999 UTC))
            .unwrap();
        assert_eq!(name, "db_2024-03-01_153045.zip");
    }

    #[test]
    fn encode_renders_in_codec_offset() {
        let codec = NameCodec::new(offset!(+2), "zip");
        let name = codec.encode(datetime!(2024-03-01 23:30:00 UTC)).unwrap();
        assert_eq!(name, "db_2024-03-02_013000.zip");
        assert_eq!(
            codec.decode(&name).unwrap(),
            datetime!(2024-03-01 23:30:00 UTC)
        );
    }

    #[test]
    fn encode_rejects_years_outside_four_digits() {
        let codec = NameCodec::utc("zip");
        let before_epoch = Date::from_calendar_date(-1, Month::January, 1)
            .unwrap()
            .midnight()
            .assume_utc();
        let err = codec.encode(before_epoch).unwrap_err();
        assert!(matches!(err, NameError::YearOutOfRange(-1)));
    }

    #[test]
    fn decodes_documented_example() {
        let codec = NameCodec::utc("zip");
        assert_eq!(
            codec.decode("db_2024-03-01_153045.zip"),
            Some(datetime!(2024-03-01 15:30:45 UTC))
        );
    }

    #[test]
    fn decode_handles_multi_part_extension() {
        let codec = NameCodec::utc("tar.gz");
        assert_eq!(
            codec.decode("db_2023-06-01_090000.tar.gz"),
            Some(datetime!(2023-06-01 09:00:00 UTC))
        );
        assert_eq!(codec.decode("db_2023-06-01_090000.zip"), None);
    }

    #[test]
    fn decode_rejects_foreign_and_damaged_names() {
        let codec = NameCodec::utc("zip");
        for name in [
            "",
            "backup_old.zip",
            "db_.zip",
            "db_2024-03-01_153045",
            "db_2024-03-01_153045.zi",
            "db_2024-03-01_153045.zipx",
            "db_2024-03-01_153045.ZIP",
            "xb_2024-03-01_153045.zip",
            "db-2024-03-01_153045.zip",
            "db_2024-03-01-153045.zip",
            "db_2024/03/01_153045.zip",
            "db_2024-03-01_15304a.zip",
            "db_+024-03-01_153045.zip",
            "db_2024-03-01_1530 5.zip",
            "db_2024-03-01_153045_zip",
            ".db_2024-03-01_153045.zip",
        ] {
            assert_eq!(codec.decode(name), None, "{name:?} must not decode");
        }
    }

    #[test]
    fn decode_rejects_impossible_calendar_values() {
        let codec = NameCodec::utc("zip");
        for name in [
            "db_2023-02-29_120000.zip",
            "db_2024-13-01_120000.zip",
            "db_2024-00-10_120000.zip",
            "db_2024-04-31_120000.zip",
            "db_2024-03-01_240000.zip",
            "db_2024-03-01_126000.zip",
            "db_2024-03-01_120060.zip",
        ] {
            assert_eq!(codec.decode(name), None, "{name:?} must not decode");
        }
        assert!(codec.decode("db_2024-02-29_235959.zip").is_some());
    }

    #[test]
    fn decode_never_slices_through_multibyte_chars() {
        let codec = NameCodec::utc("zip");
        assert_eq!(codec.decode("db_2024-03-01_15304é.zi"), None);
        assert_eq!(codec.decode("db_2024-03-01_153045.zé"), None);
        assert_eq!(codec.decode("db_2024-03-0é_153045.zip"), None);
    }

    #[test]
    fn prefix_characters_inside_fields_are_kept() {
        // An extension made of prefix characters would be eaten by set trimming.
        let codec = NameCodec::utc("bd_");
        assert_eq!(
            codec.decode("db_2024-03-01_153045.bd_"),
            Some(datetime!(2024-03-01 15:30:45 UTC))
        );
    }
}
