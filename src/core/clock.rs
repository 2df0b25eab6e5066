#![forbid(unsafe_code)]

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Current UTC time as RFC 3339 with whole seconds, e.g. `2024-01-01T12:00:00Z`.
#[must_use]
pub fn now_rfc3339() -> String {
    format_rfc3339(OffsetDateTime::now_utc())
}

#[must_use]
pub fn format_rfc3339(dt: OffsetDateTime) -> String {
    dt.replace_nanosecond(0)
        .unwrap_or(dt)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_owned())
}

/// Current UTC time as `YYYYMMDDHHMMSS`, used in run ids and log file names.
#[must_use]
pub fn now_compact() -> String {
    format_compact(OffsetDateTime::now_utc())
}

#[must_use]
pub fn format_compact(dt: OffsetDateTime) -> String {
    format!(
        "{:04}{:02}{:02}{:02}{:02}{:02}",
        dt.year(),
        u8::from(dt.month()),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_without_fractional_seconds() {
        let dt = OffsetDateTime::from_unix_timestamp(1_704_110_400)
            .unwrap()
            .replace_nanosecond(123_456_789)
            .unwrap();
        assert_eq!(format_rfc3339(dt), "2024-01-01T12:00:00Z");
        assert_eq!(format_compact(dt), "20240101120000");
    }
}
