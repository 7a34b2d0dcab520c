use std::fmt::Write;

use chrono::{DateTime, NaiveDateTime};

const SOURCE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Re-formats a timestamp reported by a source API.
///
/// Accepts RFC 3339 and the naive `YYYY-MM-DD HH:MM:SS` forms. Returns `None`
/// when the input matches neither, or when `format` asks for an offset the
/// naive form does not carry.
pub fn reformat(timestamp: &str, format: &str) -> Option<String> {
    let timestamp = timestamp.trim();
    let mut out = String::new();
    let written = if let Ok(dt) = DateTime::parse_from_rfc3339(timestamp) {
        write!(out, "{}", dt.format(format))
    } else {
        let dt = SOURCE_FORMATS
            .iter()
            .find_map(|f| NaiveDateTime::parse_from_str(timestamp, f).ok())?;
        write!(out, "{}", dt.format(format))
    };
    written.ok().map(|_| out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn naive_timestamp() {
        assert_eq!(
            reformat("2024-03-01 14:05:00", "%H:%M").as_deref(),
            Some("14:05")
        );
    }

    #[test]
    fn rfc3339_keeps_source_offset() {
        assert_eq!(
            reformat("2024-03-01T14:05:00+01:00", "%d.%m. %H:%M").as_deref(),
            Some("01.03. 14:05")
        );
    }

    #[test]
    fn garbage() {
        assert_eq!(reformat("yesterday", "%H:%M"), None);
    }

    #[test]
    fn offset_of_naive_timestamp_is_unavailable() {
        assert_eq!(reformat("2024-03-01 14:05:00", "%H:%M %z"), None);
        assert_eq!(reformat("2024-03-01 14:05:00", "%Z"), None);
        assert_eq!(
            reformat("2024-03-01T14:05:00+01:00", "%H:%M %z").as_deref(),
            Some("14:05 +0100")
        );
    }
}
