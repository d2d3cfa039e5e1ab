//! Byte and timestamp formatting helpers

use anyhow::{anyhow, Result};
use chrono::{Local, TimeZone};

/// Render bytes as lowercase, zero-padded, space-separated hex pairs
///
/// `[0x00, 0xff, 0x10]` becomes `"00 ff 10"`.
pub fn to_hex_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse the output of [`to_hex_string`] back into bytes
///
/// Tolerant of extra whitespace; rejects non-hex tokens and values over 0xff.
pub fn parse_hex_string(s: &str) -> Result<Vec<u8>> {
    s.split_whitespace()
        .map(|token| {
            u8::from_str_radix(token, 16).map_err(|e| anyhow!("invalid hex byte {token:?}: {e}"))
        })
        .collect()
}

/// Render an epoch-milliseconds timestamp as local wall-clock time
pub fn pretty_time(timestamp_ms: u64) -> String {
    match Local.timestamp_millis_opt(timestamp_ms as i64) {
        chrono::LocalResult::Single(t) => t.format("%H:%M:%S%.3f").to_string(),
        _ => format!("@{timestamp_ms}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_formatting_contract() {
        // lowercase, space-separated, zero-padded pairs
        assert_eq!(to_hex_string(&[0x00, 0xff, 0x10]), "00 ff 10");
        assert_eq!(to_hex_string(&[]), "");
        assert_eq!(to_hex_string(&[0x0a]), "0a");
    }

    #[test]
    fn test_hex_round_trip() {
        let bytes = vec![0x00, 0xff, 0x10];
        let text = to_hex_string(&bytes);
        assert_eq!(parse_hex_string(&text).unwrap(), bytes);
        // Tolerates irregular spacing
        assert_eq!(parse_hex_string("  00\tff  10 ").unwrap(), bytes);
    }

    #[test]
    fn test_hex_parse_rejects_garbage() {
        assert!(parse_hex_string("zz").is_err());
        assert!(parse_hex_string("100").is_err());
    }
}
