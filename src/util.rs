//! Time helpers shared by the engine and the HTTP surface
//!
//! The wire format carries RFC 3339 timestamps with millisecond precision
//! and a trailing `Z`; the stores carry epoch milliseconds. Both sides of
//! the ETag contract must format timestamps identically, so all conversions
//! go through this module.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

/// Current wall clock, epoch ms
pub fn now_millis() -> i64 {
	Utc::now().timestamp_millis()
}

/// Format epoch ms as RFC 3339 with millisecond precision (`...T...Z`)
pub fn iso_from_millis(ms: i64) -> String {
	match Utc.timestamp_millis_opt(ms).single() {
		Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
		// Out-of-range input clamps to the epoch
		None => Utc
			.timestamp_millis_opt(0)
			.single()
			.expect("epoch is representable")
			.to_rfc3339_opts(SecondsFormat::Millis, true),
	}
}

/// Parse an RFC 3339 timestamp into epoch ms
pub fn millis_from_iso(iso: &str) -> Option<i64> {
	DateTime::parse_from_rfc3339(iso).ok().map(|dt| dt.with_timezone(&Utc).timestamp_millis())
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn test_iso_roundtrip() {
		let ms = 1_700_000_000_123;
		let iso = iso_from_millis(ms);
		assert_eq!(millis_from_iso(&iso), Some(ms));
	}

	#[test]
	fn test_iso_format_shape() {
		let iso = iso_from_millis(0);
		assert_eq!(iso, "1970-01-01T00:00:00.000Z");
	}

	#[test]
	fn test_millis_from_iso_with_offset() {
		// Offsets normalize to UTC
		let ms = millis_from_iso("2024-01-01T01:00:00.000+01:00").unwrap();
		assert_eq!(ms, millis_from_iso("2024-01-01T00:00:00.000Z").unwrap());
	}

	#[test]
	fn test_millis_from_iso_rejects_garbage() {
		assert_eq!(millis_from_iso("not-a-timestamp"), None);
	}
}

// vim: ts=4
