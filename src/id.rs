//! Run identifiers.

use chrono::{DateTime, Utc};

/// Generate a run ID
///
/// Format: `{timestamp_ms}-{pid_hex}`
/// Example: `1738300800123-1a2b`
pub fn generate_run_id(started: DateTime<Utc>) -> String {
    format!("{}-{:04x}", started.timestamp_millis(), std::process::id() & 0xffff)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_format() {
        let started = DateTime::from_timestamp_millis(1_738_300_800_123).unwrap();
        let id = generate_run_id(started);
        let (millis, pid) = id.split_once('-').unwrap();
        assert_eq!(millis, "1738300800123");
        assert_eq!(pid.len(), 4);
        assert!(pid.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
