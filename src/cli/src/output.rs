//! Table and value formatting for CLI output.

use comfy_table::{ContentArrangement, Table};

/// Borderless table with the given headers.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(headers);
    table
}

/// Human-readable byte count ("1.5 MB").
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 3] = ["KB", "MB", "GB"];

    let mut value = bytes as f64;
    let mut unit = None;
    for candidate in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = Some(candidate);
    }
    match unit {
        Some(unit) => format!("{:.1} {}", value, unit),
        None => format!("{} B", bytes),
    }
}

/// Relative age of a timestamp ("3 hours ago").
pub fn format_ago(dt: &chrono::DateTime<chrono::Utc>) -> String {
    let elapsed = chrono::Utc::now().signed_duration_since(*dt);
    let secs = elapsed.num_seconds();
    if secs < 1 {
        return "just now".to_string();
    }

    let days = elapsed.num_days();
    let (count, unit) = if secs < 60 {
        (secs, "second")
    } else if elapsed.num_minutes() < 60 {
        (elapsed.num_minutes(), "minute")
    } else if elapsed.num_hours() < 24 {
        (elapsed.num_hours(), "hour")
    } else if days < 30 {
        (days, "day")
    } else if days < 365 {
        (days / 30, "month")
    } else {
        (days / 365, "year")
    };

    if count == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{count} {unit}s ago")
    }
}

/// Same as [`format_ago`] for a Unix timestamp.
pub fn format_ago_unix(timestamp: i64) -> String {
    match chrono::DateTime::from_timestamp(timestamp, 0) {
        Some(dt) => format_ago(&dt),
        None => "<unknown>".to_string(),
    }
}

/// First 12 hex characters of an id, without the algorithm prefix.
pub fn short_id(id: &str) -> String {
    let hex = id.split_once(':').map(|(_, h)| h).unwrap_or(id);
    hex.chars().take(12).collect()
}

/// Shorten `s` to `max_len` characters, marking the cut with "...".
pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{kept}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(100 * 1048576), "100.0 MB");
        assert_eq!(format_bytes(10 * 1073741824), "10.0 GB");
    }

    #[test]
    fn test_format_ago() {
        let now = chrono::Utc::now();
        assert_eq!(format_ago(&(now + chrono::Duration::seconds(30))), "just now");
        assert_eq!(format_ago(&(now - chrono::Duration::minutes(1))), "1 minute ago");
        assert_eq!(format_ago(&(now - chrono::Duration::hours(5))), "5 hours ago");
        assert_eq!(format_ago(&(now - chrono::Duration::days(400))), "1 year ago");
    }

    #[test]
    fn test_format_ago_unix_out_of_range() {
        assert_eq!(format_ago_unix(i64::MAX), "<unknown>");
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("sha256:0123456789abcdef"), "0123456789ab");
        assert_eq!(short_id("L1"), "L1");
    }

    #[test]
    fn test_truncate_str() {
        assert_eq!(truncate_str("short", 10), "short");
        assert_eq!(truncate_str("RUN apk add --no-cache curl", 12), "RUN apk a...");
    }
}
