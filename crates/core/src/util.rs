use std::time::{SystemTime, UNIX_EPOCH};

/// Converts a file modification time into unix epoch seconds.
///
/// Times before the epoch clamp to 0.
pub fn mtime_secs(modified: SystemTime) -> i64 {
    modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
