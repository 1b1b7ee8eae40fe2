pub mod config;
pub mod tail_buffer;

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch, as used in `created` fields.
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
