pub mod cat;
pub mod cp;
pub mod init_config;
pub mod ls;
pub mod mkdir;
pub mod mv;
pub mod put;
pub mod rename;
pub mod rm;
pub mod stat;

use std::time::{SystemTime, UNIX_EPOCH};

/// Human-readable byte count.
#[allow(clippy::cast_precision_loss)] // Display only
pub fn format_size(size: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{size} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Seconds since the Unix epoch, if the time is representable.
pub fn unix_seconds(time: Option<SystemTime>) -> Option<u64> {
    time.and_then(|t| t.duration_since(UNIX_EPOCH).ok()).map(|d| d.as_secs())
}
