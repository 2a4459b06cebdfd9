pub mod http;
pub mod reorder;
pub mod timeout;

use std::time::Duration;

/// Render seconds as `1h 02m 03s`.
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    let (hours, minutes, seconds) = (seconds / 3600, seconds / 60 % 60, seconds % 60);
    format!("{hours}h {minutes:02}m {seconds:02}s")
}
