use std::{fmt, time::Duration};

use crate::util::format_duration;

/// End-of-session figures, produced whether or not the session succeeded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadSummary {
    pub total_segments: usize,
    pub segments_written: usize,
    pub max_segment_retries: u32,
    pub retries: usize,
    pub failed: usize,
    /// Sum of EXTINF durations in the manifest.
    pub expected_duration: Duration,
    /// Sum of EXTINF durations of the segments that reached the output file.
    pub actual_duration: Duration,
    pub bytes_written: u64,
    pub elapsed: Duration,
}

impl DownloadSummary {
    /// Retries reached 30% of the segment count.
    pub fn high_retry_rate(&self) -> bool {
        self.total_segments > 0 && self.retries as f64 >= self.total_segments as f64 / 3.33
    }

    pub fn log(&self) {
        for line in self.to_string().lines() {
            log::info!("{line}");
        }

        if self.high_retry_rate() {
            log::warn!("High number of retries detected. Consider:");
            log::warn!("  1. Reducing the number of workers");
            log::warn!("  2. Checking your network connection");
            log::warn!("  3. Verifying the stream source is stable");
        }
    }
}

impl fmt::Display for DownloadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Download Summary:")?;
        writeln!(
            f,
            "  Segments written: {}/{}",
            self.segments_written, self.total_segments
        )?;
        writeln!(f, "  Max retry per URL: {}", self.max_segment_retries)?;
        writeln!(f, "  Total retries: {}", self.retries)?;
        writeln!(f, "  Failed segments: {}", self.failed)?;
        writeln!(f, "  Bytes written: {}", self.bytes_written)?;
        writeln!(f, "  Actual duration: {}", format_duration(self.actual_duration))?;
        writeln!(
            f,
            "  Expected duration: {}",
            format_duration(self.expected_duration)
        )?;
        write!(f, "  Elapsed: {}", format_duration(self.elapsed))
    }
}
