use reqwest::Url;

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Position in the manifest, starting from 0. Output order follows it.
    pub index: usize,
    /// Absolute segment URL.
    pub url: Url,
    /// EXTINF duration in seconds.
    pub duration: f64,
    /// Media sequence number from the manifest.
    pub media_sequence: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentState {
    #[default]
    Pending,
    Fetching,
    Fetched,
    Failed,
}

/// Which worker pool a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackType {
    #[default]
    Video,
    Audio,
}

impl TrackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

impl std::fmt::Display for TrackType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
