use std::{collections::HashMap, num::NonZeroU32, path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::{error::GrabResult, TrackType};

/// How to derive the IV of an AES-128 manifest whose `EXT-X-KEY` has no `IV`
/// attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingIvPolicy {
    /// Use the segment's media sequence number as a 128-bit big-endian IV.
    #[default]
    MediaSequence,
    /// Refuse the manifest.
    Reject,
}

/// What a worker does after a segment fails to decrypt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecryptFailurePolicy {
    /// Count the failure as one attempt and keep retrying.
    #[default]
    Retry,
    /// Abort the whole session.
    FailFast,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Timeout of a single HTTP request.
    #[serde(with = "secs")]
    pub timeout: Duration,
    /// Attempts per segment inside one retry round.
    pub max_retries: NonZeroU32,
    /// Number of passes over the failed segment set, including the first one.
    pub max_retry_rounds: NonZeroU32,
    pub video_workers: NonZeroU32,
    pub audio_workers: NonZeroU32,
    /// Base of the per-attempt backoff, `backoff_factor * 2^attempt` seconds.
    pub backoff_factor: f64,
    /// Base of the per-round backoff, `round_backoff * 2^round`.
    #[serde(with = "secs")]
    pub round_backoff: Duration,

    /// File with one proxy URL per line.
    pub proxy_list: Option<PathBuf>,
    #[serde(with = "secs")]
    pub proxy_probe_timeout: Duration,

    pub verify_tls: bool,
    pub user_agent: Option<String>,
    pub headers: HashMap<String, String>,

    /// Minimum share of written segments, in percent.
    pub completion_threshold: f64,
    pub missing_iv: MissingIvPolicy,
    pub decrypt_failure: DecryptFailurePolicy,

    /// Where the fetched manifest text is copied. Defaults to the temp dir.
    pub manifest_dump_dir: Option<PathBuf>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            max_retries: NonZeroU32::new(8).unwrap(),
            max_retry_rounds: NonZeroU32::new(3).unwrap(),
            video_workers: NonZeroU32::new(12).unwrap(),
            audio_workers: NonZeroU32::new(12).unwrap(),
            backoff_factor: 1.5,
            round_backoff: Duration::from_secs(1),

            proxy_list: None,
            proxy_probe_timeout: Duration::from_secs(15),

            verify_tls: true,
            user_agent: None,
            headers: HashMap::new(),

            completion_threshold: 99.9,
            missing_iv: MissingIvPolicy::default(),
            decrypt_failure: DecryptFailurePolicy::default(),

            manifest_dump_dir: None,
        }
    }
}

impl DownloadConfig {
    pub fn from_json(json: &str) -> GrabResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn workers(&self, track: TrackType) -> NonZeroU32 {
        match track {
            TrackType::Video => self.video_workers,
            TrackType::Audio => self.audio_workers,
        }
    }

    /// Sleep before attempt `attempt + 1` of a segment.
    pub fn attempt_backoff(&self, attempt: u32) -> Duration {
        let seconds = self.backoff_factor * 2f64.powi(attempt as i32);
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO)
    }

    /// Sleep before retry round `round` (1-based; round 0 never sleeps).
    pub fn round_delay(&self, round: u32) -> Duration {
        self.round_backoff.saturating_mul(2u32.saturating_pow(round))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_retries(mut self, max_retries: NonZeroU32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn max_retry_rounds(mut self, rounds: NonZeroU32) -> Self {
        self.max_retry_rounds = rounds;
        self
    }

    pub fn video_workers(mut self, workers: NonZeroU32) -> Self {
        self.video_workers = workers;
        self
    }

    pub fn audio_workers(mut self, workers: NonZeroU32) -> Self {
        self.audio_workers = workers;
        self
    }

    pub fn backoff_factor(mut self, backoff_factor: f64) -> Self {
        self.backoff_factor = backoff_factor;
        self
    }

    pub fn round_backoff(mut self, round_backoff: Duration) -> Self {
        self.round_backoff = round_backoff;
        self
    }

    pub fn proxy_list(mut self, path: impl Into<PathBuf>) -> Self {
        self.proxy_list = Some(path.into());
        self
    }

    pub fn proxy_probe_timeout(mut self, timeout: Duration) -> Self {
        self.proxy_probe_timeout = timeout;
        self
    }

    pub fn verify_tls(mut self, verify: bool) -> Self {
        self.verify_tls = verify;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn completion_threshold(mut self, percent: f64) -> Self {
        self.completion_threshold = percent;
        self
    }

    pub fn missing_iv(mut self, policy: MissingIvPolicy) -> Self {
        self.missing_iv = policy;
        self
    }

    pub fn decrypt_failure(mut self, policy: DecryptFailurePolicy) -> Self {
        self.decrypt_failure = policy;
        self
    }

    pub fn manifest_dump_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.manifest_dump_dir = Some(dir.into());
        self
    }
}

/// Durations are written as (fractional) seconds in config files.
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(serde::de::Error::custom)
    }
}
