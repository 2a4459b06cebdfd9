//! Ordered HLS (VOD) downloader.
//!
//! ```text
//! ┌──────────────┐           ┌──────────────────┐  (index, payload)  ┌───────────────┐
//! │   Manifest   │  Segment  │   SegmentPool    ├───────────────────►│ OrderedWriter │
//! │ (+ key, IV)  ├──────────►│    N workers     │       [MPSC]       │  reorders by  │
//! └──────────────┘           │ retry + backoff  ├───┐                │     index     │
//!                            │  proxy[i mod P]  ◄───┘ fetch_segment  └───────┬───────┘
//!                            └────────▲─────────┘                            │ append,
//!                                     │ failed indices                       ▼ fsync
//!                            ┌────────┴─────────┐                       output file
//!                            │  retry round k   │
//!                            └──────────────────┘
//! ```
pub mod config;
pub mod decrypt;
pub mod download;
pub mod error;
pub mod fetch;
pub mod hls;
pub mod merge;
pub mod progress;
pub mod proxy;
pub mod summary;
pub mod util;

pub use config::{DecryptFailurePolicy, DownloadConfig, MissingIvPolicy};
pub use download::{DownloadReport, DownloadSession, InterruptedReport, SessionOutcome};
pub use error::{GrabError, GrabResult};
pub use hls::{ManifestSource, TrackType};
pub use progress::{ObserverId, ProgressStatus, ProgressTracker, ProgressUpdate};
pub use tokio_util::sync::CancellationToken;
pub use util::http::HttpClient;
