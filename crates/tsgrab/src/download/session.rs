use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    config::DownloadConfig,
    download::{SegmentPayload, SegmentPool},
    error::{GrabError, GrabResult},
    fetch::SegmentFetcher,
    hls::{load_manifest, resolve_key, Manifest, ManifestSource, TrackType},
    merge::{OrderedWriter, WriteReport},
    progress::ProgressTracker,
    proxy::{read_proxy_list, validate_proxies, ProxyPool},
    summary::DownloadSummary,
    util::http::HttpClient,
};

#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub track: TrackType,
    pub failed_count: usize,
    pub completion_percent: f64,
    pub retry_count: usize,
    pub bytes_written: u64,
    /// Every segment index missing from the output file.
    pub failed_indices: Vec<usize>,
    pub summary: DownloadSummary,
}

#[derive(Debug, Clone)]
pub struct InterruptedReport {
    pub track: TrackType,
    pub segments_written: usize,
    pub total_segments: usize,
    pub bytes_written: u64,
}

/// How a session ended, when it did not end with an error.
#[derive(Debug, Clone)]
pub enum SessionOutcome {
    Completed(DownloadReport),
    /// The cancellation token fired. Bytes already in the output file form a
    /// valid, in-order prefix.
    Interrupted(InterruptedReport),
}

impl SessionOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Downloads one HLS manifest into one output file.
///
/// ```text
/// manifest ──► key ──► proxies ──► round 0..N ──► SegmentPool ──┐ (index, payload)
///                                                               ▼
///                                                 OrderedWriter ──► output file
/// ```
pub struct DownloadSession {
    client: HttpClient,
    config: Arc<DownloadConfig>,
    progress: ProgressTracker,
    cancel: CancellationToken,
    track: TrackType,
    last_summary: Mutex<Option<DownloadSummary>>,
}

impl DownloadSession {
    pub fn builder() -> DownloadSessionBuilder {
        DownloadSessionBuilder::new()
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Summary of the latest `download` call that got as far as fetching
    /// segments, whether it succeeded or not.
    pub fn last_summary(&self) -> Option<DownloadSummary> {
        lock(&self.last_summary).clone()
    }

    /// Run the whole pipeline. Any error is also reported to progress observers.
    pub async fn download(
        &self,
        source: ManifestSource,
        output: impl AsRef<Path>,
    ) -> GrabResult<SessionOutcome> {
        let started_at = Instant::now();
        let result = self.run(source, output.as_ref(), started_at).await;
        if let Err(e) = &result {
            log::error!("Download of {} failed: {e}", output.as_ref().display());
            self.progress.report_error();
        }
        result
    }

    async fn run(
        &self,
        source: ManifestSource,
        output: &Path,
        started_at: Instant,
    ) -> GrabResult<SessionOutcome> {
        self.progress.reset();
        *lock(&self.last_summary) = None;

        let dump_dir = self
            .config
            .manifest_dump_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let Some(manifest) = self
            .unless_cancelled(load_manifest(&self.client, source, &dump_dir))
            .await?
        else {
            return Ok(self.interrupted(0, &WriteReport::default()));
        };
        let total = manifest.len();

        let key = match &manifest.encryption {
            Some(descriptor) => {
                let resolve =
                    resolve_key(&self.client, descriptor, &manifest.url, self.config.missing_iv);
                match self.unless_cancelled(resolve).await? {
                    Some(key) => Some(Arc::new(key)),
                    None => return Ok(self.interrupted(total, &WriteReport::default())),
                }
            }
            None => None,
        };

        let Some(proxies) = self.unless_cancelled(self.proxies(&manifest)).await? else {
            return Ok(self.interrupted(total, &WriteReport::default()));
        };

        // no output file for a session cancelled before any segment was fetched
        if self.cancel.is_cancelled() {
            return Ok(self.interrupted(total, &WriteReport::default()));
        }

        self.progress.set_total(total);
        let writer = OrderedWriter::create(
            output,
            total,
            self.progress.clone(),
            self.cancel.clone(),
        )
        .await?;
        let (sender, receiver) = mpsc::unbounded_channel();

        // a writer that fails stops the workers at once
        let pool_cancel = self.cancel.child_token();
        let writer = {
            let pool_cancel = pool_cancel.clone();
            tokio::spawn(async move {
                let (report, result) = writer.run(receiver).await;
                if result.is_err() {
                    pool_cancel.cancel();
                }
                (report, result)
            })
        };

        let segments = Arc::new(manifest.segments.clone());
        let fetcher = SegmentFetcher::new(
            self.client.clone(),
            key,
            proxies,
            self.config.clone(),
        );
        let pool = SegmentPool::new(fetcher, segments, self.config.workers(self.track));

        let rounds = self.run_rounds(&pool, total, &sender, &pool_cancel).await;
        drop(sender);
        let (report, written) = writer.await?;

        let stats = pool.retry_stats();
        let failed = rounds.as_ref().map_or(0, Vec::len).max(report.gaps);
        let summary = DownloadSummary {
            total_segments: total,
            segments_written: report.segments_written(),
            max_segment_retries: stats.max_segment_retries,
            retries: stats.retries,
            failed,
            expected_duration: seconds(manifest.duration),
            actual_duration: seconds(written_duration(&manifest, &report)),
            bytes_written: report.bytes_written,
            elapsed: started_at.elapsed(),
        };
        summary.log();
        *lock(&self.last_summary) = Some(summary.clone());

        written?;
        rounds?;

        if report.interrupted || self.cancel.is_cancelled() {
            log::warn!("Download interrupted.");
            return Ok(self.interrupted(total, &report));
        }

        let completion_percent = report.segments_written() as f64 / total as f64 * 100.;
        let failed_indices = report.missing();
        if completion_percent < self.config.completion_threshold {
            return Err(GrabError::IncompleteDownload {
                completion: completion_percent,
                missing: failed_indices,
            });
        }

        verify_output(output).await?;

        Ok(SessionOutcome::Completed(DownloadReport {
            track: self.track,
            failed_count: failed_indices.len(),
            completion_percent,
            retry_count: stats.retries,
            bytes_written: report.bytes_written,
            failed_indices,
            summary,
        }))
    }

    /// Run one network phase, giving up as soon as the session is cancelled.
    async fn unless_cancelled<T>(
        &self,
        phase: impl Future<Output = GrabResult<T>>,
    ) -> GrabResult<Option<T>> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Ok(None),
            result = phase => result.map(Some),
        }
    }

    /// Round 0 submits every segment, later rounds only the ones that failed.
    async fn run_rounds(
        &self,
        pool: &SegmentPool,
        total: usize,
        sender: &mpsc::UnboundedSender<SegmentPayload>,
        cancel: &CancellationToken,
    ) -> GrabResult<Vec<usize>> {
        let max_rounds = self.config.max_retry_rounds.get();
        let mut pending: Vec<usize> = (0..total).collect();

        for round in 0..max_rounds {
            if cancel.is_cancelled() {
                break;
            }

            if round > 0 {
                log::info!(
                    "Retrying {} failed segments (attempt {}/{max_rounds})",
                    pending.len(),
                    round + 1
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.round_delay(round)) => {}
                }
            }

            let final_round = round + 1 == max_rounds;
            pending = pool
                .run_round(&pending, final_round, sender, cancel)
                .await?;
            if pending.is_empty() {
                break;
            }
        }

        Ok(pending)
    }

    async fn proxies(&self, manifest: &Manifest) -> GrabResult<ProxyPool> {
        let Some(path) = &self.config.proxy_list else {
            return Ok(ProxyPool::default());
        };
        if !path.is_file() {
            log::debug!("Proxy list {} does not exist, going direct.", path.display());
            return Ok(ProxyPool::default());
        }

        let candidates = read_proxy_list(path).await?;
        let pool = validate_proxies(
            &self.client,
            &self.config,
            candidates,
            &manifest.segments[0].url,
        )
        .await?;
        for url in pool.urls() {
            log::debug!("Valid proxy: {url}");
        }
        Ok(pool)
    }

    fn interrupted(&self, total: usize, report: &WriteReport) -> SessionOutcome {
        SessionOutcome::Interrupted(InterruptedReport {
            track: self.track,
            segments_written: report.segments_written(),
            total_segments: total,
            bytes_written: report.bytes_written,
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn written_duration(manifest: &Manifest, report: &WriteReport) -> f64 {
    manifest
        .segments
        .iter()
        .zip(&report.written)
        .filter(|(_, written)| **written)
        .map(|(segment, _)| segment.duration)
        .sum()
}

fn seconds(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds).unwrap_or_default()
}

async fn verify_output(path: &Path) -> GrabResult<()> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(GrabError::OutputIntegrity {
                path: path.to_path_buf(),
                reason: "missing",
            })
        }
        Err(e) => return Err(e.into()),
    };
    if metadata.len() == 0 {
        return Err(GrabError::OutputIntegrity {
            path: path.to_path_buf(),
            reason: "empty",
        });
    }
    Ok(())
}

pub struct DownloadSessionBuilder {
    config: DownloadConfig,
    client: Option<HttpClient>,
    progress: ProgressTracker,
    cancel: CancellationToken,
    track: TrackType,
}

impl DownloadSessionBuilder {
    pub fn new() -> Self {
        Self {
            config: DownloadConfig::default(),
            client: None,
            progress: ProgressTracker::new(),
            cancel: CancellationToken::new(),
            track: TrackType::Video,
        }
    }

    pub fn config(mut self, config: DownloadConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a prepared client instead of building one from the config.
    pub fn client(mut self, client: HttpClient) -> Self {
        self.client = Some(client);
        self
    }

    pub fn progress(mut self, progress: ProgressTracker) -> Self {
        self.progress = progress;
        self
    }

    pub fn cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn track(mut self, track: TrackType) -> Self {
        self.track = track;
        self
    }

    pub fn build(self) -> GrabResult<DownloadSession> {
        let client = match self.client {
            Some(client) => client,
            None => HttpClient::from_config(&self.config)?,
        };

        Ok(DownloadSession {
            client,
            config: Arc::new(self.config),
            progress: self.progress,
            cancel: self.cancel,
            track: self.track,
            last_summary: Mutex::new(None),
        })
    }

    pub async fn download(
        self,
        source: ManifestSource,
        output: impl Into<PathBuf>,
    ) -> GrabResult<SessionOutcome> {
        let output = output.into();
        self.build()?.download(source, output).await
    }
}

impl Default for DownloadSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
