use std::{
    num::NonZeroU32,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use bytes::Bytes;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{GrabError, GrabResult},
    fetch::{FetchOutcome, SegmentFetcher},
    hls::{Segment, SegmentState},
};

/// `(index, payload)` handed from the workers to the writer. `None` marks a
/// segment that failed for good.
pub type SegmentPayload = (usize, Option<Bytes>);

#[derive(Debug, Clone, Copy, Default)]
struct SegmentSlot {
    state: SegmentState,
    attempts: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryStats {
    /// Attempts beyond the first one, over all segments and rounds.
    pub retries: usize,
    /// Highest number of retries spent on a single segment.
    pub max_segment_retries: u32,
}

/// Bounded set of workers fetching segments concurrently.
///
/// The pool is reused across retry rounds. Workers never touch the output
/// file; fetched payloads go to the writer through an unbounded channel.
pub struct SegmentPool {
    fetcher: Arc<SegmentFetcher>,
    segments: Arc<Vec<Segment>>,
    concurrency: NonZeroU32,
    permits: Arc<Semaphore>,

    slots: Arc<Mutex<Vec<SegmentSlot>>>,
    fetched: Arc<AtomicUsize>,
    fatal: Arc<Mutex<Option<GrabError>>>,
}

impl SegmentPool {
    pub fn new(
        fetcher: SegmentFetcher,
        segments: Arc<Vec<Segment>>,
        concurrency: NonZeroU32,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(concurrency.get() as usize));
        let slots = vec![SegmentSlot::default(); segments.len()];

        Self {
            fetcher: Arc::new(fetcher),
            segments,
            concurrency,
            permits,

            slots: Arc::new(Mutex::new(slots)),
            fetched: Arc::new(AtomicUsize::new(0)),
            fatal: Arc::new(Mutex::new(None)),
        }
    }

    /// Fetch `indices` and return the ones that failed.
    ///
    /// In the final round a failed segment is also reported to the writer as a
    /// `None` payload, so the writer can step over it.
    pub async fn run_round(
        &self,
        indices: &[usize],
        final_round: bool,
        sender: &mpsc::UnboundedSender<SegmentPayload>,
        cancel: &CancellationToken,
    ) -> GrabResult<Vec<usize>> {
        log::info!(
            "Start downloading {} segment(s) with {} thread(s).",
            indices.len(),
            self.concurrency.get()
        );

        // fatal errors stop the round without cancelling the caller's token
        let round_cancel = cancel.child_token();
        let total = self.segments.len();

        for &index in indices {
            if round_cancel.is_cancelled() {
                break;
            }
            let Ok(permit) = self.permits.clone().acquire_owned().await else {
                break;
            };

            let fetcher = self.fetcher.clone();
            let segments = self.segments.clone();
            let slots = self.slots.clone();
            let fetched = self.fetched.clone();
            let fatal = self.fatal.clone();
            let sender = sender.clone();
            let round_cancel = round_cancel.clone();
            tokio::spawn(async move {
                let segment = &segments[index];
                set_state(&slots, index, SegmentState::Fetching, 0);

                let result = fetcher.fetch_with_retry(segment, &round_cancel).await;
                match result.outcome {
                    FetchOutcome::Fetched(bytes) => {
                        set_state(&slots, index, SegmentState::Fetched, result.attempts);
                        if sender.send((index, Some(bytes))).is_err() {
                            log::error!("Writer is gone, stopping downloads.");
                            lock(&fatal).get_or_insert(GrabError::WriterClosed(index));
                            round_cancel.cancel();
                        }

                        let fetched = fetched.fetch_add(1, Ordering::Relaxed) + 1;
                        let percentage = fetched as f32 / total as f32 * 100.;
                        log::info!(
                            "Processing segment {index} finished. ({fetched} / {total} or {percentage:.2}%)"
                        );
                    }
                    FetchOutcome::Failed => {
                        set_state(&slots, index, SegmentState::Failed, result.attempts);
                        if final_round {
                            log::error!(
                                "Processing segment {index} failed, max retries exceed, drop."
                            );
                            if sender.send((index, None)).is_err() {
                                lock(&fatal).get_or_insert(GrabError::WriterClosed(index));
                                round_cancel.cancel();
                            }
                        } else {
                            log::warn!("Processing segment {index} failed, retry later.");
                        }
                    }
                    FetchOutcome::Cancelled => {
                        set_state(&slots, index, SegmentState::Failed, result.attempts);
                    }
                    FetchOutcome::Fatal(e) => {
                        set_state(&slots, index, SegmentState::Failed, result.attempts);
                        log::error!("Processing segment {index} failed: {e}");
                        lock(&fatal).get_or_insert(e);
                        round_cancel.cancel();
                    }
                }

                drop(permit);
            });
        }

        // wait for all tasks to finish
        let _ = self.permits.acquire_many(self.concurrency.get()).await;

        if let Some(e) = lock(&self.fatal).take() {
            return Err(e);
        }

        let slots = lock(&self.slots);
        Ok(indices
            .iter()
            .copied()
            .filter(|&index| slots[index].state != SegmentState::Fetched)
            .collect())
    }

    pub fn retry_stats(&self) -> RetryStats {
        let slots = lock(&self.slots);
        slots.iter().fold(RetryStats::default(), |mut stats, slot| {
            let retries = slot.attempts.saturating_sub(1);
            stats.retries += retries as usize;
            stats.max_segment_retries = stats.max_segment_retries.max(retries);
            stats
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn set_state(slots: &Mutex<Vec<SegmentSlot>>, index: usize, state: SegmentState, attempts: u32) {
    let mut slots = lock(slots);
    let slot = &mut slots[index];
    slot.state = state;
    slot.attempts += attempts;
}
