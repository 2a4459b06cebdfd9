use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::{
    fs::File,
    io::AsyncWriteExt,
    sync::mpsc::{self, error::TryRecvError},
};
use tokio_util::sync::CancellationToken;

use crate::{
    download::SegmentPayload,
    error::GrabResult,
    progress::ProgressTracker,
    util::{reorder::ReorderBuffer, timeout::AdaptiveTimeout},
};

/// What the writer managed to put on disk.
#[derive(Debug, Clone, Default)]
pub struct WriteReport {
    /// `written[i]` is true when segment `i` is in the output file.
    pub written: Vec<bool>,
    pub bytes_written: u64,
    /// Failure markers the writer stepped over.
    pub gaps: usize,
    /// The writer stopped because of cancellation.
    pub interrupted: bool,
}

impl WriteReport {
    pub fn segments_written(&self) -> usize {
        self.written.iter().filter(|w| **w).count()
    }

    pub fn missing(&self) -> Vec<usize> {
        self.written
            .iter()
            .enumerate()
            .filter(|(_, written)| !**written)
            .map(|(index, _)| index)
            .collect()
    }
}

/// Sole owner of the output file. Appends segments strictly in index order,
/// whatever order the workers deliver them in.
pub struct OrderedWriter {
    file: File,
    path: PathBuf,
    buffer: ReorderBuffer<Bytes>,
    timeout: AdaptiveTimeout,
    progress: ProgressTracker,
    cancel: CancellationToken,
    report: WriteReport,
}

impl OrderedWriter {
    /// Create (or truncate) the output file.
    pub async fn create(
        path: impl AsRef<Path>,
        total_segments: usize,
        progress: ProgressTracker,
        cancel: CancellationToken,
    ) -> GrabResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).await?;

        Ok(Self {
            file,
            path,
            buffer: ReorderBuffer::new(),
            timeout: AdaptiveTimeout::default(),
            progress,
            cancel,
            report: WriteReport {
                written: vec![false; total_segments],
                ..Default::default()
            },
        })
    }

    pub fn with_timeout(mut self, timeout: AdaptiveTimeout) -> Self {
        self.timeout = timeout;
        self
    }

    /// Drain `receiver` until every sender is gone, or until cancellation, in
    /// which case only what is already queued is consumed.
    ///
    /// The report is returned even when writing fails; it then covers what
    /// reached the file before the error. The receiver is dropped on return,
    /// so senders notice a writer that stopped early.
    pub async fn run(
        mut self,
        mut receiver: mpsc::UnboundedReceiver<SegmentPayload>,
    ) -> (WriteReport, GrabResult<()>) {
        let result = self.consume(&mut receiver).await;
        drop(receiver);

        let result = match result {
            Ok(()) => self.finish().await,
            Err(e) => {
                log::error!("Failed to write {}: {e}", self.path.display());
                Err(e)
            }
        };
        (self.report, result)
    }

    async fn consume(
        &mut self,
        receiver: &mut mpsc::UnboundedReceiver<SegmentPayload>,
    ) -> GrabResult<()> {
        loop {
            let cancel = self.cancel.clone();
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.drain_queued(receiver).await?;
                    self.report.interrupted = true;
                    return Ok(());
                }
                received = tokio::time::timeout(self.timeout.current(), receiver.recv()) => received,
            };

            match received {
                Ok(Some((index, payload))) => {
                    self.timeout.on_item();
                    self.accept(index, payload).await?;
                }
                Ok(None) => return Ok(()),
                Err(_) => {
                    self.timeout.on_empty();
                    log::debug!(
                        "No segment received in time, waiting for segment {} ({} buffered).",
                        self.buffer.next_index(),
                        self.buffer.pending()
                    );
                }
            }
        }
    }

    async fn finish(&mut self) -> GrabResult<()> {
        if self.buffer.pending() > 0 {
            log::warn!(
                "{} segment(s) after segment {} were never written.",
                self.buffer.pending(),
                self.buffer.next_index()
            );
        }

        self.file.flush().await?;
        self.file.sync_all().await?;
        log::info!(
            "Wrote {} bytes to {}",
            self.report.bytes_written,
            self.path.display()
        );
        Ok(())
    }

    async fn drain_queued(
        &mut self,
        receiver: &mut mpsc::UnboundedReceiver<SegmentPayload>,
    ) -> GrabResult<()> {
        loop {
            match receiver.try_recv() {
                Ok((index, payload)) => self.accept(index, payload).await?,
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return Ok(()),
            }
        }
    }

    async fn accept(&mut self, index: usize, payload: Option<Bytes>) -> GrabResult<()> {
        for (index, payload) in self.buffer.push(index, payload) {
            match payload {
                Some(bytes) => {
                    self.file.write_all(&bytes).await?;
                    self.file.flush().await?;
                    self.file.sync_data().await?;

                    if let Some(written) = self.report.written.get_mut(index) {
                        *written = true;
                    }
                    self.report.bytes_written += bytes.len() as u64;
                    self.progress.increment();
                }
                None => {
                    log::error!("Segment {index} failed to download");
                    self.report.gaps += 1;
                }
            }
        }
        Ok(())
    }
}
