//! Write-behind log writer.
//!
//! Log lines produced by store calls are pushed onto an in-memory FIFO
//! queue and written to the [`LogMedium`] in batches, either by a background
//! thread on a fixed interval or by an explicit [`KvStore::flush`] call.
//! Stopping the writer always drains the queue first.
//!
//! [`KvStore::flush`]: crate::KvStore::flush

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::FlushError;
use crate::storage::LogMedium;

/// Default flush interval: 5 seconds.
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Configuration for the background log writer.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use eventfold_kv::WriterConfig;
///
/// let config = WriterConfig::default();
/// assert_eq!(config.flush_interval, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Time between two background flush cycles. A cycle with an empty
    /// queue does nothing.
    ///
    /// Default: 5 seconds.
    pub flush_interval: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

/// Counters describing the writer's activity since the store opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Lines successfully written to the medium.
    pub flushed_lines: u64,
    /// Non-empty batches successfully written.
    pub flush_cycles: u64,
    /// Batches the medium rejected. Each one was re-queued.
    pub failed_cycles: u64,
}

/// FIFO of encoded lines waiting to be written.
#[derive(Debug, Default)]
pub(crate) struct WriteQueue {
    lines: Mutex<VecDeque<String>>,
}

impl WriteQueue {
    pub(crate) fn push_batch(&self, batch: Vec<String>) {
        if batch.is_empty() {
            return;
        }
        self.lock().extend(batch);
    }

    pub(crate) fn drain(&self) -> Vec<String> {
        self.lock().drain(..).collect()
    }

    /// Put a failed batch back ahead of anything queued since it was taken.
    pub(crate) fn requeue_front(&self, batch: Vec<String>) {
        let mut lines = self.lock();
        for line in batch.into_iter().rev() {
            lines.push_front(line);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn snapshot(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<String>> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the queue and the medium. Shared between the store and the
/// background thread.
pub(crate) struct LogWriter {
    queue: WriteQueue,
    medium: Mutex<Box<dyn LogMedium>>,
    flushed_lines: AtomicU64,
    flush_cycles: AtomicU64,
    failed_cycles: AtomicU64,
}

impl LogWriter {
    pub(crate) fn new(medium: Box<dyn LogMedium>) -> Self {
        Self {
            queue: WriteQueue::default(),
            medium: Mutex::new(medium),
            flushed_lines: AtomicU64::new(0),
            flush_cycles: AtomicU64::new(0),
            failed_cycles: AtomicU64::new(0),
        }
    }

    pub(crate) fn queue(&self) -> &WriteQueue {
        &self.queue
    }

    /// Write everything queued so far as one batch.
    ///
    /// The medium lock is taken before draining, so two concurrent flushes
    /// write their batches in queue order. On failure the batch goes back to
    /// the front of the queue.
    ///
    /// # Errors
    ///
    /// Returns [`FlushError::Io`] if the medium rejects the batch.
    pub(crate) fn flush(&self) -> Result<usize, FlushError> {
        let mut medium = self.medium.lock().unwrap_or_else(PoisonError::into_inner);
        let batch = self.queue.drain();
        if batch.is_empty() {
            return Ok(0);
        }

        match medium.append_lines(&batch) {
            Ok(()) => {
                let count = batch.len();
                self.flushed_lines.fetch_add(count as u64, Ordering::Relaxed);
                self.flush_cycles.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(lines = count, "flushed log entries");
                Ok(count)
            }
            Err(e) => {
                self.failed_cycles.fetch_add(1, Ordering::Relaxed);
                self.queue.requeue_front(batch);
                Err(FlushError::Io(e))
            }
        }
    }

    pub(crate) fn stats(&self) -> WriterStats {
        WriterStats {
            flushed_lines: self.flushed_lines.load(Ordering::Relaxed),
            flush_cycles: self.flush_cycles.load(Ordering::Relaxed),
            failed_cycles: self.failed_cycles.load(Ordering::Relaxed),
        }
    }
}

/// Controls the background writer thread.
pub(crate) struct WriterHandle {
    shutdown_tx: watch::Sender<bool>,
    thread: Mutex<Option<JoinHandle<Result<(), FlushError>>>>,
}

impl WriterHandle {
    /// Signal the writer to stop and wait for its final drain.
    ///
    /// Idempotent: calls after the first return `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns the final flush's error, or [`FlushError::WriterPanicked`].
    pub(crate) fn shutdown(&self) -> Result<(), FlushError> {
        // The receiver is gone if the thread already exited.
        let _ = self.shutdown_tx.send(true);

        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match thread {
            Some(thread) => thread.join().map_err(|_| FlushError::WriterPanicked)?,
            None => Ok(()),
        }
    }
}

/// Start the background writer on a dedicated thread.
///
/// The thread owns a current-thread tokio runtime with only the time driver
/// enabled, so the store works whether or not the caller runs inside a
/// runtime of its own.
///
/// # Errors
///
/// Returns `io::Error` if the runtime or the thread cannot be created.
pub(crate) fn spawn_writer(
    writer: Arc<LogWriter>,
    config: WriterConfig,
) -> io::Result<WriterHandle> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let thread = std::thread::Builder::new()
        .name("eventfold-kv-writer".to_string())
        .spawn(move || rt.block_on(run_flush_loop(writer, config.flush_interval, shutdown_rx)))?;

    Ok(WriterHandle {
        shutdown_tx,
        thread: Mutex::new(Some(thread)),
    })
}

async fn run_flush_loop(
    writer: Arc<LogWriter>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), FlushError> {
    tracing::debug!(interval_ms = interval.as_millis() as u64, "log writer started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                if let Err(e) = writer.flush() {
                    tracing::error!(
                        error = %e,
                        queued = writer.queue().len(),
                        "log flush failed, batch re-queued"
                    );
                }
            }
            // Also fires if the sender was dropped.
            _ = shutdown_rx.changed() => break,
        }
    }

    let drained = writer.flush()?;
    tracing::debug!(lines = drained, "log writer stopped");
    Ok(())
}
