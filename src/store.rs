//! Top-level entry point: [`KvStore`] and its [`KvStoreBuilder`].
//!
//! Opening a store validates the command table, replays the persisted log
//! into a fresh projection, and starts the background log writer. Every
//! mutation afterwards runs under a single state lock, so the order in
//! which calls complete is the order in which their log lines are queued.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;

use crate::codec::{JsonCodec, PayloadCodec};
use crate::command::{CommandTable, IntoCommand};
use crate::dispatch::{Mode, StoreContext};
use crate::error::{ExecuteError, FlushError, OpenError};
use crate::projection::{KeyFn, Projection};
use crate::recovery;
use crate::registry::{CommandInfo, CommandRegistry};
use crate::storage::{FileLog, LogMedium, MemoryLog};
use crate::writer::{LogWriter, WriterConfig, WriterHandle, WriterStats, spawn_writer};

struct StoreState<V> {
    projection: Projection<V>,
    closed: bool,
}

struct Inner<V> {
    state: Mutex<StoreState<V>>,
    registry: CommandRegistry<V>,
    codec: Box<dyn PayloadCodec>,
    log: Arc<LogWriter>,
    writer: WriterHandle,
}

impl<V> Inner<V> {
    fn lock_state(&self) -> MutexGuard<'_, StoreState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V> Drop for Inner<V> {
    fn drop(&mut self) {
        let result = self.writer.shutdown().and_then(|()| self.log.flush().map(|_| ()));
        if let Err(e) = result {
            tracing::error!(
                error = %e,
                lost = self.log.queue().len(),
                "final log drain failed on drop"
            );
        }
    }
}

/// Event-sourced key-value store.
///
/// Values live in an in-memory projection keyed by a caller-supplied
/// function. Mutations are named commands whose payloads are appended to a
/// textual log by a background writer; reopening the store replays that log
/// to rebuild the projection.
///
/// `Clone` is cheap -- all internal state is `Arc`-wrapped. The writer is
/// stopped, and its queue drained, by [`close`](KvStore::close) or when the
/// last clone is dropped.
///
/// # Examples
///
/// ```
/// use eventfold_kv::{CommandOutcome, CommandTable, KvStore, MemoryLog, StoreContext};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Serialize, Deserialize)]
/// struct Counter { name: String, value: i64 }
///
/// #[derive(Serialize, Deserialize)]
/// struct Bump { name: String }
///
/// fn bump(store: &mut StoreContext<'_, Counter>, cmd: Bump) -> CommandOutcome<Counter> {
///     let value = store.get(&cmd.name).map_or(0, |c| c.value) + 1;
///     CommandOutcome::Replace(Counter { name: cmd.name, value })
/// }
///
/// let log = MemoryLog::new();
/// let store = KvStore::builder(|c: &Counter| c.name.clone())
///     .command("Bump", bump)
///     .medium(log.clone())
///     .open()
///     .unwrap();
///
/// store.execute(Bump { name: "hits".into() }).unwrap();
/// store.execute_event("bump", Bump { name: "hits".into() }).unwrap();
/// assert_eq!(store.get("hits").map(|c| c.value), Some(2));
///
/// store.close().unwrap();
/// assert_eq!(log.lines().len(), 2);
/// ```
pub struct KvStore<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for KvStore<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> std::fmt::Debug for KvStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore")
            .field("commands", &self.inner.registry.len())
            .field("queued", &self.inner.log.queue().len())
            .finish()
    }
}

impl<V> KvStore<V>
where
    V: Clone + Serialize + Send + 'static,
{
    /// Start configuring a store whose keys are derived by `key_fn`.
    pub fn builder<K>(key_fn: K) -> KvStoreBuilder<V>
    where
        K: Fn(&V) -> String + Send + Sync + 'static,
    {
        KvStoreBuilder::new(key_fn)
    }

    /// Returns a clone of the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<V> {
        self.inner.lock_state().projection.get(key).cloned()
    }

    /// Full scan: clones of every value for which `predicate(key, value)`
    /// holds, in unspecified order. See [`with_query`](Self::with_query)
    /// for a lazy scan without clones.
    pub fn query<F>(&self, predicate: F) -> Vec<V>
    where
        F: Fn(&str, &V) -> bool,
    {
        self.inner
            .lock_state()
            .projection
            .query(predicate)
            .cloned()
            .collect()
    }

    /// Lazy full scan: `consume` receives an iterator over the values for
    /// which `predicate(key, value)` holds, borrowed in place.
    ///
    /// The store's state lock is held until `consume` returns, so it must
    /// not call back into this store.
    ///
    /// ```
    /// # use eventfold_kv::KvStore;
    /// let store = KvStore::<u32>::builder(|n| n.to_string()).open()?;
    /// store.add_or_update(3)?;
    /// store.add_or_update(8)?;
    /// let first_big = store.with_query(|_, n| *n > 5, |matches| matches.next().copied());
    /// assert_eq!(first_big, Some(8));
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn with_query<F, C, R>(&self, predicate: F, consume: C) -> R
    where
        F: Fn(&str, &V) -> bool,
        C: FnOnce(&mut dyn Iterator<Item = &V>) -> R,
    {
        let state = self.inner.lock_state();
        let mut matches = state.projection.query(predicate);
        consume(&mut matches)
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.inner.lock_state().projection.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the whole projection.
    pub fn snapshot(&self) -> HashMap<String, V> {
        self.inner
            .lock_state()
            .projection
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Store `value` under its derived key.
    ///
    /// The write is logged as a verbose entry, which is never replayed:
    /// **a value stored only through this method is gone after the store is
    /// reopened.** Use a command for values that must survive a restart.
    ///
    /// # Errors
    ///
    /// Returns [`ExecuteError::Closed`] after [`close`](KvStore::close), or
    /// [`ExecuteError::Encode`] if the value cannot be encoded.
    pub fn add_or_update(&self, value: V) -> Result<(), ExecuteError> {
        self.mutate(|ctx| ctx.add_or_update(value))
    }

    /// Run the command registered under `name` (case-insensitive).
    ///
    /// On success one replayable entry is queued, followed by any entries
    /// the handler produced. On failure nothing is queued and the projection
    /// is unchanged.
    ///
    /// # Errors
    ///
    /// See [`ExecuteError`].
    pub fn execute_event<P>(&self, name: &str, payload: P) -> Result<(), ExecuteError>
    where
        P: Serialize + 'static,
    {
        self.mutate(|ctx| ctx.execute_event(name, payload))
    }

    /// Run the single command whose handler accepts `P`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecuteError::UnknownPayloadType`] when no command, or more
    /// than one, accepts `P`; otherwise as
    /// [`execute_event`](KvStore::execute_event).
    pub fn execute<P>(&self, payload: P) -> Result<(), ExecuteError>
    where
        P: Serialize + 'static,
    {
        self.mutate(|ctx| ctx.execute(payload))
    }

    /// Run the command registered under `name` with a payload in codec text
    /// form (for example JSON received over the wire).
    ///
    /// # Errors
    ///
    /// Returns [`ExecuteError::Decode`] if `payload` does not decode into the
    /// command's payload type; otherwise as
    /// [`execute_event`](KvStore::execute_event).
    pub fn execute_encoded(&self, name: &str, payload: &str) -> Result<(), ExecuteError> {
        self.mutate(|ctx| ctx.execute_encoded(name, payload))
    }

    /// Registered commands, sorted by name.
    pub fn commands(&self) -> Vec<CommandInfo> {
        self.inner.registry.describe()
    }

    /// Log lines queued but not yet written, oldest first.
    pub fn pending_entries(&self) -> Vec<String> {
        self.inner.log.queue().snapshot()
    }

    /// Write every queued line now, without waiting for the next cycle.
    ///
    /// Returns the number of lines written.
    ///
    /// # Errors
    ///
    /// Returns [`FlushError::Io`] if the medium fails; the lines stay queued.
    pub fn flush(&self) -> Result<usize, FlushError> {
        self.inner.log.flush()
    }

    /// Writer activity counters.
    pub fn writer_stats(&self) -> WriterStats {
        self.inner.log.stats()
    }

    /// Stop accepting mutations, stop the writer, and drain the queue.
    ///
    /// Reads keep working. Calling `close` again retries the drain if the
    /// previous attempt failed, and is a no-op otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`FlushError`] if the final drain fails or the writer thread
    /// panicked.
    pub fn close(&self) -> Result<(), FlushError> {
        {
            let mut state = self.inner.lock_state();
            if !state.closed {
                state.closed = true;
                tracing::info!(keys = state.projection.len(), "closing store");
            }
        }
        self.inner.writer.shutdown()?;
        self.inner.log.flush()?;
        Ok(())
    }

    /// Returns `true` once [`close`](KvStore::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.lock_state().closed
    }

    /// Run `op` in a live context and queue its lines under the state lock.
    fn mutate<F>(&self, op: F) -> Result<(), ExecuteError>
    where
        F: FnOnce(&mut StoreContext<'_, V>) -> Result<(), ExecuteError>,
    {
        let mut state = self.inner.lock_state();
        if state.closed {
            return Err(ExecuteError::Closed);
        }

        let mut ctx = StoreContext::new(
            &mut state.projection,
            &self.inner.registry,
            self.inner.codec.as_ref(),
            Mode::Live,
        );
        op(&mut ctx)?;
        self.inner.log.queue().push_batch(ctx.into_pending());
        Ok(())
    }
}

/// Builder for configuring and opening a [`KvStore`].
///
/// # Examples
///
/// ```no_run
/// use eventfold_kv::{CommandTable, KvStore};
/// # #[derive(Clone, serde::Serialize)]
/// # struct Item { id: u32 }
///
/// let store = KvStore::builder(|item: &Item| item.id.to_string())
///     .commands(CommandTable::new())
///     .path("data/items.log")
///     .flush_interval_secs(1)
///     .open()?;
/// # Ok::<(), eventfold_kv::OpenError>(())
/// ```
pub struct KvStoreBuilder<V> {
    key_fn: KeyFn<V>,
    commands: CommandTable<V>,
    medium: Option<Box<dyn LogMedium>>,
    codec: Box<dyn PayloadCodec>,
    writer_config: WriterConfig,
}

impl<V> KvStoreBuilder<V>
where
    V: Clone + Serialize + Send + 'static,
{
    /// Create a builder with no commands, the JSON codec, default writer
    /// settings, and no medium.
    pub fn new<K>(key_fn: K) -> Self
    where
        K: Fn(&V) -> String + Send + Sync + 'static,
    {
        Self {
            key_fn: Arc::new(key_fn),
            commands: CommandTable::new(),
            medium: None,
            codec: Box::new(JsonCodec),
            writer_config: WriterConfig::default(),
        }
    }

    /// Replace the command table.
    ///
    /// # Arguments
    ///
    /// * `table` - Every command the store accepts.
    ///
    /// # Returns
    ///
    /// `self` for method chaining.
    pub fn commands(mut self, table: CommandTable<V>) -> Self {
        self.commands = table;
        self
    }

    /// Register one more command.
    ///
    /// # Returns
    ///
    /// `self` for method chaining.
    pub fn command<M, H>(mut self, name: impl Into<String>, handler: H) -> Self
    where
        H: IntoCommand<V, M>,
    {
        self.commands = self.commands.command(name, handler);
        self
    }

    /// Set the log medium.
    ///
    /// If neither this nor [`path`](KvStoreBuilder::path) is called, an
    /// in-memory log is used and nothing survives the process.
    pub fn medium(mut self, medium: impl LogMedium) -> Self {
        self.medium = Some(Box::new(medium));
        self
    }

    /// Use a [`FileLog`] at `path`.
    pub fn path(self, path: impl Into<PathBuf>) -> Self {
        self.medium(FileLog::new(path))
    }

    /// Replace the payload codec. Defaults to [`JsonCodec`].
    pub fn codec(mut self, codec: impl PayloadCodec) -> Self {
        self.codec = Box::new(codec);
        self
    }

    /// Set the background flush interval. Defaults to 5 seconds.
    ///
    /// # Arguments
    ///
    /// * `interval` - Time between two background flush cycles.
    ///
    /// # Returns
    ///
    /// `self` for method chaining.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.writer_config.flush_interval = interval;
        self
    }

    /// Set the background flush interval in whole seconds.
    pub fn flush_interval_secs(self, secs: u64) -> Self {
        self.flush_interval(Duration::from_secs(secs))
    }

    /// Replace the whole writer configuration.
    pub fn writer_config(mut self, config: WriterConfig) -> Self {
        self.writer_config = config;
        self
    }

    /// Validate the commands, replay the log, and start the writer.
    ///
    /// # Errors
    ///
    /// - [`OpenError::Registration`] if the command table is invalid.
    /// - [`OpenError::Io`] if the log cannot be read or the writer thread
    ///   cannot be started.
    /// - [`OpenError::Recovery`] if a log line cannot be replayed.
    pub fn open(self) -> Result<KvStore<V>, OpenError> {
        let registry = CommandRegistry::build(self.commands)?;

        let medium = match self.medium {
            Some(medium) => medium,
            None => {
                tracing::warn!("no log medium configured, using an in-memory log");
                Box::new(MemoryLog::new())
            }
        };
        let lines = medium.read_lines()?;

        let mut projection = Projection::new(self.key_fn);
        let summary = recovery::replay(&lines, &mut projection, &registry, self.codec.as_ref())?;
        tracing::info!(
            commands = registry.len(),
            replayed = summary.replayed,
            skipped = summary.skipped,
            keys = projection.len(),
            "store opened"
        );

        let log = Arc::new(LogWriter::new(medium));
        let writer = spawn_writer(Arc::clone(&log), self.writer_config)?;

        Ok(KvStore {
            inner: Arc::new(Inner {
                state: Mutex::new(StoreState {
                    projection,
                    closed: false,
                }),
                registry,
                codec: self.codec,
                log,
                writer,
            }),
        })
    }
}
