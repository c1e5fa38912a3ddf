//! Command dispatch: the context handed to handlers and the apply step.
//!
//! Every top-level call (a command, or a direct write) runs inside one
//! [`StoreContext`] while the store's state lock is held. The context
//! collects the log lines the call produces and journals every projection
//! write, so a failing command can be undone without leaving state or log
//! entries behind.

use std::any::{Any, TypeId, type_name};
use std::panic::{self, AssertUnwindSafe};

use serde::Serialize;

use crate::codec::{PayloadCodec, encode_payload, encode_value};
use crate::command::{CommandOutcome, TypedHandler};
use crate::entry::{DIRECT_WRITE_LABEL, LogEntry};
use crate::error::{CodecError, ExecuteError};
use crate::projection::{Projection, Savepoint, UndoLog};
use crate::registry::{CommandRegistry, Descriptor};

/// Whether a context records log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Normal operation: every call produces log lines.
    Live,
    /// Rebuilding from the log: nothing is encoded or recorded.
    Replay,
}

#[derive(Debug, Clone, Copy)]
struct Checkpoint {
    undo: Savepoint,
    pending: usize,
}

/// The store as seen from inside a command handler.
///
/// Reads see every write made so far in the current call, including writes
/// from nested commands. Writes and nested commands are undone if the
/// enclosing command fails.
pub struct StoreContext<'a, V> {
    projection: &'a mut Projection<V>,
    registry: &'a CommandRegistry<V>,
    codec: &'a dyn PayloadCodec,
    mode: Mode,
    undo: UndoLog<V>,
    pending: Vec<String>,
    depth: usize,
}

impl<'a, V> StoreContext<'a, V> {
    pub(crate) fn new(
        projection: &'a mut Projection<V>,
        registry: &'a CommandRegistry<V>,
        codec: &'a dyn PayloadCodec,
        mode: Mode,
    ) -> Self {
        Self {
            projection,
            registry,
            codec,
            mode,
            undo: UndoLog::new(),
            pending: Vec::new(),
            depth: 0,
        }
    }

    /// Returns the value stored under `key`, if any.
    pub fn get(&self, key: &str) -> Option<&V> {
        self.projection.get(key)
    }

    /// Lazily scan every stored value, yielding those for which
    /// `predicate(key, value)` holds. Order is unspecified.
    pub fn query<'s, F>(&'s self, predicate: F) -> impl Iterator<Item = &'s V> + 's
    where
        F: Fn(&str, &V) -> bool + 's,
    {
        self.projection.query(predicate)
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.projection.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.projection.len() == 0
    }

    /// Commit the call and hand back the log lines it produced.
    pub(crate) fn into_pending(self) -> Vec<String> {
        self.pending
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            undo: self.undo.savepoint(),
            pending: self.pending.len(),
        }
    }

    fn rollback(&mut self, checkpoint: Checkpoint) {
        self.undo.rollback_to(checkpoint.undo, self.projection);
        self.pending.truncate(checkpoint.pending);
    }

    fn upsert(&mut self, value: V) {
        let (key, previous) = self.projection.upsert(value);
        self.undo.record(key, previous);
    }
}

impl<'a, V: Serialize> StoreContext<'a, V> {
    /// Store `value` under its derived key, overwriting any previous value.
    ///
    /// Logged as a verbose entry only. Verbose entries are never replayed,
    /// so a value written this way outside of any command is lost when the
    /// store is reopened. Inside a command the write is re-created by
    /// replaying that command.
    ///
    /// # Errors
    ///
    /// Returns [`ExecuteError::Encode`] if the value cannot be encoded; the
    /// projection is left unchanged.
    pub fn add_or_update(&mut self, value: V) -> Result<(), ExecuteError> {
        if self.mode == Mode::Live {
            let payload = encode_payload(self.codec, &value).map_err(|source| {
                ExecuteError::Encode {
                    label: DIRECT_WRITE_LABEL.to_owned(),
                    source,
                }
            })?;
            let entry = LogEntry::Verbose {
                label: DIRECT_WRITE_LABEL.to_owned(),
                payload,
            };
            self.pending.push(entry.to_string());
        }
        self.upsert(value);
        Ok(())
    }

    /// Run the command registered under `name` (case-insensitive).
    ///
    /// # Errors
    ///
    /// - [`ExecuteError::UnknownCommand`] if no command has this name.
    /// - [`ExecuteError::InvalidSignature`] if the handler has the wrong
    ///   arity.
    /// - [`ExecuteError::PayloadTypeMismatch`] if the command takes another
    ///   payload type.
    /// - [`ExecuteError::Handler`] if the handler fails. Its writes are
    ///   undone.
    pub fn execute_event<P>(&mut self, name: &str, payload: P) -> Result<(), ExecuteError>
    where
        P: Serialize + 'static,
    {
        let registry = self.registry;
        let descriptor = registry.resolve(name)?;
        self.run_typed(descriptor, payload)
    }

    /// Run the single command whose handler accepts `P`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecuteError::UnknownPayloadType`] if no command, or more
    /// than one command, accepts `P`. Otherwise fails like
    /// [`execute_event`](Self::execute_event).
    pub fn execute<P>(&mut self, payload: P) -> Result<(), ExecuteError>
    where
        P: Serialize + 'static,
    {
        let registry = self.registry;
        let descriptor = registry.resolve_payload(TypeId::of::<P>(), type_name::<P>())?;
        self.run_typed(descriptor, payload)
    }

    /// Run the command registered under `name` with a payload in codec
    /// text form, decoded into the handler's parameter type.
    pub(crate) fn execute_encoded(&mut self, name: &str, text: &str) -> Result<(), ExecuteError> {
        let registry = self.registry;
        let descriptor = registry.resolve(name)?;
        let handler = descriptor.handler()?;

        let decode_error = |source: CodecError| ExecuteError::Decode {
            command: descriptor.name().to_owned(),
            source,
        };
        let value = self.codec.decode(text).map_err(decode_error)?;
        let payload = (handler.decode)(&value).map_err(|e| decode_error(CodecError::Json(e)))?;

        let encoded = match self.mode {
            Mode::Live => Some(encode_value(self.codec, &value).map_err(|source| {
                ExecuteError::Encode {
                    label: descriptor.name().to_owned(),
                    source,
                }
            })?),
            Mode::Replay => None,
        };
        self.apply(descriptor.name(), handler, encoded, payload)
    }

    fn run_typed<P>(&mut self, descriptor: &'a Descriptor<V>, payload: P) -> Result<(), ExecuteError>
    where
        P: Serialize + 'static,
    {
        let handler = descriptor.handler()?;
        if handler.payload_type != TypeId::of::<P>() {
            return Err(ExecuteError::PayloadTypeMismatch {
                command: descriptor.name().to_owned(),
                expected: handler.payload_type_name,
                actual: type_name::<P>(),
            });
        }

        let encoded = match self.mode {
            Mode::Live => Some(encode_payload(self.codec, &payload).map_err(|source| {
                ExecuteError::Encode {
                    label: descriptor.name().to_owned(),
                    source,
                }
            })?),
            Mode::Replay => None,
        };
        self.apply(descriptor.name(), handler, encoded, Box::new(payload))
    }

    /// Record the entry, invoke the handler, and apply its outcome.
    ///
    /// A top-level command yields a replayable entry. A nested one yields a
    /// verbose entry, because replaying the outer command re-runs it. If the
    /// handler fails or panics, everything since the entry was recorded is
    /// undone; a panic is then resumed.
    fn apply(
        &mut self,
        name: &str,
        handler: &'a TypedHandler<V>,
        encoded: Option<String>,
        payload: Box<dyn Any>,
    ) -> Result<(), ExecuteError> {
        let checkpoint = self.checkpoint();
        if let Some(payload) = encoded {
            let entry = if self.depth == 0 {
                LogEntry::Command {
                    name: name.to_owned(),
                    payload,
                }
            } else {
                LogEntry::Verbose {
                    label: name.to_owned(),
                    payload,
                }
            };
            self.pending.push(entry.to_string());
        }

        let span = tracing::debug_span!("execute", command = %name, depth = self.depth);
        let _enter = span.enter();

        self.depth += 1;
        let result = panic::catch_unwind(AssertUnwindSafe(|| (handler.invoke)(self, payload)));
        self.depth -= 1;

        // A panicking handler must not leave its writes behind: the lines
        // that would replay them are discarded with this context.
        let result = match result {
            Ok(result) => result,
            Err(cause) => {
                self.rollback(checkpoint);
                tracing::debug!("command panicked, writes rolled back");
                panic::resume_unwind(cause);
            }
        };

        match result {
            Ok(CommandOutcome::Replace(value)) => {
                self.upsert(value);
                Ok(())
            }
            Ok(CommandOutcome::NoChange) => Ok(()),
            Err(source) => {
                self.rollback(checkpoint);
                tracing::debug!(error = %source, "command failed, writes rolled back");
                Err(ExecuteError::Handler {
                    command: name.to_owned(),
                    source,
                })
            }
        }
    }
}
