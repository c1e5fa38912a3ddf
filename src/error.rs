//! Crate-level error types for registration, command execution, recovery,
//! and log flushing.

use std::fmt;
use std::io;

/// Error produced by a command handler.
///
/// Handlers may return any `std::error::Error + Send + Sync` (or a plain
/// string); it is boxed into this type and wrapped in
/// [`ExecuteError::Handler`].
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why a single command registration was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationProblem {
    /// Another command already uses this name (names are case-insensitive).
    DuplicateName,
    /// The name is empty.
    EmptyName,
    /// The name contains a tab or line break, or starts with `#`, any of
    /// which would make the persisted log ambiguous.
    ReservedCharacter,
}

impl fmt::Display for RegistrationProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::DuplicateName => "duplicate name",
            Self::EmptyName => "empty name",
            Self::ReservedCharacter => "reserved character in name",
        };
        f.write_str(text)
    }
}

/// Error returned when the command table cannot be turned into a registry.
///
/// Lists every offending registration, not just the first one, so a single
/// failed start surfaces all of them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid command registrations: {}", describe_problems(.problems))]
pub struct RegistrationError {
    /// Offending command names paired with the reason each was rejected,
    /// in registration order.
    pub problems: Vec<(String, RegistrationProblem)>,
}

impl RegistrationError {
    /// Names of all offending registrations, in registration order.
    pub fn offending_names(&self) -> Vec<&str> {
        self.problems.iter().map(|(name, _)| name.as_str()).collect()
    }
}

fn describe_problems(problems: &[(String, RegistrationProblem)]) -> String {
    problems
        .iter()
        .map(|(name, problem)| format!("{name:?} ({problem})"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Error returned by a [`PayloadCodec`](crate::PayloadCodec) or by the typed
/// conversion around it.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The payload could not be converted to or from JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The encoded text contains a raw tab or line break and cannot be
    /// stored in a line-oriented log.
    #[error("encoded payload contains a raw tab or line break")]
    Delimiter,
}

/// Error returned when dispatching a command or writing a value fails.
///
/// Per-call errors never leave partial state behind: the projection and the
/// write queue are unchanged when one of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    /// No command is registered under this name.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// No command, or more than one command, accepts this payload type, so
    /// type-based dispatch cannot pick a target.
    #[error("no single command accepts payload type {0}")]
    UnknownPayloadType(&'static str),

    /// The command exists but its handler does not take exactly
    /// `(store, payload)`.
    #[error(
        "command {name} does not have a valid signature: expected (store, payload), \
         found {arity} parameter(s)"
    )]
    InvalidSignature {
        /// Registered command name.
        name: String,
        /// Number of parameters the handler takes, store included.
        arity: usize,
    },

    /// The command was resolved by name but the payload is of another type.
    #[error("command {command} expects a {expected} payload, got {actual}")]
    PayloadTypeMismatch {
        /// Registered command name.
        command: String,
        /// Payload type the handler accepts.
        expected: &'static str,
        /// Payload type supplied by the caller.
        actual: &'static str,
    },

    /// The payload or value could not be encoded for the log.
    #[error("failed to encode {label} entry: {source}")]
    Encode {
        /// Command name, or the direct-write label.
        label: String,
        /// Underlying codec failure.
        #[source]
        source: CodecError,
    },

    /// A string-form payload could not be decoded into the parameter type.
    #[error("failed to decode payload for {command}: {source}")]
    Decode {
        /// Registered command name.
        command: String,
        /// Underlying codec failure.
        #[source]
        source: CodecError,
    },

    /// The handler rejected the command.
    #[error("command {command} failed: {source}")]
    Handler {
        /// Registered command name.
        command: String,
        /// Error returned by the handler.
        #[source]
        source: HandlerError,
    },

    /// The store has been closed and no longer accepts mutations.
    #[error("store is closed")]
    Closed,
}

/// Error raised while replaying a single log line.
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    /// The line has no tab separating the command name from its payload.
    #[error("malformed log line: missing tab delimiter")]
    Malformed,

    /// The line could not be dispatched.
    #[error(transparent)]
    Execute(#[from] ExecuteError),
}

/// Error returned when a store cannot be opened.
///
/// A store is never handed out partially initialized: any of these aborts
/// construction.
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    /// The command table was rejected.
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// Reading the log or starting the writer thread failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A persisted entry could not be replayed.
    #[error("log replay failed at line {line}: {source}")]
    Recovery {
        /// 1-based line number in the log.
        line: usize,
        /// What went wrong on that line.
        #[source]
        source: RecoveryError,
    },
}

/// Error returned when queued log entries cannot be written.
#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    /// The log medium failed. The batch stays queued for the next cycle.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The background writer thread panicked before finishing its final
    /// drain.
    #[error("log writer thread panicked")]
    WriterPanicked,
}
