//! Event-sourced key-value store with a replayable write-behind command log.

mod codec;
mod command;
mod dispatch;
mod entry;
mod error;
mod projection;
mod recovery;
mod registry;
mod storage;
mod store;
mod writer;

pub use codec::{JsonCodec, PayloadCodec};
pub use command::{CommandOutcome, CommandSpec, CommandTable, IntoCommand, IntoOutcome};
pub use dispatch::StoreContext;
pub use entry::{DIRECT_WRITE_LABEL, LogEntry, VERBOSE_MARKER};
pub use error::{
    CodecError, ExecuteError, FlushError, HandlerError, OpenError, RecoveryError,
    RegistrationError, RegistrationProblem,
};
pub use registry::CommandInfo;
pub use storage::{FileLog, LogMedium, MemoryLog};
pub use store::{KvStore, KvStoreBuilder};
pub use writer::{WriterConfig, WriterStats};
