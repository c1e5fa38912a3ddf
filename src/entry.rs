//! Line format of the persisted command log.
//!
//! ```text
//! <commandName>\t<encoded payload>      replayable entry
//! # <label>\t<encoded payload>          verbose entry, skipped on replay
//! ```

use std::fmt;

use crate::error::RecoveryError;

/// First character of every verbose (non-replayable) line.
pub const VERBOSE_MARKER: char = '#';

/// Label used for values stored through
/// [`add_or_update`](crate::KvStore::add_or_update).
pub const DIRECT_WRITE_LABEL: &str = "+";

/// A single line of the command log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    /// A top-level command; replayed on open.
    Command {
        /// Registered command name.
        name: String,
        /// Codec text of the command payload.
        payload: String,
    },

    /// Audit record of a direct write or a nested command. Never replayed.
    Verbose {
        /// [`DIRECT_WRITE_LABEL`] or the nested command's name.
        label: String,
        /// Codec text of the stored value or nested payload.
        payload: String,
    },
}

impl LogEntry {
    /// Returns `true` if the entry is replayed on open.
    pub fn is_replayable(&self) -> bool {
        matches!(self, Self::Command { .. })
    }

    /// Parse a single log line (without its trailing newline).
    ///
    /// Verbose lines are parsed leniently: a missing tab yields an empty
    /// payload, since they carry no recovery semantics.
    ///
    /// # Errors
    ///
    /// Returns [`RecoveryError::Malformed`] if a replayable line has no tab.
    pub fn parse(line: &str) -> Result<Self, RecoveryError> {
        if let Some(rest) = line.strip_prefix(VERBOSE_MARKER) {
            let rest = rest.strip_prefix(' ').unwrap_or(rest);
            let (label, payload) = rest.split_once('\t').unwrap_or((rest, ""));
            return Ok(Self::Verbose {
                label: label.to_owned(),
                payload: payload.to_owned(),
            });
        }

        let (name, payload) = line.split_once('\t').ok_or(RecoveryError::Malformed)?;
        Ok(Self::Command {
            name: name.to_owned(),
            payload: payload.to_owned(),
        })
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command { name, payload } => write!(f, "{name}\t{payload}"),
            Self::Verbose { label, payload } => {
                write!(f, "{VERBOSE_MARKER} {label}\t{payload}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_format() {
        let entry = LogEntry::Command {
            name: "AddItem".to_string(),
            payload: r#"{"idToAddTo":321,"newItem":"bye"}"#.to_string(),
        };
        assert_eq!(
            entry.to_string(),
            "AddItem\t{\"idToAddTo\":321,\"newItem\":\"bye\"}"
        );
        assert!(entry.is_replayable());
    }

    #[test]
    fn verbose_line_format() {
        let entry = LogEntry::Verbose {
            label: DIRECT_WRITE_LABEL.to_string(),
            payload: r#"{"id":1}"#.to_string(),
        };
        assert_eq!(entry.to_string(), "# +\t{\"id\":1}");
        assert!(!entry.is_replayable());
    }

    #[test]
    fn parse_command_line() {
        let entry = LogEntry::parse("AddItem\t{\"id\":1}").expect("line should parse");
        assert_eq!(
            entry,
            LogEntry::Command {
                name: "AddItem".to_string(),
                payload: "{\"id\":1}".to_string(),
            }
        );
    }

    #[test]
    fn parse_verbose_line() {
        let entry = LogEntry::parse("# +\t{\"id\":1}").expect("line should parse");
        assert_eq!(
            entry,
            LogEntry::Verbose {
                label: "+".to_string(),
                payload: "{\"id\":1}".to_string(),
            }
        );
    }

    #[test]
    fn parse_line_without_tab_is_malformed() {
        let result = LogEntry::parse("AddItem {\"id\":1}");
        assert!(matches!(result, Err(RecoveryError::Malformed)));
    }

    #[test]
    fn payload_keeps_extra_tabs() {
        // Only the first tab separates name from payload.
        let entry = LogEntry::parse("AddItem\ta\tb").expect("line should parse");
        assert_eq!(
            entry,
            LogEntry::Command {
                name: "AddItem".to_string(),
                payload: "a\tb".to_string(),
            }
        );
    }
}
