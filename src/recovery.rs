//! Replay of a persisted command log into a fresh projection.

use crate::codec::PayloadCodec;
use crate::dispatch::{Mode, StoreContext};
use crate::entry::{LogEntry, VERBOSE_MARKER};
use crate::error::{OpenError, RecoveryError};
use crate::projection::Projection;
use crate::registry::CommandRegistry;

/// Counts reported after a successful replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ReplaySummary {
    pub replayed: usize,
    pub skipped: usize,
}

/// Re-run every replayable line of `lines` against `projection`.
///
/// Empty lines and verbose lines are skipped. Each command runs in replay
/// mode, so nothing is re-encoded or written back to the log.
///
/// # Errors
///
/// Returns [`OpenError::Recovery`] with the 1-based line number of the first
/// line that is malformed or cannot be dispatched.
pub(crate) fn replay<V>(
    lines: &[String],
    projection: &mut Projection<V>,
    registry: &CommandRegistry<V>,
    codec: &dyn PayloadCodec,
) -> Result<ReplaySummary, OpenError>
where
    V: serde::Serialize,
{
    let mut summary = ReplaySummary::default();

    for (idx, raw) in lines.iter().enumerate() {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if line.is_empty() || line.starts_with(VERBOSE_MARKER) {
            summary.skipped += 1;
            continue;
        }

        replay_line(line, projection, registry, codec).map_err(|source| {
            OpenError::Recovery {
                line: idx + 1,
                source,
            }
        })?;
        summary.replayed += 1;
    }

    Ok(summary)
}

fn replay_line<V>(
    line: &str,
    projection: &mut Projection<V>,
    registry: &CommandRegistry<V>,
    codec: &dyn PayloadCodec,
) -> Result<(), RecoveryError>
where
    V: serde::Serialize,
{
    let LogEntry::Command { name, payload } = LogEntry::parse(line)? else {
        return Ok(());
    };
    let mut ctx = StoreContext::new(projection, registry, codec, Mode::Replay);
    ctx.execute_encoded(&name, &payload)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::codec::JsonCodec;
    use crate::command::test_fixtures::*;
    use crate::error::ExecuteError;

    fn setup() -> (Projection<Item>, CommandRegistry<Item>) {
        let projection = Projection::new(Arc::new(item_key));
        let registry = CommandRegistry::build(item_commands()).expect("build should succeed");
        (projection, registry)
    }

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|l| (*l).to_string()).collect()
    }

    #[test]
    fn replays_commands_in_order() {
        let (mut projection, registry) = setup();
        let log = lines(&[
            r#"AddItem	{"idToAddTo":321,"newItem":"bye"}"#,
            r#"AddItem	{"idToAddTo":321,"newItem":"hello"}"#,
            r#"AddItem	{"idToAddTo":321,"newItem":"three"}"#,
        ]);

        let summary =
            replay(&log, &mut projection, &registry, &JsonCodec).expect("replay should succeed");

        assert_eq!(summary.replayed, 3);
        assert_eq!(
            projection.get("321").map(|i| i.my_data.clone()),
            Some(vec![
                "bye".to_string(),
                "hello".to_string(),
                "three".to_string()
            ])
        );
    }

    #[test]
    fn skips_verbose_and_blank_lines() {
        let (mut projection, registry) = setup();
        let log = lines(&[
            r#"# +	{"id":7,"myData":["direct"]}"#,
            "",
            r#"SeedItem	{"id":1}"#,
            r#"# +	{"id":1,"myData":["seed"]}"#,
            "\r",
        ]);

        let summary =
            replay(&log, &mut projection, &registry, &JsonCodec).expect("replay should succeed");

        assert_eq!(summary, ReplaySummary { replayed: 1, skipped: 4 });
        assert!(projection.get("7").is_none(), "verbose-only value is not replayed");
        assert!(projection.get("1").is_some());
    }

    #[test]
    fn tolerates_crlf_line_endings() {
        let (mut projection, registry) = setup();
        let log = lines(&["AddItem\t{\"idToAddTo\":1,\"newItem\":\"a\"}\r"]);

        replay(&log, &mut projection, &registry, &JsonCodec).expect("replay should succeed");
        assert_eq!(projection.len(), 1);
    }

    #[test]
    fn missing_tab_aborts_with_line_number() {
        let (mut projection, registry) = setup();
        let log = lines(&[r#"AddItem	{"idToAddTo":1,"newItem":"a"}"#, "garbage line"]);

        let err = replay(&log, &mut projection, &registry, &JsonCodec)
            .expect_err("malformed line should abort");
        assert!(
            matches!(
                err,
                OpenError::Recovery {
                    line: 2,
                    source: RecoveryError::Malformed
                }
            ),
            "expected Recovery at line 2, got: {err:?}"
        );
    }

    #[test]
    fn unknown_command_aborts() {
        let (mut projection, registry) = setup();
        let log = lines(&[r#"RemoveItem	{"id":1}"#]);

        let err = replay(&log, &mut projection, &registry, &JsonCodec)
            .expect_err("unknown command should abort");
        assert!(matches!(
            err,
            OpenError::Recovery {
                line: 1,
                source: RecoveryError::Execute(ExecuteError::UnknownCommand(_))
            }
        ));
    }

    #[test]
    fn undecodable_payload_aborts() {
        let (mut projection, registry) = setup();
        let log = lines(&["AddItem\tnot json"]);

        let err = replay(&log, &mut projection, &registry, &JsonCodec)
            .expect_err("bad payload should abort");
        assert!(matches!(
            err,
            OpenError::Recovery {
                source: RecoveryError::Execute(ExecuteError::Decode { .. }),
                ..
            }
        ));
    }

    #[test]
    fn invalid_signature_aborts() {
        let (mut projection, registry) = setup();
        let log = lines(&[r#"MergeItems	{"id":1,"newData":[]}"#]);

        let err = replay(&log, &mut projection, &registry, &JsonCodec)
            .expect_err("invalid signature should abort");
        assert!(matches!(
            err,
            OpenError::Recovery {
                source: RecoveryError::Execute(ExecuteError::InvalidSignature { .. }),
                ..
            }
        ));
    }
}
