//! In-memory projection: the current value for every key.
//!
//! The projection is the materialized state the command log folds into.
//! Keys are never stored by callers directly; they are re-derived from each
//! value by the key-extraction function supplied at construction.

use std::collections::HashMap;
use std::sync::Arc;

/// Key-extraction function shared by the projection and the store builder.
pub(crate) type KeyFn<V> = Arc<dyn Fn(&V) -> String + Send + Sync>;

/// Key -> value map with a fixed key-extraction function.
pub(crate) struct Projection<V> {
    entries: HashMap<String, V>,
    key_of: KeyFn<V>,
}

impl<V> Projection<V> {
    pub(crate) fn new(key_of: KeyFn<V>) -> Self {
        Self {
            entries: HashMap::new(),
            key_of,
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    /// Full scan over every stored value. Order is unspecified.
    pub(crate) fn query<'a, F>(&'a self, predicate: F) -> impl Iterator<Item = &'a V> + 'a
    where
        F: Fn(&str, &V) -> bool + 'a,
    {
        self.entries
            .iter()
            .filter(move |(key, value)| predicate(key, value))
            .map(|(_, value)| value)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&String, &V)> {
        self.entries.iter()
    }

    /// Store `value` under its derived key, last write wins.
    ///
    /// Returns the key and the value it replaced, which is what the undo
    /// journal needs to reverse the write.
    pub(crate) fn upsert(&mut self, value: V) -> (String, Option<V>) {
        let key = (self.key_of)(&value);
        let previous = self.entries.insert(key.clone(), value);
        (key, previous)
    }

    /// Put `key` back to `previous`, removing it if it did not exist.
    pub(crate) fn restore(&mut self, key: String, previous: Option<V>) {
        match previous {
            Some(value) => {
                self.entries.insert(key, value);
            }
            None => {
                self.entries.remove(&key);
            }
        }
    }
}

/// Journal of overwritten values, used to roll back a failed command.
///
/// Every write made while a command runs records the key and the value it
/// replaced. Rolling back to a savepoint replays those records in reverse.
pub(crate) struct UndoLog<V> {
    records: Vec<(String, Option<V>)>,
}

/// Position in an [`UndoLog`] to roll back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Savepoint(usize);

impl<V> UndoLog<V> {
    pub(crate) fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub(crate) fn savepoint(&self) -> Savepoint {
        Savepoint(self.records.len())
    }

    pub(crate) fn record(&mut self, key: String, previous: Option<V>) {
        self.records.push((key, previous));
    }

    /// Undo every write made after `savepoint`, newest first.
    pub(crate) fn rollback_to(&mut self, savepoint: Savepoint, projection: &mut Projection<V>) {
        while self.records.len() > savepoint.0 {
            if let Some((key, previous)) = self.records.pop() {
                projection.restore(key, previous);
            }
        }
    }
}
