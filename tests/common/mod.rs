//! Shared domain for integration tests: items holding a list of strings.

#![allow(dead_code)]

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use eventfold_kv::{
    CommandOutcome, CommandTable, ExecuteError, FileLog, HandlerError, KvStore, LogMedium, OpenError,
    StoreContext,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: u32,
    pub my_data: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddItem {
    pub id_to_add_to: u32,
    pub new_item: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyItem {
    pub id: u32,
    pub new_data: Vec<String>,
}

/// Changes the item's id, so the result lands under a new key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloneItem {
    pub id: u32,
    pub new_id: u32,
}

/// Handled by a command that writes and then panics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplodeItem {
    pub id: u32,
}

pub fn item_key(item: &Item) -> String {
    item.id.to_string()
}

pub fn add_item(store: &mut StoreContext<'_, Item>, cmd: AddItem) -> CommandOutcome<Item> {
    let mut item = store
        .get(&cmd.id_to_add_to.to_string())
        .cloned()
        .unwrap_or_else(|| Item {
            id: cmd.id_to_add_to,
            my_data: Vec::new(),
        });
    item.my_data.push(cmd.new_item);
    CommandOutcome::Replace(item)
}

pub fn modify_item(
    store: &mut StoreContext<'_, Item>,
    cmd: ModifyItem,
) -> Result<CommandOutcome<Item>, HandlerError> {
    let mut item = store
        .get(&cmd.id.to_string())
        .cloned()
        .ok_or_else(|| format!("item {} does not exist", cmd.id))?;
    item.my_data = cmd.new_data;
    Ok(CommandOutcome::Replace(item))
}

pub fn overwrite_item(_store: &mut StoreContext<'_, Item>, cmd: ModifyItem) -> CommandOutcome<Item> {
    CommandOutcome::Replace(Item {
        id: cmd.id,
        my_data: cmd.new_data,
    })
}

pub fn clone_item(
    store: &mut StoreContext<'_, Item>,
    cmd: CloneItem,
) -> Result<CommandOutcome<Item>, HandlerError> {
    let mut item = store
        .get(&cmd.id.to_string())
        .cloned()
        .ok_or_else(|| format!("item {} does not exist", cmd.id))?;
    item.id = cmd.new_id;
    Ok(CommandOutcome::Replace(item))
}

pub fn explode_item(
    store: &mut StoreContext<'_, Item>,
    cmd: ExplodeItem,
) -> Result<(), ExecuteError> {
    store.add_or_update(Item {
        id: cmd.id,
        my_data: vec!["partial".to_string()],
    })?;
    panic!("item {} exploded", cmd.id);
}

pub fn merge_items(_store: &mut StoreContext<'_, Item>, _first: ModifyItem, _second: ModifyItem) {}

pub fn item_commands() -> CommandTable<Item> {
    CommandTable::new()
        .command("AddItem", add_item)
        .command("ModifyItem", modify_item)
        .command("CloneItem", clone_item)
        .command("ExplodeItem", explode_item)
        .command("MergeItems", merge_items)
}

pub fn add(id: u32, word: &str) -> AddItem {
    AddItem {
        id_to_add_to: id,
        new_item: word.to_string(),
    }
}

/// Open a file-backed store whose background writer effectively never
/// fires, so tests control flushing.
pub fn open_file_store(path: &Path) -> Result<KvStore<Item>, OpenError> {
    KvStore::builder(item_key)
        .commands(item_commands())
        .path(path)
        .flush_interval(Duration::from_secs(3600))
        .open()
}

/// File log that rejects appends while `failing` is set.
#[derive(Debug, Clone)]
pub struct FlakyFileLog {
    pub inner: FileLog,
    pub failing: Arc<AtomicBool>,
}

impl FlakyFileLog {
    pub fn new(path: &Path) -> Self {
        Self {
            inner: FileLog::new(path),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl LogMedium for FlakyFileLog {
    fn read_lines(&self) -> io::Result<Vec<String>> {
        self.inner.read_lines()
    }

    fn append_lines(&mut self, lines: &[String]) -> io::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(io::Error::other("disk unavailable"));
        }
        self.inner.append_lines(lines)
    }
}
