//! Command handlers and the registration table.
//!
//! A command is a named handler that receives the store context and one
//! typed payload. Handlers are registered explicitly on a [`CommandTable`];
//! the handler's shape is classified at compile time through the
//! [`IntoCommand`] trait, so no runtime reflection is involved.

use std::any::{Any, TypeId, type_name};
use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::dispatch::StoreContext;
use crate::error::HandlerError;

/// What a handler wants done with the projection once it returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome<V> {
    /// Leave the projection as the handler left it.
    NoChange,
    /// Store this value under its derived key. Unlike
    /// [`StoreContext::add_or_update`], this write does not produce a
    /// verbose log entry; the command's own entry re-creates it on replay.
    Replace(V),
}

/// Conversion from a handler's return value into a [`CommandOutcome`].
///
/// Implemented for `()`, [`CommandOutcome<V>`], and `Result<T, E>` where
/// `T` is itself convertible and `E` converts into [`HandlerError`]. A
/// handler returning anything else does not register.
pub trait IntoOutcome<V> {
    /// Convert into an outcome, or the handler's error.
    ///
    /// # Errors
    ///
    /// Returns the error carried by an `Err` return value.
    fn into_outcome(self) -> Result<CommandOutcome<V>, HandlerError>;
}

impl<V> IntoOutcome<V> for () {
    fn into_outcome(self) -> Result<CommandOutcome<V>, HandlerError> {
        Ok(CommandOutcome::NoChange)
    }
}

impl<V> IntoOutcome<V> for CommandOutcome<V> {
    fn into_outcome(self) -> Result<CommandOutcome<V>, HandlerError> {
        Ok(self)
    }
}

impl<V, T, E> IntoOutcome<V> for Result<T, E>
where
    T: IntoOutcome<V>,
    E: Into<HandlerError>,
{
    fn into_outcome(self) -> Result<CommandOutcome<V>, HandlerError> {
        self.map_err(Into::into)?.into_outcome()
    }
}

/// Type-erased handler: downcasts the payload and runs the typed function.
pub(crate) type ErasedHandler<V> = Box<
    dyn Fn(&mut StoreContext<'_, V>, Box<dyn Any>) -> Result<CommandOutcome<V>, HandlerError>
        + Send
        + Sync,
>;

/// A handler taking exactly `(store, payload)`.
pub(crate) struct TypedHandler<V> {
    pub(crate) payload_type: TypeId,
    pub(crate) payload_type_name: &'static str,
    /// Converts a decoded log value into the boxed parameter type.
    pub(crate) decode: fn(&Value) -> serde_json::Result<Box<dyn Any>>,
    pub(crate) invoke: ErasedHandler<V>,
}

pub(crate) enum Signature<V> {
    Valid(TypedHandler<V>),
    /// Registered, but cannot be invoked. `arity` counts the store parameter.
    Invalid { arity: usize },
}

/// A handler ready to be registered, produced by [`IntoCommand`].
///
/// Opaque: the only way to build one is through a handler function.
pub struct CommandSpec<V> {
    pub(crate) signature: Signature<V>,
}

impl<V> CommandSpec<V> {
    pub(crate) fn arity(&self) -> usize {
        match &self.signature {
            Signature::Valid(_) => 2,
            Signature::Invalid { arity } => *arity,
        }
    }
}

impl<V> fmt::Debug for CommandSpec<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.signature {
            Signature::Valid(handler) => f
                .debug_struct("CommandSpec")
                .field("payload_type", &handler.payload_type_name)
                .finish(),
            Signature::Invalid { arity } => f
                .debug_struct("CommandSpec")
                .field("invalid_arity", arity)
                .finish(),
        }
    }
}

/// Conversion from a handler function into a registrable [`CommandSpec`].
///
/// The `Marker` parameter only distinguishes handler shapes and is always
/// inferred:
///
/// - `Fn(&mut StoreContext<V>, P) -> R`: a valid command with payload `P`.
/// - `Fn(&mut StoreContext<V>) -> R` and
///   `Fn(&mut StoreContext<V>, A, B) -> R`: accepted at registration but
///   marked invalid; executing them fails with
///   [`ExecuteError::InvalidSignature`](crate::ExecuteError::InvalidSignature).
///
/// Register plain `fn` items; closures with unannotated parameters cannot
/// be classified.
pub trait IntoCommand<V, Marker> {
    /// Wrap the handler.
    fn into_command(self) -> CommandSpec<V>;
}

impl<V, P, R, F> IntoCommand<V, fn(P) -> R> for F
where
    F: Fn(&mut StoreContext<'_, V>, P) -> R + Send + Sync + 'static,
    P: Serialize + DeserializeOwned + 'static,
    R: IntoOutcome<V> + 'static,
    V: 'static,
{
    fn into_command(self) -> CommandSpec<V> {
        CommandSpec {
            signature: Signature::Valid(TypedHandler {
                payload_type: TypeId::of::<P>(),
                payload_type_name: type_name::<P>(),
                decode: decode_erased::<P>,
                invoke: erase(self),
            }),
        }
    }
}

impl<V, R, F> IntoCommand<V, fn() -> R> for F
where
    F: Fn(&mut StoreContext<'_, V>) -> R,
{
    fn into_command(self) -> CommandSpec<V> {
        CommandSpec {
            signature: Signature::Invalid { arity: 1 },
        }
    }
}

impl<V, A, B, R, F> IntoCommand<V, fn(A, B) -> R> for F
where
    F: Fn(&mut StoreContext<'_, V>, A, B) -> R,
{
    fn into_command(self) -> CommandSpec<V> {
        CommandSpec {
            signature: Signature::Invalid { arity: 3 },
        }
    }
}

fn decode_erased<P: DeserializeOwned + 'static>(value: &Value) -> serde_json::Result<Box<dyn Any>> {
    let payload = <P as serde::Deserialize>::deserialize(value)?;
    Ok(Box::new(payload))
}

fn erase<V, P, R, F>(handler: F) -> ErasedHandler<V>
where
    F: Fn(&mut StoreContext<'_, V>, P) -> R + Send + Sync + 'static,
    P: 'static,
    R: IntoOutcome<V> + 'static,
    V: 'static,
{
    Box::new(
        move |store: &mut StoreContext<'_, V>, payload: Box<dyn Any>| {
            // The dispatcher checks the TypeId before invoking.
            let payload = payload
                .downcast::<P>()
                .map_err(|_| HandlerError::from("payload type does not match handler"))?;
            handler(store, *payload).into_outcome()
        },
    )
}

/// Explicit, ordered list of commands a store accepts.
///
/// Validation (duplicate or unusable names) happens when the store is
/// opened, so every problem is reported at once.
///
/// # Examples
///
/// ```
/// use eventfold_kv::{CommandOutcome, CommandTable, StoreContext};
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
/// let table = CommandTable::new().command("Bump", bump);
/// assert_eq!(table.len(), 1);
/// ```
pub struct CommandTable<V> {
    pub(crate) entries: Vec<(String, CommandSpec<V>)>,
}

impl<V> CommandTable<V> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register `handler` under `name`.
    pub fn command<M, H>(mut self, name: impl Into<String>, handler: H) -> Self
    where
        H: IntoCommand<V, M>,
    {
        self.entries.push((name.into(), handler.into_command()));
        self
    }

    /// Number of registrations, valid or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V> Default for CommandTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for CommandTable<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(name, spec)| (name, spec)))
            .finish()
    }
}

/// Shared domain fixtures for unit tests across modules.
#[cfg(test)]
pub(crate) mod test_fixtures {
    use serde::{Deserialize, Serialize};

    use super::{CommandOutcome, CommandTable};
    use crate::dispatch::StoreContext;
    use crate::error::{ExecuteError, HandlerError};

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct Item {
        pub id: u32,
        pub my_data: Vec<String>,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct AddItem {
        pub id_to_add_to: u32,
        pub new_item: String,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct ModifyItem {
        pub id: u32,
        pub new_data: Vec<String>,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub(crate) struct SeedItem {
        pub id: u32,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub(crate) struct CopyItem {
        pub from: u32,
        pub to: u32,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub(crate) struct BreakItem {
        pub id: u32,
    }

    pub(crate) fn item_key(item: &Item) -> String {
        item.id.to_string()
    }

    /// Appends to an item, creating it if missing.
    pub(crate) fn add_item(
        store: &mut StoreContext<'_, Item>,
        cmd: AddItem,
    ) -> CommandOutcome<Item> {
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

    /// Replaces an existing item's data; fails if the item does not exist.
    pub(crate) fn modify_item(
        store: &mut StoreContext<'_, Item>,
        cmd: ModifyItem,
    ) -> Result<CommandOutcome<Item>, HandlerError> {
        let Some(existing) = store.get(&cmd.id.to_string()) else {
            return Err(format!("item {} does not exist", cmd.id).into());
        };
        let mut item = existing.clone();
        item.my_data = cmd.new_data;
        Ok(CommandOutcome::Replace(item))
    }

    /// Same payload type as [`modify_item`]; registering both makes
    /// `ModifyItem` ambiguous for type-based dispatch.
    pub(crate) fn overwrite_item(
        _store: &mut StoreContext<'_, Item>,
        cmd: ModifyItem,
    ) -> CommandOutcome<Item> {
        CommandOutcome::Replace(Item {
            id: cmd.id,
            my_data: cmd.new_data,
        })
    }

    /// Writes directly through the context instead of returning a value.
    pub(crate) fn seed_item(
        store: &mut StoreContext<'_, Item>,
        cmd: SeedItem,
    ) -> Result<(), ExecuteError> {
        store.add_or_update(Item {
            id: cmd.id,
            my_data: vec!["seed".to_string()],
        })
    }

    /// Re-issues every element of `from` as a nested `AddItem` on `to`.
    pub(crate) fn copy_item(
        store: &mut StoreContext<'_, Item>,
        cmd: CopyItem,
    ) -> Result<(), HandlerError> {
        let data = store
            .get(&cmd.from.to_string())
            .map(|item| item.my_data.clone())
            .ok_or_else(|| format!("item {} does not exist", cmd.from))?;
        for element in data {
            store.execute(AddItem {
                id_to_add_to: cmd.to,
                new_item: element,
            })?;
        }
        Ok(())
    }

    /// Writes, then fails, so the write must be rolled back.
    pub(crate) fn break_item(
        store: &mut StoreContext<'_, Item>,
        cmd: BreakItem,
    ) -> Result<(), HandlerError> {
        store.add_or_update(Item {
            id: cmd.id,
            my_data: vec!["partial".to_string()],
        })?;
        Err("item is frozen".into())
    }

    /// Takes two payloads, so it registers as invalid.
    pub(crate) fn merge_items(
        _store: &mut StoreContext<'_, Item>,
        _first: ModifyItem,
        _second: ModifyItem,
    ) {
    }

    /// Takes no payload, so it registers as invalid.
    pub(crate) fn reset_items(_store: &mut StoreContext<'_, Item>) {}

    pub(crate) fn item_commands() -> CommandTable<Item> {
        CommandTable::new()
            .command("AddItem", add_item)
            .command("ModifyItem", modify_item)
            .command("SeedItem", seed_item)
            .command("CopyItem", copy_item)
            .command("BreakItem", break_item)
            .command("MergeItems", merge_items)
            .command("ResetItems", reset_items)
    }
}

#[cfg(test)]
mod tests {
    use super::test_fixtures::*;
    use super::*;

    #[test]
    fn unit_return_is_no_change() {
        let outcome: Result<CommandOutcome<Item>, HandlerError> = ().into_outcome();
        assert!(matches!(outcome, Ok(CommandOutcome::NoChange)));
    }

    #[test]
    fn nested_result_unwraps_to_inner_outcome() {
        let ret: Result<CommandOutcome<u32>, String> = Ok(CommandOutcome::Replace(7));
        let outcome: CommandOutcome<u32> = ret.into_outcome().expect("Ok should convert");
        assert_eq!(outcome, CommandOutcome::Replace(7));

        let ret: Result<(), String> = Err("nope".to_string());
        let err = IntoOutcome::<u32>::into_outcome(ret).expect_err("Err should convert");
        assert_eq!(err.to_string(), "nope");
    }

    #[test]
    fn payload_handler_is_valid() {
        let spec: CommandSpec<Item> = add_item.into_command();
        match &spec.signature {
            Signature::Valid(handler) => {
                assert_eq!(handler.payload_type, TypeId::of::<AddItem>());
                assert!(handler.payload_type_name.ends_with("AddItem"));
            }
            Signature::Invalid { .. } => panic!("expected a valid signature"),
        }
        assert_eq!(spec.arity(), 2);
    }

    #[test]
    fn wrong_arity_handlers_are_invalid() {
        let three: CommandSpec<Item> = merge_items.into_command();
        assert!(matches!(three.signature, Signature::Invalid { arity: 3 }));

        let one: CommandSpec<Item> = reset_items.into_command();
        assert!(matches!(one.signature, Signature::Invalid { arity: 1 }));
    }

    #[test]
    fn decode_erased_produces_payload_type() {
        let spec: CommandSpec<Item> = add_item.into_command();
        let Signature::Valid(handler) = spec.signature else {
            panic!("expected a valid signature");
        };
        let value = serde_json::json!({"idToAddTo": 321, "newItem": "bye"});
        let boxed = (handler.decode)(&value).expect("decode should succeed");
        let payload = boxed.downcast::<AddItem>().expect("downcast should succeed");
        assert_eq!(payload.id_to_add_to, 321);
        assert_eq!(payload.new_item, "bye");
    }

    #[test]
    fn table_keeps_registration_order() {
        let table = item_commands();
        let names: Vec<&str> = table.entries.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "AddItem",
                "ModifyItem",
                "SeedItem",
                "CopyItem",
                "BreakItem",
                "MergeItems",
                "ResetItems"
            ]
        );
        assert!(!table.is_empty());
        assert!(CommandTable::<Item>::default().is_empty());
    }
}
