//! Validated, immutable command registry.
//!
//! Built once from a [`CommandTable`] when the store opens. Holds one
//! descriptor per registration plus two indices: a case-insensitive name
//! index, and a payload-type index that only covers payload types accepted
//! by exactly one valid command.

use std::any::TypeId;
use std::collections::HashMap;

use crate::command::{CommandSpec, CommandTable, Signature, TypedHandler};
use crate::error::{ExecuteError, RegistrationError, RegistrationProblem};

/// Public description of a registered command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInfo {
    /// Name as registered (original casing).
    pub name: String,
    /// Payload type name, or `None` if the handler signature is invalid.
    pub payload_type: Option<&'static str>,
    /// Number of handler parameters, store included.
    pub arity: usize,
    /// Whether [`execute`](crate::KvStore::execute) can reach this command
    /// by payload type alone.
    pub typed_dispatch: bool,
}

impl CommandInfo {
    /// Returns `true` if the command can be executed.
    pub fn is_valid(&self) -> bool {
        self.payload_type.is_some()
    }
}

pub(crate) struct Descriptor<V> {
    name: String,
    spec: CommandSpec<V>,
}

impl<V> Descriptor<V> {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// The invocable handler, or `InvalidSignature` for a wrong-arity
    /// registration.
    pub(crate) fn handler(&self) -> Result<&TypedHandler<V>, ExecuteError> {
        match &self.spec.signature {
            Signature::Valid(handler) => Ok(handler),
            Signature::Invalid { arity } => Err(ExecuteError::InvalidSignature {
                name: self.name.clone(),
                arity: *arity,
            }),
        }
    }

    fn payload_type(&self) -> Option<(TypeId, &'static str)> {
        match &self.spec.signature {
            Signature::Valid(handler) => Some((handler.payload_type, handler.payload_type_name)),
            Signature::Invalid { .. } => None,
        }
    }
}

pub(crate) struct CommandRegistry<V> {
    descriptors: Vec<Descriptor<V>>,
    by_name: HashMap<String, usize>,
    by_payload: HashMap<TypeId, usize>,
}

impl<V> CommandRegistry<V> {
    /// Validate `table` and build the indices.
    ///
    /// Wrong-arity handlers are not an error here: they are kept and fail
    /// when executed. A payload type accepted by several commands is not an
    /// error either; it is only left out of the payload-type index.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError`] listing every registration with a
    /// duplicate (case-insensitive), empty, or reserved-character name.
    pub(crate) fn build(table: CommandTable<V>) -> Result<Self, RegistrationError> {
        let mut name_counts: HashMap<String, usize> = HashMap::new();
        for (name, _) in &table.entries {
            *name_counts.entry(name.to_lowercase()).or_default() += 1;
        }

        let mut problems = Vec::new();
        for (name, _) in &table.entries {
            let problem = if name.is_empty() {
                Some(RegistrationProblem::EmptyName)
            } else if name.contains(['\t', '\n', '\r']) || name.starts_with('#') {
                Some(RegistrationProblem::ReservedCharacter)
            } else if name_counts[&name.to_lowercase()] > 1 {
                Some(RegistrationProblem::DuplicateName)
            } else {
                None
            };
            if let Some(problem) = problem {
                problems.push((name.clone(), problem));
            }
        }
        if !problems.is_empty() {
            return Err(RegistrationError { problems });
        }

        let descriptors: Vec<Descriptor<V>> = table
            .entries
            .into_iter()
            .map(|(name, spec)| Descriptor { name, spec })
            .collect();

        let by_name = descriptors
            .iter()
            .enumerate()
            .map(|(idx, d)| (d.name.to_lowercase(), idx))
            .collect();

        let mut owners: HashMap<TypeId, Vec<usize>> = HashMap::new();
        for (idx, descriptor) in descriptors.iter().enumerate() {
            if let Some((type_id, _)) = descriptor.payload_type() {
                owners.entry(type_id).or_default().push(idx);
            }
        }
        let by_payload = owners
            .into_iter()
            .filter_map(|(type_id, idxs)| match idxs.as_slice() {
                [only] => Some((type_id, *only)),
                _ => None,
            })
            .collect();

        Ok(Self {
            descriptors,
            by_name,
            by_payload,
        })
    }

    /// Look up a command by name, ignoring case.
    pub(crate) fn resolve(&self, name: &str) -> Result<&Descriptor<V>, ExecuteError> {
        self.by_name
            .get(&name.to_lowercase())
            .map(|&idx| &self.descriptors[idx])
            .ok_or_else(|| ExecuteError::UnknownCommand(name.to_owned()))
    }

    /// Look up the single command accepting `type_id`.
    pub(crate) fn resolve_payload(
        &self,
        type_id: TypeId,
        type_name: &'static str,
    ) -> Result<&Descriptor<V>, ExecuteError> {
        self.by_payload
            .get(&type_id)
            .map(|&idx| &self.descriptors[idx])
            .ok_or(ExecuteError::UnknownPayloadType(type_name))
    }

    /// Every registered command, sorted by name.
    pub(crate) fn describe(&self) -> Vec<CommandInfo> {
        let mut infos: Vec<CommandInfo> = self
            .descriptors
            .iter()
            .map(|d| {
                let payload = d.payload_type();
                CommandInfo {
                    name: d.name.clone(),
                    payload_type: payload.map(|(_, type_name)| type_name),
                    arity: d.spec.arity(),
                    typed_dispatch: payload
                        .is_some_and(|(type_id, _)| self.by_payload.contains_key(&type_id)),
                }
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub(crate) fn len(&self) -> usize {
        self.descriptors.len()
    }
}
