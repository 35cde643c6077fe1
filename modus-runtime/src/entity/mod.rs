//! Entities - identity-bearing state containers stored in arena slots

use crate::capability::CapabilitySet;
use crate::machine::MachineInstance;
use modus_types::{Address, EntityId, StateMap, Value, ValueShape};
use serde::Serialize;
use std::collections::BTreeMap;

/// A mutable state container with a dynamic capability set
///
/// Concepts keep their declaration order; modifiers keep attach order.
/// Cloning an entity is how the runtime snapshots it before a
/// transactional mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    id: EntityId,
    state: StateMap,
    concepts: Vec<String>,
    modifiers: Vec<String>,
    machine: Option<MachineInstance>,
}

impl Entity {
    pub(crate) fn new(state: StateMap, concepts: Vec<String>) -> Self {
        Self {
            id: EntityId::new(),
            state,
            concepts,
            modifiers: Vec::new(),
            machine: None,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn state(&self) -> &StateMap {
        &self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut StateMap {
        &mut self.state
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    pub fn concepts(&self) -> &[String] {
        &self.concepts
    }

    pub fn modifiers(&self) -> &[String] {
        &self.modifiers
    }

    pub fn machine(&self) -> Option<&MachineInstance> {
        self.machine.as_ref()
    }

    pub(crate) fn machine_mut(&mut self) -> Option<&mut MachineInstance> {
        self.machine.as_mut()
    }

    pub(crate) fn set_machine(&mut self, machine: Option<MachineInstance>) {
        self.machine = machine;
    }

    pub fn implements(&self, concept: &str) -> bool {
        self.concepts.iter().any(|c| c == concept)
    }

    pub fn has_modifier(&self, modifier: &str) -> bool {
        self.modifiers.iter().any(|m| m == modifier)
    }

    /// Whether a concept or modifier of this name is currently active
    pub fn has_active(&self, name: &str) -> bool {
        self.implements(name) || self.has_modifier(name)
    }

    /// Active capability names: concepts first, then modifiers
    pub fn active(&self) -> impl Iterator<Item = &str> {
        self.concepts
            .iter()
            .chain(self.modifiers.iter())
            .map(String::as_str)
    }

    pub(crate) fn push_concept(&mut self, name: impl Into<String>) {
        self.concepts.push(name.into());
    }

    pub(crate) fn push_modifier(&mut self, name: impl Into<String>) {
        self.modifiers.push(name.into());
    }

    pub(crate) fn remove_capability(&mut self, name: &str) {
        self.concepts.retain(|c| c != name);
        self.modifiers.retain(|m| m != name);
    }

    /// Snapshot for introspection
    pub fn view(&self, address: Address) -> EntityView {
        EntityView {
            id: self.id,
            address,
            fields: self
                .state
                .iter()
                .map(|(key, value)| (key.clone(), value.shape()))
                .collect(),
            concepts: self.concepts.clone(),
            modifiers: self.modifiers.clone(),
            machine: self.machine.clone(),
        }
    }
}

impl CapabilitySet for Entity {
    fn has_capability(&self, name: &str) -> bool {
        self.has_active(name)
    }
}

/// Read-only, serializable description of an entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityView {
    pub id: EntityId,
    pub address: Address,
    pub fields: BTreeMap<String, ValueShape>,
    pub concepts: Vec<String>,
    pub modifiers: Vec<String>,
    pub machine: Option<MachineInstance>,
}
