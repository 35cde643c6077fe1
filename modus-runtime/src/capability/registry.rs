//! The capability registry
//!
//! Definitions are collected in a `RegistryBuilder` at startup and frozen
//! into a `Registry`, which is never mutated afterwards and can be shared
//! across threads behind an `Arc`.

use super::definition::{CapabilityRef, CapabilitySummary, ConceptDef, ModifierDef};
use crate::error::{Result, RuntimeError};
use crate::machine::{MachineSummary, StateMachineTemplate};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// A named, ordered set of capabilities applied all-or-nothing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupDef {
    name: String,
    members: Vec<String>,
}

impl GroupDef {
    pub fn new<S: Into<String>>(name: impl Into<String>, members: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            members: members.into_iter().map(Into::into).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }
}

/// Frozen, process-wide definitions
#[derive(Debug, Default)]
pub struct Registry {
    concepts: BTreeMap<String, ConceptDef>,
    modifiers: BTreeMap<String, ModifierDef>,
    groups: BTreeMap<String, GroupDef>,
    machines: BTreeMap<String, StateMachineTemplate>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn concept(&self, name: &str) -> Option<&ConceptDef> {
        self.concepts.get(name)
    }

    pub fn modifier(&self, name: &str) -> Option<&ModifierDef> {
        self.modifiers.get(name)
    }

    pub fn group(&self, name: &str) -> Option<&GroupDef> {
        self.groups.get(name)
    }

    pub fn state_machine(&self, name: &str) -> Option<&StateMachineTemplate> {
        self.machines.get(name)
    }

    /// Look up a concept or modifier by name
    pub fn capability(&self, name: &str) -> Option<CapabilityRef<'_>> {
        self.concepts
            .get(name)
            .map(CapabilityRef::Concept)
            .or_else(|| self.modifiers.get(name).map(CapabilityRef::Modifier))
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.capability(name).is_some()
    }

    pub fn concept_names(&self) -> impl Iterator<Item = &str> {
        self.concepts.keys().map(String::as_str)
    }

    pub fn modifier_names(&self) -> impl Iterator<Item = &str> {
        self.modifiers.keys().map(String::as_str)
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn summary(&self) -> RegistrySummary {
        RegistrySummary {
            concepts: self
                .concepts
                .values()
                .map(|c| CapabilityRef::Concept(c).into())
                .collect(),
            modifiers: self
                .modifiers
                .values()
                .map(|m| CapabilityRef::Modifier(m).into())
                .collect(),
            groups: self.groups.values().cloned().collect(),
            state_machines: self.machines.values().map(StateMachineTemplate::summary).collect(),
        }
    }
}

/// Serializable description of a registry
#[derive(Debug, Clone, Serialize)]
pub struct RegistrySummary {
    pub concepts: Vec<CapabilitySummary>,
    pub modifiers: Vec<CapabilitySummary>,
    pub groups: Vec<GroupDef>,
    pub state_machines: Vec<MachineSummary>,
}

/// Collects definitions and validates them as a whole
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    registry: Registry,
    problems: Vec<String>,
}

impl RegistryBuilder {
    pub fn concept(&mut self, def: ConceptDef) -> &mut Self {
        let name = def.name().to_string();
        if self.claim(&name) {
            self.registry.concepts.insert(name, def);
        }
        self
    }

    pub fn modifier(&mut self, def: ModifierDef) -> &mut Self {
        let name = def.name().to_string();
        if self.claim(&name) {
            self.registry.modifiers.insert(name, def);
        }
        self
    }

    pub fn group(&mut self, def: GroupDef) -> &mut Self {
        let name = def.name().to_string();
        if self.claim(&name) {
            self.registry.groups.insert(name, def);
        }
        self
    }

    /// Register a validated state machine template
    pub fn state_machine(&mut self, template: StateMachineTemplate) -> &mut Self {
        let name = template.name().to_string();
        if self.registry.machines.contains_key(&name) {
            self.problems
                .push(format!("state machine {} registered twice", name));
        } else {
            self.registry.machines.insert(name, template);
        }
        self
    }

    // Concepts, modifiers and groups share one namespace
    fn claim(&mut self, name: &str) -> bool {
        if name.trim().is_empty() {
            self.problems.push("capability names must not be empty".into());
            return false;
        }
        let taken = self.registry.concepts.contains_key(name)
            || self.registry.modifiers.contains_key(name)
            || self.registry.groups.contains_key(name);
        if taken {
            self.problems.push(format!("{} registered twice", name));
        }
        !taken
    }

    /// Freeze the registry, running every cross-definition check
    pub fn build(mut self) -> Result<Registry> {
        let registry = &self.registry;

        for group in registry.groups.values() {
            if group.members.is_empty() {
                self.problems.push(format!("group {} has no members", group.name));
            }
            let mut seen = BTreeSet::new();
            for member in &group.members {
                if !seen.insert(member) {
                    self.problems
                        .push(format!("group {} lists {} twice", group.name, member));
                }
                if !registry.is_known(member) {
                    self.problems.push(format!(
                        "group {} names unknown capability {}",
                        group.name, member
                    ));
                }
            }
        }

        let machine_refs = registry
            .concepts
            .values()
            .filter_map(|c| c.machine().map(|m| (c.name(), m)))
            .chain(
                registry
                    .modifiers
                    .values()
                    .filter_map(|m| m.machine().map(|t| (m.name(), t))),
            );
        for (owner, machine) in machine_refs {
            if !registry.machines.contains_key(machine) {
                self.problems
                    .push(format!("{} names unknown state machine {}", owner, machine));
            }
        }

        if let Some(problem) = self.problems.into_iter().next() {
            return Err(RuntimeError::InvalidDefinition(problem));
        }

        tracing::debug!(
            concepts = self.registry.concepts.len(),
            modifiers = self.registry.modifiers.len(),
            groups = self.registry.groups.len(),
            machines = self.registry.machines.len(),
            "registry frozen"
        );
        Ok(self.registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modus_types::ValueShape;

    #[test]
    fn test_lookup_by_kind() {
        let mut builder = Registry::builder();
        builder
            .concept(ConceptDef::new("Counter").expect("count", ValueShape::Int))
            .modifier(ModifierDef::new("Premium"));
        let registry = builder.build().unwrap();

        assert!(registry.capability("Counter").unwrap().is_concept());
        assert!(!registry.capability("Premium").unwrap().is_concept());
        assert!(registry.capability("Missing").is_none());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut builder = Registry::builder();
        builder
            .concept(ConceptDef::new("Tagged"))
            .modifier(ModifierDef::new("Tagged"));
        assert!(matches!(
            builder.build(),
            Err(RuntimeError::InvalidDefinition(msg)) if msg.contains("twice")
        ));
    }

    #[test]
    fn test_group_members_must_exist() {
        let mut builder = Registry::builder();
        builder
            .modifier(ModifierDef::new("Premium"))
            .group(GroupDef::new("Pro", ["Premium", "Ghost"]));
        assert!(matches!(
            builder.build(),
            Err(RuntimeError::InvalidDefinition(msg)) if msg.contains("Ghost")
        ));
    }

    #[test]
    fn test_machine_reference_must_exist() {
        let mut builder = Registry::builder();
        builder.concept(ConceptDef::new("Order").state_machine("OrderFlow"));
        assert!(builder.build().is_err());

        let mut builder = Registry::builder();
        builder
            .state_machine(
                StateMachineTemplate::new("OrderFlow", ["Open", "Closed"], [("Open", vec!["Closed"])])
                    .unwrap(),
            )
            .concept(ConceptDef::new("Order").state_machine("OrderFlow"));
        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_summary_lists_everything() {
        let mut builder = Registry::builder();
        builder
            .concept(ConceptDef::new("Counter").expect("count", ValueShape::Int))
            .modifier(ModifierDef::new("Premium").declare("features", ValueShape::List))
            .group(GroupDef::new("Pro", ["Premium"]));
        let summary = builder.build().unwrap().summary();

        assert_eq!(summary.concepts.len(), 1);
        assert_eq!(summary.modifiers[0].kind, "modifier");
        assert_eq!(summary.groups[0].members(), ["Premium".to_string()]);
    }
}
