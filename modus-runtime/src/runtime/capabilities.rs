//! Capability operations: attach, detach, groups and acquisition

use super::{Runtime, Txn};
use crate::capability::{CapExpr, CapabilityRef};
use crate::entity::Entity;
use crate::error::{Result, RuntimeError};
use modus_types::{Address, Value};
use std::collections::BTreeSet;

/// Direction of a group application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupOp {
    Add,
    Remove,
}

impl Txn<'_> {
    /// Attach a concept or modifier to `entity`
    ///
    /// Order of checks: presence, context permission, ambiguity. Then the
    /// modifier's `on_add` runs, the capability becomes active, its state
    /// machine (if any) is installed and the entity is re-validated.
    pub(crate) fn attach(&self, entity: &mut Entity, name: &str) -> Result<()> {
        let cap = self
            .registry
            .capability(name)
            .ok_or_else(|| RuntimeError::UnknownCapability(name.to_string()))?;
        if entity.has_active(name) {
            return Err(RuntimeError::AlreadyPresent(name.to_string()));
        }
        self.contexts.check(entity.id(), name)?;
        self.check_ambiguity(entity, cap)?;

        match cap {
            CapabilityRef::Modifier(modifier) => {
                if let Some(hook) = modifier.add_hook() {
                    hook(entity.state_mut()).map_err(|reason| RuntimeError::HookFailed {
                        capability: name.to_string(),
                        reason,
                    })?;
                }
                entity.push_modifier(name);
            }
            CapabilityRef::Concept(_) => entity.push_concept(name),
        }

        if let Some(machine) = cap.machine() {
            let template = self
                .registry
                .state_machine(machine)
                .ok_or_else(|| RuntimeError::UnknownStateMachine(machine.to_string()))?;
            if let Some(key) = template.state_key() {
                entity
                    .state_mut()
                    .insert(key.to_string(), Value::str(template.initial()));
            }
            entity.set_machine(Some(template.instantiate()));
        }

        self.validate(entity)?;
        tracing::debug!(entity = %entity.id(), capability = name, "capability attached");
        Ok(())
    }

    /// Detach a concept or modifier from `entity`
    ///
    /// Concepts leave their state keys in place; modifiers run `on_remove`.
    pub(crate) fn detach(&self, entity: &mut Entity, name: &str) -> Result<()> {
        let cap = self
            .registry
            .capability(name)
            .ok_or_else(|| RuntimeError::UnknownCapability(name.to_string()))?;
        if !entity.has_active(name) {
            return Err(RuntimeError::NotPresent(name.to_string()));
        }
        self.contexts.check(entity.id(), name)?;

        if let CapabilityRef::Modifier(modifier) = cap {
            if let Some(hook) = modifier.remove_hook() {
                hook(entity.state_mut()).map_err(|reason| RuntimeError::HookFailed {
                    capability: name.to_string(),
                    reason,
                })?;
            }
        }
        entity.remove_capability(name);

        if let Some(machine) = cap.machine() {
            let key = self
                .registry
                .state_machine(machine)
                .and_then(|t| t.state_key());
            if let Some(key) = key {
                entity.state_mut().remove(key);
            }
            entity.set_machine(None);
        }

        self.validate(entity)?;
        tracing::debug!(entity = %entity.id(), capability = name, "capability detached");
        Ok(())
    }

    /// Reject a capability whose methods or state machine collide with an
    /// active one
    fn check_ambiguity(&self, entity: &Entity, incoming: CapabilityRef<'_>) -> Result<()> {
        for method in incoming.methods().names() {
            let provider = entity.active().find(|active| {
                self.registry
                    .capability(active)
                    .is_some_and(|cap| cap.methods().contains(method))
            });
            if let Some(first) = provider {
                return Err(RuntimeError::AmbiguousCapability {
                    name: method.to_string(),
                    first: first.to_string(),
                    second: incoming.name().to_string(),
                });
            }
        }

        if let (Some(machine), Some(_)) = (incoming.machine(), entity.machine()) {
            let first = entity
                .active()
                .find(|active| {
                    self.registry
                        .capability(active)
                        .is_some_and(|cap| cap.machine().is_some())
                })
                .unwrap_or("entity");
            return Err(RuntimeError::AmbiguousCapability {
                name: machine.to_string(),
                first: first.to_string(),
                second: incoming.name().to_string(),
            });
        }
        Ok(())
    }

    /// Apply every member of a group, wrapping the first failure
    pub(crate) fn apply_group(
        &self,
        entity: &mut Entity,
        group: &str,
        members: &[String],
        op: GroupOp,
    ) -> Result<()> {
        let ordered: Vec<&String> = match op {
            GroupOp::Add => members.iter().collect(),
            GroupOp::Remove => members.iter().rev().collect(),
        };
        for member in ordered {
            let step = match op {
                GroupOp::Add => self.attach(entity, member),
                GroupOp::Remove => self.detach(entity, member),
            };
            step.map_err(|source| RuntimeError::GroupApplicationFailed {
                group: group.to_string(),
                member: member.clone(),
                source: Box::new(source),
            })?;
        }
        Ok(())
    }
}

impl Runtime {
    /// Evaluate a capability expression such as `Premium + Admin`
    pub fn has(&self, address: Address, expr: &str) -> Result<bool> {
        let expr = CapExpr::parse(expr)?;
        self.has_expr(address, &expr)
    }

    pub fn has_expr(&self, address: Address, expr: &CapExpr) -> Result<bool> {
        Ok(expr.eval(self.heap.entity(address)?))
    }

    pub fn add_modifier(&mut self, address: Address, modifier: &str) -> Result<()> {
        self.require_modifier(modifier)?;
        self.mutate(address, |txn, entity| txn.attach(entity, modifier))
    }

    pub fn remove_modifier(&mut self, address: Address, modifier: &str) -> Result<()> {
        self.require_modifier(modifier)?;
        self.mutate(address, |txn, entity| txn.detach(entity, modifier))
    }

    /// Attach a concept or modifier at runtime
    pub fn attach(&mut self, address: Address, capability: &str) -> Result<()> {
        self.mutate(address, |txn, entity| txn.attach(entity, capability))
    }

    /// Detach a concept or modifier at runtime
    pub fn detach(&mut self, address: Address, capability: &str) -> Result<()> {
        self.mutate(address, |txn, entity| txn.detach(entity, capability))
    }

    /// Apply a group all-or-nothing
    ///
    /// Members are added in declaration order and removed in reverse.
    pub fn apply_group(&mut self, address: Address, group: &str, op: GroupOp) -> Result<()> {
        let registry = self.shared_registry();
        let def = registry
            .group(group)
            .ok_or_else(|| RuntimeError::UnknownGroup(group.to_string()))?;
        self.mutate(address, |txn, entity| {
            txn.apply_group(entity, group, def.members(), op)
        })?;
        tracing::debug!(%address, group, ?op, "group applied");
        Ok(())
    }

    /// Required capabilities the entity does not currently have
    pub fn missing_capabilities(
        &self,
        address: Address,
        required: &[&str],
    ) -> Result<BTreeSet<String>> {
        let entity = self.heap.entity(address)?;
        Ok(required
            .iter()
            .filter(|name| !entity.has_active(name))
            .map(|name| name.to_string())
            .collect())
    }

    /// Ask the acquisition policy whether `missing` may be acquired
    pub fn can_acquire(&self, address: Address, missing: &BTreeSet<String>) -> Result<bool> {
        let entity = self.heap.entity(address)?;
        Ok(self
            .policy
            .can_acquire(&self.registry, &self.contexts, entity, missing))
    }

    /// Attach every missing capability from `required`, all-or-nothing
    ///
    /// Returns the names that were acquired, in request order.
    pub fn acquire_capabilities(&mut self, address: Address, required: &[&str]) -> Result<Vec<String>> {
        let missing = self.missing_capabilities(address, required)?;
        if missing.is_empty() {
            return Ok(Vec::new());
        }
        if !self.can_acquire(address, &missing)? {
            return Err(RuntimeError::PermissionDenied {
                capability: missing.into_iter().collect::<Vec<_>>().join(", "),
                context: "acquire policy".to_string(),
            });
        }

        let mut ordered: Vec<String> = Vec::new();
        for name in required {
            if missing.contains(*name) && !ordered.iter().any(|n| n.as_str() == *name) {
                ordered.push(name.to_string());
            }
        }
        self.mutate(address, |txn, entity| {
            txn.apply_group(entity, "acquire", &ordered, GroupOp::Add)
        })?;
        tracing::debug!(%address, acquired = ordered.len(), "capabilities acquired");
        Ok(ordered)
    }

    fn require_modifier(&self, name: &str) -> Result<()> {
        match self.registry.capability(name) {
            Some(CapabilityRef::Modifier(_)) => Ok(()),
            Some(CapabilityRef::Concept(_)) => Err(RuntimeError::InvalidDefinition(format!(
                "{} is a concept, not a modifier",
                name
            ))),
            None => Err(RuntimeError::UnknownCapability(name.to_string())),
        }
    }
}
