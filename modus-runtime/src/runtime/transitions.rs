//! State machine transitions

use super::{Runtime, Txn};
use crate::entity::Entity;
use crate::error::{Result, RuntimeError};
use modus_types::{Address, Value};

impl Txn<'_> {
    pub(crate) fn transition(&self, entity: &mut Entity, target: &str) -> Result<()> {
        let instance = entity.machine().ok_or(RuntimeError::NoStateMachine)?;
        let template = self
            .registry
            .state_machine(instance.template())
            .ok_or_else(|| RuntimeError::UnknownStateMachine(instance.template().to_string()))?;
        instance.check(template, target)?;
        let from = instance.current().to_string();

        if let Some(hook) = template.hook() {
            hook(entity.state_mut(), &from, target).map_err(|reason| RuntimeError::HookFailed {
                capability: template.name().to_string(),
                reason,
            })?;
        }
        if let Some(machine) = entity.machine_mut() {
            machine.set_current(target);
        }
        if let Some(key) = template.state_key() {
            entity
                .state_mut()
                .insert(key.to_string(), Value::str(target));
        }

        tracing::debug!(
            entity = %entity.id(),
            machine = template.name(),
            from = %from,
            to = target,
            "transition"
        );
        Ok(())
    }
}

impl Runtime {
    /// Move the entity's state machine to `target`
    ///
    /// Fails with `IllegalTransition` unless `target` is allowed from the
    /// current state; terminal states reject every move.
    pub fn transition_to(&mut self, address: Address, target: &str) -> Result<()> {
        self.mutate(address, |txn, entity| txn.transition(entity, target))
    }

    /// Current state of the entity's machine, if it has one
    pub fn current_state(&self, address: Address) -> Result<Option<String>> {
        Ok(self
            .heap
            .entity(address)?
            .machine()
            .map(|m| m.current().to_string()))
    }
}
