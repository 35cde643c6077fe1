//! State machine templates and instances
//!
//! A template is registered once with its finite state set and transition
//! relation. Well-formedness ("every referenced state is declared") is
//! checked when the template is built, never at transition time.

use crate::error::{Result, RuntimeError};
use modus_types::StateMap;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Side effect run on every successful transition, before the state
/// change becomes visible. Receives `(state, from, to)`.
pub type TransitionFn =
    dyn Fn(&mut StateMap, &str, &str) -> std::result::Result<(), String> + Send + Sync;

/// A registered state machine
#[derive(Clone)]
pub struct StateMachineTemplate {
    name: String,
    states: Vec<String>,
    transitions: BTreeMap<String, BTreeSet<String>>,
    state_key: Option<String>,
    on_transition: Option<Arc<TransitionFn>>,
}

impl StateMachineTemplate {
    /// Build and validate a template. The first state is the initial one;
    /// states without outgoing transitions are terminal.
    pub fn new<S, T, I>(
        name: impl Into<String>,
        states: impl IntoIterator<Item = S>,
        transitions: I,
    ) -> Result<Self>
    where
        S: Into<String>,
        T: IntoIterator<Item = S>,
        I: IntoIterator<Item = (S, T)>,
    {
        let name = name.into();
        let states: Vec<String> = states.into_iter().map(Into::into).collect();
        if states.is_empty() {
            return Err(RuntimeError::InvalidDefinition(format!(
                "state machine {} declares no states",
                name
            )));
        }

        let mut declared = BTreeSet::new();
        for state in &states {
            if !declared.insert(state.clone()) {
                return Err(RuntimeError::InvalidDefinition(format!(
                    "state machine {} declares {} twice",
                    name, state
                )));
            }
        }

        let mut relation: BTreeMap<String, BTreeSet<String>> = states
            .iter()
            .map(|s| (s.clone(), BTreeSet::new()))
            .collect();
        for (from, targets) in transitions {
            let from = from.into();
            let Some(allowed) = relation.get_mut(&from) else {
                return Err(RuntimeError::InvalidDefinition(format!(
                    "state machine {} has transitions from undeclared state {}",
                    name, from
                )));
            };
            for target in targets {
                let target = target.into();
                if !declared.contains(&target) {
                    return Err(RuntimeError::InvalidDefinition(format!(
                        "state machine {} transitions {} -> undeclared state {}",
                        name, from, target
                    )));
                }
                allowed.insert(target);
            }
        }

        Ok(Self {
            name,
            states,
            transitions: relation,
            state_key: None,
            on_transition: None,
        })
    }

    /// Mirror the current state into the entity's state map under `key`
    pub fn with_state_key(mut self, key: impl Into<String>) -> Self {
        self.state_key = Some(key.into());
        self
    }

    pub fn on_transition<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut StateMap, &str, &str) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.on_transition = Some(Arc::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn states(&self) -> &[String] {
        &self.states
    }

    pub fn initial(&self) -> &str {
        &self.states[0]
    }

    pub fn state_key(&self) -> Option<&str> {
        self.state_key.as_deref()
    }

    pub fn hook(&self) -> Option<&Arc<TransitionFn>> {
        self.on_transition.as_ref()
    }

    pub fn allowed(&self, from: &str) -> Option<&BTreeSet<String>> {
        self.transitions.get(from)
    }

    pub fn is_terminal(&self, state: &str) -> bool {
        self.allowed(state).is_some_and(BTreeSet::is_empty)
    }

    pub fn permits(&self, from: &str, to: &str) -> bool {
        self.allowed(from).is_some_and(|targets| targets.contains(to))
    }

    /// A fresh instance at the initial state
    pub fn instantiate(&self) -> MachineInstance {
        MachineInstance {
            template: self.name.clone(),
            current: self.initial().to_string(),
        }
    }

    pub fn summary(&self) -> MachineSummary {
        MachineSummary {
            name: self.name.clone(),
            states: self.states.clone(),
            transitions: self.transitions.clone(),
            state_key: self.state_key.clone(),
        }
    }
}

impl fmt::Debug for StateMachineTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachineTemplate")
            .field("name", &self.name)
            .field("states", &self.states)
            .field("transitions", &self.transitions)
            .field("state_key", &self.state_key)
            .finish()
    }
}

/// Serializable description of a template
#[derive(Debug, Clone, Serialize)]
pub struct MachineSummary {
    pub name: String,
    pub states: Vec<String>,
    pub transitions: BTreeMap<String, BTreeSet<String>>,
    pub state_key: Option<String>,
}

/// A state machine attached to one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineInstance {
    template: String,
    current: String,
}

impl MachineInstance {
    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    /// Check a move against the template without applying it
    pub fn check(&self, template: &StateMachineTemplate, target: &str) -> Result<()> {
        if template.permits(&self.current, target) {
            Ok(())
        } else {
            Err(RuntimeError::IllegalTransition {
                from: self.current.clone(),
                to: target.to_string(),
            })
        }
    }

    pub(crate) fn set_current(&mut self, state: impl Into<String>) {
        self.current = state.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> StateMachineTemplate {
        StateMachineTemplate::new(
            "Order",
            ["Created", "Paid", "Shipped", "Delivered", "Canceled"],
            [
                ("Created", vec!["Paid", "Canceled"]),
                ("Paid", vec!["Shipped", "Canceled"]),
                ("Shipped", vec!["Delivered"]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_initial_and_terminal() {
        let machine = order();
        assert_eq!(machine.initial(), "Created");
        assert!(machine.is_terminal("Delivered"));
        assert!(machine.is_terminal("Canceled"));
        assert!(!machine.is_terminal("Paid"));
    }

    #[test]
    fn test_instance_check() {
        let machine = order();
        let mut instance = machine.instantiate();
        assert_eq!(
            instance.check(&machine, "Shipped"),
            Err(RuntimeError::IllegalTransition {
                from: "Created".into(),
                to: "Shipped".into()
            })
        );
        assert!(instance.check(&machine, "Paid").is_ok());
        instance.set_current("Paid");
        assert!(instance.check(&machine, "Shipped").is_ok());
    }

    #[test]
    fn test_undeclared_target_rejected() {
        let err = StateMachineTemplate::new("Bad", ["A"], [("A", vec!["B"])]).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidDefinition(_)));
    }

    #[test]
    fn test_undeclared_source_rejected() {
        let err = StateMachineTemplate::new("Bad", ["A"], [("Z", vec!["A"])]).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidDefinition(_)));
    }

    #[test]
    fn test_empty_and_duplicate_states_rejected() {
        let no_transitions: Vec<(&str, Vec<&str>)> = vec![];
        assert!(StateMachineTemplate::new("Empty", Vec::<&str>::new(), no_transitions.clone()).is_err());
        assert!(StateMachineTemplate::new("Dup", ["A", "A"], no_transitions).is_err());
    }

    #[test]
    fn test_unknown_current_state_rejects() {
        let machine = order();
        assert!(!machine.permits("Lost", "Paid"));
    }
}
