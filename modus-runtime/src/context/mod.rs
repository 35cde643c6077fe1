//! Runtime contexts - scoped permission records
//!
//! Contexts are pushed with [`ContextStack::enter`] and popped when the
//! returned [`ContextGuard`] is dropped, so an early return or a `?`
//! still revokes the context. The effective permission for a capability
//! name is the verdict of the innermost context that is not silent on it;
//! with no such context the name is permitted.

use crate::error::{Result, RuntimeError};
use modus_types::{ContextId, EntityId};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// How a context treats capability names
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "names", rename_all = "lowercase")]
pub enum ContextPolicy {
    /// Sandbox allow-list: unlisted names are denied, listed names defer
    /// to the enclosing context
    Allow(BTreeSet<String>),
    /// Listed names are denied, others defer
    Deny(BTreeSet<String>),
    /// Listed names are permitted, others defer
    Grant(BTreeSet<String>),
}

/// Which entities a context applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Governs {
    All,
    Entity(EntityId),
}

/// A context's answer for one capability name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Permit,
    Deny,
    Silent,
}

fn names<S: Into<String>>(names: impl IntoIterator<Item = S>) -> BTreeSet<String> {
    names.into_iter().map(Into::into).collect()
}

/// A scoped permission record
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeContext {
    id: ContextId,
    label: String,
    policy: ContextPolicy,
    governs: Governs,
}

impl RuntimeContext {
    pub fn new(label: impl Into<String>, policy: ContextPolicy) -> Self {
        Self {
            id: ContextId::new(),
            label: label.into(),
            policy,
            governs: Governs::All,
        }
    }

    /// Allow-list context: only the listed capabilities may be acquired
    pub fn sandbox<S: Into<String>>(label: impl Into<String>, allowed: impl IntoIterator<Item = S>) -> Self {
        Self::new(label, ContextPolicy::Allow(names(allowed)))
    }

    pub fn deny<S: Into<String>>(label: impl Into<String>, denied: impl IntoIterator<Item = S>) -> Self {
        Self::new(label, ContextPolicy::Deny(names(denied)))
    }

    pub fn grant<S: Into<String>>(label: impl Into<String>, granted: impl IntoIterator<Item = S>) -> Self {
        Self::new(label, ContextPolicy::Grant(names(granted)))
    }

    /// Restrict this context to a single entity
    pub fn for_entity(mut self, entity: EntityId) -> Self {
        self.governs = Governs::Entity(entity);
        self
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn policy(&self) -> &ContextPolicy {
        &self.policy
    }

    pub fn governs(&self) -> Governs {
        self.governs
    }

    pub fn verdict(&self, entity: EntityId, capability: &str) -> Verdict {
        if let Governs::Entity(governed) = self.governs {
            if governed != entity {
                return Verdict::Silent;
            }
        }
        match &self.policy {
            ContextPolicy::Allow(allowed) if allowed.contains(capability) => Verdict::Silent,
            ContextPolicy::Allow(_) => Verdict::Deny,
            ContextPolicy::Deny(denied) if denied.contains(capability) => Verdict::Deny,
            ContextPolicy::Grant(granted) if granted.contains(capability) => Verdict::Permit,
            ContextPolicy::Deny(_) | ContextPolicy::Grant(_) => Verdict::Silent,
        }
    }
}

impl fmt::Display for RuntimeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.id)
    }
}

/// The stack of active contexts
#[derive(Debug, Clone)]
pub struct ContextStack {
    frames: Arc<RwLock<Vec<RuntimeContext>>>,
    max_depth: usize,
}

impl Default for ContextStack {
    fn default() -> Self {
        Self::new(64)
    }
}

impl ContextStack {
    pub fn new(max_depth: usize) -> Self {
        Self {
            frames: Arc::new(RwLock::new(Vec::new())),
            max_depth,
        }
    }

    /// Push a context; it stays active until the guard is dropped
    pub fn enter(&self, context: RuntimeContext) -> Result<ContextGuard> {
        let mut frames = self.frames.write();
        if frames.len() >= self.max_depth {
            return Err(RuntimeError::ContextDepthExceeded {
                limit: self.max_depth,
            });
        }
        let id = context.id;
        let position = frames.len();
        tracing::debug!(context = %context, depth = position + 1, "context entered");
        frames.push(context);
        Ok(ContextGuard {
            frames: Arc::clone(&self.frames),
            id,
            position,
        })
    }

    pub fn depth(&self) -> usize {
        self.frames.read().len()
    }

    /// Labels of the active contexts, outermost first
    pub fn labels(&self) -> Vec<String> {
        self.frames.read().iter().map(|c| c.label.clone()).collect()
    }

    /// Innermost non-silent verdict, or permitted at the root
    pub fn check(&self, entity: EntityId, capability: &str) -> Result<()> {
        let frames = self.frames.read();
        for context in frames.iter().rev() {
            match context.verdict(entity, capability) {
                Verdict::Silent => continue,
                Verdict::Permit => return Ok(()),
                Verdict::Deny => {
                    return Err(RuntimeError::PermissionDenied {
                        capability: capability.to_string(),
                        context: context.to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    pub fn permits(&self, entity: EntityId, capability: &str) -> bool {
        self.check(entity, capability).is_ok()
    }
}

/// Revokes its context when dropped
#[must_use = "the context is revoked as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ContextGuard {
    frames: Arc<RwLock<Vec<RuntimeContext>>>,
    id: ContextId,
    position: usize,
}

impl ContextGuard {
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Revoke now instead of at end of scope
    pub fn exit(self) {}
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let mut frames = self.frames.write();
        // An outer guard that already went has taken this frame with it
        if frames.get(self.position).is_some_and(|c| c.id == self.id) {
            let revoked = frames.len() - self.position;
            frames.truncate(self.position);
            tracing::debug!(context = %self.id, revoked, "context exited");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_permits() {
        let stack = ContextStack::default();
        assert!(stack.permits(EntityId::new(), "Anything"));
    }

    #[test]
    fn test_sandbox_narrows_parent() {
        let stack = ContextStack::default();
        let entity = EntityId::new();
        let _deny = stack.enter(RuntimeContext::deny("outer", ["Premium"])).unwrap();
        let _sandbox = stack
            .enter(RuntimeContext::sandbox("sandbox", ["Premium", "Basic"]))
            .unwrap();

        // listed in the sandbox, but the enclosing deny still applies
        assert!(!stack.permits(entity, "Premium"));
        assert!(stack.permits(entity, "Basic"));
        assert!(!stack.permits(entity, "Admin"));
    }

    #[test]
    fn test_grant_overrides_outer_deny() {
        let stack = ContextStack::default();
        let entity = EntityId::new();
        let _deny = stack.enter(RuntimeContext::deny("policy", ["Admin"])).unwrap();
        assert!(!stack.permits(entity, "Admin"));
        {
            let _grant = stack.enter(RuntimeContext::grant("with", ["Admin"])).unwrap();
            assert!(stack.permits(entity, "Admin"));
        }
        assert!(!stack.permits(entity, "Admin"));
    }

    #[test]
    fn test_guard_revokes_on_drop() {
        let stack = ContextStack::default();
        let entity = EntityId::new();
        let guard = stack.enter(RuntimeContext::sandbox("box", ["A"])).unwrap();
        assert_eq!(stack.depth(), 1);
        assert!(!stack.permits(entity, "B"));
        guard.exit();
        assert_eq!(stack.depth(), 0);
        assert!(stack.permits(entity, "B"));
    }

    #[test]
    fn test_revocation_on_error_path() {
        fn fails(stack: &ContextStack) -> Result<()> {
            let _guard = stack.enter(RuntimeContext::deny("tx", ["A"]))?;
            Err(RuntimeError::NotPresent("A".into()))
        }
        let stack = ContextStack::default();
        assert!(fails(&stack).is_err());
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn test_entity_scoped_context() {
        let stack = ContextStack::default();
        let alice = EntityId::new();
        let bob = EntityId::new();
        let _guard = stack
            .enter(RuntimeContext::deny("alice-only", ["Admin"]).for_entity(alice))
            .unwrap();
        assert!(!stack.permits(alice, "Admin"));
        assert!(stack.permits(bob, "Admin"));
    }

    #[test]
    fn test_out_of_order_drop() {
        let stack = ContextStack::default();
        let outer = stack.enter(RuntimeContext::deny("outer", ["A"])).unwrap();
        let inner = stack.enter(RuntimeContext::deny("inner", ["B"])).unwrap();
        drop(outer);
        assert_eq!(stack.depth(), 0);
        drop(inner);
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn test_depth_limit() {
        let stack = ContextStack::new(1);
        let _first = stack.enter(RuntimeContext::deny("a", ["X"])).unwrap();
        assert_eq!(
            stack.enter(RuntimeContext::deny("b", ["Y"])).unwrap_err(),
            RuntimeError::ContextDepthExceeded { limit: 1 }
        );
    }
}
