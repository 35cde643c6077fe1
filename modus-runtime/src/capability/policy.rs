//! Acquisition policy

use super::registry::Registry;
use crate::context::ContextStack;
use crate::entity::Entity;
use std::collections::BTreeSet;

/// Decides whether an entity may acquire a set of missing capabilities
pub trait AcquirePolicy: Send + Sync {
    fn can_acquire(
        &self,
        registry: &Registry,
        contexts: &ContextStack,
        entity: &Entity,
        missing: &BTreeSet<String>,
    ) -> bool;
}

/// Every missing name must have a definition the active contexts permit
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAcquirePolicy;

impl AcquirePolicy for DefaultAcquirePolicy {
    fn can_acquire(
        &self,
        registry: &Registry,
        contexts: &ContextStack,
        entity: &Entity,
        missing: &BTreeSet<String>,
    ) -> bool {
        missing
            .iter()
            .all(|name| registry.is_known(name) && contexts.permits(entity.id(), name))
    }
}

impl<F> AcquirePolicy for F
where
    F: Fn(&Entity, &BTreeSet<String>) -> bool + Send + Sync,
{
    fn can_acquire(
        &self,
        _registry: &Registry,
        _contexts: &ContextStack,
        entity: &Entity,
        missing: &BTreeSet<String>,
    ) -> bool {
        self(entity, missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::ModifierDef;
    use crate::context::RuntimeContext;
    use modus_types::StateMap;

    fn registry() -> Registry {
        let mut builder = Registry::builder();
        builder
            .modifier(ModifierDef::new("Premium"))
            .modifier(ModifierDef::new("Admin"));
        builder.build().unwrap()
    }

    fn missing(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_policy() {
        let registry = registry();
        let contexts = ContextStack::default();
        let entity = Entity::new(StateMap::new(), vec![]);
        let policy = DefaultAcquirePolicy;

        assert!(policy.can_acquire(&registry, &contexts, &entity, &missing(&["Premium", "Admin"])));
        assert!(!policy.can_acquire(&registry, &contexts, &entity, &missing(&["Ghost"])));

        let _guard = contexts.enter(RuntimeContext::deny("no-admin", ["Admin"])).unwrap();
        assert!(!policy.can_acquire(&registry, &contexts, &entity, &missing(&["Admin"])));
        assert!(policy.can_acquire(&registry, &contexts, &entity, &missing(&["Premium"])));
    }

    #[test]
    fn test_closure_policy() {
        let registry = registry();
        let contexts = ContextStack::default();
        let entity = Entity::new(StateMap::new(), vec![]);
        let at_most_one = |_: &Entity, missing: &BTreeSet<String>| missing.len() <= 1;

        assert!(at_most_one.can_acquire(&registry, &contexts, &entity, &missing(&["Premium"])));
        assert!(!at_most_one.can_acquire(&registry, &contexts, &entity, &missing(&["Premium", "Admin"])));
    }
}
