//! Runtime coordinator
//!
//! The runtime owns:
//! - The heap (arenas, scopes, slots)
//! - The frozen capability registry
//! - The runtime context stack
//! - The acquisition policy
//!
//! Every mutating entity operation runs as a transaction: the entity is
//! snapshotted, the change applied and the result re-validated against
//! every active concept and modifier. Any failure restores the snapshot.

mod capabilities;
mod transitions;

pub use capabilities::GroupOp;

use crate::arena::{check_storable, Heap, HeapStats, ScopeExit, SlotPayload};
use crate::capability::{check_shape, AcquirePolicy, DefaultAcquirePolicy, Manifest, Registry};
use crate::config::{ConfigError, RuntimeConfig};
use crate::context::{ContextGuard, ContextStack, RuntimeContext};
use crate::entity::{Entity, EntityView};
use crate::error::{Result, RuntimeError};
use modus_types::{Address, ArenaId, ScopeId, StateMap, Value, ValueShape};
use std::fmt;
use std::sync::Arc;

/// The main runtime coordinator
///
/// # Example
///
/// ```
/// use modus_runtime::capability::{ConceptDef, Registry};
/// use modus_runtime::Runtime;
/// use modus_types::{StateMap, Value, ValueShape};
///
/// let mut builder = Registry::builder();
/// builder.concept(
///     ConceptDef::new("Counter")
///         .expect("count", ValueShape::Int)
///         .method("increment", |state, _| {
///             let next = state.get("count").and_then(Value::as_int).unwrap_or(0) + 1;
///             state.insert("count".into(), Value::Int(next));
///             Ok(Value::Int(next))
///         }),
/// );
/// let mut runtime = Runtime::new(builder.build().unwrap());
///
/// let arena = runtime.create_arena().unwrap();
/// let mut state = StateMap::new();
/// state.insert("count".into(), Value::Int(0));
/// let counter = runtime.create_entity(arena, state, &["Counter"]).unwrap();
///
/// assert_eq!(runtime.invoke(counter, "increment", &[]).unwrap(), Value::Int(1));
/// ```
pub struct Runtime {
    registry: Arc<Registry>,
    heap: Heap,
    contexts: ContextStack,
    policy: Box<dyn AcquirePolicy>,
}

impl Runtime {
    /// Create a runtime with default limits
    pub fn new(registry: Registry) -> Self {
        Self::with_config(registry, &RuntimeConfig::default())
    }

    /// Create a runtime with the limits from `config`
    pub fn with_config(registry: Registry, config: &RuntimeConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            heap: Heap::with_limits(config.heap_limits()),
            contexts: ContextStack::new(config.limits.max_context_depth),
            policy: Box::new(DefaultAcquirePolicy),
        }
    }

    /// Create a runtime from a config file's settings, loading its
    /// manifest when one is named
    pub fn from_config(config: &RuntimeConfig) -> std::result::Result<Self, ConfigError> {
        let registry = match config.manifest_path() {
            Some(path) => Manifest::from_file(&path)?.build()?,
            None => Registry::default(),
        };
        Ok(Self::with_config(registry, config))
    }

    /// Replace the acquisition policy
    pub fn with_policy<P: AcquirePolicy + 'static>(mut self, policy: P) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn shared_registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn contexts(&self) -> &ContextStack {
        &self.contexts
    }

    // ===== Arenas and scopes =====

    /// Create an arena and enter its root scope
    pub fn create_arena(&mut self) -> Result<ArenaId> {
        self.heap.create_arena()
    }

    pub fn enter_scope(&mut self, arena: ArenaId) -> Result<ScopeId> {
        self.heap.enter_scope(arena)
    }

    pub fn exit_scope(&mut self, arena: ArenaId) -> Result<ScopeExit> {
        self.heap.exit_scope(arena)
    }

    /// Run `body` inside a fresh scope, exiting it on every return path
    pub fn with_scope<T, F>(&mut self, arena: ArenaId, body: F) -> Result<T>
    where
        F: FnOnce(&mut Runtime, ScopeId) -> Result<T>,
    {
        let scope = self.heap.enter_scope(arena)?;
        let result = body(self, scope);
        let unwound = self.unwind_scope(arena, scope);
        let value = result?;
        unwound?;
        Ok(value)
    }

    /// Exit frames down to and including `scope`
    ///
    /// Frames the body left open are released first and then reported as
    /// a `ScopeMismatch`. Frames outside `scope` are never touched.
    fn unwind_scope(&mut self, arena: ArenaId, scope: ScopeId) -> Result<()> {
        let open = self
            .heap
            .arena(arena)?
            .scopes()
            .iter()
            .any(|frame| frame.id() == scope);
        if !open {
            return Err(RuntimeError::NoActiveScope(arena));
        }

        let mut stray = None;
        loop {
            let exit = self.heap.exit_scope(arena)?;
            if exit.scope == scope {
                break;
            }
            tracing::warn!(%arena, stray = %exit.scope, %scope, "unbalanced scope released");
            stray.get_or_insert(exit.scope);
        }
        match stray {
            Some(innermost) => Err(RuntimeError::ScopeMismatch {
                arena,
                innermost: innermost.to_string(),
                requested: scope.to_string(),
            }),
            None => Ok(()),
        }
    }

    // ===== Slots =====

    pub fn allocate(&mut self, arena: ArenaId, value: Value) -> Result<Address> {
        self.heap.allocate(arena, value)
    }

    pub fn deref(&self, address: Address) -> Result<&SlotPayload> {
        self.heap.deref(address)
    }

    pub fn retain(&mut self, address: Address) -> Result<u32> {
        self.heap.retain(address)
    }

    pub fn release(&mut self, address: Address) -> Result<u32> {
        self.heap.release(address)
    }

    /// Register a counted alias of `address` in `scope`
    pub fn reference(&mut self, address: Address, scope: ScopeId) -> Result<Address> {
        self.heap.reference(address, scope)
    }

    /// A weak reference suitable for storing in entity state
    pub fn downgrade(&self, address: Address) -> Result<Value> {
        self.heap.downgrade(address)
    }

    pub fn stats(&self) -> HeapStats {
        self.heap.stats()
    }

    // ===== Entities =====

    /// Construct an entity implementing `implements`
    ///
    /// Fails with `ConceptShapeMismatch` when `state` does not satisfy a
    /// concept's expected shape, and with `AmbiguousCapability` when two
    /// concepts provide the same method.
    pub fn create_entity(
        &mut self,
        arena: ArenaId,
        state: StateMap,
        implements: &[&str],
    ) -> Result<Address> {
        self.heap.arena(arena)?;
        let txn = Txn {
            registry: self.registry.as_ref(),
            contexts: &self.contexts,
            arena,
        };

        let mut entity = Entity::new(state, Vec::new());
        for name in implements {
            if txn.registry.concept(name).is_none() {
                return Err(RuntimeError::UnknownCapability(name.to_string()));
            }
            txn.attach(&mut entity, name)?;
        }
        txn.validate(&entity)?;

        let id = entity.id();
        let address = self.heap.allocate_entity(arena, entity)?;
        tracing::debug!(entity = %id, %address, concepts = implements.len(), "entity created");
        Ok(address)
    }

    pub fn entity(&self, address: Address) -> Result<&Entity> {
        self.heap.entity(address)
    }

    pub fn entity_view(&self, address: Address) -> Result<EntityView> {
        Ok(self.heap.entity(address)?.view(address))
    }

    pub fn get_state(&self, address: Address, key: &str) -> Result<Option<Value>> {
        Ok(self.heap.entity(address)?.get(key).cloned())
    }

    /// Assign a state field
    ///
    /// Assigning the key a state machine mirrors its current state into
    /// is a transition request.
    pub fn set_state(&mut self, address: Address, key: &str, value: Value) -> Result<()> {
        if let Some((machine, mirrored)) = self.mirror_key(address)? {
            if mirrored == key {
                return match value {
                    Value::Str(target) => self.transition_to(address, &target),
                    other => Err(RuntimeError::ConceptShapeMismatch {
                        capability: machine,
                        key: key.to_string(),
                        expected: ValueShape::Str,
                        found: Some(other.shape()),
                    }),
                };
            }
        }
        let key = key.to_string();
        self.mutate(address, |_, entity| {
            entity.state_mut().insert(key, value);
            Ok(())
        })
    }

    /// Remove a state field; fails if an active capability declares it
    pub fn remove_state(&mut self, address: Address, key: &str) -> Result<Option<Value>> {
        self.mutate(address, |_, entity| Ok(entity.state_mut().remove(key)))
    }

    /// Call a method provided by one of the entity's active capabilities
    pub fn invoke(&mut self, address: Address, method: &str, args: &[Value]) -> Result<Value> {
        let arena = address.arena();
        for arg in args {
            check_storable(arena, arg)?;
        }
        let entity = self.heap.entity(address)?;
        let body = entity
            .active()
            .find_map(|name| {
                self.registry
                    .capability(name)
                    .and_then(|cap| cap.methods().get(method).cloned())
            })
            .ok_or_else(|| RuntimeError::UnknownMethod(method.to_string()))?;

        self.mutate(address, |txn, entity| {
            let out = body(entity.state_mut(), args).map_err(|reason| RuntimeError::MethodFailed {
                method: method.to_string(),
                reason,
            })?;
            check_storable(txn.arena, &out)?;
            Ok(out)
        })
    }

    // ===== Contexts =====

    /// Push a runtime context; it is revoked when the guard drops
    pub fn enter(&self, context: RuntimeContext) -> Result<ContextGuard> {
        self.contexts.enter(context)
    }

    fn mirror_key(&self, address: Address) -> Result<Option<(String, String)>> {
        let entity = self.heap.entity(address)?;
        Ok(entity
            .machine()
            .and_then(|m| self.registry.state_machine(m.template()))
            .and_then(|t| {
                t.state_key()
                    .map(|key| (t.name().to_string(), key.to_string()))
            }))
    }

    /// Apply `op` to the entity at `address` transactionally
    pub(crate) fn mutate<T, F>(&mut self, address: Address, op: F) -> Result<T>
    where
        F: FnOnce(&Txn<'_>, &mut Entity) -> Result<T>,
    {
        let txn = Txn {
            registry: self.registry.as_ref(),
            contexts: &self.contexts,
            arena: address.arena(),
        };
        let entity = self.heap.entity_mut(address)?;
        let snapshot = entity.clone();

        let result = op(&txn, &mut *entity).and_then(|value| {
            txn.validate(entity)?;
            Ok(value)
        });
        if let Err(err) = &result {
            *entity = snapshot;
            tracing::warn!(%address, error = %err, "entity change rolled back");
        }
        result
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("registry", &self.registry)
            .field("heap", &self.heap)
            .field("contexts", &self.contexts)
            .finish_non_exhaustive()
    }
}

/// What a transactional step can see besides the entity itself
pub(crate) struct Txn<'a> {
    pub(crate) registry: &'a Registry,
    pub(crate) contexts: &'a ContextStack,
    pub(crate) arena: ArenaId,
}

impl Txn<'_> {
    /// Check the declared-key invariant and the aliasing rules
    pub(crate) fn validate(&self, entity: &Entity) -> Result<()> {
        for name in entity.active() {
            let cap = self
                .registry
                .capability(name)
                .ok_or_else(|| RuntimeError::UnknownCapability(name.to_string()))?;
            check_shape(name, cap.shape(), entity.state())?;
        }
        for value in entity.state().values() {
            check_storable(self.arena, value)?;
        }

        let Some(machine) = entity.machine() else {
            return Ok(());
        };
        let key = self
            .registry
            .state_machine(machine.template())
            .and_then(|t| t.state_key());
        if let Some(key) = key {
            match entity.get(key) {
                Some(Value::Str(current)) if current == machine.current() => {}
                other => {
                    return Err(RuntimeError::IllegalTransition {
                        from: machine.current().to_string(),
                        to: other.map_or_else(|| "nothing".to_string(), Value::to_string),
                    })
                }
            }
        }
        Ok(())
    }
}
