//! Concept and modifier definitions
//!
//! A concept is an immutable contract: an expected state shape plus
//! methods. A modifier is attachable at runtime and carries `on_add` /
//! `on_remove` transforms over the entity's state map.

use crate::error::{Result, RuntimeError};
use modus_types::{StateMap, Value, ValueShape};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Declared state shape: key to expected value shape
pub type Shape = BTreeMap<String, ValueShape>;

/// A method body. Operates on the entity's state only.
pub type MethodFn = dyn Fn(&mut StateMap, &[Value]) -> std::result::Result<Value, String> + Send + Sync;

/// A state transform run when a modifier is attached or detached
pub type HookFn = dyn Fn(&mut StateMap) -> std::result::Result<(), String> + Send + Sync;

/// Named method bodies
#[derive(Clone, Default)]
pub struct MethodTable {
    methods: BTreeMap<String, Arc<MethodFn>>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<F>(&mut self, name: impl Into<String>, body: F)
    where
        F: Fn(&mut StateMap, &[Value]) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(body));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<MethodFn>> {
        self.methods.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.methods.keys()).finish()
    }
}

/// Check that `state` satisfies every key of `shape`
pub fn check_shape(capability: &str, shape: &Shape, state: &StateMap) -> Result<()> {
    for (key, expected) in shape {
        let found = state.get(key);
        if !found.is_some_and(|value| expected.admits(value)) {
            return Err(RuntimeError::ConceptShapeMismatch {
                capability: capability.to_string(),
                key: key.clone(),
                expected: *expected,
                found: found.map(Value::shape),
            });
        }
    }
    Ok(())
}

/// A capability contract
#[derive(Debug, Clone)]
pub struct ConceptDef {
    name: String,
    expected: Shape,
    methods: MethodTable,
    state_machine: Option<String>,
}

impl ConceptDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expected: Shape::new(),
            methods: MethodTable::new(),
            state_machine: None,
        }
    }

    /// Require `key` to be present with the given shape
    pub fn expect(mut self, key: impl Into<String>, shape: ValueShape) -> Self {
        self.expected.insert(key.into(), shape);
        self
    }

    pub fn method<F>(mut self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut StateMap, &[Value]) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.methods.insert(name, body);
        self
    }

    /// Entities implementing this concept carry the named state machine
    pub fn state_machine(mut self, template: impl Into<String>) -> Self {
        self.state_machine = Some(template.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expected(&self) -> &Shape {
        &self.expected
    }

    pub fn methods(&self) -> &MethodTable {
        &self.methods
    }

    pub fn machine(&self) -> Option<&str> {
        self.state_machine.as_deref()
    }
}

/// A runtime-attachable capability
#[derive(Clone)]
pub struct ModifierDef {
    name: String,
    declares: Shape,
    on_add: Option<Arc<HookFn>>,
    on_remove: Option<Arc<HookFn>>,
    methods: MethodTable,
    state_machine: Option<String>,
}

impl ModifierDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declares: Shape::new(),
            on_add: None,
            on_remove: None,
            methods: MethodTable::new(),
            state_machine: None,
        }
    }

    /// A modifier whose `on_add` writes the given defaults and whose
    /// `on_remove` deletes the same keys
    pub fn declarative(name: impl Into<String>, fields: Vec<(String, ValueShape, Value)>) -> Self {
        let keys: Vec<String> = fields.iter().map(|(key, _, _)| key.clone()).collect();
        let defaults: Vec<(String, Value)> = fields
            .iter()
            .map(|(key, _, value)| (key.clone(), value.clone()))
            .collect();

        let mut def = Self::new(name);
        for (key, shape, _) in fields {
            def.declares.insert(key, shape);
        }
        def.on_add(move |state| {
            for (key, value) in &defaults {
                state.insert(key.clone(), value.clone());
            }
            Ok(())
        })
        .on_remove(move |state| {
            for key in &keys {
                state.remove(key);
            }
            Ok(())
        })
    }

    /// Declare a key this modifier contributes while attached
    pub fn declare(mut self, key: impl Into<String>, shape: ValueShape) -> Self {
        self.declares.insert(key.into(), shape);
        self
    }

    pub fn on_add<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut StateMap) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.on_add = Some(Arc::new(hook));
        self
    }

    pub fn on_remove<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut StateMap) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.on_remove = Some(Arc::new(hook));
        self
    }

    pub fn method<F>(mut self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut StateMap, &[Value]) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.methods.insert(name, body);
        self
    }

    pub fn state_machine(mut self, template: impl Into<String>) -> Self {
        self.state_machine = Some(template.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn declares(&self) -> &Shape {
        &self.declares
    }

    pub fn add_hook(&self) -> Option<&Arc<HookFn>> {
        self.on_add.as_ref()
    }

    pub fn remove_hook(&self) -> Option<&Arc<HookFn>> {
        self.on_remove.as_ref()
    }

    pub fn methods(&self) -> &MethodTable {
        &self.methods
    }

    pub fn machine(&self) -> Option<&str> {
        self.state_machine.as_deref()
    }
}

impl fmt::Debug for ModifierDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModifierDef")
            .field("name", &self.name)
            .field("declares", &self.declares)
            .field("on_add", &self.on_add.is_some())
            .field("on_remove", &self.on_remove.is_some())
            .field("methods", &self.methods)
            .field("state_machine", &self.state_machine)
            .finish()
    }
}

/// Either kind of capability definition
#[derive(Debug, Clone, Copy)]
pub enum CapabilityRef<'a> {
    Concept(&'a ConceptDef),
    Modifier(&'a ModifierDef),
}

impl<'a> CapabilityRef<'a> {
    pub fn name(&self) -> &'a str {
        match self {
            CapabilityRef::Concept(c) => c.name(),
            CapabilityRef::Modifier(m) => m.name(),
        }
    }

    pub fn methods(&self) -> &'a MethodTable {
        match self {
            CapabilityRef::Concept(c) => c.methods(),
            CapabilityRef::Modifier(m) => m.methods(),
        }
    }

    /// Keys this capability requires while active
    pub fn shape(&self) -> &'a Shape {
        match self {
            CapabilityRef::Concept(c) => c.expected(),
            CapabilityRef::Modifier(m) => m.declares(),
        }
    }

    pub fn machine(&self) -> Option<&'a str> {
        match self {
            CapabilityRef::Concept(c) => c.machine(),
            CapabilityRef::Modifier(m) => m.machine(),
        }
    }

    pub fn is_concept(&self) -> bool {
        matches!(self, CapabilityRef::Concept(_))
    }
}

/// Serializable description of a definition
#[derive(Debug, Clone, Serialize)]
pub struct CapabilitySummary {
    pub name: String,
    pub kind: &'static str,
    pub shape: Shape,
    pub methods: Vec<String>,
    pub state_machine: Option<String>,
}

impl From<CapabilityRef<'_>> for CapabilitySummary {
    fn from(cap: CapabilityRef<'_>) -> Self {
        Self {
            name: cap.name().to_string(),
            kind: if cap.is_concept() { "concept" } else { "modifier" },
            shape: cap.shape().clone(),
            methods: cap.methods().names().map(str::to_string).collect(),
            state_machine: cap.machine().map(str::to_string),
        }
    }
}
