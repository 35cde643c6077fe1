//! Modus - arena-scoped memory and dynamic capability runtime
//!
//! This crate is the runtime core behind the `modus` language surface.
//! It knows nothing about syntax; a front end drives it through the
//! [`Runtime`] coordinator.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Runtime                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐  │
//! │  │   Registry   │   │ ContextStack │   │  AcquirePolicy   │  │
//! │  │ concepts     │   │ allow / deny │   │                  │  │
//! │  │ modifiers    │   │ / grant      │   └──────────────────┘  │
//! │  │ groups       │   └──────┬───────┘                         │
//! │  │ machines     │          │ permission checks               │
//! │  └──────┬───────┘          ▼                                 │
//! │         │        ┌──────────────────────────────────────┐    │
//! │         └──────▶ │                Heap                  │    │
//! │                  │  ┌──────────┐  ┌──────────┐          │    │
//! │                  │  │ Arena 1  │  │ Arena 2  │  ...     │    │
//! │                  │  │ scopes   │  │ scopes   │          │    │
//! │                  │  │ slots ───┼─▶│ entities │          │    │
//! │                  │  └──────────┘  └──────────┘          │    │
//! │                  └──────────────────────────────────────┘    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Core Concepts
//!
//! ## Arenas and scope counting
//!
//! An **arena** owns a slot table and a stack of scope frames. Slot
//! counts are held only by scope frames: allocation, `retain` and the
//! sanctioned `reference` add one, `release` and scope exit give them
//! back. A slot whose count reaches zero becomes a tombstone, and an
//! arena with no scopes and no live slots is torn down.
//!
//! Strong addresses may never be copied into stored values. Entity state
//! refers to other entities through weak references, which are checked on
//! every dereference and fail with `DanglingAddress` once stale.
//!
//! ## Entities and capabilities
//!
//! An **entity** is a state map plus a set of active capabilities.
//! **Concepts** are declared at construction and describe an expected
//! state shape and methods; **modifiers** are attached and detached at
//! runtime through `on_add` / `on_remove` transforms. **Groups** apply
//! several capabilities all-or-nothing. Every mutation is transactional.
//!
//! ## State machines
//!
//! A concept or modifier may carry a registered state machine; the
//! entity's current state only moves along declared transitions.
//!
//! ## Contexts and negotiation
//!
//! **Runtime contexts** narrow or widen which capabilities may be
//! attached while they are active. The **negotiation gateway** merges
//! externally offered capabilities only after a validator accepts them.
//!
//! # Example
//!
//! ```rust
//! use modus_runtime::capability::{GroupDef, ModifierDef, Registry};
//! use modus_runtime::context::RuntimeContext;
//! use modus_runtime::{GroupOp, Runtime};
//! use modus_types::{StateMap, Value, ValueShape};
//!
//! let mut builder = Registry::builder();
//! builder
//!     .modifier(ModifierDef::declarative(
//!         "Premium",
//!         vec![("tier".into(), ValueShape::Str, Value::str("gold"))],
//!     ))
//!     .modifier(ModifierDef::new("Admin"))
//!     .group(GroupDef::new("Staff", ["Premium", "Admin"]));
//! let mut runtime = Runtime::new(builder.build().unwrap());
//!
//! let arena = runtime.create_arena().unwrap();
//! let user = runtime.create_entity(arena, StateMap::new(), &[]).unwrap();
//!
//! {
//!     let _sandbox = runtime.enter(RuntimeContext::sandbox("sandbox", ["Premium"])).unwrap();
//!     assert!(runtime.apply_group(user, "Staff", GroupOp::Add).is_err());
//! }
//! runtime.apply_group(user, "Staff", GroupOp::Add).unwrap();
//! assert!(runtime.has(user, "Premium + Admin").unwrap());
//! ```

// Modules
pub mod arena;
pub mod capability;
pub mod config;
pub mod context;
pub mod entity;
pub mod error;
pub mod machine;
pub mod negotiation;
pub mod runtime;

// Re-exports for convenience
pub use arena::{Heap, HeapLimits, HeapStats, ScopeExit, SlotKind, SlotPayload};
pub use capability::{
    AcquirePolicy, CapExpr, CapabilitySet, ConceptDef, DefaultAcquirePolicy, Dispatch, GroupDef,
    Manifest, ModifierDef, Registry, RegistryBuilder,
};
pub use config::{ConfigError, RuntimeConfig};
pub use context::{ContextGuard, ContextPolicy, ContextStack, RuntimeContext};
pub use entity::{Entity, EntityView};
pub use error::{ErrorKind, Result, RuntimeError};
pub use machine::{MachineInstance, StateMachineTemplate};
pub use negotiation::{
    CapabilityOffer, KeyedDigestValidator, OfferValidator, OriginAllowlist, RejectAll,
};
pub use runtime::{GroupOp, Runtime};

pub use modus_types::{Address, ArenaId, ContextId, EntityId, ScopeId, StateMap, Value, ValueShape};
