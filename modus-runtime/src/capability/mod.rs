//! Capability definitions, the registry, expressions and acquisition policy

mod definition;
mod expr;
mod manifest;
mod policy;
mod registry;

pub use definition::{
    check_shape, CapabilityRef, CapabilitySummary, ConceptDef, HookFn, MethodFn, MethodTable,
    ModifierDef, Shape,
};
pub use expr::{CapExpr, CapabilitySet, Dispatch, MAX_NESTING};
pub use manifest::{
    yaml_to_value, ConceptEntry, FieldEntry, GroupEntry, MachineEntry, Manifest, ModifierEntry,
};
pub use policy::{AcquirePolicy, DefaultAcquirePolicy};
pub use registry::{GroupDef, Registry, RegistryBuilder, RegistrySummary};
