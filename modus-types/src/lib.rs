//! Shared types for modus
//!
//! This crate provides the identity and handle types used across the
//! modus runtime, together with the dynamic [`Value`] model stored in
//! arena slots and entity state maps.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

mod value;

pub use value::{Reference, StateMap, Value, ValueShape};

/// Arena identifier
///
/// Issued monotonically by the heap and never reused, so an id that
/// belonged to a torn-down arena stays meaningless forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArenaId(pub u32);

impl ArenaId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ArenaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "arena:{}", self.0)
    }
}

/// Raw address of a slot
///
/// The high 32 bits carry the owning arena, the low 32 bits the slot
/// offset inside that arena. User code sees a single opaque integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub u64);

impl Address {
    /// Pack an arena id and slot offset into an address
    pub fn new(arena: ArenaId, offset: u32) -> Self {
        Self(((arena.0 as u64) << 32) | offset as u64)
    }

    /// Reinterpret a raw integer as an address
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The opaque integer form
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// The arena this address belongs to
    pub fn arena(&self) -> ArenaId {
        ArenaId((self.0 >> 32) as u32)
    }

    /// Slot offset within the owning arena
    pub fn offset(&self) -> u32 {
        (self.0 & 0xffff_ffff) as u32
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}:{}", self.arena().0, self.offset())
    }
}

impl From<Address> for u64 {
    fn from(address: Address) -> Self {
        address.0
    }
}

/// Entity identity
///
/// Independent of the entity's address: it stays the same for as long as
/// the entity lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    /// Create a new unique entity id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e:{}", &self.0.to_string()[..8])
    }
}

/// Scope frame identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeId(pub u64);

static SCOPE_COUNTER: AtomicU64 = AtomicU64::new(1);

impl ScopeId {
    /// Create a new unique scope id
    pub fn new() -> Self {
        Self(SCOPE_COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for ScopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope:{}", self.0)
    }
}

/// Runtime context identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextId(pub u64);

static CONTEXT_COUNTER: AtomicU64 = AtomicU64::new(1);

impl ContextId {
    /// Create a new unique context id
    pub fn new() -> Self {
        Self(CONTEXT_COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_packing() {
        let addr = Address::new(ArenaId(7), 42);
        assert_eq!(addr.arena(), ArenaId(7));
        assert_eq!(addr.offset(), 42);
        assert_eq!(Address::from_raw(addr.raw()), addr);
        assert_eq!(addr.to_string(), "@7:42");
    }

    #[test]
    fn test_address_high_offset() {
        let addr = Address::new(ArenaId(1), u32::MAX);
        assert_eq!(addr.arena(), ArenaId(1));
        assert_eq!(addr.offset(), u32::MAX);
    }

    #[test]
    fn test_entity_id_uniqueness() {
        assert_ne!(EntityId::new(), EntityId::new());
    }

    #[test]
    fn test_scope_ordering() {
        let s1 = ScopeId::new();
        let s2 = ScopeId::new();
        assert!(s1 < s2);
    }
}
