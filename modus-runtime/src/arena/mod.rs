//! Arena allocator and address table
//!
//! Arenas are liveness domains. Each owns a slot table that only grows and
//! a stack of scope frames. Slot liveness is tracked by scope counting:
//! counts are only ever added by a scope (on allocation, `retain` or a
//! sanctioned `reference`) and only ever removed by that scope (`release`
//! or scope exit). An arena whose scope stack and live set are both empty
//! is torn down.
//!
//! Cross-entity references stored in state are weak and never counted;
//! dereferencing a stale one fails with `DanglingAddress`.

mod scope;
mod slot;

pub use scope::ScopeFrame;
pub use slot::{Slot, SlotKind, SlotPayload};

use crate::entity::Entity;
use crate::error::{Result, RuntimeError};
use modus_types::{Address, ArenaId, ScopeId, Value};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Size limits applied by the heap
#[derive(Debug, Clone, Copy)]
pub struct HeapLimits {
    pub max_slots_per_arena: usize,
}

impl Default for HeapLimits {
    fn default() -> Self {
        Self {
            max_slots_per_arena: 1 << 20,
        }
    }
}

/// A single arena
#[derive(Debug)]
pub struct Arena {
    id: ArenaId,
    slots: Vec<Slot>,
    live: BTreeSet<u32>,
    scopes: Vec<ScopeFrame>,
}

impl Arena {
    fn new(id: ArenaId) -> Self {
        Self {
            id,
            slots: Vec::new(),
            live: BTreeSet::new(),
            scopes: vec![ScopeFrame::new()],
        }
    }

    pub fn id(&self) -> ArenaId {
        self.id
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn innermost_scope(&self) -> Option<ScopeId> {
        self.scopes.last().map(|s| s.id())
    }

    pub fn scopes(&self) -> &[ScopeFrame] {
        &self.scopes
    }

    /// Live addresses in offset order
    pub fn live_addresses(&self) -> impl Iterator<Item = Address> + '_ {
        self.live.iter().map(move |offset| Address::new(self.id, *offset))
    }

    fn is_droppable(&self) -> bool {
        self.scopes.is_empty() && self.live.is_empty()
    }

    fn slot(&self, address: Address) -> Option<&Slot> {
        self.slots.get(address.offset() as usize)
    }

    fn drop_count(&mut self, address: Address) -> bool {
        let offset = address.offset();
        let Some(slot) = self.slots.get_mut(offset as usize) else {
            panic!("scope frame holds {} outside the slot table", address);
        };
        if slot.decrement() == 0 {
            self.live.remove(&offset);
            true
        } else {
            false
        }
    }
}

/// Check that a value may be stored inside `arena` without creating an
/// uncounted strong alias or a cross-arena reference
pub fn check_storable(arena: ArenaId, value: &Value) -> Result<()> {
    for reference in value.references() {
        if !reference.weak {
            return Err(RuntimeError::UncountedAlias {
                address: reference.address,
            });
        }
        if reference.address.arena() != arena {
            return Err(RuntimeError::CrossArenaReference {
                address: reference.address,
                arena,
            });
        }
    }
    Ok(())
}

/// Offset for the next slot; offsets must fit the 32-bit half of an address
fn next_offset(arena: ArenaId, len: usize, limit: usize) -> Result<u32> {
    let exhausted = RuntimeError::ArenaExhausted { arena, limit };
    if len >= limit {
        return Err(exhausted);
    }
    u32::try_from(len).map_err(|_| exhausted)
}

/// What happened when a scope exited
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeExit {
    pub scope: ScopeId,
    /// Counts given back by the frame
    pub released: usize,
    /// Slots whose count reached zero
    pub dropped: Vec<Address>,
    /// Whether the arena itself was torn down
    pub torn_down: bool,
}

/// Heap-wide counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeapStats {
    pub arenas: usize,
    pub live_slots: usize,
    pub tombstones: usize,
    pub torn_down: usize,
}

/// The address table: every arena plus the ids of torn-down ones
#[derive(Debug)]
pub struct Heap {
    arenas: BTreeMap<ArenaId, Arena>,
    torn_down: BTreeSet<ArenaId>,
    next_arena: u32,
    limits: HeapLimits,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    pub fn new() -> Self {
        Self::with_limits(HeapLimits::default())
    }

    pub fn with_limits(limits: HeapLimits) -> Self {
        Self {
            arenas: BTreeMap::new(),
            torn_down: BTreeSet::new(),
            next_arena: 1,
            limits,
        }
    }

    /// Create an arena and enter its root scope
    pub fn create_arena(&mut self) -> Result<ArenaId> {
        let id = ArenaId(self.next_arena);
        self.next_arena = self
            .next_arena
            .checked_add(1)
            .ok_or(RuntimeError::ArenaIdsExhausted)?;
        self.arenas.insert(id, Arena::new(id));
        tracing::debug!(arena = %id, "arena created");
        Ok(id)
    }

    pub fn arena(&self, id: ArenaId) -> Result<&Arena> {
        self.arenas.get(&id).ok_or(RuntimeError::UnknownArena(id))
    }

    fn arena_mut(&mut self, id: ArenaId) -> Result<&mut Arena> {
        self.arenas.get_mut(&id).ok_or(RuntimeError::UnknownArena(id))
    }

    pub fn has_arena(&self, id: ArenaId) -> bool {
        self.arenas.contains_key(&id)
    }

    pub fn is_torn_down(&self, id: ArenaId) -> bool {
        self.torn_down.contains(&id)
    }

    /// Push a new scope frame
    pub fn enter_scope(&mut self, arena: ArenaId) -> Result<ScopeId> {
        let arena = self.arena_mut(arena)?;
        let frame = ScopeFrame::new();
        let id = frame.id();
        arena.scopes.push(frame);
        tracing::trace!(arena = %arena.id, scope = %id, depth = arena.scopes.len(), "scope entered");
        Ok(id)
    }

    /// Pop the innermost scope frame, releasing every count it holds
    pub fn exit_scope(&mut self, arena_id: ArenaId) -> Result<ScopeExit> {
        let arena = self.arena_mut(arena_id)?;
        let mut frame = arena
            .scopes
            .pop()
            .ok_or(RuntimeError::NoActiveScope(arena_id))?;

        let held = frame.drain_reversed();
        let released = held.len();
        let dropped: Vec<Address> = held
            .into_iter()
            .filter(|address| arena.drop_count(*address))
            .collect();

        let torn_down = self.maybe_teardown(arena_id);
        tracing::debug!(
            arena = %arena_id,
            scope = %frame.id(),
            released,
            dropped = dropped.len(),
            torn_down,
            "scope exited"
        );

        Ok(ScopeExit {
            scope: frame.id(),
            released,
            dropped,
            torn_down,
        })
    }

    /// Exit `scope`, which must be the arena's innermost frame
    pub fn exit_scope_checked(&mut self, arena: ArenaId, scope: ScopeId) -> Result<ScopeExit> {
        let innermost = self
            .arena(arena)?
            .innermost_scope()
            .ok_or(RuntimeError::NoActiveScope(arena))?;
        if innermost != scope {
            return Err(RuntimeError::ScopeMismatch {
                arena,
                innermost: innermost.to_string(),
                requested: scope.to_string(),
            });
        }
        self.exit_scope(arena)
    }

    fn maybe_teardown(&mut self, id: ArenaId) -> bool {
        let Some(arena) = self.arenas.get(&id) else {
            return false;
        };
        if !arena.is_droppable() {
            if arena.scopes.is_empty() {
                tracing::trace!(arena = %id, live = arena.live.len(), "teardown deferred");
            }
            return false;
        }
        self.arenas.remove(&id);
        self.torn_down.insert(id);
        tracing::debug!(arena = %id, "arena torn down");
        true
    }

    /// Allocate a plain value; the innermost scope holds the first count
    pub fn allocate(&mut self, arena: ArenaId, value: Value) -> Result<Address> {
        check_storable(arena, &value)?;
        self.allocate_payload(arena, SlotPayload::Value(value))
    }

    pub(crate) fn allocate_entity(&mut self, arena: ArenaId, entity: Entity) -> Result<Address> {
        self.allocate_payload(arena, SlotPayload::Entity(Box::new(entity)))
    }

    fn allocate_payload(&mut self, arena_id: ArenaId, payload: SlotPayload) -> Result<Address> {
        let limit = self.limits.max_slots_per_arena;
        let arena = self.arena_mut(arena_id)?;
        let offset = next_offset(arena_id, arena.slots.len(), limit)?;
        let address = Address::new(arena_id, offset);
        let frame = arena
            .scopes
            .last_mut()
            .ok_or(RuntimeError::NoActiveScope(arena_id))?;
        frame.hold(address);
        arena.slots.push(Slot::new(payload));
        arena.live.insert(offset);
        tracing::trace!(%address, "slot allocated");
        Ok(address)
    }

    /// Look up a live slot
    pub fn slot(&self, address: Address) -> Result<&Slot> {
        let dangling = RuntimeError::DanglingAddress { address };
        let arena = self.arenas.get(&address.arena()).ok_or(dangling.clone())?;
        match arena.slot(address) {
            Some(slot) if slot.is_live() => Ok(slot),
            _ => Err(dangling),
        }
    }

    /// Dereference an address
    pub fn deref(&self, address: Address) -> Result<&SlotPayload> {
        self.slot(address)?
            .payload()
            .ok_or(RuntimeError::DanglingAddress { address })
    }

    /// Dereference an address that must belong to `arena`
    pub fn deref_in(&self, arena: ArenaId, address: Address) -> Result<&SlotPayload> {
        if address.arena() != arena {
            return Err(RuntimeError::DanglingAddress { address });
        }
        self.deref(address)
    }

    fn deref_mut(&mut self, address: Address) -> Result<&mut SlotPayload> {
        let dangling = RuntimeError::DanglingAddress { address };
        let arena = self.arenas.get_mut(&address.arena()).ok_or(dangling.clone())?;
        match arena.slots.get_mut(address.offset() as usize) {
            Some(slot) if slot.is_live() => slot.payload_mut().ok_or(dangling),
            _ => Err(dangling),
        }
    }

    /// Dereference a plain value slot
    pub fn value(&self, address: Address) -> Result<&Value> {
        match self.deref(address)? {
            SlotPayload::Value(value) => Ok(value),
            SlotPayload::Entity(_) => Err(RuntimeError::NotAValue(address)),
        }
    }

    pub fn entity(&self, address: Address) -> Result<&Entity> {
        match self.deref(address)? {
            SlotPayload::Entity(entity) => Ok(entity),
            SlotPayload::Value(_) => Err(RuntimeError::NotAnEntity(address)),
        }
    }

    pub fn entity_mut(&mut self, address: Address) -> Result<&mut Entity> {
        match self.deref_mut(address)? {
            SlotPayload::Entity(entity) => Ok(entity),
            SlotPayload::Value(_) => Err(RuntimeError::NotAnEntity(address)),
        }
    }

    /// Current count of a slot; zero for tombstones and unknown addresses
    pub fn ref_count(&self, address: Address) -> u32 {
        self.slot(address).map(|s| s.count()).unwrap_or(0)
    }

    pub fn is_live(&self, address: Address) -> bool {
        self.slot(address).is_ok()
    }

    /// Add a count held by the innermost scope of the address's arena
    pub fn retain(&mut self, address: Address) -> Result<u32> {
        let scope = self
            .arena(address.arena())
            .map_err(|_| RuntimeError::DanglingAddress { address })?
            .innermost_scope()
            .ok_or(RuntimeError::NoActiveScope(address.arena()))?;
        self.reference(address, scope).map(|_| self.ref_count(address))
    }

    /// Sanctioned copy: register a counted alias in a specific live scope
    pub fn reference(&mut self, address: Address, scope: ScopeId) -> Result<Address> {
        self.slot(address)?;
        let arena_id = address.arena();
        let arena = self.arena_mut(arena_id)?;
        let frame = arena
            .scopes
            .iter_mut()
            .find(|frame| frame.id() == scope)
            .ok_or(RuntimeError::UncountedAlias { address })?;
        frame.hold(address);
        let count = arena.slots[address.offset() as usize].increment();
        tracing::trace!(%address, %scope, count, "reference registered");
        Ok(address)
    }

    /// Give back one count, searching scope frames innermost first
    pub fn release(&mut self, address: Address) -> Result<u32> {
        self.slot(address)?;
        let arena_id = address.arena();
        let arena = self.arena_mut(arena_id)?;
        let held = arena
            .scopes
            .iter_mut()
            .rev()
            .any(|frame| frame.unhold(address));
        if !held {
            return Err(RuntimeError::UncountedAlias { address });
        }
        let dropped = arena.drop_count(address);
        let count = if dropped { 0 } else { arena.slots[address.offset() as usize].count() };
        tracing::trace!(%address, count, "count released");
        if dropped {
            self.maybe_teardown(arena_id);
        }
        Ok(count)
    }

    /// Produce a weak, uncounted reference to a live slot
    pub fn downgrade(&self, address: Address) -> Result<Value> {
        self.slot(address)?;
        Ok(Value::Weak(address))
    }

    pub fn arena_ids(&self) -> impl Iterator<Item = ArenaId> + '_ {
        self.arenas.keys().copied()
    }

    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            arenas: self.arenas.len(),
            torn_down: self.torn_down.len(),
            ..HeapStats::default()
        };
        for arena in self.arenas.values() {
            stats.live_slots += arena.live.len();
            stats.tombstones += arena.slots.len() - arena.live.len();
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_deref() {
        let mut heap = Heap::new();
        let arena = heap.create_arena().unwrap();
        let addr = heap.allocate(arena, Value::Int(7)).unwrap();

        assert_eq!(heap.value(addr).unwrap(), &Value::Int(7));
        assert_eq!(heap.ref_count(addr), 1);
        assert_eq!(addr.arena(), arena);
    }

    #[test]
    fn test_scope_exit_tombstones_slots() {
        let mut heap = Heap::new();
        let arena = heap.create_arena().unwrap();
        heap.enter_scope(arena).unwrap();
        let inner = heap.allocate(arena, Value::Int(1)).unwrap();

        let exit = heap.exit_scope(arena).unwrap();
        assert_eq!(exit.dropped, vec![inner]);
        assert!(!exit.torn_down);
        assert_eq!(
            heap.deref(inner).unwrap_err(),
            RuntimeError::DanglingAddress { address: inner }
        );
    }

    #[test]
    fn test_retained_slot_survives_inner_exit() {
        let mut heap = Heap::new();
        let arena = heap.create_arena().unwrap();
        let root = heap.arena(arena).unwrap().innermost_scope().unwrap();
        heap.enter_scope(arena).unwrap();
        let addr = heap.allocate(arena, Value::str("kept")).unwrap();
        heap.reference(addr, root).unwrap();
        assert_eq!(heap.ref_count(addr), 2);

        heap.exit_scope(arena).unwrap();
        assert_eq!(heap.ref_count(addr), 1);
        assert!(heap.value(addr).is_ok());
    }

    #[test]
    fn test_root_exit_tears_down() {
        let mut heap = Heap::new();
        let arena = heap.create_arena().unwrap();
        let addr = heap.allocate(arena, Value::Null).unwrap();

        let exit = heap.exit_scope(arena).unwrap();
        assert!(exit.torn_down);
        assert!(heap.is_torn_down(arena));
        assert!(!heap.has_arena(arena));
        assert!(heap.deref(addr).is_err());
        assert_eq!(heap.exit_scope(arena), Err(RuntimeError::UnknownArena(arena)));
    }

    #[test]
    fn test_release_to_zero() {
        let mut heap = Heap::new();
        let arena = heap.create_arena().unwrap();
        let addr = heap.allocate(arena, Value::Bool(true)).unwrap();
        assert_eq!(heap.retain(addr).unwrap(), 2);
        assert_eq!(heap.release(addr).unwrap(), 1);
        assert_eq!(heap.release(addr).unwrap(), 0);
        assert!(!heap.is_live(addr));
        assert_eq!(
            heap.release(addr),
            Err(RuntimeError::DanglingAddress { address: addr })
        );
        // the root scope is still open, so the arena stays
        assert!(heap.has_arena(arena));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_offsets_never_wrap() {
        let arena = ArenaId(1);
        let past = u32::MAX as usize + 1;
        assert_eq!(next_offset(arena, u32::MAX as usize, usize::MAX), Ok(u32::MAX));
        assert_eq!(
            next_offset(arena, past, usize::MAX),
            Err(RuntimeError::ArenaExhausted {
                arena,
                limit: usize::MAX,
            })
        );
    }

    #[test]
    fn test_arena_ids_exhausted() {
        let mut heap = Heap::new();
        heap.next_arena = u32::MAX - 1;
        assert_eq!(heap.create_arena(), Ok(ArenaId(u32::MAX - 1)));
        assert_eq!(heap.create_arena(), Err(RuntimeError::ArenaIdsExhausted));
        assert_eq!(heap.arena_ids().count(), 1);
    }

    #[test]
    fn test_foreign_arena_deref() {
        let mut heap = Heap::new();
        let a = heap.create_arena().unwrap();
        let b = heap.create_arena().unwrap();
        let addr = heap.allocate(a, Value::Int(1)).unwrap();

        assert!(heap.deref_in(a, addr).is_ok());
        assert_eq!(
            heap.deref_in(b, addr).unwrap_err(),
            RuntimeError::DanglingAddress { address: addr }
        );
    }

    #[test]
    fn test_strong_address_in_value_is_rejected() {
        let mut heap = Heap::new();
        let arena = heap.create_arena().unwrap();
        let target = heap.allocate(arena, Value::Int(1)).unwrap();

        let err = heap
            .allocate(arena, Value::list(vec![Value::Address(target)]))
            .unwrap_err();
        assert_eq!(err, RuntimeError::UncountedAlias { address: target });

        let weak = heap.downgrade(target).unwrap();
        assert!(heap.allocate(arena, Value::list(vec![weak])).is_ok());
    }

    #[test]
    fn test_cross_arena_weak_rejected() {
        let mut heap = Heap::new();
        let a = heap.create_arena().unwrap();
        let b = heap.create_arena().unwrap();
        let target = heap.allocate(a, Value::Int(1)).unwrap();
        let weak = heap.downgrade(target).unwrap();

        assert!(matches!(
            heap.allocate(b, weak),
            Err(RuntimeError::CrossArenaReference { .. })
        ));
    }

    #[test]
    fn test_reference_into_unknown_scope() {
        let mut heap = Heap::new();
        let arena = heap.create_arena().unwrap();
        let addr = heap.allocate(arena, Value::Int(1)).unwrap();

        assert_eq!(
            heap.reference(addr, ScopeId::new()),
            Err(RuntimeError::UncountedAlias { address: addr })
        );
        assert_eq!(heap.ref_count(addr), 1);
    }

    #[test]
    fn test_arena_limit() {
        let mut heap = Heap::with_limits(HeapLimits {
            max_slots_per_arena: 1,
        });
        let arena = heap.create_arena().unwrap();
        heap.allocate(arena, Value::Int(1)).unwrap();
        assert!(matches!(
            heap.allocate(arena, Value::Int(2)),
            Err(RuntimeError::ArenaExhausted { limit: 1, .. })
        ));
    }

    #[test]
    fn test_exit_checked_mismatch() {
        let mut heap = Heap::new();
        let arena = heap.create_arena().unwrap();
        let root = heap.arena(arena).unwrap().innermost_scope().unwrap();
        heap.enter_scope(arena).unwrap();
        assert!(matches!(
            heap.exit_scope_checked(arena, root),
            Err(RuntimeError::ScopeMismatch { .. })
        ));
    }

    #[test]
    fn test_stats() {
        let mut heap = Heap::new();
        let arena = heap.create_arena().unwrap();
        let a = heap.allocate(arena, Value::Int(1)).unwrap();
        heap.allocate(arena, Value::Int(2)).unwrap();
        heap.release(a).unwrap();

        let stats = heap.stats();
        assert_eq!(stats.arenas, 1);
        assert_eq!(stats.live_slots, 1);
        assert_eq!(stats.tombstones, 1);
    }
}
