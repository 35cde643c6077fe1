//! Slots - the unit of storage inside an arena

use crate::entity::Entity;
use modus_types::Value;
use serde::{Deserialize, Serialize};

/// What a slot was allocated to hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotKind {
    Entity,
    PlainValue,
}

/// Slot contents
#[derive(Debug, Clone)]
pub enum SlotPayload {
    Value(Value),
    Entity(Box<Entity>),
}

impl SlotPayload {
    pub fn kind(&self) -> SlotKind {
        match self {
            SlotPayload::Value(_) => SlotKind::PlainValue,
            SlotPayload::Entity(_) => SlotKind::Entity,
        }
    }
}

/// A slot in an arena's slot table
///
/// A slot is live while its count is at least one. When the count
/// reaches zero the payload is dropped and the slot stays behind as a
/// tombstone; offsets are never handed out twice.
#[derive(Debug)]
pub struct Slot {
    kind: SlotKind,
    count: u32,
    payload: Option<SlotPayload>,
}

impl Slot {
    pub(crate) fn new(payload: SlotPayload) -> Self {
        Self {
            kind: payload.kind(),
            count: 1,
            payload: Some(payload),
        }
    }

    pub fn kind(&self) -> SlotKind {
        self.kind
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_live(&self) -> bool {
        self.count > 0
    }

    pub fn payload(&self) -> Option<&SlotPayload> {
        self.payload.as_ref()
    }

    pub(crate) fn payload_mut(&mut self) -> Option<&mut SlotPayload> {
        self.payload.as_mut()
    }

    pub(crate) fn increment(&mut self) -> u32 {
        self.count += 1;
        self.count
    }

    /// Drop one count; tombstones the slot when the last one goes.
    ///
    /// Panics if the count is already zero: that can only happen if the
    /// runtime's own bookkeeping is broken.
    pub(crate) fn decrement(&mut self) -> u32 {
        self.count = match self.count.checked_sub(1) {
            Some(count) => count,
            None => panic!("slot reference count underflow ({:?} slot)", self.kind),
        };
        if self.count == 0 {
            self.payload = None;
        }
        self.count
    }
}
