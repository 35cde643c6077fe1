//! Scope frames - the only holders of slot counts

use modus_types::{Address, ScopeId};

/// One lexical scope on an arena's scope stack
///
/// Every count a scope contributes is recorded here so that exiting the
/// scope can give all of them back, innermost first.
#[derive(Debug)]
pub struct ScopeFrame {
    id: ScopeId,
    held: Vec<Address>,
}

impl ScopeFrame {
    pub fn new() -> Self {
        Self {
            id: ScopeId::new(),
            held: Vec::new(),
        }
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// Addresses this frame holds a count for, in acquisition order
    pub fn held(&self) -> &[Address] {
        &self.held
    }

    pub(crate) fn hold(&mut self, address: Address) {
        self.held.push(address);
    }

    /// Give back the most recent count held for `address`
    pub(crate) fn unhold(&mut self, address: Address) -> bool {
        match self.held.iter().rposition(|a| *a == address) {
            Some(pos) => {
                self.held.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Take all held counts, most recent first
    pub(crate) fn drain_reversed(&mut self) -> Vec<Address> {
        let mut held = std::mem::take(&mut self.held);
        held.reverse();
        held
    }
}

impl Default for ScopeFrame {
    fn default() -> Self {
        Self::new()
    }
}
