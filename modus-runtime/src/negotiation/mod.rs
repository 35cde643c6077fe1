//! Capability negotiation gateway
//!
//! Externally offered capabilities are never merged without passing a
//! validator first. Accepted offers go through the same attach and group
//! paths as local code, so context permissions and atomicity apply
//! unchanged.

mod validator;

pub use validator::{KeyedDigestValidator, OfferValidator, OriginAllowlist, RejectAll};

use crate::error::{Result, RuntimeError};
use crate::runtime::{GroupOp, Runtime};
use modus_types::Address;
use serde::{Deserialize, Serialize};

/// A set of capability names offered by an external party
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityOffer {
    pub origin: String,
    pub capabilities: Vec<String>,
    /// Hex-encoded digest over [`CapabilityOffer::canonical_bytes`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

#[derive(Serialize)]
struct Canonical<'a> {
    origin: &'a str,
    capabilities: &'a [String],
}

impl CapabilityOffer {
    pub fn new<S: Into<String>>(origin: impl Into<String>, capabilities: impl IntoIterator<Item = S>) -> Self {
        Self {
            origin: origin.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            digest: None,
        }
    }

    /// JSON encoding of everything but the digest
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let canonical = Canonical {
            origin: &self.origin,
            capabilities: &self.capabilities,
        };
        // Serializing a struct of strings cannot fail
        serde_json::to_vec(&canonical).unwrap_or_default()
    }

    /// Attach a keyed digest
    pub fn signed(mut self, key: &[u8; 32]) -> Self {
        self.digest = Some(KeyedDigestValidator::digest(key, &self).to_hex().to_string());
        self
    }
}

impl Runtime {
    /// Validate an external offer and merge it into the entity
    ///
    /// Names resolving to groups are applied through the group path;
    /// everything else is attached as a concept or modifier. Capabilities
    /// the entity already has are skipped. The merge is all-or-nothing.
    /// Returns the names that were newly attached.
    pub fn validate_and_merge<V>(
        &mut self,
        address: Address,
        offer: &CapabilityOffer,
        validator: &V,
    ) -> Result<Vec<String>>
    where
        V: OfferValidator + ?Sized,
    {
        self.entity(address)?;
        if let Err(reason) = validator.validate(offer) {
            tracing::debug!(%address, origin = %offer.origin, %reason, "offer rejected");
            return Err(RuntimeError::NegotiationRejected { reason });
        }

        let registry = self.shared_registry();
        let label = format!("offer:{}", offer.origin);
        let mut plan: Vec<String> = Vec::new();
        {
            let entity = self.entity(address)?;
            for name in &offer.capabilities {
                let members = match registry.group(name) {
                    Some(group) => group.members().to_vec(),
                    None => vec![name.clone()],
                };
                for member in members {
                    if !entity.has_active(&member) && !plan.contains(&member) {
                        plan.push(member);
                    }
                }
            }
        }

        self.mutate(address, |txn, entity| {
            txn.apply_group(entity, &label, &plan, GroupOp::Add)
        })?;
        tracing::debug!(%address, origin = %offer.origin, merged = plan.len(), "offer merged");
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_bytes_ignore_digest() {
        let offer = CapabilityOffer::new("partner", ["Premium"]);
        let signed = offer.clone().signed(&[1; 32]);
        assert_eq!(offer.canonical_bytes(), signed.canonical_bytes());
        assert_eq!(
            String::from_utf8(offer.canonical_bytes()).unwrap(),
            r#"{"origin":"partner","capabilities":["Premium"]}"#
        );
    }
}
