//! Offer validators

use super::CapabilityOffer;
use blake3::{Hash, Hasher};
use std::collections::BTreeSet;

/// Decides whether an external offer may be merged
///
/// `Err(reason)` rejects the offer; the reason is surfaced in
/// `NegotiationRejected`.
pub trait OfferValidator {
    fn validate(&self, offer: &CapabilityOffer) -> Result<(), String>;
}

impl<F> OfferValidator for F
where
    F: Fn(&CapabilityOffer) -> Result<(), String>,
{
    fn validate(&self, offer: &CapabilityOffer) -> Result<(), String> {
        self(offer)
    }
}

/// Rejects every offer
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectAll;

impl OfferValidator for RejectAll {
    fn validate(&self, offer: &CapabilityOffer) -> Result<(), String> {
        Err(format!("offers from {} are not accepted", offer.origin))
    }
}

/// Accepts offers only from listed origins
#[derive(Debug, Clone, Default)]
pub struct OriginAllowlist {
    origins: BTreeSet<String>,
}

impl OriginAllowlist {
    pub fn new<S: Into<String>>(origins: impl IntoIterator<Item = S>) -> Self {
        Self {
            origins: origins.into_iter().map(Into::into).collect(),
        }
    }
}

impl OfferValidator for OriginAllowlist {
    fn validate(&self, offer: &CapabilityOffer) -> Result<(), String> {
        if self.origins.contains(&offer.origin) {
            Ok(())
        } else {
            Err(format!("origin {} is not allowed", offer.origin))
        }
    }
}

/// Checks the offer's digest: a BLAKE3 keyed hash of its canonical bytes
#[derive(Clone)]
pub struct KeyedDigestValidator {
    key: [u8; 32],
}

impl KeyedDigestValidator {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Derive a key from a passphrase
    pub fn from_secret(secret: &str) -> Self {
        Self::new(blake3::derive_key("modus negotiation digest v1", secret.as_bytes()))
    }

    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    pub(crate) fn digest(key: &[u8; 32], offer: &CapabilityOffer) -> Hash {
        let mut hasher = Hasher::new_keyed(key);
        hasher.update(&offer.canonical_bytes());
        hasher.finalize()
    }
}

impl std::fmt::Debug for KeyedDigestValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedDigestValidator").finish_non_exhaustive()
    }
}

impl OfferValidator for KeyedDigestValidator {
    fn validate(&self, offer: &CapabilityOffer) -> Result<(), String> {
        let carried = offer
            .digest
            .as_deref()
            .ok_or_else(|| "offer carries no digest".to_string())?;
        let carried = Hash::from_hex(carried).map_err(|e| format!("malformed digest: {}", e))?;
        // Hash equality is constant-time
        if carried == Self::digest(&self.key, offer) {
            Ok(())
        } else {
            Err("digest mismatch".to_string())
        }
    }
}
