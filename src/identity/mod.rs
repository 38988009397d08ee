//! Canonical identities
//!
//! Provider subjects are mapped to version-5 UUIDs under a fixed namespace so
//! downstream services see a stable, opaque identifier that does not depend
//! on the identity provider's id format.

use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

mod context;

pub use context::SecurityContext;

/// Namespace used when none is configured.
///
/// Changing it changes every user's canonical identity.
pub const DEFAULT_NAMESPACE: Uuid = Uuid::from_u128(0x6f1d_2b7e_93a4_5c8e_b2d0_4e7f_1a96_c35b);

/// Identity derived from a verified provider subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CanonicalIdentity(Uuid);

impl CanonicalIdentity {
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for CanonicalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for CanonicalIdentity {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Deterministic subject → [`CanonicalIdentity`] mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityNormalizer {
    namespace: Uuid,
}

impl Default for IdentityNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl IdentityNormalizer {
    pub fn new(namespace: Uuid) -> Self {
        Self { namespace }
    }

    pub fn namespace(&self) -> &Uuid {
        &self.namespace
    }

    /// Map a provider subject identifier to its canonical identity
    pub fn normalize(&self, subject: &str) -> CanonicalIdentity {
        CanonicalIdentity(Uuid::new_v5(&self.namespace, subject.as_bytes()))
    }
}
