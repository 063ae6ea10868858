//! Endpoint identity: generation, persistence lookup and format validation.

use crate::core::config::IDENTITY_KEY;
use crate::core::error::ValidationError;
use crate::core::storage::SessionStore;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tracing::{debug, info};
use uuid::Uuid;

/// Opaque identifier of one endpoint for the lifetime of a session.
///
/// Equality is case-sensitive. Ids assigned by a discovery service may have
/// any shape; only manually entered ids go through [`validate_identifier`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(String);

impl EndpointId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random UUID-v4 shaped identity.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Read the persisted identity, or generate and persist a new one.
    pub fn load_or_create(store: &dyn SessionStore) -> Self {
        if let Some(existing) = store.get(IDENTITY_KEY).filter(|s| !s.is_empty()) {
            debug!(event = "identity_restored", id = %existing, "Restored local identity");
            return Self(existing);
        }
        let id = Self::generate();
        store.set(IDENTITY_KEY, id.as_str());
        info!(event = "identity_created", id = %id, "Generated local identity");
        id
    }

    /// Persist this identity as the local one.
    pub fn persist(&self, store: &dyn SessionStore) {
        store.set(IDENTITY_KEY, self.as_str());
    }
}

impl Display for EndpointId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for EndpointId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Positions of the four dashes in a 36-character UUID string.
const DASHES: [usize; 4] = [8, 13, 18, 23];
/// Index of the version nibble.
const VERSION_AT: usize = 14;
/// Index of the variant nibble.
const VARIANT_AT: usize = 19;

/// Pure format predicate for a manually entered identifier.
///
/// Accepts exactly `xxxxxxxx-xxxx-4xxx-yxxx-xxxxxxxxxxxx` where `x` is a hex
/// digit (either case) and `y` is one of `8 9 a b` (either case).
pub fn is_valid_identifier(candidate: &str) -> bool {
    let bytes = candidate.as_bytes();
    if bytes.len() != 36 {
        return false;
    }
    bytes.iter().enumerate().all(|(i, &b)| match i {
        i if DASHES.contains(&i) => b == b'-',
        VERSION_AT => b == b'4',
        VARIANT_AT => matches!(b, b'8' | b'9' | b'a' | b'b' | b'A' | b'B'),
        _ => b.is_ascii_hexdigit(),
    })
}

/// Validate and wrap a manually entered identifier.
pub fn validate_identifier(candidate: &str) -> Result<EndpointId, ValidationError> {
    if is_valid_identifier(candidate) {
        Ok(EndpointId::new(candidate))
    } else {
        Err(ValidationError::MalformedIdentifier)
    }
}
