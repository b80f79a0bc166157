//! Lease value object.

use std::fmt;
use std::time::Duration;

use super::error::{Result, SecretsError};
use super::types::SecretResponse;

/// A time-bound grant on a secret: opaque id, duration, and whether it may be renewed.
///
/// Equality is by value. The renewal scheduler never relies on it to detect
/// staleness; it tracks a generation per installed lease instead.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Lease {
    lease_id: String,
    lease_duration: Duration,
    renewable: bool,
}

impl Lease {
    /// Create a lease.
    ///
    /// An empty `lease_id` is accepted only for non-renewable leases, where it means
    /// "this resource has no lease" and short-circuits renewal. A renewable lease
    /// without an id cannot be renewed and is rejected.
    pub fn of(lease_id: impl Into<String>, lease_duration: Duration, renewable: bool) -> Result<Self> {
        let lease_id = lease_id.into();
        if lease_id.is_empty() && renewable {
            return Err(SecretsError::invalid_argument("a renewable lease requires a lease id"));
        }
        Ok(Self { lease_id, lease_duration: whole_seconds(lease_duration), renewable })
    }

    /// The "no lease" value. Renewal stops when an operation returns it.
    pub fn none() -> Self {
        Self { lease_id: String::new(), lease_duration: Duration::ZERO, renewable: false }
    }

    /// A lease without an id that still carries a TTL, e.g. a static secret whose
    /// response advertises how long it should be cached.
    pub fn from_ttl(lease_duration: Duration) -> Self {
        Self { lease_id: String::new(), lease_duration: whole_seconds(lease_duration), renewable: false }
    }

    /// Lease metadata of a logical read. Responses without a lease id map to a
    /// TTL-only lease.
    pub fn from_response(response: &SecretResponse) -> Self {
        let duration = Duration::from_secs(response.lease_duration);
        if response.lease_id.is_empty() {
            Self::from_ttl(duration)
        } else {
            Self {
                lease_id: response.lease_id.clone(),
                lease_duration: duration,
                renewable: response.renewable,
            }
        }
    }

    pub fn lease_id(&self) -> &str {
        &self.lease_id
    }

    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    pub fn is_renewable(&self) -> bool {
        self.renewable
    }

    pub fn has_lease_id(&self) -> bool {
        !self.lease_id.is_empty()
    }

    /// True for [`Lease::none`] and any other lease without an id or a TTL.
    pub fn is_none(&self) -> bool {
        self.lease_id.is_empty() && self.lease_duration.is_zero()
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("lease_id", &self.lease_id)
            .field("lease_duration_secs", &self.lease_duration.as_secs())
            .field("renewable", &self.renewable)
            .finish()
    }
}

impl Default for Lease {
    fn default() -> Self {
        Self::none()
    }
}

// Vault reports lease durations in whole seconds.
fn whole_seconds(duration: Duration) -> Duration {
    Duration::from_secs(duration.as_secs())
}
