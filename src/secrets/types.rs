//! Value types shared by the lease container, the session manager, and the transport.
//!
//! Tokens and secret values are wrapped so they cannot leak through logging,
//! debugging, or serialization by accident.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::flatten::flatten_json;

/// A string wrapper that redacts its contents in Debug, Display, and serialization.
///
/// Memory is zeroed on drop. The raw value is reachable only through
/// [`SecretString::expose_secret`].
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
    /// Creates a new SecretString from a string value.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Exposes the underlying secret value. Never log the result.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    /// Returns true if the secret is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for SecretString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(SecretString)
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString([REDACTED])")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for SecretString {}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A Vault client token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultToken(SecretString);

impl VaultToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::new(token))
    }

    /// The raw token, for the `X-Vault-Token` header only.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for VaultToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VaultToken([REDACTED])")
    }
}

/// A token obtained from a login or a renewal, together with its validity window.
///
/// A zero `lease_duration` means the issuer did not report a TTL; the session
/// manager looks the token up to find out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginToken {
    token: VaultToken,
    lease_duration: Duration,
    renewable: bool,
}

impl LoginToken {
    pub fn new(token: VaultToken, lease_duration: Duration, renewable: bool) -> Self {
        Self { token, lease_duration, renewable }
    }

    /// A token without a known TTL (e.g. a statically configured token).
    pub fn of(token: VaultToken) -> Self {
        Self::new(token, Duration::ZERO, false)
    }

    pub fn token(&self) -> &VaultToken {
        &self.token
    }

    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    pub fn is_renewable(&self) -> bool {
        self.renewable
    }
}

/// Subset of `auth/token/lookup-self` the session manager needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenLookup {
    /// Remaining TTL; zero for tokens that never expire.
    pub ttl: Duration,
    pub renewable: bool,
}

/// Response-wrapping metadata, carried for diagnostics only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrapInfo {
    #[serde(default)]
    pub token: Option<SecretString>,
    #[serde(default)]
    pub ttl: u64,
    #[serde(default)]
    pub creation_time: Option<String>,
    #[serde(default)]
    pub creation_path: Option<String>,
}

/// A logical read from the secret store: data plus lease metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretResponse {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub lease_id: String,
    /// Lease duration in seconds.
    #[serde(default)]
    pub lease_duration: u64,
    #[serde(default)]
    pub renewable: bool,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub warnings: Option<Vec<String>>,
    #[serde(default)]
    pub wrap_info: Option<WrapInfo>,
}

impl SecretResponse {
    /// The response data as a flat `key -> value` map.
    pub fn flattened_data(&self) -> BTreeMap<String, String> {
        self.data.as_ref().map(flatten_json).unwrap_or_default()
    }
}
