//! Secrets registered with the lease container.

use std::fmt;

/// How a secret is kept fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenewalMode {
    /// Renew the lease until it can no longer be extended, then let it expire.
    Renew,
    /// Renew while possible, then fetch the secret again before the lease runs out.
    Rotate,
}

impl RenewalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Renew => "renew",
            Self::Rotate => "rotate",
        }
    }
}

/// A secret path together with its renewal mode. Identifies one lease lineage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestedSecret {
    path: String,
    mode: RenewalMode,
}

impl RequestedSecret {
    /// A secret whose lease is renewed for as long as the store allows.
    pub fn renewable(path: impl Into<String>) -> Self {
        Self { path: normalize(path.into()), mode: RenewalMode::Renew }
    }

    /// A secret that is fetched again once its lease can no longer be extended.
    pub fn rotating(path: impl Into<String>) -> Self {
        Self { path: normalize(path.into()), mode: RenewalMode::Rotate }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn mode(&self) -> RenewalMode {
        self.mode
    }

    pub fn is_rotating(&self) -> bool {
        self.mode == RenewalMode::Rotate
    }
}

impl fmt::Display for RequestedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.mode.as_str(), self.path)
    }
}

fn normalize(path: String) -> String {
    path.trim_matches('/').to_string()
}
