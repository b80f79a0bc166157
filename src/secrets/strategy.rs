//! What to do with a lease when its renewal fails.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::SecretsError;

/// Policy applied by the renewal scheduler when a renew call errors.
///
/// A retained lease stays current and is retried after the minimum renewal
/// interval for as long as the lease itself has not run out. A dropped lease
/// leaves its lineage dormant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeaseStrategy {
    /// Abandon the lease on any error.
    #[default]
    DropOnError,
    /// Keep the lease on any error.
    RetainOnError,
    /// Keep the lease on transport errors, abandon it when the store refuses.
    RetainOnIoError,
}

impl LeaseStrategy {
    /// Whether the failed lease should be abandoned.
    pub fn should_drop(&self, error: &SecretsError) -> bool {
        match self {
            Self::DropOnError => true,
            Self::RetainOnError => false,
            Self::RetainOnIoError => !error.is_io(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DropOnError => "drop",
            Self::RetainOnError => "retain",
            Self::RetainOnIoError => "retain-on-io",
        }
    }
}

impl FromStr for LeaseStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "drop" | "drop-on-error" => Ok(Self::DropOnError),
            "retain" | "retain-on-error" => Ok(Self::RetainOnError),
            "retain-on-io" | "retain-on-io-error" => Ok(Self::RetainOnIoError),
            _ => Err(format!("Unknown lease strategy: {}", s)),
        }
    }
}

impl fmt::Display for LeaseStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
