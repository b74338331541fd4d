use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A migration version. Usually a `YYYYMMDDHHMMSS` timestamp, always
/// compared numerically.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    pub const ZERO: Version = Version(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for Version {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(crate::Error::Config(format!("invalid migration version: {s:?}")));
        }
        trimmed
            .parse::<u64>()
            .map(Version)
            .map_err(|e| crate::Error::Config(format!("invalid migration version {s:?}: {e}")))
    }
}

/// How rollback orders the ledger when choosing which versions to revert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionOrder {
    /// Newest version number first.
    #[default]
    Creation,
    /// Most recently applied first, falling back to version number on ties.
    Execution,
}

impl fmt::Display for VersionOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionOrder::Creation => write!(f, "creation"),
            VersionOrder::Execution => write!(f, "execution"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_compare_numerically() {
        let short: Version = "9".parse().unwrap();
        let long: Version = "10".parse().unwrap();
        assert!(short < long);
    }

    #[test]
    fn leading_zeros_are_ignored() {
        let v: Version = "0042".parse().unwrap();
        assert_eq!(v, Version::new(42));
        assert_eq!(v.to_string(), "42");
    }

    #[test]
    fn rejects_non_digit_versions() {
        assert!("".parse::<Version>().is_err());
        assert!("2024-01-01".parse::<Version>().is_err());
        assert!("-1".parse::<Version>().is_err());
    }
}
