//! Asset identifiers and canonical pool pairs.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AmmError;

/// Validated asset symbol, normalized to lowercase ASCII.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Asset(String);

impl Asset {
    /// Normalize and validate a symbol. Symbols are 2-16 ASCII alphanumeric
    /// characters; anything else is rejected at the boundary so downstream
    /// code never sees an unchecked identifier.
    pub fn new(symbol: &str) -> Result<Self, AmmError> {
        let normalized = symbol.trim().to_ascii_lowercase();
        let valid = (2..=16).contains(&normalized.len())
            && normalized.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid {
            return Err(AmmError::InvalidAsset {
                symbol: symbol.to_string(),
            });
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered asset pair identifying a pool.
///
/// The constructor canonicalizes ordering (`asset0 < asset1`) so every call
/// site resolves the same pool regardless of argument order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolPair {
    asset0: Asset,
    asset1: Asset,
}

impl PoolPair {
    pub fn new(a: Asset, b: Asset) -> Result<Self, AmmError> {
        if a == b {
            return Err(AmmError::IdenticalAssets { asset: a });
        }
        let (asset0, asset1) = if a < b { (a, b) } else { (b, a) };
        Ok(Self { asset0, asset1 })
    }

    pub fn asset0(&self) -> &Asset {
        &self.asset0
    }

    pub fn asset1(&self) -> &Asset {
        &self.asset1
    }

    pub fn contains(&self, asset: &Asset) -> bool {
        self.asset0 == *asset || self.asset1 == *asset
    }

    /// The counterpart asset, or `None` if `asset` is not in the pair.
    pub fn other(&self, asset: &Asset) -> Option<&Asset> {
        if *asset == self.asset0 {
            Some(&self.asset1)
        } else if *asset == self.asset1 {
            Some(&self.asset0)
        } else {
            None
        }
    }
}

impl fmt::Display for PoolPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.asset0, self.asset1)
    }
}
