//! Error taxonomy for the exchange engine.
//!
//! Every failure path returns a typed [`AmmError`]. Variants are grouped into
//! four classes that drive how a failure is logged and whether it may be
//! retried by the caller: see [`ErrorClass`].

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::asset::{Asset, PoolPair};
use crate::commit_reveal::CommitmentState;
use crate::ledger::LedgerError;
use amm_math::MathError;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AmmError {
    // --- Validation: caller may resubmit with adjusted parameters ---
    #[error("invalid asset symbol: '{symbol}'")]
    InvalidAsset { symbol: String },

    #[error("pool assets must differ, got {asset} twice")]
    IdenticalAssets { asset: Asset },

    #[error("asset {asset} is not part of pool {pool}")]
    AssetNotInPool { asset: Asset, pool: PoolPair },

    #[error("amount {amount} outside allowed bounds [{min}, {max}]")]
    AmountOutOfBounds {
        amount: Decimal,
        min: Decimal,
        max: Decimal,
    },

    #[error("deposit ratio deviates by {deviation}, tolerance is {tolerance}")]
    RatioMismatch {
        deviation: Decimal,
        tolerance: Decimal,
    },

    #[error("minted shares {shares} below requested minimum {min_shares}")]
    BelowMinShares {
        shares: Decimal,
        min_shares: Decimal,
    },

    #[error("initial deposit too small to cover the locked liquidity floor")]
    InsufficientInitialLiquidity,

    #[error("insufficient shares: holding {held}, requested {requested}")]
    InsufficientShares { held: Decimal, requested: Decimal },

    #[error("pool {pool} has no liquidity")]
    NoLiquidity { pool: PoolPair },

    #[error("swap would drain the {asset} reserve")]
    InsufficientLiquidity { asset: Asset },

    #[error("output {amount_out} below minimum {min_amount_out}")]
    SlippageExceeded {
        amount_out: Decimal,
        min_amount_out: Decimal,
    },

    #[error("price impact {impact} exceeds ceiling {ceiling}")]
    PriceImpactTooHigh { impact: Decimal, ceiling: Decimal },

    #[error("user {user} is rate limited")]
    RateLimited { user: String },

    #[error("too many swaps in sequence {sequence} for pool {pool}")]
    TooManySwapsInBlock { pool: PoolPair, sequence: u64 },

    #[error("circuit breaker tripped for pool {pool}")]
    CircuitBreakerTripped { pool: PoolPair },

    #[error("invalid limit price {price}")]
    InvalidLimitPrice { price: Decimal },

    // --- Protocol: client bug or attempted replay ---
    #[error("invalid nonce for {user}: expected {expected}, got {got}")]
    InvalidNonce {
        user: String,
        expected: u64,
        got: u64,
    },

    #[error("commitment {hash} already exists")]
    DuplicateCommitment { hash: String },

    #[error("reveal does not match commitment {hash}")]
    InvalidReveal { hash: String },

    #[error(
        "reveal too early: committed at sequence {committed_seq}, \
         current {current_seq}, required delay {delay}"
    )]
    RevealTooEarly {
        committed_seq: u64,
        current_seq: u64,
        delay: u64,
    },

    #[error("commitment {hash} has expired")]
    CommitmentExpired { hash: String },

    #[error("unknown commitment {hash}")]
    UnknownCommitment { hash: String },

    #[error("commitment {hash} already consumed (state {state:?})")]
    CommitmentConsumed {
        hash: String,
        state: CommitmentState,
    },

    // --- Invariant: fatal for the pool, never auto-recovered ---
    #[error("constant-product invariant violated on {pool}: k {k_after} < {k_last}")]
    InvariantViolation {
        pool: PoolPair,
        k_after: Decimal,
        k_last: Decimal,
    },

    #[error("spot price deviates {deviation} from TWAP on {pool}, bound is {bound}")]
    ManipulationSuspected {
        pool: PoolPair,
        deviation: Decimal,
        bound: Decimal,
    },

    // --- Resource ---
    #[error("pool {pool} already exists")]
    DuplicatePool { pool: PoolPair },

    #[error("no pool for {pool}")]
    PoolNotFound { pool: PoolPair },

    #[error("pool {pool} is locked")]
    PoolLocked { pool: PoolPair },

    #[error("order {id} not found")]
    OrderNotFound { id: Uuid },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Math(#[from] MathError),
}

/// Failure classes from the error-handling design. Validation errors are
/// returned without ceremony, Protocol errors are logged at warning level,
/// Invariant errors emit a critical audit record and leave the pool locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    Protocol,
    Invariant,
    Resource,
}

impl AmmError {
    pub fn class(&self) -> ErrorClass {
        use AmmError::*;
        match self {
            InvalidAsset { .. }
            | IdenticalAssets { .. }
            | AssetNotInPool { .. }
            | AmountOutOfBounds { .. }
            | RatioMismatch { .. }
            | BelowMinShares { .. }
            | InsufficientInitialLiquidity
            | InsufficientShares { .. }
            | NoLiquidity { .. }
            | InsufficientLiquidity { .. }
            | SlippageExceeded { .. }
            | PriceImpactTooHigh { .. }
            | RateLimited { .. }
            | TooManySwapsInBlock { .. }
            | CircuitBreakerTripped { .. }
            | InvalidLimitPrice { .. }
            | Ledger(_) => ErrorClass::Validation,

            InvalidNonce { .. }
            | DuplicateCommitment { .. }
            | InvalidReveal { .. }
            | RevealTooEarly { .. }
            | CommitmentExpired { .. }
            | UnknownCommitment { .. }
            | CommitmentConsumed { .. } => ErrorClass::Protocol,

            InvariantViolation { .. } | ManipulationSuspected { .. } | Math(_) => {
                ErrorClass::Invariant
            }

            DuplicatePool { .. } | PoolNotFound { .. } | PoolLocked { .. }
            | OrderNotFound { .. } => ErrorClass::Resource,
        }
    }

    /// Emit the audit record appropriate for this error's class.
    pub fn audit(&self) {
        match self.class() {
            ErrorClass::Validation => debug!(error = %self, "validation failure"),
            ErrorClass::Protocol => warn!(error = %self, "protocol failure"),
            ErrorClass::Invariant => error!(error = %self, "invariant failure"),
            ErrorClass::Resource => debug!(error = %self, "resource failure"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn classification_matches_taxonomy() {
        let pool = PoolPair::new(
            Asset::new("eth").unwrap(),
            Asset::new("usdc").unwrap(),
        )
        .unwrap();

        assert_eq!(
            AmmError::SlippageExceeded {
                amount_out: dec!(1),
                min_amount_out: dec!(2),
            }
            .class(),
            ErrorClass::Validation
        );
        assert_eq!(
            AmmError::InvalidNonce {
                user: "alice".into(),
                expected: 1,
                got: 0,
            }
            .class(),
            ErrorClass::Protocol
        );
        assert_eq!(
            AmmError::InvariantViolation {
                pool: pool.clone(),
                k_after: dec!(1),
                k_last: dec!(2),
            }
            .class(),
            ErrorClass::Invariant
        );
        assert_eq!(
            AmmError::PoolNotFound { pool }.class(),
            ErrorClass::Resource
        );
    }
}
