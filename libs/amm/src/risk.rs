//! Trading risk controls.
//!
//! Three independent gates sit in front of every swap: a per-pool circuit
//! breaker, a per-user action rate limit and a per-pool swap cap within a
//! single sequence number. The breaker is also tripped automatically by the
//! engine when the constant-product invariant breaks or manipulation is
//! suspected, and only an explicit admin reset clears it.

use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::asset::PoolPair;
use crate::config::AmmConfig;
use crate::error::AmmError;

#[derive(Debug, Default)]
pub struct RiskController {
    /// (sequence, count) of swaps admitted for a pool in that sequence.
    swap_counters: DashMap<PoolPair, (u64, u32)>,
    /// Per-user timestamp of the last admitted state-changing action.
    last_action: DashMap<String, u64>,
    breakers: DashMap<PoolPair, bool>,
}

impl RiskController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_tripped(&self, pool: &PoolPair) -> bool {
        self.breakers.get(pool).map(|v| *v).unwrap_or(false)
    }

    /// Trip the breaker for a pool. Idempotent.
    pub fn trip(&self, pool: &PoolPair, reason: &str) {
        self.breakers.insert(pool.clone(), true);
        warn!(pool = %pool, reason, "circuit breaker tripped");
    }

    /// Administrative reset after investigation.
    pub fn reset_circuit_breaker(&self, pool: &PoolPair, admin: &str) {
        self.breakers.insert(pool.clone(), false);
        info!(pool = %pool, admin, "circuit breaker reset");
    }

    /// Per-user rate limit, shared by swaps and liquidity operations.
    /// Disabled when `rate_limit_secs` is zero.
    pub fn check_rate_limit(
        &self,
        user: &str,
        config: &AmmConfig,
        now_secs: u64,
    ) -> Result<(), AmmError> {
        if config.rate_limit_secs == 0 {
            return Ok(());
        }
        if let Some(last) = self.last_action.get(user) {
            if now_secs.saturating_sub(*last) < config.rate_limit_secs {
                return Err(AmmError::RateLimited {
                    user: user.to_string(),
                });
            }
        }
        self.last_action.insert(user.to_string(), now_secs);
        Ok(())
    }

    /// Admit a swap against all gates, counting it toward the per-sequence
    /// cap only if every gate passes.
    pub fn admit_swap(
        &self,
        pool: &PoolPair,
        user: &str,
        config: &AmmConfig,
        sequence: u64,
        now_secs: u64,
    ) -> Result<(), AmmError> {
        if self.is_tripped(pool) {
            return Err(AmmError::CircuitBreakerTripped { pool: pool.clone() });
        }
        self.check_rate_limit(user, config, now_secs)?;

        let mut counter = self
            .swap_counters
            .entry(pool.clone())
            .or_insert((sequence, 0));
        if counter.0 != sequence {
            *counter = (sequence, 0);
        }
        if counter.1 >= config.max_swaps_per_block {
            return Err(AmmError::TooManySwapsInBlock {
                pool: pool.clone(),
                sequence,
            });
        }
        counter.1 += 1;
        Ok(())
    }

    /// Compare the pre-trade spot price against the TWAP. A deviation beyond
    /// the configured bound means the reserves were already pushed off the
    /// time-weighted price and the trade is treated as manipulation. The
    /// trade's own movement is governed by the price impact ceiling, not by
    /// this check, so a legitimate max-impact swap against an honest TWAP
    /// never trips it.
    pub fn check_twap_deviation(
        &self,
        pool: &PoolPair,
        spot_price: Decimal,
        twap: Decimal,
        config: &AmmConfig,
    ) -> Result<(), AmmError> {
        if twap <= Decimal::ZERO {
            return Ok(());
        }
        let deviation = (spot_price - twap).abs() / twap;
        if deviation > config.max_twap_deviation {
            return Err(AmmError::ManipulationSuspected {
                pool: pool.clone(),
                deviation,
                bound: config.max_twap_deviation,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Asset;
    use rust_decimal_macros::dec;

    fn pair() -> PoolPair {
        PoolPair::new(Asset::new("eth").unwrap(), Asset::new("usdc").unwrap()).unwrap()
    }

    fn config() -> AmmConfig {
        AmmConfig {
            max_swaps_per_block: 2,
            rate_limit_secs: 10,
            ..AmmConfig::default()
        }
    }

    #[test]
    fn rate_limit_blocks_rapid_actions() {
        let risk = RiskController::new();
        let config = config();

        risk.check_rate_limit("alice", &config, 100).unwrap();
        let err = risk.check_rate_limit("alice", &config, 105).unwrap_err();
        assert!(matches!(err, AmmError::RateLimited { .. }));
        risk.check_rate_limit("alice", &config, 110).unwrap();
    }

    #[test]
    fn rate_limit_is_per_user() {
        let risk = RiskController::new();
        let config = config();

        risk.check_rate_limit("alice", &config, 100).unwrap();
        risk.check_rate_limit("bob", &config, 100).unwrap();
    }

    #[test]
    fn zero_interval_disables_rate_limit() {
        let risk = RiskController::new();
        let config = AmmConfig {
            rate_limit_secs: 0,
            ..AmmConfig::default()
        };

        risk.check_rate_limit("alice", &config, 0).unwrap();
        risk.check_rate_limit("alice", &config, 0).unwrap();
    }

    #[test]
    fn per_sequence_swap_cap_resets_on_new_sequence() {
        let risk = RiskController::new();
        let config = config();
        let pool = pair();

        risk.admit_swap(&pool, "u1", &config, 7, 100).unwrap();
        risk.admit_swap(&pool, "u2", &config, 7, 100).unwrap();
        let err = risk.admit_swap(&pool, "u3", &config, 7, 100).unwrap_err();
        assert!(matches!(err, AmmError::TooManySwapsInBlock { .. }));

        risk.admit_swap(&pool, "u4", &config, 8, 200).unwrap();
    }

    #[test]
    fn tripped_breaker_rejects_before_counting() {
        let risk = RiskController::new();
        let config = config();
        let pool = pair();

        risk.trip(&pool, "test");
        let err = risk.admit_swap(&pool, "u1", &config, 1, 100).unwrap_err();
        assert!(matches!(err, AmmError::CircuitBreakerTripped { .. }));

        risk.reset_circuit_breaker(&pool, "ops");
        risk.admit_swap(&pool, "u1", &config, 1, 200).unwrap();
    }

    #[test]
    fn twap_deviation_bound() {
        let risk = RiskController::new();
        let config = AmmConfig::default();
        let pool = pair();

        // 10% off a 2000 TWAP is fine at a 20% bound
        risk.check_twap_deviation(&pool, dec!(2200), dec!(2000), &config)
            .unwrap();
        // 50% off is manipulation
        let err = risk
            .check_twap_deviation(&pool, dec!(3000), dec!(2000), &config)
            .unwrap_err();
        assert!(matches!(err, AmmError::ManipulationSuspected { .. }));
    }
}
