//! Liquidity pools, share accounting and the pool registry.
//!
//! A [`Pool`] owns the paired reserves, the issued shares, per-provider
//! positions and the batched fee accumulators. Every reserve-mutating
//! operation records a pre-mutation price observation and refreshes `k_last`;
//! [`Pool::apply_swap_delta`] is the only mutation path for trades and
//! asserts the constant-product invariant after every swap. Swap fees are
//! swept into per-provider pending balances at liquidity-change time rather
//! than on every swap, keeping per-swap cost O(1).

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::asset::{Asset, PoolPair};
use crate::config::AmmConfig;
use crate::error::AmmError;
use crate::oracle::PriceOracle;
use amm_math as math;

/// A single constant-product liquidity pool.
#[derive(Debug)]
pub struct Pool {
    pair: PoolPair,
    reserve0: Decimal,
    reserve1: Decimal,
    total_shares: Decimal,
    fee: Decimal,
    k_last: Decimal,
    locked: bool,
    positions: HashMap<String, Decimal>,
    /// Fees accrued per provider but not yet paid out, per asset side.
    pending_fees: HashMap<String, (Decimal, Decimal)>,
    /// Pool-level fee accumulators, swept pro-rata on liquidity change.
    fee_acc0: Decimal,
    fee_acc1: Decimal,
}

impl Pool {
    fn new(pair: PoolPair, fee: Decimal) -> Self {
        Self {
            pair,
            reserve0: Decimal::ZERO,
            reserve1: Decimal::ZERO,
            total_shares: Decimal::ZERO,
            fee,
            k_last: Decimal::ZERO,
            locked: false,
            positions: HashMap::new(),
            pending_fees: HashMap::new(),
            fee_acc0: Decimal::ZERO,
            fee_acc1: Decimal::ZERO,
        }
    }

    pub fn pair(&self) -> &PoolPair {
        &self.pair
    }

    pub fn reserves(&self) -> (Decimal, Decimal) {
        (self.reserve0, self.reserve1)
    }

    pub fn total_shares(&self) -> Decimal {
        self.total_shares
    }

    pub fn fee(&self) -> Decimal {
        self.fee
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn k(&self) -> Decimal {
        self.reserve0 * self.reserve1
    }

    pub fn shares_of(&self, provider: &str) -> Decimal {
        self.positions.get(provider).copied().unwrap_or(Decimal::ZERO)
    }

    /// Reserves oriented as (reserve_in, reserve_out) for a given input asset.
    pub fn oriented_reserves(&self, token_in: &Asset) -> Result<(Decimal, Decimal), AmmError> {
        if *token_in == *self.pair.asset0() {
            Ok((self.reserve0, self.reserve1))
        } else if *token_in == *self.pair.asset1() {
            Ok((self.reserve1, self.reserve0))
        } else {
            Err(AmmError::AssetNotInPool {
                asset: token_in.clone(),
                pool: self.pair.clone(),
            })
        }
    }

    /// Administrative halt. While locked, every mutating operation fails.
    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }

    fn ensure_unlocked(&self) -> Result<(), AmmError> {
        if self.locked {
            return Err(AmmError::PoolLocked {
                pool: self.pair.clone(),
            });
        }
        Ok(())
    }

    /// Deposit liquidity and mint shares.
    ///
    /// The first deposit mints `sqrt(amount0 * amount1)` shares minus a
    /// permanently locked floor; later deposits must match the reserve ratio
    /// within tolerance and mint proportionally. Pending fees are swept to
    /// existing providers before minting, so a new provider never receives
    /// fees earned before their deposit.
    pub fn add_liquidity(
        &mut self,
        provider: &str,
        amount0: Decimal,
        amount1: Decimal,
        min_shares: Decimal,
        config: &AmmConfig,
        oracle: &PriceOracle,
        now_secs: u64,
    ) -> Result<Decimal, AmmError> {
        self.ensure_unlocked()?;

        let first_deposit = self.total_shares.is_zero();
        let shares = if first_deposit {
            let minted = math::sqrt(math::checked_mul(amount0, amount1)?)?;
            if minted <= config.minimum_liquidity {
                return Err(AmmError::InsufficientInitialLiquidity);
            }
            math::checked_sub(minted, config.minimum_liquidity)?
        } else {
            let expected1 = math::mul_div(amount0, self.reserve1, self.reserve0)?;
            // a contribution too small to price at the working scale can
            // never match the pool ratio
            if expected1.is_zero() {
                return Err(AmmError::RatioMismatch {
                    deviation: Decimal::ONE,
                    tolerance: config.ratio_tolerance,
                });
            }
            let deviation = math::checked_div((amount1 - expected1).abs(), expected1)?;
            if deviation > config.ratio_tolerance {
                return Err(AmmError::RatioMismatch {
                    deviation,
                    tolerance: config.ratio_tolerance,
                });
            }
            let by0 = math::mul_div(amount0, self.total_shares, self.reserve0)?;
            let by1 = math::mul_div(amount1, self.total_shares, self.reserve1)?;
            by0.min(by1)
        };

        if shares < min_shares {
            return Err(AmmError::BelowMinShares {
                shares,
                min_shares,
            });
        }

        self.sweep_fees()?;
        oracle.record_observation(&self.pair, self.reserve0, self.reserve1, now_secs);

        self.reserve0 = math::checked_add(self.reserve0, amount0)?;
        self.reserve1 = math::checked_add(self.reserve1, amount1)?;
        let minted_total = if first_deposit {
            // the locked floor exists as shares owned by no one
            math::checked_add(shares, config.minimum_liquidity)?
        } else {
            shares
        };
        self.total_shares = math::checked_add(self.total_shares, minted_total)?;
        *self.positions.entry(provider.to_string()).or_default() += shares;
        self.k_last = math::checked_mul(self.reserve0, self.reserve1)?;

        info!(
            pool = %self.pair,
            provider,
            %amount0,
            %amount1,
            %shares,
            "liquidity added"
        );
        Ok(shares)
    }

    /// Burn shares and withdraw the proportional reserves plus the provider's
    /// accrued fee share.
    pub fn remove_liquidity(
        &mut self,
        provider: &str,
        shares: Decimal,
        oracle: &PriceOracle,
        now_secs: u64,
    ) -> Result<(Decimal, Decimal), AmmError> {
        self.ensure_unlocked()?;

        let held = self.shares_of(provider);
        if shares <= Decimal::ZERO || shares > held {
            return Err(AmmError::InsufficientShares {
                held,
                requested: shares,
            });
        }

        self.sweep_fees()?;
        oracle.record_observation(&self.pair, self.reserve0, self.reserve1, now_secs);

        let amount0 = math::mul_div(shares, self.reserve0, self.total_shares)?;
        let amount1 = math::mul_div(shares, self.reserve1, self.total_shares)?;

        self.reserve0 = math::checked_sub(self.reserve0, amount0)?;
        self.reserve1 = math::checked_sub(self.reserve1, amount1)?;
        self.total_shares = math::checked_sub(self.total_shares, shares)?;

        let remaining = math::checked_sub(held, shares)?;
        if remaining.is_zero() {
            self.positions.remove(provider);
        } else {
            self.positions.insert(provider.to_string(), remaining);
        }

        // Accrued fees are paid out in full on any position change.
        let (fee0, fee1) = self.pending_fees.remove(provider).unwrap_or_default();
        self.k_last = math::checked_mul(self.reserve0, self.reserve1)?;

        info!(
            pool = %self.pair,
            provider,
            %shares,
            %amount0,
            %amount1,
            "liquidity removed"
        );
        Ok((
            math::checked_add(amount0, fee0)?,
            math::checked_add(amount1, fee1)?,
        ))
    }

    /// Apply a validated swap to the reserves. This is the only mutation path
    /// for trades.
    ///
    /// Records the pre-trade observation, moves the reserves, accrues the fee
    /// into the batched accumulator and asserts `k_after >= k_last`. A
    /// violation is treated as a programming error or attempted exploit: the
    /// pool auto-locks and the operation fails fatally.
    pub fn apply_swap_delta(
        &mut self,
        token_in: &Asset,
        amount_in_effective: Decimal,
        amount_out: Decimal,
        fee_amount: Decimal,
        oracle: &PriceOracle,
        now_secs: u64,
    ) -> Result<(), AmmError> {
        self.ensure_unlocked()?;
        let token0_in = *token_in == *self.pair.asset0();
        if !token0_in && *token_in != *self.pair.asset1() {
            return Err(AmmError::AssetNotInPool {
                asset: token_in.clone(),
                pool: self.pair.clone(),
            });
        }

        oracle.record_observation(&self.pair, self.reserve0, self.reserve1, now_secs);

        if token0_in {
            self.reserve0 = math::checked_add(self.reserve0, amount_in_effective)?;
            self.reserve1 = math::checked_sub(self.reserve1, amount_out)?;
            self.fee_acc0 = math::checked_add(self.fee_acc0, fee_amount)?;
        } else {
            self.reserve1 = math::checked_add(self.reserve1, amount_in_effective)?;
            self.reserve0 = math::checked_sub(self.reserve0, amount_out)?;
            self.fee_acc1 = math::checked_add(self.fee_acc1, fee_amount)?;
        }

        let k_after = math::checked_mul(self.reserve0, self.reserve1)?;
        if k_after < self.k_last {
            self.locked = true;
            error!(
                pool = %self.pair,
                %k_after,
                k_last = %self.k_last,
                "constant-product invariant violated; pool locked"
            );
            return Err(AmmError::InvariantViolation {
                pool: self.pair.clone(),
                k_after,
                k_last: self.k_last,
            });
        }
        self.k_last = k_after;
        Ok(())
    }

    /// Distribute the pool-level fee accumulators to current providers
    /// pro-rata by share count. Rounding dust stays with the pool.
    fn sweep_fees(&mut self) -> Result<(), AmmError> {
        if self.total_shares.is_zero() || (self.fee_acc0.is_zero() && self.fee_acc1.is_zero()) {
            return Ok(());
        }
        for (provider, shares) in &self.positions {
            let fee0 = math::mul_div(self.fee_acc0, *shares, self.total_shares)?;
            let fee1 = math::mul_div(self.fee_acc1, *shares, self.total_shares)?;
            let entry = self.pending_fees.entry(provider.clone()).or_default();
            entry.0 += fee0;
            entry.1 += fee1;
        }
        self.fee_acc0 = Decimal::ZERO;
        self.fee_acc1 = Decimal::ZERO;
        Ok(())
    }
}

/// Explicit process-owned registry of pools, each independently lockable.
#[derive(Debug, Default)]
pub struct PoolRegistry {
    pools: DashMap<PoolPair, Arc<RwLock<Pool>>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pool for the canonical pair. Creation is idempotent in the
    /// sense that a second attempt fails with `DuplicatePool`.
    pub fn create(&self, pair: PoolPair, fee: Decimal) -> Result<(), AmmError> {
        match self.pools.entry(pair.clone()) {
            Entry::Occupied(_) => {
                warn!(pool = %pair, "rejected duplicate pool creation");
                Err(AmmError::DuplicatePool { pool: pair })
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(RwLock::new(Pool::new(pair.clone(), fee))));
                info!(pool = %pair, %fee, "pool created");
                Ok(())
            }
        }
    }

    pub fn get(&self, pair: &PoolPair) -> Result<Arc<RwLock<Pool>>, AmmError> {
        self.pools
            .get(pair)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| AmmError::PoolNotFound { pool: pair.clone() })
    }

    pub fn contains(&self, pair: &PoolPair) -> bool {
        self.pools.contains_key(pair)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn pairs(&self) -> Vec<PoolPair> {
        self.pools.iter().map(|entry| entry.key().clone()).collect()
    }
}
