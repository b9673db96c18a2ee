//! Swap quoting and execution.
//!
//! Quoting is a pure function over a pool snapshot. Execution holds the pool
//! write lock across the full check-debit-mutate-credit path so the reserves
//! a swap was validated against are the reserves it settles against. The fee
//! is charged on the input; only the effective input enters the reserves, so
//! the constant product never decreases.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::asset::{Asset, PoolPair};
use crate::config::AmmConfig;
use crate::error::AmmError;
use crate::ledger::BalanceLedger;
use crate::oracle::PriceOracle;
use crate::pool::{Pool, PoolRegistry};
use crate::risk::RiskController;
use amm_math as math;

/// Pure pricing of a prospective swap against a reserve snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub amount_in: Decimal,
    pub fee_amount: Decimal,
    pub amount_out: Decimal,
    /// Marginal price of the input asset before the trade (reserve_out / reserve_in).
    pub spot_price: Decimal,
    /// Marginal price after the trade would settle.
    pub spot_price_after: Decimal,
    /// Realized price of this trade (amount_out / amount_in).
    pub execution_price: Decimal,
    /// Relative shortfall of the execution price against the pre-trade spot.
    pub price_impact: Decimal,
    /// Time-weighted average price of the input asset, when enough history
    /// exists. Pure reserve-snapshot quotes carry `None`.
    pub twap: Option<Decimal>,
}

/// Record of a settled swap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapReceipt {
    pub receipt_id: Uuid,
    pub user: String,
    pub pool: PoolPair,
    pub token_in: Asset,
    pub token_out: Asset,
    pub amount_in: Decimal,
    pub fee_amount: Decimal,
    pub amount_out: Decimal,
    pub execution_price: Decimal,
    pub price_impact: Decimal,
    pub sequence: u64,
    pub timestamp_secs: u64,
}

pub struct SwapEngine {
    registry: Arc<PoolRegistry>,
    oracle: Arc<PriceOracle>,
    risk: Arc<RiskController>,
    ledger: Arc<dyn BalanceLedger>,
}

impl SwapEngine {
    pub fn new(
        registry: Arc<PoolRegistry>,
        oracle: Arc<PriceOracle>,
        risk: Arc<RiskController>,
        ledger: Arc<dyn BalanceLedger>,
    ) -> Self {
        Self {
            registry,
            oracle,
            risk,
            ledger,
        }
    }

    pub fn validate_amount(amount: Decimal, config: &AmmConfig) -> Result<(), AmmError> {
        if amount < config.min_trade_amount || amount > config.max_trade_amount {
            return Err(AmmError::AmountOutOfBounds {
                amount,
                min: config.min_trade_amount,
                max: config.max_trade_amount,
            });
        }
        Ok(())
    }

    /// Price a swap against the pool's current reserves without touching them.
    pub fn quote_pool(
        pool: &Pool,
        token_in: &Asset,
        amount_in: Decimal,
        config: &AmmConfig,
    ) -> Result<Quote, AmmError> {
        Self::validate_amount(amount_in, config)?;
        let (reserve_in, reserve_out) = pool.oriented_reserves(token_in)?;
        if reserve_in.is_zero() || reserve_out.is_zero() {
            return Err(AmmError::NoLiquidity {
                pool: pool.pair().clone(),
            });
        }

        let fee_amount = math::quantize(math::checked_mul(amount_in, pool.fee())?);
        let effective_in = math::checked_sub(amount_in, fee_amount)?;
        // out = eff * r_out / (r_in + eff), floored toward the pool
        let amount_out = math::mul_div(
            effective_in,
            reserve_out,
            math::checked_add(reserve_in, effective_in)?,
        )?;
        // the curve keeps amount_out strictly below reserve_out, but a large
        // enough trade can leave a residual too small to trade against
        if math::checked_sub(reserve_out, amount_out)? < config.min_trade_amount {
            let token_out = pool
                .pair()
                .other(token_in)
                .cloned()
                .unwrap_or_else(|| token_in.clone());
            return Err(AmmError::InsufficientLiquidity { asset: token_out });
        }

        let spot_price = reserve_out / reserve_in;
        let spot_price_after = math::checked_sub(reserve_out, amount_out)?
            / math::checked_add(reserve_in, effective_in)?;
        let execution_price = amount_out / amount_in;
        let price_impact = if spot_price.is_zero() {
            Decimal::ZERO
        } else {
            (spot_price - execution_price).abs() / spot_price
        };

        Ok(Quote {
            amount_in,
            fee_amount,
            amount_out,
            spot_price,
            spot_price_after,
            execution_price,
            price_impact,
            twap: None,
        })
    }

    /// Current marginal price of `token_in` in the pool's other asset.
    pub fn spot_price(&self, pair: &PoolPair, token_in: &Asset) -> Result<Decimal, AmmError> {
        let pool = self.registry.get(pair)?;
        let pool = pool.read();
        let (reserve_in, reserve_out) = pool.oriented_reserves(token_in)?;
        if reserve_in.is_zero() || reserve_out.is_zero() {
            return Err(AmmError::NoLiquidity { pool: pair.clone() });
        }
        Ok(reserve_out / reserve_in)
    }

    /// Quote against the registry without holding a write lock, annotated
    /// with the current TWAP where history allows.
    pub fn quote(
        &self,
        pair: &PoolPair,
        token_in: &Asset,
        amount_in: Decimal,
        config: &AmmConfig,
        now_secs: u64,
    ) -> Result<Quote, AmmError> {
        let pool = self.registry.get(pair)?;
        let pool = pool.read();
        let mut quote = Self::quote_pool(&pool, token_in, amount_in, config)?;
        quote.twap = self
            .oracle
            .twap(pair, token_in, config.twap_window_secs, now_secs);
        Ok(quote)
    }

    /// Execute a swap end to end.
    ///
    /// Check order: amount bounds, pool lock, pricing, slippage, price
    /// impact, risk gates, TWAP deviation, ledger debit, reserve mutation,
    /// ledger credit. A debit failure leaves the pool untouched; a reserve
    /// mutation failure refunds the debit before returning.
    #[allow(clippy::too_many_arguments)]
    pub fn execute(
        &self,
        user: &str,
        pair: &PoolPair,
        token_in: &Asset,
        amount_in: Decimal,
        min_amount_out: Decimal,
        config: &AmmConfig,
        sequence: u64,
        now_secs: u64,
    ) -> Result<SwapReceipt, AmmError> {
        let pool_ref = self.registry.get(pair)?;
        let mut pool = pool_ref.write();

        if pool.is_locked() {
            return Err(AmmError::PoolLocked { pool: pair.clone() });
        }

        let quote = Self::quote_pool(&pool, token_in, amount_in, config)?;
        if quote.amount_out < min_amount_out {
            return Err(AmmError::SlippageExceeded {
                amount_out: quote.amount_out,
                min_amount_out,
            });
        }
        if quote.price_impact > config.max_price_impact {
            return Err(AmmError::PriceImpactTooHigh {
                impact: quote.price_impact,
                ceiling: config.max_price_impact,
            });
        }

        self.risk.admit_swap(pair, user, config, sequence, now_secs)?;

        if let Some(twap) = self
            .oracle
            .twap(pair, token_in, config.twap_window_secs, now_secs)
        {
            if let Err(err) =
                self.risk
                    .check_twap_deviation(pair, quote.spot_price, twap, config)
            {
                pool.lock();
                self.risk.trip(pair, "spot price diverged from TWAP");
                return Err(err);
            }
        }

        let token_out = pool
            .pair()
            .other(token_in)
            .cloned()
            .ok_or_else(|| AmmError::AssetNotInPool {
                asset: token_in.clone(),
                pool: pair.clone(),
            })?;

        self.ledger.debit(user, token_in, amount_in)?;

        let effective_in = math::checked_sub(amount_in, quote.fee_amount)?;
        if let Err(err) = pool.apply_swap_delta(
            token_in,
            effective_in,
            quote.amount_out,
            quote.fee_amount,
            &self.oracle,
            now_secs,
        ) {
            // give the input back before surfacing the failure
            self.ledger.credit(user, token_in, amount_in);
            if matches!(err, AmmError::InvariantViolation { .. }) {
                self.risk.trip(pair, "constant-product invariant violated");
            }
            return Err(err);
        }
        // credit under the pool lock so both ledger sides settle against the
        // reserves the swap was validated on
        self.ledger.credit(user, &token_out, quote.amount_out);
        drop(pool);

        let receipt = SwapReceipt {
            receipt_id: Uuid::new_v4(),
            user: user.to_string(),
            pool: pair.clone(),
            token_in: token_in.clone(),
            token_out,
            amount_in,
            fee_amount: quote.fee_amount,
            amount_out: quote.amount_out,
            execution_price: quote.execution_price,
            price_impact: quote.price_impact,
            sequence,
            timestamp_secs: now_secs,
        };
        info!(
            receipt_id = %receipt.receipt_id,
            user,
            pool = %pair,
            token_in = %token_in,
            %amount_in,
            amount_out = %receipt.amount_out,
            "swap executed"
        );
        Ok(receipt)
    }
}
