//! Constant-product exchange engine with manipulation protection.
//!
//! The engine keeps pools of paired reserves priced by `x * y = k`, charges
//! the swap fee on the input side and defends itself with layered controls:
//! a TWAP oracle for manipulation detection, commit-reveal sequencing against
//! front-running, per-pool circuit breakers, rate limits and swap caps, plus
//! a permanently locked liquidity floor on first mint.
//!
//! [`Amm`] is the embedding surface: it owns the pool registry, oracle, risk
//! controller, commitment guard and order book, settles balances through the
//! caller-supplied [`BalanceLedger`] and takes sequence numbers and time from
//! the caller-supplied [`ChainClock`].

pub mod asset;
pub mod clock;
pub mod commit_reveal;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod oracle;
pub mod orders;
pub mod pool;
pub mod risk;

pub use asset::{Asset, PoolPair};
pub use clock::{ChainClock, ManualClock, SystemClock};
pub use commit_reveal::{CommitRevealGuard, CommitmentState, SwapCommitment, SwapIntent};
pub use config::AmmConfig;
pub use engine::{Quote, SwapEngine, SwapReceipt};
pub use error::{AmmError, ErrorClass};
pub use ledger::{BalanceLedger, InMemoryLedger, LedgerError};
pub use oracle::{PriceObservation, PriceOracle};
pub use orders::{LimitOrder, OrderBook};
pub use pool::{Pool, PoolRegistry};
pub use risk::RiskController;

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Audit every failure leaving the public surface at its class's severity.
fn observed<T>(result: Result<T, AmmError>) -> Result<T, AmmError> {
    if let Err(err) = &result {
        err.audit();
    }
    result
}

/// The assembled exchange engine.
pub struct Amm {
    config: AmmConfig,
    registry: Arc<PoolRegistry>,
    oracle: Arc<PriceOracle>,
    risk: Arc<RiskController>,
    guard: CommitRevealGuard,
    orders: OrderBook,
    engine: SwapEngine,
    ledger: Arc<dyn BalanceLedger>,
    clock: Arc<dyn ChainClock>,
}

impl Amm {
    pub fn new(
        config: AmmConfig,
        ledger: Arc<dyn BalanceLedger>,
        clock: Arc<dyn ChainClock>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let registry = Arc::new(PoolRegistry::new());
        let oracle = Arc::new(PriceOracle::new(config.observation_capacity));
        let risk = Arc::new(RiskController::new());
        let engine = SwapEngine::new(
            Arc::clone(&registry),
            Arc::clone(&oracle),
            Arc::clone(&risk),
            Arc::clone(&ledger),
        );
        Ok(Self {
            config,
            registry,
            oracle,
            risk,
            guard: CommitRevealGuard::new(),
            orders: OrderBook::new(),
            engine,
            ledger,
            clock,
        })
    }

    pub fn config(&self) -> &AmmConfig {
        &self.config
    }

    fn pair_of(&self, a: &str, b: &str) -> Result<PoolPair, AmmError> {
        PoolPair::new(Asset::new(a)?, Asset::new(b)?)
    }

    // --- pools and liquidity ---

    pub fn create_pool(&self, a: &str, b: &str) -> Result<PoolPair, AmmError> {
        observed((|| {
            let pair = self.pair_of(a, b)?;
            self.registry.create(pair.clone(), self.config.fee)?;
            Ok(pair)
        })())
    }

    /// Deposit liquidity. Amounts are given per named asset and mapped onto
    /// the canonical pair ordering; both legs are debited up front and
    /// refunded in full if the deposit is rejected.
    pub fn add_liquidity(
        &self,
        provider: &str,
        asset_a: &str,
        amount_a: Decimal,
        asset_b: &str,
        amount_b: Decimal,
        min_shares: Decimal,
    ) -> Result<Decimal, AmmError> {
        observed((|| {
            let a = Asset::new(asset_a)?;
            let b = Asset::new(asset_b)?;
            let pair = PoolPair::new(a.clone(), b.clone())?;
            SwapEngine::validate_amount(amount_a, &self.config)?;
            SwapEngine::validate_amount(amount_b, &self.config)?;

            let now = self.clock.now_secs();
            self.risk.check_rate_limit(provider, &self.config, now)?;

            let (amount0, amount1) = if a == *pair.asset0() {
                (amount_a, amount_b)
            } else {
                (amount_b, amount_a)
            };

            let pool = self.registry.get(&pair)?;
            self.ledger.debit(provider, pair.asset0(), amount0)?;
            if let Err(err) = self.ledger.debit(provider, pair.asset1(), amount1) {
                self.ledger.credit(provider, pair.asset0(), amount0);
                return Err(err.into());
            }
            let result = pool.write().add_liquidity(
                provider,
                amount0,
                amount1,
                min_shares,
                &self.config,
                &self.oracle,
                now,
            );
            if result.is_err() {
                self.ledger.credit(provider, pair.asset0(), amount0);
                self.ledger.credit(provider, pair.asset1(), amount1);
            }
            result
        })())
    }

    /// Burn shares and credit the withdrawn reserves, in canonical pair
    /// order, plus any accrued fee share.
    pub fn remove_liquidity(
        &self,
        provider: &str,
        asset_a: &str,
        asset_b: &str,
        shares: Decimal,
    ) -> Result<(Decimal, Decimal), AmmError> {
        observed((|| {
            let pair = self.pair_of(asset_a, asset_b)?;
            let now = self.clock.now_secs();
            self.risk.check_rate_limit(provider, &self.config, now)?;

            let pool = self.registry.get(&pair)?;
            let (amount0, amount1) =
                pool.write()
                    .remove_liquidity(provider, shares, &self.oracle, now)?;

            self.ledger.credit(provider, pair.asset0(), amount0);
            self.ledger.credit(provider, pair.asset1(), amount1);
            Ok((amount0, amount1))
        })())
    }

    pub fn shares_of(&self, provider: &str, asset_a: &str, asset_b: &str) -> Decimal {
        self.pair_of(asset_a, asset_b)
            .ok()
            .and_then(|pair| self.registry.get(&pair).ok())
            .map(|pool| pool.read().shares_of(provider))
            .unwrap_or(Decimal::ZERO)
    }

    pub fn reserves(&self, asset_a: &str, asset_b: &str) -> Result<(Decimal, Decimal), AmmError> {
        observed((|| {
            let pair = self.pair_of(asset_a, asset_b)?;
            Ok(self.registry.get(&pair)?.read().reserves())
        })())
    }

    // --- pricing ---

    pub fn quote(
        &self,
        token_in: &str,
        token_out: &str,
        amount_in: Decimal,
    ) -> Result<Quote, AmmError> {
        observed((|| {
            let token_in = Asset::new(token_in)?;
            let pair = PoolPair::new(token_in.clone(), Asset::new(token_out)?)?;
            self.engine.quote(
                &pair,
                &token_in,
                amount_in,
                &self.config,
                self.clock.now_secs(),
            )
        })())
    }

    pub fn spot_price(&self, token_in: &str, token_out: &str) -> Result<Decimal, AmmError> {
        observed((|| {
            let token_in = Asset::new(token_in)?;
            let pair = PoolPair::new(token_in.clone(), Asset::new(token_out)?)?;
            self.engine.spot_price(&pair, &token_in)
        })())
    }

    /// Time-weighted average price of `of_asset` over the configured window.
    pub fn twap(&self, of_asset: &str, quoted_in: &str) -> Result<Option<Decimal>, AmmError> {
        observed((|| {
            let asset = Asset::new(of_asset)?;
            let pair = PoolPair::new(asset.clone(), Asset::new(quoted_in)?)?;
            Ok(self.oracle.twap(
                &pair,
                &asset,
                self.config.twap_window_secs,
                self.clock.now_secs(),
            ))
        })())
    }

    // --- swaps ---

    /// Unprotected swap for callers that accept front-running exposure.
    pub fn swap(
        &self,
        user: &str,
        token_in: &str,
        token_out: &str,
        amount_in: Decimal,
        min_amount_out: Decimal,
    ) -> Result<SwapReceipt, AmmError> {
        observed((|| {
            let token_in = Asset::new(token_in)?;
            let pair = PoolPair::new(token_in.clone(), Asset::new(token_out)?)?;
            self.engine.execute(
                user,
                &pair,
                &token_in,
                amount_in,
                min_amount_out,
                &self.config,
                self.clock.current_sequence(),
                self.clock.now_secs(),
            )
        })())
    }

    pub fn next_nonce(&self, user: &str) -> u64 {
        self.guard.next_nonce(user)
    }

    /// Phase one of a protected swap: register the intent hash.
    pub fn commit_swap(&self, user: &str, hash: &str, nonce: u64) -> Result<(), AmmError> {
        observed(
            self.guard
                .commit(user, hash, nonce, self.clock.current_sequence()),
        )
    }

    /// Phase two of a protected swap: disclose the intent and execute it.
    /// The commitment is consumed even if execution fails.
    pub fn reveal_swap(&self, hash: &str, intent: &SwapIntent) -> Result<SwapReceipt, AmmError> {
        observed((|| {
            let sequence = self.clock.current_sequence();
            self.guard.reveal(hash, intent, &self.config, sequence)?;
            let receipt = self.engine.execute(
                &intent.user,
                &intent.pool,
                &intent.token_in,
                intent.amount_in,
                intent.min_amount_out,
                &self.config,
                sequence,
                self.clock.now_secs(),
            )?;
            self.guard.mark_executed(hash);
            Ok(receipt)
        })())
    }

    /// Housekeeping: expire overdue commitments and drop stale records.
    pub fn purge_expired_commitments(&self) -> usize {
        self.guard
            .purge_expired(&self.config, self.clock.current_sequence())
    }

    // --- limit orders ---

    #[allow(clippy::too_many_arguments)]
    pub fn place_limit_order(
        &self,
        user: &str,
        token_in: &str,
        token_out: &str,
        amount_in: Decimal,
        limit_price: Decimal,
        expires_at_secs: Option<u64>,
    ) -> Result<Uuid, AmmError> {
        observed((|| {
            let token_in = Asset::new(token_in)?;
            let pair = PoolPair::new(token_in.clone(), Asset::new(token_out)?)?;
            // orders only rest against pools that exist
            self.registry.get(&pair)?;
            self.orders.place(
                user,
                pair,
                token_in,
                amount_in,
                limit_price,
                expires_at_secs,
                &self.config,
                self.clock.now_secs(),
            )
        })())
    }

    pub fn cancel_limit_order(&self, user: &str, id: Uuid) -> Result<(), AmmError> {
        observed(self.orders.cancel(id, user))
    }

    /// Fill every resting order the current price satisfies.
    pub fn match_limit_orders(
        &self,
        asset_a: &str,
        asset_b: &str,
    ) -> Result<Vec<SwapReceipt>, AmmError> {
        observed((|| {
            let pair = self.pair_of(asset_a, asset_b)?;
            Ok(self.orders.match_ready(
                &pair,
                &self.engine,
                &self.config,
                self.clock.current_sequence(),
                self.clock.now_secs(),
            ))
        })())
    }

    // --- administration ---

    pub fn lock_pool(&self, asset_a: &str, asset_b: &str, admin: &str) -> Result<(), AmmError> {
        observed((|| {
            let pair = self.pair_of(asset_a, asset_b)?;
            self.registry.get(&pair)?.write().lock();
            info!(pool = %pair, admin, "pool locked by admin");
            Ok(())
        })())
    }

    pub fn unlock_pool(&self, asset_a: &str, asset_b: &str, admin: &str) -> Result<(), AmmError> {
        observed((|| {
            let pair = self.pair_of(asset_a, asset_b)?;
            self.registry.get(&pair)?.write().unlock();
            info!(pool = %pair, admin, "pool unlocked by admin");
            Ok(())
        })())
    }

    pub fn reset_circuit_breaker(
        &self,
        asset_a: &str,
        asset_b: &str,
        admin: &str,
    ) -> Result<(), AmmError> {
        observed((|| {
            let pair = self.pair_of(asset_a, asset_b)?;
            self.registry.get(&pair)?;
            self.risk.reset_circuit_breaker(&pair, admin);
            Ok(())
        })())
    }

    pub fn is_circuit_breaker_tripped(&self, asset_a: &str, asset_b: &str) -> bool {
        self.pair_of(asset_a, asset_b)
            .map(|pair| self.risk.is_tripped(&pair))
            .unwrap_or(false)
    }
}
