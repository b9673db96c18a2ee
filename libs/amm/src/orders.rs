//! Resting limit orders.
//!
//! A limit order sells a fixed input amount once the pool pays at least
//! `limit_price` per unit. Orders rest in a per-direction priority queue
//! keyed by (pool, input asset): the lowest limit price sits on top because
//! it is the first to become fillable as the price moves. Matching is driven
//! by the caller after price-moving events; each fill goes through the full
//! swap pipeline with `min_amount_out` derived from the limit price, so a
//! fill can never settle below the order's limit.

use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::asset::{Asset, PoolPair};
use crate::config::AmmConfig;
use crate::engine::{SwapEngine, SwapReceipt};
use crate::error::AmmError;
use amm_math as math;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitOrder {
    pub id: Uuid,
    pub user: String,
    pub pool: PoolPair,
    pub token_in: Asset,
    pub amount_in: Decimal,
    /// Minimum acceptable units of the output asset per unit of input.
    pub limit_price: Decimal,
    pub placed_at_secs: u64,
    /// Good-til-time; `None` rests until cancelled or filled.
    pub expires_at_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueuedOrder(LimitOrder);

impl Ord for QueuedOrder {
    // inverted so the max-heap pops the lowest limit price; ties go to the
    // order placed first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .0
            .limit_price
            .cmp(&self.0.limit_price)
            .then_with(|| other.0.placed_at_secs.cmp(&self.0.placed_at_secs))
    }
}

impl PartialOrd for QueuedOrder {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Order book over all pools, one queue per (pool, input asset) direction.
#[derive(Debug, Default)]
pub struct OrderBook {
    queues: DashMap<(PoolPair, Asset), Mutex<BinaryHeap<QueuedOrder>>>,
    /// Owner index for cancellation; removed once an order leaves the book.
    index: DashMap<Uuid, (PoolPair, Asset, String)>,
    cancelled: DashSet<Uuid>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rest a new limit order. The input amount is validated against the
    /// trade bounds now so the book never holds an unfillable order.
    #[allow(clippy::too_many_arguments)]
    pub fn place(
        &self,
        user: &str,
        pool: PoolPair,
        token_in: Asset,
        amount_in: Decimal,
        limit_price: Decimal,
        expires_at_secs: Option<u64>,
        config: &AmmConfig,
        now_secs: u64,
    ) -> Result<Uuid, AmmError> {
        if limit_price <= Decimal::ZERO {
            return Err(AmmError::InvalidLimitPrice { price: limit_price });
        }
        SwapEngine::validate_amount(amount_in, config)?;
        if !pool.contains(&token_in) {
            return Err(AmmError::AssetNotInPool {
                asset: token_in,
                pool,
            });
        }

        let order = LimitOrder {
            id: Uuid::new_v4(),
            user: user.to_string(),
            pool: pool.clone(),
            token_in: token_in.clone(),
            amount_in,
            limit_price,
            placed_at_secs: now_secs,
            expires_at_secs,
        };
        let id = order.id;

        self.index
            .insert(id, (pool.clone(), token_in.clone(), user.to_string()));
        self.queues
            .entry((pool.clone(), token_in))
            .or_insert_with(|| Mutex::new(BinaryHeap::new()))
            .lock()
            .push(QueuedOrder(order));

        info!(order_id = %id, user, pool = %pool, %amount_in, %limit_price, "limit order placed");
        Ok(id)
    }

    /// Cancel an open order. Only the owner may cancel; the heap entry is
    /// dropped lazily the next time matching reaches it.
    pub fn cancel(&self, id: Uuid, user: &str) -> Result<(), AmmError> {
        match self.index.get(&id) {
            Some(entry) if entry.2 == user => {}
            _ => return Err(AmmError::OrderNotFound { id }),
        }
        self.index.remove(&id);
        self.cancelled.insert(id);
        info!(order_id = %id, user, "limit order cancelled");
        Ok(())
    }

    /// Number of open orders for one direction of a pool.
    pub fn open_orders(&self, pool: &PoolPair, token_in: &Asset) -> usize {
        self.index
            .iter()
            .filter(|entry| entry.0 == *pool && entry.1 == *token_in)
            .count()
    }

    /// Fill every order whose limit the pool currently meets, best first.
    ///
    /// Each fill re-prices the pool, so later orders are checked against the
    /// moved price; an order that no longer clears its limit stays in the
    /// book. Fill failures of any kind (moved price, short balance, risk
    /// gates) also leave the order resting.
    pub fn match_ready(
        &self,
        pool: &PoolPair,
        engine: &SwapEngine,
        config: &AmmConfig,
        sequence: u64,
        now_secs: u64,
    ) -> Vec<SwapReceipt> {
        let mut receipts = Vec::new();
        for token_in in [pool.asset0().clone(), pool.asset1().clone()] {
            let Some(queue) = self.queues.get(&(pool.clone(), token_in.clone())) else {
                continue;
            };
            let mut heap = queue.lock();
            let mut retained = Vec::new();

            while let Some(top) = heap.peek() {
                if self.cancelled.remove(&top.0.id).is_some() {
                    heap.pop();
                    continue;
                }
                if matches!(top.0.expires_at_secs, Some(expiry) if expiry <= now_secs) {
                    let expired = heap.pop().expect("peeked entry present");
                    self.index.remove(&expired.0.id);
                    debug!(order_id = %expired.0.id, "limit order expired");
                    continue;
                }
                let spot = match engine.spot_price(pool, &token_in) {
                    Ok(spot) => spot,
                    Err(_) => break,
                };
                if top.0.limit_price > spot {
                    break;
                }

                let queued = heap.pop().expect("peeked entry present");
                let order = &queued.0;
                let min_out = match math::checked_mul(order.amount_in, order.limit_price) {
                    Ok(product) => math::quantize(product),
                    Err(_) => {
                        retained.push(queued);
                        continue;
                    }
                };
                match engine.execute(
                    &order.user,
                    pool,
                    &token_in,
                    order.amount_in,
                    min_out,
                    config,
                    sequence,
                    now_secs,
                ) {
                    Ok(receipt) => {
                        self.index.remove(&order.id);
                        receipts.push(receipt);
                    }
                    Err(err) => {
                        debug!(order_id = %order.id, error = %err, "limit order fill deferred");
                        retained.push(queued);
                    }
                }
            }
            for queued in retained {
                heap.push(queued);
            }
        }
        receipts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{BalanceLedger, InMemoryLedger};
    use crate::oracle::PriceOracle;
    use crate::pool::PoolRegistry;
    use crate::risk::RiskController;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn pair() -> PoolPair {
        PoolPair::new(Asset::new("eth").unwrap(), Asset::new("usdc").unwrap()).unwrap()
    }

    fn setup() -> (SwapEngine, Arc<InMemoryLedger>, AmmConfig) {
        let config = AmmConfig {
            rate_limit_secs: 0,
            ..AmmConfig::default()
        };
        let registry = Arc::new(PoolRegistry::new());
        let oracle = Arc::new(PriceOracle::new(config.observation_capacity));
        let risk = Arc::new(RiskController::new());
        let ledger = Arc::new(InMemoryLedger::new());

        registry.create(pair(), config.fee).unwrap();
        let pool = registry.get(&pair()).unwrap();
        pool.write()
            .add_liquidity(
                "lp",
                dec!(10),
                dec!(20000),
                Decimal::ZERO,
                &config,
                &oracle,
                1_700_000_000,
            )
            .unwrap();

        let engine = SwapEngine::new(registry, oracle, risk, Arc::clone(&ledger) as _);
        (engine, ledger, config)
    }

    #[test]
    fn non_positive_limit_price_rejected() {
        let book = OrderBook::new();
        let config = AmmConfig::default();
        let err = book
            .place(
                "alice",
                pair(),
                Asset::new("eth").unwrap(),
                dec!(1),
                Decimal::ZERO,
                None,
                &config,
                1_700_000_000,
            )
            .unwrap_err();
        assert!(matches!(err, AmmError::InvalidLimitPrice { .. }));
    }

    #[test]
    fn only_owner_can_cancel() {
        let book = OrderBook::new();
        let config = AmmConfig::default();
        let eth = Asset::new("eth").unwrap();
        let id = book
            .place("alice", pair(), eth.clone(), dec!(1), dec!(2100), None, &config, 0)
            .unwrap();

        let err = book.cancel(id, "mallory").unwrap_err();
        assert!(matches!(err, AmmError::OrderNotFound { .. }));
        book.cancel(id, "alice").unwrap();
        assert_eq!(book.open_orders(&pair(), &eth), 0);
        // double cancel fails
        assert!(book.cancel(id, "alice").is_err());
    }

    #[test]
    fn order_above_spot_rests_until_price_reaches_it() {
        let (engine, ledger, config) = setup();
        let book = OrderBook::new();
        let eth = Asset::new("eth").unwrap();
        let usdc = Asset::new("usdc").unwrap();
        ledger.mint("alice", &eth, dec!(1));
        ledger.mint("buyer", &usdc, dec!(2000));

        // spot is 2000; a sell at 2100 cannot fill yet
        book.place(
            "alice",
            pair(),
            eth.clone(),
            dec!(0.1),
            dec!(2100),
            None,
            &config,
            1_700_000_000,
        )
        .unwrap();
        assert!(book
            .match_ready(&pair(), &engine, &config, 1, 1_700_000_060)
            .is_empty());

        // a large usdc buy pushes the eth price above the limit
        engine
            .execute(
                "buyer",
                &pair(),
                &usdc,
                dec!(1000),
                Decimal::ZERO,
                &config,
                2,
                1_700_000_120,
            )
            .unwrap();

        let receipts = book.match_ready(&pair(), &engine, &config, 3, 1_700_000_180);
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].user, "alice");
        // the fill respects the limit price
        assert!(receipts[0].amount_out >= dec!(0.1) * dec!(2100));
        assert_eq!(book.open_orders(&pair(), &eth), 0);
    }

    #[test]
    fn lowest_limit_fills_first() {
        let (engine, ledger, config) = setup();
        let book = OrderBook::new();
        let eth = Asset::new("eth").unwrap();
        ledger.mint("alice", &eth, dec!(1));
        ledger.mint("bob", &eth, dec!(1));

        book.place(
            "bob",
            pair(),
            eth.clone(),
            dec!(0.01),
            dec!(1950),
            None,
            &config,
            1_700_000_000,
        )
        .unwrap();
        book.place(
            "alice",
            pair(),
            eth.clone(),
            dec!(0.01),
            dec!(1900),
            None,
            &config,
            1_700_000_010,
        )
        .unwrap();

        let receipts = book.match_ready(&pair(), &engine, &config, 1, 1_700_000_060);
        assert_eq!(receipts.len(), 2);
        assert_eq!(receipts[0].user, "alice");
        assert_eq!(receipts[1].user, "bob");
    }

    #[test]
    fn cancelled_order_never_fills() {
        let (engine, ledger, config) = setup();
        let book = OrderBook::new();
        let eth = Asset::new("eth").unwrap();
        ledger.mint("alice", &eth, dec!(1));

        let id = book
            .place(
                "alice",
                pair(),
                eth.clone(),
                dec!(0.01),
                dec!(1900),
                None,
                &config,
                1_700_000_000,
            )
            .unwrap();
        book.cancel(id, "alice").unwrap();

        assert!(book
            .match_ready(&pair(), &engine, &config, 1, 1_700_000_060)
            .is_empty());
        assert_eq!(ledger.balance("alice", &eth), dec!(1));
    }

    #[test]
    fn expired_order_is_dropped_not_filled() {
        let (engine, ledger, config) = setup();
        let book = OrderBook::new();
        let eth = Asset::new("eth").unwrap();
        ledger.mint("alice", &eth, dec!(1));

        // immediately fillable, but already past its good-til time
        book.place(
            "alice",
            pair(),
            eth.clone(),
            dec!(0.01),
            dec!(1900),
            Some(1_700_000_030),
            &config,
            1_700_000_000,
        )
        .unwrap();

        assert!(book
            .match_ready(&pair(), &engine, &config, 1, 1_700_000_060)
            .is_empty());
        assert_eq!(book.open_orders(&pair(), &eth), 0);
        assert_eq!(ledger.balance("alice", &eth), dec!(1));
    }

    #[test]
    fn unfunded_order_stays_in_the_book() {
        let (engine, _ledger, config) = setup();
        let book = OrderBook::new();
        let eth = Asset::new("eth").unwrap();

        book.place(
            "broke",
            pair(),
            eth.clone(),
            dec!(0.01),
            dec!(1900),
            None,
            &config,
            1_700_000_000,
        )
        .unwrap();

        assert!(book
            .match_ready(&pair(), &engine, &config, 1, 1_700_000_060)
            .is_empty());
        assert_eq!(book.open_orders(&pair(), &eth), 1);
    }
}
