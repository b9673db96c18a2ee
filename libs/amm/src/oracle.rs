//! Time-weighted average price oracle.
//!
//! Each pool carries a bounded ring buffer of [`PriceObservation`]s with
//! running cumulative price integrals. TWAP over a window is computed as
//! `(cumulative_end - cumulative_start) / (t_end - t_start)` — a pure function
//! over stored observations, deterministic and restartable. Spot price inside
//! one sequence number is trivially manipulable by a wash trade; accumulating
//! price over genuine elapsed time is not, which is why the risk checks trust
//! only the TWAP.

use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::trace;

use crate::asset::{Asset, PoolPair};

/// A single spot-price sample with cumulative integrals for both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub timestamp_secs: u64,
    /// Price of asset0 quoted in asset1 (reserve1 / reserve0).
    pub price0: Decimal,
    /// Price of asset1 quoted in asset0.
    pub price1: Decimal,
    /// Running sum of `price0 * elapsed`.
    pub cumulative0: Decimal,
    /// Running sum of `price1 * elapsed`.
    pub cumulative1: Decimal,
}

#[derive(Debug)]
struct ObservationRing {
    capacity: usize,
    observations: VecDeque<PriceObservation>,
}

impl ObservationRing {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            observations: VecDeque::with_capacity(capacity),
        }
    }

    fn push(&mut self, observation: PriceObservation) {
        if self.observations.len() == self.capacity {
            self.observations.pop_front();
        }
        self.observations.push_back(observation);
    }
}

/// Per-pool price history backing TWAP queries.
#[derive(Debug)]
pub struct PriceOracle {
    capacity: usize,
    series: DashMap<PoolPair, RwLock<ObservationRing>>,
}

impl PriceOracle {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            series: DashMap::new(),
        }
    }

    /// Record a pre-mutation observation for a pool.
    ///
    /// Called by the pool on every reserve-mutating operation, before the
    /// mutation is applied, so the TWAP reflects pre-trade state boundaries.
    /// A call with zero elapsed time since the previous observation is a
    /// no-op; a call on an empty pool is ignored.
    pub fn record_observation(
        &self,
        pool: &PoolPair,
        reserve0: Decimal,
        reserve1: Decimal,
        now_secs: u64,
    ) {
        if reserve0 <= Decimal::ZERO || reserve1 <= Decimal::ZERO {
            return;
        }

        let ring = self
            .series
            .entry(pool.clone())
            .or_insert_with(|| RwLock::new(ObservationRing::new(self.capacity)));
        let mut ring = ring.write();

        let price0 = reserve1 / reserve0;
        let price1 = reserve0 / reserve1;

        let observation = match ring.observations.back() {
            None => PriceObservation {
                timestamp_secs: now_secs,
                price0,
                price1,
                cumulative0: Decimal::ZERO,
                cumulative1: Decimal::ZERO,
            },
            Some(last) => {
                let elapsed = now_secs.saturating_sub(last.timestamp_secs);
                if elapsed == 0 {
                    return;
                }
                let dt = Decimal::from(elapsed);
                PriceObservation {
                    timestamp_secs: now_secs,
                    price0,
                    price1,
                    cumulative0: last.cumulative0 + price0 * dt,
                    cumulative1: last.cumulative1 + price1 * dt,
                }
            }
        };

        trace!(pool = %pool, timestamp = now_secs, price0 = %price0, "price observation");
        ring.push(observation);
    }

    /// Time-weighted average price of `asset` (quoted in the pool's other
    /// asset) over the trailing `window_secs`.
    ///
    /// Returns `None` unless at least two observations with distinct
    /// timestamps fall inside the window, or when `asset` is not in the pool.
    pub fn twap(
        &self,
        pool: &PoolPair,
        asset: &Asset,
        window_secs: u64,
        now_secs: u64,
    ) -> Option<Decimal> {
        if !pool.contains(asset) {
            return None;
        }
        let ring = self.series.get(pool)?;
        let ring = ring.read();

        let window_start = now_secs.saturating_sub(window_secs);
        let mut in_window = ring
            .observations
            .iter()
            .filter(|obs| obs.timestamp_secs >= window_start);

        let first = in_window.next()?;
        let last = in_window.last()?;
        let elapsed = last.timestamp_secs.checked_sub(first.timestamp_secs)?;
        if elapsed == 0 {
            return None;
        }

        let dt = Decimal::from(elapsed);
        if *asset == *pool.asset0() {
            Some((last.cumulative0 - first.cumulative0) / dt)
        } else {
            Some((last.cumulative1 - first.cumulative1) / dt)
        }
    }

    /// Number of stored observations for a pool.
    pub fn observation_count(&self, pool: &PoolPair) -> usize {
        self.series
            .get(pool)
            .map(|ring| ring.read().observations.len())
            .unwrap_or(0)
    }
}
