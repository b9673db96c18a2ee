//! Engine configuration.
//!
//! Serde-backed parameter set with production defaults, JSON file loading,
//! environment variable overrides and validation. All tunables live here so
//! no component hardcodes a protection threshold.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Complete configuration for the exchange engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmmConfig {
    /// Swap fee as a fraction of the input (0.003 = 0.3%).
    pub fee: Decimal,
    /// Maximum tolerated price impact for a single swap.
    pub max_price_impact: Decimal,
    /// Maximum spot-vs-TWAP deviation before a swap is treated as
    /// manipulation and the pool is locked.
    pub max_twap_deviation: Decimal,
    /// Smallest accepted trade or deposit amount.
    pub min_trade_amount: Decimal,
    /// Largest accepted trade or deposit amount.
    pub max_trade_amount: Decimal,
    /// Allowed relative deviation of a follow-up deposit from the pool ratio.
    pub ratio_tolerance: Decimal,
    /// Share floor permanently locked on first mint, preventing share-price
    /// manipulation via a near-empty pool.
    pub minimum_liquidity: Decimal,
    /// TWAP lookback window in seconds.
    pub twap_window_secs: u64,
    /// Ring buffer capacity for price observations per pool.
    pub observation_capacity: usize,
    /// Sequence numbers that must elapse between commit and reveal.
    pub min_reveal_delay: u64,
    /// Sequence numbers after which an unrevealed commitment expires.
    pub max_reveal_window: u64,
    /// Per-pool swap cap within a single sequence number.
    pub max_swaps_per_block: u32,
    /// Per-user minimum interval between state-changing actions, in seconds.
    /// Zero disables rate limiting.
    pub rate_limit_secs: u64,
}

impl Default for AmmConfig {
    fn default() -> Self {
        Self {
            fee: dec!(0.003),                    // 0.3%
            max_price_impact: dec!(0.10),        // 10%
            max_twap_deviation: dec!(0.20),      // 20%
            min_trade_amount: dec!(0.000001),
            max_trade_amount: dec!(1000000000),
            ratio_tolerance: dec!(0.02),         // 2%
            minimum_liquidity: dec!(0.001),
            twap_window_secs: 900,               // 15 minutes
            observation_capacity: 128,
            min_reveal_delay: 2,
            max_reveal_window: 64,
            max_swaps_per_block: 10,
            rate_limit_secs: 1,
        }
    }
}

impl AmmConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(fee) = std::env::var("AMM_FEE") {
            if let Ok(value) = fee.parse::<Decimal>() {
                config.fee = value;
            }
        }
        if let Ok(impact) = std::env::var("AMM_MAX_PRICE_IMPACT") {
            if let Ok(value) = impact.parse::<Decimal>() {
                config.max_price_impact = value;
            }
        }
        if let Ok(window) = std::env::var("AMM_TWAP_WINDOW_SECS") {
            if let Ok(value) = window.parse::<u64>() {
                config.twap_window_secs = value;
            }
        }
        if let Ok(cap) = std::env::var("AMM_MAX_SWAPS_PER_BLOCK") {
            if let Ok(value) = cap.parse::<u32>() {
                config.max_swaps_per_block = value;
            }
        }
        if let Ok(interval) = std::env::var("AMM_RATE_LIMIT_SECS") {
            if let Ok(value) = interval.parse::<u64>() {
                config.rate_limit_secs = value;
            }
        }

        config
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.fee < Decimal::ZERO || self.fee >= Decimal::ONE {
            anyhow::bail!("fee must be in [0, 1)");
        }
        if self.max_price_impact <= Decimal::ZERO || self.max_price_impact > Decimal::ONE {
            anyhow::bail!("max_price_impact must be in (0, 1]");
        }
        if self.max_twap_deviation <= Decimal::ZERO {
            anyhow::bail!("max_twap_deviation must be positive");
        }
        if self.min_trade_amount <= Decimal::ZERO
            || self.min_trade_amount >= self.max_trade_amount
        {
            anyhow::bail!("trade bounds must satisfy 0 < min < max");
        }
        if self.ratio_tolerance <= Decimal::ZERO || self.ratio_tolerance >= Decimal::ONE {
            anyhow::bail!("ratio_tolerance must be in (0, 1)");
        }
        if self.minimum_liquidity <= Decimal::ZERO {
            anyhow::bail!("minimum_liquidity must be positive");
        }
        if self.observation_capacity < 2 {
            anyhow::bail!("observation_capacity must hold at least two observations");
        }
        if self.max_reveal_window <= self.min_reveal_delay {
            anyhow::bail!("max_reveal_window must exceed min_reveal_delay");
        }
        if self.max_swaps_per_block == 0 {
            anyhow::bail!("max_swaps_per_block must be positive");
        }
        Ok(())
    }
}
