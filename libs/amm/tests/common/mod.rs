#![allow(dead_code)]

use amm_engine::{Amm, AmmConfig, InMemoryLedger, ManualClock};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

pub struct Harness {
    pub amm: Amm,
    pub ledger: Arc<InMemoryLedger>,
    pub clock: Arc<ManualClock>,
}

/// Engine with an eth/usdc pool at 10 eth / 20000 usdc (spot 2000), the
/// provider "lp" holding all shares and rate limiting disabled so tests can
/// act back to back.
pub fn harness() -> Harness {
    harness_with(AmmConfig {
        rate_limit_secs: 0,
        ..AmmConfig::default()
    })
}

pub fn harness_with(config: AmmConfig) -> Harness {
    let ledger = Arc::new(InMemoryLedger::new());
    let clock = Arc::new(ManualClock::new(1_700_000_000));
    let amm = Amm::new(
        config,
        Arc::clone(&ledger) as _,
        Arc::clone(&clock) as _,
    )
    .expect("valid config");

    mint(&ledger, "lp", "eth", dec!(100));
    mint(&ledger, "lp", "usdc", dec!(200000));
    amm.create_pool("eth", "usdc").unwrap();
    amm.add_liquidity("lp", "eth", dec!(10), "usdc", dec!(20000), Decimal::ZERO)
        .unwrap();

    Harness { amm, ledger, clock }
}

pub fn mint(ledger: &InMemoryLedger, user: &str, asset: &str, amount: Decimal) {
    ledger.mint(user, &amm_engine::Asset::new(asset).unwrap(), amount);
}

pub fn balance(ledger: &InMemoryLedger, user: &str, asset: &str) -> Decimal {
    use amm_engine::BalanceLedger;
    ledger.balance(user, &amm_engine::Asset::new(asset).unwrap())
}
