//! Target-weight rebalancing against the ledger.
//!
//! Steps:
//! 1. Value the ledger at today's prices
//! 2. Liquidate holdings absent from the target basket
//! 3. Compute target shares = total value x weight / price per basket entry
//! 4. Execute sells, then buys (so sale proceeds fund purchases)
//!
//! Deltas worth less than [`MIN_TRADE_VALUE`] are left alone. Buys are
//! clamped to cash, sells to held shares.

use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::{debug, warn};

use super::ledger::{Ledger, MIN_TRADE_VALUE};
use super::trade::{TradeAction, TradeRecord};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RebalanceOutcome {
    pub trades: Vec<TradeRecord>,
    /// Basket instruments skipped because no price was available.
    pub skipped: Vec<String>,
}

pub fn rebalance(
    ledger: &mut Ledger,
    basket: &[String],
    weights: &[f64],
    prices: &HashMap<String, f64>,
    date: NaiveDate,
) -> RebalanceOutcome {
    let mut outcome = RebalanceOutcome::default();
    ledger.mark_to_market(prices);
    let total = ledger.total_value();

    let stale: Vec<(String, f64)> = ledger
        .holdings()
        .filter(|h| !basket.contains(&h.code))
        .map(|h| (h.code.clone(), h.shares))
        .collect();
    for (code, shares) in stale {
        let price = prices
            .get(&code)
            .copied()
            .or_else(|| ledger.holding(&code).map(|h| h.last_price))
            .unwrap_or(0.0);
        if let Some(t) = ledger.sell(date, &code, price, shares, TradeAction::Liquidate, "dropped from basket") {
            outcome.trades.push(t);
        }
    }

    let mut buys: Vec<(String, f64, f64)> = Vec::new();
    for (code, weight) in basket.iter().zip(weights) {
        let Some(&price) = prices.get(code).filter(|p| **p > 0.0) else {
            warn!(%date, code = %code, "no price for basket instrument, skipping");
            outcome.skipped.push(code.clone());
            continue;
        };
        let target_shares = total * weight / price;
        let delta = target_shares - ledger.shares_of(code);
        if (delta * price).abs() < MIN_TRADE_VALUE {
            continue;
        }
        if delta < 0.0 {
            if let Some(t) = ledger.sell(date, code, price, -delta, TradeAction::Sell, "rebalance") {
                outcome.trades.push(t);
            }
        } else {
            buys.push((code.clone(), price, delta * price));
        }
    }

    for (code, price, amount) in buys {
        match ledger.buy(date, &code, price, amount, TradeAction::Buy, "rebalance") {
            Some(t) => outcome.trades.push(t),
            None => debug!(%date, code = %code, "buy skipped, insufficient cash"),
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn prices(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(c, p)| (c.to_string(), *p)).collect()
    }

    fn basket(codes: &[&str]) -> Vec<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn initial_allocation_from_cash() {
        let mut ledger = Ledger::new(10_000.0);
        let out = rebalance(
            &mut ledger,
            &basket(&["A", "B"]),
            &[0.5, 0.5],
            &prices(&[("A", 10.0), ("B", 20.0)]),
            date(),
        );
        assert_eq!(out.trades.len(), 2);
        assert!((ledger.shares_of("A") - 500.0).abs() < 1e-9);
        assert!((ledger.shares_of("B") - 250.0).abs() < 1e-9);
        assert!(ledger.cash.abs() < 1e-6);
    }

    #[test]
    fn absent_holdings_are_liquidated_first() {
        let mut ledger = Ledger::new(10_000.0);
        ledger.buy(date(), "OLD", 10.0, 10_000.0, TradeAction::Buy, "");
        let out = rebalance(
            &mut ledger,
            &basket(&["NEW"]),
            &[1.0],
            &prices(&[("OLD", 11.0), ("NEW", 5.0)]),
            date(),
        );
        assert_eq!(out.trades[0].action, TradeAction::Liquidate);
        assert_eq!(out.trades[0].code, "OLD");
        assert_eq!(out.trades[1].action, TradeAction::Buy);
        assert!(!ledger.has_holding("OLD"));
        assert!((ledger.shares_of("NEW") - 2_200.0).abs() < 1e-6);
    }

    #[test]
    fn sells_run_before_buys() {
        let mut ledger = Ledger::new(1_000.0);
        ledger.buy(date(), "A", 10.0, 1_000.0, TradeAction::Buy, "");
        // all in A; shift to 50/50 with B
        let out = rebalance(
            &mut ledger,
            &basket(&["B", "A"]),
            &[0.5, 0.5],
            &prices(&[("A", 10.0), ("B", 10.0)]),
            date(),
        );
        assert_eq!(out.trades[0].action, TradeAction::Sell);
        assert_eq!(out.trades[0].code, "A");
        assert_eq!(out.trades[1].action, TradeAction::Buy);
        assert!((ledger.shares_of("B") - 50.0).abs() < 1e-9);
    }

    #[test]
    fn missing_price_is_skipped() {
        let mut ledger = Ledger::new(1_000.0);
        let out = rebalance(
            &mut ledger,
            &basket(&["A", "B"]),
            &[0.5, 0.5],
            &prices(&[("A", 10.0)]),
            date(),
        );
        assert_eq!(out.skipped, vec!["B".to_string()]);
        assert_eq!(out.trades.len(), 1);
    }

    #[test]
    fn already_balanced_is_noop() {
        let mut ledger = Ledger::new(1_000.0);
        let p = prices(&[("A", 10.0)]);
        rebalance(&mut ledger, &basket(&["A"]), &[1.0], &p, date());
        let out = rebalance(&mut ledger, &basket(&["A"]), &[1.0], &p, date());
        assert!(out.trades.is_empty());
    }

    #[test]
    fn fees_never_overdraw_cash() {
        let mut ledger = Ledger::new(10_000.0).with_fee_rate(0.001);
        rebalance(
            &mut ledger,
            &basket(&["A", "B", "C"]),
            &[0.4, 0.3, 0.3],
            &prices(&[("A", 1.0), ("B", 2.0), ("C", 3.0)]),
            date(),
        );
        assert!(ledger.cash >= -1e-9);
    }
}
