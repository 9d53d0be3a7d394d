//! Trade records emitted by the ledger.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::FundlabError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeAction {
    /// Rebalance or signal-driven purchase.
    Buy,
    /// Partial reduction of a holding.
    Sell,
    /// Full exit: risk event or instrument dropped from the basket.
    Liquidate,
    /// Periodic base-amount purchase while history is still accumulating.
    Accumulate,
}

impl TradeAction {
    pub const ALL: [TradeAction; 4] = [
        TradeAction::Buy,
        TradeAction::Sell,
        TradeAction::Liquidate,
        TradeAction::Accumulate,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            TradeAction::Buy => "BUY",
            TradeAction::Sell => "SELL",
            TradeAction::Liquidate => "LIQUIDATE",
            TradeAction::Accumulate => "ACCUMULATE",
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, TradeAction::Buy | TradeAction::Accumulate)
    }

    pub fn is_sell(&self) -> bool {
        !self.is_buy()
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TradeAction {
    type Err = FundlabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TradeAction::ALL
            .into_iter()
            .find(|a| a.label() == s)
            .ok_or_else(|| FundlabError::DataFormat {
                reason: format!("unknown trade action label `{s}`"),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub date: NaiveDate,
    pub code: String,
    pub action: TradeAction,
    /// Gross cash value of the trade (shares x price), before fees.
    pub amount: f64,
    pub price: f64,
    pub shares: f64,
    pub fee: f64,
    pub cash_after: f64,
    pub position_after: f64,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_round_trip() {
        for action in TradeAction::ALL {
            assert_eq!(action.label().parse::<TradeAction>().unwrap(), action);
        }
    }

    #[test]
    fn unknown_label_is_rejected() {
        assert!("buy".parse::<TradeAction>().is_err());
        assert!("HOLD".parse::<TradeAction>().is_err());
    }

    #[test]
    fn direction_helpers() {
        assert!(TradeAction::Accumulate.is_buy());
        assert!(TradeAction::Liquidate.is_sell());
        assert!(!TradeAction::Sell.is_buy());
    }
}
