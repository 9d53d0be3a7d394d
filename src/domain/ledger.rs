//! Cash and holdings for a single run.
//!
//! Orders are clamped, never rejected: a buy larger than available cash
//! buys what the cash allows, a sell larger than the holding sells the
//! holding. Orders worth less than [`MIN_TRADE_VALUE`] are ignored.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::trade::{TradeAction, TradeRecord};

pub const MIN_TRADE_VALUE: f64 = 0.01;
const SHARE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub code: String,
    pub shares: f64,
    pub average_cost: f64,
    pub last_price: f64,
}

impl Holding {
    pub fn market_value(&self) -> f64 {
        self.shares * self.last_price
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.shares * (self.last_price - self.average_cost)
    }

    /// Return of the holding relative to its average cost.
    pub fn unrealized_return(&self) -> f64 {
        if self.average_cost > 0.0 {
            self.last_price / self.average_cost - 1.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ledger {
    pub cash: f64,
    pub fee_rate: f64,
    holdings: BTreeMap<String, Holding>,
}

impl Ledger {
    pub fn new(initial_cash: f64) -> Self {
        Ledger {
            cash: initial_cash,
            fee_rate: 0.0,
            holdings: BTreeMap::new(),
        }
    }

    pub fn with_fee_rate(mut self, fee_rate: f64) -> Self {
        self.fee_rate = fee_rate.max(0.0);
        self
    }

    pub fn holding(&self, code: &str) -> Option<&Holding> {
        self.holdings.get(code)
    }

    pub fn has_holding(&self, code: &str) -> bool {
        self.holdings.contains_key(code)
    }

    pub fn holdings(&self) -> impl Iterator<Item = &Holding> {
        self.holdings.values()
    }

    pub fn holding_count(&self) -> usize {
        self.holdings.len()
    }

    pub fn shares_of(&self, code: &str) -> f64 {
        self.holdings.get(code).map(|h| h.shares).unwrap_or(0.0)
    }

    /// Update last prices; instruments without a price keep their last one.
    pub fn mark_to_market(&mut self, prices: &HashMap<String, f64>) {
        for holding in self.holdings.values_mut() {
            if let Some(&price) = prices.get(&holding.code) {
                holding.last_price = price;
            }
        }
    }

    pub fn holdings_value(&self) -> f64 {
        self.holdings.values().map(Holding::market_value).sum()
    }

    pub fn total_value(&self) -> f64 {
        self.cash + self.holdings_value()
    }

    /// Buy up to `amount` of cash worth of `code` at `price`.
    pub fn buy(
        &mut self,
        date: NaiveDate,
        code: &str,
        price: f64,
        amount: f64,
        action: TradeAction,
        reason: &str,
    ) -> Option<TradeRecord> {
        if !(price > 0.0) || !(amount > 0.0) {
            return None;
        }
        let affordable = (self.cash / (1.0 + self.fee_rate)).max(0.0);
        let gross = amount.min(affordable);
        if gross < MIN_TRADE_VALUE {
            return None;
        }
        let shares = gross / price;
        let fee = gross * self.fee_rate;
        self.cash -= gross + fee;

        let holding = self
            .holdings
            .entry(code.to_string())
            .or_insert_with(|| Holding {
                code: code.to_string(),
                shares: 0.0,
                average_cost: 0.0,
                last_price: price,
            });
        let new_shares = holding.shares + shares;
        holding.average_cost = (holding.shares * holding.average_cost + shares * price) / new_shares;
        holding.shares = new_shares;
        holding.last_price = price;

        Some(TradeRecord {
            date,
            code: code.to_string(),
            action,
            amount: gross,
            price,
            shares,
            fee,
            cash_after: self.cash,
            position_after: new_shares,
            reason: reason.to_string(),
        })
    }

    /// Sell up to `shares` of `code` at `price`. Average cost is unchanged.
    pub fn sell(
        &mut self,
        date: NaiveDate,
        code: &str,
        price: f64,
        shares: f64,
        action: TradeAction,
        reason: &str,
    ) -> Option<TradeRecord> {
        if !(price > 0.0) || !(shares > 0.0) {
            return None;
        }
        let holding = self.holdings.get_mut(code)?;
        let sold = shares.min(holding.shares);
        let gross = sold * price;
        if gross < MIN_TRADE_VALUE && sold < holding.shares {
            return None;
        }
        let fee = gross * self.fee_rate;
        holding.shares -= sold;
        holding.last_price = price;
        let remaining = if holding.shares <= SHARE_EPSILON {
            self.holdings.remove(code);
            0.0
        } else {
            holding.shares
        };
        self.cash += gross - fee;

        Some(TradeRecord {
            date,
            code: code.to_string(),
            action,
            amount: gross,
            price,
            shares: sold,
            fee,
            cash_after: self.cash,
            position_after: remaining,
            reason: reason.to_string(),
        })
    }

    /// Sell every holding at its last price, in code order.
    pub fn liquidate_all(&mut self, date: NaiveDate, reason: &str) -> Vec<TradeRecord> {
        let open: Vec<(String, f64, f64)> = self
            .holdings
            .values()
            .map(|h| (h.code.clone(), h.last_price, h.shares))
            .collect();
        open.into_iter()
            .filter_map(|(code, price, shares)| {
                self.sell(date, &code, price, shares, TradeAction::Liquidate, reason)
            })
            .collect()
    }
}
