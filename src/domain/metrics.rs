//! Performance metrics as a registry of pure functions.
//!
//! Every metric reads a shared [`MetricContext`] whose derived series
//! (daily returns, benchmark returns, excess returns, trade rounds) are
//! computed once on first use. An equity curve shorter than two points
//! makes every metric report its neutral value, and so does any
//! computation that produces a non-finite number.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cell::OnceCell;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

use super::backtest::BacktestResult;
use super::error::FundlabError;
use super::ledger::EquityPoint;
use super::price_series::simple_return;
use super::stats::{self, TRADING_DAYS_PER_YEAR};
use super::trade::TradeRecord;

/// z-score of the 95% one-sided normal quantile.
const VAR_Z_95: f64 = 1.6449;
const PROFIT_LOSS_CAP: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricDimension {
    Return,
    Risk,
    RiskAdjusted,
    Benchmark,
    Trading,
}

impl MetricDimension {
    pub const ALL: [MetricDimension; 5] = [
        MetricDimension::Return,
        MetricDimension::Risk,
        MetricDimension::RiskAdjusted,
        MetricDimension::Benchmark,
        MetricDimension::Trading,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricDimension::Return => "return",
            MetricDimension::Risk => "risk",
            MetricDimension::RiskAdjusted => "risk_adjusted",
            MetricDimension::Benchmark => "benchmark",
            MetricDimension::Trading => "trading",
        }
    }
}

impl fmt::Display for MetricDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed sell-side rounds from replaying trades at average cost.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TradeRounds {
    pub wins: usize,
    pub losses: usize,
    pub total: usize,
    pub gross_profit: f64,
    pub gross_loss: f64,
}

pub struct MetricContext<'a> {
    equity: &'a [EquityPoint],
    trades: &'a [TradeRecord],
    benchmark: &'a [EquityPoint],
    risk_free_rate: f64,
    returns: OnceCell<Vec<f64>>,
    benchmark_returns: OnceCell<Vec<f64>>,
    excess_returns: OnceCell<Vec<f64>>,
    rounds: OnceCell<TradeRounds>,
}

impl<'a> MetricContext<'a> {
    pub fn new(equity: &'a [EquityPoint], trades: &'a [TradeRecord]) -> Self {
        MetricContext {
            equity,
            trades,
            benchmark: &[],
            risk_free_rate: 0.0,
            returns: OnceCell::new(),
            benchmark_returns: OnceCell::new(),
            excess_returns: OnceCell::new(),
            rounds: OnceCell::new(),
        }
    }

    pub fn from_result(result: &'a BacktestResult, risk_free_rate: f64) -> Self {
        MetricContext::new(&result.equity_curve, &result.trades)
            .with_benchmark(&result.benchmark)
            .with_risk_free_rate(risk_free_rate)
    }

    pub fn with_benchmark(mut self, benchmark: &'a [EquityPoint]) -> Self {
        self.benchmark = benchmark;
        self
    }

    pub fn with_risk_free_rate(mut self, rate: f64) -> Self {
        self.risk_free_rate = rate;
        self
    }

    pub fn equity(&self) -> &[EquityPoint] {
        self.equity
    }

    pub fn trades(&self) -> &[TradeRecord] {
        self.trades
    }

    pub fn is_degenerate(&self) -> bool {
        self.equity.len() < 2
    }

    pub fn has_benchmark(&self) -> bool {
        self.benchmark.len() >= 2
    }

    pub fn daily_risk_free(&self) -> f64 {
        self.risk_free_rate / TRADING_DAYS_PER_YEAR
    }

    pub fn returns(&self) -> &[f64] {
        self.returns.get_or_init(|| {
            self.equity
                .windows(2)
                .map(|w| simple_return(w[0].equity, w[1].equity))
                .collect()
        })
    }

    /// Benchmark returns aligned to [`Self::returns`]; a day without a
    /// benchmark price on both ends counts as zero.
    pub fn benchmark_returns(&self) -> &[f64] {
        self.benchmark_returns.get_or_init(|| {
            if !self.has_benchmark() {
                return Vec::new();
            }
            let by_date: HashMap<NaiveDate, f64> = self.benchmark.iter().map(|p| (p.date, p.equity)).collect();
            self.equity
                .windows(2)
                .map(|w| match (by_date.get(&w[0].date), by_date.get(&w[1].date)) {
                    (Some(&a), Some(&b)) => simple_return(a, b),
                    _ => 0.0,
                })
                .collect()
        })
    }

    pub fn excess_returns(&self) -> &[f64] {
        self.excess_returns.get_or_init(|| {
            let rf = self.daily_risk_free();
            self.returns().iter().map(|r| r - rf).collect()
        })
    }

    pub fn rounds(&self) -> TradeRounds {
        *self.rounds.get_or_init(|| replay_rounds(self.trades))
    }

    pub fn total_return(&self) -> f64 {
        match (self.equity.first(), self.equity.last()) {
            (Some(first), Some(last)) => simple_return(first.equity, last.equity),
            _ => 0.0,
        }
    }

    pub fn annualized_return(&self) -> f64 {
        let growth = 1.0 + self.total_return();
        if growth <= 0.0 {
            return -1.0;
        }
        let years = (self.equity.len().saturating_sub(1)) as f64 / TRADING_DAYS_PER_YEAR;
        if years > 0.0 {
            growth.powf(1.0 / years) - 1.0
        } else {
            0.0
        }
    }

    pub fn max_drawdown(&self) -> f64 {
        let values: Vec<f64> = self.equity.iter().map(|p| p.equity).collect();
        stats::max_drawdown(&values)
    }

    pub fn benchmark_return(&self) -> f64 {
        if !self.has_benchmark() {
            return 0.0;
        }
        match (self.benchmark.first(), self.benchmark.last()) {
            (Some(first), Some(last)) => simple_return(first.equity, last.equity),
            _ => 0.0,
        }
    }

    pub fn beta(&self) -> f64 {
        let bench = self.benchmark_returns();
        if bench.is_empty() {
            return 0.0;
        }
        let var = stats::std_dev(bench).powi(2);
        if var > 0.0 {
            stats::covariance(self.returns(), bench) / var
        } else {
            0.0
        }
    }

    fn downside_deviation_daily(&self) -> f64 {
        let excess = self.excess_returns();
        if excess.is_empty() {
            return 0.0;
        }
        let sum_sq: f64 = excess.iter().map(|r| r.min(0.0).powi(2)).sum();
        (sum_sq / excess.len() as f64).sqrt()
    }
}

fn replay_rounds(trades: &[TradeRecord]) -> TradeRounds {
    let mut book: HashMap<&str, (f64, f64)> = HashMap::new();
    let mut rounds = TradeRounds::default();
    for t in trades {
        let (shares, avg_cost) = book.entry(t.code.as_str()).or_insert((0.0, 0.0));
        if t.action.is_buy() {
            let new_shares = *shares + t.shares;
            if new_shares > 0.0 {
                *avg_cost = (*shares * *avg_cost + t.shares * t.price) / new_shares;
            }
            *shares = new_shares;
        } else {
            let pnl = t.shares * (t.price - *avg_cost) - t.fee;
            *shares = (*shares - t.shares).max(0.0);
            rounds.total += 1;
            if pnl > 0.0 {
                rounds.wins += 1;
                rounds.gross_profit += pnl;
            } else if pnl < 0.0 {
                rounds.losses += 1;
                rounds.gross_loss += -pnl;
            }
        }
    }
    rounds
}

pub type MetricFn = fn(&MetricContext<'_>) -> f64;

#[derive(Clone)]
pub struct MetricDefinition {
    pub name: String,
    pub dimension: MetricDimension,
    pub neutral: f64,
    pub compute: MetricFn,
}

impl fmt::Debug for MetricDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricDefinition")
            .field("name", &self.name)
            .field("dimension", &self.dimension)
            .field("neutral", &self.neutral)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub name: String,
    pub dimension: MetricDimension,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricBundle {
    pub dimension: MetricDimension,
    pub values: Vec<MetricValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReport {
    pub summary: Vec<MetricValue>,
    pub bundles: Vec<MetricBundle>,
}

impl MetricReport {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.summary.iter().find(|m| m.name == name).map(|m| m.value)
    }

    pub fn bundle(&self, dimension: MetricDimension) -> Option<&MetricBundle> {
        self.bundles.iter().find(|b| b.dimension == dimension)
    }
}

/// Append-only, evaluated in registration order.
#[derive(Debug, Clone, Default)]
pub struct MetricRegistry {
    metrics: Vec<MetricDefinition>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        use MetricDimension::*;
        let builtins: [(&str, MetricDimension, MetricFn); 18] = [
            ("total_return", Return, |c| c.total_return()),
            ("annualized_return", Return, |c| c.annualized_return()),
            ("benchmark_return", Benchmark, |c| c.benchmark_return()),
            ("excess_return", Benchmark, |c| c.total_return() - c.benchmark_return()),
            ("max_drawdown", Risk, |c| c.max_drawdown()),
            ("volatility", Risk, |c| {
                stats::std_dev(c.returns()) * TRADING_DAYS_PER_YEAR.sqrt()
            }),
            ("downside_deviation", Risk, |c| {
                c.downside_deviation_daily() * TRADING_DAYS_PER_YEAR.sqrt()
            }),
            ("sharpe_ratio", RiskAdjusted, sharpe_ratio),
            ("sortino_ratio", RiskAdjusted, |c| {
                let dd = c.downside_deviation_daily();
                if dd > 0.0 {
                    stats::mean(c.excess_returns()) / dd * TRADING_DAYS_PER_YEAR.sqrt()
                } else {
                    0.0
                }
            }),
            ("calmar_ratio", RiskAdjusted, |c| {
                let mdd = c.max_drawdown();
                if mdd > 0.0 { c.annualized_return() / mdd } else { 0.0 }
            }),
            ("information_ratio", Benchmark, information_ratio),
            ("alpha", Benchmark, |c| {
                if !c.has_benchmark() {
                    return 0.0;
                }
                let rf = c.daily_risk_free();
                let r = stats::mean(c.returns());
                let b = stats::mean(c.benchmark_returns());
                (r - rf - c.beta() * (b - rf)) * TRADING_DAYS_PER_YEAR
            }),
            ("beta", Benchmark, |c| c.beta()),
            ("value_at_risk", Risk, |c| {
                let r = c.returns();
                (VAR_Z_95 * stats::std_dev(r) - stats::mean(r)).max(0.0)
            }),
            ("win_rate", Trading, |c| {
                let rounds = c.rounds();
                if rounds.total > 0 {
                    rounds.wins as f64 / rounds.total as f64
                } else {
                    0.0
                }
            }),
            ("profit_loss_ratio", Trading, profit_loss_ratio),
            ("trade_count", Trading, |c| c.trades().len() as f64),
            ("total_fees", Trading, |c| c.trades().iter().map(|t| t.fee).sum()),
        ];

        let mut registry = MetricRegistry::new();
        for (name, dimension, compute) in builtins {
            registry.metrics.push(MetricDefinition {
                name: name.to_string(),
                dimension,
                neutral: 0.0,
                compute,
            });
        }
        registry
    }

    pub fn register(
        &mut self,
        name: &str,
        dimension: MetricDimension,
        neutral: f64,
        compute: MetricFn,
    ) -> Result<(), FundlabError> {
        if self.metrics.iter().any(|m| m.name == name) {
            return Err(FundlabError::config_invalid(
                "metrics",
                name,
                "metric already registered",
            ));
        }
        self.metrics.push(MetricDefinition {
            name: name.to_string(),
            dimension,
            neutral,
            compute,
        });
        Ok(())
    }

    pub fn names(&self) -> Vec<&str> {
        self.metrics.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn evaluate(&self, ctx: &MetricContext<'_>) -> MetricReport {
        let degenerate = ctx.is_degenerate();
        let summary: Vec<MetricValue> = self
            .metrics
            .iter()
            .map(|m| {
                let value = if degenerate {
                    m.neutral
                } else {
                    let v = (m.compute)(ctx);
                    if v.is_finite() {
                        v
                    } else {
                        debug!(metric = %m.name, value = v, "non-finite metric, using neutral value");
                        m.neutral
                    }
                };
                MetricValue {
                    name: m.name.clone(),
                    dimension: m.dimension,
                    value,
                }
            })
            .collect();

        let bundles = MetricDimension::ALL
            .into_iter()
            .filter_map(|dimension| {
                let values: Vec<MetricValue> = summary
                    .iter()
                    .filter(|m| m.dimension == dimension)
                    .cloned()
                    .collect();
                (!values.is_empty()).then_some(MetricBundle { dimension, values })
            })
            .collect();

        MetricReport { summary, bundles }
    }
}

fn sharpe_ratio(c: &MetricContext<'_>) -> f64 {
    let excess = c.excess_returns();
    let sd = stats::std_dev(excess);
    if sd > 0.0 {
        stats::mean(excess) / sd * TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        0.0
    }
}

fn information_ratio(c: &MetricContext<'_>) -> f64 {
    let bench = c.benchmark_returns();
    if bench.is_empty() {
        return 0.0;
    }
    let active: Vec<f64> = c.returns().iter().zip(bench).map(|(r, b)| r - b).collect();
    let sd = stats::std_dev(&active);
    if sd > 0.0 {
        stats::mean(&active) / sd * TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        0.0
    }
}

fn profit_loss_ratio(c: &MetricContext<'_>) -> f64 {
    let rounds = c.rounds();
    if rounds.wins == 0 {
        return 0.0;
    }
    let avg_win = rounds.gross_profit / rounds.wins as f64;
    if rounds.losses == 0 {
        return PROFIT_LOSS_CAP;
    }
    let avg_loss = rounds.gross_loss / rounds.losses as f64;
    (avg_win / avg_loss).min(PROFIT_LOSS_CAP)
}

/// Evaluate the built-in metrics for a backtest result.
pub fn report_for(result: &BacktestResult, risk_free_rate: f64) -> MetricReport {
    MetricRegistry::with_builtins().evaluate(&MetricContext::from_result(result, risk_free_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trade::TradeAction;
    use approx::assert_relative_eq;
    use chrono::Duration;

    fn curve(values: &[f64]) -> Vec<EquityPoint> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, &equity)| EquityPoint {
                date: start + Duration::days(i as i64),
                equity,
            })
            .collect()
    }

    fn trade(code: &str, action: TradeAction, price: f64, shares: f64) -> TradeRecord {
        TradeRecord {
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            code: code.into(),
            action,
            amount: price * shares,
            price,
            shares,
            fee: 0.0,
            cash_after: 0.0,
            position_after: 0.0,
            reason: String::new(),
        }
    }

    #[test]
    fn builtins_are_registered_in_order() {
        let registry = MetricRegistry::with_builtins();
        let names = registry.names();
        assert_eq!(names.len(), 18);
        assert_eq!(names[0], "total_return");
        assert_eq!(names[7], "sharpe_ratio");
        assert_eq!(names[17], "total_fees");
    }

    #[test]
    fn short_curve_is_neutral() {
        for values in [vec![], vec![100_000.0]] {
            let eq = curve(&values);
            let trades = vec![trade("A", TradeAction::Buy, 1.0, 10.0)];
            let report = MetricRegistry::with_builtins().evaluate(&MetricContext::new(&eq, &trades));
            assert_eq!(report.summary.len(), 18);
            assert!(report.summary.iter().all(|m| m.value == 0.0));
        }
    }

    #[test]
    fn total_and_annualized_return() {
        let eq = curve(&[100.0, 110.0]);
        let ctx = MetricContext::new(&eq, &[]);
        assert_relative_eq!(ctx.total_return(), 0.1, epsilon = 1e-12);
        assert_relative_eq!(ctx.annualized_return(), 1.1_f64.powf(252.0) - 1.0, max_relative = 1e-9);
    }

    #[test]
    fn wiped_out_annualized_return_is_guarded() {
        let eq = curve(&[100.0, 50.0, 0.0]);
        let ctx = MetricContext::new(&eq, &[]);
        assert!((ctx.annualized_return() - (-1.0)).abs() < f64::EPSILON);
    }

    #[test]
    fn max_drawdown_from_running_peak() {
        let eq = curve(&[100.0, 120.0, 90.0, 130.0, 117.0]);
        assert_relative_eq!(MetricContext::new(&eq, &[]).max_drawdown(), 0.25, epsilon = 1e-12);
    }

    #[test]
    fn flat_curve_has_zero_ratios() {
        let eq = curve(&[100.0; 10]);
        let report = MetricRegistry::with_builtins().evaluate(&MetricContext::new(&eq, &[]));
        assert_eq!(report.get("sharpe_ratio"), Some(0.0));
        assert_eq!(report.get("sortino_ratio"), Some(0.0));
        assert_eq!(report.get("calmar_ratio"), Some(0.0));
    }

    #[test]
    fn beta_of_identical_series_is_one() {
        let eq = curve(&[100.0, 102.0, 101.0, 104.0, 103.0]);
        let ctx = MetricContext::new(&eq, &[]).with_benchmark(&eq);
        assert_relative_eq!(ctx.beta(), 1.0, epsilon = 1e-9);
        let report = MetricRegistry::with_builtins().evaluate(&ctx);
        assert_relative_eq!(report.get("alpha").unwrap(), 0.0, epsilon = 1e-9);
        assert_relative_eq!(report.get("excess_return").unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn win_rate_and_profit_loss_from_average_cost() {
        let trades = vec![
            trade("A", TradeAction::Buy, 10.0, 100.0),
            trade("A", TradeAction::Buy, 20.0, 100.0),
            // average cost 15; rounds: +250, -250, -300
            trade("A", TradeAction::Sell, 20.0, 50.0),
            trade("A", TradeAction::Sell, 10.0, 50.0),
            trade("A", TradeAction::Liquidate, 12.0, 100.0),
        ];
        let eq = curve(&[100.0, 101.0]);
        let report = MetricRegistry::with_builtins().evaluate(&MetricContext::new(&eq, &trades));
        assert_relative_eq!(report.get("win_rate").unwrap(), 1.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(report.get("profit_loss_ratio").unwrap(), 250.0 / 275.0, epsilon = 1e-12);
        assert_eq!(report.get("trade_count"), Some(5.0));
    }

    #[test]
    fn profit_loss_ratio_is_capped_without_losses() {
        let trades = vec![
            trade("A", TradeAction::Buy, 10.0, 10.0),
            trade("A", TradeAction::Sell, 11.0, 10.0),
        ];
        let eq = curve(&[100.0, 101.0]);
        let report = MetricRegistry::with_builtins().evaluate(&MetricContext::new(&eq, &trades));
        assert_eq!(report.get("profit_loss_ratio"), Some(PROFIT_LOSS_CAP));
    }

    #[test]
    fn custom_metric_appends_after_builtins() {
        let mut registry = MetricRegistry::with_builtins();
        registry
            .register("final_equity", MetricDimension::Return, 0.0, |c| {
                c.equity().last().map(|p| p.equity).unwrap_or(0.0)
            })
            .unwrap();
        assert!(registry
            .register("final_equity", MetricDimension::Return, 0.0, |_| 1.0)
            .is_err());
        let eq = curve(&[100.0, 105.0]);
        let report = registry.evaluate(&MetricContext::new(&eq, &[]));
        assert_eq!(report.summary.last().unwrap().name, "final_equity");
        assert_eq!(report.get("final_equity"), Some(105.0));
        let returns = report.bundle(MetricDimension::Return).unwrap();
        assert_eq!(returns.values.len(), 3);
    }

    #[test]
    fn value_at_risk_is_positive_loss() {
        let eq = curve(&[100.0, 98.0, 99.0, 97.0, 98.5, 96.0]);
        let ctx = MetricContext::new(&eq, &[]);
        let report = MetricRegistry::with_builtins().evaluate(&ctx);
        let r = ctx.returns();
        let expected = VAR_Z_95 * stats::std_dev(r) - stats::mean(r);
        assert_relative_eq!(report.get("value_at_risk").unwrap(), expected, epsilon = 1e-12);
        assert!(expected > 0.0);
    }
}
