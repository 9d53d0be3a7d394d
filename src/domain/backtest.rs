//! Basket backtest driver.
//!
//! Walks the unified timeline one day at a time:
//!
//! 1. Observe cancellation
//! 2. Mark holdings to today's prices
//! 3. Risk check on the pre-trade valuation; a trigger liquidates everything
//!    and skips the rest of the day
//! 4. On a rebalance date: accumulate (young history) or run
//!    filter -> select -> weight -> rebalance
//! 5. Record the post-trade equity point
//!
//! A non-finite valuation aborts the run and keeps the partial output.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use super::error::FundlabError;
use super::filter::filter;
use super::ledger::{EquityPoint, Ledger};
use super::position_sizing::{PositionManager, VolatilityConfig};
use super::price_series::{InstrumentSeries, build_unified_timeline, prices_on};
use super::rebalance::rebalance;
use super::risk::RiskController;
use super::selection::select;
use super::snapshot::{SnapshotConfig, build_snapshots};
use super::strategy::StrategySpec;
use super::trade::{TradeAction, TradeRecord};
use super::weights::{apply_volatility_tilt, compute_weights};

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: f64,
    pub fee_rate: f64,
    pub risk_free_rate: f64,
    /// Cash invested per rebalance date while history is accumulating.
    pub base_amount: f64,
    /// Timeline days required before the full pipeline runs.
    pub min_history_days: usize,
    pub stats_window: usize,
    pub benchmark: Option<String>,
    pub volatility: VolatilityConfig,
}

impl BacktestConfig {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate, initial_capital: f64) -> Self {
        BacktestConfig {
            start_date,
            end_date,
            initial_capital,
            fee_rate: 0.0,
            risk_free_rate: 0.0,
            base_amount: 0.0,
            min_history_days: 0,
            stats_window: 60,
            benchmark: None,
            volatility: VolatilityConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), FundlabError> {
        if self.start_date > self.end_date {
            return Err(FundlabError::config_invalid(
                "backtest",
                "start_date",
                "start_date must not be after end_date",
            ));
        }
        if !(self.initial_capital > 0.0) {
            return Err(FundlabError::config_invalid(
                "backtest",
                "initial_capital",
                "initial_capital must be positive",
            ));
        }
        if !(0.0..1.0).contains(&self.fee_rate) {
            return Err(FundlabError::config_invalid("backtest", "fee_rate", "fee_rate must be in [0, 1)"));
        }
        if self.base_amount < 0.0 {
            return Err(FundlabError::config_invalid(
                "backtest",
                "base_amount",
                "base_amount must be non-negative",
            ));
        }
        if self.stats_window < 2 {
            return Err(FundlabError::config_invalid(
                "backtest",
                "stats_window",
                "stats_window must be at least 2",
            ));
        }
        self.volatility.validate()
    }

    fn snapshot_config(&self) -> SnapshotConfig {
        SnapshotConfig {
            stats_window: self.stats_window,
            risk_free_rate: self.risk_free_rate,
        }
    }
}

/// Cooperative cancellation flag, checked between simulated days.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverPhase {
    Accumulating,
    Active,
    Liquidated,
}

impl fmt::Display for DriverPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DriverPhase::Accumulating => "accumulating",
            DriverPhase::Active => "active",
            DriverPhase::Liquidated => "liquidated",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub date: NaiveDate,
    pub from: DriverPhase,
    pub to: DriverPhase,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Cancelled { date: NaiveDate },
    Aborted { date: NaiveDate, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub strategy: String,
    pub initial_capital: f64,
    pub status: RunStatus,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<TradeRecord>,
    /// Benchmark prices on the equity curve dates, forward-filled.
    pub benchmark: Vec<EquityPoint>,
    pub phases: Vec<PhaseTransition>,
}

impl BacktestResult {
    pub fn final_equity(&self) -> f64 {
        self.equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(self.initial_capital)
    }
}

struct Driver<'a> {
    series: &'a [InstrumentSeries],
    spec: &'a StrategySpec,
    config: &'a BacktestConfig,
    ledger: Ledger,
    risk: RiskController,
    sizing: PositionManager,
    phase: DriverPhase,
    trades: Vec<TradeRecord>,
    phases: Vec<PhaseTransition>,
}

impl Driver<'_> {
    fn transition(&mut self, date: NaiveDate, to: DriverPhase, reason: &str) {
        if self.phase == to {
            return;
        }
        info!(%date, from = %self.phase, to = %to, reason, "phase transition");
        self.phases.push(PhaseTransition {
            date,
            from: self.phase,
            to,
            reason: reason.to_string(),
        });
        self.phase = to;
    }

    fn accumulate(&mut self, date: NaiveDate) {
        let priced: Vec<(String, f64)> = self
            .series
            .iter()
            .filter_map(|s| s.price_on(date).map(|p| (s.code.clone(), p)))
            .collect();
        if priced.is_empty() || self.config.base_amount <= 0.0 {
            return;
        }
        let each = self.config.base_amount / priced.len() as f64;
        for (code, price) in priced {
            if let Some(t) = self
                .ledger
                .buy(date, &code, price, each, TradeAction::Accumulate, "accumulating history")
            {
                self.trades.push(t);
            }
        }
    }

    fn run_pipeline(&mut self, date: NaiveDate) {
        let snapshots = build_snapshots(self.series, date, &self.config.snapshot_config());
        let passed = filter(&snapshots, &self.spec.filters, self.spec.filter_logic);
        let picked = select(
            &passed,
            &self.spec.sort_field,
            self.spec.sort_order,
            self.spec.basket_size(),
        );
        if picked.is_empty() {
            debug!(%date, snapshots = snapshots.len(), passed = passed.len(), "no candidates, holding");
            return;
        }

        let allocation = compute_weights(picked.len(), &self.spec.weight_mode);
        let weights = if self.spec.volatility_adjustment {
            let factors: Vec<f64> = picked
                .iter()
                .map(|s| {
                    s.number("volatility")
                        .map(|v| self.sizing.classify(v).factor)
                        .unwrap_or(1.0)
                })
                .collect();
            apply_volatility_tilt(&allocation.weights, &factors)
        } else {
            allocation.weights
        };
        let basket: Vec<String> = picked.iter().map(|s| s.code.clone()).collect();
        debug!(%date, basket = ?basket, "rebalancing");

        let prices = prices_on(self.series, date);
        let outcome = rebalance(&mut self.ledger, &basket, &weights, &prices, date);
        self.trades.extend(outcome.trades);
    }
}

/// Run a basket strategy over `series`.
///
/// The strategy and configuration are validated up front; after that the
/// run never fails; day-level problems end up in the result's status.
pub fn run_backtest(
    series: &[InstrumentSeries],
    spec: &StrategySpec,
    config: &BacktestConfig,
    cancel: Option<&CancelToken>,
) -> Result<BacktestResult, FundlabError> {
    run_backtest_with_progress(series, spec, config, cancel, &|_| {})
}

/// [`run_backtest`] that reports the fraction of in-range days simulated
/// after each day.
pub fn run_backtest_with_progress(
    series: &[InstrumentSeries],
    spec: &StrategySpec,
    config: &BacktestConfig,
    cancel: Option<&CancelToken>,
    progress: &dyn Fn(f64),
) -> Result<BacktestResult, FundlabError> {
    spec.validate()?;
    config.validate()?;

    let timeline = build_unified_timeline(series);
    let days = timeline
        .iter()
        .filter(|d| **d >= config.start_date && **d <= config.end_date)
        .count();
    let mut driver = Driver {
        series,
        spec,
        config,
        ledger: Ledger::new(config.initial_capital).with_fee_rate(config.fee_rate),
        risk: RiskController::new(spec.risk, config.initial_capital),
        sizing: PositionManager::new(config.volatility),
        phase: if config.min_history_days > 0 {
            DriverPhase::Accumulating
        } else {
            DriverPhase::Active
        },
        trades: Vec::new(),
        phases: Vec::new(),
    };
    let mut equity_curve: Vec<EquityPoint> = Vec::new();
    let mut status = RunStatus::Completed;
    let mut previous: Option<NaiveDate> = None;

    info!(
        strategy = %spec.name,
        instruments = series.len(),
        start = %config.start_date,
        end = %config.end_date,
        "backtest started"
    );

    for (position, &date) in timeline.iter().enumerate() {
        if date < config.start_date || date > config.end_date {
            continue;
        }
        if cancel.is_some_and(CancelToken::is_cancelled) {
            warn!(%date, "backtest cancelled");
            status = RunStatus::Cancelled { date };
            break;
        }

        let prices = prices_on(series, date);
        driver.ledger.mark_to_market(&prices);
        let value = driver.ledger.total_value();
        if !value.is_finite() {
            let reason = format!("non-finite portfolio value {value}");
            warn!(%date, reason = %reason, "backtest aborted");
            status = RunStatus::Aborted { date, reason };
            break;
        }

        if let Some(event) = driver.risk.check(value) {
            if driver.ledger.holding_count() > 0 {
                warn!(%date, kind = %event.kind, reason = %event.reason, "risk event, liquidating");
                let liquidation = driver.ledger.liquidate_all(date, &event.reason);
                driver.trades.extend(liquidation);
                driver.transition(date, DriverPhase::Liquidated, &event.reason);
            }
            // Re-baseline on the cash value so the same drawdown cannot fire again.
            driver.risk.reset(driver.ledger.total_value());
            driver.risk.mark_liquidated();
        } else {
            let history_days = position + 1;
            if history_days >= config.min_history_days {
                let reason = match driver.phase {
                    DriverPhase::Liquidated => "risk cleared",
                    _ => "history sufficient",
                };
                driver.transition(date, DriverPhase::Active, reason);
            }
            if spec.rebalance.is_rebalance_day(previous, date) {
                match driver.phase {
                    DriverPhase::Accumulating => driver.accumulate(date),
                    DriverPhase::Active => driver.run_pipeline(date),
                    DriverPhase::Liquidated => {}
                }
            }
        }

        let equity = driver.ledger.total_value();
        if !equity.is_finite() {
            let reason = format!("non-finite portfolio value {equity} after trading");
            warn!(%date, reason = %reason, "backtest aborted");
            status = RunStatus::Aborted { date, reason };
            break;
        }
        equity_curve.push(EquityPoint { date, equity });
        previous = Some(date);
        progress(equity_curve.len() as f64 / days as f64);
    }

    let benchmark = config
        .benchmark
        .as_deref()
        .and_then(|code| series.iter().find(|s| s.code == code))
        .map(|s| benchmark_curve(s, &equity_curve))
        .unwrap_or_default();

    let result = BacktestResult {
        strategy: spec.name.clone(),
        initial_capital: config.initial_capital,
        status,
        equity_curve,
        trades: driver.trades,
        benchmark,
        phases: driver.phases,
    };
    info!(
        strategy = %result.strategy,
        days = result.equity_curve.len(),
        trades = result.trades.len(),
        final_equity = result.final_equity(),
        "backtest finished"
    );
    Ok(result)
}

fn benchmark_curve(series: &InstrumentSeries, curve: &[EquityPoint]) -> Vec<EquityPoint> {
    let mut last: Option<f64> = None;
    curve
        .iter()
        .filter_map(|p| {
            if let Some(price) = series.price_on(p.date) {
                last = Some(price);
            }
            last.map(|equity| EquityPoint { date: p.date, equity })
        })
        .collect()
}
