//! Single-fund backtest driven by the signal blender.
//!
//! Buys invest `base_amount x multiplier` on cadence days only; sells and
//! stop-loss exits are evaluated every day.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use super::error::FundlabError;
use super::ledger::{EquityPoint, Ledger};
use super::price_series::InstrumentSeries;
use super::signal::{MarketContext, SignalBlender, SignalInput, UnifiedSignal, VolumeContext};
use super::signal_rules::SignalAction;
use super::stats;
use super::stop_loss::Redemption;
use super::strategy::RebalanceFrequency;
use super::trade::{TradeAction, TradeRecord};

#[derive(Debug, Clone, PartialEq)]
pub struct SignalBacktestConfig {
    pub initial_capital: f64,
    pub base_amount: f64,
    /// Fraction of the holding redeemed by a x1.0 sell signal.
    pub sell_fraction: f64,
    pub fee_rate: f64,
    pub cadence: RebalanceFrequency,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Days averaged for the volume ratio when the series carries volume.
    pub volume_window: usize,
}

impl Default for SignalBacktestConfig {
    fn default() -> Self {
        SignalBacktestConfig {
            initial_capital: 100_000.0,
            base_amount: 1_000.0,
            sell_fraction: 0.2,
            fee_rate: 0.0,
            cadence: RebalanceFrequency::Weekly,
            start_date: None,
            end_date: None,
            volume_window: 20,
        }
    }
}

impl SignalBacktestConfig {
    pub fn validate(&self) -> Result<(), FundlabError> {
        if !(self.initial_capital > 0.0) {
            return Err(FundlabError::config_invalid(
                "signal",
                "initial_capital",
                "initial_capital must be positive",
            ));
        }
        if !(self.base_amount > 0.0) {
            return Err(FundlabError::config_invalid("signal", "base_amount", "base_amount must be positive"));
        }
        if !(self.sell_fraction > 0.0 && self.sell_fraction <= 1.0) {
            return Err(FundlabError::config_invalid(
                "signal",
                "sell_fraction",
                "sell_fraction must be in (0, 1]",
            ));
        }
        if !(0.0..1.0).contains(&self.fee_rate) {
            return Err(FundlabError::config_invalid("signal", "fee_rate", "fee_rate must be in [0, 1)"));
        }
        if matches!((self.start_date, self.end_date), (Some(start), Some(end)) if start > end) {
            return Err(FundlabError::config_invalid(
                "signal",
                "start_date",
                "start_date must not be after end_date",
            ));
        }
        Ok(())
    }
}

/// Optional per-date context supplied alongside the price series.
#[derive(Debug, Clone, Default)]
pub struct SignalContexts {
    pub market: HashMap<NaiveDate, MarketContext>,
    pub volume: HashMap<NaiveDate, VolumeContext>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatedSignal {
    pub date: NaiveDate,
    pub today_return: f64,
    pub signal: UnifiedSignal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalBacktestResult {
    pub code: String,
    pub initial_capital: f64,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<TradeRecord>,
    pub signals: Vec<DatedSignal>,
}

pub fn run_signal_backtest(
    series: &InstrumentSeries,
    blender: &SignalBlender,
    config: &SignalBacktestConfig,
    contexts: &SignalContexts,
) -> Result<SignalBacktestResult, FundlabError> {
    config.validate()?;
    if series.len() < 2 {
        return Err(FundlabError::InsufficientData {
            code: series.code.clone(),
            points: series.len(),
            minimum: 2,
        });
    }

    info!(code = %series.code, points = series.len(), "signal backtest started");
    let mut ledger = Ledger::new(config.initial_capital).with_fee_rate(config.fee_rate);
    let mut equity_curve = Vec::new();
    let mut trades = Vec::new();
    let mut signals = Vec::new();
    let mut previous: Option<NaiveDate> = None;
    // One warning redemption per excursion below the warning level.
    let mut warning_redeemed = false;
    let code = series.code.as_str();

    for i in 1..series.len() {
        let point = &series.points[i];
        let date = point.date;
        if config.start_date.is_some_and(|s| date < s) || config.end_date.is_some_and(|e| date > e) {
            continue;
        }

        let prices = HashMap::from([(series.code.clone(), point.price)]);
        ledger.mark_to_market(&prices);

        let history: Vec<f64> = series.points[1..=i].iter().map(|p| p.daily_return).collect();
        let volume = contexts
            .volume
            .get(&date)
            .copied()
            .or_else(|| derived_volume(series, i, config.volume_window));
        let input = SignalInput {
            today_return: point.daily_return,
            prev_return: series.points[i - 1].daily_return,
            returns_history: Some(&history),
            cumulative_pnl: ledger.holding(code).map(|h| h.unrealized_return()),
            performance: None,
            market: contexts.market.get(&date).copied(),
            volume,
        };
        let signal = blender.evaluate(&input);
        let reason = signal
            .matched_rule
            .clone()
            .unwrap_or_else(|| "default".to_string());

        let warning_fraction = match signal.redemption {
            Redemption::Partial(fraction) => Some(fraction),
            _ => None,
        };
        if warning_fraction.is_none() {
            warning_redeemed = false;
        }
        let redeem = warning_fraction
            .filter(|_| !warning_redeemed && signal.action != SignalAction::Sell && ledger.shares_of(code) > 0.0);

        if let Some(fraction) = redeem {
            warning_redeemed = true;
            let action = if fraction >= 1.0 {
                TradeAction::Liquidate
            } else {
                TradeAction::Sell
            };
            let held = ledger.shares_of(code);
            if let Some(t) = ledger.sell(date, code, point.price, held * fraction, action, "stop-loss warning") {
                trades.push(t);
            }
        } else {
            match signal.action {
                SignalAction::Buy => {
                    if config.cadence.is_rebalance_day(previous, date) {
                        let amount = config.base_amount * signal.final_multiplier;
                        if let Some(t) = ledger.buy(date, code, point.price, amount, TradeAction::Buy, &reason) {
                            trades.push(t);
                        }
                    }
                }
                SignalAction::Sell => {
                    let held = ledger.shares_of(code);
                    if held > 0.0 {
                        let fraction = if signal.stop_loss_triggered {
                            1.0
                        } else {
                            (config.sell_fraction * signal.final_multiplier).min(1.0)
                        };
                        let (action, why) = if signal.stop_loss_triggered {
                            (TradeAction::Liquidate, "stop-loss".to_string())
                        } else if fraction >= 1.0 {
                            (TradeAction::Liquidate, reason)
                        } else {
                            (TradeAction::Sell, reason)
                        };
                        if let Some(t) = ledger.sell(date, code, point.price, held * fraction, action, &why) {
                            trades.push(t);
                        }
                    }
                }
                SignalAction::Hold => {}
            }
        }
        debug!(%date, action = %signal.action, multiplier = signal.final_multiplier, "signal");

        equity_curve.push(EquityPoint {
            date,
            equity: ledger.total_value(),
        });
        signals.push(DatedSignal {
            date,
            today_return: point.daily_return,
            signal,
        });
        previous = Some(date);
    }

    info!(code = %series.code, trades = trades.len(), "signal backtest finished");
    Ok(SignalBacktestResult {
        code: series.code.clone(),
        initial_capital: config.initial_capital,
        equity_curve,
        trades,
        signals,
    })
}

/// Today's volume against the mean of the preceding `window` volumes.
fn derived_volume(series: &InstrumentSeries, index: usize, window: usize) -> Option<VolumeContext> {
    let volume = series.points[index].volume?;
    let start = index.saturating_sub(window);
    let past: Vec<f64> = series.points[start..index].iter().filter_map(|p| p.volume).collect();
    if past.is_empty() {
        return None;
    }
    Some(VolumeContext {
        volume,
        average_volume: stats::mean(&past),
    })
}
