//! Signal blending: one day's base rule outcome refined by trend,
//! volatility, market and volume context into a single multiplier.
//!
//! # Pipeline
//!
//! 1. Base rule match ([`RuleTable`])
//! 2. Stop-loss short-circuit on the open holding's cumulative P&L (a
//!    warning leaves the action alone and only suggests a partial redemption)
//! 3. Trend adjustment
//! 4. Volatility band
//! 5. Market beta (index weakness/strength, sentiment)
//! 6. Volume confirmation of down moves
//!
//! The final multiplier is the product of the active factors, clamped to
//! `[min_multiplier, max_multiplier]`. Every adjustment that fires leaves a
//! line in the audit trail.

use serde::{Deserialize, Serialize};

use super::error::FundlabError;
use super::position_sizing::{PositionManager, VolatilityBand, VolatilityConfig};
use super::signal_rules::{RuleTable, SignalAction};
use super::stop_loss::{Redemption, StopLossConfig, StopLossLevel, StopLossManager};
use super::trend::{TrendAnalyzer, TrendConfig, TrendDirection, TrendReading};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendAdjustment {
    /// Buy factor in an uptrend; sells use the reciprocal.
    pub uptrend_factor: f64,
    /// Buy factor in a downtrend; sells use the reciprocal.
    pub downtrend_factor: f64,
    /// Strength below which the trend is treated as unclear.
    pub weak_strength: f64,
    /// Share of the deviation from 1 kept for an unclear trend.
    pub damping: f64,
}

impl Default for TrendAdjustment {
    fn default() -> Self {
        TrendAdjustment {
            uptrend_factor: 1.2,
            downtrend_factor: 0.8,
            weak_strength: 20.0,
            damping: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BetaAdjustment {
    pub weak_index_return: f64,
    pub weak_factor: f64,
    pub greed_threshold: f64,
    pub greed_factor: f64,
    pub strong_index_return: f64,
}

impl Default for BetaAdjustment {
    fn default() -> Self {
        BetaAdjustment {
            weak_index_return: -0.02,
            weak_factor: 0.8,
            greed_threshold: 80.0,
            greed_factor: 0.8,
            strong_index_return: 0.02,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeAdjustment {
    pub high_ratio: f64,
    pub high_volume_factor: f64,
    pub low_ratio: f64,
    pub low_volume_factor: f64,
}

impl Default for VolumeAdjustment {
    fn default() -> Self {
        VolumeAdjustment {
            high_ratio: 1.5,
            high_volume_factor: 0.8,
            low_ratio: 0.7,
            low_volume_factor: 1.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalConfig {
    pub rules: RuleTable,
    pub trend: TrendConfig,
    pub trend_adjustment: TrendAdjustment,
    pub volatility: VolatilityConfig,
    pub stop_loss: StopLossConfig,
    pub beta: BetaAdjustment,
    pub volume: VolumeAdjustment,
    pub min_multiplier: f64,
    pub max_multiplier: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        SignalConfig {
            rules: RuleTable::default(),
            trend: TrendConfig::default(),
            trend_adjustment: TrendAdjustment::default(),
            volatility: VolatilityConfig::default(),
            stop_loss: StopLossConfig::default(),
            beta: BetaAdjustment::default(),
            volume: VolumeAdjustment::default(),
            min_multiplier: 0.1,
            max_multiplier: 3.0,
        }
    }
}

impl SignalConfig {
    pub fn validate(&self) -> Result<(), FundlabError> {
        self.rules.validate()?;
        self.trend.validate()?;
        validate_trend_adjustment(&self.trend_adjustment)?;
        self.volatility.validate()?;
        self.stop_loss.validate()?;
        validate_beta_adjustment(&self.beta)?;
        validate_volume_adjustment(&self.volume)?;
        validate_multiplier_range(self.min_multiplier, self.max_multiplier)
    }
}

fn positive(key: &str, value: f64) -> Result<(), FundlabError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(FundlabError::config_invalid("signal", key, format!("{key} must be positive")))
    }
}

pub fn validate_multiplier_range(min: f64, max: f64) -> Result<(), FundlabError> {
    positive("min_multiplier", min)?;
    if max < min {
        return Err(FundlabError::config_invalid(
            "signal",
            "max_multiplier",
            "max_multiplier must be >= min_multiplier",
        ));
    }
    Ok(())
}

pub fn validate_trend_adjustment(t: &TrendAdjustment) -> Result<(), FundlabError> {
    positive("uptrend_factor", t.uptrend_factor)?;
    positive("downtrend_factor", t.downtrend_factor)?;
    if t.weak_strength < 0.0 {
        return Err(FundlabError::config_invalid(
            "signal",
            "weak_strength",
            "weak_strength must be non-negative",
        ));
    }
    if !(0.0..=1.0).contains(&t.damping) {
        return Err(FundlabError::config_invalid("signal", "damping", "damping must be in [0, 1]"));
    }
    Ok(())
}

pub fn validate_beta_adjustment(b: &BetaAdjustment) -> Result<(), FundlabError> {
    if b.weak_index_return > 0.0 {
        return Err(FundlabError::config_invalid(
            "signal",
            "weak_index_return",
            "weak_index_return must be <= 0",
        ));
    }
    if b.strong_index_return < 0.0 {
        return Err(FundlabError::config_invalid(
            "signal",
            "strong_index_return",
            "strong_index_return must be >= 0",
        ));
    }
    positive("weak_factor", b.weak_factor)?;
    positive("greed_factor", b.greed_factor)
}

pub fn validate_volume_adjustment(v: &VolumeAdjustment) -> Result<(), FundlabError> {
    if !(v.low_ratio > 0.0 && v.low_ratio < v.high_ratio) {
        return Err(FundlabError::config_invalid(
            "signal",
            "low_ratio",
            "volume ratios must satisfy 0 < low_ratio < high_ratio",
        ));
    }
    positive("high_volume_factor", v.high_volume_factor)?;
    if v.low_volume_factor < 1.0 {
        return Err(FundlabError::config_invalid(
            "signal",
            "low_volume_factor",
            "low_volume_factor must be >= 1",
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MarketContext {
    pub index_return: Option<f64>,
    /// Fear/greed style reading, 0 to 100.
    pub sentiment: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeContext {
    pub volume: f64,
    pub average_volume: f64,
}

impl VolumeContext {
    pub fn ratio(&self) -> Option<f64> {
        (self.average_volume > 0.0).then(|| self.volume / self.average_volume)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub annualized_volatility: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SignalInput<'a> {
    pub today_return: f64,
    pub prev_return: f64,
    pub returns_history: Option<&'a [f64]>,
    pub cumulative_pnl: Option<f64>,
    pub performance: Option<PerformanceSnapshot>,
    pub market: Option<MarketContext>,
    pub volume: Option<VolumeContext>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedSignal {
    pub action: SignalAction,
    pub base_multiplier: f64,
    pub trend_multiplier: f64,
    pub volatility_multiplier: f64,
    pub beta_multiplier: f64,
    pub volume_multiplier: f64,
    pub final_multiplier: f64,
    pub matched_rule: Option<String>,
    pub audit: Vec<String>,
    pub stop_loss_triggered: bool,
    /// Redemption suggested by the stop-loss level of the open holding.
    pub redemption: Redemption,
    pub trend: Option<TrendDirection>,
    pub volatility_band: Option<VolatilityBand>,
}

#[derive(Debug, Clone)]
pub struct SignalBlender {
    config: SignalConfig,
    trend: TrendAnalyzer,
    sizing: PositionManager,
    stop_loss: StopLossManager,
}

impl SignalBlender {
    pub fn new(config: SignalConfig) -> Result<Self, FundlabError> {
        config.validate()?;
        Ok(SignalBlender {
            trend: TrendAnalyzer::new(config.trend),
            sizing: PositionManager::new(config.volatility),
            stop_loss: StopLossManager::new(config.stop_loss),
            config,
        })
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    pub fn evaluate(&self, input: &SignalInput<'_>) -> UnifiedSignal {
        let base = self.config.rules.evaluate(input.today_return, input.prev_return);
        let mut signal = UnifiedSignal {
            action: base.outcome.action,
            base_multiplier: base.outcome.multiplier,
            trend_multiplier: 1.0,
            volatility_multiplier: 1.0,
            beta_multiplier: 1.0,
            volume_multiplier: 1.0,
            final_multiplier: base.outcome.multiplier,
            matched_rule: base.rule.map(str::to_string),
            audit: Vec::new(),
            stop_loss_triggered: false,
            redemption: Redemption::None,
            trend: None,
            volatility_band: None,
        };
        signal.audit.push(match base.rule {
            Some(name) => format!(
                "rule {name}: {} x{:.2}",
                base.outcome.action, base.outcome.multiplier
            ),
            None => format!(
                "default: {} x{:.2}",
                base.outcome.action, base.outcome.multiplier
            ),
        });

        if let Some(pnl) = input.cumulative_pnl {
            let assessment = self.stop_loss.evaluate(pnl);
            signal.redemption = assessment.redemption;
            match assessment.level {
                StopLossLevel::Triggered => {
                    signal.action = SignalAction::Sell;
                    signal.base_multiplier = 1.0;
                    signal.final_multiplier = 1.0;
                    signal.stop_loss_triggered = true;
                    signal
                        .audit
                        .push(format!("stop-loss triggered at {:.2}%: full redemption", pnl * 100.0));
                    return signal;
                }
                StopLossLevel::Warning => signal
                    .audit
                    .push(format!("stop-loss warning at {:.2}%", pnl * 100.0)),
                StopLossLevel::Normal => {}
            }
        }

        if let Some(history) = input.returns_history {
            let reading = self.trend.analyze(history);
            signal.trend = Some(reading.direction);
            let factor = self.trend_factor(&reading, signal.action);
            if (factor - 1.0).abs() > f64::EPSILON {
                signal.trend_multiplier = factor;
                signal.audit.push(format!(
                    "trend {:?} (confidence {:.2}, strength {:.1}): x{factor:.3}",
                    reading.direction, reading.confidence, reading.strength
                ));
            }
        }

        let volatility = match (input.performance, input.returns_history) {
            (Some(perf), _) => Some(self.sizing.classify(perf.annualized_volatility)),
            (None, Some(history)) => Some(self.sizing.assess(history)),
            (None, None) => None,
        };
        if let Some(reading) = volatility {
            signal.volatility_band = Some(reading.band);
            signal.volatility_multiplier = reading.factor;
            if reading.band != VolatilityBand::Normal {
                signal.audit.push(format!(
                    "volatility {:?} ({:.1}%): x{:.2}",
                    reading.band,
                    reading.volatility * 100.0,
                    reading.factor
                ));
            }
        }

        if let Some(market) = input.market {
            self.apply_beta(&mut signal, &market);
        }

        if let Some(volume) = input.volume {
            self.apply_volume(&mut signal, input.today_return, &volume);
        }

        let product = signal.base_multiplier
            * signal.trend_multiplier
            * signal.volatility_multiplier
            * signal.beta_multiplier
            * signal.volume_multiplier;
        let clamped = product.clamp(self.config.min_multiplier, self.config.max_multiplier);
        if (clamped - product).abs() > f64::EPSILON {
            signal
                .audit
                .push(format!("clamped x{product:.3} to x{clamped:.3}"));
        }
        signal.final_multiplier = clamped;
        signal
    }

    fn trend_factor(&self, reading: &TrendReading, action: SignalAction) -> f64 {
        let t = &self.config.trend_adjustment;
        let f = match reading.direction {
            TrendDirection::Uptrend => t.uptrend_factor,
            TrendDirection::Downtrend => t.downtrend_factor,
            TrendDirection::Sideways => return 1.0,
        };
        let f = match action {
            SignalAction::Sell => 1.0 / f,
            _ => f,
        };
        let mut factor = 1.0 + (f - 1.0) * reading.confidence;
        if reading.strength < t.weak_strength {
            factor = 1.0 + (factor - 1.0) * t.damping;
        }
        factor
    }

    fn apply_beta(&self, signal: &mut UnifiedSignal, market: &MarketContext) {
        let b = &self.config.beta;
        if let Some(index) = market.index_return {
            if index <= b.weak_index_return {
                signal.beta_multiplier *= b.weak_factor;
                signal.audit.push(format!(
                    "weak market ({:.2}%): x{:.2}",
                    index * 100.0,
                    b.weak_factor
                ));
            }
            if index >= b.strong_index_return && signal.action == SignalAction::Sell {
                signal.action = SignalAction::Hold;
                signal
                    .audit
                    .push(format!("strong market ({:.2}%): sell converted to hold", index * 100.0));
            }
        }
        if let Some(sentiment) = market.sentiment.filter(|s| *s >= b.greed_threshold) {
            signal.beta_multiplier *= b.greed_factor;
            signal
                .audit
                .push(format!("extreme greed ({sentiment:.0}): x{:.2}", b.greed_factor));
        }
    }

    fn apply_volume(&self, signal: &mut UnifiedSignal, today_return: f64, volume: &VolumeContext) {
        if today_return >= 0.0 {
            return;
        }
        let Some(ratio) = volume.ratio() else {
            return;
        };
        let v = &self.config.volume;
        if ratio >= v.high_ratio {
            signal.volume_multiplier = v.high_volume_factor;
            signal.audit.push(format!(
                "down move on heavy volume ({ratio:.2}x): x{:.2}",
                v.high_volume_factor
            ));
        } else if ratio <= v.low_ratio {
            signal.volume_multiplier = v.low_volume_factor;
            signal.audit.push(format!(
                "down move on light volume ({ratio:.2}x): x{:.2}",
                v.low_volume_factor
            ));
        }
    }
}
