//! Short/long return-average trend classification.
//!
//! Strength is a volatility-normalised mean return over the long window,
//! `min(|mean| / std * 100, 100)`. It stands in for a directional-movement
//! index when only closing prices are available.

use serde::{Deserialize, Serialize};

use super::error::FundlabError;
use super::stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendDirection {
    Uptrend,
    Downtrend,
    Sideways,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendConfig {
    pub short_window: usize,
    pub long_window: usize,
    /// Short/long mean gap that earns full confidence.
    pub confidence_gap: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        TrendConfig {
            short_window: 5,
            long_window: 20,
            confidence_gap: 0.01,
        }
    }
}

impl TrendConfig {
    pub fn validate(&self) -> Result<(), FundlabError> {
        if self.short_window == 0 {
            return Err(FundlabError::config_invalid(
                "signal",
                "trend_short_window",
                "trend_short_window must be at least 1",
            ));
        }
        if self.long_window <= self.short_window {
            return Err(FundlabError::config_invalid(
                "signal",
                "trend_long_window",
                "trend_long_window must be greater than trend_short_window",
            ));
        }
        if !(self.confidence_gap > 0.0) {
            return Err(FundlabError::config_invalid(
                "signal",
                "trend_confidence_gap",
                "trend_confidence_gap must be positive",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendReading {
    pub direction: TrendDirection,
    /// In [0, 1].
    pub confidence: f64,
    /// In [0, 100].
    pub strength: f64,
    pub short_mean: f64,
    pub long_mean: f64,
}

impl TrendReading {
    fn neutral() -> Self {
        TrendReading {
            direction: TrendDirection::Sideways,
            confidence: 0.0,
            strength: 0.0,
            short_mean: 0.0,
            long_mean: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrendAnalyzer {
    config: TrendConfig,
}

impl TrendAnalyzer {
    pub fn new(config: TrendConfig) -> Self {
        TrendAnalyzer { config }
    }

    pub fn config(&self) -> &TrendConfig {
        &self.config
    }

    /// Classify the trend of a daily return history (oldest first).
    pub fn analyze(&self, returns: &[f64]) -> TrendReading {
        if returns.len() < self.config.long_window || self.config.long_window == 0 {
            return TrendReading::neutral();
        }
        let short_mean = stats::mean(stats::tail(returns, self.config.short_window));
        let long_window = stats::tail(returns, self.config.long_window);
        let long_mean = stats::mean(long_window);

        let direction = if short_mean > long_mean && long_mean > 0.0 {
            TrendDirection::Uptrend
        } else if short_mean < long_mean && long_mean < 0.0 {
            TrendDirection::Downtrend
        } else {
            TrendDirection::Sideways
        };

        let confidence = if self.config.confidence_gap > 0.0 {
            ((short_mean - long_mean).abs() / self.config.confidence_gap).min(1.0)
        } else {
            0.0
        };

        TrendReading {
            direction,
            confidence,
            strength: trend_strength(long_window),
            short_mean,
            long_mean,
        }
    }
}

pub fn trend_strength(returns: &[f64]) -> f64 {
    let m = stats::mean(returns);
    let sd = stats::std_dev(returns);
    if sd > 0.0 {
        (m.abs() / sd * 100.0).min(100.0)
    } else if m == 0.0 {
        0.0
    } else {
        100.0
    }
}
