//! Realised-volatility banding for position sizing.

use serde::{Deserialize, Serialize};

use super::error::FundlabError;
use super::stats::{self, TRADING_DAYS_PER_YEAR};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolatilityBand {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolatilityConfig {
    pub lookback_days: usize,
    pub low_threshold: f64,
    pub high_threshold: f64,
    pub low_factor: f64,
    pub normal_factor: f64,
    pub high_factor: f64,
}

impl Default for VolatilityConfig {
    fn default() -> Self {
        VolatilityConfig {
            lookback_days: 20,
            low_threshold: 0.15,
            high_threshold: 0.30,
            low_factor: 1.2,
            normal_factor: 1.0,
            high_factor: 0.7,
        }
    }
}

impl VolatilityConfig {
    pub fn validate(&self) -> Result<(), FundlabError> {
        if self.lookback_days < 2 {
            return Err(FundlabError::config_invalid(
                "signal",
                "volatility_lookback_days",
                "volatility_lookback_days must be at least 2",
            ));
        }
        if !(self.low_threshold >= 0.0 && self.low_threshold < self.high_threshold) {
            return Err(FundlabError::config_invalid(
                "signal",
                "volatility_low_threshold",
                "volatility thresholds must satisfy 0 <= low < high",
            ));
        }
        for (key, v) in [
            ("volatility_low_factor", self.low_factor),
            ("volatility_normal_factor", self.normal_factor),
            ("volatility_high_factor", self.high_factor),
        ] {
            if !(v > 0.0) {
                return Err(FundlabError::config_invalid("signal", key, format!("{key} must be positive")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolatilityReading {
    pub volatility: f64,
    pub band: VolatilityBand,
    pub factor: f64,
}

#[derive(Debug, Clone, Default)]
pub struct PositionManager {
    config: VolatilityConfig,
}

impl PositionManager {
    pub fn new(config: VolatilityConfig) -> Self {
        PositionManager { config }
    }

    /// Annualised sample std-dev of the last `lookback_days` returns.
    /// Fewer than two returns give 0.
    pub fn annualized_volatility(&self, returns: &[f64]) -> f64 {
        let window = stats::tail(returns, self.config.lookback_days);
        if window.len() < 2 {
            return 0.0;
        }
        stats::std_dev(window) * TRADING_DAYS_PER_YEAR.sqrt()
    }

    pub fn assess(&self, returns: &[f64]) -> VolatilityReading {
        if returns.len() < 2 {
            return VolatilityReading {
                volatility: 0.0,
                band: VolatilityBand::Normal,
                factor: self.config.normal_factor,
            };
        }
        self.classify(self.annualized_volatility(returns))
    }

    pub fn classify(&self, volatility: f64) -> VolatilityReading {
        let c = &self.config;
        let (band, factor) = if volatility < c.low_threshold {
            (VolatilityBand::Low, c.low_factor)
        } else if volatility > c.high_threshold {
            (VolatilityBand::High, c.high_factor)
        } else {
            (VolatilityBand::Normal, c.normal_factor)
        };
        VolatilityReading {
            volatility,
            band,
            factor,
        }
    }
}
