//! Cumulative-loss thresholds for a single open holding.

use serde::{Deserialize, Serialize};

use super::error::FundlabError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopLossLevel {
    Normal,
    Warning,
    Triggered,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Redemption {
    None,
    /// Fraction of the holding to redeem.
    Partial(f64),
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StopLossConfig {
    /// <= 0 and above `total_stop_loss`.
    pub warning: f64,
    /// <= 0
    pub total_stop_loss: f64,
    pub warning_redeem_fraction: f64,
}

impl Default for StopLossConfig {
    fn default() -> Self {
        StopLossConfig {
            warning: -0.10,
            total_stop_loss: -0.20,
            warning_redeem_fraction: 0.3,
        }
    }
}

impl StopLossConfig {
    pub fn validate(&self) -> Result<(), FundlabError> {
        if self.total_stop_loss > 0.0 {
            return Err(FundlabError::config_invalid(
                "signal",
                "total_stop_loss",
                "total_stop_loss must be <= 0",
            ));
        }
        if self.warning > 0.0 || self.warning < self.total_stop_loss {
            return Err(FundlabError::config_invalid(
                "signal",
                "stop_loss_warning",
                "stop_loss_warning must lie between total_stop_loss and 0",
            ));
        }
        if !(self.warning_redeem_fraction > 0.0 && self.warning_redeem_fraction <= 1.0) {
            return Err(FundlabError::config_invalid(
                "signal",
                "warning_redeem_fraction",
                "warning_redeem_fraction must be in (0, 1]",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StopLossAssessment {
    pub level: StopLossLevel,
    pub redemption: Redemption,
    pub cumulative_return: f64,
}

#[derive(Debug, Clone, Default)]
pub struct StopLossManager {
    config: StopLossConfig,
}

impl StopLossManager {
    pub fn new(config: StopLossConfig) -> Self {
        StopLossManager { config }
    }

    /// Both comparisons are inclusive.
    pub fn evaluate(&self, cumulative_return: f64) -> StopLossAssessment {
        let (level, redemption) = if cumulative_return <= self.config.total_stop_loss {
            (StopLossLevel::Triggered, Redemption::Full)
        } else if cumulative_return <= self.config.warning {
            (
                StopLossLevel::Warning,
                Redemption::Partial(self.config.warning_redeem_fraction),
            )
        } else {
            (StopLossLevel::Normal, Redemption::None)
        };
        StopLossAssessment {
            level,
            redemption,
            cumulative_return,
        }
    }
}
