//! Portfolio-level risk control state machine.
//!
//! ```text
//! Normal --check()--> Triggered(kind) --mark_liquidated()--> Liquidated
//!   ^                                                            |
//!   +------------------------- next check() --------------------+
//! ```
//!
//! The peak is updated on every check before any threshold is evaluated,
//! and only `reset` can lower it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Slack on threshold comparisons so a value landing exactly on a boundary
/// triggers despite rounding in the ratio.
const THRESHOLD_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskKind {
    DailyStopLoss,
    DailyTakeProfit,
    CumulativeStopLoss,
    TrailingStop,
}

impl fmt::Display for RiskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskKind::DailyStopLoss => "daily stop-loss",
            RiskKind::DailyTakeProfit => "daily take-profit",
            RiskKind::CumulativeStopLoss => "cumulative stop-loss",
            RiskKind::TrailingStop => "trailing stop",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskState {
    Normal,
    Triggered(RiskKind),
    Liquidated,
}

/// Thresholds as fractions. `None` disables a check.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RiskThresholds {
    /// <= 0, e.g. -0.05
    pub daily_stop_loss: Option<f64>,
    /// >= 0
    pub daily_take_profit: Option<f64>,
    /// <= 0, relative to the initial value
    pub total_stop_loss: Option<f64>,
    /// in (0, 1), decline from peak
    pub trailing_stop: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEvent {
    pub kind: RiskKind,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskController {
    thresholds: RiskThresholds,
    state: RiskState,
    peak: f64,
    previous: f64,
    initial: f64,
}

impl RiskController {
    pub fn new(thresholds: RiskThresholds, initial_value: f64) -> Self {
        RiskController {
            thresholds,
            state: RiskState::Normal,
            peak: initial_value,
            previous: initial_value,
            initial: initial_value,
        }
    }

    pub fn state(&self) -> RiskState {
        self.state
    }

    pub fn peak(&self) -> f64 {
        self.peak
    }

    pub fn thresholds(&self) -> &RiskThresholds {
        &self.thresholds
    }

    /// Evaluate today's portfolio value. A returned event means the whole
    /// portfolio should be liquidated.
    pub fn check(&mut self, value: f64) -> Option<RiskEvent> {
        if self.state == RiskState::Liquidated {
            self.state = RiskState::Normal;
        }
        self.peak = self.peak.max(value);

        let daily = ratio_change(self.previous, value);
        let cumulative = ratio_change(self.initial, value);
        let drawdown = if self.peak > 0.0 {
            (self.peak - value) / self.peak
        } else {
            0.0
        };
        self.previous = value;

        let t = &self.thresholds;
        let hit = if t.daily_stop_loss.is_some_and(|th| daily <= th + THRESHOLD_EPSILON) {
            Some((RiskKind::DailyStopLoss, daily))
        } else if t.daily_take_profit.is_some_and(|th| daily >= th - THRESHOLD_EPSILON) {
            Some((RiskKind::DailyTakeProfit, daily))
        } else if t.total_stop_loss.is_some_and(|th| cumulative <= th + THRESHOLD_EPSILON) {
            Some((RiskKind::CumulativeStopLoss, cumulative))
        } else if t.trailing_stop.is_some_and(|th| drawdown >= th - THRESHOLD_EPSILON) {
            Some((RiskKind::TrailingStop, -drawdown))
        } else {
            None
        };

        hit.map(|(kind, observed)| {
            self.state = RiskState::Triggered(kind);
            RiskEvent {
                kind,
                reason: format!("{kind} triggered at {:.2}%", observed * 100.0),
            }
        })
    }

    pub fn mark_liquidated(&mut self) {
        self.state = RiskState::Liquidated;
    }

    pub fn reset(&mut self, value: f64) {
        self.state = RiskState::Normal;
        self.peak = value;
        self.previous = value;
        self.initial = value;
    }
}

fn ratio_change(base: f64, value: f64) -> f64 {
    if base > 0.0 { value / base - 1.0 } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn all_thresholds() -> RiskThresholds {
        RiskThresholds {
            daily_stop_loss: Some(-0.05),
            daily_take_profit: Some(0.08),
            total_stop_loss: Some(-0.20),
            trailing_stop: Some(0.15),
        }
    }

    #[test]
    fn quiet_day_is_normal() {
        let mut rc = RiskController::new(all_thresholds(), 100.0);
        assert!(rc.check(101.0).is_none());
        assert_eq!(rc.state(), RiskState::Normal);
    }

    #[test]
    fn daily_stop_loss_is_inclusive() {
        let mut rc = RiskController::new(all_thresholds(), 100.0);
        let ev = rc.check(95.0).unwrap();
        assert_eq!(ev.kind, RiskKind::DailyStopLoss);
        assert_eq!(rc.state(), RiskState::Triggered(RiskKind::DailyStopLoss));
        assert!(ev.reason.contains("daily stop-loss"));
    }

    #[test]
    fn daily_take_profit() {
        let mut rc = RiskController::new(all_thresholds(), 100.0);
        assert_eq!(rc.check(110.0).unwrap().kind, RiskKind::DailyTakeProfit);
    }

    #[test]
    fn daily_checks_take_precedence() {
        // -24% breaches daily, cumulative and trailing at once
        let mut rc = RiskController::new(all_thresholds(), 100.0);
        let ev = rc.check(76.0).unwrap();
        assert_eq!(ev.kind, RiskKind::DailyStopLoss);
    }

    #[test]
    fn cumulative_stop_loss() {
        let t = RiskThresholds {
            total_stop_loss: Some(-0.10),
            ..Default::default()
        };
        let mut rc = RiskController::new(t, 100.0);
        assert!(rc.check(95.0).is_none());
        assert_eq!(rc.check(90.0).unwrap().kind, RiskKind::CumulativeStopLoss);
    }

    #[test]
    fn exact_boundaries_trigger() {
        // 90/100 - 1 rounds to -0.09999999999999998
        let t = RiskThresholds {
            total_stop_loss: Some(-0.10),
            ..Default::default()
        };
        assert_eq!(
            RiskController::new(t, 100.0).check(90.0).unwrap().kind,
            RiskKind::CumulativeStopLoss
        );

        let t = RiskThresholds {
            daily_stop_loss: Some(-0.07),
            ..Default::default()
        };
        assert_eq!(
            RiskController::new(t, 100.0).check(93.0).unwrap().kind,
            RiskKind::DailyStopLoss
        );

        let t = RiskThresholds {
            daily_take_profit: Some(0.07),
            ..Default::default()
        };
        assert_eq!(
            RiskController::new(t, 100.0).check(107.0).unwrap().kind,
            RiskKind::DailyTakeProfit
        );

        let t = RiskThresholds {
            trailing_stop: Some(0.3),
            ..Default::default()
        };
        let mut rc = RiskController::new(t, 100.0);
        assert!(rc.check(110.0).is_none());
        assert_eq!(rc.check(77.0).unwrap().kind, RiskKind::TrailingStop);
    }

    #[test]
    fn trailing_stop_from_peak() {
        let t = RiskThresholds {
            trailing_stop: Some(0.10),
            ..Default::default()
        };
        let mut rc = RiskController::new(t, 100.0);
        rc.check(120.0);
        assert!(rc.check(110.0).is_none());
        assert_eq!(rc.check(108.0).unwrap().kind, RiskKind::TrailingStop);
        assert!((rc.peak() - 120.0).abs() < f64::EPSILON);
    }

    #[test]
    fn disabled_thresholds_never_fire() {
        let mut rc = RiskController::new(RiskThresholds::default(), 100.0);
        assert!(rc.check(10.0).is_none());
        assert!(rc.check(1_000.0).is_none());
    }

    #[test]
    fn liquidated_returns_to_normal_on_next_check() {
        let mut rc = RiskController::new(all_thresholds(), 100.0);
        rc.check(94.0);
        rc.mark_liquidated();
        assert_eq!(rc.state(), RiskState::Liquidated);
        assert!(rc.check(94.5).is_none());
        assert_eq!(rc.state(), RiskState::Normal);
    }

    #[test]
    fn reset_lowers_peak() {
        let mut rc = RiskController::new(all_thresholds(), 100.0);
        rc.check(150.0);
        rc.reset(80.0);
        assert!((rc.peak() - 80.0).abs() < f64::EPSILON);
        assert!(rc.check(80.0).is_none());
    }

    proptest! {
        #[test]
        fn peak_never_decreases(values in proptest::collection::vec(1.0..1_000.0_f64, 1..200)) {
            let mut rc = RiskController::new(all_thresholds(), 100.0);
            let mut last_peak = rc.peak();
            for v in values {
                if rc.check(v).is_some() {
                    rc.mark_liquidated();
                }
                prop_assert!(rc.peak() >= last_peak);
                prop_assert!(rc.peak() >= v);
                last_peak = rc.peak();
            }
        }
    }
}
