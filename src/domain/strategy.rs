//! Declarative basket strategies and the built-in presets.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::FundlabError;
use super::filter::{ComparisonOp, FilterCondition, FilterLogic};
use super::risk::RiskThresholds;
use super::selection::SortOrder;
use super::snapshot::FieldValue;
use super::weights::WeightMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebalanceFrequency {
    Daily,
    Weekly,
    #[default]
    Monthly,
    Quarterly,
}

impl RebalanceFrequency {
    /// Whether `date` opens a new period relative to the previous trading
    /// day. The first trading day always qualifies.
    pub fn is_rebalance_day(&self, previous: Option<NaiveDate>, date: NaiveDate) -> bool {
        let Some(prev) = previous else {
            return true;
        };
        match self {
            RebalanceFrequency::Daily => true,
            RebalanceFrequency::Weekly => prev.iso_week() != date.iso_week(),
            RebalanceFrequency::Monthly => (prev.year(), prev.month()) != (date.year(), date.month()),
            RebalanceFrequency::Quarterly => {
                (prev.year(), prev.month0() / 3) != (date.year(), date.month0() / 3)
            }
        }
    }
}

impl FromStr for RebalanceFrequency {
    type Err = FundlabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(RebalanceFrequency::Daily),
            "weekly" => Ok(RebalanceFrequency::Weekly),
            "monthly" => Ok(RebalanceFrequency::Monthly),
            "quarterly" => Ok(RebalanceFrequency::Quarterly),
            other => Err(FundlabError::invalid_strategy(
                "rebalance",
                format!("unknown frequency `{other}`"),
            )),
        }
    }
}

impl fmt::Display for RebalanceFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RebalanceFrequency::Daily => "daily",
            RebalanceFrequency::Weekly => "weekly",
            RebalanceFrequency::Monthly => "monthly",
            RebalanceFrequency::Quarterly => "quarterly",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySpec {
    pub name: String,
    pub filters: Vec<FilterCondition>,
    pub filter_logic: FilterLogic,
    pub sort_field: String,
    pub sort_order: SortOrder,
    pub select_count: usize,
    pub weight_mode: WeightMode,
    pub max_positions: usize,
    pub rebalance: RebalanceFrequency,
    pub risk: RiskThresholds,
    pub volatility_adjustment: bool,
}

impl Default for StrategySpec {
    fn default() -> Self {
        StrategySpec {
            name: "composite".into(),
            filters: Vec::new(),
            filter_logic: FilterLogic::And,
            sort_field: "composite_score".into(),
            sort_order: SortOrder::Desc,
            select_count: 5,
            weight_mode: WeightMode::Equal,
            max_positions: 10,
            rebalance: RebalanceFrequency::Monthly,
            risk: RiskThresholds::default(),
            volatility_adjustment: false,
        }
    }
}

impl StrategySpec {
    /// Number of instruments a rebalance targets.
    pub fn basket_size(&self) -> usize {
        self.select_count.min(self.max_positions)
    }

    pub fn validate(&self) -> Result<(), FundlabError> {
        if self.name.trim().is_empty() {
            return Err(FundlabError::invalid_strategy("name", "must not be empty"));
        }
        if self.sort_field.trim().is_empty() {
            return Err(FundlabError::invalid_strategy("sort_field", "must not be empty"));
        }
        if self.select_count == 0 {
            return Err(FundlabError::invalid_strategy("select_count", "must be at least 1"));
        }
        if self.max_positions == 0 {
            return Err(FundlabError::invalid_strategy("max_positions", "must be at least 1"));
        }
        if let Some(c) = self.filters.iter().find(|c| c.field.trim().is_empty()) {
            return Err(FundlabError::invalid_strategy(
                "filters",
                format!("condition `{c}` has no field"),
            ));
        }
        validate_weights(&self.weight_mode, self.select_count)?;
        validate_risk(&self.risk)
    }
}

pub fn validate_weights(mode: &WeightMode, select_count: usize) -> Result<(), FundlabError> {
    let WeightMode::Custom(weights) = mode else {
        return Ok(());
    };
    if weights.len() != select_count {
        return Err(FundlabError::invalid_strategy(
            "weights",
            format!("{} weights supplied for select_count {select_count}", weights.len()),
        ));
    }
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(FundlabError::invalid_strategy("weights", "weights must be finite and non-negative"));
    }
    if !(weights.iter().sum::<f64>() > 0.0) {
        return Err(FundlabError::invalid_strategy("weights", "weights must sum to a positive value"));
    }
    Ok(())
}

pub fn validate_risk(risk: &RiskThresholds) -> Result<(), FundlabError> {
    if risk.daily_stop_loss.is_some_and(|v| !(v <= 0.0 && v > -1.0)) {
        return Err(FundlabError::invalid_strategy("daily_stop_loss", "must be in (-1, 0]"));
    }
    if risk.daily_take_profit.is_some_and(|v| !(v >= 0.0)) {
        return Err(FundlabError::invalid_strategy("daily_take_profit", "must be >= 0"));
    }
    if risk.total_stop_loss.is_some_and(|v| !(v <= 0.0 && v > -1.0)) {
        return Err(FundlabError::invalid_strategy("total_stop_loss", "must be in (-1, 0]"));
    }
    if risk.trailing_stop.is_some_and(|v| !(v > 0.0 && v < 1.0)) {
        return Err(FundlabError::invalid_strategy("trailing_stop", "must be in (0, 1)"));
    }
    Ok(())
}

/// Built-in strategies, selectable by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyPreset {
    Composite,
    Momentum,
    LowVolatility,
    TrendFollowing,
}

impl StrategyPreset {
    pub const ALL: [StrategyPreset; 4] = [
        StrategyPreset::Composite,
        StrategyPreset::Momentum,
        StrategyPreset::LowVolatility,
        StrategyPreset::TrendFollowing,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            StrategyPreset::Composite => "composite",
            StrategyPreset::Momentum => "momentum",
            StrategyPreset::LowVolatility => "low_volatility",
            StrategyPreset::TrendFollowing => "trend_following",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            StrategyPreset::Composite => "top 5 by composite score, monthly, 5% daily stop-loss",
            StrategyPreset::Momentum => "positive 3-month return, top 5 by return_3m, 15% trailing stop",
            StrategyPreset::LowVolatility => "volatility under 25%, 5 calmest, quarterly, 20% total stop-loss",
            StrategyPreset::TrendFollowing => "above MA20 and trending up, top 3 by return_1m, weekly, volatility tilt",
        }
    }

    pub fn spec(&self) -> StrategySpec {
        match self {
            StrategyPreset::Composite => StrategySpec {
                name: self.id().into(),
                risk: RiskThresholds {
                    daily_stop_loss: Some(-0.05),
                    ..Default::default()
                },
                ..Default::default()
            },
            StrategyPreset::Momentum => StrategySpec {
                name: self.id().into(),
                filters: vec![FilterCondition::new("return_3m", ComparisonOp::Gt, FieldValue::Number(0.0))],
                sort_field: "return_3m".into(),
                risk: RiskThresholds {
                    trailing_stop: Some(0.15),
                    ..Default::default()
                },
                ..Default::default()
            },
            StrategyPreset::LowVolatility => StrategySpec {
                name: self.id().into(),
                filters: vec![FilterCondition::new("volatility", ComparisonOp::Lt, FieldValue::Number(0.25))],
                sort_field: "volatility".into(),
                sort_order: SortOrder::Asc,
                rebalance: RebalanceFrequency::Quarterly,
                risk: RiskThresholds {
                    total_stop_loss: Some(-0.20),
                    ..Default::default()
                },
                ..Default::default()
            },
            StrategyPreset::TrendFollowing => StrategySpec {
                name: self.id().into(),
                filters: vec![
                    FilterCondition::new("above_ma20", ComparisonOp::Eq, FieldValue::Flag(true)),
                    FilterCondition::new("trend_up", ComparisonOp::Eq, FieldValue::Flag(true)),
                ],
                sort_field: "return_1m".into(),
                select_count: 3,
                rebalance: RebalanceFrequency::Weekly,
                risk: RiskThresholds {
                    trailing_stop: Some(0.10),
                    ..Default::default()
                },
                volatility_adjustment: true,
                ..Default::default()
            },
        }
    }
}

impl FromStr for StrategyPreset {
    type Err = FundlabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StrategyPreset::ALL
            .into_iter()
            .find(|p| p.id() == s.trim())
            .ok_or_else(|| FundlabError::UnknownStrategy(s.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn presets_are_valid() {
        for p in StrategyPreset::ALL {
            p.spec().validate().unwrap();
            assert_eq!(p.id().parse::<StrategyPreset>().unwrap(), p);
        }
    }

    #[test]
    fn unknown_preset() {
        let err = "value".parse::<StrategyPreset>().unwrap_err();
        assert!(matches!(err, FundlabError::UnknownStrategy(id) if id == "value"));
    }

    #[test]
    fn weight_count_mismatch_is_rejected() {
        let spec = StrategySpec {
            weight_mode: WeightMode::Custom(vec![0.5, 0.5]),
            select_count: 3,
            ..Default::default()
        };
        let err = spec.validate().unwrap_err();
        assert!(matches!(err, FundlabError::InvalidStrategy { field, .. } if field == "weights"));
    }

    #[test]
    fn wrong_sign_thresholds_are_rejected() {
        let bad = [
            RiskThresholds {
                daily_stop_loss: Some(0.05),
                ..Default::default()
            },
            RiskThresholds {
                daily_take_profit: Some(-0.01),
                ..Default::default()
            },
            RiskThresholds {
                total_stop_loss: Some(0.1),
                ..Default::default()
            },
            RiskThresholds {
                trailing_stop: Some(1.5),
                ..Default::default()
            },
        ];
        for risk in bad {
            assert!(validate_risk(&risk).is_err(), "{risk:?}");
        }
    }

    #[test]
    fn zero_select_count_is_rejected() {
        let spec = StrategySpec {
            select_count: 0,
            ..Default::default()
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn basket_size_caps_at_max_positions() {
        let spec = StrategySpec {
            select_count: 8,
            max_positions: 3,
            ..Default::default()
        };
        assert_eq!(spec.basket_size(), 3);
    }

    #[test]
    fn rebalance_calendar() {
        let monthly = RebalanceFrequency::Monthly;
        assert!(monthly.is_rebalance_day(None, d(2024, 1, 17)));
        assert!(!monthly.is_rebalance_day(Some(d(2024, 1, 17)), d(2024, 1, 18)));
        assert!(monthly.is_rebalance_day(Some(d(2024, 1, 31)), d(2024, 2, 1)));

        let weekly = RebalanceFrequency::Weekly;
        // Friday -> Monday
        assert!(weekly.is_rebalance_day(Some(d(2024, 1, 5)), d(2024, 1, 8)));
        assert!(!weekly.is_rebalance_day(Some(d(2024, 1, 8)), d(2024, 1, 9)));

        let quarterly = RebalanceFrequency::Quarterly;
        assert!(!quarterly.is_rebalance_day(Some(d(2024, 2, 29)), d(2024, 3, 1)));
        assert!(quarterly.is_rebalance_day(Some(d(2024, 3, 29)), d(2024, 4, 1)));

        assert!(RebalanceFrequency::Daily.is_rebalance_day(Some(d(2024, 1, 2)), d(2024, 1, 3)));
    }

    #[test]
    fn frequency_parsing() {
        assert_eq!("Weekly".parse::<RebalanceFrequency>().unwrap(), RebalanceFrequency::Weekly);
        assert!("yearly".parse::<RebalanceFrequency>().is_err());
    }
}
