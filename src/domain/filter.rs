//! Filter engine: boolean predicates over asset snapshots.
//!
//! # Evaluation Semantics
//!
//! - Both sides numeric (after coercion): numeric comparison, `==` within 1e-9
//! - Either side non-numeric: `==`/`!=` compare text, ordering excludes
//! - Missing field: the condition is false
//! - `And`: every condition true; `Or`: at least one true
//! - No conditions: every snapshot passes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::FundlabError;
use super::snapshot::{AssetSnapshot, FieldValue};

const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOp {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl ComparisonOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            ComparisonOp::Gt => ">",
            ComparisonOp::Lt => "<",
            ComparisonOp::Ge => ">=",
            ComparisonOp::Le => "<=",
            ComparisonOp::Eq => "==",
            ComparisonOp::Ne => "!=",
        }
    }

    fn compare_numbers(&self, left: f64, right: f64) -> bool {
        match self {
            ComparisonOp::Gt => left > right,
            ComparisonOp::Lt => left < right,
            ComparisonOp::Ge => left >= right,
            ComparisonOp::Le => left <= right,
            ComparisonOp::Eq => (left - right).abs() < EPSILON,
            ComparisonOp::Ne => (left - right).abs() >= EPSILON,
        }
    }
}

impl FromStr for ComparisonOp {
    type Err = FundlabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">" => Ok(ComparisonOp::Gt),
            "<" => Ok(ComparisonOp::Lt),
            ">=" => Ok(ComparisonOp::Ge),
            "<=" => Ok(ComparisonOp::Le),
            "==" | "=" => Ok(ComparisonOp::Eq),
            "!=" => Ok(ComparisonOp::Ne),
            other => Err(FundlabError::invalid_strategy(
                "filters",
                format!("unknown operator `{other}`"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterLogic {
    #[default]
    And,
    Or,
}

impl FromStr for FilterLogic {
    type Err = FundlabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "and" => Ok(FilterLogic::And),
            "or" => Ok(FilterLogic::Or),
            other => Err(FundlabError::invalid_strategy(
                "filter_logic",
                format!("expected `and` or `or`, got `{other}`"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    pub field: String,
    pub op: ComparisonOp,
    pub value: FieldValue,
}

impl FilterCondition {
    pub fn new(field: &str, op: ComparisonOp, value: FieldValue) -> Self {
        FilterCondition {
            field: field.to_string(),
            op,
            value,
        }
    }

    pub fn matches(&self, snapshot: &AssetSnapshot) -> bool {
        let Some(actual) = snapshot.field(&self.field) else {
            return false;
        };
        match (actual.as_f64(), self.value.as_f64()) {
            (Some(left), Some(right)) => self.op.compare_numbers(left, right),
            _ => match self.op {
                ComparisonOp::Eq => actual.to_string() == self.value.to_string(),
                ComparisonOp::Ne => actual.to_string() != self.value.to_string(),
                _ => false,
            },
        }
    }
}

impl FromStr for FilterCondition {
    type Err = FundlabError;

    /// Parse `field op value`, e.g. `return_3m > 0.05`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let (Some(field), Some(op), Some(value)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(FundlabError::invalid_strategy(
                "filters",
                format!("expected `field op value`, got `{}`", s.trim()),
            ));
        };
        let rest: Vec<&str> = parts.collect();
        let literal = if rest.is_empty() {
            value.to_string()
        } else {
            format!("{value} {}", rest.join(" "))
        };
        Ok(FilterCondition {
            field: field.to_string(),
            op: op.parse()?,
            value: FieldValue::parse_literal(&literal),
        })
    }
}

impl fmt::Display for FilterCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.op.symbol(), self.value)
    }
}

pub fn filter<'a>(
    snapshots: &'a [AssetSnapshot],
    conditions: &[FilterCondition],
    logic: FilterLogic,
) -> Vec<&'a AssetSnapshot> {
    snapshots
        .iter()
        .filter(|snap| match logic {
            FilterLogic::And => conditions.iter().all(|c| c.matches(snap)),
            FilterLogic::Or => conditions.is_empty() || conditions.iter().any(|c| c.matches(snap)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn snap(code: &str, ret: Option<f64>, vol: Option<f64>) -> AssetSnapshot {
        let mut s = AssetSnapshot::new(code, code, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(), 1.0);
        if let Some(r) = ret {
            s = s.with_field("return_3m", FieldValue::Number(r));
        }
        if let Some(v) = vol {
            s = s.with_field("volatility", FieldValue::Number(v));
        }
        s
    }

    fn codes(v: &[&AssetSnapshot]) -> Vec<String> {
        v.iter().map(|s| s.code.clone()).collect()
    }

    #[test]
    fn parse_condition() {
        let c: FilterCondition = "return_3m >= 0.05".parse().unwrap();
        assert_eq!(c.field, "return_3m");
        assert_eq!(c.op, ComparisonOp::Ge);
        assert_eq!(c.value, FieldValue::Number(0.05));
    }

    #[test]
    fn parse_condition_rejects_bad_operator() {
        let err = "return_3m => 0.05".parse::<FilterCondition>().unwrap_err();
        assert!(matches!(err, FundlabError::InvalidStrategy { field, .. } if field == "filters"));
    }

    #[test]
    fn parse_condition_rejects_missing_value() {
        assert!("return_3m >".parse::<FilterCondition>().is_err());
    }

    #[test]
    fn and_requires_all() {
        let snaps = vec![snap("A", Some(0.1), Some(0.2)), snap("B", Some(0.1), Some(0.5))];
        let conds = vec![
            FilterCondition::new("return_3m", ComparisonOp::Gt, FieldValue::Number(0.0)),
            FilterCondition::new("volatility", ComparisonOp::Lt, FieldValue::Number(0.3)),
        ];
        assert_eq!(codes(&filter(&snaps, &conds, FilterLogic::And)), vec!["A"]);
    }

    #[test]
    fn or_requires_any() {
        let snaps = vec![
            snap("A", Some(-0.1), Some(0.2)),
            snap("B", Some(0.1), Some(0.5)),
            snap("C", Some(-0.1), Some(0.5)),
        ];
        let conds = vec![
            FilterCondition::new("return_3m", ComparisonOp::Gt, FieldValue::Number(0.0)),
            FilterCondition::new("volatility", ComparisonOp::Lt, FieldValue::Number(0.3)),
        ];
        assert_eq!(codes(&filter(&snaps, &conds, FilterLogic::Or)), vec!["A", "B"]);
    }

    #[test]
    fn missing_field_excludes() {
        let snaps = vec![snap("A", None, Some(0.2)), snap("B", Some(0.2), None)];
        let conds = vec![FilterCondition::new("return_3m", ComparisonOp::Gt, FieldValue::Number(0.0))];
        assert_eq!(codes(&filter(&snaps, &conds, FilterLogic::And)), vec!["B"]);
    }

    #[test]
    fn non_coercible_value_excludes() {
        let s = snap("A", None, None).with_field("return_3m", FieldValue::Text("n/a".into()));
        let snaps = vec![s];
        let conds = vec![FilterCondition::new("return_3m", ComparisonOp::Gt, FieldValue::Number(0.0))];
        assert!(filter(&snaps, &conds, FilterLogic::And).is_empty());
    }

    #[test]
    fn text_coerces_to_number() {
        let s = snap("A", None, None).with_field("return_3m", FieldValue::Text("0.2".into()));
        let snaps = vec![s];
        let conds = vec![FilterCondition::new("return_3m", ComparisonOp::Ge, FieldValue::Text("0.2".into()))];
        assert_eq!(filter(&snaps, &conds, FilterLogic::And).len(), 1);
    }

    #[test]
    fn text_equality_on_code() {
        let snaps = vec![snap("A", None, None), snap("B", None, None)];
        let conds = vec![FilterCondition::new("code", ComparisonOp::Ne, FieldValue::Text("A".into()))];
        assert_eq!(codes(&filter(&snaps, &conds, FilterLogic::And)), vec!["B"]);
    }

    #[test]
    fn flags_compare_as_numbers() {
        let s = snap("A", None, None).with_field("above_ma20", FieldValue::Flag(true));
        let snaps = vec![s];
        let conds = vec![FilterCondition::new("above_ma20", ComparisonOp::Eq, FieldValue::Flag(true))];
        assert_eq!(filter(&snaps, &conds, FilterLogic::And).len(), 1);
    }

    #[test]
    fn empty_conditions_pass_everything() {
        let snaps = vec![snap("A", None, None), snap("B", None, None)];
        assert_eq!(filter(&snaps, &[], FilterLogic::And).len(), 2);
        assert_eq!(filter(&snaps, &[], FilterLogic::Or).len(), 2);
    }

    #[test]
    fn display_round_trips_through_parse() {
        let c = FilterCondition::new("volatility", ComparisonOp::Le, FieldValue::Number(0.25));
        let parsed: FilterCondition = c.to_string().parse().unwrap();
        assert_eq!(parsed, c);
    }
}
