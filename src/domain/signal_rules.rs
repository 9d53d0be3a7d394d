//! Priority-ordered base rules over (today_return, prev_return).
//!
//! Each rule covers a rectangle with half-open `[min, max)` bounds on both
//! axes. Rules are scanned by descending priority, equal priorities by
//! ascending name; the first rule containing the point wins, otherwise the
//! table's default outcome applies.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use super::error::FundlabError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SignalAction::Buy => "buy",
            SignalAction::Sell => "sell",
            SignalAction::Hold => "hold",
        })
    }
}

impl FromStr for SignalAction {
    type Err = FundlabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(SignalAction::Buy),
            "sell" => Ok(SignalAction::Sell),
            "hold" => Ok(SignalAction::Hold),
            other => Err(FundlabError::config_invalid(
                "signal",
                "action",
                format!("unknown signal action `{other}`"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub action: SignalAction,
    pub multiplier: f64,
}

impl RuleOutcome {
    pub fn new(action: SignalAction, multiplier: f64) -> Self {
        RuleOutcome { action, multiplier }
    }
}

/// Half-open interval; a missing bound is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ReturnRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl ReturnRange {
    pub const ANY: ReturnRange = ReturnRange { min: None, max: None };

    pub fn between(min: f64, max: f64) -> Self {
        ReturnRange {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn below(max: f64) -> Self {
        ReturnRange { min: None, max: Some(max) }
    }

    pub fn at_least(min: f64) -> Self {
        ReturnRange { min: Some(min), max: None }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.is_none_or(|m| value >= m) && self.max.is_none_or(|m| value < m)
    }

    fn is_empty(&self) -> bool {
        matches!((self.min, self.max), (Some(lo), Some(hi)) if lo >= hi)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRule {
    pub name: String,
    pub priority: i32,
    pub today: ReturnRange,
    pub prev: ReturnRange,
    pub outcome: RuleOutcome,
}

impl SignalRule {
    pub fn new(name: &str, priority: i32, today: ReturnRange, prev: ReturnRange, outcome: RuleOutcome) -> Self {
        SignalRule {
            name: name.to_string(),
            priority,
            today,
            prev,
            outcome,
        }
    }

    pub fn matches(&self, today_return: f64, prev_return: f64) -> bool {
        self.today.contains(today_return) && self.prev.contains(prev_return)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch<'a> {
    pub rule: Option<&'a str>,
    pub outcome: RuleOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleTable {
    rules: Vec<SignalRule>,
    default: RuleOutcome,
}

impl RuleTable {
    pub fn new(mut rules: Vec<SignalRule>, default: RuleOutcome) -> Self {
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        RuleTable { rules, default }
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[SignalRule] {
        &self.rules
    }

    pub fn default_outcome(&self) -> RuleOutcome {
        self.default
    }

    pub fn evaluate(&self, today_return: f64, prev_return: f64) -> RuleMatch<'_> {
        match self.rules.iter().find(|r| r.matches(today_return, prev_return)) {
            Some(rule) => RuleMatch {
                rule: Some(&rule.name),
                outcome: rule.outcome,
            },
            None => RuleMatch {
                rule: None,
                outcome: self.default,
            },
        }
    }

    pub fn validate(&self) -> Result<(), FundlabError> {
        let mut seen = HashSet::new();
        for rule in &self.rules {
            if !seen.insert(rule.name.as_str()) {
                return Err(FundlabError::config_invalid(
                    "signal",
                    "rules",
                    format!("duplicate rule name `{}`", rule.name),
                ));
            }
            if !(rule.outcome.multiplier > 0.0) {
                return Err(FundlabError::config_invalid(
                    "signal",
                    "rules",
                    format!("rule `{}` multiplier must be positive", rule.name),
                ));
            }
            if rule.today.is_empty() || rule.prev.is_empty() {
                return Err(FundlabError::config_invalid(
                    "signal",
                    "rules",
                    format!("rule `{}` has a range with min >= max", rule.name),
                ));
            }
        }
        if !(self.default.multiplier > 0.0) {
            return Err(FundlabError::config_invalid(
                "signal",
                "default_multiplier",
                "default_multiplier must be positive",
            ));
        }
        Ok(())
    }
}

impl Default for RuleTable {
    /// Buy the dips harder, trim into rallies, otherwise invest the base amount.
    fn default() -> Self {
        use SignalAction::{Buy, Sell};
        RuleTable::new(
            vec![
                SignalRule::new("sharp_drop", 100, ReturnRange::below(-0.03), ReturnRange::ANY, RuleOutcome::new(Buy, 2.0)),
                SignalRule::new("sharp_rally", 100, ReturnRange::at_least(0.03), ReturnRange::ANY, RuleOutcome::new(Sell, 1.0)),
                SignalRule::new(
                    "two_day_decline",
                    90,
                    ReturnRange::below(-0.01),
                    ReturnRange::below(-0.01),
                    RuleOutcome::new(Buy, 1.5),
                ),
                SignalRule::new(
                    "two_day_rally",
                    90,
                    ReturnRange::at_least(0.01),
                    ReturnRange::at_least(0.01),
                    RuleOutcome::new(Sell, 0.5),
                ),
                SignalRule::new(
                    "moderate_drop",
                    80,
                    ReturnRange::between(-0.03, -0.01),
                    ReturnRange::ANY,
                    RuleOutcome::new(Buy, 1.2),
                ),
            ],
            RuleOutcome::new(Buy, 1.0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_is_half_open() {
        let r = ReturnRange::between(-0.03, -0.01);
        assert!(r.contains(-0.03));
        assert!(!r.contains(-0.01));
        assert!(ReturnRange::ANY.contains(f64::MAX));
    }

    #[test]
    fn sorted_by_priority_then_name() {
        let out = RuleOutcome::new(SignalAction::Hold, 1.0);
        let table = RuleTable::new(
            vec![
                SignalRule::new("b", 10, ReturnRange::ANY, ReturnRange::ANY, out),
                SignalRule::new("c", 20, ReturnRange::ANY, ReturnRange::ANY, out),
                SignalRule::new("a", 10, ReturnRange::ANY, ReturnRange::ANY, out),
            ],
            out,
        );
        let names: Vec<&str> = table.rules().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn equal_priority_overlap_resolves_lexically() {
        let table = RuleTable::new(
            vec![
                SignalRule::new("zeta", 5, ReturnRange::ANY, ReturnRange::ANY, RuleOutcome::new(SignalAction::Sell, 1.0)),
                SignalRule::new("alpha", 5, ReturnRange::ANY, ReturnRange::ANY, RuleOutcome::new(SignalAction::Buy, 1.0)),
            ],
            RuleOutcome::new(SignalAction::Hold, 1.0),
        );
        let m = table.evaluate(0.0, 0.0);
        assert_eq!(m.rule, Some("alpha"));
        assert_eq!(m.outcome.action, SignalAction::Buy);
    }

    #[test]
    fn default_table_matches() {
        let table = RuleTable::default();
        assert_eq!(table.evaluate(-0.05, 0.0).rule, Some("sharp_drop"));
        assert_eq!(table.evaluate(-0.02, -0.02).rule, Some("two_day_decline"));
        assert_eq!(table.evaluate(-0.02, 0.01).rule, Some("moderate_drop"));
        assert_eq!(table.evaluate(0.04, 0.0).outcome.action, SignalAction::Sell);
        let none = table.evaluate(0.001, 0.0);
        assert_eq!(none.rule, None);
        assert_eq!(none.outcome, RuleOutcome::new(SignalAction::Buy, 1.0));
    }

    #[test]
    fn validate_rejects_bad_rules() {
        assert!(RuleTable::default().validate().is_ok());
        let out = RuleOutcome::new(SignalAction::Buy, 1.0);
        let dup = RuleTable::new(
            vec![
                SignalRule::new("x", 1, ReturnRange::ANY, ReturnRange::ANY, out),
                SignalRule::new("x", 2, ReturnRange::ANY, ReturnRange::ANY, out),
            ],
            out,
        );
        assert!(dup.validate().is_err());
        let empty = RuleTable::new(
            vec![SignalRule::new("y", 1, ReturnRange::between(0.1, 0.0), ReturnRange::ANY, out)],
            out,
        );
        assert!(empty.validate().is_err());
        let zero = RuleTable::new(vec![], RuleOutcome::new(SignalAction::Buy, 0.0));
        assert!(zero.validate().is_err());
    }

    #[test]
    fn action_parsing() {
        assert_eq!("SELL".parse::<SignalAction>().unwrap(), SignalAction::Sell);
        assert!("short".parse::<SignalAction>().is_err());
    }
}
