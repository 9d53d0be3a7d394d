//! Asset snapshots: the per-rebalance view of one instrument that the
//! filter and selection engines operate on.
//!
//! Rolling statistics are only inserted when enough history exists, so a
//! young instrument simply lacks e.g. `return_1y` and drops out of any
//! filter or sort that references it.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::price_series::InstrumentSeries;
use super::stats::{self, TRADING_DAYS_PER_YEAR};

/// A snapshot attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Flag(bool),
    Text(String),
}

impl FieldValue {
    /// Numeric view used by comparisons: flags become 1/0, text is parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(v) if v.is_finite() => Some(*v),
            FieldValue::Number(_) => None,
            FieldValue::Flag(b) => Some(if *b { 1.0 } else { 0.0 }),
            FieldValue::Text(s) => match s.trim() {
                "true" => Some(1.0),
                "false" => Some(0.0),
                t => t.parse::<f64>().ok().filter(|v| v.is_finite()),
            },
        }
    }

    /// Parse a literal from configuration text.
    pub fn parse_literal(raw: &str) -> FieldValue {
        let t = raw.trim();
        match t {
            "true" => FieldValue::Flag(true),
            "false" => FieldValue::Flag(false),
            _ => match t.parse::<f64>() {
                Ok(v) => FieldValue::Number(v),
                Err(_) => FieldValue::Text(t.trim_matches('"').to_string()),
            },
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(v) => write!(f, "{v}"),
            FieldValue::Flag(b) => write!(f, "{b}"),
            FieldValue::Text(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSnapshot {
    pub code: String,
    pub name: String,
    pub date: NaiveDate,
    pub price: f64,
    pub fields: BTreeMap<String, FieldValue>,
}

impl AssetSnapshot {
    pub fn new(code: &str, name: &str, date: NaiveDate, price: f64) -> Self {
        AssetSnapshot {
            code: code.to_string(),
            name: name.to_string(),
            date,
            price,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: FieldValue) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    /// Resolve a field by name, including the `price`, `code` and `name`
    /// pseudo-fields.
    pub fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "price" => Some(FieldValue::Number(self.price)),
            "code" => Some(FieldValue::Text(self.code.clone())),
            "name" => Some(FieldValue::Text(self.name.clone())),
            _ => self.fields.get(name).cloned(),
        }
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.field(name).and_then(|v| v.as_f64())
    }
}

/// Windows used when computing snapshot statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotConfig {
    pub stats_window: usize,
    pub risk_free_rate: f64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        SnapshotConfig {
            stats_window: 60,
            risk_free_rate: 0.0,
        }
    }
}

const RETURN_WINDOWS: [(&str, usize); 5] = [
    ("return_1w", 5),
    ("return_1m", 21),
    ("return_3m", 63),
    ("return_6m", 126),
    ("return_1y", 252),
];

/// Build the snapshot of `series` as of point `index`.
pub fn build_snapshot(series: &InstrumentSeries, index: usize, config: &SnapshotConfig) -> Option<AssetSnapshot> {
    let point = series.points.get(index)?;
    let mut snap = AssetSnapshot::new(&series.code, &series.name, point.date, point.price);
    let prices: Vec<f64> = series.points[..=index].iter().map(|p| p.price).collect();

    for (name, window) in RETURN_WINDOWS {
        if index >= window {
            let base = prices[index - window];
            if base > 0.0 {
                snap.fields
                    .insert(name.to_string(), FieldValue::Number(point.price / base - 1.0));
            }
        }
    }

    // Stats need a full window of returns, excluding the first point's zero.
    if index >= config.stats_window && config.stats_window >= 2 {
        let returns = series.returns_through(index);
        let window = stats::tail(&returns, config.stats_window);
        let vol = stats::std_dev(window) * TRADING_DAYS_PER_YEAR.sqrt();
        let dd = stats::max_drawdown(stats::tail(&prices, config.stats_window + 1));
        let daily_rf = config.risk_free_rate / TRADING_DAYS_PER_YEAR;
        let excess: Vec<f64> = window.iter().map(|r| r - daily_rf).collect();
        let sd = stats::std_dev(&excess);
        let sharpe = if sd > 0.0 {
            stats::mean(&excess) / sd * TRADING_DAYS_PER_YEAR.sqrt()
        } else {
            0.0
        };
        snap.fields.insert("volatility".into(), FieldValue::Number(vol));
        snap.fields.insert("max_drawdown".into(), FieldValue::Number(dd));
        snap.fields.insert("sharpe".into(), FieldValue::Number(sharpe));
    }

    if index >= 20 {
        let ma20 = stats::mean(stats::tail(&prices, 20));
        snap.fields
            .insert("above_ma20".into(), FieldValue::Flag(point.price > ma20));
    }

    if let (Some(r1m), Some(r3m)) = (snap.number("return_1m"), snap.number("return_3m")) {
        snap.fields
            .insert("trend_up".into(), FieldValue::Flag(r1m > 0.0 && r3m > 0.0));
    }

    if let (Some(sharpe), Some(r3m), Some(dd)) = (
        snap.number("sharpe"),
        snap.number("return_3m"),
        snap.number("max_drawdown"),
    ) {
        let score = 0.4 * sharpe + 0.4 * (10.0 * r3m) - 0.2 * (10.0 * dd);
        snap.fields
            .insert("composite_score".into(), FieldValue::Number(score));
    }

    Some(snap)
}

/// Snapshots of every instrument that trades on `date`.
pub fn build_snapshots(series: &[InstrumentSeries], date: NaiveDate, config: &SnapshotConfig) -> Vec<AssetSnapshot> {
    series
        .iter()
        .filter_map(|s| s.index_of(date).and_then(|i| build_snapshot(s, i, config)))
        .collect()
}
