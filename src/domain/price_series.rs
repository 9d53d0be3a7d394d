//! Per-instrument price history and the unified simulation timeline.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// One day of one instrument, as supplied by the historical-data provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub price: f64,
    pub daily_return: f64,
    pub volume: Option<f64>,
}

impl PricePoint {
    pub fn new(date: NaiveDate, price: f64, daily_return: f64) -> Self {
        PricePoint {
            date,
            price,
            daily_return,
            volume: None,
        }
    }
}

/// Ordered, pre-deduplicated history for one instrument.
#[derive(Debug, Clone)]
pub struct InstrumentSeries {
    pub code: String,
    pub name: String,
    pub points: Vec<PricePoint>,
    pub date_index: HashMap<NaiveDate, usize>,
}

impl InstrumentSeries {
    pub fn new(code: impl Into<String>, name: impl Into<String>, points: Vec<PricePoint>) -> Self {
        let date_index = points
            .iter()
            .enumerate()
            .map(|(i, p)| (p.date, i))
            .collect();
        Self {
            code: code.into(),
            name: name.into(),
            points,
            date_index,
        }
    }

    /// Build a series from `(date, price)` pairs, deriving the daily return.
    /// The first point has a daily return of zero.
    pub fn from_prices(code: &str, name: &str, prices: &[(NaiveDate, f64)]) -> Self {
        let points = prices
            .iter()
            .enumerate()
            .map(|(i, &(date, price))| {
                let daily_return = if i == 0 {
                    0.0
                } else {
                    simple_return(prices[i - 1].1, price)
                };
                PricePoint::new(date, price, daily_return)
            })
            .collect();
        Self::new(code, name, points)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn index_of(&self, date: NaiveDate) -> Option<usize> {
        self.date_index.get(&date).copied()
    }

    pub fn point_on(&self, date: NaiveDate) -> Option<&PricePoint> {
        self.index_of(date).map(|i| &self.points[i])
    }

    pub fn price_on(&self, date: NaiveDate) -> Option<f64> {
        self.point_on(date).map(|p| p.price)
    }

    /// Daily returns of points `0..=index`.
    pub fn returns_through(&self, index: usize) -> Vec<f64> {
        let end = (index + 1).min(self.points.len());
        self.points[..end].iter().map(|p| p.daily_return).collect()
    }
}

/// (curr - prev) / prev, or 0 when prev is not positive.
pub fn simple_return(prev: f64, curr: f64) -> f64 {
    if prev > 0.0 {
        (curr - prev) / prev
    } else {
        0.0
    }
}

pub fn build_unified_timeline(series: &[InstrumentSeries]) -> Vec<NaiveDate> {
    let unique_dates: BTreeSet<NaiveDate> = series
        .iter()
        .flat_map(|s| s.points.iter().map(|p| p.date))
        .collect();
    unique_dates.into_iter().collect()
}

/// Prices of every instrument that trades on `date`.
pub fn prices_on(series: &[InstrumentSeries], date: NaiveDate) -> HashMap<String, f64> {
    series
        .iter()
        .filter_map(|s| s.price_on(date).map(|p| (s.code.clone(), p)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    #[test]
    fn from_prices_derives_returns() {
        let s = InstrumentSeries::from_prices("510300", "CSI 300 ETF", &[(d(1), 100.0), (d(4), 110.0), (d(5), 99.0)]);
        assert_eq!(s.len(), 3);
        assert!((s.points[0].daily_return - 0.0).abs() < f64::EPSILON);
        assert!((s.points[1].daily_return - 0.10).abs() < 1e-12);
        assert!((s.points[2].daily_return - (-0.10)).abs() < 1e-12);
    }

    #[test]
    fn date_lookup() {
        let s = InstrumentSeries::from_prices("A", "A", &[(d(1), 1.0), (d(4), 2.0)]);
        assert_eq!(s.index_of(d(4)), Some(1));
        assert_eq!(s.index_of(d(2)), None);
        assert_eq!(s.price_on(d(1)), Some(1.0));
    }

    #[test]
    fn returns_through_is_inclusive() {
        let s = InstrumentSeries::from_prices("A", "A", &[(d(1), 1.0), (d(4), 2.0), (d(5), 1.0)]);
        assert_eq!(s.returns_through(1).len(), 2);
        assert_eq!(s.returns_through(10).len(), 3);
    }

    #[test]
    fn simple_return_guards_non_positive_base() {
        assert_eq!(simple_return(0.0, 5.0), 0.0);
        assert!((simple_return(4.0, 5.0) - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn unified_timeline_is_sorted_union() {
        let a = InstrumentSeries::from_prices("A", "A", &[(d(1), 1.0), (d(5), 1.0)]);
        let b = InstrumentSeries::from_prices("B", "B", &[(d(4), 1.0), (d(5), 1.0)]);
        assert_eq!(build_unified_timeline(&[a, b]), vec![d(1), d(4), d(5)]);
    }

    #[test]
    fn prices_on_skips_missing() {
        let a = InstrumentSeries::from_prices("A", "A", &[(d(1), 1.0)]);
        let b = InstrumentSeries::from_prices("B", "B", &[(d(4), 2.0)]);
        let prices = prices_on(&[a, b], d(4));
        assert_eq!(prices.len(), 1);
        assert_eq!(prices.get("B"), Some(&2.0));
    }
}
