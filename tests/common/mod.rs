#![allow(dead_code)]

use chrono::{Duration, NaiveDate};
use fundlab::domain::error::FundlabError;
use fundlab::domain::ledger::EquityPoint;
use fundlab::domain::price_series::InstrumentSeries;
use fundlab::ports::data_port::PriceDataPort;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub const FIXTURE_DAYS: usize = 90;

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn fixture_start() -> NaiveDate {
    date("2023-11-20")
}

pub fn fixture_end() -> NaiveDate {
    fixture_start() + Duration::days(FIXTURE_DAYS as i64 - 1)
}

/// (code, daily drift, wave amplitude, wave frequency)
const FIXTURE_PARAMS: [(&str, f64, f64, f64); 6] = [
    ("510300", 0.0010, 0.010, 0.30),
    ("159915", 0.0020, 0.025, 0.45),
    ("512880", -0.0010, 0.015, 0.60),
    ("513100", 0.0015, 0.020, 0.35),
    ("511010", 0.0003, 0.003, 0.50),
    ("518880", 0.0030, 0.030, 0.70),
];

/// Deterministic 90-day price paths for six funds.
pub fn fixture_universe() -> Vec<InstrumentSeries> {
    FIXTURE_PARAMS
        .iter()
        .map(|&(code, drift, amp, freq)| {
            let prices: Vec<(NaiveDate, f64)> = (0..FIXTURE_DAYS)
                .map(|i| {
                    let t = i as f64;
                    let price = (1.0 + drift).powf(t) * (1.0 + amp * (t * freq).sin());
                    (fixture_start() + Duration::days(i as i64), price)
                })
                .collect();
            InstrumentSeries::from_prices(code, code, &prices)
        })
        .collect()
}

pub fn series_from_prices(code: &str, start: NaiveDate, prices: &[f64]) -> InstrumentSeries {
    let points: Vec<(NaiveDate, f64)> = prices
        .iter()
        .enumerate()
        .map(|(i, p)| (start + Duration::days(i as i64), *p))
        .collect();
    InstrumentSeries::from_prices(code, code, &points)
}

/// Equity curve from `initial`, compounding each daily return.
pub fn curve_from_returns(start: NaiveDate, initial: f64, returns: &[f64]) -> Vec<EquityPoint> {
    let mut equity = initial;
    let mut curve = vec![EquityPoint { date: start, equity }];
    for (i, r) in returns.iter().enumerate() {
        equity *= 1.0 + r;
        curve.push(EquityPoint {
            date: start + Duration::days(i as i64 + 1),
            equity,
        });
    }
    curve
}

/// Write `<code>.csv` files with `date,price` rows for each series.
pub fn write_price_files(dir: &Path, series: &[InstrumentSeries]) {
    for s in series {
        let mut content = String::from("date,price\n");
        for p in &s.points {
            content.push_str(&format!("{},{:.8}\n", p.date.format("%Y-%m-%d"), p.price));
        }
        fs::write(dir.join(format!("{}.csv", s.code)), content).unwrap();
    }
}

pub struct MockPriceData {
    pub data: HashMap<String, InstrumentSeries>,
    pub errors: HashMap<String, String>,
}

impl MockPriceData {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_series(mut self, series: InstrumentSeries) -> Self {
        self.data.insert(series.code.clone(), series);
        self
    }

    pub fn with_error(mut self, code: &str, reason: &str) -> Self {
        self.errors.insert(code.to_string(), reason.to_string());
        self
    }
}

impl PriceDataPort for MockPriceData {
    fn fetch_series(
        &self,
        code: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<InstrumentSeries, FundlabError> {
        if let Some(reason) = self.errors.get(code) {
            return Err(FundlabError::DataFormat {
                reason: reason.clone(),
            });
        }
        let series = self.data.get(code).ok_or_else(|| FundlabError::NoData {
            code: code.to_string(),
        })?;
        let points = series
            .points
            .iter()
            .filter(|p| p.date >= start_date && p.date <= end_date)
            .cloned()
            .collect();
        Ok(InstrumentSeries::new(&series.code, &series.name, points))
    }

    fn list_codes(&self) -> Result<Vec<String>, FundlabError> {
        let mut codes: Vec<String> = self.data.keys().cloned().collect();
        codes.sort();
        Ok(codes)
    }
}
