//! Instrument universe: code list parsing and data sufficiency checks.
//!
//! Codes without data, or with fewer than the required number of points,
//! are skipped with a warning. Only an entirely empty universe is an error.

use crate::domain::error::FundlabError;
use crate::domain::price_series::InstrumentSeries;
use crate::ports::data_port::PriceDataPort;
use chrono::NaiveDate;
use std::collections::HashSet;
use tracing::{info, warn};

pub const MIN_PRICE_POINTS: usize = 30;

#[derive(Debug, Clone, thiserror::Error)]
pub enum UniverseError {
    #[error("empty token in code list")]
    EmptyToken,

    #[error("duplicate code: {0}")]
    DuplicateCode(String),
}

impl From<UniverseError> for FundlabError {
    fn from(err: UniverseError) -> Self {
        FundlabError::config_invalid("backtest", "codes", err.to_string())
    }
}

pub fn parse_codes(input: &str) -> Result<Vec<String>, UniverseError> {
    let mut codes = Vec::new();
    let mut seen = HashSet::new();

    for token in input.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(UniverseError::EmptyToken);
        }
        let code = trimmed.to_uppercase();
        if !seen.insert(code.clone()) {
            return Err(UniverseError::DuplicateCode(code));
        }
        codes.push(code);
    }

    Ok(codes)
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    NoData,
    InsufficientPoints { points: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedCode {
    pub code: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone)]
pub struct LoadedUniverse {
    pub series: Vec<InstrumentSeries>,
    pub skipped: Vec<SkippedCode>,
}

impl LoadedUniverse {
    pub fn codes(&self) -> Vec<&str> {
        self.series.iter().map(|s| s.code.as_str()).collect()
    }
}

pub fn load_universe(
    data: &dyn PriceDataPort,
    codes: &[String],
    start_date: NaiveDate,
    end_date: NaiveDate,
    min_points: usize,
) -> Result<LoadedUniverse, FundlabError> {
    let mut series = Vec::new();
    let mut skipped = Vec::new();

    for code in codes {
        let loaded = match data.fetch_series(code, start_date, end_date) {
            Ok(s) => s,
            Err(e) => {
                warn!(code = %code, error = %e, "skipping code");
                skipped.push(SkippedCode {
                    code: code.clone(),
                    reason: SkipReason::NoData,
                });
                continue;
            }
        };

        if loaded.is_empty() {
            warn!(code = %code, "skipping code, no data found");
            skipped.push(SkippedCode {
                code: code.clone(),
                reason: SkipReason::NoData,
            });
            continue;
        }

        if loaded.len() < min_points {
            warn!(code = %code, points = loaded.len(), minimum = min_points, "skipping code, insufficient data");
            skipped.push(SkippedCode {
                code: code.clone(),
                reason: SkipReason::InsufficientPoints { points: loaded.len() },
            });
            continue;
        }

        info!(code = %code, points = loaded.len(), "loaded");
        series.push(loaded);
    }

    if series.is_empty() {
        return Err(FundlabError::InsufficientData {
            code: "all".to_string(),
            points: 0,
            minimum: min_points,
        });
    }

    if !skipped.is_empty() {
        info!(loaded = series.len(), requested = codes.len(), "universe partially loaded");
    }

    Ok(LoadedUniverse { series, skipped })
}
