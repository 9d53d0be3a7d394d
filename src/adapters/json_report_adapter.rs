//! JSON report adapter.
//!
//! Writes the full run result and its metric report as one pretty-printed
//! document: `{"result": ..., "metrics": ...}`.

use serde::Serialize;
use std::fs;

use crate::domain::backtest::BacktestResult;
use crate::domain::error::FundlabError;
use crate::domain::metrics::MetricReport;
use crate::domain::signal_backtest::SignalBacktestResult;
use crate::ports::report_port::ReportPort;

#[derive(Serialize)]
struct ReportDocument<'a, R> {
    result: &'a R,
    metrics: &'a MetricReport,
}

pub struct JsonReportAdapter;

impl JsonReportAdapter {
    pub fn new() -> Self {
        Self
    }

    pub fn render<R: Serialize>(result: &R, metrics: &MetricReport) -> Result<String, FundlabError> {
        Ok(serde_json::to_string_pretty(&ReportDocument { result, metrics })?)
    }
}

impl Default for JsonReportAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportPort for JsonReportAdapter {
    fn write(
        &self,
        result: &BacktestResult,
        metrics: &MetricReport,
        output_path: &str,
    ) -> Result<(), FundlabError> {
        let json = Self::render(result, metrics)?;
        fs::write(output_path, json).map_err(|e| FundlabError::Export {
            reason: format!("failed to write {}: {}", output_path, e),
        })
    }

    fn write_signal(
        &self,
        result: &SignalBacktestResult,
        metrics: &MetricReport,
        output_path: &str,
    ) -> Result<(), FundlabError> {
        let json = Self::render(result, metrics)?;
        fs::write(output_path, json).map_err(|e| FundlabError::Export {
            reason: format!("failed to write {}: {}", output_path, e),
        })
    }
}
