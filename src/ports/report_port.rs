//! Report output port trait.

use crate::domain::backtest::BacktestResult;
use crate::domain::error::FundlabError;
use crate::domain::metrics::MetricReport;
use crate::domain::signal_backtest::SignalBacktestResult;

/// Port for persisting run results.
pub trait ReportPort {
    fn write(
        &self,
        result: &BacktestResult,
        metrics: &MetricReport,
        output_path: &str,
    ) -> Result<(), FundlabError>;

    fn write_signal(
        &self,
        result: &SignalBacktestResult,
        metrics: &MetricReport,
        output_path: &str,
    ) -> Result<(), FundlabError>;
}
