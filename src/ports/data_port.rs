//! Historical price access port.

use crate::domain::error::FundlabError;
use crate::domain::price_series::InstrumentSeries;
use chrono::NaiveDate;

/// Supplies ordered, de-duplicated daily price series per instrument.
pub trait PriceDataPort {
    /// Points dated within `[start_date, end_date]`, oldest first.
    fn fetch_series(
        &self,
        code: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<InstrumentSeries, FundlabError>;

    fn list_codes(&self) -> Result<Vec<String>, FundlabError>;
}
