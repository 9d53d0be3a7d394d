//! CSV file price adapter.
//!
//! One file per instrument, `<code>.csv`, with a header row naming at least
//! `date` and `price`. Optional `daily_return` and `volume` columns are used
//! when present; otherwise the daily return is derived from consecutive
//! prices over the whole file before the date range is applied.

use crate::domain::error::FundlabError;
use crate::domain::price_series::{InstrumentSeries, PricePoint, simple_return};
use crate::ports::data_port::PriceDataPort;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

pub struct CsvAdapter {
    base_path: PathBuf,
}

struct Columns {
    date: usize,
    price: usize,
    daily_return: Option<usize>,
    volume: Option<usize>,
}

struct Row {
    price: f64,
    daily_return: Option<f64>,
    volume: Option<f64>,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, code: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", code))
    }

    fn columns(headers: &csv::StringRecord) -> Result<Columns, FundlabError> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
        };
        let required = |name: &str| {
            find(name).ok_or_else(|| FundlabError::DataFormat {
                reason: format!("missing {} column", name),
            })
        };
        Ok(Columns {
            date: required("date")?,
            price: required("price")?,
            daily_return: find("daily_return"),
            volume: find("volume"),
        })
    }

    fn parse_number(record: &csv::StringRecord, idx: usize, name: &str) -> Result<f64, FundlabError> {
        record
            .get(idx)
            .ok_or_else(|| FundlabError::DataFormat {
                reason: format!("missing {} value", name),
            })?
            .trim()
            .parse()
            .map_err(|e| FundlabError::DataFormat {
                reason: format!("invalid {} value: {}", name, e),
            })
    }

    fn parse_optional(
        record: &csv::StringRecord,
        idx: Option<usize>,
        name: &str,
    ) -> Result<Option<f64>, FundlabError> {
        match idx.and_then(|i| record.get(i)).map(str::trim) {
            None | Some("") => Ok(None),
            Some(_) => idx.map(|i| Self::parse_number(record, i, name)).transpose(),
        }
    }
}

impl PriceDataPort for CsvAdapter {
    fn fetch_series(
        &self,
        code: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<InstrumentSeries, FundlabError> {
        let path = self.csv_path(code);
        let content = fs::read_to_string(&path).map_err(|e| {
            debug!(path = %path.display(), error = %e, "price file unreadable");
            FundlabError::NoData { code: code.to_string() }
        })?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let cols = Self::columns(rdr.headers()?)?;

        // Later rows win on duplicate dates.
        let mut rows: BTreeMap<NaiveDate, Row> = BTreeMap::new();
        for result in rdr.records() {
            let record = result?;
            let date_str = record.get(cols.date).ok_or_else(|| FundlabError::DataFormat {
                reason: "missing date value".into(),
            })?;
            let date = NaiveDate::parse_from_str(date_str.trim(), "%Y-%m-%d").map_err(|e| {
                FundlabError::DataFormat {
                    reason: format!("invalid date format: {}", e),
                }
            })?;
            let price = Self::parse_number(&record, cols.price, "price")?;
            if !(price > 0.0) {
                return Err(FundlabError::DataFormat {
                    reason: format!("non-positive price on {}", date),
                });
            }
            rows.insert(
                date,
                Row {
                    price,
                    daily_return: Self::parse_optional(&record, cols.daily_return, "daily_return")?,
                    volume: Self::parse_optional(&record, cols.volume, "volume")?,
                },
            );
        }

        let mut points = Vec::new();
        let mut prev_price: Option<f64> = None;
        for (date, row) in rows {
            let derived = prev_price.map_or(0.0, |p| simple_return(p, row.price));
            prev_price = Some(row.price);
            if date < start_date || date > end_date {
                continue;
            }
            let mut point = PricePoint::new(date, row.price, row.daily_return.unwrap_or(derived));
            point.volume = row.volume;
            points.push(point);
        }

        Ok(InstrumentSeries::new(code, code, points))
    }

    fn list_codes(&self) -> Result<Vec<String>, FundlabError> {
        let entries = fs::read_dir(&self.base_path)?;

        let mut codes = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "csv") {
                if let Some(stem) = path.file_stem() {
                    codes.push(stem.to_string_lossy().into_owned());
                }
            }
        }

        codes.sort();
        Ok(codes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn setup_test_data() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();

        fs::write(
            path.join("510300.csv"),
            "date,price,volume\n\
             2024-01-15,4.00,50000\n\
             2024-01-16,4.20,60000\n\
             2024-01-17,4.41,55000\n",
        )
        .unwrap();
        fs::write(
            path.join("161725.csv"),
            "date,price,daily_return\n\
             2024-01-16,1.10,0.015\n\
             2024-01-15,1.00,0.0\n",
        )
        .unwrap();
        fs::write(path.join("BAD.csv"), "date,close\n2024-01-15,1.0\n").unwrap();
        fs::write(path.join("notes.txt"), "ignored").unwrap();

        (dir, path)
    }

    #[test]
    fn fetch_series_derives_returns() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let series = adapter.fetch_series("510300", d(1), d(31)).unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series.points[0].daily_return, 0.0);
        assert!((series.points[1].daily_return - 0.05).abs() < 1e-12);
        assert_eq!(series.points[2].volume, Some(55000.0));
    }

    #[test]
    fn fetch_series_keeps_supplied_returns_and_sorts() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let series = adapter.fetch_series("161725", d(1), d(31)).unwrap();
        assert_eq!(series.points[0].date, d(15));
        assert_eq!(series.points[1].daily_return, 0.015);
        assert_eq!(series.points[1].volume, None);
    }

    #[test]
    fn date_filter_keeps_return_from_earlier_row() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let series = adapter.fetch_series("510300", d(16), d(16)).unwrap();
        assert_eq!(series.len(), 1);
        assert!((series.points[0].daily_return - 0.05).abs() < 1e-12);
    }

    #[test]
    fn missing_file_is_no_data() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let result = adapter.fetch_series("XYZ", d(1), d(31));
        assert!(matches!(result, Err(FundlabError::NoData { code }) if code == "XYZ"));
    }

    #[test]
    fn missing_price_column_is_a_format_error() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let result = adapter.fetch_series("BAD", d(1), d(31));
        assert!(matches!(result, Err(FundlabError::DataFormat { .. })));
    }

    #[test]
    fn list_codes_returns_csv_stems() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        assert_eq!(adapter.list_codes().unwrap(), vec!["161725", "510300", "BAD"]);
    }
}
