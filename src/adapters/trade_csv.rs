//! Trade tape and equity curve CSV export.
//!
//! Columns: date, code, action, amount, price, shares, fee, cash_after,
//! position_after, reason. Numbers are written with six decimals and actions
//! with their upper-case labels; [`import_trades_csv`] reverses the mapping.

use std::fs;
use std::path::Path;

use chrono::NaiveDate;

use crate::domain::error::FundlabError;
use crate::domain::ledger::EquityPoint;
use crate::domain::trade::{TradeAction, TradeRecord};

pub const TRADE_COLUMNS: [&str; 10] = [
    "date",
    "code",
    "action",
    "amount",
    "price",
    "shares",
    "fee",
    "cash_after",
    "position_after",
    "reason",
];

pub fn export_trades_csv(trades: &[TradeRecord]) -> Result<String, FundlabError> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(TRADE_COLUMNS)?;

    for t in trades {
        wtr.write_record([
            &t.date.format("%Y-%m-%d").to_string(),
            &t.code,
            t.action.label(),
            &format!("{:.6}", t.amount),
            &format!("{:.6}", t.price),
            &format!("{:.6}", t.shares),
            &format!("{:.6}", t.fee),
            &format!("{:.6}", t.cash_after),
            &format!("{:.6}", t.position_after),
            &t.reason,
        ])?;
    }

    finish(wtr)
}

pub fn import_trades_csv(content: &str) -> Result<Vec<TradeRecord>, FundlabError> {
    let mut rdr = csv::Reader::from_reader(content.as_bytes());
    let headers = rdr.headers()?;
    if headers.iter().ne(TRADE_COLUMNS) {
        return Err(FundlabError::DataFormat {
            reason: format!("unexpected trade columns: {}", headers.iter().collect::<Vec<_>>().join(",")),
        });
    }

    let mut trades = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let field = |i: usize| record.get(i).unwrap_or_default();
        let number = |i: usize| -> Result<f64, FundlabError> {
            field(i).parse().map_err(|e| FundlabError::DataFormat {
                reason: format!("invalid {} value `{}`: {}", TRADE_COLUMNS[i], field(i), e),
            })
        };
        let date = NaiveDate::parse_from_str(field(0), "%Y-%m-%d").map_err(|e| FundlabError::DataFormat {
            reason: format!("invalid date `{}`: {}", field(0), e),
        })?;
        trades.push(TradeRecord {
            date,
            code: field(1).to_string(),
            action: field(2).parse::<TradeAction>()?,
            amount: number(3)?,
            price: number(4)?,
            shares: number(5)?,
            fee: number(6)?,
            cash_after: number(7)?,
            position_after: number(8)?,
            reason: field(9).to_string(),
        });
    }
    Ok(trades)
}

pub fn export_equity_csv(curve: &[EquityPoint]) -> Result<String, FundlabError> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["date", "equity"])?;
    for p in curve {
        wtr.write_record([p.date.format("%Y-%m-%d").to_string(), format!("{:.6}", p.equity)])?;
    }
    finish(wtr)
}

pub fn write_trades_file(path: &Path, trades: &[TradeRecord]) -> Result<(), FundlabError> {
    fs::write(path, export_trades_csv(trades)?)?;
    Ok(())
}

pub fn read_trades_file(path: &Path) -> Result<Vec<TradeRecord>, FundlabError> {
    import_trades_csv(&fs::read_to_string(path)?)
}

fn finish(wtr: csv::Writer<Vec<u8>>) -> Result<String, FundlabError> {
    let data = wtr.into_inner().map_err(|e| FundlabError::Export {
        reason: format!("failed to flush CSV writer: {}", e),
    })?;
    String::from_utf8(data).map_err(|e| FundlabError::Export {
        reason: format!("CSV output is not valid UTF-8: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(action: TradeAction, reason: &str) -> TradeRecord {
        TradeRecord {
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            code: "510300".into(),
            action,
            amount: 1234.5678912,
            price: 3.9,
            shares: 316.55587,
            fee: 0.6172839,
            cash_after: 98765.4321,
            position_after: 316.55587,
            reason: reason.into(),
        }
    }

    #[test]
    fn header_and_labels() {
        let csv = export_trades_csv(&[trade(TradeAction::Accumulate, "base amount")]).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "date,code,action,amount,price,shares,fee,cash_after,position_after,reason"
        );
        assert_eq!(
            lines.next().unwrap(),
            "2024-03-01,510300,ACCUMULATE,1234.567891,3.900000,316.555870,0.617284,98765.432100,316.555870,base amount"
        );
    }

    #[test]
    fn reasons_with_commas_are_quoted() {
        let trades = vec![trade(TradeAction::Liquidate, "daily stop-loss triggered at -5.10%, exit")];
        let back = import_trades_csv(&export_trades_csv(&trades).unwrap()).unwrap();
        assert_eq!(back[0].reason, trades[0].reason);
        assert_eq!(back[0].action, TradeAction::Liquidate);
    }

    #[test]
    fn wrong_header_is_rejected() {
        let err = import_trades_csv("date,code\n2024-01-01,A\n").unwrap_err();
        assert!(matches!(err, FundlabError::DataFormat { .. }));
    }

    #[test]
    fn unknown_action_is_rejected() {
        let csv = export_trades_csv(&[trade(TradeAction::Buy, "x")]).unwrap().replace("BUY", "HOLD");
        assert!(import_trades_csv(&csv).is_err());
    }

    #[test]
    fn equity_csv() {
        let curve = vec![EquityPoint {
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            equity: 100_000.0,
        }];
        let csv = export_equity_csv(&curve).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines, vec!["date,equity", "2024-01-02,100000.000000"]);
    }
}
