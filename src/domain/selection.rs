//! Ranking of filtered snapshots and top-N selection.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;

use super::error::FundlabError;
use super::snapshot::AssetSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl FromStr for SortOrder {
    type Err = FundlabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortOrder::Asc),
            "desc" | "descending" => Ok(SortOrder::Desc),
            other => Err(FundlabError::invalid_strategy(
                "sort_order",
                format!("expected `asc` or `desc`, got `{other}`"),
            )),
        }
    }
}

/// Stable-sort the snapshots carrying a numeric `field` and keep the first
/// `count`. Snapshots without the field are dropped; ties keep input order.
pub fn select<'a>(
    subset: &[&'a AssetSnapshot],
    field: &str,
    order: SortOrder,
    count: usize,
) -> Vec<&'a AssetSnapshot> {
    let mut keyed: Vec<(f64, &'a AssetSnapshot)> = subset
        .iter()
        .filter_map(|snap| snap.number(field).map(|v| (v, *snap)))
        .collect();

    keyed.sort_by(|a, b| {
        let ord = a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal);
        match order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    });

    keyed.into_iter().take(count).map(|(_, snap)| snap).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::snapshot::FieldValue;
    use chrono::NaiveDate;

    fn snap(code: &str, score: Option<f64>) -> AssetSnapshot {
        let s = AssetSnapshot::new(code, code, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(), 1.0);
        match score {
            Some(v) => s.with_field("composite_score", FieldValue::Number(v)),
            None => s,
        }
    }

    fn codes(v: &[&AssetSnapshot]) -> Vec<String> {
        v.iter().map(|s| s.code.clone()).collect()
    }

    #[test]
    fn descending_top_n() {
        let snaps = [snap("A", Some(1.0)), snap("B", Some(3.0)), snap("C", Some(2.0))];
        let refs: Vec<&AssetSnapshot> = snaps.iter().collect();
        let picked = select(&refs, "composite_score", SortOrder::Desc, 2);
        assert_eq!(codes(&picked), vec!["B", "C"]);
    }

    #[test]
    fn ascending_order() {
        let snaps = [snap("A", Some(1.0)), snap("B", Some(3.0)), snap("C", Some(2.0))];
        let refs: Vec<&AssetSnapshot> = snaps.iter().collect();
        let picked = select(&refs, "composite_score", SortOrder::Asc, 3);
        assert_eq!(codes(&picked), vec!["A", "C", "B"]);
    }

    #[test]
    fn drops_missing_field() {
        let snaps = [snap("A", None), snap("B", Some(3.0))];
        let refs: Vec<&AssetSnapshot> = snaps.iter().collect();
        let picked = select(&refs, "composite_score", SortOrder::Desc, 5);
        assert_eq!(codes(&picked), vec!["B"]);
    }

    #[test]
    fn ties_keep_input_order() {
        let snaps = [snap("A", Some(1.0)), snap("B", Some(1.0)), snap("C", Some(1.0))];
        let refs: Vec<&AssetSnapshot> = snaps.iter().collect();
        assert_eq!(codes(&select(&refs, "composite_score", SortOrder::Desc, 3)), vec!["A", "B", "C"]);
        assert_eq!(codes(&select(&refs, "composite_score", SortOrder::Asc, 3)), vec!["A", "B", "C"]);
    }

    #[test]
    fn none_qualify_gives_empty() {
        let snaps = [snap("A", None)];
        let refs: Vec<&AssetSnapshot> = snaps.iter().collect();
        assert!(select(&refs, "composite_score", SortOrder::Desc, 5).is_empty());
    }

    #[test]
    fn sort_order_parsing() {
        assert_eq!("DESC".parse::<SortOrder>().unwrap(), SortOrder::Desc);
        assert_eq!("asc".parse::<SortOrder>().unwrap(), SortOrder::Asc);
        assert!("up".parse::<SortOrder>().is_err());
    }
}
