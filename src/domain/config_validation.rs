//! Configuration loading and validation.
//!
//! Builds typed run configuration from the `[backtest]`, `[strategy]` and
//! `[signal]` INI sections. Missing optional keys keep their defaults; a key
//! that is present but malformed is a field-level error.

use std::fmt::Display;
use std::str::FromStr;

use chrono::NaiveDate;

use crate::domain::backtest::BacktestConfig;
use crate::domain::error::FundlabError;
use crate::domain::filter::{FilterCondition, FilterLogic};
use crate::domain::position_sizing::VolatilityConfig;
use crate::domain::selection::SortOrder;
use crate::domain::signal::SignalConfig;
use crate::domain::signal_backtest::SignalBacktestConfig;
use crate::domain::signal_rules::{ReturnRange, RuleOutcome, RuleTable, SignalAction, SignalRule};
use crate::domain::strategy::{RebalanceFrequency, StrategyPreset, StrategySpec};
use crate::domain::universe::parse_codes;
use crate::domain::weights::WeightMode;
use crate::ports::config_port::ConfigPort;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn build_backtest_config(config: &dyn ConfigPort) -> Result<BacktestConfig, FundlabError> {
    let start_date = require_date(config, "backtest", "start_date")?;
    let end_date = require_date(config, "backtest", "end_date")?;
    if start_date >= end_date {
        return Err(FundlabError::config_invalid(
            "backtest",
            "start_date",
            "start_date must be before end_date",
        ));
    }
    let initial_capital = read::<f64>(config, "backtest", "initial_capital")?.ok_or_else(|| {
        FundlabError::ConfigMissing {
            section: "backtest".into(),
            key: "initial_capital".into(),
        }
    })?;

    let mut bt = BacktestConfig::new(start_date, end_date, initial_capital);
    if let Some(v) = read(config, "backtest", "fee_rate")? {
        bt.fee_rate = v;
    }
    if let Some(v) = read::<f64>(config, "backtest", "risk_free_rate")? {
        if !(0.0..1.0).contains(&v) {
            return Err(FundlabError::config_invalid(
                "backtest",
                "risk_free_rate",
                "risk_free_rate must be between 0 and 1",
            ));
        }
        bt.risk_free_rate = v;
    }
    if let Some(v) = read(config, "backtest", "base_amount")? {
        bt.base_amount = v;
    }
    if let Some(v) = read(config, "backtest", "min_history_days")? {
        bt.min_history_days = v;
    }
    if let Some(v) = read(config, "backtest", "stats_window")? {
        bt.stats_window = v;
    }
    bt.benchmark = non_empty(config, "backtest", "benchmark").map(|s| s.to_uppercase());
    bt.volatility = read_volatility(config, "backtest", VolatilityConfig::default())?;
    bt.validate()?;
    Ok(bt)
}

/// Instrument codes from `[section] codes`, falling back to a single `code`.
pub fn read_codes(config: &dyn ConfigPort, section: &str) -> Result<Vec<String>, FundlabError> {
    if let Some(list) = non_empty(config, section, "codes") {
        return Ok(parse_codes(&list)?);
    }
    match non_empty(config, section, "code") {
        Some(code) => Ok(vec![code.trim().to_uppercase()]),
        None => Err(FundlabError::ConfigMissing {
            section: section.to_string(),
            key: "codes".to_string(),
        }),
    }
}

/// Strategy from `[strategy]`. A `preset` key supplies the starting point;
/// every other key present overrides it.
pub fn build_strategy_spec(config: &dyn ConfigPort) -> Result<StrategySpec, FundlabError> {
    let mut spec = match non_empty(config, "strategy", "preset") {
        Some(id) => id.parse::<StrategyPreset>()?.spec(),
        None => {
            let name = non_empty(config, "strategy", "name").ok_or_else(|| FundlabError::ConfigMissing {
                section: "strategy".into(),
                key: "name".into(),
            })?;
            StrategySpec {
                name,
                ..Default::default()
            }
        }
    };

    if let Some(name) = non_empty(config, "strategy", "name") {
        spec.name = name;
    }
    if let Some(raw) = config.get_string("strategy", "filters") {
        spec.filters = parse_filters(&raw)?;
    }
    if let Some(logic) = read::<FilterLogic>(config, "strategy", "filter_logic")? {
        spec.filter_logic = logic;
    }
    if let Some(field) = non_empty(config, "strategy", "sort_field") {
        spec.sort_field = field;
    }
    if let Some(order) = read::<SortOrder>(config, "strategy", "sort_order")? {
        spec.sort_order = order;
    }
    if let Some(n) = read(config, "strategy", "select_count")? {
        spec.select_count = n;
    }
    if let Some(n) = read(config, "strategy", "max_positions")? {
        spec.max_positions = n;
    }
    if let Some(freq) = read::<RebalanceFrequency>(config, "strategy", "rebalance")? {
        spec.rebalance = freq;
    }
    if let Some(raw) = non_empty(config, "strategy", "weights") {
        spec.weight_mode = WeightMode::Custom(parse_list(&raw, "strategy", "weights")?);
    }

    if let Some(v) = read(config, "strategy", "daily_stop_loss")? {
        spec.risk.daily_stop_loss = Some(v);
    }
    if let Some(v) = read(config, "strategy", "daily_take_profit")? {
        spec.risk.daily_take_profit = Some(v);
    }
    if let Some(v) = read(config, "strategy", "total_stop_loss")? {
        spec.risk.total_stop_loss = Some(v);
    }
    if let Some(v) = read(config, "strategy", "trailing_stop")? {
        spec.risk.trailing_stop = Some(v);
    }
    spec.volatility_adjustment =
        config.get_bool("strategy", "volatility_adjustment", spec.volatility_adjustment);

    spec.validate()?;
    Ok(spec)
}

/// Comma-separated filter conditions, e.g. `return_3m > 0, volatility < 0.3`.
pub fn parse_filters(raw: &str) -> Result<Vec<FilterCondition>, FundlabError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

/// Blender configuration from `[signal]` and its `[rule.<name>]` sections.
pub fn build_signal_config(config: &dyn ConfigPort) -> Result<SignalConfig, FundlabError> {
    let mut sc = SignalConfig::default();
    let s = "signal";

    if let Some(v) = read(config, s, "min_multiplier")? {
        sc.min_multiplier = v;
    }
    if let Some(v) = read(config, s, "max_multiplier")? {
        sc.max_multiplier = v;
    }

    if let Some(v) = read(config, s, "trend_short_window")? {
        sc.trend.short_window = v;
    }
    if let Some(v) = read(config, s, "trend_long_window")? {
        sc.trend.long_window = v;
    }
    if let Some(v) = read(config, s, "trend_confidence_gap")? {
        sc.trend.confidence_gap = v;
    }
    let ta = &mut sc.trend_adjustment;
    for (key, slot) in [
        ("uptrend_factor", &mut ta.uptrend_factor),
        ("downtrend_factor", &mut ta.downtrend_factor),
        ("weak_strength", &mut ta.weak_strength),
        ("damping", &mut ta.damping),
    ] {
        if let Some(v) = read(config, s, key)? {
            *slot = v;
        }
    }

    sc.volatility = read_volatility(config, s, sc.volatility)?;

    let sl = &mut sc.stop_loss;
    for (key, slot) in [
        ("stop_loss_warning", &mut sl.warning),
        ("total_stop_loss", &mut sl.total_stop_loss),
        ("warning_redeem_fraction", &mut sl.warning_redeem_fraction),
    ] {
        if let Some(v) = read(config, s, key)? {
            *slot = v;
        }
    }

    let beta = &mut sc.beta;
    for (key, slot) in [
        ("weak_index_return", &mut beta.weak_index_return),
        ("weak_factor", &mut beta.weak_factor),
        ("greed_threshold", &mut beta.greed_threshold),
        ("greed_factor", &mut beta.greed_factor),
        ("strong_index_return", &mut beta.strong_index_return),
    ] {
        if let Some(v) = read(config, s, key)? {
            *slot = v;
        }
    }

    let vol = &mut sc.volume;
    for (key, slot) in [
        ("high_ratio", &mut vol.high_ratio),
        ("high_volume_factor", &mut vol.high_volume_factor),
        ("low_ratio", &mut vol.low_ratio),
        ("low_volume_factor", &mut vol.low_volume_factor),
    ] {
        if let Some(v) = read(config, s, key)? {
            *slot = v;
        }
    }

    let builtin = sc.rules.default_outcome();
    let default = RuleOutcome::new(
        read(config, s, "default_action")?.unwrap_or(builtin.action),
        read(config, s, "default_multiplier")?.unwrap_or(builtin.multiplier),
    );
    let rules = match read_rules(config)? {
        Some(rules) => rules,
        None => sc.rules.rules().to_vec(),
    };
    sc.rules = RuleTable::new(rules, default);

    sc.validate()?;
    Ok(sc)
}

/// A `rules = a, b` list replaces the built-in rules. Each name needs a
/// `[rule.<name>]` section with `action`; the other keys are optional.
fn read_rules(config: &dyn ConfigPort) -> Result<Option<Vec<SignalRule>>, FundlabError> {
    let Some(list) = non_empty(config, "signal", "rules") else {
        return Ok(None);
    };

    let mut rules = Vec::new();
    for name in list.split(',').map(str::trim) {
        if name.is_empty() {
            return Err(FundlabError::config_invalid("signal", "rules", "empty rule name"));
        }
        let section = format!("rule.{name}");
        let action = read::<SignalAction>(config, &section, "action")?.ok_or_else(|| {
            FundlabError::ConfigMissing {
                section: section.clone(),
                key: "action".into(),
            }
        })?;
        let multiplier = read(config, &section, "multiplier")?.unwrap_or(1.0);
        let priority = read(config, &section, "priority")?.unwrap_or(0);
        let today = ReturnRange {
            min: read(config, &section, "today_min")?,
            max: read(config, &section, "today_max")?,
        };
        let prev = ReturnRange {
            min: read(config, &section, "prev_min")?,
            max: read(config, &section, "prev_max")?,
        };
        rules.push(SignalRule::new(
            name,
            priority,
            today,
            prev,
            RuleOutcome::new(action, multiplier),
        ));
    }

    Ok(Some(rules))
}

pub fn build_signal_backtest_config(config: &dyn ConfigPort) -> Result<SignalBacktestConfig, FundlabError> {
    let mut sb = SignalBacktestConfig::default();
    let s = "signal";
    if let Some(v) = read(config, s, "initial_capital")? {
        sb.initial_capital = v;
    }
    if let Some(v) = read(config, s, "base_amount")? {
        sb.base_amount = v;
    }
    if let Some(v) = read(config, s, "sell_fraction")? {
        sb.sell_fraction = v;
    }
    if let Some(v) = read(config, s, "fee_rate")? {
        sb.fee_rate = v;
    }
    if let Some(v) = read(config, s, "cadence")? {
        sb.cadence = v;
    }
    if let Some(v) = read(config, s, "volume_window")? {
        sb.volume_window = v;
    }
    sb.start_date = read_date(config, s, "start_date")?;
    sb.end_date = read_date(config, s, "end_date")?;
    sb.validate()?;
    Ok(sb)
}

fn read_volatility(
    config: &dyn ConfigPort,
    section: &str,
    mut vc: VolatilityConfig,
) -> Result<VolatilityConfig, FundlabError> {
    if let Some(v) = read(config, section, "volatility_lookback_days")? {
        vc.lookback_days = v;
    }
    for (key, slot) in [
        ("volatility_low_threshold", &mut vc.low_threshold),
        ("volatility_high_threshold", &mut vc.high_threshold),
        ("volatility_low_factor", &mut vc.low_factor),
        ("volatility_normal_factor", &mut vc.normal_factor),
        ("volatility_high_factor", &mut vc.high_factor),
    ] {
        if let Some(v) = read(config, section, key)? {
            *slot = v;
        }
    }
    vc.validate()?;
    Ok(vc)
}

fn non_empty(config: &dyn ConfigPort, section: &str, key: &str) -> Option<String> {
    config
        .get_string(section, key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Parse a present key. Absent or blank keys yield `None`.
fn read<T>(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<T>, FundlabError>
where
    T: FromStr,
    T::Err: Display,
{
    match non_empty(config, section, key) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| FundlabError::config_invalid(section, key, format!("invalid value `{raw}`: {e}"))),
    }
}

fn read_date(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<NaiveDate>, FundlabError> {
    match non_empty(config, section, key) {
        None => Ok(None),
        Some(raw) => NaiveDate::parse_from_str(&raw, DATE_FORMAT).map(Some).map_err(|_| {
            FundlabError::config_invalid(section, key, format!("invalid {key} format, expected YYYY-MM-DD"))
        }),
    }
}

fn require_date(config: &dyn ConfigPort, section: &str, key: &str) -> Result<NaiveDate, FundlabError> {
    read_date(config, section, key)?.ok_or_else(|| FundlabError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    })
}

fn parse_list(raw: &str, section: &str, key: &str) -> Result<Vec<f64>, FundlabError> {
    raw.split(',')
        .map(|t| {
            t.trim()
                .parse::<f64>()
                .map_err(|_| FundlabError::config_invalid(section, key, format!("invalid number `{}`", t.trim())))
        })
        .collect()
}
