//! Configuration validation.
//!
//! Validates every `[backtest]` and `[params]` entry before a run. The port
//! getters fall back to defaults on unparsable values, so numeric keys are
//! checked from their raw text here.

use crate::domain::backtest::Backend;
use crate::domain::error::StratlabError;
use crate::ports::config_port::ConfigPort;

pub const BACKTEST_SECTION: &str = "backtest";
pub const PARAMS_SECTION: &str = "params";

const COMMISSION_KEYS: [&str; 3] = ["commission_fixed", "commission_pct", "commission_per_unit"];
const BOOL_KEYS: [&str; 2] = ["allow_same_bar_reentry", "close_at_end"];

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), StratlabError> {
    validate_initial_capital(config)?;
    validate_commission(config)?;
    validate_risk_free_rate(config)?;
    validate_flags(config)?;
    validate_backend(config)?;
    validate_params(config)?;
    Ok(())
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> StratlabError {
    StratlabError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// The key's value as a number, `None` if the key is absent.
pub fn number(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<f64>, StratlabError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(raw) => match raw.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(Some(v)),
            _ => Err(invalid(section, key, format!("'{}' is not a finite number", raw))),
        },
    }
}

fn validate_initial_capital(config: &dyn ConfigPort) -> Result<(), StratlabError> {
    match number(config, BACKTEST_SECTION, "initial_capital")? {
        None => Err(StratlabError::ConfigMissing {
            section: BACKTEST_SECTION.to_string(),
            key: "initial_capital".to_string(),
        }),
        Some(v) if v <= 0.0 => Err(invalid(
            BACKTEST_SECTION,
            "initial_capital",
            "initial_capital must be positive",
        )),
        Some(_) => Ok(()),
    }
}

fn validate_commission(config: &dyn ConfigPort) -> Result<(), StratlabError> {
    for key in COMMISSION_KEYS {
        let value = number(config, BACKTEST_SECTION, key)?.unwrap_or(0.0);
        if value < 0.0 {
            return Err(invalid(
                BACKTEST_SECTION,
                key,
                format!("{} must be non-negative", key),
            ));
        }
    }
    Ok(())
}

fn validate_risk_free_rate(config: &dyn ConfigPort) -> Result<(), StratlabError> {
    number(config, BACKTEST_SECTION, "risk_free_rate")?;
    Ok(())
}

fn validate_flags(config: &dyn ConfigPort) -> Result<(), StratlabError> {
    for key in BOOL_KEYS {
        if let Some(raw) = config.get_string(BACKTEST_SECTION, key) {
            let known = matches!(
                raw.trim().to_lowercase().as_str(),
                "true" | "yes" | "1" | "false" | "no" | "0"
            );
            if !known {
                return Err(invalid(
                    BACKTEST_SECTION,
                    key,
                    format!("'{}' is not a boolean", raw),
                ));
            }
        }
    }
    Ok(())
}

fn validate_backend(config: &dyn ConfigPort) -> Result<(), StratlabError> {
    if let Some(raw) = config.get_string(BACKTEST_SECTION, "backend") {
        raw.parse::<Backend>()
            .map_err(|reason| invalid(BACKTEST_SECTION, "backend", reason))?;
    }
    Ok(())
}

fn validate_params(config: &dyn ConfigPort) -> Result<(), StratlabError> {
    for key in config.keys(PARAMS_SECTION) {
        if number(config, PARAMS_SECTION, &key)?.is_none() {
            return Err(invalid(PARAMS_SECTION, &key, "parameter has no value"));
        }
    }
    Ok(())
}
