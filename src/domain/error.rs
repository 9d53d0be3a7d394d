//! Domain error types.

/// Top-level error type for fundlab.
#[derive(Debug, thiserror::Error)]
pub enum FundlabError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("invalid strategy field `{field}`: {reason}")]
    InvalidStrategy { field: String, reason: String },

    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("no data for {code}")]
    NoData { code: String },

    #[error("insufficient data for {code}: have {points} points, need {minimum}")]
    InsufficientData {
        code: String,
        points: usize,
        minimum: usize,
    },

    #[error("data format error: {reason}")]
    DataFormat { reason: String },

    #[error("export error: {reason}")]
    Export { reason: String },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FundlabError {
    pub(crate) fn invalid_strategy(field: &str, reason: impl Into<String>) -> Self {
        FundlabError::InvalidStrategy {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn config_invalid(section: &str, key: &str, reason: impl Into<String>) -> Self {
        FundlabError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<&FundlabError> for std::process::ExitCode {
    fn from(err: &FundlabError) -> Self {
        let code: u8 = match err {
            FundlabError::Io(_) | FundlabError::Export { .. } | FundlabError::Json(_) => 1,
            FundlabError::ConfigParse { .. }
            | FundlabError::ConfigMissing { .. }
            | FundlabError::ConfigInvalid { .. } => 2,
            FundlabError::InvalidStrategy { .. } | FundlabError::UnknownStrategy(_) => 4,
            FundlabError::NoData { .. }
            | FundlabError::InsufficientData { .. }
            | FundlabError::DataFormat { .. }
            | FundlabError::Csv(_) => 5,
        };
        std::process::ExitCode::from(code)
    }
}
