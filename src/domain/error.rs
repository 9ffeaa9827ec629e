//! Domain error types.

/// Top-level error type for rotatrader.
#[derive(Debug, thiserror::Error)]
pub enum RotatraderError {
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

    #[error("data unavailable for {code}: {reason}")]
    DataUnavailable { code: String, reason: String },

    #[error("insufficient history for {code}: have {have} bars, need {need}")]
    InsufficientHistory {
        code: String,
        have: usize,
        need: usize,
    },

    #[error("degenerate computation for {code}: {reason}")]
    Degenerate { code: String, reason: String },

    #[error("order rejected for {code}: {reason}")]
    ExecutionRejected { code: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RotatraderError {
    pub fn data_unavailable(code: impl Into<String>, reason: impl Into<String>) -> Self {
        RotatraderError::DataUnavailable {
            code: code.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid(section: &str, key: &str, reason: impl Into<String>) -> Self {
        RotatraderError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<&RotatraderError> for std::process::ExitCode {
    fn from(err: &RotatraderError) -> Self {
        let code: u8 = match err {
            RotatraderError::Io(_) => 1,
            RotatraderError::ConfigParse { .. }
            | RotatraderError::ConfigMissing { .. }
            | RotatraderError::ConfigInvalid { .. } => 2,
            RotatraderError::ExecutionRejected { .. } => 3,
            RotatraderError::Degenerate { .. } => 4,
            RotatraderError::DataUnavailable { .. } | RotatraderError::InsufficientHistory { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_insufficient_history() {
        let err = RotatraderError::InsufficientHistory {
            code: "399101.XSHE".into(),
            have: 1,
            need: 2,
        };
        assert_eq!(
            err.to_string(),
            "insufficient history for 399101.XSHE: have 1 bars, need 2"
        );
    }

    #[test]
    fn display_config_invalid() {
        let err = RotatraderError::invalid("stoploss", "loss_limit", "must be in (0, 1)");
        assert_eq!(
            err.to_string(),
            "invalid config value [stoploss] loss_limit: must be in (0, 1)"
        );
    }

    #[test]
    fn data_unavailable_helper() {
        let err = RotatraderError::data_unavailable("600000.XSHG", "no fundamentals");
        assert!(matches!(
            err,
            RotatraderError::DataUnavailable { ref code, .. } if code == "600000.XSHG"
        ));
    }
}
