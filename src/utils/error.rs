use thiserror::Error;

#[derive(Error, Debug)]
pub enum RiskError {
    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Download failed: {url} returned status {status}")]
    DownloadError { url: String, status: u16 },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration error in '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("Data error: {message}")]
    DataError { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("{component} must be fitted before use")]
    NotFitted { component: String },

    #[error("Model error: {message}")]
    ModelError { message: String },

    #[error("Model not loaded")]
    ModelUnavailable,

    #[error("Tracking store error: {message}")]
    TrackingError { message: String },

    #[error("Metrics registry error: {0}")]
    MetricsError(#[from] prometheus::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Data,
    Configuration,
    Model,
    Storage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskError {
    pub fn data(message: impl Into<String>) -> Self {
        RiskError::DataError {
            message: message.into(),
        }
    }

    pub fn model(message: impl Into<String>) -> Self {
        RiskError::ModelError {
            message: message.into(),
        }
    }

    pub fn tracking(message: impl Into<String>) -> Self {
        RiskError::TrackingError {
            message: message.into(),
        }
    }

    pub fn not_fitted(component: impl Into<String>) -> Self {
        RiskError::NotFitted {
            component: component.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            RiskError::HttpError(_) | RiskError::DownloadError { .. } => ErrorCategory::Network,
            RiskError::CsvError(_)
            | RiskError::DataError { .. }
            | RiskError::ValidationError { .. } => ErrorCategory::Data,
            RiskError::ConfigError { .. }
            | RiskError::ConfigValidationError { .. }
            | RiskError::InvalidConfigValueError { .. }
            | RiskError::MissingConfigError { .. }
            | RiskError::MetricsError(_) => ErrorCategory::Configuration,
            RiskError::NotFitted { .. }
            | RiskError::ModelError { .. }
            | RiskError::ModelUnavailable => ErrorCategory::Model,
            RiskError::ZipError(_)
            | RiskError::IoError(_)
            | RiskError::SerializationError(_)
            | RiskError::TrackingError { .. } => ErrorCategory::Storage,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Network => ErrorSeverity::Medium,
            ErrorCategory::Data | ErrorCategory::Configuration | ErrorCategory::Model => {
                ErrorSeverity::High
            }
            ErrorCategory::Storage => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            RiskError::HttpError(_) | RiskError::DownloadError { .. } => {
                "Check network connectivity or point data.url at a reachable mirror"
            }
            RiskError::CsvError(_) | RiskError::DataError { .. } => {
                "Re-run `heart-risk download` to refresh the dataset file"
            }
            RiskError::ValidationError { .. } => "Check the input values against the field ranges",
            RiskError::ConfigError { .. }
            | RiskError::ConfigValidationError { .. }
            | RiskError::InvalidConfigValueError { .. }
            | RiskError::MissingConfigError { .. } => "Fix the configuration file and try again",
            RiskError::MetricsError(_) => "Check for duplicate metric registrations",
            RiskError::NotFitted { .. } | RiskError::ModelUnavailable => {
                "Run `heart-risk train` before predicting"
            }
            RiskError::ModelError { .. } => "Inspect the model artifact or retrain",
            RiskError::TrackingError { .. } => "Check the tracking directory for damaged runs",
            RiskError::ZipError(_) | RiskError::IoError(_) | RiskError::SerializationError(_) => {
                "Check file permissions and free disk space"
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Network => format!("Could not fetch remote data: {}", self),
            ErrorCategory::Data => format!("The dataset or input is invalid: {}", self),
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::Model => format!("Model problem: {}", self),
            ErrorCategory::Storage => format!("Storage problem: {}", self),
        }
    }

    /// CLI 結束代碼
    pub fn exit_code(&self) -> i32 {
        match self.severity() {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        }
    }
}

pub type Result<T> = std::result::Result<T, RiskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_and_severity() {
        let err = RiskError::DownloadError {
            url: "http://x".to_string(),
            status: 404,
        };
        assert_eq!(err.category(), ErrorCategory::Network);
        assert_eq!(err.severity(), ErrorSeverity::Medium);
        assert_eq!(err.exit_code(), 2);

        let err = RiskError::not_fitted("Preprocessor");
        assert_eq!(err.category(), ErrorCategory::Model);
        assert_eq!(err.to_string(), "Preprocessor must be fitted before use");
    }

    #[test]
    fn test_io_error_is_critical() {
        let err: RiskError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.severity(), ErrorSeverity::Critical);
        assert!(err.user_friendly_message().starts_with("Storage problem"));
    }
}
