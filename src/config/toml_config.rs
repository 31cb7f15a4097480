use crate::core::models::{LogisticRegressionParams, RandomForestParams};
use crate::utils::error::{Result, RiskError};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_DATA_URL: &str =
    "https://archive.ics.uci.edu/ml/machine-learning-databases/heart-disease/processed.cleveland.data";
pub const DEFAULT_FALLBACK_URL: &str =
    "https://raw.githubusercontent.com/plotly/datasets/master/heart.csv";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub data: DataConfig,
    pub preprocessing: PreprocessingConfig,
    pub tracking: TrackingConfig,
    pub models: ModelsConfig,
    pub evaluation: EvaluationConfig,
    pub server: ServerConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub url: String,
    pub fallback_url: Option<String>,
    pub data_dir: String,
    pub file_name: String,
    pub timeout_seconds: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATA_URL.to_string(),
            fallback_url: Some(DEFAULT_FALLBACK_URL.to_string()),
            data_dir: "data".to_string(),
            file_name: "heart_disease.csv".to_string(),
            timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingConfig {
    pub test_size: f64,
    pub random_state: u64,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            test_size: 0.2,
            random_state: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub uri: String,
    pub experiment: String,
    pub artifacts_dir: String,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            uri: "file:./mlruns".to_string(),
            experiment: "heart_disease_prediction".to_string(),
            artifacts_dir: "artifacts".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub logistic_regression: LogisticRegressionParams,
    pub random_forest: RandomForestParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub cv_folds: usize,
    pub cv_random_state: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            cv_folds: 5,
            cv_random_state: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub preprocessor_path: String,
    /// 指定後直接從模型封包 (zip) 載入，不搜尋追蹤目錄
    pub model_bundle: Option<String>,
    pub log_file: String,
    pub json_logs: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            preprocessor_path: "artifacts/preprocessor.json".to_string(),
            model_bundle: None,
            log_file: "api.log".to_string(),
            json_logs: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enabled: bool,
}

impl TomlConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(RiskError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 檔案存在就載入，否則使用預設值
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            tracing::debug!(
                "Config file {} not found, using defaults",
                path.as_ref().display()
            );
            Ok(Self::default())
        }
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| RiskError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${DATA_URL})
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| RiskError::ConfigError {
            message: format!("Invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// 環境變數覆蓋 (部署時不必改檔案)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("PREPROCESSOR_PATH") {
            tracing::debug!("PREPROCESSOR_PATH override: {}", path);
            self.server.preprocessor_path = path;
        }
        if let Ok(uri) = std::env::var("TRACKING_URI") {
            tracing::debug!("TRACKING_URI override: {}", uri);
            self.tracking.uri = uri;
        }
        if let Ok(bundle) = std::env::var("MODEL_BUNDLE") {
            self.server.model_bundle = Some(bundle);
        }
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        validation::validate_url("data.url", &self.data.url)?;
        if let Some(fallback) = &self.data.fallback_url {
            validation::validate_url("data.fallback_url", fallback)?;
        }
        validation::validate_path("data.data_dir", &self.data.data_dir)?;
        validation::validate_file_extension("data.file_name", &self.data.file_name, &["csv"])?;

        validation::validate_range("preprocessing.test_size", self.preprocessing.test_size, 0.0, 1.0)?;

        validation::validate_non_empty_string("tracking.uri", &self.tracking.uri)?;
        validation::validate_non_empty_string("tracking.experiment", &self.tracking.experiment)?;
        validation::validate_path("tracking.artifacts_dir", &self.tracking.artifacts_dir)?;

        let lr = &self.models.logistic_regression;
        validation::validate_range("models.logistic_regression.c", lr.c, 0.0, f64::INFINITY)?;
        validation::validate_range("models.logistic_regression.tol", lr.tol, 0.0, f64::INFINITY)?;
        validation::validate_positive_number("models.logistic_regression.max_iter", lr.max_iter, 1)?;

        let rf = &self.models.random_forest;
        validation::validate_positive_number("models.random_forest.n_estimators", rf.n_estimators, 1)?;
        validation::validate_positive_number(
            "models.random_forest.min_samples_split",
            rf.min_samples_split,
            2,
        )?;
        validation::validate_positive_number(
            "models.random_forest.min_samples_leaf",
            rf.min_samples_leaf,
            1,
        )?;

        validation::validate_positive_number("evaluation.cv_folds", self.evaluation.cv_folds, 2)?;

        validation::validate_non_empty_string("server.host", &self.server.host)?;
        validation::validate_path("server.preprocessor_path", &self.server.preprocessor_path)?;
        if let Some(bundle) = &self.server.model_bundle {
            validation::validate_file_extension("server.model_bundle", bundle, &["zip"])?;
        }

        Ok(())
    }

    /// 資料集 CSV 路徑
    pub fn dataset_path(&self) -> PathBuf {
        Path::new(&self.data.data_dir).join(&self.data.file_name)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        PathBuf::from(&self.tracking.artifacts_dir)
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.enabled
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = TomlConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dataset_path(), Path::new("data").join("heart_disease.csv"));
        assert_eq!(config.models.random_forest.n_estimators, 100);
        assert_eq!(config.models.logistic_regression.max_iter, 1000);
    }

    #[test]
    fn test_parse_partial_toml_config() {
        let toml_content = r#"
[data]
data_dir = "./custom-data"

[preprocessing]
test_size = 0.25

[models.random_forest]
n_estimators = 10
max_depth = 4

[server]
port = 9000
"#;

        let config = TomlConfig::from_toml_str(toml_content).unwrap();

        assert_eq!(config.data.data_dir, "./custom-data");
        assert_eq!(config.data.url, DEFAULT_DATA_URL);
        assert_eq!(config.preprocessing.test_size, 0.25);
        assert_eq!(config.preprocessing.random_state, 42);
        assert_eq!(config.models.random_forest.n_estimators, 10);
        assert_eq!(config.models.random_forest.max_depth, Some(4));
        assert_eq!(config.models.random_forest.min_samples_leaf, 2);
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("HEART_TEST_DATA_URL", "https://mirror.example.com/heart.data");

        let toml_content = r#"
[data]
url = "${HEART_TEST_DATA_URL}"
"#;

        let config = TomlConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.data.url, "https://mirror.example.com/heart.data");

        std::env::remove_var("HEART_TEST_DATA_URL");
    }

    #[test]
    fn test_config_validation() {
        let invalid_url = TomlConfig::from_toml_str("[data]\nurl = \"invalid-url\"\n").unwrap();
        assert!(invalid_url.validate().is_err());

        let invalid_split = TomlConfig::from_toml_str("[preprocessing]\ntest_size = 1.0\n").unwrap();
        assert!(invalid_split.validate().is_err());

        let empty_split = TomlConfig::from_toml_str("[preprocessing]\ntest_size = 0.0\n").unwrap();
        assert!(empty_split.validate().is_err());

        let zero_tol =
            TomlConfig::from_toml_str("[models.logistic_regression]\ntol = 0.0\n").unwrap();
        assert!(zero_tol.validate().is_err());

        let nan_tol =
            TomlConfig::from_toml_str("[models.logistic_regression]\ntol = nan\n").unwrap();
        assert!(nan_tol.validate().is_err());

        let negative_c =
            TomlConfig::from_toml_str("[models.logistic_regression]\nc = -1.0\n").unwrap();
        assert!(negative_c.validate().is_err());

        let invalid_folds = TomlConfig::from_toml_str("[evaluation]\ncv_folds = 1\n").unwrap();
        assert!(invalid_folds.validate().is_err());

        let invalid_bundle =
            TomlConfig::from_toml_str("[server]\nmodel_bundle = \"model.tar\"\n").unwrap();
        assert!(invalid_bundle.validate().is_err());
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();

        let toml_content = r#"
[tracking]
experiment = "file-test"
"#;

        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = TomlConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.tracking.experiment, "file-test");
        assert_eq!(config.tracking.uri, "file:./mlruns");
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = TomlConfig::load_or_default("/nonexistent/heart-risk.toml").unwrap();
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let config = TomlConfig::from_toml_str(include_str!("../../heart-risk.toml")).unwrap();
        assert!(config.validate().is_ok());

        let defaults = TomlConfig::default();
        assert_eq!(config.models.random_forest, defaults.models.random_forest);
        assert_eq!(config.models.logistic_regression, defaults.models.logistic_regression);
        assert_eq!(config.server.preprocessor_path, defaults.server.preprocessor_path);
    }
}
