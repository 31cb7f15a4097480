use crate::config::toml_config::TomlConfig;
use crate::core::bundle::ModelBundle;
use crate::core::models::ModelArtifact;
use crate::core::preprocessing::Preprocessor;
use crate::core::tracking::{TrackingStore, MODEL_FILE};
use crate::domain::model::{Confidence, PatientRecord, Prediction};
use crate::domain::ports::Classifier;
use crate::utils::error::{Result, RiskError};
use std::path::{Path, PathBuf};

/// Fitted preprocessor and model used to answer prediction requests.
///
/// Either half may be missing; prediction then fails with
/// [`RiskError::ModelUnavailable`] instead of guessing.
#[derive(Debug, Clone, Default)]
pub struct Predictor {
    model: Option<ModelArtifact>,
    preprocessor: Option<Preprocessor>,
}

impl Predictor {
    pub fn new(model: Option<ModelArtifact>, preprocessor: Option<Preprocessor>) -> Self {
        Self {
            model,
            preprocessor: preprocessor.filter(|p| p.is_fitted),
        }
    }

    pub fn from_bundle(bundle: ModelBundle) -> Self {
        Self::new(Some(bundle.model), Some(bundle.preprocessor))
    }

    /// 依設定載入模型與前處理器
    ///
    /// A configured bundle must load. Without one, the tracking store is
    /// searched and a missing model only produces a warning.
    pub fn load(config: &TomlConfig) -> Result<Self> {
        if let Some(bundle_path) = &config.server.model_bundle {
            tracing::info!("📦 Loading model bundle from {}", bundle_path);
            let bundle = ModelBundle::read(bundle_path).map_err(|e| {
                tracing::error!("❌ Failed to load model bundle {}: {}", bundle_path, e);
                e
            })?;
            let predictor = Self::from_bundle(bundle);
            tracing::info!("✅ Model loaded: {}", predictor.model_name().unwrap_or("unknown"));
            return Ok(predictor);
        }

        let store = TrackingStore::from_uri(&config.tracking.uri)?;
        let (model, model_dir) = match discover_model(&store) {
            Some((model, dir)) => {
                tracing::info!("✅ Loaded {} from {}", model.name(), dir.display());
                (Some(model), Some(dir))
            }
            None => {
                tracing::warn!(
                    "⚠️ No model found under {}; predictions are unavailable until a model is trained",
                    store.root().display()
                );
                (None, None)
            }
        };

        let preprocessor = load_preprocessor(
            Path::new(&config.server.preprocessor_path),
            model_dir.as_deref(),
        )?;

        Ok(Self::new(model, preprocessor))
    }

    pub fn is_model_loaded(&self) -> bool {
        self.model.is_some()
    }

    pub fn is_preprocessor_loaded(&self) -> bool {
        self.preprocessor.is_some()
    }

    pub fn model_name(&self) -> Option<&'static str> {
        self.model.as_ref().map(|m| m.name())
    }

    pub fn predict(&self, record: &PatientRecord) -> Result<Prediction> {
        let (Some(model), Some(preprocessor)) = (&self.model, &self.preprocessor) else {
            return Err(RiskError::ModelUnavailable);
        };

        let features = preprocessor.transform(&record.to_matrix())?;
        let probability = model
            .predict_proba(&features)?
            .first()
            .copied()
            .ok_or_else(|| RiskError::model("model returned no probability"))?;

        Ok(Prediction {
            prediction: u8::from(probability > 0.5),
            probability,
            confidence: Confidence::from_probability(probability),
        })
    }
}

fn load_model_dir(dir: &Path) -> Result<ModelArtifact> {
    ModelArtifact::load(dir.join(MODEL_FILE))
}

/// 先找最新的 run，再掃描整個追蹤目錄
fn discover_model(store: &TrackingStore) -> Option<(ModelArtifact, PathBuf)> {
    match store.latest_model_dir() {
        Ok(Some(dir)) => match load_model_dir(&dir) {
            Ok(model) => return Some((model, dir)),
            Err(e) => tracing::warn!("Error loading model from latest run: {}", e),
        },
        Ok(None) => tracing::debug!("No tracked run has a model"),
        Err(e) => tracing::warn!("Error reading tracking store: {}", e),
    }

    let dirs = match store.find_model_dirs() {
        Ok(dirs) => dirs,
        Err(e) => {
            tracing::warn!("Error scanning {}: {}", store.root().display(), e);
            return None;
        }
    };
    dirs.into_iter().find_map(|dir| match load_model_dir(&dir) {
        Ok(model) => Some((model, dir)),
        Err(e) => {
            tracing::debug!("Skipping {}: {}", dir.display(), e);
            None
        }
    })
}

/// The configured path wins; otherwise the preprocessor logged next to the
/// model. An existing but unreadable file is an error.
fn load_preprocessor(configured: &Path, model_dir: Option<&Path>) -> Result<Option<Preprocessor>> {
    let candidate = if configured.is_file() {
        Some(configured.to_path_buf())
    } else {
        model_dir
            .and_then(Path::parent)
            .map(|artifacts| artifacts.join("preprocessor.json"))
            .filter(|path| path.is_file())
    };

    let Some(path) = candidate else {
        tracing::warn!("⚠️ Preprocessor not found at {}", configured.display());
        return Ok(None);
    };

    let preprocessor = Preprocessor::load(&path)?;
    if !preprocessor.is_fitted {
        tracing::warn!("⚠️ Preprocessor at {} is not fitted", path.display());
        return Ok(None);
    }
    tracing::info!("✅ Loaded preprocessor from {}", path.display());
    Ok(Some(preprocessor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::LogisticRegression;
    use crate::core::tracking::RunStatus;
    use crate::domain::model::N_FEATURES;
    use ndarray::Array2;
    use tempfile::TempDir;

    fn fitted_pair() -> (ModelArtifact, Preprocessor) {
        // thalach (第 8 欄) 越低越可能為 1
        let x = Array2::from_shape_fn((20, N_FEATURES), |(i, j)| {
            let base = PatientRecord::sample().to_features()[j];
            if j == 7 {
                if i % 2 == 1 { 120.0 + i as f64 } else { 170.0 - i as f64 }
            } else {
                base + (i % 3) as f64
            }
        });
        let y: Vec<u8> = (0..20).map(|i| (i % 2) as u8).collect();

        let mut preprocessor = Preprocessor::new();
        let scaled = preprocessor.fit_transform(&x).unwrap();
        let mut model = ModelArtifact::from(LogisticRegression::default());
        model.fit(&scaled, &y).unwrap();
        (model, preprocessor)
    }

    #[test]
    fn test_predict_without_model_is_unavailable() {
        let predictor = Predictor::default();
        assert!(!predictor.is_model_loaded());
        let err = predictor.predict(&PatientRecord::sample()).unwrap_err();
        assert!(matches!(err, RiskError::ModelUnavailable));
    }

    #[test]
    fn test_predict_requires_preprocessor() {
        let (model, _) = fitted_pair();
        let predictor = Predictor::new(Some(model), None);
        assert!(matches!(
            predictor.predict(&PatientRecord::sample()),
            Err(RiskError::ModelUnavailable)
        ));
    }

    #[test]
    fn test_unfitted_preprocessor_is_dropped() {
        let (model, _) = fitted_pair();
        let predictor = Predictor::new(Some(model), Some(Preprocessor::new()));
        assert!(!predictor.is_preprocessor_loaded());
    }

    #[test]
    fn test_predict_returns_consistent_fields() {
        let (model, preprocessor) = fitted_pair();
        let predictor = Predictor::new(Some(model), Some(preprocessor));

        let mut record = PatientRecord::sample();
        record.thalach = 110.0;
        let result = predictor.predict(&record).unwrap();

        assert!((0.0..=1.0).contains(&result.probability));
        assert_eq!(result.prediction, u8::from(result.probability > 0.5));
        assert_eq!(result.confidence, Confidence::from_probability(result.probability));
        assert_eq!(result.prediction, 1);
    }

    #[test]
    fn test_load_from_tracking_store_uses_logged_preprocessor() {
        let temp_dir = TempDir::new().unwrap();
        let (model, preprocessor) = fitted_pair();

        let store = TrackingStore::new(temp_dir.path().join("mlruns"));
        let experiment_id = store.set_experiment("heart").unwrap();
        let run = store.start_run(&experiment_id, "Best_Model").unwrap();
        run.log_model(&model).unwrap();
        run.log_json_artifact("preprocessor.json", &preprocessor).unwrap();
        run.end(RunStatus::Finished).unwrap();

        let mut config = TomlConfig::default();
        config.tracking.uri = store.root().to_string_lossy().into_owned();
        config.server.preprocessor_path = temp_dir
            .path()
            .join("missing.json")
            .to_string_lossy()
            .into_owned();

        let predictor = Predictor::load(&config).unwrap();
        assert!(predictor.is_model_loaded());
        assert!(predictor.is_preprocessor_loaded());
        assert_eq!(predictor.model_name(), Some("LogisticRegression"));
    }

    #[test]
    fn test_load_with_empty_store_starts_without_model() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = TomlConfig::default();
        config.tracking.uri = temp_dir.path().to_string_lossy().into_owned();
        config.server.preprocessor_path = temp_dir
            .path()
            .join("preprocessor.json")
            .to_string_lossy()
            .into_owned();

        let predictor = Predictor::load(&config).unwrap();
        assert!(!predictor.is_model_loaded());
        assert!(!predictor.is_preprocessor_loaded());
    }

    #[test]
    fn test_corrupt_tracked_model_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let (model, preprocessor) = fitted_pair();
        let store = TrackingStore::new(temp_dir.path().join("mlruns"));
        let experiment_id = store.set_experiment("heart").unwrap();

        let good = store.start_run(&experiment_id, "Logistic_Regression").unwrap();
        good.log_model(&model).unwrap();
        good.log_json_artifact("preprocessor.json", &preprocessor).unwrap();
        good.end(RunStatus::Finished).unwrap();

        // 最新的 run 內是結構損壞的隨機森林
        let damaged = store.start_run(&experiment_id, "Random_Forest").unwrap();
        damaged.log_model(&model).unwrap();
        std::fs::write(
            damaged.artifacts_dir().join(crate::core::tracking::MODEL_DIR).join(MODEL_FILE),
            r#"{"model_type":"RandomForest","params":{},"n_features":13,
               "trees":[{"nodes":[{"kind":"split","feature":99,"threshold":0.0,"left":5,"right":6}]}]}"#,
        )
        .unwrap();
        damaged.end(RunStatus::Finished).unwrap();

        let mut config = TomlConfig::default();
        config.tracking.uri = store.root().to_string_lossy().into_owned();
        config.server.preprocessor_path = temp_dir
            .path()
            .join("missing.json")
            .to_string_lossy()
            .into_owned();

        let predictor = Predictor::load(&config).unwrap();
        assert_eq!(predictor.model_name(), Some("LogisticRegression"));
        assert!(predictor.predict(&PatientRecord::sample()).is_ok());
    }

    #[test]
    fn test_missing_configured_bundle_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = TomlConfig::default();
        config.server.model_bundle = Some(
            temp_dir
                .path()
                .join("model_bundle.zip")
                .to_string_lossy()
                .into_owned(),
        );
        assert!(Predictor::load(&config).is_err());
    }
}
