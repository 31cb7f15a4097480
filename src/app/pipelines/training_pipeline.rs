use crate::config::toml_config::TomlConfig;
use crate::core::bundle::{ModelBundle, BUNDLE_FILE};
use crate::core::dataset::{load_dataset, DatasetDownloader};
use crate::core::metrics::{evaluate_model, Evaluation};
use crate::core::models::{LogisticRegression, ModelArtifact, RandomForest};
use crate::core::preprocessing::{prepare, PreparedData, Preprocessor};
use crate::core::tracking::{ActiveRun, RunStatus, TrackingStore};
use crate::domain::model::Dataset;
use crate::domain::ports::{Classifier, Pipeline, Storage};
use crate::utils::error::{Result, RiskError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const PREPROCESSOR_FILE: &str = "preprocessor.json";

/// 單一模型的訓練結果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelReport {
    pub run_name: String,
    pub model_type: String,
    pub run_id: String,
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub experiment_id: String,
    pub reports: Vec<ModelReport>,
    pub best_model: String,
    pub best_run_id: String,
    pub bundle_path: PathBuf,
    pub preprocessor_path: PathBuf,
}

impl TrainingSummary {
    pub fn best_report(&self) -> Option<&ModelReport> {
        self.reports.iter().find(|r| r.model_type == self.best_model)
    }
}

/// Dataset → split + preprocessor → two tracked models, the best of which is
/// bundled into the storage root.
pub struct TrainingPipeline<S: Storage> {
    pub(crate) storage: S,
    pub(crate) config: TomlConfig,
    data_path: PathBuf,
    download_if_missing: bool,
    tracking: TrackingStore,
}

impl<S: Storage> TrainingPipeline<S> {
    pub fn new(storage: S, config: TomlConfig) -> Result<Self> {
        let tracking = TrackingStore::from_uri(&config.tracking.uri)?;
        let data_path = config.dataset_path();
        Ok(Self {
            storage,
            config,
            data_path,
            download_if_missing: false,
            tracking,
        })
    }

    pub fn with_data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_path = path.into();
        self
    }

    pub fn with_download(mut self, enabled: bool) -> Self {
        self.download_if_missing = enabled;
        self
    }

    pub fn tracking(&self) -> &TrackingStore {
        &self.tracking
    }

    /// Fit, score and record one model in its own run.
    fn train_tracked(
        &self,
        experiment_id: &str,
        run_name: &str,
        mut model: ModelArtifact,
        prepared: &PreparedData,
    ) -> Result<(ModelArtifact, ModelReport)> {
        tracing::info!("🏋️ Training {}...", run_name);
        let mut run = self.tracking.start_run(experiment_id, run_name)?;

        match self.record_run(&mut run, &mut model, prepared) {
            Ok(evaluation) => {
                let run_id = run.run_id().to_string();
                run.end(RunStatus::Finished)?;
                let report = ModelReport {
                    run_name: run_name.to_string(),
                    model_type: model.name().to_string(),
                    run_id,
                    metrics: evaluation.metrics,
                };
                Ok((model, report))
            }
            Err(e) => {
                tracing::error!("❌ {} failed: {}", run_name, e);
                Err(fail_run(run, e))
            }
        }
    }

    fn record_run(
        &self,
        run: &mut ActiveRun,
        model: &mut ModelArtifact,
        prepared: &PreparedData,
    ) -> Result<Evaluation> {
        run.log_params(&model.params())?;

        let split = &prepared.split;
        let evaluation = evaluate_model(
            model,
            &split.x_train,
            &split.y_train,
            &split.x_test,
            &split.y_test,
            self.config.evaluation.cv_folds,
            self.config.evaluation.cv_random_state,
        )?;

        run.log_metrics(&evaluation.metrics)?;
        run.log_json_artifact(
            &format!("confusion_matrix_{}.json", snake_case(model.name())),
            &serde_json::json!({
                "labels": [0, 1],
                "matrix": evaluation.confusion_matrix.as_matrix(),
                "counts": evaluation.confusion_matrix,
            }),
        )?;
        run.log_model(model)?;
        run.log_json_artifact(PREPROCESSOR_FILE, &prepared.preprocessor)?;

        Ok(evaluation)
    }

    fn record_best(
        &self,
        experiment_id: &str,
        best: &ModelArtifact,
        report: &ModelReport,
        preprocessor: &Preprocessor,
    ) -> Result<String> {
        let mut run = self.tracking.start_run(experiment_id, "Best_Model")?;
        let outcome = (|| -> Result<()> {
            run.log_param("model_type", &report.model_type)?;
            run.log_param("source_run_id", &report.run_id)?;
            run.log_metrics(&report.metrics)?;
            run.log_model(best)?;
            run.log_json_artifact(PREPROCESSOR_FILE, preprocessor)?;
            Ok(())
        })();

        let run_id = run.run_id().to_string();
        match outcome {
            Ok(()) => {
                run.end(RunStatus::Finished)?;
                Ok(run_id)
            }
            Err(e) => Err(fail_run(run, e)),
        }
    }
}

/// 標記 run 失敗；寫入失敗只記錄警告，回傳原本的錯誤
fn fail_run(run: ActiveRun, error: RiskError) -> RiskError {
    let run_id = run.run_id().to_string();
    if let Err(end_error) = run.end(RunStatus::Failed) {
        tracing::warn!("⚠️ Could not mark run {} as failed: {}", run_id, end_error);
    }
    error
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

#[async_trait::async_trait]
impl<S: Storage> Pipeline for TrainingPipeline<S> {
    type Raw = Dataset;
    type Prepared = PreparedData;
    type Output = TrainingSummary;

    async fn extract(&self) -> Result<Dataset> {
        if !self.data_path.exists() {
            if !self.download_if_missing {
                return Err(RiskError::data(format!(
                    "dataset not found at {}; run the download step first",
                    self.data_path.display()
                )));
            }
            let mut data_config = self.config.data.clone();
            if let (Some(dir), Some(name)) = (self.data_path.parent(), self.data_path.file_name()) {
                data_config.data_dir = dir.to_string_lossy().into_owned();
                data_config.file_name = name.to_string_lossy().into_owned();
            }
            DatasetDownloader::new(data_config)?.download().await?;
        }

        tracing::info!("📂 Loading dataset from {}", self.data_path.display());
        let dataset = load_dataset(&self.data_path)?;
        let (negatives, positives) = dataset.class_counts();
        tracing::info!(
            "Dataset shape: ({}, {}), target distribution: 0={}, 1={}, missing cells: {}",
            dataset.len(),
            dataset.n_features() + 1,
            negatives,
            positives,
            dataset.missing_count()
        );
        Ok(dataset)
    }

    async fn transform(&self, dataset: Dataset) -> Result<PreparedData> {
        let prepared = prepare(
            &dataset,
            self.config.preprocessing.test_size,
            self.config.preprocessing.random_state,
        )?;
        tracing::info!(
            "✂️ Split into {} training and {} test rows",
            prepared.split.y_train.len(),
            prepared.split.y_test.len()
        );

        let preprocessor_json = serde_json::to_vec_pretty(&prepared.preprocessor)?;
        self.storage
            .write_file(PREPROCESSOR_FILE, &preprocessor_json)
            .await?;
        tracing::info!("💾 Preprocessor saved to {}", PREPROCESSOR_FILE);

        Ok(prepared)
    }

    async fn load(&self, prepared: PreparedData) -> Result<TrainingSummary> {
        let experiment_id = self.tracking.set_experiment(&self.config.tracking.experiment)?;
        let models = &self.config.models;

        let (lr, lr_report) = self.train_tracked(
            &experiment_id,
            "Logistic_Regression",
            LogisticRegression::new(models.logistic_regression.clone()).into(),
            &prepared,
        )?;
        let (rf, rf_report) = self.train_tracked(
            &experiment_id,
            "Random_Forest",
            RandomForest::new(models.random_forest.clone()).into(),
            &prepared,
        )?;

        // 隨機森林必須嚴格優於邏輯迴歸才會勝出
        let (best, best_report) =
            if rf_report.metrics["test_roc_auc"] > lr_report.metrics["test_roc_auc"] {
                (rf, &rf_report)
            } else {
                (lr, &lr_report)
            };
        tracing::info!(
            "🏆 Best model: {} (test ROC-AUC {:.4})",
            best_report.model_type,
            best_report.metrics["test_roc_auc"]
        );

        let best_run_id =
            self.record_best(&experiment_id, &best, best_report, &prepared.preprocessor)?;

        let bundle = ModelBundle {
            model: best,
            preprocessor: prepared.preprocessor,
            metrics: best_report.metrics.clone(),
        };
        self.storage
            .write_file(BUNDLE_FILE, &bundle.to_zip_bytes()?)
            .await?;
        tracing::info!("📦 Model bundle written to {}", BUNDLE_FILE);

        let best_model = best_report.model_type.clone();
        let artifacts_dir = self.config.artifacts_dir();
        Ok(TrainingSummary {
            experiment_id,
            reports: vec![lr_report, rf_report],
            best_model,
            best_run_id,
            bundle_path: artifacts_dir.join(BUNDLE_FILE),
            preprocessor_path: artifacts_dir.join(PREPROCESSOR_FILE),
        })
    }
}
