//! File-backed experiment tracking.
//!
//! Layout under the store root:
//!
//! ```text
//! <experiment_id>/meta.json
//! <experiment_id>/<run_id>/meta.json
//! <experiment_id>/<run_id>/params.json
//! <experiment_id>/<run_id>/metrics.json
//! <experiment_id>/<run_id>/artifacts/...
//! ```

use crate::core::models::ModelArtifact;
use crate::domain::ports::Classifier;
use crate::utils::error::{Result, RiskError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const META_FILE: &str = "meta.json";
const PARAMS_FILE: &str = "params.json";
const METRICS_FILE: &str = "metrics.json";
const ARTIFACTS_DIR: &str = "artifacts";
pub const MODEL_DIR: &str = "model";
pub const MODEL_FILE: &str = "model.json";
const MODEL_META_FILE: &str = "model_meta.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub experiment_id: String,
    pub name: String,
    pub creation_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    pub run_name: String,
    pub experiment_id: String,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModelMeta {
    model_type: String,
    run_id: String,
    created_at: DateTime<Utc>,
    model_file: String,
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_vec_pretty(value)?)?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let data = std::fs::read(path)?;
    serde_json::from_slice(&data)
        .map_err(|e| RiskError::tracking(format!("{}: {}", path.display(), e)))
}

#[derive(Debug, Clone)]
pub struct TrackingStore {
    root: PathBuf,
}

impl TrackingStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// 支援 `file:./mlruns`、`file:///abs/path` 與一般路徑
    pub fn from_uri(uri: &str) -> Result<Self> {
        let path = match uri.strip_prefix("file:") {
            Some(rest) => rest.strip_prefix("//").unwrap_or(rest),
            None if uri.contains("://") => {
                return Err(RiskError::InvalidConfigValueError {
                    field: "tracking.uri".to_string(),
                    value: uri.to_string(),
                    reason: "only file: tracking URIs are supported".to_string(),
                })
            }
            None => uri,
        };
        if path.is_empty() {
            return Err(RiskError::MissingConfigError {
                field: "tracking.uri".to_string(),
            });
        }
        Ok(Self::new(path))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn list_experiments(&self) -> Result<Vec<Experiment>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut experiments = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let meta_path = entry?.path().join(META_FILE);
            if meta_path.is_file() {
                experiments.push(read_json::<Experiment>(&meta_path)?);
            }
        }
        experiments.sort_by_key(|e| e.experiment_id.parse::<u64>().unwrap_or(u64::MAX));
        Ok(experiments)
    }

    pub fn get_experiment_by_name(&self, name: &str) -> Result<Option<Experiment>> {
        Ok(self
            .list_experiments()?
            .into_iter()
            .find(|e| e.name == name))
    }

    /// 取得或建立實驗，回傳實驗 ID
    pub fn set_experiment(&self, name: &str) -> Result<String> {
        if let Some(existing) = self.get_experiment_by_name(name)? {
            return Ok(existing.experiment_id);
        }

        let next_id = self
            .list_experiments()?
            .iter()
            .filter_map(|e| e.experiment_id.parse::<u64>().ok())
            .max()
            .map_or(0, |id| id + 1);

        let experiment = Experiment {
            experiment_id: next_id.to_string(),
            name: name.to_string(),
            creation_time: Utc::now(),
        };
        write_json(
            &self.root.join(&experiment.experiment_id).join(META_FILE),
            &experiment,
        )?;
        tracing::info!(
            "🧪 Created experiment '{}' (id {})",
            name,
            experiment.experiment_id
        );
        Ok(experiment.experiment_id)
    }

    pub fn start_run(&self, experiment_id: &str, run_name: &str) -> Result<ActiveRun> {
        let experiment_dir = self.root.join(experiment_id);
        if !experiment_dir.join(META_FILE).is_file() {
            return Err(RiskError::tracking(format!(
                "experiment {} does not exist",
                experiment_id
            )));
        }

        let info = RunInfo {
            run_id: uuid::Uuid::new_v4().simple().to_string(),
            run_name: run_name.to_string(),
            experiment_id: experiment_id.to_string(),
            status: RunStatus::Running,
            start_time: Utc::now(),
            end_time: None,
        };
        let dir = experiment_dir.join(&info.run_id);
        std::fs::create_dir_all(dir.join(ARTIFACTS_DIR))?;
        write_json(&dir.join(META_FILE), &info)?;

        tracing::debug!("Started run {} ({})", info.run_id, run_name);
        Ok(ActiveRun {
            info,
            dir,
            params: BTreeMap::new(),
            metrics: BTreeMap::new(),
        })
    }

    /// 依開始時間由新到舊排序
    pub fn search_runs(&self, experiment_id: &str) -> Result<Vec<RunInfo>> {
        let experiment_dir = self.root.join(experiment_id);
        if !experiment_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut runs = Vec::new();
        for entry in std::fs::read_dir(&experiment_dir)? {
            let path = entry?.path();
            let meta_path = path.join(META_FILE);
            if path.is_dir() && meta_path.is_file() {
                runs.push(read_json::<RunInfo>(&meta_path)?);
            }
        }
        runs.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(runs)
    }

    pub fn run_dir(&self, run: &RunInfo) -> PathBuf {
        self.root.join(&run.experiment_id).join(&run.run_id)
    }

    pub fn get_params(&self, run: &RunInfo) -> Result<BTreeMap<String, String>> {
        let path = self.run_dir(run).join(PARAMS_FILE);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        read_json(&path)
    }

    pub fn get_metrics(&self, run: &RunInfo) -> Result<BTreeMap<String, f64>> {
        let path = self.run_dir(run).join(METRICS_FILE);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        read_json(&path)
    }

    /// Model directory of the most recently started run that logged a model.
    pub fn latest_model_dir(&self) -> Result<Option<PathBuf>> {
        let mut runs = Vec::new();
        for experiment in self.list_experiments()? {
            runs.extend(self.search_runs(&experiment.experiment_id)?);
        }
        runs.sort_by(|a, b| b.start_time.cmp(&a.start_time));

        Ok(runs
            .iter()
            .map(|run| self.run_dir(run).join(ARTIFACTS_DIR).join(MODEL_DIR))
            .find(|dir| dir.join(MODEL_FILE).is_file()))
    }

    /// Every `model` directory below the store root, in path order.
    pub fn find_model_dirs(&self) -> Result<Vec<PathBuf>> {
        fn walk(dir: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_dir())
                .collect();
            entries.sort();
            for path in entries {
                if path.file_name().is_some_and(|n| n == MODEL_DIR) {
                    found.push(path.clone());
                }
                walk(&path, found)?;
            }
            Ok(())
        }

        let mut found = Vec::new();
        if self.root.is_dir() {
            walk(&self.root, &mut found)?;
        }
        Ok(found)
    }
}

/// A run in progress. Params and metrics are flushed to disk on every log call.
#[derive(Debug)]
pub struct ActiveRun {
    info: RunInfo,
    dir: PathBuf,
    params: BTreeMap<String, String>,
    metrics: BTreeMap<String, f64>,
}

impl ActiveRun {
    pub fn run_id(&self) -> &str {
        &self.info.run_id
    }

    pub fn info(&self) -> &RunInfo {
        &self.info
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.dir.join(ARTIFACTS_DIR)
    }

    pub fn log_param(&mut self, key: &str, value: impl ToString) -> Result<()> {
        self.params.insert(key.to_string(), value.to_string());
        write_json(&self.dir.join(PARAMS_FILE), &self.params)
    }

    pub fn log_params(&mut self, params: &BTreeMap<String, String>) -> Result<()> {
        self.params
            .extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
        write_json(&self.dir.join(PARAMS_FILE), &self.params)
    }

    pub fn log_metrics(&mut self, metrics: &BTreeMap<String, f64>) -> Result<()> {
        for (key, value) in metrics {
            if !value.is_finite() {
                return Err(RiskError::tracking(format!(
                    "metric '{}' is not finite: {}",
                    key, value
                )));
            }
            self.metrics.insert(key.clone(), *value);
        }
        write_json(&self.dir.join(METRICS_FILE), &self.metrics)
    }

    /// 複製本機檔案到 run 的 artifacts 目錄
    pub fn log_artifact<P: AsRef<Path>>(&self, local_path: P) -> Result<PathBuf> {
        let local_path = local_path.as_ref();
        let file_name = local_path.file_name().ok_or_else(|| {
            RiskError::tracking(format!("{} is not a file", local_path.display()))
        })?;
        let target = self.artifacts_dir().join(file_name);
        std::fs::copy(local_path, &target)?;
        tracing::debug!("Logged artifact {}", target.display());
        Ok(target)
    }

    pub fn log_json_artifact<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let target = self.artifacts_dir().join(name);
        write_json(&target, value)?;
        Ok(target)
    }

    pub fn log_model(&self, model: &ModelArtifact) -> Result<PathBuf> {
        let model_dir = self.artifacts_dir().join(MODEL_DIR);
        model.save(model_dir.join(MODEL_FILE))?;
        write_json(
            &model_dir.join(MODEL_META_FILE),
            &ModelMeta {
                model_type: model.name().to_string(),
                run_id: self.info.run_id.clone(),
                created_at: Utc::now(),
                model_file: MODEL_FILE.to_string(),
            },
        )?;
        Ok(model_dir)
    }

    pub fn end(mut self, status: RunStatus) -> Result<RunInfo> {
        self.info.status = status;
        self.info.end_time = Some(Utc::now());
        write_json(&self.dir.join(META_FILE), &self.info)?;
        tracing::debug!("Run {} ended with {:?}", self.info.run_id, status);
        Ok(self.info)
    }
}
