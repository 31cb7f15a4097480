pub mod forest;
pub mod logistic;

pub use forest::{DecisionTree, MaxFeatures, RandomForest, RandomForestParams};
pub use logistic::{LogisticRegression, LogisticRegressionParams};

use crate::domain::ports::Classifier;
use crate::utils::error::Result;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A fitted (or fittable) model as persisted in the tracking store and in
/// model bundles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "model_type")]
pub enum ModelArtifact {
    LogisticRegression(LogisticRegression),
    RandomForest(RandomForest),
}

impl ModelArtifact {
    fn inner(&self) -> &dyn Classifier {
        match self {
            ModelArtifact::LogisticRegression(m) => m,
            ModelArtifact::RandomForest(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Classifier {
        match self {
            ModelArtifact::LogisticRegression(m) => m,
            ModelArtifact::RandomForest(m) => m,
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec(self)?)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_json(&data)
    }

    /// 解析並檢查結構，損壞的模型在載入時就拒絕
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let artifact: Self = serde_json::from_slice(data)?;
        artifact.validate()?;
        Ok(artifact)
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            ModelArtifact::LogisticRegression(_) => Ok(()),
            ModelArtifact::RandomForest(m) => m.validate(),
        }
    }
}

impl From<LogisticRegression> for ModelArtifact {
    fn from(model: LogisticRegression) -> Self {
        ModelArtifact::LogisticRegression(model)
    }
}

impl From<RandomForest> for ModelArtifact {
    fn from(model: RandomForest) -> Self {
        ModelArtifact::RandomForest(model)
    }
}

impl Classifier for ModelArtifact {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn fit(&mut self, x: &Array2<f64>, y: &[u8]) -> Result<()> {
        self.inner_mut().fit(x, y)
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Vec<f64>> {
        self.inner().predict_proba(x)
    }

    fn params(&self) -> BTreeMap<String, String> {
        self.inner().params()
    }
}
