use crate::core::dataset::load_dataset;
use crate::domain::model::Dataset;
use crate::utils::error::{Result, RiskError};
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Replaces missing (`NaN`) cells with the training median of their column.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MedianImputer {
    pub medians: Vec<f64>,
}

impl MedianImputer {
    pub fn fit(&mut self, x: &Array2<f64>) {
        self.medians = x
            .axis_iter(Axis(1))
            .map(|column| {
                let mut observed: Vec<f64> = column.iter().copied().filter(|v| !v.is_nan()).collect();
                median(&mut observed).unwrap_or(0.0)
            })
            .collect();
    }

    pub fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut out = x.clone();
        for (mut column, &fill) in out.axis_iter_mut(Axis(1)).zip(&self.medians) {
            column.mapv_inplace(|v| if v.is_nan() { fill } else { v });
        }
        out
    }
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Per-column standardisation to zero mean and unit (population) variance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(&mut self, x: &Array2<f64>) {
        let n = x.nrows().max(1) as f64;
        self.mean.clear();
        self.scale.clear();
        for column in x.axis_iter(Axis(1)) {
            let mean = column.sum() / n;
            let variance = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let std = variance.sqrt();
            self.mean.push(mean);
            // 常數欄位不縮放
            self.scale.push(if std > f64::EPSILON { std } else { 1.0 });
        }
    }

    pub fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut out = x.clone();
        for (j, mut column) in out.axis_iter_mut(Axis(1)).enumerate() {
            let (mean, scale) = (self.mean[j], self.scale[j]);
            column.mapv_inplace(|v| (v - mean) / scale);
        }
        out
    }
}

/// Imputation followed by scaling, fitted once on the training fold and
/// reused unchanged at inference time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Preprocessor {
    pub imputer: MedianImputer,
    pub scaler: StandardScaler,
    pub is_fitted: bool,
}

impl Preprocessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fit(&mut self, x: &Array2<f64>) -> Result<&mut Self> {
        if x.nrows() == 0 {
            return Err(RiskError::data("cannot fit preprocessor on an empty matrix"));
        }
        self.imputer.fit(x);
        let imputed = self.imputer.transform(x);
        self.scaler.fit(&imputed);
        self.is_fitted = true;
        Ok(self)
    }

    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if !self.is_fitted {
            return Err(RiskError::not_fitted("Preprocessor"));
        }
        if x.ncols() != self.n_features() {
            return Err(RiskError::ValidationError {
                message: format!(
                    "expected {} features, got {}",
                    self.n_features(),
                    x.ncols()
                ),
            });
        }
        let imputed = self.imputer.transform(x);
        Ok(self.scaler.transform(&imputed))
    }

    pub fn fit_transform(&mut self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.fit(x)?;
        self.transform(x)
    }

    pub fn n_features(&self) -> usize {
        self.scaler.mean.len()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }
}

/// Train/test folds produced by [`train_test_split`].
#[derive(Debug, Clone)]
pub struct SplitData {
    pub x_train: Array2<f64>,
    pub x_test: Array2<f64>,
    pub y_train: Vec<u8>,
    pub y_test: Vec<u8>,
}

/// 分層切分：每個類別各自洗牌後取 test_size 比例進測試集
pub fn train_test_split(dataset: &Dataset, test_size: f64, random_state: u64) -> Result<SplitData> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(RiskError::ValidationError {
            message: format!("test_size must be in (0, 1), got {}", test_size),
        });
    }
    if dataset.len() < 2 {
        return Err(RiskError::data("need at least 2 rows to split"));
    }

    let mut rng = StdRng::seed_from_u64(random_state);
    let mut train_idx = Vec::new();
    let mut test_idx = Vec::new();

    for class in [0u8, 1u8] {
        let mut members: Vec<usize> = dataset
            .targets
            .iter()
            .enumerate()
            .filter(|(_, &t)| t == class)
            .map(|(i, _)| i)
            .collect();
        if members.is_empty() {
            continue;
        }
        members.shuffle(&mut rng);

        let n = members.len();
        let mut n_test = (test_size * n as f64).round() as usize;
        if n >= 2 {
            n_test = n_test.clamp(1, n - 1);
        } else {
            n_test = 0;
        }

        test_idx.extend_from_slice(&members[..n_test]);
        train_idx.extend_from_slice(&members[n_test..]);
    }

    if test_idx.is_empty() {
        return Err(RiskError::data("test split is empty; dataset is too small"));
    }

    train_idx.shuffle(&mut rng);
    test_idx.shuffle(&mut rng);

    Ok(SplitData {
        x_train: dataset.features.select(Axis(0), &train_idx),
        x_test: dataset.features.select(Axis(0), &test_idx),
        y_train: train_idx.iter().map(|&i| dataset.targets[i]).collect(),
        y_test: test_idx.iter().map(|&i| dataset.targets[i]).collect(),
    })
}

/// Scaled folds plus the preprocessor fitted on the training fold.
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub split: SplitData,
    pub preprocessor: Preprocessor,
}

pub fn prepare(dataset: &Dataset, test_size: f64, random_state: u64) -> Result<PreparedData> {
    let raw = train_test_split(dataset, test_size, random_state)?;

    let mut preprocessor = Preprocessor::new();
    let x_train = preprocessor.fit_transform(&raw.x_train)?;
    let x_test = preprocessor.transform(&raw.x_test)?;

    Ok(PreparedData {
        split: SplitData {
            x_train,
            x_test,
            y_train: raw.y_train,
            y_test: raw.y_test,
        },
        preprocessor,
    })
}

pub fn load_and_preprocess<P: AsRef<Path>>(
    data_path: P,
    test_size: f64,
    random_state: u64,
) -> Result<PreparedData> {
    let dataset = load_dataset(data_path)?;
    prepare(&dataset, test_size, random_state)
}
