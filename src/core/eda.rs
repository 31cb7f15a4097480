//! Exploratory summary of the cleaned dataset.

use crate::domain::model::{Dataset, FEATURE_NAMES};
use crate::utils::error::{Result, RiskError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const EDA_FILE: &str = "eda_summary.json";

/// 單一欄位的描述統計 (忽略缺失值)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSummary {
    pub name: String,
    pub count: usize,
    pub missing: usize,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub q25: Option<f64>,
    pub median: Option<f64>,
    pub q75: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdaReport {
    pub rows: usize,
    pub columns: Vec<ColumnSummary>,
    pub target_distribution: BTreeMap<String, usize>,
    /// Pearson correlation of each feature with the target, over rows where
    /// the feature is present.
    pub target_correlation: BTreeMap<String, Option<f64>>,
}

/// Linear-interpolated quantile of sorted values.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (pos - lower as f64)
}

fn summarize_column(name: &str, values: &[f64]) -> ColumnSummary {
    let mut present: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    present.sort_by(f64::total_cmp);

    let count = present.len();
    let missing = values.len() - count;
    if count == 0 {
        return ColumnSummary {
            name: name.to_string(),
            count,
            missing,
            mean: None,
            std: None,
            min: None,
            q25: None,
            median: None,
            q75: None,
            max: None,
        };
    }

    let mean = present.iter().sum::<f64>() / count as f64;
    // 樣本標準差 (n - 1)
    let std = (count > 1).then(|| {
        (present.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64).sqrt()
    });

    ColumnSummary {
        name: name.to_string(),
        count,
        missing,
        mean: Some(mean),
        std,
        min: present.first().copied(),
        q25: Some(quantile(&present, 0.25)),
        median: Some(quantile(&present, 0.5)),
        q75: Some(quantile(&present, 0.75)),
        max: present.last().copied(),
    }
}

fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = xs
        .iter()
        .zip(ys)
        .filter(|(x, _)| !x.is_nan())
        .map(|(&x, &y)| (x, y))
        .collect();
    if pairs.len() < 2 {
        return None;
    }

    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x).powi(2);
        var_y += (y - mean_y).powi(2);
    }
    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some(cov / (var_x * var_y).sqrt())
}

pub fn summarize(dataset: &Dataset) -> Result<EdaReport> {
    if dataset.is_empty() {
        return Err(RiskError::data("cannot summarise an empty dataset"));
    }

    let targets: Vec<f64> = dataset.targets.iter().map(|&t| f64::from(t)).collect();
    let mut columns = Vec::with_capacity(FEATURE_NAMES.len() + 1);
    let mut target_correlation = BTreeMap::new();

    for (j, name) in FEATURE_NAMES.iter().enumerate() {
        let values = dataset.features.column(j).to_vec();
        columns.push(summarize_column(name, &values));
        target_correlation.insert(name.to_string(), pearson(&values, &targets));
    }
    columns.push(summarize_column("target", &targets));

    let (negatives, positives) = dataset.class_counts();
    let target_distribution =
        BTreeMap::from([("0".to_string(), negatives), ("1".to_string(), positives)]);

    Ok(EdaReport {
        rows: dataset.len(),
        columns,
        target_distribution,
        target_correlation,
    })
}

impl EdaReport {
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn log(&self) {
        tracing::info!("📊 Dataset has {} rows", self.rows);
        for column in self.columns.iter().filter(|c| c.missing > 0) {
            tracing::info!("Missing values in {}: {}", column.name, column.missing);
        }
        tracing::info!("Target distribution: {:?}", self.target_distribution);

        let mut ranked: Vec<(&String, f64)> = self
            .target_correlation
            .iter()
            .filter_map(|(name, corr)| corr.map(|c| (name, c)))
            .collect();
        ranked.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
        for (name, corr) in ranked.iter().take(5) {
            tracing::info!("Correlation with target: {} = {:.3}", name, corr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::N_FEATURES;
    use ndarray::Array2;

    fn dataset() -> Dataset {
        let features = Array2::from_shape_fn((4, N_FEATURES), |(i, j)| {
            if j == 11 && i == 0 {
                f64::NAN
            } else {
                (i + j) as f64
            }
        });
        Dataset {
            features,
            targets: vec![0, 0, 1, 1],
        }
    }

    #[test]
    fn test_column_summary_quartiles() {
        let summary = summarize_column("x", &[4.0, 1.0, f64::NAN, 3.0, 2.0]);
        assert_eq!(summary.count, 4);
        assert_eq!(summary.missing, 1);
        assert_eq!(summary.min, Some(1.0));
        assert_eq!(summary.q25, Some(1.75));
        assert_eq!(summary.median, Some(2.5));
        assert_eq!(summary.q75, Some(3.25));
        assert_eq!(summary.max, Some(4.0));
        assert_eq!(summary.mean, Some(2.5));
    }

    #[test]
    fn test_summarize_reports_missing_and_correlation() {
        let report = summarize(&dataset()).unwrap();

        assert_eq!(report.rows, 4);
        assert_eq!(report.columns.len(), N_FEATURES + 1);
        assert_eq!(report.columns[11].missing, 1);
        assert_eq!(report.target_distribution["1"], 2);

        let age_corr = report.target_correlation["age"].unwrap();
        assert!(age_corr > 0.8);
    }

    #[test]
    fn test_constant_column_has_no_correlation() {
        assert_eq!(pearson(&[1.0, 1.0, 1.0], &[0.0, 1.0, 1.0]), None);
    }

    #[test]
    fn test_empty_dataset_is_error() {
        let empty = Dataset {
            features: Array2::zeros((0, N_FEATURES)),
            targets: vec![],
        };
        assert!(summarize(&empty).is_err());
    }
}
