use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// 特徵欄位順序，訓練與推論必須一致
pub const FEATURE_NAMES: [&str; 13] = [
    "age", "sex", "cp", "trestbps", "chol", "fbs", "restecg", "thalach", "exang", "oldpeak",
    "slope", "ca", "thal",
];

pub const TARGET_COLUMN: &str = "target";

pub const N_FEATURES: usize = FEATURE_NAMES.len();

/// One patient's clinical measurements.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub age: f64,
    pub sex: f64,
    pub cp: f64,
    pub trestbps: f64,
    pub chol: f64,
    pub fbs: f64,
    pub restecg: f64,
    pub thalach: f64,
    pub exang: f64,
    pub oldpeak: f64,
    pub slope: f64,
    pub ca: f64,
    pub thal: f64,
}

impl PatientRecord {
    pub fn to_features(&self) -> [f64; N_FEATURES] {
        [
            self.age,
            self.sex,
            self.cp,
            self.trestbps,
            self.chol,
            self.fbs,
            self.restecg,
            self.thalach,
            self.exang,
            self.oldpeak,
            self.slope,
            self.ca,
            self.thal,
        ]
    }

    pub fn to_matrix(&self) -> Array2<f64> {
        let features = self.to_features();
        Array2::from_shape_fn((1, N_FEATURES), |(_, j)| features[j])
    }

    /// 範例輸入 (UCI Cleveland 第一筆)
    pub fn sample() -> Self {
        Self {
            age: 63.0,
            sex: 1.0,
            cp: 3.0,
            trestbps: 145.0,
            chol: 233.0,
            fbs: 1.0,
            restecg: 0.0,
            thalach: 150.0,
            exang: 0.0,
            oldpeak: 2.3,
            slope: 0.0,
            ca: 0.0,
            thal: 1.0,
        }
    }
}

/// Feature matrix plus binary labels. Missing cells are `NaN`.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub features: Array2<f64>,
    pub targets: Vec<u8>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }

    pub fn class_counts(&self) -> (usize, usize) {
        let positives = self.targets.iter().filter(|&&t| t == 1).count();
        (self.targets.len() - positives, positives)
    }

    pub fn missing_count(&self) -> usize {
        self.features.iter().filter(|v| v.is_nan()).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn from_probability(probability: f64) -> Self {
        if probability >= 0.8 {
            Confidence::High
        } else if probability >= 0.6 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Confidence::High => "High",
            Confidence::Medium => "Medium",
            Confidence::Low => "Low",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub prediction: u8,
    pub probability: f64,
    pub confidence: Confidence,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_thresholds() {
        assert_eq!(Confidence::from_probability(0.95), Confidence::High);
        assert_eq!(Confidence::from_probability(0.8), Confidence::High);
        assert_eq!(Confidence::from_probability(0.6), Confidence::Medium);
        assert_eq!(Confidence::from_probability(0.59), Confidence::Low);
    }

    #[test]
    fn test_feature_order_matches_names() {
        let features = PatientRecord::sample().to_features();
        assert_eq!(features.len(), FEATURE_NAMES.len());
        assert_eq!(features[0], 63.0);
        assert_eq!(features[9], 2.3);
        assert_eq!(PatientRecord::sample().to_matrix().shape(), &[1, N_FEATURES]);
    }
}
