//! Classification metrics and stratified cross-validation.

use crate::domain::ports::Classifier;
use crate::utils::error::{Result, RiskError};
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn check_lengths(y_true: &[u8], y_other_len: usize) -> Result<()> {
    if y_true.len() != y_other_len {
        return Err(RiskError::ValidationError {
            message: format!(
                "length mismatch: {} labels vs {} predictions",
                y_true.len(),
                y_other_len
            ),
        });
    }
    if y_true.is_empty() {
        return Err(RiskError::ValidationError {
            message: "cannot score an empty set".to_string(),
        });
    }
    Ok(())
}

pub fn accuracy(y_true: &[u8], y_pred: &[u8]) -> Result<f64> {
    check_lengths(y_true, y_pred.len())?;
    let correct = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
    Ok(correct as f64 / y_true.len() as f64)
}

/// Zero when nothing is predicted positive.
pub fn precision(y_true: &[u8], y_pred: &[u8]) -> Result<f64> {
    let cm = ConfusionMatrix::compute(y_true, y_pred)?;
    let predicted_positive = cm.tp + cm.fp;
    if predicted_positive == 0 {
        return Ok(0.0);
    }
    Ok(cm.tp as f64 / predicted_positive as f64)
}

/// Zero when there are no positives.
pub fn recall(y_true: &[u8], y_pred: &[u8]) -> Result<f64> {
    let cm = ConfusionMatrix::compute(y_true, y_pred)?;
    let actual_positive = cm.tp + cm.fn_;
    if actual_positive == 0 {
        return Ok(0.0);
    }
    Ok(cm.tp as f64 / actual_positive as f64)
}

/// Area under the ROC curve via the Mann-Whitney rank statistic. Tied scores
/// share their average rank.
pub fn roc_auc(y_true: &[u8], scores: &[f64]) -> Result<f64> {
    check_lengths(y_true, scores.len())?;

    let n_pos = y_true.iter().filter(|&&y| y == 1).count();
    let n_neg = y_true.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return Err(RiskError::ValidationError {
            message: "Only one class present in y_true. ROC AUC score is not defined".to_string(),
        });
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut ranks = vec![0.0; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // 1-based 平均名次
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg_rank;
        }
        i = j + 1;
    }

    let pos_rank_sum: f64 = y_true
        .iter()
        .zip(&ranks)
        .filter(|(&y, _)| y == 1)
        .map(|(_, &r)| r)
        .sum();
    let n_pos = n_pos as f64;
    Ok((pos_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg as f64))
}

/// Binary confusion matrix; rows are the true class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub tn: usize,
    pub fp: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
    pub tp: usize,
}

impl ConfusionMatrix {
    pub fn compute(y_true: &[u8], y_pred: &[u8]) -> Result<Self> {
        check_lengths(y_true, y_pred.len())?;
        let mut cm = ConfusionMatrix::default();
        for (&t, &p) in y_true.iter().zip(y_pred) {
            match (t, p) {
                (0, 0) => cm.tn += 1,
                (0, _) => cm.fp += 1,
                (_, 0) => cm.fn_ += 1,
                _ => cm.tp += 1,
            }
        }
        Ok(cm)
    }

    pub fn as_matrix(&self) -> [[usize; 2]; 2] {
        [[self.tn, self.fp], [self.fn_, self.tp]]
    }
}

/// Stratified K-fold indices: each class is dealt round-robin over the folds
/// so every fold keeps roughly the overall class ratio.
pub fn stratified_k_fold(
    y: &[u8],
    n_splits: usize,
    shuffle: bool,
    random_state: u64,
) -> Result<Vec<(Vec<usize>, Vec<usize>)>> {
    if n_splits < 2 {
        return Err(RiskError::ValidationError {
            message: format!("n_splits must be at least 2, got {}", n_splits),
        });
    }
    if n_splits > y.len() {
        return Err(RiskError::ValidationError {
            message: format!(
                "Cannot have number of splits n_splits={} greater than the number of samples: {}",
                n_splits,
                y.len()
            ),
        });
    }

    let mut rng = StdRng::seed_from_u64(random_state);
    let mut fold_of = vec![0usize; y.len()];
    let mut offset = 0;

    for class in [0u8, 1u8] {
        let mut members: Vec<usize> = (0..y.len()).filter(|&i| y[i] == class).collect();
        if members.len() < n_splits && !members.is_empty() {
            tracing::warn!(
                "The least populated class has only {} members, which is less than n_splits={}",
                members.len(),
                n_splits
            );
        }
        if shuffle {
            members.shuffle(&mut rng);
        }
        for (k, &idx) in members.iter().enumerate() {
            fold_of[idx] = (k + offset) % n_splits;
        }
        // 下一個類別從接續的 fold 開始，讓各 fold 大小平均
        offset = (offset + members.len()) % n_splits;
    }

    Ok((0..n_splits)
        .map(|fold| {
            let (test, train): (Vec<usize>, Vec<usize>) =
                (0..y.len()).partition(|&i| fold_of[i] == fold);
            (train, test)
        })
        .collect())
}

/// Mean and population standard deviation.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// ROC-AUC of a fresh copy of `model` over stratified folds of the data.
pub fn cross_val_roc_auc<C: Classifier + Clone>(
    model: &C,
    x: &Array2<f64>,
    y: &[u8],
    n_splits: usize,
    random_state: u64,
) -> Result<Vec<f64>> {
    let folds = stratified_k_fold(y, n_splits, true, random_state)?;
    let mut scores = Vec::with_capacity(folds.len());

    for (fold, (train_idx, test_idx)) in folds.iter().enumerate() {
        let x_train = x.select(Axis(0), train_idx);
        let y_train: Vec<u8> = train_idx.iter().map(|&i| y[i]).collect();
        let x_test = x.select(Axis(0), test_idx);
        let y_test: Vec<u8> = test_idx.iter().map(|&i| y[i]).collect();

        let mut estimator = model.clone();
        estimator.fit(&x_train, &y_train)?;
        let proba = estimator.predict_proba(&x_test)?;
        let score = roc_auc(&y_test, &proba)?;
        tracing::debug!("{} fold {} roc_auc = {:.4}", model.name(), fold, score);
        scores.push(score);
    }

    Ok(scores)
}

/// Scores of one fitted model on both folds plus its cross-validated AUC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub metrics: BTreeMap<String, f64>,
    pub confusion_matrix: ConfusionMatrix,
}

/// Fits `model` on the training fold and scores it.
///
/// Cross-validation runs on the training fold only, with fresh copies of the
/// unfitted model.
pub fn evaluate_model<C: Classifier + Clone>(
    model: &mut C,
    x_train: &Array2<f64>,
    y_train: &[u8],
    x_test: &Array2<f64>,
    y_test: &[u8],
    cv_folds: usize,
    cv_random_state: u64,
) -> Result<Evaluation> {
    let cv_scores = cross_val_roc_auc(model, x_train, y_train, cv_folds, cv_random_state)?;
    let (cv_mean, cv_std) = mean_std(&cv_scores);

    model.fit(x_train, y_train)?;

    let mut metrics = BTreeMap::new();
    for (prefix, x, y) in [("train", x_train, y_train), ("test", x_test, y_test)] {
        let proba = model.predict_proba(x)?;
        let pred: Vec<u8> = proba.iter().map(|&p| u8::from(p > 0.5)).collect();
        metrics.insert(format!("{}_accuracy", prefix), accuracy(y, &pred)?);
        metrics.insert(format!("{}_precision", prefix), precision(y, &pred)?);
        metrics.insert(format!("{}_recall", prefix), recall(y, &pred)?);
        metrics.insert(format!("{}_roc_auc", prefix), roc_auc(y, &proba)?);
    }
    metrics.insert("cv_roc_auc_mean".to_string(), cv_mean);
    metrics.insert("cv_roc_auc_std".to_string(), cv_std);

    let confusion_matrix = ConfusionMatrix::compute(y_test, &model.predict(x_test)?)?;

    tracing::info!(
        "📈 {}: test_roc_auc={:.4}, test_accuracy={:.4}, cv_roc_auc={:.4} (+/- {:.4})",
        model.name(),
        metrics["test_roc_auc"],
        metrics["test_accuracy"],
        cv_mean,
        cv_std
    );

    Ok(Evaluation {
        metrics,
        confusion_matrix,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accuracy_precision_recall() {
        let y_true = [1, 0, 1, 1, 0, 0];
        let y_pred = [1, 0, 0, 1, 1, 0];

        assert!((accuracy(&y_true, &y_pred).unwrap() - 4.0 / 6.0).abs() < 1e-12);
        assert!((precision(&y_true, &y_pred).unwrap() - 2.0 / 3.0).abs() < 1e-12);
        assert!((recall(&y_true, &y_pred).unwrap() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_precision_without_positive_predictions_is_zero() {
        assert_eq!(precision(&[1, 0], &[0, 0]).unwrap(), 0.0);
        assert_eq!(recall(&[0, 0], &[0, 1]).unwrap(), 0.0);
    }

    #[test]
    fn test_length_mismatch_is_error() {
        assert!(accuracy(&[1, 0], &[1]).is_err());
    }

    #[test]
    fn test_roc_auc_known_values() {
        // sklearn 文件範例
        let y = [0, 0, 1, 1];
        let scores = [0.1, 0.4, 0.35, 0.8];
        assert!((roc_auc(&y, &scores).unwrap() - 0.75).abs() < 1e-12);

        assert_eq!(roc_auc(&[0, 1], &[0.2, 0.9]).unwrap(), 1.0);
        assert_eq!(roc_auc(&[0, 1], &[0.9, 0.2]).unwrap(), 0.0);
        // 全部同分 → 0.5
        assert_eq!(roc_auc(&[0, 1, 0, 1], &[0.5; 4]).unwrap(), 0.5);
    }

    #[test]
    fn test_roc_auc_single_class_is_error() {
        assert!(roc_auc(&[1, 1], &[0.2, 0.3]).is_err());
    }

    #[test]
    fn test_confusion_matrix_layout() {
        let cm = ConfusionMatrix::compute(&[0, 0, 1, 1, 1], &[0, 1, 0, 1, 1]).unwrap();
        assert_eq!(cm.as_matrix(), [[1, 1], [1, 2]]);
    }

    #[test]
    fn test_stratified_k_fold_covers_every_sample_once() {
        let y: Vec<u8> = (0..23).map(|i| u8::from(i % 3 == 0)).collect();
        let folds = stratified_k_fold(&y, 5, true, 42).unwrap();
        assert_eq!(folds.len(), 5);

        let mut seen = vec![0; y.len()];
        for (train, test) in &folds {
            assert_eq!(train.len() + test.len(), y.len());
            assert!(test.iter().any(|&i| y[i] == 1));
            for &i in test {
                seen[i] += 1;
            }
        }
        assert!(seen.iter().all(|&c| c == 1));
    }

    #[test]
    fn test_stratified_k_fold_rejects_too_many_splits() {
        assert!(stratified_k_fold(&[0, 1, 0], 5, false, 0).is_err());
        assert!(stratified_k_fold(&[0, 1, 0], 1, false, 0).is_err());
    }

    #[test]
    fn test_mean_std_population() {
        let (mean, std) = mean_std(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(mean, 2.5);
        assert!((std - 1.25f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_evaluate_model_reports_every_metric() {
        use crate::core::models::LogisticRegression;

        let x = Array2::from_shape_fn((40, 2), |(i, j)| {
            let base = if i % 2 == 0 { -1.0 } else { 1.0 };
            base + (i as f64 * 0.37 + j as f64).sin() * 0.8
        });
        let y: Vec<u8> = (0..40).map(|i| u8::from(i % 2 == 1)).collect();
        let x_train = x.slice(ndarray::s![..30, ..]).to_owned();
        let x_test = x.slice(ndarray::s![30.., ..]).to_owned();

        let mut model = LogisticRegression::default();
        let evaluation =
            evaluate_model(&mut model, &x_train, &y[..30], &x_test, &y[30..], 5, 42).unwrap();

        for key in [
            "train_accuracy",
            "train_precision",
            "train_recall",
            "train_roc_auc",
            "test_accuracy",
            "test_precision",
            "test_recall",
            "test_roc_auc",
            "cv_roc_auc_mean",
            "cv_roc_auc_std",
        ] {
            let value = evaluation.metrics[key];
            assert!((0.0..=1.0).contains(&value), "{} = {}", key, value);
        }
        let cm = evaluation.confusion_matrix;
        assert_eq!(cm.tn + cm.fp + cm.fn_ + cm.tp, 10);
        assert!(model.fitted);
    }
}
