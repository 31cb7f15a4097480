use crate::domain::ports::Classifier;
use crate::utils::error::{Result, RiskError};
use ndarray::{Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaxFeatures {
    Sqrt,
    Log2,
    All,
}

impl MaxFeatures {
    pub fn resolve(&self, n_features: usize) -> usize {
        let k = match self {
            MaxFeatures::Sqrt => (n_features as f64).sqrt() as usize,
            MaxFeatures::Log2 => (n_features as f64).log2() as usize,
            MaxFeatures::All => n_features,
        };
        k.clamp(1, n_features.max(1))
    }

    fn as_str(&self) -> &'static str {
        match self {
            MaxFeatures::Sqrt => "sqrt",
            MaxFeatures::Log2 => "log2",
            MaxFeatures::All => "all",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomForestParams {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
    pub random_state: u64,
    /// -1 uses every core, 1 grows trees sequentially.
    pub n_jobs: i32,
}

impl Default for RandomForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: Some(10),
            min_samples_split: 5,
            min_samples_leaf: 2,
            max_features: MaxFeatures::Sqrt,
            bootstrap: true,
            random_state: 42,
            n_jobs: -1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TreeNode {
    Leaf {
        /// Fraction of class 1 among the node's samples.
        proba: f64,
        samples: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// CART tree stored as a flat node arena; node 0 is the root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

struct TreeBuilder<'a> {
    x: &'a Array2<f64>,
    y: &'a [u8],
    params: &'a RandomForestParams,
    max_features: usize,
    rng: StdRng,
    nodes: Vec<TreeNode>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    impurity: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

fn gini(positives: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let p = positives as f64 / total as f64;
    2.0 * p * (1.0 - p)
}

impl<'a> TreeBuilder<'a> {
    fn leaf(&mut self, samples: &[usize]) -> usize {
        let positives = samples.iter().filter(|&&i| self.y[i] == 1).count();
        self.nodes.push(TreeNode::Leaf {
            proba: positives as f64 / samples.len().max(1) as f64,
            samples: samples.len(),
        });
        self.nodes.len() - 1
    }

    fn build(&mut self, samples: Vec<usize>, depth: usize) -> usize {
        let positives = samples.iter().filter(|&&i| self.y[i] == 1).count();
        let depth_reached = self.params.max_depth.is_some_and(|max| depth >= max);

        if depth_reached
            || samples.len() < self.params.min_samples_split
            || samples.len() < 2 * self.params.min_samples_leaf
            || positives == 0
            || positives == samples.len()
        {
            return self.leaf(&samples);
        }

        let parent_impurity = gini(positives, samples.len());
        let Some(split) = self.best_split(&samples) else {
            return self.leaf(&samples);
        };
        if split.impurity >= parent_impurity - 1e-12 {
            return self.leaf(&samples);
        }

        // 先佔位，子節點建好後回填
        let index = self.nodes.len();
        self.nodes.push(TreeNode::Leaf {
            proba: 0.0,
            samples: 0,
        });
        let left = self.build(split.left, depth + 1);
        let right = self.build(split.right, depth + 1);
        self.nodes[index] = TreeNode::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        index
    }

    fn best_split(&mut self, samples: &[usize]) -> Option<BestSplit> {
        let n_features = self.x.ncols();
        let candidates = rand::seq::index::sample(&mut self.rng, n_features, self.max_features);
        let min_leaf = self.params.min_samples_leaf;
        let total = samples.len();
        let total_pos = samples.iter().filter(|&&i| self.y[i] == 1).count();

        let mut best: Option<(usize, f64, f64, usize)> = None;
        let mut sorted = samples.to_vec();

        for feature in candidates.iter() {
            sorted.sort_by(|&a, &b| self.x[[a, feature]].total_cmp(&self.x[[b, feature]]));

            let mut left_pos = 0;
            for pos in 0..total - 1 {
                if self.y[sorted[pos]] == 1 {
                    left_pos += 1;
                }
                let left_n = pos + 1;
                let right_n = total - left_n;
                if left_n < min_leaf || right_n < min_leaf {
                    continue;
                }
                let current = self.x[[sorted[pos], feature]];
                let next = self.x[[sorted[pos + 1], feature]];
                if current == next {
                    continue;
                }

                let impurity = (left_n as f64 * gini(left_pos, left_n)
                    + right_n as f64 * gini(total_pos - left_pos, right_n))
                    / total as f64;
                if best.map_or(true, |(_, _, best_impurity, _)| impurity < best_impurity) {
                    best = Some((feature, (current + next) / 2.0, impurity, left_n));
                }
            }
        }

        let (feature, threshold, impurity, _) = best?;
        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .iter()
            .partition(|&&i| self.x[[i, feature]] <= threshold);
        Some(BestSplit {
            feature,
            threshold,
            impurity,
            left,
            right,
        })
    }
}

impl DecisionTree {
    fn grow(x: &Array2<f64>, y: &[u8], params: &RandomForestParams, seed: u64) -> Self {
        let n = x.nrows();
        let mut rng = StdRng::seed_from_u64(seed);
        let samples: Vec<usize> = if params.bootstrap {
            (0..n).map(|_| rng.random_range(0..n)).collect()
        } else {
            (0..n).collect()
        };

        let mut builder = TreeBuilder {
            x,
            y,
            params,
            max_features: params.max_features.resolve(x.ncols()),
            rng,
            nodes: Vec::new(),
        };
        builder.build(samples, 0);
        DecisionTree {
            nodes: builder.nodes,
        }
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                TreeNode::Leaf { proba, .. } => return *proba,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    /// 檢查從檔案載入的樹：子節點索引必須往後指且在範圍內
    pub fn validate(&self, n_features: usize) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(RiskError::model("decision tree has no nodes"));
        }
        for (index, node) in self.nodes.iter().enumerate() {
            match node {
                TreeNode::Leaf { proba, .. } => {
                    if !(0.0..=1.0).contains(proba) {
                        return Err(RiskError::model(format!(
                            "node {} has leaf probability {}",
                            index, proba
                        )));
                    }
                }
                TreeNode::Split {
                    feature,
                    left,
                    right,
                    ..
                } => {
                    if *feature >= n_features {
                        return Err(RiskError::model(format!(
                            "node {} splits on feature {} but the model has {} features",
                            index, feature, n_features
                        )));
                    }
                    for child in [*left, *right] {
                        if child <= index || child >= self.nodes.len() {
                            return Err(RiskError::model(format!(
                                "node {} points to invalid child {}",
                                index, child
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[TreeNode], index: usize) -> usize {
            match &nodes[index] {
                TreeNode::Leaf { .. } => 0,
                TreeNode::Split { left, right, .. } => {
                    1 + walk(nodes, *left).max(walk(nodes, *right))
                }
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }
}

/// Bagged ensemble of CART trees; the predicted probability is the mean of
/// the per-tree leaf fractions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RandomForest {
    pub params: RandomForestParams,
    pub trees: Vec<DecisionTree>,
    pub n_features: usize,
}

impl RandomForest {
    pub fn new(params: RandomForestParams) -> Self {
        Self {
            params,
            ..Default::default()
        }
    }

    /// A persisted forest must have trees whose nodes stay inside the arena
    /// and split only on known features; otherwise prediction would index
    /// out of bounds.
    pub fn validate(&self) -> Result<()> {
        if self.trees.is_empty() {
            return Err(RiskError::model("RandomForest has no trees"));
        }
        for (index, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features)
                .map_err(|e| RiskError::model(format!("tree {}: {}", index, e)))?;
        }
        Ok(())
    }

    /// 每棵樹的種子只由 random_state 與索引決定，與執行緒排程無關
    fn tree_seed(&self, index: usize) -> u64 {
        self.params
            .random_state
            .wrapping_add((index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }
}

impl Classifier for RandomForest {
    fn name(&self) -> &'static str {
        "RandomForest"
    }

    fn fit(&mut self, x: &Array2<f64>, y: &[u8]) -> Result<()> {
        if x.nrows() != y.len() {
            return Err(RiskError::ValidationError {
                message: format!("{} rows but {} labels", x.nrows(), y.len()),
            });
        }
        if x.nrows() == 0 {
            return Err(RiskError::model("RandomForest needs at least one sample"));
        }
        if self.params.n_estimators == 0 {
            return Err(RiskError::model("n_estimators must be positive"));
        }

        let params = &self.params;
        let grow = |t: usize| DecisionTree::grow(x, y, params, self.tree_seed(t));
        let n_trees = params.n_estimators;

        let trees: Vec<DecisionTree> = match params.n_jobs {
            1 => (0..n_trees).map(grow).collect(),
            n if n > 1 => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(n as usize)
                    .build()
                    .map_err(|e| RiskError::model(format!("thread pool: {}", e)))?;
                pool.install(|| (0..n_trees).into_par_iter().map(grow).collect::<Vec<_>>())
            }
            _ => (0..n_trees).into_par_iter().map(grow).collect(),
        };

        tracing::debug!(
            "RandomForest grew {} trees (max depth {})",
            trees.len(),
            trees.iter().map(DecisionTree::depth).max().unwrap_or(0)
        );
        self.trees = trees;
        self.n_features = x.ncols();
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Vec<f64>> {
        if self.trees.is_empty() {
            return Err(RiskError::not_fitted("RandomForest"));
        }
        if x.ncols() != self.n_features {
            return Err(RiskError::ValidationError {
                message: format!(
                    "RandomForest expects {} features, got {}",
                    self.n_features,
                    x.ncols()
                ),
            });
        }
        let n_trees = self.trees.len() as f64;
        Ok(x.rows()
            .into_iter()
            .map(|row| self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / n_trees)
            .collect())
    }

    fn params(&self) -> BTreeMap<String, String> {
        let p = &self.params;
        BTreeMap::from([
            ("n_estimators".to_string(), p.n_estimators.to_string()),
            (
                "max_depth".to_string(),
                p.max_depth.map_or("None".to_string(), |d| d.to_string()),
            ),
            ("min_samples_split".to_string(), p.min_samples_split.to_string()),
            ("min_samples_leaf".to_string(), p.min_samples_leaf.to_string()),
            ("max_features".to_string(), p.max_features.as_str().to_string()),
            ("bootstrap".to_string(), p.bootstrap.to_string()),
            ("random_state".to_string(), p.random_state.to_string()),
            ("n_jobs".to_string(), p.n_jobs.to_string()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs(n: usize) -> (Array2<f64>, Vec<u8>) {
        let mut rng = StdRng::seed_from_u64(7);
        let y: Vec<u8> = (0..n).map(|i| (i % 2) as u8).collect();
        let x = Array2::from_shape_fn((n, 4), |(i, j)| {
            let shift = if y[i] == 1 { 2.0 } else { -2.0 };
            let noise: f64 = rng.random_range(-1.0..1.0);
            if j < 2 {
                shift + noise
            } else {
                noise
            }
        });
        (x, y)
    }

    fn small_params() -> RandomForestParams {
        RandomForestParams {
            n_estimators: 15,
            max_depth: Some(5),
            ..Default::default()
        }
    }

    #[test]
    fn test_forest_learns_separable_blobs() {
        let (x, y) = blobs(60);
        let mut forest = RandomForest::new(small_params());
        forest.fit(&x, &y).unwrap();

        let predictions = forest.predict(&x).unwrap();
        let correct = predictions.iter().zip(&y).filter(|(p, t)| p == t).count();
        assert!(correct >= 57);

        let proba = forest.predict_proba(&x).unwrap();
        assert!(proba.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_forest_is_deterministic_across_thread_counts() {
        let (x, y) = blobs(40);
        let mut parallel = RandomForest::new(small_params());
        parallel.fit(&x, &y).unwrap();

        let mut sequential = RandomForest::new(RandomForestParams {
            n_jobs: 1,
            ..small_params()
        });
        sequential.fit(&x, &y).unwrap();

        assert_eq!(
            parallel.predict_proba(&x).unwrap(),
            sequential.predict_proba(&x).unwrap()
        );
    }

    #[test]
    fn test_trees_respect_max_depth() {
        let (x, y) = blobs(80);
        let mut forest = RandomForest::new(RandomForestParams {
            n_estimators: 5,
            max_depth: Some(2),
            ..Default::default()
        });
        forest.fit(&x, &y).unwrap();
        assert!(forest.trees.iter().all(|t| t.depth() <= 2));
    }

    #[test]
    fn test_single_class_gives_constant_probability() {
        let x = Array2::from_shape_fn((6, 2), |(i, j)| (i + j) as f64);
        let mut forest = RandomForest::new(small_params());
        forest.fit(&x, &[1; 6]).unwrap();
        assert!(forest.predict_proba(&x).unwrap().iter().all(|&p| p == 1.0));
    }

    #[test]
    fn test_max_features_resolution() {
        assert_eq!(MaxFeatures::Sqrt.resolve(13), 3);
        assert_eq!(MaxFeatures::Log2.resolve(13), 3);
        assert_eq!(MaxFeatures::All.resolve(13), 13);
        assert_eq!(MaxFeatures::Sqrt.resolve(1), 1);
    }

    #[test]
    fn test_fitted_forest_passes_validation() {
        let (x, y) = blobs(40);
        let mut forest = RandomForest::new(small_params());
        forest.fit(&x, &y).unwrap();
        assert!(forest.validate().is_ok());
    }

    fn forest_with(nodes: Vec<TreeNode>) -> RandomForest {
        RandomForest {
            params: RandomForestParams::default(),
            trees: vec![DecisionTree { nodes }],
            n_features: 13,
        }
    }

    #[test]
    fn test_validate_rejects_damaged_trees() {
        // 特徵索引超出範圍、子節點越界
        let bad_feature = forest_with(vec![TreeNode::Split {
            feature: 99,
            threshold: 0.0,
            left: 5,
            right: 6,
        }]);
        assert!(bad_feature.validate().is_err());

        let dangling = forest_with(vec![
            TreeNode::Split {
                feature: 0,
                threshold: 0.0,
                left: 1,
                right: 2,
            },
            TreeNode::Leaf {
                proba: 0.5,
                samples: 3,
            },
        ]);
        assert!(dangling.validate().is_err());

        // 指回自己會無限迴圈
        let cycle = forest_with(vec![
            TreeNode::Split {
                feature: 0,
                threshold: 0.0,
                left: 0,
                right: 1,
            },
            TreeNode::Leaf {
                proba: 0.5,
                samples: 3,
            },
        ]);
        assert!(cycle.validate().is_err());

        assert!(forest_with(Vec::new()).validate().is_err());
        assert!(RandomForest::default().validate().is_err());
    }

    #[test]
    fn test_unfitted_forest_fails() {
        let forest = RandomForest::default();
        assert!(forest.predict_proba(&Array2::zeros((1, 2))).is_err());
    }
}
