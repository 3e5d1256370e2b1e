//! Gradient-boosted regression trees predicting net margin from value-chain features.

use crate::domain::model::{MarginRecord, ModelReport};
use crate::utils::error::{EtlError, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

pub const FEATURE_NAMES: [&str; 5] = [
    "price_farm",
    "price_retail",
    "distance_to_market_km",
    "road_density",
    "storage_availability",
];

pub const TARGET_NAME: &str = "net_margin";

pub type Features = [f64; 5];

pub fn features_of(record: &MarginRecord) -> Features {
    [
        record.price_farm,
        record.price_retail,
        record.distance_to_market_km,
        record.road_density,
        f64::from(record.storage_availability),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub test_fraction: f64,
    pub seed: u64,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 3,
            test_fraction: 0.25,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn predict(&self, x: &Features) -> f64 {
        let mut node = self;
        loop {
            match node {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if x[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            Node::Leaf { .. } => 0,
            Node::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    sse: f64,
}

/// Exhaustive search over midpoints between distinct sorted values.
fn best_split(xs: &[Features], residuals: &[f64], indices: &[usize]) -> Option<BestSplit> {
    let n = indices.len();
    let total: f64 = indices.iter().map(|&i| residuals[i]).sum();
    let total_sq: f64 = indices.iter().map(|&i| residuals[i].powi(2)).sum();
    let mut best: Option<BestSplit> = None;

    for feature in 0..FEATURE_NAMES.len() {
        let mut order = indices.to_vec();
        order.sort_by(|&a, &b| xs[a][feature].total_cmp(&xs[b][feature]));

        let (mut left_sum, mut left_sq) = (0.0, 0.0);
        for k in 0..n - 1 {
            let r = residuals[order[k]];
            left_sum += r;
            left_sq += r * r;

            let here = xs[order[k]][feature];
            let next = xs[order[k + 1]][feature];
            if here == next {
                continue;
            }

            let (nl, nr) = ((k + 1) as f64, (n - k - 1) as f64);
            let right_sum = total - left_sum;
            let right_sq = total_sq - left_sq;
            let sse = (left_sq - left_sum * left_sum / nl) + (right_sq - right_sum * right_sum / nr);

            if best.as_ref().map_or(true, |b| sse < b.sse) {
                best = Some(BestSplit {
                    feature,
                    threshold: (here + next) / 2.0,
                    sse,
                });
            }
        }
    }
    best
}

fn grow(xs: &[Features], residuals: &[f64], indices: &[usize], depth: usize) -> Node {
    let value = mean(indices.iter().map(|&i| residuals[i]));
    let sse: f64 = indices.iter().map(|&i| (residuals[i] - value).powi(2)).sum();
    if depth == 0 || indices.len() < 2 || sse <= f64::EPSILON {
        return Node::Leaf { value };
    }

    let Some(split) = best_split(xs, residuals, indices) else {
        return Node::Leaf { value };
    };
    let (left, right): (Vec<usize>, Vec<usize>) = indices
        .iter()
        .copied()
        .partition(|&i| xs[i][split.feature] <= split.threshold);

    Node::Split {
        feature: split.feature,
        threshold: split.threshold,
        left: Box::new(grow(xs, residuals, &left, depth - 1)),
        right: Box::new(grow(xs, residuals, &right, depth - 1)),
    }
}

/// Squared-error gradient boosting: start from the mean, add shrunken trees fitted to residuals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostingRegressor {
    pub feature_names: Vec<String>,
    pub learning_rate: f64,
    pub init: f64,
    pub trees: Vec<Node>,
}

impl GradientBoostingRegressor {
    pub fn fit(xs: &[Features], ys: &[f64], params: &ModelParams) -> Result<Self> {
        if xs.is_empty() || xs.len() != ys.len() {
            return Err(EtlError::ModelError {
                message: format!("cannot fit on {} rows with {} targets", xs.len(), ys.len()),
            });
        }

        let init = mean(ys.iter().copied());
        let mut predictions = vec![init; ys.len()];
        let indices: Vec<usize> = (0..xs.len()).collect();
        let mut trees = Vec::with_capacity(params.n_estimators);

        for _ in 0..params.n_estimators {
            let residuals: Vec<f64> = ys.iter().zip(&predictions).map(|(y, p)| y - p).collect();
            let tree = grow(xs, &residuals, &indices, params.max_depth);
            for (p, x) in predictions.iter_mut().zip(xs) {
                *p += params.learning_rate * tree.predict(x);
            }
            trees.push(tree);
        }

        Ok(Self {
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            learning_rate: params.learning_rate,
            init,
            trees,
        })
    }

    pub fn predict_one(&self, x: &Features) -> f64 {
        self.init
            + self
                .trees
                .iter()
                .map(|t| self.learning_rate * t.predict(x))
                .sum::<f64>()
    }

    pub fn predict(&self, xs: &[Features]) -> Vec<f64> {
        xs.iter().map(|x| self.predict_one(x)).collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        let model: Self = serde_json::from_slice(data)?;
        if model.feature_names != FEATURE_NAMES {
            return Err(EtlError::ModelError {
                message: format!("unexpected model features: {:?}", model.feature_names),
            });
        }
        Ok(model)
    }
}

pub fn rmse(actual: &[f64], predicted: &[f64]) -> f64 {
    let n = actual.len().min(predicted.len());
    if n == 0 {
        return 0.0;
    }
    let sum: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    (sum / n as f64).sqrt()
}

/// Shuffled (train, test) row indices. The test part has `ceil(fraction * n)` rows, leaving at least one for training.
pub fn train_test_split(n: usize, test_fraction: f64, seed: u64) -> Result<(Vec<usize>, Vec<usize>)> {
    if n < 2 {
        return Err(EtlError::ModelError {
            message: format!("need at least 2 rows to train, got {}", n),
        });
    }
    let n_test = ((test_fraction * n as f64).ceil() as usize).clamp(1, n - 1);

    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));
    let train = indices.split_off(n_test);
    Ok((train, indices))
}

pub fn train(margins: &[MarginRecord], params: &ModelParams) -> Result<(GradientBoostingRegressor, ModelReport)> {
    let (train_idx, test_idx) = train_test_split(margins.len(), params.test_fraction, params.seed)?;

    let pick = |idx: &[usize]| -> (Vec<Features>, Vec<f64>) {
        idx.iter()
            .map(|&i| (features_of(&margins[i]), margins[i].net_margin))
            .unzip()
    };
    let (x_train, y_train) = pick(&train_idx);
    let (x_test, y_test) = pick(&test_idx);

    let model = GradientBoostingRegressor::fit(&x_train, &y_train, params)?;
    let report = ModelReport {
        rmse: rmse(&y_test, &model.predict(&x_test)),
        n_train: x_train.len(),
        n_test: x_test.len(),
        feature_names: model.feature_names.clone(),
        target: TARGET_NAME.to_string(),
    };

    tracing::info!(
        "🤖 Trained model on {} rows, RMSE {:.4} on {} held-out rows",
        report.n_train,
        report.rmse,
        report.n_test
    );
    Ok((model, report))
}
