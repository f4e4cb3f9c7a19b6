//! Bagged regression trees (random forest)
//!
//! CART trees split on squared-error reduction. Each tree sees a bootstrap
//! sample of the rows and a random subset of features at every split.
//! Training is fully determined by the seed.

use crate::config::ModelConfig;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    pub fn predict(&self, x: &[f64]) -> f64 {
        let mut i = 0;
        loop {
            match &self.nodes[i] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    i = if x[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], i: usize) -> usize {
            match &nodes[i] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

struct TreeBuilder<'a> {
    x: &'a [Vec<f64>],
    y: &'a [f64],
    config: &'a ModelConfig,
    n_features: usize,
    features_per_split: usize,
    nodes: Vec<Node>,
    importances: Vec<f64>,
}

fn mean(y: &[f64], rows: &[usize]) -> f64 {
    rows.iter().map(|&i| y[i]).sum::<f64>() / rows.len() as f64
}

/// Sum of squared errors around the mean
fn sse(y: &[f64], rows: &[usize]) -> f64 {
    let m = mean(y, rows);
    rows.iter().map(|&i| (y[i] - m).powi(2)).sum()
}

impl<'a> TreeBuilder<'a> {
    fn grow(&mut self, rows: Vec<usize>, depth: usize, rng: &mut StdRng) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: mean(self.y, &rows),
        });

        if depth >= self.config.max_depth || rows.len() < self.config.min_samples_split {
            return id;
        }
        let Some(split) = self.best_split(&rows, rng) else {
            return id;
        };

        self.importances[split.feature] += split.gain;
        let left = self.grow(split.left, depth + 1, rng);
        let right = self.grow(split.right, depth + 1, rng);
        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }

    fn best_split(&self, rows: &[usize], rng: &mut StdRng) -> Option<SplitCandidate> {
        let parent = sse(self.y, rows);
        if parent <= f64::EPSILON {
            return None;
        }
        let min_leaf = self.config.min_samples_leaf.max(1);
        let n = rows.len();
        let total: f64 = rows.iter().map(|&i| self.y[i]).sum();
        let total_sq: f64 = rows.iter().map(|&i| self.y[i].powi(2)).sum();

        let mut best: Option<(usize, f64, f64)> = None;
        for feature in index::sample(rng, self.n_features, self.features_per_split) {
            let mut sorted = rows.to_vec();
            sorted.sort_by(|&a, &b| self.x[a][feature].total_cmp(&self.x[b][feature]));

            let (mut left_sum, mut left_sq) = (0.0, 0.0);
            for k in 0..n - 1 {
                let yi = self.y[sorted[k]];
                left_sum += yi;
                left_sq += yi * yi;

                let n_left = k + 1;
                let n_right = n - n_left;
                let here = self.x[sorted[k]][feature];
                let next = self.x[sorted[k + 1]][feature];
                if n_left < min_leaf || n_right < min_leaf || here == next {
                    continue;
                }

                let right_sum = total - left_sum;
                let right_sq = total_sq - left_sq;
                let children = (left_sq - left_sum * left_sum / n_left as f64)
                    + (right_sq - right_sum * right_sum / n_right as f64);
                let gain = parent - children;
                if gain > best.map(|b| b.2).unwrap_or(0.0) {
                    best = Some((feature, (here + next) / 2.0, gain));
                }
            }
        }

        let (feature, threshold, gain) = best?;
        let (left, right): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .copied()
            .partition(|&i| self.x[i][feature] <= threshold);
        Some(SplitCandidate {
            feature,
            threshold,
            gain,
            left,
            right,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
    importances: Vec<f64>,
}

impl RandomForest {
    /// `x` is row-major; every row must have the same width. Caller
    /// guarantees at least one row.
    pub fn fit(x: &[Vec<f64>], y: &[f64], config: &ModelConfig) -> Self {
        let n_rows = x.len();
        let n_features = x.first().map(|r| r.len()).unwrap_or(0);
        let features_per_split =
            ((n_features as f64 * config.feature_fraction).ceil() as usize).clamp(1, n_features.max(1));

        let mut importances = vec![0.0; n_features];
        let mut trees = Vec::with_capacity(config.n_trees);

        for t in 0..config.n_trees {
            let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(t as u64));
            let sample: Vec<usize> = (0..n_rows).map(|_| rng.gen_range(0..n_rows)).collect();

            let mut builder = TreeBuilder {
                x,
                y,
                config,
                n_features,
                features_per_split,
                nodes: Vec::new(),
                importances: vec![0.0; n_features],
            };
            if n_features > 0 {
                builder.grow(sample, 0, &mut rng);
            } else {
                builder.nodes.push(Node::Leaf {
                    value: mean(y, &sample),
                });
            }

            for (acc, v) in importances.iter_mut().zip(&builder.importances) {
                *acc += v;
            }
            trees.push(RegressionTree {
                nodes: builder.nodes,
            });
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for v in importances.iter_mut() {
                *v /= total;
            }
        }

        Self {
            trees,
            importances,
        }
    }

    pub fn predict(&self, x: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|t| t.predict(x)).sum::<f64>() / self.trees.len() as f64
    }

    /// Normalized impurity decrease per feature (sums to 1 unless no split happened)
    pub fn importances(&self) -> &[f64] {
        &self.importances
    }

    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }
}
