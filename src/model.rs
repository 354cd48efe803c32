//! Statistical classifier port and the isolation-forest artifact backing it.
//!
//! The pipeline talks to the trained model only through [`AnomalyModel`]:
//! a fixed-order feature vector in, a [`ModelVerdict`] out. The concrete
//! implementation, [`ForestModel`], loads a JSON artifact produced by the
//! offline training job: the pre-fit standard-scaler parameters and the
//! isolation-forest trees. Inference applies the artifact's own scaling
//! transform, averages per-tree path lengths, and converts the result to the
//! standard isolation-forest anomaly score `2^(-E[h]/c(n))`.
//!
//! A missing or unreadable artifact is not fatal: the service falls back to
//! [`NullModel`], which answers `NoOpinion` so rule-based classification
//! keeps working on its own.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

// ---

/// Binary verdict of the statistical stage, with an explicit third state for
/// "the model has nothing to say" (unavailable, erroring, or timed out).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelVerdict {
    Normal,
    Anomalous,
    NoOpinion,
}

/// Port over an externally trained anomaly model.
///
/// Implementations must be safe to call from many ingestion tasks at once.
/// Errors are reported, not panicked; the engine degrades them to
/// [`ModelVerdict::NoOpinion`].
#[async_trait]
pub trait AnomalyModel: Send + Sync {
    async fn classify(&self, features: [f64; 4]) -> Result<ModelVerdict>;

    /// Whether a real artifact is backing this port (for `/health`).
    fn is_loaded(&self) -> bool;
}

/// Stand-in used when no artifact is available at startup.
pub struct NullModel;

#[async_trait]
impl AnomalyModel for NullModel {
    async fn classify(&self, _features: [f64; 4]) -> Result<ModelVerdict> {
        // ---
        Ok(ModelVerdict::NoOpinion)
    }

    fn is_loaded(&self) -> bool {
        false
    }
}

// ---

/// Euler–Mascheroni constant, used in the average-path-length estimate.
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Pre-fit standard-scaler parameters persisted alongside the trees.
/// Inference must use the exact transform the forest was trained with.
#[derive(Debug, Deserialize)]
struct Scaler {
    mean: [f64; 4],
    scale: [f64; 4],
}

impl Scaler {
    fn transform(&self, features: [f64; 4]) -> [f64; 4] {
        // ---
        let mut scaled = [0.0; 4];
        for i in 0..4 {
            scaled[i] = (features[i] - self.mean[i]) / self.scale[i];
        }
        scaled
    }
}

/// One node of an isolation tree. Leaves carry the size of the training
/// partition they terminated with.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: f64,
    },
}

#[derive(Debug, Deserialize)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    /// Path length from the root to the leaf isolating `features`, plus the
    /// unbuilt-subtree adjustment `c(leaf_size)`.
    fn path_length(&self, features: &[f64; 4]) -> f64 {
        // ---
        let mut index = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[index] {
                Node::Leaf { size } => return depth + average_path_length(*size),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if features[*feature] < *threshold {
                        *left
                    } else {
                        *right
                    };
                    depth += 1.0;
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct Artifact {
    scaler: Scaler,
    trees: Vec<Tree>,
    /// Sub-sample size each tree was grown on; normalizes the score.
    sample_size: f64,
    /// Scores at or above this are anomalous (the training job's stand-in
    /// for sklearn's -1/1 sentinel).
    score_threshold: f64,
}

/// Isolation forest loaded from a trained artifact.
pub struct ForestModel {
    artifact: Artifact,
}

impl ForestModel {
    /// Load and validate an artifact from disk.
    pub fn load(path: &Path) -> Result<Self> {
        // ---
        let bytes = fs::read(path)
            .with_context(|| format!("failed to read model artifact {}", path.display()))?;
        Self::from_slice(&bytes)
    }

    fn from_slice(bytes: &[u8]) -> Result<Self> {
        // ---
        let artifact: Artifact =
            serde_json::from_slice(bytes).context("model artifact is not valid JSON")?;

        if artifact.trees.is_empty() {
            bail!("model artifact contains no trees");
        }
        if artifact.sample_size < 2.0 {
            bail!("model artifact sample_size must be at least 2");
        }
        if artifact.scaler.scale.iter().any(|s| *s == 0.0) {
            bail!("model artifact scaler has a zero scale component");
        }
        // Child indices and split features must be in bounds so inference can
        // traverse without checks.
        for tree in &artifact.trees {
            for node in &tree.nodes {
                if let Node::Split {
                    feature,
                    left,
                    right,
                    ..
                } = node
                {
                    if *feature >= 4 || *left >= tree.nodes.len() || *right >= tree.nodes.len() {
                        bail!("model artifact contains an out-of-bounds tree node");
                    }
                }
            }
        }

        Ok(ForestModel { artifact })
    }

    /// Anomaly score in (0, 1]: higher means easier to isolate.
    fn score(&self, features: [f64; 4]) -> f64 {
        // ---
        let scaled = self.artifact.scaler.transform(features);
        let total: f64 = self
            .artifact
            .trees
            .iter()
            .map(|tree| tree.path_length(&scaled))
            .sum();
        let mean_path = total / self.artifact.trees.len() as f64;
        2f64.powf(-mean_path / average_path_length(self.artifact.sample_size))
    }
}

#[async_trait]
impl AnomalyModel for ForestModel {
    async fn classify(&self, features: [f64; 4]) -> Result<ModelVerdict> {
        // ---
        if self.score(features) >= self.artifact.score_threshold {
            Ok(ModelVerdict::Anomalous)
        } else {
            Ok(ModelVerdict::Normal)
        }
    }

    fn is_loaded(&self) -> bool {
        true
    }
}

/// Average path length of an unsuccessful BST search over `n` points:
/// `c(n) = 2 H(n-1) - 2 (n-1)/n`, with `H(i) ~ ln(i) + gamma`.
fn average_path_length(n: f64) -> f64 {
    // ---
    if n <= 1.0 {
        0.0
    } else {
        2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
    }
}
