//! Scoring boundary: the trait the training/evaluation engine calls, plus a
//! bilinear reference implementation.
//!
//! The engine never looks inside a model; it hands over a graph and an
//! expanded batch and gets back a score matrix. Model errors (shape
//! mismatches and the like) propagate unchanged: they are programmer
//! errors, not recoverable conditions.

use candle_core::{DType, Device, Tensor, Var};

use crate::error::Result;
use crate::graph::KnowledgeGraph;
use crate::sampling::ExpandedBatch;

/// A ranking-score function over expanded batches.
///
/// `score` must accept both the sampled shape [B, N+1, 3] and the
/// exhaustive shape [B, num_nodes, 3], returning [B, C] scores. The call is
/// a pure boundary: no engine-visible state changes.
pub trait ScoringModel: Send + Sync {
    fn score(&self, graph: &KnowledgeGraph, batch: &ExpandedBatch) -> Result<Tensor>;

    /// Learnable parameters with stable names, for optimizers and
    /// checkpoints.
    fn named_parameters(&self) -> Vec<(String, Var)>;

    fn parameters(&self) -> Vec<Var> {
        self.named_parameters().into_iter().map(|(_, v)| v).collect()
    }

    fn num_parameters(&self) -> usize {
        self.named_parameters()
            .iter()
            .map(|(_, v)| v.as_tensor().elem_count())
            .sum()
    }
}

/// Bilinear (DistMult-style) scorer: score(h, r, t) = Σ_d h_d · r_d · t_d.
///
/// Entity embeddings are learned directly. Relation vectors are projected
/// from the graph's precomputed relation features through a learned map, so
/// the feature dimensionality parameterizes the model; a graph without
/// features falls back to one-hot relation identities.
pub struct DistMult {
    entity: Var,
    rel_proj: Var,
    rel_feat: Tensor,
}

impl DistMult {
    pub fn new(graph: &KnowledgeGraph, dim: usize, device: &Device) -> Result<Self> {
        // unit-norm random entity rows
        let emb = Tensor::randn(0.0f32, 1.0, (graph.num_nodes(), dim), device)?;
        let norms = emb.sqr()?.sum(1)?.sqrt()?.unsqueeze(1)?;
        let entity = Var::from_tensor(&emb.broadcast_div(&norms)?)?;

        let rel_feat = match graph.rel_emb() {
            Some(emb) => emb.to_device(device)?,
            None => Tensor::eye(graph.num_relations(), DType::F32, device)?,
        };
        let rel_dim = rel_feat.dim(1)?;
        let scale = (1.0 / rel_dim as f64).sqrt() as f32;
        let rel_proj =
            Var::from_tensor(&Tensor::randn(0.0f32, scale, (rel_dim, dim), device)?)?;

        Ok(Self {
            entity,
            rel_proj,
            rel_feat,
        })
    }
}

impl ScoringModel for DistMult {
    fn score(&self, _graph: &KnowledgeGraph, batch: &ExpandedBatch) -> Result<Tensor> {
        let b = batch.batch_size();
        let c = batch.num_candidates();

        let heads = batch.heads()?.flatten_all()?;
        let tails = batch.tails()?.flatten_all()?;
        let relations = batch.relations()?.flatten_all()?;

        let entity = self.entity.as_tensor();
        let h_emb = entity.index_select(&heads, 0)?; // [B*C, d]
        let t_emb = entity.index_select(&tails, 0)?;
        let rel_table = self.rel_feat.matmul(self.rel_proj.as_tensor())?; // [R, d]
        let r_emb = rel_table.index_select(&relations, 0)?;

        let scores = ((h_emb * r_emb)? * t_emb)?.sum(1)?; // [B*C]
        Ok(scores.reshape((b, c))?)
    }

    fn named_parameters(&self) -> Vec<(String, Var)> {
        vec![
            ("entity".to_string(), self.entity.clone()),
            ("rel_proj".to_string(), self.rel_proj.clone()),
        ]
    }
}
