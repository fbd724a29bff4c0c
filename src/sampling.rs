//! Negative sampling: corrupted candidate sets for batches of triplets.
//!
//! Two modes:
//! - sampled (training): each positive is expanded with `num_negative`
//!   corrupted endpoints drawn uniformly,
//! - exhaustive (evaluation): each positive is expanded against the entire
//!   node universe, once per corruption side.
//!
//! Corruption-side convention for the sampled mode: the first ⌊B/2⌋ queries
//! of a batch corrupt the tail, the remaining queries corrupt the head. The
//! evaluation mode corrupts both sides for every query. The two conventions
//! are intentionally asymmetric and must stay that way: unifying them would
//! change reported metrics.

use candle_core::{DType, Device, Tensor};
use rand::rngs::StdRng;
use rand::Rng;

use crate::error::{LinkPredError, Result};
use crate::graph::{KnowledgeGraph, Triplet};

/// A batch of queries expanded with candidate completions.
///
/// Shape [B, C, 3] (U32), last axis ordered (head, tail, relation). In
/// sampled mode C = num_negative + 1 and candidate column 0 holds the
/// positive; in exhaustive mode C = num_nodes and the positive sits at the
/// index of its true endpoint.
pub struct ExpandedBatch {
    triplets: Tensor,
}

impl ExpandedBatch {
    pub fn new(triplets: Tensor) -> Result<Self> {
        let (_, _, last) = triplets.dims3()?;
        if last != 3 || triplets.dtype() != DType::U32 {
            return Err(LinkPredError::ShapeMismatch {
                expected: "[B, C, 3] u32".to_string(),
                got: format!("{:?} {:?}", triplets.dims(), triplets.dtype()),
            });
        }
        Ok(Self { triplets })
    }

    pub fn batch_size(&self) -> usize {
        self.triplets.dims3().map(|(b, _, _)| b).unwrap_or(0)
    }

    pub fn num_candidates(&self) -> usize {
        self.triplets.dims3().map(|(_, c, _)| c).unwrap_or(0)
    }

    /// The raw [B, C, 3] tensor.
    pub fn tensor(&self) -> &Tensor {
        &self.triplets
    }

    /// Head index per candidate, shape [B, C].
    pub fn heads(&self) -> Result<Tensor> {
        Ok(self.triplets.narrow(2, 0, 1)?.squeeze(2)?)
    }

    /// Tail index per candidate, shape [B, C].
    pub fn tails(&self) -> Result<Tensor> {
        Ok(self.triplets.narrow(2, 1, 1)?.squeeze(2)?)
    }

    /// Relation index per candidate, shape [B, C].
    pub fn relations(&self) -> Result<Tensor> {
        Ok(self.triplets.narrow(2, 2, 1)?.squeeze(2)?)
    }
}

/// Expand a training batch with sampled corruptions.
///
/// Draws are uniform with replacement, so the output width is always
/// `num_negative + 1`; when the node universe holds fewer than
/// `num_negative + 1` distinct candidates the draws simply repeat over the
/// full universe. With `strict`, a drawn candidate is never a known true
/// edge sharing the kept endpoint and relation (the positive included);
/// should every node be a true completion, the draw falls back to the full
/// universe.
///
/// Deterministic given the caller-seeded `rng`.
pub fn negative_sampling(
    graph: &KnowledgeGraph,
    batch: &[Triplet],
    num_negative: usize,
    strict: bool,
    rng: &mut StdRng,
    device: &Device,
) -> Result<ExpandedBatch> {
    let b = batch.len();
    let n = graph.num_nodes();
    let width = num_negative + 1;
    // first ⌊B/2⌋ rows corrupt tails, the rest corrupt heads
    let split = b / 2;

    let mut flat: Vec<u32> = Vec::with_capacity(b * width * 3);
    for (i, pos) in batch.iter().enumerate() {
        let corrupt_tail = i < split;
        flat.push(pos.head as u32);
        flat.push(pos.tail as u32);
        flat.push(pos.relation as u32);

        let valid: Option<Vec<u32>> = if strict {
            let candidates: Vec<u32> = (0..n)
                .filter(|&c| {
                    if corrupt_tail {
                        !graph.contains(pos.head, c, pos.relation)
                    } else {
                        !graph.contains(c, pos.tail, pos.relation)
                    }
                })
                .map(|c| c as u32)
                .collect();
            if candidates.is_empty() {
                None
            } else {
                Some(candidates)
            }
        } else {
            None
        };

        for _ in 0..num_negative {
            let corrupted = match &valid {
                Some(candidates) => candidates[rng.gen_range(0..candidates.len())],
                None => rng.gen_range(0..n) as u32,
            };
            if corrupt_tail {
                flat.push(pos.head as u32);
                flat.push(corrupted);
            } else {
                flat.push(corrupted);
                flat.push(pos.tail as u32);
            }
            flat.push(pos.relation as u32);
        }
    }

    ExpandedBatch::new(Tensor::from_vec(flat, (b, width, 3), device)?)
}

/// Expand an evaluation batch against the full node universe.
///
/// Returns `(t_batch, h_batch)`: every node substituted as tail and as
/// head, each of shape [B, num_nodes, 3].
pub fn all_negative(
    graph: &KnowledgeGraph,
    batch: &[Triplet],
    device: &Device,
) -> Result<(ExpandedBatch, ExpandedBatch)> {
    let b = batch.len();
    let n = graph.num_nodes();

    let mut t_flat: Vec<u32> = Vec::with_capacity(b * n * 3);
    let mut h_flat: Vec<u32> = Vec::with_capacity(b * n * 3);
    for pos in batch {
        for candidate in 0..n as u32 {
            t_flat.push(pos.head as u32);
            t_flat.push(candidate);
            t_flat.push(pos.relation as u32);

            h_flat.push(candidate);
            h_flat.push(pos.tail as u32);
            h_flat.push(pos.relation as u32);
        }
    }

    Ok((
        ExpandedBatch::new(Tensor::from_vec(t_flat, (b, n, 3), device)?)?,
        ExpandedBatch::new(Tensor::from_vec(h_flat, (b, n, 3), device)?)?,
    ))
}
