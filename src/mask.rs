//! Filter masks for strict ("filtered") negative candidates.
//!
//! A candidate completion is a usable negative only if substituting it does
//! not reproduce a known true edge. The one exception is the query's own
//! positive, which is always kept valid at its true position so that the
//! rank computation can compare the positive against itself.

use candle_core::{Device, Tensor};

use crate::error::Result;
use crate::graph::{KnowledgeGraph, Triplet};

/// Build per-side filter masks for a batch, shape [B, num_nodes] (U8).
///
/// `reference` is the edge set to filter against: the evaluation split
/// itself for raw-ish filtering, or a combined all-splits graph for the
/// standard filtered protocol. Returns `(t_mask, h_mask)` where a 1 marks a
/// candidate tail (resp. head) that is a usable negative.
///
/// Each row costs O(num_nodes + degree) via the reference's adjacency
/// index.
pub fn strict_negative_mask(
    reference: &KnowledgeGraph,
    batch: &[Triplet],
    device: &Device,
) -> Result<(Tensor, Tensor)> {
    let n = reference.num_nodes();
    let b = batch.len();

    let mut t_flat: Vec<u8> = Vec::with_capacity(b * n);
    let mut h_flat: Vec<u8> = Vec::with_capacity(b * n);
    for pos in batch {
        let mut row = vec![1u8; n];
        for &t in reference.tails_of(pos.head, pos.relation) {
            row[t] = 0;
        }
        // the query's own positive stays valid
        row[pos.tail] = 1;
        t_flat.extend_from_slice(&row);

        let mut row = vec![1u8; n];
        for &h in reference.heads_of(pos.tail, pos.relation) {
            row[h] = 0;
        }
        row[pos.head] = 1;
        h_flat.extend_from_slice(&row);
    }

    Ok((
        Tensor::from_vec(t_flat, (b, n), device)?,
        Tensor::from_vec(h_flat, (b, n), device)?,
    ))
}
