//! Rank computation from score matrices.
//!
//! The rank of a query is 1 + the number of valid negatives scoring at
//! least as high as the positive. Ties count as beating the positive, a
//! deliberate conservative tie-break: a model scoring everything equal gets
//! the worst rank, not the best.

use candle_core::{DType, Tensor};

use crate::error::Result;

/// Compute one rank per query.
///
/// `pred` is the [B, C] score matrix, `pos_index` the [B] (U32) candidate
/// index of each query's positive, `mask` an optional [B, C] (U8) filter
/// with the positive position set to 1.
///
/// The count is self-inclusive: the positive compares `>=` against itself
/// and its mask entry is 1, so its own position contributes exactly the
/// "1 +" of the rank definition. With every negative masked out the rank
/// degenerates to 1.
pub fn compute_ranking(
    pred: &Tensor,
    pos_index: &Tensor,
    mask: Option<&Tensor>,
) -> Result<Tensor> {
    let pos_pred = pred.gather(&pos_index.unsqueeze(1)?, 1)?; // [B, 1]
    let geq = pred.broadcast_ge(&pos_pred)?.to_dtype(DType::I64)?; // [B, C]
    let counted = match mask {
        Some(m) => (geq * m.to_dtype(DType::I64)?)?,
        None => geq,
    };
    Ok(counted.sum(1)?)
}

/// Per-query count of valid negatives: the popcount of each mask row
/// (the retained positive included, matching the rank's self-inclusive
/// convention). Needed by the subsampled Hits@K estimator.
pub fn num_negatives(mask: &Tensor) -> Result<Tensor> {
    Ok(mask.to_dtype(DType::I64)?.sum(1)?)
}
