//! Linkpred: distributed link prediction for knowledge graph embeddings.
//!
//! Trains a relation-aware embedding model on (head, tail, relation)
//! triplets and evaluates it with the standard filtered ranking protocol
//! (MR, MRR, Hits@K), consistently across cooperating workers that each
//! see only a shard of the data.
//!
//! # Key Pieces
//!
//! - negative sampling against a triplet store, sampled for training and
//!   exhaustive for evaluation,
//! - filter masks that exclude known true edges from the negative pool
//!   while keeping each query's own positive,
//! - rank computation with a conservative tie-break (ties beat the
//!   positive),
//! - a variable-length cross-worker gather built from sum-reducing
//!   collectives alone,
//! - unbiased Hits@K estimation when only a negative subsample was scored,
//! - a block-structured training loop with best-checkpoint selection.

pub mod checkpoint;
pub mod comm;
pub mod error;
pub mod graph;
pub mod mask;
pub mod metrics;
pub mod model;
pub mod ranking;
pub mod sampling;
pub mod train;

pub use comm::{gather_ordered, shard_indices, Collective, LocalGroup, SingleProcess, WorkerContext};
pub use error::{LinkPredError, Result};
pub use graph::{KnowledgeGraph, NodeId, RelationId, Triplet};
pub use mask::strict_negative_mask;
pub use metrics::{Metric, MetricSpec, RankScope};
pub use model::{DistMult, ScoringModel};
pub use ranking::{compute_ranking, num_negatives};
pub use sampling::{all_negative, negative_sampling, ExpandedBatch};
pub use train::{
    evaluate, nll_loss, train_and_validate, BestEpoch, EvalResult, OptimizerChoice, TrainConfig,
};
