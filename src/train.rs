//! Training and evaluation loop.
//!
//! Epochs are grouped into blocks of `ceil(num_epoch / 10)`. After each
//! block the coordinator writes a checkpoint (bracketed by a barrier so no
//! worker reads a half-written file), every worker runs a full evaluation
//! pass, and the block's MRR is compared against the running best under
//! strict `>`; ties keep the earlier block. After the last block the best
//! block's checkpoint is reloaded, so the returned model matches the best
//! validation score rather than the most recent epoch.
//!
//! The per-batch loss is a weighted binary cross-entropy with logits
//! against a target of 1 at the positive column and 0 elsewhere. Negative
//! weights are uniform 1/N at temperature 0, or a detached softmax of the
//! negative scores at positive temperature (self-adversarial weighting).
//!
//! Data-parallel gradient averaging between workers is the surrounding
//! runtime's contract, not re-implemented here.

use std::path::Path;

use candle_core::{DType, Tensor, Var};
use candle_nn::ops::softmax;
use candle_nn::optim::{AdamW, Optimizer, ParamsAdamW, SGD};
use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::checkpoint::{checkpoint_path, load_checkpoint, save_checkpoint};
use crate::comm::{gather_ordered, shard_indices, Collective, WorkerContext};
use crate::error::{LinkPredError, Result};
use crate::graph::{KnowledgeGraph, Triplet};
use crate::mask::strict_negative_mask;
use crate::metrics::{Metric, MetricSpec, RankScope};
use crate::model::ScoringModel;
use crate::ranking::{compute_ranking, num_negatives};
use crate::sampling::{all_negative, negative_sampling};

/// Optimizer selection with its keyword parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OptimizerChoice {
    Sgd { lr: f64 },
    AdamW { lr: f64, weight_decay: f64 },
}

impl OptimizerChoice {
    pub fn build(&self, vars: Vec<Var>) -> Result<OptimizerKind> {
        match *self {
            OptimizerChoice::Sgd { lr } => Ok(OptimizerKind::Sgd(SGD::new(vars, lr)?)),
            OptimizerChoice::AdamW { lr, weight_decay } => Ok(OptimizerKind::AdamW(AdamW::new(
                vars,
                ParamsAdamW {
                    lr,
                    weight_decay,
                    ..Default::default()
                },
            )?)),
        }
    }

    /// Scalar state persisted into checkpoints.
    pub fn state(&self) -> Vec<(String, f64)> {
        match *self {
            OptimizerChoice::Sgd { lr } => vec![("lr".to_string(), lr)],
            OptimizerChoice::AdamW { lr, weight_decay } => vec![
                ("lr".to_string(), lr),
                ("weight_decay".to_string(), weight_decay),
            ],
        }
    }
}

/// Either optimizer behind one `backward_step`.
pub enum OptimizerKind {
    Sgd(SGD),
    AdamW(AdamW),
}

impl OptimizerKind {
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        match self {
            OptimizerKind::Sgd(opt) => opt.backward_step(loss)?,
            OptimizerKind::AdamW(opt) => opt.backward_step(loss)?,
        }
        Ok(())
    }
}

/// Training/evaluation configuration.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    /// Total number of training epochs.
    pub num_epoch: usize,
    /// Mini-batch size (the last batch of a shard may be shorter).
    pub batch_size: usize,
    /// Optional cap on batches per epoch.
    pub batch_per_epoch: Option<usize>,
    /// Log the loss every this many batches (0 disables).
    pub log_interval: usize,
    /// Negatives per positive in training.
    pub num_negative: usize,
    /// Reject corruptions that are themselves true edges.
    pub strict_negative: bool,
    /// 0 selects uniform negative weights, > 0 self-adversarial weighting.
    pub adversarial_temperature: f64,
    pub optimizer: OptimizerChoice,
    /// Metrics to report, parsed up front.
    pub metrics: Vec<MetricSpec>,
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            num_epoch: 10,
            batch_size: 64,
            batch_per_epoch: None,
            log_interval: 100,
            num_negative: 32,
            strict_negative: true,
            adversarial_temperature: 1.0,
            optimizer: OptimizerChoice::AdamW {
                lr: 5e-3,
                weight_decay: 0.0,
            },
            metrics: vec![
                MetricSpec::new(Metric::Mr, RankScope::Both),
                MetricSpec::new(Metric::Mrr, RankScope::Both),
                MetricSpec::new(Metric::HitsAt(1), RankScope::Both),
                MetricSpec::new(Metric::HitsAt(3), RankScope::Both),
                MetricSpec::new(Metric::HitsAt(10), RankScope::Both),
            ],
            seed: 1024,
        }
    }
}

impl TrainConfig {
    pub fn with_num_epoch(mut self, num_epoch: usize) -> Self {
        self.num_epoch = num_epoch;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_batch_per_epoch(mut self, cap: Option<usize>) -> Self {
        self.batch_per_epoch = cap;
        self
    }

    pub fn with_num_negative(mut self, num_negative: usize) -> Self {
        self.num_negative = num_negative;
        self
    }

    pub fn with_strict_negative(mut self, strict: bool) -> Self {
        self.strict_negative = strict;
        self
    }

    pub fn with_adversarial_temperature(mut self, temperature: f64) -> Self {
        self.adversarial_temperature = temperature;
        self
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerChoice) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Parse and install the metric list; any malformed or unsupported name
    /// fails here, before training starts.
    pub fn with_metrics(mut self, names: &[&str]) -> Result<Self> {
        self.metrics = names
            .iter()
            .map(|n| MetricSpec::parse(n))
            .collect::<Result<Vec<_>>>()?;
        Ok(self)
    }
}

/// Best-block tracker: strictly greater MRR wins, ties keep the earlier
/// epoch.
#[derive(Debug, Clone, Copy)]
pub struct BestEpoch {
    result: f64,
    epoch: usize,
}

impl BestEpoch {
    pub fn new() -> Self {
        Self {
            result: f64::NEG_INFINITY,
            epoch: 0,
        }
    }

    /// Record an evaluation; returns true when it becomes the new best.
    pub fn update(&mut self, epoch: usize, mrr: f64) -> bool {
        if mrr > self.result {
            self.result = mrr;
            self.epoch = epoch;
            true
        } else {
            false
        }
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn result(&self) -> f64 {
        self.result
    }
}

impl Default for BestEpoch {
    fn default() -> Self {
        Self::new()
    }
}

/// Weighted binary cross-entropy with logits over a [B, N+1] score matrix
/// whose column 0 holds the positive.
pub fn nll_loss(pred: &Tensor, adversarial_temperature: f64) -> Result<Tensor> {
    let (b, c) = pred.dims2()?;
    if c < 2 {
        return Err(LinkPredError::Config(
            "loss needs at least one negative column".into(),
        ));
    }
    let n_neg = c - 1;
    let device = pred.device();

    let target = Tensor::cat(
        &[
            Tensor::ones((b, 1), DType::F32, device)?,
            Tensor::zeros((b, n_neg), DType::F32, device)?,
        ],
        1,
    )?;

    // elementwise stable form: max(x, 0) - x*y + log(1 + exp(-|x|))
    let loss = ((pred.relu()? - (pred * &target)?)?
        + (pred.abs()?.neg()?.exp()? + 1.0)?.log()?)?;

    let neg_weight = if adversarial_temperature > 0.0 {
        let scaled = (pred.narrow(1, 1, n_neg)? / adversarial_temperature)?;
        softmax(&scaled, 1)?.detach()
    } else {
        Tensor::full(1.0f32 / n_neg as f32, (b, n_neg), device)?
    };
    let weight = Tensor::cat(
        &[Tensor::ones((b, 1), DType::F32, device)?, neg_weight],
        1,
    )?;

    let weighted = (loss * &weight)?.sum(1)?;
    let norm = weight.sum(1)?;
    Ok((weighted / norm)?.mean_all()?)
}

/// One evaluation pass, returned to every worker.
#[derive(Debug, Clone)]
pub struct EvalResult {
    /// MRR over the combined aggregate; the model-selection criterion.
    pub mrr: f64,
    /// Requested metrics, populated on the coordinator only.
    pub metrics: IndexMap<String, f64>,
}

fn cat_or_empty(parts: &[Tensor], ctx: &WorkerContext) -> Result<Tensor> {
    if parts.is_empty() {
        Ok(Tensor::from_vec(Vec::<i64>::new(), (0,), &ctx.device)?)
    } else {
        Ok(Tensor::cat(parts, 0)?)
    }
}

/// Exhaustive filtered evaluation of `eval_graph`, sharded across workers.
///
/// Every query is ranked under both corruption sides; the per-worker
/// (ranking, num_negatives) vectors, combined and tail-only, are merged
/// through the sum-reduce aggregation protocol, and the coordinator
/// computes and logs the requested metrics. Workers with an empty shard
/// still participate in every collective call.
pub fn evaluate(
    cfg: &TrainConfig,
    ctx: &WorkerContext,
    comm: &dyn Collective,
    model: &dyn ScoringModel,
    eval_graph: &KnowledgeGraph,
    filtered: Option<&KnowledgeGraph>,
) -> Result<EvalResult> {
    if cfg.batch_size == 0 {
        return Err(LinkPredError::Config("batch_size must be >= 1".into()));
    }
    let indices = shard_indices(
        eval_graph.num_triplets(),
        ctx.world_size,
        ctx.rank,
        ctx.seed,
        0,
    );
    let reference = filtered.unwrap_or(eval_graph);

    let mut rankings: Vec<Tensor> = Vec::new();
    let mut num_negs: Vec<Tensor> = Vec::new();
    let mut tail_rankings: Vec<Tensor> = Vec::new();
    let mut tail_num_negs: Vec<Tensor> = Vec::new();

    for chunk in indices.chunks(cfg.batch_size) {
        let batch: Vec<Triplet> = chunk.iter().map(|&j| eval_graph.triplet(j)).collect();
        let (t_batch, h_batch) = all_negative(eval_graph, &batch, &ctx.device)?;
        let t_pred = model.score(eval_graph, &t_batch)?;
        let h_pred = model.score(eval_graph, &h_batch)?;

        let (t_mask, h_mask) = strict_negative_mask(reference, &batch, &ctx.device)?;
        let pos_t = Tensor::from_vec(
            batch.iter().map(|t| t.tail as u32).collect::<Vec<_>>(),
            (batch.len(),),
            &ctx.device,
        )?;
        let pos_h = Tensor::from_vec(
            batch.iter().map(|t| t.head as u32).collect::<Vec<_>>(),
            (batch.len(),),
            &ctx.device,
        )?;

        let t_ranking = compute_ranking(&t_pred, &pos_t, Some(&t_mask))?;
        let h_ranking = compute_ranking(&h_pred, &pos_h, Some(&h_mask))?;
        let num_t = num_negatives(&t_mask)?;
        let num_h = num_negatives(&h_mask)?;

        tail_rankings.push(t_ranking.clone());
        tail_num_negs.push(num_t.clone());
        rankings.push(t_ranking);
        rankings.push(h_ranking);
        num_negs.push(num_t);
        num_negs.push(num_h);
    }

    let ranking = cat_or_empty(&rankings, ctx)?;
    let num_negative = cat_or_empty(&num_negs, ctx)?;
    let tail_ranking = cat_or_empty(&tail_rankings, ctx)?;
    let tail_num_negative = cat_or_empty(&tail_num_negs, ctx)?;

    // same collective order on every worker
    let all_ranking = gather_ordered(comm, &ranking)?.to_vec1::<i64>()?;
    let all_num_negative = gather_ordered(comm, &num_negative)?.to_vec1::<i64>()?;
    let all_ranking_t = gather_ordered(comm, &tail_ranking)?.to_vec1::<i64>()?;
    let all_num_negative_t = gather_ordered(comm, &tail_num_negative)?.to_vec1::<i64>()?;

    let mut metrics = IndexMap::new();
    if ctx.is_coordinator() {
        for spec in &cfg.metrics {
            let (ranks, negs) = match spec.scope() {
                RankScope::Both => (&all_ranking, &all_num_negative),
                RankScope::TailOnly => (&all_ranking_t, &all_num_negative_t),
            };
            let score = spec.compute(ranks, negs);
            info!("{spec}: {score:.6}");
            metrics.insert(spec.name().to_string(), score);
        }
    }

    let mrr = MetricSpec::new(Metric::Mrr, RankScope::Both).compute(&all_ranking, &all_num_negative);
    Ok(EvalResult { mrr, metrics })
}

/// Train with periodic evaluation and best-checkpoint selection.
///
/// On return the model holds the parameters of the block whose validation
/// MRR was best, not the most recent ones.
pub fn train_and_validate(
    cfg: &TrainConfig,
    ctx: &WorkerContext,
    comm: &dyn Collective,
    model: &dyn ScoringModel,
    train_graph: &KnowledgeGraph,
    valid_graph: &KnowledgeGraph,
    filtered: Option<&KnowledgeGraph>,
    output_dir: &Path,
) -> Result<()> {
    if cfg.num_epoch == 0 {
        return Ok(());
    }
    if cfg.batch_size == 0 {
        return Err(LinkPredError::Config("batch_size must be >= 1".into()));
    }

    let mut optimizer = cfg.optimizer.build(model.parameters())?;
    if ctx.is_coordinator() {
        info!("number of parameters: {}", model.num_parameters());
    }

    let step = cfg.num_epoch.div_ceil(10);
    let mut best = BestEpoch::new();
    // per-worker sampling stream, decorrelated by rank
    let mut rng = StdRng::seed_from_u64(cfg.seed.wrapping_add(ctx.rank as u64));
    let mut batch_id = 0usize;

    let mut block_start = 0;
    while block_start < cfg.num_epoch {
        let block_end = (block_start + step).min(cfg.num_epoch);
        for epoch in block_start..block_end {
            if ctx.is_coordinator() {
                info!("epoch {epoch} begin");
            }
            let indices = shard_indices(
                train_graph.num_triplets(),
                ctx.world_size,
                ctx.rank,
                cfg.seed,
                epoch as u64,
            );
            let mut losses: Vec<f32> = Vec::new();
            let cap = cfg.batch_per_epoch.unwrap_or(usize::MAX);
            for chunk in indices.chunks(cfg.batch_size).take(cap) {
                let batch: Vec<Triplet> =
                    chunk.iter().map(|&j| train_graph.triplet(j)).collect();
                let expanded = negative_sampling(
                    train_graph,
                    &batch,
                    cfg.num_negative,
                    cfg.strict_negative,
                    &mut rng,
                    &ctx.device,
                )?;
                let pred = model.score(train_graph, &expanded)?;
                let loss = nll_loss(&pred, cfg.adversarial_temperature)?;
                optimizer.backward_step(&loss)?;

                let loss_value = loss.to_scalar::<f32>()?;
                if ctx.is_coordinator()
                    && cfg.log_interval > 0
                    && batch_id % cfg.log_interval == 0
                {
                    info!("binary cross entropy: {loss_value:.6}");
                }
                losses.push(loss_value);
                batch_id += 1;
            }
            if ctx.is_coordinator() && !losses.is_empty() {
                let avg = losses.iter().sum::<f32>() / losses.len() as f32;
                info!("epoch {epoch} end, average binary cross entropy: {avg:.6}");
            }
        }

        let ckpt = checkpoint_path(output_dir, block_end);
        if ctx.is_coordinator() {
            info!("save checkpoint to {}", ckpt.display());
            save_checkpoint(&ckpt, model, &cfg.optimizer.state())?;
        }
        // no worker may read the checkpoint, or race ahead into
        // evaluation, before the write completes
        comm.barrier()?;

        if ctx.is_coordinator() {
            info!("evaluate on valid");
        }
        let result = evaluate(cfg, ctx, comm, model, valid_graph, filtered)?;
        if best.update(block_end, result.mrr) && ctx.is_coordinator() {
            info!("new best mrr {:.6} at epoch {}", result.mrr, block_end);
        }
        block_start = block_end;
    }

    let best_ckpt = checkpoint_path(output_dir, best.epoch());
    if ctx.is_coordinator() {
        info!("load checkpoint from {}", best_ckpt.display());
    }
    load_checkpoint(&best_ckpt, model, &ctx.device)?;
    comm.barrier()?;
    Ok(())
}
