//! Linkpred driver: train and evaluate on a TSV triple file.
//!
//! Usage: linkpred <triples.tsv> [num_epoch] [output_dir]
//!
//! The file holds one `head<TAB>relation<TAB>tail` triple per line. The
//! last tenth of the (shuffled) triples is held out for validation; the
//! full edge set serves as the filter reference.

use std::collections::HashMap;
use std::env;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use candle_core::Device;
use tracing::info;

use linkpred::{
    evaluate, train_and_validate, DistMult, KnowledgeGraph, Result, SingleProcess, TrainConfig,
    Triplet, WorkerContext,
};

/// Load a TSV triple file, interning entity and relation names to dense
/// ids. Returns the triples plus the vocabulary sizes.
fn load_triples(path: &str) -> std::io::Result<(Vec<Triplet>, usize, usize)> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut entity_ids: HashMap<String, usize> = HashMap::new();
    let mut relation_ids: HashMap<String, usize> = HashMap::new();
    let mut triplets = Vec::new();

    for line in reader.lines() {
        let line = line?;
        let mut parts = line.split('\t');
        let (Some(head), Some(rel), Some(tail)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };

        let next_id = entity_ids.len();
        let head_id = *entity_ids.entry(head.to_string()).or_insert(next_id);
        let next_id = entity_ids.len();
        let tail_id = *entity_ids.entry(tail.to_string()).or_insert(next_id);
        let next_id = relation_ids.len();
        let rel_id = *relation_ids.entry(rel.to_string()).or_insert(next_id);

        triplets.push(Triplet::new(head_id, tail_id, rel_id));
    }

    Ok((triplets, entity_ids.len(), relation_ids.len()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("usage: linkpred <triples.tsv> [num_epoch] [output_dir]");
        std::process::exit(1);
    }
    let num_epoch: usize = args
        .get(2)
        .map(|s| s.parse())
        .transpose()
        .map_err(|_| linkpred::LinkPredError::Config("num_epoch must be an integer".into()))?
        .unwrap_or(10);
    let output_dir: PathBuf = args
        .get(3)
        .map(PathBuf::from)
        .unwrap_or_else(env::temp_dir);
    std::fs::create_dir_all(&output_dir)?;

    let (triplets, num_nodes, num_relations) = load_triples(&args[1])?;
    if triplets.is_empty() {
        return Err(linkpred::LinkPredError::Config(format!(
            "no triples found in {}",
            args[1]
        )));
    }
    info!(
        "loaded {} triples, {} entities, {} relations",
        triplets.len(),
        num_nodes,
        num_relations
    );

    let cfg = TrainConfig::default()
        .with_num_epoch(num_epoch)
        .with_metrics(&["mr", "mrr", "hits@1", "hits@3", "hits@10"])?;
    let ctx = WorkerContext::single(cfg.seed, Device::Cpu);
    let comm = SingleProcess;

    // hold out the last tenth for validation; filter against everything
    let holdout = (triplets.len() / 10).max(1).min(triplets.len());
    let split = triplets.len() - holdout;
    let train_graph =
        KnowledgeGraph::new(triplets[..split].to_vec(), num_nodes, num_relations)?;
    let valid_graph =
        KnowledgeGraph::new(triplets[split..].to_vec(), num_nodes, num_relations)?;
    let filtered = KnowledgeGraph::new(triplets, num_nodes, num_relations)?;

    let model = DistMult::new(&train_graph, 64, &ctx.device)?;

    train_and_validate(
        &cfg,
        &ctx,
        &comm,
        &model,
        &train_graph,
        &valid_graph,
        Some(&filtered),
        &output_dir,
    )?;

    info!("final evaluation on valid");
    let result = evaluate(&cfg, &ctx, &comm, &model, &valid_graph, Some(&filtered))?;
    info!("best model mrr: {:.6}", result.mrr);
    Ok(())
}
