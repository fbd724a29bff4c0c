//! Ranking pipeline benchmark on a synthetic knowledge graph.
//!
//! Measures the filtered-evaluation hot path: exhaustive candidate
//! expansion, mask construction, and rank computation.
//!
//! Run with:
//!   cargo bench --bench ranking_bench

use candle_core::{Device, Tensor};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use linkpred::{
    all_negative, compute_ranking, strict_negative_mask, KnowledgeGraph, Triplet,
};

/// Build a synthetic graph: `num_nodes` nodes, a deterministic spread of
/// edges over `num_relations` relations.
fn synthetic_graph(num_nodes: usize, num_relations: usize, num_edges: usize) -> KnowledgeGraph {
    let mut triplets = Vec::with_capacity(num_edges);
    let mut state = 0x9e3779b9u64;
    for _ in 0..num_edges {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let head = (state >> 33) as usize % num_nodes;
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let tail = (state >> 33) as usize % num_nodes;
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let relation = (state >> 33) as usize % num_relations;
        triplets.push(Triplet::new(head, tail, relation));
    }
    KnowledgeGraph::new(triplets, num_nodes, num_relations).expect("valid synthetic graph")
}

fn bench_mask_builder(c: &mut Criterion) {
    let mut group = c.benchmark_group("strict_negative_mask");
    for num_nodes in [256usize, 1024] {
        let graph = synthetic_graph(num_nodes, 8, num_nodes * 4);
        let batch: Vec<Triplet> = graph.triplets()[..64.min(graph.num_triplets())].to_vec();
        group.bench_with_input(
            BenchmarkId::from_parameter(num_nodes),
            &num_nodes,
            |b, _| {
                b.iter(|| strict_negative_mask(&graph, &batch, &Device::Cpu).unwrap());
            },
        );
    }
    group.finish();
}

fn bench_ranking(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_ranking");
    for num_nodes in [256usize, 1024] {
        let graph = synthetic_graph(num_nodes, 8, num_nodes * 4);
        let batch: Vec<Triplet> = graph.triplets()[..64.min(graph.num_triplets())].to_vec();
        let pred = Tensor::randn(0.0f32, 1.0, (batch.len(), num_nodes), &Device::Cpu).unwrap();
        let (t_mask, _) = strict_negative_mask(&graph, &batch, &Device::Cpu).unwrap();
        let pos_t = Tensor::from_vec(
            batch.iter().map(|t| t.tail as u32).collect::<Vec<_>>(),
            (batch.len(),),
            &Device::Cpu,
        )
        .unwrap();
        group.bench_with_input(
            BenchmarkId::from_parameter(num_nodes),
            &num_nodes,
            |b, _| {
                b.iter(|| compute_ranking(&pred, &pos_t, Some(&t_mask)).unwrap());
            },
        );
    }
    group.finish();
}

fn bench_all_negative(c: &mut Criterion) {
    let mut group = c.benchmark_group("all_negative");
    for num_nodes in [256usize, 1024] {
        let graph = synthetic_graph(num_nodes, 8, num_nodes * 4);
        let batch: Vec<Triplet> = graph.triplets()[..32.min(graph.num_triplets())].to_vec();
        group.bench_with_input(
            BenchmarkId::from_parameter(num_nodes),
            &num_nodes,
            |b, _| {
                b.iter(|| all_negative(&graph, &batch, &Device::Cpu).unwrap());
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_mask_builder, bench_ranking, bench_all_negative);
criterion_main!(benches);
