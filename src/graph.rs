//! Triplet store: an immutable view of a knowledge graph's edges.
//!
//! A graph is a set of directed labeled edges (head, tail, relation) over
//! dense integer ids. Besides the edge list itself, the store precomputes
//! the indices the sampler and mask builder need:
//! - membership set for O(1) `contains` checks,
//! - (head, relation) -> tails and (tail, relation) -> heads adjacency,
//!   so filtering a candidate row costs O(candidates), not a scan of the
//!   full edge list.

use candle_core::Tensor;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{LinkPredError, Result};

/// Dense node identifier.
pub type NodeId = usize;
/// Dense relation identifier.
pub type RelationId = usize;

/// A directed labeled edge (head, tail, relation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Triplet {
    pub head: NodeId,
    pub tail: NodeId,
    pub relation: RelationId,
}

impl Triplet {
    pub fn new(head: NodeId, tail: NodeId, relation: RelationId) -> Self {
        Self {
            head,
            tail,
            relation,
        }
    }
}

/// Immutable triplet store with adjacency indices.
pub struct KnowledgeGraph {
    triplets: Vec<Triplet>,
    num_nodes: usize,
    num_relations: usize,
    edge_set: FxHashSet<(NodeId, NodeId, RelationId)>,
    tails_by_head_rel: FxHashMap<(NodeId, RelationId), Vec<NodeId>>,
    heads_by_tail_rel: FxHashMap<(NodeId, RelationId), Vec<NodeId>>,
    /// Precomputed relation features [num_relations, rel_dim], supplied by
    /// the dataset. Its width parameterizes the scoring model.
    rel_emb: Option<Tensor>,
}

impl KnowledgeGraph {
    /// Build a graph from an edge list.
    ///
    /// Every node id must be `< num_nodes` and every relation id
    /// `< num_relations`.
    pub fn new(triplets: Vec<Triplet>, num_nodes: usize, num_relations: usize) -> Result<Self> {
        let mut edge_set = FxHashSet::default();
        let mut tails_by_head_rel: FxHashMap<(NodeId, RelationId), Vec<NodeId>> =
            FxHashMap::default();
        let mut heads_by_tail_rel: FxHashMap<(NodeId, RelationId), Vec<NodeId>> =
            FxHashMap::default();

        for t in &triplets {
            if t.head >= num_nodes || t.tail >= num_nodes {
                return Err(LinkPredError::Graph(format!(
                    "node id out of range in ({}, {}, {}): num_nodes = {}",
                    t.head, t.tail, t.relation, num_nodes
                )));
            }
            if t.relation >= num_relations {
                return Err(LinkPredError::Graph(format!(
                    "relation id {} out of range: num_relations = {}",
                    t.relation, num_relations
                )));
            }
            if edge_set.insert((t.head, t.tail, t.relation)) {
                tails_by_head_rel
                    .entry((t.head, t.relation))
                    .or_default()
                    .push(t.tail);
                heads_by_tail_rel
                    .entry((t.tail, t.relation))
                    .or_default()
                    .push(t.head);
            }
        }

        Ok(Self {
            triplets,
            num_nodes,
            num_relations,
            edge_set,
            tails_by_head_rel,
            heads_by_tail_rel,
            rel_emb: None,
        })
    }

    /// Build a graph from parallel edge arrays, the dataset-facing layout:
    /// `heads[i] -> tails[i]` labeled `edge_types[i]`.
    pub fn from_edges(
        heads: &[NodeId],
        tails: &[NodeId],
        edge_types: &[RelationId],
        num_nodes: usize,
        num_relations: usize,
    ) -> Result<Self> {
        if heads.len() != tails.len() || heads.len() != edge_types.len() {
            return Err(LinkPredError::Graph(format!(
                "edge arrays disagree on length: {} heads, {} tails, {} types",
                heads.len(),
                tails.len(),
                edge_types.len()
            )));
        }
        let triplets = heads
            .iter()
            .zip(tails)
            .zip(edge_types)
            .map(|((&h, &t), &r)| Triplet::new(h, t, r))
            .collect();
        Self::new(triplets, num_nodes, num_relations)
    }

    /// Attach a precomputed relation-feature matrix [num_relations, rel_dim].
    pub fn with_rel_emb(mut self, rel_emb: Tensor) -> Result<Self> {
        let (rows, _) = rel_emb.dims2()?;
        if rows != self.num_relations {
            return Err(LinkPredError::ShapeMismatch {
                expected: format!("[{}, rel_dim]", self.num_relations),
                got: format!("{:?}", rel_emb.dims()),
            });
        }
        self.rel_emb = Some(rel_emb);
        Ok(self)
    }

    pub fn num_triplets(&self) -> usize {
        self.triplets.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn num_relations(&self) -> usize {
        self.num_relations
    }

    pub fn triplet(&self, index: usize) -> Triplet {
        self.triplets[index]
    }

    pub fn triplets(&self) -> &[Triplet] {
        &self.triplets
    }

    pub fn rel_emb(&self) -> Option<&Tensor> {
        self.rel_emb.as_ref()
    }

    /// Whether (head, tail, relation) is a known true edge.
    pub fn contains(&self, head: NodeId, tail: NodeId, relation: RelationId) -> bool {
        self.edge_set.contains(&(head, tail, relation))
    }

    /// All true tails for a (head, relation) pair.
    pub fn tails_of(&self, head: NodeId, relation: RelationId) -> &[NodeId] {
        self.tails_by_head_rel
            .get(&(head, relation))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// All true heads for a (tail, relation) pair.
    pub fn heads_of(&self, tail: NodeId, relation: RelationId) -> &[NodeId] {
        self.heads_by_tail_rel
            .get(&(tail, relation))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}
