//! Worker context, collective communication, and cross-worker aggregation.
//!
//! Every worker owns one [`WorkerContext`] for its lifetime; rank, world
//! size, seed and device are passed explicitly instead of read from ambient
//! globals. Cross-worker coordination happens only through blocking
//! sum-reducing collectives: every worker must reach the same collective
//! call in the same order, or the run deadlocks. That is a protocol
//! invariant with no in-band recovery.
//!
//! Variable-length gather is built from sum-reduction alone:
//! 1. each worker writes its local count into a zeroed world-size vector at
//!    its own rank index, then all-reduce-sums it,
//! 2. prefix sums give every worker the offset table,
//! 3. each worker writes its local values into a zeroed global-length
//!    vector at its own slice, then all-reduce-sums again.
//! The slices are disjoint and everything else is zero, so the sum
//! reconstructs the exact concatenation, ordered rank-ascending with local
//! order preserved. Zero padding is safe only because the reduction is a
//! sum, never a mean.

use std::sync::{Arc, Barrier, Mutex};

use candle_core::{DType, Device, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{LinkPredError, Result};

/// Per-worker context: explicit distributed identity plus the epoch-scoped
/// base seed and compute device.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub rank: usize,
    pub world_size: usize,
    pub seed: u64,
    pub device: Device,
}

impl WorkerContext {
    pub fn new(rank: usize, world_size: usize, seed: u64, device: Device) -> Result<Self> {
        if world_size == 0 {
            return Err(LinkPredError::Config("world_size must be >= 1".into()));
        }
        if rank >= world_size {
            return Err(LinkPredError::Config(format!(
                "rank {rank} >= world_size {world_size}"
            )));
        }
        Ok(Self {
            rank,
            world_size,
            seed,
            device,
        })
    }

    /// Single-worker context (rank 0 of 1).
    pub fn single(seed: u64, device: Device) -> Self {
        Self {
            rank: 0,
            world_size: 1,
            seed,
            device,
        }
    }

    pub fn is_coordinator(&self) -> bool {
        self.rank == 0
    }
}

/// Blocking sum-reducing collectives over candle tensors.
///
/// Payload values must be exactly representable as f64 (integers below
/// 2^53, or f32); the reduction is carried in f64.
pub trait Collective: Send + Sync {
    fn rank(&self) -> usize;
    fn world_size(&self) -> usize;
    /// Element-wise sum across all workers; every worker gets the result.
    fn all_reduce_sum(&self, tensor: &Tensor) -> Result<Tensor>;
    /// Block until every worker has arrived.
    fn barrier(&self) -> Result<()>;
}

/// Trivial backend for world size 1: all-reduce is the identity.
pub struct SingleProcess;

impl Collective for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn all_reduce_sum(&self, tensor: &Tensor) -> Result<Tensor> {
        Ok(tensor.clone())
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }
}

struct LocalGroupShared {
    world_size: usize,
    barrier: Barrier,
    accum: Mutex<Option<Vec<f64>>>,
}

/// In-process multi-worker group: one handle per worker thread, backed by a
/// shared accumulation buffer and a reusable barrier. Exercises the full
/// W-way protocol without spawning processes; intended for tests and
/// single-machine runs.
pub struct LocalGroup {
    rank: usize,
    shared: Arc<LocalGroupShared>,
}

impl LocalGroup {
    /// Create the handles for a `world_size`-worker group, one per rank.
    pub fn new_group(world_size: usize) -> Vec<LocalGroup> {
        let shared = Arc::new(LocalGroupShared {
            world_size,
            barrier: Barrier::new(world_size),
            accum: Mutex::new(None),
        });
        (0..world_size)
            .map(|rank| LocalGroup {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

impl Collective for LocalGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.shared.world_size
    }

    fn all_reduce_sum(&self, tensor: &Tensor) -> Result<Tensor> {
        let shape = tensor.dims().to_vec();
        let dtype = tensor.dtype();
        let local = tensor
            .to_dtype(DType::F64)?
            .flatten_all()?
            .to_vec1::<f64>()?;

        {
            let mut acc = self
                .shared
                .accum
                .lock()
                .expect("collective accumulator poisoned");
            match acc.as_mut() {
                Some(buf) => {
                    if buf.len() != local.len() {
                        return Err(LinkPredError::Protocol(format!(
                            "all_reduce length mismatch: {} vs {}",
                            buf.len(),
                            local.len()
                        )));
                    }
                    for (b, v) in buf.iter_mut().zip(&local) {
                        *b += v;
                    }
                }
                None => *acc = Some(local),
            }
        }

        // all deposited
        self.shared.barrier.wait();
        let summed = self
            .shared
            .accum
            .lock()
            .expect("collective accumulator poisoned")
            .clone()
            .ok_or_else(|| LinkPredError::Protocol("all_reduce buffer vanished".into()))?;
        // all read; leader resets for the next collective
        let token = self.shared.barrier.wait();
        if token.is_leader() {
            *self
                .shared
                .accum
                .lock()
                .expect("collective accumulator poisoned") = None;
        }
        self.shared.barrier.wait();

        Ok(Tensor::from_vec(summed, shape, tensor.device())?.to_dtype(dtype)?)
    }

    fn barrier(&self) -> Result<()> {
        self.shared.barrier.wait();
        Ok(())
    }
}

/// Merge per-worker vectors of unequal length into one global vector,
/// ordered by rank ascending with each worker's local order preserved.
///
/// Implements the zero-pad + sum-reduce protocol documented at the module
/// level. Every worker must call this the same number of times with the
/// same dtype; a worker with no local results passes an empty tensor.
pub fn gather_ordered(comm: &dyn Collective, local: &Tensor) -> Result<Tensor> {
    let world = comm.world_size();
    let rank = comm.rank();
    let device = local.device();
    let n = local.dim(0)?;

    // step 1: per-rank sizes via sum-reduction
    let mut sizes = vec![0i64; world];
    sizes[rank] = n as i64;
    let all_size = comm.all_reduce_sum(&Tensor::from_vec(sizes, (world,), device)?)?;
    let sizes = all_size.to_vec1::<i64>()?;

    // step 2: prefix-sum offsets
    let offset: i64 = sizes[..rank].iter().sum();
    let total: i64 = sizes.iter().sum();

    // step 3: zero-padded buffer with the local slice filled in
    let mut padded = vec![0i64; total as usize];
    let local_vals = local.to_dtype(DType::I64)?.to_vec1::<i64>()?;
    padded[offset as usize..offset as usize + local_vals.len()].copy_from_slice(&local_vals);

    // step 4: disjoint slices, so the sum is the concatenation
    let global = comm.all_reduce_sum(&Tensor::from_vec(padded, (total as usize,), device)?)?;
    Ok(global.to_dtype(local.dtype())?)
}

/// Deterministic shard of `0..num_items` for one worker.
///
/// All indices are shuffled with an epoch-scoped seed, then dealt out
/// rank-strided. Shards may be uneven (no padding, no duplication); the
/// aggregation protocol is what makes that safe. Every worker calling with
/// the same (seed, epoch) sees the same global permutation, which is the
/// per-worker batch-order determinism guarantee.
pub fn shard_indices(
    num_items: usize,
    world_size: usize,
    rank: usize,
    seed: u64,
    epoch: u64,
) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..num_items).collect();
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(epoch));
    indices.shuffle(&mut rng);
    indices.into_iter().skip(rank).step_by(world_size).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_single_worker_gather_is_identity() {
        let comm = SingleProcess;
        let local =
            Tensor::from_vec(vec![4i64, 1, 7, 2], (4,), &Device::Cpu).unwrap();
        let global = gather_ordered(&comm, &local).unwrap();
        assert_eq!(global.to_vec1::<i64>().unwrap(), vec![4, 1, 7, 2]);
    }

    /// Run gather_ordered over a W-way split of `values` on real threads.
    fn gather_split(values: &[i64], splits: Vec<Vec<i64>>) -> Vec<i64> {
        let world = splits.len();
        let handles = LocalGroup::new_group(world);
        let results: Vec<Vec<i64>> = thread::scope(|s| {
            let joins: Vec<_> = handles
                .into_iter()
                .zip(splits)
                .map(|(comm, shard)| {
                    s.spawn(move || {
                        let n = shard.len();
                        let local =
                            Tensor::from_vec(shard, (n,), &Device::Cpu).unwrap();
                        gather_ordered(&comm, &local)
                            .unwrap()
                            .to_vec1::<i64>()
                            .unwrap()
                    })
                })
                .collect();
            joins.into_iter().map(|j| j.join().unwrap()).collect()
        });
        // every rank must see the identical global vector
        for r in &results[1..] {
            assert_eq!(r, &results[0]);
        }
        assert_eq!(results[0].len(), values.len());
        results.into_iter().next().unwrap()
    }

    #[test]
    fn test_multiset_identical_across_world_sizes() {
        let values: Vec<i64> = (0..100).map(|i| (i * 31 + 7) % 97 + 1).collect();
        let mut expected_sorted = values.clone();
        expected_sorted.sort_unstable();

        for world in [1usize, 2, 5, 10] {
            let chunk = values.len() / world;
            let splits: Vec<Vec<i64>> = (0..world)
                .map(|r| values[r * chunk..(r + 1) * chunk].to_vec())
                .collect();
            let global = gather_split(&values, splits);
            // rank-ascending + local order preserved = original order here
            assert_eq!(global, values, "world = {world}");
            let mut sorted = global;
            sorted.sort_unstable();
            assert_eq!(sorted, expected_sorted, "world = {world}");
        }
    }

    #[test]
    fn test_uneven_shards_including_empty() {
        let splits = vec![vec![1i64, 2, 3, 4, 5], vec![6, 7, 8], vec![], vec![9, 10]];
        let values: Vec<i64> = (1..=10).collect();
        let global = gather_split(&values, splits);
        assert_eq!(global, values);
    }

    #[test]
    fn test_local_group_all_reduce_sums() {
        let handles = LocalGroup::new_group(3);
        let sums: Vec<Vec<i64>> = thread::scope(|s| {
            let joins: Vec<_> = handles
                .into_iter()
                .map(|comm| {
                    s.spawn(move || {
                        let rank = comm.rank() as i64;
                        let local = Tensor::from_vec(
                            vec![rank, 10 * rank],
                            (2,),
                            &Device::Cpu,
                        )
                        .unwrap();
                        // two consecutive collectives to exercise the reset
                        let first =
                            comm.all_reduce_sum(&local).unwrap().to_vec1::<i64>().unwrap();
                        let second =
                            comm.all_reduce_sum(&local).unwrap().to_vec1::<i64>().unwrap();
                        assert_eq!(first, second);
                        first
                    })
                })
                .collect();
            joins.into_iter().map(|j| j.join().unwrap()).collect()
        });
        for s in sums {
            assert_eq!(s, vec![3, 30]); // 0+1+2, 0+10+20
        }
    }

    #[test]
    fn test_shard_indices_partition() {
        let world = 3;
        let mut seen: Vec<usize> = (0..world)
            .flat_map(|r| shard_indices(10, world, r, 42, 0))
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_shard_indices_epoch_scoped_determinism() {
        assert_eq!(
            shard_indices(50, 4, 1, 42, 3),
            shard_indices(50, 4, 1, 42, 3)
        );
        assert_ne!(
            shard_indices(50, 4, 1, 42, 3),
            shard_indices(50, 4, 1, 42, 4)
        );
    }

    #[test]
    fn test_context_validation() {
        assert!(WorkerContext::new(0, 0, 1, Device::Cpu).is_err());
        assert!(WorkerContext::new(2, 2, 1, Device::Cpu).is_err());
        let ctx = WorkerContext::new(1, 2, 1, Device::Cpu).unwrap();
        assert!(!ctx.is_coordinator());
    }
}
