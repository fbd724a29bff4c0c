//! Checkpoint persistence for training blocks.
//!
//! One safetensors file per completed block, named by its epoch boundary.
//! The record holds two key families: `model.*` (parameter tensors) and
//! `optimizer.*` (scalar state). Only the coordinating worker writes; every
//! worker may read. A missing key or a shape mismatch on load is fatal and
//! propagates to the caller; checkpoints are never retried.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};

use crate::error::{LinkPredError, Result};
use crate::model::ScoringModel;

/// Path of the checkpoint written at `epoch`.
pub fn checkpoint_path(dir: &Path, epoch: usize) -> PathBuf {
    dir.join(format!("model_epoch_{epoch}.safetensors"))
}

/// Write a checkpoint: model parameters under `model.*`, optimizer scalars
/// under `optimizer.*`.
pub fn save_checkpoint(
    path: &Path,
    model: &dyn ScoringModel,
    optimizer_state: &[(String, f64)],
) -> Result<()> {
    let mut tensors: HashMap<String, Tensor> = HashMap::new();
    for (name, var) in model.named_parameters() {
        tensors.insert(format!("model.{name}"), var.as_tensor().clone());
    }
    for (name, value) in optimizer_state {
        tensors.insert(
            format!("optimizer.{name}"),
            Tensor::from_vec(vec![*value], (1,), &Device::Cpu)?,
        );
    }
    candle_core::safetensors::save(&tensors, path)?;
    Ok(())
}

/// Load model parameters from a checkpoint into `model` in place.
pub fn load_checkpoint(path: &Path, model: &dyn ScoringModel, device: &Device) -> Result<()> {
    let tensors = candle_core::safetensors::load(path, device)?;
    for (name, var) in model.named_parameters() {
        let key = format!("model.{name}");
        let tensor = tensors.get(&key).ok_or_else(|| {
            LinkPredError::Checkpoint(format!(
                "missing parameter `{key}` in {}",
                path.display()
            ))
        })?;
        // shape mismatch surfaces as a fatal tensor error
        var.set(tensor)?;
    }
    Ok(())
}

/// Read back the optimizer scalars of a checkpoint.
pub fn load_optimizer_state(path: &Path) -> Result<Vec<(String, f64)>> {
    let tensors = candle_core::safetensors::load(path, &Device::Cpu)?;
    let mut state: Vec<(String, f64)> = Vec::new();
    for (key, tensor) in tensors {
        if let Some(name) = key.strip_prefix("optimizer.") {
            let value = tensor.to_vec1::<f64>()?;
            let value = *value.first().ok_or_else(|| {
                LinkPredError::Checkpoint(format!("empty optimizer entry `{key}`"))
            })?;
            state.push((name.to_string(), value));
        }
    }
    state.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{KnowledgeGraph, Triplet};
    use crate::model::DistMult;

    fn toy_graph(num_nodes: usize) -> KnowledgeGraph {
        KnowledgeGraph::new(vec![Triplet::new(0, 1, 0)], num_nodes, 1).unwrap()
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = std::env::temp_dir().join("linkpred_ckpt_test_roundtrip");
        std::fs::create_dir_all(&dir).unwrap();
        let path = checkpoint_path(&dir, 5);

        let g = toy_graph(3);
        let model = DistMult::new(&g, 4, &Device::Cpu).unwrap();
        let before = model.named_parameters()[0]
            .1
            .as_tensor()
            .to_vec2::<f32>()
            .unwrap();

        let state = vec![("lr".to_string(), 1e-3), ("weight_decay".to_string(), 0.0)];
        save_checkpoint(&path, &model, &state).unwrap();

        // perturb, then restore
        let other = DistMult::new(&g, 4, &Device::Cpu).unwrap();
        load_checkpoint(&path, &other, &Device::Cpu).unwrap();
        let after = other.named_parameters()[0]
            .1
            .as_tensor()
            .to_vec2::<f32>()
            .unwrap();
        assert_eq!(before, after);

        let loaded_state = load_optimizer_state(&path).unwrap();
        assert_eq!(loaded_state, vec![
            ("lr".to_string(), 1e-3),
            ("weight_decay".to_string(), 0.0),
        ]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_shape_mismatch_is_fatal() {
        let dir = std::env::temp_dir().join("linkpred_ckpt_test_mismatch");
        std::fs::create_dir_all(&dir).unwrap();
        let path = checkpoint_path(&dir, 1);

        let small = DistMult::new(&toy_graph(3), 4, &Device::Cpu).unwrap();
        save_checkpoint(&path, &small, &[]).unwrap();

        // different entity count: loading must fail, not silently truncate
        let big = DistMult::new(&toy_graph(8), 4, &Device::Cpu).unwrap();
        assert!(load_checkpoint(&path, &big, &Device::Cpu).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_key_is_fatal() {
        let dir = std::env::temp_dir().join("linkpred_ckpt_test_missing");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("empty.safetensors");
        let tensors: HashMap<String, Tensor> = HashMap::new();
        candle_core::safetensors::save(&tensors, &path).unwrap();

        let model = DistMult::new(&toy_graph(3), 4, &Device::Cpu).unwrap();
        let err = load_checkpoint(&path, &model, &Device::Cpu).unwrap_err();
        assert!(matches!(err, LinkPredError::Checkpoint(_)));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_checkpoint_path_naming() {
        let p = checkpoint_path(Path::new("/tmp/run"), 40);
        assert_eq!(p, PathBuf::from("/tmp/run/model_epoch_40.safetensors"));
    }
}
