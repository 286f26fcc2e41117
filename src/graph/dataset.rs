//! Graph snapshots and benchmark datasets
//!
//! A [`GraphSnapshot`] is one graph view (features, adjacency, labels) whose
//! sizes agree. A [`GraphDataset`] bundles the full graph, its train/val/test
//! views and the split indices into the full graph.
//!
//! ## Bundle format
//!
//! [`GraphDataset::load`] reads one safetensors file:
//!
//! | Key | Dtype | Shape |
//! |---|---|---|
//! | `feat_full` | f32 | `[N, d]` |
//! | `labels_full` | u32 / i64 or f32 | `[N]` or `[N, c]` |
//! | `idx_train`, `idx_val`, `idx_test` | u32 / i64 | `[k]` |
//! | `nclass` | u32 / i64 | `[1]` |
//! | `adj_full_{rows,cols,values,shape}` | u32, u32, f32, u32 | COO |
//!
//! Inductive datasets also carry `feat_<split>` and `adj_<split>_*` for
//! `train`, `val` and `test`; missing splits are induced from the full graph.

use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use tracing::info;

use super::{Adjacency, SparseAdjacency};
use crate::storage::{load_named_tensors, save_named_tensors};
use crate::{EvalError, Result};

// ============================================================================
// Labels
// ============================================================================

/// Node labels, distinguished by dimensionality
#[derive(Debug, Clone)]
pub enum Labels {
    /// One class id per node, u32 `[n]`
    Single(Tensor),
    /// Binary indicator matrix, f32 `[n, c]`
    Multi(Tensor),
}

impl Labels {
    /// Rank 1 → `Single`, rank 2 → `Multi`
    pub fn from_tensor(labels: Tensor) -> Result<Self> {
        match labels.rank() {
            1 => Ok(Self::Single(labels.to_dtype(DType::U32)?)),
            2 => Ok(Self::Multi(labels.to_dtype(DType::F32)?)),
            r => Err(EvalError::DataShape(format!(
                "labels must be rank 1 or 2, got rank {}",
                r
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.as_tensor().dims().first().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_multi_label(&self) -> bool {
        matches!(self, Self::Multi(_))
    }

    pub fn as_tensor(&self) -> &Tensor {
        match self {
            Self::Single(t) | Self::Multi(t) => t,
        }
    }

    /// Labels of the given nodes
    pub fn index_select(&self, nodes: &[u32]) -> Result<Self> {
        let t = self.as_tensor();
        let idx = Tensor::from_vec(nodes.to_vec(), nodes.len(), t.device())?;
        let picked = t
            .index_select(&idx, 0)
            .map_err(|e| EvalError::Tensor(format!("label index_select failed: {}", e)))?;
        Ok(match self {
            Self::Single(_) => Self::Single(picked),
            Self::Multi(_) => Self::Multi(picked),
        })
    }

    pub fn to_device(&self, device: &Device) -> Result<Self> {
        Ok(match self {
            Self::Single(t) => Self::Single(t.to_device(device)?),
            Self::Multi(t) => Self::Multi(t.to_device(device)?),
        })
    }

    /// Class ids as a host vector; only defined for single-label targets
    pub fn to_vec_u32(&self) -> Result<Vec<u32>> {
        match self {
            Self::Single(t) => Ok(t.to_vec1::<u32>()?),
            Self::Multi(_) => Err(EvalError::DataShape(
                "multi-label targets have no single class id per node".into(),
            )),
        }
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// One graph view: features, adjacency and labels of the same nodes
#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    pub features: Tensor,
    pub adjacency: Adjacency,
    pub labels: Labels,
}

impl GraphSnapshot {
    /// Build and validate a snapshot
    pub fn new(features: Tensor, adjacency: Adjacency, labels: Labels) -> Result<Self> {
        let snapshot = Self {
            features,
            adjacency,
            labels,
        };
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Feature rows == adjacency dimension == label count
    pub fn validate(&self) -> Result<()> {
        let (rows, _) = self
            .features
            .dims2()
            .map_err(|e| EvalError::DataShape(format!("features must be [n, d]: {}", e)))?;
        if let Adjacency::Batched(_) = self.adjacency {
            return Err(EvalError::UnsupportedAdjacency(
                "a graph snapshot needs a single adjacency, not a batch".into(),
            ));
        }
        let n_adj = self.adjacency.num_nodes()?;
        let n_labels = self.labels.len();
        if rows != n_adj || rows != n_labels {
            return Err(EvalError::DataShape(format!(
                "snapshot sizes disagree: {} feature rows, adjacency {}, {} labels",
                rows, n_adj, n_labels
            )));
        }
        if let Adjacency::Sparse(sp) = &self.adjacency {
            if sp.shape().0 != sp.shape().1 {
                return Err(EvalError::DataShape(format!(
                    "snapshot adjacency must be square, got {:?}",
                    sp.shape()
                )));
            }
        }
        Ok(())
    }

    pub fn num_nodes(&self) -> usize {
        self.labels.len()
    }

    /// Subgraph induced by `nodes`
    pub fn induced(&self, nodes: &[u32]) -> Result<Self> {
        let idx = Tensor::from_vec(nodes.to_vec(), nodes.len(), self.features.device())?;
        Ok(Self {
            features: self.features.index_select(&idx, 0)?,
            adjacency: self.adjacency.induced(nodes)?,
            labels: self.labels.index_select(nodes)?,
        })
    }

    pub fn to_device(&self, device: &Device) -> Result<Self> {
        Ok(Self {
            features: self.features.to_device(device)?,
            adjacency: self.adjacency.to_device(device)?,
            labels: self.labels.to_device(device)?,
        })
    }
}

// ============================================================================
// Dataset
// ============================================================================

/// A benchmark graph with its splits
#[derive(Debug, Clone)]
pub struct GraphDataset {
    pub name: String,
    pub nclass: usize,
    pub full: GraphSnapshot,
    pub train: GraphSnapshot,
    pub val: GraphSnapshot,
    pub test: GraphSnapshot,
    pub idx_train: Vec<u32>,
    pub idx_val: Vec<u32>,
    pub idx_test: Vec<u32>,
}

impl GraphDataset {
    /// Dataset whose split views are induced from the full graph
    pub fn transductive(
        name: impl Into<String>,
        nclass: usize,
        full: GraphSnapshot,
        idx_train: Vec<u32>,
        idx_val: Vec<u32>,
        idx_test: Vec<u32>,
    ) -> Result<Self> {
        let train = full.induced(&idx_train)?;
        let val = full.induced(&idx_val)?;
        let test = full.induced(&idx_test)?;
        let dataset = Self {
            name: name.into(),
            nclass,
            full,
            train,
            val,
            test,
            idx_train,
            idx_val,
            idx_test,
        };
        dataset.validate()?;
        Ok(dataset)
    }

    pub fn validate(&self) -> Result<()> {
        if self.nclass == 0 {
            return Err(EvalError::DataShape(format!("{}: nclass must be positive", self.name)));
        }
        for snapshot in [&self.full, &self.train, &self.val, &self.test] {
            snapshot.validate()?;
        }
        let n = self.full.num_nodes();
        for (split, idx) in [
            ("train", &self.idx_train),
            ("val", &self.idx_val),
            ("test", &self.idx_test),
        ] {
            if let Some(&bad) = idx.iter().find(|&&i| i as usize >= n) {
                return Err(EvalError::DataShape(format!(
                    "{}: idx_{} contains {} but the full graph has {} nodes",
                    self.name, split, bad, n
                )));
            }
        }
        if self.idx_train.is_empty() {
            return Err(EvalError::DataShape(format!("{}: empty training split", self.name)));
        }
        Ok(())
    }

    /// Class ids of the training nodes, in `idx_train` order
    pub fn train_labels(&self) -> Result<Vec<u32>> {
        self.full.labels.index_select(&self.idx_train)?.to_vec_u32()
    }

    pub fn is_multi_label(&self) -> bool {
        self.full.labels.is_multi_label()
    }

    pub fn num_features(&self) -> Result<usize> {
        Ok(self.full.features.dim(1)?)
    }

    /// Load a dataset bundle written by [`GraphDataset::save`] (or an exporter
    /// following the same key layout)
    pub fn load(name: impl Into<String>, path: impl AsRef<Path>, device: &Device) -> Result<Self> {
        let name = name.into();
        let path = path.as_ref();
        let tensors = load_named_tensors(path, device)?;

        let idx_train = index_list(&tensors, "idx_train")?;
        let idx_val = index_list(&tensors, "idx_val")?;
        let idx_test = index_list(&tensors, "idx_test")?;
        let nclass = index_list(&tensors, "nclass")?
            .first()
            .copied()
            .ok_or_else(|| EvalError::Serialization("nclass is empty".into()))?
            as usize;

        let labels_full = Labels::from_tensor(require(&tensors, "labels_full")?.clone())?;
        let full = GraphSnapshot::new(
            require(&tensors, "feat_full")?.to_dtype(DType::F32)?,
            Adjacency::Sparse(coo_adjacency(&tensors, "adj_full")?),
            labels_full.clone(),
        )?;

        let split = |key: &str, idx: &[u32]| -> Result<GraphSnapshot> {
            let feat_key = format!("feat_{}", key);
            match tensors.get(&feat_key) {
                Some(feat) => GraphSnapshot::new(
                    feat.to_dtype(DType::F32)?,
                    Adjacency::Sparse(coo_adjacency(&tensors, &format!("adj_{}", key))?),
                    labels_full.index_select(idx)?,
                ),
                None => full.induced(idx),
            }
        };
        let train = split("train", &idx_train)?;
        let val = split("val", &idx_val)?;
        let test = split("test", &idx_test)?;

        let dataset = Self {
            name,
            nclass,
            full,
            train,
            val,
            test,
            idx_train,
            idx_val,
            idx_test,
        };
        dataset.validate()?;

        info!(
            dataset = %dataset.name,
            nodes = dataset.full.num_nodes(),
            nclass = dataset.nclass,
            train = dataset.idx_train.len(),
            val = dataset.idx_val.len(),
            test = dataset.idx_test.len(),
            "loaded dataset"
        );
        Ok(dataset)
    }

    /// Write the dataset as a bundle; split graphs are stored only when they
    /// are sparse
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let cpu = Device::Cpu;
        let mut owned: Vec<(String, Tensor)> = vec![
            ("feat_full".into(), self.full.features.clone()),
            ("labels_full".into(), self.full.labels.as_tensor().clone()),
            ("idx_train".into(), Tensor::from_vec(self.idx_train.clone(), self.idx_train.len(), &cpu)?),
            ("idx_val".into(), Tensor::from_vec(self.idx_val.clone(), self.idx_val.len(), &cpu)?),
            ("idx_test".into(), Tensor::from_vec(self.idx_test.clone(), self.idx_test.len(), &cpu)?),
            ("nclass".into(), Tensor::from_vec(vec![self.nclass as u32], 1, &cpu)?),
        ];
        push_coo(&mut owned, "adj_full", &self.full.adjacency)?;
        for (key, snapshot) in [("train", &self.train), ("val", &self.val), ("test", &self.test)] {
            if let Adjacency::Sparse(_) = snapshot.adjacency {
                owned.push((format!("feat_{}", key), snapshot.features.clone()));
                push_coo(&mut owned, &format!("adj_{}", key), &snapshot.adjacency)?;
            }
        }

        let refs: Vec<(&str, &Tensor)> = owned.iter().map(|(k, t)| (k.as_str(), t)).collect();
        save_named_tensors(&refs, path.as_ref())
    }
}

fn require<'a>(tensors: &'a HashMap<String, Tensor>, key: &str) -> Result<&'a Tensor> {
    tensors
        .get(key)
        .ok_or_else(|| EvalError::Serialization(format!("dataset bundle is missing {}", key)))
}

/// Integer index tensor (u32 or i64) as `Vec<u32>`
fn index_list(tensors: &HashMap<String, Tensor>, key: &str) -> Result<Vec<u32>> {
    let t = require(tensors, key)?.flatten_all()?;
    match t.dtype() {
        DType::U32 => Ok(t.to_vec1::<u32>()?),
        DType::I64 => Ok(t.to_vec1::<i64>()?.into_iter().map(|v| v as u32).collect()),
        _ => Ok(t
            .to_dtype(DType::F32)?
            .to_vec1::<f32>()?
            .into_iter()
            .map(|v| v as u32)
            .collect()),
    }
}

fn coo_adjacency(tensors: &HashMap<String, Tensor>, prefix: &str) -> Result<SparseAdjacency> {
    let rows = index_list(tensors, &format!("{}_rows", prefix))?;
    let cols = index_list(tensors, &format!("{}_cols", prefix))?;
    let values = require(tensors, &format!("{}_values", prefix))?
        .flatten_all()?
        .to_dtype(DType::F32)?
        .to_vec1::<f32>()?;
    let shape = index_list(tensors, &format!("{}_shape", prefix))?;
    if shape.len() != 2 {
        return Err(EvalError::Serialization(format!(
            "{}_shape must have two entries, got {}",
            prefix,
            shape.len()
        )));
    }
    SparseAdjacency::from_coo(rows, cols, Some(values), (shape[0] as usize, shape[1] as usize))
}

fn push_coo(out: &mut Vec<(String, Tensor)>, prefix: &str, adjacency: &Adjacency) -> Result<()> {
    let sparse = match adjacency {
        Adjacency::Sparse(sp) => sp.clone(),
        Adjacency::Dense(t) => SparseAdjacency::from_dense(t)?,
        Adjacency::Batched(_) => {
            return Err(EvalError::UnsupportedAdjacency(
                "cannot store a batched adjacency in a dataset bundle".into(),
            ))
        }
    };
    let cpu = Device::Cpu;
    let nnz = sparse.nnz();
    let (n, m) = sparse.shape();
    out.push((format!("{}_rows", prefix), Tensor::from_vec(sparse.rows().to_vec(), nnz, &cpu)?));
    out.push((format!("{}_cols", prefix), Tensor::from_vec(sparse.cols().to_vec(), nnz, &cpu)?));
    out.push((format!("{}_values", prefix), Tensor::from_vec(sparse.values().to_vec(), nnz, &cpu)?));
    out.push((format!("{}_shape", prefix), Tensor::from_vec(vec![n as u32, m as u32], 2, &cpu)?));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// 6-node ring, 2 features, 2 classes
    fn ring_snapshot() -> GraphSnapshot {
        let n = 6u32;
        let mut rows = Vec::new();
        let mut cols = Vec::new();
        for i in 0..n {
            rows.extend([i, (i + 1) % n]);
            cols.extend([(i + 1) % n, i]);
        }
        let adj = SparseAdjacency::from_coo(rows, cols, None, (6, 6)).unwrap();
        let features = Tensor::arange(0f32, 12.0, &Device::Cpu)
            .unwrap()
            .reshape((6, 2))
            .unwrap();
        let labels = Tensor::from_vec(vec![0u32, 1, 0, 1, 0, 1], 6, &Device::Cpu).unwrap();
        GraphSnapshot::new(features, Adjacency::Sparse(adj), Labels::Single(labels)).unwrap()
    }

    #[test]
    fn test_labels_from_tensor() {
        let single = Tensor::from_vec(vec![0i64, 2, 1], 3, &Device::Cpu).unwrap();
        let labels = Labels::from_tensor(single).unwrap();
        assert!(!labels.is_multi_label());
        assert_eq!(labels.to_vec_u32().unwrap(), vec![0, 2, 1]);

        let multi = Tensor::zeros((3, 4), DType::F32, &Device::Cpu).unwrap();
        let labels = Labels::from_tensor(multi).unwrap();
        assert!(labels.is_multi_label());
        assert_eq!(labels.len(), 3);
        assert!(labels.to_vec_u32().is_err());
    }

    #[test]
    fn test_snapshot_size_mismatch() {
        let features = Tensor::zeros((4, 2), DType::F32, &Device::Cpu).unwrap();
        let labels = Labels::Single(Tensor::zeros(4, DType::U32, &Device::Cpu).unwrap());
        let adj = Adjacency::Sparse(SparseAdjacency::identity(5));
        assert!(matches!(
            GraphSnapshot::new(features, adj, labels),
            Err(EvalError::DataShape(_))
        ));
    }

    #[test]
    fn test_transductive_induces_splits() {
        let dataset =
            GraphDataset::transductive("ring", 2, ring_snapshot(), vec![0, 1, 2], vec![3], vec![4, 5])
                .unwrap();
        assert_eq!(dataset.train.num_nodes(), 3);
        assert_eq!(dataset.test.num_nodes(), 2);
        assert_eq!(dataset.train_labels().unwrap(), vec![0, 1, 0]);
        // Nodes 4 and 5 are ring neighbours
        let Adjacency::Sparse(test_adj) = &dataset.test.adjacency else {
            panic!("expected sparse")
        };
        assert_eq!(test_adj.nnz(), 2);
    }

    #[test]
    fn test_out_of_range_split_rejected() {
        let err =
            GraphDataset::transductive("ring", 2, ring_snapshot(), vec![0], vec![1], vec![2]).and_then(
                |mut d| {
                    d.idx_test.push(99);
                    d.validate()
                },
            );
        assert!(matches!(err, Err(EvalError::DataShape(_))));
    }

    #[test]
    fn test_bundle_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ring.safetensors");
        let dataset =
            GraphDataset::transductive("ring", 2, ring_snapshot(), vec![0, 1], vec![2], vec![3, 4, 5])
                .unwrap();
        dataset.save(&path).unwrap();

        let loaded = GraphDataset::load("ring", &path, &Device::Cpu).unwrap();
        assert_eq!(loaded.nclass, 2);
        assert_eq!(loaded.idx_test, vec![3, 4, 5]);
        assert_eq!(loaded.full.num_nodes(), 6);
        assert_eq!(
            loaded.full.features.to_vec2::<f32>().unwrap(),
            dataset.full.features.to_vec2::<f32>().unwrap()
        );
        assert_eq!(loaded.test.num_nodes(), 3);
    }

    #[test]
    fn test_missing_bundle() {
        let temp = TempDir::new().unwrap();
        let err = GraphDataset::load("none", temp.path().join("nope.safetensors"), &Device::Cpu);
        assert!(matches!(err, Err(EvalError::MissingArtifact { .. })));
    }
}
