//! Tensor persistence
//!
//! Synthetic graphs and dataset bundles are stored in safetensors format.
//!
//! ## Layout
//!
//! - **Synthetic graphs**: `adj_<dataset>_<rate>_<seed>.safetensors` and
//!   `feat_<dataset>_<rate>_<seed>.safetensors`, one tensor each
//! - **Dataset bundles**: a single file of named tensors, see
//!   [`crate::graph::GraphDataset::load`]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use safetensors::tensor::{Dtype, TensorView};
use safetensors::SafeTensors;
use tracing::debug;

use crate::{DType, Device, EvalError, Result, Tensor};

/// Key used for single-tensor files
const TENSOR_KEY: &str = "tensor";

// ============================================================================
// Synthetic Graph Store
// ============================================================================

/// Store for condensed `(adjacency, features)` pairs
#[derive(Debug, Clone)]
pub struct SyntheticStore {
    dir: PathBuf,
    device: Device,
}

impl SyntheticStore {
    /// Create a store rooted at `dir`; loaded tensors land on `device`
    pub fn new(dir: impl AsRef<Path>, device: Device) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            device,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn adj_path(&self, dataset: &str, rate: f64, seed: u64) -> PathBuf {
        self.dir
            .join(format!("adj_{}_{}_{}.safetensors", dataset, format_rate(rate), seed))
    }

    pub fn feat_path(&self, dataset: &str, rate: f64, seed: u64) -> PathBuf {
        self.dir
            .join(format!("feat_{}_{}_{}.safetensors", dataset, format_rate(rate), seed))
    }

    /// Both files of a synthetic graph are present
    pub fn exists(&self, dataset: &str, rate: f64, seed: u64) -> bool {
        self.adj_path(dataset, rate, seed).exists() && self.feat_path(dataset, rate, seed).exists()
    }

    pub fn load_adjacency(&self, dataset: &str, rate: f64, seed: u64) -> Result<Tensor> {
        load_single_tensor(&self.adj_path(dataset, rate, seed), &self.device)
    }

    pub fn load_features(&self, dataset: &str, rate: f64, seed: u64) -> Result<Tensor> {
        load_single_tensor(&self.feat_path(dataset, rate, seed), &self.device)
    }

    pub fn save_adjacency(&self, adj: &Tensor, dataset: &str, rate: f64, seed: u64) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        save_named_tensors(&[(TENSOR_KEY, adj)], &self.adj_path(dataset, rate, seed))
    }

    pub fn save_features(&self, feat: &Tensor, dataset: &str, rate: f64, seed: u64) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        save_named_tensors(&[(TENSOR_KEY, feat)], &self.feat_path(dataset, rate, seed))
    }
}

/// Render a reduction rate the way file names carry it: `0.5`, `1.0`, `0.01`
pub fn format_rate(rate: f64) -> String {
    let s = format!("{}", rate);
    if s.contains('.') || s.contains('e') || !rate.is_finite() {
        s
    } else {
        format!("{}.0", s)
    }
}

// ============================================================================
// Named tensor files
// ============================================================================

/// Load the `"tensor"` entry of a file (or its only/first entry) as f32
fn load_single_tensor(path: &Path, device: &Device) -> Result<Tensor> {
    let mut tensors = load_named_tensors(path, device)?;
    let key = if tensors.contains_key(TENSOR_KEY) {
        TENSOR_KEY.to_string()
    } else {
        let mut keys: Vec<&String> = tensors.keys().collect();
        keys.sort();
        match keys.first() {
            Some(k) => (*k).clone(),
            None => {
                return Err(EvalError::Serialization(format!(
                    "{} holds no tensors",
                    path.display()
                )))
            }
        }
    };
    let tensor = tensors
        .remove(&key)
        .ok_or_else(|| EvalError::Serialization(format!("missing key {}", key)))?;
    Ok(tensor.to_dtype(DType::F32)?)
}

/// Load every tensor in a safetensors file onto `device`
///
/// Supports F32, F64, U32 and I64 payloads.
pub(crate) fn load_named_tensors(path: &Path, device: &Device) -> Result<HashMap<String, Tensor>> {
    if !path.exists() {
        return Err(EvalError::MissingArtifact {
            path: path.to_path_buf(),
        });
    }
    let data = std::fs::read(path)?;
    let tensors =
        SafeTensors::deserialize(&data).map_err(|e| EvalError::Serialization(e.to_string()))?;

    let mut out = HashMap::new();
    for (name, view) in tensors.tensors() {
        let shape: Vec<usize> = view.shape().to_vec();
        let bytes = view.data();
        let tensor = match view.dtype() {
            Dtype::F32 => {
                Tensor::from_vec(bytemuck::pod_collect_to_vec::<u8, f32>(bytes), shape, device)
            }
            Dtype::F64 => {
                Tensor::from_vec(bytemuck::pod_collect_to_vec::<u8, f64>(bytes), shape, device)
            }
            Dtype::U32 => {
                Tensor::from_vec(bytemuck::pod_collect_to_vec::<u8, u32>(bytes), shape, device)
            }
            Dtype::I64 => {
                Tensor::from_vec(bytemuck::pod_collect_to_vec::<u8, i64>(bytes), shape, device)
            }
            other => {
                return Err(EvalError::Serialization(format!(
                    "tensor {} has unsupported dtype {:?}",
                    name, other
                )))
            }
        }
        .map_err(|e| EvalError::Tensor(format!("load {} failed: {}", name, e)))?;
        out.insert(name, tensor);
    }

    debug!(path = %path.display(), tensors = out.len(), "loaded tensors");
    Ok(out)
}

/// Write named tensors to a safetensors file
///
/// F32, U32 and I64 are written as-is; any other dtype is stored as F32.
pub(crate) fn save_named_tensors(tensors: &[(&str, &Tensor)], path: &Path) -> Result<()> {
    let mut buffers: Vec<(String, Dtype, Vec<usize>, Vec<u8>)> = Vec::with_capacity(tensors.len());
    for (name, tensor) in tensors {
        let flat = tensor.flatten_all()?;
        let (dtype, bytes) = match tensor.dtype() {
            DType::U32 => {
                let data: Vec<u32> = flat.to_vec1()?;
                (Dtype::U32, bytemuck::cast_slice(&data).to_vec())
            }
            DType::I64 => {
                let data: Vec<i64> = flat.to_vec1()?;
                (Dtype::I64, bytemuck::cast_slice(&data).to_vec())
            }
            _ => {
                let data: Vec<f32> = flat.to_dtype(DType::F32)?.to_vec1()?;
                (Dtype::F32, bytemuck::cast_slice(&data).to_vec())
            }
        };
        buffers.push((name.to_string(), dtype, tensor.dims().to_vec(), bytes));
    }

    let mut views: HashMap<String, TensorView> = HashMap::new();
    for (name, dtype, shape, bytes) in &buffers {
        let view = TensorView::new(*dtype, shape.clone(), bytes)
            .map_err(|e| EvalError::Serialization(e.to_string()))?;
        views.insert(name.clone(), view);
    }

    safetensors::serialize_to_file(views, &None, path)
        .map_err(|e| EvalError::Serialization(e.to_string()))?;

    debug!(path = %path.display(), tensors = buffers.len(), "saved tensors");
    Ok(())
}
