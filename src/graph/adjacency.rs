//! Adjacency operators
//!
//! Propagation dispatches on an explicit tagged union instead of inspecting
//! tensor shapes at the call site:
//!
//! | Variant | Shape | Propagation |
//! |---|---|---|
//! | [`Adjacency::Dense`] | `[n, m]` | `A @ X` |
//! | [`Adjacency::Sparse`] | COO `(n, m)` | gather/scatter |
//! | [`Adjacency::Batched`] | `[b, n, n]` | batched `A_i @ X` |
//!
//! Neighbor-sampled mini-batches use [`super::SampledBlock`] lists instead.

use candle_core::{DType, Device, Tensor};

use super::SparseAdjacency;
use crate::primitives::{row_normalize, symmetric_normalize};
use crate::{Result, EvalError};

/// Graph propagation operator
#[derive(Debug, Clone)]
pub enum Adjacency {
    /// Dense `[n, m]` matrix (synthetic graphs)
    Dense(Tensor),
    /// Sparse coordinate matrix (full benchmark graphs)
    Sparse(SparseAdjacency),
    /// Stack of dense `[n, n]` matrices, shape `[b, n, n]`
    Batched(Tensor),
}

impl Adjacency {
    /// Classify a raw tensor by rank: 2 → `Dense`, 3 → `Batched`
    pub fn from_tensor(adj: Tensor) -> Result<Self> {
        match adj.rank() {
            2 => Ok(Self::Dense(adj)),
            3 => Ok(Self::Batched(adj)),
            r => Err(EvalError::UnsupportedAdjacency(format!(
                "expected a rank-2 or rank-3 tensor, got rank {} with shape {:?}",
                r,
                adj.dims()
            ))),
        }
    }

    /// One propagation step: `A @ X`
    pub fn propagate(&self, x: &Tensor) -> Result<Tensor> {
        match self {
            Self::Dense(adj) => {
                let x = x.to_dtype(adj.dtype())?;
                let out = if x.rank() == 3 {
                    adj.broadcast_matmul(&x)
                } else {
                    adj.matmul(&x)
                };
                out.map_err(|e| EvalError::Tensor(format!("dense propagation failed: {}", e)))
            }
            Self::Sparse(adj) => adj.matmul(x),
            Self::Batched(adj) => adj
                .broadcast_matmul(&x.to_dtype(adj.dtype())?)
                .map_err(|e| EvalError::Tensor(format!("batched propagation failed: {}", e))),
        }
    }

    /// Apply `nlayers` propagation steps
    pub fn propagate_n(&self, x: &Tensor, nlayers: usize) -> Result<Tensor> {
        let mut h = x.clone();
        for _ in 0..nlayers {
            h = self.propagate(&h)?;
        }
        Ok(h)
    }

    /// Symmetric normalization with self-loops, per variant
    pub fn normalize(&self) -> Result<Self> {
        match self {
            Self::Dense(adj) => Ok(Self::Dense(symmetric_normalize(adj, true)?)),
            Self::Sparse(adj) => Ok(Self::Sparse(adj.sym_normalize()?)),
            Self::Batched(adj) => {
                let b = adj.dim(0)?;
                let normed = (0..b)
                    .map(|i| symmetric_normalize(&adj.get(i)?, true))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Self::Batched(Tensor::stack(&normed, 0)?))
            }
        }
    }

    /// Row normalization (`D⁻¹ A`), per variant
    pub fn row_normalize(&self) -> Result<Self> {
        match self {
            Self::Dense(adj) => Ok(Self::Dense(row_normalize(adj)?)),
            Self::Sparse(adj) => Ok(Self::Sparse(adj.row_normalize())),
            Self::Batched(adj) => {
                let b = adj.dim(0)?;
                let normed = (0..b)
                    .map(|i| row_normalize(&adj.get(i)?))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Self::Batched(Tensor::stack(&normed, 0)?))
            }
        }
    }

    /// Number of destination nodes
    pub fn num_nodes(&self) -> Result<usize> {
        match self {
            Self::Dense(adj) => Ok(adj.dim(0)?),
            Self::Sparse(adj) => Ok(adj.shape().0),
            Self::Batched(adj) => Ok(adj.dim(1)?),
        }
    }

    /// Move dense storage onto `device` (sparse operators are host-side)
    pub fn to_device(&self, device: &Device) -> Result<Self> {
        match self {
            Self::Dense(adj) => Ok(Self::Dense(adj.to_device(device)?)),
            Self::Sparse(adj) => Ok(Self::Sparse(adj.clone())),
            Self::Batched(adj) => Ok(Self::Batched(adj.to_device(device)?)),
        }
    }

    /// Subgraph induced by `nodes`
    pub fn induced(&self, nodes: &[u32]) -> Result<Self> {
        match self {
            Self::Dense(adj) => {
                let idx = Tensor::from_vec(nodes.to_vec(), nodes.len(), adj.device())?;
                Ok(Self::Dense(adj.index_select(&idx, 0)?.index_select(&idx, 1)?))
            }
            Self::Sparse(adj) => Ok(Self::Sparse(adj.induced(nodes))),
            Self::Batched(_) => Err(EvalError::UnsupportedAdjacency(
                "cannot induce a subgraph of a batched adjacency".into(),
            )),
        }
    }
}

/// Zero every entry below `epsilon`
///
/// Afterwards each entry is either exactly zero or `>= epsilon`.
pub fn sparsify(adj: &Tensor, epsilon: f64) -> Result<Tensor> {
    let keep = adj
        .ge(epsilon)
        .map_err(|e| EvalError::Tensor(format!("sparsify mask failed: {}", e)))?;
    let zeros = Tensor::zeros_like(adj)?;
    keep.where_cond(adj, &zeros)
        .map_err(|e| EvalError::Tensor(format!("sparsify where_cond failed: {}", e)))
}

/// Fraction of non-zero entries
pub fn density(adj: &Tensor) -> Result<f64> {
    let total = adj.elem_count();
    if total == 0 {
        return Ok(0.0);
    }
    let nonzero = adj
        .ne(0.0f64)?
        .to_dtype(DType::F32)?
        .sum_all()?
        .to_scalar::<f32>()?;
    Ok(nonzero as f64 / total as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> Device {
        Device::Cpu
    }

    fn path_dense() -> Tensor {
        Tensor::from_vec(
            vec![0.0f32, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0],
            (3, 3),
            &device(),
        )
        .unwrap()
    }

    #[test]
    fn test_from_tensor_dispatch() {
        assert!(matches!(Adjacency::from_tensor(path_dense()).unwrap(), Adjacency::Dense(_)));
        let batched = Tensor::stack(&[path_dense(), path_dense()], 0).unwrap();
        assert!(matches!(Adjacency::from_tensor(batched).unwrap(), Adjacency::Batched(_)));
        let vector = Tensor::ones(3, DType::F32, &device()).unwrap();
        assert!(matches!(
            Adjacency::from_tensor(vector),
            Err(EvalError::UnsupportedAdjacency(_))
        ));
    }

    #[test]
    fn test_dense_and_sparse_propagation_agree() {
        let x = Tensor::from_vec(vec![1.0f32, 0.0, 0.0, 1.0, 1.0, 1.0], (3, 2), &device()).unwrap();
        let dense = Adjacency::Dense(path_dense());
        let sparse = Adjacency::Sparse(SparseAdjacency::from_dense(&path_dense()).unwrap());

        let a: Vec<Vec<f32>> = dense.propagate_n(&x, 2).unwrap().to_vec2().unwrap();
        let b: Vec<Vec<f32>> = sparse.propagate_n(&x, 2).unwrap().to_vec2().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_batched_propagation_shape() {
        let batched = Adjacency::Batched(Tensor::stack(&[path_dense(), path_dense()], 0).unwrap());
        let x = Tensor::ones((3, 4), DType::F32, &device()).unwrap();
        let out = batched.propagate_n(&x, 2).unwrap();
        assert_eq!(out.dims(), &[2, 3, 4]);
    }

    #[test]
    fn test_normalize_per_variant_agrees() {
        let dense = Adjacency::Dense(path_dense()).normalize().unwrap();
        let sparse = Adjacency::Sparse(SparseAdjacency::from_dense(&path_dense()).unwrap())
            .normalize()
            .unwrap();
        let (Adjacency::Dense(d), Adjacency::Sparse(s)) = (dense, sparse) else {
            panic!("normalize changed the variant");
        };
        let diff = (d - s.to_dense(&device()).unwrap())
            .unwrap()
            .abs()
            .unwrap()
            .max_all()
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!(diff < 1e-5);
    }

    #[test]
    fn test_sparsify_threshold() {
        let adj = Tensor::from_vec(vec![0.005f32, 0.5, -0.3, 0.01, 0.009, 1.0], (2, 3), &device())
            .unwrap();
        let eps = 0.01;
        let vals: Vec<f32> = sparsify(&adj, eps).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        for v in &vals {
            assert!(*v == 0.0 || *v >= eps as f32, "entry {} survived", v);
        }
        assert_eq!(vals, vec![0.0, 0.5, 0.0, 0.01, 0.0, 1.0]);
    }

    #[test]
    fn test_density() {
        let d = density(&path_dense()).unwrap();
        assert!((d - 4.0 / 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_induced_dense() {
        let sub = Adjacency::Dense(path_dense()).induced(&[0, 1]).unwrap();
        let Adjacency::Dense(t) = sub else { panic!("variant changed") };
        assert_eq!(t.to_vec2::<f32>().unwrap(), vec![vec![0.0, 1.0], vec![1.0, 0.0]]);
    }
}
