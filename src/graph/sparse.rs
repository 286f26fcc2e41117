//! Sparse (COO) adjacency
//!
//! Full benchmark graphs are far too large for dense `[N, N]` matrices, so
//! they are stored as coordinate lists and propagated with a gather/scatter
//! pair that stays differentiable with respect to the node features:
//!
//! ```text
//! msg  = X[cols] * values           gather source rows, weight by edge
//! out  = zeros.index_add(rows, msg)  scatter-add into destination rows
//! ```

use candle_core::{DType, Device, Tensor};

use crate::{Result, EvalError};

/// Weighted sparse matrix in coordinate format.
///
/// Entry `k` is `values[k]` at `(rows[k], cols[k])`. Duplicate coordinates are
/// allowed and sum during propagation. `shape` is `(n_dst, n_src)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseAdjacency {
    rows: Vec<u32>,
    cols: Vec<u32>,
    values: Vec<f32>,
    shape: (usize, usize),
}

impl SparseAdjacency {
    /// Build from coordinate lists, validating lengths and bounds
    pub fn from_coo(
        rows: Vec<u32>,
        cols: Vec<u32>,
        values: Option<Vec<f32>>,
        shape: (usize, usize),
    ) -> Result<Self> {
        let values = values.unwrap_or_else(|| vec![1.0f32; rows.len()]);
        if rows.len() != cols.len() || rows.len() != values.len() {
            return Err(EvalError::DataShape(format!(
                "Sparse COO dimension mismatch: rows={}, cols={}, values={}",
                rows.len(),
                cols.len(),
                values.len()
            )));
        }
        if let Some(&r) = rows.iter().find(|&&r| r as usize >= shape.0) {
            return Err(EvalError::DataShape(format!(
                "row index {} out of bounds for {} rows",
                r, shape.0
            )));
        }
        if let Some(&c) = cols.iter().find(|&&c| c as usize >= shape.1) {
            return Err(EvalError::DataShape(format!(
                "column index {} out of bounds for {} columns",
                c, shape.1
            )));
        }
        Ok(Self {
            rows,
            cols,
            values,
            shape,
        })
    }

    /// `n × n` identity
    pub fn identity(n: usize) -> Self {
        let idx: Vec<u32> = (0..n as u32).collect();
        Self {
            rows: idx.clone(),
            cols: idx,
            values: vec![1.0; n],
            shape: (n, n),
        }
    }

    /// Keep the non-zero entries of a dense `[n, m]` matrix
    pub fn from_dense(adj: &Tensor) -> Result<Self> {
        let (n, m) = adj
            .dims2()
            .map_err(|e| EvalError::UnsupportedAdjacency(format!("expected [n, m]: {}", e)))?;
        let dense: Vec<Vec<f32>> = adj.to_dtype(DType::F32)?.to_vec2()?;

        let mut rows = Vec::new();
        let mut cols = Vec::new();
        let mut values = Vec::new();
        for (r, row) in dense.iter().enumerate() {
            for (c, &v) in row.iter().enumerate() {
                if v != 0.0 {
                    rows.push(r as u32);
                    cols.push(c as u32);
                    values.push(v);
                }
            }
        }
        Ok(Self {
            rows,
            cols,
            values,
            shape: (n, m),
        })
    }

    /// Materialize as a dense `[n_dst, n_src]` tensor
    pub fn to_dense(&self, device: &Device) -> Result<Tensor> {
        let (num_rows, num_cols) = self.shape;
        let mut dense = vec![0.0f32; num_rows * num_cols];
        for ((&r, &c), &v) in self.rows.iter().zip(&self.cols).zip(&self.values) {
            dense[r as usize * num_cols + c as usize] += v;
        }
        Tensor::from_vec(dense, (num_rows, num_cols), device)
            .map_err(|e| EvalError::Tensor(format!("create dense tensor failed: {}", e)))
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn rows(&self) -> &[u32] {
        &self.rows
    }

    pub fn cols(&self) -> &[u32] {
        &self.cols
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Sparse × dense product `A @ X`
    ///
    /// `x` is `[n_src, d]`; the result is `[n_dst, d]` on `x`'s device.
    pub fn matmul(&self, x: &Tensor) -> Result<Tensor> {
        let (n_src, d) = x
            .dims2()
            .map_err(|e| EvalError::DataShape(format!("sparse matmul expects [n, d]: {}", e)))?;
        if n_src != self.shape.1 {
            return Err(EvalError::DataShape(format!(
                "sparse matmul: adjacency has {} columns, features have {} rows",
                self.shape.1, n_src
            )));
        }
        let device = x.device();
        let out = Tensor::zeros((self.shape.0, d), x.dtype(), device)?;
        if self.values.is_empty() {
            return Ok(out);
        }

        let nnz = self.values.len();
        let rows = Tensor::from_vec(self.rows.clone(), nnz, device)?;
        let cols = Tensor::from_vec(self.cols.clone(), nnz, device)?;
        let vals = Tensor::from_vec(self.values.clone(), (nnz, 1), device)?.to_dtype(x.dtype())?;

        let messages = x
            .index_select(&cols, 0)
            .map_err(|e| EvalError::Tensor(format!("sparse gather failed: {}", e)))?
            .broadcast_mul(&vals)
            .map_err(|e| EvalError::Tensor(format!("sparse edge weight failed: {}", e)))?;

        out.index_add(&rows, &messages, 0)
            .map_err(|e| EvalError::Tensor(format!("sparse scatter failed: {}", e)))
    }

    fn row_sums(&self) -> Vec<f64> {
        let mut sums = vec![0.0f64; self.shape.0];
        for (&r, &v) in self.rows.iter().zip(&self.values) {
            sums[r as usize] += v as f64;
        }
        sums
    }

    /// Symmetric normalization with self-loops: `D⁻¹/² (A + I) D⁻¹/²`
    ///
    /// Rows with zero degree stay zero.
    pub fn sym_normalize(&self) -> Result<Self> {
        let (n, m) = self.shape;
        if n != m {
            return Err(EvalError::DataShape(format!(
                "symmetric normalization needs a square adjacency, got ({}, {})",
                n, m
            )));
        }

        let mut with_loops = self.clone();
        with_loops.rows.extend(0..n as u32);
        with_loops.cols.extend(0..n as u32);
        with_loops.values.extend(std::iter::repeat(1.0f32).take(n));

        let d_inv_sqrt: Vec<f64> = with_loops
            .row_sums()
            .into_iter()
            .map(|d| if d > 0.0 { d.powf(-0.5) } else { 0.0 })
            .collect();

        let values = with_loops
            .rows
            .iter()
            .zip(&with_loops.cols)
            .zip(&with_loops.values)
            .map(|((&r, &c), &v)| (v as f64 * d_inv_sqrt[r as usize] * d_inv_sqrt[c as usize]) as f32)
            .collect();
        with_loops.values = values;
        Ok(with_loops)
    }

    /// Row normalization: `D⁻¹ A`
    pub fn row_normalize(&self) -> Self {
        let sums = self.row_sums();
        let values = self
            .rows
            .iter()
            .zip(&self.values)
            .map(|(&r, &v)| {
                let s = sums[r as usize];
                if s != 0.0 { (v as f64 / s) as f32 } else { 0.0 }
            })
            .collect();
        Self {
            values,
            ..self.clone()
        }
    }

    /// Subgraph induced by `nodes`, re-indexed to `0..nodes.len()`
    pub fn induced(&self, nodes: &[u32]) -> Self {
        let mut local = vec![u32::MAX; self.shape.0.max(self.shape.1)];
        for (i, &n) in nodes.iter().enumerate() {
            local[n as usize] = i as u32;
        }

        let mut rows = Vec::new();
        let mut cols = Vec::new();
        let mut values = Vec::new();
        for ((&r, &c), &v) in self.rows.iter().zip(&self.cols).zip(&self.values) {
            let (lr, lc) = (local[r as usize], local[c as usize]);
            if lr != u32::MAX && lc != u32::MAX {
                rows.push(lr);
                cols.push(lc);
                values.push(v);
            }
        }
        Self {
            rows,
            cols,
            values,
            shape: (nodes.len(), nodes.len()),
        }
    }

    /// CSR view: `indptr[r]..indptr[r + 1]` indexes the entries of row `r`
    /// in the returned `(col, value)` list.
    pub fn to_csr(&self) -> (Vec<usize>, Vec<(u32, f32)>) {
        let mut indptr = vec![0usize; self.shape.0 + 1];
        for &r in &self.rows {
            indptr[r as usize + 1] += 1;
        }
        for i in 0..self.shape.0 {
            indptr[i + 1] += indptr[i];
        }
        let mut cursor = indptr.clone();
        let mut entries = vec![(0u32, 0.0f32); self.values.len()];
        for ((&r, &c), &v) in self.rows.iter().zip(&self.cols).zip(&self.values) {
            entries[cursor[r as usize]] = (c, v);
            cursor[r as usize] += 1;
        }
        (indptr, entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> Device {
        Device::Cpu
    }

    fn triangle() -> SparseAdjacency {
        // 0-1, 1-2 (undirected)
        SparseAdjacency::from_coo(vec![0, 1, 1, 2], vec![1, 0, 2, 1], None, (3, 3)).unwrap()
    }

    #[test]
    fn test_matmul_matches_dense() {
        let adj = triangle();
        let x = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], (3, 2), &device()).unwrap();

        let sparse_out: Vec<Vec<f32>> = adj.matmul(&x).unwrap().to_vec2().unwrap();
        let dense_out: Vec<Vec<f32>> = adj
            .to_dense(&device())
            .unwrap()
            .matmul(&x)
            .unwrap()
            .to_vec2()
            .unwrap();
        assert_eq!(sparse_out, dense_out);
        assert_eq!(sparse_out[1], vec![6.0, 8.0]);
    }

    #[test]
    fn test_matmul_is_differentiable() {
        let adj = triangle();
        let x = candle_core::Var::from_tensor(
            &Tensor::ones((3, 2), DType::F32, &device()).unwrap(),
        )
        .unwrap();
        let loss = adj.matmul(x.as_tensor()).unwrap().sum_all().unwrap();
        let grads = loss.backward().unwrap();
        let grad: Vec<Vec<f32>> = grads.get(x.as_tensor()).unwrap().to_vec2().unwrap();
        // Column sums of A: node 1 feeds two rows
        assert_eq!(grad[0], vec![1.0, 1.0]);
        assert_eq!(grad[1], vec![2.0, 2.0]);
        assert_eq!(grad[2], vec![1.0, 1.0]);
    }

    #[test]
    fn test_matmul_shape_mismatch() {
        let x = Tensor::ones((4, 2), DType::F32, &device()).unwrap();
        assert!(matches!(triangle().matmul(&x), Err(EvalError::DataShape(_))));
    }

    #[test]
    fn test_sym_normalize_matches_dense() {
        let adj = triangle();
        let sparse = adj.sym_normalize().unwrap().to_dense(&device()).unwrap();
        let dense = crate::primitives::symmetric_normalize(&adj.to_dense(&device()).unwrap(), true)
            .unwrap();
        let diff = (sparse - dense)
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
    fn test_row_normalize() {
        let dense: Vec<Vec<f32>> = triangle()
            .row_normalize()
            .to_dense(&device())
            .unwrap()
            .to_vec2()
            .unwrap();
        assert_eq!(dense[1], vec![0.5, 0.0, 0.5]);
    }

    #[test]
    fn test_from_dense_roundtrip_keeps_nonzeros() {
        let dense = Tensor::from_vec(vec![0.0f32, 0.3, 0.0, 0.7], (2, 2), &device()).unwrap();
        let sparse = SparseAdjacency::from_dense(&dense).unwrap();
        assert_eq!(sparse.nnz(), 2);
        assert_eq!(sparse.rows(), &[0, 1]);
        assert_eq!(sparse.cols(), &[1, 1]);
    }

    #[test]
    fn test_from_coo_rejects_out_of_bounds() {
        let err = SparseAdjacency::from_coo(vec![0, 3], vec![1, 0], None, (3, 3)).unwrap_err();
        assert!(matches!(err, EvalError::DataShape(_)));
    }

    #[test]
    fn test_induced_subgraph() {
        let sub = triangle().induced(&[1, 2]);
        assert_eq!(sub.shape(), (2, 2));
        assert_eq!(sub.nnz(), 2);
        let dense: Vec<Vec<f32>> = sub.to_dense(&device()).unwrap().to_vec2().unwrap();
        assert_eq!(dense, vec![vec![0.0, 1.0], vec![1.0, 0.0]]);
    }

    #[test]
    fn test_csr_rows() {
        let (indptr, entries) = triangle().to_csr();
        assert_eq!(indptr, vec![0, 1, 3, 4]);
        let row1: Vec<u32> = entries[indptr[1]..indptr[2]].iter().map(|e| e.0).collect();
        assert_eq!(row1, vec![0, 2]);
    }
}
