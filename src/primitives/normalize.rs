//! Dense adjacency normalization
//!
//! | Function | Operator |
//! |---|---|
//! | [`row_normalize`] | `D⁻¹ A` |
//! | [`symmetric_normalize`] | `D⁻¹/² (A + I) D⁻¹/²` |
//!
//! The sparse equivalents live on [`crate::graph::SparseAdjacency`].

use crate::{Result, EvalError};
use candle_core::Tensor;

/// Row-normalize adjacency matrix: `D⁻¹ A`
///
/// Each row sums to 1.0 (or 0.0 for isolated nodes).
pub fn row_normalize(adj: &Tensor) -> Result<Tensor> {
    let degree = adj
        .sum_keepdim(1)
        .map_err(|e| EvalError::Tensor(format!("row_normalize degree failed: {}", e)))?;

    // Keeps isolated nodes at zero instead of NaN
    let degree = degree
        .affine(1.0, 1e-8)
        .map_err(|e| EvalError::Tensor(format!("row_normalize eps failed: {}", e)))?;

    adj.broadcast_div(&degree)
        .map_err(|e| EvalError::Tensor(format!("row_normalize div failed: {}", e)))
}

/// Symmetric normalization of adjacency matrix: `D⁻¹/² (A + I) D⁻¹/²`
///
/// GCN-style normalization (Kipf & Welling 2017), used before every SGC
/// propagation when `normalize` is requested.
pub fn symmetric_normalize(adj: &Tensor, add_self_loops: bool) -> Result<Tensor> {
    let (n, m) = adj
        .dims2()
        .map_err(|e| EvalError::DataShape(format!("symmetric_normalize expects [n, n]: {}", e)))?;
    if n != m {
        return Err(EvalError::DataShape(format!(
            "symmetric_normalize expects a square matrix, got [{}, {}]",
            n, m
        )));
    }
    let device = adj.device();

    // A' = A + I
    let adj = if add_self_loops {
        let eye = Tensor::eye(n, adj.dtype(), device)
            .map_err(|e| EvalError::Tensor(format!("eye failed: {}", e)))?;
        (adj + &eye).map_err(|e| EvalError::Tensor(format!("add self-loop failed: {}", e)))?
    } else {
        adj.clone()
    };

    let degree = adj
        .sum_keepdim(1)
        .map_err(|e| EvalError::Tensor(format!("sym_norm degree failed: {}", e)))?;

    let d_inv_sqrt = degree
        .affine(1.0, 1e-8)
        .map_err(|e| EvalError::Tensor(format!("sym_norm eps failed: {}", e)))?
        .sqrt()
        .map_err(|e| EvalError::Tensor(format!("sym_norm sqrt failed: {}", e)))?
        .recip()
        .map_err(|e| EvalError::Tensor(format!("sym_norm recip failed: {}", e)))?;

    // D⁻¹/² A D⁻¹/² = d_inv_sqrt * A * d_inv_sqrt (broadcast row × col)
    let left = adj
        .broadcast_mul(&d_inv_sqrt)
        .map_err(|e| EvalError::Tensor(format!("sym_norm left mul failed: {}", e)))?;

    let d_inv_sqrt_col = d_inv_sqrt
        .transpose(0, 1)
        .map_err(|e| EvalError::Tensor(format!("sym_norm transpose failed: {}", e)))?;

    left.broadcast_mul(&d_inv_sqrt_col)
        .map_err(|e| EvalError::Tensor(format!("sym_norm right mul failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn chain_adjacency() -> Tensor {
        // Chain 0-1-2-3-4
        let adj_data: Vec<f32> = vec![
            0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 0.0,
            1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0,
        ];
        Tensor::from_vec(adj_data, (5, 5), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_row_normalize() {
        let normed = row_normalize(&chain_adjacency()).unwrap();
        let row_sums: Vec<f32> = normed.sum(1).unwrap().to_vec1().unwrap();
        for (i, &sum) in row_sums.iter().enumerate() {
            assert!((sum - 1.0).abs() < 0.01, "row {} sum was {}", i, sum);
        }
    }

    #[test]
    fn test_symmetric_normalize() {
        let normed = symmetric_normalize(&chain_adjacency(), true).unwrap();
        assert_eq!(normed.dims(), &[5, 5]);
        let vals: Vec<Vec<f32>> = normed.to_vec2().unwrap();
        // Node 0 has degree 2 (self-loop + one neighbor)
        assert!((vals[0][0] - 0.5).abs() < 1e-4);
        // Symmetric
        for i in 0..5 {
            for j in 0..5 {
                assert!((vals[i][j] - vals[j][i]).abs() < 1e-6);
                assert!(vals[i][j].is_finite());
            }
        }
    }

    #[test]
    fn test_symmetric_normalize_of_zero_matrix_is_identity() {
        let zeros = Tensor::zeros((4, 4), DType::F32, &Device::Cpu).unwrap();
        let normed: Vec<Vec<f32>> = symmetric_normalize(&zeros, true).unwrap().to_vec2().unwrap();
        for (i, row) in normed.iter().enumerate() {
            for (j, v) in row.iter().enumerate() {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((v - expected).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_symmetric_normalize_rejects_non_square() {
        let adj = Tensor::zeros((3, 4), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(symmetric_normalize(&adj, true), Err(EvalError::DataShape(_))));
    }
}
