//! Classification metrics

use candle_core::{DType, Tensor, D};

use crate::{Result, EvalError};

/// Classification accuracy
///
/// - Single-label (`labels` is `[N]`): fraction of rows whose argmax equals the
///   label.
/// - Multi-label (`labels` is `[N, C]`): fraction of entries where the output,
///   thresholded at 0.5, equals the binary target.
pub fn accuracy(output: &Tensor, labels: &Tensor) -> Result<f64> {
    let n = output.dims().first().copied().unwrap_or(0);
    if n == 0 {
        return Err(EvalError::DataShape("accuracy on an empty output".into()));
    }

    let hits = match labels.rank() {
        1 => {
            if labels.dim(0)? != n {
                return Err(EvalError::DataShape(format!(
                    "accuracy: {} predictions vs {} labels",
                    n,
                    labels.dim(0)?
                )));
            }
            let labels = labels
                .to_dtype(DType::U32)
                .map_err(|e| EvalError::Tensor(format!("label cast failed: {}", e)))?;
            output
                .argmax(D::Minus1)
                .map_err(|e| EvalError::Tensor(format!("argmax failed: {}", e)))?
                .eq(&labels)
                .map_err(|e| EvalError::Tensor(format!("eq failed: {}", e)))?
        }
        2 => {
            if labels.dims() != output.dims() {
                return Err(EvalError::DataShape(format!(
                    "accuracy: output {:?} vs multi-label target {:?}",
                    output.dims(),
                    labels.dims()
                )));
            }
            let predicted = output
                .ge(0.5f64)
                .map_err(|e| EvalError::Tensor(format!("threshold failed: {}", e)))?;
            let truth = labels
                .ge(0.5f64)
                .map_err(|e| EvalError::Tensor(format!("threshold failed: {}", e)))?;
            predicted
                .eq(&truth)
                .map_err(|e| EvalError::Tensor(format!("eq failed: {}", e)))?
        }
        r => {
            return Err(EvalError::DataShape(format!(
                "accuracy: labels must be rank 1 or 2, got rank {}",
                r
            )))
        }
    };

    let acc = hits
        .to_dtype(DType::F32)?
        .mean_all()?
        .to_scalar::<f32>()?;
    Ok(acc as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn output() -> Tensor {
        // argmax per row: 2, 0, 1
        Tensor::from_vec(
            vec![0.1f32, 0.2, 0.7, 0.8, 0.1, 0.1, 0.3, 0.6, 0.1],
            (3, 3),
            &Device::Cpu,
        )
        .unwrap()
    }

    #[test]
    fn test_accuracy_all_correct() {
        let labels = Tensor::from_vec(vec![2u32, 0, 1], 3, &Device::Cpu).unwrap();
        assert_eq!(accuracy(&output(), &labels).unwrap(), 1.0);
    }

    #[test]
    fn test_accuracy_none_correct() {
        let labels = Tensor::from_vec(vec![0u32, 1, 2], 3, &Device::Cpu).unwrap();
        assert_eq!(accuracy(&output(), &labels).unwrap(), 0.0);
    }

    #[test]
    fn test_accuracy_partial() {
        let labels = Tensor::from_vec(vec![2i64, 1, 1], 3, &Device::Cpu).unwrap();
        let acc = accuracy(&output(), &labels).unwrap();
        assert!((acc - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_accuracy_multi_label() {
        let out = Tensor::from_vec(vec![0.9f32, 0.1, 0.4, 0.6], (2, 2), &Device::Cpu).unwrap();
        let target = Tensor::from_vec(vec![1.0f32, 0.0, 1.0, 1.0], (2, 2), &Device::Cpu).unwrap();
        let acc = accuracy(&out, &target).unwrap();
        assert!((acc - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_accuracy_length_mismatch() {
        let labels = Tensor::from_vec(vec![0u32, 1], 2, &Device::Cpu).unwrap();
        assert!(matches!(accuracy(&output(), &labels), Err(EvalError::DataShape(_))));
    }
}
