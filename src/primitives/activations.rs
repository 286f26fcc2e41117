//! Activation Functions
//!
//! Hidden-layer nonlinearities and the output activations of the SGC family.

use std::fmt;
use std::str::FromStr;

use candle_core::{Tensor, D};
use serde::{Deserialize, Serialize};

use crate::{Result, EvalError};

/// Sigmoid activation: σ(x) = 1 / (1 + e^(-x))
///
/// Output activation for multi-label targets.
pub fn sigmoid(tensor: &Tensor) -> Result<Tensor> {
    let neg = tensor.neg()
        .map_err(|e| EvalError::Tensor(format!("sigmoid neg failed: {}", e)))?;
    let exp_neg = neg.exp()
        .map_err(|e| EvalError::Tensor(format!("sigmoid exp failed: {}", e)))?;
    let one_plus = (exp_neg + 1.0)
        .map_err(|e| EvalError::Tensor(format!("sigmoid add failed: {}", e)))?;
    one_plus.recip()
        .map_err(|e| EvalError::Tensor(format!("sigmoid recip failed: {}", e)))
}

/// Log-softmax along the last dimension
///
/// Output activation for single-label targets; pairs with [`super::nll_loss`].
pub fn log_softmax(tensor: &Tensor) -> Result<Tensor> {
    candle_nn::ops::log_softmax(tensor, D::Minus1)
        .map_err(|e| EvalError::Tensor(format!("log_softmax failed: {}", e)))
}

/// Softmax activation along a dimension
pub fn softmax(tensor: &Tensor, dim: usize) -> Result<Tensor> {
    candle_nn::ops::softmax(tensor, dim)
        .map_err(|e| EvalError::Tensor(format!("Softmax failed: {}", e)))
}

/// ReLU activation: max(0, x)
pub fn relu(tensor: &Tensor) -> Result<Tensor> {
    tensor.relu()
        .map_err(|e| EvalError::Tensor(format!("ReLU failed: {}", e)))
}

/// Leaky ReLU activation: max(αx, x)
pub fn leaky_relu(tensor: &Tensor, negative_slope: f64) -> Result<Tensor> {
    let zeros = Tensor::zeros_like(tensor)
        .map_err(|e| EvalError::Tensor(format!("zeros_like failed: {}", e)))?;

    let positive = tensor.maximum(&zeros)
        .map_err(|e| EvalError::Tensor(format!("maximum failed: {}", e)))?;

    let negative = tensor.minimum(&zeros)
        .map_err(|e| EvalError::Tensor(format!("minimum failed: {}", e)))?;

    let scaled_negative = (negative * negative_slope)
        .map_err(|e| EvalError::Tensor(format!("scale failed: {}", e)))?;

    (positive + scaled_negative)
        .map_err(|e| EvalError::Tensor(format!("leaky_relu add failed: {}", e)))
}

/// Tanh activation
pub fn tanh(tensor: &Tensor) -> Result<Tensor> {
    tensor.tanh()
        .map_err(|e| EvalError::Tensor(format!("tanh failed: {}", e)))
}

/// Inverted dropout, active only when `train` is set and `p > 0`
pub fn dropout(tensor: &Tensor, p: f32, train: bool) -> Result<Tensor> {
    if !train || p <= 0.0 {
        return Ok(tensor.clone());
    }
    candle_nn::ops::dropout(tensor, p)
        .map_err(|e| EvalError::Tensor(format!("dropout failed: {}", e)))
}

/// Hidden-layer activation selected by name in the evaluation config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Relu,
    Sigmoid,
    Tanh,
    LeakyRelu,
    /// Identity
    Linear,
}

impl Activation {
    /// Apply the activation element-wise
    pub fn apply(&self, tensor: &Tensor) -> Result<Tensor> {
        match self {
            Self::Relu => relu(tensor),
            Self::Sigmoid => sigmoid(tensor),
            Self::Tanh => tanh(tensor),
            Self::LeakyRelu => leaky_relu(tensor, 0.01),
            Self::Linear => Ok(tensor.clone()),
        }
    }
}

impl FromStr for Activation {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "relu" => Ok(Self::Relu),
            "sigmoid" => Ok(Self::Sigmoid),
            "tanh" => Ok(Self::Tanh),
            "leakyrelu" | "leaky_relu" => Ok(Self::LeakyRelu),
            "linear" | "identity" | "none" => Ok(Self::Linear),
            other => Err(EvalError::Config(format!("unknown activation '{}'", other))),
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relu => write!(f, "relu"),
            Self::Sigmoid => write!(f, "sigmoid"),
            Self::Tanh => write!(f, "tanh"),
            Self::LeakyRelu => write!(f, "leakyrelu"),
            Self::Linear => write!(f, "linear"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn device() -> Device {
        Device::Cpu
    }

    fn tensor(vals: &[f32]) -> Tensor {
        Tensor::from_vec(vals.to_vec(), vals.len(), &device()).unwrap()
    }

    #[test]
    fn test_sigmoid() {
        let t = tensor(&[0.0]);
        let s = sigmoid(&t).unwrap();
        let val = s.to_vec1::<f32>().unwrap()[0];

        // sigmoid(0) = 0.5
        assert!((val - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_relu() {
        let t = tensor(&[-2.0, -1.0, 0.0, 1.0, 2.0]);
        let r = relu(&t).unwrap();
        let vals = r.to_vec1::<f32>().unwrap();

        assert_eq!(vals, vec![0.0, 0.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_log_softmax_rows_normalize() {
        let t = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 0.0, 0.0, 0.0], (2, 3), &device()).unwrap();
        let ls = log_softmax(&t).unwrap();
        let probs: Vec<Vec<f32>> = ls.exp().unwrap().to_vec2().unwrap();
        for row in &probs {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
        }
        assert!(probs[0][2] > probs[0][1]);
        assert!((probs[1][0] - 1.0 / 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_dropout_is_identity_in_eval() {
        let t = tensor(&[1.0, 2.0, 3.0]);
        let out = dropout(&t, 0.5, false).unwrap();
        assert_eq!(out.to_vec1::<f32>().unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_activation_from_str() {
        assert_eq!("relu".parse::<Activation>().unwrap(), Activation::Relu);
        assert_eq!("Sigmoid".parse::<Activation>().unwrap(), Activation::Sigmoid);
        assert_eq!("identity".parse::<Activation>().unwrap(), Activation::Linear);
        assert!(matches!("swish".parse::<Activation>(), Err(EvalError::Config(_))));
    }

    #[test]
    fn test_leaky_relu() {
        let t = tensor(&[-2.0, 0.0, 2.0]);
        let vals = Activation::LeakyRelu.apply(&t).unwrap().to_vec1::<f32>().unwrap();
        assert!((vals[0] - (-0.02)).abs() < 1e-6);
        assert_eq!(vals[2], 2.0);
    }
}
