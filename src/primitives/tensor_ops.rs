//! Core Tensor Operations
//!
//! Device selection and the loss functions used by the training loop.
//!
//! ## Device placement
//!
//! Every tensor that meets a model parameter must live on the model's device.
//! Pick the device once with [`best_device`] and pass it down explicitly:
//!
//! ```rust,ignore
//! use graph_condense_eval::primitives::best_device;
//!
//! let device = best_device();
//! let evaluator = Evaluator::new(dataset, config, device)?;
//! ```
//!
//! Set `GRAPH_EVAL_NO_GPU=1` to force CPU mode regardless of enabled features.

use crate::{Result, EvalError};
use candle_core::{DType, Device, Tensor};
use tracing::info;

// ============================================================================
// Environment-controlled Device Selection
// ============================================================================

/// Check if GPU is disabled via environment variable.
///
/// Set `GRAPH_EVAL_NO_GPU=1` to force CPU-only mode.
pub fn gpu_disabled() -> bool {
    std::env::var("GRAPH_EVAL_NO_GPU")
        .map(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
        .unwrap_or(false)
}

/// Get the best available device for tensor operations
///
/// Priority:
/// 1. Check `GRAPH_EVAL_NO_GPU` env var (forces CPU if set)
/// 2. CUDA (NVIDIA GPUs)
/// 3. Metal (Apple Silicon)
/// 4. CPU (fallback)
pub fn best_device() -> Device {
    if gpu_disabled() {
        info!("Using CPU device (GRAPH_EVAL_NO_GPU set)");
        return Device::Cpu;
    }

    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            info!("Using CUDA device (NVIDIA GPU)");
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            info!("Using Metal device (Apple Silicon)");
            return device;
        }
    }

    info!("Using CPU device");
    Device::Cpu
}

/// Force CPU device, ignoring GPU availability.
pub fn cpu_device() -> Device {
    Device::Cpu
}

// ============================================================================
// Device Availability Checks
// ============================================================================

/// Check if Metal is available (respects GRAPH_EVAL_NO_GPU)
#[cfg(feature = "metal")]
pub fn metal_available() -> bool {
    !gpu_disabled() && Device::new_metal(0).is_ok()
}

/// Check if Metal is available (always false when `metal` feature is not enabled)
#[cfg(not(feature = "metal"))]
pub fn metal_available() -> bool {
    false
}

/// Check if CUDA is available (respects GRAPH_EVAL_NO_GPU)
#[cfg(feature = "cuda")]
pub fn cuda_available() -> bool {
    !gpu_disabled() && Device::new_cuda(0).is_ok()
}

/// Check if CUDA is available (always false when `cuda` feature is not enabled)
#[cfg(not(feature = "cuda"))]
pub fn cuda_available() -> bool {
    false
}

/// Check if any GPU is available and enabled
pub fn gpu_available() -> bool {
    !gpu_disabled() && (metal_available() || cuda_available())
}

// ============================================================================
// Losses
// ============================================================================

/// Negative log-likelihood loss over log-probabilities
///
/// `log_probs` is `[N, C]` (output of log-softmax), `targets` is `[N]` class ids.
/// Returns the mean of `-log_probs[i, targets[i]]`.
pub fn nll_loss(log_probs: &Tensor, targets: &Tensor) -> Result<Tensor> {
    let targets = if targets.dtype() == DType::U32 {
        targets.clone()
    } else {
        targets
            .to_dtype(DType::U32)
            .map_err(|e| op_err("nll target cast", e))?
    };
    candle_nn::loss::nll(log_probs, &targets).map_err(|e| op_err("nll", e))
}

/// Binary cross-entropy loss
///
/// BCE = -[y * log(p) + (1-y) * log(1-p)], averaged over every entry.
pub fn binary_cross_entropy(pred: &Tensor, target: &Tensor) -> Result<Tensor> {
    let eps = 1e-7f32;
    let pred_clamped = pred
        .clamp(eps, 1.0 - eps)
        .map_err(|e| EvalError::Tensor(format!("Clamp failed: {}", e)))?;
    let log_p = pred_clamped
        .log()
        .map_err(|e| EvalError::Tensor(format!("Log failed: {}", e)))?;

    // ones_like keeps the dtype (a 1.0 literal would promote to F64)
    let ones = Tensor::ones_like(&pred_clamped)
        .map_err(|e| EvalError::Tensor(format!("ones_like failed: {}", e)))?;
    let one_minus_pred = (&ones - &pred_clamped)
        .map_err(|e| EvalError::Tensor(format!("1-pred failed: {}", e)))?;
    let log_1_p = one_minus_pred
        .log()
        .map_err(|e| EvalError::Tensor(format!("Log 1-p failed: {}", e)))?;

    let target = target
        .to_dtype(pred.dtype())
        .map_err(|e| EvalError::Tensor(format!("BCE target cast failed: {}", e)))?;
    let term1 = target
        .mul(&log_p)
        .map_err(|e| EvalError::Tensor(format!("BCE term1 failed: {}", e)))?;

    let ones_target = Tensor::ones_like(&target)
        .map_err(|e| EvalError::Tensor(format!("ones_like target failed: {}", e)))?;
    let one_minus_target = (&ones_target - &target)
        .map_err(|e| EvalError::Tensor(format!("1-target failed: {}", e)))?;
    let term2 = one_minus_target
        .mul(&log_1_p)
        .map_err(|e| EvalError::Tensor(format!("BCE term2 failed: {}", e)))?;

    let loss = (term1 + term2)?;
    let neg_loss = loss
        .neg()
        .map_err(|e| EvalError::Tensor(format!("Neg failed: {}", e)))?;
    neg_loss
        .mean_all()
        .map_err(|e| EvalError::Tensor(format!("BCE mean failed: {}", e)))
}

fn op_err(op: &str, e: candle_core::Error) -> EvalError {
    EvalError::Tensor(format!("{} failed: {}", op, e))
}
