//! Reward-weighted policy-gradient loss for the generator
//!
//! ```text
//! reference:   [batch, seq]          -> flatten -> [batch*seq]
//! one_hot:     [batch*seq, vocab]    indicator of the reference token
//! predictions: [batch, seq, vocab]   -> flatten -> [batch*seq, vocab]
//! log_probs  = ln(clamp(predictions, 1e-20, 1.0))
//! picked     = sum(one_hot * log_probs, axis=1)           [batch*seq]
//! loss       = -sum(picked * flatten(rewards))            scalar
//! ```
//!
//! The loss is a sum, not a mean: it grows with batch size and sequence length.

use anyhow::Result;
use candle_core::{DType, Tensor};

/// Lower bound applied to probabilities before taking the logarithm.
pub const PROB_FLOOR: f64 = 1e-20;

/// Compute the reward-weighted negative log-likelihood of `reference` tokens
/// under `predictions`.
///
/// `predictions` is `[batch, seq, vocab]`, `reference` and `rewards` are
/// `[batch, seq]`. Returns a differentiable scalar tensor.
pub fn generator_loss(predictions: &Tensor, reference: &Tensor, rewards: &Tensor) -> Result<Tensor> {
    let (batch, positions, vocab) = predictions.dims3()?;
    if reference.dims() != [batch, positions].as_slice() {
        anyhow::bail!(
            "reference shape {:?} does not match predictions {:?}",
            reference.dims(),
            predictions.dims()
        );
    }
    if rewards.dims() != reference.dims() {
        anyhow::bail!(
            "rewards shape {:?} does not match reference {:?}",
            rewards.dims(),
            reference.dims()
        );
    }

    let indices = reference.flatten_all()?.to_dtype(DType::U32)?;
    if indices.elem_count() > 0 {
        // Reduced on the device; only the maximum ID is read back.
        let max_id = indices.max_all()?.to_scalar::<u32>()?;
        if max_id as usize >= vocab {
            anyhow::bail!("reference token {max_id} is outside the vocabulary (size {vocab})");
        }
    }

    let dtype = predictions.dtype();
    let one_hot = candle_nn::encoding::one_hot(indices, vocab, 1f32, 0f32)?.to_dtype(dtype)?;
    let flat = predictions.reshape((batch * positions, vocab))?;
    let log_probs = flat.clamp(PROB_FLOOR, 1.0)?.log()?;

    let picked = (one_hot * log_probs)?.sum(1)?;
    let weighted = (picked * rewards.flatten_all()?.to_dtype(dtype)?)?;
    Ok(weighted.sum_all()?.neg()?)
}
