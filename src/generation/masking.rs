//! Vocabulary masking
//!
//! Suppresses sentinel tokens (START, END, ...) during sampling by writing a
//! large negative score at their indices before softmax. Only the generator
//! and rollout-style sampling paths use this; pretraining scores every token.

use anyhow::Result;
use candle_core::{Device, Tensor};

/// Score written at ignored indices. Finite, so a fully masked row degrades
/// to a uniform distribution instead of NaN.
pub const IGNORED_SCORE: f32 = -1.0e30;

/// Pre-computed mask over the vocabulary.
///
/// Build once with [`build_ignore_mask`], then apply cheaply at each step
/// with [`apply_ignore_mask`].
#[derive(Debug, Clone)]
pub struct IgnoreMask {
    /// 1 at positions to suppress. Shape `[vocab]`.
    mask: Tensor,
    vocab_size: usize,
}

impl IgnoreMask {
    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }
}

/// Build a reusable mask for `ignored` over a vocabulary of `vocab_size`.
///
/// Token IDs outside `[0, vocab_size)` are rejected.
pub fn build_ignore_mask(
    vocab_size: usize,
    ignored: &[u32],
    device: &Device,
) -> Result<IgnoreMask> {
    let mut mask_data = vec![0u8; vocab_size];
    for &token in ignored {
        let idx = token as usize;
        if idx >= vocab_size {
            anyhow::bail!("ignored token {token} is outside the vocabulary (size {vocab_size})");
        }
        mask_data[idx] = 1;
    }
    let mask = Tensor::from_vec(mask_data, vocab_size, device)?;
    Ok(IgnoreMask { mask, vocab_size })
}

/// Apply a pre-built mask to `[batch, vocab]` or `[batch, pos, vocab]` scores.
///
/// Returns a new tensor; `scores` is left untouched.
pub fn apply_ignore_mask(scores: &Tensor, ignore: &IgnoreMask) -> Result<Tensor> {
    let rank = scores.rank();
    if rank != 2 && rank != 3 {
        anyhow::bail!("expected scores of rank 2 or 3, got rank {rank}");
    }
    let vocab = scores.dim(rank - 1)?;
    if vocab != ignore.vocab_size {
        anyhow::bail!(
            "score vocabulary dimension {vocab} does not match mask size {}",
            ignore.vocab_size
        );
    }

    let mask = ignore.mask.broadcast_as(scores.shape())?;
    let fill = Tensor::new(&[IGNORED_SCORE], scores.device())?
        .to_dtype(scores.dtype())?
        .broadcast_as(scores.shape())?;
    Ok(mask.where_cond(&fill, scores)?)
}

/// Suppress `ignored` tokens in `scores` (builds the mask each call; use the
/// mask variant for hot loops).
///
/// `None` or an empty set returns the scores unchanged.
pub fn ignore_tokens(scores: &Tensor, ignored: Option<&[u32]>) -> Result<Tensor> {
    match ignored {
        Some(tokens) if !tokens.is_empty() => {
            let vocab = scores.dim(candle_core::D::Minus1)?;
            let ignore = build_ignore_mask(vocab, tokens, scores.device())?;
            apply_ignore_mask(scores, &ignore)
        }
        _ => Ok(scores.clone()),
    }
}

/// Helper for callers that hold an optional ignore set.
pub(crate) fn optional_mask(
    vocab_size: usize,
    ignored: Option<&[u32]>,
    device: &Device,
) -> Result<Option<IgnoreMask>> {
    match ignored {
        Some(tokens) if !tokens.is_empty() => {
            Ok(Some(build_ignore_mask(vocab_size, tokens, device)?))
        }
        _ => Ok(None),
    }
}

/// Apply an optional mask, passing scores through when there is none.
pub(crate) fn apply_optional_mask(scores: &Tensor, ignore: Option<&IgnoreMask>) -> Result<Tensor> {
    match ignore {
        Some(ignore) => apply_ignore_mask(scores, ignore),
        None => Ok(scores.clone()),
    }
}
