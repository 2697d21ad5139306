//! Categorical sampling over per-row token distributions
//!
//! Supports both deterministic (seeded) and non-deterministic random sampling.
//! Create a [`SamplingContext`] with an optional seed for reproducible outputs.

use anyhow::Result;
use candle_core::{DType, Tensor};

/// RNG state for one training run or generation session.
///
/// All randomness used by the sampler flows through this value, so two
/// contexts never interfere with each other.
///
/// # Determinism
///
/// When created with a seed, the same seed produces identical output
/// across runs. Without a seed, the PCG state is seeded from system time.
pub struct SamplingContext {
    /// PCG state
    state: u64,
}

fn mix_seed(seed: u64) -> u64 {
    // Mix seed with PCG increment to avoid degenerate states
    seed.wrapping_mul(2685821657736338717)
        .wrapping_add(1442695040888963407)
}

impl SamplingContext {
    /// Create a new sampling context with an optional seed.
    ///
    /// When `seed` is `Some`, all sampling is deterministic and reproducible.
    pub fn new(seed: Option<u64>) -> Self {
        let seed = seed.unwrap_or_else(|| {
            use std::time::{SystemTime, UNIX_EPOCH};

            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or_default()
        });
        Self {
            state: mix_seed(seed),
        }
    }

    /// Reset the RNG to the state produced by `seed`.
    pub fn reset(&mut self, seed: u64) {
        self.state = mix_seed(seed);
    }

    /// Generate a random f32 in [0, 1).
    pub(crate) fn rand_f32(&mut self) -> f32 {
        // PCG XSH RR 64/32
        let old_state = self.state;
        self.state = old_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);

        let xorshifted = (((old_state >> 18) ^ old_state) >> 27) as u32;
        let rot = (old_state >> 59) as u32;
        let output = xorshifted.rotate_right(rot);

        // Top 24 bits fit an f32 mantissa exactly, so 1.0 is never produced
        (output >> 8) as f32 / (1u32 << 24) as f32
    }
}

/// Draw one token per row from a `[rows, vocab]` probability tensor.
///
/// Tokens with zero probability are never selected, even when float
/// rounding leaves the cumulative sum slightly below the drawn value.
/// Rows with no positive mass (all zero or NaN) are an error.
///
/// Returns `u32` token indices of shape `[rows]`.
pub fn multinomial_sample(probs: &Tensor, ctx: &mut SamplingContext) -> Result<Tensor> {
    let (rows, _vocab) = probs.dims2()?;
    let table: Vec<Vec<f32>> = probs.to_dtype(DType::F32)?.to_vec2()?;

    let mut picks = Vec::with_capacity(rows);
    for (r, row) in table.iter().enumerate() {
        let total: f32 = row.iter().filter(|p| **p > 0.0).sum();
        if !total.is_finite() || total <= 0.0 {
            anyhow::bail!("row {r} has no positive probability mass to sample from");
        }
        let target = ctx.rand_f32() * total;

        let mut cumsum = 0.0f32;
        let mut choice = None;
        let mut last_positive = 0usize;
        for (idx, &p) in row.iter().enumerate() {
            if p > 0.0 {
                last_positive = idx;
                cumsum += p;
                if cumsum > target {
                    choice = Some(idx);
                    break;
                }
            }
        }
        picks.push(choice.unwrap_or(last_positive) as u32);
    }

    Ok(Tensor::from_vec(picks, rows, probs.device())?)
}

/// Sample one token per distribution from a probability tensor whose last
/// dimension is the vocabulary.
///
/// `[batch, vocab]` yields `[batch]`; `[batch, pos, vocab]` is flattened to
/// `[batch * pos, vocab]`, sampled, and reshaped to `[batch, pos]`.
pub fn sample_tokens(probs: &Tensor, ctx: &mut SamplingContext) -> Result<Tensor> {
    match probs.rank() {
        2 => multinomial_sample(probs, ctx),
        3 => {
            let (batch, positions, vocab) = probs.dims3()?;
            let flat = probs.reshape((batch * positions, vocab))?;
            Ok(multinomial_sample(&flat, ctx)?.reshape((batch, positions))?)
        }
        rank => anyhow::bail!("expected probabilities of rank 2 or 3, got rank {rank}"),
    }
}
