//! Sampling utilities for sequence generation
//!
//! This module provides:
//! - Per-session RNG via [`SamplingContext`] for reproducible sampling
//! - Categorical (multinomial) sampling over token distributions
//! - Vocabulary masking of sentinel tokens before softmax

pub mod masking;
mod sampling;

pub use masking::{
    apply_ignore_mask, build_ignore_mask, ignore_tokens, IgnoreMask, IGNORED_SCORE,
};
pub use sampling::{multinomial_sample, sample_tokens, SamplingContext};
