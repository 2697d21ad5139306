//! Interface to the pretrained autoregressive model driven by the generator.

use anyhow::Result;
use candle_core::{Device, Tensor};

/// An autoregressive next-token scorer with explicit recurrent state.
///
/// The state is a value: callers create it with [`init_hidden`](Self::init_hidden),
/// pass it into [`forward`](Self::forward) and receive the updated state back.
/// Nothing is stored on the model between calls.
pub trait SequenceModel {
    type State: Clone;

    /// Number of token IDs the model scores.
    fn vocab_size(&self) -> usize;

    /// Device the model's parameters live on.
    fn device(&self) -> &Device;

    /// Fresh recurrent state for `batch_size` sequences.
    fn init_hidden(&self, batch_size: usize) -> Result<Self::State>;

    /// Score `x` (`[batch, positions]` token IDs), starting from `state`.
    ///
    /// Returns raw logits `[batch, positions, vocab]` and the state after the
    /// last valid position of each row. `lengths`, when given, holds one
    /// valid length per row.
    fn forward(
        &self,
        x: &Tensor,
        lengths: Option<&[usize]>,
        state: &Self::State,
    ) -> Result<(Tensor, Self::State)>;
}
