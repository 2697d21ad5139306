//! Generator: samples token sequences from the LSTM core and scores them with
//! the reward-weighted loss.
//!
//! Two paths:
//! - [`Generator::forward`] scores a full batch in one pass and keeps the
//!   autograd graph so the loss can be backpropagated.
//! - [`Generator::generate`] runs token by token from the start token and is
//!   inference only (logits are detached).

use anyhow::Result;
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{VarBuilder, VarMap};

use super::config::GeneratorConfig;
use super::lstm_core::LstmCore;
use super::sequence::SequenceModel;
use crate::generation::masking::{apply_optional_mask, optional_mask};
use crate::generation::{ignore_tokens, sample_tokens, SamplingContext};
use crate::loss::generator_loss;

/// Result of one differentiable forward pass.
pub struct GeneratorOutput<S> {
    /// Sampled tokens, `[batch, seq]` u32
    pub tokens: Tensor,
    /// Masked next-token probabilities, `[batch, seq, vocab]`
    pub probs: Tensor,
    /// Reward-weighted loss (scalar, attached to the graph)
    pub loss: Tensor,
    /// Recurrent state after the batch
    pub state: S,
}

pub struct Generator<M: SequenceModel = LstmCore> {
    model: M,
    seq_length: usize,
    start_token: u32,
    ignored_tokens: Option<Vec<u32>>,
}

impl Generator<LstmCore> {
    /// Build an LSTM-backed generator with freshly initialized weights.
    ///
    /// The returned [`VarMap`] owns the trainable parameters; pass
    /// `varmap.all_vars()` to the training loops and use it to save or load
    /// weights.
    pub fn from_config(config: &GeneratorConfig, device: &Device) -> Result<(Self, VarMap)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let core = LstmCore::new(config, vb)?;
        let generator = Self::new(
            core,
            config.seq_length,
            config.start_token,
            config.ignored_tokens.clone(),
        )?;
        Ok((generator, varmap))
    }
}

impl<M: SequenceModel> Generator<M> {
    pub fn new(
        model: M,
        seq_length: usize,
        start_token: u32,
        ignored_tokens: Option<Vec<u32>>,
    ) -> Result<Self> {
        let vocab = model.vocab_size();
        if seq_length == 0 {
            anyhow::bail!("seq_length must be at least 1");
        }
        if start_token as usize >= vocab {
            anyhow::bail!("start token {start_token} is outside the vocabulary (size {vocab})");
        }
        if let Some(bad) = ignored_tokens
            .iter()
            .flatten()
            .find(|&&t| t as usize >= vocab)
        {
            anyhow::bail!("ignored token {bad} is outside the vocabulary (size {vocab})");
        }
        Ok(Self {
            model,
            seq_length,
            start_token,
            ignored_tokens,
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn seq_length(&self) -> usize {
        self.seq_length
    }

    pub fn start_token(&self) -> u32 {
        self.start_token
    }

    pub fn ignored_tokens(&self) -> Option<&[u32]> {
        self.ignored_tokens.as_deref()
    }

    /// Fresh recurrent state for `batch_size` sequences.
    pub fn init_hidden(&self, batch_size: usize) -> Result<M::State> {
        self.model.init_hidden(batch_size)
    }

    /// Suppress `ignored` tokens in `scores`. Exposed so rollout-style
    /// samplers built on the generator mask the same way.
    pub fn ignore_tokens(&self, scores: &Tensor, ignored: Option<&[u32]>) -> Result<Tensor> {
        ignore_tokens(scores, ignored)
    }

    /// Score `x`, sample one token per position and compute the loss.
    ///
    /// `rewards` defaults to the per-position probability mass (a constant
    /// proxy, detached from the graph). `ignored` defaults to the generator's
    /// configured set.
    ///
    /// The model always scores every position of `x`. `sentence_lengths`,
    /// when given, only zeroes the rewards past each row's length, so padding
    /// contributes nothing to the loss while `probs` stay the same.
    pub fn forward(
        &self,
        x: &Tensor,
        rewards: Option<&Tensor>,
        ignored: Option<&[u32]>,
        sentence_lengths: Option<&[usize]>,
        state: &M::State,
        ctx: &mut SamplingContext,
    ) -> Result<GeneratorOutput<M::State>> {
        let ignored = ignored.or(self.ignored_tokens.as_deref());

        let (logits, state) = self.model.forward(x, None, state)?;
        let scores = self.ignore_tokens(&logits, ignored)?;
        let probs = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let tokens = sample_tokens(&probs, ctx)?;

        let rewards = match rewards {
            Some(rewards) => rewards.clone(),
            None => probs.sum(2)?.detach(),
        };
        let rewards = match sentence_lengths {
            Some(lengths) => {
                let (batch, positions) = x.dims2()?;
                let mask = length_mask(lengths, batch, positions, x.device())?;
                rewards.to_dtype(DType::F32)?.mul(&mask)?
            }
            None => rewards,
        };
        let loss = generator_loss(&probs, x, &rewards)?;

        Ok(GeneratorOutput {
            tokens,
            probs,
            loss,
            state,
        })
    }

    /// Sample `batch_size` sequences of `seq_length` tokens, each starting
    /// with `start_token` (defaults to the configured one).
    ///
    /// Returns `[batch_size, seq_length]` u32.
    pub fn generate(
        &self,
        start_token: Option<u32>,
        ignored: Option<&[u32]>,
        batch_size: usize,
        ctx: &mut SamplingContext,
    ) -> Result<Tensor> {
        if batch_size == 0 {
            anyhow::bail!("batch_size must be at least 1");
        }
        let start_token = start_token.unwrap_or(self.start_token);
        let vocab = self.model.vocab_size();
        if start_token as usize >= vocab {
            anyhow::bail!("start token {start_token} is outside the vocabulary (size {vocab})");
        }
        let ignored = ignored.or(self.ignored_tokens.as_deref());
        let device = self.model.device();
        let ignore = optional_mask(vocab, ignored, device)?;

        let mut state = self.model.init_hidden(batch_size)?;
        let mut current = Tensor::full(start_token, (batch_size, 1), device)?;
        let mut columns = Vec::with_capacity(self.seq_length);
        columns.push(current.clone());

        for _ in 1..self.seq_length {
            let (logits, next_state) = self.model.forward(&current, None, &state)?;
            let scores = apply_optional_mask(&logits.detach(), ignore.as_ref())?;
            let probs = candle_nn::ops::softmax_last_dim(&scores)?;
            current = sample_tokens(&probs, ctx)?; // [batch, 1]
            columns.push(current.clone());
            state = next_state;
        }

        Ok(Tensor::cat(&columns, 1)?)
    }
}

/// `[batch, positions]` f32 mask with 1.0 before each row's length.
fn length_mask(lengths: &[usize], batch: usize, positions: usize, device: &Device) -> Result<Tensor> {
    if lengths.len() != batch {
        anyhow::bail!("got {} sentence lengths for a batch of {}", lengths.len(), batch);
    }
    if let Some(&bad) = lengths.iter().find(|&&len| len > positions) {
        anyhow::bail!("sentence length {bad} exceeds sequence length {positions}");
    }
    let data: Vec<f32> = lengths
        .iter()
        .flat_map(|&len| (0..positions).map(move |t| if t < len { 1.0 } else { 0.0 }))
        .collect();
    Ok(Tensor::from_vec(data, (batch, positions), device)?)
}
