//! Training loops
//!
//! - [`train_generator`]: reward-weighted policy-gradient training of the
//!   generator (plain SGD, one optimizer step per full batch).
//! - [`pretrain_lstm_core`]: supervised next-token cross-entropy for the
//!   underlying sequence model. No vocabulary masking on this path.

use anyhow::Result;
use candle_core::{DType, Tensor, Var};
use candle_nn::{Optimizer, SGD};

use crate::generation::SamplingContext;
use crate::models::{Generator, GeneratorConfig, SequenceModel};

/// Loop settings shared by generator training and pretraining.
#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 1,
            learning_rate: 0.01,
        }
    }
}

impl TrainOptions {
    /// Generator-training options from a config.
    pub fn generator(config: &GeneratorConfig) -> Self {
        Self {
            epochs: config.num_epochs,
            batch_size: config.batch_size,
            learning_rate: config.learning_rate,
        }
    }

    /// Pretraining options from a config.
    pub fn pretrain(config: &GeneratorConfig) -> Self {
        Self {
            epochs: config.pretrain_epochs,
            ..Self::generator(config)
        }
    }

    fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            anyhow::bail!("epochs must be at least 1");
        }
        if self.batch_size == 0 {
            anyhow::bail!("batch_size must be at least 1");
        }
        Ok(())
    }
}

/// What a generator training run hands back.
///
/// `probs` and `outputs` cover the batches of the final epoch only, in batch
/// order; rows dropped as a partial batch are not included.
pub struct TrainOutput {
    /// `[rows_trained, seq, vocab]`
    pub probs: Tensor,
    /// `[rows_trained, seq]` sampled tokens
    pub outputs: Tensor,
    /// Mean batch loss per epoch
    pub epoch_losses: Vec<f32>,
    /// Trailing rows skipped each epoch because they did not fill a batch
    pub dropped_rows: usize,
}

/// Promote a 1D sequence to `[1, seq]`.
fn as_batch(x: &Tensor) -> Result<Tensor> {
    Ok(match x.rank() {
        1 => x.unsqueeze(0)?,
        2 => x.clone(),
        rank => anyhow::bail!("expected token sequences of rank 1 or 2, got rank {rank}"),
    })
}

/// Number of full batches, warning about the remainder.
fn full_batches(rows: usize, batch_size: usize) -> Result<(usize, usize)> {
    let num_batches = rows / batch_size;
    if num_batches == 0 {
        anyhow::bail!("{rows} sequences do not fill a single batch of {batch_size}");
    }
    let dropped = rows % batch_size;
    if dropped > 0 {
        tracing::warn!(
            "Dropping {} trailing sequence(s) that do not fill a batch of {}",
            dropped,
            batch_size
        );
    }
    Ok((num_batches, dropped))
}

fn mean(values: &[f32]) -> f32 {
    values.iter().sum::<f32>() / values.len() as f32
}

/// Train the generator with reward-weighted loss.
///
/// `rewards` defaults to 1.0 at every position. `sentence_lengths` defaults to
/// the full sequence length per row; a shorter list is padded with it.
/// Positions past a row's length get zero reward (see [`Generator::forward`]).
/// The hidden state is re-initialized for every batch. `vars` are the
/// trainable parameters of the generator's model and are updated in place.
///
/// The update is plain SGD (no momentum, no decay). The reference learning
/// rate is 0.01, the [`TrainOptions`] default; `options.learning_rate` lets
/// callers pick another value.
pub fn train_generator<M: SequenceModel>(
    generator: &Generator<M>,
    vars: Vec<Var>,
    x: &Tensor,
    rewards: Option<&Tensor>,
    sentence_lengths: Option<&[usize]>,
    options: &TrainOptions,
    ctx: &mut SamplingContext,
) -> Result<TrainOutput> {
    options.validate()?;
    let x = as_batch(x)?;
    let (rows, seq_len) = x.dims2()?;

    let rewards = match rewards {
        Some(rewards) => {
            let rewards = as_batch(rewards)?;
            if rewards.dims() != x.dims() {
                anyhow::bail!(
                    "rewards shape {:?} does not match input shape {:?}",
                    rewards.dims(),
                    x.dims()
                );
            }
            rewards.to_dtype(DType::F32)?
        }
        None => Tensor::ones((rows, seq_len), DType::F32, x.device())?,
    };

    let mut lengths = sentence_lengths.map(<[usize]>::to_vec).unwrap_or_default();
    lengths.resize(rows, seq_len);

    let batch_size = options.batch_size;
    let (num_batches, dropped_rows) = full_batches(rows, batch_size)?;

    let mut optimizer = SGD::new(vars, options.learning_rate)?;
    tracing::info!(
        "Training generator: {} epoch(s), {} batch(es) of {}, lr {}",
        options.epochs,
        num_batches,
        batch_size,
        options.learning_rate
    );

    let mut epoch_losses = Vec::with_capacity(options.epochs);
    let mut probs_all = Vec::new();
    let mut outputs_all = Vec::new();

    for epoch in 0..options.epochs {
        probs_all.clear();
        outputs_all.clear();
        let mut batch_losses = Vec::with_capacity(num_batches);

        for batch in 0..num_batches {
            let start = batch * batch_size;
            let x_batch = x.narrow(0, start, batch_size)?;
            let r_batch = rewards.narrow(0, start, batch_size)?;
            let l_batch = &lengths[start..start + batch_size];

            let state = generator.init_hidden(batch_size)?;
            let out = generator.forward(&x_batch, Some(&r_batch), None, Some(l_batch), &state, ctx)?;
            optimizer.backward_step(&out.loss)?;

            let loss = out.loss.to_dtype(DType::F32)?.to_scalar::<f32>()?;
            tracing::debug!(epoch, batch, loss, "generator batch");
            batch_losses.push(loss);
            probs_all.push(out.probs.detach());
            outputs_all.push(out.tokens);
        }

        let avg = mean(&batch_losses);
        tracing::info!("epoch: {} loss: {}", epoch, avg);
        epoch_losses.push(avg);
    }

    Ok(TrainOutput {
        probs: Tensor::cat(&probs_all, 0)?,
        outputs: Tensor::cat(&outputs_all, 0)?,
        epoch_losses,
        dropped_rows,
    })
}

/// Next-token targets: `x` shifted left by one with `end_token` appended.
fn shifted_targets(x: &Tensor, end_token: u32) -> Result<Tensor> {
    let (rows, seq_len) = x.dims2()?;
    let x = x.to_dtype(DType::U32)?;
    let end = Tensor::full(end_token, (rows, 1), x.device())?;
    if seq_len == 1 {
        return Ok(end);
    }
    Ok(Tensor::cat(&[&x.narrow(1, 1, seq_len - 1)?, &end], 1)?)
}

/// Pretrain a sequence model on `x` with mean next-token cross-entropy.
///
/// Every token, sentinels included, is a valid target here. Returns the mean
/// batch loss per epoch.
pub fn pretrain_lstm_core<M: SequenceModel>(
    model: &M,
    vars: Vec<Var>,
    x: &Tensor,
    end_token: u32,
    options: &TrainOptions,
) -> Result<Vec<f32>> {
    options.validate()?;
    let x = as_batch(x)?;
    let (rows, seq_len) = x.dims2()?;
    let vocab = model.vocab_size();
    if end_token as usize >= vocab {
        anyhow::bail!("end token {end_token} is outside the vocabulary (size {vocab})");
    }
    let targets = shifted_targets(&x, end_token)?;

    let batch_size = options.batch_size;
    let (num_batches, _) = full_batches(rows, batch_size)?;

    let mut optimizer = SGD::new(vars, options.learning_rate)?;
    tracing::info!(
        "Pretraining sequence model: {} epoch(s), {} batch(es) of {}",
        options.epochs,
        num_batches,
        batch_size
    );

    let mut epoch_losses = Vec::with_capacity(options.epochs);
    for epoch in 0..options.epochs {
        let mut batch_losses = Vec::with_capacity(num_batches);
        for batch in 0..num_batches {
            let start = batch * batch_size;
            let x_batch = x.narrow(0, start, batch_size)?;
            let y_batch = targets.narrow(0, start, batch_size)?;

            let state = model.init_hidden(batch_size)?;
            let (logits, _) = model.forward(&x_batch, None, &state)?;
            let logits = logits.reshape((batch_size * seq_len, vocab))?;
            let loss = candle_nn::loss::cross_entropy(&logits, &y_batch.flatten_all()?)?;
            optimizer.backward_step(&loss)?;

            batch_losses.push(loss.to_dtype(DType::F32)?.to_scalar::<f32>()?);
        }

        let avg = mean(&batch_losses);
        tracing::info!("pretrain epoch: {} loss: {}", epoch, avg);
        epoch_losses.push(avg);
    }

    Ok(epoch_losses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    fn small_config() -> GeneratorConfig {
        GeneratorConfig {
            vocab_size: 6,
            seq_length: 4,
            emb_dim: 4,
            hidden_dim: 8,
            ignored_tokens: Some(vec![0]),
            ..Default::default()
        }
    }

    fn snapshot(varmap: &VarMap) -> Vec<Vec<f32>> {
        varmap
            .all_vars()
            .iter()
            .map(|v| v.as_tensor().flatten_all().unwrap().to_vec1().unwrap())
            .collect()
    }

    fn corpus(device: &Device) -> Tensor {
        Tensor::new(
            &[
                [0u32, 2, 3, 4],
                [0, 3, 4, 5],
                [0, 2, 3, 4],
                [0, 3, 4, 5],
                [0, 2, 2, 2],
            ],
            device,
        )
        .unwrap()
    }

    #[test]
    fn test_shifted_targets() {
        let device = Device::Cpu;
        let x = Tensor::new(&[[0u32, 2, 3], [0, 4, 5]], &device).unwrap();
        let y: Vec<Vec<u32>> = shifted_targets(&x, 1).unwrap().to_vec2().unwrap();
        assert_eq!(y, vec![vec![2, 3, 1], vec![4, 5, 1]]);

        let single = Tensor::new(&[[3u32]], &device).unwrap();
        let y: Vec<Vec<u32>> = shifted_targets(&single, 1).unwrap().to_vec2().unwrap();
        assert_eq!(y, vec![vec![1]]);
    }

    #[test]
    fn test_train_generator_shapes_and_dropped_remainder() {
        let device = Device::Cpu;
        let (generator, varmap) = Generator::from_config(&small_config(), &device).unwrap();
        let mut ctx = SamplingContext::new(Some(3));
        let options = TrainOptions {
            epochs: 2,
            batch_size: 2,
            learning_rate: 0.01,
        };
        let out = train_generator(
            &generator,
            varmap.all_vars(),
            &corpus(&device),
            None,
            None,
            &options,
            &mut ctx,
        )
        .unwrap();

        assert_eq!(out.dropped_rows, 1);
        assert_eq!(out.epoch_losses.len(), 2);
        assert!(out.epoch_losses.iter().all(|l| l.is_finite()));
        assert_eq!(out.probs.dims(), &[4, 4, 6]);
        assert_eq!(out.outputs.dims(), &[4, 4]);
        let tokens: Vec<Vec<u32>> = out.outputs.to_vec2().unwrap();
        assert!(tokens.iter().flatten().all(|&t| t != 0 && t < 6));
    }

    #[test]
    fn test_zero_rewards_leave_parameters_unchanged() {
        let device = Device::Cpu;
        let (generator, varmap) = Generator::from_config(&small_config(), &device).unwrap();
        let before = snapshot(&varmap);

        let x = corpus(&device);
        let rewards = Tensor::zeros(x.dims(), DType::F32, &device).unwrap();
        let mut ctx = SamplingContext::new(Some(4));
        let out = train_generator(
            &generator,
            varmap.all_vars(),
            &x,
            Some(&rewards),
            None,
            &TrainOptions {
                epochs: 1,
                batch_size: 1,
                learning_rate: 0.01,
            },
            &mut ctx,
        )
        .unwrap();

        assert!(out.epoch_losses[0].abs() < 1e-12);
        assert_eq!(snapshot(&varmap), before);
    }

    #[test]
    fn test_positive_rewards_update_parameters() {
        let device = Device::Cpu;
        let (generator, varmap) = Generator::from_config(&small_config(), &device).unwrap();
        let before = snapshot(&varmap);
        let mut ctx = SamplingContext::new(Some(4));
        train_generator(
            &generator,
            varmap.all_vars(),
            &corpus(&device),
            None,
            None,
            &TrainOptions {
                epochs: 1,
                ..Default::default()
            },
            &mut ctx,
        )
        .unwrap();
        assert_ne!(snapshot(&varmap), before);
    }

    #[test]
    fn test_train_generator_accepts_single_sequence() {
        let device = Device::Cpu;
        let (generator, varmap) = Generator::from_config(&small_config(), &device).unwrap();
        let x = Tensor::new(&[0u32, 2, 3, 4], &device).unwrap();
        let mut ctx = SamplingContext::new(Some(9));
        let out = train_generator(
            &generator,
            varmap.all_vars(),
            &x,
            None,
            Some(&[3][..]),
            &TrainOptions {
                epochs: 1,
                ..Default::default()
            },
            &mut ctx,
        )
        .unwrap();
        assert_eq!(out.outputs.dims(), &[1, 4]);
    }

    #[test]
    fn test_train_generator_errors() {
        let device = Device::Cpu;
        let (generator, varmap) = Generator::from_config(&small_config(), &device).unwrap();
        let x = corpus(&device);
        let mut ctx = SamplingContext::new(Some(9));

        let too_big = TrainOptions {
            batch_size: 6,
            ..Default::default()
        };
        assert!(train_generator(&generator, varmap.all_vars(), &x, None, None, &too_big, &mut ctx).is_err());

        let bad_rewards = Tensor::ones((5, 3), DType::F32, &device).unwrap();
        assert!(train_generator(
            &generator,
            varmap.all_vars(),
            &x,
            Some(&bad_rewards),
            None,
            &TrainOptions::default(),
            &mut ctx
        )
        .is_err());

        let no_epochs = TrainOptions {
            epochs: 0,
            ..Default::default()
        };
        assert!(train_generator(&generator, varmap.all_vars(), &x, None, None, &no_epochs, &mut ctx).is_err());
    }

    #[test]
    fn test_pretraining_reduces_loss() {
        let device = Device::Cpu;
        let (generator, varmap) = Generator::from_config(&small_config(), &device).unwrap();
        let losses = pretrain_lstm_core(
            generator.model(),
            varmap.all_vars(),
            &corpus(&device),
            1,
            &TrainOptions {
                epochs: 40,
                batch_size: 1,
                learning_rate: 0.1,
            },
        )
        .unwrap();
        assert_eq!(losses.len(), 40);
        assert!(losses[39] < losses[0], "{losses:?}");
    }

    #[test]
    fn test_default_learning_rate() {
        assert!((TrainOptions::default().learning_rate - 0.01).abs() < 1e-12);
        let from_default = TrainOptions::generator(&GeneratorConfig::default());
        assert!((from_default.learning_rate - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_options_from_config() {
        let config = GeneratorConfig {
            num_epochs: 3,
            pretrain_epochs: 7,
            batch_size: 4,
            learning_rate: 0.05,
            ..Default::default()
        };
        let gen = TrainOptions::generator(&config);
        assert_eq!(gen.epochs, 3);
        assert_eq!(gen.batch_size, 4);
        let pre = TrainOptions::pretrain(&config);
        assert_eq!(pre.epochs, 7);
        assert!((pre.learning_rate - 0.05).abs() < 1e-12);
    }
}
