//! # SeqGAN generator
//!
//! The generator half of a SeqGAN setup on [candle](https://github.com/huggingface/candle):
//! an LSTM token model that samples sequences from a start token and is
//! trained with a reward-weighted policy-gradient loss.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use seqgan::{auto_device, Generator, GeneratorConfig, SamplingContext, TrainOptions};
//!
//! let device = auto_device()?;
//! let config = GeneratorConfig {
//!     vocab_size: 5,
//!     seq_length: 4,
//!     ignored_tokens: Some(vec![0]),
//!     ..Default::default()
//! };
//! let (generator, varmap) = Generator::from_config(&config, &device)?;
//! let mut ctx = SamplingContext::new(Some(42));
//!
//! // [2, 4] u32, first column is the start token
//! let samples = generator.generate(None, None, 2, &mut ctx)?;
//!
//! // Policy-gradient update with per-position rewards
//! let rewards = candle_core::Tensor::ones((2, 4), candle_core::DType::F32, &device)?;
//! let options = TrainOptions::generator(&config);
//! let out = seqgan::train_generator(&generator, varmap.all_vars(), &samples, Some(&rewards), None, &options, &mut ctx)?;
//! ```
//!
//! ## Architecture
//!
//! 1. **LstmCore**: embedding, single-layer LSTM and linear head producing
//!    next-token logits. Implements [`SequenceModel`], which threads the
//!    recurrent state explicitly through every call.
//!
//! 2. **Generator**: wraps a [`SequenceModel`]. `forward` scores a batch,
//!    masks ignored tokens, samples and computes the reward-weighted loss;
//!    `generate` samples token by token from the start token.
//!
//! 3. **Training**: plain SGD over full batches (`train_generator`) plus an
//!    optional supervised pretraining pass (`pretrain_lstm_core`).
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `cuda` | NVIDIA GPU acceleration |
//! | `metal` | Apple Silicon GPU acceleration |
//! | `cli` | `train_generator` sanity-check binary |

pub mod data;
pub mod generation;
pub mod loss;
pub mod models;
pub mod training;

use anyhow::Result;
use candle_core::Device;

pub use data::{read_sample_file, SampleData, Vocabulary};
pub use generation::{ignore_tokens, sample_tokens, SamplingContext};
pub use loss::generator_loss;
pub use models::{Generator, GeneratorConfig, GeneratorOutput, LstmCore, SequenceModel};
pub use training::{pretrain_lstm_core, train_generator, TrainOptions, TrainOutput};

/// Select the best available compute device.
///
/// Tries CUDA, then Metal (when compiled in), and falls back to CPU.
pub fn auto_device() -> Result<Device> {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::cuda_if_available(0) {
            if device.is_cuda() {
                tracing::info!("Using CUDA device");
                return Ok(device);
            }
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            tracing::info!("Using Metal device");
            return Ok(device);
        }
    }

    tracing::info!("Using CPU device");
    Ok(Device::Cpu)
}

/// Parse a device string into a [`Device`].
///
/// Supported formats: `auto`, `cpu`, `cuda`, `cuda:N`, `metal`.
///
/// # Errors
///
/// Returns an error if the device string is unrecognized, the requested
/// backend wasn't compiled in, or hardware initialization fails.
pub fn parse_device(device_str: &str) -> Result<Device> {
    match device_str.to_lowercase().as_str() {
        "auto" => auto_device(),
        "cpu" => Ok(Device::Cpu),
        s if s.starts_with("cuda") => {
            #[cfg(feature = "cuda")]
            {
                let ordinal: usize = match s.strip_prefix("cuda:") {
                    Some(idx) => idx
                        .parse()
                        .map_err(|e| anyhow::anyhow!("invalid CUDA device index: {e}"))?,
                    None => 0,
                };
                Device::cuda_if_available(ordinal)
                    .map_err(|e| anyhow::anyhow!("failed to init CUDA device {ordinal}: {e}"))
            }
            #[cfg(not(feature = "cuda"))]
            anyhow::bail!("CUDA support not compiled in. Rebuild with: cargo build --features cuda")
        }
        "metal" => {
            #[cfg(feature = "metal")]
            {
                Device::new_metal(0)
                    .map_err(|e| anyhow::anyhow!("failed to init Metal device: {e}"))
            }
            #[cfg(not(feature = "metal"))]
            anyhow::bail!(
                "Metal support not compiled in. Rebuild with: cargo build --features metal"
            )
        }
        other => {
            anyhow::bail!("unknown device '{other}'. Supported: auto, cpu, cuda, cuda:N, metal")
        }
    }
}

/// Human-readable label for a [`Device`].
pub fn device_info(device: &Device) -> String {
    match device {
        Device::Cpu => "CPU".to_string(),
        Device::Cuda(_) => "CUDA".to_string(),
        Device::Metal(_) => "Metal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_device() {
        let device = auto_device().unwrap();
        assert!(
            matches!(device, Device::Cpu)
                || matches!(device, Device::Cuda(_))
                || matches!(device, Device::Metal(_))
        );
    }

    #[test]
    fn test_parse_device_cpu() {
        assert!(matches!(parse_device("cpu").unwrap(), Device::Cpu));
        assert!(matches!(parse_device("CPU").unwrap(), Device::Cpu));
    }

    #[test]
    fn test_parse_device_unknown() {
        let err = parse_device("tpu").unwrap_err().to_string();
        assert!(err.contains("unknown device"));
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_parse_device_cuda_not_compiled() {
        assert!(parse_device("cuda:1").is_err());
    }

    #[test]
    fn test_device_info() {
        assert_eq!(device_info(&Device::Cpu), "CPU");
    }
}
