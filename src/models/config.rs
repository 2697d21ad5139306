//! Generator configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for the LSTM core, the generator and its training loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Number of distinct token IDs
    #[serde(default = "default_vocab_size")]
    pub vocab_size: usize,

    /// Length of every generated / trained sequence
    #[serde(default = "default_seq_length")]
    pub seq_length: usize,

    /// Token embedding dimension
    #[serde(default = "default_emb_dim")]
    pub emb_dim: usize,

    /// LSTM hidden dimension
    #[serde(default = "default_hidden_dim")]
    pub hidden_dim: usize,

    /// Token every generated sequence starts with
    #[serde(default)]
    pub start_token: u32,

    /// Tokens never produced by sampling (e.g. START / END sentinels)
    #[serde(default)]
    pub ignored_tokens: Option<Vec<u32>>,

    /// Plain SGD learning rate
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    /// Generator training epochs
    #[serde(default = "default_num_epochs")]
    pub num_epochs: usize,

    /// Pretraining epochs for the LSTM core
    #[serde(default = "default_pretrain_epochs")]
    pub pretrain_epochs: usize,

    /// Sequences per optimizer step
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Compute device (auto, cpu, cuda, cuda:N, metal)
    #[serde(default = "default_device")]
    pub device: String,
}

fn default_vocab_size() -> usize {
    10
}
fn default_seq_length() -> usize {
    20
}
fn default_emb_dim() -> usize {
    32
}
fn default_hidden_dim() -> usize {
    32
}
fn default_learning_rate() -> f64 {
    0.01
}
fn default_num_epochs() -> usize {
    10
}
fn default_pretrain_epochs() -> usize {
    10
}
fn default_batch_size() -> usize {
    1
}
fn default_device() -> String {
    "cpu".to_string()
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            vocab_size: default_vocab_size(),
            seq_length: default_seq_length(),
            emb_dim: default_emb_dim(),
            hidden_dim: default_hidden_dim(),
            start_token: 0,
            ignored_tokens: None,
            learning_rate: default_learning_rate(),
            num_epochs: default_num_epochs(),
            pretrain_epochs: default_pretrain_epochs(),
            batch_size: default_batch_size(),
            device: default_device(),
        }
    }
}

impl GeneratorConfig {
    /// Load from a JSON file and validate. Missing fields take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Self::parse_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file without validating.
    ///
    /// For callers that fill in fields (such as `vocab_size` from the data)
    /// before calling [`validate`](Self::validate).
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Check the structural constraints every component relies on.
    pub fn validate(&self) -> Result<()> {
        if self.vocab_size == 0 {
            anyhow::bail!("vocab_size must be at least 1");
        }
        if self.seq_length == 0 {
            anyhow::bail!("seq_length must be at least 1");
        }
        if self.batch_size == 0 {
            anyhow::bail!("batch_size must be at least 1");
        }
        if self.emb_dim == 0 || self.hidden_dim == 0 {
            anyhow::bail!("emb_dim and hidden_dim must be at least 1");
        }
        if self.start_token as usize >= self.vocab_size {
            anyhow::bail!(
                "start_token {} is outside the vocabulary (size {})",
                self.start_token,
                self.vocab_size
            );
        }
        if let Some(ignored) = &self.ignored_tokens {
            if let Some(bad) = ignored.iter().find(|&&t| t as usize >= self.vocab_size) {
                anyhow::bail!(
                    "ignored token {} is outside the vocabulary (size {})",
                    bad,
                    self.vocab_size
                );
            }
        }
        Ok(())
    }

    /// Ignored tokens as a slice, `None` when unset.
    pub fn ignored(&self) -> Option<&[u32]> {
        self.ignored_tokens.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GeneratorConfig::default();
        assert_eq!(config.seq_length, 20);
        assert!((config.learning_rate - 0.01).abs() < 1e-12);
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.start_token, 0);
        assert!(config.ignored().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"vocab_size": 50, "seq_length": 8, "ignored_tokens": [0, 1]}"#;
        let config: GeneratorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.vocab_size, 50);
        assert_eq!(config.seq_length, 8);
        assert_eq!(config.ignored(), Some(&[0u32, 1][..]));
        assert_eq!(config.hidden_dim, 32);
        assert_eq!(config.device, "cpu");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_len = GeneratorConfig {
            seq_length: 0,
            ..Default::default()
        };
        assert!(zero_len.validate().is_err());

        let bad_start = GeneratorConfig {
            vocab_size: 4,
            start_token: 4,
            ..Default::default()
        };
        assert!(bad_start.validate().is_err());

        let bad_ignored = GeneratorConfig {
            vocab_size: 4,
            ignored_tokens: Some(vec![0, 9]),
            ..Default::default()
        };
        assert!(bad_ignored.validate().is_err());

        let zero_batch = GeneratorConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(zero_batch.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("generator.json");
        std::fs::write(&path, r#"{"vocab_size": 12, "num_epochs": 3}"#).unwrap();
        let config = GeneratorConfig::from_file(&path).unwrap();
        assert_eq!(config.vocab_size, 12);
        assert_eq!(config.num_epochs, 3);

        std::fs::write(&path, r#"{"vocab_size": 0}"#).unwrap();
        assert!(GeneratorConfig::from_file(&path).is_err());
    }

    #[test]
    fn test_parse_file_defers_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("generator.json");
        std::fs::write(&path, r#"{"ignored_tokens": [0, 1, 12]}"#).unwrap();

        // Token 12 is outside the default vocabulary of 10
        assert!(GeneratorConfig::from_file(&path).is_err());

        let mut config = GeneratorConfig::parse_file(&path).unwrap();
        assert!(config.validate().is_err());
        config.vocab_size = 50;
        assert!(config.validate().is_ok());
        assert_eq!(config.ignored(), Some(&[0u32, 1, 12][..]));

        std::fs::write(&path, "not json").unwrap();
        assert!(GeneratorConfig::parse_file(&path).is_err());
    }
}
