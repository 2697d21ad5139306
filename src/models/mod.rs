//! Neural network models for the SeqGAN generator
//!
//! This module contains:
//! - `sequence`: The `SequenceModel` trait (explicit hidden-state threading)
//! - `lstm_core`: Embedding + LSTM + linear head implementing `SequenceModel`
//! - `generator`: Sampling generator and differentiable forward pass
//! - `config`: Generator / training configuration

pub mod config;
pub mod generator;
pub mod lstm_core;
pub mod sequence;

pub use config::GeneratorConfig;
pub use generator::{Generator, GeneratorOutput};
pub use lstm_core::LstmCore;
pub use sequence::SequenceModel;
