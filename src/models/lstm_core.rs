//! LSTM core: the autoregressive token model behind the generator
//!
//! - Token embedding (vocab_size → emb_dim)
//! - Single-layer LSTM (emb_dim → hidden_dim)
//! - Linear head producing next-token logits (hidden_dim → vocab_size)

use anyhow::Result;
use candle_core::{DType, Device, IndexOp, Module, Tensor};
use candle_nn::rnn::LSTMState;
use candle_nn::{embedding, linear, lstm, Embedding, LSTMConfig, Linear, VarBuilder, LSTM, RNN};

use super::config::GeneratorConfig;
use super::sequence::SequenceModel;

pub struct LstmCore {
    embedding: Embedding,
    lstm: LSTM,
    head: Linear,
    vocab_size: usize,
    device: Device,
}

impl LstmCore {
    pub fn new(config: &GeneratorConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let device = vb.device().clone();
        let embedding = embedding(config.vocab_size, config.emb_dim, vb.pp("embedding"))?;
        let lstm = lstm(
            config.emb_dim,
            config.hidden_dim,
            LSTMConfig::default(),
            vb.pp("lstm"),
        )?;
        let head = linear(config.hidden_dim, config.vocab_size, vb.pp("head"))?;
        Ok(Self {
            embedding,
            lstm,
            head,
            vocab_size: config.vocab_size,
            device,
        })
    }

    /// `[batch, positions, 1]` mask with 1.0 at valid positions.
    fn length_mask(&self, lengths: &[usize], positions: usize) -> Result<Tensor> {
        let mut data = Vec::with_capacity(lengths.len() * positions);
        for &len in lengths {
            data.extend((0..positions).map(|t| if t < len { 1.0f32 } else { 0.0 }));
        }
        Ok(Tensor::from_vec(data, (lengths.len(), positions, 1), &self.device)?)
    }

    /// State after the last valid position of each row.
    fn final_state(
        &self,
        states: &[LSTMState],
        init: &LSTMState,
        lengths: &[usize],
    ) -> Result<LSTMState> {
        let mut h = Vec::with_capacity(lengths.len());
        let mut c = Vec::with_capacity(lengths.len());
        for (row, &len) in lengths.iter().enumerate() {
            let source = if len == 0 { init } else { &states[len - 1] };
            h.push(source.h().i(row..row + 1)?);
            c.push(source.c().i(row..row + 1)?);
        }
        Ok(LSTMState {
            h: Tensor::cat(&h, 0)?,
            c: Tensor::cat(&c, 0)?,
        })
    }
}

impl SequenceModel for LstmCore {
    type State = LSTMState;

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn init_hidden(&self, batch_size: usize) -> Result<LSTMState> {
        Ok(self.lstm.zero_state(batch_size)?)
    }

    fn forward(
        &self,
        x: &Tensor,
        lengths: Option<&[usize]>,
        state: &LSTMState,
    ) -> Result<(Tensor, LSTMState)> {
        let (batch, positions) = x.dims2()?;
        if positions == 0 {
            anyhow::bail!("cannot score an empty sequence");
        }
        let x = match x.dtype() {
            DType::U32 | DType::I64 => x.clone(),
            _ => x.to_dtype(DType::U32)?,
        };

        let embedded = self.embedding.forward(&x)?; // [batch, positions, emb_dim]
        let states = self.lstm.seq_init(&embedded, state)?;
        let hidden = self.lstm.states_to_tensor(&states)?; // [batch, positions, hidden_dim]

        let (hidden, final_state) = match lengths {
            Some(lengths) => {
                if lengths.len() != batch {
                    anyhow::bail!(
                        "got {} sentence lengths for a batch of {}",
                        lengths.len(),
                        batch
                    );
                }
                if let Some(&bad) = lengths.iter().find(|&&len| len > positions) {
                    anyhow::bail!("sentence length {bad} exceeds sequence length {positions}");
                }
                if lengths.iter().all(|&len| len == positions) {
                    (hidden, states[positions - 1].clone())
                } else {
                    let mask = self.length_mask(lengths, positions)?;
                    let masked = hidden.broadcast_mul(&mask)?;
                    (masked, self.final_state(&states, state, lengths)?)
                }
            }
            None => (hidden, states[positions - 1].clone()),
        };

        let logits = self.head.forward(&hidden)?; // [batch, positions, vocab]
        Ok((logits, final_state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    fn small_core(device: &Device) -> (LstmCore, VarMap) {
        let config = GeneratorConfig {
            vocab_size: 7,
            seq_length: 5,
            emb_dim: 4,
            hidden_dim: 6,
            ..Default::default()
        };
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        (LstmCore::new(&config, vb).unwrap(), varmap)
    }

    #[test]
    fn test_forward_shapes() {
        let device = Device::Cpu;
        let (core, _varmap) = small_core(&device);
        let x = Tensor::new(&[[0u32, 1, 2, 3, 4], [4, 3, 2, 1, 0]], &device).unwrap();
        let state = core.init_hidden(2).unwrap();
        let (logits, next) = core.forward(&x, None, &state).unwrap();
        assert_eq!(logits.dims(), &[2, 5, 7]);
        assert_eq!(next.h().dims(), &[2, 6]);
        assert_eq!(next.c().dims(), &[2, 6]);
    }

    #[test]
    fn test_state_threading_matches_full_sequence() {
        let device = Device::Cpu;
        let (core, _varmap) = small_core(&device);
        let x = Tensor::new(&[[1u32, 2, 3]], &device).unwrap();

        let init = core.init_hidden(1).unwrap();
        let (full, _) = core.forward(&x, None, &init).unwrap();

        let mut state = core.init_hidden(1).unwrap();
        let mut last = None;
        for t in 0..3 {
            let step = x.narrow(1, t, 1).unwrap();
            let (logits, next) = core.forward(&step, None, &state).unwrap();
            state = next;
            last = Some(logits);
        }
        let a: Vec<f32> = full.i((0, 2)).unwrap().to_vec1().unwrap();
        let b: Vec<f32> = last.unwrap().i((0, 0)).unwrap().to_vec1().unwrap();
        for (va, vb) in a.iter().zip(b.iter()) {
            assert!((va - vb).abs() < 1e-5);
        }
    }

    #[test]
    fn test_lengths_select_final_state() {
        let device = Device::Cpu;
        let (core, _varmap) = small_core(&device);
        let x = Tensor::new(&[[1u32, 2, 3], [1, 2, 3]], &device).unwrap();
        let init = core.init_hidden(2).unwrap();

        let (_, full_state) = core.forward(&x, None, &init).unwrap();
        let (_, short_state) = core.forward(&x, Some(&[3, 1][..]), &init).unwrap();

        let (_, prefix_state) = core
            .forward(&x.narrow(1, 0, 1).unwrap(), None, &init)
            .unwrap();

        let full_h: Vec<Vec<f32>> = full_state.h().to_vec2().unwrap();
        let short_h: Vec<Vec<f32>> = short_state.h().to_vec2().unwrap();
        let prefix_h: Vec<Vec<f32>> = prefix_state.h().to_vec2().unwrap();
        let close = |a: &[f32], b: &[f32]| a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-6);
        assert!(close(&short_h[0], &full_h[0]));
        assert!(close(&short_h[1], &prefix_h[1]));
        assert!(!close(&short_h[1], &full_h[1]));
    }

    #[test]
    fn test_lengths_validated() {
        let device = Device::Cpu;
        let (core, _varmap) = small_core(&device);
        let x = Tensor::new(&[[1u32, 2, 3]], &device).unwrap();
        let init = core.init_hidden(1).unwrap();
        assert!(core.forward(&x, Some(&[4][..]), &init).is_err());
        assert!(core.forward(&x, Some(&[3, 3][..]), &init).is_err());
    }

    #[test]
    fn test_out_of_range_token_fails() {
        let device = Device::Cpu;
        let (core, _varmap) = small_core(&device);
        let x = Tensor::new(&[[1u32, 99]], &device).unwrap();
        let init = core.init_hidden(1).unwrap();
        assert!(core.forward(&x, None, &init).is_err());
    }
}
