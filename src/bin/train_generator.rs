//! CLI sanity check for the SeqGAN generator
//!
//! Loads a whitespace-tokenized sample file, pretrains the LSTM core on it,
//! runs reward-weighted generator training (all rewards 1.0) and prints a few
//! generated sentences.
//!
//! Usage:
//!     cargo run --features cli --bin train_generator -- --data samples.txt
//!     cargo run --features cli --bin train_generator -- --data samples.txt --config generator.json --save out/
//!     cargo run --features cli --bin train_generator -- --data samples.txt --log-file train.log --seed 7

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

use seqgan::data::{read_sample_file, END_TOKEN, START_TOKEN};
use seqgan::{
    device_info, parse_device, pretrain_lstm_core, train_generator, Generator, GeneratorConfig,
    SamplingContext, TrainOptions,
};

/// Train the generator on a sample file and print generated sentences
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Sample file, one whitespace-tokenized sentence per line
    #[arg(short, long)]
    data: PathBuf,

    /// Generator config JSON (missing fields use defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Generator training epochs (overrides config)
    #[arg(short, long)]
    epochs: Option<usize>,

    /// Pretraining epochs, 0 to skip (overrides config)
    #[arg(long)]
    pretrain_epochs: Option<usize>,

    /// Sequences per optimizer step (overrides config)
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// SGD learning rate (overrides config)
    #[arg(long)]
    learning_rate: Option<f64>,

    /// Random seed for sampling
    #[arg(short, long, default_value_t = 42)]
    seed: u64,

    /// Number of sentences to generate after training
    #[arg(short = 'n', long, default_value_t = 5)]
    samples: usize,

    /// Device (auto, cpu, cuda, cuda:N, metal; overrides config)
    #[arg(long)]
    device: Option<String>,

    /// Load initial weights from a safetensors file
    #[arg(long)]
    load: Option<PathBuf>,

    /// Directory to write weights, vocabulary and config to
    #[arg(long)]
    save: Option<PathBuf>,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<GeneratorConfig> {
    let mut config = match &args.config {
        // Validated once the vocabulary size is known
        Some(path) => GeneratorConfig::parse_file(path)?,
        None => GeneratorConfig::default(),
    };
    if let Some(epochs) = args.epochs {
        config.num_epochs = epochs;
    }
    if let Some(epochs) = args.pretrain_epochs {
        config.pretrain_epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(lr) = args.learning_rate {
        config.learning_rate = lr;
    }
    if let Some(device) = &args.device {
        config.device = device.clone();
    }
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_file.as_deref())?;

    let mut config = load_config(&args)?;
    let data = read_sample_file(&args.data, config.seq_length)?;

    // Vocabulary comes from the data; sentinels are never sampled.
    config.vocab_size = data.vocabulary.len();
    config.start_token = START_TOKEN;
    if config.ignored_tokens.is_none() {
        config.ignored_tokens = Some(vec![START_TOKEN, END_TOKEN]);
    }
    config.validate()?;

    let device = parse_device(&config.device)?;
    tracing::info!(
        "{} samples, vocab {}, seq_length {} on {}",
        data.len(),
        config.vocab_size,
        config.seq_length,
        device_info(&device)
    );

    let (generator, mut varmap) = Generator::from_config(&config, &device)?;
    if let Some(path) = &args.load {
        varmap
            .load(path)
            .with_context(|| format!("Failed to load weights from {}", path.display()))?;
        tracing::info!("Loaded weights from {}", path.display());
    }

    let x = data.to_tensor(&device)?;
    let mut ctx = SamplingContext::new(Some(args.seed));

    if config.pretrain_epochs > 0 {
        let losses = pretrain_lstm_core(
            generator.model(),
            varmap.all_vars(),
            &x,
            END_TOKEN,
            &TrainOptions::pretrain(&config),
        )?;
        if let Some(last) = losses.last() {
            println!("Pretraining loss: {:.4}", last);
        }
    }

    if config.num_epochs > 0 {
        let out = train_generator(
            &generator,
            varmap.all_vars(),
            &x,
            None,
            Some(&data.sentence_lengths),
            &TrainOptions::generator(&config),
            &mut ctx,
        )?;
        if let Some(last) = out.epoch_losses.last() {
            println!("Generator loss: {:.4}", last);
        }
        if out.dropped_rows > 0 {
            println!(
                "Skipped {} trailing sample(s) that did not fill a batch",
                out.dropped_rows
            );
        }
    }

    if args.samples > 0 {
        let generated = generator.generate(None, None, args.samples, &mut ctx)?;
        let rows: Vec<Vec<u32>> = generated.to_vec2()?;
        println!("=== Generated ===");
        for row in &rows {
            println!("{}", data.vocabulary.decode_sentence(row)?);
        }
    }

    if let Some(dir) = &args.save {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        varmap.save(dir.join("generator.safetensors"))?;
        data.vocabulary.save(dir.join("vocab.json"))?;
        std::fs::write(dir.join("config.json"), serde_json::to_string_pretty(&config)?)?;
        println!("Saved to {}", dir.display());
    }

    Ok(())
}
