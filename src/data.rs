//! Sample data loading
//!
//! Reads a whitespace-tokenized text file (one sample per line) into
//! fixed-length token rows:
//!
//! ```text
//! "the cat sat"  ->  [START, the, cat, sat, END, END, ...]   (seq_length)
//! ```

use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Sentinel that opens every row.
pub const START_TOKEN: u32 = 0;
/// Sentinel used to pad rows to `seq_length`.
pub const END_TOKEN: u32 = 1;

const START_WORD: &str = "START";
const END_WORD: &str = "END";

/// Bidirectional word ↔ token ID map. IDs are dense and assigned in
/// first-seen order after the two sentinels.
///
/// Serialized as the ordered list of words.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "Vec<String>", try_from = "Vec<String>")]
pub struct Vocabulary {
    words: Vec<String>,
    ids: HashMap<String, u32>,
}

impl From<Vocabulary> for Vec<String> {
    fn from(vocab: Vocabulary) -> Self {
        vocab.words
    }
}

impl TryFrom<Vec<String>> for Vocabulary {
    type Error = anyhow::Error;

    fn try_from(words: Vec<String>) -> Result<Self> {
        let ids: HashMap<String, u32> = words
            .iter()
            .enumerate()
            .map(|(id, word)| (word.clone(), id as u32))
            .collect();
        if ids.len() != words.len() {
            anyhow::bail!("vocabulary has duplicate words");
        }
        let vocab = Self { words, ids };
        if vocab.word(START_TOKEN) != Some(START_WORD) || vocab.word(END_TOKEN) != Some(END_WORD) {
            anyhow::bail!("vocabulary does not start with {START_WORD} and {END_WORD}");
        }
        Ok(vocab)
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::new()
    }
}

impl Vocabulary {
    /// Vocabulary holding only `START` and `END`.
    pub fn new() -> Self {
        let mut vocab = Self {
            words: Vec::new(),
            ids: HashMap::new(),
        };
        vocab.insert(START_WORD);
        vocab.insert(END_WORD);
        vocab
    }

    /// ID of `word`, adding it when unseen.
    pub fn insert(&mut self, word: &str) -> u32 {
        if let Some(&id) = self.ids.get(word) {
            return id;
        }
        let id = self.words.len() as u32;
        self.words.push(word.to_string());
        self.ids.insert(word.to_string(), id);
        id
    }

    pub fn id(&self, word: &str) -> Option<u32> {
        self.ids.get(word).copied()
    }

    pub fn word(&self, id: u32) -> Option<&str> {
        self.words.get(id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Map every ID back to its word, sentinels included.
    pub fn decode(&self, ids: &[u32]) -> Result<Vec<&str>> {
        ids.iter()
            .map(|&id| {
                self.word(id)
                    .ok_or_else(|| anyhow::anyhow!("token {id} is not in the vocabulary"))
            })
            .collect()
    }

    /// Decode a generated row into text: `START` is dropped and decoding
    /// stops at the first `END`.
    pub fn decode_sentence(&self, ids: &[u32]) -> Result<String> {
        let body: Vec<u32> = ids
            .iter()
            .copied()
            .skip_while(|&id| id == START_TOKEN)
            .take_while(|&id| id != END_TOKEN)
            .filter(|&id| id != START_TOKEN)
            .collect();
        Ok(self.decode(&body)?.join(" "))
    }

    /// Write the vocabulary as JSON (an ordered list of words).
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write vocabulary to {}", path.display()))
    }

    /// Read a vocabulary written by [`Vocabulary::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read vocabulary from {}", path.display()))?;
        let vocab: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse vocabulary from {}", path.display()))?;
        Ok(vocab)
    }
}

/// Token rows built from a sample file.
#[derive(Debug, Clone)]
pub struct SampleData {
    /// One row of exactly `seq_length` IDs per sample
    pub sequences: Vec<Vec<u32>>,
    pub vocabulary: Vocabulary,
    /// `START` plus the words kept in each row (before `END` padding)
    pub sentence_lengths: Vec<usize>,
}

impl SampleData {
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    pub fn seq_length(&self) -> usize {
        self.sequences.first().map_or(0, Vec::len)
    }

    /// Rows as a `[rows, seq_length]` u32 tensor.
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        let rows = self.sequences.len();
        let flat: Vec<u32> = self.sequences.iter().flatten().copied().collect();
        Ok(Tensor::from_vec(flat, (rows, self.seq_length()), device)?)
    }
}

/// Build [`SampleData`] from in-memory text, one sample per non-empty line.
pub fn parse_samples(text: &str, seq_length: usize) -> Result<SampleData> {
    if seq_length == 0 {
        anyhow::bail!("seq_length must be at least 1");
    }

    let mut vocabulary = Vocabulary::new();
    let mut sequences = Vec::new();
    let mut sentence_lengths = Vec::new();

    for line in text.lines() {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }

        let mut row = Vec::with_capacity(seq_length);
        row.push(START_TOKEN);
        for word in &words {
            let id = vocabulary.insert(word);
            if row.len() < seq_length {
                row.push(id);
            }
        }
        sentence_lengths.push(row.len());
        row.resize(seq_length, END_TOKEN);
        sequences.push(row);
    }

    if sequences.is_empty() {
        anyhow::bail!("no samples found");
    }

    tracing::info!(
        "Loaded {} samples, vocabulary size {}",
        sequences.len(),
        vocabulary.len()
    );

    Ok(SampleData {
        sequences,
        vocabulary,
        sentence_lengths,
    })
}

/// Read a whitespace-tokenized sample file.
pub fn read_sample_file<P: AsRef<Path>>(path: P, seq_length: usize) -> Result<SampleData> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read samples from {}", path.display()))?;
    parse_samples(&text, seq_length).with_context(|| format!("Invalid sample file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocabulary_sentinels() {
        let vocab = Vocabulary::new();
        assert_eq!(vocab.len(), 2);
        assert_eq!(vocab.id("START"), Some(START_TOKEN));
        assert_eq!(vocab.id("END"), Some(END_TOKEN));
    }

    #[test]
    fn test_vocabulary_first_seen_order() {
        let mut vocab = Vocabulary::new();
        assert_eq!(vocab.insert("b"), 2);
        assert_eq!(vocab.insert("a"), 3);
        assert_eq!(vocab.insert("b"), 2);
        assert_eq!(vocab.word(3), Some("a"));
        assert_eq!(vocab.word(9), None);
    }

    #[test]
    fn test_parse_pads_and_truncates() {
        let data = parse_samples("the cat sat\n\n  a b c d e f  \n", 5).unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data.sequences[0], vec![0, 2, 3, 4, 1]);
        assert_eq!(data.sequences[1], vec![0, 5, 6, 7, 8]);
        assert_eq!(data.sentence_lengths, vec![4, 5]);
        // Truncated words still enter the vocabulary
        assert_eq!(data.vocabulary.len(), 11);
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(parse_samples("  \n\n", 4).is_err());
        assert!(parse_samples("a b", 0).is_err());
    }

    #[test]
    fn test_to_tensor() {
        let data = parse_samples("x y\ny x\n", 4).unwrap();
        let t = data.to_tensor(&Device::Cpu).unwrap();
        assert_eq!(t.dims(), &[2, 4]);
        let rows: Vec<Vec<u32>> = t.to_vec2().unwrap();
        assert_eq!(rows, vec![vec![0, 2, 3, 1], vec![0, 3, 2, 1]]);
    }

    #[test]
    fn test_decode() {
        let data = parse_samples("hello there world", 6).unwrap();
        let vocab = &data.vocabulary;
        let row = &data.sequences[0];
        assert_eq!(
            vocab.decode(row).unwrap(),
            vec!["START", "hello", "there", "world", "END", "END"]
        );
        assert_eq!(vocab.decode_sentence(row).unwrap(), "hello there world");
        assert_eq!(vocab.decode_sentence(&[0, 0, 3, 1, 2]).unwrap(), "there");
        assert!(vocab.decode(&[42]).is_err());
    }

    #[test]
    fn test_read_sample_file_and_vocab_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let samples = dir.path().join("samples.txt");
        std::fs::write(&samples, "one two\ntwo three\n").unwrap();

        let data = read_sample_file(&samples, 4).unwrap();
        assert_eq!(data.sequences, vec![vec![0, 2, 3, 1], vec![0, 3, 4, 1]]);

        let vocab_path = dir.path().join("vocab.json");
        data.vocabulary.save(&vocab_path).unwrap();
        let loaded = Vocabulary::load(&vocab_path).unwrap();
        assert_eq!(loaded.len(), 5);
        assert_eq!(loaded.id("three"), Some(4));

        std::fs::write(&vocab_path, r#"["END", "START", "x"]"#).unwrap();
        assert!(Vocabulary::load(&vocab_path).is_err());

        assert!(read_sample_file(dir.path().join("missing.txt"), 4).is_err());
    }
}
