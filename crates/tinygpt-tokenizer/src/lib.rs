//! Byte-level BPE tokenizer for tinygpt
//!
//! This crate provides:
//! - Byte Pair Encoding (BPE) training from files or in-memory text
//! - Token encoding and decoding with an exact round-trip
//! - JSON persistence and load-or-train bootstrapping
//! - Special token handling
//!
//! # Example
//!
//! ```no_run
//! use tinygpt_tokenizer::Tokenizer;
//!
//! // Train a tokenizer
//! let corpus = ["hello world", "hello rust"];
//! let tokenizer = Tokenizer::train_from_iterator(corpus.iter(), 500)?;
//!
//! // Encode text
//! let ids = tokenizer.encode("hello world")?;
//!
//! // Decode back
//! let text = tokenizer.decode(&ids)?;
//! assert_eq!(text, "hello world");
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod special_tokens;

pub use special_tokens::SpecialTokens;

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tokenizers::models::bpe::{BpeTrainer, BpeTrainerBuilder, BPE};
use tokenizers::pre_tokenizers::byte_level::ByteLevel;
use tokenizers::{
    AddedToken, DecoderWrapper, NormalizerWrapper, PostProcessorWrapper, PreTokenizerWrapper,
    TokenizerBuilder, TokenizerImpl,
};

/// Default target vocabulary size when training
pub const DEFAULT_VOCAB_SIZE: usize = 30000;

type BpeTokenizer = TokenizerImpl<
    BPE,
    NormalizerWrapper,
    PreTokenizerWrapper,
    PostProcessorWrapper,
    DecoderWrapper,
>;

/// Main tokenizer interface
///
/// Wraps a HuggingFace `tokenizers` pipeline with a byte-level
/// pre-tokenizer and decoder, so every UTF-8 string encodes without unknown
/// tokens and `decode(encode(text)) == text`.
#[derive(Clone)]
pub struct Tokenizer {
    inner: tokenizers::Tokenizer,
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer")
            .field("vocab_size", &self.vocab_size())
            .finish()
    }
}

fn byte_level() -> ByteLevel {
    ByteLevel::default().add_prefix_space(false)
}

fn untrained() -> Result<BpeTokenizer> {
    TokenizerBuilder::new()
        .with_model(BPE::default())
        .with_normalizer(None)
        .with_pre_tokenizer(Some(PreTokenizerWrapper::ByteLevel(byte_level())))
        .with_post_processor(None)
        .with_decoder(Some(DecoderWrapper::ByteLevel(byte_level())))
        .build()
        .map_err(anyhow::Error::msg)
}

fn trainer(vocab_size: usize) -> BpeTrainer {
    let special = SpecialTokens::default()
        .all()
        .into_iter()
        .map(|t| AddedToken::from(t.to_string(), true))
        .collect();
    BpeTrainerBuilder::new()
        .vocab_size(vocab_size)
        .show_progress(false)
        .special_tokens(special)
        .initial_alphabet(ByteLevel::alphabet())
        .build()
}

impl Tokenizer {
    fn from_trained(trained: &BpeTokenizer) -> Result<Self> {
        let json = trained.to_string(false).map_err(anyhow::Error::msg)?;
        let inner = tokenizers::Tokenizer::from_str(&json).map_err(anyhow::Error::msg)?;
        Ok(Self { inner })
    }

    /// Train a new tokenizer from an iterator of text
    ///
    /// # Arguments
    /// * `text_iterator` - Iterator over training text
    /// * `vocab_size` - Target vocabulary size (an upper bound for small corpora)
    pub fn train_from_iterator<I, S>(text_iterator: I, vocab_size: usize) -> Result<Self>
    where
        I: Iterator<Item = S>,
        S: AsRef<str>,
    {
        // The trainer wants a Send iterator over owned text
        let corpus: Vec<String> = text_iterator.map(|s| s.as_ref().to_string()).collect();
        let mut bpe = untrained()?;
        bpe.train(&mut trainer(vocab_size), corpus.into_iter())
            .map_err(anyhow::Error::msg)
            .context("Failed to train BPE tokenizer")?;
        Self::from_trained(&bpe)
    }

    /// Train a new tokenizer on the contents of text files
    ///
    /// # Errors
    /// Returns an error if no file is given, a file cannot be read, or
    /// training fails
    pub fn train_from_files<P: AsRef<Path>>(files: &[P], vocab_size: usize) -> Result<Self> {
        if files.is_empty() {
            anyhow::bail!("No training files given for the tokenizer");
        }
        let mut paths = Vec::with_capacity(files.len());
        for file in files {
            let file = file.as_ref();
            if !file.is_file() {
                anyhow::bail!("Tokenizer training file not found: {}", file.display());
            }
            paths.push(file.to_string_lossy().into_owned());
        }

        let mut bpe = untrained()?;
        bpe.train_from_files(&mut trainer(vocab_size), paths)
            .map_err(anyhow::Error::msg)
            .context("Failed to train tokenizer from data files")?;
        Self::from_trained(&bpe)
    }

    /// Load a tokenizer from its JSON file
    ///
    /// # Errors
    /// Returns an error if the tokenizer file cannot be read or parsed
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Tokenizer file not found: {}", path.display());
        }
        let inner = tokenizers::Tokenizer::from_file(path)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("Failed to load tokenizer: {}", path.display()))?;
        Ok(Self { inner })
    }

    /// Save the tokenizer as JSON, creating parent directories as needed
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        self.inner
            .save(path, false)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("Failed to write tokenizer file: {}", path.display()))
    }

    /// Load the tokenizer at `path`, or train one on `files` and save it there
    ///
    /// # Returns
    /// The tokenizer and whether it was freshly trained
    pub fn load_or_train<P, Q>(path: P, files: &[Q], vocab_size: usize) -> Result<(Self, bool)>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let path = path.as_ref();
        if path.exists() {
            return Ok((Self::from_file(path)?, false));
        }
        let tokenizer = Self::train_from_files(files, vocab_size)?;
        tokenizer.save(path)?;
        Ok((tokenizer, true))
    }

    /// Encode text to token IDs
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| anyhow::anyhow!("Encoding failed: {}", e))?;
        Ok(encoding.get_ids().to_vec())
    }

    /// Decode token IDs to text
    ///
    /// Special tokens are kept in the output; ids outside the vocabulary are
    /// skipped.
    pub fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner
            .decode(ids, false)
            .map_err(|e| anyhow::anyhow!("Decoding failed: {}", e))
    }

    /// Get the ID for a token
    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.inner.token_to_id(token)
    }

    /// Get the ID for a special token
    pub fn special_token_id(&self, token: &str) -> Result<u32> {
        if !SpecialTokens::default().is_special(token) {
            anyhow::bail!("Not a special token: {}", token);
        }
        self.token_to_id(token)
            .ok_or_else(|| anyhow::anyhow!("Special token not found: {}", token))
    }

    /// Get vocabulary size, special tokens included
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}
