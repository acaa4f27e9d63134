//! Text tokenizer adapter and the control-token vocabulary.
//!
//! The pipeline only needs three things from a tokenizer: encode a string without any
//! automatic special tokens, look a token up by its literal text, and report the
//! vocabulary size. [`TextTokenizer`] is that seam; [`HfTokenizer`] backs it with a
//! HuggingFace `tokenizer.json`.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tokenizers::{AddedToken, Tokenizer};

/// The reserved section markers added on top of the text vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlToken {
    TextGenerationStart,
    TextGenerationEnd,
    TextUnderstandingStart,
    TextUnderstandingEnd,
    SpeechGenerationStart,
    SpeechGenerationEnd,
    SpeechUnderstandingStart,
    SpeechUnderstandingEnd,
}

impl ControlToken {
    /// Registration order. New ids are handed out in this order.
    pub const ALL: [ControlToken; 8] = [
        ControlToken::TextGenerationStart,
        ControlToken::TextGenerationEnd,
        ControlToken::TextUnderstandingStart,
        ControlToken::TextUnderstandingEnd,
        ControlToken::SpeechGenerationStart,
        ControlToken::SpeechGenerationEnd,
        ControlToken::SpeechUnderstandingStart,
        ControlToken::SpeechUnderstandingEnd,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            ControlToken::TextGenerationStart => "<|TEXT_GENERATION_START|>",
            ControlToken::TextGenerationEnd => "<|TEXT_GENERATION_END|>",
            ControlToken::TextUnderstandingStart => "<|TEXT_UNDERSTANDING_START|>",
            ControlToken::TextUnderstandingEnd => "<|TEXT_UNDERSTANDING_END|>",
            ControlToken::SpeechGenerationStart => "<|SPEECH_GENERATION_START|>",
            ControlToken::SpeechGenerationEnd => "<|SPEECH_GENERATION_END|>",
            ControlToken::SpeechUnderstandingStart => "<|SPEECH_UNDERSTANDING_START|>",
            ControlToken::SpeechUnderstandingEnd => "<|SPEECH_UNDERSTANDING_END|>",
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

/// Minimal tokenizer interface used by the encoder. Shared read-only across worker threads.
pub trait TextTokenizer: Send + Sync {
    /// Encode `text` without adding the tokenizer's own special tokens.
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    fn token_to_id(&self, token: &str) -> Option<u32>;

    /// Vocabulary size including added tokens.
    fn vocab_size(&self) -> usize;
}

/// A HuggingFace tokenizer loaded from `tokenizer.json`.
pub struct HfTokenizer {
    inner: Tokenizer,
}

impl HfTokenizer {
    pub fn from_file(path: &Path) -> Result<Self> {
        let inner = Tokenizer::from_file(path)
            .map_err(|e| anyhow!("load tokenizer {}: {e}", path.display()))?;
        Ok(Self { inner })
    }

    /// Register the control tokens as added tokens. Returns how many were new.
    pub fn extend_with_control_tokens(&mut self) -> usize {
        let tokens: Vec<AddedToken> = ControlToken::ALL
            .iter()
            .map(|t| AddedToken::from(t.as_str(), false))
            .collect();
        self.inner.add_tokens(&tokens[..])
    }
}

impl TextTokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| anyhow!("tokenize: {e}"))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn token_to_id(&self, token: &str) -> Option<u32> {
        self.inner.token_to_id(token)
    }

    fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}

/// Ids resolved once per run and handed to every worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vocabulary {
    /// Offset added to every raw audio code. Equal to the extended vocabulary size.
    pub base_num: u32,
    pub pad_id: u32,
    control: [u32; 8],
}

impl Vocabulary {
    /// Resolve control and pad ids from an already-extended tokenizer.
    pub fn resolve<T: TextTokenizer + ?Sized>(tokenizer: &T, pad_token: &str) -> Result<Self> {
        let base_num = u32::try_from(tokenizer.vocab_size())
            .context("vocabulary size does not fit in u32")?;
        let mut control = [0u32; 8];
        for token in ControlToken::ALL {
            control[token.index()] = tokenizer
                .token_to_id(token.as_str())
                .with_context(|| format!("control token {} is not in the vocabulary", token.as_str()))?;
        }
        let pad_id = tokenizer
            .token_to_id(pad_token)
            .with_context(|| format!("pad token {pad_token} is not in the vocabulary"))?;
        Ok(Self { base_num, pad_id, control })
    }

    pub fn id(&self, token: ControlToken) -> u32 {
        self.control[token.index()]
    }
}
