//! Configuration for a baking run.
//!
//! A run reads one split of an on-disk dataset, joins each row's transcript with its
//! pre-computed audio codes, and turns every joined sample into a single fixed-length
//! row of token ids: the transcript wrapped in text-understanding markers, followed by
//! the audio codes wrapped in speech-generation markers. Audio codes are shifted past
//! the end of the text vocabulary so the two id ranges never collide.
//!
//! The defaults below reproduce the layout the training side expects. Every one of them
//! can be overridden on the command line; run with `--help` for the full list.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;

use crate::dataset::resolve_split_dir;

// Every encoded row is exactly this long.
pub const MAX_SEQ_LEN: usize = 2048;

// How many shuffled samples are held out for validation. This is a count, not a ratio.
pub const HOLDOUT: usize = 10;

// Threads used to encode the train split. Capped to the available parallelism.
pub const NUM_WORKERS: usize = 8;

pub const DATASET_DIR: &str = "dataset";
pub const DATASET_SPLIT: &str = "train";
pub const TOKENIZER_PATH: &str = "tokenizer.json";
pub const OUTPUT_DIR: &str = "generated_memmap";

// The pad token reuses end-of-sequence.
pub const PAD_TOKEN: &str = "</s>";

// Column names of the source dataset.
pub const PATH_COLUMN: &str = "audio_filepath";
pub const TEXT_COLUMN: &str = "text";
pub const CODES_COLUMN: &str = "chunked_audio_filepath";
// When the codes column is a struct, the codes live in this field.
pub const CODES_FIELD: &str = "array";

/// Where to find the columns of a sample in the source dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnNames {
    pub path: String,
    pub text: String,
    pub codes: String,
    pub codes_field: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            path: PATH_COLUMN.to_string(),
            text: TEXT_COLUMN.to_string(),
            codes: CODES_COLUMN.to_string(),
            codes_field: CODES_FIELD.to_string(),
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "tts-bake", about = "Encode a TTS dataset split into fixed-length memmap token arrays")]
pub struct BakeConfig {
    /// Dataset root. Arrow and Parquet files under `<dataset-dir>/<split>` (or the root itself) are read.
    #[arg(long, default_value = DATASET_DIR)]
    pub dataset_dir: PathBuf,
    #[arg(long, default_value = DATASET_SPLIT)]
    pub split: String,
    /// Path to a `tokenizer.json`.
    #[arg(long, default_value = TOKENIZER_PATH)]
    pub tokenizer: PathBuf,
    #[arg(long, default_value = PAD_TOKEN)]
    pub pad_token: String,
    #[arg(long, default_value = OUTPUT_DIR)]
    pub output_dir: PathBuf,
    #[arg(long, default_value_t = MAX_SEQ_LEN)]
    pub max_seq_len: usize,
    #[arg(long, default_value_t = HOLDOUT)]
    pub holdout: usize,
    #[arg(long, default_value_t = NUM_WORKERS)]
    pub num_workers: usize,
    /// Seed for the train/validation shuffle. Omit for a fresh shuffle every run.
    #[arg(long)]
    pub seed: Option<u64>,
    #[arg(long, default_value = PATH_COLUMN)]
    pub path_column: String,
    #[arg(long, default_value = TEXT_COLUMN)]
    pub text_column: String,
    #[arg(long, default_value = CODES_COLUMN)]
    pub codes_column: String,
    #[arg(long, default_value = CODES_FIELD)]
    pub codes_field: String,
}

impl BakeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_seq_len == 0 {
            bail!("--max-seq-len must be at least 1");
        }
        if self.num_workers == 0 {
            bail!("--num-workers must be at least 1");
        }
        if self.max_seq_len > i32::MAX as usize {
            bail!("--max-seq-len {} does not fit the on-disk shape", self.max_seq_len);
        }
        Ok(())
    }

    pub fn columns(&self) -> ColumnNames {
        ColumnNames {
            path: self.path_column.clone(),
            text: self.text_column.clone(),
            codes: self.codes_column.clone(),
            codes_field: self.codes_field.clone(),
        }
    }

    /// Directory holding the split's files. See [`resolve_split_dir`].
    pub fn split_dir(&self) -> Result<PathBuf> {
        resolve_split_dir(&self.dataset_dir, &self.split)
    }
}
