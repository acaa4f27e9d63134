//! The end-to-end run: split, encode both sides, write the artifacts.

use std::path::PathBuf;

use anyhow::Result;
use indicatif::MultiProgress;
use rand::Rng;
use tracing::info;

use crate::{
    config::BakeConfig,
    dataset::SampleTable,
    encode::SampleEncoder,
    memmap::{write_artifacts, SplitArtifact},
    split::{encode_parallel, encode_sequential, progress_bar, split_ids, EncodedSplit},
    tokenizer::{TextTokenizer, Vocabulary},
};

#[derive(Debug, Clone)]
pub struct BakeOptions {
    pub max_seq_len: usize,
    pub holdout: usize,
    pub num_workers: usize,
    pub output_dir: PathBuf,
}

impl From<&BakeConfig> for BakeOptions {
    fn from(cfg: &BakeConfig) -> Self {
        Self {
            max_seq_len: cfg.max_seq_len,
            holdout: cfg.holdout,
            num_workers: cfg.num_workers,
            output_dir: cfg.output_dir.clone(),
        }
    }
}

#[derive(Debug)]
pub struct BakeReport {
    pub train: EncodedSplit,
    pub val: EncodedSplit,
    pub artifacts: [SplitArtifact; 2],
}

#[derive(Debug)]
pub enum BakeOutcome {
    Written(BakeReport),
    /// Nothing survived encoding. No files were written.
    Empty { train: EncodedSplit, val: EncodedSplit },
}

/// Runs one bake over an already loaded table.
///
/// `vocab` must come from the same (already extended) tokenizer; every worker sees this
/// one copy.
pub fn run<T, R>(
    table: &SampleTable,
    tokenizer: &T,
    vocab: Vocabulary,
    opts: &BakeOptions,
    rng: &mut R,
    m: &MultiProgress,
) -> Result<BakeOutcome>
where
    T: TextTokenizer + ?Sized,
    R: Rng + ?Sized,
{
    let plan = split_ids(table.ids(), opts.holdout, rng);
    info!(train = plan.train.len(), val = plan.val.len(), base_num = vocab.base_num, "split planned");

    let encoder = SampleEncoder::new(table, tokenizer, vocab, opts.max_seq_len);
    let train = encode_parallel(&encoder, &plan.train, opts.num_workers, m.add(progress_bar("data processing")?))?;
    let val = encode_sequential(&encoder, &plan.val, m.add(progress_bar("valid data processing")?))?;

    if train.matrix.is_empty() && val.matrix.is_empty() {
        return Ok(BakeOutcome::Empty { train, val });
    }

    let artifacts = write_artifacts(&opts.output_dir, &train.matrix, &val.matrix)?;
    Ok(BakeOutcome::Written(BakeReport { train, val, artifacts }))
}
