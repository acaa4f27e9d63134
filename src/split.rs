//! Train/validation partitioning and running the encoder over each side.

use anyhow::Result;
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressIterator, ProgressStyle};
use rand::{seq::SliceRandom, Rng};
use rayon::{iter::{IntoParallelRefIterator, ParallelIterator}, ThreadPoolBuilder};
use tracing::{info, warn};

use crate::{
    encode::{Assembled, SampleEncoder, SkipReason},
    memmap::TokenMatrix,
    tokenizer::TextTokenizer,
};

/// Disjoint train and validation ids covering the input exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPlan {
    pub train: Vec<String>,
    pub val: Vec<String>,
}

/// Shuffles all ids and holds out the last `holdout` of them (or all, if there are fewer).
pub fn split_ids<R: Rng + ?Sized>(ids: &[String], holdout: usize, rng: &mut R) -> SplitPlan {
    let mut shuffled = ids.to_vec();
    shuffled.shuffle(rng);
    let cut = shuffled.len().saturating_sub(holdout);
    let val = shuffled.split_off(cut);
    SplitPlan { train: shuffled, val }
}

/// Rows of one split plus what was dropped on the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSplit {
    pub matrix: TokenMatrix,
    pub missing_transcript: usize,
    pub missing_audio: usize,
    pub truncated: usize,
}

impl EncodedSplit {
    fn from_outcomes(cols: usize, outcomes: Vec<Assembled>) -> Result<Self> {
        let mut split = EncodedSplit {
            matrix: TokenMatrix::new(cols),
            missing_transcript: 0,
            missing_audio: 0,
            truncated: 0,
        };
        for outcome in outcomes {
            match outcome {
                Assembled::Sample(sample) => {
                    split.truncated += usize::from(sample.truncated);
                    split.matrix.push_row(&sample.ids)?;
                }
                Assembled::Skipped(SkipReason::MissingTranscript) => split.missing_transcript += 1,
                Assembled::Skipped(SkipReason::MissingAudio) => split.missing_audio += 1,
            }
        }
        Ok(split)
    }

    pub fn dropped(&self) -> usize {
        self.missing_transcript + self.missing_audio
    }

    fn log(&self, name: &str) {
        info!(split = name, rows = self.matrix.rows(), truncated = self.truncated, "split encoded");
        if self.dropped() > 0 {
            warn!(
                split = name,
                missing_transcript = self.missing_transcript,
                missing_audio = self.missing_audio,
                "dropped {} samples without a transcript/audio join",
                self.dropped()
            );
        }
    }
}

/// The requested worker count, clamped to `[1, available parallelism]`.
pub fn effective_workers(requested: usize) -> usize {
    let available = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    requested.clamp(1, available.max(1))
}

/// Encodes `ids` on a dedicated pool of `num_workers` threads. Row order is not meaningful.
pub fn encode_parallel<T: TextTokenizer + ?Sized>(
    encoder: &SampleEncoder<'_, T>,
    ids: &[String],
    num_workers: usize,
    pb: ProgressBar,
) -> Result<EncodedSplit> {
    let workers = effective_workers(num_workers);
    info!(samples = ids.len(), workers, "encoding train split");
    let pool = ThreadPoolBuilder::new().num_threads(workers).build()?;

    pb.set_length(ids.len() as u64);
    let outcomes: Vec<Assembled> = pool.install(|| {
        ids.par_iter()
            .progress_with(pb)
            .map(|id| encoder.encode(id))
            .collect::<Result<Vec<_>>>()
    })?;

    let split = EncodedSplit::from_outcomes(encoder.max_seq_len(), outcomes)?;
    split.log("train");
    Ok(split)
}

/// Encodes `ids` one after another on the calling thread, in order.
pub fn encode_sequential<T: TextTokenizer + ?Sized>(
    encoder: &SampleEncoder<'_, T>,
    ids: &[String],
    pb: ProgressBar,
) -> Result<EncodedSplit> {
    info!(samples = ids.len(), "encoding validation split");
    pb.set_length(ids.len() as u64);
    let outcomes = ids
        .iter()
        .progress_with(pb)
        .map(|id| encoder.encode(id))
        .collect::<Result<Vec<_>>>()?;

    let split = EncodedSplit::from_outcomes(encoder.max_seq_len(), outcomes)?;
    split.log("val");
    Ok(split)
}

/// A progress bar in the style used across the pipeline.
pub fn progress_bar(prefix: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(ProgressStyle::default_bar()
        .template("{spinner:.green} {prefix:20.bold.dim} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
        .progress_chars("#>-"));
    pb.set_prefix(prefix.to_string());
    Ok(pb)
}
