//! The main baking script. See "config.rs" for the options and their defaults.
//!
//! The whole split is held in memory while it is encoded; the output is written only once
//! both the train and validation rows exist.

use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use rand::{rng, rngs::StdRng, SeedableRng};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tts_bake::{
    bake::{self, BakeOptions, BakeOutcome},
    config::BakeConfig,
    dataset::load_samples,
    split::progress_bar,
    tokenizer::{HfTokenizer, Vocabulary},
};

fn spinner(m: &MultiProgress, msg: &'static str) -> Result<ProgressBar> {
    let pb = m.add(ProgressBar::new_spinner());
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.blue} {msg}")?);
    pb.set_message(msg);
    Ok(pb)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = BakeConfig::parse();
    cfg.validate()?;
    let start_time = Instant::now();
    let m = MultiProgress::new();

    // --- Step 1: Tokenizer and the id layout shared by every worker ---
    let main_pb = spinner(&m, "Step 1: Loading tokenizer...")?;
    let mut tokenizer = HfTokenizer::from_file(&cfg.tokenizer)?;
    let added = tokenizer.extend_with_control_tokens();
    let vocab = Vocabulary::resolve(&tokenizer, &cfg.pad_token)?;
    info!(added, base_num = vocab.base_num, pad_id = vocab.pad_id, "tokenizer ready");
    main_pb.finish_with_message("Step 1: Tokenizer loaded.");

    // --- Step 2: Load the dataset split ---
    let main_pb = spinner(&m, "Step 2: Loading dataset...")?;
    let table = load_samples(&cfg.split_dir()?, &cfg.columns(), m.add(progress_bar("loading dataset")?))?;
    main_pb.finish_with_message("Step 2: Dataset loaded.");

    // --- Step 3: Encode both splits and write them out ---
    let main_pb = spinner(&m, "Step 3: Encoding samples...")?;
    let opts = BakeOptions::from(&cfg);
    let outcome = match cfg.seed {
        Some(seed) => bake::run(&table, &tokenizer, vocab, &opts, &mut StdRng::seed_from_u64(seed), &m)?,
        None => bake::run(&table, &tokenizer, vocab, &opts, &mut rng(), &m)?,
    };
    main_pb.finish_with_message("Step 3: Encoding complete.");
    m.clear()?;

    match outcome {
        BakeOutcome::Empty { train, val } => {
            error!(
                dropped_train = train.dropped(),
                dropped_val = val.dropped(),
                "no samples survived encoding; nothing was written"
            );
        }
        BakeOutcome::Written(report) => {
            println!("\n✅ TTS memmap saved! Output written to directory '{}'", opts.output_dir.display());
            for artifact in &report.artifacts {
                println!("  - {} shape {:?}", artifact.data_path.display(), artifact.shape);
            }
            println!(
                "Dropped samples: {} train, {} val. Truncated rows: {} train, {} val.",
                report.train.dropped(),
                report.val.dropped(),
                report.train.truncated,
                report.val.truncated
            );
            println!("Total time elapsed: {:?}", start_time.elapsed());
        }
    }

    Ok(())
}
