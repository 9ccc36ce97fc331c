use anyhow::Context;
use clap::Args;
use indicatif::{HumanCount, ProgressBar, ProgressStyle};
use log::info;
use nnue_data::batch::{BatchLoader, IndexLayout, LoaderConfig, NextBatch};
use nnue_data::feature_set::build_feature_set;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Args)]
pub struct BenchCommand {
    /// Dataset file to read
    #[arg(long)]
    input: PathBuf,

    /// The feature set to use
    #[arg(long, value_name = "feature-set")]
    feature_set: String,

    /// Number of samples in one batch
    #[arg(long, default_value = "16384")]
    batch_size: usize,

    /// Number of batch threads to use
    #[arg(long, default_value = "4")]
    threads: usize,

    /// Batch buffers kept in flight
    #[arg(long, default_value = "16")]
    prefetch: usize,

    /// Number of epochs to run
    #[arg(long, default_value = "1")]
    epochs: u64,

    /// Read the records in a random order, reshuffled every epoch
    #[arg(long)]
    shuffle: bool,

    #[arg(long)]
    seed: Option<u64>,

    /// Padded index layout instead of sparse pairs
    #[arg(long)]
    padded: bool,
}

pub fn bench(cmd: BenchCommand) -> anyhow::Result<()> {
    let scheme = build_feature_set(&cmd.feature_set)?;

    let mut config = LoaderConfig::new(&cmd.input, scheme, cmd.batch_size)
        .threads(cmd.threads)
        .prefetch(cmd.prefetch)
        .shuffle(cmd.shuffle)
        .layout(if cmd.padded {
            IndexLayout::Padded
        } else {
            IndexLayout::Pairs
        });
    if let Some(seed) = cmd.seed {
        config = config.seed(seed);
    }

    let mut loader = BatchLoader::open(config)
        .with_context(|| format!("can't load batches from {}", cmd.input.display()))?;

    let style = ProgressStyle::default_bar()
        .template("[Elapsed {elapsed_precise}] {wide_bar} [Positions {human_pos}/{human_len} @ {per_sec}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    let bar = ProgressBar::new(loader.num_records() * cmd.epochs).with_style(style);

    let start = Instant::now();
    let mut batches = 0u64;
    let mut features = 0u64;

    for epoch in 0..cmd.epochs {
        if epoch > 0 {
            loader.begin_epoch(true)?;
        }
        bar.set_message(format!("[Epoch {}]", epoch));

        loop {
            match loader.take_next_batch()? {
                NextBatch::Batch(batch) => {
                    batches += 1;
                    features += batch.values().iter().filter(|&&v| v != 0.0).count() as u64;
                    bar.inc(batch.size() as u64);
                }
                NextBatch::EndOfEpoch => break,
            }
        }
    }
    loader.shutdown()?;
    bar.finish();

    let elapsed = start.elapsed().as_secs_f64();
    let positions = loader.num_records() * cmd.epochs;
    info!(
        "{} positions in {} batches, {:.1} active features per position",
        HumanCount(positions),
        HumanCount(batches),
        features as f64 / positions.max(1) as f64
    );
    println!(
        "{:.0} positions/s, {:.1} batches/s",
        positions as f64 / elapsed,
        batches as f64 / elapsed
    );

    Ok(())
}
