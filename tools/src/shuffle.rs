use crate::spinner;
use anyhow::Context;
use clap::Args;
use indicatif::HumanCount;
use nnue_data::dataset::{self, ShuffleOptions};
use std::path::PathBuf;

#[derive(Args)]
pub struct ShuffleCommand {
    #[arg(long)]
    input: PathBuf,

    #[arg(long)]
    output: PathBuf,

    /// Records held in memory at a time, larger datasets go through temporary bucket files
    #[arg(long, default_value = "33554432")]
    chunk_records: usize,

    /// Seed for a reproducible order
    #[arg(long)]
    seed: Option<u64>,
}

pub fn shuffle(cmd: ShuffleCommand) -> anyhow::Result<()> {
    let options = ShuffleOptions {
        chunk_records: cmd.chunk_records,
        seed: cmd.seed,
    };

    let bar = spinner();
    let written = dataset::shuffle(&cmd.input, &cmd.output, &options, &bar)
        .with_context(|| format!("can't shuffle {}", cmd.input.display()))?;
    bar.finish_with_message(format!("[Shuffled {}]", HumanCount(written)));

    Ok(())
}

#[derive(Args)]
pub struct InterleaveCommand {
    /// Datasets to mix, at least two
    #[arg(long = "input", required = true, num_args = 1..)]
    inputs: Vec<PathBuf>,

    #[arg(long)]
    output: PathBuf,

    /// Seed for a reproducible order
    #[arg(long)]
    seed: Option<u64>,
}

pub fn interleave(cmd: InterleaveCommand) -> anyhow::Result<()> {
    let bar = spinner();
    let written = dataset::interleave(&cmd.inputs, &cmd.output, cmd.seed, &bar)
        .context("can't interleave the inputs")?;
    bar.finish_with_message(format!("[Written {}]", HumanCount(written)));

    Ok(())
}
