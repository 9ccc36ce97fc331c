use crate::spinner;
use anyhow::Context;
use clap::Args;
use nnue_data::dataset::{collect_stats, count_records};
use std::path::PathBuf;

#[derive(Args)]
pub struct StatsCommand {
    /// Input to gather stats on
    #[arg(long, required = true)]
    input: PathBuf,
}

pub fn stats(cmd: StatsCommand) -> anyhow::Result<()> {
    let bar = spinner();
    let stats = collect_stats(&cmd.input, &bar)
        .with_context(|| format!("can't gather stats on {}", cmd.input.display()))?;
    bar.finish_and_clear();

    print!("{}", stats);
    Ok(())
}

#[derive(Args)]
pub struct CountCommand {
    #[arg(long, required = true)]
    input: PathBuf,
}

pub fn count(cmd: CountCommand) -> anyhow::Result<()> {
    let count = count_records(&cmd.input)
        .with_context(|| format!("can't count {}", cmd.input.display()))?;
    println!("{}", count);
    Ok(())
}
