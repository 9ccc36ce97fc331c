mod bench;
mod convert;
mod info;
mod quantize;
mod shuffle;
mod stats;

use bench::{bench, BenchCommand};
use clap::{Parser, Subcommand};
use convert::{convert, dump, ConvertCommand, DumpCommand};
use indicatif::{ProgressBar, ProgressStyle};
use info::{info, InfoCommand};
use quantize::{quantize, QuantizeCommand};
use shuffle::{interleave, shuffle, InterleaveCommand, ShuffleCommand};
use stats::{count, stats, CountCommand, StatsCommand};

#[derive(Parser)]
#[command(version, about = "Tools for NNUE training data")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Converts `<FEN> | <eval> | <wdl>` text lines into a binary dataset
    Convert(ConvertCommand),
    /// Writes a binary dataset back as text
    Dump(DumpCommand),
    /// Writes a uniformly shuffled copy of a dataset
    Shuffle(ShuffleCommand),
    /// Mixes several datasets into one
    Interleave(InterleaveCommand),
    /// Prints statistics about the positions of a dataset
    Stats(StatsCommand),
    /// Prints the number of records in a dataset
    Count(CountCommand),
    /// Quantizes exported float weights into a network file
    Quantize(QuantizeCommand),
    /// Displays a feature set and the features of a position
    Info(InfoCommand),
    /// Runs the batch loader over a dataset and reports its throughput
    Bench(BenchCommand),
}

/// Spinner counting positions
pub fn spinner() -> ProgressBar {
    let style = ProgressStyle::default_spinner()
        .template(
            "{spinner:.green} [Elapsed {elapsed_precise}] [Positions {human_pos} @ {per_sec}] {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    ProgressBar::new_spinner().with_style(style)
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Cli::parse();

    match args.command {
        Commands::Convert(cmd) => convert(cmd),
        Commands::Dump(cmd) => dump(cmd),
        Commands::Shuffle(cmd) => shuffle(cmd),
        Commands::Interleave(cmd) => interleave(cmd),
        Commands::Stats(cmd) => stats(cmd),
        Commands::Count(cmd) => count(cmd),
        Commands::Quantize(cmd) => quantize(cmd),
        Commands::Info(cmd) => info(cmd),
        Commands::Bench(cmd) => bench(cmd),
    }
}
