use crate::spinner;
use anyhow::Context;
use clap::Args;
use indicatif::HumanCount;
use nnue_data::dataset::{convert_text, dump_text, ConvertOptions, ErrorPolicy};
use nnue_data::record::TextFormat;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

#[derive(Args)]
pub struct ConvertCommand {
    /// Text file to read, decompressed on the fly when it ends in `.zst`
    #[arg(long)]
    input: PathBuf,

    /// Dataset file to write
    #[arg(long)]
    output: PathBuf,

    /// Fail on the first malformed line instead of skipping it
    #[arg(long)]
    abort_on_error: bool,

    /// Lines parsed in parallel at a time
    #[arg(long, default_value = "65536")]
    block_lines: usize,
}

pub fn convert(cmd: ConvertCommand) -> anyhow::Result<()> {
    println!("Input file: {}", cmd.input.display());
    println!("Output file: {}", cmd.output.display());

    let file = File::open(&cmd.input)
        .with_context(|| format!("can't open input file {}", cmd.input.display()))?;
    let input: Box<dyn BufRead> = if cmd.input.extension().is_some_and(|ext| ext == "zst") {
        let decoder = zstd::Decoder::new(file)
            .with_context(|| format!("can't decompress {}", cmd.input.display()))?;
        Box::new(BufReader::new(decoder))
    } else {
        Box::new(BufReader::new(file))
    };

    let options = ConvertOptions {
        policy: if cmd.abort_on_error {
            ErrorPolicy::Abort
        } else {
            ErrorPolicy::Skip
        },
        block_lines: cmd.block_lines,
    };

    let bar = spinner();
    let summary = convert_text(input, &cmd.input, &cmd.output, &options, &bar)
        .context("conversion failed")?;
    bar.finish_with_message(format!(
        "[Written {} Skipped {}]",
        HumanCount(summary.written),
        HumanCount(summary.skipped)
    ));

    Ok(())
}

#[derive(Args)]
pub struct DumpCommand {
    /// Dataset file to read
    #[arg(long)]
    input: PathBuf,

    /// Text file to write
    #[arg(long)]
    output: PathBuf,

    /// Line layout: `legacy` (`<FEN> | <eval> | <wdl>`) or `cudad` (`<FEN> [<wdl>] <eval>`)
    #[arg(long, default_value = "legacy")]
    format: TextFormat,

    /// Stop after this many records
    #[arg(long)]
    limit: Option<u64>,
}

pub fn dump(cmd: DumpCommand) -> anyhow::Result<()> {
    let bar = spinner();
    let written = dump_text(&cmd.input, &cmd.output, cmd.format, cmd.limit, &bar)
        .with_context(|| format!("can't dump {}", cmd.input.display()))?;
    bar.finish_with_message(format!("[Written {} lines]", HumanCount(written)));

    Ok(())
}
