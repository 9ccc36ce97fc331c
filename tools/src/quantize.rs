use anyhow::Context;
use clap::Args;
use indicatif::HumanBytes;
use nnue_data::feature_set::build_feature_set;
use nnue_data::quantize::{self, QuantScale, Weights};
use std::path::PathBuf;

#[derive(Args)]
pub struct QuantizeCommand {
    /// JSON file mapping parameter names to nested arrays of floats
    #[arg(long)]
    input: PathBuf,

    /// Network file to write
    #[arg(long)]
    output: PathBuf,

    /// The feature set the network was trained on
    #[arg(long, value_name = "feature-set")]
    feature_set: String,

    /// Feature transformer scale
    #[arg(long, default_value = "255")]
    qa: i32,

    /// Output layer scale
    #[arg(long, default_value = "64")]
    qb: i32,
}

pub fn quantize(cmd: QuantizeCommand) -> anyhow::Result<()> {
    let scheme = build_feature_set(&cmd.feature_set)?;
    let weights = Weights::read(&cmd.input)
        .with_context(|| format!("can't load weights from {}", cmd.input.display()))?;

    let scale = QuantScale {
        ft: cmd.qa,
        out: cmd.qb,
    };
    let network = quantize::quantize(&weights, &scheme, scale).context("quantization failed")?;
    network
        .write(&cmd.output)
        .with_context(|| format!("can't write {}", cmd.output.display()))?;

    println!("Feature set: {}", network.scheme);
    println!("Hidden size: {}", network.hidden);
    for layer in &network.layers {
        println!("  {:<12} {} values", layer.name, layer.values.len());
    }
    println!(
        "Written {} to {}",
        HumanBytes(network.to_bytes().len() as u64),
        cmd.output.display()
    );

    Ok(())
}
