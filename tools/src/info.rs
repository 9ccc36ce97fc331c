use anyhow::{anyhow, Context};
use clap::Args;
use nnue_data::feature_set::{build_feature_set, FeatureSet, FEATURE_SET_NAMES};
use nnue_data::record::parse_line;
use nnue_data::{PositionRecord, Wdl};
use shakmaty::fen::Fen;

#[derive(Args)]
pub struct InfoCommand {
    /// If provided, it will print the number of features of the given feature set
    #[arg(long, value_name = "feature-set")]
    feature_set: Option<String>,

    /// If provided, it will print the features of the given FEN, based on the given feature set.
    /// A full `<FEN> | <eval> | <wdl>` line is accepted as well.
    #[arg(long, value_name = "fen", requires = "feature_set")]
    fen: Option<String>,
}

pub fn info(cmd: InfoCommand) -> anyhow::Result<()> {
    let Some(name) = cmd.feature_set else {
        println!("Feature sets: {}", FEATURE_SET_NAMES.join(", "));
        return Ok(());
    };
    let feature_set = build_feature_set(&name)?;

    // print number of features
    println!("{}", feature_set.num_features());

    if let Some(fen) = cmd.fen {
        let record = read_position(&fen)?;

        let mut pov = vec![];
        let mut opp = vec![];
        feature_set.side_features(&record, &mut pov, &mut opp);

        for features in [&mut pov, &mut opp] {
            features.sort_unstable();
            let line: Vec<String> = features.iter().map(u32::to_string).collect();
            println!("{}", line.join(" "));
        }
    }

    Ok(())
}

fn read_position(text: &str) -> anyhow::Result<PositionRecord> {
    if text.contains('|') {
        return parse_line(text).with_context(|| format!("invalid line {:?}", text));
    }

    let fen = Fen::from_ascii(text.trim().as_bytes()).map_err(|e| anyhow!("invalid FEN: {}", e))?;
    PositionRecord::from_setup(&fen.0, 0, Wdl::Draw)
        .with_context(|| format!("unsupported position {:?}", text))
}
