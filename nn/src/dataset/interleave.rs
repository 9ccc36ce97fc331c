use super::{RecordReader, RecordWriter};
use crate::error::DataError;
use indicatif::ProgressBar;
use log::info;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::path::{Path, PathBuf};

/// Merges datasets into one by repeatedly copying the next record of a source
/// picked with probability proportional to its remaining records.
///
/// Every source ends up spread evenly over the output and the output holds
/// exactly the union of the inputs.
pub fn interleave(
    inputs: &[PathBuf],
    output: &Path,
    seed: Option<u64>,
    progress: &ProgressBar,
) -> Result<u64, DataError> {
    if inputs.len() < 2 {
        return Err(DataError::Config(format!(
            "interleave needs at least 2 inputs, got {}",
            inputs.len()
        )));
    }

    let mut rng = match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };

    let mut readers = inputs
        .iter()
        .map(RecordReader::open)
        .collect::<Result<Vec<_>, _>>()?;
    let total: u64 = readers.iter().map(RecordReader::len).sum();
    info!("Interleaving {} records from {} files", total, readers.len());

    let mut writer = RecordWriter::create(output)?;
    let mut remaining = total;

    while remaining > 0 {
        let mut pick = rng.gen_range(0..remaining);

        // linear scan, the number of inputs is small
        let mut source = 0;
        for (i, reader) in readers.iter().enumerate() {
            if pick < reader.remaining() {
                source = i;
                break;
            }
            pick -= reader.remaining();
        }

        let reader = &mut readers[source];
        match reader.read_raw()? {
            Some(record) => writer.write_raw(&record)?,
            None => {
                return Err(DataError::size(
                    &inputs[source],
                    "file ended before its announced record count",
                ))
            }
        }

        remaining -= 1;
        progress.inc(1);
    }

    writer.finish()
}
