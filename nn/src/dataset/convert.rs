//! Text to binary conversion and the reverse dump.

use super::{tmp_path, RecordReader, RecordWriter};
use crate::error::DataError;
use crate::record::{format_line, parse_line, LineError, PositionRecord, TextFormat};
use indicatif::ProgressBar;
use log::{info, warn};
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;

/// What to do with a line that cannot be parsed
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Log it, count it and keep going
    #[default]
    Skip,
    /// Stop at the first bad line; no output file is left behind
    Abort,
}

#[derive(Clone, Debug)]
pub struct ConvertOptions {
    pub policy: ErrorPolicy,
    /// Lines parsed in parallel at a time
    pub block_lines: usize,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        ConvertOptions {
            policy: ErrorPolicy::Skip,
            block_lines: 1 << 16,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ConvertSummary {
    pub written: u64,
    pub skipped: u64,
}

/// Converts `<FEN> | <eval> | <wdl>` lines into a dataset file, keeping input order.
/// Blank lines are ignored, `source` only names the input in error messages.
pub fn convert_text<R: BufRead>(
    mut input: R,
    source: &Path,
    output: &Path,
    options: &ConvertOptions,
    progress: &ProgressBar,
) -> Result<ConvertSummary, DataError> {
    let block_lines = options.block_lines.max(1);
    let mut writer = RecordWriter::create(output)?;
    let mut summary = ConvertSummary::default();

    let mut buf = Vec::new();
    let mut line_number = 0u64;
    // `None` for lines that are not valid UTF-8
    let mut block: Vec<(u64, Option<String>)> = Vec::with_capacity(block_lines);

    loop {
        block.clear();
        while block.len() < block_lines {
            buf.clear();
            let read = input
                .read_until(b'\n', &mut buf)
                .map_err(|e| DataError::resource("read", source, e))?;
            if read == 0 {
                break;
            }
            line_number += 1;

            if buf.last() == Some(&b'\n') {
                buf.pop();
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
            }
            match std::str::from_utf8(&buf) {
                Ok(line) if line.trim().is_empty() => {}
                Ok(line) => block.push((line_number, Some(line.to_owned()))),
                Err(_) => block.push((line_number, None)),
            }
        }
        if block.is_empty() {
            break;
        }

        let parsed: Vec<Result<PositionRecord, LineError>> = block
            .par_iter()
            .map(|(_, line)| match line {
                Some(line) => parse_line(line),
                None => Err(LineError::Utf8),
            })
            .collect();

        for ((number, _), result) in block.iter().zip(parsed) {
            match result {
                Ok(record) => {
                    writer.write_record(&record)?;
                    summary.written += 1;
                }
                Err(err) => {
                    let err = err.into_data_error(*number);
                    if options.policy == ErrorPolicy::Abort {
                        return Err(err);
                    }
                    warn!("skipping {}", err);
                    summary.skipped += 1;
                }
            }
        }
        progress.inc(block.len() as u64);
    }

    if summary.written == 0 {
        return Err(DataError::size(output, "no valid records in the input"));
    }

    writer.finish()?;
    info!(
        "Converted {} records into {} ({} skipped)",
        summary.written,
        output.display(),
        summary.skipped
    );
    Ok(summary)
}

/// Writes every record of a dataset as one text line, optionally stopping after `limit` records
pub fn dump_text(
    input: &Path,
    output: &Path,
    format: TextFormat,
    limit: Option<u64>,
    progress: &ProgressBar,
) -> Result<u64, DataError> {
    let mut reader = RecordReader::open(input)?;
    let limit = limit.unwrap_or(u64::MAX);

    let tmp = tmp_path(output);
    let result = (|| -> Result<u64, DataError> {
        let file = File::create(&tmp).map_err(|e| DataError::resource("create", &tmp, e))?;
        let mut writer = BufWriter::new(file);

        let mut written = 0;
        while written < limit {
            let Some(record) = reader.read_record()? else {
                break;
            };
            writeln!(writer, "{}", format_line(&record, format))
                .map_err(|e| DataError::resource("write", &tmp, e))?;
            written += 1;
            progress.inc(1);
        }

        writer
            .flush()
            .map_err(|e| DataError::resource("write", &tmp, e))?;
        Ok(written)
    })();

    match result {
        Ok(written) => {
            fs::rename(&tmp, output).map_err(|e| DataError::resource("rename into", output, e))?;
            Ok(written)
        }
        Err(err) => {
            let _ = fs::remove_file(&tmp);
            Err(err)
        }
    }
}
