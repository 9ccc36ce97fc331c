//! Line oriented text form of a record: `<FEN> | <eval> | <wdl>`.

use super::{PositionRecord, RecordError, Wdl};
use crate::error::{DataError, Location};
use shakmaty::fen::Fen;
use std::fmt::Write;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LineError {
    #[error("expected 3 fields separated by '|', found {0}")]
    Fields(usize),

    #[error("invalid FEN {0:?}")]
    Fen(String),

    #[error("invalid eval {0:?}")]
    Eval(String),

    #[error("invalid WDL {0:?}, expected 1.0, 0.5 or 0.0")]
    Wdl(String),

    #[error("line is not valid UTF-8")]
    Utf8,

    #[error(transparent)]
    Record(#[from] RecordError),
}

impl LineError {
    pub fn into_data_error(self, line: u64) -> DataError {
        match self {
            LineError::Record(err) => DataError::from_record(err, Location::Line(line)),
            other => DataError::Format {
                location: Location::Line(line),
                reason: other.to_string(),
            },
        }
    }
}

/// Parses one text line. Surrounding whitespace on every field is ignored.
pub fn parse_line(line: &str) -> Result<PositionRecord, LineError> {
    let fields: Vec<&str> = line.split('|').map(str::trim).collect();
    let [fen, eval, wdl] = fields[..] else {
        return Err(LineError::Fields(fields.len()));
    };

    let Fen(setup) = Fen::from_ascii(fen.as_bytes()).map_err(|_| LineError::Fen(fen.to_owned()))?;
    let eval = i64::from_str(eval).map_err(|_| LineError::Eval(eval.to_owned()))?;
    let wdl = Wdl::from_text(wdl).ok_or_else(|| LineError::Wdl(wdl.to_owned()))?;

    Ok(PositionRecord::from_setup(&setup, eval, wdl)?)
}

/// Text layouts produced when dumping a dataset
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TextFormat {
    /// `<FEN> | <eval> | <wdl>`, the layout read back by [`parse_line`]
    #[default]
    Legacy,
    /// `<FEN> [<wdl>] <eval>`
    Cudad,
}

impl FromStr for TextFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "legacy" => Ok(TextFormat::Legacy),
            "cudad" => Ok(TextFormat::Cudad),
            other => Err(format!("unknown text format {:?}", other)),
        }
    }
}

pub fn format_line(record: &PositionRecord, format: TextFormat) -> String {
    let fen = Fen(record.to_setup()).to_string();
    let mut line = String::with_capacity(fen.len() + 16);
    // writing into a String cannot fail
    let _ = match format {
        TextFormat::Legacy => write!(
            line,
            "{} | {} | {}",
            fen,
            record.eval(),
            record.wdl().as_text()
        ),
        TextFormat::Cudad => write!(
            line,
            "{} [{}] {}",
            fen,
            record.wdl().as_text(),
            record.eval()
        ),
    };
    line
}
