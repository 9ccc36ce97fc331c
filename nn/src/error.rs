use crate::record::RecordError;
use std::fmt::{self, Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Where in the input a problem was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// 1-based line of a text input
    Line(u64),
    /// 0-based record of a dataset file
    Record(u64),
    /// Element of a named weight tensor
    Weight { layer: String, index: usize },
    /// A named field or parameter
    Field(String),
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Location::Line(line) => write!(f, "line {}", line),
            Location::Record(index) => write!(f, "record {}", index),
            Location::Weight { layer, index } => write!(f, "{}[{}]", layer, index),
            Location::Field(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Error)]
pub enum DataError {
    /// Malformed FEN, bad eval/WDL token, unrecognized piece code...
    #[error("format error at {location}: {reason}")]
    Format { location: Location, reason: String },

    /// Eval out of bounds or a weight that does not fit after quantization
    #[error("range error at {location}: {reason}")]
    Range { location: Location, reason: String },

    /// Dataset length is not a multiple of the record size, or there is no data
    #[error("size error in {}: {reason}", path.display())]
    Size { path: PathBuf, reason: String },

    #[error("cannot {action} {}: {source}", path.display())]
    Resource {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl DataError {
    /// Attaches a location to a record level error, keeping range problems apart
    pub fn from_record(err: RecordError, location: Location) -> Self {
        if err.is_range() {
            DataError::Range {
                location,
                reason: err.to_string(),
            }
        } else {
            DataError::Format {
                location,
                reason: err.to_string(),
            }
        }
    }

    pub fn resource(action: &'static str, path: &Path, source: io::Error) -> Self {
        DataError::Resource {
            action,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn size(path: &Path, reason: impl Into<String>) -> Self {
        DataError::Size {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn location(&self) -> Option<&Location> {
        match self {
            DataError::Format { location, .. } | DataError::Range { location, .. } => {
                Some(location)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_errors_keep_their_category() {
        let range = DataError::from_record(RecordError::EvalRange(40000), Location::Record(7));
        assert!(matches!(range, DataError::Range { .. }));
        assert_eq!(range.location(), Some(&Location::Record(7)));

        let format = DataError::from_record(RecordError::WdlCode(9), Location::Line(3));
        assert!(matches!(format, DataError::Format { .. }));
        assert!(format.to_string().contains("line 3"));
    }
}
