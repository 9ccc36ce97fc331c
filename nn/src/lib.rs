//! Training-data pipeline for NNUE style chess evaluation networks.
//!
//! Positions are stored as fixed 32 byte records ([`record`]), turned into
//! sparse network inputs by a [`feature_set::FeatureScheme`], manipulated at
//! rest by the [`dataset`] utilities and streamed into training batches by the
//! [`batch::BatchLoader`]. Trained weights come back through [`quantize`].

pub mod batch;
pub mod dataset;
pub mod error;
pub mod feature_set;
pub mod quantize;
pub mod record;

pub use error::{DataError, Location};
pub use record::{PositionRecord, RecordError, Wdl, RECORD_SIZE};
