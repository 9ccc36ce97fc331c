//! Training batches and the multi-threaded loader producing them.

pub mod ffi;
mod loader;

pub use loader::{BatchGuard, BatchLoader, LoaderConfig, LoaderError, LoaderState, NextBatch};

use crate::feature_set::{FeatureScheme, FeatureSet};
use crate::record::PositionRecord;

/// How the sparse feature indices of a batch are laid out
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum IndexLayout {
    /// Flattened `(entry, feature)` pairs, as expected by sparse COO tensors
    #[default]
    Pairs,
    /// `max_active` slots per entry, unused slots hold -1
    Padded,
}

/// Features and targets of up to `capacity` positions.
///
/// Both perspectives of a position activate the same number of features in
/// every scheme (kings are either kept or dropped for both), so a single
/// `values` array serves the two index arrays.
#[derive(Debug, Clone)]
pub struct Batch {
    layout: IndexLayout,
    capacity: usize,
    max_active: usize,
    size: usize,

    stm_indices: Vec<i64>,
    nstm_indices: Vec<i64>,
    values: Vec<f32>,
    cp: Vec<f32>,
    wdl: Vec<f32>,

    stm_scratch: Vec<u32>,
    nstm_scratch: Vec<u32>,
}

impl Batch {
    pub fn new(layout: IndexLayout, capacity: usize, max_active: usize) -> Batch {
        let slots = capacity * max_active;
        let index_len = match layout {
            IndexLayout::Pairs => 2 * slots,
            IndexLayout::Padded => slots,
        };

        Batch {
            layout,
            capacity,
            max_active,
            size: 0,
            stm_indices: Vec::with_capacity(index_len),
            nstm_indices: Vec::with_capacity(index_len),
            values: Vec::with_capacity(slots),
            cp: Vec::with_capacity(capacity),
            wdl: Vec::with_capacity(capacity),
            stm_scratch: Vec::with_capacity(max_active),
            nstm_scratch: Vec::with_capacity(max_active),
        }
    }

    pub fn for_scheme(scheme: &FeatureScheme, layout: IndexLayout, capacity: usize) -> Batch {
        Batch::new(layout, capacity, scheme.max_active_features())
    }

    pub fn clear(&mut self) {
        self.size = 0;
        self.stm_indices.clear();
        self.nstm_indices.clear();
        self.values.clear();
        self.cp.clear();
        self.wdl.clear();
    }

    /// Appends one position. Targets are from the side to move's point of view.
    pub fn push(&mut self, record: &PositionRecord, scheme: &FeatureScheme) {
        debug_assert!(self.size < self.capacity);

        scheme.side_features(record, &mut self.stm_scratch, &mut self.nstm_scratch);
        debug_assert!(self.stm_scratch.len() <= self.max_active);
        debug_assert_eq!(self.stm_scratch.len(), self.nstm_scratch.len());

        let entry = self.size as i64;
        match self.layout {
            IndexLayout::Pairs => {
                for &feature in &self.stm_scratch {
                    self.stm_indices.extend([entry, i64::from(feature)]);
                    self.values.push(1.0);
                }
                for &feature in &self.nstm_scratch {
                    self.nstm_indices.extend([entry, i64::from(feature)]);
                }
            }
            IndexLayout::Padded => {
                let end = self.stm_indices.len() + self.max_active;

                self.stm_indices
                    .extend(self.stm_scratch.iter().map(|&f| i64::from(f)));
                self.stm_indices.resize(end, -1);
                self.nstm_indices
                    .extend(self.nstm_scratch.iter().map(|&f| i64::from(f)));
                self.nstm_indices.resize(end, -1);

                self.values
                    .extend(std::iter::repeat(1.0).take(self.stm_scratch.len()));
                self.values.resize(end, 0.0);
            }
        }

        self.cp.push(f32::from(record.stm_eval()));
        self.wdl.push(record.stm_wdl().score());
        self.size += 1;
    }

    pub fn layout(&self) -> IndexLayout {
        self.layout
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_active(&self) -> usize {
        self.max_active
    }

    /// Number of positions in the batch
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_full(&self) -> bool {
        self.size == self.capacity
    }

    pub fn stm_indices(&self) -> &[i64] {
        &self.stm_indices
    }

    pub fn nstm_indices(&self) -> &[i64] {
        &self.nstm_indices
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Evals in centipawns, side to move relative
    pub fn cp(&self) -> &[f32] {
        &self.cp
    }

    /// Game results in [0, 1], side to move relative
    pub fn wdl(&self) -> &[f32] {
        &self.wdl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_set::{Board768, HalfKp};
    use crate::record::parse_line;

    fn records() -> Vec<PositionRecord> {
        [
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1 | 25 | 1.0",
            "8/2k5/p1P5/5r2/2K5/8/P7/7R b - - 4 39 | -120 | 1.0",
        ]
        .iter()
        .map(|line| parse_line(line).unwrap())
        .collect()
    }

    #[test]
    fn test_pairs_layout() {
        let scheme: FeatureScheme = Board768.into();
        let mut batch = Batch::for_scheme(&scheme, IndexLayout::Pairs, 4);
        for record in records() {
            batch.push(&record, &scheme);
        }

        assert_eq!(batch.size(), 2);
        assert_eq!(batch.stm_indices().len(), 2 * (32 + 7));
        assert_eq!(batch.nstm_indices().len(), 2 * (32 + 7));
        assert_eq!(batch.values().len(), 32 + 7);
        assert!(batch.stm_indices()[..64].chunks(2).all(|pair| pair[0] == 0));
        assert!(batch.stm_indices()[64..].chunks(2).all(|pair| pair[0] == 1));

        // black to move: eval and result flip
        assert_eq!(batch.cp(), &[25.0, 120.0]);
        assert_eq!(batch.wdl(), &[1.0, 0.0]);
    }

    #[test]
    fn test_padded_layout() {
        let scheme: FeatureScheme = HalfKp.into();
        let mut batch = Batch::for_scheme(&scheme, IndexLayout::Padded, 4);
        for record in records() {
            batch.push(&record, &scheme);
        }

        let max = scheme.max_active_features();
        assert_eq!(batch.max_active(), 30);
        assert_eq!(batch.stm_indices().len(), 2 * max);
        assert_eq!(batch.values().len(), 2 * max);

        // second position has 5 non-king pieces
        let second = &batch.stm_indices()[max..];
        assert!(second[..5].iter().all(|&index| index >= 0));
        assert!(second[5..].iter().all(|&index| index == -1));
        assert_eq!(batch.values()[max..max + 5], [1.0; 5]);
        assert!(batch.values()[max + 5..].iter().all(|&v| v == 0.0));

        batch.clear();
        assert!(batch.is_empty());
        assert!(batch.stm_indices().is_empty());
    }
}
