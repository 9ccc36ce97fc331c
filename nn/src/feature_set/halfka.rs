use super::{Board768, FeatureSet};
use shakmaty::{Piece, Square};

/// HalfKA: one full board768 bucket per square of our king, kings included
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HalfKa;

impl FeatureSet for HalfKa {
    fn name(&self) -> &'static str {
        "halfka"
    }

    fn num_features(&self) -> usize {
        64 * 768 // 49152
    }

    fn max_active_features(&self) -> usize {
        32
    }

    #[inline(always)]
    fn feature_index(&self, king: Square, piece: Piece, square: Square) -> Option<u32> {
        Board768
            .feature_index(king, piece, square)
            .map(|index| king as u32 * 768 + index)
    }
}
