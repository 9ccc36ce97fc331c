use super::{relative_color, FeatureSet};
use shakmaty::{Piece, Role, Square};

/// Number of (piece, square) inputs of a single king bucket
pub const KING_BUCKET_SIZE: usize = 2 * 5 * 64; // 640

/// The most common feature set HalfKP
/// Tuple: <our_king_square, piece_color, piece_role (w/o king), piece_square>
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HalfKp;

impl FeatureSet for HalfKp {
    fn name(&self) -> &'static str {
        "halfkp"
    }

    fn num_features(&self) -> usize {
        64 * KING_BUCKET_SIZE // 40960
    }

    fn max_active_features(&self) -> usize {
        30
    }

    #[inline(always)]
    fn feature_index(&self, king: Square, piece: Piece, square: Square) -> Option<u32> {
        if piece.role == Role::King {
            // skip kings
            return None;
        }

        let p_idx = relative_color(piece) * 5 + (piece.role as u32 - 1);
        Some((king as u32 * 10 + p_idx) * 64 + square as u32)
    }
}
