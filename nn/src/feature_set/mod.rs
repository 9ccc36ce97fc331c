pub mod board768;
pub mod build;
mod checks;
pub mod halfka;
pub mod halfkp;

pub use board768::Board768;
pub use build::{build_feature_set, FEATURE_SET_NAMES};
pub use halfka::HalfKa;
pub use halfkp::HalfKp;

use crate::record::PositionRecord;
use enum_dispatch::enum_dispatch;
use shakmaty::{Color, Piece, Square};

/// The closed set of feature schemes a dataset can be decoded into
#[enum_dispatch]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureScheme {
    Board768,
    HalfKp,
    HalfKa,
}

/// A set of features for a neural network
#[enum_dispatch(FeatureScheme)]
pub trait FeatureSet {
    /// Name used on the command line and in quantized network files
    fn name(&self) -> &'static str;

    /// Number of features in the set
    fn num_features(&self) -> usize;

    /// Upper bound on the number of active features of a single position
    fn max_active_features(&self) -> usize;

    /// Index of a piece as seen from the perspective's side of the board.
    ///
    /// All inputs are already oriented: the perspective plays white, its king
    /// is `king` and `piece.color == White` means "ours".
    /// Pieces that produce no feature return `None`.
    fn feature_index(&self, king: Square, piece: Piece, square: Square) -> Option<u32>;

    /// Computes the active features of the record from the given perspective
    fn active_features(&self, record: &PositionRecord, perspective: Color, features: &mut Vec<u32>) {
        features.clear();

        let board = record.board();
        let king = orient(record.king(perspective), perspective);

        for square in board.occupied() {
            if let Some(piece) = board.piece_at(square) {
                let piece = Piece {
                    color: if perspective == Color::White {
                        piece.color
                    } else {
                        !piece.color
                    },
                    role: piece.role,
                };
                if let Some(index) = self.feature_index(king, piece, orient(square, perspective)) {
                    features.push(index);
                }
            }
        }
    }

    /// Features of the side to move and of its opponent, in that order
    fn side_features(&self, record: &PositionRecord, stm: &mut Vec<u32>, nstm: &mut Vec<u32>) {
        let turn = record.turn();
        self.active_features(record, turn, stm);
        self.active_features(record, !turn, nstm);
    }
}

/// Squares seen from black are flipped so that every perspective sits on rank 1
#[inline(always)]
fn orient(square: Square, perspective: Color) -> Square {
    match perspective {
        Color::White => square,
        Color::Black => square.flip_vertical(),
    }
}

/// 0 for our pieces, 1 for theirs, once oriented
#[inline(always)]
fn relative_color(piece: Piece) -> u32 {
    match piece.color {
        Color::White => 0,
        Color::Black => 1,
    }
}
