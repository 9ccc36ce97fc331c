use super::{relative_color, FeatureSet};
use shakmaty::{Piece, Square};

/// Plain piece-square inputs
/// Tuple: <piece_color, piece_role, piece_square>
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Board768;

impl FeatureSet for Board768 {
    fn name(&self) -> &'static str {
        "board768"
    }

    fn num_features(&self) -> usize {
        2 * 6 * 64 // 768
    }

    fn max_active_features(&self) -> usize {
        32
    }

    #[inline(always)]
    fn feature_index(&self, _king: Square, piece: Piece, square: Square) -> Option<u32> {
        let role = piece.role as u32 - 1;
        Some(relative_color(piece) * 384 + role * 64 + square as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_set::checks::sanity_checks;
    use crate::record::parse_line;
    use shakmaty::Color;

    #[test]
    fn test_sanity_checks() {
        sanity_checks(&Board768.into());
    }

    #[test]
    fn test_start_position_indices() {
        let record = parse_line(
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1 | 0 | 0.5",
        )
        .unwrap();

        let mut white = vec![];
        Board768.active_features(&record, Color::White, &mut white);
        // a1 rook, e1 king, e8 king
        assert!(white.contains(&(3 * 64)));
        assert!(white.contains(&(5 * 64 + 4)));
        assert!(white.contains(&(384 + 5 * 64 + 60)));
        assert_eq!(white.len(), 32);

        // symmetric position: both perspectives see the same thing
        let mut black = vec![];
        Board768.active_features(&record, Color::Black, &mut black);
        white.sort();
        black.sort();
        assert_eq!(white, black);
    }
}
