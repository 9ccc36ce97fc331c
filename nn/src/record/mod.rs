//! A single labelled training position.

pub mod codec;
pub mod text;

pub use codec::{decode, encode, PackedRecord, RECORD_SIZE};
pub use text::{format_line, parse_line, LineError, TextFormat};

use shakmaty::{Bitboard, Board, Color, Piece, Role, Setup, Square};
use std::num::NonZeroU32;
use thiserror::Error;

/// Largest absolute centipawn score a record may carry
pub const MAX_EVAL: i32 = 32000;

/// Most pieces a record can hold (one nibble each in the packed layout)
pub const MAX_PIECES: u32 = 32;

/// Game outcome from white's point of view
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Wdl {
    Loss = 0,
    Draw = 1,
    Win = 2,
}

impl Wdl {
    pub const ALL: [Wdl; 3] = [Wdl::Loss, Wdl::Draw, Wdl::Win];

    pub fn from_code(code: u8) -> Option<Wdl> {
        match code {
            0 => Some(Wdl::Loss),
            1 => Some(Wdl::Draw),
            2 => Some(Wdl::Win),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Only the exact tokens `1.0`, `0.5` and `0.0` are accepted
    pub fn from_text(token: &str) -> Option<Wdl> {
        match token {
            "1.0" => Some(Wdl::Win),
            "0.5" => Some(Wdl::Draw),
            "0.0" => Some(Wdl::Loss),
            _ => None,
        }
    }

    pub fn as_text(self) -> &'static str {
        match self {
            Wdl::Win => "1.0",
            Wdl::Draw => "0.5",
            Wdl::Loss => "0.0",
        }
    }

    /// Score in [0, 1] as used for training targets
    pub fn score(self) -> f32 {
        f32::from(self.code()) / 2.0
    }

    /// The same outcome seen from the other side
    pub fn flipped(self) -> Wdl {
        match self {
            Wdl::Win => Wdl::Loss,
            Wdl::Draw => Wdl::Draw,
            Wdl::Loss => Wdl::Win,
        }
    }
}

/// Standard castling flags, one bit per (color, side)
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct CastlingRights(u8);

impl CastlingRights {
    pub const WHITE_KING_SIDE: u8 = 1 << 0;
    pub const WHITE_QUEEN_SIDE: u8 = 1 << 1;
    pub const BLACK_KING_SIDE: u8 = 1 << 2;
    pub const BLACK_QUEEN_SIDE: u8 = 1 << 3;

    const ROOKS: [(u8, Square); 4] = [
        (Self::WHITE_KING_SIDE, Square::H1),
        (Self::WHITE_QUEEN_SIDE, Square::A1),
        (Self::BLACK_KING_SIDE, Square::H8),
        (Self::BLACK_QUEEN_SIDE, Square::A8),
    ];

    pub fn from_bits(bits: u8) -> Option<CastlingRights> {
        if bits & 0xF0 == 0 {
            Some(CastlingRights(bits))
        } else {
            None
        }
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    /// Rights whose rook is not on a corner square (Chess960) are dropped
    pub fn from_rooks(rooks: Bitboard) -> CastlingRights {
        let bits = Self::ROOKS
            .iter()
            .filter(|(_, square)| rooks.contains(*square))
            .fold(0, |bits, (flag, _)| bits | flag);
        CastlingRights(bits)
    }

    pub fn to_rooks(self) -> Bitboard {
        Self::ROOKS
            .iter()
            .filter(|(flag, _)| self.0 & flag != 0)
            .fold(Bitboard::EMPTY, |rooks, (_, square)| {
                rooks | Bitboard::from_square(*square)
            })
    }

    pub fn mirrored(self) -> CastlingRights {
        CastlingRights(((self.0 & 0b0011) << 2) | ((self.0 & 0b1100) >> 2))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("{0} occupied squares, at most {max} are allowed", max = MAX_PIECES)]
    TooManyPieces(u32),

    #[error("invalid piece code {code:#x} on {square}")]
    PieceCode { square: Square, code: u8 },

    #[error("unused piece slots must be zero")]
    Padding,

    #[error("expected exactly one {color:?} king, found {count}")]
    KingCount { color: Color, count: usize },

    #[error("invalid en passant byte {0}")]
    EnPassant(u8),

    #[error("invalid castling byte {0:#04x}")]
    Castling(u8),

    #[error("fullmove number must be at least 1")]
    Fullmove,

    #[error("eval {0} is outside of [-{max}, {max}]", max = MAX_EVAL)]
    EvalRange(i64),

    #[error("invalid WDL code {0}")]
    WdlCode(u8),
}

impl RecordError {
    /// Whether this is a value-out-of-bounds problem rather than malformed data
    pub fn is_range(&self) -> bool {
        matches!(self, RecordError::EvalRange(_))
    }
}

/// A decoded training position: board, side to move, cached king squares,
/// auxiliary FEN state and the two labels (eval and WDL, both white-relative).
///
/// Records are only built through validating constructors, so every value of
/// this type can be encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionRecord {
    board: Board,
    turn: Color,
    white_king: Square,
    black_king: Square,
    castling: CastlingRights,
    ep_square: Option<Square>,
    halfmoves: u8,
    fullmoves: u16,
    eval: i16,
    wdl: Wdl,
}

impl PositionRecord {
    /// Builds a record with no castling rights, no en passant square and
    /// move counters at their initial values
    pub fn new(board: Board, turn: Color, eval: i64, wdl: Wdl) -> Result<Self, RecordError> {
        Self::from_parts(
            board,
            turn,
            CastlingRights::default(),
            None,
            0,
            1,
            eval,
            wdl,
        )
    }

    /// Builds a record from a parsed FEN setup.
    /// Move counters saturate at the width of the packed fields.
    pub fn from_setup(setup: &Setup, eval: i64, wdl: Wdl) -> Result<Self, RecordError> {
        Self::from_parts(
            setup.board.clone(),
            setup.turn,
            CastlingRights::from_rooks(setup.castling_rights),
            setup.ep_square,
            setup.halfmoves.min(u32::from(u8::MAX)) as u8,
            setup.fullmoves.get().min(u32::from(u16::MAX)) as u16,
            eval,
            wdl,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        board: Board,
        turn: Color,
        castling: CastlingRights,
        ep_square: Option<Square>,
        halfmoves: u8,
        fullmoves: u16,
        eval: i64,
        wdl: Wdl,
    ) -> Result<Self, RecordError> {
        let occupied = board.occupied().count() as u32;
        if occupied > MAX_PIECES {
            return Err(RecordError::TooManyPieces(occupied));
        }

        let white_king = single_king(&board, Color::White)?;
        let black_king = single_king(&board, Color::Black)?;

        if fullmoves == 0 {
            return Err(RecordError::Fullmove);
        }

        if !(-i64::from(MAX_EVAL)..=i64::from(MAX_EVAL)).contains(&eval) {
            return Err(RecordError::EvalRange(eval));
        }

        Ok(PositionRecord {
            board,
            turn,
            white_king,
            black_king,
            castling,
            ep_square,
            halfmoves,
            fullmoves,
            eval: eval as i16,
            wdl,
        })
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn turn(&self) -> Color {
        self.turn
    }

    pub fn king(&self, color: Color) -> Square {
        match color {
            Color::White => self.white_king,
            Color::Black => self.black_king,
        }
    }

    pub fn castling(&self) -> CastlingRights {
        self.castling
    }

    pub fn ep_square(&self) -> Option<Square> {
        self.ep_square
    }

    pub fn halfmoves(&self) -> u8 {
        self.halfmoves
    }

    pub fn fullmoves(&self) -> u16 {
        self.fullmoves
    }

    /// Centipawns from white's point of view
    pub fn eval(&self) -> i16 {
        self.eval
    }

    /// Centipawns from the side to move's point of view
    pub fn stm_eval(&self) -> i16 {
        match self.turn {
            Color::White => self.eval,
            Color::Black => -self.eval,
        }
    }

    /// Outcome from white's point of view
    pub fn wdl(&self) -> Wdl {
        self.wdl
    }

    /// Outcome from the side to move's point of view
    pub fn stm_wdl(&self) -> Wdl {
        match self.turn {
            Color::White => self.wdl,
            Color::Black => self.wdl.flipped(),
        }
    }

    pub fn piece_count(&self) -> usize {
        self.board.occupied().count()
    }

    /// Material phase: minor pieces 1, rooks 2, queens 4, capped at 24
    pub fn phase(&self) -> usize {
        let mut phase = 0;
        for square in self.board.occupied() {
            phase += match self.board.role_at(square) {
                Some(Role::Knight) | Some(Role::Bishop) => 1,
                Some(Role::Rook) => 2,
                Some(Role::Queen) => 4,
                _ => 0,
            };
        }
        phase.min(24)
    }

    /// The color-flipped position: ranks mirrored, colors swapped, labels negated
    pub fn mirrored(&self) -> PositionRecord {
        let mut board = Board::empty();
        for square in self.board.occupied() {
            if let Some(piece) = self.board.piece_at(square) {
                board.set_piece_at(
                    square.flip_vertical(),
                    Piece {
                        color: !piece.color,
                        role: piece.role,
                    },
                );
            }
        }

        PositionRecord {
            board,
            turn: !self.turn,
            white_king: self.black_king.flip_vertical(),
            black_king: self.white_king.flip_vertical(),
            castling: self.castling.mirrored(),
            ep_square: self.ep_square.map(Square::flip_vertical),
            halfmoves: self.halfmoves,
            fullmoves: self.fullmoves,
            eval: -self.eval,
            wdl: self.wdl.flipped(),
        }
    }

    pub fn to_setup(&self) -> Setup {
        let mut setup = Setup::empty();
        setup.board = self.board.clone();
        setup.turn = self.turn;
        setup.castling_rights = self.castling.to_rooks();
        setup.ep_square = self.ep_square;
        setup.halfmoves = u32::from(self.halfmoves);
        setup.fullmoves = NonZeroU32::new(u32::from(self.fullmoves)).unwrap_or(NonZeroU32::MIN);
        setup
    }
}

fn single_king(board: &Board, color: Color) -> Result<Square, RecordError> {
    let kings = board.kings() & board.by_color(color);
    match kings.single_square() {
        Some(square) => Ok(square),
        None => Err(RecordError::KingCount {
            color,
            count: kings.count(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wdl_tokens_are_exact() {
        assert_eq!(Wdl::from_text("1.0"), Some(Wdl::Win));
        assert_eq!(Wdl::from_text("0.5"), Some(Wdl::Draw));
        assert_eq!(Wdl::from_text("0.0"), Some(Wdl::Loss));
        assert_eq!(Wdl::from_text("1"), None);
        assert_eq!(Wdl::from_text("0.50"), None);
        assert_eq!(Wdl::from_text("0.49"), None);
    }

    #[test]
    fn test_kings_are_validated() {
        let mut board = Board::new();
        board.discard_piece_at(Square::E8);
        let err = PositionRecord::new(board, Color::White, 0, Wdl::Draw).unwrap_err();
        assert_eq!(
            err,
            RecordError::KingCount {
                color: Color::Black,
                count: 0
            }
        );
    }

    #[test]
    fn test_eval_bounds() {
        assert!(PositionRecord::new(Board::new(), Color::White, 32000, Wdl::Win).is_ok());
        assert!(PositionRecord::new(Board::new(), Color::White, -32000, Wdl::Loss).is_ok());
        assert_eq!(
            PositionRecord::new(Board::new(), Color::White, 32001, Wdl::Win).unwrap_err(),
            RecordError::EvalRange(32001)
        );
        assert_eq!(
            PositionRecord::new(Board::new(), Color::White, i64::MIN, Wdl::Loss).unwrap_err(),
            RecordError::EvalRange(i64::MIN)
        );
        assert_eq!(
            PositionRecord::new(Board::new(), Color::White, i64::MAX, Wdl::Win).unwrap_err(),
            RecordError::EvalRange(i64::MAX)
        );
    }

    #[test]
    fn test_too_many_pieces_message() {
        let err = RecordError::TooManyPieces(33);
        assert_eq!(err.to_string(), "33 occupied squares, at most 32 are allowed");
    }

    #[test]
    fn test_mirrored_twice_is_identity() {
        let record = PositionRecord::new(Board::new(), Color::Black, -35, Wdl::Loss).unwrap();
        let mirrored = record.mirrored();

        assert_eq!(mirrored.turn(), Color::White);
        assert_eq!(mirrored.eval(), 35);
        assert_eq!(mirrored.wdl(), Wdl::Win);
        assert_eq!(mirrored.stm_eval(), record.stm_eval());
        assert_eq!(mirrored.king(Color::White), Square::E1);
        assert_eq!(mirrored.mirrored(), record);
    }

    #[test]
    fn test_castling_mirror() {
        let rights = CastlingRights::from_bits(
            CastlingRights::WHITE_KING_SIDE | CastlingRights::BLACK_QUEEN_SIDE,
        )
        .unwrap();
        assert_eq!(
            rights.mirrored().bits(),
            CastlingRights::BLACK_KING_SIDE | CastlingRights::WHITE_QUEEN_SIDE
        );
        assert_eq!(CastlingRights::from_rooks(rights.to_rooks()), rights);
        assert!(CastlingRights::from_bits(0x10).is_none());
    }

    #[test]
    fn test_phase_of_start_position() {
        let record = PositionRecord::new(Board::new(), Color::White, 0, Wdl::Draw).unwrap();
        assert_eq!(record.phase(), 24);
        assert_eq!(record.piece_count(), 32);
    }
}
