//! Fixed 32 byte layout of a [`PositionRecord`].
//!
//! | bytes  | field                                                        |
//! |--------|--------------------------------------------------------------|
//! | 0..8   | occupancy bitboard, bit i = square i (a1 = 0)                |
//! | 8..24  | one nibble per occupied square in ascending order, low first |
//! | 24     | bit 7 side to move (1 = black), bits 0..6 en passant (64 = -)|
//! | 25     | halfmove clock                                               |
//! | 26..28 | fullmove number                                              |
//! | 28..30 | eval, white relative                                         |
//! | 30     | WDL code, white relative                                     |
//! | 31     | castling flags                                               |
//!
//! A piece nibble is `role | color << 3` with roles 0 (pawn) to 5 (king) and
//! color 1 for black. All multi-byte fields are little endian.
//!
//! The layout carries no version: changing it invalidates existing datasets.

use super::{CastlingRights, PositionRecord, RecordError, Wdl, MAX_PIECES};
use byteorder::{ByteOrder, LittleEndian};
use shakmaty::{Bitboard, Board, Color, Piece, Role, Square};

pub const RECORD_SIZE: usize = 32;

pub type PackedRecord = [u8; RECORD_SIZE];

const PIECES_OFFSET: usize = 8;
const NO_EP_SQUARE: u8 = 64;
const BLACK_TO_MOVE: u8 = 0x80;

pub fn encode(record: &PositionRecord) -> PackedRecord {
    let mut bytes = [0u8; RECORD_SIZE];
    encode_into(record, &mut bytes);
    bytes
}

pub fn encode_into(record: &PositionRecord, bytes: &mut PackedRecord) {
    bytes.fill(0);

    let board = record.board();
    let occupied = board.occupied();
    LittleEndian::write_u64(&mut bytes[0..8], u64::from(occupied));

    for (slot, square) in occupied.into_iter().enumerate() {
        let nibble = match board.piece_at(square) {
            Some(piece) => piece_code(piece),
            None => 0,
        };
        bytes[PIECES_OFFSET + slot / 2] |= nibble << ((slot % 2) * 4);
    }

    let ep = record.ep_square().map_or(NO_EP_SQUARE, |sq| sq as u8);
    bytes[24] = ep
        | match record.turn() {
            Color::White => 0,
            Color::Black => BLACK_TO_MOVE,
        };
    bytes[25] = record.halfmoves();
    LittleEndian::write_u16(&mut bytes[26..28], record.fullmoves());
    LittleEndian::write_i16(&mut bytes[28..30], record.eval());
    bytes[30] = record.wdl().code();
    bytes[31] = record.castling().bits();
}

pub fn decode(bytes: &PackedRecord) -> Result<PositionRecord, RecordError> {
    let occupied = Bitboard(LittleEndian::read_u64(&bytes[0..8]));
    let count = occupied.count() as u32;
    if count > MAX_PIECES {
        return Err(RecordError::TooManyPieces(count));
    }

    let mut board = Board::empty();
    for (slot, square) in occupied.into_iter().enumerate() {
        let nibble = (bytes[PIECES_OFFSET + slot / 2] >> ((slot % 2) * 4)) & 0xF;
        let piece = piece_from_code(nibble).ok_or(RecordError::PieceCode {
            square,
            code: nibble,
        })?;
        board.set_piece_at(square, piece);
    }

    // nibbles past the last piece must be empty
    for slot in count as usize..MAX_PIECES as usize {
        if (bytes[PIECES_OFFSET + slot / 2] >> ((slot % 2) * 4)) & 0xF != 0 {
            return Err(RecordError::Padding);
        }
    }

    let turn = if bytes[24] & BLACK_TO_MOVE != 0 {
        Color::Black
    } else {
        Color::White
    };
    let ep_square = match bytes[24] & !BLACK_TO_MOVE {
        NO_EP_SQUARE => None,
        sq if sq < NO_EP_SQUARE => Some(Square::new(u32::from(sq))),
        other => return Err(RecordError::EnPassant(other)),
    };

    let wdl = Wdl::from_code(bytes[30]).ok_or(RecordError::WdlCode(bytes[30]))?;
    let castling = CastlingRights::from_bits(bytes[31]).ok_or(RecordError::Castling(bytes[31]))?;

    PositionRecord::from_parts(
        board,
        turn,
        castling,
        ep_square,
        bytes[25],
        LittleEndian::read_u16(&bytes[26..28]),
        i64::from(LittleEndian::read_i16(&bytes[28..30])),
        wdl,
    )
}

fn piece_code(piece: Piece) -> u8 {
    let role = piece.role as u8 - 1;
    match piece.color {
        Color::White => role,
        Color::Black => role | 0x8,
    }
}

fn piece_from_code(code: u8) -> Option<Piece> {
    let role = match code & 0x7 {
        0 => Role::Pawn,
        1 => Role::Knight,
        2 => Role::Bishop,
        3 => Role::Rook,
        4 => Role::Queen,
        5 => Role::King,
        _ => return None,
    };
    Some(Piece {
        color: Color::from_white(code & 0x8 == 0),
        role,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::text::parse_line;
    use proptest::prelude::*;

    const FENS: [&str; 4] = [
        "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        "4nrk1/3q1pp1/2n1p1p1/8/1P2Q3/7P/PB1N1PP1/2R3K1 w - - 5 26",
        "rnbqkbnr/ppp1p1pp/8/3pPp2/8/8/PPPP1PPP/RNBQKBNR w KQkq f6 0 3",
        "8/2k5/p1P5/5r2/2K5/8/P7/7R b - - 4 39",
    ];

    #[test]
    fn test_round_trip_known_positions() {
        for (i, fen) in FENS.iter().enumerate() {
            let line = format!("{} | {} | 0.5", fen, i as i32 * 117 - 200);
            let record = parse_line(&line).unwrap();
            let bytes = encode(&record);
            assert_eq!(decode(&bytes).unwrap(), record, "{}", fen);
        }
    }

    #[test]
    fn test_start_position_bytes() {
        let record = parse_line(&format!("{} | 0 | 0.5", FENS[0])).unwrap();
        let bytes = encode(&record);

        assert_eq!(LittleEndian::read_u64(&bytes[0..8]), 0xFFFF_0000_0000_FFFF);
        // a1 rook (3) then b1 knight (1)
        assert_eq!(bytes[8], 0x13);
        // a8 black rook and b8 black knight
        assert_eq!(bytes[20], 0x9B);
        assert_eq!(bytes[24], NO_EP_SQUARE);
        assert_eq!(bytes[30], Wdl::Draw.code());
        assert_eq!(bytes[31], 0xF);
    }

    #[test]
    fn test_rejects_invalid_piece_code() {
        let record = parse_line(&format!("{} | 0 | 0.5", FENS[0])).unwrap();
        let mut bytes = encode(&record);
        bytes[8] = 0x16;

        assert_eq!(
            decode(&bytes).unwrap_err(),
            RecordError::PieceCode {
                square: Square::A1,
                code: 6
            }
        );
    }

    #[test]
    fn test_rejects_out_of_range_eval() {
        let record = parse_line(&format!("{} | 0 | 0.5", FENS[0])).unwrap();
        let mut bytes = encode(&record);
        LittleEndian::write_i16(&mut bytes[28..30], -32001);

        let err = decode(&bytes).unwrap_err();
        assert_eq!(err, RecordError::EvalRange(-32001));
        assert!(err.is_range());
    }

    #[test]
    fn test_rejects_bad_wdl_castling_and_padding() {
        let record = parse_line(&format!("{} | 0 | 0.5", FENS[3])).unwrap();
        let good = encode(&record);

        let mut bytes = good;
        bytes[30] = 3;
        assert_eq!(decode(&bytes).unwrap_err(), RecordError::WdlCode(3));

        let mut bytes = good;
        bytes[31] = 0x20;
        assert_eq!(decode(&bytes).unwrap_err(), RecordError::Castling(0x20));

        let mut bytes = good;
        bytes[23] = 0x10;
        assert_eq!(decode(&bytes).unwrap_err(), RecordError::Padding);

        let mut bytes = good;
        bytes[24] = 65;
        assert_eq!(decode(&bytes).unwrap_err(), RecordError::EnPassant(65));
    }

    #[test]
    fn test_rejects_missing_king() {
        let record = parse_line(&format!("{} | 0 | 0.5", FENS[3])).unwrap();
        let mut bytes = encode(&record);
        // turn every king nibble into a queen
        for byte in &mut bytes[8..24] {
            for shift in [0, 4] {
                if (*byte >> shift) & 0x7 == 5 {
                    *byte = (*byte & !(0x7 << shift)) | (4 << shift);
                }
            }
        }

        assert!(matches!(
            decode(&bytes).unwrap_err(),
            RecordError::KingCount { count: 0, .. }
        ));
    }

    #[test]
    fn test_zeroed_bytes_are_rejected() {
        assert!(decode(&[0u8; RECORD_SIZE]).is_err());
    }

    fn arb_record() -> impl Strategy<Value = PositionRecord> {
        (
            0usize..FENS.len(),
            -32000i64..=32000,
            0u8..3,
            any::<bool>(),
        )
            .prop_map(|(fen, eval, wdl, mirror)| {
                let line = format!("{} | {} | {}", FENS[fen], eval, Wdl::ALL[wdl as usize].as_text());
                let record = parse_line(&line).unwrap();
                if mirror {
                    record.mirrored()
                } else {
                    record
                }
            })
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(record in arb_record()) {
            prop_assert_eq!(decode(&encode(&record)).unwrap(), record);
        }
    }
}
