//! 駒種（PieceType）と駒（Piece）

use super::Color;

/// 駒種
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PieceType {
    Pawn = 0,
    Knight = 1,
    Bishop = 2,
    Rook = 3,
    Queen = 4,
    King = 5,
}

impl PieceType {
    /// 駒種の数
    pub const NUM: usize = 6;

    pub const ALL: [PieceType; 6] = [
        PieceType::Pawn,
        PieceType::Knight,
        PieceType::Bishop,
        PieceType::Rook,
        PieceType::Queen,
        PieceType::King,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// 駒（手番 + 駒種）
///
/// 内部表現は `color * 6 + piece_type`（0..12）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Piece(u8);

impl Piece {
    /// 駒の数
    pub const NUM: usize = 12;

    pub const W_PAWN: Piece = Piece::new(Color::White, PieceType::Pawn);
    pub const W_KNIGHT: Piece = Piece::new(Color::White, PieceType::Knight);
    pub const W_BISHOP: Piece = Piece::new(Color::White, PieceType::Bishop);
    pub const W_ROOK: Piece = Piece::new(Color::White, PieceType::Rook);
    pub const W_QUEEN: Piece = Piece::new(Color::White, PieceType::Queen);
    pub const W_KING: Piece = Piece::new(Color::White, PieceType::King);
    pub const B_PAWN: Piece = Piece::new(Color::Black, PieceType::Pawn);
    pub const B_KNIGHT: Piece = Piece::new(Color::Black, PieceType::Knight);
    pub const B_BISHOP: Piece = Piece::new(Color::Black, PieceType::Bishop);
    pub const B_ROOK: Piece = Piece::new(Color::Black, PieceType::Rook);
    pub const B_QUEEN: Piece = Piece::new(Color::Black, PieceType::Queen);
    pub const B_KING: Piece = Piece::new(Color::Black, PieceType::King);

    #[inline]
    pub const fn new(color: Color, piece_type: PieceType) -> Piece {
        Piece(color as u8 * 6 + piece_type as u8)
    }

    /// インデックス（0..12）から生成
    #[inline]
    pub const fn from_index(index: usize) -> Option<Piece> {
        if index < Self::NUM { Some(Piece(index as u8)) } else { None }
    }

    #[inline]
    pub const fn color(self) -> Color {
        if self.0 < 6 { Color::White } else { Color::Black }
    }

    #[inline]
    pub const fn piece_type(self) -> PieceType {
        PieceType::ALL[(self.0 % 6) as usize]
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn is_king(self) -> bool {
        self.0 % 6 == PieceType::King as u8
    }

    /// FEN 文字（白は大文字、黒は小文字）から生成
    pub fn from_fen_char(c: char) -> Option<Piece> {
        let piece_type = match c.to_ascii_lowercase() {
            'p' => PieceType::Pawn,
            'n' => PieceType::Knight,
            'b' => PieceType::Bishop,
            'r' => PieceType::Rook,
            'q' => PieceType::Queen,
            'k' => PieceType::King,
            _ => return None,
        };
        let color = if c.is_ascii_uppercase() { Color::White } else { Color::Black };
        Some(Piece::new(color, piece_type))
    }

    /// FEN 文字に変換
    pub fn to_fen_char(self) -> char {
        let c = b"pnbrqk"[self.piece_type().index()] as char;
        match self.color() {
            Color::White => c.to_ascii_uppercase(),
            Color::Black => c,
        }
    }
}
