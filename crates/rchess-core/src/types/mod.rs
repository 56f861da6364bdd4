//! 基本型
//!
//! 評価コアと盤面側（指し手生成・探索）との境界で用いる値型。

mod bitboard;
mod color;
mod piece;
mod square;
mod value;

pub use bitboard::Bitboard;
pub use color::Color;
pub use piece::{Piece, PieceType};
pub use square::Square;
pub use value::Value;

/// 探索の最大手数
pub const MAX_PLY: usize = 246;
