//! 局面表現モジュール
//!
//! 評価コアが必要とする駒配置のスナップショットを保持する。
//! 指し手生成や合法性判定は行わない（盤面側の責務）。
//!
//! - `Position`: 盤面配列・手番別/駒別 Bitboard・手番
//! - `DirtyPiece`: 1手で変化した駒の記録（特徴量の差分計算に使用）
//! - FEN の駒配置・手番フィールドの解析

mod fen;
mod state;

pub use fen::{FEN_STARTPOS, FenError};
pub use state::DirtyPiece;

use crate::types::{Bitboard, Color, Piece, PieceType, Square, Value};

/// 駒配置のスナップショット
///
/// 盤面配列と Bitboard は `put_piece` / `remove_piece` を通じてのみ更新され、
/// 常に互いに整合している。
#[derive(Clone, PartialEq, Eq)]
pub struct Position {
    board: [Option<Piece>; Square::NUM],
    by_color: [Bitboard; Color::NUM],
    by_piece: [Bitboard; Piece::NUM],
    side_to_move: Color,
}

impl Default for Position {
    fn default() -> Self {
        Self::new()
    }
}

impl Position {
    /// 空の盤面を生成
    pub fn new() -> Self {
        Self {
            board: [None; Square::NUM],
            by_color: [Bitboard::EMPTY; Color::NUM],
            by_piece: [Bitboard::EMPTY; Piece::NUM],
            side_to_move: Color::White,
        }
    }

    /// 平手初期局面
    pub fn startpos() -> Self {
        let mut pos = Self::new();
        // FEN_STARTPOS は定数なので解析に失敗しない
        if let Err(e) = pos.set_fen(FEN_STARTPOS) {
            unreachable!("startpos FEN must parse: {e}");
        }
        pos
    }

    /// FEN 文字列から生成
    pub fn from_fen(fen: &str) -> Result<Self, FenError> {
        let mut pos = Self::new();
        pos.set_fen(fen)?;
        Ok(pos)
    }

    #[inline]
    pub fn side_to_move(&self) -> Color {
        self.side_to_move
    }

    #[inline]
    pub fn piece_on(&self, sq: Square) -> Option<Piece> {
        self.board[sq.index()]
    }

    /// 盤面配列全体
    #[inline]
    pub fn board(&self) -> &[Option<Piece>; Square::NUM] {
        &self.board
    }

    /// 全駒の占有 Bitboard
    #[inline]
    pub fn occupied(&self) -> Bitboard {
        self.by_color[0] | self.by_color[1]
    }

    #[inline]
    pub fn pieces_of(&self, color: Color) -> Bitboard {
        self.by_color[color.index()]
    }

    #[inline]
    pub fn pieces(&self, pc: Piece) -> Bitboard {
        self.by_piece[pc.index()]
    }

    /// 玉の升
    #[inline]
    pub fn king_square(&self, color: Color) -> Square {
        let bb = self.by_piece[Piece::new(color, PieceType::King).index()];
        debug_assert!(bb.count() == 1, "{color:?} must have exactly one king");
        Square::from_index_unchecked((bb.0.trailing_zeros() & 63) as usize)
    }

    /// 盤上の駒数（両玉を含む）
    #[inline]
    pub fn count_all(&self) -> usize {
        self.occupied().count() as usize
    }

    #[inline]
    pub fn count(&self, pc: Piece) -> usize {
        self.by_piece[pc.index()].count() as usize
    }

    /// 歩と玉を除く駒の価値合計
    pub fn non_pawn_material(&self, color: Color) -> i32 {
        [
            (PieceType::Knight, Value::KNIGHT),
            (PieceType::Bishop, Value::BISHOP),
            (PieceType::Rook, Value::ROOK),
            (PieceType::Queen, Value::QUEEN),
        ]
        .iter()
        .map(|&(pt, v)| self.count(Piece::new(color, pt)) as i32 * v)
        .sum()
    }

    /// 手番側から見た駒得（ネットワーク選択に使用）
    pub fn simple_eval(&self) -> i32 {
        let us = self.side_to_move;
        let them = !us;
        Value::PAWN
            * (self.count(Piece::new(us, PieceType::Pawn)) as i32
                - self.count(Piece::new(them, PieceType::Pawn)) as i32)
            + self.non_pawn_material(us)
            - self.non_pawn_material(them)
    }

    /// 駒を置く
    pub fn put_piece(&mut self, pc: Piece, sq: Square) {
        debug_assert!(self.board[sq.index()].is_none(), "square {sq} is occupied");
        self.board[sq.index()] = Some(pc);
        self.by_color[pc.color().index()].set(sq);
        self.by_piece[pc.index()].set(sq);
    }

    /// 駒を取り除く
    pub fn remove_piece(&mut self, sq: Square) -> Option<Piece> {
        let pc = self.board[sq.index()].take()?;
        self.by_color[pc.color().index()].clear(sq);
        self.by_piece[pc.index()].clear(sq);
        Some(pc)
    }

    /// 盤面側で指された手を反映し、手番を入れ替える
    ///
    /// 取り除く駒をすべて取り除いてから置くので、
    /// 玉の移動先と飛車の移動元が重なるキャスリングも扱える。
    pub fn apply(&mut self, dp: &DirtyPiece) {
        let moved = self.remove_piece(dp.from);
        debug_assert_eq!(moved, Some(dp.piece));
        if let Some((pc, sq)) = dp.removed {
            let removed = self.remove_piece(sq);
            debug_assert_eq!(removed, Some(pc));
        }
        if let Some(to) = dp.to {
            self.put_piece(dp.piece, to);
        }
        if let Some((pc, sq)) = dp.added {
            self.put_piece(pc, sq);
        }
        self.side_to_move = !self.side_to_move;
    }

    /// `apply` の逆操作
    pub fn revert(&mut self, dp: &DirtyPiece) {
        if let Some((_, sq)) = dp.added {
            self.remove_piece(sq);
        }
        if let Some(to) = dp.to {
            self.remove_piece(to);
        }
        if let Some((pc, sq)) = dp.removed {
            self.put_piece(pc, sq);
        }
        self.put_piece(dp.piece, dp.from);
        self.side_to_move = !self.side_to_move;
    }
}

impl std::fmt::Debug for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Position({})", self.to_fen())
    }
}
