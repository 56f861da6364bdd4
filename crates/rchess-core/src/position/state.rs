//! DirtyPiece: 1手で変化した駒の記録

use crate::types::{Piece, Square};

/// 1手で変化した駒
///
/// - `piece` が `from` から `to` へ移動する（成りの場合 `to` は None）
/// - `removed`: 取られた駒とその升（アンパッサンでは移動先と異なる）
/// - `added`: 成った駒、またはキャスリングで移動した飛車の移動後
///
/// キャスリングの飛車の移動元は `removed` に入る。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyPiece {
    pub piece: Piece,
    pub from: Square,
    pub to: Option<Square>,
    pub removed: Option<(Piece, Square)>,
    pub added: Option<(Piece, Square)>,
}

impl DirtyPiece {
    /// 駒を取らない通常の手
    pub const fn quiet(piece: Piece, from: Square, to: Square) -> Self {
        Self { piece, from, to: Some(to), removed: None, added: None }
    }

    /// 駒を取る手
    pub const fn capture(piece: Piece, from: Square, to: Square, captured: Piece) -> Self {
        Self { piece, from, to: Some(to), removed: Some((captured, to)), added: None }
    }

    /// アンパッサン
    pub const fn en_passant(
        pawn: Piece,
        from: Square,
        to: Square,
        captured: Piece,
        captured_sq: Square,
    ) -> Self {
        Self {
            piece: pawn,
            from,
            to: Some(to),
            removed: Some((captured, captured_sq)),
            added: None,
        }
    }

    /// 成り（取りを伴う場合は `captured` を指定）
    pub const fn promotion(
        pawn: Piece,
        from: Square,
        to: Square,
        promoted: Piece,
        captured: Option<Piece>,
    ) -> Self {
        let removed = match captured {
            Some(pc) => Some((pc, to)),
            None => None,
        };
        Self { piece: pawn, from, to: None, removed, added: Some((promoted, to)) }
    }

    /// キャスリング（玉の移動 + 飛車の移動）
    pub const fn castling(
        king: Piece,
        king_from: Square,
        king_to: Square,
        rook: Piece,
        rook_from: Square,
        rook_to: Square,
    ) -> Self {
        Self {
            piece: king,
            from: king_from,
            to: Some(king_to),
            removed: Some((rook, rook_from)),
            added: Some((rook, rook_to)),
        }
    }
}
