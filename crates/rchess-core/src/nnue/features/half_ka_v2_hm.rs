//! HalfKAv2_hm 特徴量
//!
//! 自玉の位置（32バケット、左右ミラー）× 駒（11面）× 升（64）。
//!
//! - 視点が黒のときは盤面を上下反転する
//! - 自玉が a〜d 筋にあるときは盤面を左右反転し、玉が常に e〜h 筋側にあるように扱う
//! - 両玉は同じ面（PS_KING）を共有する
//!
//! 自玉が動くと全特徴量のインデックスが変わるため、アキュムレータの全計算が必要になる。

use super::{ChangedIndices, IndexList};
use crate::position::DirtyPiece;
use crate::types::{Bitboard, Color, Piece, PieceType, Square};

/// 駒1面あたりの升数
const PS_PLANE: usize = 64;

/// 玉の面
const PS_KING: usize = 10 * PS_PLANE;

/// 1 キングバケットあたりの次元数（11面）
const PS_NB: usize = 11 * PS_PLANE;

/// HalfKAv2_hm 特徴量
#[allow(non_camel_case_types)]
pub struct HalfKAv2_hm;

impl HalfKAv2_hm {
    /// 特徴量の次元数: 32 バケット × 704 = 22,528
    pub const DIMENSIONS: usize = 32 * PS_NB;

    /// 同時にアクティブになる最大数（盤上の駒数）
    pub const MAX_ACTIVE: usize = 32;

    /// 1手で変化する最大数（除去・追加それぞれ）
    pub const MAX_CHANGED: usize = 2;

    /// 構造ハッシュ
    pub const HASH: u32 = 0x7F23_4CB8;

    /// 自玉の筋による左右反転（a〜d 筋なら h1 との xor で反転）
    #[inline]
    const fn orient(ksq: Square) -> usize {
        if ksq.file() < 4 { 7 } else { 0 }
    }

    #[inline]
    const fn flip(perspective: Color) -> usize {
        match perspective {
            Color::White => 0,
            Color::Black => 56,
        }
    }

    /// 玉の位置のバケット（0..32、8段目側ほど小さい）
    #[inline]
    const fn king_bucket(oriented_rank_sq: usize) -> usize {
        let rank = oriented_rank_sq / 8;
        let file = oriented_rank_sq % 8;
        let file = if file < 4 { file } else { 7 - file };
        (7 - rank) * 4 + file
    }

    /// 駒の面（自駒・敵駒を区別、玉は共通）
    #[inline]
    const fn piece_plane(perspective: Color, pc: Piece) -> usize {
        if pc.is_king() {
            return PS_KING;
        }
        let them = pc.color() as usize != perspective as usize;
        (pc.piece_type() as usize * 2 + them as usize) * PS_PLANE
    }

    /// 特徴量インデックス
    #[inline]
    pub const fn index(perspective: Color, sq: Square, pc: Piece, ksq: Square) -> usize {
        let flip = Self::flip(perspective);
        (sq.index() ^ Self::orient(ksq) ^ flip)
            + Self::piece_plane(perspective, pc)
            + Self::king_bucket(ksq.index() ^ flip) * PS_NB
    }

    /// 盤上の全駒の特徴量を追記
    pub fn append_active_indices<const N: usize>(
        perspective: Color,
        ksq: Square,
        pieces: &[Option<Piece>; Square::NUM],
        occupied: Bitboard,
        active: &mut IndexList<N>,
    ) {
        for sq in occupied {
            if let Some(pc) = pieces[sq.index()] {
                active.push(Self::index(perspective, sq, pc, ksq));
            }
        }
    }

    /// 1手分の差分を追記
    pub fn append_changed_indices(
        dp: &DirtyPiece,
        perspective: Color,
        ksq: Square,
        removed: &mut ChangedIndices,
        added: &mut ChangedIndices,
    ) {
        removed.push(Self::index(perspective, dp.from, dp.piece, ksq));
        if let Some(to) = dp.to {
            added.push(Self::index(perspective, to, dp.piece, ksq));
        }
        if let Some((pc, sq)) = dp.removed {
            removed.push(Self::index(perspective, sq, pc, ksq));
        }
        if let Some((pc, sq)) = dp.added {
            added.push(Self::index(perspective, sq, pc, ksq));
        }
    }

    /// 動いた駒が `perspective` 側の玉なら全計算が必要
    #[inline]
    pub fn requires_refresh(dp: &DirtyPiece, perspective: Color) -> bool {
        dp.piece == Piece::new(perspective, PieceType::King)
    }
}
