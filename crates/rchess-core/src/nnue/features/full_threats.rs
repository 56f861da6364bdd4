//! FullThreats 特徴量（big ネットワーク専用）
//!
//! 「攻撃駒 × 攻撃元の升 × 攻撃先の升 × 攻撃される駒（玉以外）」を1特徴量とする。
//! 攻撃先は、空の盤で攻撃元から利きが届く升に限る。
//!
//! 向き付けは HalfKAv2_hm と同じ（黒視点で上下反転、自玉が a〜d 筋なら左右反転）。
//! 利きの形は上下反転 + 色の入れ替えと左右反転について対称なので、
//! 向き付け後の座標で空盤の利き表を引ける。
//!
//! 盤上の利きは駒が動くたびに広く変化するため、差分は直前ノードの利きリストとの
//! 差集合で求める。利きリストは視点に依存しない形（`pack`）で保持する。

use super::{ChangedIndices, IndexList};
use crate::types::{Bitboard, Color, Piece, PieceType, Square};

/// 同時に存在する利きの最大数
///
/// 1駒が利きを通せる駒は方向ごとに高々1つ（最大8方向）なので、32駒 × 8 で抑えられる。
pub const MAX_ACTIVE_THREATS: usize = 256;

/// 視点に依存しない利きのリスト（`pack` 形式、昇順）
pub type ThreatList = IndexList<MAX_ACTIVE_THREATS>;

/// 攻撃される側の駒の種類数（玉以外 5種 × 自他）
const VICTIM_KINDS: usize = 10;

/// 攻撃駒の種類数（6種 × 自他）
const ATTACKER_KINDS: usize = 12;

const KNIGHT_STEPS: [(i8, i8); 8] =
    [(1, 2), (2, 1), (2, -1), (1, -2), (-1, -2), (-2, -1), (-2, 1), (-1, 2)];
const KING_STEPS: [(i8, i8); 8] =
    [(1, 0), (1, 1), (0, 1), (-1, 1), (-1, 0), (-1, -1), (0, -1), (1, -1)];
const BISHOP_DIRS: [(i8, i8); 4] = [(1, 1), (-1, 1), (-1, -1), (1, -1)];
const ROOK_DIRS: [(i8, i8); 4] = [(1, 0), (0, 1), (-1, 0), (0, -1)];

#[inline]
const fn offset(sq: usize, df: i8, dr: i8) -> Option<usize> {
    let f = (sq % 8) as i8 + df;
    let r = (sq / 8) as i8 + dr;
    if f >= 0 && f < 8 && r >= 0 && r < 8 { Some((r * 8 + f) as usize) } else { None }
}

const fn step_attacks(sq: usize, steps: &[(i8, i8)]) -> u64 {
    let mut bb = 0u64;
    let mut i = 0;
    while i < steps.len() {
        if let Some(t) = offset(sq, steps[i].0, steps[i].1) {
            bb |= 1u64 << t;
        }
        i += 1;
    }
    bb
}

/// 遮り駒 `occupied` を考慮した走り駒の利き（遮った駒の升を含む）
const fn ray_attacks(sq: usize, dirs: &[(i8, i8)], occupied: u64) -> u64 {
    let mut bb = 0u64;
    let mut d = 0;
    while d < dirs.len() {
        let mut cur = sq;
        while let Some(t) = offset(cur, dirs[d].0, dirs[d].1) {
            bb |= 1u64 << t;
            if occupied & (1u64 << t) != 0 {
                break;
            }
            cur = t;
        }
        d += 1;
    }
    bb
}

/// 駒種・向き（上向き = 自駒の歩）ごとの利き
const fn attacks(pt: PieceType, upward: bool, sq: usize, occupied: u64) -> u64 {
    match pt {
        PieceType::Pawn => {
            let dr = if upward { 1 } else { -1 };
            step_attacks(sq, &[(-1, dr), (1, dr)])
        }
        PieceType::Knight => step_attacks(sq, &KNIGHT_STEPS),
        PieceType::Bishop => ray_attacks(sq, &BISHOP_DIRS, occupied),
        PieceType::Rook => ray_attacks(sq, &ROOK_DIRS, occupied),
        PieceType::Queen => {
            ray_attacks(sq, &BISHOP_DIRS, occupied) | ray_attacks(sq, &ROOK_DIRS, occupied)
        }
        PieceType::King => step_attacks(sq, &KING_STEPS),
    }
}

/// 空盤の利き表 `[攻撃駒の種類][向き付け後の升]`
///
/// 攻撃駒の種類は `piece_type * 2 + them`。自駒の歩は上向き。
const EMPTY_ATTACKS: [[u64; 64]; ATTACKER_KINDS] = {
    let mut table = [[0u64; 64]; ATTACKER_KINDS];
    let mut kind = 0;
    while kind < ATTACKER_KINDS {
        let pt = PieceType::ALL[kind / 2];
        let upward = kind % 2 == 0;
        let mut sq = 0;
        while sq < 64 {
            table[kind][sq] = attacks(pt, upward, sq, 0);
            sq += 1;
        }
        kind += 1;
    }
    table
};

/// `(攻撃駒の種類, 攻撃元)` ごとの攻撃先ペア番号の開始位置
const PAIR_OFFSETS: [[u32; 64]; ATTACKER_KINDS] = {
    let mut table = [[0u32; 64]; ATTACKER_KINDS];
    let mut total = 0u32;
    let mut kind = 0;
    while kind < ATTACKER_KINDS {
        let mut sq = 0;
        while sq < 64 {
            table[kind][sq] = total;
            total += EMPTY_ATTACKS[kind][sq].count_ones();
            sq += 1;
        }
        kind += 1;
    }
    table
};

const TOTAL_PAIRS: usize = {
    let last = &EMPTY_ATTACKS[ATTACKER_KINDS - 1];
    PAIR_OFFSETS[ATTACKER_KINDS - 1][63] as usize + last[63].count_ones() as usize
};

/// FullThreats 特徴量
pub struct FullThreats;

impl FullThreats {
    /// 特徴量の次元数（攻撃ペア数 × 攻撃される駒の種類）
    pub const DIMENSIONS: usize = TOTAL_PAIRS * VICTIM_KINDS;

    /// 構造ハッシュ
    ///
    /// 次元の並びが Stockfish の FullThreats と異なるので、同じ値にしてはならない。
    pub const HASH: u32 = 0x3E61_D2A5;

    /// 視点に依存しない利きの表現
    ///
    /// 昇順に並べると攻撃駒・攻撃元・攻撃先・攻撃される駒の辞書順になる。
    #[inline]
    pub const fn pack(attacker: Piece, from: Square, to: Square, victim: Piece) -> u32 {
        (attacker.index() as u32) << 16
            | (from.index() as u32) << 10
            | (to.index() as u32) << 4
            | victim.index() as u32
    }

    #[inline]
    fn unpack(threat: u32) -> (Piece, Square, Square, Piece) {
        let attacker = Piece::from_index((threat >> 16) as usize & 15);
        let victim = Piece::from_index(threat as usize & 15);
        match (attacker, victim) {
            (Some(a), Some(v)) => (
                a,
                Square::from_index_unchecked((threat >> 10) as usize & 63),
                Square::from_index_unchecked((threat >> 4) as usize & 63),
                v,
            ),
            _ => super::feature_index_oob(threat as usize, Self::DIMENSIONS),
        }
    }

    /// 盤上のすべての利きを昇順で追記
    pub fn append_active_threats(
        pieces: &[Option<Piece>; Square::NUM],
        occupied: Bitboard,
        out: &mut ThreatList,
    ) {
        for from in occupied {
            let Some(attacker) = pieces[from.index()] else {
                continue;
            };
            let upward = attacker.color() == Color::White;
            let targets =
                Bitboard(attacks(attacker.piece_type(), upward, from.index(), occupied.0))
                    & occupied;
            for to in targets {
                match pieces[to.index()] {
                    Some(victim) if !victim.is_king() => {
                        out.push(Self::pack(attacker, from, to, victim) as usize);
                    }
                    _ => {}
                }
            }
        }
        out.as_mut_slice().sort_unstable();
    }

    /// 利き（`pack` 形式）の特徴量インデックス
    pub fn index(threat: u32, perspective: Color, ksq: Square) -> usize {
        let (attacker, from, to, victim) = Self::unpack(threat);
        let flip = if perspective == Color::Black { 56 } else { 0 };
        let orient = if ksq.file() < 4 { 7 } else { 0 };
        let from = from.index() ^ flip ^ orient;
        let to = to.index() ^ flip ^ orient;

        let them = |pc: Piece| (pc.color() != perspective) as usize;
        let kind = attacker.piece_type().index() * 2 + them(attacker);
        let victim_kind = victim.piece_type().index() * 2 + them(victim);

        let reachable = EMPTY_ATTACKS[kind][from];
        if reachable & (1u64 << to) == 0 || victim_kind >= VICTIM_KINDS {
            super::feature_index_oob(threat as usize, Self::DIMENSIONS);
        }
        let rank = (reachable & ((1u64 << to) - 1)).count_ones() as usize;
        (PAIR_OFFSETS[kind][from] as usize + rank) * VICTIM_KINDS + victim_kind
    }

    /// 昇順リスト同士の差分を追記（`offset` は特徴量空間での開始位置）
    pub fn append_changed_indices(
        prev: &ThreatList,
        curr: &ThreatList,
        perspective: Color,
        ksq: Square,
        removed: &mut ChangedIndices,
        added: &mut ChangedIndices,
        offset: usize,
    ) {
        let (a, b) = (prev.as_slice(), curr.as_slice());
        let (mut i, mut j) = (0, 0);
        while i < a.len() || j < b.len() {
            if j == b.len() || (i < a.len() && a[i] < b[j]) {
                removed.push(offset + Self::index(a[i], perspective, ksq));
                i += 1;
            } else if i == a.len() || b[j] < a[i] {
                added.push(offset + Self::index(b[j], perspective, ksq));
                j += 1;
            } else {
                i += 1;
                j += 1;
            }
        }
    }
}
