//! NNUE 特徴量
//!
//! 2種類の特徴量を1つのインデックス空間に並べる。
//!
//! ```text
//! [0, HalfKAv2_hm::DIMENSIONS)                      駒配置（HalfKAv2_hm）
//! [THREAT_OFFSET, THREAT_OFFSET + FullThreats::DIMENSIONS)  利き（FullThreats、big ネットワークのみ）
//! ```

mod full_threats;
mod half_ka_v2_hm;

pub use full_threats::{FullThreats, MAX_ACTIVE_THREATS, ThreatList};
pub use half_ka_v2_hm::HalfKAv2_hm;

use crate::position::{DirtyPiece, Position};
use crate::types::{Color, Square};

/// Threat 特徴量の先頭インデックス
pub const THREAT_OFFSET: usize = HalfKAv2_hm::DIMENSIONS;

/// 同時にアクティブになる最大数（駒配置 + 利き）
pub const MAX_ACTIVE_FEATURES: usize = HalfKAv2_hm::MAX_ACTIVE + MAX_ACTIVE_THREATS;

/// 1回の差分更新で変化する最大数（2手分の駒配置 + 利きの差分）
pub const MAX_CHANGED_FEATURES: usize = 2 * HalfKAv2_hm::MAX_CHANGED + MAX_ACTIVE_THREATS;

pub type ActiveIndices = IndexList<MAX_ACTIVE_FEATURES>;
pub type ChangedIndices = IndexList<MAX_CHANGED_FEATURES>;

// =============================================================================
// IndexList
// =============================================================================

/// 固定長のインデックスリスト
///
/// 容量を超える push は呼び出し側の契約違反なので panic する。
#[derive(Clone)]
pub struct IndexList<const N: usize> {
    values: [u32; N],
    len: usize,
}

impl<const N: usize> Default for IndexList<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> IndexList<N> {
    #[inline]
    pub const fn new() -> Self {
        Self { values: [0; N], len: 0 }
    }

    #[inline]
    #[track_caller]
    pub fn push(&mut self, index: usize) {
        assert!(self.len < N, "IndexList capacity {N} exceeded");
        self.values[self.len] = index as u32;
        self.len += 1;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }

    #[inline]
    pub fn as_slice(&self) -> &[u32] {
        &self.values[..self.len]
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u32] {
        &mut self.values[..self.len]
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.as_slice().iter().map(|&v| v as usize)
    }

    /// `index` の最初の出現を取り除く（順序は保存しない）
    pub fn swap_remove_value(&mut self, index: usize) -> bool {
        let target = index as u32;
        match self.as_slice().iter().position(|&v| v == target) {
            Some(pos) => {
                self.values[pos] = self.values[self.len - 1];
                self.len -= 1;
                true
            }
            None => false,
        }
    }
}

impl<const N: usize> std::fmt::Debug for IndexList<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

/// 特徴量の差分（取り除く特徴量と加える特徴量）
#[derive(Clone, Default, Debug)]
pub struct FeatureDelta {
    pub removed: ChangedIndices,
    pub added: ChangedIndices,
}

impl FeatureDelta {
    #[inline]
    pub const fn new() -> Self {
        Self { removed: ChangedIndices::new(), added: ChangedIndices::new() }
    }

    #[inline]
    pub fn clear(&mut self) {
        self.removed.clear();
        self.added.clear();
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

// =============================================================================
// 盤面側へのインターフェース
// =============================================================================

/// アクティブな特徴量インデックスを追記
///
/// `threats` が true なら利き特徴量も含める。
pub fn append_active_indices(
    pos: &Position,
    perspective: Color,
    threats: bool,
    active: &mut ActiveIndices,
) {
    let ksq = pos.king_square(perspective);
    HalfKAv2_hm::append_active_indices(perspective, ksq, pos.board(), pos.occupied(), active);
    if threats {
        let mut list = ThreatList::new();
        FullThreats::append_active_threats(pos.board(), pos.occupied(), &mut list);
        for threat in list.iter() {
            active.push(THREAT_OFFSET + FullThreats::index(threat as u32, perspective, ksq));
        }
    }
}

/// 1手分の駒配置特徴量の差分を追記
pub fn append_changed_indices(
    dirty_piece: &DirtyPiece,
    perspective: Color,
    king_sq: Square,
    removed: &mut ChangedIndices,
    added: &mut ChangedIndices,
) {
    HalfKAv2_hm::append_changed_indices(dirty_piece, perspective, king_sq, removed, added);
}

/// 利き特徴量の差分（ソート済みリスト同士の差集合）を追記
pub fn append_changed_threat_indices(
    prev: &ThreatList,
    curr: &ThreatList,
    perspective: Color,
    king_sq: Square,
    removed: &mut ChangedIndices,
    added: &mut ChangedIndices,
) {
    FullThreats::append_changed_indices(
        prev,
        curr,
        perspective,
        king_sq,
        removed,
        added,
        THREAT_OFFSET,
    );
}

/// この手で `perspective` の全計算が必要か（自玉が動いたときのみ true）
#[inline]
pub fn requires_refresh(dirty_piece: &DirtyPiece, perspective: Color) -> bool {
    HalfKAv2_hm::requires_refresh(dirty_piece, perspective)
}

/// 範囲外の特徴量インデックス（契約違反）
#[cold]
#[inline(never)]
pub(crate) fn feature_index_oob(index: usize, max: usize) -> ! {
    panic!("feature index {index} out of range (dimensions: {max})");
}
