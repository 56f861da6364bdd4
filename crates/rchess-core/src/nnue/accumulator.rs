//! アキュムレータとアキュムレータスタック
//!
//! `Accumulator` は1局面分の Feature Transformer の状態（両視点）を保持する。
//! 駒配置の寄与と利きの寄与は別々のベクトルに持ち、出力変換の直前に合算する。
//! 駒配置側だけを Finny テーブルに保存・再利用するためである。
//!
//! `AccumulatorStack` は探索の手数（ply）ごとに1スロットを事前確保した配列で、
//! `size` カーソルだけで push/pop を表す。pop はカーソルを戻すだけで、
//! カーソルより上のスロットの内容は次の push まで残る。

use super::constants::PSQT_BUCKETS;
use super::features::ThreatList;
use crate::position::DirtyPiece;
use crate::types::{Color, MAX_PLY, Square};

/// アキュムレータ（両視点）
#[derive(Clone)]
pub struct Accumulator {
    half_dims: usize,
    /// 駒配置の寄与 [perspective * half_dims + i]
    accumulation: Box<[i16]>,
    /// 利きの寄与（利き特徴量を使わないネットワークでは空）
    threat_accumulation: Box<[i16]>,
    psqt: [[i32; PSQT_BUCKETS]; 2],
    threat_psqt: [[i32; PSQT_BUCKETS]; 2],
    /// 計算済みフラグ
    pub computed: [bool; 2],
    /// 最後に計算したときの玉の升
    pub king_square: [Option<Square>; 2],
}

impl Accumulator {
    pub fn new(half_dims: usize, threats: bool) -> Self {
        let threat_len = if threats { 2 * half_dims } else { 0 };
        Self {
            half_dims,
            accumulation: vec![0; 2 * half_dims].into_boxed_slice(),
            threat_accumulation: vec![0; threat_len].into_boxed_slice(),
            psqt: [[0; PSQT_BUCKETS]; 2],
            threat_psqt: [[0; PSQT_BUCKETS]; 2],
            computed: [false; 2],
            king_square: [None; 2],
        }
    }

    #[inline]
    pub fn half_dims(&self) -> usize {
        self.half_dims
    }

    #[inline]
    pub fn has_threats(&self) -> bool {
        !self.threat_accumulation.is_empty()
    }

    #[inline]
    pub fn accumulation(&self, perspective: Color) -> &[i16] {
        let start = perspective.index() * self.half_dims;
        &self.accumulation[start..start + self.half_dims]
    }

    #[inline]
    pub fn accumulation_mut(&mut self, perspective: Color) -> &mut [i16] {
        let start = perspective.index() * self.half_dims;
        &mut self.accumulation[start..start + self.half_dims]
    }

    #[inline]
    pub fn threat_accumulation(&self, perspective: Color) -> &[i16] {
        if self.threat_accumulation.is_empty() {
            return &[];
        }
        let start = perspective.index() * self.half_dims;
        &self.threat_accumulation[start..start + self.half_dims]
    }

    #[inline]
    pub fn threat_accumulation_mut(&mut self, perspective: Color) -> &mut [i16] {
        if self.threat_accumulation.is_empty() {
            return &mut [];
        }
        let start = perspective.index() * self.half_dims;
        &mut self.threat_accumulation[start..start + self.half_dims]
    }

    #[inline]
    pub fn psqt(&self, perspective: Color) -> &[i32; PSQT_BUCKETS] {
        &self.psqt[perspective.index()]
    }

    #[inline]
    pub fn psqt_mut(&mut self, perspective: Color) -> &mut [i32; PSQT_BUCKETS] {
        &mut self.psqt[perspective.index()]
    }

    #[inline]
    pub fn threat_psqt(&self, perspective: Color) -> &[i32; PSQT_BUCKETS] {
        &self.threat_psqt[perspective.index()]
    }

    #[inline]
    pub fn threat_psqt_mut(&mut self, perspective: Color) -> &mut [i32; PSQT_BUCKETS] {
        &mut self.threat_psqt[perspective.index()]
    }

    /// PSQT バケットの値（駒配置 + 利き）
    #[inline]
    pub fn psqt_total(&self, perspective: Color, bucket: usize) -> i32 {
        let p = perspective.index();
        self.psqt[p][bucket].wrapping_add(self.threat_psqt[p][bucket])
    }

    /// 指定視点の値が一致するか（計算済みフラグは見ない）
    pub fn same_values(&self, other: &Accumulator, perspective: Color) -> bool {
        self.accumulation(perspective) == other.accumulation(perspective)
            && self.threat_accumulation(perspective) == other.threat_accumulation(perspective)
            && self.psqt(perspective) == other.psqt(perspective)
            && self.threat_psqt(perspective) == other.threat_psqt(perspective)
    }
}

// =============================================================================
// StackEntry
// =============================================================================

/// スタックエントリ
#[derive(Clone)]
pub struct StackEntry {
    pub accumulator: Accumulator,
    /// このノードに至った手（ルートは None）
    pub dirty_piece: Option<DirtyPiece>,
    /// 視点ごとの全計算要求（その視点の玉が動いた）
    pub needs_refresh: [bool; 2],
    /// この局面の利きリスト（利き特徴量を使うネットワークのみ）
    pub threats: ThreatList,
    pub threats_valid: bool,
}

impl StackEntry {
    fn new(half_dims: usize, threats: bool) -> Self {
        Self {
            accumulator: Accumulator::new(half_dims, threats),
            dirty_piece: None,
            needs_refresh: [false; 2],
            threats: ThreatList::new(),
            threats_valid: false,
        }
    }

    fn invalidate(&mut self) {
        self.accumulator.computed = [false; 2];
        self.threats_valid = false;
    }
}

// =============================================================================
// AccumulatorStack
// =============================================================================

/// アキュムレータスタック
///
/// スロット 0 は常にルート局面で、pop でこれより下には戻れない。
pub struct AccumulatorStack {
    entries: Box<[StackEntry]>,
    /// 有効なスロット数（トップは `size - 1`）
    size: usize,
}

impl AccumulatorStack {
    /// スロット数（ルート + 最大手数）
    pub const CAPACITY: usize = MAX_PLY + 1;

    pub fn new(half_dims: usize, threats: bool) -> Self {
        let entries: Vec<StackEntry> =
            (0..Self::CAPACITY).map(|_| StackEntry::new(half_dims, threats)).collect();
        Self { entries: entries.into_boxed_slice(), size: 1 }
    }

    /// ルート局面だけの状態に戻す（ルートも未計算にする）
    pub fn reset(&mut self) {
        self.size = 1;
        self.entries[0].invalidate();
        self.entries[0].dirty_piece = None;
        self.entries[0].needs_refresh = [false; 2];
        // カーソル直上のスロットは後退差分の元として使われうる
        self.entries[1].invalidate();
        self.entries[1].dirty_piece = None;
    }

    /// 子局面へ進む
    ///
    /// 新しいスロットは未計算で、差分更新で親から値を受け取る。
    #[track_caller]
    pub fn push(&mut self, dirty_piece: DirtyPiece) {
        assert!(
            self.size < Self::CAPACITY,
            "accumulator stack overflow (capacity {})",
            Self::CAPACITY
        );
        let entry = &mut self.entries[self.size];
        entry.invalidate();
        entry.needs_refresh = [
            super::features::requires_refresh(&dirty_piece, Color::White),
            super::features::requires_refresh(&dirty_piece, Color::Black),
        ];
        entry.dirty_piece = Some(dirty_piece);
        self.size += 1;
        // 以前の子局面は新しいトップの子ではなくなる
        if let Some(stale) = self.entries.get_mut(self.size) {
            stale.invalidate();
            stale.dirty_piece = None;
        }
    }

    /// 親局面へ戻る
    #[track_caller]
    pub fn pop(&mut self) {
        assert!(self.size > 1, "accumulator stack underflow: cannot pop the root");
        self.size -= 1;
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn top_index(&self) -> usize {
        self.size - 1
    }

    #[inline]
    pub fn top(&self) -> &StackEntry {
        &self.entries[self.size - 1]
    }

    #[inline]
    pub fn top_mut(&mut self) -> &mut StackEntry {
        &mut self.entries[self.size - 1]
    }

    /// 指定スロット（カーソルより上も参照できる）
    #[inline]
    pub fn entry(&self, index: usize) -> &StackEntry {
        &self.entries[index]
    }

    #[inline]
    pub fn entry_mut(&mut self, index: usize) -> &mut StackEntry {
        &mut self.entries[index]
    }

    /// カーソル直上のスロット（直前に pop した子局面）
    ///
    /// push で上書きされるまで、トップ局面の子として有効。
    #[inline]
    pub fn popped_child(&self) -> Option<&StackEntry> {
        self.entries.get(self.size).filter(|e| e.dirty_piece.is_some())
    }

    /// 異なる2スロットを同時に取得（`src` は不変、`dst` は可変）
    #[inline]
    pub fn pair_mut(&mut self, src: usize, dst: usize) -> (&StackEntry, &mut StackEntry) {
        assert_ne!(src, dst, "source and destination slots must differ");
        if src < dst {
            let (left, right) = self.entries.split_at_mut(dst);
            (&left[src], &mut right[0])
        } else {
            let (left, right) = self.entries.split_at_mut(src);
            (&right[0], &mut left[dst])
        }
    }

    /// トップから遡って、`perspective` の値が計算済みの祖先を探す
    ///
    /// 途中で `perspective` の玉が動いていれば差分更新できないので打ち切る。
    /// 戻り値は祖先のスロット番号。
    pub fn find_usable_ancestor(&self, perspective: Color, max_distance: usize) -> Option<usize> {
        let p = perspective.index();
        let mut idx = self.top_index();
        for _ in 0..max_distance {
            if idx == 0 || self.entries[idx].needs_refresh[p] {
                return None;
            }
            idx -= 1;
            if self.entries[idx].accumulator.computed[p] {
                return Some(idx);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Piece;

    fn quiet() -> DirtyPiece {
        DirtyPiece::quiet(Piece::W_KNIGHT, Square::B1, Square::C8)
    }

    #[test]
    fn test_accumulator_layout() {
        let mut acc = Accumulator::new(8, true);
        acc.accumulation_mut(Color::Black)[0] = 5;
        assert_eq!(acc.accumulation(Color::White), &[0; 8]);
        assert_eq!(acc.accumulation(Color::Black)[0], 5);
        assert_eq!(acc.threat_accumulation(Color::Black).len(), 8);
        assert!(Accumulator::new(8, false).threat_accumulation(Color::White).is_empty());
    }

    #[test]
    fn test_stack_push_pop() {
        let mut stack = AccumulatorStack::new(8, false);
        assert_eq!(stack.top_index(), 0);
        stack.push(quiet());
        assert_eq!(stack.top_index(), 1);
        assert!(stack.top().dirty_piece.is_some());
        stack.pop();
        assert_eq!(stack.top_index(), 0);
        // pop しても子スロットの内容は残る
        assert!(stack.popped_child().is_some());
    }

    #[test]
    fn test_push_forgets_grandchild() {
        let mut stack = AccumulatorStack::new(8, false);
        stack.push(quiet());
        stack.push(quiet());
        stack.pop();
        stack.pop();
        // スロット 2 は古いスロット 1 の子なので、新しいスロット 1 の子として使ってはいけない
        stack.push(quiet());
        assert!(stack.popped_child().is_none());
    }

    #[test]
    fn test_push_marks_king_refresh() {
        let mut stack = AccumulatorStack::new(8, false);
        stack.push(DirtyPiece::quiet(Piece::B_KING, Square::E8, Square::D8));
        assert_eq!(stack.top().needs_refresh, [false, true]);
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn test_pop_root_panics() {
        let mut stack = AccumulatorStack::new(8, false);
        stack.pop();
    }

    #[test]
    #[should_panic(expected = "overflow")]
    fn test_push_beyond_capacity_panics() {
        let mut stack = AccumulatorStack::new(8, false);
        for _ in 0..AccumulatorStack::CAPACITY {
            stack.push(quiet());
        }
    }

    #[test]
    fn test_find_usable_ancestor() {
        let mut stack = AccumulatorStack::new(8, false);
        stack.entry_mut(0).accumulator.computed = [true, true];
        stack.push(quiet());
        let e2 = Square::from_algebraic("e2").unwrap();
        stack.push(DirtyPiece::quiet(Piece::W_KING, Square::E1, e2));
        stack.push(quiet());
        // 白は 2 手目で玉が動いているので遡れない
        assert_eq!(stack.find_usable_ancestor(Color::White, 8), None);
        assert_eq!(stack.find_usable_ancestor(Color::Black, 8), Some(0));
        assert_eq!(stack.find_usable_ancestor(Color::Black, 2), None);
    }

    #[test]
    fn test_pair_mut_both_directions() {
        let mut stack = AccumulatorStack::new(4, false);
        stack.entry_mut(2).accumulator.accumulation_mut(Color::White)[0] = 9;
        let (src, dst) = stack.pair_mut(2, 1);
        let value = src.accumulator.accumulation(Color::White)[0];
        dst.accumulator.accumulation_mut(Color::White)[0] = value;
        assert_eq!(stack.entry(1).accumulator.accumulation(Color::White)[0], 9);
    }
}
