//! Finny テーブル（玉の升 × 視点ごとのアキュムレータキャッシュ）
//!
//! 玉が動いた局面ではアキュムレータを差分更新できない。
//! 同じ玉の升で最後に計算した駒配置部分を保存しておき、現局面との差分が少なければそこから計算する。
//! 利きの部分は保存しない。

use super::constants::PSQT_BUCKETS;
use super::feature_transformer::FeatureTransformer;
use crate::types::{Bitboard, Color, Piece, Square};

/// キャッシュエントリ
///
/// `accumulation` と `psqt` は常に `occupied` / `pieces` の駒配置に対する計算結果と一致する。
#[derive(Clone)]
pub struct CacheEntry {
    pub accumulation: Box<[i16]>,
    pub psqt: [i32; PSQT_BUCKETS],
    pub occupied: Bitboard,
    pub pieces: [Option<Piece>; Square::NUM],
}

impl CacheEntry {
    /// 駒のない盤面（バイアスのみ）
    fn empty(biases: &[i16]) -> Self {
        Self {
            accumulation: biases.into(),
            psqt: [0; PSQT_BUCKETS],
            occupied: Bitboard::EMPTY,
            pieces: [None; Square::NUM],
        }
    }

    fn reset(&mut self, biases: &[i16]) {
        self.accumulation.copy_from_slice(biases);
        self.psqt = [0; PSQT_BUCKETS];
        self.occupied = Bitboard::EMPTY;
        self.pieces = [None; Square::NUM];
    }
}

/// アキュムレータキャッシュ（スレッドごとに1つ、ネットワークごとに1つ）
pub struct AccumulatorCache {
    entries: Box<[CacheEntry]>,
}

impl AccumulatorCache {
    pub fn new(ft: &FeatureTransformer) -> Self {
        let entries: Vec<CacheEntry> = (0..Square::NUM * Color::NUM)
            .map(|_| CacheEntry::empty(ft.biases()))
            .collect();
        Self { entries: entries.into_boxed_slice() }
    }

    /// 全エントリを空の盤面に戻す（新しい対局の開始時など）
    pub fn clear(&mut self, ft: &FeatureTransformer) {
        for entry in self.entries.iter_mut() {
            entry.reset(ft.biases());
        }
    }

    #[inline]
    fn slot(ksq: Square, perspective: Color) -> usize {
        ksq.index() * Color::NUM + perspective.index()
    }

    #[inline]
    pub fn entry(&self, ksq: Square, perspective: Color) -> &CacheEntry {
        &self.entries[Self::slot(ksq, perspective)]
    }

    #[inline]
    pub fn entry_mut(&mut self, ksq: Square, perspective: Color) -> &mut CacheEntry {
        &mut self.entries[Self::slot(ksq, perspective)]
    }
}
