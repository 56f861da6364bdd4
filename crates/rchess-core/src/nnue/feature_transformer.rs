//! Feature Transformer
//!
//! 疎な特徴量集合を視点ごとの i16 ベクトル（片側 `half_dims` 次元）に変換する。
//!
//! 特徴量インデックスは駒配置（`HalfKAv2_hm`）と利き（`FullThreats`）を1つの空間に並べたもので、
//! 行の型で処理を分ける。
//!
//! | 範囲 | 重み | PSQT |
//! |------|------|------|
//! | `[0, THREAT_OFFSET)` | i16（LEB128 圧縮） | `psqt_weights` |
//! | `[THREAT_OFFSET, ..)` | i8（生データ） | `threat_psqt_weights` |
//!
//! ## ロード時の変換
//!
//! 1. 利き特徴量を持たないネットワークはバイアスと駒配置重みを2倍する（出力変換のスケールを揃える）
//! 2. 各行の前半・後半それぞれで列を [`packed_index`] の順に並べ替える
//!
//! 書き出し時は逆変換してファイル上の表現に戻す。

use super::accumulator::Accumulator;
use super::accumulator_cache::CacheEntry;
use super::constants::{CACHE_MAX_CHANGED_SQUARES, MAX_L1, PSQT_BUCKETS};
use super::error::{LoadError, LoadResult};
use super::features::{
    self, ActiveIndices, FeatureDelta, FullThreats, HalfKAv2_hm, THREAT_OFFSET, feature_index_oob,
};
use super::io::{read_i8_into, write_i8s};
use super::leb128::{read_leb128_into, read_leb128_vec, write_leb128};
use super::simd::{SimdBackend, packed_index};
use crate::position::Position;
use crate::types::{Bitboard, Color, Square};
use std::io::{self, Read, Write};

/// Feature Transformer
pub struct FeatureTransformer {
    half_dims: usize,
    threats: bool,
    /// バイアス [half_dims]
    biases: Box<[i16]>,
    /// 駒配置の重み [HalfKAv2_hm::DIMENSIONS][half_dims]
    weights: Box<[i16]>,
    /// 利きの重み [FullThreats::DIMENSIONS][half_dims]（利き特徴量なしなら空）
    threat_weights: Box<[i8]>,
    /// 駒配置の PSQT 重み [HalfKAv2_hm::DIMENSIONS][PSQT_BUCKETS]
    psqt_weights: Box<[i32]>,
    /// 利きの PSQT 重み [FullThreats::DIMENSIONS][PSQT_BUCKETS]
    threat_psqt_weights: Box<[i32]>,
}

impl FeatureTransformer {
    /// ゼロ初期化（パラメータはこの後 `read_parameters` 等で埋める）
    pub(crate) fn new_zeroed(half_dims: usize, threats: bool) -> Self {
        assert!(half_dims <= MAX_L1 && half_dims % 2 == 0, "invalid half dimensions {half_dims}");
        let threat_dims = if threats { FullThreats::DIMENSIONS } else { 0 };
        Self {
            half_dims,
            threats,
            biases: vec![0; half_dims].into_boxed_slice(),
            weights: vec![0; HalfKAv2_hm::DIMENSIONS * half_dims].into_boxed_slice(),
            threat_weights: vec![0; threat_dims * half_dims].into_boxed_slice(),
            psqt_weights: vec![0; HalfKAv2_hm::DIMENSIONS * PSQT_BUCKETS].into_boxed_slice(),
            threat_psqt_weights: vec![0; threat_dims * PSQT_BUCKETS].into_boxed_slice(),
        }
    }

    /// 構造ハッシュ
    pub const fn hash_value(half_dims: usize, threats: bool) -> u32 {
        let threat_hash = if threats { FullThreats::HASH } else { 0 };
        HalfKAv2_hm::HASH ^ threat_hash ^ (half_dims as u32 * 2)
    }

    #[inline]
    pub fn hash(&self) -> u32 {
        Self::hash_value(self.half_dims, self.threats)
    }

    #[inline]
    pub fn half_dims(&self) -> usize {
        self.half_dims
    }

    #[inline]
    pub fn has_threats(&self) -> bool {
        self.threats
    }

    /// 特徴量空間の大きさ
    #[inline]
    pub fn input_dimensions(&self) -> usize {
        THREAT_OFFSET + if self.threats { FullThreats::DIMENSIONS } else { 0 }
    }

    #[inline]
    pub fn biases(&self) -> &[i16] {
        &self.biases
    }

    // =========================================================================
    // 読み書き
    // =========================================================================

    /// パラメータを読み込み、ロード時の変換を適用する
    ///
    /// ハッシュは呼び出し側で検証済みであること。
    pub fn read_parameters<R: Read>(&mut self, reader: &mut R) -> LoadResult<()> {
        read_leb128_into(reader, &mut self.biases)?;
        if self.threats {
            read_i8_into(reader, &mut self.threat_weights)?;
        }
        read_leb128_into(reader, &mut self.weights)?;

        // PSQT は利き → 駒配置の順に1ブロックで格納されている
        let threat_len = self.threat_psqt_weights.len();
        let psqt: Vec<i32> = read_leb128_vec(reader, threat_len + self.psqt_weights.len())?;
        self.threat_psqt_weights.copy_from_slice(&psqt[..threat_len]);
        self.psqt_weights.copy_from_slice(&psqt[threat_len..]);

        self.prepare()
    }

    /// ファイル上の表現からロード後の表現に変換する
    pub(crate) fn prepare(&mut self) -> LoadResult<()> {
        if !self.threats {
            scale_by_two(&mut self.biases, 0)?;
            scale_by_two(&mut self.weights, self.biases.len())?;
        }
        self.permute();
        Ok(())
    }

    /// 列の並べ替えのみを適用する（値がロード後のスケールで与えられた場合）
    pub(crate) fn permute(&mut self) {
        let half = self.half_dims / 2;
        permute_rows(&mut self.biases, half);
        permute_rows(&mut self.weights, half);
        permute_rows(&mut self.threat_weights, half);
    }

    /// ファイル形式でパラメータを書き出す（ハッシュは含まない）
    pub fn write_parameters<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let half = self.half_dims / 2;
        let mut biases = self.biases.to_vec();
        let mut weights = self.weights.to_vec();
        permute_rows(&mut biases, half);
        permute_rows(&mut weights, half);
        if !self.threats {
            for v in biases.iter_mut().chain(weights.iter_mut()) {
                *v /= 2;
            }
        }

        write_leb128(writer, &biases)?;
        if self.threats {
            let mut threat_weights = self.threat_weights.to_vec();
            permute_rows(&mut threat_weights, half);
            write_i8s(writer, &threat_weights)?;
        }
        write_leb128(writer, &weights)?;

        let mut psqt = Vec::with_capacity(self.threat_psqt_weights.len() + self.psqt_weights.len());
        psqt.extend_from_slice(&self.threat_psqt_weights);
        psqt.extend_from_slice(&self.psqt_weights);
        write_leb128(writer, &psqt)
    }

    /// ファイル上の表現のパラメータを直接設定する（乱数ネットワーク生成用）
    pub(crate) fn params_mut(&mut self) -> RawParamsMut<'_> {
        RawParamsMut {
            biases: &mut self.biases,
            weights: &mut self.weights,
            threat_weights: &mut self.threat_weights,
            psqt_weights: &mut self.psqt_weights,
            threat_psqt_weights: &mut self.threat_psqt_weights,
        }
    }

    // =========================================================================
    // 行の加減算
    // =========================================================================

    #[inline]
    fn psqt_row(weights: &[i32], index: usize) -> &[i32] {
        &weights[index * PSQT_BUCKETS..(index + 1) * PSQT_BUCKETS]
    }

    /// 特徴量1つ分の行を加算（`add == false` なら減算）
    #[inline]
    fn update_feature(
        &self,
        simd: &dyn SimdBackend,
        acc: &mut Accumulator,
        perspective: Color,
        index: usize,
        add: bool,
    ) {
        let n = self.half_dims;
        if index < THREAT_OFFSET {
            let row = &self.weights[index * n..(index + 1) * n];
            let psqt_row = Self::psqt_row(&self.psqt_weights, index);
            let accumulation = acc.accumulation_mut(perspective);
            if add {
                simd.add_i16(accumulation, row);
            } else {
                simd.sub_i16(accumulation, row);
            }
            apply_psqt(acc.psqt_mut(perspective), psqt_row, add);
        } else {
            let t = index - THREAT_OFFSET;
            if !self.threats || t >= FullThreats::DIMENSIONS {
                feature_index_oob(index, self.input_dimensions());
            }
            let row = &self.threat_weights[t * n..(t + 1) * n];
            let psqt_row = Self::psqt_row(&self.threat_psqt_weights, t);
            let accumulation = acc.threat_accumulation_mut(perspective);
            if add {
                simd.add_i8_to_i16(accumulation, row);
            } else {
                simd.sub_i8_to_i16(accumulation, row);
            }
            apply_psqt(acc.threat_psqt_mut(perspective), psqt_row, add);
        }
    }

    fn apply_delta(
        &self,
        simd: &dyn SimdBackend,
        acc: &mut Accumulator,
        perspective: Color,
        delta: &FeatureDelta,
    ) {
        for index in delta.removed.iter() {
            self.update_feature(simd, acc, perspective, index, false);
        }
        for index in delta.added.iter() {
            self.update_feature(simd, acc, perspective, index, true);
        }
    }

    /// `src` の指定視点の値を `dst` へコピー
    fn copy_perspective(
        simd: &dyn SimdBackend,
        src: &Accumulator,
        dst: &mut Accumulator,
        perspective: Color,
    ) {
        simd.copy_i16(dst.accumulation_mut(perspective), src.accumulation(perspective));
        simd.copy_i16(
            dst.threat_accumulation_mut(perspective),
            src.threat_accumulation(perspective),
        );
        *dst.psqt_mut(perspective) = *src.psqt(perspective);
        *dst.threat_psqt_mut(perspective) = *src.threat_psqt(perspective);
        dst.king_square[perspective.index()] = src.king_square[perspective.index()];
    }

    // =========================================================================
    // 全計算・差分更新
    // =========================================================================

    /// アクティブな特徴量から全計算する
    pub fn compute(
        &self,
        simd: &dyn SimdBackend,
        active: &ActiveIndices,
        acc: &mut Accumulator,
        perspective: Color,
        king_sq: Square,
    ) {
        simd.copy_i16(acc.accumulation_mut(perspective), &self.biases);
        acc.threat_accumulation_mut(perspective).fill(0);
        *acc.psqt_mut(perspective) = [0; PSQT_BUCKETS];
        *acc.threat_psqt_mut(perspective) = [0; PSQT_BUCKETS];
        for index in active.iter() {
            self.update_feature(simd, acc, perspective, index, true);
        }
        let p = perspective.index();
        acc.king_square[p] = Some(king_sq);
        acc.computed[p] = true;
    }

    /// 局面から全計算する
    pub fn compute_position(
        &self,
        simd: &dyn SimdBackend,
        pos: &Position,
        acc: &mut Accumulator,
        perspective: Color,
    ) {
        let mut active = ActiveIndices::new();
        features::append_active_indices(pos, perspective, self.threats, &mut active);
        self.compute(simd, &active, acc, perspective, pos.king_square(perspective));
    }

    /// 前方差分: `curr = prev - removed + added`
    pub fn forward_update(
        &self,
        simd: &dyn SimdBackend,
        prev: &Accumulator,
        delta: &FeatureDelta,
        curr: &mut Accumulator,
        perspective: Color,
    ) {
        Self::copy_perspective(simd, prev, curr, perspective);
        self.apply_delta(simd, curr, perspective, delta);
        curr.computed[perspective.index()] = true;
    }

    /// 後方差分: `curr = later + removed - added`
    ///
    /// `delta` は `curr` から `later` へ進んだときの差分。
    pub fn backward_update(
        &self,
        simd: &dyn SimdBackend,
        later: &Accumulator,
        delta: &FeatureDelta,
        curr: &mut Accumulator,
        perspective: Color,
    ) {
        Self::copy_perspective(simd, later, curr, perspective);
        for index in delta.added.iter() {
            self.update_feature(simd, curr, perspective, index, false);
        }
        for index in delta.removed.iter() {
            self.update_feature(simd, curr, perspective, index, true);
        }
        curr.computed[perspective.index()] = true;
    }

    /// 2手分の前方差分を1パスで適用する
    ///
    /// 1手目で加わり2手目で取り除かれる特徴量（取り返された駒など）は相殺して処理しない。
    pub fn double_update(
        &self,
        simd: &dyn SimdBackend,
        grand: &Accumulator,
        first: &FeatureDelta,
        second: &FeatureDelta,
        curr: &mut Accumulator,
        perspective: Color,
    ) {
        let mut combined = FeatureDelta::new();
        let mut second_removed = second.removed.clone();
        for index in first.added.iter() {
            if !second_removed.swap_remove_value(index) {
                combined.added.push(index);
            }
        }
        for index in first.removed.iter().chain(second_removed.iter()) {
            combined.removed.push(index);
        }
        for index in second.added.iter() {
            combined.added.push(index);
        }

        Self::copy_perspective(simd, grand, curr, perspective);
        self.apply_delta(simd, curr, perspective, &combined);
        curr.computed[perspective.index()] = true;
    }

    /// 差分をその場で適用する（祖先からの連続更新用）
    pub fn apply_in_place(
        &self,
        simd: &dyn SimdBackend,
        acc: &mut Accumulator,
        perspective: Color,
        delta: &FeatureDelta,
    ) {
        self.apply_delta(simd, acc, perspective, delta);
    }

    /// 指定視点の値を `src` から `dst` へコピーする（計算済みフラグは立てない）
    pub fn copy_from(
        &self,
        simd: &dyn SimdBackend,
        src: &Accumulator,
        dst: &mut Accumulator,
        perspective: Color,
    ) {
        Self::copy_perspective(simd, src, dst, perspective);
    }

    // =========================================================================
    // Finny テーブル
    // =========================================================================

    /// キャッシュエントリとの差分で駒配置部分を計算する
    ///
    /// 変化した升が多すぎる場合は何もせず false を返す（呼び出し側で全計算する）。
    /// 利き部分は `threats` の全利きから計算し直す。
    pub fn refresh_from_cache(
        &self,
        simd: &dyn SimdBackend,
        entry: &CacheEntry,
        pos: &Position,
        threats: Option<&super::features::ThreatList>,
        acc: &mut Accumulator,
        perspective: Color,
    ) -> bool {
        let changed = changed_squares(entry, pos);
        if changed.count() > CACHE_MAX_CHANGED_SQUARES {
            return false;
        }

        let ksq = pos.king_square(perspective);
        let mut delta = FeatureDelta::new();
        for sq in changed {
            if let Some(pc) = entry.pieces[sq.index()] {
                delta.removed.push(HalfKAv2_hm::index(perspective, sq, pc, ksq));
            }
            if let Some(pc) = pos.piece_on(sq) {
                delta.added.push(HalfKAv2_hm::index(perspective, sq, pc, ksq));
            }
        }

        simd.copy_i16(acc.accumulation_mut(perspective), &entry.accumulation);
        *acc.psqt_mut(perspective) = entry.psqt;
        self.apply_delta(simd, acc, perspective, &delta);

        acc.threat_accumulation_mut(perspective).fill(0);
        *acc.threat_psqt_mut(perspective) = [0; PSQT_BUCKETS];
        if let Some(list) = threats.filter(|_| self.threats) {
            for threat in list.as_slice() {
                let index = THREAT_OFFSET + FullThreats::index(*threat, perspective, ksq);
                self.update_feature(simd, acc, perspective, index, true);
            }
        }

        let p = perspective.index();
        acc.king_square[p] = Some(ksq);
        acc.computed[p] = true;
        true
    }

    /// 計算済みの駒配置部分をキャッシュエントリに保存する
    pub fn save_to_cache(
        &self,
        simd: &dyn SimdBackend,
        acc: &Accumulator,
        pos: &Position,
        entry: &mut CacheEntry,
        perspective: Color,
    ) {
        simd.copy_i16(&mut entry.accumulation, acc.accumulation(perspective));
        entry.psqt = *acc.psqt(perspective);
        entry.occupied = pos.occupied();
        entry.pieces = *pos.board();
    }

    // =========================================================================
    // 出力変換
    // =========================================================================

    /// 両視点のアキュムレータを u8 ベクトル（`half_dims` バイト）に変換する
    ///
    /// 手番側が前半、相手側が後半。
    pub fn transform(
        &self,
        simd: &dyn SimdBackend,
        acc: &Accumulator,
        side_to_move: Color,
        output: &mut [u8],
    ) {
        let n = self.half_dims;
        let half = n / 2;
        debug_assert_eq!(output.len(), n);

        let mut sum = [0i16; MAX_L1];
        for (k, perspective) in [side_to_move, !side_to_move].into_iter().enumerate() {
            let psq = acc.accumulation(perspective);
            let values: &[i16] = if self.threats {
                let sum = &mut sum[..n];
                simd.copy_i16(sum, psq);
                simd.add_i16(sum, acc.threat_accumulation(perspective));
                sum
            } else {
                psq
            };
            simd.pairwise_clamp_mul(
                &values[..half],
                &values[half..],
                &mut output[k * half..(k + 1) * half],
            );
        }
    }
}

/// ファイル上の表現の各パラメータ（可変参照）
pub(crate) struct RawParamsMut<'a> {
    pub biases: &'a mut [i16],
    pub weights: &'a mut [i16],
    pub threat_weights: &'a mut [i8],
    pub psqt_weights: &'a mut [i32],
    pub threat_psqt_weights: &'a mut [i32],
}

#[inline]
fn apply_psqt(psqt: &mut [i32; PSQT_BUCKETS], row: &[i32], add: bool) {
    for (p, &w) in psqt.iter_mut().zip(row) {
        *p = if add { p.wrapping_add(w) } else { p.wrapping_sub(w) };
    }
}

/// 2倍する（i16 に収まらなければエラー、`base` はエラー報告用のオフセット）
fn scale_by_two(values: &mut [i16], base: usize) -> LoadResult<()> {
    for (i, v) in values.iter_mut().enumerate() {
        *v = v.checked_mul(2).ok_or(LoadError::WeightOverflow { index: base + i })?;
    }
    Ok(())
}

/// 長さ `2 * half` の各行について、前半・後半それぞれを並べ替える（自己逆写像）
fn permute_rows<T: Copy>(values: &mut [T], half: usize) {
    if half == 0 {
        return;
    }
    let mut scratch = Vec::with_capacity(half);
    for chunk in values.chunks_exact_mut(half) {
        scratch.clear();
        scratch.extend_from_slice(chunk);
        for (i, v) in chunk.iter_mut().enumerate() {
            *v = scratch[packed_index(i, half)];
        }
    }
}

/// キャッシュエントリと現局面で駒が異なる升
fn changed_squares(entry: &CacheEntry, pos: &Position) -> Bitboard {
    let mut changed = entry.occupied ^ pos.occupied();
    for sq in entry.occupied & pos.occupied() {
        if entry.pieces[sq.index()] != pos.piece_on(sq) {
            changed.set(sq);
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nnue::accumulator_cache::AccumulatorCache;
    use crate::nnue::features::ThreatList;
    use crate::nnue::simd;
    use crate::position::DirtyPiece;
    use crate::types::Piece;
    use proptest::prelude::*;
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256PlusPlus;

    const HALF_DIMS: usize = 64;

    fn random_transformer(threats: bool, seed: u64) -> FeatureTransformer {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let mut ft = FeatureTransformer::new_zeroed(HALF_DIMS, threats);
        let raw = ft.params_mut();
        raw.biases.iter_mut().for_each(|v| *v = rng.random_range(-64..=64));
        raw.weights.iter_mut().for_each(|v| *v = rng.random_range(-32..=32));
        raw.threat_weights.iter_mut().for_each(|v| *v = rng.random_range(-16..=16));
        raw.psqt_weights.iter_mut().for_each(|v| *v = rng.random_range(-500..=500));
        raw.threat_psqt_weights.iter_mut().for_each(|v| *v = rng.random_range(-100..=100));
        ft.prepare().unwrap();
        ft
    }

    fn computed(ft: &FeatureTransformer, pos: &Position) -> Accumulator {
        let mut acc = Accumulator::new(HALF_DIMS, ft.has_threats());
        for perspective in Color::ALL {
            ft.compute_position(simd::backend(), pos, &mut acc, perspective);
        }
        acc
    }

    fn move_delta(
        ft: &FeatureTransformer,
        before: &Position,
        after: &Position,
        dp: &DirtyPiece,
        perspective: Color,
    ) -> FeatureDelta {
        let ksq = after.king_square(perspective);
        let mut delta = FeatureDelta::new();
        let (removed, added) = (&mut delta.removed, &mut delta.added);
        features::append_changed_indices(dp, perspective, ksq, removed, added);
        if ft.has_threats() {
            let (mut prev, mut curr) = (ThreatList::new(), ThreatList::new());
            FullThreats::append_active_threats(before.board(), before.occupied(), &mut prev);
            FullThreats::append_active_threats(after.board(), after.occupied(), &mut curr);
            features::append_changed_threat_indices(
                &prev,
                &curr,
                perspective,
                ksq,
                &mut delta.removed,
                &mut delta.added,
            );
        }
        delta
    }

    fn assert_same(a: &Accumulator, b: &Accumulator) {
        for perspective in Color::ALL {
            assert!(a.same_values(b, perspective), "accumulators differ for {perspective:?}");
        }
    }

    /// 玉以外の駒を1つ動かす（取りを含む）ランダムな手
    fn random_move(pos: &Position, rng: &mut Xoshiro256PlusPlus) -> Option<DirtyPiece> {
        let movers: Vec<Square> = pos
            .occupied()
            .filter(|&sq| pos.piece_on(sq).is_some_and(|pc| !pc.is_king()))
            .collect();
        if movers.is_empty() {
            return None;
        }
        let from = movers[rng.random_range(0..movers.len())];
        let piece = pos.piece_on(from)?;
        for _ in 0..64 {
            let to = Square::new(rng.random_range(0..64))?;
            match pos.piece_on(to) {
                None => return Some(DirtyPiece::quiet(piece, from, to)),
                Some(victim) if !victim.is_king() && to != from => {
                    return Some(DirtyPiece::capture(piece, from, to, victim));
                }
                _ => {}
            }
        }
        None
    }

    #[test]
    fn test_hash_values() {
        assert_eq!(FeatureTransformer::hash_value(128, false), 0x7F23_4CB8 ^ 256);
        assert_eq!(FeatureTransformer::hash_value(1024, true), 0x7F23_4CB8 ^ 0x3E61_D2A5 ^ 2048);
    }

    #[test]
    fn test_prepare_scales_non_threat_network() {
        let mut ft = FeatureTransformer::new_zeroed(HALF_DIMS, false);
        ft.params_mut().biases[0] = 7;
        ft.prepare().unwrap();
        assert_eq!(ft.biases()[0], 14);
    }

    #[test]
    fn test_prepare_overflow_is_error() {
        let mut ft = FeatureTransformer::new_zeroed(HALF_DIMS, false);
        ft.params_mut().weights[5] = i16::MAX;
        match ft.prepare() {
            Err(LoadError::WeightOverflow { index }) => assert_eq!(index, HALF_DIMS + 5),
            other => panic!("expected WeightOverflow, got {other:?}"),
        }
    }

    #[test]
    fn test_write_read_restores_parameters() {
        for threats in [false, true] {
            let ft = random_transformer(threats, 3);
            let mut bytes = Vec::new();
            ft.write_parameters(&mut bytes).unwrap();
            let mut loaded = FeatureTransformer::new_zeroed(HALF_DIMS, threats);
            loaded.read_parameters(&mut bytes.as_slice()).unwrap();
            assert_eq!(loaded.biases, ft.biases);
            assert_eq!(loaded.weights, ft.weights);
            assert_eq!(loaded.threat_weights, ft.threat_weights);
            assert_eq!(loaded.psqt_weights, ft.psqt_weights);
            assert_eq!(loaded.threat_psqt_weights, ft.threat_psqt_weights);
        }
    }

    #[test]
    fn test_backward_inverts_forward() {
        let ft = random_transformer(true, 5);
        let before = Position::startpos();
        let f3 = Square::from_algebraic("f3").unwrap();
        let dp = DirtyPiece::quiet(Piece::W_KNIGHT, Square::G1, f3);
        let mut after = before.clone();
        after.apply(&dp);

        let base = computed(&ft, &before);
        let mut fwd = Accumulator::new(HALF_DIMS, true);
        let mut back = Accumulator::new(HALF_DIMS, true);
        for perspective in Color::ALL {
            let delta = move_delta(&ft, &before, &after, &dp, perspective);
            ft.forward_update(simd::backend(), &base, &delta, &mut fwd, perspective);
            ft.backward_update(simd::backend(), &fwd, &delta, &mut back, perspective);
        }
        assert_same(&fwd, &computed(&ft, &after));
        assert_same(&back, &base);
    }

    #[test]
    fn test_double_update_with_recapture() {
        let ft = random_transformer(true, 9);
        let e4 = Square::from_algebraic("e4").unwrap();
        let d5 = Square::from_algebraic("d5").unwrap();
        let c6 = Square::from_algebraic("c6").unwrap();
        // 1手目: 白ポーンが d5 を取る、2手目: 黒の駒が d5 のポーンを取り返す
        let p0 = Position::from_fen("4k3/8/2n5/3p4/4P3/8/8/4K3 w - - 0 1").unwrap();
        let m1 = DirtyPiece::capture(Piece::W_PAWN, e4, d5, Piece::B_PAWN);
        let mut p1 = p0.clone();
        p1.apply(&m1);
        let m2 = DirtyPiece::capture(Piece::B_KNIGHT, c6, d5, Piece::W_PAWN);
        let mut p2 = p1.clone();
        p2.apply(&m2);

        let base = computed(&ft, &p0);
        let mut fused = Accumulator::new(HALF_DIMS, true);
        let mut step1 = Accumulator::new(HALF_DIMS, true);
        let mut step2 = Accumulator::new(HALF_DIMS, true);
        for perspective in Color::ALL {
            let d1 = move_delta(&ft, &p0, &p1, &m1, perspective);
            let d2 = move_delta(&ft, &p1, &p2, &m2, perspective);
            ft.double_update(simd::backend(), &base, &d1, &d2, &mut fused, perspective);
            ft.forward_update(simd::backend(), &base, &d1, &mut step1, perspective);
            ft.forward_update(simd::backend(), &step1, &d2, &mut step2, perspective);
        }
        assert_same(&fused, &step2);
        assert_same(&fused, &computed(&ft, &p2));
    }

    #[test]
    fn test_cache_refresh_matches_compute() {
        let ft = random_transformer(true, 11);
        let simd = simd::backend();
        let mut cache = AccumulatorCache::new(&ft);
        let start = Position::startpos();
        let perspective = Color::White;
        let ksq = start.king_square(perspective);

        // 空のエントリからは変化升が多すぎて使えない
        let mut acc = Accumulator::new(HALF_DIMS, true);
        let entry = cache.entry(ksq, perspective);
        assert!(!ft.refresh_from_cache(simd, entry, &start, None, &mut acc, perspective));
        ft.compute_position(simd, &start, &mut acc, perspective);
        ft.save_to_cache(simd, &acc, &start, cache.entry_mut(ksq, perspective), perspective);

        // 2升だけ変化した局面
        let mut pos = start.clone();
        let e2 = Square::from_algebraic("e2").unwrap();
        let e4 = Square::from_algebraic("e4").unwrap();
        pos.apply(&DirtyPiece::quiet(Piece::W_PAWN, e2, e4));
        let mut threats = ThreatList::new();
        FullThreats::append_active_threats(pos.board(), pos.occupied(), &mut threats);
        let mut refreshed = Accumulator::new(HALF_DIMS, true);
        assert!(ft.refresh_from_cache(
            simd,
            cache.entry(ksq, perspective),
            &pos,
            Some(&threats),
            &mut refreshed,
            perspective
        ));
        let expected = computed(&ft, &pos);
        assert!(refreshed.same_values(&expected, perspective));

        // 5升以上変化した局面は使わない
        let far = Position::from_fen("4k3/8/8/8/8/8/8/4K3 w - - 0 1").unwrap();
        let mut other = Accumulator::new(HALF_DIMS, true);
        let entry = cache.entry(ksq, perspective);
        assert!(!ft.refresh_from_cache(simd, entry, &far, None, &mut other, perspective));
        assert!(!other.computed[perspective.index()]);
    }

    /// 初期局面をキャッシュに保存し、`fen` の局面をキャッシュから更新する
    fn refresh_from_startpos_cache(ft: &FeatureTransformer, fen: &str) -> (bool, Accumulator) {
        let simd = simd::backend();
        let perspective = Color::White;
        let start = Position::startpos();
        let ksq = start.king_square(perspective);
        let mut cache = AccumulatorCache::new(ft);
        let acc = computed(ft, &start);
        ft.save_to_cache(simd, &acc, &start, cache.entry_mut(ksq, perspective), perspective);

        let pos = Position::from_fen(fen).unwrap();
        assert_eq!(pos.king_square(perspective), ksq);
        let mut threats = ThreatList::new();
        FullThreats::append_active_threats(pos.board(), pos.occupied(), &mut threats);
        let mut refreshed = Accumulator::new(HALF_DIMS, true);
        let ok = ft.refresh_from_cache(
            simd,
            cache.entry(ksq, perspective),
            &pos,
            Some(&threats),
            &mut refreshed,
            perspective,
        );
        (ok, refreshed)
    }

    #[test]
    fn test_cache_refresh_at_changed_square_limit() {
        let ft = random_transformer(true, 19);
        // d2, e2, d4, e4 の4升が変化
        let fen = "rnbqkbnr/pppppppp/8/8/3PP3/8/PPP2PPP/RNBQKBNR b KQkq - 0 1";
        let (ok, refreshed) = refresh_from_startpos_cache(&ft, fen);
        assert!(ok);
        let expected = computed(&ft, &Position::from_fen(fen).unwrap());
        assert!(refreshed.same_values(&expected, Color::White));
    }

    #[test]
    fn test_cache_refresh_beyond_changed_square_limit() {
        let ft = random_transformer(true, 19);
        // 上の4升に加えて a7 が空になる
        let fen = "rnbqkbnr/1ppppppp/8/8/3PP3/8/PPP2PPP/RNBQKBNR b KQkq - 0 1";
        let (ok, refreshed) = refresh_from_startpos_cache(&ft, fen);
        assert!(!ok);
        assert!(!refreshed.computed[Color::White.index()]);
    }

    #[test]
    fn test_transform_output_range() {
        let ft = random_transformer(false, 13);
        let acc = computed(&ft, &Position::startpos());
        let mut out = vec![0u8; HALF_DIMS];
        ft.transform(simd::backend(), &acc, Color::White, &mut out);
        assert!(out.iter().all(|&v| v <= 126));

        let mut swapped = vec![0u8; HALF_DIMS];
        ft.transform(simd::backend(), &acc, Color::Black, &mut swapped);
        assert_eq!(out[..HALF_DIMS / 2], swapped[HALF_DIMS / 2..]);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_threat_index_on_small_network_panics() {
        let ft = random_transformer(false, 1);
        let mut acc = Accumulator::new(HALF_DIMS, false);
        let mut delta = FeatureDelta::new();
        delta.added.push(THREAT_OFFSET);
        ft.apply_in_place(simd::backend(), &mut acc, Color::White, &delta);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_incremental_matches_compute(seed in any::<u64>(), threats in any::<bool>()) {
            let ft = random_transformer(threats, 17);
            let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
            let mut pos = Position::startpos();
            let mut acc = computed(&ft, &pos);
            for _ in 0..12 {
                let Some(dp) = random_move(&pos, &mut rng) else { break };
                let mut next = pos.clone();
                next.apply(&dp);
                let mut next_acc = Accumulator::new(HALF_DIMS, threats);
                for perspective in Color::ALL {
                    let delta = move_delta(&ft, &pos, &next, &dp, perspective);
                    ft.forward_update(simd::backend(), &acc, &delta, &mut next_acc, perspective);
                }
                let expected = computed(&ft, &next);
                for perspective in Color::ALL {
                    prop_assert!(next_acc.same_values(&expected, perspective));
                }
                pos = next;
                acc = next_acc;
            }
        }
    }
}
