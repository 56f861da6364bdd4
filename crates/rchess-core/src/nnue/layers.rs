//! NNUE レイヤー
//!
//! - `AffineTransform`: 全結合層（u8 入力 × i8 重み → i32 出力）
//! - `AffineTransformSparseInput`: 入力の大半が 0 の場合に 0 の 4バイトグループを読み飛ばす全結合層
//! - `ClippedReLU`: `clamp(x >> 6, 0, 127)`
//! - `SqrClippedReLU`: `min(127, x² >> 19)`
//!
//! 重みはロード時に `scrambled_index` の並びへ変換して保持する。
//! 4バイトの入力グループ1つに対する全出力分の重みが連続して並ぶため、
//! 入力グループを1つずつ読みながら出力全体へ加算できる。

use super::constants::{ACT_MAX, SQR_CRELU_SHIFT, padded_input};
use super::io::{read_i8_into, read_i32_into, write_i8s, write_i32s};
use super::simd::SimdBackend;
use std::io::{self, Read, Write};

/// 行優先インデックス `i`（`i = out * padded + in`）の格納位置
#[inline]
pub const fn scrambled_index(i: usize, padded_input_dims: usize, output_dims: usize) -> usize {
    (i / 4) % (padded_input_dims / 4) * output_dims * 4 + i / padded_input_dims * 4 + i % 4
}

/// 全結合層の構造ハッシュ
#[inline]
pub const fn affine_hash(output_dims: usize, prev_hash: u32) -> u32 {
    let mut hash = 0xCC03_DAE4u32.wrapping_add(output_dims as u32);
    hash ^= prev_hash >> 1;
    hash ^= prev_hash << 31;
    hash
}

/// 活性化関数の構造ハッシュ
#[inline]
pub const fn activation_hash(prev_hash: u32) -> u32 {
    0x538D_24C7u32.wrapping_add(prev_hash)
}

// =============================================================================
// AffineTransform
// =============================================================================

/// 全結合層
pub struct AffineTransform {
    input_dims: usize,
    output_dims: usize,
    padded_input_dims: usize,
    biases: Box<[i32]>,
    /// `scrambled_index` の並び
    weights: Box<[i8]>,
}

impl AffineTransform {
    /// ゼロ初期化した層を作成
    pub fn new(input_dims: usize, output_dims: usize) -> Self {
        let padded_input_dims = padded_input(input_dims);
        Self {
            input_dims,
            output_dims,
            padded_input_dims,
            biases: vec![0; output_dims].into_boxed_slice(),
            weights: vec![0; output_dims * padded_input_dims].into_boxed_slice(),
        }
    }

    /// 行優先（`[out][in]`、入力次元は未パディング）の重みから作成
    pub fn from_row_major(
        input_dims: usize,
        output_dims: usize,
        biases: &[i32],
        weights: &[i8],
    ) -> Self {
        assert_eq!(biases.len(), output_dims);
        assert_eq!(weights.len(), output_dims * input_dims);
        let mut layer = Self::new(input_dims, output_dims);
        layer.biases.copy_from_slice(biases);
        for o in 0..output_dims {
            for j in 0..input_dims {
                layer.set_weight(o, j, weights[o * input_dims + j]);
            }
        }
        layer
    }

    #[inline]
    pub fn input_dims(&self) -> usize {
        self.input_dims
    }

    #[inline]
    pub fn output_dims(&self) -> usize {
        self.output_dims
    }

    #[inline]
    pub fn biases(&self) -> &[i32] {
        &self.biases
    }

    /// 構造ハッシュ
    #[inline]
    pub fn hash(&self, prev_hash: u32) -> u32 {
        affine_hash(self.output_dims, prev_hash)
    }

    /// 重み `[out][in]` を取得
    #[inline]
    pub fn weight(&self, out: usize, input: usize) -> i8 {
        self.weights[self.storage_index(out, input)]
    }

    fn set_weight(&mut self, out: usize, input: usize, value: i8) {
        let idx = self.storage_index(out, input);
        self.weights[idx] = value;
    }

    #[inline]
    fn storage_index(&self, out: usize, input: usize) -> usize {
        scrambled_index(
            out * self.padded_input_dims + input,
            self.padded_input_dims,
            self.output_dims,
        )
    }

    /// パラメータを読み込み（i32 バイアス、行優先・パディング込みの i8 重み）
    pub fn read_parameters<R: Read>(&mut self, reader: &mut R) -> io::Result<()> {
        read_i32_into(reader, &mut self.biases)?;
        let mut row_major = vec![0i8; self.weights.len()];
        read_i8_into(reader, &mut row_major)?;
        for (i, &w) in row_major.iter().enumerate() {
            self.weights[scrambled_index(i, self.padded_input_dims, self.output_dims)] = w;
        }
        Ok(())
    }

    /// パラメータを書き出し（`read_parameters` と同じ並び）
    pub fn write_parameters<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_i32s(writer, &self.biases)?;
        let row_major: Vec<i8> = (0..self.weights.len())
            .map(|i| self.weights[scrambled_index(i, self.padded_input_dims, self.output_dims)])
            .collect();
        write_i8s(writer, &row_major)
    }

    /// 順伝播
    ///
    /// `input` は `input_dims` 以上、値は 0..=127。
    pub fn propagate(&self, simd: &dyn SimdBackend, input: &[u8], output: &mut [i32]) {
        self.propagate_chunks(simd, input, output, false);
    }

    fn propagate_chunks(
        &self,
        simd: &dyn SimdBackend,
        input: &[u8],
        output: &mut [i32],
        skip_zero: bool,
    ) {
        debug_assert!(input.len() >= self.input_dims);
        let output = &mut output[..self.output_dims];
        output.copy_from_slice(&self.biases);

        if self.output_dims == 1 {
            // 出力1次元では並べ替え後も行優先と同じ
            output[0] = output[0]
                .wrapping_add(simd.dot_u8_i8(&input[..self.input_dims], &self.weights));
            return;
        }

        let chunk_weights = self.output_dims * 4;
        for (c, weights) in self.weights.chunks_exact(chunk_weights).enumerate() {
            let base = c * 4;
            if base >= self.input_dims {
                break;
            }
            let mut chunk = [0u8; 4];
            let end = (base + 4).min(self.input_dims);
            chunk[..end - base].copy_from_slice(&input[base..end]);
            if skip_zero && chunk == [0; 4] {
                continue;
            }
            simd.affine_chunk(output, chunk, weights);
        }
    }
}

// =============================================================================
// AffineTransformSparseInput
// =============================================================================

/// 疎な入力向けの全結合層
///
/// 計算結果は `AffineTransform` と同一。
pub struct AffineTransformSparseInput {
    inner: AffineTransform,
}

impl AffineTransformSparseInput {
    pub fn new(input_dims: usize, output_dims: usize) -> Self {
        Self { inner: AffineTransform::new(input_dims, output_dims) }
    }

    pub fn from_row_major(
        input_dims: usize,
        output_dims: usize,
        biases: &[i32],
        weights: &[i8],
    ) -> Self {
        Self { inner: AffineTransform::from_row_major(input_dims, output_dims, biases, weights) }
    }

    #[inline]
    pub fn dense(&self) -> &AffineTransform {
        &self.inner
    }

    #[inline]
    pub fn output_dims(&self) -> usize {
        self.inner.output_dims
    }

    #[inline]
    pub fn hash(&self, prev_hash: u32) -> u32 {
        self.inner.hash(prev_hash)
    }

    pub fn read_parameters<R: Read>(&mut self, reader: &mut R) -> io::Result<()> {
        self.inner.read_parameters(reader)
    }

    pub fn write_parameters<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        self.inner.write_parameters(writer)
    }

    /// 順伝播（すべて 0 の 4バイトグループは寄与しないので読み飛ばす）
    pub fn propagate(&self, simd: &dyn SimdBackend, input: &[u8], output: &mut [i32]) {
        self.inner.propagate_chunks(simd, input, output, true);
    }
}

// =============================================================================
// 活性化関数
// =============================================================================

/// ClippedReLU: `clamp(x >> 6, 0, 127)`
pub struct ClippedReLU;

impl ClippedReLU {
    #[inline]
    pub fn hash(prev_hash: u32) -> u32 {
        activation_hash(prev_hash)
    }

    #[inline]
    pub fn propagate(simd: &dyn SimdBackend, input: &[i32], output: &mut [u8]) {
        simd.clipped_relu(input, output);
    }
}

/// SqrClippedReLU: `min(127, x² >> 19)`（中間値は i64）
pub struct SqrClippedReLU;

impl SqrClippedReLU {
    #[inline]
    pub fn hash(prev_hash: u32) -> u32 {
        activation_hash(prev_hash)
    }

    #[inline]
    pub fn propagate(input: &[i32], output: &mut [u8]) {
        for (out, &x) in output.iter_mut().zip(input) {
            let sq = (i64::from(x) * i64::from(x)) >> SQR_CRELU_SHIFT;
            *out = sq.min(i64::from(ACT_MAX)) as u8;
        }
    }
}
