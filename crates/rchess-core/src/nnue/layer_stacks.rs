//! LayerStack（バケットごとの後段ネットワーク）
//!
//! ```text
//! FT 出力 (L1, u8)
//!   fc_0: L1 → L2 + 1（疎入力）          ← 最後の1出力はスキップ接続
//!   SqrClippedReLU(L2) ‖ ClippedReLU(L2) → 2 * L2
//!   fc_1: 2 * L2 → L3, ClippedReLU
//!   fc_2: L3 → 1
//! 出力 = fc_2 + fc_0[L2] * 9600 / 8128
//! ```
//!
//! バケットは盤上の駒数で選ぶ（[`bucket_index`]）。

use super::constants::{LAYER_STACKS, SKIP_DENOMINATOR, SKIP_NUMERATOR};
use super::layers::{
    AffineTransform, AffineTransformSparseInput, ClippedReLU, SqrClippedReLU, activation_hash,
    affine_hash,
};
use super::simd::SimdBackend;
use std::io::{self, Read, Write};

/// L2 の最大値（big ネットワーク）
pub const MAX_L2: usize = 31;

/// L3 の最大値
pub const MAX_L3: usize = 32;

/// 駒数からバケット番号を求める: `clamp((count - 1) / 4, 0, 7)`
#[inline]
pub fn bucket_index(piece_count: usize) -> usize {
    (piece_count.saturating_sub(1) / 4).min(LAYER_STACKS - 1)
}

/// LayerStack 単一バケット
pub struct LayerStack {
    l2: usize,
    fc_0: AffineTransformSparseInput,
    fc_1: AffineTransform,
    fc_2: AffineTransform,
}

impl LayerStack {
    /// ゼロ初期化
    pub fn new(l1: usize, l2: usize, l3: usize) -> Self {
        assert!(l2 <= MAX_L2 && l3 <= MAX_L3, "unsupported layer sizes L2={l2} L3={l3}");
        Self {
            l2,
            fc_0: AffineTransformSparseInput::new(l1, l2 + 1),
            fc_1: AffineTransform::new(l2 * 2, l3),
            fc_2: AffineTransform::new(l3, 1),
        }
    }

    /// 層を指定して作成（乱数ネットワーク生成用）
    pub(crate) fn from_layers(
        fc_0: AffineTransformSparseInput,
        fc_1: AffineTransform,
        fc_2: AffineTransform,
    ) -> Self {
        let l2 = fc_0.output_dims() - 1;
        assert_eq!(fc_1.input_dims(), l2 * 2);
        assert_eq!(fc_2.input_dims(), fc_1.output_dims());
        assert_eq!(fc_2.output_dims(), 1);
        Self { l2, fc_0, fc_1, fc_2 }
    }

    /// 構造ハッシュ
    ///
    /// SqrClippedReLU はチェーンに含めない。
    pub const fn hash_value(l1: usize, l2: usize, l3: usize) -> u32 {
        let mut hash = 0xEC42_E90D ^ (l1 as u32 * 2);
        hash = affine_hash(l2 + 1, hash);
        hash = activation_hash(hash);
        hash = affine_hash(l3, hash);
        hash = activation_hash(hash);
        affine_hash(1, hash)
    }

    #[inline]
    pub fn hash(&self) -> u32 {
        Self::hash_value(self.fc_0.dense().input_dims(), self.l2, self.fc_1.output_dims())
    }

    pub fn read_parameters<R: Read>(&mut self, reader: &mut R) -> io::Result<()> {
        self.fc_0.read_parameters(reader)?;
        self.fc_1.read_parameters(reader)?;
        self.fc_2.read_parameters(reader)
    }

    pub fn write_parameters<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        self.fc_0.write_parameters(writer)?;
        self.fc_1.write_parameters(writer)?;
        self.fc_2.write_parameters(writer)
    }

    /// 順伝播（出力スケール適用前の値）
    pub fn propagate(&self, simd: &dyn SimdBackend, input: &[u8]) -> i32 {
        let l2 = self.l2;
        let l3 = self.fc_1.output_dims();

        let mut fc_0_out = [0i32; MAX_L2 + 1];
        self.fc_0.propagate(simd, input, &mut fc_0_out);

        // 前半は二乗、後半はそのまま
        let mut ac_0_out = [0u8; MAX_L2 * 2];
        SqrClippedReLU::propagate(&fc_0_out[..l2], &mut ac_0_out[..l2]);
        ClippedReLU::propagate(simd, &fc_0_out[..l2], &mut ac_0_out[l2..l2 * 2]);

        let mut fc_1_out = [0i32; MAX_L3];
        self.fc_1.propagate(simd, &ac_0_out[..l2 * 2], &mut fc_1_out);

        let mut ac_1_out = [0u8; MAX_L3];
        ClippedReLU::propagate(simd, &fc_1_out[..l3], &mut ac_1_out[..l3]);

        let mut fc_2_out = [0i32; 1];
        self.fc_2.propagate(simd, &ac_1_out[..l3], &mut fc_2_out);

        let forward =
            i64::from(fc_0_out[l2]) * i64::from(SKIP_NUMERATOR) / i64::from(SKIP_DENOMINATOR);
        fc_2_out[0].wrapping_add(forward as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nnue::simd::{self, available_backends};

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(32), 7);
        assert_eq!(bucket_index(29), 7);
        assert_eq!(bucket_index(28), 6);
        assert_eq!(bucket_index(5), 1);
        assert_eq!(bucket_index(4), 0);
        assert_eq!(bucket_index(2), 0);
        assert_eq!(bucket_index(0), 0);
    }

    #[test]
    fn test_hash_depends_on_shape() {
        let small = LayerStack::hash_value(128, 15, 32);
        let big = LayerStack::hash_value(1024, 31, 32);
        assert_ne!(small, big);
        assert_eq!(LayerStack::new(128, 15, 32).hash(), small);
    }

    /// 単一経路だけを通す手計算可能な層で順伝播を確認する
    #[test]
    fn test_propagate_known_values() {
        let (l1, l2, l3) = (64, 2, 2);

        // fc_0: 出力0 = input[0] * 64、出力1 = 0、スキップ = 8128
        let mut w0 = vec![0i8; (l2 + 1) * l1];
        w0[0] = 64;
        let fc_0 = AffineTransformSparseInput::from_row_major(l1, l2 + 1, &[0, 0, 8128], &w0);
        // fc_1: 出力0 = 二乗側の入力0 + 線形側の入力0
        let mut w1 = vec![0i8; l3 * l2 * 2];
        w1[0] = 1;
        w1[l2] = 1;
        let fc_1 = AffineTransform::from_row_major(l2 * 2, l3, &[0, 0], &w1);
        let fc_2 = AffineTransform::from_row_major(l3, 1, &[10], &[2, 0]);
        let stack = LayerStack::from_layers(fc_0, fc_1, fc_2);

        let mut input = vec![0u8; l1];
        input[0] = 100;
        // fc_0_out[0] = 6400 → sqr = 6400² >> 19 = 78、crelu = 100
        // fc_1_out[0] = 178 → crelu = 178 >> 6 = 2
        // fc_2 = 10 + 2 * 2 = 14、skip = 8128 * 9600 / 8128 = 9600
        for backend in available_backends() {
            assert_eq!(stack.propagate(backend, &input), 14 + 9600, "{}", backend.name());
        }
    }

    #[test]
    fn test_parameters_roundtrip_preserves_output() {
        let mut w0 = vec![0i8; 16 * 64];
        for (i, w) in w0.iter_mut().enumerate() {
            *w = (i % 7) as i8 - 3;
        }
        let fc_0 = AffineTransformSparseInput::from_row_major(64, 16, &[100; 16], &w0);
        let fc_1 = AffineTransform::from_row_major(30, 32, &[5; 32], &vec![1i8; 32 * 30]);
        let fc_2 = AffineTransform::from_row_major(32, 1, &[-7], &[3i8; 32]);
        let stack = LayerStack::from_layers(fc_0, fc_1, fc_2);

        let mut bytes = Vec::new();
        stack.write_parameters(&mut bytes).unwrap();
        let mut loaded = LayerStack::new(64, 15, 32);
        loaded.read_parameters(&mut bytes.as_slice()).unwrap();

        let input: Vec<u8> = (0..64).map(|i| (i * 3 % 128) as u8).collect();
        let backend = simd::backend();
        assert_eq!(loaded.propagate(backend, &input), stack.propagate(backend, &input));
    }
}
