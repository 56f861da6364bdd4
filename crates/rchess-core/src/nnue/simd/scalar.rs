//! スカラー基準実装
//!
//! すべての SIMD 実装はこの実装とビット単位で一致しなければならない。

use super::{SimdBackend, packed_index};
use crate::nnue::constants::{ACT_MAX, FT_CLAMP_MAX, FT_PRODUCT_SHIFT, WEIGHT_SCALE_BITS};

/// スカラー実装
#[derive(Debug, Clone, Copy, Default)]
pub struct Scalar;

#[inline]
pub fn add_i16(acc: &mut [i16], row: &[i16]) {
    for (a, &w) in acc.iter_mut().zip(row) {
        *a = a.wrapping_add(w);
    }
}

#[inline]
pub fn sub_i16(acc: &mut [i16], row: &[i16]) {
    for (a, &w) in acc.iter_mut().zip(row) {
        *a = a.wrapping_sub(w);
    }
}

#[inline]
pub fn add_i8_to_i16(acc: &mut [i16], row: &[i8]) {
    for (a, &w) in acc.iter_mut().zip(row) {
        *a = a.wrapping_add(i16::from(w));
    }
}

#[inline]
pub fn sub_i8_to_i16(acc: &mut [i16], row: &[i8]) {
    for (a, &w) in acc.iter_mut().zip(row) {
        *a = a.wrapping_sub(i16::from(w));
    }
}

#[inline]
pub fn dot_u8_i8(input: &[u8], weights: &[i8]) -> i32 {
    input
        .iter()
        .zip(weights)
        .fold(0i32, |sum, (&x, &w)| sum.wrapping_add(i32::from(x) * i32::from(w)))
}

#[inline]
pub fn affine_chunk(output: &mut [i32], input: [u8; 4], weights: &[i8]) {
    for (out, w) in output.iter_mut().zip(weights.chunks_exact(4)) {
        let mut sum = 0i32;
        for k in 0..4 {
            sum += i32::from(input[k]) * i32::from(w[k]);
        }
        *out = out.wrapping_add(sum);
    }
}

#[inline]
pub fn clipped_relu(input: &[i32], output: &mut [u8]) {
    for (out, &x) in output.iter_mut().zip(input) {
        *out = (x >> WEIGHT_SCALE_BITS).clamp(0, ACT_MAX) as u8;
    }
}

/// 出力 1 要素分のクランプ積
#[inline]
pub fn clamp_mul(a: i16, b: i16) -> u8 {
    let a = i32::from(a.clamp(0, FT_CLAMP_MAX));
    let b = i32::from(b.clamp(0, FT_CLAMP_MAX));
    ((a * b) >> FT_PRODUCT_SHIFT) as u8
}

#[inline]
pub fn pairwise_clamp_mul(first: &[i16], second: &[i16], output: &mut [u8]) {
    let len = output.len();
    for (i, out) in output.iter_mut().enumerate() {
        let p = packed_index(i, len);
        *out = clamp_mul(first[p], second[p]);
    }
}

impl SimdBackend for Scalar {
    fn name(&self) -> &'static str {
        "scalar"
    }

    fn add_i16(&self, acc: &mut [i16], row: &[i16]) {
        add_i16(acc, row);
    }

    fn sub_i16(&self, acc: &mut [i16], row: &[i16]) {
        sub_i16(acc, row);
    }

    fn add_i8_to_i16(&self, acc: &mut [i16], row: &[i8]) {
        add_i8_to_i16(acc, row);
    }

    fn sub_i8_to_i16(&self, acc: &mut [i16], row: &[i8]) {
        sub_i8_to_i16(acc, row);
    }

    fn copy_i16(&self, dst: &mut [i16], src: &[i16]) {
        dst.copy_from_slice(src);
    }

    fn dot_u8_i8(&self, input: &[u8], weights: &[i8]) -> i32 {
        dot_u8_i8(input, weights)
    }

    fn affine_chunk(&self, output: &mut [i32], input: [u8; 4], weights: &[i8]) {
        affine_chunk(output, input, weights);
    }

    fn clipped_relu(&self, input: &[i32], output: &mut [u8]) {
        clipped_relu(input, output);
    }

    fn pairwise_clamp_mul(&self, first: &[i16], second: &[i16], output: &mut [u8]) {
        pairwise_clamp_mul(first, second, output);
    }
}
