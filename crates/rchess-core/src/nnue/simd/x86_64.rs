//! x86_64 AVX2 実装
//!
//! 各カーネルは 256bit 単位で処理し、端数はスカラー実装に委ねる。

use super::{PACK_GROUP, SimdBackend, scalar};
use crate::nnue::constants::{FT_CLAMP_MAX, WEIGHT_SCALE_BITS};
use std::arch::x86_64::*;

/// AVX2 実装
///
/// `detect` でのみ取得でき、取得できた時点で AVX2 が利用可能であることが保証される。
#[derive(Debug)]
pub struct Avx2 {
    _detected: (),
}

static AVX2: Avx2 = Avx2 { _detected: () };

impl Avx2 {
    /// 実行中の CPU が AVX2 をサポートしていれば実装を返す
    pub fn detect() -> Option<&'static Avx2> {
        if is_x86_feature_detected!("avx2") { Some(&AVX2) } else { None }
    }
}

#[target_feature(enable = "avx2")]
unsafe fn add_i16(acc: &mut [i16], row: &[i16]) {
    let n = acc.len().min(row.len());
    let body = n / 16 * 16;
    let mut i = 0;
    while i < body {
        // SAFETY: i + 16 <= n なので両スライスの範囲内
        unsafe {
            let a = _mm256_loadu_si256(acc.as_ptr().add(i).cast());
            let w = _mm256_loadu_si256(row.as_ptr().add(i).cast());
            _mm256_storeu_si256(acc.as_mut_ptr().add(i).cast(), _mm256_add_epi16(a, w));
        }
        i += 16;
    }
    scalar::add_i16(&mut acc[body..n], &row[body..n]);
}

#[target_feature(enable = "avx2")]
unsafe fn sub_i16(acc: &mut [i16], row: &[i16]) {
    let n = acc.len().min(row.len());
    let body = n / 16 * 16;
    let mut i = 0;
    while i < body {
        // SAFETY: i + 16 <= n
        unsafe {
            let a = _mm256_loadu_si256(acc.as_ptr().add(i).cast());
            let w = _mm256_loadu_si256(row.as_ptr().add(i).cast());
            _mm256_storeu_si256(acc.as_mut_ptr().add(i).cast(), _mm256_sub_epi16(a, w));
        }
        i += 16;
    }
    scalar::sub_i16(&mut acc[body..n], &row[body..n]);
}

#[target_feature(enable = "avx2")]
unsafe fn add_i8_to_i16(acc: &mut [i16], row: &[i8]) {
    let n = acc.len().min(row.len());
    let body = n / 16 * 16;
    let mut i = 0;
    while i < body {
        // SAFETY: i + 16 <= n。row からは 16 バイトだけ読む
        unsafe {
            let a = _mm256_loadu_si256(acc.as_ptr().add(i).cast());
            let w = _mm256_cvtepi8_epi16(_mm_loadu_si128(row.as_ptr().add(i).cast()));
            _mm256_storeu_si256(acc.as_mut_ptr().add(i).cast(), _mm256_add_epi16(a, w));
        }
        i += 16;
    }
    scalar::add_i8_to_i16(&mut acc[body..n], &row[body..n]);
}

#[target_feature(enable = "avx2")]
unsafe fn sub_i8_to_i16(acc: &mut [i16], row: &[i8]) {
    let n = acc.len().min(row.len());
    let body = n / 16 * 16;
    let mut i = 0;
    while i < body {
        // SAFETY: i + 16 <= n
        unsafe {
            let a = _mm256_loadu_si256(acc.as_ptr().add(i).cast());
            let w = _mm256_cvtepi8_epi16(_mm_loadu_si128(row.as_ptr().add(i).cast()));
            _mm256_storeu_si256(acc.as_mut_ptr().add(i).cast(), _mm256_sub_epi16(a, w));
        }
        i += 16;
    }
    scalar::sub_i8_to_i16(&mut acc[body..n], &row[body..n]);
}

#[target_feature(enable = "avx2")]
unsafe fn copy_i16(dst: &mut [i16], src: &[i16]) {
    assert_eq!(dst.len(), src.len(), "copy_i16 length mismatch");
    let n = dst.len();
    let body = n / 16 * 16;
    let mut i = 0;
    while i < body {
        // SAFETY: i + 16 <= n
        unsafe {
            let v = _mm256_loadu_si256(src.as_ptr().add(i).cast());
            _mm256_storeu_si256(dst.as_mut_ptr().add(i).cast(), v);
        }
        i += 16;
    }
    dst[body..].copy_from_slice(&src[body..]);
}

/// 8 レーンの i32 を水平加算
#[target_feature(enable = "avx2")]
unsafe fn hsum_i32(v: __m256i) -> i32 {
    let lo = _mm256_castsi256_si128(v);
    let hi = _mm256_extracti128_si256(v, 1);
    let sum = _mm_add_epi32(lo, hi);
    let sum = _mm_add_epi32(sum, _mm_shuffle_epi32(sum, 0b01_00_11_10));
    let sum = _mm_add_epi32(sum, _mm_shuffle_epi32(sum, 0b10_11_00_01));
    _mm_cvtsi128_si32(sum)
}

/// `acc += Σ u8 * i8`（4要素ずつ i32 に集約）
///
/// maddubs の中間 i16 は入力 0..=127 の前提で飽和しない。
#[target_feature(enable = "avx2")]
unsafe fn dpbusd(acc: __m256i, a: __m256i, b: __m256i) -> __m256i {
    let product = _mm256_maddubs_epi16(a, b);
    let product = _mm256_madd_epi16(product, _mm256_set1_epi16(1));
    _mm256_add_epi32(acc, product)
}

#[target_feature(enable = "avx2")]
unsafe fn dot_u8_i8(input: &[u8], weights: &[i8]) -> i32 {
    let n = input.len().min(weights.len());
    let body = n / 32 * 32;
    let mut sum = _mm256_setzero_si256();
    let mut i = 0;
    while i < body {
        // SAFETY: i + 32 <= n
        unsafe {
            let a = _mm256_loadu_si256(input.as_ptr().add(i).cast());
            let b = _mm256_loadu_si256(weights.as_ptr().add(i).cast());
            sum = dpbusd(sum, a, b);
        }
        i += 32;
    }
    // SAFETY: AVX2 は呼び出し元で保証済み
    let head = unsafe { hsum_i32(sum) };
    head.wrapping_add(scalar::dot_u8_i8(&input[body..n], &weights[body..n]))
}

#[target_feature(enable = "avx2")]
unsafe fn affine_chunk(output: &mut [i32], input: [u8; 4], weights: &[i8]) {
    let n = output.len().min(weights.len() / 4);
    let body = n / 8 * 8;
    let broadcast = _mm256_set1_epi32(i32::from_le_bytes(input));
    let mut j = 0;
    while j < body {
        // SAFETY: j + 8 <= n なので output[j..j+8] と weights[j*4..j*4+32] は範囲内
        unsafe {
            let out_ptr = output.as_mut_ptr().add(j).cast::<__m256i>();
            let w = _mm256_loadu_si256(weights.as_ptr().add(j * 4).cast());
            let acc = _mm256_loadu_si256(out_ptr);
            _mm256_storeu_si256(out_ptr, dpbusd(acc, broadcast, w));
        }
        j += 8;
    }
    scalar::affine_chunk(&mut output[body..n], input, &weights[body * 4..n * 4]);
}

#[target_feature(enable = "avx2")]
unsafe fn clipped_relu(input: &[i32], output: &mut [u8]) {
    let n = input.len().min(output.len());
    let body = n / 32 * 32;
    let zero = _mm256_setzero_si256();
    let offsets = _mm256_set_epi32(7, 3, 6, 2, 5, 1, 4, 0);
    let mut i = 0;
    while i < body {
        // SAFETY: i + 32 <= n
        unsafe {
            let p = input.as_ptr().add(i).cast::<__m256i>();
            let words0 = _mm256_srai_epi16(
                _mm256_packs_epi32(_mm256_loadu_si256(p), _mm256_loadu_si256(p.add(1))),
                WEIGHT_SCALE_BITS as i32,
            );
            let words1 = _mm256_srai_epi16(
                _mm256_packs_epi32(_mm256_loadu_si256(p.add(2)), _mm256_loadu_si256(p.add(3))),
                WEIGHT_SCALE_BITS as i32,
            );
            let bytes = _mm256_max_epi8(_mm256_packs_epi16(words0, words1), zero);
            let bytes = _mm256_permutevar8x32_epi32(bytes, offsets);
            _mm256_storeu_si256(output.as_mut_ptr().add(i).cast(), bytes);
        }
        i += 32;
    }
    scalar::clipped_relu(&input[body..n], &mut output[body..n]);
}

/// 並べ替え済みの 32 要素グループ単位で処理し、packus で自然順に戻す
#[target_feature(enable = "avx2")]
unsafe fn pairwise_clamp_mul(first: &[i16], second: &[i16], output: &mut [u8]) {
    let n = output.len();
    assert!(first.len() >= n && second.len() >= n, "pairwise_clamp_mul input too short");
    let body = n / PACK_GROUP * PACK_GROUP;
    let zero = _mm256_setzero_si256();
    let max = _mm256_set1_epi16(FT_CLAMP_MAX);
    let mut i = 0;
    while i < body {
        // SAFETY: i + 32 <= n
        unsafe {
            let a0 = _mm256_loadu_si256(first.as_ptr().add(i).cast());
            let a1 = _mm256_loadu_si256(first.as_ptr().add(i + 16).cast());
            let b0 = _mm256_loadu_si256(second.as_ptr().add(i).cast());
            let b1 = _mm256_loadu_si256(second.as_ptr().add(i + 16).cast());

            // (a << 7) * b >> 16 == a * b >> 9（a, b は 0..=254）
            let a0 = _mm256_slli_epi16(_mm256_max_epi16(_mm256_min_epi16(a0, max), zero), 7);
            let a1 = _mm256_slli_epi16(_mm256_max_epi16(_mm256_min_epi16(a1, max), zero), 7);
            let b0 = _mm256_max_epi16(_mm256_min_epi16(b0, max), zero);
            let b1 = _mm256_max_epi16(_mm256_min_epi16(b1, max), zero);

            let p0 = _mm256_mulhi_epi16(a0, b0);
            let p1 = _mm256_mulhi_epi16(a1, b1);
            _mm256_storeu_si256(output.as_mut_ptr().add(i).cast(), _mm256_packus_epi16(p0, p1));
        }
        i += PACK_GROUP;
    }
    for j in body..n {
        output[j] = scalar::clamp_mul(first[j], second[j]);
    }
}

impl SimdBackend for Avx2 {
    fn name(&self) -> &'static str {
        "avx2"
    }

    // SAFETY（以下すべて）: Avx2 は detect() 経由でのみ得られるため AVX2 は利用可能

    fn add_i16(&self, acc: &mut [i16], row: &[i16]) {
        unsafe { add_i16(acc, row) }
    }

    fn sub_i16(&self, acc: &mut [i16], row: &[i16]) {
        unsafe { sub_i16(acc, row) }
    }

    fn add_i8_to_i16(&self, acc: &mut [i16], row: &[i8]) {
        unsafe { add_i8_to_i16(acc, row) }
    }

    fn sub_i8_to_i16(&self, acc: &mut [i16], row: &[i8]) {
        unsafe { sub_i8_to_i16(acc, row) }
    }

    fn copy_i16(&self, dst: &mut [i16], src: &[i16]) {
        unsafe { copy_i16(dst, src) }
    }

    fn dot_u8_i8(&self, input: &[u8], weights: &[i8]) -> i32 {
        unsafe { dot_u8_i8(input, weights) }
    }

    fn affine_chunk(&self, output: &mut [i32], input: [u8; 4], weights: &[i8]) {
        unsafe { affine_chunk(output, input, weights) }
    }

    fn clipped_relu(&self, input: &[i32], output: &mut [u8]) {
        unsafe { clipped_relu(input, output) }
    }

    fn pairwise_clamp_mul(&self, first: &[i16], second: &[i16], output: &mut [u8]) {
        unsafe { pairwise_clamp_mul(first, second, output) }
    }
}
