//! SIMD カーネル
//!
//! `SimdBackend` trait が NNUE の数値カーネルを定義する。
//! `Scalar` は常に利用可能な基準実装で、他の実装はこれとビット単位で一致しなければならない。
//! 起動時に一度だけ CPU 機能を検出して実装を選択する。
//!
//! | カーネル | 用途 |
//! |----------|------|
//! | `add_i16` / `sub_i16` / `copy_i16` | アキュムレータの差分更新 |
//! | `add_i8_to_i16` / `sub_i8_to_i16` | Threat 特徴量（i8 重み）の差分更新 |
//! | `affine_chunk` / `dot_u8_i8` | 全結合層 |
//! | `clipped_relu` | ClippedReLU |
//! | `pairwise_clamp_mul` | Feature Transformer の出力変換 |

pub mod scalar;
#[cfg(target_arch = "x86_64")]
pub mod x86_64;

use std::sync::OnceLock;

pub use scalar::Scalar;

/// 強制的にスカラー実装を使う環境変数
pub const FORCE_SCALAR_ENV: &str = "RCHESS_NNUE_FORCE_SCALAR";

/// `pairwise_clamp_mul` の入力レイアウトで並べ替えるグループ幅（要素数）
pub const PACK_GROUP: usize = 32;

/// 1グループ内のブロック幅（要素数）
const PACK_BLOCK: usize = 8;

/// NNUE 数値カーネル
///
/// i16 の加減算は 2 の補数で折り返す（wrapping）。
/// `dot_u8_i8` / `affine_chunk` の入力は 0..=127 であること（活性化関数の出力範囲）。
pub trait SimdBackend: Send + Sync {
    /// 実装名（ログ・診断用）
    fn name(&self) -> &'static str;

    /// `acc[i] += row[i]`
    fn add_i16(&self, acc: &mut [i16], row: &[i16]);

    /// `acc[i] -= row[i]`
    fn sub_i16(&self, acc: &mut [i16], row: &[i16]);

    /// `acc[i] += row[i] as i16`
    fn add_i8_to_i16(&self, acc: &mut [i16], row: &[i8]);

    /// `acc[i] -= row[i] as i16`
    fn sub_i8_to_i16(&self, acc: &mut [i16], row: &[i8]);

    /// `dst[i] = src[i]`
    fn copy_i16(&self, dst: &mut [i16], src: &[i16]);

    /// `Σ input[i] * weights[i]`
    fn dot_u8_i8(&self, input: &[u8], weights: &[i8]) -> i32;

    /// 4バイトの入力チャンクを全出力に加算する
    ///
    /// `output[j] += Σ_k input[k] * weights[j * 4 + k]`（`weights.len() == output.len() * 4`）
    fn affine_chunk(&self, output: &mut [i32], input: [u8; 4], weights: &[i8]);

    /// `output[i] = clamp(input[i] >> 6, 0, 127)`
    fn clipped_relu(&self, input: &[i32], output: &mut [u8]);

    /// `output[i] = (clamp(first[p(i)], 0, 254) * clamp(second[p(i)], 0, 254)) >> 9`
    ///
    /// `p` は [`packed_index`]。入力は並べ替え済み、出力は自然順。
    fn pairwise_clamp_mul(&self, first: &[i16], second: &[i16], output: &mut [u8]);
}

/// 長さ `len` の半分ベクトルにおける並べ替え後の位置
///
/// 32要素グループ内の 8要素ブロック 1 と 2 を入れ替える（packus の出力順）。
/// 末尾の不完全なグループは並べ替えない。自己逆写像。
#[inline]
pub const fn packed_index(i: usize, len: usize) -> usize {
    let full = len / PACK_GROUP * PACK_GROUP;
    if i >= full {
        return i;
    }
    let group = i / PACK_GROUP * PACK_GROUP;
    let block = (i % PACK_GROUP) / PACK_BLOCK;
    let offset = i % PACK_BLOCK;
    let block = match block {
        1 => 2,
        2 => 1,
        b => b,
    };
    group + block * PACK_BLOCK + offset
}

/// 選択済みのカーネル実装を返す
pub fn backend() -> &'static dyn SimdBackend {
    static BACKEND: OnceLock<&'static dyn SimdBackend> = OnceLock::new();
    *BACKEND.get_or_init(|| {
        let selected = select_backend();
        log::debug!("NNUE SIMD backend: {}", selected.name());
        selected
    })
}

fn select_backend() -> &'static dyn SimdBackend {
    static SCALAR: Scalar = Scalar;

    if cfg!(feature = "force-scalar") {
        return &SCALAR;
    }
    if std::env::var(FORCE_SCALAR_ENV).is_ok_and(|v| v == "1") {
        return &SCALAR;
    }
    accelerated().unwrap_or(&SCALAR)
}

#[cfg(target_arch = "x86_64")]
fn accelerated() -> Option<&'static dyn SimdBackend> {
    x86_64::Avx2::detect().map(|b| b as &'static dyn SimdBackend)
}

#[cfg(not(target_arch = "x86_64"))]
fn accelerated() -> Option<&'static dyn SimdBackend> {
    None
}

/// 利用可能な全実装（差分テスト用）
pub fn available_backends() -> Vec<&'static dyn SimdBackend> {
    static SCALAR: Scalar = Scalar;
    let mut backends: Vec<&'static dyn SimdBackend> = vec![&SCALAR];
    backends.extend(accelerated());
    backends
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256PlusPlus;

    /// 最も広いベクトル幅（AVX2 の u8 レーン数）の2倍
    const MAX_LEN: usize = 64;

    fn random_i16(rng: &mut Xoshiro256PlusPlus, len: usize) -> Vec<i16> {
        (0..len).map(|_| rng.random::<i16>()).collect()
    }

    fn random_i8(rng: &mut Xoshiro256PlusPlus, len: usize) -> Vec<i8> {
        (0..len).map(|_| rng.random::<i8>()).collect()
    }

    fn random_act(rng: &mut Xoshiro256PlusPlus, len: usize) -> Vec<u8> {
        (0..len).map(|_| rng.random_range(0..=127u8)).collect()
    }

    #[test]
    fn test_packed_index_is_involution() {
        for len in [0, 16, 32, 48, 64, 512] {
            for i in 0..len {
                let p = packed_index(i, len);
                assert!(p < len);
                assert_eq!(packed_index(p, len), i);
            }
        }
        assert_eq!(packed_index(8, 32), 16);
        assert_eq!(packed_index(16, 32), 8);
        assert_eq!(packed_index(40, 48), 40);
    }

    #[test]
    fn test_backend_is_selected() {
        let name = backend().name();
        assert!(available_backends().iter().any(|b| b.name() == name));
    }

    #[test]
    fn test_accumulate_kernels_match_scalar() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        for backend in available_backends() {
            for len in 0..=MAX_LEN {
                let base = random_i16(&mut rng, len);
                let row16 = random_i16(&mut rng, len);
                let row8 = random_i8(&mut rng, len);

                let mut expected = base.clone();
                let mut actual = base.clone();
                scalar::add_i16(&mut expected, &row16);
                backend.add_i16(&mut actual, &row16);
                assert_eq!(expected, actual, "{} add_i16 len={len}", backend.name());

                scalar::sub_i16(&mut expected, &row16);
                backend.sub_i16(&mut actual, &row16);
                assert_eq!(expected, actual, "{} sub_i16 len={len}", backend.name());
                assert_eq!(actual, base);

                scalar::add_i8_to_i16(&mut expected, &row8);
                backend.add_i8_to_i16(&mut actual, &row8);
                assert_eq!(expected, actual, "{} add_i8 len={len}", backend.name());

                scalar::sub_i8_to_i16(&mut expected, &row8);
                backend.sub_i8_to_i16(&mut actual, &row8);
                assert_eq!(expected, actual, "{} sub_i8 len={len}", backend.name());

                let mut copied = vec![0i16; len];
                backend.copy_i16(&mut copied, &row16);
                assert_eq!(copied, row16);
            }
        }
    }

    #[test]
    fn test_layer_kernels_match_scalar() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(2);
        for backend in available_backends() {
            for len in 0..=MAX_LEN {
                let input = random_act(&mut rng, len);
                let weights = random_i8(&mut rng, len);
                assert_eq!(
                    scalar::dot_u8_i8(&input, &weights),
                    backend.dot_u8_i8(&input, &weights),
                    "{} dot len={len}",
                    backend.name()
                );

                let chunk = [
                    rng.random_range(0..=127u8),
                    rng.random_range(0..=127u8),
                    rng.random_range(0..=127u8),
                    rng.random_range(0..=127u8),
                ];
                let chunk_weights = random_i8(&mut rng, len * 4);
                let init: Vec<i32> = (0..len).map(|_| rng.random_range(-50_000..50_000)).collect();
                let mut expected = init.clone();
                let mut actual = init;
                scalar::affine_chunk(&mut expected, chunk, &chunk_weights);
                backend.affine_chunk(&mut actual, chunk, &chunk_weights);
                assert_eq!(expected, actual, "{} affine_chunk len={len}", backend.name());

                let pre: Vec<i32> = (0..len).map(|_| rng.random_range(-40_000..40_000)).collect();
                let mut expected = vec![0u8; len];
                let mut actual = vec![0u8; len];
                scalar::clipped_relu(&pre, &mut expected);
                backend.clipped_relu(&pre, &mut actual);
                assert_eq!(expected, actual, "{} clipped_relu len={len}", backend.name());
            }
        }
    }

    #[test]
    fn test_pairwise_kernel_matches_scalar() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        for backend in available_backends() {
            for len in 0..=MAX_LEN {
                let first: Vec<i16> = (0..len).map(|_| rng.random_range(-300..300)).collect();
                let second: Vec<i16> = (0..len).map(|_| rng.random_range(-300..300)).collect();
                let mut expected = vec![0u8; len];
                let mut actual = vec![0u8; len];
                scalar::pairwise_clamp_mul(&first, &second, &mut expected);
                backend.pairwise_clamp_mul(&first, &second, &mut actual);
                assert_eq!(expected, actual, "{} pairwise len={len}", backend.name());
                assert!(actual.iter().all(|&v| v <= 126));
            }
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// i16 の全範囲（折り返しを含む）でスカラー実装と一致する
        #[test]
        fn prop_full_range_matches_scalar(
            pairs in prop::collection::vec((any::<i16>(), any::<i16>(), any::<i8>()), 0..=200),
        ) {
            let base: Vec<i16> = pairs.iter().map(|p| p.0).collect();
            let row16: Vec<i16> = pairs.iter().map(|p| p.1).collect();
            let row8: Vec<i8> = pairs.iter().map(|p| p.2).collect();
            let len = pairs.len();

            for backend in available_backends() {
                let mut expected = base.clone();
                let mut actual = base.clone();
                scalar::add_i16(&mut expected, &row16);
                backend.add_i16(&mut actual, &row16);
                scalar::sub_i8_to_i16(&mut expected, &row8);
                backend.sub_i8_to_i16(&mut actual, &row8);
                prop_assert_eq!(&expected, &actual, "{} accumulate", backend.name());

                let mut expected = vec![0u8; len];
                let mut actual = vec![0u8; len];
                scalar::pairwise_clamp_mul(&base, &row16, &mut expected);
                backend.pairwise_clamp_mul(&base, &row16, &mut actual);
                prop_assert_eq!(&expected, &actual, "{} pairwise", backend.name());
            }
        }
    }
}
