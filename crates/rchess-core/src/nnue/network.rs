//! NNUE ネットワーク全体の構造と読み書き
//!
//! # ファイル形式
//!
//! ```text
//! version: u32 | hash: u32 | desc_len: u32 | desc
//! FeatureTransformer: hash: u32 | biases(LEB128) | [threat weights(i8)]
//!                     | weights(LEB128) | psqt(LEB128)
//! LayerStack × 8:     hash: u32 | fc_0 | fc_1 | fc_2
//! ```
//!
//! 各ハッシュはパラメータを読む前に検証する。
//!
//! # アーキテクチャ
//!
//! | 名前 | L1 | L2 | L3 | 利き特徴量 |
//! |------|----|----|----|-----------|
//! | big | 1024 | 31 | 32 | あり |
//! | small | 128 | 15 | 32 | なし |

use super::accumulator::Accumulator;
use super::constants::{LAYER_STACKS, MAX_DESCRIPTION_LEN, MAX_L1, NNUE_VERSION, OUTPUT_SCALE};
use super::error::{Component, LoadError, LoadResult};
use super::feature_transformer::FeatureTransformer;
use super::io::{read_u32, write_u32};
use super::layer_stacks::{LayerStack, bucket_index};
use super::simd::SimdBackend;
use crate::types::Color;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

// =============================================================================
// Architecture
// =============================================================================

/// ネットワークの形状
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Architecture {
    name: &'static str,
    l1: usize,
    l2: usize,
    l3: usize,
    threats: bool,
}

impl Architecture {
    /// big ネットワーク（利き特徴量あり）
    pub const BIG: Self = Self { name: "big", l1: 1024, l2: 31, l3: 32, threats: true };

    /// small ネットワーク
    pub const SMALL: Self = Self { name: "small", l1: 128, l2: 15, l3: 32, threats: false };

    /// 任意の形状（テストやツール用の小さなネットワーク）
    pub const fn custom(l1: usize, l2: usize, l3: usize, threats: bool) -> Self {
        Self { name: "custom", l1, l2, l3, threats }
    }

    #[inline]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub const fn l1(&self) -> usize {
        self.l1
    }

    #[inline]
    pub const fn l2(&self) -> usize {
        self.l2
    }

    #[inline]
    pub const fn l3(&self) -> usize {
        self.l3
    }

    #[inline]
    pub const fn has_threats(&self) -> bool {
        self.threats
    }

    /// Feature Transformer の構造ハッシュ
    pub const fn ft_hash(&self) -> u32 {
        FeatureTransformer::hash_value(self.l1, self.threats)
    }

    /// LayerStack の構造ハッシュ（全バケット共通）
    pub const fn layer_stack_hash(&self) -> u32 {
        LayerStack::hash_value(self.l1, self.l2, self.l3)
    }

    /// ネットワーク全体の構造ハッシュ
    pub const fn hash(&self) -> u32 {
        self.ft_hash() ^ self.layer_stack_hash()
    }

    /// ファイル先頭のハッシュから既知のアーキテクチャを判定
    pub fn detect(hash: u32) -> Option<Self> {
        [Self::BIG, Self::SMALL].into_iter().find(|arch| arch.hash() == hash)
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (HalfKAv2_hm{} -> {}x2 -> {} -> {} -> 1)",
            self.name,
            if self.threats { "+FullThreats" } else { "" },
            self.l1,
            self.l2 + 1,
            self.l3
        )
    }
}

// =============================================================================
// Network
// =============================================================================

/// 評価結果（出力スケール適用後）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkOutput {
    /// PSQT 項
    pub psqt: i32,
    /// 後段ネットワークの出力
    pub positional: i32,
}

/// 全バケットの評価結果
#[derive(Debug, Clone)]
pub struct NetworkTrace {
    /// 駒数から選ばれるバケット
    pub selected_bucket: usize,
    pub buckets: [NetworkOutput; LAYER_STACKS],
}

/// NNUE ネットワーク（ロード後は不変）
pub struct Network {
    arch: Architecture,
    description: String,
    feature_transformer: FeatureTransformer,
    layer_stacks: Box<[LayerStack]>,
}

impl Network {
    /// ゼロ初期化
    pub(crate) fn new_zeroed(arch: Architecture) -> Self {
        let layer_stacks: Vec<LayerStack> =
            (0..LAYER_STACKS).map(|_| LayerStack::new(arch.l1, arch.l2, arch.l3)).collect();
        Self {
            arch,
            description: String::new(),
            feature_transformer: FeatureTransformer::new_zeroed(arch.l1, arch.threats),
            layer_stacks: layer_stacks.into_boxed_slice(),
        }
    }

    /// 各部品から組み立てる
    pub(crate) fn from_parts(
        arch: Architecture,
        description: String,
        feature_transformer: FeatureTransformer,
        layer_stacks: Vec<LayerStack>,
    ) -> Self {
        assert_eq!(layer_stacks.len(), LAYER_STACKS);
        Self { arch, description, feature_transformer, layer_stacks: layer_stacks.into_boxed_slice() }
    }

    /// ファイルから読み込み
    pub fn load<P: AsRef<Path>>(path: P, arch: Architecture) -> LoadResult<Self> {
        let file = File::open(path.as_ref())?;
        let mut reader = BufReader::new(file);
        let network = Self::read(&mut reader, arch)?;
        log::info!(
            "loaded NNUE network {} from {} ({})",
            arch.name,
            path.as_ref().display(),
            network.description
        );
        Ok(network)
    }

    /// バイト列から読み込み
    pub fn from_bytes(bytes: &[u8], arch: Architecture) -> LoadResult<Self> {
        let mut reader = bytes;
        Self::read(&mut reader, arch)
    }

    /// リーダーから読み込み
    ///
    /// 途中で失敗した場合、読み込み途中のネットワークは破棄される。
    pub fn read<R: Read>(reader: &mut R, arch: Architecture) -> LoadResult<Self> {
        let version = read_u32(reader)?;
        if version != NNUE_VERSION {
            return Err(LoadError::VersionMismatch { expected: NNUE_VERSION, actual: version });
        }
        check_hash(reader, Component::Network, arch.hash())?;
        let description = read_description(reader)?;

        let mut network = Self::new_zeroed(arch);
        network.description = description;

        check_hash(reader, Component::FeatureTransformer, arch.ft_hash())?;
        network.feature_transformer.read_parameters(reader)?;

        for (bucket, stack) in network.layer_stacks.iter_mut().enumerate() {
            check_hash(reader, Component::LayerStack(bucket), stack.hash())?;
            stack.read_parameters(reader)?;
        }

        let mut probe = [0u8; 1];
        if reader.read(&mut probe)? != 0 {
            return Err(LoadError::TrailingData);
        }

        log::debug!(
            "NNUE {} network: hash {:#010x}, description {:?}",
            arch.name,
            arch.hash(),
            network.description
        );
        Ok(network)
    }

    /// ファイル形式で書き出す
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_u32(writer, NNUE_VERSION)?;
        write_u32(writer, self.hash())?;
        let description = self.description.as_bytes();
        let len = u32::try_from(description.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "description too long"))?;
        write_u32(writer, len)?;
        writer.write_all(description)?;

        write_u32(writer, self.feature_transformer.hash())?;
        self.feature_transformer.write_parameters(writer)?;

        for stack in self.layer_stacks.iter() {
            write_u32(writer, stack.hash())?;
            stack.write_parameters(writer)?;
        }
        Ok(())
    }

    /// ファイルに保存
    pub fn save<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write(&mut writer)?;
        writer.flush()
    }

    #[inline]
    pub fn architecture(&self) -> Architecture {
        self.arch
    }

    #[inline]
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: String) {
        self.description = description;
    }

    /// 構造ハッシュ（各部品から計算し直した値）
    pub fn hash(&self) -> u32 {
        let stack_hash = self.layer_stacks.first().map_or(0, LayerStack::hash);
        self.feature_transformer.hash() ^ stack_hash
    }

    #[inline]
    pub fn feature_transformer(&self) -> &FeatureTransformer {
        &self.feature_transformer
    }

    // =========================================================================
    // 評価
    // =========================================================================

    /// 両視点とも計算済みのアキュムレータを評価する
    ///
    /// 値は手番側から見たもので、出力スケールで割った後の値。
    pub fn evaluate(
        &self,
        simd: &dyn SimdBackend,
        acc: &Accumulator,
        side_to_move: Color,
        piece_count: usize,
    ) -> NetworkOutput {
        let bucket = bucket_index(piece_count);
        let mut transformed = [0u8; MAX_L1];
        let transformed = &mut transformed[..self.arch.l1];
        self.feature_transformer.transform(simd, acc, side_to_move, transformed);
        self.evaluate_bucket(simd, acc, side_to_move, transformed, bucket)
    }

    fn evaluate_bucket(
        &self,
        simd: &dyn SimdBackend,
        acc: &Accumulator,
        side_to_move: Color,
        transformed: &[u8],
        bucket: usize,
    ) -> NetworkOutput {
        debug_assert!(acc.computed[0] && acc.computed[1], "accumulator not computed");
        let psqt = acc
            .psqt_total(side_to_move, bucket)
            .wrapping_sub(acc.psqt_total(!side_to_move, bucket))
            / 2;
        let positional = self.layer_stacks[bucket].propagate(simd, transformed);
        NetworkOutput { psqt: psqt / OUTPUT_SCALE, positional: positional / OUTPUT_SCALE }
    }

    /// 全バケットで評価する（診断用）
    pub fn trace(
        &self,
        simd: &dyn SimdBackend,
        acc: &Accumulator,
        side_to_move: Color,
        piece_count: usize,
    ) -> NetworkTrace {
        let mut transformed = [0u8; MAX_L1];
        let transformed = &mut transformed[..self.arch.l1];
        self.feature_transformer.transform(simd, acc, side_to_move, transformed);
        let mut buckets = [NetworkOutput::default(); LAYER_STACKS];
        for (bucket, out) in buckets.iter_mut().enumerate() {
            *out = self.evaluate_bucket(simd, acc, side_to_move, transformed, bucket);
        }
        NetworkTrace { selected_bucket: bucket_index(piece_count), buckets }
    }
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("arch", &self.arch)
            .field("description", &self.description)
            .field("hash", &format_args!("{:#010x}", self.hash()))
            .finish()
    }
}

fn check_hash<R: Read>(reader: &mut R, component: Component, expected: u32) -> LoadResult<()> {
    let actual = read_u32(reader)?;
    if actual != expected {
        return Err(LoadError::HashMismatch { component, expected, actual });
    }
    Ok(())
}

fn read_description<R: Read>(reader: &mut R) -> LoadResult<String> {
    let len = read_u32(reader)? as usize;
    if len > MAX_DESCRIPTION_LEN {
        return Err(LoadError::InvalidDescription(format!(
            "length {len} exceeds limit {MAX_DESCRIPTION_LEN}"
        )));
    }
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| LoadError::InvalidDescription(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nnue::error::Leb128Error;
    use crate::nnue::leb128::{read_leb128_into, write_leb128};

    /// テスト用の小さな形状（L1 = 64 で並べ替えの 32 要素グループが各半分に1つ）
    const TINY: Architecture = Architecture::custom(64, 7, 8, false);
    const TINY_THREATS: Architecture = Architecture::custom(64, 7, 8, true);

    fn tiny_bytes(arch: Architecture) -> Vec<u8> {
        let network = Network::random(arch, 42);
        let mut bytes = Vec::new();
        network.write(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_known_hashes() {
        assert_eq!(Architecture::SMALL.ft_hash(), 0x7F23_4CB8 ^ 256);
        assert_eq!(Architecture::BIG.ft_hash(), 0x7F23_4CB8 ^ 0x3E61_D2A5 ^ 2048);
        assert_ne!(Architecture::BIG.hash(), Architecture::SMALL.hash());
        assert_eq!(Architecture::detect(Architecture::SMALL.hash()), Some(Architecture::SMALL));
        assert_eq!(Architecture::detect(0), None);
    }

    #[test]
    fn test_write_then_read_is_byte_identical() {
        for arch in [TINY, TINY_THREATS] {
            let bytes = tiny_bytes(arch);
            let network = Network::from_bytes(&bytes, arch).unwrap();
            assert_eq!(network.hash(), arch.hash());
            assert!(network.description().contains("42"));
            let mut again = Vec::new();
            network.write(&mut again).unwrap();
            assert_eq!(bytes, again);
        }
    }

    #[test]
    fn test_set_description_is_written() {
        let mut network = Network::random(TINY, 7);
        network.set_description("評価関数 v2".to_string());
        let mut bytes = Vec::new();
        network.write(&mut bytes).unwrap();
        let loaded = Network::from_bytes(&bytes, TINY).unwrap();
        assert_eq!(loaded.description(), "評価関数 v2");
        assert_eq!(loaded.hash(), TINY.hash());
    }

    #[test]
    fn test_wrong_architecture_is_rejected() {
        let bytes = tiny_bytes(TINY);
        match Network::from_bytes(&bytes, TINY_THREATS) {
            Err(LoadError::HashMismatch { component: Component::Network, .. }) => {}
            other => panic!("expected network hash mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_every_header_byte_corruption_is_detected() {
        let bytes = tiny_bytes(TINY);
        // version(4) + hash(4) + 説明長(4)
        for offset in 0..12 {
            let mut corrupted = bytes.clone();
            corrupted[offset] ^= 0x01;
            assert!(Network::from_bytes(&corrupted, TINY).is_err(), "offset {offset} accepted");
        }
        match Network::from_bytes(&bytes[..2], TINY) {
            Err(LoadError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected EOF, got {other:?}"),
        }
    }

    #[test]
    fn test_component_hash_mismatch_reports_component() {
        let bytes = tiny_bytes(TINY);
        let desc_len = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
        let ft_hash_at = 12 + desc_len;
        let mut corrupted = bytes.clone();
        corrupted[ft_hash_at] ^= 0xFF;
        match Network::from_bytes(&corrupted, TINY) {
            Err(LoadError::HashMismatch { component: Component::FeatureTransformer, .. }) => {}
            other => panic!("expected feature transformer hash mismatch, got {other:?}"),
        }

        let mut corrupted = bytes.clone();
        corrupted[ft_hash_at + 4] = b'X';
        match Network::from_bytes(&corrupted, TINY) {
            Err(LoadError::Leb128(Leb128Error::MagicMismatch)) => {}
            other => panic!("expected LEB128 magic mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_last_layer_stack_hash_is_checked() {
        let bytes = tiny_bytes(TINY);
        let network = Network::from_bytes(&bytes, TINY).unwrap();
        let mut stack_bytes = Vec::new();
        network.layer_stacks[LAYER_STACKS - 1].write_parameters(&mut stack_bytes).unwrap();
        let offset = bytes.len() - stack_bytes.len() - 4;
        let mut corrupted = bytes.clone();
        corrupted[offset] ^= 0x10;
        match Network::from_bytes(&corrupted, TINY) {
            Err(LoadError::HashMismatch { component: Component::LayerStack(7), .. }) => {}
            other => panic!("expected layer stack 7 hash mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_trailing_data_is_rejected() {
        let mut bytes = tiny_bytes(TINY);
        bytes.push(0);
        assert!(matches!(Network::from_bytes(&bytes, TINY), Err(LoadError::TrailingData)));
    }

    #[test]
    fn test_invalid_description() {
        let mut bytes = tiny_bytes(TINY);
        bytes[8..12].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            Network::from_bytes(&bytes, TINY),
            Err(LoadError::InvalidDescription(_))
        ));

        let mut bytes = tiny_bytes(TINY);
        bytes[12] = 0xFF;
        assert!(matches!(
            Network::from_bytes(&bytes, TINY),
            Err(LoadError::InvalidDescription(_))
        ));
    }

    #[test]
    fn test_non_threat_overflow_is_rejected() {
        let network = Network::random(TINY, 1);
        let mut bytes = Vec::new();
        network.write(&mut bytes).unwrap();
        let mut raw = Vec::new();
        network.feature_transformer.write_parameters(&mut raw).unwrap();

        // バイアス先頭を 2 倍すると i16 を超える値に差し替える
        let desc_len = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
        let ft_params_at = 12 + desc_len + 4;
        let mut rest = raw.as_slice();
        let mut biases = vec![0i16; TINY.l1()];
        read_leb128_into(&mut rest, &mut biases).unwrap();
        biases[0] = 0x4000;

        let mut patched = bytes[..ft_params_at].to_vec();
        write_leb128(&mut patched, &biases).unwrap();
        patched.extend_from_slice(rest);
        patched.extend_from_slice(&bytes[ft_params_at + raw.len()..]);
        match Network::from_bytes(&patched, TINY) {
            Err(LoadError::WeightOverflow { index: 0 }) => {}
            other => panic!("expected WeightOverflow, got {other:?}"),
        }
    }
}
