//! NNUE 定数
//!
//! ファイル形式・量子化スケール・アーキテクチャ共通の定数をまとめる。

// =============================================================================
// ファイル形式
// =============================================================================

/// ファイル形式のバージョン
pub const NNUE_VERSION: u32 = 0x7AF3_2F20;

/// 説明文字列の最大長（これを超える長さは破損とみなす）
pub const MAX_DESCRIPTION_LEN: usize = 1 << 20;

/// LEB128 圧縮ブロックの先頭に置かれるマジック文字列
pub const LEB128_MAGIC: &[u8; 17] = b"COMPRESSED_LEB128";

// =============================================================================
// 量子化
// =============================================================================

/// 重みのスケール（2^6）
pub const WEIGHT_SCALE_BITS: u32 = 6;

/// 出力のスケール
pub const OUTPUT_SCALE: i32 = 16;

/// ClippedReLU / SqrClippedReLU の出力上限
pub const ACT_MAX: i32 = 127;

/// SqrClippedReLU のシフト量（2 * WEIGHT_SCALE_BITS + 7）
pub const SQR_CRELU_SHIFT: u32 = 2 * WEIGHT_SCALE_BITS + 7;

/// Feature Transformer 出力変換のクランプ上限（×2 スケール後）
pub const FT_CLAMP_MAX: i16 = 127 * 2;

/// Feature Transformer 出力変換の積のシフト量
pub const FT_PRODUCT_SHIFT: u32 = 9;

/// スキップ接続の換算: 1.0 = 127 * 2^6 を 1.0 = 600 * OUTPUT_SCALE に合わせる
pub const SKIP_NUMERATOR: i32 = 600 * OUTPUT_SCALE;
pub const SKIP_DENOMINATOR: i32 = 127 * (1 << WEIGHT_SCALE_BITS);

// =============================================================================
// アーキテクチャ共通
// =============================================================================

/// Feature Transformer の片側次元数の最大値（big ネットワーク）
pub const MAX_L1: usize = 1024;

/// PSQT バケット数
pub const PSQT_BUCKETS: usize = 8;

/// LayerStack バケット数
pub const LAYER_STACKS: usize = 8;

/// 全結合層の入力次元のパディング単位
pub const INPUT_PADDING: usize = 32;

/// Finny テーブルで差分適用を行う変化升数の上限
pub const CACHE_MAX_CHANGED_SQUARES: u32 = 4;

/// 祖先からの連続差分更新で遡る最大手数
pub const MAX_ANCESTOR_DISTANCE: usize = 8;

// =============================================================================
// 評価値のブレンド
// =============================================================================

/// small ネットワークを使う駒得の閾値
pub const SMALL_NET_THRESHOLD: i32 = 962;

/// small ネットワークの結果がこの範囲内なら big ネットワークで再評価する
pub const SMALL_NET_REEVAL_MARGIN: i32 = 236;

/// 入力次元をパディング単位に切り上げ
#[inline]
pub const fn padded_input(dim: usize) -> usize {
    dim.div_ceil(INPUT_PADDING) * INPUT_PADDING
}
