//! NNUE評価関数モジュール
//!
//! Efficiently Updatable Neural Network による局面評価。
//!
//! - ネットワークファイルの読み書き（LEB128 圧縮、構造ハッシュ検証）
//! - 特徴量（HalfKAv2_hm、FullThreats）
//! - Feature Transformer とアキュムレータの差分更新、Finny テーブル
//! - バケットごとの LayerStack
//! - SIMD カーネル（スカラー実装が基準）
//! - big / small の2ネットワークを組み合わせる評価器

mod accumulator;
mod accumulator_cache;
pub mod config;
pub mod constants;
mod error;
mod evaluator;
mod feature_transformer;
pub mod features;
mod io;
mod layer_stacks;
pub mod layers;
pub mod leb128;
mod network;
mod random;
pub mod simd;
pub mod stats;

pub use accumulator::{Accumulator, AccumulatorStack, StackEntry};
pub use accumulator_cache::{AccumulatorCache, CacheEntry};
pub use config::{ConfigError, NnueConfig};
pub use error::{Component, Leb128Error, LoadError, LoadResult};
pub use evaluator::{Evaluator, NetSize, Networks};
pub use feature_transformer::FeatureTransformer;
pub use layer_stacks::{LayerStack, bucket_index};
pub use network::{Architecture, Network, NetworkOutput, NetworkTrace};
pub use stats::{NnueStatsSnapshot, UpdatePath, get_nnue_stats, reset_nnue_stats};
