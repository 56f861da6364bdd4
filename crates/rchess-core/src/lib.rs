//! rchess-core: チェス用 NNUE 評価コア
//!
//! - `types`: 手番・升・駒・Bitboard・評価値などの基本型
//! - `position`: 評価関数が必要とする駒配置のスナップショットと `DirtyPiece`
//! - `nnue`: ネットワークの読み込み、差分更新、評価

pub mod nnue;
pub mod position;
pub mod types;
