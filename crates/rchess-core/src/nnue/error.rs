//! NNUE ロード時のエラー型

/// LEB128 圧縮ブロックの復号エラー
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Leb128Error {
    #[error("LEB128 magic string mismatch")]
    MagicMismatch,

    #[error("LEB128 block truncated: declared {declared} bytes, stream ended after {consumed}")]
    Truncated { declared: u32, consumed: u32 },

    #[error("LEB128 byte count mismatch: declared {declared}, consumed {consumed}")]
    ByteCountMismatch { declared: u32, consumed: u32 },

    #[error("LEB128 value longer than {max_bytes} bytes for a {bits}-bit integer")]
    Overlong { bits: u32, max_bytes: u32 },

    #[error("LEB128 value {value} does not fit in a {bits}-bit integer")]
    OutOfRange { value: i64, bits: u32 },
}

/// ネットワークの構成要素（ハッシュ不一致の報告に使用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Network,
    FeatureTransformer,
    LayerStack(usize),
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Component::Network => write!(f, "network"),
            Component::FeatureTransformer => write!(f, "feature transformer"),
            Component::LayerStack(bucket) => write!(f, "layer stack #{bucket}"),
        }
    }
}

/// ネットワークファイルの読み込みエラー
///
/// いずれも致命的で、部分的に読み込んだネットワークは破棄される。
#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("unsupported NNUE version {actual:#010x}, expected {expected:#010x}")]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("{component} hash mismatch: expected {expected:#010x}, got {actual:#010x}")]
    HashMismatch { component: Component, expected: u32, actual: u32 },

    #[error("invalid description: {0}")]
    InvalidDescription(String),

    #[error(transparent)]
    Leb128(#[from] Leb128Error),

    #[error("feature transformer parameter overflows 16 bits when rescaled (index {index})")]
    WeightOverflow { index: usize },

    #[error("unexpected trailing data after the last layer stack")]
    TrailingData,
}

/// ロード処理の Result 型
pub type LoadResult<T> = Result<T, LoadError>;
