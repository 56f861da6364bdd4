//! NNUE の設定（ネットワークファイルの場所）
//!
//! ```toml
//! big_network = "nets/nn-1c0000000000.nnue"
//! small_network = "nets/nn-37f18f62d772.nnue"
//! ```
//!
//! 省略したキーは既定値になる。

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 既定の big ネットワークのファイル名
pub const DEFAULT_BIG_NETWORK: &str = "nn-1c0000000000.nnue";

/// 既定の small ネットワークのファイル名
pub const DEFAULT_SMALL_NETWORK: &str = "nn-37f18f62d772.nnue";

/// 設定ファイルの読み込みエラー
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid NNUE config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// NNUE の設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NnueConfig {
    pub big_network: PathBuf,
    pub small_network: PathBuf,
}

impl Default for NnueConfig {
    fn default() -> Self {
        Self {
            big_network: PathBuf::from(DEFAULT_BIG_NETWORK),
            small_network: PathBuf::from(DEFAULT_SMALL_NETWORK),
        }
    }
}

impl NnueConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// TOML ファイルから読み込み（相対パスは設定ファイルの場所を基準にする）
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let mut config = Self::from_toml_str(&text)?;
        if let Some(base) = path.parent() {
            config.big_network = base.join(&config.big_network);
            config.small_network = base.join(&config.small_network);
        }
        config.warn_missing_files();
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(self)
    }

    /// 存在しないネットワークファイルを警告する
    pub fn warn_missing_files(&self) {
        for (kind, path) in [("big", &self.big_network), ("small", &self.small_network)] {
            if !path.exists() {
                log::warn!("{kind} NNUE network not found: {}", path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = NnueConfig::from_toml_str(r#"small_network = "tiny.nnue""#).unwrap();
        assert_eq!(config.small_network, PathBuf::from("tiny.nnue"));
        assert_eq!(config.big_network, PathBuf::from(DEFAULT_BIG_NETWORK));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = NnueConfig {
            big_network: PathBuf::from("a/big.nnue"),
            small_network: PathBuf::from("b/small.nnue"),
        };
        let text = config.to_toml_string().unwrap();
        assert_eq!(NnueConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            NnueConfig::from_toml_str("big_network = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = std::env::temp_dir().join(format!("rchess-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("nnue.toml");
        std::fs::write(&path, "big_network = \"big.nnue\"\n").unwrap();
        let config = NnueConfig::load(&path).unwrap();
        assert_eq!(config.big_network, dir.join("big.nnue"));
        assert_eq!(config.small_network, dir.join(DEFAULT_SMALL_NETWORK));
        std::fs::remove_dir_all(&dir).unwrap();

        assert!(matches!(NnueConfig::load(dir.join("missing.toml")), Err(ConfigError::Io { .. })));
    }
}
