//! 乱数ネットワークの生成ツール
//!
//! 同じアーキテクチャとシードからは常に同じファイルが得られる。
//! 評価関数の入出力やベンチマークの確認用で、棋力はない。

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use rchess_core::nnue::{Architecture, Network};

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Arch {
    Big,
    Small,
}

impl From<Arch> for Architecture {
    fn from(arch: Arch) -> Self {
        match arch {
            Arch::Big => Architecture::BIG,
            Arch::Small => Architecture::SMALL,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "nnue_gen")]
#[command(about = "決定的な乱数 NNUE ファイルを生成する")]
struct Cli {
    /// アーキテクチャ
    #[arg(long, value_enum, default_value_t = Arch::Small)]
    arch: Arch,

    /// 乱数シード
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// ヘッダに書き込む説明文（省略時はアーキテクチャとシード）
    #[arg(long)]
    description: Option<String>,

    /// 出力ファイル
    #[arg(short, long)]
    output: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    let arch = Architecture::from(cli.arch);
    let mut network = Network::random(arch, cli.seed);
    if let Some(description) = cli.description {
        network.set_description(description);
    }
    network
        .save(&cli.output)
        .with_context(|| format!("failed to write {}", cli.output.display()))?;
    log::info!(
        "wrote {} ({arch}, hash {:#010x}, seed {})",
        cli.output.display(),
        network.hash(),
        cli.seed
    );
    Ok(())
}
