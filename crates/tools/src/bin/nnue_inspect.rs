//! NNUE ファイルの検査ツール
//!
//! ヘッダ・構造ハッシュ・説明文字列を表示し、FEN を指定すると全バケットの評価値を出力する。
//!
//! ```bash
//! cargo run --release -p tools --bin nnue_inspect -- nn-37f18f62d772.nnue --fen "<FEN>"
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Serialize;

use rchess_core::nnue::constants::NNUE_VERSION;
use rchess_core::nnue::{Accumulator, Architecture, Network, NetworkTrace, simd};
use rchess_core::position::Position;
use rchess_core::types::Color;

#[derive(Parser, Debug)]
#[command(name = "nnue_inspect")]
#[command(about = "NNUE ファイルのヘッダと構造を表示する")]
struct Cli {
    /// NNUE ファイル
    file: PathBuf,

    /// 評価する局面（指定時は全バケットの出力を表示）
    #[arg(long)]
    fen: Option<String>,

    /// JSON で出力
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Serialize)]
struct Report {
    file: String,
    version: u32,
    hash: String,
    architecture: String,
    l1: usize,
    l2: usize,
    l3: usize,
    threats: bool,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace: Option<TraceReport>,
}

#[derive(Serialize)]
struct TraceReport {
    fen: String,
    backend: String,
    selected_bucket: usize,
    buckets: Vec<BucketReport>,
}

#[derive(Serialize)]
struct BucketReport {
    bucket: usize,
    psqt: i32,
    positional: i32,
    total: i32,
}

fn trace_position(network: &Network, fen: &str) -> Result<TraceReport> {
    let pos = Position::from_fen(fen).with_context(|| format!("invalid FEN: {fen}"))?;
    let backend = simd::backend();
    let ft = network.feature_transformer();
    let mut acc = Accumulator::new(ft.half_dims(), ft.has_threats());
    for perspective in Color::ALL {
        ft.compute_position(backend, &pos, &mut acc, perspective);
    }
    let NetworkTrace { selected_bucket, buckets } =
        network.trace(backend, &acc, pos.side_to_move(), pos.count_all());
    let buckets = buckets
        .iter()
        .enumerate()
        .map(|(bucket, out)| BucketReport {
            bucket,
            psqt: out.psqt,
            positional: out.positional,
            total: out.psqt + out.positional,
        })
        .collect();
    Ok(TraceReport {
        fen: pos.to_fen(),
        backend: backend.name().to_string(),
        selected_bucket,
        buckets,
    })
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    let bytes =
        std::fs::read(&cli.file).with_context(|| format!("failed to read {}", cli.file.display()))?;
    if bytes.len() < 8 {
        bail!("{} is too short to be an NNUE file ({} bytes)", cli.file.display(), bytes.len());
    }

    let version = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let hash = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != NNUE_VERSION {
        bail!("unsupported version {version:#010x} (expected {NNUE_VERSION:#010x})");
    }
    let Some(arch) = Architecture::detect(hash) else {
        bail!(
            "unknown network hash {hash:#010x} (big: {:#010x}, small: {:#010x})",
            Architecture::BIG.hash(),
            Architecture::SMALL.hash()
        );
    };

    let network = Network::from_bytes(&bytes, arch)
        .with_context(|| format!("failed to load {}", cli.file.display()))?;
    let trace = cli.fen.as_deref().map(|fen| trace_position(&network, fen)).transpose()?;

    let report = Report {
        file: cli.file.display().to_string(),
        version,
        hash: format!("{hash:#010x}"),
        architecture: arch.to_string(),
        l1: arch.l1(),
        l2: arch.l2(),
        l3: arch.l3(),
        threats: arch.has_threats(),
        description: network.description().to_string(),
        trace,
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("file:         {}", report.file);
    println!("version:      {:#010x}", report.version);
    println!("hash:         {}", report.hash);
    println!("architecture: {}", report.architecture);
    println!("description:  {}", report.description);
    if let Some(trace) = &report.trace {
        println!();
        println!("fen: {} ({})", trace.fen, trace.backend);
        println!("{:>6} {:>8} {:>10} {:>8}", "bucket", "psqt", "positional", "total");
        for b in &trace.buckets {
            let mark = if b.bucket == trace.selected_bucket { " <-" } else { "" };
            println!("{:>6} {:>8} {:>10} {:>8}{mark}", b.bucket, b.psqt, b.positional, b.total);
        }
    }
    Ok(())
}
