//! 差分更新と全計算の比較
//!
//! ```bash
//! cargo bench -p rchess-core --bench nnue_update
//! ```

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use rchess_core::nnue::simd::available_backends;
use rchess_core::nnue::{Architecture, Evaluator, NetSize, Network, Networks};
use rchess_core::position::{DirtyPiece, Position};
use rchess_core::types::{Piece, Square};

fn sq(s: &str) -> Square {
    Square::from_algebraic(s).unwrap()
}

fn networks() -> Networks {
    Networks::new(Network::random(Architecture::SMALL, 1), Network::random(Architecture::SMALL, 2))
}

pub fn bench_update(c: &mut Criterion) {
    let networks = networks();
    let dp = DirtyPiece::quiet(Piece::W_KNIGHT, sq("g1"), sq("f3"));
    let mut g = c.benchmark_group("nnue_update");

    for backend in available_backends() {
        // push → 評価 → pop（親からの前方差分）
        g.bench_function(BenchmarkId::new("forward", backend.name()), |b| {
            let mut pos = Position::startpos();
            let mut ev = Evaluator::with_backend(&networks, backend);
            ev.refresh(&pos);
            b.iter(|| {
                pos.apply(&dp);
                ev.push(dp);
                let out = ev.evaluate_net(&pos, NetSize::Big);
                ev.pop();
                pos.revert(&dp);
                black_box(out)
            });
        });

        // 毎回ルートから全計算
        g.bench_function(BenchmarkId::new("refresh", backend.name()), |b| {
            let pos = Position::startpos();
            let mut ev = Evaluator::with_backend(&networks, backend);
            b.iter(|| {
                ev.clear_caches();
                ev.reset();
                black_box(ev.evaluate_net(&pos, NetSize::Big))
            });
        });
    }
    g.finish();
}

criterion_group!(benches, bench_update);
criterion_main!(benches);
