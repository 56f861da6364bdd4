//! NNUE 統計カウンタ（チューニング用）
//!
//! アキュムレータ更新がどの経路で行われたかを数える。
//! `nnue-stats` feature 有効時のみカウントを行い、無効時はすべて no-op になる。
//!
//! ```bash
//! cargo test --release -p rchess-core --features nnue-stats
//! ```

#[cfg(feature = "nnue-stats")]
use std::sync::atomic::{AtomicU64, Ordering};

/// アキュムレータ更新の経路
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePath {
    /// すでに計算済み
    AlreadyComputed,
    /// 親局面からの差分
    Forward,
    /// 子局面からの逆差分
    Backward,
    /// 祖父局面からの2手分の差分
    Double,
    /// 祖先からの連続差分
    AncestorChain,
    /// Finny テーブルからの差分
    CacheHit,
    /// 全計算
    Refresh,
}

/// NNUE アキュムレータ更新統計
#[cfg(feature = "nnue-stats")]
pub struct NnueStats {
    pub already_computed: AtomicU64,
    pub forward: AtomicU64,
    pub backward: AtomicU64,
    pub double: AtomicU64,
    pub ancestor_chain: AtomicU64,
    pub cache_hit: AtomicU64,
    pub refresh: AtomicU64,
    pub evaluate: AtomicU64,
}

#[cfg(feature = "nnue-stats")]
impl NnueStats {
    pub const fn new() -> Self {
        Self {
            already_computed: AtomicU64::new(0),
            forward: AtomicU64::new(0),
            backward: AtomicU64::new(0),
            double: AtomicU64::new(0),
            ancestor_chain: AtomicU64::new(0),
            cache_hit: AtomicU64::new(0),
            refresh: AtomicU64::new(0),
            evaluate: AtomicU64::new(0),
        }
    }

    fn counters(&self) -> [&AtomicU64; 8] {
        [
            &self.already_computed,
            &self.forward,
            &self.backward,
            &self.double,
            &self.ancestor_chain,
            &self.cache_hit,
            &self.refresh,
            &self.evaluate,
        ]
    }

    /// カウンタをリセット
    pub fn reset(&self) {
        for counter in self.counters() {
            counter.store(0, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn count_update(&self, path: UpdatePath) {
        let counter = match path {
            UpdatePath::AlreadyComputed => &self.already_computed,
            UpdatePath::Forward => &self.forward,
            UpdatePath::Backward => &self.backward,
            UpdatePath::Double => &self.double,
            UpdatePath::AncestorChain => &self.ancestor_chain,
            UpdatePath::CacheHit => &self.cache_hit,
            UpdatePath::Refresh => &self.refresh,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn count_evaluate(&self) {
        self.evaluate.fetch_add(1, Ordering::Relaxed);
    }

    /// 統計情報を取得
    pub fn snapshot(&self) -> NnueStatsSnapshot {
        NnueStatsSnapshot {
            already_computed: self.already_computed.load(Ordering::Relaxed),
            forward: self.forward.load(Ordering::Relaxed),
            backward: self.backward.load(Ordering::Relaxed),
            double: self.double.load(Ordering::Relaxed),
            ancestor_chain: self.ancestor_chain.load(Ordering::Relaxed),
            cache_hit: self.cache_hit.load(Ordering::Relaxed),
            refresh: self.refresh.load(Ordering::Relaxed),
            evaluate: self.evaluate.load(Ordering::Relaxed),
        }
    }
}

#[cfg(feature = "nnue-stats")]
impl Default for NnueStats {
    fn default() -> Self {
        Self::new()
    }
}

/// 統計スナップショット
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NnueStatsSnapshot {
    pub already_computed: u64,
    pub forward: u64,
    pub backward: u64,
    pub double: u64,
    pub ancestor_chain: u64,
    pub cache_hit: u64,
    pub refresh: u64,
    pub evaluate: u64,
}

impl NnueStatsSnapshot {
    /// 実際に計算を行った更新の合計（計算済みのスキップを除く）
    pub fn total_updates(&self) -> u64 {
        self.forward
            + self.backward
            + self.double
            + self.ancestor_chain
            + self.cache_hit
            + self.refresh
    }

    fn rate(&self, count: u64) -> f64 {
        let total = self.total_updates();
        if total == 0 { 0.0 } else { count as f64 / total as f64 * 100.0 }
    }

    /// 全計算率（%）
    pub fn refresh_rate(&self) -> f64 {
        self.rate(self.refresh)
    }

    /// Finny テーブル利用率（%）
    pub fn cache_hit_rate(&self) -> f64 {
        self.rate(self.cache_hit)
    }

    /// 差分更新率（%）
    pub fn incremental_rate(&self) -> f64 {
        self.rate(self.forward + self.backward + self.double + self.ancestor_chain)
    }

    /// レポートを標準エラー出力へ
    pub fn print_report(&self) {
        eprintln!("=== NNUE Accumulator Stats ===");
        eprintln!("evaluate calls:        {:>12}", self.evaluate);
        eprintln!("already computed:      {:>12}", self.already_computed);
        eprintln!("accumulator updates:   {:>12}", self.total_updates());
        eprintln!("  forward:             {:>12}", self.forward);
        eprintln!("  backward:            {:>12}", self.backward);
        eprintln!("  double:              {:>12}", self.double);
        eprintln!("  ancestor chain:      {:>12}", self.ancestor_chain);
        eprintln!(
            "  cache hit:           {:>12} ({:>5.1}%)",
            self.cache_hit,
            self.cache_hit_rate()
        );
        eprintln!("  refresh:             {:>12} ({:>5.1}%)", self.refresh, self.refresh_rate());
        eprintln!("incremental rate:      {:>11.1}%", self.incremental_rate());
        eprintln!("==============================");
    }
}

// ============================================================================
// Feature有効時: 実際のカウンタ
// ============================================================================

#[cfg(feature = "nnue-stats")]
pub static NNUE_STATS: NnueStats = NnueStats::new();

#[cfg(feature = "nnue-stats")]
pub fn reset_nnue_stats() {
    NNUE_STATS.reset();
}

#[cfg(feature = "nnue-stats")]
pub fn get_nnue_stats() -> NnueStatsSnapshot {
    NNUE_STATS.snapshot()
}

#[cfg(feature = "nnue-stats")]
#[inline]
pub(crate) fn count_update(path: UpdatePath) {
    NNUE_STATS.count_update(path);
}

#[cfg(feature = "nnue-stats")]
#[inline]
pub(crate) fn count_evaluate() {
    NNUE_STATS.count_evaluate();
}

// ============================================================================
// Feature無効時: no-op
// ============================================================================

#[cfg(not(feature = "nnue-stats"))]
#[inline]
pub fn reset_nnue_stats() {}

/// 空のスナップショット
#[cfg(not(feature = "nnue-stats"))]
#[inline]
pub fn get_nnue_stats() -> NnueStatsSnapshot {
    NnueStatsSnapshot::default()
}

#[cfg(not(feature = "nnue-stats"))]
#[inline]
pub(crate) fn count_update(_path: UpdatePath) {}

#[cfg(not(feature = "nnue-stats"))]
#[inline]
pub(crate) fn count_evaluate() {}
