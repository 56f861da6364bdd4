//! 評価器（big / small の2ネットワーク）
//!
//! ネットワークごとにアキュムレータスタックと Finny テーブルを持ち、
//! 探索木の移動（`push` / `pop`）に合わせて差分更新する。
//! 更新は評価時まで遅延し、使ったネットワークだけを更新する。
//!
//! ```ignore
//! let networks = Networks::load(&NnueConfig::default())?;
//! let mut evaluator = Evaluator::new(&networks);
//! let mut pos = Position::startpos();
//!
//! evaluator.refresh(&pos);
//! let dp = DirtyPiece::quiet(Piece::W_PAWN, e2, e4);
//! pos.apply(&dp);
//! evaluator.push(dp);
//! let value = evaluator.evaluate(&pos);
//! evaluator.pop();
//! pos.revert(&dp);
//! ```
//!
//! 1視点の更新は次の順で試す:
//!
//! 1. 計算済み
//! 2. 親局面からの前方差分
//! 3. 直前に pop した子局面からの後方差分
//! 4. 2手前からの2手分の差分
//! 5. 計算済みの祖先からの連続差分（最大 [`MAX_ANCESTOR_DISTANCE`] 手）
//! 6. Finny テーブル（変化が多ければ全計算）

use std::sync::Arc;

use super::accumulator::{Accumulator, AccumulatorStack};
use super::accumulator_cache::AccumulatorCache;
use super::config::NnueConfig;
use super::constants::{MAX_ANCESTOR_DISTANCE, SMALL_NET_REEVAL_MARGIN, SMALL_NET_THRESHOLD};
use super::error::LoadResult;
use super::features::{self, FeatureDelta, FullThreats};
use super::network::{Architecture, Network, NetworkOutput, NetworkTrace};
use super::simd::{self, SimdBackend};
use super::stats::{self, UpdatePath};
use crate::position::{DirtyPiece, Position};
use crate::types::{Color, Square, Value};

/// 読み込み済みのネットワーク一式（スレッド間で共有する）
#[derive(Clone, Debug)]
pub struct Networks {
    big: Arc<Network>,
    small: Arc<Network>,
}

impl Networks {
    pub fn new(big: Network, small: Network) -> Self {
        Self { big: Arc::new(big), small: Arc::new(small) }
    }

    /// 設定ファイルの指すパスから読み込む
    pub fn load(config: &NnueConfig) -> LoadResult<Self> {
        let big = Network::load(&config.big_network, Architecture::BIG)?;
        let small = Network::load(&config.small_network, Architecture::SMALL)?;
        Ok(Self::new(big, small))
    }

    #[inline]
    pub fn big(&self) -> &Network {
        &self.big
    }

    #[inline]
    pub fn small(&self) -> &Network {
        &self.small
    }
}

/// どちらのネットワークか
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NetSize {
    Big,
    Small,
}

/// 1ネットワーク分の探索状態
struct NetState {
    network: Arc<Network>,
    stack: AccumulatorStack,
    cache: AccumulatorCache,
}

impl NetState {
    fn new(network: Arc<Network>) -> Self {
        let ft = network.feature_transformer();
        let stack = AccumulatorStack::new(ft.half_dims(), ft.has_threats());
        let cache = AccumulatorCache::new(ft);
        Self { network, stack, cache }
    }

    /// トップ局面の両視点を計算済みにする
    fn update(&mut self, simd: &dyn SimdBackend, pos: &Position) -> [UpdatePath; 2] {
        let network = &*self.network;
        let stack = &mut self.stack;
        let cache = &mut self.cache;
        let ft = network.feature_transformer();

        if ft.has_threats() {
            let top = stack.top_mut();
            if !top.threats_valid {
                top.threats.clear();
                FullThreats::append_active_threats(pos.board(), pos.occupied(), &mut top.threats);
                top.threats_valid = true;
            }
        }

        let mut paths = [UpdatePath::AlreadyComputed; 2];
        for perspective in Color::ALL {
            let path = update_perspective(network, simd, stack, cache, pos, perspective);
            stats::count_update(path);
            paths[perspective.index()] = path;
        }
        paths
    }

    fn evaluate(&mut self, simd: &dyn SimdBackend, pos: &Position) -> NetworkOutput {
        self.update(simd, pos);
        let acc = &self.stack.top().accumulator;
        self.network.evaluate(simd, acc, pos.side_to_move(), pos.count_all())
    }
}

/// スロット `index` の手の差分
///
/// `threats_from` を指定すると、そのスロットから `index` への利きの差分も加える。
fn move_delta(
    stack: &AccumulatorStack,
    index: usize,
    perspective: Color,
    ksq: Square,
    threats_from: Option<usize>,
) -> FeatureDelta {
    let mut delta = FeatureDelta::new();
    let entry = stack.entry(index);
    if let Some(dp) = &entry.dirty_piece {
        let (removed, added) = (&mut delta.removed, &mut delta.added);
        features::append_changed_indices(dp, perspective, ksq, removed, added);
    }
    if let Some(from) = threats_from {
        features::append_changed_threat_indices(
            &stack.entry(from).threats,
            &entry.threats,
            perspective,
            ksq,
            &mut delta.removed,
            &mut delta.added,
        );
    }
    delta
}

fn update_perspective(
    network: &Network,
    simd: &dyn SimdBackend,
    stack: &mut AccumulatorStack,
    cache: &mut AccumulatorCache,
    pos: &Position,
    perspective: Color,
) -> UpdatePath {
    let ft = network.feature_transformer();
    let p = perspective.index();
    let top = stack.top_index();
    if stack.top().accumulator.computed[p] {
        return UpdatePath::AlreadyComputed;
    }

    let ksq = pos.king_square(perspective);
    let threats = ft.has_threats();
    let refresh_top = stack.top().needs_refresh[p];

    // 親から
    if top > 0 && !refresh_top && stack.entry(top - 1).accumulator.computed[p] {
        let parent = top - 1;
        let delta = move_delta(stack, top, perspective, ksq, threats.then_some(parent));
        let (src, dst) = stack.pair_mut(parent, top);
        ft.forward_update(simd, &src.accumulator, &delta, &mut dst.accumulator, perspective);
        return UpdatePath::Forward;
    }

    // pop 済みの子から
    let child_usable = stack
        .popped_child()
        .is_some_and(|child| !child.needs_refresh[p] && child.accumulator.computed[p]);
    if child_usable {
        let child = top + 1;
        let delta = move_delta(stack, child, perspective, ksq, threats.then_some(top));
        let (src, dst) = stack.pair_mut(child, top);
        ft.backward_update(simd, &src.accumulator, &delta, &mut dst.accumulator, perspective);
        return UpdatePath::Backward;
    }

    // 2手前から
    if top >= 2
        && !refresh_top
        && !stack.entry(top - 1).needs_refresh[p]
        && stack.entry(top - 2).accumulator.computed[p]
    {
        let grand = top - 2;
        let first = move_delta(stack, top - 1, perspective, ksq, None);
        let second = move_delta(stack, top, perspective, ksq, threats.then_some(grand));
        let (src, dst) = stack.pair_mut(grand, top);
        let (grand_acc, acc) = (&src.accumulator, &mut dst.accumulator);
        ft.double_update(simd, grand_acc, &first, &second, acc, perspective);
        return UpdatePath::Double;
    }

    // 祖先から連続で
    if let Some(ancestor) = stack.find_usable_ancestor(perspective, MAX_ANCESTOR_DISTANCE) {
        let (src, dst) = stack.pair_mut(ancestor, top);
        ft.copy_from(simd, &src.accumulator, &mut dst.accumulator, perspective);
        for index in ancestor + 1..=top {
            let delta = move_delta(stack, index, perspective, ksq, None);
            ft.apply_in_place(simd, &mut stack.top_mut().accumulator, perspective, &delta);
        }
        if threats {
            let mut delta = FeatureDelta::new();
            features::append_changed_threat_indices(
                &stack.entry(ancestor).threats,
                &stack.top().threats,
                perspective,
                ksq,
                &mut delta.removed,
                &mut delta.added,
            );
            ft.apply_in_place(simd, &mut stack.top_mut().accumulator, perspective, &delta);
        }
        let acc = &mut stack.top_mut().accumulator;
        acc.king_square[p] = Some(ksq);
        acc.computed[p] = true;
        return UpdatePath::AncestorChain;
    }

    let entry = cache.entry_mut(ksq, perspective);
    let slot = stack.top_mut();
    let threat_list = threats.then_some(&slot.threats);
    let hit =
        ft.refresh_from_cache(simd, entry, pos, threat_list, &mut slot.accumulator, perspective);
    let path = if hit {
        UpdatePath::CacheHit
    } else {
        #[cfg(feature = "diagnostics")]
        log::debug!(
            "[NNUE] cache miss: full refresh ({} net, {perspective:?}, king {ksq})",
            network.architecture().name()
        );
        ft.compute_position(simd, pos, &mut slot.accumulator, perspective);
        UpdatePath::Refresh
    };
    ft.save_to_cache(simd, &slot.accumulator, pos, entry, perspective);
    path
}

/// 評価器
///
/// スレッドごとに1つ持つ。ネットワークは [`Networks`] を通じて共有される。
pub struct Evaluator {
    simd: &'static dyn SimdBackend,
    big: NetState,
    small: NetState,
}

impl Evaluator {
    /// 起動時に選択されたカーネルで作成
    pub fn new(networks: &Networks) -> Self {
        Self::with_backend(networks, simd::backend())
    }

    /// カーネルを指定して作成（差分テスト用）
    pub fn with_backend(networks: &Networks, simd: &'static dyn SimdBackend) -> Self {
        Self {
            simd,
            big: NetState::new(Arc::clone(&networks.big)),
            small: NetState::new(Arc::clone(&networks.small)),
        }
    }

    /// 同じネットワークを共有する、空の状態の評価器を作る
    pub fn clone_for_thread(&self) -> Self {
        Self {
            simd: self.simd,
            big: NetState::new(Arc::clone(&self.big.network)),
            small: NetState::new(Arc::clone(&self.small.network)),
        }
    }

    /// 使用中のカーネル名
    pub fn backend_name(&self) -> &'static str {
        self.simd.name()
    }

    /// ルート局面だけの状態に戻す（ルートも未計算）
    pub fn reset(&mut self) {
        self.big.stack.reset();
        self.small.stack.reset();
    }

    /// `pos` を新しいルート局面として両ネットワークを計算する
    pub fn refresh(&mut self, pos: &Position) {
        self.reset();
        self.big.update(self.simd, pos);
        self.small.update(self.simd, pos);
    }

    /// Finny テーブルを空にする（新しい対局の開始時など）
    pub fn clear_caches(&mut self) {
        let big_ft = self.big.network.feature_transformer();
        self.big.cache.clear(big_ft);
        let small_ft = self.small.network.feature_transformer();
        self.small.cache.clear(small_ft);
    }

    /// 子局面へ進む（盤面側で `dirty_piece` を適用した直後に呼ぶ）
    #[track_caller]
    pub fn push(&mut self, dirty_piece: DirtyPiece) {
        self.big.stack.push(dirty_piece);
        self.small.stack.push(dirty_piece);
    }

    /// 親局面へ戻る
    #[track_caller]
    pub fn pop(&mut self) {
        self.big.stack.pop();
        self.small.stack.pop();
    }

    /// ルートからの手数
    #[inline]
    pub fn ply(&self) -> usize {
        self.big.stack.top_index()
    }

    /// 局面を評価する（手番側から見た値）
    ///
    /// 駒得が大きい局面は small ネットワークで評価し、
    /// その結果が拮抗していれば big ネットワークで評価し直す。
    pub fn evaluate(&mut self, pos: &Position) -> Value {
        stats::count_evaluate();

        let use_small = pos.simple_eval().abs() > SMALL_NET_THRESHOLD;
        let net = if use_small { NetSize::Small } else { NetSize::Big };
        let mut nnue = blend(self.evaluate_net(pos, net));
        if use_small && nnue.abs() < SMALL_NET_REEVAL_MARGIN {
            nnue = blend(self.evaluate_net(pos, NetSize::Big));
        }
        Value::new(nnue)
    }

    /// 指定ネットワークの出力
    pub fn evaluate_net(&mut self, pos: &Position, net: NetSize) -> NetworkOutput {
        let simd = self.simd;
        self.state_mut(net).evaluate(simd, pos)
    }

    /// 指定ネットワークの全バケットの出力
    pub fn trace(&mut self, pos: &Position, net: NetSize) -> NetworkTrace {
        let simd = self.simd;
        let state = self.state_mut(net);
        state.update(simd, pos);
        let acc = &state.stack.top().accumulator;
        state.network.trace(simd, acc, pos.side_to_move(), pos.count_all())
    }

    /// トップ局面のアキュムレータ（未計算の場合もある）
    pub fn accumulator(&self, net: NetSize) -> &Accumulator {
        &self.state(net).stack.top().accumulator
    }

    pub fn network(&self, net: NetSize) -> &Network {
        &self.state(net).network
    }

    fn state(&self, net: NetSize) -> &NetState {
        match net {
            NetSize::Big => &self.big,
            NetSize::Small => &self.small,
        }
    }

    fn state_mut(&mut self, net: NetSize) -> &mut NetState {
        match net {
            NetSize::Big => &mut self.big,
            NetSize::Small => &mut self.small,
        }
    }
}

/// PSQT 項と局面項の合成
#[inline]
fn blend(out: NetworkOutput) -> i32 {
    (125 * out.psqt + 131 * out.positional) / 128
}
