//! 決定的な乱数ネットワークの生成
//!
//! 学習済みの重みを持たないテスト・ベンチマーク・ツール用。
//! 同じ形状とシードからは常に同じネットワーク（同じファイル）が得られる。

use super::constants::LAYER_STACKS;
use super::feature_transformer::FeatureTransformer;
use super::layer_stacks::LayerStack;
use super::layers::{AffineTransform, AffineTransformSparseInput};
use super::network::{Architecture, Network};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

impl Network {
    /// 乱数で初期化したネットワーク
    ///
    /// 重みは小さな範囲に収めてあり、アキュムレータがクランプ範囲を大きく超えない。
    pub fn random(arch: Architecture, seed: u64) -> Self {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let feature_transformer = random_feature_transformer(&mut rng, arch);
        let layer_stacks: Vec<LayerStack> =
            (0..LAYER_STACKS).map(|_| random_layer_stack(&mut rng, arch)).collect();
        let description = format!("random {} network (seed {seed})", arch.name());
        Network::from_parts(arch, description, feature_transformer, layer_stacks)
    }
}

fn random_feature_transformer(
    rng: &mut Xoshiro256PlusPlus,
    arch: Architecture,
) -> FeatureTransformer {
    let mut ft = FeatureTransformer::new_zeroed(arch.l1(), arch.has_threats());
    // 利き特徴量のないネットワークはロード時に2倍されるので、ここで2倍した値を置く
    let scale: i16 = if arch.has_threats() { 1 } else { 2 };
    let raw = ft.params_mut();
    for v in raw.biases.iter_mut() {
        *v = rng.random_range(0..=48) * scale;
    }
    for v in raw.weights.iter_mut() {
        *v = rng.random_range(-12..=12) * scale;
    }
    for v in raw.threat_weights.iter_mut() {
        *v = rng.random_range(-6..=6);
    }
    for v in raw.psqt_weights.iter_mut() {
        *v = rng.random_range(-1200..=1200);
    }
    for v in raw.threat_psqt_weights.iter_mut() {
        *v = rng.random_range(-200..=200);
    }
    ft.permute();
    ft
}

fn random_layer(
    rng: &mut Xoshiro256PlusPlus,
    input_dims: usize,
    output_dims: usize,
) -> (Vec<i32>, Vec<i8>) {
    let biases = (0..output_dims).map(|_| rng.random_range(-2048..=2048)).collect();
    let weights = (0..input_dims * output_dims).map(|_| rng.random_range(-24..=24)).collect();
    (biases, weights)
}

fn random_layer_stack(rng: &mut Xoshiro256PlusPlus, arch: Architecture) -> LayerStack {
    let (l1, l2, l3) = (arch.l1(), arch.l2(), arch.l3());
    let (b0, w0) = random_layer(rng, l1, l2 + 1);
    let (b1, w1) = random_layer(rng, l2 * 2, l3);
    let (b2, w2) = random_layer(rng, l3, 1);
    LayerStack::from_layers(
        AffineTransformSparseInput::from_row_major(l1, l2 + 1, &b0, &w0),
        AffineTransform::from_row_major(l2 * 2, l3, &b1, &w1),
        AffineTransform::from_row_major(l3, 1, &b2, &w2),
    )
}
