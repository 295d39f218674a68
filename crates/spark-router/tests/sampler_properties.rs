//! AliasSampler 的性质验证。
//!
//! - 任意非负权重构造出的别名表都满足概率/别名下标的取值约束；
//! - 由别名表反推的每一项概率质量与归一化权重一致，即采样分布精确等于输入分布；
//! - 零权重项永远不会被抽中（只要存在正权重）。

use proptest::prelude::*;
use rand::{SeedableRng, rngs::StdRng};
use spark_router::AliasSampler;

/// 别名表中第 `i` 项的总质量：自身保留的部分加上其他列借给它的部分。
fn reconstructed_mass(sampler: &AliasSampler) -> Vec<f64> {
    let n = sampler.len() as f64;
    let mut mass = vec![0.0; sampler.len()];
    for (index, (&p, &alias)) in sampler
        .probabilities()
        .iter()
        .zip(sampler.aliases())
        .enumerate()
    {
        mass[index] += p / n;
        mass[alias] += (1.0 - p) / n;
    }
    mass
}

fn weights() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(prop_oneof![Just(0.0), 0.001f64..1_000.0], 1..64)
}

proptest! {
    #[test]
    fn table_entries_stay_in_range(weights in weights()) {
        let sampler = AliasSampler::from_weights(&weights).unwrap();
        prop_assert_eq!(sampler.len(), weights.len());
        for (&p, &alias) in sampler.probabilities().iter().zip(sampler.aliases()) {
            prop_assert!((0.0..=1.0).contains(&p));
            prop_assert!(alias < sampler.len());
        }
    }

    #[test]
    fn table_encodes_the_normalized_weights(weights in weights()) {
        let sampler = AliasSampler::from_weights(&weights).unwrap();
        let sum: f64 = weights.iter().sum();
        let n = weights.len() as f64;
        for (index, mass) in reconstructed_mass(&sampler).into_iter().enumerate() {
            let expected = if sum == 0.0 { 1.0 / n } else { weights[index] / sum };
            prop_assert!(
                (mass - expected).abs() < 1e-9,
                "index {}: mass {} expected {}", index, mass, expected
            );
        }
    }

    #[test]
    fn zero_weight_entries_are_never_sampled(weights in weights(), seed in any::<u64>()) {
        prop_assume!(weights.iter().any(|w| *w > 0.0));
        let sampler = AliasSampler::from_weights(&weights).unwrap();
        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..256 {
            let index = sampler.sample(&mut rng);
            prop_assert!(weights[index] > 0.0, "drew zero-weight index {}", index);
        }
    }
}
