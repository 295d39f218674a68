use criterion::{BenchmarkId, Criterion};
use rand::{SeedableRng, rngs::StdRng};
use spark_router::AliasSampler;
use std::{env, hint::black_box, time::Duration};

/// 别名采样器的构造与抽样成本。
///
/// # 设计背景（Why）
/// - 构造发生在名字树重建时，预期随分支数线性增长；
/// - 抽样发生在每次派发时，预期与分支数无关。
fn bench_alias_sampler(c: &mut Criterion) {
    let mut group = c.benchmark_group("alias_sampler");
    for size in [4usize, 64, 1024] {
        let weights: Vec<f64> = (1..=size).map(|i| i as f64).collect();
        group.bench_with_input(BenchmarkId::new("build", size), &weights, |b, weights| {
            b.iter(|| AliasSampler::from_weights(black_box(weights)).unwrap());
        });

        let sampler = AliasSampler::from_weights(&weights).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        group.bench_with_input(BenchmarkId::new("sample", size), &sampler, |b, sampler| {
            b.iter(|| black_box(sampler.sample(&mut rng)));
        });
    }
    group.finish();
}

fn main() {
    let quick_mode = env::args().skip(1).any(|arg| arg == "--quick");

    let mut criterion = Criterion::default();
    if quick_mode {
        criterion = criterion
            .sample_size(10)
            .warm_up_time(Duration::from_millis(100))
            .measurement_time(Duration::from_millis(250));
    }

    bench_alias_sampler(&mut criterion);
    criterion.final_summary();
}
