use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array2;
use ndarray_rand::rand_distr::{Normal, Uniform};
use ndarray_rand::RandomExt;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use triangle_kmeans::{
    generate_clustered_points, generate_points, Algorithm, ClusterEngine, Dataset, Euclidean,
    KMeansConfig, Parallelism,
};

fn bench_strategies(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let uniform = Dataset::new(generate_points(20_000, 8, &mut rng));
    let truth = Array2::random_using((16, 8), Uniform::new(0.0, 100.0), &mut rng);
    let blobs = Dataset::new(generate_clustered_points(
        1_250,
        &truth,
        &Normal::new(0.0, 2.0).expect("valid normal"),
        &mut rng,
    ));

    let mut group = c.benchmark_group("kmeans_20k_8d_k16");
    group.sample_size(10);
    for (label, data) in [("uniform", &uniform), ("blobs", &blobs)] {
        for algorithm in [Algorithm::Lloyd, Algorithm::Hamerly, Algorithm::Elkan] {
            let config = KMeansConfig {
                k: 16,
                max_iter: 100,
                algorithm,
                parallelism: Parallelism::Global,
                ..KMeansConfig::default()
            };
            let engine = ClusterEngine::new(config, Euclidean::default());
            group.bench_with_input(BenchmarkId::new(algorithm.to_string(), label), data, |b, data| {
                b.iter(|| engine.cluster(data, None).expect("bench run"));
            });
        }
    }
    group.finish();
}

fn bench_parallelism(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let data = Dataset::new(generate_points(50_000, 4, &mut rng));

    let mut group = c.benchmark_group("hamerly_50k_4d_k32");
    group.sample_size(10);
    for parallelism in [Parallelism::Serial, Parallelism::Global] {
        let config = KMeansConfig {
            k: 32,
            max_iter: 50,
            parallelism,
            ..KMeansConfig::default()
        };
        let engine = ClusterEngine::new(config, Euclidean::with_norm_cache());
        group.bench_function(parallelism.to_string(), |b| {
            b.iter(|| engine.cluster(&data, None).expect("bench run"));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_strategies, bench_parallelism);
criterion_main!(benches);
