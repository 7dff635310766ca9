//! Criterion benchmarks for the per-segment training and decoding passes.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use acoustic_hmm::{
    Alignment, ContinuousState, GaussianMixture, Hmm, Observation, State, Topology,
};
use ndarray::Array2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

const DIMENSION: usize = 13;

fn model(states: usize, rng: &mut ChaCha8Rng) -> Hmm {
    let states: Vec<State> = (0..states)
        .map(|_| {
            ContinuousState::new(GaussianMixture::random(4, DIMENSION, 1.0, rng).unwrap()).into()
        })
        .collect();
    Hmm::with_topology(1, states, Topology::Bakis).unwrap()
}

fn segment(frames: usize, rng: &mut ChaCha8Rng) -> Observation {
    let normal = Normal::new(0.0, 1.0).unwrap();
    Observation::new(Array2::from_shape_fn((frames, DIMENSION), |_| {
        normal.sample(rng)
    }))
}

fn bench_increment_bw(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let mut group = c.benchmark_group("hmm/increment_bw");
    for frames in [100, 500] {
        let mut m = model(5, &mut rng);
        let obs = segment(frames, &mut rng);
        group.bench_with_input(BenchmarkId::from_parameter(frames), &obs, |b, obs| {
            b.iter(|| {
                m.init();
                black_box(m.increment_bw(black_box(obs)).unwrap());
                m.discard();
            })
        });
    }
    group.finish();
}

fn bench_viterbi(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(2);
    let mut group = c.benchmark_group("alignment/decode_forced");
    for frames in [100, 500] {
        let m = model(5, &mut rng);
        let obs = segment(frames, &mut rng);
        group.bench_with_input(BenchmarkId::from_parameter(frames), &obs, |b, obs| {
            b.iter(|| {
                let mut alignment = Alignment::new(&m, obs);
                black_box(alignment.decode(&m, true).unwrap());
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_increment_bw, bench_viterbi);
criterion_main!(benches);
