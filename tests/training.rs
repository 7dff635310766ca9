use std::io::Cursor;
use std::sync::Arc;

use acoustic_hmm::{
    Alignment, Codebook, CodebookTable, ContinuousState, Density, GaussianMixture, Hmm,
    Observation, SharedState, State, Topology, Trainer, TrainingAlgorithm, TrainingConfig,
};
use approx::assert_relative_eq;
use ndarray::{array, Array2};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

/// Segments whose first half is drawn around -3 and second half around +3.
fn two_region_data(segments: usize, frames: usize, rng: &mut ChaCha8Rng) -> Vec<Observation> {
    let low = Normal::new(-3.0, 1.0).unwrap();
    let high = Normal::new(3.0, 1.0).unwrap();
    (0..segments)
        .map(|_| {
            let values = Array2::from_shape_fn((frames, 1), |(t, _)| {
                if t < frames / 2 {
                    low.sample(rng)
                } else {
                    high.sample(rng)
                }
            });
            Observation::new(values)
        })
        .collect()
}

fn tied_model(codebook: &Arc<Codebook<GaussianMixture>>) -> Hmm {
    let states: Vec<State> = (0..2)
        .map(|_| SharedState::uniform(codebook.clone()).unwrap().into())
        .collect();
    Hmm::with_topology(1, states, Topology::Linear)
        .unwrap()
        .with_tag("tied")
}

fn spread_codebook() -> Arc<Codebook<GaussianMixture>> {
    let mixture = GaussianMixture::new(
        array![0.5, 0.5],
        array![[-1.0], [1.0]],
        array![[4.0], [4.0]],
    )
    .unwrap();
    Codebook::shared(21, mixture)
}

#[test]
fn tied_mixture_training_learns_both_regions() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let data = two_region_data(6, 40, &mut rng);
    let codebook = spread_codebook();
    let mut model = tied_model(&codebook);

    let trainer = Trainer::new(TrainingConfig::new().with_max_iterations(15)).unwrap();
    let report = trainer.train(&mut model, &data).unwrap();

    for pair in report.log_likelihoods.windows(2) {
        assert!(pair[1] >= pair[0] - 1e-6, "{:?}", pair);
    }
    assert!(!codebook.is_wired().unwrap());

    let density = codebook.density().unwrap();
    let mut means: Vec<f64> = density.means().column(0).to_vec();
    means.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert!((means[0] + 3.0).abs() < 0.5, "{:?}", means);
    assert!((means[1] - 3.0).abs() < 0.5, "{:?}", means);
    drop(density);

    // each state puts most of its weight on one component, and not the same one
    let favourite = |state: &State| {
        let State::Shared(s) = state else {
            panic!("expected shared state");
        };
        assert_relative_eq!(s.weights().sum(), 1.0, epsilon = 1e-9);
        if s.weights()[0] > s.weights()[1] {
            0
        } else {
            1
        }
    };
    assert_ne!(favourite(&model.states()[0]), favourite(&model.states()[1]));
}

#[test]
fn sharded_tied_training_matches_serial() {
    let mut rng = ChaCha8Rng::seed_from_u64(99);
    let data = two_region_data(4, 20, &mut rng);
    let shards = vec![data[..2].to_vec(), data[2..].to_vec()];
    let trainer = Trainer::new(
        TrainingConfig::new()
            .with_max_iterations(3)
            .with_tolerance(0.0),
    )
    .unwrap();

    let serial_book = spread_codebook();
    let mut serial = tied_model(&serial_book);
    trainer.train(&mut serial, &data).unwrap();

    let sharded_book = spread_codebook();
    let mut sharded = tied_model(&sharded_book);
    trainer.train_sharded(&mut sharded, &shards).unwrap();

    let a = serial_book.density().unwrap();
    let b = sharded_book.density().unwrap();
    for (x, y) in a.means().iter().zip(b.means()) {
        assert_relative_eq!(x, y, epsilon = 1e-9);
    }
    for (x, y) in a.weights().iter().zip(b.weights().iter()) {
        assert_relative_eq!(x, y, epsilon = 1e-9);
    }
    for (x, y) in serial.transitions().iter().zip(sharded.transitions()) {
        assert_relative_eq!(x, y, epsilon = 1e-9);
    }
}

#[test]
fn continuous_viterbi_training_then_decoding() {
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let data = two_region_data(5, 30, &mut rng);
    let states: Vec<State> = vec![
        ContinuousState::new(GaussianMixture::single(&[-0.5])).into(),
        ContinuousState::new(GaussianMixture::single(&[0.5])).into(),
    ];
    let mut model = Hmm::with_topology(2, states, Topology::Linear).unwrap();

    let trainer = Trainer::new(
        TrainingConfig::new()
            .with_algorithm(TrainingAlgorithm::Viterbi)
            .with_max_iterations(10),
    )
    .unwrap();
    trainer.bootstrap_viterbi(&mut model, &data).unwrap();
    let report = trainer.train(&mut model, &data).unwrap();
    assert!(report.final_log_likelihood().unwrap().is_finite());

    let mut alignment = Alignment::new(&model, &data[0]);
    alignment.decode(&model, true).unwrap();
    let counts = alignment.state_counts();
    assert_eq!(counts.iter().sum::<usize>(), 30);
    // the boundary lands near the middle of the segment
    assert!((counts[0] as i64 - 15).abs() <= 3, "{:?}", counts);
}

#[test]
fn trained_model_survives_persistence() {
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    let data = two_region_data(3, 20, &mut rng);
    let codebook = spread_codebook();
    let mut model = tied_model(&codebook);
    let trainer = Trainer::new(TrainingConfig::new().with_max_iterations(4)).unwrap();
    trainer.train(&mut model, &data).unwrap();

    let mut bytes = Vec::new();
    model.write_to(&mut bytes).unwrap();
    let table: CodebookTable<GaussianMixture> = [codebook.clone()].into_iter().collect();
    let loaded = Hmm::<GaussianMixture>::read_from(&mut Cursor::new(bytes), &table).unwrap();

    assert_eq!(loaded.id(), model.id());
    assert_eq!(loaded.codebooks().len(), 1);
    // entry and transition probabilities lose precision as float32
    let original = model.log_likelihood(&data[0]).unwrap();
    let restored = loaded.log_likelihood(&data[0]).unwrap();
    assert_relative_eq!(original, restored, max_relative = 1e-5);
}
