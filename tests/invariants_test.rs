use ndarray::arr1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rtrl_lstm::network::forward::forward_step;
use rtrl_lstm::sequence::{DenseInput, SparseInput};
use rtrl_lstm::{
    LSTMNetwork, NetworkOptions, Sequence, SequenceEncoder, TimeStep, TrainState, TrainingOptions,
    UpdateMode,
};

fn random_sequence(rng: &mut StdRng, num_inputs: usize, len: usize) -> Sequence<DenseInput> {
    Sequence::new(
        (0..len)
            .map(|_| {
                let input: Vec<f64> = (0..num_inputs).map(|_| rng.gen_range(-2.0..2.0)).collect();
                TimeStep::new(DenseInput(input), Some(arr1(&[rng.gen_range(0.0..1.0)])))
            })
            .collect(),
    )
}

#[test]
fn test_forward_is_deterministic_for_fixed_weights() {
    let options = NetworkOptions::new(3, 2, 2, 2, 1);
    let mut network = LSTMNetwork::new(options, 21).unwrap();
    let sequence = random_sequence(&mut StdRng::seed_from_u64(5), 3, 12);

    let first = network.predict(&sequence);
    let second = network.predict(&sequence);
    assert_eq!(first, second, "two runs over the same sequence must be bit-identical");
}

#[test]
fn test_softmax_outputs_sum_to_one_at_every_target_step() {
    let mut options = NetworkOptions::new(2, 1, 1, 2, 4);
    options.classification = true;
    let mut network = LSTMNetwork::new(options, 8).unwrap();

    let mut rng = StdRng::seed_from_u64(13);
    let sequence = Sequence::new(
        (0..20)
            .map(|i| {
                TimeStep::new(
                    DenseInput(vec![rng.gen_range(-5.0..5.0), rng.gen_range(-5.0..5.0)]),
                    Some(SequenceEncoder::target_one_hot(i % 4, 4)),
                )
            })
            .collect(),
    );

    for output in network.predict(&sequence) {
        assert!((output.sum() - 1.0).abs() < 1e-9);
        assert!(output.iter().all(|&p| p >= 0.0));
    }
}

#[test]
fn test_cell_value_ranges_for_any_input() {
    let mut options = NetworkOptions::new(2, 1, 3, 2, 1);
    options.init_range = 2.0;
    let network = LSTMNetwork::new(options.clone(), 99).unwrap();
    let mut state = TrainState::new(&network.layout);

    let mut rng = StdRng::seed_from_u64(4);
    for _ in 0..50 {
        let input = DenseInput(vec![rng.gen_range(-1e3..1e3), rng.gen_range(-1e3..1e3)]);
        forward_step(&options, &network.layout, &network.weights, &mut state, &input, true);
        for (u, cells) in state.g.iter().enumerate() {
            for (v, &g) in cells.iter().enumerate() {
                assert!((-2.0..=2.0).contains(&g), "G out of range: {}", g);
                let h = state.h[u][v];
                assert!((-1.0..=1.0).contains(&h), "H out of range: {}", h);
            }
        }
        state.commit_step();
    }
}

fn to_sparse(sequence: &Sequence<DenseInput>) -> Sequence<SparseInput> {
    Sequence::new(
        sequence
            .steps
            .iter()
            .map(|step| {
                let pairs: Vec<(usize, f64)> = step
                    .input
                    .0
                    .iter()
                    .enumerate()
                    .filter(|(_, &x)| x != 0.0)
                    .map(|(j, &x)| (j, x))
                    .collect();
                TimeStep::new(SparseInput(pairs), step.target.clone())
            })
            .collect(),
    )
}

/// The sparse path must agree with the dense path given the same nonzero
/// support: identical predictions and identical trained weights.
#[test]
fn test_sparse_path_matches_dense_path() {
    let options = NetworkOptions::new(4, 2, 2, 1, 1);
    let network = LSTMNetwork::new(options, 31).unwrap();

    // Inputs with plenty of exact zeros, as a sparse encoder would emit.
    let mut rng = StdRng::seed_from_u64(6);
    let dense: Sequence<DenseInput> = Sequence::new(
        (0..10)
            .map(|_| {
                let input: Vec<f64> = (0..4)
                    .map(|_| {
                        if rng.gen_bool(0.5) {
                            0.0
                        } else {
                            rng.gen_range(-1.0..1.0)
                        }
                    })
                    .collect();
                TimeStep::new(DenseInput(input), Some(arr1(&[rng.gen_range(0.0..1.0)])))
            })
            .collect(),
    );
    let sparse = to_sparse(&dense);

    let mut net_a = network.clone();
    let mut net_b = network.clone();
    assert_eq!(net_a.predict(&dense), net_b.predict(&sparse));

    // One epoch of online training down each path.
    let mut options = TrainingOptions::default();
    options.max_epochs = 1;
    options.update = UpdateMode::Online;
    options.momentum = 0.5;
    options.lambda = 0.001;

    let mut trainer_a =
        rtrl_lstm::create_basic_trainer(net_a, options.clone()).unwrap();
    trainer_a.train(std::slice::from_ref(&dense), std::slice::from_ref(&dense)).unwrap();
    let mut trainer_b =
        rtrl_lstm::create_basic_trainer(net_b, options).unwrap();
    trainer_b
        .train(std::slice::from_ref(&sparse), std::slice::from_ref(&sparse))
        .unwrap();

    assert_eq!(
        trainer_a.network.weights, trainer_b.network.weights,
        "dense and sparse training must produce the same weights"
    );
}
