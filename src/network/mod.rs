pub mod backward;
pub mod forward;
pub mod state;

use ndarray::{Array1, Array2};
use ndarray_rand::rand_distr::{Normal, Uniform};
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::NetworkOptions;
use crate::dropout::{scale_block_weights, EVAL_RESTORE, EVAL_SCALE};
use crate::error::TrainError;
use crate::layout::UnitLayout;
use crate::network::forward::forward_step;
use crate::network::state::TrainState;
use crate::sequence::{InputRep, Sequence};

/// A gated recurrent network over one monolithic unit index space, owning
/// its square weight matrix `W[target][source]`.
///
/// The matrix is created once (randomly or loaded), mutated in place for the
/// lifetime of training, and addressed exclusively through the layout.
#[derive(Debug, Clone)]
pub struct LSTMNetwork {
    pub options: NetworkOptions,
    pub layout: UnitLayout,
    pub weights: Array2<f64>,
}

impl LSTMNetwork {
    /// Creates a network with randomly initialized weights: gaussian with
    /// standard deviation `gauss_range` when positive, uniform within
    /// `±init_range` otherwise.
    pub fn new(options: NetworkOptions, seed: u64) -> Result<LSTMNetwork, TrainError> {
        let layout = UnitLayout::new(&options)?;
        let mut rng = StdRng::seed_from_u64(seed);
        let dim = (layout.num_all, layout.num_all);

        let weights = if options.gauss_range > 0.0 {
            let dist = Normal::new(0.0, options.gauss_range)
                .map_err(|e| TrainError::Configuration(format!("gaussRange: {}", e)))?;
            Array2::random_using(dim, dist, &mut rng)
        } else {
            let dist = Uniform::new(-options.init_range, options.init_range);
            Array2::random_using(dim, dist, &mut rng)
        };

        Ok(LSTMNetwork {
            options,
            layout,
            weights,
        })
    }

    /// Wraps an existing weight matrix, e.g. one loaded from a file or bred
    /// by the genetic refiner. The matrix must match the derived layout.
    pub fn from_weights(
        options: NetworkOptions,
        weights: Array2<f64>,
    ) -> Result<LSTMNetwork, TrainError> {
        let layout = UnitLayout::new(&options)?;
        layout.check_matrix(&weights)?;
        Ok(LSTMNetwork {
            options,
            layout,
            weights,
        })
    }

    pub fn num_units(&self) -> usize {
        self.layout.num_all
    }

    /// Per-step output vectors for a whole sequence.
    ///
    /// When dropout is configured, evaluation substitutes weight rescaling
    /// for masking: block-touching weights are halved for the pass and
    /// restored (exactly) afterwards.
    pub fn predict<I: InputRep>(&mut self, sequence: &Sequence<I>) -> Vec<Array1<f64>> {
        let rescale = self.options.dropout;
        if rescale {
            scale_block_weights(&mut self.weights, &self.layout, EVAL_SCALE);
        }

        let mut state = TrainState::new(&self.layout);
        let mut outputs = Vec::with_capacity(sequence.len());
        for step in &sequence.steps {
            if let Some(out) = forward_step(
                &self.options,
                &self.layout,
                &self.weights,
                &mut state,
                &step.input,
                true,
            ) {
                outputs.push(out);
            }
            state.commit_step();
        }

        if rescale {
            scale_block_weights(&mut self.weights, &self.layout, EVAL_RESTORE);
        }
        outputs
    }

    /// Mean squared error of the network's predictions over a collection of
    /// sequences, counting only non-missing target entries.
    pub fn mean_squared_error<I: InputRep>(&mut self, sequences: &[Sequence<I>]) -> f64 {
        let mut total = 0.0;
        let mut count = 0usize;
        for sequence in sequences {
            let outputs = self.predict(sequence);
            for (step, output) in sequence.steps.iter().zip(&outputs) {
                if let Some(target) = &step.target {
                    for (k, &t) in target.iter().enumerate() {
                        if !t.is_nan() {
                            let diff = t - output[k];
                            total += diff * diff;
                            count += 1;
                        }
                    }
                }
            }
        }
        if count > 0 {
            total / count as f64
        } else {
            0.0
        }
    }
}
