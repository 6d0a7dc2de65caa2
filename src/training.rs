use std::time::Instant;

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::config::{NetworkOptions, TrainingOptions};
use crate::dropout::DropoutSampler;
use crate::error::TrainError;
use crate::layout::UnitLayout;
use crate::network::backward::{accumulate_deltas, update_traces};
use crate::network::forward::forward_step;
use crate::network::state::TrainState;
use crate::network::LSTMNetwork;
use crate::persistence;
use crate::sequence::{InputRep, Sequence};
use crate::updates::{apply, UpdateMode};

/// Scores a network over a collection of tested sequences; higher is
/// better. Injected by the surrounding pipeline, called once per validation
/// pass and once per genetic fitness evaluation.
pub trait FitnessEvaluator<I: InputRep>: Sync {
    fn fitness(&self, network: &mut LSTMNetwork, sequences: &[Sequence<I>]) -> f64;
}

impl<I: InputRep, E: FitnessEvaluator<I>> FitnessEvaluator<I> for &E {
    fn fitness(&self, network: &mut LSTMNetwork, sequences: &[Sequence<I>]) -> f64 {
        <E as FitnessEvaluator<I>>::fitness(*self, network, sequences)
    }
}

/// Default evaluator: negated mean squared error, so that higher is better.
pub struct MeanSquaredEvaluator;

impl<I: InputRep> FitnessEvaluator<I> for MeanSquaredEvaluator {
    fn fitness(&self, network: &mut LSTMNetwork, sequences: &[Sequence<I>]) -> f64 {
        -network.mean_squared_error(sequences)
    }
}

/// Per-epoch record exposed to external plotting/logging collaborators.
#[derive(Debug, Clone)]
pub struct TrainingMetrics {
    pub epoch: usize,
    pub train_error: f64,
    pub validation_fitness: Option<f64>,
    pub time_elapsed: f64,
}

/// Runs one training sequence: resets nothing itself, steps the forward
/// pass, traces, and delta accumulation, and applies updates when the mode
/// is online. Returns the summed squared output error and the number of
/// target entries it covered.
///
/// A non-finite activation or cell state aborts with `Diverged`, naming the
/// sequence and step.
pub(crate) fn train_sequence<I: InputRep>(
    net_options: &NetworkOptions,
    layout: &UnitLayout,
    train_options: &TrainingOptions,
    weights: &mut Array2<f64>,
    deltas: &mut Array2<f64>,
    state: &mut TrainState,
    sequence: &Sequence<I>,
    seq_index: usize,
) -> Result<(f64, usize), TrainError> {
    let alpha = train_options.learning_rate;
    let lambda = train_options.lambda;
    let mut error_sum = 0.0;
    let mut error_count = 0usize;

    for (step_index, step) in sequence.steps.iter().enumerate() {
        let wants_output = step.has_target();
        let output = forward_step(net_options, layout, weights, state, &step.input, wants_output);

        if let Some(detail) = state.finite_fault() {
            return Err(TrainError::Diverged {
                sequence: seq_index,
                step: step_index,
                detail,
            });
        }

        update_traces(layout, state, &step.input);

        if let Some(target) = step.target.as_ref().filter(|_| wants_output) {
            accumulate_deltas(layout, weights, state, &step.input, target, deltas, alpha, lambda);
            if let Some(output) = output {
                for (k, &t) in target.iter().enumerate() {
                    if !t.is_nan() {
                        let diff = t - output[k];
                        error_sum += diff * diff;
                        error_count += 1;
                    }
                }
            }
        }

        if train_options.update == UpdateMode::Online {
            apply(weights, deltas, train_options.momentum);
        }

        state.commit_step();
    }

    Ok((error_sum, error_count))
}

/// Tracks the best validation fitness, checkpoints the matching weights,
/// and counts the consecutive checks without improvement.
pub(crate) struct BestTracker {
    best_fitness: f64,
    best_weights: Option<Array2<f64>>,
    checks_since_best: usize,
    patience: usize,
}

impl BestTracker {
    pub(crate) fn new(patience: usize) -> Self {
        BestTracker {
            best_fitness: f64::NEG_INFINITY,
            best_weights: None,
            checks_since_best: 0,
            patience,
        }
    }

    /// Records one validation check; returns `true` when training should
    /// stop because the patience is exhausted.
    pub(crate) fn observe(
        &mut self,
        fitness: f64,
        weights: &Array2<f64>,
        checkpoint: Option<&std::path::Path>,
    ) -> Result<bool, TrainError> {
        if fitness > self.best_fitness {
            self.best_fitness = fitness;
            self.checks_since_best = 0;
            self.best_weights = Some(weights.clone());
            if let Some(path) = checkpoint {
                persistence::save_weights_text(weights, path)?;
            }
            Ok(false)
        } else {
            self.checks_since_best += 1;
            Ok(self.checks_since_best >= self.patience)
        }
    }

    pub(crate) fn best_fitness(&self) -> f64 {
        self.best_fitness
    }

    /// The weights to return from training: the best checkpoint, reloaded
    /// from durable storage when one was configured, never the final
    /// in-flight matrix.
    pub(crate) fn into_best(
        self,
        layout: &UnitLayout,
        checkpoint: Option<&std::path::Path>,
    ) -> Result<Option<Array2<f64>>, TrainError> {
        if self.best_weights.is_none() {
            return Ok(None);
        }
        match checkpoint {
            Some(path) => Ok(Some(persistence::load_weights_text(path, layout)?)),
            None => Ok(self.best_weights),
        }
    }
}

/// Epoch-loop trainer: iterates training sequences, validates at the
/// configured cadence through the injected evaluator, checkpoints the best
/// weight matrix, and stops once validation has not improved for
/// `max_epochs_after_max` consecutive checks. On return the network carries
/// the best checkpointed weights, not the final in-flight ones.
pub struct LSTMTrainer<E> {
    pub network: LSTMNetwork,
    pub evaluator: E,
    pub options: TrainingOptions,
    pub metrics_history: Vec<TrainingMetrics>,
}

impl<E> LSTMTrainer<E> {
    pub fn new(
        network: LSTMNetwork,
        evaluator: E,
        options: TrainingOptions,
    ) -> Result<LSTMTrainer<E>, TrainError> {
        options.validate()?;
        Ok(LSTMTrainer {
            network,
            evaluator,
            options,
            metrics_history: Vec::new(),
        })
    }

    pub fn train<I: InputRep>(
        &mut self,
        train_data: &[Sequence<I>],
        validation_data: &[Sequence<I>],
    ) -> Result<(), TrainError>
    where
        E: FitnessEvaluator<I>,
    {
        let sampler = DropoutSampler::new(self.network.options.dropout);
        let mut rng = StdRng::seed_from_u64(self.options.seed);
        let mut state = TrainState::new(&self.network.layout);
        let mut deltas =
            Array2::zeros((self.network.layout.num_all, self.network.layout.num_all));

        let mut tracker = BestTracker::new(self.options.max_epochs_after_max);

        for epoch in 0..self.options.max_epochs {
            let started = Instant::now();
            let mut error_sum = 0.0;
            let mut error_count = 0usize;

            for (i, sequence) in train_data.iter().enumerate() {
                state.reset_sequence();
                sampler.draw(&mut rng, &mut state.mask);

                let (sum, count) = train_sequence(
                    &self.network.options,
                    &self.network.layout,
                    &self.options,
                    &mut self.network.weights,
                    &mut deltas,
                    &mut state,
                    sequence,
                    i,
                )?;
                error_sum += sum;
                error_count += count;

                if let UpdateMode::MiniBatch(batch) = self.options.update {
                    if (i + 1) % batch == 0 || i + 1 == train_data.len() {
                        apply(&mut self.network.weights, &mut deltas, self.options.momentum);
                    }
                }
            }

            let train_error = if error_count > 0 {
                error_sum / error_count as f64
            } else {
                0.0
            };

            let validate_now = (epoch + 1) % self.options.validate_every == 0;
            let validation_fitness = if validate_now {
                Some(self.evaluator.fitness(&mut self.network, validation_data))
            } else {
                None
            };

            self.metrics_history.push(TrainingMetrics {
                epoch,
                train_error,
                validation_fitness,
                time_elapsed: started.elapsed().as_secs_f64(),
            });

            // The epoch error is always reported before the stop decision.
            info!(epoch, train_error, "epoch complete");

            if let Some(fitness) = validation_fitness {
                let stop = tracker.observe(
                    fitness,
                    &self.network.weights,
                    self.options.checkpoint_path.as_deref(),
                )?;
                if stop {
                    info!(epoch, best = tracker.best_fitness(), "validation stopped improving");
                    break;
                }
                debug!(epoch, fitness, "validation check recorded");
            }
        }

        if let Some(best) = tracker.into_best(
            &self.network.layout,
            self.options.checkpoint_path.as_deref(),
        )? {
            self.network.weights = best;
        }

        Ok(())
    }

    pub fn predict<I: InputRep>(&mut self, sequence: &Sequence<I>) -> Vec<ndarray::Array1<f64>> {
        self.network.predict(sequence)
    }

    pub fn latest_metrics(&self) -> Option<&TrainingMetrics> {
        self.metrics_history.last()
    }

    pub fn metrics_history(&self) -> &[TrainingMetrics] {
        &self.metrics_history
    }
}

/// A trainer with the default negated-MSE evaluator.
pub fn create_basic_trainer(
    network: LSTMNetwork,
    options: TrainingOptions,
) -> Result<LSTMTrainer<MeanSquaredEvaluator>, TrainError> {
    LSTMTrainer::new(network, MeanSquaredEvaluator, options)
}
