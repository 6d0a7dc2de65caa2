use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Instant;

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::config::{NetworkOptions, TrainingOptions};
use crate::dropout::DropoutSampler;
use crate::error::TrainError;
use crate::layout::UnitLayout;
use crate::network::backward::{accumulate_deltas, update_traces};
use crate::network::forward::forward_step;
use crate::network::state::TrainState;
use crate::network::LSTMNetwork;
use crate::sequence::{InputRep, Sequence};
use crate::training::{BestTracker, FitnessEvaluator, TrainingMetrics};
use crate::updates::apply;

/// The one weight/delta matrix pair all workers of a network share. The
/// apply step is the only synchronized section; workers read through a
/// private snapshot refreshed inside each apply.
struct SharedParams {
    weights: Array2<f64>,
    deltas: Array2<f64>,
}

struct SharedState {
    params: Mutex<SharedParams>,
    cancelled: AtomicBool,
}

/// Multi-threaded trainer: the training-sequence range is split into
/// contiguous, disjoint sub-ranges, one per worker. Each worker owns its
/// activation and trace buffers; the weight and delta matrices are shared
/// and mutated only inside the locked apply.
///
/// The end-of-epoch parameter state is a non-deterministic interleaving of
/// partial updates from different sequences. That is the intended
/// approximate parallelism, not a defect.
pub struct ParallelTrainer<E> {
    pub network: LSTMNetwork,
    pub evaluator: E,
    pub options: TrainingOptions,
    pub metrics_history: Vec<TrainingMetrics>,
}

impl<E> ParallelTrainer<E> {
    pub fn new(
        network: LSTMNetwork,
        evaluator: E,
        options: TrainingOptions,
    ) -> Result<ParallelTrainer<E>, TrainError> {
        options.validate()?;
        Ok(ParallelTrainer {
            network,
            evaluator,
            options,
            metrics_history: Vec::new(),
        })
    }

    fn pool_size(&self) -> usize {
        if self.options.num_workers > 0 {
            self.options.num_workers
        } else {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        }
    }

    pub fn train<I: InputRep + Sync>(
        &mut self,
        train_data: &[Sequence<I>],
        validation_data: &[Sequence<I>],
    ) -> Result<(), TrainError>
    where
        E: FitnessEvaluator<I>,
    {
        let num_workers = self.pool_size().min(train_data.len().max(1));
        let chunk_size = (train_data.len() + num_workers - 1) / num_workers.max(1);
        let num_all = self.network.layout.num_all;

        let shared = SharedState {
            params: Mutex::new(SharedParams {
                weights: self.network.weights.clone(),
                deltas: Array2::zeros((num_all, num_all)),
            }),
            cancelled: AtomicBool::new(false),
        };

        let mut tracker = BestTracker::new(self.options.max_epochs_after_max);

        for epoch in 0..self.options.max_epochs {
            let started = Instant::now();
            shared.cancelled.store(false, Ordering::Relaxed);

            let net_options = &self.network.options;
            let layout = &self.network.layout;
            let train_options = &self.options;
            let shared_ref = &shared;
            let epoch_seed = self
                .options
                .seed
                .wrapping_add((epoch as u64).wrapping_mul(0x9e37_79b9));

            let results: Vec<Result<(f64, usize), String>> = thread::scope(|scope| {
                let handles: Vec<_> = train_data
                    .chunks(chunk_size.max(1))
                    .enumerate()
                    .map(|(w, chunk)| {
                        let base = w * chunk_size.max(1);
                        scope.spawn(move || {
                            run_worker(
                                net_options,
                                layout,
                                train_options,
                                shared_ref,
                                chunk,
                                base,
                                epoch_seed.wrapping_add(w as u64),
                            )
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| {
                        h.join()
                            .unwrap_or_else(|_| Err("worker thread panicked".to_string()))
                    })
                    .collect()
            });

            let mut failures = Vec::new();
            let mut error_sum = 0.0;
            let mut error_count = 0usize;
            for result in results {
                match result {
                    Ok((sum, count)) => {
                        error_sum += sum;
                        error_count += count;
                    }
                    Err(detail) => failures.push(detail),
                }
            }
            if !failures.is_empty() {
                return Err(TrainError::Workers(failures));
            }

            let train_error = if error_count > 0 {
                error_sum / error_count as f64
            } else {
                0.0
            };

            // Pull the shared matrix into the owning network for validation
            // and checkpointing.
            {
                let params = shared
                    .params
                    .lock()
                    .map_err(|_| TrainError::Workers(vec!["apply lock poisoned".to_string()]))?;
                self.network.weights.assign(&params.weights);
            }

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

            info!(epoch, train_error, workers = num_workers, "epoch complete");

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

    pub fn latest_metrics(&self) -> Option<&TrainingMetrics> {
        self.metrics_history.last()
    }
}

/// One worker: trains its contiguous sub-range of sequences against a
/// private weight snapshot, contributing per-step deltas to the shared pair
/// inside the locked apply. Failures set the cancellation flag, which the
/// other workers check between sequences, and are reported as strings for
/// aggregation.
fn run_worker<I: InputRep>(
    net_options: &NetworkOptions,
    layout: &UnitLayout,
    train_options: &TrainingOptions,
    shared: &SharedState,
    sequences: &[Sequence<I>],
    base_index: usize,
    seed: u64,
) -> Result<(f64, usize), String> {
    let sampler = DropoutSampler::new(net_options.dropout);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut state = TrainState::new(layout);
    let num_all = layout.num_all;
    let mut step_deltas = Array2::zeros((num_all, num_all));

    let mut local_weights = {
        let params = shared.params.lock().map_err(|_| "apply lock poisoned".to_string())?;
        params.weights.clone()
    };

    let mut error_sum = 0.0;
    let mut error_count = 0usize;

    for (offset, sequence) in sequences.iter().enumerate() {
        if shared.cancelled.load(Ordering::Relaxed) {
            break;
        }
        state.reset_sequence();
        sampler.draw(&mut rng, &mut state.mask);

        for (step_index, step) in sequence.steps.iter().enumerate() {
            let wants_output = step.has_target();
            let output = forward_step(
                net_options,
                layout,
                &local_weights,
                &mut state,
                &step.input,
                wants_output,
            );

            if let Some(detail) = state.finite_fault() {
                shared.cancelled.store(true, Ordering::Relaxed);
                return Err(TrainError::Diverged {
                    sequence: base_index + offset,
                    step: step_index,
                    detail,
                }
                .to_string());
            }

            update_traces(layout, &mut state, &step.input);

            if let Some(target) = step.target.as_ref().filter(|_| wants_output) {
                step_deltas.fill(0.0);
                accumulate_deltas(
                    layout,
                    &local_weights,
                    &state,
                    &step.input,
                    target,
                    &mut step_deltas,
                    train_options.learning_rate,
                    train_options.lambda,
                );
                if let Some(output) = output {
                    for (k, &t) in target.iter().enumerate() {
                        if !t.is_nan() {
                            let diff = t - output[k];
                            error_sum += diff * diff;
                            error_count += 1;
                        }
                    }
                }

                // The only synchronized section: fold this step's
                // contribution in, apply, and refresh the snapshot.
                let mut params =
                    shared.params.lock().map_err(|_| "apply lock poisoned".to_string())?;
                params.deltas += &step_deltas;
                let SharedParams { weights, deltas } = &mut *params;
                apply(weights, deltas, train_options.momentum);
                local_weights.assign(&params.weights);
            }

            state.commit_step();
        }
    }

    Ok((error_sum, error_count))
}
