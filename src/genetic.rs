use std::thread;

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::config::{GeneticOptions, NetworkOptions, TrainingOptions};
use crate::error::TrainError;
use crate::network::LSTMNetwork;
use crate::sequence::{InputRep, Sequence};
use crate::training::{FitnessEvaluator, LSTMTrainer};

/// One individual: an owned weight matrix and its last measured fitness.
/// Sub-population membership is positional (index modulo the
/// sub-population count), not stored on the member.
#[derive(Debug, Clone)]
pub struct PopulationMember {
    pub weights: Array2<f64>,
    pub fitness: f64,
}

/// Population-based refiner over raw weight matrices, used to escape local
/// minima that gradient training alone gets stuck in.
///
/// Per generation: every individual's fitness is measured by loading its
/// matrix into a network and scoring it over the validation set with the
/// injected evaluator (fanned out across worker threads, joined at the
/// generation boundary); the best individual of each sub-population wins a
/// tournament, is retrained with gradient descent for a short fixed number
/// of epochs, and survives; the rest of the next generation is bred from
/// the survivors by column crossover and multiplicative mutation.
pub struct GeneticRefiner<E> {
    pub net_options: NetworkOptions,
    pub train_options: TrainingOptions,
    pub options: GeneticOptions,
    pub evaluator: E,
}

impl<E> GeneticRefiner<E> {
    pub fn new(
        net_options: NetworkOptions,
        train_options: TrainingOptions,
        options: GeneticOptions,
        evaluator: E,
    ) -> Result<GeneticRefiner<E>, TrainError> {
        net_options.validate()?;
        train_options.validate()?;
        options.validate()?;
        Ok(GeneticRefiner {
            net_options,
            train_options,
            options,
            evaluator,
        })
    }

    /// Runs generations until the global best fitness has not improved for
    /// `max_generations_after_max` generations or `max_iterations` is
    /// reached, and returns a network carrying the best weights seen.
    pub fn refine<I: InputRep + Sync>(
        &mut self,
        train_data: &[Sequence<I>],
        validation_data: &[Sequence<I>],
    ) -> Result<LSTMNetwork, TrainError>
    where
        E: FitnessEvaluator<I>,
    {
        let mut rng = StdRng::seed_from_u64(self.train_options.seed);
        let mut population = self.initial_population()?;

        let mut best_weights: Option<Array2<f64>> = None;
        let mut best_fitness = f64::NEG_INFINITY;
        let mut generations_since_best = 0usize;

        for generation in 0..self.options.max_iterations {
            self.evaluate_population(&mut population, validation_data)?;

            let generation_best = population
                .iter()
                .map(|m| m.fitness)
                .fold(f64::NEG_INFINITY, f64::max);
            info!(generation, generation_best, "generation evaluated");

            if generation_best > best_fitness {
                best_fitness = generation_best;
                generations_since_best = 0;
                if let Some(champion) = population
                    .iter()
                    .max_by(|a, b| a.fitness.total_cmp(&b.fitness))
                {
                    best_weights = Some(champion.weights.clone());
                }
            } else {
                generations_since_best += 1;
                if generations_since_best >= self.options.max_generations_after_max {
                    info!(generation, best_fitness, "fitness stopped improving");
                    break;
                }
            }

            // Tournament per sub-population, never global.
            let mut survivors = self.select_survivors(&population);
            for survivor in &mut survivors {
                self.retrain(survivor, train_data, validation_data)?;
            }

            population = self.breed(&survivors, &mut rng);
        }

        let weights = best_weights.ok_or_else(|| {
            TrainError::Configuration("refinement produced no evaluated individual".to_string())
        })?;
        LSTMNetwork::from_weights(self.net_options.clone(), weights)
    }

    fn initial_population(&self) -> Result<Vec<PopulationMember>, TrainError> {
        (0..self.options.initial_population_size)
            .map(|i| {
                let network = LSTMNetwork::new(
                    self.net_options.clone(),
                    self.train_options.seed.wrapping_add(i as u64),
                )?;
                Ok(PopulationMember {
                    weights: network.weights,
                    fitness: f64::NEG_INFINITY,
                })
            })
            .collect()
    }

    /// Measures every member's fitness, fanning the evaluations out across
    /// a fixed pool of scoped workers joined here, at the generation
    /// boundary. Workers are independent, so a failure cancels nothing
    /// mid-flight; all failures are aggregated.
    fn evaluate_population<I: InputRep + Sync>(
        &self,
        population: &mut [PopulationMember],
        validation_data: &[Sequence<I>],
    ) -> Result<(), TrainError>
    where
        E: FitnessEvaluator<I>,
    {
        let pool = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(population.len().max(1));
        let chunk_size = (population.len() + pool - 1) / pool;

        let net_options = &self.net_options;
        let evaluator = &self.evaluator;

        let results: Vec<Result<(), String>> = thread::scope(|scope| {
            let handles: Vec<_> = population
                .chunks_mut(chunk_size.max(1))
                .map(|chunk| {
                    scope.spawn(move || -> Result<(), String> {
                        for member in chunk {
                            let mut network = LSTMNetwork::from_weights(
                                net_options.clone(),
                                member.weights.clone(),
                            )
                            .map_err(|e| e.to_string())?;
                            member.fitness = evaluator.fitness(&mut network, validation_data);
                        }
                        Ok(())
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join()
                        .unwrap_or_else(|_| Err("evaluation thread panicked".to_string()))
                })
                .collect()
        });

        let failures: Vec<String> = results.into_iter().filter_map(Result::err).collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(TrainError::Workers(failures))
        }
    }

    /// The best member of each sub-population (index modulo count).
    fn select_survivors(&self, population: &[PopulationMember]) -> Vec<PopulationMember> {
        let count = self.options.sub_populations;
        (0..count)
            .filter_map(|p| {
                population
                    .iter()
                    .skip(p)
                    .step_by(count)
                    .max_by(|a, b| a.fitness.total_cmp(&b.fitness))
                    .cloned()
            })
            .collect()
    }

    /// A short, fixed burst of gradient training on one survivor.
    fn retrain<I: InputRep>(
        &self,
        member: &mut PopulationMember,
        train_data: &[Sequence<I>],
        validation_data: &[Sequence<I>],
    ) -> Result<(), TrainError>
    where
        E: FitnessEvaluator<I>,
    {
        if self.options.refine_epochs == 0 {
            return Ok(());
        }
        let network =
            LSTMNetwork::from_weights(self.net_options.clone(), member.weights.clone())?;
        let mut options = self.train_options.clone();
        options.max_epochs = self.options.refine_epochs;
        // No early stop or checkpointing inside the burst.
        options.max_epochs_after_max = self.options.refine_epochs + 1;
        options.validate_every = self.options.refine_epochs;
        options.checkpoint_path = None;

        let mut trainer = LSTMTrainer::new(network, &self.evaluator, options)?;
        trainer.train(train_data, validation_data)?;
        member.weights = trainer.network.weights;
        Ok(())
    }

    /// Builds the next generation: survivors are copied forward, the
    /// remainder is bred by copying one of two sampled parents and, with
    /// probability `crossover`, swapping one or more randomly chosen weight
    /// columns from the other, then with probability `mutation` scaling one
    /// random cell by a random factor.
    fn breed(&self, survivors: &[PopulationMember], rng: &mut StdRng) -> Vec<PopulationMember> {
        let mut next = Vec::with_capacity(self.options.initial_population_size);
        next.extend(survivors.iter().cloned());

        while next.len() < self.options.initial_population_size {
            let a = rng.gen_range(0..survivors.len());
            let mut b = rng.gen_range(0..survivors.len());
            if survivors.len() > 1 {
                while b == a {
                    b = rng.gen_range(0..survivors.len());
                }
            }

            let mut child = survivors[a].weights.clone();
            if rng.gen_bool(self.options.crossover) {
                cross_columns(&mut child, &survivors[b].weights, rng);
            }
            if rng.gen_bool(self.options.mutation) {
                mutate_one_cell(&mut child, rng);
            }
            next.push(PopulationMember {
                weights: child,
                fitness: f64::NEG_INFINITY,
            });
        }
        next
    }
}

/// Swaps one or more randomly chosen columns of `child` with the matching
/// columns of `other`.
fn cross_columns(child: &mut Array2<f64>, other: &Array2<f64>, rng: &mut StdRng) {
    let n = child.ncols();
    let points = rng.gen_range(1..=(n / 2).max(1));
    for _ in 0..points {
        let col = rng.gen_range(0..n);
        for row in 0..n {
            child[[row, col]] = other[[row, col]];
        }
    }
}

/// Perturbs one random cell by a multiplicative factor in [0.5, 1.5].
fn mutate_one_cell(weights: &mut Array2<f64>, rng: &mut StdRng) {
    let n = weights.nrows();
    let row = rng.gen_range(0..n);
    let col = rng.gen_range(0..n);
    weights[[row, col]] *= rng.gen_range(0.5..1.5);
}
