use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::TrainError;
use crate::updates::UpdateMode;

/// Architecture hyperparameters from which the unit layout is derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkOptions {
    pub num_inputs: usize,
    pub num_hidden: usize,
    /// One entry per memory block: the number of cells in that block.
    pub block_sizes: Vec<usize>,
    pub num_outputs: usize,
    pub input_gate: bool,
    pub output_gate: bool,
    pub forget_gate: bool,
    /// Adds a constant-1.0 unit at the end of the input region.
    pub bias: bool,
    /// Softmax output units instead of independent sigmoids.
    pub classification: bool,
    /// Per-block dropout during training, weight rescaling at evaluation.
    pub dropout: bool,
    /// Spread of the uniform weight initialization, ±init_range.
    pub init_range: f64,
    /// If positive, gaussian initialization with this standard deviation
    /// is used instead of the uniform draw.
    pub gauss_range: f64,
}

impl NetworkOptions {
    /// Options for `num_blocks` equally sized memory blocks.
    pub fn new(
        num_inputs: usize,
        num_hidden: usize,
        num_blocks: usize,
        block_size: usize,
        num_outputs: usize,
    ) -> Self {
        NetworkOptions {
            num_inputs,
            num_hidden,
            block_sizes: vec![block_size; num_blocks],
            num_outputs,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), TrainError> {
        if self.num_inputs == 0 {
            return Err(TrainError::configuration("numInputs must be at least 1"));
        }
        if self.num_outputs == 0 {
            return Err(TrainError::configuration("numOutputs must be at least 1"));
        }
        if self.block_sizes.is_empty() {
            return Err(TrainError::configuration("at least one memory block is required"));
        }
        if self.block_sizes.iter().any(|&s| s == 0) {
            return Err(TrainError::configuration("blockSize must be at least 1"));
        }
        if self.init_range <= 0.0 && self.gauss_range <= 0.0 {
            return Err(TrainError::configuration(
                "one of initRange or gaussRange must be positive",
            ));
        }
        Ok(())
    }

    pub fn num_blocks(&self) -> usize {
        self.block_sizes.len()
    }
}

impl Default for NetworkOptions {
    fn default() -> Self {
        NetworkOptions {
            num_inputs: 1,
            num_hidden: 0,
            block_sizes: vec![1],
            num_outputs: 1,
            input_gate: true,
            output_gate: true,
            forget_gate: true,
            bias: true,
            classification: false,
            dropout: false,
            init_range: 0.1,
            gauss_range: 0.0,
        }
    }
}

/// Training-loop hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingOptions {
    pub learning_rate: f64,
    pub momentum: f64,
    /// L2 weight-decay coefficient.
    pub lambda: f64,
    pub update: UpdateMode,
    pub max_epochs: usize,
    /// Validation checks without improvement before training converges.
    pub max_epochs_after_max: usize,
    /// Validate every this many epochs.
    pub validate_every: usize,
    /// Destination for best-weight checkpoints. Without a path the best
    /// matrix is held in memory and restored from there on convergence.
    pub checkpoint_path: Option<PathBuf>,
    pub seed: u64,
    /// Worker threads for parallel training; 0 selects the available
    /// hardware parallelism.
    pub num_workers: usize,
}

impl TrainingOptions {
    pub fn validate(&self) -> Result<(), TrainError> {
        if self.learning_rate <= 0.0 {
            return Err(TrainError::configuration("learningRate must be positive"));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(TrainError::configuration("momentum must lie in [0, 1)"));
        }
        if self.lambda < 0.0 {
            return Err(TrainError::configuration("lambda must not be negative"));
        }
        if self.validate_every == 0 {
            return Err(TrainError::configuration("validateEvery must be at least 1"));
        }
        if let UpdateMode::MiniBatch(0) = self.update {
            return Err(TrainError::configuration("batchSize must be at least 1"));
        }
        Ok(())
    }
}

impl Default for TrainingOptions {
    fn default() -> Self {
        TrainingOptions {
            learning_rate: 0.1,
            momentum: 0.9,
            lambda: 0.0,
            update: UpdateMode::Online,
            max_epochs: 100,
            max_epochs_after_max: 5,
            validate_every: 1,
            checkpoint_path: None,
            seed: 1,
            num_workers: 0,
        }
    }
}

/// Hyperparameters of the population-based refiner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneticOptions {
    pub initial_population_size: usize,
    pub sub_populations: usize,
    /// Probability of swapping weight columns from the second parent.
    pub crossover: f64,
    /// Probability of perturbing one random weight multiplicatively.
    pub mutation: f64,
    pub max_iterations: usize,
    /// Generations without a global fitness improvement before stopping.
    pub max_generations_after_max: usize,
    /// Gradient-training epochs applied to each tournament winner.
    pub refine_epochs: usize,
}

impl GeneticOptions {
    pub fn validate(&self) -> Result<(), TrainError> {
        if self.initial_population_size == 0 {
            return Err(TrainError::configuration("initialPopulationSize must be at least 1"));
        }
        if self.sub_populations == 0 {
            return Err(TrainError::configuration("subPopulations must be at least 1"));
        }
        if self.sub_populations > self.initial_population_size {
            return Err(TrainError::configuration(
                "subPopulations must not exceed initialPopulationSize",
            ));
        }
        for (name, p) in [("crossover", self.crossover), ("mutation", self.mutation)] {
            if !(0.0..=1.0).contains(&p) {
                return Err(TrainError::configuration(format!("{} must lie in [0, 1]", name)));
            }
        }
        if self.max_iterations == 0 {
            return Err(TrainError::configuration("maxIterations must be at least 1"));
        }
        Ok(())
    }
}

impl Default for GeneticOptions {
    fn default() -> Self {
        GeneticOptions {
            initial_population_size: 20,
            sub_populations: 4,
            crossover: 0.7,
            mutation: 0.1,
            max_iterations: 50,
            max_generations_after_max: 10,
            refine_epochs: 5,
        }
    }
}

/// All options parsed from the external collaborator's flat key/value map.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub network: NetworkOptions,
    pub training: TrainingOptions,
    pub genetic: GeneticOptions,
}

impl Options {
    /// Parses the flat option map the surrounding pipeline hands over.
    /// Unknown keys and unparsable values are configuration errors.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Options, TrainError> {
        let mut opts = Options::default();
        let mut num_blocks = opts.network.num_blocks();
        let mut block_size = 1usize;
        let mut batch_size: Option<usize> = None;

        for (key, value) in map {
            match key.as_str() {
                "numInputs" => opts.network.num_inputs = parse(key, value)?,
                "numHidden" => opts.network.num_hidden = parse(key, value)?,
                "numOutputs" => opts.network.num_outputs = parse(key, value)?,
                "numBlocks" => num_blocks = parse(key, value)?,
                "blockSize" => block_size = parse(key, value)?,
                "inputGate" => opts.network.input_gate = parse(key, value)?,
                "outputGate" => opts.network.output_gate = parse(key, value)?,
                "forgetGate" => opts.network.forget_gate = parse(key, value)?,
                "bias" => opts.network.bias = parse(key, value)?,
                "classification" => opts.network.classification = parse(key, value)?,
                "dropout" => opts.network.dropout = parse(key, value)?,
                "initRange" => opts.network.init_range = parse(key, value)?,
                "gaussRange" => opts.network.gauss_range = parse(key, value)?,
                "learningRate" => opts.training.learning_rate = parse(key, value)?,
                "momentum" => opts.training.momentum = parse(key, value)?,
                "lambda" => opts.training.lambda = parse(key, value)?,
                "batchSize" => batch_size = Some(parse(key, value)?),
                "maxEpochs" => opts.training.max_epochs = parse(key, value)?,
                "maxEpochsAfterMax" => opts.training.max_epochs_after_max = parse(key, value)?,
                "validateEvery" => opts.training.validate_every = parse(key, value)?,
                "checkpointPath" => opts.training.checkpoint_path = Some(PathBuf::from(value)),
                "seed" => opts.training.seed = parse(key, value)?,
                "numWorkers" => opts.training.num_workers = parse(key, value)?,
                "initialPopulationSize" => {
                    opts.genetic.initial_population_size = parse(key, value)?
                }
                "subPopulations" => opts.genetic.sub_populations = parse(key, value)?,
                "crossover" => opts.genetic.crossover = parse(key, value)?,
                "mutation" => opts.genetic.mutation = parse(key, value)?,
                "maxIterations" => opts.genetic.max_iterations = parse(key, value)?,
                "maxGenerationsAfterMax" => {
                    opts.genetic.max_generations_after_max = parse(key, value)?
                }
                "refineEpochs" => opts.genetic.refine_epochs = parse(key, value)?,
                other => {
                    return Err(TrainError::Configuration(format!("unknown option '{}'", other)))
                }
            }
        }

        opts.network.block_sizes = vec![block_size; num_blocks];
        opts.training.update = match batch_size {
            None | Some(0) | Some(1) => UpdateMode::Online,
            Some(n) => UpdateMode::MiniBatch(n),
        };

        opts.network.validate()?;
        opts.training.validate()?;
        opts.genetic.validate()?;
        Ok(opts)
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, TrainError> {
    value.parse().map_err(|_| {
        TrainError::Configuration(format!("option '{}' has unparsable value '{}'", key, value))
    })
}
