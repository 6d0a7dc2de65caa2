//! # rtrl-lstm
//!
//! A block-structured LSTM training kernel using real-time recurrent
//! learning: per-step gradient accumulation through eligibility traces
//! instead of backpropagation through time.
//!
//! ## Core Components
//!
//! - **UnitLayout**: one flat index space over inputs, hidden units,
//!   per-block gates, memory cells, and outputs
//! - **Network**: dense forward/backward over a single square weight matrix,
//!   generic over dense or sparse input representations
//! - **Training**: online, mini-batch, and multi-threaded weight updates
//!   with momentum and L2 decay, validation-driven early stopping, and
//!   durable best-weight checkpoints
//! - **Dropout**: per-block masking during training, exact weight rescaling
//!   at evaluation time
//! - **GeneticRefiner**: sub-populations of weight matrices refined by
//!   column crossover, multiplicative mutation, and short gradient bursts
//!
//! ## Quick Start
//!
//! ```rust
//! use rtrl_lstm::{create_basic_trainer, LSTMNetwork, NetworkOptions, TrainingOptions};
//! use rtrl_lstm::sequence::{DenseInput, Sequence, TimeStep};
//! use ndarray::arr1;
//!
//! let options = NetworkOptions::new(1, 0, 2, 1, 1);
//! let network = LSTMNetwork::new(options, 7).unwrap();
//! let mut trainer = create_basic_trainer(network, TrainingOptions::default()).unwrap();
//!
//! let data = vec![Sequence::new(vec![
//!     TimeStep::new(DenseInput(vec![1.0]), Some(arr1(&[1.0]))),
//!     TimeStep::new(DenseInput(vec![0.0]), Some(arr1(&[0.0]))),
//! ])];
//! trainer.train(&data, &data).unwrap();
//! ```

pub mod config;
pub mod dropout;
pub mod error;
pub mod genetic;
pub mod layout;
pub mod network;
pub mod parallel;
pub mod persistence;
pub mod sequence;
pub mod training;
pub mod updates;
pub mod utils;

// Re-export commonly used items
pub use config::{GeneticOptions, NetworkOptions, Options, TrainingOptions};
pub use error::{PersistenceError, TrainError};
pub use genetic::{GeneticRefiner, PopulationMember};
pub use layout::UnitLayout;
pub use network::state::TrainState;
pub use network::LSTMNetwork;
pub use parallel::ParallelTrainer;
pub use persistence::{ModelMetadata, ModelPersistence, PersistentModel, SavedModel};
pub use sequence::{DenseInput, InputRep, Sequence, SequenceEncoder, SparseInput, TimeStep};
pub use training::{
    create_basic_trainer, FitnessEvaluator, LSTMTrainer, MeanSquaredEvaluator, TrainingMetrics,
};
pub use updates::UpdateMode;

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn test_library_integration() {
        let options = NetworkOptions::new(2, 1, 1, 1, 1);
        let mut network = LSTMNetwork::new(options, 1).unwrap();

        let sequence = Sequence::new(vec![
            TimeStep::new(DenseInput(vec![1.0, 0.5]), Some(arr1(&[1.0]))),
            TimeStep::new(DenseInput(vec![0.0, -0.5]), Some(arr1(&[0.0]))),
        ]);
        let outputs = network.predict(&sequence);

        assert_eq!(outputs.len(), 2);
        assert!(outputs.iter().all(|o| o.len() == 1));
    }
}
