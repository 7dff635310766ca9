//! Hidden Markov Model core for acoustic modeling.
//!
//! Models compose discrete, continuous and tied-mixture ([`state::SharedState`])
//! emission states with entry and transition probabilities. They are trained
//! with Baum-Welch or Viterbi statistics through an explicit accumulator
//! lifecycle, decoded into [`Alignment`]s and persisted in a compact binary
//! layout.
//!
//! The crate logs through the `log` facade and never installs a logger.

pub mod alignment;
pub mod codec;
pub mod density;
pub mod error;
pub mod hmm;
pub mod observation;
pub mod state;
pub mod train;

pub use alignment::Alignment;
pub use density::{Codebook, CodebookTable, Density, GaussianMixture, MixtureStats};
pub use error::{Error, Result};
pub use hmm::{Hmm, Topology};
pub use observation::Observation;
pub use state::{ContinuousState, DiscreteState, SharedState, State, StateKind};
pub use train::{Trainer, TrainingAlgorithm, TrainingConfig, TrainingReport};
