use ndarray::{Array1, Array2};

use crate::error::{Error, Result};

/// Model-level sufficient statistics collected over one training epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct Accumulator {
    /// Expected number of segments starting in each state.
    pub entry: Array1<f64>,
    /// `transitions[[i, j]]`: expected number of `i -> j` transitions.
    pub transitions: Array2<f64>,
    pub segments: usize,
    pub frames: usize,
    /// Sum of per-segment log-likelihoods (or path scores for Viterbi
    /// statistics).
    pub log_likelihood: f64,
}

impl Accumulator {
    pub fn new(num_states: usize) -> Self {
        Self {
            entry: Array1::zeros(num_states),
            transitions: Array2::zeros((num_states, num_states)),
            segments: 0,
            frames: 0,
            log_likelihood: 0.0,
        }
    }

    pub fn num_states(&self) -> usize {
        self.entry.len()
    }

    pub fn merge(&mut self, other: &Accumulator) -> Result<()> {
        if self.num_states() != other.num_states() {
            return Err(Error::StructuralMismatch(format!(
                "accumulators for {} and {} states",
                self.num_states(),
                other.num_states()
            )));
        }
        self.entry += &other.entry;
        self.transitions += &other.transitions;
        self.segments += other.segments;
        self.frames += other.frames;
        self.log_likelihood += other.log_likelihood;
        Ok(())
    }
}
