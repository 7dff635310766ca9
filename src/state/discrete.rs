use log::warn;
use ndarray::{Array1, ArrayView1};

use super::{add_prior_counts, blend_distribution, not_initialized};
use crate::error::{Error, Result};

/// A state emitting tokens from a fixed alphabet.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscreteState {
    alphabet: Vec<f64>,
    probabilities: Array1<f64>,
    accumulator: Option<Array1<f64>>,
}

impl DiscreteState {
    /// `probabilities[k]` is the probability of emitting `alphabet[k]`.
    pub fn new(alphabet: Vec<f64>, probabilities: Array1<f64>) -> Result<Self> {
        if alphabet.is_empty() {
            return Err(Error::InvalidInput("empty alphabet".to_string()));
        }
        if alphabet.len() != probabilities.len() {
            return Err(Error::StructuralMismatch(format!(
                "alphabet has {} symbols but distribution has {} entries",
                alphabet.len(),
                probabilities.len()
            )));
        }
        Ok(Self {
            alphabet,
            probabilities,
            accumulator: None,
        })
    }

    /// Equal probability for every symbol.
    pub fn uniform(alphabet: Vec<f64>) -> Result<Self> {
        let n = alphabet.len();
        Self::new(alphabet, Array1::from_elem(n, 1.0 / n as f64))
    }

    /// Emitted symbols, in distribution order.
    pub fn alphabet(&self) -> &[f64] {
        &self.alphabet
    }

    /// Current emission distribution over the alphabet.
    pub fn probabilities(&self) -> &Array1<f64> {
        &self.probabilities
    }

    /// Position of `token` in the alphabet (exact match).
    pub fn symbol_index(&self, token: f64) -> Result<usize> {
        self.alphabet
            .iter()
            .position(|&s| s == token)
            .ok_or_else(|| Error::InvalidInput(format!("token {} is not in the alphabet", token)))
    }

    fn token_index(&self, frame: ArrayView1<'_, f64>) -> Result<usize> {
        let token = frame
            .first()
            .copied()
            .ok_or_else(|| Error::InvalidInput("empty frame for discrete state".to_string()))?;
        self.symbol_index(token)
    }

    /// Probability of the token in the first value of `frame`.
    pub fn emits(&self, frame: ArrayView1<'_, f64>) -> Result<f64> {
        Ok(self.probabilities[self.token_index(frame)?])
    }

    /// Starts a fresh count per symbol.
    pub fn init(&mut self) {
        if self.accumulator.is_some() {
            warn!("discrete state: replacing an existing accumulator");
        }
        self.accumulator = Some(Array1::zeros(self.alphabet.len()));
    }

    /// Drops the counts without touching the distribution.
    pub fn discard(&mut self) {
        self.accumulator = None;
    }

    pub fn is_initialized(&self) -> bool {
        self.accumulator.is_some()
    }

    /// Per-symbol counts collected since `init`.
    pub fn accumulator(&self) -> Option<&Array1<f64>> {
        self.accumulator.as_ref()
    }

    /// Adds `posterior` to the count of the frame's token.
    pub fn accumulate(&mut self, posterior: f64, frame: ArrayView1<'_, f64>) -> Result<()> {
        if posterior == 0.0 {
            return Ok(());
        }
        let k = self.token_index(frame)?;
        let acc = self
            .accumulator
            .as_mut()
            .ok_or_else(|| not_initialized("discrete"))?;
        acc[k] += posterior;
        Ok(())
    }

    /// Peers must share the same alphabet.
    pub(crate) fn check_peer(&self, other: &DiscreteState) -> Result<()> {
        if self.alphabet != other.alphabet {
            return Err(Error::StructuralMismatch(format!(
                "discrete alphabets differ ({} vs {} symbols)",
                self.alphabet.len(),
                other.alphabet.len()
            )));
        }
        Ok(())
    }

    /// Adds the peer's counts to ours.
    pub fn propagate(&mut self, source: &DiscreteState) -> Result<()> {
        self.check_peer(source)?;
        let Some(src) = source.accumulator.as_ref() else {
            return Ok(());
        };
        let acc = self
            .accumulator
            .as_mut()
            .ok_or_else(|| not_initialized("discrete"))?;
        *acc += src;
        Ok(())
    }

    /// Adds `rho` pseudo-counts distributed like the peer's counts.
    pub fn interpolate(&mut self, source: &DiscreteState, rho: f64) -> Result<()> {
        self.check_peer(source)?;
        let acc = self
            .accumulator
            .as_mut()
            .ok_or_else(|| not_initialized("discrete"))?;
        let added = source
            .accumulator
            .as_ref()
            .is_some_and(|src| add_prior_counts(acc.view_mut(), src.view(), rho));
        if !added {
            warn!("discrete state: interpolation source has no statistics, skipped");
        }
        Ok(())
    }

    /// Blends the peer's distribution into ours with `weight`.
    pub fn pinterpolate(&mut self, weight: f64, source: &DiscreteState) -> Result<()> {
        self.check_peer(source)?;
        blend_distribution(
            self.probabilities.view_mut(),
            source.probabilities.view(),
            weight,
        );
        Ok(())
    }

    /// Normalizes the counts into the new distribution. `false` when
    /// nothing was counted.
    pub fn reestimate(&mut self) -> bool {
        let Some(acc) = self.accumulator.take() else {
            warn!("discrete state: reestimate without an accumulator");
            return false;
        };
        let total = acc.sum();
        if total <= 0.0 {
            warn!("discrete state: zero occupancy, distribution unchanged");
            return false;
        }
        self.probabilities = acc / total;
        true
    }

    /// Total count, 0 without an accumulator.
    pub fn gamma(&self) -> f64 {
        self.accumulator.as_ref().map_or(0.0, |acc| acc.sum())
    }
}
