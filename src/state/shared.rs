use std::sync::Arc;

use log::warn;
use ndarray::{Array1, ArrayView1};

use super::{add_prior_counts, blend_distribution, not_initialized};
use crate::density::{weighted_posteriors, Codebook, Density};
use crate::error::{Error, Result};

/// A tied-mixture state: private weights over a shared codebook.
///
/// Accumulation writes both the private weight statistics and the
/// codebook's shared statistics. The codebook accumulator must be wired
/// with [`Codebook::init_accumulator`] before the first `accumulate`.
#[derive(Debug, Clone)]
pub struct SharedState<D> {
    weights: Array1<f64>,
    codebook: Arc<Codebook<D>>,
    accumulator: Option<Array1<f64>>,
}

impl<D: Density> SharedState<D> {
    /// `weights` must have one entry per codebook component.
    pub fn new(weights: Array1<f64>, codebook: Arc<Codebook<D>>) -> Result<Self> {
        let components = codebook.components()?;
        if weights.len() != components {
            return Err(Error::StructuralMismatch(format!(
                "{} weights for codebook {} with {} components",
                weights.len(),
                codebook.id(),
                components
            )));
        }
        Ok(Self {
            weights,
            codebook,
            accumulator: None,
        })
    }

    /// Equal weight on every codebook component.
    pub fn uniform(codebook: Arc<Codebook<D>>) -> Result<Self> {
        let k = codebook.components()?;
        Self::new(Array1::from_elem(k, 1.0 / k as f64), codebook)
    }

    /// Private mixture weights.
    pub fn weights(&self) -> &Array1<f64> {
        &self.weights
    }

    /// The shared codebook.
    pub fn codebook(&self) -> &Arc<Codebook<D>> {
        &self.codebook
    }

    /// Per-component weight statistics collected since `init`.
    pub fn accumulator(&self) -> Option<&Array1<f64>> {
        self.accumulator.as_ref()
    }

    /// Private weights dotted with the codebook's component likelihoods.
    pub fn emits(&self, frame: ArrayView1<'_, f64>) -> Result<f64> {
        let likes = self.codebook.component_likelihoods(frame)?;
        Ok(self.weights.dot(&likes))
    }

    /// Starts private weight statistics. The codebook is wired separately.
    pub fn init(&mut self) {
        if self.accumulator.is_some() {
            warn!("shared state: replacing an existing accumulator");
        }
        self.accumulator = Some(Array1::zeros(self.weights.len()));
    }

    pub fn discard(&mut self) {
        self.accumulator = None;
    }

    pub fn is_initialized(&self) -> bool {
        self.accumulator.is_some()
    }

    /// Adds the frame's component posteriors to both the private and the
    /// codebook statistics.
    pub fn accumulate(&mut self, posterior: f64, frame: ArrayView1<'_, f64>) -> Result<()> {
        if posterior == 0.0 {
            return Ok(());
        }
        let acc = self
            .accumulator
            .as_mut()
            .ok_or_else(|| not_initialized("shared"))?;
        let likes = self.codebook.component_likelihoods(frame)?;
        let (post, total) = weighted_posteriors(self.weights.view(), &likes);
        if total <= 0.0 {
            return Ok(());
        }
        self.codebook.accumulate(post.view(), posterior, frame)?;
        acc.scaled_add(posterior, &post);
        Ok(())
    }

    /// Peers must reference the same codebook.
    pub(crate) fn check_peer(&self, other: &SharedState<D>) -> Result<()> {
        if self.codebook.id() != other.codebook.id() || self.weights.len() != other.weights.len() {
            return Err(Error::StructuralMismatch(format!(
                "shared states reference codebooks {} and {}",
                self.codebook.id(),
                other.codebook.id()
            )));
        }
        Ok(())
    }

    /// Folds the peer's weight statistics only: codebook statistics are
    /// already collected in the one shared accumulator.
    pub fn propagate(&mut self, source: &SharedState<D>) -> Result<()> {
        self.check_peer(source)?;
        let Some(src) = source.accumulator.as_ref() else {
            return Ok(());
        };
        let acc = self
            .accumulator
            .as_mut()
            .ok_or_else(|| not_initialized("shared"))?;
        *acc += src;
        Ok(())
    }

    /// MAP interpolation of the weight statistics. Codebook statistics are
    /// left alone.
    pub fn interpolate(&mut self, source: &SharedState<D>, rho: f64) -> Result<()> {
        self.check_peer(source)?;
        let acc = self
            .accumulator
            .as_mut()
            .ok_or_else(|| not_initialized("shared"))?;
        let added = source
            .accumulator
            .as_ref()
            .is_some_and(|src| add_prior_counts(acc.view_mut(), src.view(), rho));
        if !added {
            warn!("shared state: interpolation source has no statistics, skipped");
        }
        Ok(())
    }

    /// Blends the private weights only.
    pub fn pinterpolate(&mut self, weight: f64, source: &SharedState<D>) -> Result<()> {
        self.check_peer(source)?;
        blend_distribution(self.weights.view_mut(), source.weights.view(), weight);
        Ok(())
    }

    /// Normalizes the weight statistics into new weights; the statistics
    /// are dropped.
    pub fn reestimate(&mut self) -> bool {
        let Some(acc) = self.accumulator.take() else {
            warn!("shared state: reestimate without an accumulator");
            return false;
        };
        let total = acc.sum();
        if total <= 0.0 {
            warn!(
                "shared state on codebook {}: zero weight mass, weights unchanged",
                self.codebook.id()
            );
            return false;
        }
        self.weights = acc / total;
        true
    }

    /// Total accumulated responsibility.
    pub fn gamma(&self) -> f64 {
        self.accumulator.as_ref().map_or(0.0, |acc| acc.sum())
    }
}
