//! Mixture densities consumed by continuous and tied-mixture states.
//!
//! States never do mixture math themselves: they call through [`Density`].
//! [`GaussianMixture`] is the diagonal-covariance implementation shipped with
//! the crate; [`Codebook`] wraps a density shared by many states together
//! with its single shared accumulator.

pub mod codebook;
pub mod gaussian;
pub mod stats;

use std::fmt;
use std::io::{Read, Write};

use ndarray::{Array1, ArrayView1};

use crate::error::Result;

pub use codebook::{Codebook, CodebookTable};
pub use gaussian::GaussianMixture;
pub use stats::MixtureStats;

pub trait Density: Clone + fmt::Debug + Send + Sync {
    /// Feature dimension.
    fn dimension(&self) -> usize;

    /// Number of mixture components.
    fn components(&self) -> usize;

    /// Mixture weights, one per component.
    fn weights(&self) -> ArrayView1<'_, f64>;

    /// Unweighted likelihood of `frame` under each component.
    fn component_likelihoods(&self, frame: ArrayView1<'_, f64>) -> Array1<f64>;

    /// Mixture likelihood of `frame`.
    fn evaluate(&self, frame: ArrayView1<'_, f64>) -> f64 {
        self.weights().dot(&self.component_likelihoods(frame))
    }

    /// Per-component responsibilities for `frame`.
    fn posteriors(&self, frame: ArrayView1<'_, f64>) -> Array1<f64> {
        let likes = self.component_likelihoods(frame);
        weighted_posteriors(self.weights(), &likes).0
    }

    /// Empty sufficient statistics shaped for this density.
    fn new_stats(&self) -> MixtureStats {
        MixtureStats::new(self.components(), self.dimension())
    }

    /// Maximum-likelihood update from `stats`.
    ///
    /// Returns `false` and leaves the parameters unchanged when the
    /// statistics carry no mass.
    fn reestimate(&mut self, stats: &MixtureStats) -> Result<bool>;

    /// `self = weight * other + (1 - weight) * self`, kept a valid density.
    fn pinterpolate(&mut self, weight: f64, other: &Self) -> Result<()>;

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()>;

    fn read_from<R: Read>(reader: &mut R) -> Result<Self>
    where
        Self: Sized;
}

/// Combines `weights` with component likelihoods, returning the normalized
/// responsibilities and their (unnormalized) total.
///
/// A zero total yields all-zero responsibilities.
pub fn weighted_posteriors(weights: ArrayView1<'_, f64>, likes: &Array1<f64>) -> (Array1<f64>, f64) {
    let mut post = &weights * likes;
    let total = post.sum();
    if total > 0.0 {
        post /= total;
    } else {
        post.fill(0.0);
    }
    (post, total)
}
