use std::f64::consts::PI;
use std::io::{Read, Write};

use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;
use rand_distr::{Distribution, Normal};

use super::{Density, MixtureStats};
use crate::codec;
use crate::error::{Error, Result};

/// Smallest variance a component may be re-estimated to.
pub const VARIANCE_FLOOR: f64 = 1e-6;

/// A Gaussian mixture with diagonal covariances.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianMixture {
    weights: Array1<f64>,
    /// `means[[k, d]]`: mean of dimension `d` in component `k`
    means: Array2<f64>,
    variances: Array2<f64>,
}

impl GaussianMixture {
    pub fn new(weights: Array1<f64>, means: Array2<f64>, variances: Array2<f64>) -> Result<Self> {
        if weights.is_empty() {
            return Err(Error::InvalidInput(
                "mixture needs at least one component".to_string(),
            ));
        }
        if means.nrows() != weights.len() || means.dim() != variances.dim() {
            return Err(Error::StructuralMismatch(format!(
                "{} weights, means {:?}, variances {:?}",
                weights.len(),
                means.dim(),
                variances.dim()
            )));
        }
        if variances.iter().any(|&v| !(v > 0.0)) {
            return Err(Error::InvalidInput(
                "variances must be strictly positive".to_string(),
            ));
        }
        Ok(Self {
            weights,
            means,
            variances,
        })
    }

    /// A single unit-variance component centred on `mean`.
    pub fn single(mean: &[f64]) -> Self {
        let d = mean.len();
        Self {
            weights: Array1::ones(1),
            means: Array2::from_shape_fn((1, d), |(_, j)| mean[j]),
            variances: Array2::ones((1, d)),
        }
    }

    /// Uniform weights, unit variances and means drawn from `N(0, spread)`.
    pub fn random<R: Rng>(components: usize, dimension: usize, spread: f64, rng: &mut R) -> Result<Self> {
        let normal = Normal::new(0.0, spread)
            .map_err(|e| Error::InvalidInput(format!("invalid spread {}: {}", spread, e)))?;
        let means = Array2::from_shape_fn((components, dimension), |_| normal.sample(rng));
        Self::new(
            Array1::from_elem(components, 1.0 / components as f64),
            means,
            Array2::ones((components, dimension)),
        )
    }

    pub fn means(&self) -> &Array2<f64> {
        &self.means
    }

    pub fn variances(&self) -> &Array2<f64> {
        &self.variances
    }

    fn check_shape(&self, other: &GaussianMixture) -> Result<()> {
        if self.means.dim() != other.means.dim() {
            return Err(Error::StructuralMismatch(format!(
                "mixture shapes differ: {:?} vs {:?}",
                self.means.dim(),
                other.means.dim()
            )));
        }
        Ok(())
    }
}

impl Density for GaussianMixture {
    fn dimension(&self) -> usize {
        self.means.ncols()
    }

    fn components(&self) -> usize {
        self.weights.len()
    }

    fn weights(&self) -> ArrayView1<'_, f64> {
        self.weights.view()
    }

    fn component_likelihoods(&self, frame: ArrayView1<'_, f64>) -> Array1<f64> {
        Array1::from_shape_fn(self.components(), |k| {
            let log_density: f64 = self
                .means
                .row(k)
                .iter()
                .zip(self.variances.row(k).iter())
                .zip(frame.iter())
                .map(|((&mu, &var), &x)| {
                    let diff = x - mu;
                    -0.5 * (diff * diff / var + (2.0 * PI * var).ln())
                })
                .sum();
            log_density.exp()
        })
    }

    fn reestimate(&mut self, stats: &MixtureStats) -> Result<bool> {
        if stats.components() != self.components() || stats.dimension() != self.dimension() {
            return Err(Error::StructuralMismatch(format!(
                "statistics {}x{} do not fit mixture {}x{}",
                stats.components(),
                stats.dimension(),
                self.components(),
                self.dimension()
            )));
        }
        let total = stats.total();
        if total <= 0.0 {
            return Ok(false);
        }
        self.weights = &stats.occupancy / total;
        for k in 0..self.components() {
            let occ = stats.occupancy[k];
            // unvisited components keep their previous shape
            if occ <= 0.0 {
                continue;
            }
            for d in 0..self.dimension() {
                let mean = stats.first[[k, d]] / occ;
                let var = stats.second[[k, d]] / occ - mean * mean;
                self.means[[k, d]] = mean;
                self.variances[[k, d]] = var.max(VARIANCE_FLOOR);
            }
        }
        Ok(true)
    }

    fn pinterpolate(&mut self, weight: f64, other: &Self) -> Result<()> {
        self.check_shape(other)?;
        let keep = 1.0 - weight;
        self.weights = &self.weights * keep + &other.weights * weight;
        let total = self.weights.sum();
        if total > 0.0 {
            self.weights /= total;
        }
        self.means = &self.means * keep + &other.means * weight;
        self.variances = &self.variances * keep + &other.variances * weight;
        self.variances.mapv_inplace(|v| v.max(VARIANCE_FLOOR));
        Ok(())
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        codec::write_i32(writer, codec::length_to_i32(self.components())?)?;
        codec::write_i32(writer, codec::length_to_i32(self.dimension())?)?;
        for &w in self.weights.iter() {
            codec::write_f64(writer, w)?;
        }
        for &m in self.means.iter() {
            codec::write_f64(writer, m)?;
        }
        for &v in self.variances.iter() {
            codec::write_f64(writer, v)?;
        }
        Ok(())
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let k = codec::read_len(reader)?;
        let d = codec::read_len(reader)?;
        let weights = (0..k)
            .map(|_| codec::read_f64(reader))
            .collect::<Result<Vec<_>>>()?;
        let means = (0..k * d)
            .map(|_| codec::read_f64(reader))
            .collect::<Result<Vec<_>>>()?;
        let variances = (0..k * d)
            .map(|_| codec::read_f64(reader))
            .collect::<Result<Vec<_>>>()?;
        let means = Array2::from_shape_vec((k, d), means)
            .map_err(|e| Error::Persistence(format!("mixture means: {}", e)))?;
        let variances = Array2::from_shape_vec((k, d), variances)
            .map_err(|e| Error::Persistence(format!("mixture variances: {}", e)))?;
        Self::new(Array1::from_vec(weights), means, variances)
            .map_err(|e| Error::Persistence(format!("invalid mixture: {}", e)))
    }
}
