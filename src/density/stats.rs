use ndarray::{Array1, Array2, ArrayView1, Zip};

use crate::error::{Error, Result};

/// Sufficient statistics of a mixture: per-component occupancy and the
/// first and second moments of the frames weighted by that occupancy.
#[derive(Debug, Clone, PartialEq)]
pub struct MixtureStats {
    pub occupancy: Array1<f64>,
    pub first: Array2<f64>,
    pub second: Array2<f64>,
}

impl MixtureStats {
    pub fn new(components: usize, dimension: usize) -> Self {
        Self {
            occupancy: Array1::zeros(components),
            first: Array2::zeros((components, dimension)),
            second: Array2::zeros((components, dimension)),
        }
    }

    pub fn components(&self) -> usize {
        self.occupancy.len()
    }

    pub fn dimension(&self) -> usize {
        self.first.ncols()
    }

    /// Total accumulated occupancy.
    pub fn total(&self) -> f64 {
        self.occupancy.sum()
    }

    /// Adds `frame` with responsibility `weight * posteriors[k]` to each component.
    pub fn add(
        &mut self,
        posteriors: ArrayView1<'_, f64>,
        weight: f64,
        frame: ArrayView1<'_, f64>,
    ) -> Result<()> {
        if posteriors.len() != self.components() || frame.len() != self.dimension() {
            return Err(Error::StructuralMismatch(format!(
                "statistics are {}x{}, got {} posteriors and a {}-dimensional frame",
                self.components(),
                self.dimension(),
                posteriors.len(),
                frame.len()
            )));
        }
        for (k, &p) in posteriors.iter().enumerate() {
            let r = weight * p;
            if r == 0.0 {
                continue;
            }
            self.occupancy[k] += r;
            Zip::from(self.first.row_mut(k))
                .and(self.second.row_mut(k))
                .and(&frame)
                .for_each(|f, s, &x| {
                    *f += r * x;
                    *s += r * x * x;
                });
        }
        Ok(())
    }

    /// `self += scale * other`.
    pub fn add_scaled(&mut self, other: &MixtureStats, scale: f64) -> Result<()> {
        self.check_shape(other)?;
        self.occupancy.scaled_add(scale, &other.occupancy);
        self.first.scaled_add(scale, &other.first);
        self.second.scaled_add(scale, &other.second);
        Ok(())
    }

    pub fn merge(&mut self, other: &MixtureStats) -> Result<()> {
        self.add_scaled(other, 1.0)
    }

    fn check_shape(&self, other: &MixtureStats) -> Result<()> {
        if self.occupancy.len() != other.occupancy.len() || self.first.dim() != other.first.dim() {
            return Err(Error::StructuralMismatch(format!(
                "statistics shapes differ: {:?} vs {:?}",
                self.first.dim(),
                other.first.dim()
            )));
        }
        Ok(())
    }
}
