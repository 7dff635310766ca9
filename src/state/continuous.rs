use log::warn;
use ndarray::ArrayView1;

use super::not_initialized;
use crate::density::{Density, MixtureStats};
use crate::error::{Error, Result};

/// A state owning its own mixture density.
#[derive(Debug, Clone)]
pub struct ContinuousState<D> {
    density: D,
    accumulator: Option<MixtureStats>,
}

impl<D: Density> ContinuousState<D> {
    /// Wraps `density`; the state starts without an accumulator.
    pub fn new(density: D) -> Self {
        Self {
            density,
            accumulator: None,
        }
    }

    /// The state's mixture.
    pub fn density(&self) -> &D {
        &self.density
    }

    /// Mixture statistics collected since `init`.
    pub fn accumulator(&self) -> Option<&MixtureStats> {
        self.accumulator.as_ref()
    }

    fn check_frame(&self, frame: ArrayView1<'_, f64>) -> Result<()> {
        if frame.len() != self.density.dimension() {
            return Err(Error::InvalidInput(format!(
                "continuous state expects {}-dimensional frames, got {}",
                self.density.dimension(),
                frame.len()
            )));
        }
        Ok(())
    }

    /// Mixture likelihood of `frame`.
    pub fn emits(&self, frame: ArrayView1<'_, f64>) -> Result<f64> {
        self.check_frame(frame)?;
        Ok(self.density.evaluate(frame))
    }

    /// Starts empty statistics shaped like the mixture.
    pub fn init(&mut self) {
        if self.accumulator.is_some() {
            warn!("continuous state: replacing an existing accumulator");
        }
        self.accumulator = Some(self.density.new_stats());
    }

    pub fn discard(&mut self) {
        self.accumulator = None;
    }

    pub fn is_initialized(&self) -> bool {
        self.accumulator.is_some()
    }

    /// Splits `posterior` over the components and adds the weighted frame.
    pub fn accumulate(&mut self, posterior: f64, frame: ArrayView1<'_, f64>) -> Result<()> {
        if posterior == 0.0 {
            return Ok(());
        }
        self.check_frame(frame)?;
        let acc = self
            .accumulator
            .as_mut()
            .ok_or_else(|| not_initialized("continuous"))?;
        let posteriors = self.density.posteriors(frame);
        acc.add(posteriors.view(), posterior, frame)
    }

    /// Peers must have mixtures of the same shape.
    pub(crate) fn check_peer(&self, other: &ContinuousState<D>) -> Result<()> {
        let ours = (self.density.components(), self.density.dimension());
        let theirs = (other.density.components(), other.density.dimension());
        if ours != theirs {
            return Err(Error::StructuralMismatch(format!(
                "continuous states with {}x{} and {}x{} mixtures",
                ours.0, ours.1, theirs.0, theirs.1
            )));
        }
        Ok(())
    }

    /// Merges the peer's statistics into ours.
    pub fn propagate(&mut self, source: &ContinuousState<D>) -> Result<()> {
        self.check_peer(source)?;
        let Some(src) = source.accumulator.as_ref() else {
            return Ok(());
        };
        let acc = self
            .accumulator
            .as_mut()
            .ok_or_else(|| not_initialized("continuous"))?;
        acc.merge(src)
    }

    /// Adds the peer's statistics rescaled to `rho` total occupancy.
    pub fn interpolate(&mut self, source: &ContinuousState<D>, rho: f64) -> Result<()> {
        self.check_peer(source)?;
        let acc = self
            .accumulator
            .as_mut()
            .ok_or_else(|| not_initialized("continuous"))?;
        match source.accumulator.as_ref() {
            Some(src) if src.total() > 0.0 => acc.add_scaled(src, rho / src.total()),
            _ => {
                warn!("continuous state: interpolation source has no statistics, skipped");
                Ok(())
            }
        }
    }

    /// Blends the two mixtures in parameter space.
    pub fn pinterpolate(&mut self, weight: f64, source: &ContinuousState<D>) -> Result<()> {
        self.check_peer(source)?;
        self.density.pinterpolate(weight, &source.density)
    }

    /// Maximum-likelihood update of the mixture; the statistics are dropped.
    pub fn reestimate(&mut self) -> Result<bool> {
        let Some(stats) = self.accumulator.take() else {
            warn!("continuous state: reestimate without an accumulator");
            return Ok(false);
        };
        let updated = self.density.reestimate(&stats)?;
        if !updated {
            warn!("continuous state: zero occupancy, mixture unchanged");
        }
        Ok(updated)
    }

    pub fn gamma(&self) -> f64 {
        self.accumulator.as_ref().map_or(0.0, MixtureStats::total)
    }
}
