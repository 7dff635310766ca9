//! Tied-mixture codebooks.
//!
//! A codebook is one density referenced by many shared-continuous states.
//! Its accumulator is a single object: every referencing state (and every
//! worker copy of a model holding those states) accumulates into it under
//! the codebook's mutex. The training driver wires the accumulator with
//! [`Codebook::init_accumulator`] before an epoch and consumes it with
//! [`Codebook::reestimate`] afterwards.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard};

use log::warn;
use ndarray::{Array1, ArrayView1};

use super::{Density, MixtureStats};
use crate::error::{Error, Result};

#[derive(Debug)]
pub struct Codebook<D> {
    id: i32,
    density: RwLock<D>,
    stats: Mutex<Option<MixtureStats>>,
}

impl<D: Density> Codebook<D> {
    pub fn new(id: i32, density: D) -> Self {
        Self {
            id,
            density: RwLock::new(density),
            stats: Mutex::new(None),
        }
    }

    /// Convenience constructor returning the codebook ready to be shared.
    pub fn shared(id: i32, density: D) -> Arc<Self> {
        Arc::new(Self::new(id, density))
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn density(&self) -> Result<RwLockReadGuard<'_, D>> {
        self.density
            .read()
            .map_err(|_| Error::InvalidInput(format!("codebook {} lock poisoned", self.id)))
    }

    pub fn components(&self) -> Result<usize> {
        Ok(self.density()?.components())
    }

    pub fn dimension(&self) -> Result<usize> {
        Ok(self.density()?.dimension())
    }

    pub fn component_likelihoods(&self, frame: ArrayView1<'_, f64>) -> Result<Array1<f64>> {
        let density = self.density()?;
        if frame.len() != density.dimension() {
            return Err(Error::InvalidInput(format!(
                "codebook {} expects {}-dimensional frames, got {}",
                self.id,
                density.dimension(),
                frame.len()
            )));
        }
        Ok(density.component_likelihoods(frame))
    }

    fn lock_stats(&self) -> Result<MutexGuard<'_, Option<MixtureStats>>> {
        self.stats
            .lock()
            .map_err(|_| Error::InvalidInput(format!("codebook {} accumulator poisoned", self.id)))
    }

    /// Creates a fresh shared accumulator for one training epoch.
    pub fn init_accumulator(&self) -> Result<()> {
        let fresh = self.density()?.new_stats();
        let mut stats = self.lock_stats()?;
        if stats.is_some() {
            warn!("codebook {}: replacing an existing accumulator", self.id);
        }
        *stats = Some(fresh);
        Ok(())
    }

    pub fn discard_accumulator(&self) -> Result<()> {
        *self.lock_stats()? = None;
        Ok(())
    }

    pub fn is_wired(&self) -> Result<bool> {
        Ok(self.lock_stats()?.is_some())
    }

    /// Adds `frame` with per-component responsibilities `weight * posteriors`.
    pub fn accumulate(
        &self,
        posteriors: ArrayView1<'_, f64>,
        weight: f64,
        frame: ArrayView1<'_, f64>,
    ) -> Result<()> {
        let mut guard = self.lock_stats()?;
        let stats = guard.as_mut().ok_or_else(|| {
            Error::InvalidInput(format!(
                "codebook {} accumulator is not initialized",
                self.id
            ))
        })?;
        stats.add(posteriors, weight, frame)
    }

    /// Total occupancy collected so far (0 when not wired).
    pub fn gamma(&self) -> Result<f64> {
        Ok(self.lock_stats()?.as_ref().map_or(0.0, MixtureStats::total))
    }

    /// Snapshot of the shared statistics.
    pub fn stats(&self) -> Result<Option<MixtureStats>> {
        Ok(self.lock_stats()?.clone())
    }

    /// Re-estimates the shared density and drops the accumulator.
    ///
    /// Returns `false` when there was nothing to learn from.
    pub fn reestimate(&self) -> Result<bool> {
        let Some(stats) = self.lock_stats()?.take() else {
            warn!("codebook {}: reestimate without an accumulator", self.id);
            return Ok(false);
        };
        let mut density = self
            .density
            .write()
            .map_err(|_| Error::InvalidInput(format!("codebook {} lock poisoned", self.id)))?;
        let updated = density.reestimate(&stats)?;
        if !updated {
            warn!("codebook {}: zero occupancy, parameters unchanged", self.id);
        }
        Ok(updated)
    }
}

/// Codebooks by id, used to resolve shared-state references at load time.
#[derive(Debug)]
pub struct CodebookTable<D> {
    entries: HashMap<i32, Arc<Codebook<D>>>,
}

impl<D> Default for CodebookTable<D> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<D: Density> CodebookTable<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, codebook: Arc<Codebook<D>>) -> Option<Arc<Codebook<D>>> {
        self.entries.insert(codebook.id(), codebook)
    }

    pub fn get(&self, id: i32) -> Option<Arc<Codebook<D>>> {
        self.entries.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<D: Density> FromIterator<Arc<Codebook<D>>> for CodebookTable<D> {
    fn from_iter<I: IntoIterator<Item = Arc<Codebook<D>>>>(iter: I) -> Self {
        let mut table = Self::new();
        for codebook in iter {
            table.insert(codebook);
        }
        table
    }
}
