//! EM training driver.
//!
//! A [`Trainer`] runs accumulate / re-estimate epochs over a model until the
//! relative log-likelihood gain drops below the configured tolerance. Every
//! epoch also wires and re-estimates the codebooks the model's shared
//! states reference. [`Trainer::train_sharded`] accumulates each shard on a
//! private clone of the model in parallel and folds the clones back into the
//! master with `propagate`, in shard order.

use std::sync::Arc;

use log::{debug, info, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::alignment::{Alignment, LOG_ZERO};
use crate::density::{Codebook, Density};
use crate::error::{Error, Result};
use crate::hmm::Hmm;
use crate::observation::Observation;

/// How statistics are collected each epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingAlgorithm {
    /// Soft statistics from forward-backward.
    BaumWelch,
    /// Hard statistics along the forced Viterbi path.
    Viterbi,
}

/// Configuration for [`Trainer`].
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    /// Upper bound on the number of epochs.
    pub max_iterations: usize,
    /// Training stops once `|ll - ll_prev| / |ll_prev|` falls below this.
    pub tolerance: f64,
    /// Epochs always run before the tolerance is checked.
    pub min_iterations: usize,
    pub algorithm: TrainingAlgorithm,
    /// Seed for random alignments (optional).
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            tolerance: 1e-4,
            min_iterations: 1,
            algorithm: TrainingAlgorithm::BaumWelch,
            seed: None,
        }
    }
}

impl TrainingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_min_iterations(mut self, iterations: usize) -> Self {
        self.min_iterations = iterations;
        self
    }

    pub fn with_algorithm(mut self, algorithm: TrainingAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(Error::InvalidInput(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.min_iterations > self.max_iterations {
            return Err(Error::InvalidInput(format!(
                "min_iterations {} exceeds max_iterations {}",
                self.min_iterations, self.max_iterations
            )));
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(Error::InvalidInput(format!(
                "tolerance must be finite and non-negative, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    /// Total log-likelihood (Baum-Welch) or path score (Viterbi) of the
    /// training data, one entry per epoch, measured before re-estimation.
    pub log_likelihoods: Vec<f64>,
    /// Whether the tolerance was met before `max_iterations`.
    pub converged: bool,
}

impl TrainingReport {
    pub fn iterations(&self) -> usize {
        self.log_likelihoods.len()
    }

    pub fn final_log_likelihood(&self) -> Option<f64> {
        self.log_likelihoods.last().copied()
    }
}

#[derive(Debug, Clone)]
pub struct Trainer {
    config: TrainingConfig,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Trains `model` on `data` serially.
    pub fn train<D: Density>(&self, model: &mut Hmm<D>, data: &[Observation]) -> Result<TrainingReport> {
        self.run(model, |m: &mut Hmm<D>| self.epoch(m, data))
    }

    /// Trains `model` with one parallel worker per shard.
    ///
    /// The result matches [`Trainer::train`] on the concatenated shards up to
    /// floating-point summation order.
    pub fn train_sharded<D: Density>(
        &self,
        model: &mut Hmm<D>,
        shards: &[Vec<Observation>],
    ) -> Result<TrainingReport> {
        self.run(model, |m: &mut Hmm<D>| self.sharded_epoch(m, shards))
    }

    /// One Viterbi epoch from linear alignments of every segment.
    ///
    /// Returns the total score of the linear paths.
    pub fn bootstrap_viterbi<D: Density>(&self, model: &mut Hmm<D>, data: &[Observation]) -> Result<f64> {
        with_codebooks(model, |m| {
            let mut total = 0.0;
            for (n, observation) in data.iter().enumerate() {
                if observation.is_empty() {
                    warn!("model {}: empty segment {} skipped", m.label(), n);
                    continue;
                }
                let mut alignment = Alignment::new(m, observation);
                alignment.force_linear_alignment(m)?;
                total += m.increment_vt(&mut alignment)?;
            }
            Ok(total)
        })
    }

    /// One Viterbi epoch from uniformly random alignments, drawn from the
    /// configured seed.
    pub fn bootstrap_random<D: Density>(&self, model: &mut Hmm<D>, data: &[Observation]) -> Result<f64> {
        let seed = self.config.seed.unwrap_or_else(rand::random);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        debug!("random bootstrap with seed {}", seed);
        with_codebooks(model, |m| {
            let mut total = 0.0;
            for (n, observation) in data.iter().enumerate() {
                if observation.is_empty() {
                    warn!("model {}: empty segment {} skipped", m.label(), n);
                    continue;
                }
                let mut alignment = Alignment::new(m, observation);
                alignment.force_random_alignment(m, &mut rng)?;
                total += m.increment_vt(&mut alignment)?;
            }
            Ok(total)
        })
    }

    fn run<D, F>(&self, model: &mut Hmm<D>, mut epoch: F) -> Result<TrainingReport>
    where
        D: Density,
        F: FnMut(&mut Hmm<D>) -> Result<f64>,
    {
        let mut report = TrainingReport {
            log_likelihoods: Vec::with_capacity(self.config.max_iterations),
            converged: false,
        };
        for iteration in 0..self.config.max_iterations {
            let ll = epoch(model)?;
            debug!(
                "model {}: epoch {} log-likelihood {:.6}",
                model.label(),
                iteration + 1,
                ll
            );
            let previous = report.log_likelihoods.last().copied();
            report.log_likelihoods.push(ll);

            if iteration + 1 < self.config.min_iterations {
                continue;
            }
            if let Some(prev) = previous {
                let gain = (ll - prev) / prev.abs().max(f64::MIN_POSITIVE);
                if gain.abs() < self.config.tolerance {
                    info!(
                        "model {}: converged after {} epochs (log-likelihood {:.6})",
                        model.label(),
                        iteration + 1,
                        ll
                    );
                    report.converged = true;
                    break;
                }
            }
        }
        if !report.converged {
            info!(
                "model {}: stopped after {} epochs without converging",
                model.label(),
                report.iterations()
            );
        }
        Ok(report)
    }

    fn epoch<D: Density>(&self, model: &mut Hmm<D>, data: &[Observation]) -> Result<f64> {
        with_codebooks(model, |m| {
            let mut total = 0.0;
            for observation in data {
                total += self.accumulate(m, observation)?;
            }
            Ok(total)
        })
    }

    fn sharded_epoch<D: Density>(&self, model: &mut Hmm<D>, shards: &[Vec<Observation>]) -> Result<f64> {
        with_codebooks(model, |m| {
            // clones must not carry the master's accumulators
            m.discard();
            let master: &Hmm<D> = m;
            let workers = shards
                .par_iter()
                .map(|shard| -> Result<(Hmm<D>, f64)> {
                    let mut worker = master.clone();
                    worker.init();
                    let mut total = 0.0;
                    for observation in shard {
                        total += self.accumulate(&mut worker, observation)?;
                    }
                    Ok((worker, total))
                })
                .collect::<Result<Vec<_>>>()?;

            m.init();
            let mut total = 0.0;
            for (worker, ll) in &workers {
                m.propagate(worker)?;
                total += ll;
            }
            Ok(total)
        })
    }

    /// Statistics of one segment; impossible or too-short segments
    /// contribute nothing.
    fn accumulate<D: Density>(&self, model: &mut Hmm<D>, observation: &Observation) -> Result<f64> {
        let score = match self.config.algorithm {
            TrainingAlgorithm::BaumWelch => model.increment_bw(observation)?,
            TrainingAlgorithm::Viterbi => {
                if observation.len() < model.num_states() {
                    warn!(
                        "model {}: segment of {} frames cannot be force-aligned through {} states",
                        model.label(),
                        observation.len(),
                        model.num_states()
                    );
                    return Ok(0.0);
                }
                let mut alignment = Alignment::new(model, observation);
                alignment.decode(model, true)?;
                if alignment.score() <= LOG_ZERO / 2.0 {
                    warn!(
                        "model {}: no possible forced path, segment of {} frames skipped",
                        model.label(),
                        observation.len()
                    );
                    return Ok(0.0);
                }
                model.increment_vt(&mut alignment)?
            }
        };
        Ok(if score.is_finite() { score } else { 0.0 })
    }
}

/// Runs `collect` between wiring and re-estimating the model and the
/// codebooks it references. On failure every accumulator is dropped.
fn with_codebooks<D, F>(model: &mut Hmm<D>, collect: F) -> Result<f64>
where
    D: Density,
    F: FnOnce(&mut Hmm<D>) -> Result<f64>,
{
    let codebooks = model.codebooks();
    let result = wire(&codebooks).and_then(|_| {
        model.init();
        collect(model)
    });
    let total = match result {
        Ok(total) => total,
        Err(e) => {
            model.discard();
            for codebook in &codebooks {
                codebook.discard_accumulator()?;
            }
            return Err(e);
        }
    };
    model.reestimate()?;
    for codebook in &codebooks {
        if !codebook.reestimate()? {
            debug!("codebook {}: no statistics, parameters unchanged", codebook.id());
        }
    }
    Ok(total)
}

fn wire<D: Density>(codebooks: &[Arc<Codebook<D>>]) -> Result<()> {
    for codebook in codebooks {
        codebook.init_accumulator()?;
    }
    Ok(())
}
