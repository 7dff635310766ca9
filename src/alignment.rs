//! State alignments of an observation against a model.
//!
//! An [`Alignment`] starts without a path and becomes computed once a path
//! is decoded (free or forced Viterbi), forced (linear or random) or
//! supplied by the caller. Decoding runs in log space; zero probabilities
//! map to the finite [`LOG_ZERO`] so scores never turn into NaN.

use std::fmt;

use rand::Rng;

use crate::density::Density;
use crate::error::{Error, Result};
use crate::hmm::Hmm;
use crate::observation::Observation;

/// Log-probability used in place of `ln(0)`.
pub const LOG_ZERO: f64 = -1.0e30;

/// `ln(p)`, with [`LOG_ZERO`] for non-positive `p`.
pub fn safe_ln(p: f64) -> f64 {
    if p > 0.0 {
        p.ln()
    } else {
        LOG_ZERO
    }
}

#[derive(Debug, Clone)]
pub struct Alignment<'a> {
    model_id: i32,
    model_label: String,
    num_states: usize,
    observation: &'a Observation,
    path: Option<Vec<usize>>,
    score: f64,
}

impl<'a> Alignment<'a> {
    pub fn new<D: Density>(model: &Hmm<D>, observation: &'a Observation) -> Self {
        Self {
            model_id: model.id(),
            model_label: model.label(),
            num_states: model.num_states(),
            observation,
            path: None,
            score: f64::NEG_INFINITY,
        }
    }

    pub fn model_id(&self) -> i32 {
        self.model_id
    }

    pub fn observation(&self) -> &'a Observation {
        self.observation
    }

    pub fn path(&self) -> Option<&[usize]> {
        self.path.as_deref()
    }

    /// Log score of the current path (`NEG_INFINITY` before any path exists).
    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn is_computed(&self) -> bool {
        self.path.is_some()
    }

    fn check_model<D: Density>(&self, model: &Hmm<D>) -> Result<()> {
        if model.id() != self.model_id || model.num_states() != self.num_states {
            return Err(Error::StructuralMismatch(format!(
                "alignment was created for model {}, got model {}",
                self.model_label,
                model.label()
            )));
        }
        if self.observation.is_empty() {
            return Err(Error::MalformedAlignment(
                "cannot align an empty observation".to_string(),
            ));
        }
        Ok(())
    }

    /// Viterbi decoding in log space.
    ///
    /// With `forced`, the path must end in the model's last state, which
    /// requires at least one frame per state.
    pub fn decode<D: Density>(&mut self, model: &Hmm<D>, forced: bool) -> Result<f64> {
        self.check_model(model)?;
        let t_len = self.observation.len();
        let n = model.num_states();
        if forced && t_len < n {
            return Err(Error::MalformedAlignment(format!(
                "forced alignment of {} frames through {} states",
                t_len, n
            )));
        }

        let log_b = model.emission_table(self.observation)?.mapv(safe_ln);
        let log_a = model.transitions().mapv(safe_ln);

        // delta[t][s]: best log score of any path ending in s at time t
        // psi[t][s]: predecessor of s on that path
        let mut delta = vec![vec![LOG_ZERO; n]; t_len];
        let mut psi = vec![vec![0_usize; n]; t_len];

        for s in 0..n {
            delta[0][s] = safe_ln(model.pi()[s]) + log_b[[0, s]];
        }

        for time in 1..t_len {
            for s in 0..n {
                let mut best_val = f64::NEG_INFINITY;
                let mut best_prev = 0_usize;
                for s_prev in 0..n {
                    let candidate = delta[time - 1][s_prev] + log_a[[s_prev, s]];
                    if candidate > best_val {
                        best_val = candidate;
                        best_prev = s_prev;
                    }
                }
                delta[time][s] = best_val + log_b[[time, s]];
                psi[time][s] = best_prev;
            }
        }

        let last = &delta[t_len - 1];
        let best_final_state = if forced {
            n - 1
        } else {
            let mut best = 0_usize;
            for s in 1..n {
                if last[s] > last[best] {
                    best = s;
                }
            }
            best
        };

        let mut path = vec![0_usize; t_len];
        path[t_len - 1] = best_final_state;
        for time in (1..t_len).rev() {
            path[time - 1] = psi[time][path[time]];
        }

        self.score = last[best_final_state];
        self.path = Some(path);
        Ok(self.score)
    }

    /// Splits the frames uniformly across the states, in order.
    ///
    /// Each early state receives `round(T/N + slack)` frames, where the slack
    /// carries the rounding error forward; the last state takes what is left.
    pub fn force_linear_alignment<D: Density>(&mut self, model: &Hmm<D>) -> Result<()> {
        self.check_model(model)?;
        let t_len = self.observation.len();
        let n = model.num_states();
        let ideal = t_len as f64 / n as f64;
        let mut slack = 0.0;
        let mut path = Vec::with_capacity(t_len);
        for state in 0..n - 1 {
            let wanted = (ideal + slack).round().max(0.0) as usize;
            let run = wanted.min(t_len - path.len());
            slack += ideal - run as f64;
            path.extend(std::iter::repeat(state).take(run));
        }
        let rest = t_len - path.len();
        path.extend(std::iter::repeat(n - 1).take(rest));
        self.set_path(model, path)
    }

    /// Assigns every frame to a uniformly random state.
    ///
    /// Coverage of every state is not guaranteed.
    pub fn force_random_alignment<D: Density, R: Rng + ?Sized>(
        &mut self,
        model: &Hmm<D>,
        rng: &mut R,
    ) -> Result<()> {
        self.check_model(model)?;
        let n = model.num_states();
        let path = (0..self.observation.len())
            .map(|_| rng.gen_range(0..n))
            .collect();
        self.set_path(model, path)
    }

    /// Uses an externally supplied path.
    pub fn set_path<D: Density>(&mut self, model: &Hmm<D>, path: Vec<usize>) -> Result<()> {
        self.check_model(model)?;
        self.score = model.path_score(self.observation, &path)?;
        self.path = Some(path);
        Ok(())
    }

    /// Frames assigned to each state.
    pub fn state_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.num_states];
        for &q in self.path.iter().flatten() {
            counts[q] += 1;
        }
        counts
    }

    /// Run-length encoding of the path as `(state, start, length)`.
    pub fn segments(&self) -> Vec<(usize, usize, usize)> {
        let mut runs: Vec<(usize, usize, usize)> = Vec::new();
        for (t, &q) in self.path.iter().flatten().enumerate() {
            match runs.last_mut() {
                Some((state, _, len)) if *state == q => *len += 1,
                _ => runs.push((q, t, 1)),
            }
        }
        runs
    }

    /// One-line summary: model label, per-state frame counts and the
    /// run-length encoded path.
    pub fn pack(&self) -> String {
        let counts: Vec<String> = self.state_counts().iter().map(|c| c.to_string()).collect();
        let runs: Vec<String> = self
            .segments()
            .iter()
            .map(|(q, _, len)| format!("{}x{}", q, len))
            .collect();
        format!(
            "{} [{}] {}",
            self.model_label,
            counts.join(" "),
            runs.join(" ")
        )
    }
}

impl fmt::Display for Alignment<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "alignment of model {} over {} frames",
            self.model_label,
            self.observation.len()
        )?;
        let Some(path) = &self.path else {
            return write!(f, "  (not computed)");
        };
        writeln!(f, "  score: {:.4}", self.score)?;
        for (q, count) in self.state_counts().iter().enumerate() {
            writeln!(f, "  state {:>3}: {} frames", q, count)?;
        }
        let states: Vec<String> = path.iter().map(|q| q.to_string()).collect();
        write!(f, "  path: {}", states.join(" "))
    }
}
