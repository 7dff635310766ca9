//! Scaled forward-backward (Baum-Welch) statistics.
//!
//! Each forward column is normalized by `scale[t] = sum_j alpha_raw[t][j]`
//! and the backward pass reuses the same constants, which keeps magnitudes
//! bounded over arbitrarily long segments. The log-likelihood of a segment
//! is `sum_t ln scale[t]`.

use log::warn;
use ndarray::{s, Array1, Array2, Axis};

use super::Hmm;
use crate::density::Density;
use crate::error::Result;
use crate::observation::Observation;

/// Forward variables with their per-frame normalization constants.
pub(crate) struct Forward {
    pub alpha: Array2<f64>,
    pub scale: Array1<f64>,
}

impl<D: Density> Hmm<D> {
    /// `b[[t, j]]`: likelihood of frame `t` in state `j`, evaluated once.
    pub(crate) fn emission_table(&self, observation: &Observation) -> Result<Array2<f64>> {
        let mut b = Array2::zeros((observation.len(), self.num_states()));
        for (t, frame) in observation.frames().enumerate() {
            for (j, state) in self.states.iter().enumerate() {
                b[[t, j]] = state.emits(frame)?;
            }
        }
        Ok(b)
    }

    /// Scaled forward pass. `None` when some frame has zero likelihood under
    /// every path.
    pub(crate) fn forward(&self, b: &Array2<f64>) -> Option<Forward> {
        let (t_len, n) = b.dim();
        let mut alpha = Array2::zeros((t_len, n));
        let mut scale = Array1::zeros(t_len);
        for t in 0..t_len {
            let mut column = if t == 0 {
                &self.pi * &b.row(0)
            } else {
                alpha.row(t - 1).dot(&self.a) * b.row(t)
            };
            let c = column.sum();
            if !(c > 0.0) {
                return None;
            }
            column /= c;
            alpha.row_mut(t).assign(&column);
            scale[t] = c;
        }
        Some(Forward { alpha, scale })
    }

    /// Scaled backward pass using the forward scale constants.
    pub(crate) fn backward(&self, b: &Array2<f64>, scale: &Array1<f64>) -> Array2<f64> {
        let (t_len, n) = b.dim();
        let mut beta = Array2::zeros((t_len, n));
        if t_len == 0 {
            return beta;
        }
        beta.row_mut(t_len - 1).fill(1.0);
        for t in (0..t_len - 1).rev() {
            let weighted = &b.row(t + 1) * &beta.row(t + 1);
            let column = self.a.dot(&weighted) / scale[t + 1];
            beta.row_mut(t).assign(&column);
        }
        beta
    }

    /// Log-likelihood of `observation` under the current parameters.
    pub fn log_likelihood(&self, observation: &Observation) -> Result<f64> {
        let b = self.emission_table(observation)?;
        Ok(self
            .forward(&b)
            .map_or(f64::NEG_INFINITY, |fwd| fwd.scale.mapv(f64::ln).sum()))
    }

    /// Accumulates soft (forward-backward) statistics for one segment.
    ///
    /// Returns the segment log-likelihood. A segment that is impossible under
    /// the model contributes nothing and yields `NEG_INFINITY`. Fails with
    /// `InvalidInput`, collecting nothing, unless the model, its states and
    /// their codebooks are all initialized.
    pub fn increment_bw(&mut self, observation: &Observation) -> Result<f64> {
        self.check_ready()?;
        let t_len = observation.len();
        let n = self.num_states();
        if t_len == 0 {
            warn!("model {}: empty segment ignored", self.label());
            return Ok(0.0);
        }
        if t_len < n {
            warn!(
                "model {}: segment of {} frames is shorter than the {} states",
                self.label(),
                t_len,
                n
            );
        }

        let b = self.emission_table(observation)?;
        let Some(Forward { alpha, scale }) = self.forward(&b) else {
            warn!(
                "model {}: segment has zero likelihood, no statistics collected",
                self.label()
            );
            return Ok(f64::NEG_INFINITY);
        };
        let beta = self.backward(&b, &scale);

        let mut gamma = &alpha * &beta;
        for mut row in gamma.axis_iter_mut(Axis(0)) {
            let total = row.sum();
            if total > 0.0 {
                row /= total;
            }
        }

        // xi summed over t: alpha[t][i] * a[i][j] * b[t+1][j] * beta[t+1][j] / scale[t+1]
        let mut xi = Array2::<f64>::zeros((n, n));
        for t in 0..t_len - 1 {
            let next = &b.row(t + 1) * &beta.row(t + 1) / scale[t + 1];
            let outer = alpha
                .slice(s![t, ..])
                .insert_axis(Axis(1))
                .dot(&next.insert_axis(Axis(0)));
            xi += &(&outer * &self.a);
        }

        for (t, frame) in observation.frames().enumerate() {
            for (i, state) in self.states.iter_mut().enumerate() {
                state.accumulate(gamma[[t, i]], frame)?;
            }
        }

        let log_likelihood = scale.mapv(f64::ln).sum();
        let acc = self.accumulator_mut()?;
        acc.entry += &gamma.row(0);
        acc.transitions += &xi;
        acc.segments += 1;
        acc.frames += t_len;
        acc.log_likelihood += log_likelihood;
        Ok(log_likelihood)
    }
}
