//! Hard (Viterbi) statistics from a single state path.

use super::Hmm;
use crate::alignment::{safe_ln, Alignment};
use crate::density::Density;
use crate::error::{Error, Result};
use crate::observation::Observation;

impl<D: Density> Hmm<D> {
    /// Checks that `path` is a valid state sequence for `observation`.
    pub(crate) fn check_path(&self, observation: &Observation, path: &[usize]) -> Result<()> {
        if path.len() != observation.len() {
            return Err(Error::MalformedAlignment(format!(
                "path of {} states for {} frames",
                path.len(),
                observation.len()
            )));
        }
        if let Some((t, &q)) = path
            .iter()
            .enumerate()
            .find(|(_, &q)| q >= self.num_states())
        {
            return Err(Error::MalformedAlignment(format!(
                "frame {} assigned to state {} of a {}-state model",
                t,
                q,
                self.num_states()
            )));
        }
        Ok(())
    }

    /// Log probability of `observation` along `path`.
    pub fn path_score(&self, observation: &Observation, path: &[usize]) -> Result<f64> {
        self.check_path(observation, path)?;
        let mut score = 0.0;
        for (t, (&q, frame)) in path.iter().zip(observation.frames()).enumerate() {
            score += if t == 0 {
                safe_ln(self.pi[q])
            } else {
                safe_ln(self.a[[path[t - 1], q]])
            };
            score += safe_ln(self.states[q].emits(frame)?);
        }
        Ok(score)
    }

    /// Accumulates hard statistics along an alignment's path, decoding a
    /// forced path first when the alignment has none.
    ///
    /// The alignment must have been created for this model.
    pub fn increment_vt(&mut self, alignment: &mut Alignment<'_>) -> Result<f64> {
        if alignment.model_id() != self.id {
            return Err(Error::StructuralMismatch(format!(
                "alignment belongs to model {}, not model {}",
                alignment.model_id(),
                self.id
            )));
        }
        if alignment.path().is_none() {
            alignment.decode(self, true)?;
        }
        let observation = alignment.observation();
        let path = alignment
            .path()
            .ok_or_else(|| Error::MalformedAlignment("alignment has no path".to_string()))?;
        self.increment_vt_path(observation, path)
    }

    /// Accumulates hard (0/1) statistics along `path`.
    ///
    /// Returns the path's log score. Like `increment_bw`, nothing is collected
    /// unless every accumulator is live.
    pub fn increment_vt_path(&mut self, observation: &Observation, path: &[usize]) -> Result<f64> {
        self.check_ready()?;
        self.check_path(observation, path)?;
        if path.is_empty() {
            return Ok(0.0);
        }
        let score = self.path_score(observation, path)?;

        for (&q, frame) in path.iter().zip(observation.frames()) {
            self.states[q].accumulate(1.0, frame)?;
        }

        let acc = self.accumulator_mut()?;
        acc.entry[path[0]] += 1.0;
        for pair in path.windows(2) {
            acc.transitions[[pair[0], pair[1]]] += 1.0;
        }
        acc.segments += 1;
        acc.frames += path.len();
        acc.log_likelihood += score;
        Ok(score)
    }
}
