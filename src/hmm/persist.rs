//! Binary model layout.
//!
//! ```text
//! int32   id
//! int16   ns
//! float32 pi[ns]
//! float32 a[ns][ns]            row-major
//! ns x state:
//!   u8 tag                     'd' | 'c' | 's'
//!   'd': f64 seq alphabet, f64 seq distribution
//!   'c': density payload
//!   's': f64 seq weights, int32 codebook id
//! ```
//!
//! All values are little-endian; an `f64 seq` is an int32 count followed by
//! that many float64 values. Transition parameters are stored in single
//! precision. The model tag is not stored.

use std::io::{Read, Write};

use ndarray::{Array1, Array2};

use super::Hmm;
use crate::codec;
use crate::density::{CodebookTable, Density};
use crate::error::{Error, Result};
use crate::state::{ContinuousState, DiscreteState, SharedState, State, StateKind};

impl<D: Density> Hmm<D> {
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let ns = i16::try_from(self.num_states()).map_err(|_| {
            Error::Persistence(format!(
                "{} states do not fit the int16 state count",
                self.num_states()
            ))
        })?;
        codec::write_i32(writer, self.id)?;
        codec::write_i16(writer, ns)?;
        for &p in &self.pi {
            codec::write_f32(writer, p as f32)?;
        }
        for &p in &self.a {
            codec::write_f32(writer, p as f32)?;
        }
        for state in &self.states {
            write_state(writer, state)?;
        }
        Ok(())
    }

    /// Reads a model, resolving shared-state codebook ids in `codebooks`.
    pub fn read_from<R: Read>(reader: &mut R, codebooks: &CodebookTable<D>) -> Result<Self> {
        let id = codec::read_i32(reader)?;
        let ns = codec::read_i16(reader)?;
        if ns <= 0 {
            return Err(Error::Persistence(format!("model {}: invalid state count {}", id, ns)));
        }
        let ns = ns as usize;

        let mut pi = Array1::zeros(ns);
        for p in pi.iter_mut() {
            *p = f64::from(codec::read_f32(reader)?);
        }
        let mut a = Array2::zeros((ns, ns));
        for p in a.iter_mut() {
            *p = f64::from(codec::read_f32(reader)?);
        }

        let states = (0..ns)
            .map(|_| read_state(reader, codebooks))
            .collect::<Result<Vec<_>>>()?;
        Hmm::new(id, states, pi, a)
    }
}

fn write_state<D: Density, W: Write>(writer: &mut W, state: &State<D>) -> Result<()> {
    codec::write_u8(writer, state.kind().tag())?;
    match state {
        State::Discrete(s) => {
            codec::write_f64_seq(writer, s.alphabet().iter().copied())?;
            codec::write_f64_seq(writer, s.probabilities().iter().copied())
        }
        State::Continuous(s) => s.density().write_to(writer),
        State::Shared(s) => {
            codec::write_f64_seq(writer, s.weights().iter().copied())?;
            codec::write_i32(writer, s.codebook().id())
        }
    }
}

fn read_state<D: Density, R: Read>(reader: &mut R, codebooks: &CodebookTable<D>) -> Result<State<D>> {
    let state = match StateKind::from_tag(codec::read_u8(reader)?)? {
        StateKind::Discrete => {
            let alphabet = codec::read_f64_seq(reader)?;
            let probabilities = Array1::from(codec::read_f64_seq(reader)?);
            DiscreteState::new(alphabet, probabilities)
                .map_err(|e| Error::Persistence(e.to_string()))?
                .into()
        }
        StateKind::Continuous => ContinuousState::new(D::read_from(reader)?).into(),
        StateKind::Shared => {
            let weights = Array1::from(codec::read_f64_seq(reader)?);
            let codebook_id = codec::read_i32(reader)?;
            let codebook = codebooks.get(codebook_id).ok_or_else(|| {
                Error::Persistence(format!("unresolved codebook id {}", codebook_id))
            })?;
            SharedState::new(weights, codebook)
                .map_err(|e| Error::Persistence(e.to_string()))?
                .into()
        }
    };
    Ok(state)
}
