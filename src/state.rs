//! Emission states.
//!
//! The set of emission kinds is closed and tagged on disk, so [`State`] is an
//! enum dispatching to the three variants. Every variant follows the same
//! accumulator lifecycle: `init` creates a transient accumulator,
//! `accumulate`/`propagate`/`interpolate` mutate it, and `reestimate` or
//! `discard` drop it.

pub mod continuous;
pub mod discrete;
pub mod shared;

use ndarray::{ArrayView1, ArrayViewMut1};

use crate::density::{Density, GaussianMixture};
use crate::error::{Error, Result};

pub use continuous::ContinuousState;
pub use discrete::DiscreteState;
pub use shared::SharedState;

/// Persisted state type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Discrete,
    Continuous,
    Shared,
}

impl StateKind {
    pub fn tag(self) -> u8 {
        match self {
            StateKind::Discrete => b'd',
            StateKind::Continuous => b'c',
            StateKind::Shared => b's',
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            b'd' => Ok(StateKind::Discrete),
            b'c' => Ok(StateKind::Continuous),
            b's' => Ok(StateKind::Shared),
            other => Err(Error::Persistence(format!(
                "unknown state type tag 0x{:02x}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub enum State<D = GaussianMixture> {
    Discrete(DiscreteState),
    Continuous(ContinuousState<D>),
    Shared(SharedState<D>),
}

impl<D: Density> State<D> {
    pub fn kind(&self) -> StateKind {
        match self {
            State::Discrete(_) => StateKind::Discrete,
            State::Continuous(_) => StateKind::Continuous,
            State::Shared(_) => StateKind::Shared,
        }
    }

    /// Frame dimension this state consumes. Discrete states read one token.
    pub fn dimension(&self) -> Result<usize> {
        match self {
            State::Discrete(_) => Ok(1),
            State::Continuous(s) => Ok(s.density().dimension()),
            State::Shared(s) => s.codebook().dimension(),
        }
    }

    /// Likelihood of `frame` in this state.
    pub fn emits(&self, frame: ArrayView1<'_, f64>) -> Result<f64> {
        match self {
            State::Discrete(s) => s.emits(frame),
            State::Continuous(s) => s.emits(frame),
            State::Shared(s) => s.emits(frame),
        }
    }

    pub fn init(&mut self) {
        match self {
            State::Discrete(s) => s.init(),
            State::Continuous(s) => s.init(),
            State::Shared(s) => s.init(),
        }
    }

    pub fn discard(&mut self) {
        match self {
            State::Discrete(s) => s.discard(),
            State::Continuous(s) => s.discard(),
            State::Shared(s) => s.discard(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        match self {
            State::Discrete(s) => s.is_initialized(),
            State::Continuous(s) => s.is_initialized(),
            State::Shared(s) => s.is_initialized(),
        }
    }

    /// Adds `frame` with responsibility `posterior`. A zero posterior is a no-op.
    pub fn accumulate(&mut self, posterior: f64, frame: ArrayView1<'_, f64>) -> Result<()> {
        if posterior == 0.0 {
            return Ok(());
        }
        match self {
            State::Discrete(s) => s.accumulate(posterior, frame),
            State::Continuous(s) => s.accumulate(posterior, frame),
            State::Shared(s) => s.accumulate(posterior, frame),
        }
    }

    /// Checks that `other` can be combined with this state: same kind and
    /// the same alphabet, mixture shape or codebook.
    pub fn check_peer(&self, other: &State<D>) -> Result<()> {
        match (self, other) {
            (State::Discrete(s), State::Discrete(o)) => s.check_peer(o),
            (State::Continuous(s), State::Continuous(o)) => s.check_peer(o),
            (State::Shared(s), State::Shared(o)) => s.check_peer(o),
            (s, o) => Err(kind_mismatch("combine", s.kind(), o.kind())),
        }
    }

    /// Folds a same-kind peer's accumulator into this one.
    pub fn propagate(&mut self, source: &State<D>) -> Result<()> {
        match (self, source) {
            (State::Discrete(s), State::Discrete(src)) => s.propagate(src),
            (State::Continuous(s), State::Continuous(src)) => s.propagate(src),
            (State::Shared(s), State::Shared(src)) => s.propagate(src),
            (s, src) => Err(kind_mismatch("propagate", s.kind(), src.kind())),
        }
    }

    /// MAP interpolation of statistics with relevance factor `rho`.
    pub fn interpolate(&mut self, source: &State<D>, rho: f64) -> Result<()> {
        match (self, source) {
            (State::Discrete(s), State::Discrete(src)) => s.interpolate(src, rho),
            (State::Continuous(s), State::Continuous(src)) => s.interpolate(src, rho),
            (State::Shared(s), State::Shared(src)) => s.interpolate(src, rho),
            (s, src) => Err(kind_mismatch("interpolate", s.kind(), src.kind())),
        }
    }

    /// `self = weight * source + (1 - weight) * self` in parameter space.
    pub fn pinterpolate(&mut self, weight: f64, source: &State<D>) -> Result<()> {
        match (self, source) {
            (State::Discrete(s), State::Discrete(src)) => s.pinterpolate(weight, src),
            (State::Continuous(s), State::Continuous(src)) => s.pinterpolate(weight, src),
            (State::Shared(s), State::Shared(src)) => s.pinterpolate(weight, src),
            (s, src) => Err(kind_mismatch("pinterpolate", s.kind(), src.kind())),
        }
    }

    /// Recomputes parameters from the accumulator and drops it.
    ///
    /// Returns `false` when the accumulator carried no mass; parameters are
    /// then left unchanged.
    pub fn reestimate(&mut self) -> Result<bool> {
        match self {
            State::Discrete(s) => Ok(s.reestimate()),
            State::Continuous(s) => s.reestimate(),
            State::Shared(s) => Ok(s.reestimate()),
        }
    }

    /// Total accumulated responsibility.
    pub fn gamma(&self) -> f64 {
        match self {
            State::Discrete(s) => s.gamma(),
            State::Continuous(s) => s.gamma(),
            State::Shared(s) => s.gamma(),
        }
    }
}

impl<D> From<DiscreteState> for State<D> {
    fn from(state: DiscreteState) -> Self {
        State::Discrete(state)
    }
}

impl<D> From<ContinuousState<D>> for State<D> {
    fn from(state: ContinuousState<D>) -> Self {
        State::Continuous(state)
    }
}

impl<D> From<SharedState<D>> for State<D> {
    fn from(state: SharedState<D>) -> Self {
        State::Shared(state)
    }
}

fn kind_mismatch(op: &str, ours: StateKind, theirs: StateKind) -> Error {
    Error::StructuralMismatch(format!(
        "{}: cannot combine {:?} state with {:?} state",
        op, ours, theirs
    ))
}

fn not_initialized(kind: &str) -> Error {
    Error::InvalidInput(format!("{} state accumulator is not initialized", kind))
}

/// `dst = weight * src + (1 - weight) * dst`, re-normalized to sum to one.
pub(crate) fn blend_distribution(
    mut dst: ArrayViewMut1<'_, f64>,
    src: ArrayView1<'_, f64>,
    weight: f64,
) {
    dst.zip_mut_with(&src, |d, &s| *d = weight * s + (1.0 - weight) * *d);
    let total = dst.sum();
    if total > 0.0 {
        dst /= total;
    }
}

/// Adds `rho` pseudo-counts distributed like `src` to `dst`.
///
/// Returns `false` when `src` carries no mass.
pub(crate) fn add_prior_counts(
    mut dst: ArrayViewMut1<'_, f64>,
    src: ArrayView1<'_, f64>,
    rho: f64,
) -> bool {
    let src_total = src.sum();
    if src_total <= 0.0 {
        return false;
    }
    dst.scaled_add(rho / src_total, &src);
    true
}
