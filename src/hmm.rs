//! The HMM engine.
//!
//! An [`Hmm`] composes an ordered array of emission states with an entry
//! probability vector `pi` and a transition matrix `a`. Training follows the
//! accumulator protocol:
//!
//! 1. `init()` creates empty model and state accumulators,
//! 2. `increment_bw` / `increment_vt` collect statistics per segment,
//! 3. `propagate` optionally folds in statistics collected by worker copies,
//! 4. `reestimate()` turns the statistics into new parameters (or
//!    `discard()` drops them).
//!
//! Rows, entry vectors and states without accumulated mass keep their prior
//! values, so an unvisited state can still recover in a later iteration.

pub mod accumulator;
pub mod forward_backward;
pub mod persist;
pub mod topology;
pub mod viterbi;

use std::sync::Arc;

use approx::relative_eq;
use log::{debug, warn};
use ndarray::{Array1, Array2};

use crate::density::{Codebook, Density, GaussianMixture};
use crate::error::{Error, Result};
use crate::state::{add_prior_counts, blend_distribution, State};

pub use accumulator::Accumulator;
pub use topology::Topology;

#[derive(Debug, Clone)]
pub struct Hmm<D = GaussianMixture> {
    id: i32,
    tag: Option<String>,
    states: Vec<State<D>>,
    pi: Array1<f64>,
    a: Array2<f64>,
    accumulator: Option<Accumulator>,
}

impl<D: Density> Hmm<D> {
    /// Creates a model from explicit parameters.
    ///
    /// `pi` must have one entry per state and `a` must be square of the same
    /// size.
    pub fn new(id: i32, states: Vec<State<D>>, pi: Array1<f64>, a: Array2<f64>) -> Result<Self> {
        let ns = states.len();
        if ns == 0 {
            return Err(Error::InvalidInput("a model needs at least one state".to_string()));
        }
        if pi.len() != ns || a.dim() != (ns, ns) {
            return Err(Error::StructuralMismatch(format!(
                "{} states with {} entry probabilities and a {:?} transition matrix",
                ns,
                pi.len(),
                a.dim()
            )));
        }
        if !relative_eq!(pi.sum(), 1.0, epsilon = 1e-6) {
            warn!("model {}: entry probabilities sum to {}", id, pi.sum());
        }
        Ok(Self {
            id,
            tag: None,
            states,
            pi,
            a,
            accumulator: None,
        })
    }

    /// Creates a model whose `pi` and `a` follow a topology template.
    pub fn with_topology(id: i32, states: Vec<State<D>>, topology: Topology) -> Result<Self> {
        let ns = states.len();
        let (pi, a) = topology.matrices(ns)?;
        Self::new(id, states, pi, a)
    }

    /// Numeric id; persisted and used to match alignments.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Optional human-readable name, not persisted.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Replaces the tag.
    pub fn set_tag(&mut self, tag: impl Into<String>) {
        self.tag = Some(tag.into());
    }

    /// Builder form of [`Hmm::set_tag`].
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.set_tag(tag);
        self
    }

    /// The tag when present, the id otherwise.
    pub fn label(&self) -> String {
        self.tag.clone().unwrap_or_else(|| self.id.to_string())
    }

    /// Number of emitting states.
    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    /// Emitting states in index order.
    pub fn states(&self) -> &[State<D>] {
        &self.states
    }

    /// State `i`, if it exists.
    pub fn state(&self, i: usize) -> Option<&State<D>> {
        self.states.get(i)
    }

    /// Entry probabilities.
    pub fn pi(&self) -> &Array1<f64> {
        &self.pi
    }

    /// Row-stochastic transition matrix.
    pub fn transitions(&self) -> &Array2<f64> {
        &self.a
    }

    /// Model-level statistics collected since `init`.
    pub fn accumulator(&self) -> Option<&Accumulator> {
        self.accumulator.as_ref()
    }

    /// Distinct codebooks referenced by shared states, in state order.
    pub fn codebooks(&self) -> Vec<Arc<Codebook<D>>> {
        let mut found: Vec<Arc<Codebook<D>>> = Vec::new();
        for state in &self.states {
            if let State::Shared(s) = state {
                if !found.iter().any(|c| c.id() == s.codebook().id()) {
                    found.push(Arc::clone(s.codebook()));
                }
            }
        }
        found
    }

    /// Creates fresh model and state accumulators.
    pub fn init(&mut self) {
        if self.accumulator.is_some() {
            warn!("model {}: replacing an existing accumulator", self.label());
        }
        self.accumulator = Some(Accumulator::new(self.num_states()));
        for state in &mut self.states {
            state.init();
        }
    }

    /// Drops model and state accumulators.
    pub fn discard(&mut self) {
        self.accumulator = None;
        for state in &mut self.states {
            state.discard();
        }
    }

    pub(crate) fn accumulator_mut(&mut self) -> Result<&mut Accumulator> {
        let id = self.id;
        self.accumulator
            .as_mut()
            .ok_or_else(|| Error::InvalidInput(format!("model {} accumulator is not initialized", id)))
    }

    /// Fails unless the model and every state have live accumulators.
    fn check_initialized(&self) -> Result<()> {
        if self.accumulator.is_none() {
            return Err(Error::InvalidInput(format!(
                "model {} accumulator is not initialized",
                self.label()
            )));
        }
        if let Some(i) = self.states.iter().position(|s| !s.is_initialized()) {
            return Err(Error::InvalidInput(format!(
                "model {}: state {} accumulator is not initialized",
                self.label(),
                i
            )));
        }
        Ok(())
    }

    /// `check_initialized`, plus every referenced codebook must be
    /// wired.
    pub(crate) fn check_ready(&self) -> Result<()> {
        self.check_initialized()?;
        for codebook in self.codebooks() {
            if !codebook.is_wired()? {
                return Err(Error::InvalidInput(format!(
                    "model {}: codebook {} accumulator is not initialized",
                    self.label(),
                    codebook.id()
                )));
            }
        }
        Ok(())
    }

    /// Re-estimates `pi`, `a` and every state from the accumulated
    /// statistics, then drops the accumulators.
    ///
    /// A state whose outgoing transition mass is zero keeps its row of `a`
    /// and its emission parameters.
    pub fn reestimate(&mut self) -> Result<()> {
        let Some(acc) = self.accumulator.take() else {
            warn!("model {}: reestimate without an accumulator", self.label());
            self.discard();
            return Ok(());
        };

        for i in 0..self.num_states() {
            let row = acc.transitions.row(i);
            let total = row.sum();
            if total <= 0.0 {
                warn!(
                    "model {}: state {} has no transition mass, row and state left unchanged",
                    self.label(),
                    i
                );
                self.states[i].discard();
                continue;
            }
            self.a.row_mut(i).assign(&(&row / total));
            if !self.states[i].reestimate()? {
                debug!("model {}: state {} emission parameters unchanged", self.label(), i);
            }
        }

        let entry_total = acc.entry.sum();
        if entry_total > 0.0 {
            self.pi = &acc.entry / entry_total;
        } else {
            warn!("model {}: no entry mass, entry probabilities unchanged", self.label());
        }

        debug!(
            "model {}: reestimated from {} segments / {} frames",
            self.label(),
            acc.segments,
            acc.frames
        );
        Ok(())
    }

    fn check_structure(&self, other: &Hmm<D>, op: &str) -> Result<()> {
        if self.num_states() != other.num_states() {
            return Err(Error::StructuralMismatch(format!(
                "{}: model {} has {} states, model {} has {}",
                op,
                self.label(),
                self.num_states(),
                other.label(),
                other.num_states()
            )));
        }
        for (i, (ours, theirs)) in self.states.iter().zip(&other.states).enumerate() {
            if let Err(err) = ours.check_peer(theirs) {
                return Err(Error::StructuralMismatch(format!(
                    "{}: state {} of models {} and {}: {}",
                    op,
                    i,
                    self.label(),
                    other.label(),
                    err
                )));
            }
        }
        Ok(())
    }

    /// Folds a structurally identical peer's statistics into this model.
    ///
    /// Used to merge the accumulators of data-parallel workers before a
    /// single `reestimate`.
    pub fn propagate(&mut self, source: &Hmm<D>) -> Result<()> {
        self.check_structure(source, "propagate")?;
        let Some(src) = source.accumulator.as_ref() else {
            debug!("model {}: propagate source has no statistics", source.label());
            return Ok(());
        };
        self.check_initialized()?;
        self.accumulator_mut()?.merge(src)?;
        for (state, peer) in self.states.iter_mut().zip(&source.states) {
            state.propagate(peer)?;
        }
        Ok(())
    }

    /// Statistic-level MAP interpolation towards `source` with relevance
    /// factor `rho`.
    ///
    /// After `reestimate` each distribution equals
    /// `(1 - w) * ML(self) + w * ML(source)` with `w = rho / (rho + gamma)`,
    /// `gamma` being the mass this model accumulated for that distribution.
    pub fn interpolate(&mut self, source: &Hmm<D>, rho: f64) -> Result<()> {
        self.check_structure(source, "interpolate")?;
        let Some(src) = source.accumulator.as_ref() else {
            warn!(
                "model {}: interpolation source has no statistics, skipped",
                source.label()
            );
            return Ok(());
        };
        self.check_initialized()?;
        let label = self.label();
        let acc = self.accumulator_mut()?;
        if !add_prior_counts(acc.entry.view_mut(), src.entry.view(), rho) {
            warn!("model {}: interpolation source has no entry mass", label);
        }
        for i in 0..acc.num_states() {
            if !add_prior_counts(acc.transitions.row_mut(i), src.transitions.row(i), rho) {
                debug!("model {}: interpolation source row {} is empty", label, i);
            }
        }
        for (state, peer) in self.states.iter_mut().zip(&source.states) {
            state.interpolate(peer, rho)?;
        }
        Ok(())
    }

    /// Parameter-space interpolation `self = weight * source + (1 - weight) * self`
    /// of `pi`, every row of `a` and every state.
    pub fn pinterpolate(&mut self, weight: f64, source: &Hmm<D>) -> Result<()> {
        self.check_structure(source, "pinterpolate")?;
        if !(0.0..=1.0).contains(&weight) {
            return Err(Error::InvalidInput(format!(
                "interpolation weight {} outside [0, 1]",
                weight
            )));
        }
        blend_distribution(self.pi.view_mut(), source.pi.view(), weight);
        for (row, src) in self.a.rows_mut().into_iter().zip(source.a.rows()) {
            blend_distribution(row, src, weight);
        }
        for (state, peer) in self.states.iter_mut().zip(&source.states) {
            state.pinterpolate(weight, peer)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::observation::Observation;
    use crate::state::DiscreteState;
    use approx::assert_relative_eq;
    use ndarray::array;

    pub(crate) fn coin_state(p_heads: f64) -> State {
        DiscreteState::new(vec![0.0, 1.0], array![p_heads, 1.0 - p_heads])
            .unwrap()
            .into()
    }

    /// Two discrete states over {0, 1}, ergodic.
    pub(crate) fn toy_model(id: i32) -> Hmm {
        Hmm::new(
            id,
            vec![coin_state(0.75), coin_state(0.25)],
            array![0.5, 0.5],
            array![[0.75, 0.25], [0.25, 0.75]],
        )
        .unwrap()
    }

    #[test]
    fn test_new_rejects_bad_shapes() {
        let err = Hmm::new(1, vec![coin_state(0.5)], array![0.5, 0.5], array![[1.0]]);
        assert!(matches!(err, Err(Error::StructuralMismatch(_))));
        let err = Hmm::<GaussianMixture>::new(1, vec![], Array1::zeros(0), Array2::zeros((0, 0)));
        assert!(matches!(err, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_label_prefers_tag() {
        let m = toy_model(42);
        assert_eq!(m.label(), "42");
        assert_eq!(m.with_tag("sil").label(), "sil");
    }

    #[test]
    fn test_reestimate_without_activity_keeps_parameters() {
        let mut m = toy_model(1);
        let before = (m.pi().clone(), m.transitions().clone());
        m.init();
        m.reestimate().unwrap();
        assert_eq!(m.pi(), &before.0);
        assert_eq!(m.transitions(), &before.1);
        assert!(m.accumulator().is_none());
        assert!(m.states().iter().all(|s| !s.is_initialized()));
    }

    #[test]
    fn test_reestimate_normalizes_rows() {
        let mut m = toy_model(1);
        m.init();
        m.increment_bw(&Observation::from_tokens(&[0.0, 0.0, 1.0, 1.0, 0.0]))
            .unwrap();
        m.reestimate().unwrap();
        assert_relative_eq!(m.pi().sum(), 1.0, epsilon = 1e-12);
        for row in m.transitions().rows() {
            assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_propagate_equals_single_model_accumulation() {
        let shard_a = vec![
            Observation::from_tokens(&[0.0, 0.0, 1.0, 0.0]),
            Observation::from_tokens(&[1.0, 1.0, 1.0]),
        ];
        let shard_b = vec![Observation::from_tokens(&[0.0, 1.0, 0.0, 1.0, 1.0, 0.0])];

        let mut single = toy_model(3);
        single.init();
        for obs in shard_a.iter().chain(&shard_b) {
            single.increment_bw(obs).unwrap();
        }
        single.reestimate().unwrap();

        let mut master = toy_model(3);
        let mut worker_a = master.clone();
        let mut worker_b = master.clone();
        worker_a.init();
        worker_b.init();
        for obs in &shard_a {
            worker_a.increment_bw(obs).unwrap();
        }
        for obs in &shard_b {
            worker_b.increment_bw(obs).unwrap();
        }
        master.init();
        master.propagate(&worker_b).unwrap();
        master.propagate(&worker_a).unwrap();
        master.reestimate().unwrap();

        for (x, y) in master.pi().iter().zip(single.pi()) {
            assert_relative_eq!(x, y, epsilon = 1e-12);
        }
        for (x, y) in master.transitions().iter().zip(single.transitions()) {
            assert_relative_eq!(x, y, epsilon = 1e-12);
        }
        for (s, t) in master.states().iter().zip(single.states()) {
            let (State::Discrete(s), State::Discrete(t)) = (s, t) else {
                panic!("expected discrete states");
            };
            for (x, y) in s.probabilities().iter().zip(t.probabilities()) {
                assert_relative_eq!(x, y, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_propagate_structural_mismatch() {
        let mut a = toy_model(1);
        let b = Hmm::with_topology(1, vec![coin_state(0.5)], Topology::Linear).unwrap();
        a.init();
        assert!(matches!(a.propagate(&b), Err(Error::StructuralMismatch(_))));
        assert!(matches!(
            a.pinterpolate(0.5, &b),
            Err(Error::StructuralMismatch(_))
        ));
        assert!(matches!(
            a.interpolate(&b, 1.0),
            Err(Error::StructuralMismatch(_))
        ));
    }

    #[test]
    fn test_alphabet_mismatch_leaves_model_untouched() {
        let mut master = toy_model(1);
        let mut peer = Hmm::new(
            1,
            vec![
                coin_state(0.75),
                DiscreteState::new(vec![0.0, 2.0], array![0.5, 0.5])
                    .unwrap()
                    .into(),
            ],
            array![0.5, 0.5],
            array![[0.75, 0.25], [0.25, 0.75]],
        )
        .unwrap();
        peer.init();
        peer.increment_bw(&Observation::from_tokens(&[0.0, 0.0, 0.0]))
            .unwrap();
        master.init();

        assert!(matches!(
            master.propagate(&peer),
            Err(Error::StructuralMismatch(_))
        ));
        let acc = master.accumulator().unwrap();
        assert_eq!(acc.segments, 0);
        assert_eq!(acc.frames, 0);
        assert_eq!(acc.entry.sum(), 0.0);
        assert_eq!(acc.transitions.sum(), 0.0);
        assert!(master.states().iter().all(|s| s.gamma() == 0.0));

        assert!(matches!(
            master.interpolate(&peer, 1.0),
            Err(Error::StructuralMismatch(_))
        ));
        assert_eq!(master.accumulator().unwrap().entry.sum(), 0.0);
        assert!(master.states().iter().all(|s| s.gamma() == 0.0));

        let before = (master.pi().clone(), master.transitions().clone());
        assert!(matches!(
            master.pinterpolate(0.5, &peer),
            Err(Error::StructuralMismatch(_))
        ));
        assert_eq!(master.pi(), &before.0);
        assert_eq!(master.transitions(), &before.1);
    }

    #[test]
    fn test_propagate_into_partly_initialized_model() {
        let mut master = toy_model(1);
        let mut worker = toy_model(1);
        worker.init();
        worker
            .increment_bw(&Observation::from_tokens(&[0.0, 1.0, 1.0]))
            .unwrap();
        master.init();
        master.states[1].discard();
        assert!(matches!(
            master.propagate(&worker),
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(master.accumulator().unwrap().segments, 0);
        assert_eq!(master.states()[0].gamma(), 0.0);
    }

    #[test]
    fn test_check_ready_requires_wired_codebooks() {
        use crate::state::SharedState;
        let cb = Codebook::shared(6, GaussianMixture::single(&[0.0]));
        let states: Vec<State> = (0..2)
            .map(|_| SharedState::uniform(cb.clone()).unwrap().into())
            .collect();
        let mut m = Hmm::with_topology(2, states, Topology::Linear).unwrap();
        assert!(matches!(m.check_ready(), Err(Error::InvalidInput(_))));
        m.init();
        assert!(matches!(m.check_ready(), Err(Error::InvalidInput(_))));
        cb.init_accumulator().unwrap();
        assert!(m.check_ready().is_ok());
    }

    #[test]
    fn test_pinterpolate_extremes() {
        let source = Hmm::new(
            9,
            vec![coin_state(0.125), coin_state(0.875)],
            array![0.25, 0.75],
            array![[0.5, 0.5], [0.125, 0.875]],
        )
        .unwrap();

        let mut unchanged = toy_model(1);
        unchanged.pinterpolate(0.0, &source).unwrap();
        let reference = toy_model(1);
        assert_eq!(unchanged.pi(), reference.pi());
        assert_eq!(unchanged.transitions(), reference.transitions());

        let mut replaced = toy_model(1);
        replaced.pinterpolate(1.0, &source).unwrap();
        assert_eq!(replaced.pi(), source.pi());
        assert_eq!(replaced.transitions(), source.transitions());
        for (s, t) in replaced.states().iter().zip(source.states()) {
            let (State::Discrete(s), State::Discrete(t)) = (s, t) else {
                panic!("expected discrete states");
            };
            assert_eq!(s.probabilities(), t.probabilities());
        }
    }

    #[test]
    fn test_interpolate_pulls_towards_source() {
        let mut adapted = toy_model(1);
        let mut prior = toy_model(1);
        adapted.init();
        prior.init();
        adapted
            .increment_vt_path(&Observation::from_tokens(&[0.0, 0.0]), &[0, 0])
            .unwrap();
        prior
            .increment_vt_path(&Observation::from_tokens(&[1.0, 1.0]), &[1, 1])
            .unwrap();
        // entry mass: self 1 on state 0, prior 1 on state 1, rho 1 => 0.5 / 0.5
        adapted.interpolate(&prior, 1.0).unwrap();
        let acc = adapted.accumulator().unwrap();
        assert_relative_eq!(acc.entry[0], 1.0);
        assert_relative_eq!(acc.entry[1], 1.0);
        adapted.reestimate().unwrap();
        assert_relative_eq!(adapted.pi()[0], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_codebooks_are_distinct() {
        use crate::state::SharedState;
        let cb = Codebook::shared(5, GaussianMixture::single(&[0.0]));
        let states: Vec<State> = (0..3)
            .map(|_| SharedState::uniform(cb.clone()).unwrap().into())
            .collect();
        let m = Hmm::with_topology(2, states, Topology::Linear).unwrap();
        let books = m.codebooks();
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].id(), 5);
    }
}
