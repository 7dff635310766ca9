//! Closed-form transition templates and model concatenation.

use ndarray::{s, Array1, Array2};

use super::Hmm;
use crate::density::Density;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// Start in state 0; each state loops or advances with 0.5 each; the
    /// last state only loops.
    Linear,
    /// Uniform entry and uniform transitions between all states.
    Ergodic,
    /// Start in state 0; each state loops, advances one or skips one, split
    /// evenly among the successors that exist.
    Bakis,
    /// Start in state 0; each state moves uniformly to itself or any later state.
    LeftToRight,
}

impl Topology {
    /// Entry vector and transition matrix for `ns` states.
    pub fn matrices(self, ns: usize) -> Result<(Array1<f64>, Array2<f64>)> {
        if ns == 0 {
            return Err(Error::InvalidInput(
                "topology needs at least one state".to_string(),
            ));
        }
        let mut pi = Array1::zeros(ns);
        let mut a = Array2::zeros((ns, ns));
        match self {
            Topology::Linear => {
                pi[0] = 1.0;
                for i in 0..ns - 1 {
                    a[[i, i]] = 0.5;
                    a[[i, i + 1]] = 0.5;
                }
                a[[ns - 1, ns - 1]] = 1.0;
            }
            Topology::Ergodic => {
                let p = 1.0 / ns as f64;
                pi.fill(p);
                a.fill(p);
            }
            Topology::Bakis => {
                pi[0] = 1.0;
                for i in 0..ns {
                    let last = (i + 2).min(ns - 1);
                    let p = 1.0 / (last - i + 1) as f64;
                    a.slice_mut(s![i, i..=last]).fill(p);
                }
            }
            Topology::LeftToRight => {
                pi[0] = 1.0;
                for i in 0..ns {
                    let p = 1.0 / (ns - i) as f64;
                    a.slice_mut(s![i, i..]).fill(p);
                }
            }
        }
        Ok((pi, a))
    }
}

impl<D: Density> Hmm<D> {
    /// Resets `pi` and `a` to the template of `topology`.
    pub fn set_transitions(&mut self, topology: Topology) -> Result<()> {
        let (pi, a) = topology.matrices(self.num_states())?;
        self.pi = pi;
        self.a = a;
        Ok(())
    }

    /// Builds a left-to-right composite from `parts`, in order.
    ///
    /// The composite owns copies of every part's states and transitions:
    /// training it never touches the parts. Each part's last state, except
    /// in the final part, keeps half of its outgoing mass and sends the other
    /// half to the first state of the next part. Accumulators are not copied.
    pub fn concatenate(id: i32, parts: &[&Hmm<D>]) -> Result<Hmm<D>> {
        let Some(first) = parts.first() else {
            return Err(Error::InvalidInput(
                "concatenation needs at least one model".to_string(),
            ));
        };
        let total: usize = parts.iter().map(|m| m.num_states()).sum();
        let mut pi = Array1::zeros(total);
        pi.slice_mut(s![..first.num_states()]).assign(first.pi());
        let mut a = Array2::zeros((total, total));
        let mut states = Vec::with_capacity(total);

        let mut offset = 0;
        for (k, part) in parts.iter().enumerate() {
            let n = part.num_states();
            a.slice_mut(s![offset..offset + n, offset..offset + n])
                .assign(part.transitions());
            if k + 1 < parts.len() {
                let last = offset + n - 1;
                a.row_mut(last).mapv_inplace(|p| p * 0.5);
                a[[last, offset + n]] += 0.5;
            }
            states.extend(part.states().iter().cloned().map(|mut state| {
                state.discard();
                state
            }));
            offset += n;
        }

        let mut composite = Hmm::new(id, states, pi, a)?;
        let tags: Vec<String> = parts.iter().map(|m| m.label()).collect();
        composite.set_tag(tags.join("+"));
        Ok(composite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hmm::tests::coin_state;
    use approx::assert_relative_eq;

    fn assert_stochastic(pi: &Array1<f64>, a: &Array2<f64>) {
        assert_relative_eq!(pi.sum(), 1.0, epsilon = 1e-12);
        for row in a.rows() {
            assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_all_topologies_are_stochastic() {
        for topology in [
            Topology::Linear,
            Topology::Ergodic,
            Topology::Bakis,
            Topology::LeftToRight,
        ] {
            for ns in 1..6 {
                let (pi, a) = topology.matrices(ns).unwrap();
                assert_stochastic(&pi, &a);
            }
        }
    }

    #[test]
    fn test_linear_template() {
        let (pi, a) = Topology::Linear.matrices(3).unwrap();
        assert_eq!(pi.to_vec(), vec![1.0, 0.0, 0.0]);
        assert_eq!(a.row(0).to_vec(), vec![0.5, 0.5, 0.0]);
        assert_eq!(a.row(1).to_vec(), vec![0.0, 0.5, 0.5]);
        assert_eq!(a.row(2).to_vec(), vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_bakis_skips_one() {
        let (_, a) = Topology::Bakis.matrices(4).unwrap();
        assert_relative_eq!(a[[0, 2]], 1.0 / 3.0);
        assert_eq!(a[[0, 3]], 0.0);
        assert_relative_eq!(a[[2, 3]], 0.5);
        assert_eq!(a[[3, 3]], 1.0);
    }

    #[test]
    fn test_set_transitions_resets() {
        let mut m = crate::hmm::tests::toy_model(1);
        m.set_transitions(Topology::Linear).unwrap();
        assert_eq!(m.pi().to_vec(), vec![1.0, 0.0]);
        assert_eq!(m.transitions()[[1, 1]], 1.0);
    }

    #[test]
    fn test_concatenate_bridges_parts() {
        let left = Hmm::with_topology(1, vec![coin_state(0.5), coin_state(0.5)], Topology::Linear)
            .unwrap()
            .with_tag("a");
        let right = Hmm::with_topology(2, vec![coin_state(0.5)], Topology::Linear)
            .unwrap()
            .with_tag("b");
        let joined = Hmm::concatenate(7, &[&left, &right]).unwrap();
        assert_eq!(joined.num_states(), 3);
        assert_eq!(joined.tag(), Some("a+b"));
        assert_stochastic(joined.pi(), joined.transitions());
        assert_eq!(joined.transitions()[[1, 1]], 0.5);
        assert_eq!(joined.transitions()[[1, 2]], 0.5);
        assert_eq!(joined.transitions()[[2, 2]], 1.0);
        assert_eq!(joined.transitions()[[2, 0]], 0.0);
    }

    #[test]
    fn test_concatenate_does_not_alias_parts() {
        use crate::observation::Observation;
        let part = Hmm::with_topology(1, vec![coin_state(0.5), coin_state(0.5)], Topology::Linear)
            .unwrap();
        let before = part.clone();
        let mut joined = Hmm::concatenate(9, &[&part, &part]).unwrap();
        joined.init();
        joined
            .increment_bw(&Observation::from_tokens(&[0.0, 0.0, 0.0, 1.0, 1.0, 1.0]))
            .unwrap();
        joined.reestimate().unwrap();
        assert_eq!(part.transitions(), before.transitions());
        assert!(part.accumulator().is_none());
        let (crate::state::State::Discrete(s), crate::state::State::Discrete(t)) =
            (&part.states()[0], &before.states()[0])
        else {
            panic!("expected discrete states");
        };
        assert_eq!(s.probabilities(), t.probabilities());
    }

    #[test]
    fn test_concatenate_empty() {
        let parts: [&Hmm; 0] = [];
        assert!(Hmm::concatenate(1, &parts).is_err());
    }
}
