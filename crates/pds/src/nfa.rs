use presto_utilities::TagIndex;

use crate::LabelIndex;

/// A unique type for NFA states.
pub struct NfaStateTag;

/// The index type for an NFA state.
pub type NfaStateIndex = TagIndex<usize, NfaStateTag>;

/// A nondeterministic finite automaton over the stack alphabet, used to
/// describe a regular language of stack contents (topmost label first).
///
/// Together with a set of PDA control states this specifies a regular set
/// of configurations, see [`crate::PAutomaton::from_nfa`].
pub struct Nfa {
    num_of_labels: usize,
    states: Vec<NfaState>,
    initial: Vec<NfaStateIndex>,
}

struct NfaState {
    accepting: bool,
    edges: Vec<(LabelIndex, NfaStateIndex)>,
}

impl Nfa {
    /// Creates an empty NFA over an alphabet of the given size.
    pub fn new(num_of_labels: usize) -> Self {
        Self {
            num_of_labels,
            states: Vec::new(),
            initial: Vec::new(),
        }
    }

    /// Adds a state and returns its index.
    pub fn add_state(&mut self, initial: bool, accepting: bool) -> NfaStateIndex {
        let index = NfaStateIndex::new(self.states.len());
        self.states.push(NfaState {
            accepting,
            edges: Vec::new(),
        });

        if initial {
            self.initial.push(index);
        }
        index
    }

    /// Adds an edge for every given label.
    pub fn add_edge(&mut self, from: NfaStateIndex, to: NfaStateIndex, labels: &[LabelIndex]) {
        for &label in labels {
            debug_assert!(
                label.value() < self.num_of_labels,
                "Label {label} out of bounds (alphabet size {})",
                self.num_of_labels
            );
            self.states[from.value()].edges.push((label, to));
        }
    }

    /// Adds an edge for every label of the alphabet.
    pub fn add_wildcard_edge(&mut self, from: NfaStateIndex, to: NfaStateIndex) {
        for label in 0..self.num_of_labels {
            self.states[from.value()].edges.push((LabelIndex::new(label), to));
        }
    }

    /// Adds an edge for every label outside the given set.
    pub fn add_negated_edge(&mut self, from: NfaStateIndex, to: NfaStateIndex, excluded: &[LabelIndex]) {
        for label in (0..self.num_of_labels).map(LabelIndex::new) {
            if !excluded.contains(&label) {
                self.states[from.value()].edges.push((label, to));
            }
        }
    }

    /// Returns the number of states.
    pub fn num_of_states(&self) -> usize {
        self.states.len()
    }

    /// Returns the size of the alphabet.
    pub fn num_of_labels(&self) -> usize {
        self.num_of_labels
    }

    /// Returns the initial states.
    pub fn initial_states(&self) -> &[NfaStateIndex] {
        &self.initial
    }

    /// Returns true iff the given state is accepting.
    pub fn is_accepting(&self, state: NfaStateIndex) -> bool {
        self.states[state.value()].accepting
    }

    /// Returns the outgoing edges of the given state.
    pub fn edges_from(&self, state: NfaStateIndex) -> &[(LabelIndex, NfaStateIndex)] {
        &self.states[state.value()].edges
    }

    /// Returns true iff the NFA accepts the empty stack, i.e. some initial
    /// state is accepting.
    pub fn empty_accept(&self) -> bool {
        self.initial.iter().any(|&state| self.is_accepting(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nfa_construction() {
        // The language C Γ* A over the alphabet {A, B, C}.
        let mut nfa = Nfa::new(3);
        let n0 = nfa.add_state(true, false);
        let n1 = nfa.add_state(false, false);
        let n2 = nfa.add_state(false, true);

        nfa.add_edge(n0, n1, &[LabelIndex::new(2)]);
        nfa.add_wildcard_edge(n1, n1);
        nfa.add_edge(n1, n2, &[LabelIndex::new(0)]);

        assert_eq!(nfa.num_of_states(), 3);
        assert!(!nfa.empty_accept());
        assert_eq!(nfa.edges_from(n1).len(), 4);
    }
}
