use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;

use presto_utilities::TagIndex;
use rustc_hash::FxHashMap;

use crate::LabelIndex;
use crate::Nfa;
use crate::NfaStateIndex;
use crate::Pda;
use crate::PdsError;
use crate::RuleIndex;
use crate::StateIndex;
use crate::Weight;

/// A unique type for trace records.
pub struct TraceTag;

/// The index type for a trace record.
pub type TraceIndex = TagIndex<usize, TraceTag>;

/// A symbol on a P-automaton edge: a stack label or ε.
///
/// The derived order puts all labels before ε, which keeps the per-edge
/// label sets sorted with ε at the end.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Symbol {
    Label(LabelIndex),
    Epsilon,
}

impl Symbol {
    /// Returns true iff this is the ε symbol.
    pub fn is_epsilon(&self) -> bool {
        matches!(self, Symbol::Epsilon)
    }
}

/// Why an edge is part of the automaton. Every edge added by saturation
/// carries one of these, which suffices to reconstruct the rule firing or
/// ε-contraction that justifies it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceRecord {
    /// Added by pre* from a pop or swap rule.
    Pre { rule: RuleIndex },

    /// Added by pre* from a push rule; `temp` is the intermediate state of
    /// the two-edge path that the rule firing contracted.
    PreThrough { rule: RuleIndex, temp: StateIndex },

    /// Added by post* as the image of the given rule firing on an edge
    /// `(from, label, _)`.
    PostRule {
        from: StateIndex,
        rule: RuleIndex,
        label: LabelIndex,
    },

    /// Added by post* by combining an ε-edge into `through` with an edge
    /// out of `through`.
    PostEpsilon { through: StateIndex },
}

/// One labelled entry of an edge, with its provenance and the best weight
/// found so far. Edges present before saturation carry no trace.
#[derive(Clone, Debug)]
pub struct EdgeLabel<W> {
    pub symbol: Symbol,
    pub trace: Option<TraceIndex>,
    pub weight: W,
}

/// An edge bundle between two states, carrying one or more symbols.
#[derive(Clone, Debug)]
pub struct Edge<W> {
    pub to: StateIndex,
    labels: Vec<EdgeLabel<W>>,
}

impl<W> Edge<W> {
    /// Returns the entry for the given symbol, if present.
    pub fn find(&self, symbol: Symbol) -> Option<&EdgeLabel<W>> {
        self.labels
            .binary_search_by_key(&symbol, |label| label.symbol)
            .ok()
            .map(|position| &self.labels[position])
    }

    /// Returns true iff the edge carries the given symbol.
    pub fn contains(&self, symbol: Symbol) -> bool {
        self.find(symbol).is_some()
    }

    /// Returns the entries of this edge, sorted by symbol with ε last.
    pub fn labels(&self) -> &[EdgeLabel<W>] {
        &self.labels
    }
}

/// The result of inserting an edge label into the automaton.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeChange {
    /// The label was not present on this edge before.
    Inserted,
    /// The label was present and its weight improved.
    Improved,
    /// The label was present with a weight at least as good.
    Unchanged,
}

/// A newly inserted or improved edge, as reported by the saturation
/// engines so that a driver can mirror it into a product automaton.
#[derive(Clone, Debug)]
pub struct EdgeEvent<W> {
    pub from: StateIndex,
    pub symbol: Symbol,
    pub to: StateIndex,
    pub trace: Option<TraceIndex>,
    pub weight: W,
}

struct State<W> {
    accepting: bool,
    edges: Vec<Edge<W>>,
}

/// A P-automaton: a finite automaton over the stack alphabet whose first
/// `|Q|` states are identified with the PDA control states. It recognizes a
/// regular set of configurations: `(p, σ)` is accepted iff there is a run
/// from state `p` reading σ (topmost label first) to an accepting state.
///
/// # Details
///
/// States grow monotonically during saturation and are referred to by dense
/// `StateIndex` values; edges reference their target by index, so the
/// automaton can be moved and copied freely. Trace records live in an arena
/// owned by the automaton and edges refer to them by `TraceIndex`.
pub struct PAutomaton<'pda, W> {
    pda: &'pda Pda<W>,
    states: Vec<State<W>>,
    traces: Vec<TraceRecord>,
}

impl<'pda, W: Weight> PAutomaton<'pda, W> {
    /// Creates an automaton accepting exactly the configuration
    /// `(initial_state, stack)`, with the stack topmost label first.
    pub fn new(pda: &'pda Pda<W>, initial_state: StateIndex, stack: &[LabelIndex]) -> Result<Self, PdsError> {
        if initial_state.value() >= pda.num_of_states() {
            return Err(PdsError::InvalidAutomaton(format!(
                "state {initial_state} is not a control state of the PDA"
            )));
        }

        for &label in stack {
            if label.value() >= pda.num_of_labels() {
                return Err(PdsError::InvalidAutomaton(format!("label {label} is out of range")));
            }
        }

        let mut automaton = Self::with_control_states(pda);
        if stack.is_empty() {
            automaton.states[initial_state.value()].accepting = true;
            return Ok(automaton);
        }

        let mut last = initial_state;
        for (position, &label) in stack.iter().enumerate() {
            let state = automaton.add_state(position == stack.len() - 1);
            automaton.add_edge(last, state, Symbol::Label(label), None, W::zero());
            last = state;
        }

        Ok(automaton)
    }

    /// Creates an automaton accepting `{ (p, σ) | p ∈ initial_states, σ ∈
    /// L(nfa) }`: the NFA states are copied behind the control states and
    /// the edges of the NFA's initial states are mirrored onto every given
    /// control state.
    pub fn from_nfa(pda: &'pda Pda<W>, nfa: &Nfa, initial_states: &[StateIndex]) -> Result<Self, PdsError> {
        if nfa.num_of_labels() != pda.num_of_labels() {
            return Err(PdsError::InvalidAutomaton(format!(
                "NFA alphabet size {} does not match the PDA alphabet size {}",
                nfa.num_of_labels(),
                pda.num_of_labels()
            )));
        }

        for &state in initial_states {
            if state.value() >= pda.num_of_states() {
                return Err(PdsError::InvalidAutomaton(format!(
                    "state {state} is not a control state of the PDA"
                )));
            }
        }

        let mut automaton = Self::with_control_states(pda);
        if nfa.empty_accept() {
            for &state in initial_states {
                automaton.states[state.value()].accepting = true;
            }
        }

        // The NFA state i becomes automaton state |Q| + i.
        let offset = pda.num_of_states();
        for index in 0..nfa.num_of_states() {
            let state = NfaStateIndex::new(index);
            automaton.add_state(nfa.is_accepting(state));
        }

        for index in 0..nfa.num_of_states() {
            let from = NfaStateIndex::new(index);
            for &(label, to) in nfa.edges_from(from) {
                automaton.add_edge(
                    StateIndex::new(offset + index),
                    StateIndex::new(offset + to.value()),
                    Symbol::Label(label),
                    None,
                    W::zero(),
                );
            }
        }

        for &control in initial_states {
            for &initial in nfa.initial_states() {
                for &(label, to) in nfa.edges_from(initial) {
                    automaton.add_edge(
                        control,
                        StateIndex::new(offset + to.value()),
                        Symbol::Label(label),
                        None,
                        W::zero(),
                    );
                }
            }
        }

        Ok(automaton)
    }

    fn with_control_states(pda: &'pda Pda<W>) -> Self {
        let mut automaton = Self {
            pda,
            states: Vec::new(),
            traces: Vec::new(),
        };

        for _ in 0..pda.num_of_states() {
            automaton.add_state(false);
        }
        automaton
    }

    /// Returns the PDA this automaton belongs to.
    pub fn pda(&self) -> &'pda Pda<W> {
        self.pda
    }

    /// Returns the number of states.
    pub fn num_of_states(&self) -> usize {
        self.states.len()
    }

    /// Returns true iff the given state is a PDA control state.
    pub fn is_control_state(&self, state: StateIndex) -> bool {
        state.value() < self.pda.num_of_states()
    }

    /// Returns true iff the given state is accepting.
    pub fn is_accepting(&self, state: StateIndex) -> bool {
        self.states[state.value()].accepting
    }

    /// Returns the outgoing edge bundles of the given state.
    pub fn edges_from(&self, state: StateIndex) -> &[Edge<W>] {
        &self.states[state.value()].edges
    }

    /// Adds a fresh (non-control) state and returns its index.
    pub fn add_state(&mut self, accepting: bool) -> StateIndex {
        let index = StateIndex::new(self.states.len());
        self.states.push(State {
            accepting,
            edges: Vec::new(),
        });
        index
    }

    /// Allocates a trace record and returns its index.
    pub fn new_trace(&mut self, record: TraceRecord) -> TraceIndex {
        let index = TraceIndex::new(self.traces.len());
        self.traces.push(record);
        index
    }

    /// Returns the trace record with the given index.
    pub fn trace_record(&self, trace: TraceIndex) -> TraceRecord {
        self.traces[trace.value()]
    }

    /// Inserts the given symbol on the edge `(from, to)`, creating the edge
    /// if necessary. If the symbol is already present, the entry is updated
    /// only when the new weight is strictly better, in which case the trace
    /// is replaced by that of the improving derivation.
    pub fn add_edge(
        &mut self,
        from: StateIndex,
        to: StateIndex,
        symbol: Symbol,
        trace: Option<TraceIndex>,
        weight: W,
    ) -> EdgeChange {
        let edges = &mut self.states[from.value()].edges;

        let position = match edges.iter().position(|edge| edge.to == to) {
            Some(position) => position,
            None => {
                edges.push(Edge {
                    to,
                    labels: Vec::new(),
                });
                edges.len() - 1
            }
        };
        let edge = &mut edges[position];

        match edge.labels.binary_search_by_key(&symbol, |label| label.symbol) {
            Ok(position) => {
                let entry = &mut edge.labels[position];
                if weight < entry.weight {
                    entry.weight = weight;
                    entry.trace = trace;
                    EdgeChange::Improved
                } else {
                    EdgeChange::Unchanged
                }
            }
            Err(position) => {
                edge.labels.insert(position, EdgeLabel { symbol, trace, weight });
                EdgeChange::Inserted
            }
        }
    }

    /// Returns the entry stored for the edge `(from, symbol, to)`.
    pub fn edge_label(&self, from: StateIndex, symbol: Symbol, to: StateIndex) -> Option<&EdgeLabel<W>> {
        self.states[from.value()]
            .edges
            .iter()
            .find(|edge| edge.to == to)
            .and_then(|edge| edge.find(symbol))
    }

    /// Returns true iff the automaton accepts the configuration
    /// `(state, stack)`, with the stack topmost label first.
    ///
    /// ε-edges are not followed: saturation materializes all ε-closures as
    /// labelled edges, so following them here would be redundant.
    pub fn accepts(&self, state: StateIndex, stack: &[LabelIndex]) -> bool {
        if stack.is_empty() {
            return self.is_accepting(state);
        }

        let mut search_stack = vec![(state, 0usize)];
        while let Some((current, position)) = search_stack.pop() {
            for edge in self.edges_from(current) {
                if edge.contains(Symbol::Label(stack[position])) {
                    if position + 1 < stack.len() {
                        search_stack.push((edge.to, position + 1));
                    } else if self.is_accepting(edge.to) {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Returns some accepting run for the configuration `(state, stack)` as
    /// the sequence of `stack.len() + 1` automaton states it visits, or
    /// `None` if the configuration is not accepted.
    pub fn accept_path(&self, state: StateIndex, stack: &[LabelIndex]) -> Option<Vec<StateIndex>> {
        if stack.is_empty() {
            return self.is_accepting(state).then(|| vec![state]);
        }

        // DFS where path[i] always holds the ancestor at depth i of the
        // entry currently being expanded.
        let mut path = vec![StateIndex::new(0); stack.len() + 1];
        let mut search_stack = vec![(state, 0usize)];
        while let Some((current, position)) = search_stack.pop() {
            path[position] = current;
            for edge in self.edges_from(current) {
                if edge.contains(Symbol::Label(stack[position])) {
                    if position + 1 < stack.len() {
                        search_stack.push((edge.to, position + 1));
                    } else if self.is_accepting(edge.to) {
                        path[position + 1] = edge.to;
                        return Some(path);
                    }
                }
            }
        }
        None
    }

    /// Returns the minimum-weight accepting run for the configuration
    /// `(state, stack)` together with its weight, or `None` if the
    /// configuration is not accepted.
    ///
    /// Dijkstra over `(state, stack position)` pairs; ties are broken by the
    /// pair itself so the returned run is deterministic.
    pub fn shortest_accept_path(&self, state: StateIndex, stack: &[LabelIndex]) -> Option<(Vec<StateIndex>, W)> {
        if stack.is_empty() {
            return self.is_accepting(state).then(|| (vec![state], W::zero()));
        }

        // Entries form a tree through parent indices, so the run can be
        // recovered once the full stack has been read.
        let mut entries: Vec<(StateIndex, usize, Option<usize>)> = vec![(state, 0, None)];
        let mut queue: BinaryHeap<Reverse<(W, StateIndex, usize, usize)>> = BinaryHeap::new();
        let mut visited: FxHashMap<(StateIndex, usize), W> = FxHashMap::default();

        queue.push(Reverse((W::zero(), state, 0, 0)));
        while let Some(Reverse((weight, current, position, entry))) = queue.pop() {
            if position == stack.len() {
                let mut path = vec![StateIndex::new(0); stack.len() + 1];
                let mut walk = Some(entry);
                while let Some(index) = walk {
                    let (state, position, parent) = entries[index];
                    path[position] = state;
                    walk = parent;
                }
                return Some((path, weight));
            }

            if visited
                .get(&(current, position))
                .is_some_and(|best| *best <= weight)
            {
                continue;
            }
            visited.insert((current, position), weight.clone());

            for edge in self.edges_from(current) {
                if let Some(label) = edge.find(Symbol::Label(stack[position])) {
                    if position + 1 < stack.len() || self.is_accepting(edge.to) {
                        entries.push((edge.to, position + 1, Some(entry)));
                        queue.push(Reverse((
                            weight.extend(&label.weight),
                            edge.to,
                            position + 1,
                            entries.len() - 1,
                        )));
                    }
                }
            }
        }
        None
    }
}

impl<W: Weight> fmt::Debug for PAutomaton<'_, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, state) in self.states.iter().enumerate() {
            for edge in &state.edges {
                for label in edge.labels() {
                    let symbol = match label.symbol {
                        Symbol::Label(label) => self.pda.labels()[label.value()].clone(),
                        Symbol::Epsilon => "ε".to_string(),
                    };
                    writeln!(
                        f,
                        "{index} --[{symbol}]-> {}{}",
                        edge.to,
                        if self.is_accepting(edge.to) { " (accepting)" } else { "" }
                    )?;
                }
            }
        }
        Ok(())
    }
}
