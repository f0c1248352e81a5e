use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::collections::VecDeque;

use bitvec::bitvec;
use bitvec::order::Lsb0;
use cancel_this::is_cancelled;
use log::debug;
use log::info;
use presto_utilities::IndexedSet;
use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;

use crate::Configuration;
use crate::EdgeEvent;
use crate::LabelIndex;
use crate::PAutomaton;
use crate::Pda;
use crate::PdsError;
use crate::PostStar;
use crate::PreStar;
use crate::ShortestPostStar;
use crate::StateIndex;
use crate::Symbol;
use crate::Weight;
use crate::trace::reconstruct_post;
use crate::trace::reconstruct_post_empty;
use crate::trace::reconstruct_pre;

/// The saturation direction of a reachability query: post* grows the
/// initial side, pre* grows the final side and the dual search alternates
/// both until they meet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchDirection {
    Pre,
    Post,
    Dual,
}

/// What kind of witness to produce for a reachable query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TraceMode {
    #[default]
    None,
    Any,
    Shortest,
}

/// The outcome of a reachability query.
#[derive(Clone, Debug)]
pub struct SolveResult<W> {
    pub reachable: bool,
    /// The witnessing execution, if one was requested and exists.
    pub trace: Option<Vec<Configuration>>,
    /// The weight of the witness under [`TraceMode::Shortest`]; the top
    /// element when unreachable.
    pub weight: Option<W>,
}

struct ProductEdge<W> {
    label: LabelIndex,
    to: StateIndex,
    weight: W,
}

struct ProductState<W> {
    accepting: bool,
    edges: Vec<ProductEdge<W>>,
}

/// The on-the-fly product of the two P-automata.
///
/// The first `|Q|` states are the PDA control states, shared with both
/// sides; every other state is an interned pair of component states. A
/// reverse index per component maps a state of either automaton to the
/// product states it participates in, so that a newly saturated edge can be
/// mirrored without rescanning the product.
struct Product<W> {
    num_of_control_states: usize,
    states: Vec<ProductState<W>>,
    pairs: IndexedSet<(StateIndex, StateIndex)>,
    lookup_initial: FxHashMap<StateIndex, Vec<(StateIndex, StateIndex)>>,
    lookup_target: FxHashMap<StateIndex, Vec<(StateIndex, StateIndex)>>,
    edge_set: FxHashSet<(StateIndex, LabelIndex, StateIndex)>,
    has_accepting: bool,

    /// Control states whose empty-stack configuration is accepted by both
    /// sides, reached on the initial side through an ε-edge to an accepting
    /// state: the best weight and the ε-edge target for reconstruction.
    empty_accept: FxHashMap<StateIndex, (W, StateIndex)>,
}

impl<W: Weight> Product<W> {
    fn new(initial: &PAutomaton<'_, W>, target: &PAutomaton<'_, W>) -> Self {
        let num_of_control_states = initial.pda().num_of_states();

        let mut has_accepting = false;
        let mut states = Vec::with_capacity(num_of_control_states);
        for index in 0..num_of_control_states {
            let state = StateIndex::new(index);
            let accepting = initial.is_accepting(state) && target.is_accepting(state);
            has_accepting |= accepting;
            states.push(ProductState {
                accepting,
                edges: Vec::new(),
            });
        }

        Self {
            num_of_control_states,
            states,
            pairs: IndexedSet::new(),
            lookup_initial: FxHashMap::default(),
            lookup_target: FxHashMap::default(),
            edge_set: FxHashSet::default(),
            has_accepting,
            empty_accept: FxHashMap::default(),
        }
    }

    fn has_accepting(&self) -> bool {
        self.has_accepting
    }

    /// Returns the component states of the given product state.
    fn state_pair(&self, state: StateIndex) -> (StateIndex, StateIndex) {
        if state.value() < self.num_of_control_states {
            (state, state)
        } else {
            *self
                .pairs
                .get(state.value() - self.num_of_control_states)
                .expect("product states beyond the control states are interned pairs")
        }
    }

    /// Interns the product state for the given component pair, creating it
    /// if the pair is new. Returns the state and whether it was created.
    fn product_state(
        &mut self,
        initial_component: StateIndex,
        target_component: StateIndex,
        initial_accepting: bool,
        target_accepting: bool,
    ) -> (StateIndex, bool) {
        if initial_component == target_component && initial_component.value() < self.num_of_control_states {
            return (initial_component, false);
        }

        let (pair_index, fresh) = self.pairs.insert((initial_component, target_component));
        let state = StateIndex::new(self.num_of_control_states + pair_index);

        if fresh {
            let accepting = initial_accepting && target_accepting;
            self.has_accepting |= accepting;
            self.states.push(ProductState {
                accepting,
                edges: Vec::new(),
            });

            self.lookup_initial
                .entry(initial_component)
                .or_default()
                .push((target_component, state));
            self.lookup_target
                .entry(target_component)
                .or_default()
                .push((initial_component, state));
        }

        (state, fresh)
    }

    fn add_edge(&mut self, from: StateIndex, label: LabelIndex, to: StateIndex, weight: W) {
        if self.edge_set.insert((from, label, to)) {
            self.states[from.value()].edges.push(ProductEdge { label, to, weight });
        } else if let Some(edge) = self.states[from.value()]
            .edges
            .iter_mut()
            .find(|edge| edge.label == label && edge.to == to)
        {
            edge.weight = edge.weight.clone().combine(weight);
        }
    }

    /// Explores the given freshly created product states, mirroring every
    /// pair of matching component edges. With `stop_early` the construction
    /// bails out as soon as an accepting product state exists; the waiting
    /// states are then abandoned, which is fine because the solve stops
    /// altogether.
    fn construct_reachable(
        &mut self,
        mut waiting: Vec<StateIndex>,
        initial: &PAutomaton<'_, W>,
        target: &PAutomaton<'_, W>,
        stop_early: bool,
    ) -> bool {
        if stop_early && self.has_accepting {
            return true;
        }

        while let Some(top) = waiting.pop() {
            let (initial_component, target_component) = self.state_pair(top);

            for initial_edge in initial.edges_from(initial_component) {
                for target_edge in target.edges_from(target_component) {
                    for entry in initial_edge.labels() {
                        let Symbol::Label(label) = entry.symbol else {
                            continue;
                        };
                        let Some(target_entry) = target_edge.find(entry.symbol) else {
                            continue;
                        };

                        let (to, fresh) = self.product_state(
                            initial_edge.to,
                            target_edge.to,
                            initial.is_accepting(initial_edge.to),
                            target.is_accepting(target_edge.to),
                        );
                        self.add_edge(top, label, to, entry.weight.extend(&target_entry.weight));

                        if stop_early && self.has_accepting {
                            return true;
                        }
                        if fresh {
                            waiting.push(to);
                        }
                    }
                }
            }
        }

        self.has_accepting
    }

    /// Mirrors an edge newly added to the initial side. Returns true iff an
    /// accepting product state is known (and `stop_early` is set).
    fn extend_initial(
        &mut self,
        event: &EdgeEvent<W>,
        initial: &PAutomaton<'_, W>,
        target: &PAutomaton<'_, W>,
        stop_early: bool,
    ) -> bool {
        let Symbol::Label(label) = event.symbol else {
            // An ε-edge never matches a final-side edge (that side is
            // ε-free, and saturation materializes all ε-closures as
            // labelled edges), but an ε-edge into an accepting state means
            // the empty-stack configuration of its source is reached.
            if initial.is_accepting(event.to) && target.is_accepting(event.from) {
                self.empty_accept
                    .entry(event.from)
                    .and_modify(|(weight, epsilon_target)| {
                        if event.weight < *weight {
                            *weight = event.weight.clone();
                            *epsilon_target = event.to;
                        }
                    })
                    .or_insert((event.weight.clone(), event.to));
                self.has_accepting = true;
                return stop_early;
            }
            return false;
        };

        let mut from_pairs = self.lookup_initial.get(&event.from).cloned().unwrap_or_default();
        if event.from.value() < self.num_of_control_states {
            from_pairs.push((event.from, event.from));
        }

        let mut waiting = Vec::new();
        for (target_component, product_from) in from_pairs {
            for target_edge in target.edges_from(target_component) {
                let Some(target_entry) = target_edge.find(event.symbol) else {
                    continue;
                };

                let (to, fresh) = self.product_state(
                    event.to,
                    target_edge.to,
                    initial.is_accepting(event.to),
                    target.is_accepting(target_edge.to),
                );
                self.add_edge(product_from, label, to, event.weight.extend(&target_entry.weight));

                if stop_early && self.has_accepting {
                    return true;
                }
                if fresh {
                    waiting.push(to);
                }
            }
        }

        self.construct_reachable(waiting, initial, target, stop_early)
    }

    /// Mirrors an edge newly added to the final side; the mirror image of
    /// [`Product::extend_initial`].
    fn extend_target(
        &mut self,
        event: &EdgeEvent<W>,
        initial: &PAutomaton<'_, W>,
        target: &PAutomaton<'_, W>,
        stop_early: bool,
    ) -> bool {
        let Symbol::Label(label) = event.symbol else {
            return false;
        };

        let mut from_pairs = self.lookup_target.get(&event.from).cloned().unwrap_or_default();
        if event.from.value() < self.num_of_control_states {
            from_pairs.push((event.from, event.from));
        }

        let mut waiting = Vec::new();
        for (initial_component, product_from) in from_pairs {
            for initial_edge in initial.edges_from(initial_component) {
                let Some(initial_entry) = initial_edge.find(event.symbol) else {
                    continue;
                };

                let (to, fresh) = self.product_state(
                    initial_edge.to,
                    event.to,
                    initial.is_accepting(initial_edge.to),
                    target.is_accepting(event.to),
                );
                self.add_edge(product_from, label, to, initial_entry.weight.extend(&event.weight));

                if stop_early && self.has_accepting {
                    return true;
                }
                if fresh {
                    waiting.push(to);
                }
            }
        }

        self.construct_reachable(waiting, initial, target, stop_early)
    }

    /// Finds a path from a control state to an accepting product state via
    /// BFS. Returns the visited product states and the labels read.
    fn find_path(&self) -> Option<(Vec<StateIndex>, Vec<LabelIndex>)> {
        let mut visited = bitvec![usize, Lsb0; 0; self.states.len()];
        let mut parent: Vec<Option<(StateIndex, LabelIndex)>> = vec![None; self.states.len()];
        let mut queue = VecDeque::new();

        for index in 0..self.num_of_control_states {
            let state = StateIndex::new(index);
            if self.states[index].accepting {
                return Some((vec![state], Vec::new()));
            }
            visited.set(index, true);
            queue.push_back(state);
        }

        while let Some(state) = queue.pop_front() {
            for edge in &self.states[state.value()].edges {
                if !visited[edge.to.value()] {
                    visited.set(edge.to.value(), true);
                    parent[edge.to.value()] = Some((state, edge.label));

                    if self.states[edge.to.value()].accepting {
                        return Some(self.walk_parents(&parent, edge.to));
                    }
                    queue.push_back(edge.to);
                }
            }
        }

        None
    }

    /// Finds the minimum-weight path from a control state to an accepting
    /// product state via Dijkstra, ties broken by state index.
    fn find_path_shortest(&self) -> Option<(Vec<StateIndex>, Vec<LabelIndex>, W)> {
        // Entries form a tree through parent indices.
        let mut entries: Vec<(StateIndex, Option<LabelIndex>, Option<usize>)> = Vec::new();
        let mut queue: BinaryHeap<Reverse<(W, StateIndex, usize)>> = BinaryHeap::new();
        let mut visited: FxHashMap<StateIndex, W> = FxHashMap::default();

        for index in 0..self.num_of_control_states {
            let state = StateIndex::new(index);
            entries.push((state, None, None));
            queue.push(Reverse((W::zero(), state, entries.len() - 1)));
        }

        while let Some(Reverse((weight, state, entry))) = queue.pop() {
            if self.states[state.value()].accepting {
                let mut states = Vec::new();
                let mut labels = Vec::new();
                let mut walk = Some(entry);
                while let Some(index) = walk {
                    let (state, label, parent) = entries[index];
                    states.push(state);
                    if let Some(label) = label {
                        labels.push(label);
                    }
                    walk = parent;
                }
                states.reverse();
                labels.reverse();
                return Some((states, labels, weight));
            }

            if visited.get(&state).is_some_and(|best| *best <= weight) {
                continue;
            }
            visited.insert(state, weight.clone());

            for edge in &self.states[state.value()].edges {
                entries.push((edge.to, Some(edge.label), Some(entry)));
                queue.push(Reverse((weight.extend(&edge.weight), edge.to, entries.len() - 1)));
            }
        }

        None
    }

    /// Returns the lightest empty-stack witness, if any: the control state,
    /// its weight and the ε-edge target to unwind the last pop from.
    fn empty_accept_witness(&self) -> Option<(StateIndex, W, StateIndex)> {
        self.empty_accept
            .iter()
            .map(|(&state, (weight, epsilon_target))| (state, weight.clone(), *epsilon_target))
            .min_by(|a, b| (&a.1, a.0).cmp(&(&b.1, b.0)))
    }

    fn walk_parents(
        &self,
        parent: &[Option<(StateIndex, LabelIndex)>],
        accepting: StateIndex,
    ) -> (Vec<StateIndex>, Vec<LabelIndex>) {
        let mut states = vec![accepting];
        let mut labels = Vec::new();

        let mut current = accepting;
        while let Some((previous, label)) = parent[current.value()] {
            states.push(previous);
            labels.push(label);
            current = previous;
        }

        states.reverse();
        labels.reverse();
        (states, labels)
    }
}

/// A reachability query between two regular sets of configurations.
///
/// Owns the initial-side and final-side P-automata and their product;
/// [`SolverInstance::solve`] saturates the side(s) selected by the search
/// direction, mirrors every new edge into the product and stops as soon as
/// the answer is known. A solved instance keeps the saturated automata for
/// inspection but should not be solved again.
fn best_accepting_weight_of<W: Weight>(product: &Product<W>) -> Option<W> {
    let path = product.find_path_shortest().map(|(_, _, weight)| weight);
    let empty = product.empty_accept_witness().map(|(_, weight, _)| weight);
    path.into_iter().chain(empty).min()
}

pub struct SolverInstance<'pda, W: Weight> {
    pda: &'pda Pda<W>,
    initial: PAutomaton<'pda, W>,
    target: PAutomaton<'pda, W>,
    product: Product<W>,
}

impl<'pda, W: Weight> SolverInstance<'pda, W> {
    /// Creates a query instance for the configuration sets recognized by
    /// the two automata, which must be built over the given PDA.
    pub fn new(
        pda: &'pda Pda<W>,
        initial: PAutomaton<'pda, W>,
        target: PAutomaton<'pda, W>,
    ) -> Result<Self, PdsError> {
        if !std::ptr::eq(pda, initial.pda()) || !std::ptr::eq(pda, target.pda()) {
            return Err(PdsError::InvalidAutomaton(
                "both automata must be built over the solver's PDA".to_string(),
            ));
        }

        let mut product = Product::new(&initial, &target);

        // Seed the product with the intersection of the pre-saturation
        // languages, rooted at the shared control states.
        let control_states = (0..pda.num_of_states()).map(StateIndex::new).collect();
        product.construct_reachable(control_states, &initial, &target, false);

        Ok(Self {
            pda,
            initial,
            target,
            product,
        })
    }

    /// Returns the PDA of this instance.
    pub fn pda(&self) -> &'pda Pda<W> {
        self.pda
    }

    /// Returns the initial-side automaton.
    pub fn initial_automaton(&self) -> &PAutomaton<'pda, W> {
        &self.initial
    }

    /// Returns the final-side automaton.
    pub fn target_automaton(&self) -> &PAutomaton<'pda, W> {
        &self.target
    }

    /// Decides whether some configuration of the initial language can reach
    /// some configuration of the final language, and reconstructs a witness
    /// according to the trace mode.
    pub fn solve(&mut self, direction: SearchDirection, trace_mode: TraceMode) -> Result<SolveResult<W>, PdsError> {
        if trace_mode == TraceMode::Shortest && direction != SearchDirection::Post {
            return Err(PdsError::UnsupportedQuery(
                "shortest traces are only supported with the post* direction",
            ));
        }

        if trace_mode == TraceMode::Shortest {
            return self.solve_shortest();
        }

        let found = match direction {
            SearchDirection::Post => self.run_post()?,
            SearchDirection::Pre => self.run_pre()?,
            SearchDirection::Dual => self.run_dual()?,
        };
        info!(
            "{} with {direction:?}",
            if found { "Reachable" } else { "Not reachable" }
        );

        let trace = match trace_mode {
            TraceMode::Any if found => Some(match self.product.find_path() {
                Some((path, labels)) => self.reconstruct(&path, &labels, direction)?,
                None => {
                    let (state, _, epsilon_target) = self
                        .product
                        .empty_accept_witness()
                        .ok_or(PdsError::InternalInvariant("an accepting product state must be reachable"))?;
                    self.reconstruct_empty(state, epsilon_target, direction)?
                }
            }),
            _ => None,
        };

        Ok(SolveResult {
            reachable: found,
            trace,
            weight: None,
        })
    }

    fn run_post(&mut self) -> Result<bool, PdsError> {
        let mut found = self.product.has_accepting();
        let mut engine = PostStar::new(&mut self.initial);

        while !found {
            for event in engine.take_added() {
                if self.product.extend_initial(&event, engine.automaton(), &self.target, true) {
                    found = true;
                    break;
                }
            }

            if found || engine.is_done() {
                break;
            }
            is_cancelled!()?;
            engine.step();
        }

        Ok(found || self.product.has_accepting())
    }

    fn run_pre(&mut self) -> Result<bool, PdsError> {
        let mut found = self.product.has_accepting();
        let mut engine = PreStar::new(&mut self.target);

        while !found {
            for event in engine.take_added() {
                if self.product.extend_target(&event, &self.initial, engine.automaton(), true) {
                    found = true;
                    break;
                }
            }

            if found || engine.is_done() {
                break;
            }
            is_cancelled!()?;
            engine.step();
        }

        Ok(found || self.product.has_accepting())
    }

    fn run_dual(&mut self) -> Result<bool, PdsError> {
        let mut found = self.product.has_accepting();
        let mut post = PostStar::new(&mut self.initial);
        let mut pre = PreStar::new(&mut self.target);

        while !found {
            for event in post.take_added() {
                if self.product.extend_initial(&event, post.automaton(), pre.automaton(), true) {
                    found = true;
                    break;
                }
            }
            if !found {
                for event in pre.take_added() {
                    if self.product.extend_target(&event, post.automaton(), pre.automaton(), true) {
                        found = true;
                        break;
                    }
                }
            }

            if found || (post.is_done() && pre.is_done()) {
                break;
            }
            is_cancelled!()?;
            post.step();
            pre.step();
        }

        Ok(found || self.product.has_accepting())
    }

    fn solve_shortest(&mut self) -> Result<SolveResult<W>, PdsError> {
        let mut best: Option<W> = if self.product.has_accepting() {
            best_accepting_weight_of(&self.product)
        } else {
            None
        };
        let mut engine = ShortestPostStar::new(&mut self.initial);

        loop {
            let events = engine.take_added();
            let dirty = !events.is_empty();
            for event in events {
                self.product.extend_initial(&event, engine.automaton(), &self.target, false);
            }

            if dirty && self.product.has_accepting() {
                best = best_accepting_weight_of(&self.product);
            }

            // Every later commit is at least as heavy as the queue front,
            // and extend cannot improve on it, so the best path can no
            // longer change: stop without draining the remaining workset.
            if let (Some(best), Some(next)) = (&best, engine.peek_weight()) {
                if next >= best {
                    debug!("early termination at weight {best:?}");
                    break;
                }
            }

            if engine.is_done() {
                break;
            }
            is_cancelled!()?;
            engine.step()?;
        }
        drop(engine);

        let path = self.product.find_path_shortest();

        // An empty-stack witness competes with the regular paths.
        if let Some((state, weight, epsilon_target)) = self.product.empty_accept_witness() {
            let path_is_better = matches!(&path, Some((_, _, path_weight)) if *path_weight <= weight);
            if !path_is_better {
                info!("Reachable with weight {weight:?}");
                let trace = self.reconstruct_empty(state, epsilon_target, SearchDirection::Post)?;
                return Ok(SolveResult {
                    reachable: true,
                    trace: Some(trace),
                    weight: Some(weight),
                });
            }
        }

        match path {
            Some((path, labels, weight)) => {
                info!("Reachable with weight {weight:?}");
                let trace = self.reconstruct(&path, &labels, SearchDirection::Post)?;
                Ok(SolveResult {
                    reachable: true,
                    trace: Some(trace),
                    weight: Some(weight),
                })
            }
            None => Ok(SolveResult {
                reachable: false,
                trace: None,
                weight: Some(W::top()),
            }),
        }
    }

    /// Reconstructs the witness for an empty-stack configuration, which is
    /// accepted through an ε-edge of the post*-saturated initial side.
    fn reconstruct_empty(
        &self,
        state: StateIndex,
        epsilon_target: StateIndex,
        direction: SearchDirection,
    ) -> Result<Vec<Configuration>, PdsError> {
        match direction {
            // The final-side continuation of an empty-stack configuration
            // is that configuration itself, so the dual case needs nothing
            // beyond the post* half.
            SearchDirection::Post | SearchDirection::Dual => {
                reconstruct_post_empty(&self.initial, state, epsilon_target)
            }
            SearchDirection::Pre => Err(PdsError::InternalInvariant(
                "empty-stack witnesses arise only from post* saturation",
            )),
        }
    }

    fn reconstruct(
        &self,
        path: &[StateIndex],
        labels: &[LabelIndex],
        direction: SearchDirection,
    ) -> Result<Vec<Configuration>, PdsError> {
        let initial_side: Vec<StateIndex> = path.iter().map(|&state| self.product.state_pair(state).0).collect();
        let target_side: Vec<StateIndex> = path.iter().map(|&state| self.product.state_pair(state).1).collect();

        match direction {
            SearchDirection::Post => reconstruct_post(&self.initial, &initial_side, labels),
            SearchDirection::Pre => reconstruct_pre(&self.target, &target_side, labels),
            SearchDirection::Dual => {
                let mut configurations = reconstruct_post(&self.initial, &initial_side, labels)?;
                let continuation = reconstruct_pre(&self.target, &target_side, labels)?;

                debug_assert_eq!(
                    configurations.last(),
                    continuation.first(),
                    "both halves must meet in the same configuration"
                );
                configurations.extend(continuation.into_iter().skip(1));
                Ok(configurations)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    use crate::Nfa;
    use crate::Operation;
    use crate::PdaBuilder;
    use crate::Precondition;
    use crate::RuleOp;

    /// The rules from the example in Figure 3.1 (Schwoon-php02), with the
    /// swap-and-push rule split through the auxiliary control state 3.
    fn schwoon_pda() -> Pda<()> {
        let mut builder = PdaBuilder::new(&["A", "B", "C"]);
        builder.add_rule(0, 1, RuleOp::Push("B"), Precondition::Label("A"), ()).unwrap();
        builder.add_rule(0, 0, RuleOp::Pop, Precondition::Label("B"), ()).unwrap();
        builder.add_rule(1, 3, RuleOp::Swap("A"), Precondition::Label("B"), ()).unwrap();
        builder.add_rule(2, 0, RuleOp::Swap("B"), Precondition::Label("C"), ()).unwrap();
        builder.add_rule(3, 2, RuleOp::Push("C"), Precondition::Label("A"), ()).unwrap();
        builder.build(None).unwrap()
    }

    /// The final language C Γ* A rooted at control state 2.
    fn final_automaton<W: Weight>(pda: &Pda<W>) -> PAutomaton<'_, W> {
        let mut nfa = Nfa::new(pda.num_of_labels());
        let n0 = nfa.add_state(true, false);
        let n1 = nfa.add_state(false, false);
        let n2 = nfa.add_state(false, true);
        nfa.add_edge(n0, n1, &[pda.label_index("C").unwrap()]);
        nfa.add_wildcard_edge(n1, n1);
        nfa.add_edge(n1, n2, &[pda.label_index("A").unwrap()]);

        PAutomaton::from_nfa(pda, &nfa, &[StateIndex::new(2)]).unwrap()
    }

    /// Checks that consecutive configurations are justified by exactly one
    /// rule firing each.
    fn assert_valid_trace<W: Weight>(pda: &Pda<W>, trace: &[Configuration]) {
        assert!(!trace.is_empty(), "a witness has at least one configuration");

        for (current, next) in trace.iter().zip(trace.iter().skip(1)) {
            let top = *current.stack.first().expect("a configuration with successors has a stack");
            let justified = pda.rules_from(current.state, top).any(|rule| {
                let rule = pda.rule(rule);
                if rule.to != next.state {
                    return false;
                }
                match rule.operation {
                    Operation::Pop => next.stack == current.stack[1..],
                    Operation::Swap(swapped) => {
                        next.stack.first() == Some(&swapped) && next.stack[1..] == current.stack[1..]
                    }
                    Operation::Push(pushed) => {
                        next.stack.first() == Some(&pushed) && next.stack[1..] == current.stack[..]
                    }
                }
            });

            assert!(
                justified,
                "no rule justifies the step {:?} -> {:?}",
                current, next
            );
        }
    }

    #[test]
    fn test_reachability_post_with_nfa_sets() {
        let pda = schwoon_pda();
        let stack = pda.encode(&["A", "A"]).unwrap();
        let initial = PAutomaton::new(&pda, StateIndex::new(0), &stack).unwrap();
        let target = final_automaton(&pda);

        let mut instance = SolverInstance::new(&pda, initial, target).unwrap();
        let result = instance.solve(SearchDirection::Post, TraceMode::Any).unwrap();

        assert!(result.reachable);
        let trace = result.trace.unwrap();
        assert!(trace.len() >= 3, "the witness needs several rule firings: {trace:?}");
        assert_valid_trace(&pda, &trace);

        // The witness starts in the initial language and ends in the final
        // language; check against fresh, unsaturated automata.
        let first = trace.first().unwrap();
        assert_eq!(first, &Configuration {
            state: StateIndex::new(0),
            stack: stack.clone(),
        });
        let last = trace.last().unwrap();
        assert!(final_automaton(&pda).accepts(last.state, &last.stack));
    }

    #[test]
    fn test_reachability_pre_with_nfa_sets() {
        let pda = schwoon_pda();
        let stack = pda.encode(&["A", "A"]).unwrap();
        let initial = PAutomaton::new(&pda, StateIndex::new(0), &stack).unwrap();
        let target = final_automaton(&pda);

        let mut instance = SolverInstance::new(&pda, initial, target).unwrap();
        let result = instance.solve(SearchDirection::Pre, TraceMode::Any).unwrap();

        assert!(result.reachable);
        let trace = result.trace.unwrap();
        assert_valid_trace(&pda, &trace);
        assert_eq!(trace.first().unwrap(), &Configuration {
            state: StateIndex::new(0),
            stack,
        });
        let last = trace.last().unwrap();
        assert!(final_automaton(&pda).accepts(last.state, &last.stack));
    }

    #[test]
    fn test_reachability_dual_with_nfa_sets() {
        let pda = schwoon_pda();
        let stack = pda.encode(&["A", "A"]).unwrap();
        let initial = PAutomaton::new(&pda, StateIndex::new(0), &stack).unwrap();
        let target = final_automaton(&pda);

        let mut instance = SolverInstance::new(&pda, initial, target).unwrap();
        let result = instance.solve(SearchDirection::Dual, TraceMode::Any).unwrap();

        assert!(result.reachable);
        let trace = result.trace.unwrap();
        assert_valid_trace(&pda, &trace);
        assert_eq!(trace.first().unwrap(), &Configuration {
            state: StateIndex::new(0),
            stack,
        });
        let last = trace.last().unwrap();
        assert!(final_automaton(&pda).accepts(last.state, &last.stack));
    }

    #[test]
    fn test_unreachable_terminates() {
        let mut builder = PdaBuilder::<()>::new(&["A"]);
        builder.add_rule(0, 0, RuleOp::Pop, Precondition::Label("A"), ()).unwrap();
        let pda = builder.build(Some(2)).unwrap();

        let stack = pda.encode(&["A"]).unwrap();

        for direction in [SearchDirection::Post, SearchDirection::Pre, SearchDirection::Dual] {
            let initial = PAutomaton::new(&pda, StateIndex::new(0), &stack).unwrap();
            let target = PAutomaton::new(&pda, StateIndex::new(1), &[]).unwrap();

            let mut instance = SolverInstance::new(&pda, initial, target).unwrap();
            let result = instance.solve(direction, TraceMode::Any).unwrap();

            assert!(!result.reachable, "{direction:?} must report unreachable");
            assert!(result.trace.is_none());
        }
    }

    #[test]
    fn test_pop_to_empty_stack() {
        // Popping the last label reaches (1, ε), which post* represents
        // through an ε-edge rather than through acceptance flags.
        let mut builder = PdaBuilder::<u32>::new(&["A"]);
        builder.add_rule(0, 1, RuleOp::Pop, Precondition::Label("A"), 5).unwrap();
        let pda = builder.build(None).unwrap();

        let stack = pda.encode(&["A"]).unwrap();
        let expected = vec![
            Configuration {
                state: StateIndex::new(0),
                stack: stack.clone(),
            },
            Configuration {
                state: StateIndex::new(1),
                stack: Vec::new(),
            },
        ];

        for direction in [SearchDirection::Post, SearchDirection::Pre, SearchDirection::Dual] {
            let initial = PAutomaton::new(&pda, StateIndex::new(0), &stack).unwrap();
            let target = PAutomaton::new(&pda, StateIndex::new(1), &[]).unwrap();

            let mut instance = SolverInstance::new(&pda, initial, target).unwrap();
            let result = instance.solve(direction, TraceMode::Any).unwrap();

            assert!(result.reachable, "{direction:?} must reach the empty stack");
            let trace = result.trace.unwrap();
            assert_valid_trace(&pda, &trace);
            assert_eq!(trace, expected);
        }

        let initial = PAutomaton::new(&pda, StateIndex::new(0), &stack).unwrap();
        let target = PAutomaton::new(&pda, StateIndex::new(1), &[]).unwrap();
        let mut instance = SolverInstance::new(&pda, initial, target).unwrap();
        let result = instance.solve(SearchDirection::Post, TraceMode::Shortest).unwrap();

        assert!(result.reachable);
        assert_eq!(result.weight, Some(5));
        assert_eq!(result.trace.unwrap(), expected);
    }

    #[test]
    fn test_immediately_reachable() {
        let mut builder = PdaBuilder::<()>::new(&["A"]);
        builder.add_rule(0, 0, RuleOp::Pop, Precondition::Label("A"), ()).unwrap();
        let pda = builder.build(None).unwrap();

        let stack = pda.encode(&["A"]).unwrap();
        let initial = PAutomaton::new(&pda, StateIndex::new(0), &stack).unwrap();

        let mut nfa = Nfa::new(1);
        let n0 = nfa.add_state(true, false);
        let n1 = nfa.add_state(false, true);
        nfa.add_edge(n0, n1, &[pda.label_index("A").unwrap()]);
        let target = PAutomaton::from_nfa(&pda, &nfa, &[StateIndex::new(0)]).unwrap();

        // The languages intersect before any saturation.
        let mut instance = SolverInstance::new(&pda, initial, target).unwrap();
        let result = instance.solve(SearchDirection::Post, TraceMode::Any).unwrap();

        assert!(result.reachable);
        let trace = result.trace.unwrap();
        assert_eq!(trace, vec![Configuration {
            state: StateIndex::new(0),
            stack,
        }]);
    }

    fn diamond_pda() -> Pda<u32> {
        let mut builder = PdaBuilder::new(&["A"]);
        builder.add_rule(0, 3, RuleOp::Push("A"), Precondition::Label("A"), 4).unwrap();
        builder.add_rule(0, 1, RuleOp::Push("A"), Precondition::Label("A"), 1).unwrap();
        builder.add_rule(3, 1, RuleOp::Push("A"), Precondition::Label("A"), 8).unwrap();
        builder.add_rule(1, 2, RuleOp::Pop, Precondition::Label("A"), 2).unwrap();
        builder.add_rule(2, 4, RuleOp::Pop, Precondition::Label("A"), 16).unwrap();
        builder.build(Some(5)).unwrap()
    }

    #[test]
    fn test_shortest_trace_weight() {
        let pda = diamond_pda();
        let stack = pda.encode(&["A"]).unwrap();
        let initial = PAutomaton::new(&pda, StateIndex::new(0), &stack).unwrap();
        let target = PAutomaton::new(&pda, StateIndex::new(4), &stack).unwrap();

        let mut instance = SolverInstance::new(&pda, initial, target).unwrap();
        let result = instance.solve(SearchDirection::Post, TraceMode::Shortest).unwrap();

        assert!(result.reachable);
        assert_eq!(result.weight, Some(30));

        let trace = result.trace.unwrap();
        assert_valid_trace(&pda, &trace);
        assert_eq!(trace.first().unwrap().state, StateIndex::new(0));
        assert_eq!(trace.last().unwrap(), &Configuration {
            state: StateIndex::new(4),
            stack,
        });

        // The weight equals the sum of the fired rule weights.
        assert_eq!(trace.len(), 5);
    }

    #[test]
    fn test_shortest_early_termination_skips_heavy_edges() {
        // The diamond with an expensive dead end behind control state 2:
        // settling it would cost at least 1000, far above the answer.
        let mut builder = PdaBuilder::new(&["A"]);
        builder.add_rule(0, 3, RuleOp::Push("A"), Precondition::Label("A"), 4).unwrap();
        builder.add_rule(0, 1, RuleOp::Push("A"), Precondition::Label("A"), 1).unwrap();
        builder.add_rule(3, 1, RuleOp::Push("A"), Precondition::Label("A"), 8).unwrap();
        builder.add_rule(1, 2, RuleOp::Pop, Precondition::Label("A"), 2).unwrap();
        builder.add_rule(2, 4, RuleOp::Pop, Precondition::Label("A"), 16).unwrap();
        builder.add_rule(2, 5, RuleOp::Pop, Precondition::Label("A"), 1000).unwrap();
        let pda: Pda<u32> = builder.build(Some(6)).unwrap();

        let stack = pda.encode(&["A"]).unwrap();
        let initial = PAutomaton::new(&pda, StateIndex::new(0), &stack).unwrap();
        let target = PAutomaton::new(&pda, StateIndex::new(4), &stack).unwrap();

        let mut instance = SolverInstance::new(&pda, initial, target).unwrap();
        let result = instance.solve(SearchDirection::Post, TraceMode::Shortest).unwrap();

        assert!(result.reachable);
        assert_eq!(result.weight, Some(30));

        // The 1000-weight pop would give state 5 outgoing edges, but those
        // derivations stay queued behind the early termination.
        for index in 0..instance.initial_automaton().num_of_states() {
            for edge in instance.initial_automaton().edges_from(StateIndex::new(index)) {
                for label in edge.labels() {
                    assert!(
                        label.weight < 1000,
                        "a heavier edge than the answer was settled"
                    );
                }
            }
        }
        assert!(instance.initial_automaton().edges_from(StateIndex::new(5)).is_empty());
    }

    #[test]
    fn test_shortest_unreachable_weight_is_top() {
        let pda = diamond_pda();
        let stack = pda.encode(&["A"]).unwrap();
        let initial = PAutomaton::new(&pda, StateIndex::new(4), &stack).unwrap();
        let target = PAutomaton::new(&pda, StateIndex::new(0), &[]).unwrap();

        let mut instance = SolverInstance::new(&pda, initial, target).unwrap();
        let result = instance.solve(SearchDirection::Post, TraceMode::Shortest).unwrap();

        assert!(!result.reachable);
        assert_eq!(result.weight, Some(u32::MAX));
    }

    #[test]
    fn test_shortest_requires_post() {
        let pda = diamond_pda();
        let stack = pda.encode(&["A"]).unwrap();
        let initial = PAutomaton::new(&pda, StateIndex::new(0), &stack).unwrap();
        let target = PAutomaton::new(&pda, StateIndex::new(4), &stack).unwrap();

        let mut instance = SolverInstance::new(&pda, initial, target).unwrap();
        assert!(matches!(
            instance.solve(SearchDirection::Pre, TraceMode::Shortest),
            Err(PdsError::UnsupportedQuery(_))
        ));
    }

    #[test]
    fn test_trace_mode_none_skips_reconstruction() {
        let pda = schwoon_pda();
        let stack = pda.encode(&["A", "A"]).unwrap();
        let initial = PAutomaton::new(&pda, StateIndex::new(0), &stack).unwrap();
        let target = final_automaton(&pda);

        let mut instance = SolverInstance::new(&pda, initial, target).unwrap();
        let result = instance.solve(SearchDirection::Post, TraceMode::None).unwrap();

        assert!(result.reachable);
        assert!(result.trace.is_none());
    }

    #[test]
    fn test_random_early_termination_equivalence() {
        use presto_utilities::random_test;
        use rand::Rng;

        use crate::post_star;

        // The early-terminated product decision must match a full post*
        // saturation followed by an acceptance check, in every direction.
        random_test(50, |rng| {
            let labels = ["A", "B"];
            let mut builder = PdaBuilder::<()>::new(&labels);
            for _ in 0..rng.random_range(1..8) {
                let from = rng.random_range(0..3);
                let to = rng.random_range(0..3);
                let label = labels[rng.random_range(0..labels.len())];
                let operation = match rng.random_range(0..3) {
                    0 => RuleOp::Pop,
                    1 => RuleOp::Swap(labels[rng.random_range(0..labels.len())]),
                    _ => RuleOp::Push(labels[rng.random_range(0..labels.len())]),
                };
                builder.add_rule(from, to, operation, Precondition::Label(label), ()).unwrap();
            }
            let pda = builder.build(Some(3)).unwrap();

            let initial_stack = pda.encode(&["A"]).unwrap();
            let target_state = StateIndex::new(rng.random_range(0..3));
            let target_stack: Vec<_> = (0..rng.random_range(0..3))
                .map(|_| crate::LabelIndex::new(rng.random_range(0..labels.len())))
                .collect();

            let mut reference = PAutomaton::new(&pda, StateIndex::new(0), &initial_stack).unwrap();
            post_star(&mut reference).unwrap();

            // Empty-stack configurations are represented by ε-edges into
            // accepting states, which the plain acceptance check ignores.
            let expected = reference.accepts(target_state, &target_stack)
                || (target_stack.is_empty()
                    && reference
                        .edges_from(target_state)
                        .iter()
                        .any(|edge| edge.contains(Symbol::Epsilon) && reference.is_accepting(edge.to)));

            for direction in [SearchDirection::Post, SearchDirection::Pre, SearchDirection::Dual] {
                let initial = PAutomaton::new(&pda, StateIndex::new(0), &initial_stack).unwrap();
                let target = PAutomaton::new(&pda, target_state, &target_stack).unwrap();

                let mut instance = SolverInstance::new(&pda, initial, target).unwrap();
                let result = instance.solve(direction, TraceMode::Any).unwrap();

                assert_eq!(
                    result.reachable, expected,
                    "{direction:?} disagrees with the saturated reference"
                );
                if let Some(trace) = result.trace {
                    assert_valid_trace(&pda, &trace);
                }
            }
        });
    }

    #[test]
    fn test_rejects_foreign_automata() {
        let pda = schwoon_pda();
        let other = schwoon_pda();

        let stack = pda.encode(&["A"]).unwrap();
        let initial = PAutomaton::new(&pda, StateIndex::new(0), &stack).unwrap();
        let target = PAutomaton::new(&other, StateIndex::new(2), &stack).unwrap();

        assert!(matches!(
            SolverInstance::new(&pda, initial, target),
            Err(PdsError::InvalidAutomaton(_))
        ));
    }
}
