use std::cmp::Ordering;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use cancel_this::is_cancelled;
use log::trace;
use rustc_hash::FxHashMap;

use crate::EdgeChange;
use crate::EdgeEvent;
use crate::LabelIndex;
use crate::Operation;
use crate::PAutomaton;
use crate::PdsError;
use crate::StateIndex;
use crate::Symbol;
use crate::TraceRecord;
use crate::Weight;

/// A pending derivation of an edge at a certain weight.
///
/// The ordering is by weight first and then by the edge itself, so that the
/// queue pops candidates deterministically.
#[derive(Clone, Debug)]
struct Candidate<W> {
    weight: W,
    from: StateIndex,
    symbol: Symbol,
    to: StateIndex,
    record: Option<TraceRecord>,
}

impl<W: Weight> Candidate<W> {
    fn key(&self) -> (&W, StateIndex, Symbol, StateIndex) {
        (&self.weight, self.from, self.symbol, self.to)
    }
}

impl<W: Weight> PartialEq for Candidate<W> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<W: Weight> Eq for Candidate<W> {}

impl<W: Weight> PartialOrd for Candidate<W> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<W: Weight> Ord for Candidate<W> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// The weighted post* saturation engine.
///
/// Computes the same fixed point as [`crate::PostStar`], but derives every
/// edge at its minimum weight: a priority queue pops pending derivations in
/// non-decreasing weight order, improvements are committed monotonically
/// (replacing the trace with that of the improving derivation), and
/// derivations that can no longer improve their edge are dropped on pop
/// (lazy deletion instead of decrease-key).
pub struct ShortestPostStar<'a, 'pda, W: Weight> {
    automaton: &'a mut PAutomaton<'pda, W>,
    queue: BinaryHeap<Reverse<Candidate<W>>>,

    /// The weight at which each edge was last propagated.
    processed: FxHashMap<(StateIndex, Symbol, StateIndex), W>,

    /// The auxiliary state for every `(target state, pushed label)` pair.
    aux_states: FxHashMap<(StateIndex, LabelIndex), StateIndex>,

    /// The sources of the ε-edges into every state.
    eps_into: FxHashMap<StateIndex, Vec<StateIndex>>,

    added: Vec<EdgeEvent<W>>,
}

impl<'a, 'pda, W: Weight> ShortestPostStar<'a, 'pda, W> {
    /// Creates the engine, adds the auxiliary states for all push rules and
    /// queues the automaton's control state edges at weight zero.
    pub fn new(automaton: &'a mut PAutomaton<'pda, W>) -> Self {
        let pda = automaton.pda();

        let mut engine = Self {
            automaton,
            queue: BinaryHeap::new(),
            processed: FxHashMap::default(),
            aux_states: FxHashMap::default(),
            eps_into: FxHashMap::default(),
            added: Vec::new(),
        };

        for rule_index in pda.iter_rules() {
            let rule = pda.rule(rule_index);
            if let Operation::Push(pushed) = rule.operation {
                engine
                    .aux_states
                    .entry((rule.to, pushed))
                    .or_insert_with(|| engine.automaton.add_state(false));
            }
        }

        for index in 0..pda.num_of_states() {
            let from = StateIndex::new(index);
            for edge in engine.automaton.edges_from(from) {
                for label in edge.labels() {
                    debug_assert!(!label.symbol.is_epsilon(), "the input automaton must be ε-free");
                    engine.queue.push(Reverse(Candidate {
                        weight: label.weight.clone(),
                        from,
                        symbol: label.symbol,
                        to: edge.to,
                        record: None,
                    }));
                }
            }
        }

        engine
    }

    /// Returns the automaton being saturated.
    pub fn automaton(&self) -> &PAutomaton<'pda, W> {
        self.automaton
    }

    /// Returns true iff no pending derivations are left.
    pub fn is_done(&self) -> bool {
        self.queue.is_empty()
    }

    /// Returns the weight of the lightest pending derivation. No derivation
    /// popped later can commit an edge below this weight.
    pub fn peek_weight(&self) -> Option<&W> {
        self.queue.peek().map(|Reverse(candidate)| &candidate.weight)
    }

    /// Drains the edges added or improved since the last call.
    pub fn take_added(&mut self) -> Vec<EdgeEvent<W>> {
        std::mem::take(&mut self.added)
    }

    /// Pops and processes the lightest pending derivation. Returns false
    /// iff the queue was empty.
    pub fn step(&mut self) -> Result<bool, PdsError> {
        let Some(Reverse(candidate)) = self.queue.pop() else {
            return Ok(false);
        };

        let Candidate {
            weight,
            from,
            symbol,
            to,
            record,
        } = candidate;

        // Commit the derivation; this is a no-op if the edge already has a
        // weight at least as good.
        let trace = record.map(|record| self.automaton.new_trace(record));
        let change = self.automaton.add_edge(from, to, symbol, trace, weight.clone());

        let committed = match self.automaton.edge_label(from, symbol, to) {
            Some(label) => label.weight.clone(),
            None => {
                return Err(PdsError::InternalInvariant("a committed edge must be present"));
            }
        };

        if change != EdgeChange::Unchanged {
            self.added.push(EdgeEvent {
                from,
                symbol,
                to,
                trace,
                weight: committed.clone(),
            });
        }

        // Propagate only if this edge was never propagated at a weight this
        // good; later and heavier duplicates die here.
        if self
            .processed
            .get(&(from, symbol, to))
            .is_some_and(|last| *last <= committed)
        {
            return Ok(true);
        }
        self.processed.insert((from, symbol, to), committed.clone());
        trace!("shortest post* settling edge ({from}, {symbol:?}, {to}) at {committed:?}");

        if change == EdgeChange::Inserted && symbol.is_epsilon() {
            self.eps_into.entry(to).or_default().push(from);
        }

        self.propagate(from, symbol, to, committed)
    }

    fn propagate(&mut self, from: StateIndex, symbol: Symbol, to: StateIndex, weight: W) -> Result<bool, PdsError> {
        let pda = self.automaton.pda();

        let label = match symbol {
            Symbol::Label(label) => label,
            Symbol::Epsilon => {
                // The ε-edge combines with every edge leaving its target.
                let continuations: Vec<(LabelIndex, StateIndex, W)> = self
                    .automaton
                    .edges_from(to)
                    .iter()
                    .flat_map(|edge| {
                        edge.labels().iter().filter_map(move |entry| match entry.symbol {
                            Symbol::Label(label) => Some((label, edge.to, entry.weight.clone())),
                            Symbol::Epsilon => None,
                        })
                    })
                    .collect();

                for (continuation, target, continuation_weight) in continuations {
                    self.queue.push(Reverse(Candidate {
                        weight: weight.extend(&continuation_weight),
                        from,
                        symbol: Symbol::Label(continuation),
                        to: target,
                        record: Some(TraceRecord::PostEpsilon { through: to }),
                    }));
                }
                return Ok(true);
            }
        };

        if self.automaton.is_control_state(from) {
            for rule_index in pda.rules_from(from, label) {
                let rule = pda.rule(rule_index);
                let extended = weight.extend(&rule.weight);
                if extended < weight {
                    return Err(PdsError::SemiringContract("extend must not improve a weight"));
                }

                let record = TraceRecord::PostRule {
                    from,
                    rule: rule_index,
                    label,
                };

                match rule.operation {
                    Operation::Pop => {
                        self.queue.push(Reverse(Candidate {
                            weight: extended,
                            from: rule.to,
                            symbol: Symbol::Epsilon,
                            to,
                            record: Some(record),
                        }));
                    }
                    Operation::Swap(swapped) => {
                        self.queue.push(Reverse(Candidate {
                            weight: extended,
                            from: rule.to,
                            symbol: Symbol::Label(swapped),
                            to,
                            record: Some(record),
                        }));
                    }
                    Operation::Push(pushed) => {
                        let aux = self.aux_states[&(rule.to, pushed)];
                        // The weight of the firing goes on the edge below
                        // the pushed label, so that reading the new top
                        // costs nothing extra.
                        self.queue.push(Reverse(Candidate {
                            weight: W::zero(),
                            from: rule.to,
                            symbol: Symbol::Label(pushed),
                            to: aux,
                            record: Some(record),
                        }));
                        self.queue.push(Reverse(Candidate {
                            weight: extended,
                            from: aux,
                            symbol: Symbol::Label(label),
                            to,
                            record: Some(record),
                        }));
                    }
                }
            }
        }

        // The edge combines with the ε-edges pointing into its source
        // (control states never have any).
        let sources = self.eps_into.get(&from).cloned().unwrap_or_default();
        for source in sources {
            let epsilon_weight = match self.automaton.edge_label(source, Symbol::Epsilon, from) {
                Some(label) => label.weight.clone(),
                None => {
                    return Err(PdsError::InternalInvariant("a recorded ε-edge must be present"));
                }
            };

            self.queue.push(Reverse(Candidate {
                weight: epsilon_weight.extend(&weight),
                from: source,
                symbol: Symbol::Label(label),
                to,
                record: Some(TraceRecord::PostEpsilon { through: from }),
            }));
        }

        Ok(true)
    }
}

/// Saturates the automaton to recognize post* of its configuration set,
/// with every edge at its minimum weight.
pub fn shortest_post_star<W: Weight>(automaton: &mut PAutomaton<'_, W>) -> Result<(), PdsError> {
    let mut engine = ShortestPostStar::new(automaton);
    while !engine.is_done() {
        is_cancelled!()?;
        engine.step()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    use crate::Pda;
    use crate::PdaBuilder;
    use crate::Precondition;
    use crate::RuleOp;

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
    fn test_weighted_post_star_distances() {
        let pda = diamond_pda();
        let stack = pda.encode(&["A"]).unwrap();
        let mut automaton = PAutomaton::new(&pda, StateIndex::new(0), &stack).unwrap();

        shortest_post_star(&mut automaton).unwrap();

        // Distances derived by hand: reach (4, A) via push 4, push 8,
        // pop 2, pop 16 and (2, AA) via push 4, push 8, pop 2.
        let (_, weight) = automaton
            .shortest_accept_path(StateIndex::new(4), &pda.encode(&["A"]).unwrap())
            .unwrap();
        assert_eq!(weight, 30);

        let (_, weight) = automaton
            .shortest_accept_path(StateIndex::new(2), &pda.encode(&["A", "A"]).unwrap())
            .unwrap();
        assert_eq!(weight, 14);
    }

    #[test]
    fn test_weighted_post_star_accepts() {
        let mut builder = PdaBuilder::new(&["A", "B"]);
        builder.add_rule(1, 2, RuleOp::Pop, Precondition::Label("A"), 1).unwrap();
        builder.add_rule(1, 3, RuleOp::Push("B"), Precondition::Label("A"), 3).unwrap();
        builder.add_rule(1, 3, RuleOp::Swap("A"), Precondition::Label("B"), 2).unwrap();
        builder.add_rule(2, 1, RuleOp::Pop, Precondition::Label("B"), 4).unwrap();
        builder.add_rule(2, 2, RuleOp::Push("B"), Precondition::OneOf(&["A", "B"]), 5).unwrap();
        builder.add_rule(3, 1, RuleOp::Pop, Precondition::Label("B"), 1).unwrap();
        let pda: Pda<u32> = builder.build(None).unwrap();

        let stack = pda.encode(&["A", "B", "A"]).unwrap();
        let mut automaton = PAutomaton::new(&pda, StateIndex::new(1), &stack).unwrap();

        shortest_post_star(&mut automaton).unwrap();

        assert!(automaton.accepts(StateIndex::new(1), &pda.encode(&["A"]).unwrap()));
    }

    #[test]
    fn test_weighted_matches_unweighted_language() {
        let pda = diamond_pda();
        let stack = pda.encode(&["A"]).unwrap();

        let mut weighted = PAutomaton::new(&pda, StateIndex::new(0), &stack).unwrap();
        shortest_post_star(&mut weighted).unwrap();

        let mut unweighted = PAutomaton::new(&pda, StateIndex::new(0), &stack).unwrap();
        crate::post_star(&mut unweighted).unwrap();

        for state in 0..pda.num_of_states() {
            for depth in 1..4usize {
                let test_stack = vec![pda.label_index("A").unwrap(); depth];
                assert_eq!(
                    weighted.accepts(StateIndex::new(state), &test_stack),
                    unweighted.accepts(StateIndex::new(state), &test_stack),
                    "languages differ at state {state} depth {depth}"
                );
            }
        }
    }
}
