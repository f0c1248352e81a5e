use cancel_this::Cancellable;
use cancel_this::is_cancelled;
use log::trace;
use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;

use crate::EdgeChange;
use crate::EdgeEvent;
use crate::LabelIndex;
use crate::Operation;
use crate::PAutomaton;
use crate::StateIndex;
use crate::Symbol;
use crate::TraceRecord;
use crate::Weight;

/// The post* saturation engine.
///
/// Starting from an automaton recognizing a configuration set C, adds
/// states and edges until the automaton recognizes post*(C): all
/// configurations reachable from some configuration in C. One auxiliary
/// state is created per distinct `(target state, pushed label)` pair of the
/// push rules; pop rules introduce ε-edges, which are propagated into
/// labelled edges so that acceptance checks never have to follow ε.
///
/// Requires that the input automaton has no ε-edges and no edges into
/// control states, which holds for both [`PAutomaton`] constructors.
pub struct PostStar<'a, 'pda, W: Weight> {
    automaton: &'a mut PAutomaton<'pda, W>,
    workset: Vec<(StateIndex, Symbol, StateIndex)>,
    seen: FxHashSet<(StateIndex, Symbol, StateIndex)>,

    /// The auxiliary state for every `(target state, pushed label)` pair.
    aux_states: FxHashMap<(StateIndex, LabelIndex), StateIndex>,

    /// The sources of the ε-edges into every state.
    eps_into: FxHashMap<StateIndex, Vec<StateIndex>>,

    added: Vec<EdgeEvent<W>>,
}

impl<'a, 'pda, W: Weight> PostStar<'a, 'pda, W> {
    /// Creates the engine, adds the auxiliary states for all push rules and
    /// seeds the workset with the automaton's control state edges.
    pub fn new(automaton: &'a mut PAutomaton<'pda, W>) -> Self {
        let pda = automaton.pda();

        let mut engine = Self {
            automaton,
            workset: Vec::new(),
            seen: FxHashSet::default(),
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

        // Only edges leaving control states can fire rules, and the input
        // automaton never gains new edges out of its non-control states.
        for index in 0..pda.num_of_states() {
            let from = StateIndex::new(index);
            for edge in engine.automaton.edges_from(from) {
                for label in edge.labels() {
                    debug_assert!(!label.symbol.is_epsilon(), "the input automaton must be ε-free");
                    engine.seen.insert((from, label.symbol, edge.to));
                    engine.workset.push((from, label.symbol, edge.to));
                }
            }
        }

        engine
    }

    /// Returns the automaton being saturated.
    pub fn automaton(&self) -> &PAutomaton<'pda, W> {
        self.automaton
    }

    /// Returns true iff the fixed point has been reached.
    pub fn is_done(&self) -> bool {
        self.workset.is_empty()
    }

    /// Drains the edges added since the last call.
    pub fn take_added(&mut self) -> Vec<EdgeEvent<W>> {
        std::mem::take(&mut self.added)
    }

    /// Processes a single workset entry. Returns false iff the workset was
    /// empty.
    pub fn step(&mut self) -> bool {
        let Some((from, symbol, to)) = self.workset.pop() else {
            return false;
        };
        let pda = self.automaton.pda();
        trace!("post* processing edge ({from}, {symbol:?}, {to})");

        let label = match symbol {
            Symbol::Label(label) => label,
            Symbol::Epsilon => {
                // A new ε-edge combines with every edge leaving its target.
                self.eps_into.entry(to).or_default().push(from);

                let continuations: Vec<(LabelIndex, StateIndex)> = self
                    .automaton
                    .edges_from(to)
                    .iter()
                    .flat_map(|edge| {
                        edge.labels().iter().filter_map(move |entry| match entry.symbol {
                            Symbol::Label(label) => Some((label, edge.to)),
                            Symbol::Epsilon => None,
                        })
                    })
                    .collect();

                for (continuation, target) in continuations {
                    self.insert_edge(from, Symbol::Label(continuation), target, TraceRecord::PostEpsilon { through: to });
                }
                return true;
            }
        };

        if !self.automaton.is_control_state(from) {
            return true;
        }

        for rule_index in pda.rules_from(from, label) {
            let rule = pda.rule(rule_index);
            let record = TraceRecord::PostRule {
                from,
                rule: rule_index,
                label,
            };

            match rule.operation {
                Operation::Pop => {
                    self.insert_edge(rule.to, Symbol::Epsilon, to, record);
                }
                Operation::Swap(swapped) => {
                    self.insert_edge(rule.to, Symbol::Label(swapped), to, record);
                }
                Operation::Push(pushed) => {
                    let aux = self.aux_states[&(rule.to, pushed)];
                    self.insert_edge(rule.to, Symbol::Label(pushed), aux, record);
                    self.insert_edge(aux, Symbol::Label(label), to, record);

                    // The new edge out of the auxiliary state combines with
                    // the ε-edges already pointing into it.
                    let sources = self.eps_into.get(&aux).cloned().unwrap_or_default();
                    for source in sources {
                        self.insert_edge(source, Symbol::Label(label), to, TraceRecord::PostEpsilon { through: aux });
                    }
                }
            }
        }

        true
    }

    fn insert_edge(&mut self, from: StateIndex, symbol: Symbol, to: StateIndex, record: TraceRecord) {
        if self.seen.insert((from, symbol, to)) {
            let trace = self.automaton.new_trace(record);
            let change = self.automaton.add_edge(from, to, symbol, Some(trace), W::zero());
            debug_assert_eq!(change, EdgeChange::Inserted, "the seen set must mirror the automaton");

            self.workset.push((from, symbol, to));
            self.added.push(EdgeEvent {
                from,
                symbol,
                to,
                trace: Some(trace),
                weight: W::zero(),
            });
        }
    }
}

/// Saturates the automaton to recognize post* of its configuration set.
pub fn post_star<W: Weight>(automaton: &mut PAutomaton<'_, W>) -> Cancellable<()> {
    let mut engine = PostStar::new(automaton);
    while !engine.is_done() {
        is_cancelled!()?;
        engine.step();
    }
    Ok(())
}
