use cancel_this::Cancellable;
use cancel_this::is_cancelled;
use log::trace;
use rustc_hash::FxHashSet;

use crate::EdgeEvent;
use crate::LabelIndex;
use crate::Operation;
use crate::PAutomaton;
use crate::RuleIndex;
use crate::StateIndex;
use crate::Symbol;
use crate::TraceRecord;
use crate::Weight;

/// The pre* saturation engine.
///
/// Starting from an automaton recognizing a configuration set C, adds edges
/// until the automaton recognizes pre*(C): all configurations from which
/// some configuration in C is reachable. No states are added; the push-rule
/// case contracts a two-edge path and records the intermediate state in the
/// trace.
///
/// The engine is driven step by step so that a reachability driver can
/// mirror newly added edges into a product automaton between steps; use
/// [`pre_star`] to simply run to the fixed point.
pub struct PreStar<'a, 'pda, W: Weight> {
    automaton: &'a mut PAutomaton<'pda, W>,
    workset: Vec<(StateIndex, LabelIndex, StateIndex)>,
    seen: FxHashSet<(StateIndex, LabelIndex, StateIndex)>,

    /// For every automaton state q, the push rules whose pushed-label edge
    /// has been confirmed to end in q, waiting for edges leaving q that
    /// read their precondition label.
    delta_prime: Vec<Vec<(RuleIndex, StateIndex)>>,

    added: Vec<EdgeEvent<W>>,
}

impl<'a, 'pda, W: Weight> PreStar<'a, 'pda, W> {
    /// Creates the engine and seeds the workset with the edges already in
    /// the automaton and the images of all pop rules.
    pub fn new(automaton: &'a mut PAutomaton<'pda, W>) -> Self {
        let pda = automaton.pda();
        let num_of_states = automaton.num_of_states();

        let mut engine = Self {
            automaton,
            workset: Vec::new(),
            seen: FxHashSet::default(),
            delta_prime: vec![Vec::new(); num_of_states],
            added: Vec::new(),
        };

        for index in 0..num_of_states {
            let from = StateIndex::new(index);
            for edge in engine.automaton.edges_from(from) {
                for label in edge.labels() {
                    match label.symbol {
                        Symbol::Label(label) => {
                            engine.seen.insert((from, label, edge.to));
                            engine.workset.push((from, label, edge.to));
                        }
                        Symbol::Epsilon => {
                            debug_assert!(false, "pre* does not support ε-edges in the input automaton");
                        }
                    }
                }
            }
        }

        // (p, γ) -> (q, pop) reaches q with γ popped, so p --γ--> q holds
        // unconditionally.
        for rule_index in pda.iter_rules() {
            let rule = pda.rule(rule_index);
            if rule.operation == Operation::Pop {
                engine.insert_edge(rule.from, rule.label, rule.to, TraceRecord::Pre { rule: rule_index });
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
        let Some((from, label, to)) = self.workset.pop() else {
            return false;
        };
        let pda = self.automaton.pda();
        trace!("pre* processing edge ({from}, {label}, {to})");

        // Push rules whose pushed-label edge ended in `from` wait here for
        // edges reading their precondition label.
        let pending = self.delta_prime[from.value()].clone();
        for (rule_index, source) in pending {
            if pda.rule(rule_index).label == label {
                self.insert_edge(
                    source,
                    label,
                    to,
                    TraceRecord::PreThrough {
                        rule: rule_index,
                        temp: from,
                    },
                );
            }
        }

        if !self.automaton.is_control_state(from) {
            return true;
        }

        for rule_index in pda.rules_into(from) {
            let rule = pda.rule(rule_index);
            match rule.operation {
                Operation::Pop => {}
                Operation::Swap(swapped) => {
                    // (p, γ) -> (q, swap γ') and q --γ'--> s gives p --γ--> s.
                    if swapped == label {
                        self.insert_edge(rule.from, rule.label, to, TraceRecord::Pre { rule: rule_index });
                    }
                }
                Operation::Push(pushed) => {
                    // (p, γ) -> (q, push γ') and q --γ'--> s --γ--> t gives
                    // p --γ--> t. The second edge may not exist yet, so
                    // register with Δ' and combine with the edges that do.
                    if pushed == label {
                        self.delta_prime[to.value()].push((rule_index, rule.from));

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
                            if continuation == rule.label {
                                self.insert_edge(
                                    rule.from,
                                    continuation,
                                    target,
                                    TraceRecord::PreThrough {
                                        rule: rule_index,
                                        temp: to,
                                    },
                                );
                            }
                        }
                    }
                }
            }
        }

        true
    }

    fn insert_edge(&mut self, from: StateIndex, label: LabelIndex, to: StateIndex, record: TraceRecord) {
        if self.seen.insert((from, label, to)) {
            let trace = self.automaton.new_trace(record);
            self.automaton
                .add_edge(from, to, Symbol::Label(label), Some(trace), W::zero());
            self.workset.push((from, label, to));
            self.added.push(EdgeEvent {
                from,
                symbol: Symbol::Label(label),
                to,
                trace: Some(trace),
                weight: W::zero(),
            });
        }
    }
}

/// Saturates the automaton to recognize pre* of its configuration set.
pub fn pre_star<W: Weight>(automaton: &mut PAutomaton<'_, W>) -> Cancellable<()> {
    let mut engine = PreStar::new(automaton);
    while !engine.is_done() {
        is_cancelled!()?;
        engine.step();
    }
    Ok(())
}
