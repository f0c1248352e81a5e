use std::fmt;

use itertools::Itertools;

use crate::PAutomaton;
use crate::StateIndex;
use crate::Symbol;
use crate::Weight;

/// Helper to render a P-automaton in Graphviz DOT format.
///
/// An edge that carries the whole alphabet is collapsed to `*` and ε is
/// rendered as `𝜀`. Intended for debugging saturation results.
pub struct AutomatonDot<'a, W> {
    pub automaton: &'a PAutomaton<'a, W>,
}

impl<'a, W: Weight> AutomatonDot<'a, W> {
    /// Creates a new AutomatonDot Display for the given automaton.
    pub fn new(automaton: &'a PAutomaton<'a, W>) -> Self {
        Self { automaton }
    }
}

impl<W: Weight> fmt::Display for AutomatonDot<'_, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pda = self.automaton.pda();

        writeln!(f, "digraph p_automaton {{")?;
        writeln!(f, "  rankdir=LR;")?;
        writeln!(f, "  node [fontname=\"DejaVu Sans\"];")?;
        writeln!(f, "  edge [fontname=\"DejaVu Sans\", color=\"#444444\", arrowsize=0.9];")?;

        for index in 0..self.automaton.num_of_states() {
            let state = StateIndex::new(index);
            let shape = if self.automaton.is_accepting(state) {
                "doublecircle"
            } else {
                "circle"
            };
            writeln!(f, "  s{state} [shape={shape}];")?;

            for edge in self.automaton.edges_from(state) {
                let non_epsilon = edge.labels().iter().filter(|label| !label.symbol.is_epsilon()).count();
                let has_epsilon = edge.labels().iter().any(|label| label.symbol.is_epsilon());

                let mut text = if non_epsilon == pda.num_of_labels() {
                    "*".to_string()
                } else {
                    edge.labels()
                        .iter()
                        .filter_map(|label| match label.symbol {
                            Symbol::Label(label) => Some(&pda.labels()[label.value()]),
                            Symbol::Epsilon => None,
                        })
                        .format(", ")
                        .to_string()
                };

                if has_epsilon {
                    if !text.is_empty() {
                        text.push(' ');
                    }
                    text.push('𝜀');
                }

                writeln!(f, "  s{state} -> s{} [label=\"{text}\"];", edge.to)?;
            }
        }

        // Mark the control states as the entry points.
        for index in 0..pda.num_of_states() {
            writeln!(f, "  i{index} [style=invisible];")?;
            writeln!(f, "  i{index} -> s{index};")?;
        }

        writeln!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::PdaBuilder;
    use crate::Precondition;
    use crate::RuleOp;

    #[test]
    fn test_dot_output() {
        let mut builder = PdaBuilder::<()>::new(&["A", "B"]);
        builder.add_rule(0, 0, RuleOp::Pop, Precondition::Label("A"), ()).unwrap();
        let pda = builder.build(None).unwrap();

        let stack = pda.encode(&["A", "B"]).unwrap();
        let automaton = PAutomaton::new(&pda, StateIndex::new(0), &stack).unwrap();

        let dot = AutomatonDot::new(&automaton).to_string();
        assert!(dot.starts_with("digraph p_automaton {"));
        assert!(dot.contains("s0 -> s1"));
        assert!(dot.contains("doublecircle"));
    }
}
