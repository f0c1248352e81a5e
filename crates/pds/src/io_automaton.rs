use std::io::BufRead;
use std::io::BufReader;
use std::io::Read;

use log::trace;
use presto_utilities::PrestoError;
use regex::Regex;
use thiserror::Error;

use crate::Nfa;
use crate::NfaStateIndex;
use crate::PAutomaton;
use crate::Pda;
use crate::StateIndex;
use crate::Weight;

#[derive(Error, Debug)]
pub enum AutomatonIoError {
    #[error("invalid automaton header: {0}")]
    InvalidHeader(&'static str),

    #[error("invalid line {0}: {1}")]
    InvalidLine(usize, String),
}

/// Reads a P-automaton specification from the given reader.
///
/// # Details
///
/// The file describes an NFA over the PDA's stack alphabet together with
/// the control states its language is rooted at; NFA state 0 is the initial
/// state. `#` starts a comment and blank lines are ignored:
///
/// ```text
/// automaton <num_nfa_states>
/// initial <pda_state> ...
/// accepting <nfa_state> ...
/// edge <from> <label>|* <to>
/// ```
///
/// The resulting automaton accepts `(p, σ)` for every listed control state
/// `p` and every stack σ in the NFA's language.
pub fn read_p_automaton<'pda, W: Weight>(
    reader: impl Read,
    pda: &'pda Pda<W>,
) -> Result<PAutomaton<'pda, W>, PrestoError> {
    let header_regex = Regex::new(r"^automaton\s+([0-9]+)$").expect("Regex compilation should not fail");

    let mut num_of_states = None;
    let mut initial_states: Vec<StateIndex> = Vec::new();
    let mut accepting: Vec<usize> = Vec::new();
    let mut edges: Vec<(usize, Option<usize>, usize)> = Vec::new();

    for (number, line) in BufReader::new(reader).lines().enumerate() {
        let number = number + 1;
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        if num_of_states.is_none() {
            let (_, [count]) = header_regex
                .captures(trimmed)
                .ok_or(AutomatonIoError::InvalidHeader("expected 'automaton <num_states>'"))?
                .extract();
            num_of_states = Some(count.parse::<usize>()?);
            trace!("line {number}: {count} NFA states");
            continue;
        }

        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        match tokens.as_slice() {
            ["initial", states @ ..] => {
                for state in states {
                    let state: usize = state
                        .parse()
                        .map_err(|_| AutomatonIoError::InvalidLine(number, "initial states must be numbers".into()))?;
                    initial_states.push(StateIndex::new(state));
                }
            }
            ["accepting", states @ ..] => {
                for state in states {
                    let state: usize = state
                        .parse()
                        .map_err(|_| AutomatonIoError::InvalidLine(number, "accepting states must be numbers".into()))?;
                    accepting.push(state);
                }
            }
            ["edge", from, label, to] => {
                let from: usize = from
                    .parse()
                    .map_err(|_| AutomatonIoError::InvalidLine(number, "the source state must be a number".into()))?;
                let to: usize = to
                    .parse()
                    .map_err(|_| AutomatonIoError::InvalidLine(number, "the target state must be a number".into()))?;

                let label = if *label == "*" {
                    None
                } else {
                    Some(pda.label_index(label).map(|label| label.value()).ok_or_else(|| {
                        AutomatonIoError::InvalidLine(number, format!("unknown label '{label}'"))
                    })?)
                };

                edges.push((from, label, to));
            }
            _ => {
                return Err(AutomatonIoError::InvalidLine(number, "unrecognized directive".into()).into());
            }
        }
    }

    let num_of_states = num_of_states.ok_or(AutomatonIoError::InvalidHeader("the file is empty"))?;

    let mut nfa = Nfa::new(pda.num_of_labels());
    for index in 0..num_of_states {
        nfa.add_state(index == 0, accepting.contains(&index));
    }

    for (from, label, to) in edges {
        if from >= num_of_states || to >= num_of_states {
            return Err(AutomatonIoError::InvalidHeader("an edge references a state outside the automaton").into());
        }

        let from = NfaStateIndex::new(from);
        let to = NfaStateIndex::new(to);
        match label {
            Some(label) => nfa.add_edge(from, to, &[crate::LabelIndex::new(label)]),
            None => nfa.add_wildcard_edge(from, to),
        }
    }

    Ok(PAutomaton::from_nfa(pda, &nfa, &initial_states)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::PdaBuilder;
    use crate::Precondition;
    use crate::RuleOp;

    fn simple_pda() -> Pda<()> {
        let mut builder = PdaBuilder::new(&["A", "B", "C"]);
        builder.add_rule(0, 1, RuleOp::Pop, Precondition::Label("A"), ()).unwrap();
        builder.build(Some(3)).unwrap()
    }

    #[test]
    fn test_read_p_automaton() {
        let pda = simple_pda();

        // The language C Γ* A rooted at control state 2.
        let input = "\
automaton 3
initial 2
accepting 2
edge 0 C 1
edge 1 * 1
edge 1 A 2
";
        let automaton = read_p_automaton(input.as_bytes(), &pda).unwrap();

        assert!(automaton.accepts(StateIndex::new(2), &pda.encode(&["C", "A"]).unwrap()));
        assert!(automaton.accepts(StateIndex::new(2), &pda.encode(&["C", "B", "B", "A"]).unwrap()));
        assert!(!automaton.accepts(StateIndex::new(2), &pda.encode(&["C", "B"]).unwrap()));
        assert!(!automaton.accepts(StateIndex::new(0), &pda.encode(&["C", "A"]).unwrap()));
        assert!(!automaton.accepts(StateIndex::new(2), &[]));
    }

    #[test]
    fn test_read_p_automaton_rejects_garbage() {
        let pda = simple_pda();
        assert!(read_p_automaton("pda 3".as_bytes(), &pda).is_err());
        assert!(read_p_automaton("automaton 2\nedge 0 D 1".as_bytes(), &pda).is_err());
        assert!(read_p_automaton("automaton 2\nedge 0 A 7".as_bytes(), &pda).is_err());
    }
}
