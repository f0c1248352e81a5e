use crate::Configuration;
use crate::LabelIndex;
use crate::Operation;
use crate::PAutomaton;
use crate::PdsError;
use crate::StateIndex;
use crate::Symbol;
use crate::TraceRecord;
use crate::Weight;

/// Reconstruction works on the acceptance run of one configuration, kept as
/// a list of automaton edges with the topmost stack edge last. Each step
/// rewrites the top edges according to their trace records until an edge
/// without provenance (present before saturation) is reached.
type RunEdge = (StateIndex, Symbol, StateIndex);

fn decode(edges: &[RunEdge], state: StateIndex) -> Result<Configuration, PdsError> {
    debug_assert!(
        edges.last().is_none_or(|&(from, _, _)| from == state),
        "the control state must match the topmost edge"
    );

    let mut stack = Vec::with_capacity(edges.len());
    for &(_, symbol, _) in edges.iter().rev() {
        match symbol {
            Symbol::Label(label) => stack.push(label),
            Symbol::Epsilon => {
                return Err(PdsError::InternalInvariant("ε may not appear in a configuration"));
            }
        }
    }

    Ok(Configuration { state, stack })
}

fn run_edges(path: &[StateIndex], stack: &[LabelIndex]) -> Vec<RunEdge> {
    debug_assert_eq!(path.len(), stack.len() + 1, "a run visits one state per stack label plus one");

    (0..stack.len())
        .rev()
        .map(|position| (path[position], Symbol::Label(stack[position]), path[position + 1]))
        .collect()
}

/// Unwinds post* trace records into the execution that leads from a
/// configuration of the original automaton to the accepted configuration
/// `(path[0], stack)`. The records point backwards in execution order, so
/// the collected configurations are reversed before returning.
pub(crate) fn reconstruct_post<W: Weight>(
    automaton: &PAutomaton<'_, W>,
    path: &[StateIndex],
    stack: &[LabelIndex],
) -> Result<Vec<Configuration>, PdsError> {
    let edges = run_edges(path, stack);
    let state = path[0];
    let first = decode(&edges, state)?;

    unwind_post(automaton, edges, state, first)
}

/// Unwinds the empty-stack configuration `(state, ε)` that post* reached by
/// popping everything: its acceptance is carried by the ε-edge from `state`
/// to the accepting `epsilon_target`, whose trace record names the last pop.
pub(crate) fn reconstruct_post_empty<W: Weight>(
    automaton: &PAutomaton<'_, W>,
    state: StateIndex,
    epsilon_target: StateIndex,
) -> Result<Vec<Configuration>, PdsError> {
    let edges = vec![(state, Symbol::Epsilon, epsilon_target)];
    let first = Configuration {
        state,
        stack: Vec::new(),
    };

    unwind_post(automaton, edges, state, first)
}

fn unwind_post<W: Weight>(
    automaton: &PAutomaton<'_, W>,
    mut edges: Vec<RunEdge>,
    mut state: StateIndex,
    first: Configuration,
) -> Result<Vec<Configuration>, PdsError> {
    let pda = automaton.pda();

    let mut configurations = vec![first];
    loop {
        let Some(&(from, symbol, to)) = edges.last() else {
            break;
        };
        let Some(entry) = automaton.edge_label(from, symbol, to) else {
            return Err(PdsError::InternalInvariant("a trace edge is missing from the automaton"));
        };
        let Some(trace) = entry.trace else {
            break;
        };

        match automaton.trace_record(trace) {
            TraceRecord::PostRule {
                from: previous,
                rule,
                label,
            } => {
                edges.pop();
                match pda.rule(rule).operation {
                    Operation::Pop | Operation::Swap(_) => {
                        // Before the firing, the edge read the matched label
                        // from the source state.
                        edges.push((previous, Symbol::Label(label), to));
                        state = previous;
                    }
                    Operation::Push(_) => {
                        // The firing split one edge into two: the pushed
                        // label into the auxiliary state and the matched
                        // label below it. Undo it using the lower edge's own
                        // record, which names the firing that produced it.
                        let Some(&(aux, below_symbol, below_to)) = edges.last() else {
                            return Err(PdsError::InternalInvariant("a push trace needs an edge below the top"));
                        };
                        let below = automaton
                            .edge_label(aux, below_symbol, below_to)
                            .and_then(|entry| entry.trace)
                            .ok_or(PdsError::InternalInvariant("the edge below a push must carry a trace"))?;
                        let TraceRecord::PostRule {
                            from: below_previous,
                            label: below_label,
                            ..
                        } = automaton.trace_record(below)
                        else {
                            return Err(PdsError::InternalInvariant("the edge below a push must be a rule image"));
                        };

                        edges.pop();
                        edges.push((below_previous, Symbol::Label(below_label), below_to));
                        state = below_previous;
                    }
                }
                configurations.push(decode(&edges, state)?);
            }
            TraceRecord::PostEpsilon { through } => {
                // Split the contracted edge back into the ε-edge and its
                // continuation; no configuration in between.
                edges.pop();
                edges.push((through, symbol, to));
                edges.push((from, Symbol::Epsilon, through));
            }
            TraceRecord::Pre { .. } | TraceRecord::PreThrough { .. } => {
                return Err(PdsError::InternalInvariant("pre* record in a post* reconstruction"));
            }
        }
    }

    configurations.reverse();
    Ok(configurations)
}

/// Unwinds pre* trace records into the execution that leads from the
/// accepted configuration `(path[0], stack)` to a configuration of the
/// original automaton. The records point forwards in execution order, so
/// the configurations are collected in order.
pub(crate) fn reconstruct_pre<W: Weight>(
    automaton: &PAutomaton<'_, W>,
    path: &[StateIndex],
    stack: &[LabelIndex],
) -> Result<Vec<Configuration>, PdsError> {
    let pda = automaton.pda();
    let mut edges = run_edges(path, stack);
    let mut state = path[0];

    let mut configurations = vec![decode(&edges, state)?];
    loop {
        let Some(&(from, symbol, to)) = edges.last() else {
            break;
        };
        let Symbol::Label(label) = symbol else {
            return Err(PdsError::InternalInvariant("ε-edge in a pre* reconstruction"));
        };
        debug_assert_eq!(from, state);

        let Some(entry) = automaton.edge_label(from, symbol, to) else {
            return Err(PdsError::InternalInvariant("a trace edge is missing from the automaton"));
        };
        let Some(trace) = entry.trace else {
            break;
        };

        match automaton.trace_record(trace) {
            TraceRecord::Pre { rule } => {
                let rule = pda.rule(rule);
                edges.pop();
                match rule.operation {
                    Operation::Pop => {}
                    Operation::Swap(swapped) => {
                        edges.push((rule.to, Symbol::Label(swapped), to));
                    }
                    Operation::Push(_) => {
                        return Err(PdsError::InternalInvariant("a pre* push must record its through state"));
                    }
                }
                state = rule.to;
                configurations.push(decode(&edges, state)?);
            }
            TraceRecord::PreThrough { rule, temp } => {
                let rule = pda.rule(rule);
                let Operation::Push(pushed) = rule.operation else {
                    return Err(PdsError::InternalInvariant("a through state implies a push rule"));
                };

                // The firing expanded the contracted edge into the pushed
                // label followed by the matched label through `temp`.
                edges.pop();
                edges.push((temp, Symbol::Label(label), to));
                edges.push((rule.to, Symbol::Label(pushed), temp));
                state = rule.to;
                configurations.push(decode(&edges, state)?);
            }
            TraceRecord::PostRule { .. } | TraceRecord::PostEpsilon { .. } => {
                return Err(PdsError::InternalInvariant("post* record in a pre* reconstruction"));
            }
        }
    }

    Ok(configurations)
}
