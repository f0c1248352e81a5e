use std::fmt;

use itertools::Itertools;
use presto_utilities::IndexedSet;
use presto_utilities::TagIndex;
use rustc_hash::FxHashMap;

use crate::PdsError;
use crate::Weight;

/// A unique type for PDA control states and P-automaton states.
///
/// The two share a numbering: the first `|Q|` states of every P-automaton
/// are identified with the PDA control states.
pub struct StateTag;

/// A unique type for the stack labels.
pub struct LabelTag;

/// A unique type for the rules.
pub struct RuleTag;

/// The index type for a state.
pub type StateIndex = TagIndex<usize, StateTag>;

/// The index type for a stack label.
pub type LabelIndex = TagIndex<usize, LabelTag>;

/// The index type for a rule.
pub type RuleIndex = TagIndex<usize, RuleTag>;

/// The effect of a rule on the matched top of the stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Removes the matched label.
    Pop,
    /// Replaces the matched label by the given label.
    Swap(LabelIndex),
    /// Pushes the given label on top of the matched label, which stays.
    Push(LabelIndex),
}

/// A single rule `(from, label) -> (to, operation)` carrying a weight.
#[derive(Clone, Debug)]
pub struct Rule<W> {
    pub from: StateIndex,
    pub label: LabelIndex,
    pub to: StateIndex,
    pub operation: Operation,
    pub weight: W,
}

/// A configuration of a pushdown system: a control state together with the
/// stack contents, topmost label first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Configuration {
    pub state: StateIndex,
    pub stack: Vec<LabelIndex>,
}

impl Configuration {
    /// Renders the configuration with the given label names, in the form
    /// `< state, [top, ..., bottom] >`.
    pub fn display<'a>(&'a self, labels: &'a [String]) -> impl fmt::Display + 'a {
        ConfigurationDisplay {
            configuration: self,
            labels,
        }
    }
}

struct ConfigurationDisplay<'a> {
    configuration: &'a Configuration,
    labels: &'a [String],
}

impl fmt::Display for ConfigurationDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "< {}, [{}] >",
            self.configuration.state,
            self.configuration
                .stack
                .iter()
                .map(|label| &self.labels[label.value()])
                .format(", ")
        )
    }
}

/// A pushdown automaton over dense control states and stack labels.
///
/// # Details
///
/// The automaton is immutable after construction; use [`PdaBuilder`] to
/// create one. Rules are stored densely and indexed both by their source
/// `(state, label)` pair and by their target state, which are the lookups
/// the post* respectively pre* saturation engines need.
pub struct Pda<W> {
    num_of_states: usize,
    labels: Vec<String>,
    rules: Vec<Rule<W>>,

    by_source: FxHashMap<(StateIndex, LabelIndex), Vec<RuleIndex>>,
    by_target: Vec<Vec<RuleIndex>>,
}

impl<W: Weight> Pda<W> {
    /// Returns the number of control states.
    pub fn num_of_states(&self) -> usize {
        self.num_of_states
    }

    /// Returns the number of stack labels.
    pub fn num_of_labels(&self) -> usize {
        self.labels.len()
    }

    /// Returns the names of the stack labels.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Returns the number of rules.
    pub fn num_of_rules(&self) -> usize {
        self.rules.len()
    }

    /// Returns the rule with the given index.
    pub fn rule(&self, rule: RuleIndex) -> &Rule<W> {
        &self.rules[rule.value()]
    }

    /// Returns an iterator over all rule indices.
    pub fn iter_rules(&self) -> impl Iterator<Item = RuleIndex> {
        (0..self.rules.len()).map(RuleIndex::new)
    }

    /// Returns the rules that fire on configurations with the given control
    /// state and top of stack label.
    pub fn rules_from(&self, state: StateIndex, label: LabelIndex) -> impl Iterator<Item = RuleIndex> + '_ {
        self.by_source.get(&(state, label)).into_iter().flatten().copied()
    }

    /// Returns the rules whose target is the given control state.
    pub fn rules_into(&self, state: StateIndex) -> impl Iterator<Item = RuleIndex> + '_ {
        self.by_target[state.value()].iter().copied()
    }

    /// Returns the index of the label with the given name.
    pub fn label_index(&self, name: &str) -> Option<LabelIndex> {
        self.labels
            .iter()
            .position(|label| label == name)
            .map(LabelIndex::new)
    }

    /// Encodes a stack given as label names, topmost label first.
    pub fn encode(&self, names: &[&str]) -> Result<Vec<LabelIndex>, PdsError> {
        names
            .iter()
            .map(|name| {
                self.label_index(name)
                    .ok_or_else(|| PdsError::InvalidAutomaton(format!("unknown label '{name}'")))
            })
            .collect()
    }
}

impl<W: Weight> fmt::Debug for Pda<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pda with {} states over {:?}", self.num_of_states, self.labels)?;

        for rule in &self.rules {
            let operation = match rule.operation {
                Operation::Pop => "pop".to_string(),
                Operation::Swap(label) => format!("swap {}", self.labels[label.value()]),
                Operation::Push(label) => format!("push {}", self.labels[label.value()]),
            };

            writeln!(
                f,
                "    ({}, {}) -> ({}, {}) [{:?}]",
                rule.from,
                self.labels[rule.label.value()],
                rule.to,
                operation,
                rule.weight
            )?;
        }

        Ok(())
    }
}

/// The operation of a rule, given by label name.
#[derive(Clone, Copy, Debug)]
pub enum RuleOp<'a> {
    Pop,
    Swap(&'a str),
    Push(&'a str),
}

/// The label(s) a rule matches on, given by name. `Wildcard` matches the
/// whole alphabet and `Not` everything outside the given set; both expand
/// into one rule per matched label.
#[derive(Clone, Copy, Debug)]
pub enum Precondition<'a> {
    Label(&'a str),
    OneOf(&'a [&'a str]),
    Not(&'a [&'a str]),
    Wildcard,
}

/// Accumulates rules and builds a [`Pda`].
///
/// The alphabet is fixed up front; rules refer to labels by name and are
/// expanded to one rule per matched label, so that rule indices stay dense
/// and every rule matches exactly one `(state, label)` pair.
pub struct PdaBuilder<W> {
    labels: IndexedSet<String>,
    rules: Vec<Rule<W>>,
    num_of_states: usize,
}

impl<W: Weight> PdaBuilder<W> {
    /// Initializes a builder over the given stack alphabet.
    pub fn new(labels: &[&str]) -> Self {
        let mut label_set = IndexedSet::new();
        for label in labels {
            label_set.insert(label.to_string());
        }

        Self {
            labels: label_set,
            rules: Vec::new(),
            num_of_states: 0,
        }
    }

    /// Installs the rule `(from, precondition) -> (to, operation)` with the
    /// given weight. Wildcard and negated preconditions expand into one rule
    /// per matched label.
    pub fn add_rule(
        &mut self,
        from: usize,
        to: usize,
        operation: RuleOp<'_>,
        precondition: Precondition<'_>,
        weight: W,
    ) -> Result<(), PdsError> {
        let operation = match operation {
            RuleOp::Pop => Operation::Pop,
            RuleOp::Swap(name) => Operation::Swap(self.resolve(name)?),
            RuleOp::Push(name) => Operation::Push(self.resolve(name)?),
        };

        let labels = match precondition {
            Precondition::Label(name) => vec![self.resolve(name)?],
            Precondition::OneOf(names) => names
                .iter()
                .map(|name| self.resolve(name))
                .collect::<Result<Vec<_>, _>>()?,
            Precondition::Not(names) => {
                let excluded = names
                    .iter()
                    .map(|name| self.resolve(name))
                    .collect::<Result<Vec<_>, _>>()?;
                (0..self.labels.len())
                    .map(LabelIndex::new)
                    .filter(|label| !excluded.contains(label))
                    .collect()
            }
            Precondition::Wildcard => (0..self.labels.len()).map(LabelIndex::new).collect(),
        };

        for label in labels {
            self.rules.push(Rule {
                from: StateIndex::new(from),
                label,
                to: StateIndex::new(to),
                operation,
                weight: weight.clone(),
            });
        }

        self.num_of_states = self.num_of_states.max(from + 1).max(to + 1);
        Ok(())
    }

    /// Finalizes the builder and returns the constructed PDA.
    ///
    /// The number of control states is derived from the rules unless given
    /// explicitly; an explicit number that does not cover all rules is
    /// rejected.
    pub fn build(self, num_of_states: Option<usize>) -> Result<Pda<W>, PdsError> {
        let num_of_states = match num_of_states {
            Some(explicit) => {
                if explicit < self.num_of_states {
                    return Err(PdsError::InvalidRule(format!(
                        "rules reference state {} but the PDA has {} states",
                        self.num_of_states - 1,
                        explicit
                    )));
                }
                explicit
            }
            None => self.num_of_states,
        };

        let mut by_source: FxHashMap<(StateIndex, LabelIndex), Vec<RuleIndex>> = FxHashMap::default();
        let mut by_target: Vec<Vec<RuleIndex>> = vec![Vec::new(); num_of_states];

        for (index, rule) in self.rules.iter().enumerate() {
            let index = RuleIndex::new(index);
            by_source.entry((rule.from, rule.label)).or_default().push(index);
            by_target[rule.to.value()].push(index);
        }

        Ok(Pda {
            num_of_states,
            labels: self.labels.to_vec(),
            rules: self.rules,
            by_source,
            by_target,
        })
    }

    fn resolve(&self, name: &str) -> Result<LabelIndex, PdsError> {
        self.labels
            .index(&name.to_string())
            .map(|&index| LabelIndex::new(index))
            .ok_or_else(|| PdsError::InvalidRule(format!("unknown label '{name}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_expands_preconditions() {
        let mut builder = PdaBuilder::<()>::new(&["A", "B", "C"]);
        builder.add_rule(0, 1, RuleOp::Pop, Precondition::Wildcard, ()).unwrap();
        builder.add_rule(1, 0, RuleOp::Swap("A"), Precondition::Not(&["A"]), ()).unwrap();

        let pda = builder.build(None).unwrap();
        assert_eq!(pda.num_of_states(), 2);
        assert_eq!(pda.num_of_rules(), 5);

        let a = pda.label_index("A").unwrap();
        assert_eq!(pda.rules_from(StateIndex::new(0), a).count(), 1);
        assert_eq!(pda.rules_from(StateIndex::new(1), a).count(), 0);
        assert_eq!(pda.rules_into(StateIndex::new(0)).count(), 2);
    }

    #[test]
    fn test_builder_rejects_unknown_labels() {
        let mut builder = PdaBuilder::<()>::new(&["A"]);
        assert!(builder.add_rule(0, 1, RuleOp::Push("D"), Precondition::Label("A"), ()).is_err());
        assert!(builder.add_rule(0, 1, RuleOp::Pop, Precondition::Label("D"), ()).is_err());
    }

    #[test]
    fn test_builder_rejects_out_of_range_states() {
        let mut builder = PdaBuilder::<()>::new(&["A"]);
        builder.add_rule(0, 3, RuleOp::Pop, Precondition::Label("A"), ()).unwrap();
        assert!(builder.build(Some(2)).is_err());
    }
}
