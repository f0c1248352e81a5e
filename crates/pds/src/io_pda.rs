use std::io::BufRead;
use std::io::BufReader;
use std::io::Read;

use log::trace;
use presto_utilities::PrestoError;
use regex::Regex;
use thiserror::Error;

use crate::Pda;
use crate::PdaBuilder;
use crate::Precondition;
use crate::RuleOp;

#[derive(Error, Debug)]
pub enum PdaIoError {
    #[error("invalid PDA header: {0}")]
    InvalidHeader(&'static str),

    #[error("invalid line {0}: {1}")]
    InvalidLine(usize, String),
}

/// Reads a PDA from the given reader.
///
/// # Details
///
/// The format is line oriented; `#` starts a comment and blank lines are
/// ignored. The header fixes the number of control states and the alphabet,
/// followed by one rule per line:
///
/// ```text
/// pda <num_states>
/// labels <name> <name> ...
/// rule <from> <label>|*|not <label>... -> <to> pop|swap <label>|push <label> [weight <n>]
/// ```
///
/// Rules without an explicit weight default to weight 1, so that shortest
/// traces count rule firings.
pub fn read_pda(reader: impl Read) -> Result<Pda<u64>, PrestoError> {
    let header_regex = Regex::new(r"^pda\s+([0-9]+)$").expect("Regex compilation should not fail");

    let mut lines = BufReader::new(reader)
        .lines()
        .enumerate()
        .map(|(number, line)| (number + 1, line))
        .filter(|(_, line)| {
            line.as_ref()
                .map(|line| {
                    let line = line.trim();
                    !line.is_empty() && !line.starts_with('#')
                })
                .unwrap_or(true)
        });

    let (number, line) = lines.next().ok_or(PdaIoError::InvalidHeader("the file is empty"))?;
    let line = line?;
    let (_, [num_of_states]) = header_regex
        .captures(line.trim())
        .ok_or(PdaIoError::InvalidHeader("expected 'pda <num_states>'"))?
        .extract();
    let num_of_states: usize = num_of_states.parse()?;
    trace!("line {number}: {num_of_states} control states");

    let (_, line) = lines
        .next()
        .ok_or(PdaIoError::InvalidHeader("expected 'labels <name> ...'"))?;
    let line = line?;
    let mut parts = line.split_whitespace();
    if parts.next() != Some("labels") {
        return Err(PdaIoError::InvalidHeader("expected 'labels <name> ...'").into());
    }
    let labels: Vec<&str> = parts.collect();

    let mut builder: PdaBuilder<u64> = PdaBuilder::new(&labels);

    for (number, line) in lines {
        let line = line?;
        let tokens: Vec<&str> = line.split_whitespace().collect();
        parse_rule(&mut builder, &tokens).map_err(|message| PdaIoError::InvalidLine(number, message))?;
    }

    Ok(builder.build(Some(num_of_states))?)
}

fn parse_rule(builder: &mut PdaBuilder<u64>, tokens: &[&str]) -> Result<(), String> {
    let mut tokens = tokens.iter().copied();
    if tokens.next() != Some("rule") {
        return Err("expected 'rule ...'".to_string());
    }

    let from: usize = tokens
        .next()
        .ok_or("expected a source state")?
        .parse()
        .map_err(|_| "the source state must be a number")?;

    // The precondition is everything up to the arrow.
    let precondition: Vec<&str> = tokens.by_ref().take_while(|&token| token != "->").collect();

    let to: usize = tokens
        .next()
        .ok_or("expected a target state")?
        .parse()
        .map_err(|_| "the target state must be a number")?;

    let operation = match tokens.next() {
        Some("pop") => RuleOp::Pop,
        Some("swap") => RuleOp::Swap(tokens.next().ok_or("swap needs a label")?),
        Some("push") => RuleOp::Push(tokens.next().ok_or("push needs a label")?),
        _ => return Err("expected 'pop', 'swap <label>' or 'push <label>'".to_string()),
    };

    let weight = match tokens.next() {
        Some("weight") => tokens
            .next()
            .ok_or("weight needs a number")?
            .parse()
            .map_err(|_| "the weight must be a number")?,
        Some(token) => return Err(format!("unexpected trailing token '{token}'")),
        None => 1,
    };

    let result = match precondition.as_slice() {
        ["*"] => builder.add_rule(from, to, operation, Precondition::Wildcard, weight),
        ["not", excluded @ ..] if !excluded.is_empty() => {
            builder.add_rule(from, to, operation, Precondition::Not(excluded), weight)
        }
        [label] => builder.add_rule(from, to, operation, Precondition::Label(label), weight),
        labels if !labels.is_empty() => builder.add_rule(from, to, operation, Precondition::OneOf(labels), weight),
        _ => return Err("expected a precondition before '->'".to_string()),
    };

    result.map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::LabelIndex;
    use crate::Operation;
    use crate::StateIndex;

    #[test]
    fn test_read_pda() {
        let input = "\
# The Schwoon example, weighted arbitrarily.
pda 4
labels A B C

rule 0 A -> 1 push B
rule 0 B -> 0 pop weight 2
rule 1 B -> 3 swap A
rule 2 C -> 0 swap B
rule 3 A -> 2 push C
rule 3 not A -> 3 pop
";
        let pda = read_pda(input.as_bytes()).unwrap();

        assert_eq!(pda.num_of_states(), 4);
        assert_eq!(pda.num_of_labels(), 3);
        // The negated rule expands to B and C.
        assert_eq!(pda.num_of_rules(), 7);

        let rule = pda
            .rules_from(StateIndex::new(0), pda.label_index("B").unwrap())
            .next()
            .unwrap();
        assert_eq!(pda.rule(rule).operation, Operation::Pop);
        assert_eq!(pda.rule(rule).weight, 2);

        let rule = pda
            .rules_from(StateIndex::new(0), pda.label_index("A").unwrap())
            .next()
            .unwrap();
        assert_eq!(pda.rule(rule).operation, Operation::Push(LabelIndex::new(1)));
        assert_eq!(pda.rule(rule).weight, 1);
    }

    #[test]
    fn test_read_pda_rejects_garbage() {
        assert!(read_pda("automaton 3".as_bytes()).is_err());
        assert!(read_pda("pda 2\nlabels A\nrule 0 D -> 1 pop".as_bytes()).is_err());
        assert!(read_pda("pda 2\nlabels A\nrule 0 A -> 5 pop".as_bytes()).is_err());
    }
}
