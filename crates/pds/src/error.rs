use cancel_this::Cancelled;
use thiserror::Error;

/// Errors reported by the pushdown reachability engine.
///
/// Invalid inputs are rejected while the PDA or the automata are built;
/// saturation itself does not fail on well-formed inputs, except when it is
/// cancelled. `InternalInvariant` indicates a defect in the engine and is
/// never expected for a correct build.
#[derive(Error, Debug)]
pub enum PdsError {
    #[error("invalid PDA rule: {0}")]
    InvalidRule(String),

    #[error("invalid automaton: {0}")]
    InvalidAutomaton(String),

    #[error("weight domain violates the semiring contract: {0}")]
    SemiringContract(&'static str),

    #[error("unsupported query: {0}")]
    UnsupportedQuery(&'static str),

    #[error("internal invariant violated: {0}")]
    InternalInvariant(&'static str),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}
