//! Reachability analysis for pushdown systems.
//!
//! A pushdown system is a finite control automaton over an unbounded stack
//! of labels; a regular set of its configurations is represented by a
//! P-automaton, an NFA whose initial states are the control states. This
//! crate decides whether one configuration set can reach another by
//! saturating P-automata (the classic pre* and post* constructions of
//! Bouajjani/Esparza/Maler and Schwoon), intersecting them on the fly and
//! unwinding the recorded provenance of every saturation edge into a
//! concrete witnessing execution, optionally of minimum weight under a
//! user-supplied semiring.
#![forbid(unsafe_code)]

mod automaton;
mod display_dot;
mod error;
mod io_automaton;
mod io_pda;
mod nfa;
mod pda;
mod post_star;
mod pre_star;
mod semiring;
mod shortest;
mod solver;
mod trace;

pub use automaton::*;
pub use display_dot::*;
pub use error::*;
pub use io_automaton::*;
pub use io_pda::*;
pub use nfa::*;
pub use pda::*;
pub use post_star::*;
pub use pre_star::*;
pub use semiring::*;
pub use shortest::*;
pub use solver::*;
