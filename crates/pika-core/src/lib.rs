//! A bottom-up, right-to-left PEG parser ("pika parsing"): grammars compile
//! into an interned clause DAG, parsing fills a memo table by dynamic
//! programming, and parse trees, labelled ASTs, non-overlapping matches and
//! syntax-error spans are extracted from the table. Left recursion, direct or
//! indirect, needs no special treatment, and malformed input still yields the
//! partial matches around the damage.

pub mod ast;
pub mod clause;
pub mod grammar;
pub mod intervals;
pub mod memotable;
pub mod meta;
pub mod parser;
pub mod strings;

use std::sync::atomic::{AtomicBool, Ordering};

pub use ast::AstNode;
pub use grammar::{Assoc, CompiledRule, Grammar, GrammarError, Rule, RuleExpr};
pub use memotable::{Match, MemoKey, MemoTable};
pub use parser::MatchDirection;

static DEBUG: AtomicBool = AtomicBool::new(false);

/// Enables verbose tracing of memo-table improvement events during parsing.
pub fn set_debug(enabled: bool) {
	DEBUG.store(enabled, Ordering::Relaxed);
}

pub fn debug_enabled() -> bool {
	DEBUG.load(Ordering::Relaxed)
}
