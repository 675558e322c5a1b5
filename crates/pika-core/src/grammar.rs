//! The grammar surface: rule expressions as written (or produced by the
//! grammar DSL), and the compiled [`Grammar`] the engine runs against.

mod compile;

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use itertools::Itertools;
use thiserror::Error;

use crate::clause::{render_clause, CharSet, Clause};
use crate::memotable::{Match, MemoTable};
use crate::strings;

/// Operator associativity of a precedence level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assoc {
	Left,
	Right,
}

/// One rule of a grammar, as supplied to [`Grammar::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
	pub name: String,
	/// Precedence level, `-1` when the rule is not part of a precedence hierarchy.
	pub precedence: i32,
	pub associativity: Option<Assoc>,
	pub expr: RuleExpr,
}

impl Rule {
	pub fn new(name: impl Into<String>, expr: RuleExpr) -> Rule {
		Rule { name: name.into(), precedence: -1, associativity: None, expr }
	}

	pub fn with_precedence(name: impl Into<String>, precedence: i32, associativity: Option<Assoc>, expr: RuleExpr) -> Rule {
		Rule { name: name.into(), precedence, associativity, expr }
	}
}

/// A PEG expression tree. `RuleRef` and `Label` exist only here; compilation
/// eliminates both before the runtime clause graph is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleExpr {
	CharSet(CharSet),
	CharSeq { text: String, ignore_case: bool },
	Nothing,
	Start,
	Seq(Vec<RuleExpr>),
	First(Vec<RuleExpr>),
	OneOrMore(Box<RuleExpr>),
	FollowedBy(Box<RuleExpr>),
	NotFollowedBy(Box<RuleExpr>),
	RuleRef(String),
	Label { label: String, expr: Box<RuleExpr> },
}

pub fn seq(exprs: impl IntoIterator<Item = RuleExpr>) -> RuleExpr {
	RuleExpr::Seq(exprs.into_iter().collect())
}

pub fn first(exprs: impl IntoIterator<Item = RuleExpr>) -> RuleExpr {
	RuleExpr::First(exprs.into_iter().collect())
}

pub fn one_or_more(expr: RuleExpr) -> RuleExpr {
	RuleExpr::OneOrMore(expr.into())
}

/// `X*` desugars to `(X+ / ())`.
pub fn zero_or_more(expr: RuleExpr) -> RuleExpr {
	first([one_or_more(expr), nothing()])
}

/// `X?` desugars to `(X / ())`.
pub fn opt(expr: RuleExpr) -> RuleExpr {
	first([expr, nothing()])
}

pub fn followed_by(expr: RuleExpr) -> RuleExpr {
	RuleExpr::FollowedBy(expr.into())
}

pub fn not_followed_by(expr: RuleExpr) -> RuleExpr {
	RuleExpr::NotFollowedBy(expr.into())
}

pub fn lit(text: impl Into<String>) -> RuleExpr {
	RuleExpr::CharSeq { text: text.into(), ignore_case: false }
}

pub fn lit_ignore_case(text: impl Into<String>) -> RuleExpr {
	RuleExpr::CharSeq { text: text.into(), ignore_case: true }
}

pub fn ch(c: char) -> RuleExpr {
	RuleExpr::CharSet(CharSet::single(c))
}

pub fn char_range(lo: char, hi: char) -> RuleExpr {
	RuleExpr::CharSet(CharSet::range(lo, hi))
}

/// A set containing every character of `chars`.
pub fn char_set(chars: &str) -> RuleExpr {
	let mut set = CharSet::new();
	for c in chars.chars() {
		set.add_char(c);
	}
	RuleExpr::CharSet(set)
}

pub fn ruleref(name: impl Into<String>) -> RuleExpr {
	RuleExpr::RuleRef(name.into())
}

pub fn label(name: impl Into<String>, expr: RuleExpr) -> RuleExpr {
	RuleExpr::Label { label: name.into(), expr: expr.into() }
}

pub fn start() -> RuleExpr {
	RuleExpr::Start
}

pub fn nothing() -> RuleExpr {
	RuleExpr::Nothing
}

impl RuleExpr {
	fn fmt_sub(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		if matches!(self, RuleExpr::Seq(_) | RuleExpr::First(_)) {
			write!(f, "({self})")
		} else {
			write!(f, "{self}")
		}
	}
}

impl std::fmt::Display for RuleExpr {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			RuleExpr::CharSet(set) => write!(f, "{set}"),
			RuleExpr::CharSeq { text, .. } => write!(f, "\"{}\"", strings::escape_string(text)),
			RuleExpr::Nothing => write!(f, "()"),
			RuleExpr::Start => write!(f, "^"),
			RuleExpr::Seq(subs) => {
				for (i, sub) in subs.iter().enumerate() {
					if i > 0 {
						write!(f, " ")?;
					}
					sub.fmt_sub(f)?;
				}
				Ok(())
			}
			RuleExpr::First(subs) => {
				for (i, sub) in subs.iter().enumerate() {
					if i > 0 {
						write!(f, " / ")?;
					}
					sub.fmt_sub(f)?;
				}
				Ok(())
			}
			RuleExpr::OneOrMore(sub) => {
				sub.fmt_sub(f)?;
				write!(f, "+")
			}
			RuleExpr::FollowedBy(sub) => {
				write!(f, "&")?;
				sub.fmt_sub(f)
			}
			RuleExpr::NotFollowedBy(sub) => {
				write!(f, "!")?;
				sub.fmt_sub(f)
			}
			RuleExpr::RuleRef(name) => write!(f, "{name}"),
			RuleExpr::Label { label, expr } => {
				write!(f, "{label}:")?;
				expr.fmt_sub(f)
			}
		}
	}
}

impl std::fmt::Display for Rule {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.name)?;
		if self.precedence >= 0 {
			match self.associativity {
				Some(Assoc::Left) => write!(f, "[{},L]", self.precedence)?,
				Some(Assoc::Right) => write!(f, "[{},R]", self.precedence)?,
				None => write!(f, "[{}]", self.precedence)?,
			}
		}
		write!(f, " <- {} ;", self.expr)
	}
}

/// Structural errors raised while compiling a grammar.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GrammarError {
	#[error("grammar contains no rules")]
	Empty,

	#[error("multiple rules with name '{name}' and precedence {precedence}")]
	DuplicateRule { name: String, precedence: i32 },

	#[error("reference to unknown rule '{0}'")]
	UnknownRule(String),

	#[error("rule reference cycle through '{0}'")]
	RefCycle(String),

	#[error("() may not be the first element of a sequence, in: {0}")]
	NothingFirst(String),

	#[error("lookahead argument may not be another lookahead or ^, in: {0}")]
	NestedLookahead(String),

	#[error("!() can never match")]
	NotFollowedByNothing,

	#[error("alternatives after a zero-length match can never be tried, in: {0}")]
	DeadAlternative(String),

	#[error("negative lookahead of a zero-length match can never match, in: {0}")]
	NotFollowedByZeroLength(String),

	#[error("grammar description: {0}")]
	Meta(String),
}

/// A rule after compilation: renamed for precedence where applicable, its
/// top-level AST label split out, and its body resolved to an arena clause.
#[derive(Debug, Clone)]
pub struct CompiledRule {
	pub name: String,
	pub precedence: i32,
	pub associativity: Option<Assoc>,
	/// AST label inherited by unlabelled references to this rule.
	pub label: Option<String>,
	/// Arena index of the rule's top-level clause.
	pub clause: usize,
}

/// A compiled grammar: the interned clause arena in bottom-up topological
/// order plus the rule table. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct Grammar {
	pub(crate) rules: Vec<CompiledRule>,
	pub(crate) clauses: Vec<Clause>,
	pub(crate) rule_index: HashMap<String, usize>,
	/// Index into `rules` of the rule named `Lex`, when present.
	pub(crate) lex_rule: Option<usize>,
}

impl Grammar {
	/// Validates and compiles a rule list.
	pub fn new(rules: Vec<Rule>) -> Result<Grammar, GrammarError> {
		compile::compile(rules)
	}

	/// Parses a grammar description written in the PEG DSL and compiles it.
	pub fn from_peg(description: &str) -> Result<Grammar, GrammarError> {
		Grammar::new(crate::meta::parse_peg(description)?)
	}

	/// Looks up a rule by exact name, including any `[precedence]` suffix.
	pub fn get_rule(&self, name: &str) -> Option<&CompiledRule> {
		self.rule_index.get(name).map(|&i| &self.rules[i])
	}

	pub fn rules(&self) -> &[CompiledRule] {
		&self.rules
	}

	pub fn clauses(&self) -> &[Clause] {
		&self.clauses
	}

	pub fn render_clause(&self, idx: usize) -> String {
		render_clause(&self.clauses, idx)
	}

	fn rule_clause(&self, rule_name: &str) -> Option<usize> {
		self.get_rule(rule_name).map(|r| r.clause)
	}

	/// All memoised matches of a rule, in increasing start position.
	pub fn get_all_matches(&self, rule_name: &str, memo: &MemoTable) -> Vec<Rc<Match>> {
		self.rule_clause(rule_name).map(|clause| memo.get_all_matches(clause)).unwrap_or_default()
	}

	/// The greedy left-to-right non-overlapping match sweep for a rule.
	pub fn get_non_overlapping_matches(&self, rule_name: &str, memo: &MemoTable) -> Vec<Rc<Match>> {
		self.rule_clause(rule_name).map(|clause| memo.get_non_overlapping_matches(self, clause)).unwrap_or_default()
	}

	/// Matches of a rule as an ordered map from start position, for
	/// "next match at or after" navigation.
	pub fn get_navigable_matches(&self, rule_name: &str, memo: &MemoTable) -> BTreeMap<usize, Rc<Match>> {
		self.rule_clause(rule_name).map(|clause| memo.get_navigable_matches(clause)).unwrap_or_default()
	}

	/// The spans of the input not covered by any non-overlapping match of the
	/// listed rules, as `start -> (end, text)`.
	pub fn get_syntax_errors(&self, memo: &MemoTable, coverage_rule_names: &[&str]) -> BTreeMap<usize, (usize, String)> {
		memo.get_syntax_errors(self, coverage_rule_names)
	}
}

impl std::fmt::Display for Grammar {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let rendered = self
			.rules
			.iter()
			.map(|rule| {
				let body = match &rule.label {
					Some(label) => format!("{label}:({})", self.render_clause(rule.clause)),
					None => self.render_clause(rule.clause),
				};
				format!("{} <- {} ;", rule.name, body)
			})
			.join("\n");
		write!(f, "{rendered}")
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use pretty_assertions::assert_eq;

	#[test]
	fn expr_display() {
		let expr = seq([
			label("var", one_or_more(char_range('a', 'z'))),
			lit("="),
			first([ruleref("E"), nothing()]),
			not_followed_by(ch(';')),
		]);
		assert_eq!(expr.to_string(), "var:[a-z]+ \"=\" (E / ()) !';'");
	}

	#[test]
	fn rule_display() {
		let rule = Rule::with_precedence("E", 1, Some(Assoc::Left), seq([ruleref("E"), lit("+"), ruleref("E")]));
		assert_eq!(rule.to_string(), "E[1,L] <- E \"+\" E ;");
		assert_eq!(Rule::new("S", opt(ch('a'))).to_string(), "S <- 'a' / () ;");
	}

	#[test]
	fn zero_or_more_desugars() {
		assert_eq!(zero_or_more(ch('a')), first([one_or_more(ch('a')), nothing()]));
		assert_eq!(opt(ch('a')), first([ch('a'), nothing()]));
	}
}
