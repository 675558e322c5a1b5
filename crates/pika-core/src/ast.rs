//! Projection of match trees into labelled abstract syntax trees.

use std::rc::Rc;

use crate::clause::{Clause, ClauseKind};
use crate::grammar::Grammar;
use crate::memotable::Match;

/// Iterator over the labelled sub-matches of a match; see
/// [`Match::labeled_sub_matches`].
pub struct LabeledSubMatches<'g, 'm> {
	clause: &'g Clause,
	state: State<'m>,
}

enum State<'m> {
	Empty,
	/// Current link of a right-recursive one-or-more chain.
	Chain(Option<&'m Match>),
	/// The chosen alternative of an ordered choice, yielded once.
	Alt { alt_idx: usize, slot: Option<&'m Rc<Match>> },
	/// Sequence sub-matches zipped with their sub-clause slots.
	Zip(std::iter::Enumerate<std::slice::Iter<'m, Rc<Match>>>),
}

impl<'g, 'm> Iterator for LabeledSubMatches<'g, 'm> {
	type Item = (Option<&'g str>, &'m Rc<Match>);

	fn next(&mut self) -> Option<Self::Item> {
		match &mut self.state {
			State::Empty => None,
			State::Chain(slot) => {
				let curr = slot.take()?;
				if curr.sub_matches.is_empty() {
					return None;
				}
				if let [_, tail] = curr.sub_matches.as_slice() {
					*slot = Some(&**tail);
				}
				Some((self.clause.sub[0].label.as_deref(), &curr.sub_matches[0]))
			}
			State::Alt { alt_idx, slot } => {
				let alt_idx = *alt_idx;
				slot.take().map(|m| (self.clause.sub[alt_idx].label.as_deref(), m))
			}
			State::Zip(iter) => iter.next().map(|(i, m)| (self.clause.sub[i].label.as_deref(), m)),
		}
	}
}

impl Match {
	/// The labelled view of this match's children: one-or-more chains are
	/// flattened, an ordered choice yields its chosen alternative, sequences
	/// zip sub-matches with their slots, and terminals, lookaheads and
	/// synthetic zero-length matches yield nothing.
	pub fn labeled_sub_matches<'g, 'm>(&'m self, grammar: &'g Grammar) -> LabeledSubMatches<'g, 'm> {
		let clause = &grammar.clauses[self.key.clause];
		let state = if self.sub_matches.is_empty() {
			State::Empty
		} else {
			match clause.kind {
				ClauseKind::OneOrMore => State::Chain(Some(self)),
				ClauseKind::First => State::Alt { alt_idx: self.sub_idx, slot: Some(&self.sub_matches[0]) },
				_ => State::Zip(self.sub_matches.iter().enumerate()),
			}
		};
		LabeledSubMatches { clause, state }
	}

	/// Builds the labelled tree rooted at this match: labelled sub-matches
	/// become child nodes, unlabelled ones are traversed transparently so
	/// their labelled descendants attach to the nearest labelled ancestor.
	pub fn to_ast(&self, root_label: impl Into<String>, grammar: &Grammar) -> AstNode {
		let mut node = AstNode {
			label: root_label.into(),
			clause: self.key.clause,
			start: self.start(),
			len: self.len,
			children: vec![],
		};
		add_labeled_children(&mut node, self, grammar);
		node
	}
}

fn add_labeled_children(parent: &mut AstNode, m: &Match, grammar: &Grammar) {
	for (label, sub) in m.labeled_sub_matches(grammar) {
		match label {
			Some(label) => parent.children.push(sub.to_ast(label, grammar)),
			None => add_labeled_children(parent, sub, grammar),
		}
	}
}

/// A node of the labelled abstract syntax tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AstNode {
	pub label: String,
	/// Arena index of the clause whose match produced this node.
	pub clause: usize,
	pub start: usize,
	pub len: usize,
	pub children: Vec<AstNode>,
}

impl AstNode {
	pub fn end(&self) -> usize {
		self.start + self.len
	}

	/// The slice of the input this node spans.
	pub fn text<'i>(&self, input: &'i str) -> &'i str {
		&input[self.start..self.end()]
	}

	fn fmt_at(&self, f: &mut std::fmt::Formatter<'_>, depth: usize) -> std::fmt::Result {
		writeln!(f, "{:indent$}{} {}..{}", "", self.label, self.start, self.end(), indent = depth * 2)?;
		for child in &self.children {
			child.fmt_at(f, depth + 1)?;
		}
		Ok(())
	}
}

impl std::fmt::Display for AstNode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.fmt_at(f, 0)
	}
}
