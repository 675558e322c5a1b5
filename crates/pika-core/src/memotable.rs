//! The memo table: for each (clause, start position) key, the best match
//! found so far. Entries are only ever improved, never removed.

use std::collections::{BinaryHeap, BTreeMap};
use std::rc::Rc;

use tracing::trace;

use crate::clause::ClauseKind;
use crate::grammar::Grammar;
use crate::intervals::IntervalUnion;
use crate::parser::{self, MatchDirection, WorkItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemoKey {
	/// Arena index of the matched clause.
	pub clause: usize,
	/// Byte offset of the match start.
	pub start: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
	pub key: MemoKey,
	/// Matched length in bytes.
	pub len: usize,
	/// For an ordered choice, the index of the matching alternative; the
	/// first sub-clause that can match zero characters for a synthetic
	/// zero-length match; 0 otherwise.
	pub sub_idx: usize,
	/// Sub-clause matches: one per sub-clause for a sequence, the single
	/// chosen alternative for an ordered choice, head and optional tail for
	/// one-or-more, empty for terminals, lookaheads and synthetic matches.
	pub sub_matches: Vec<Rc<Match>>,
}

impl Match {
	pub(crate) fn terminal(key: MemoKey, len: usize) -> Match {
		Match { key, len, sub_idx: 0, sub_matches: vec![] }
	}

	pub(crate) fn empty(key: MemoKey, sub_idx: usize) -> Match {
		Match { key, len: 0, sub_idx, sub_matches: vec![] }
	}

	pub fn start(&self) -> usize {
		self.key.start
	}

	pub fn end(&self) -> usize {
		self.key.start + self.len
	}

	/// The matched slice of the input.
	pub fn text<'i>(&self, input: &'i str) -> &'i str {
		&input[self.start()..self.end()]
	}

	/// Whether this match replaces `other` for the same key: the earlier
	/// alternative always wins for an ordered choice, a longer match wins
	/// otherwise.
	fn is_better_than(&self, other: &Match, is_ordered_choice: bool) -> bool {
		if is_ordered_choice && self.sub_idx != other.sub_idx {
			return self.sub_idx < other.sub_idx;
		}
		self.len > other.len
	}
}

#[derive(Debug)]
pub struct MemoTable<'i> {
	input: &'i str,
	map: BTreeMap<MemoKey, Rc<Match>>,
	num_created: usize,
	num_memoized: usize,
}

impl<'i> MemoTable<'i> {
	pub(crate) fn new(input: &'i str) -> MemoTable<'i> {
		MemoTable { input, map: BTreeMap::new(), num_created: 0, num_memoized: 0 }
	}

	pub fn input(&self) -> &'i str {
		self.input
	}

	/// Matches handed to [`MemoTable::add_match`] during the parse.
	pub fn num_matches_created(&self) -> usize {
		self.num_created
	}

	/// Matches that entered the table because they improved on the entry.
	pub fn num_matches_memoized(&self) -> usize {
		self.num_memoized
	}

	pub(crate) fn get(&self, key: MemoKey) -> Option<Rc<Match>> {
		self.map.get(&key).cloned()
	}

	/// The current best match for a key. A clause that can match zero
	/// characters yields a synthetic zero-length match when nothing better is
	/// stored; a negative lookahead is evaluated on demand, since its success
	/// is the absence of a sub-clause match and never arrives as a bottom-up
	/// event.
	pub fn look_up_best_match(&self, grammar: &Grammar, key: MemoKey) -> Option<Rc<Match>> {
		if let Some(found) = self.map.get(&key) {
			return Some(found.clone());
		}
		let clause = &grammar.clauses[key.clause];
		if matches!(clause.kind, ClauseKind::NotFollowedBy) {
			return parser::try_match(grammar, self, key, MatchDirection::BottomUp).map(Rc::new);
		}
		if clause.can_match_zero {
			let sub_idx = clause.sub.iter().position(|s| grammar.clauses[s.idx].can_match_zero).unwrap_or(0);
			return Some(Rc::new(Match::empty(key, sub_idx)));
		}
		None
	}

	/// Stores `new_match` if it improves on the current entry, then schedules
	/// the seed parents of the key's clause.
	pub(crate) fn add_match(
		&mut self,
		grammar: &Grammar,
		key: MemoKey,
		new_match: Option<Match>,
		queue: &mut BinaryHeap<WorkItem>,
	) {
		let mut updated = false;
		if let Some(new_match) = new_match {
			self.num_created += 1;
			let is_ordered_choice = matches!(grammar.clauses[key.clause].kind, ClauseKind::First);
			let improved = match self.map.get(&key) {
				Some(old) => new_match.is_better_than(old, is_ordered_choice),
				None => true,
			};
			if improved {
				if crate::debug_enabled() {
					trace!(
						clause = %grammar.render_clause(key.clause),
						start = key.start,
						len = new_match.len,
						"match improved"
					);
				}
				self.map.insert(key, Rc::new(new_match));
				self.num_memoized += 1;
				updated = true;
			}
		}

		for &parent in &grammar.clauses[key.clause].seed_parents {
			if updated || grammar.clauses[parent].can_match_zero {
				queue.push(WorkItem(MemoKey { clause: parent, start: key.start }));
			}
		}
	}

	/// All stored matches of a clause, in increasing start position.
	pub fn get_all_matches(&self, clause: usize) -> Vec<Rc<Match>> {
		let range = MemoKey { clause, start: 0 }..=MemoKey { clause, start: usize::MAX };
		self.map.range(range).map(|(_, m)| m.clone()).collect()
	}

	/// Greedy left-to-right sweep of best matches, advancing by at least one
	/// character past each accepted match so zero-length matches cannot stall
	/// the sweep.
	pub(crate) fn get_non_overlapping_matches(&self, grammar: &Grammar, clause: usize) -> Vec<Rc<Match>> {
		let mut matches = vec![];
		let mut pos = 0;
		while pos <= self.input.len() {
			let char_len = self.input[pos..].chars().next().map_or(1, |c| c.len_utf8());
			match self.look_up_best_match(grammar, MemoKey { clause, start: pos }) {
				Some(found) => {
					let len = found.len;
					matches.push(found);
					pos += len.max(char_len);
				}
				None => pos += char_len,
			}
		}
		matches
	}

	/// Stored matches of a clause as an ordered map from start position.
	pub fn get_navigable_matches(&self, clause: usize) -> BTreeMap<usize, Rc<Match>> {
		let range = MemoKey { clause, start: 0 }..=MemoKey { clause, start: usize::MAX };
		self.map.range(range).map(|(k, m)| (k.start, m.clone())).collect()
	}

	/// The spans of the input not covered by any non-overlapping match of the
	/// given rules, as `start -> (end, text)`.
	pub(crate) fn get_syntax_errors(
		&self,
		grammar: &Grammar,
		coverage_rule_names: &[&str],
	) -> BTreeMap<usize, (usize, String)> {
		let mut covered = IntervalUnion::new();
		for name in coverage_rule_names {
			if let Some(rule) = grammar.get_rule(name) {
				for found in self.get_non_overlapping_matches(grammar, rule.clause) {
					covered.add_range(found.start(), found.end());
				}
			}
		}
		covered
			.invert(0, self.input.len())
			.iter()
			.map(|(start, end)| (start, (end, self.input[start..end].to_string())))
			.collect()
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn match_with(sub_idx: usize, len: usize) -> Match {
		Match { key: MemoKey { clause: 0, start: 0 }, len, sub_idx, sub_matches: vec![] }
	}

	#[test]
	fn longer_match_wins() {
		assert!(match_with(0, 3).is_better_than(&match_with(0, 2), false));
		assert!(!match_with(0, 2).is_better_than(&match_with(0, 3), false));
		assert!(!match_with(0, 3).is_better_than(&match_with(0, 3), false));
	}

	#[test]
	fn earlier_alternative_wins_regardless_of_length() {
		assert!(match_with(0, 1).is_better_than(&match_with(1, 5), true));
		assert!(!match_with(1, 5).is_better_than(&match_with(0, 1), true));
		// equal alternative index falls back to length
		assert!(match_with(1, 5).is_better_than(&match_with(1, 1), true));
	}

	#[test]
	fn alternative_index_is_ignored_for_other_clauses() {
		assert!(match_with(1, 5).is_better_than(&match_with(0, 1), false));
	}
}
