//! The parsing engine: a fixed-point worklist loop over (clause, position)
//! keys, discovering matches bottom-up, plus the top-down pre-passes that
//! seed the memo table.

use std::collections::BinaryHeap;
use std::rc::Rc;

use tracing::debug;

use crate::clause::ClauseKind;
use crate::grammar::Grammar;
use crate::memotable::{Match, MemoKey, MemoTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchDirection {
	/// Sub-clause results come from the memo table (or its zero-length
	/// synthetic). The main loop runs bottom-up.
	BottomUp,
	/// Sub-clause results are computed recursively, consulting the memo
	/// table but writing nothing; used by the pre-passes.
	TopDown,
}

/// Worklist entry. The heap pops the highest start position first — the
/// right-to-left sweep — and within one position the lowest clause index
/// (leaves before parents). Scheduling only ever targets the position of the
/// triggering entry, so by the time a position is processed every later
/// position has settled, and a clause may freely read sub-clause matches to
/// its right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WorkItem(pub(crate) MemoKey);

impl Ord for WorkItem {
	fn cmp(&self, other: &WorkItem) -> std::cmp::Ordering {
		self.0.start.cmp(&other.0.start).then(other.0.clause.cmp(&self.0.clause))
	}
}

impl PartialOrd for WorkItem {
	fn partial_cmp(&self, other: &WorkItem) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl Grammar {
	/// Parses `input`, returning the populated memo table. Malformed input is
	/// not an error: uncovered spans are reported by
	/// [`Grammar::get_syntax_errors`].
	pub fn parse<'i>(&self, input: &'i str) -> MemoTable<'i> {
		let mut memo = MemoTable::new(input);
		let mut queue = BinaryHeap::new();

		for clause in &self.clauses {
			if matches!(clause.kind, ClauseKind::Start) {
				queue.push(WorkItem(MemoKey { clause: clause.idx, start: 0 }));
			}
		}

		// A lexical segmentation replaces the exhaustive terminal scan when
		// the grammar supplies one.
		match self.lex_rule {
			Some(rule) => self.lex_prepass(self.rules[rule].clause, &mut memo, &mut queue),
			None => self.terminal_prescan(&mut memo, &mut queue),
		}

		let mut iterations = 0usize;
		while let Some(WorkItem(key)) = queue.pop() {
			iterations += 1;
			let found = try_match(self, &memo, key, MatchDirection::BottomUp);
			memo.add_match(self, key, found, &mut queue);
		}
		debug!(iterations, memoized = memo.num_matches_memoized(), "parse complete");
		memo
	}

	/// Attempts every non-`Nothing` terminal at every position. Misses leave
	/// no trace; hits seed the parents of the terminal.
	fn terminal_prescan(&self, memo: &mut MemoTable, queue: &mut BinaryHeap<WorkItem>) {
		let terminals: Vec<usize> =
			self.clauses.iter().filter(|c| c.is_terminal() && !c.is_nothing()).map(|c| c.idx).collect();
		let input = memo.input();
		for (pos, _) in input.char_indices() {
			for &terminal in &terminals {
				if let Some(len) = self.clauses[terminal].match_terminal(pos, input) {
					let key = MemoKey { clause: terminal, start: pos };
					memo.add_match(self, key, Some(Match::terminal(key, len)), queue);
				}
			}
		}
	}

	/// Runs the `Lex` clause top-down from each position, memoising every
	/// match subtree and skipping over what it consumed. Positions the lexer
	/// cannot make sense of are skipped one character at a time.
	fn lex_prepass(&self, lex_clause: usize, memo: &mut MemoTable, queue: &mut BinaryHeap<WorkItem>) {
		let input = memo.input();
		let mut pos = 0;
		while pos < input.len() {
			let char_len = input[pos..].chars().next().map_or(1, |c| c.len_utf8());
			let key = MemoKey { clause: lex_clause, start: pos };
			match try_match(self, memo, key, MatchDirection::TopDown) {
				Some(found) => {
					let advance = found.len.max(char_len);
					memoize_subtree(self, memo, found, queue);
					pos += advance;
				}
				None => pos += char_len,
			}
		}
	}
}

/// Memoises a top-down match and all of its descendants, scheduling seed
/// parents for each entry added.
fn memoize_subtree(grammar: &Grammar, memo: &mut MemoTable, found: Match, queue: &mut BinaryHeap<WorkItem>) {
	let mut pending: Vec<Rc<Match>> = vec![Rc::new(found)];
	while let Some(m) = pending.pop() {
		pending.extend(m.sub_matches.iter().cloned());
		memo.add_match(grammar, m.key, Some((*m).clone()), queue);
	}
}

fn lookup(grammar: &Grammar, memo: &MemoTable, key: MemoKey, direction: MatchDirection) -> Option<Rc<Match>> {
	match direction {
		MatchDirection::BottomUp => memo.look_up_best_match(grammar, key),
		MatchDirection::TopDown => match memo.get(key) {
			Some(found) => Some(found),
			None => try_match(grammar, memo, key, MatchDirection::TopDown).map(Rc::new),
		},
	}
}

/// Matches a single clause at a position. Bottom-up, this is a pure function
/// of the memo table and the input.
pub(crate) fn try_match(grammar: &Grammar, memo: &MemoTable, key: MemoKey, direction: MatchDirection) -> Option<Match> {
	let clause = &grammar.clauses[key.clause];
	match &clause.kind {
		ClauseKind::CharSet(_) | ClauseKind::CharSeq { .. } | ClauseKind::Nothing | ClauseKind::Start => {
			clause.match_terminal(key.start, memo.input()).map(|len| Match::terminal(key, len))
		}
		ClauseKind::Seq => {
			let mut pos = key.start;
			let mut sub_matches = Vec::with_capacity(clause.sub.len());
			for sub in &clause.sub {
				let found = lookup(grammar, memo, MemoKey { clause: sub.idx, start: pos }, direction)?;
				pos += found.len;
				sub_matches.push(found);
			}
			Some(Match { key, len: pos - key.start, sub_idx: 0, sub_matches })
		}
		ClauseKind::First => {
			for (alt_idx, sub) in clause.sub.iter().enumerate() {
				let skey = MemoKey { clause: sub.idx, start: key.start };
				if let Some(found) = lookup(grammar, memo, skey, direction) {
					return Some(Match { key, len: found.len, sub_idx: alt_idx, sub_matches: vec![found] });
				}
			}
			None
		}
		ClauseKind::OneOrMore => {
			let skey = MemoKey { clause: clause.sub[0].idx, start: key.start };
			let head = lookup(grammar, memo, skey, direction)?;
			// The tail is this clause itself, one head further right; the
			// match tree stays right-recursive and is flattened on projection.
			let tail_start = key.start + head.len;
			let tail = (tail_start < memo.input().len())
				.then(|| lookup(grammar, memo, MemoKey { clause: key.clause, start: tail_start }, direction))
				.flatten();
			match tail {
				Some(tail) => {
					Some(Match { key, len: head.len + tail.len, sub_idx: 0, sub_matches: vec![head, tail] })
				}
				None => Some(Match { key, len: head.len, sub_idx: 0, sub_matches: vec![head] }),
			}
		}
		ClauseKind::FollowedBy => {
			let skey = MemoKey { clause: clause.sub[0].idx, start: key.start };
			lookup(grammar, memo, skey, direction)?;
			Some(Match::empty(key, 0))
		}
		ClauseKind::NotFollowedBy => {
			let skey = MemoKey { clause: clause.sub[0].idx, start: key.start };
			match lookup(grammar, memo, skey, direction) {
				Some(_) => None,
				None => Some(Match::empty(key, 0)),
			}
		}
	}
}

#[cfg(test)]
mod test {
	use crate::grammar::*;
	use pretty_assertions::assert_eq;

	fn grammar(rules: Vec<Rule>) -> Grammar {
		Grammar::new(rules).unwrap()
	}

	#[test]
	fn terminal_and_sequence() {
		let g = grammar(vec![Rule::new("S", seq([lit("foo"), ch('!')]))]);
		let memo = g.parse("foo!");
		let matches = g.get_non_overlapping_matches("S", &memo);
		assert_eq!(matches.len(), 1);
		assert_eq!(matches[0].text(memo.input()), "foo!");
	}

	#[test]
	fn ordered_choice_prefers_earlier_alternative() {
		// both alternatives match at 0; the first one is kept even though the
		// second is longer
		let g = grammar(vec![Rule::new("S", first([lit("ab"), lit("abc")]))]);
		let memo = g.parse("abc");
		let matches = g.get_all_matches("S", &memo);
		assert_eq!(matches[0].len, 2);
		assert_eq!(matches[0].sub_idx, 0);
	}

	#[test]
	fn one_or_more_matches_at_every_suffix() {
		let g = grammar(vec![Rule::new("S", one_or_more(ch('a')))]);
		let memo = g.parse("aaa");
		let matches = g.get_all_matches("S", &memo);
		assert_eq!(matches.len(), 3);
		assert_eq!(matches.iter().map(|m| (m.start(), m.len)).collect::<Vec<_>>(), vec![(0, 3), (1, 2), (2, 1)]);
	}

	#[test]
	fn terminal_misses_are_not_memoised() {
		let g = grammar(vec![Rule::new("S", ch('a'))]);
		let memo = g.parse("bbb");
		assert!(g.get_all_matches("S", &memo).is_empty());
	}

	#[test]
	fn zero_length_match_on_empty_input() {
		let g = grammar(vec![Rule::new("S", seq([zero_or_more(ch('a')), opt(ch('b'))]))]);
		let memo = g.parse("");
		let matches = g.get_non_overlapping_matches("S", &memo);
		assert_eq!(matches.len(), 1);
		assert_eq!((matches[0].start(), matches[0].len), (0, 0));
	}

	#[test]
	fn start_only_matches_at_position_zero() {
		let g = grammar(vec![Rule::new("S", start())]);
		let memo = g.parse("abab");
		let matches = g.get_all_matches("S", &memo);
		assert_eq!(matches.iter().map(|m| (m.start(), m.len)).collect::<Vec<_>>(), vec![(0, 0)]);
	}

	#[test]
	fn negative_lookahead() {
		// a run of digits not followed by a letter
		let g = grammar(vec![
			Rule::new("S", seq([one_or_more(char_range('0', '9')), not_followed_by(char_range('a', 'z'))])),
		]);
		let memo = g.parse("12x34");
		let starts: Vec<usize> = g.get_all_matches("S", &memo).iter().map(|m| m.start()).collect();
		// every digit run starting at 0 or 1 is followed by 'x'
		assert_eq!(starts, vec![3, 4]);
	}

	#[test]
	fn positive_lookahead_is_zero_width() {
		let g = grammar(vec![Rule::new("S", seq([followed_by(ch('a')), char_range('a', 'z')]))]);
		let memo = g.parse("ab");
		let matches = g.get_all_matches("S", &memo);
		assert_eq!(matches.iter().map(|m| (m.start(), m.len)).collect::<Vec<_>>(), vec![(0, 1)]);
	}

	#[test]
	fn direct_left_recursion() {
		let g = grammar(vec![Rule::new(
			"E",
			first([seq([ruleref("E"), ch('+'), ruleref("E")]), char_range('0', '9')]),
		)]);
		let memo = g.parse("1+2+3+4");
		let matches = g.get_non_overlapping_matches("E", &memo);
		assert_eq!(matches.len(), 1);
		assert_eq!(matches[0].text(memo.input()), "1+2+3+4");
	}

	#[test]
	fn indirect_left_recursion() {
		let g = grammar(vec![
			Rule::new("A", first([ruleref("B"), ch('x')])),
			Rule::new("B", seq([ruleref("A"), ch('y')])),
		]);
		let memo = g.parse("xyy");
		let matches = g.get_non_overlapping_matches("A", &memo);
		assert_eq!(matches.len(), 1);
		assert_eq!(matches[0].text(memo.input()), "xyy");
	}

	#[test]
	fn lex_prepass_segments_the_input() {
		let g = grammar(vec![
			Rule::new("S", seq([start(), one_or_more(ruleref("Tok"))])),
			Rule::new("Tok", first([lit("ab"), ch('c')])),
			Rule::new("Lex", first([lit("ab"), ch('c')])),
		]);
		let memo = g.parse("abcab");
		let matches = g.get_non_overlapping_matches("S", &memo);
		assert_eq!(matches.len(), 1);
		assert_eq!(matches[0].len, 5);
		// the lexeme boundaries are in the table
		let toks = g.get_navigable_matches("Tok", &memo);
		assert_eq!(toks.keys().copied().collect::<Vec<_>>(), vec![0, 2, 3]);
	}

	#[test]
	fn memo_counters_advance() {
		let g = grammar(vec![Rule::new("S", one_or_more(ch('a')))]);
		let memo = g.parse("aaaa");
		assert!(memo.num_matches_memoized() > 0);
		assert!(memo.num_matches_created() >= memo.num_matches_memoized());
	}
}
