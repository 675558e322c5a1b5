//! The runtime clause model: the interned, resolved PEG operators that the
//! parsing engine drives. Rule references and AST-label wrappers exist only in
//! the surface expression tree and cannot be represented here.

use itertools::Itertools;

use crate::strings;

/// A set of BMP code points, stored as a growable bitmap with a logical
/// inversion flag. Code points above the BMP are outside every set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CharSet {
	words: Vec<u64>,
	inverted: bool,
}

impl CharSet {
	pub fn new() -> CharSet {
		CharSet::default()
	}

	pub fn single(ch: char) -> CharSet {
		let mut set = CharSet::new();
		set.add_char(ch);
		set
	}

	/// The inclusive range `lo..=hi`.
	pub fn range(lo: char, hi: char) -> CharSet {
		let mut set = CharSet::new();
		set.add_range(lo, hi);
		set
	}

	pub fn add_char(&mut self, ch: char) {
		self.add_range(ch, ch);
	}

	pub fn add_range(&mut self, lo: char, hi: char) {
		let (lo, hi) = (lo as u32, hi as u32);
		for code in lo..=hi.min(0xffff) {
			let word = (code / 64) as usize;
			if word >= self.words.len() {
				self.words.resize(word + 1, 0);
			}
			self.words[word] |= 1 << (code % 64);
		}
	}

	/// Unions the raw code-point sets; the inversion flags must agree.
	pub fn union(&mut self, other: &CharSet) {
		debug_assert_eq!(self.inverted, other.inverted);
		if other.words.len() > self.words.len() {
			self.words.resize(other.words.len(), 0);
		}
		for (word, &bits) in self.words.iter_mut().zip(&other.words) {
			*word |= bits;
		}
	}

	pub fn invert(mut self) -> CharSet {
		self.inverted = !self.inverted;
		self
	}

	pub fn is_inverted(&self) -> bool {
		self.inverted
	}

	fn bit(&self, code: u32) -> bool {
		let word = (code / 64) as usize;
		word < self.words.len() && self.words[word] & (1 << (code % 64)) != 0
	}

	pub fn contains(&self, ch: char) -> bool {
		let raw = (ch as u32) <= 0xffff && self.bit(ch as u32);
		raw != self.inverted
	}

	/// The raw (pre-inversion) set as sorted inclusive ranges.
	pub fn ranges(&self) -> Vec<(char, char)> {
		let mut ranges = vec![];
		let mut run: Option<(u32, u32)> = None;
		for code in 0..(self.words.len() as u32 * 64) {
			match (self.bit(code), run) {
				(true, None) => run = Some((code, code)),
				(true, Some((lo, _))) => run = Some((lo, code)),
				(false, Some((lo, hi))) => {
					ranges.push((lo, hi));
					run = None;
				}
				(false, None) => {}
			}
		}
		if let Some((lo, hi)) = run {
			ranges.push((lo, hi));
		}
		ranges
			.into_iter()
			.filter_map(|(lo, hi)| Some((char::from_u32(lo)?, char::from_u32(hi)?)))
			.collect()
	}

	fn is_single_char(&self) -> Option<char> {
		match (self.inverted, self.ranges().as_slice()) {
			(false, [(lo, hi)]) if lo == hi => Some(*lo),
			_ => None,
		}
	}
}

impl std::fmt::Display for CharSet {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		if let Some(ch) = self.is_single_char() {
			return write!(f, "'{}'", strings::escape_char(ch));
		}
		write!(f, "[{}", if self.inverted { "^" } else { "" })?;
		for (lo, hi) in self.ranges() {
			if lo == hi {
				write!(f, "{}", strings::escape_range_char(lo))?;
			} else {
				write!(f, "{}-{}", strings::escape_range_char(lo), strings::escape_range_char(hi))?;
			}
		}
		write!(f, "]")
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClauseKind {
	CharSet(CharSet),
	CharSeq { text: String, ignore_case: bool },
	Nothing,
	Start,
	Seq,
	First,
	OneOrMore,
	FollowedBy,
	NotFollowedBy,
}

/// A labelled reference to another clause in the grammar's arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubClause {
	pub idx: usize,
	pub label: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Clause {
	/// Arena index; the arena is in bottom-up topological order, so this is
	/// also the worklist priority (terminals lowest).
	pub idx: usize,
	pub kind: ClauseKind,
	pub sub: Vec<SubClause>,
	/// Clauses to re-attempt at a position when this clause first matches there.
	pub seed_parents: Vec<usize>,
	/// Whether this clause has a zero-length match at every position.
	pub can_match_zero: bool,
	/// Names of the rules whose body this clause is.
	pub rules: Vec<String>,
}

impl Clause {
	pub fn is_terminal(&self) -> bool {
		matches!(
			self.kind,
			ClauseKind::CharSet(_) | ClauseKind::CharSeq { .. } | ClauseKind::Nothing | ClauseKind::Start
		)
	}

	pub fn is_nothing(&self) -> bool {
		matches!(self.kind, ClauseKind::Nothing)
	}

	/// Matches a terminal clause at a byte position, returning the matched
	/// length. Must not be called on composite clauses.
	pub fn match_terminal(&self, pos: usize, input: &str) -> Option<usize> {
		match &self.kind {
			ClauseKind::CharSet(set) => {
				let ch = input.get(pos..)?.chars().next()?;
				set.contains(ch).then(|| ch.len_utf8())
			}
			ClauseKind::CharSeq { text, ignore_case } => {
				let rest = input.get(pos..)?;
				if *ignore_case {
					let mut len = 0;
					let mut rest_chars = rest.chars();
					for want in text.chars() {
						let got = rest_chars.next()?;
						if !got.eq_ignore_ascii_case(&want) && !got.to_lowercase().eq(want.to_lowercase()) {
							return None;
						}
						len += got.len_utf8();
					}
					Some(len)
				} else {
					rest.starts_with(text.as_str()).then(|| text.len())
				}
			}
			ClauseKind::Nothing => Some(0),
			ClauseKind::Start => (pos == 0).then_some(0),
			kind => unreachable!("match_terminal on composite clause {kind:?}"),
		}
	}
}

/// Renders a clause of the arena, labels included, parenthesising nested
/// sequences and choices.
pub fn render_clause(clauses: &[Clause], idx: usize) -> String {
	let clause = &clauses[idx];
	match &clause.kind {
		ClauseKind::CharSet(set) => set.to_string(),
		ClauseKind::CharSeq { text, .. } => format!("\"{}\"", strings::escape_string(text)),
		ClauseKind::Nothing => "()".to_string(),
		ClauseKind::Start => "^".to_string(),
		ClauseKind::Seq => clause.sub.iter().map(|s| render_sub(clauses, s)).join(" "),
		ClauseKind::First => clause.sub.iter().map(|s| render_sub(clauses, s)).join(" / "),
		ClauseKind::OneOrMore => format!("{}+", render_sub(clauses, &clause.sub[0])),
		ClauseKind::FollowedBy => format!("&{}", render_sub(clauses, &clause.sub[0])),
		ClauseKind::NotFollowedBy => format!("!{}", render_sub(clauses, &clause.sub[0])),
	}
}

fn render_sub(clauses: &[Clause], sub: &SubClause) -> String {
	let child = &clauses[sub.idx];
	// Named clauses render as their rule name; this is what keeps rendering
	// finite on cyclic (left-recursive) clause graphs.
	let inner = match child.rules.first() {
		Some(rule_name) => rule_name.clone(),
		None => {
			let inner = render_clause(clauses, sub.idx);
			if matches!(child.kind, ClauseKind::Seq | ClauseKind::First) {
				format!("({inner})")
			} else {
				inner
			}
		}
	};
	match &sub.label {
		Some(label) => format!("{label}:{inner}"),
		None => inner,
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use pretty_assertions::assert_eq;

	#[test]
	fn char_set_membership() {
		let set = CharSet::range('a', 'z');
		assert!(set.contains('a') && set.contains('m') && set.contains('z'));
		assert!(!set.contains('A') && !set.contains('{'));

		let inverted = set.invert();
		assert!(!inverted.contains('m'));
		assert!(inverted.contains('A'));
		assert!(inverted.contains('\u{4e00}'));
	}

	#[test]
	fn char_set_above_bmp() {
		let set = CharSet::range('a', 'z');
		assert!(!set.contains('\u{1f600}'));
		// an inverted set accepts anything outside the raw set
		assert!(set.clone().invert().contains('\u{1f600}'));
	}

	#[test]
	fn char_set_union_and_ranges() {
		let mut set = CharSet::range('a', 'f');
		set.union(&CharSet::range('d', 'k'));
		set.union(&CharSet::single('_'));
		assert_eq!(set.ranges(), vec![('_', '_'), ('a', 'k')]);
	}

	#[test]
	fn char_set_display() {
		assert_eq!(CharSet::single('x').to_string(), "'x'");
		assert_eq!(CharSet::single('\n').to_string(), "'\\n'");
		let mut set = CharSet::range('0', '9');
		set.add_char('_');
		assert_eq!(set.to_string(), "[0-9_]");
		assert_eq!(CharSet::range('\r', '\r').invert().to_string(), "[^\\r]");
	}

	fn terminal(kind: ClauseKind) -> Clause {
		Clause { idx: 0, kind, sub: vec![], seed_parents: vec![], can_match_zero: false, rules: vec![] }
	}

	#[test]
	fn char_seq_matching() {
		let lit = terminal(ClauseKind::CharSeq { text: "abc".into(), ignore_case: false });
		assert_eq!(lit.match_terminal(0, "abcd"), Some(3));
		assert_eq!(lit.match_terminal(1, "xabc"), Some(3));
		assert_eq!(lit.match_terminal(2, "xabc"), None);
		// inclusive bound: a match may end exactly at the end of the input
		assert_eq!(lit.match_terminal(0, "abc"), Some(3));
		assert_eq!(lit.match_terminal(1, "abc"), None);
	}

	#[test]
	fn char_seq_ignore_case() {
		let lit = terminal(ClauseKind::CharSeq { text: "select".into(), ignore_case: true });
		assert_eq!(lit.match_terminal(0, "SELECT *"), Some(6));
		assert_eq!(lit.match_terminal(0, "SeLeCt"), Some(6));
		assert_eq!(lit.match_terminal(0, "selec"), None);
	}

	#[test]
	fn start_and_nothing() {
		assert_eq!(terminal(ClauseKind::Start).match_terminal(0, "ab"), Some(0));
		assert_eq!(terminal(ClauseKind::Start).match_terminal(1, "ab"), None);
		assert_eq!(terminal(ClauseKind::Nothing).match_terminal(2, "ab"), Some(0));
	}
}
