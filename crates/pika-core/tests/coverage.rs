extern crate pika_core;

use pika_core::*;
use pretty_assertions::assert_eq;

#[test]
fn zero_length_tail_on_empty_input() {
	let g = Grammar::from_peg("S <- 'a'* 'b'? ;").unwrap();
	let memo = g.parse("");
	let matches = g.get_non_overlapping_matches("S", &memo);
	assert_eq!(matches.len(), 1);
	assert_eq!((matches[0].start(), matches[0].len), (0, 0));
}

#[test]
fn inverted_char_set_comments() {
	let g = Grammar::from_peg(r#"P <- C+ ; C <- "//" [^\r\n]* [\r\n]? ;"#).unwrap();
	let input = "// xyz\n//";
	let memo = g.parse(input);

	let comments = g.get_non_overlapping_matches("C", &memo);
	assert_eq!(comments.iter().map(|m| m.text(input)).collect::<Vec<_>>(), vec!["// xyz\n", "//"]);
	assert!(g.get_syntax_errors(&memo, &["P", "C"]).is_empty());
}

#[test]
fn direct_left_recursion_from_description() {
	let g = Grammar::from_peg("E <- E '+' E / [0-9] ;").unwrap();
	let memo = g.parse("1+2+3");
	let matches = g.get_non_overlapping_matches("E", &memo);
	assert_eq!(matches.len(), 1);
	assert_eq!(matches[0].text(memo.input()), "1+2+3");

	let memo = g.parse("1+2+3+4");
	let matches = g.get_non_overlapping_matches("E", &memo);
	assert_eq!(matches.len(), 1);
	assert_eq!(matches[0].text(memo.input()), "1+2+3+4");
}

#[test]
fn error_spans_complement_covered_spans() {
	let g = Grammar::from_peg("W <- w:[a-z]+ ;").unwrap();
	let input = "abc12de3f";
	let memo = g.parse(input);

	let covered: Vec<(usize, usize)> =
		g.get_non_overlapping_matches("W", &memo).iter().map(|m| (m.start(), m.end())).collect();
	assert_eq!(covered, vec![(0, 3), (5, 7), (8, 9)]);

	let errors: Vec<(usize, (usize, String))> = g.get_syntax_errors(&memo, &["W"]).into_iter().collect();
	assert_eq!(errors, vec![(3, (5, "12".to_string())), (7, (8, "3".to_string()))]);

	// every position is covered by exactly one of the two sets
	for pos in 0..input.len() {
		let in_match = covered.iter().any(|&(s, e)| s <= pos && pos < e);
		let in_error = errors.iter().any(|&(s, (e, _))| s <= pos && pos < e);
		assert!(in_match != in_error, "position {pos}");
	}
}

#[test]
fn non_overlapping_matches_are_disjoint_and_increasing() {
	let g = Grammar::from_peg(r#"A <- "aa" ;"#).unwrap();
	// overlapping candidates at 0, 1, 2 collapse to 0 and 2
	let memo = g.parse("aaaa");
	let matches = g.get_non_overlapping_matches("A", &memo);
	assert_eq!(matches.iter().map(|m| (m.start(), m.len)).collect::<Vec<_>>(), vec![(0, 2), (2, 2)]);
}

#[test]
fn case_insensitive_literals() {
	let g = Grammar::new(vec![Rule::new(
		"S",
		grammar::seq([grammar::lit_ignore_case("select"), grammar::one_or_more(grammar::ch(' '))]),
	)])
	.unwrap();
	let memo = g.parse("SeLeCt  ");
	assert_eq!(g.get_non_overlapping_matches("S", &memo)[0].len, 8);
}
