//! The grammar-description grammar: a grammar literal for the PEG DSL,
//! parsed with the engine itself, plus the conversion from its AST into
//! surface rules.

use anyhow::{anyhow, bail, ensure, Context, Result};
use lazy_static::lazy_static;

use crate::ast::AstNode;
use crate::clause::CharSet;
use crate::grammar::{
	ch, char_range, char_set, first, followed_by, label, lit, nothing, not_followed_by, one_or_more, opt, ruleref,
	seq, start, zero_or_more, Assoc, Grammar, GrammarError, Rule, RuleExpr,
};
use crate::strings;

const RULE_AST: &str = "RULE";
const IDENT_AST: &str = "IDENT";
const PREC_AST: &str = "PREC";
const L_ASSOC_AST: &str = "LASSOC";
const R_ASSOC_AST: &str = "RASSOC";
const LABEL_AST: &str = "LABEL";
const LABEL_NAME_AST: &str = "LABELNAME";
const LABEL_CLAUSE_AST: &str = "LABELCLAUSE";
const SEQ_AST: &str = "SEQ";
const FIRST_AST: &str = "FIRST";
const ONE_OR_MORE_AST: &str = "ONEORMORE";
const ZERO_OR_MORE_AST: &str = "ZEROORMORE";
const OPTIONAL_AST: &str = "OPTIONAL";
const FOLLOWED_BY_AST: &str = "FOLLOWEDBY";
const NOT_FOLLOWED_BY_AST: &str = "NOTFOLLOWEDBY";
const SINGLE_QUOTED_CHAR_AST: &str = "SINGLEQUOTEDCHAR";
const CHAR_RANGE_AST: &str = "CHARRANGE";
const QUOTED_STRING_AST: &str = "QUOTEDSTRING";
const NOTHING_AST: &str = "NOTHING";
const START_AST: &str = "START";

fn meta_rules() -> Vec<Rule> {
	vec![
		Rule::new("GRAMMAR", seq([start(), ruleref("WSC"), one_or_more(ruleref("RULE"))])),
		Rule::new(
			"RULE",
			label(
				RULE_AST,
				seq([
					ruleref("IDENT"),
					ruleref("WSC"),
					opt(ruleref("PREC")),
					lit("<-"),
					ruleref("WSC"),
					ruleref("CLAUSE"),
					ruleref("WSC"),
					ch(';'),
					ruleref("WSC"),
				]),
			),
		),
		// parens are the precedence-breaking pattern: the wrap-around level
		Rule::with_precedence(
			"CLAUSE",
			8,
			None,
			seq([ch('('), ruleref("WSC"), ruleref("CLAUSE"), ruleref("WSC"), ch(')')]),
		),
		Rule::with_precedence(
			"CLAUSE",
			7,
			None,
			first([
				ruleref("IDENT"),
				ruleref("QUOTED_STRING"),
				ruleref("CHAR_SET"),
				ruleref("NOTHING"),
				ruleref("START"),
			]),
		),
		Rule::with_precedence(
			"CLAUSE",
			6,
			None,
			first([
				seq([label(ONE_OR_MORE_AST, ruleref("CLAUSE")), ruleref("WSC"), ch('+')]),
				seq([label(ZERO_OR_MORE_AST, ruleref("CLAUSE")), ruleref("WSC"), ch('*')]),
			]),
		),
		Rule::with_precedence(
			"CLAUSE",
			5,
			None,
			first([
				seq([ch('&'), label(FOLLOWED_BY_AST, ruleref("CLAUSE"))]),
				seq([ch('!'), label(NOT_FOLLOWED_BY_AST, ruleref("CLAUSE"))]),
			]),
		),
		Rule::with_precedence(
			"CLAUSE",
			4,
			None,
			seq([label(OPTIONAL_AST, ruleref("CLAUSE")), ruleref("WSC"), ch('?')]),
		),
		Rule::with_precedence(
			"CLAUSE",
			3,
			None,
			label(
				LABEL_AST,
				seq([
					label(LABEL_NAME_AST, ruleref("IDENT")),
					ruleref("WSC"),
					ch(':'),
					ruleref("WSC"),
					label(LABEL_CLAUSE_AST, ruleref("CLAUSE")),
					ruleref("WSC"),
				]),
			),
		),
		Rule::with_precedence(
			"CLAUSE",
			2,
			None,
			label(
				SEQ_AST,
				seq([ruleref("CLAUSE"), ruleref("WSC"), one_or_more(seq([ruleref("CLAUSE"), ruleref("WSC")]))]),
			),
		),
		Rule::with_precedence(
			"CLAUSE",
			1,
			None,
			label(
				FIRST_AST,
				seq([
					ruleref("CLAUSE"),
					ruleref("WSC"),
					one_or_more(seq([ch('/'), ruleref("WSC"), ruleref("CLAUSE"), ruleref("WSC")])),
				]),
			),
		),
		Rule::new("WSC", zero_or_more(first([char_set(" \n\r\t"), ruleref("COMMENT")]))),
		Rule::new("COMMENT", seq([ch('#'), zero_or_more(RuleExpr::CharSet(CharSet::single('\n').invert()))])),
		Rule::new("IDENT", label(IDENT_AST, one_or_more(ruleref("NAME_CHAR")))),
		Rule::new("NUM", one_or_more(char_range('0', '9'))),
		Rule::new("NAME_CHAR", {
			let mut set = CharSet::range('a', 'z');
			set.union(&CharSet::range('A', 'Z'));
			set.union(&CharSet::range('0', '9'));
			set.add_char('_');
			set.add_char('-');
			RuleExpr::CharSet(set)
		}),
		Rule::new(
			"PREC",
			seq([
				ch('['),
				ruleref("WSC"),
				label(PREC_AST, ruleref("NUM")),
				ruleref("WSC"),
				opt(seq([
					ch(','),
					ruleref("WSC"),
					first([
						label(R_ASSOC_AST, first([ch('r'), ch('R')])),
						label(L_ASSOC_AST, first([ch('l'), ch('L')])),
					]),
					ruleref("WSC"),
				])),
				ch(']'),
				ruleref("WSC"),
			]),
		),
		Rule::new(
			"CHAR_SET",
			first([
				seq([ch('\''), label(SINGLE_QUOTED_CHAR_AST, ruleref("SINGLE_QUOTED_CHAR")), ch('\'')]),
				seq([
					ch('['),
					label(
						CHAR_RANGE_AST,
						seq([opt(ch('^')), one_or_more(first([ruleref("CHAR_RANGE"), ruleref("CHAR_RANGE_CHAR")]))]),
					),
					ch(']'),
				]),
			]),
		),
		Rule::new(
			"SINGLE_QUOTED_CHAR",
			first([ruleref("ESCAPED_CTRL_CHAR"), RuleExpr::CharSet(CharSet::single('\'').invert())]),
		),
		Rule::new("CHAR_RANGE", seq([ruleref("CHAR_RANGE_CHAR"), ch('-'), ruleref("CHAR_RANGE_CHAR")])),
		Rule::new("CHAR_RANGE_CHAR", {
			let mut excluded = CharSet::single('\\');
			excluded.add_char(']');
			first([
				RuleExpr::CharSet(excluded.invert()),
				ruleref("ESCAPED_CTRL_CHAR"),
				lit("\\-"),
				lit("\\\\"),
				lit("\\]"),
				lit("\\^"),
			])
		}),
		Rule::new(
			"QUOTED_STRING",
			seq([ch('"'), label(QUOTED_STRING_AST, zero_or_more(ruleref("STR_QUOTED_CHAR"))), ch('"')]),
		),
		Rule::new("STR_QUOTED_CHAR", {
			let mut excluded = CharSet::single('"');
			excluded.add_char('\\');
			first([ruleref("ESCAPED_CTRL_CHAR"), RuleExpr::CharSet(excluded.invert())])
		}),
		Rule::new("HEX", {
			let mut set = CharSet::range('0', '9');
			set.union(&CharSet::range('a', 'f'));
			set.union(&CharSet::range('A', 'F'));
			RuleExpr::CharSet(set)
		}),
		Rule::new(
			"ESCAPED_CTRL_CHAR",
			first([
				lit("\\t"),
				lit("\\b"),
				lit("\\n"),
				lit("\\r"),
				lit("\\f"),
				lit("\\'"),
				lit("\\\""),
				lit("\\\\"),
				seq([lit("\\u"), ruleref("HEX"), ruleref("HEX"), ruleref("HEX"), ruleref("HEX")]),
			]),
		),
		Rule::new("NOTHING", label(NOTHING_AST, seq([ch('('), ruleref("WSC"), ch(')')]))),
		Rule::new("START", label(START_AST, ch('^'))),
	]
}

lazy_static! {
	static ref META_GRAMMAR: Grammar = Grammar::new(meta_rules()).unwrap();
}

/// The compiled grammar of the grammar-description DSL.
pub fn meta_grammar() -> &'static Grammar {
	&META_GRAMMAR
}

/// Parses a grammar description into surface rules, ready for
/// [`Grammar::new`]. The description must be fully covered by one top-level
/// match; uncovered spans are reported as an error.
pub fn parse_peg(description: &str) -> Result<Vec<Rule>, GrammarError> {
	let meta = meta_grammar();
	let memo = meta.parse(description);

	let top = meta
		.get_non_overlapping_matches("GRAMMAR", &memo)
		.into_iter()
		.next()
		.ok_or_else(|| GrammarError::Meta("no grammar rules found".to_string()))?;
	if top.start() != 0 || top.len < description.len() {
		let (start, (end, text)) = meta
			.get_syntax_errors(&memo, &["GRAMMAR", "RULE"])
			.into_iter()
			.next()
			.unwrap_or((top.len, (description.len(), description[top.len..].to_string())));
		return Err(GrammarError::Meta(format!("syntax error at {start}..{end}: {text:?}")));
	}

	let ast = top.to_ast("GRAMMAR", meta);
	let mut rules = Vec::with_capacity(ast.children.len());
	for node in &ast.children {
		let rule = convert_rule(node, description).map_err(|e| GrammarError::Meta(format!("{e:#}")))?;
		rules.push(rule);
	}
	Ok(rules)
}

fn convert_rule(node: &AstNode, input: &str) -> Result<Rule> {
	ensure!(node.label == RULE_AST, "expected a rule, found '{}'", node.label);
	let children = &node.children;
	ensure!(children.len() >= 2, "malformed rule at offset {}", node.start);
	ensure!(children[0].label == IDENT_AST, "rule must begin with a name, at offset {}", node.start);

	let name = children[0].text(input).to_string();
	let mut precedence = -1;
	let mut associativity = None;
	for child in &children[1..children.len() - 1] {
		match child.label.as_str() {
			PREC_AST => {
				precedence = child
					.text(input)
					.parse()
					.with_context(|| format!("invalid precedence for rule '{name}'"))?;
			}
			L_ASSOC_AST => associativity = Some(Assoc::Left),
			R_ASSOC_AST => associativity = Some(Assoc::Right),
			other => bail!("unexpected '{other}' in rule '{name}'"),
		}
	}

	let expr = convert_clause(children.last().unwrap(), input).with_context(|| format!("in rule '{name}'"))?;
	Ok(Rule { name, precedence, associativity, expr })
}

fn convert_clause(node: &AstNode, input: &str) -> Result<RuleExpr> {
	let only_child = |what: &str| -> Result<&AstNode> {
		node.children.first().ok_or_else(|| anyhow!("{what} has no operand at offset {}", node.start))
	};

	Ok(match node.label.as_str() {
		SEQ_AST => seq(convert_children(node, input)?),
		FIRST_AST => first(convert_children(node, input)?),
		ONE_OR_MORE_AST => one_or_more(convert_clause(only_child("'+'")?, input)?),
		ZERO_OR_MORE_AST => zero_or_more(convert_clause(only_child("'*'")?, input)?),
		OPTIONAL_AST => opt(convert_clause(only_child("'?'")?, input)?),
		FOLLOWED_BY_AST => followed_by(convert_clause(only_child("'&'")?, input)?),
		NOT_FOLLOWED_BY_AST => not_followed_by(convert_clause(only_child("'!'")?, input)?),
		LABEL_AST => {
			let [name, clause] = node.children.as_slice() else {
				bail!("malformed label at offset {}", node.start);
			};
			ensure!(name.label == LABEL_NAME_AST && clause.label == LABEL_CLAUSE_AST, "malformed label");
			let target = clause.children.first().ok_or_else(|| anyhow!("label without a clause"))?;
			label(name.text(input), convert_clause(target, input)?)
		}
		IDENT_AST => ruleref(node.text(input)),
		QUOTED_STRING_AST => {
			let text = node.text(input);
			lit(strings::unescape_string(text).ok_or_else(|| anyhow!("invalid escape in string {text:?}"))?)
		}
		SINGLE_QUOTED_CHAR_AST => {
			let text = node.text(input);
			let c = strings::unescape_char(text).ok_or_else(|| anyhow!("invalid character literal '{text}'"))?;
			RuleExpr::CharSet(CharSet::single(c))
		}
		CHAR_RANGE_AST => RuleExpr::CharSet(convert_char_class(node.text(input))?),
		NOTHING_AST => nothing(),
		START_AST => start(),
		other => bail!("unexpected node '{other}' at offset {}", node.start),
	})
}

fn convert_children(node: &AstNode, input: &str) -> Result<Vec<RuleExpr>> {
	node.children.iter().map(|child| convert_clause(child, input)).collect()
}

/// Parses the body of a `[...]` character class, `^` inversion included.
fn convert_char_class(text: &str) -> Result<CharSet> {
	let (invert, mut rest) = match text.strip_prefix('^') {
		Some(rest) => (true, rest),
		None => (false, text),
	};
	let mut set = CharSet::new();
	while !rest.is_empty() {
		let (lo, used) = strings::unescape_first(rest).ok_or_else(|| anyhow!("invalid escape in [{text}]"))?;
		rest = &rest[used..];
		match rest.strip_prefix('-') {
			Some("") => {
				// trailing '-' is a literal
				set.add_char(lo);
				set.add_char('-');
				rest = "";
			}
			Some(tail) => {
				let (hi, used) = strings::unescape_first(tail).ok_or_else(|| anyhow!("invalid escape in [{text}]"))?;
				ensure!(lo <= hi, "invalid range {lo}-{hi} in [{text}]");
				set.add_range(lo, hi);
				rest = &tail[used..];
			}
			None => set.add_char(lo),
		}
	}
	Ok(if invert { set.invert() } else { set })
}
