extern crate pika_core;

use pika_core::*;
use pretty_assertions::assert_eq;

const ARITHMETIC: &str = r#"
Program <- Statement+ ;
Statement <- var:[a-z]+ '=' E ';' ;
E[4] <- '(' E ')' ;
E[3] <- num:[0-9]+ / sym:[a-z]+ ;
E[2] <- arith:(op:'-' E) ;
E[1,L] <- arith:(E op:('*' / '/') E) ;
E[0,L] <- arith:(E op:('+' / '-') E) ;
"#;

fn labels(node: &AstNode) -> Vec<&str> {
	node.children.iter().map(|c| c.label.as_str()).collect()
}

#[test]
fn left_associative_arithmetic() {
	let g = Grammar::from_peg(ARITHMETIC).unwrap();
	let input = "discriminant=b*b-4*a*c;";
	let memo = g.parse(input);

	let matches = g.get_non_overlapping_matches("Program", &memo);
	assert_eq!(matches.len(), 1);
	assert_eq!((matches[0].start(), matches[0].len), (0, 23));

	let ast = matches[0].to_ast("Program", &g);
	assert_eq!(labels(&ast), vec!["var", "arith"]);
	assert_eq!(ast.children[0].text(input), "discriminant");

	let arith = &ast.children[1];
	assert_eq!(arith.text(input), "b*b-4*a*c");

	// subtraction at the top, multiplication chains below it
	assert_eq!(labels(arith), vec!["arith", "op", "arith"]);
	assert_eq!(arith.children[1].text(input), "-");
	assert_eq!(arith.children[0].text(input), "b*b");
	assert_eq!(labels(&arith.children[0]), vec!["sym", "op", "sym"]);

	// the product chain leans left: (4*a)*c
	let product = &arith.children[2];
	assert_eq!(product.text(input), "4*a*c");
	assert_eq!(labels(product), vec!["arith", "op", "sym"]);
	assert_eq!(product.children[0].text(input), "4*a");
	assert_eq!(labels(&product.children[0]), vec!["num", "op", "sym"]);
}

#[test]
fn unary_minus() {
	let g = Grammar::from_peg(ARITHMETIC).unwrap();
	let input = "y=-a*b;";
	let memo = g.parse(input);

	let m = g.get_non_overlapping_matches("Program", &memo).remove(0);
	assert_eq!(m.len, input.len());

	let ast = m.to_ast("Program", &g);
	let arith = &ast.children[1];
	assert_eq!(labels(arith), vec!["arith", "op", "sym"]);
	let negated = &arith.children[0];
	assert_eq!(negated.text(input), "-a");
	assert_eq!(labels(negated), vec!["op", "sym"]);
}

#[test]
fn syntax_error_localisation() {
	let g = Grammar::from_peg(ARITHMETIC).unwrap();
	let memo = g.parse("a=1;@#$;b=2;");

	let statements = g.get_non_overlapping_matches("Statement", &memo);
	assert_eq!(statements.iter().map(|m| m.text(memo.input())).collect::<Vec<_>>(), vec!["a=1;", "b=2;"]);

	let errors = g.get_syntax_errors(&memo, &["Statement"]);
	assert_eq!(errors.into_iter().collect::<Vec<_>>(), vec![(4, (8, "@#$;".to_string()))]);
}

#[test]
fn navigable_matches_find_the_next_statement() {
	let g = Grammar::from_peg(ARITHMETIC).unwrap();
	let memo = g.parse("a=1;@#$;b=2;");

	let navigable = g.get_navigable_matches("Statement", &memo);
	assert_eq!(navigable.keys().copied().collect::<Vec<_>>(), vec![0, 8]);
	// "next match at or after" queries drive error recovery
	let (&next_start, next) = navigable.range(5..).next().unwrap();
	assert_eq!(next_start, 8);
	assert_eq!(next.text(memo.input()), "b=2;");
}

#[test]
fn parenthesised_form_wraps_to_lowest_precedence() {
	let g = Grammar::from_peg(ARITHMETIC).unwrap();
	let input = "x=(1+2)*3;";
	let memo = g.parse(input);

	let m = g.get_non_overlapping_matches("Program", &memo).remove(0);
	assert_eq!(m.len, input.len());

	// inside the parentheses the hierarchy restarts at the lowest level, so
	// the sum sits directly under the product
	let ast = m.to_ast("Program", &g);
	let arith = &ast.children[1];
	assert_eq!(labels(arith), vec!["arith", "op", "num"]);
	assert_eq!(arith.children[0].text(input), "1+2");
	assert_eq!(labels(&arith.children[0]), vec!["num", "op", "num"]);
}

#[test]
fn memo_tables_are_independent_per_parse() {
	let g = Grammar::from_peg(ARITHMETIC).unwrap();
	let first_memo = g.parse("a=1;");
	let second_memo = g.parse("bb=cc;");
	assert_eq!(g.get_non_overlapping_matches("Program", &first_memo).len(), 1);
	assert_eq!(g.get_non_overlapping_matches("Program", &second_memo).len(), 1);
	assert_eq!(g.get_non_overlapping_matches("Program", &first_memo)[0].len, 4);
}
