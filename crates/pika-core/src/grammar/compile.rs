//! The grammar compiler: validation, precedence rewriting, interning,
//! reference resolution, topological ordering, zero-length-match analysis and
//! seed-parent computation. The output arena contains only resolved runtime
//! clauses, in bottom-up order.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use crate::clause::{render_clause, CharSet, Clause, ClauseKind, SubClause};
use crate::grammar::{Assoc, CompiledRule, Grammar, GrammarError, Rule, RuleExpr};

/// A rule after normalisation: any top-level label wrappers have been moved
/// into the `label` slot.
#[derive(Debug, Clone)]
struct NormRule {
	name: String,
	precedence: i32,
	associativity: Option<Assoc>,
	label: Option<String>,
	expr: RuleExpr,
}

/// Compile-time clause pool entry. Unlike the runtime [`ClauseKind`], this can
/// hold an unresolved rule reference.
#[derive(Debug, Clone)]
enum PreKind {
	CharSet(CharSet),
	CharSeq { text: String, ignore_case: bool },
	Nothing,
	Start,
	Seq,
	First,
	OneOrMore,
	FollowedBy,
	NotFollowedBy,
	Ref(String),
}

#[derive(Debug, Clone)]
struct PreSub {
	idx: usize,
	label: Option<String>,
}

#[derive(Debug)]
struct PreClause {
	kind: PreKind,
	sub: Vec<PreSub>,
}

#[derive(Default)]
struct Pool {
	clauses: Vec<PreClause>,
	interned: HashMap<String, usize>,
}

impl Pool {
	fn intern(&mut self, key: String, make: impl FnOnce() -> PreClause) -> usize {
		match self.interned.get(&key) {
			Some(&idx) => idx,
			None => {
				let idx = self.clauses.len();
				self.clauses.push(make());
				self.interned.insert(key, idx);
				idx
			}
		}
	}
}

pub(crate) fn compile(rules: Vec<Rule>) -> Result<Grammar, GrammarError> {
	if rules.is_empty() {
		return Err(GrammarError::Empty);
	}

	let mut norm = normalize(rules)?;
	for rule in &norm {
		validate_expr(&rule.expr)?;
	}

	let (canonical, lowest_precedence) = rewrite_precedence(&mut norm)?;

	// Lower every rule body into the interned pre-clause pool.
	let mut pool = Pool::default();
	let mut rule_tops = Vec::with_capacity(norm.len());
	for rule in &norm {
		let top = lower(&rule.expr, &mut pool, &canonical)?;
		rule_tops.push(top);
	}

	resolve_refs(&mut pool, &norm, &mut rule_tops)?;

	let lowest_roots: Vec<usize> =
		norm.iter().zip(&rule_tops).filter(|(r, _)| lowest_precedence.contains(&r.name)).map(|(_, t)| t.idx).collect();
	let order = topo_order(&pool, &rule_tops, &lowest_roots);

	// Rebuild the arena in bottom-up order; consumed Ref leaves and other
	// unreachable pool entries are dropped here.
	let mut remap = vec![usize::MAX; pool.clauses.len()];
	for (new_idx, &old_idx) in order.iter().enumerate() {
		remap[old_idx] = new_idx;
	}
	let mut clauses: Vec<Clause> = order
		.iter()
		.enumerate()
		.map(|(new_idx, &old_idx)| {
			let pre = &pool.clauses[old_idx];
			let kind = match &pre.kind {
				PreKind::CharSet(set) => ClauseKind::CharSet(set.clone()),
				PreKind::CharSeq { text, ignore_case } => {
					ClauseKind::CharSeq { text: text.clone(), ignore_case: *ignore_case }
				}
				PreKind::Nothing => ClauseKind::Nothing,
				PreKind::Start => ClauseKind::Start,
				PreKind::Seq => ClauseKind::Seq,
				PreKind::First => ClauseKind::First,
				PreKind::OneOrMore => ClauseKind::OneOrMore,
				PreKind::FollowedBy => ClauseKind::FollowedBy,
				PreKind::NotFollowedBy => ClauseKind::NotFollowedBy,
				PreKind::Ref(name) => unreachable!("unresolved rule reference '{name}' survived compilation"),
			};
			let sub = pre.sub.iter().map(|s| SubClause { idx: remap[s.idx], label: s.label.clone() }).collect();
			Clause { idx: new_idx, kind, sub, seed_parents: vec![], can_match_zero: false, rules: vec![] }
		})
		.collect();

	let compiled: Vec<CompiledRule> = norm
		.iter()
		.zip(&rule_tops)
		.map(|(rule, top)| CompiledRule {
			name: rule.name.clone(),
			precedence: rule.precedence,
			associativity: rule.associativity,
			label: rule.label.clone(),
			clause: remap[top.idx],
		})
		.collect();
	for rule in &compiled {
		clauses[rule.clause].rules.push(rule.name.clone());
	}

	determine_can_match_zero(&mut clauses)?;
	setup_seed_parents(&mut clauses);

	let rule_index = compiled.iter().enumerate().map(|(i, r)| (r.name.clone(), i)).collect();
	let lex_rule = compiled.iter().position(|r| r.name == "Lex");

	debug!(rules = compiled.len(), clauses = clauses.len(), "compiled grammar");

	Ok(Grammar { rules: compiled, clauses, rule_index, lex_rule })
}

fn normalize(rules: Vec<Rule>) -> Result<Vec<NormRule>, GrammarError> {
	let mut seen = HashSet::new();
	let mut norm = Vec::with_capacity(rules.len());
	for rule in rules {
		if !seen.insert((rule.name.clone(), rule.precedence)) {
			return Err(GrammarError::DuplicateRule { name: rule.name, precedence: rule.precedence });
		}
		let (label, expr) = strip_labels(rule.expr);
		norm.push(NormRule { name: rule.name, precedence: rule.precedence, associativity: rule.associativity, label, expr });
	}
	Ok(norm)
}

fn strip_labels(mut expr: RuleExpr) -> (Option<String>, RuleExpr) {
	let mut label = None;
	while let RuleExpr::Label { label: l, expr: inner } = expr {
		label.get_or_insert(l);
		expr = *inner;
	}
	(label, expr)
}

fn unwrap_labels(mut expr: &RuleExpr) -> &RuleExpr {
	while let RuleExpr::Label { expr: inner, .. } = expr {
		expr = inner;
	}
	expr
}

fn validate_expr(expr: &RuleExpr) -> Result<(), GrammarError> {
	match expr {
		RuleExpr::Seq(subs) => {
			if subs.first().map(unwrap_labels).is_some_and(|e| matches!(e, RuleExpr::Nothing)) {
				return Err(GrammarError::NothingFirst(expr.to_string()));
			}
			for sub in subs {
				validate_expr(sub)?;
			}
		}
		RuleExpr::First(subs) => {
			for sub in subs {
				validate_expr(sub)?;
			}
		}
		RuleExpr::OneOrMore(sub) => validate_expr(sub)?,
		RuleExpr::FollowedBy(sub) | RuleExpr::NotFollowedBy(sub) => {
			match unwrap_labels(sub) {
				RuleExpr::FollowedBy(_) | RuleExpr::NotFollowedBy(_) | RuleExpr::Start => {
					return Err(GrammarError::NestedLookahead(expr.to_string()));
				}
				RuleExpr::Nothing if matches!(expr, RuleExpr::NotFollowedBy(_)) => {
					return Err(GrammarError::NotFollowedByNothing);
				}
				_ => {}
			}
			validate_expr(sub)?;
		}
		RuleExpr::Label { expr: sub, .. } => validate_expr(sub)?,
		_ => {}
	}
	Ok(())
}

/// Rewrites every multi-precedence rule family into plain PEG rules via
/// precedence climbing, renaming each level to `Name[k]`. Returns the map
/// from referenced name to canonical rule name (bare family names map to the
/// lowest precedence level) and the set of lowest-precedence rule names.
fn rewrite_precedence(rules: &mut Vec<NormRule>) -> Result<(HashMap<String, String>, HashSet<String>), GrammarError> {
	let mut by_name: HashMap<String, Vec<usize>> = HashMap::new();
	for (i, rule) in rules.iter().enumerate() {
		by_name.entry(rule.name.clone()).or_default().push(i);
	}

	let mut canonical = HashMap::new();
	let mut lowest_precedence = HashSet::new();

	for (name, members) in &by_name {
		if members.len() == 1 {
			canonical.insert(name.clone(), name.clone());
			continue;
		}

		// Ascending precedence order; duplicates were rejected during
		// normalisation, but a -1 level inside a family is one too.
		let mut by_precedence = BTreeMap::new();
		for &i in members {
			if by_precedence.insert(rules[i].precedence, i).is_some() {
				return Err(GrammarError::DuplicateRule { name: name.clone(), precedence: rules[i].precedence });
			}
		}
		let order: Vec<usize> = by_precedence.into_values().collect();
		let level_names: Vec<String> = order.iter().map(|&i| format!("{}[{}]", name, rules[i].precedence)).collect();

		for (k, &i) in order.iter().enumerate() {
			let curr_name = level_names[k].clone();
			// The highest level wraps around to the lowest, which is
			// usually a precedence-breaking pattern like parentheses.
			let next_name = level_names[(k + 1) % level_names.len()].clone();

			let self_refs = count_self_refs(&rules[i].expr, name);
			if self_refs >= 1 {
				let associativity = rules[i].associativity;
				let mut seen = 0;
				rewrite_self_refs(&mut rules[i].expr, associativity, &mut seen, self_refs, name, &curr_name, &next_name);
			}

			// All levels but the highest fail over to the next level up; the
			// rule's AST label moves onto the first alternative so that it
			// does not also label the fall-through.
			if k + 1 < order.len() {
				let body = std::mem::replace(&mut rules[i].expr, RuleExpr::Nothing);
				let body = match rules[i].label.take() {
					Some(l) => RuleExpr::Label { label: l, expr: body.into() },
					None => body,
				};
				rules[i].expr = RuleExpr::First(vec![body, RuleExpr::RuleRef(next_name)]);
			}

			rules[i].name = curr_name;
		}

		canonical.insert(name.clone(), level_names[0].clone());
		for level_name in &level_names {
			canonical.insert(level_name.clone(), level_name.clone());
		}
		lowest_precedence.insert(level_names[0].clone());
	}

	Ok((canonical, lowest_precedence))
}

fn count_self_refs(expr: &RuleExpr, name: &str) -> usize {
	match expr {
		RuleExpr::RuleRef(n) => (n == name) as usize,
		RuleExpr::Seq(subs) | RuleExpr::First(subs) => subs.iter().map(|s| count_self_refs(s, name)).sum(),
		RuleExpr::OneOrMore(sub) | RuleExpr::FollowedBy(sub) | RuleExpr::NotFollowedBy(sub) => {
			count_self_refs(sub, name)
		}
		RuleExpr::Label { expr, .. } => count_self_refs(expr, name),
		_ => 0,
	}
}

/// The standard precedence-climbing reference rewrites:
/// with two or more self-references, the leftmost (left-associative) or
/// rightmost (right-associative) operand stays at the current level and all
/// other operands climb to the next level; with exactly one self-reference,
/// the reference becomes `(Name[k] / Name[k+1])`.
fn rewrite_self_refs(
	expr: &mut RuleExpr,
	associativity: Option<Assoc>,
	seen: &mut usize,
	total: usize,
	name: &str,
	curr_name: &str,
	next_name: &str,
) {
	if *seen >= total {
		return;
	}
	match expr {
		RuleExpr::RuleRef(n) if n == name => {
			if total >= 2 {
				let keep_current = (associativity == Some(Assoc::Left) && *seen == 0)
					|| (associativity == Some(Assoc::Right) && *seen == total - 1);
				*n = if keep_current { curr_name.to_string() } else { next_name.to_string() };
			} else {
				*expr = RuleExpr::First(vec![
					RuleExpr::RuleRef(curr_name.to_string()),
					RuleExpr::RuleRef(next_name.to_string()),
				]);
			}
			*seen += 1;
		}
		RuleExpr::Seq(subs) | RuleExpr::First(subs) => {
			for sub in subs {
				rewrite_self_refs(sub, associativity, seen, total, name, curr_name, next_name);
			}
		}
		RuleExpr::OneOrMore(sub) | RuleExpr::FollowedBy(sub) | RuleExpr::NotFollowedBy(sub) => {
			rewrite_self_refs(sub, associativity, seen, total, name, curr_name, next_name);
		}
		RuleExpr::Label { expr, .. } => rewrite_self_refs(expr, associativity, seen, total, name, curr_name, next_name),
		_ => {}
	}
}

/// Lowers an expression tree into the pool, interning bottom-up by a
/// canonical shape key over the operator, interned sub-clause ids, per-slot
/// labels and literal payloads.
fn lower(expr: &RuleExpr, pool: &mut Pool, canonical: &HashMap<String, String>) -> Result<PreSub, GrammarError> {
	let sub = match expr {
		RuleExpr::Label { label, expr } => {
			let mut sub = lower(expr, pool, canonical)?;
			sub.label = Some(label.clone());
			return Ok(sub);
		}
		RuleExpr::RuleRef(name) => {
			let canon = canonical.get(name).ok_or_else(|| GrammarError::UnknownRule(name.clone()))?.clone();
			let idx = pool.intern(format!("ref:{canon}"), || PreClause { kind: PreKind::Ref(canon), sub: vec![] });
			PreSub { idx, label: None }
		}
		RuleExpr::CharSet(set) => {
			let idx = pool.intern(format!("t:{set}"), || PreClause { kind: PreKind::CharSet(set.clone()), sub: vec![] });
			PreSub { idx, label: None }
		}
		RuleExpr::CharSeq { text, ignore_case } => {
			let idx = pool.intern(format!("s:{ignore_case}:{text}"), || PreClause {
				kind: PreKind::CharSeq { text: text.clone(), ignore_case: *ignore_case },
				sub: vec![],
			});
			PreSub { idx, label: None }
		}
		RuleExpr::Nothing => {
			let idx = pool.intern("nothing".to_string(), || PreClause { kind: PreKind::Nothing, sub: vec![] });
			PreSub { idx, label: None }
		}
		RuleExpr::Start => {
			let idx = pool.intern("start".to_string(), || PreClause { kind: PreKind::Start, sub: vec![] });
			PreSub { idx, label: None }
		}
		RuleExpr::Seq(subs) => lower_composite("seq", PreKind::Seq, subs, pool, canonical)?,
		RuleExpr::First(subs) => lower_composite("first", PreKind::First, subs, pool, canonical)?,
		RuleExpr::OneOrMore(sub) => {
			lower_composite("oom", PreKind::OneOrMore, std::slice::from_ref(sub), pool, canonical)?
		}
		RuleExpr::FollowedBy(sub) => {
			lower_composite("fby", PreKind::FollowedBy, std::slice::from_ref(sub), pool, canonical)?
		}
		RuleExpr::NotFollowedBy(sub) => {
			lower_composite("nfby", PreKind::NotFollowedBy, std::slice::from_ref(sub), pool, canonical)?
		}
	};
	Ok(sub)
}

fn lower_composite(
	tag: &str,
	kind: PreKind,
	subs: &[impl std::borrow::Borrow<RuleExpr>],
	pool: &mut Pool,
	canonical: &HashMap<String, String>,
) -> Result<PreSub, GrammarError> {
	let mut lowered = Vec::with_capacity(subs.len());
	for sub in subs {
		lowered.push(lower(sub.borrow(), pool, canonical)?);
	}
	let key = {
		let mut key = format!("{tag}(");
		for (i, s) in lowered.iter().enumerate() {
			if i > 0 {
				key.push(',');
			}
			if let Some(label) = &s.label {
				key.push_str(label);
				key.push(':');
			}
			key.push_str(&s.idx.to_string());
		}
		key.push(')');
		key
	};
	let idx = pool.intern(key, || PreClause { kind, sub: lowered });
	Ok(PreSub { idx, label: None })
}

/// Replaces every reference slot with the referenced rule's top-level clause,
/// following alias chains (`A <- B`), detecting reference cycles, and
/// inheriting the target rule's AST label into unlabelled slots.
fn resolve_refs(pool: &mut Pool, rules: &[NormRule], rule_tops: &mut [PreSub]) -> Result<(), GrammarError> {
	let rule_info: HashMap<&str, (usize, Option<&String>)> = rules
		.iter()
		.zip(rule_tops.iter())
		.map(|(rule, top)| (rule.name.as_str(), (top.idx, rule.label.as_ref())))
		.collect();

	let resolve = |start: &str| -> Result<(usize, Option<String>), GrammarError> {
		let mut name: String = start.to_string();
		let mut visited = HashSet::new();
		loop {
			if !visited.insert(name.clone()) {
				return Err(GrammarError::RefCycle(name));
			}
			let &(top, label) = rule_info.get(name.as_str()).ok_or_else(|| GrammarError::UnknownRule(name.clone()))?;
			match &pool.clauses[top].kind {
				PreKind::Ref(next) => name = next.clone(),
				_ => return Ok((top, label.cloned())),
			}
		}
	};

	let mut resolutions: HashMap<usize, (usize, Option<String>)> = HashMap::new();
	for (idx, clause) in pool.clauses.iter().enumerate() {
		if let PreKind::Ref(name) = &clause.kind {
			resolutions.insert(idx, resolve(name)?);
		}
	}

	for clause in &mut pool.clauses {
		for sub in &mut clause.sub {
			if let Some((target, label)) = resolutions.get(&sub.idx) {
				sub.idx = *target;
				if sub.label.is_none() {
					sub.label = label.clone();
				}
			}
		}
	}
	for top in rule_tops.iter_mut() {
		if let Some((target, label)) = resolutions.get(&top.idx) {
			top.idx = *target;
			if top.label.is_none() {
				top.label = label.clone();
			}
		}
	}
	Ok(())
}

/// Orders the reachable clauses bottom-up: terminals first, then a postorder
/// walk from the toplevel-only clauses, the lowest-precedence clauses and the
/// cycle-head clauses, so that every clause sorts after its sub-clauses
/// except across cycle back-edges.
fn topo_order(pool: &Pool, rule_tops: &[PreSub], lowest_roots: &[usize]) -> Vec<usize> {
	let mut reachable = vec![];
	let mut visited = HashSet::new();
	for top in rule_tops {
		postorder(pool, top.idx, &mut visited, &mut reachable);
	}

	let mut toplevel: Vec<usize> = {
		let mut is_sub = HashSet::new();
		for &idx in &reachable {
			for sub in &pool.clauses[idx].sub {
				is_sub.insert(sub.idx);
			}
		}
		reachable.iter().copied().filter(|idx| !is_sub.contains(idx)).collect()
	};

	let cycle_heads = {
		let mut heads = vec![];
		let mut discovered = HashSet::new();
		let mut finished = HashSet::new();
		for &root in toplevel.iter().chain(rule_tops.iter().map(|t| &t.idx)) {
			find_cycle_heads(pool, root, &mut discovered, &mut finished, &mut heads);
		}
		heads
	};
	toplevel.extend_from_slice(lowest_roots);
	toplevel.extend_from_slice(&cycle_heads);

	// Terminals take the lowest indices so the worklist drains them first.
	let mut order: Vec<usize> = reachable.iter().copied().filter(|&i| is_terminal(&pool.clauses[i].kind)).collect();
	let mut visited: HashSet<usize> = order.iter().copied().collect();
	for root in toplevel.into_iter().chain(rule_tops.iter().map(|t| t.idx)) {
		postorder(pool, root, &mut visited, &mut order);
	}
	order
}

fn is_terminal(kind: &PreKind) -> bool {
	matches!(kind, PreKind::CharSet(_) | PreKind::CharSeq { .. } | PreKind::Nothing | PreKind::Start)
}

fn postorder(pool: &Pool, idx: usize, visited: &mut HashSet<usize>, out: &mut Vec<usize>) {
	if !visited.insert(idx) {
		return;
	}
	for sub_idx in pool.clauses[idx].sub.iter().map(|s| s.idx).collect::<Vec<_>>() {
		postorder(pool, sub_idx, visited, out);
	}
	out.push(idx);
}

fn find_cycle_heads(
	pool: &Pool,
	idx: usize,
	discovered: &mut HashSet<usize>,
	finished: &mut HashSet<usize>,
	heads: &mut Vec<usize>,
) {
	discovered.insert(idx);
	for sub in &pool.clauses[idx].sub {
		if discovered.contains(&sub.idx) {
			if !heads.contains(&sub.idx) {
				heads.push(sub.idx);
			}
		} else if !finished.contains(&sub.idx) {
			find_cycle_heads(pool, sub.idx, discovered, finished, heads);
		}
	}
	discovered.remove(&idx);
	finished.insert(idx);
}

/// One bottom-up pass; cycle back-edges read the conservative default.
fn determine_can_match_zero(clauses: &mut [Clause]) -> Result<(), GrammarError> {
	for i in 0..clauses.len() {
		let can_match_zero = match &clauses[i].kind {
			ClauseKind::Nothing | ClauseKind::Start => true,
			ClauseKind::CharSeq { text, .. } => text.is_empty(),
			ClauseKind::CharSet(_) => false,
			ClauseKind::Seq => clauses[i].sub.iter().all(|s| clauses[s.idx].can_match_zero),
			ClauseKind::First => {
				let subs = &clauses[i].sub;
				let mut any = false;
				for (k, sub) in subs.iter().enumerate() {
					if clauses[sub.idx].can_match_zero {
						if k + 1 < subs.len() {
							return Err(GrammarError::DeadAlternative(render_clause(clauses, i)));
						}
						any = true;
					}
				}
				any
			}
			ClauseKind::OneOrMore | ClauseKind::FollowedBy => clauses[clauses[i].sub[0].idx].can_match_zero,
			ClauseKind::NotFollowedBy => {
				if clauses[clauses[i].sub[0].idx].can_match_zero {
					return Err(GrammarError::NotFollowedByZeroLength(render_clause(clauses, i)));
				}
				true
			}
		};
		clauses[i].can_match_zero = can_match_zero;
	}
	Ok(())
}

fn setup_seed_parents(clauses: &mut [Clause]) {
	for i in 0..clauses.len() {
		// For a sequence, only the sub-clauses up to and including the first
		// one that must consume input can start a match of the parent.
		let seeds: Vec<usize> = match clauses[i].kind {
			ClauseKind::Seq => {
				let mut seeds = vec![];
				for sub in &clauses[i].sub {
					seeds.push(sub.idx);
					if !clauses[sub.idx].can_match_zero {
						break;
					}
				}
				seeds
			}
			_ => clauses[i].sub.iter().map(|s| s.idx).collect(),
		};
		for seed in seeds {
			if !clauses[seed].seed_parents.contains(&i) {
				clauses[seed].seed_parents.push(i);
			}
		}
	}
}
