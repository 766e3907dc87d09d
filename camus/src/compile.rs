// Compiles a resolved `RuleSet` into an `AbstractPipeline`.
//
// Per rule: the query formula is normalized to DNF, negation on each
// literal is resolved to an equivalent non-negated atom (or, for negated
// equality, a pair of alternative atoms), and the atoms of each resulting
// path are grouped by field and combined into one `FieldMatch` per field
// a `ConstraintSet` narrows ranges, `disjoint` prunes contradictions. Each
// path is then threaded through the per-field transition tables, reusing
// a table's existing state for an already-seen (state_in, match) pair so
// that rules sharing a prefix of constraints share pipeline states.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::constraint::ConstraintSet;
use crate::error::{Diagnostics, Level};
use crate::field::QueryField;
use crate::formula::{Formula, Literal};
use crate::pipeline::{AbstractPipeline, AbstractTable, FieldMatch, Terminal, Transition};
use crate::predicate::AtomicPredicate;
use crate::rule::{Action, RuleSet};
use crate::value::Const;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// A single rule's action list names both a forwarding port and a
    /// non-forwarding action.
    ActionMerge,
    /// A construct this compiler doesn't attempt to lower: negating a
    /// non-numeric equality, negating an `Lpm`, or combining an `Lpm`
    /// with anything else on the same field within one conjunct.
    Unsupported(String),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ActionMerge => write!(f, "cannot merge fwd action with other action types"),
            Self::Unsupported(msg) => write!(f, "unsupported construct: {msg}"),
        }
    }
}

impl std::error::Error for CompileError {}

/// Ternary entries count down from this value (spec.md §4.2 "Tie-breaking":
/// "counting down from an initial large value"; §5 and §9 say the same).
/// Starting high rather than at zero keeps every emitted priority a
/// plausible non-negative ordering value for a real target table.
const INITIAL_PRIORITY: i64 = i64::MAX;

/// Settings that affect compilation but aren't part of the rule set
/// itself. `default_action` is consulted during target lowering, not
/// here: an empty terminal action list is a perfectly ordinary abstract
/// pipeline state.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub default_action: Option<String>,
}

pub fn compile(rules: &RuleSet, options: &CompileOptions) -> Result<AbstractPipeline, CompileError> {
    compile_with_diagnostics(rules, options).map(|(pipeline, _)| pipeline)
}

/// Same as [`compile`], but also returns the non-fatal diagnostics
/// accumulated along the way (spec.md's compiler is "total" apart from the
/// named hard errors; these are informational/warning-level notes about
/// things like a dropped unsatisfiable conjunct or an `Lpm` atom that can
/// never narrow via `ConstraintSet`). See SPEC_FULL.md's ambient-stack
/// section and `p4::check::Diagnostics`, which this is grounded on.
pub fn compile_with_diagnostics(
    rules: &RuleSet,
    options: &CompileOptions,
) -> Result<(AbstractPipeline, Diagnostics), CompileError> {
    Compiler::compile(rules, options)
}

struct Compiler {
    field_order: Vec<QueryField>,
    next_state: u16,
    tables: Vec<(QueryField, Vec<Transition>)>,
    terminal: BTreeMap<u16, Vec<Action>>,
    priority_counter: i64,
    diagnostics: Diagnostics,
    lpm_noted: BTreeSet<QueryField>,
}

impl Compiler {
    fn compile(
        rule_set: &RuleSet,
        options: &CompileOptions,
    ) -> Result<(AbstractPipeline, Diagnostics), CompileError> {
        let _ = options;

        for rule in &rule_set.rules {
            let has_fwd = rule
                .actions
                .iter()
                .any(|a| matches!(a, Action::ForwardPort(_)));
            let has_other = rule
                .actions
                .iter()
                .any(|a| matches!(a, Action::UserAction(..)));
            if has_fwd && has_other {
                return Err(CompileError::ActionMerge);
            }
        }

        let mut fields = BTreeSet::new();
        for rule in &rule_set.rules {
            collect_fields(&rule.formula, &mut fields);
        }
        let field_order: Vec<QueryField> = fields.into_iter().collect();

        let mut compiler = Compiler {
            tables: field_order.iter().cloned().map(|f| (f, Vec::new())).collect(),
            field_order,
            next_state: 1,
            terminal: BTreeMap::new(),
            priority_counter: INITIAL_PRIORITY,
            diagnostics: Diagnostics::new(),
            lpm_noted: BTreeSet::new(),
        };

        for rule in &rule_set.rules {
            for conjunct in rule.formula.to_dnf() {
                for path in expand_conjunct(&conjunct)? {
                    compiler.thread_path(&path, &rule.actions);
                }
            }
        }

        let diagnostics = std::mem::take(&mut compiler.diagnostics);
        Ok((compiler.into_pipeline(), diagnostics))
    }

    fn thread_path(&mut self, path: &[AtomicPredicate], actions: &[Action]) {
        let field_order = self.field_order.clone();
        let mut state = 0u16;
        for field in &field_order {
            let group: Vec<AtomicPredicate> = path
                .iter()
                .filter(|a| a.field() == field)
                .cloned()
                .collect();
            let matc = match combine_field_atoms(&group) {
                Some(m) => m,
                None => {
                    // contradictory accumulation: path is unsatisfiable.
                    self.diagnostics.push(
                        Level::Warning,
                        format!(
                            "dropped an unsatisfiable conjunct: contradictory constraints on field {field}"
                        ),
                    );
                    return;
                }
            };
            if matches!(matc, FieldMatch::Lpm(..)) && self.lpm_noted.insert(field.clone()) {
                self.diagnostics.push(
                    Level::Info,
                    format!(
                        "field {field} is matched by Lpm; Lpm atoms do not narrow via ConstraintSet"
                    ),
                );
            }
            state = self.transition(field, state, matc);
        }
        let entry = self.terminal.entry(state).or_default();
        for a in actions {
            if !entry.contains(a) {
                entry.push(a.clone());
            }
        }
    }

    fn transition(&mut self, field: &QueryField, state_in: u16, matc: FieldMatch) -> u16 {
        let idx = self
            .tables
            .iter()
            .position(|(f, _)| f == field)
            .expect("field_order covers every table");
        if let Some(existing) = self.tables[idx]
            .1
            .iter()
            .find(|t| t.state_in == state_in && t.matc == matc)
        {
            return existing.state_out;
        }
        let state_out = self.next_state;
        self.next_state += 1;
        let priority = match matc {
            FieldMatch::Lt(_) | FieldMatch::Gt(_) | FieldMatch::Range(..) => {
                let priority = self.priority_counter;
                self.priority_counter -= 1;
                Some(priority)
            }
            FieldMatch::Wildcard | FieldMatch::Eq(_) | FieldMatch::Lpm(..) => None,
        };
        self.tables[idx].1.push(Transition {
            state_in,
            matc,
            state_out,
            priority,
        });
        state_out
    }

    fn into_pipeline(self) -> AbstractPipeline {
        let mut tables: Vec<AbstractTable> = self
            .tables
            .into_iter()
            .map(|(field, entries)| AbstractTable::Transitions { field, entries })
            .collect();
        let entries: Vec<Terminal> = self
            .terminal
            .into_iter()
            .map(|(state, actions)| Terminal { state, actions })
            .collect();
        tables.push(AbstractTable::Terminal { entries });
        AbstractPipeline { tables }
    }
}

fn collect_fields(f: &Formula<AtomicPredicate>, out: &mut BTreeSet<QueryField>) {
    match f {
        Formula::Atom(p) => {
            out.insert(p.field().clone());
        }
        Formula::Not(inner) => collect_fields(inner, out),
        Formula::And(l, r) | Formula::Or(l, r) => {
            collect_fields(l, out);
            collect_fields(r, out);
        }
    }
}

/// Resolves one (possibly negated) literal into the non-negated atom(s)
/// that express it. A negated `Lt`/`Gt` has a direct non-negated
/// equivalent; a negated numeric `Eq` splits into two alternative atoms
/// (the path branches); anything else negation can't restate this way is
/// `Unsupported`.
fn resolve_literal(lit: &Literal<AtomicPredicate>) -> Result<Vec<Vec<AtomicPredicate>>, CompileError> {
    if !lit.negated {
        return Ok(vec![vec![lit.atom.clone()]]);
    }
    match &lit.atom {
        AtomicPredicate::Lt(field, c) => {
            let x = c.to_int().expect("Lt is only ever built over a Number");
            let gt = AtomicPredicate::gt(field.clone(), Const::Number(x - 1))
                .expect("Number is always a valid Gt operand");
            Ok(vec![vec![gt]])
        }
        AtomicPredicate::Gt(field, c) => {
            let x = c.to_int().expect("Gt is only ever built over a Number");
            let lt = AtomicPredicate::lt(field.clone(), Const::Number(x + 1))
                .expect("Number is always a valid Lt operand");
            Ok(vec![vec![lt]])
        }
        AtomicPredicate::Eq(field, c) => match c.to_int() {
            Ok(x) => {
                let lt = AtomicPredicate::lt(field.clone(), Const::Number(x))
                    .expect("Number is always a valid Lt operand");
                let gt = AtomicPredicate::gt(field.clone(), Const::Number(x))
                    .expect("Number is always a valid Gt operand");
                Ok(vec![vec![lt], vec![gt]])
            }
            Err(_) => Err(CompileError::Unsupported(format!(
                "negated equality on a non-numeric constant ({field})"
            ))),
        },
        AtomicPredicate::Lpm(field, ..) => Err(CompileError::Unsupported(format!(
            "negated Lpm match ({field})"
        ))),
    }
}

/// Cross-products a conjunct's literals' alternatives into the set of
/// fully-resolved, non-negated atom paths it expands to.
fn expand_conjunct(conjunct: &[Literal<AtomicPredicate>]) -> Result<Vec<Vec<AtomicPredicate>>, CompileError> {
    let mut paths: Vec<Vec<AtomicPredicate>> = vec![Vec::new()];
    for lit in conjunct {
        let alts = resolve_literal(lit)?;
        let mut next = Vec::with_capacity(paths.len() * alts.len());
        for p in &paths {
            for alt in &alts {
                let mut merged = p.clone();
                merged.extend(alt.iter().cloned());
                next.push(merged);
            }
        }
        paths = next;
    }
    Ok(paths)
}

/// Combines every atom a path places on one field into the single
/// `FieldMatch` that field's transition table should use. `None` means
/// the atoms contradict (e.g. `Gt(10)` and `Lt(5)`): the whole path is
/// unsatisfiable and should be dropped.
fn combine_field_atoms(atoms: &[AtomicPredicate]) -> Option<FieldMatch> {
    for i in 0..atoms.len() {
        for j in (i + 1)..atoms.len() {
            if atoms[i].disjoint(&atoms[j]) {
                return None;
            }
        }
    }

    let lpm: Vec<&AtomicPredicate> = atoms
        .iter()
        .filter(|a| matches!(a, AtomicPredicate::Lpm(..)))
        .collect();
    let rest: Vec<&AtomicPredicate> = atoms
        .iter()
        .filter(|a| !matches!(a, AtomicPredicate::Lpm(..)))
        .collect();

    if !lpm.is_empty() {
        if !rest.is_empty() {
            return None;
        }
        let AtomicPredicate::Lpm(_, addr, len) = lpm[0] else {
            unreachable!("filtered to Lpm above")
        };
        return Some(FieldMatch::Lpm(addr.clone(), len.clone()));
    }

    if rest.is_empty() {
        return Some(FieldMatch::Wildcard);
    }

    if let Some(AtomicPredicate::Eq(_, c)) = rest.iter().find(|a| matches!(a, AtomicPredicate::Eq(..))) {
        // Already confirmed pairwise non-disjoint with any Lt/Gt sharing
        // this field, so the equality alone is the combined constraint.
        return Some(FieldMatch::Eq(c.clone()));
    }

    let mut cs = ConstraintSet::new();
    for a in &rest {
        cs.add_constraint(a);
    }
    let range = cs.range(rest[0].field()).cloned().unwrap_or_default();
    match (range.lo, range.hi) {
        (Some(lo), Some(hi)) if lo > hi => None,
        (Some(lo), Some(hi)) => Some(FieldMatch::Range(Const::Number(lo), Const::Number(hi))),
        (Some(lo), None) => Some(FieldMatch::Gt(Const::Number(lo - 1))),
        (None, Some(hi)) => Some(FieldMatch::Lt(Const::Number(hi + 1))),
        (None, None) => Some(FieldMatch::Wildcard),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use std::sync::Arc;

    fn compile_src(src: &str) -> Result<AbstractPipeline, CompileError> {
        let lines: Vec<&str> = src.lines().collect();
        let lxr = Lexer::new(lines.clone(), Arc::new("t".into()));
        let mut p = Parser::new(lxr);
        let ast = p.run().unwrap();
        let rules = crate::rule::resolve(&ast, &lines).unwrap();
        compile(&rules, &CompileOptions::default())
    }

    fn compile_src_diags(src: &str) -> Diagnostics {
        let lines: Vec<&str> = src.lines().collect();
        let lxr = Lexer::new(lines.clone(), Arc::new("t".into()));
        let mut p = Parser::new(lxr);
        let ast = p.run().unwrap();
        let rules = crate::rule::resolve(&ast, &lines).unwrap();
        compile_with_diagnostics(&rules, &CompileOptions::default())
            .unwrap()
            .1
    }

    fn only_terminal(p: &AbstractPipeline) -> &Vec<Terminal> {
        p.terminal().unwrap()
    }

    #[test]
    fn single_eq_rule_produces_one_transition_and_one_terminal() {
        let p = compile_src("ipv4.dstAddr = 10.0.0.1 : fwd(3) ;").unwrap();
        assert_eq!(p.tables.len(), 2); // one field table + terminal
        let AbstractTable::Transitions { entries, .. } = &p.tables[0] else {
            panic!("expected a transition table first")
        };
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].matc, FieldMatch::Eq(Const::Ipv4(0x0a00_0001)));
        let term = only_terminal(&p);
        assert_eq!(term.len(), 1);
        assert_eq!(term[0].actions, vec![Action::ForwardPort(3)]);
    }

    #[test]
    fn range_conjunction_combines_into_one_range_match() {
        let p = compile_src("tcp.dport > 1023 && tcp.dport < 2000 : fwd(1) ;").unwrap();
        let AbstractTable::Transitions { entries, .. } = &p.tables[0] else {
            panic!("expected a transition table")
        };
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].matc,
            FieldMatch::Range(Const::Number(1024), Const::Number(1999))
        );
        assert!(entries[0].priority.is_some());
    }

    #[test]
    fn ternary_priorities_count_down_from_a_large_constant() {
        let p = compile_src(
            "tcp.dport < 10 : fwd(1) ;\n\
             tcp.dport > 20 : fwd(2) ;",
        )
        .unwrap();
        let AbstractTable::Transitions { entries, .. } = &p.tables[0] else {
            panic!("expected a transition table")
        };
        assert_eq!(entries.len(), 2);
        // Every emitted priority is a large, non-negative ordering value,
        // and the earlier rule keeps the numerically higher priority.
        for e in entries {
            assert!(e.priority.unwrap() > 0);
        }
        assert!(entries[0].priority.unwrap() > entries[1].priority.unwrap());
        assert_eq!(entries[0].priority, Some(INITIAL_PRIORITY));
    }

    #[test]
    fn two_same_direction_gt_atoms_keep_the_tighter_bound() {
        let p = compile_src("tcp.dport > 2000 && tcp.dport > 1023 : fwd(1) ;").unwrap();
        let AbstractTable::Transitions { entries, .. } = &p.tables[0] else {
            panic!("expected a transition table")
        };
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].matc, FieldMatch::Gt(Const::Number(2000)));
    }

    #[test]
    fn two_same_direction_lt_atoms_keep_the_tighter_bound() {
        let p = compile_src("tcp.dport < 50 && tcp.dport < 2000 : fwd(1) ;").unwrap();
        let AbstractTable::Transitions { entries, .. } = &p.tables[0] else {
            panic!("expected a transition table")
        };
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].matc, FieldMatch::Lt(Const::Number(50)));
    }

    #[test]
    fn lpm_rule_produces_lpm_match() {
        let p = compile_src("ipv4.dstAddr = 10.0.0.0 / 8 : fwd(2) ;").unwrap();
        let AbstractTable::Transitions { entries, .. } = &p.tables[0] else {
            panic!("expected a transition table")
        };
        assert_eq!(
            entries[0].matc,
            FieldMatch::Lpm(Const::Ipv4(0x0a00_0000), Const::Number(8))
        );
    }

    #[test]
    fn negated_numeric_equality_splits_into_two_paths() {
        let p = compile_src("!ipv4.proto = 6 : fwd(1) ;").unwrap();
        let AbstractTable::Transitions { entries, .. } = &p.tables[0] else {
            panic!("expected a transition table")
        };
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|t| t.matc == FieldMatch::Lt(Const::Number(6))));
        assert!(entries.iter().any(|t| t.matc == FieldMatch::Gt(Const::Number(6))));
        assert_eq!(only_terminal(&p).len(), 2);
    }

    #[test]
    fn contradictory_conjunction_compiles_to_no_terminal_entries() {
        let p = compile_src("ipv4.proto = 6 && ipv4.proto = 17 : fwd(1) ;").unwrap();
        assert!(only_terminal(&p).is_empty());
    }

    #[test]
    fn fwd_and_custom_action_in_one_rule_is_a_hard_error() {
        let err = compile_src("ipv4.proto = 6 : fwd(1), custom(2) ;").unwrap_err();
        assert_eq!(err, CompileError::ActionMerge);
    }

    #[test]
    fn two_rules_on_same_field_share_the_transition_table_state() {
        let p = compile_src(
            "ipv4.proto = 6 : fwd(1) ;\n\
             ipv4.proto = 6 : fwd(2) ;",
        )
        .unwrap();
        let AbstractTable::Transitions { entries, .. } = &p.tables[0] else {
            panic!("expected a transition table")
        };
        // Both rules hit the same (state_in, match) pair, so only one
        // transition is emitted and both actions land on its terminal.
        assert_eq!(entries.len(), 1);
        let term = only_terminal(&p);
        assert_eq!(term.len(), 1);
        assert_eq!(
            term[0].actions,
            vec![Action::ForwardPort(1), Action::ForwardPort(2)]
        );
    }

    #[test]
    fn contradictory_conjunction_emits_a_warning_diagnostic() {
        let diags = compile_src_diags("ipv4.proto = 6 && ipv4.proto = 17 : fwd(1) ;");
        assert!(diags
            .iter()
            .any(|d| d.level == crate::error::Level::Warning
                && d.message.contains("contradictory")));
    }

    #[test]
    fn lpm_rule_emits_an_info_diagnostic_once_per_field() {
        let diags = compile_src_diags(
            "ipv4.dstAddr = 10.0.0.0 / 8 : fwd(1) ;\n\
             ipv4.dstAddr = 192.168.0.0 / 16 : fwd(2) ;",
        );
        let info: Vec<_> = diags
            .iter()
            .filter(|d| d.level == crate::error::Level::Info)
            .collect();
        assert_eq!(info.len(), 1);
        assert!(info[0].message.contains("Lpm"));
    }

    #[test]
    fn ordinary_rule_has_no_diagnostics() {
        let diags = compile_src_diags("ipv4.dstAddr = 10.0.0.1 : fwd(3) ;");
        assert!(diags.is_empty());
    }
}
