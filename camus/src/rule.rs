// Lowers the surface AST to the core's `Rule`/`Action` model: resolves
// LHS shapes to `QueryField`s, builds the atomic-predicate formula for
// each rule's query, and validates action-call shapes.

use std::collections::HashMap;

use crate::ast::{self, Arg, ConstLit, Lhs, RelOp};
use crate::error::SemanticError;
use crate::field::QueryField;
use crate::formula::Formula;
use crate::lexer::Token;
use crate::predicate::AtomicPredicate;
use crate::value::Const;

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    ForwardPort(u32),
    UserAction(String, Vec<i128>),
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub formula: Formula<AtomicPredicate>,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub rules: Vec<Rule>,
}

/// Assigns a stable field ordering and a value width to every
/// `(header, field)` pair referenced across a rule set. The surface
/// grammar carries no header schema, so ordering falls out of first
/// appearance (source order) and width out of the first constant
/// compared against the field — see DESIGN.md.
#[derive(Debug, Default)]
struct FieldCatalog {
    priority: HashMap<(String, String), i64>,
    width: HashMap<(String, String), u16>,
    next: i64,
}

impl FieldCatalog {
    fn resolve(&mut self, header: &str, field: &str, width_hint: u16) -> QueryField {
        let key = (header.to_string(), field.to_string());
        let priority = *self.priority.entry(key.clone()).or_insert_with(|| {
            let p = self.next;
            self.next += 1;
            p
        });
        let width = *self.width.entry(key).or_insert(width_hint);
        QueryField::new(header, field, priority, width)
    }
}

fn const_width_hint(c: &Const) -> u16 {
    match c {
        Const::Number(n) => {
            if *n >= 0 && *n <= i128::from(u16::MAX) {
                16
            } else {
                32
            }
        }
        Const::Ipv4(_) => 32,
        Const::Ipv6(..) => 128,
        Const::Mac(_) => 48,
        Const::String(s) => (s.len() as u16).saturating_mul(8).max(8),
    }
}

fn lower_const(c: &ConstLit) -> Const {
    match c {
        ConstLit::Number(n) => Const::Number(*n),
        ConstLit::Ipv4(a) => Const::Ipv4(*a),
        ConstLit::Ipv6(a, b, c, d) => Const::Ipv6(*a, *b, *c, *d),
        ConstLit::Mac(m) => Const::Mac(*m),
        ConstLit::String(s) => Const::String(s.clone()),
    }
}

struct Resolver<'a> {
    fields: FieldCatalog,
    lines: &'a [&'a str],
    errors: Vec<SemanticError>,
}

impl<'a> Resolver<'a> {
    fn source_line(&self, at: &Token) -> String {
        self.lines.get(at.line).copied().unwrap_or("").to_string()
    }

    fn lhs_field(&mut self, lhs: &Lhs, width_hint: u16) -> Option<QueryField> {
        match lhs {
            Lhs::Field { header, field, .. } => {
                Some(self.fields.resolve(header, field, width_hint))
            }
            Lhs::Call { name, args, at } => {
                if name == "inc" {
                    self.errors.push(SemanticError {
                        source: self.source_line(at),
                        at: at.clone(),
                        message: "'inc' is reserved and cannot be used as an lvalue".into(),
                    });
                    return None;
                }
                match args.first() {
                    Some(Arg::Ident(field_name)) => {
                        Some(self.fields.resolve("stful_meta", field_name, width_hint))
                    }
                    _ => {
                        self.errors.push(SemanticError {
                            source: self.source_line(at),
                            at: at.clone(),
                            message: format!(
                                "'{name}' as an lvalue must name a field as its first argument"
                            ),
                        });
                        None
                    }
                }
            }
        }
    }

    fn expr(&mut self, e: &ast::Expr) -> Option<Formula<AtomicPredicate>> {
        match e {
            ast::Expr::And(l, r) => {
                let (l, r) = (self.expr(l)?, self.expr(r)?);
                Some(l.and(r))
            }
            ast::Expr::Or(l, r) => {
                let (l, r) = (self.expr(l)?, self.expr(r)?);
                Some(l.or(r))
            }
            ast::Expr::Rel {
                negated,
                lhs,
                op,
                rhs,
                at,
            } => {
                let rhs = lower_const(rhs);
                let field = self.lhs_field(lhs, const_width_hint(&rhs))?;
                let pred = match op {
                    RelOp::Eq => Ok(AtomicPredicate::eq(field, rhs)),
                    RelOp::Lt => AtomicPredicate::lt(field, rhs),
                    RelOp::Gt => AtomicPredicate::gt(field, rhs),
                };
                let pred = match pred {
                    Ok(p) => p,
                    Err(e) => {
                        self.errors.push(SemanticError {
                            source: self.source_line(at),
                            at: at.clone(),
                            message: e.to_string(),
                        });
                        return None;
                    }
                };
                let f = Formula::atom(pred);
                Some(if *negated { f.not() } else { f })
            }
            ast::Expr::Lpm {
                negated,
                lhs,
                addr,
                prefix_len,
                at,
            } => {
                let addr = lower_const(addr);
                let prefix_len = lower_const(prefix_len);
                let field = self.lhs_field(lhs, const_width_hint(&addr))?;
                let pred = match AtomicPredicate::lpm(field, addr, prefix_len) {
                    Ok(p) => p,
                    Err(e) => {
                        self.errors.push(SemanticError {
                            source: self.source_line(at),
                            at: at.clone(),
                            message: e.to_string(),
                        });
                        return None;
                    }
                };
                let f = Formula::atom(pred);
                Some(if *negated { f.not() } else { f })
            }
        }
    }

    fn action(&mut self, call: &ast::ActionCall) -> Option<Action> {
        let numeric_args: Option<Vec<i128>> = call
            .args
            .iter()
            .map(|a| match a {
                Arg::Const(ConstLit::Number(n)) => Some(*n),
                _ => None,
            })
            .collect();

        if call.name == "fwd" {
            return match numeric_args.as_deref() {
                Some([port]) if *port >= 0 => Some(Action::ForwardPort(*port as u32)),
                _ => {
                    self.errors.push(SemanticError {
                        source: self.source_line(&call.at),
                        at: call.at.clone(),
                        message: "fwd(...) requires a single non-negative numeric port argument"
                            .into(),
                    });
                    None
                }
            };
        }

        match numeric_args {
            Some(args) => Some(Action::UserAction(call.name.clone(), args)),
            None => {
                self.errors.push(SemanticError {
                    source: self.source_line(&call.at),
                    at: call.at.clone(),
                    message: format!(
                        "action '{}' requires all-numeric-literal arguments",
                        call.name
                    ),
                });
                None
            }
        }
    }
}

pub fn resolve(ast: &ast::RuleList, lines: &[&str]) -> Result<RuleSet, Vec<SemanticError>> {
    let mut r = Resolver {
        fields: FieldCatalog::default(),
        lines,
        errors: Vec::new(),
    };
    let mut rules = Vec::new();
    for rule in &ast.rules {
        let formula = r.expr(&rule.query);
        let actions: Option<Vec<Action>> =
            rule.actions.iter().map(|c| r.action(c)).collect();
        if let (Some(formula), Some(actions)) = (formula, actions) {
            rules.push(Rule { formula, actions });
        }
    }
    if r.errors.is_empty() {
        Ok(RuleSet { rules })
    } else {
        Err(r.errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use std::sync::Arc;

    fn resolve_src(src: &str) -> Result<RuleSet, Vec<SemanticError>> {
        let lines: Vec<&str> = src.lines().collect();
        let lxr = Lexer::new(lines.clone(), Arc::new("t".into()));
        let mut p = Parser::new(lxr);
        let ast = p.run().unwrap();
        resolve(&ast, &lines)
    }

    #[test]
    fn fwd_resolves_to_forward_port() {
        let rs = resolve_src("ipv4.dstAddr = 10.0.0.1 : fwd(3) ;").unwrap();
        assert_eq!(rs.rules[0].actions, vec![Action::ForwardPort(3)]);
    }

    #[test]
    fn custom_action_resolves_with_args() {
        let rs = resolve_src("ipv4.proto = 6 : custom_action(7, 8) ;").unwrap();
        assert_eq!(
            rs.rules[0].actions,
            vec![Action::UserAction("custom_action".into(), vec![7, 8])]
        );
    }

    #[test]
    fn inc_as_lvalue_is_rejected() {
        let err = resolve_src("inc(x) = 1 : fwd(1) ;").unwrap_err();
        assert!(err[0].message.contains("inc"));
    }

    #[test]
    fn lt_with_string_is_rejected() {
        let err = resolve_src("ipv4.proto < \"a\" : fwd(1) ;").unwrap_err();
        assert!(err[0].message.contains("numeric"));
    }

    #[test]
    fn field_priorities_follow_first_appearance() {
        let rs = resolve_src(
            "ipv4.proto = 6 : fwd(1) ;\n\
             ipv4.dstAddr = 10.0.0.1 : fwd(2) ;\n\
             ipv4.proto = 17 : fwd(3) ;",
        )
        .unwrap();
        let field_of = |r: &Rule| match &r.formula {
            Formula::Atom(p) => p.field().clone(),
            _ => unreachable!(),
        };
        assert!(field_of(&rs.rules[0]).priority < field_of(&rs.rules[1]).priority);
        assert_eq!(
            field_of(&rs.rules[0]).priority,
            field_of(&rs.rules[2]).priority
        );
    }
}
