// Generic boolean formula over an atomic predicate type. The core
// compiler treats this as a black box that normalizes to a set of
// conjuncts; this module is the minimal implementation of that contract.

use crate::predicate::AtomicPredicate;

#[derive(Debug, Clone)]
pub enum Formula<A> {
    Atom(A),
    Not(Box<Formula<A>>),
    And(Box<Formula<A>>, Box<Formula<A>>),
    Or(Box<Formula<A>>, Box<Formula<A>>),
}

impl<A: Clone> Formula<A> {
    pub fn atom(a: A) -> Self {
        Self::Atom(a)
    }

    pub fn and(self, other: Self) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Self) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }

    pub fn not(self) -> Self {
        Self::Not(Box::new(self))
    }
}

/// A literal: an atom, possibly negated.
#[derive(Debug, Clone)]
pub struct Literal<A> {
    pub atom: A,
    pub negated: bool,
}

/// One AND-group of a DNF formula; one accepting path through the
/// pipeline.
pub type Conjunct<A> = Vec<Literal<A>>;

impl<A: Clone> Formula<A> {
    /// Pushes `Not` down to the leaves (De Morgan), then distributes `Or`
    /// out of `And` to produce a disjunction of conjunctions of literals.
    pub fn to_dnf(&self) -> Vec<Conjunct<A>> {
        distribute(&to_nnf(self, false))
    }
}

#[derive(Debug, Clone)]
enum Nnf<A> {
    Lit(Literal<A>),
    And(Box<Nnf<A>>, Box<Nnf<A>>),
    Or(Box<Nnf<A>>, Box<Nnf<A>>),
}

fn to_nnf<A: Clone>(f: &Formula<A>, negate: bool) -> Nnf<A> {
    match f {
        Formula::Atom(a) => Nnf::Lit(Literal {
            atom: a.clone(),
            negated: negate,
        }),
        Formula::Not(inner) => to_nnf(inner, !negate),
        Formula::And(l, r) => {
            let (l, r) = (to_nnf(l, negate), to_nnf(r, negate));
            if negate {
                Nnf::Or(Box::new(l), Box::new(r))
            } else {
                Nnf::And(Box::new(l), Box::new(r))
            }
        }
        Formula::Or(l, r) => {
            let (l, r) = (to_nnf(l, negate), to_nnf(r, negate));
            if negate {
                Nnf::And(Box::new(l), Box::new(r))
            } else {
                Nnf::Or(Box::new(l), Box::new(r))
            }
        }
    }
}

fn distribute<A: Clone>(f: &Nnf<A>) -> Vec<Conjunct<A>> {
    match f {
        Nnf::Lit(l) => vec![vec![l.clone()]],
        Nnf::Or(l, r) => {
            let mut out = distribute(l);
            out.extend(distribute(r));
            out
        }
        Nnf::And(l, r) => {
            let left = distribute(l);
            let right = distribute(r);
            let mut out = Vec::with_capacity(left.len() * right.len());
            for lc in &left {
                for rc in &right {
                    let mut merged = lc.clone();
                    merged.extend(rc.clone());
                    out.push(merged);
                }
            }
            out
        }
    }
}

pub type PredicateFormula = Formula<AtomicPredicate>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::QueryField;
    use crate::value::Const;

    fn atom(n: i128) -> AtomicPredicate {
        AtomicPredicate::eq(QueryField::new("ipv4", "proto", 0, 8), Const::Number(n))
    }

    #[test]
    fn or_of_atoms_yields_two_conjuncts() {
        let f = Formula::atom(atom(1)).or(Formula::atom(atom(2)));
        let dnf = f.to_dnf();
        assert_eq!(dnf.len(), 2);
        assert_eq!(dnf[0].len(), 1);
        assert_eq!(dnf[1].len(), 1);
    }

    #[test]
    fn and_distributes_over_or() {
        let f = Formula::atom(atom(1)).and(Formula::atom(atom(2)).or(Formula::atom(atom(3))));
        let dnf = f.to_dnf();
        assert_eq!(dnf.len(), 2);
        for conj in &dnf {
            assert_eq!(conj.len(), 2);
        }
    }

    #[test]
    fn not_pushes_to_the_leaf() {
        let f = Formula::atom(atom(1)).not();
        let dnf = f.to_dnf();
        assert_eq!(dnf.len(), 1);
        assert!(dnf[0][0].negated);
    }

    #[test]
    fn demorgan_on_and() {
        let f = Formula::atom(atom(1)).and(Formula::atom(atom(2))).not();
        let dnf = f.to_dnf();
        assert_eq!(dnf.len(), 2);
        assert!(dnf.iter().all(|c| c.len() == 1 && c[0].negated));
    }
}
