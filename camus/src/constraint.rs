// Per-field range tracking used during compilation to detect atoms already
// implied (or contradicted) by earlier conjuncts on the same field.

use std::collections::HashMap;

use crate::field::QueryField;
use crate::predicate::AtomicPredicate;
use crate::value::Const;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstRange {
    pub lo: Option<i128>,
    pub hi: Option<i128>,
}

impl ConstRange {
    pub fn set_eq(&self, x: i128) -> Self {
        Self {
            lo: Some(x),
            hi: Some(x),
        }
    }

    pub fn set_lt(&self, x: i128) -> Self {
        let hi = x - 1;
        Self {
            lo: self.lo,
            hi: Some(self.hi.map_or(hi, |cur| cur.min(hi))),
        }
    }

    pub fn set_gt(&self, x: i128) -> Self {
        let lo = x + 1;
        Self {
            lo: Some(self.lo.map_or(lo, |cur| cur.max(lo))),
            hi: self.hi,
        }
    }

    pub fn implies_true_eq(&self, x: i128) -> bool {
        self.lo == Some(x) && self.hi == Some(x)
    }

    pub fn implies_true_lt(&self, x: i128) -> bool {
        self.hi.is_some_and(|hi| hi < x)
    }

    pub fn implies_true_gt(&self, x: i128) -> bool {
        self.lo.is_some_and(|lo| lo > x)
    }
}

/// Reserved, deliberately unimplemented in this revision (spec open
/// question 3). Any caller reaching this is a programming error, not a
/// compile-time situation the compiler needs to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trilean {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, Default)]
pub struct ConstraintSet {
    ranges: HashMap<QueryField, ConstRange>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the range for `field(p)` using the matching `set_*`.
    /// `Lpm` atoms do not contribute to the constraint set (documented
    /// limitation, carried over from upstream).
    pub fn add_constraint(&mut self, p: &AtomicPredicate) {
        let field = p.field().clone();
        let current = self.ranges.get(&field).cloned().unwrap_or_default();
        let next = match p {
            AtomicPredicate::Eq(_, c) => c.to_int().ok().map(|x| current.set_eq(x)),
            AtomicPredicate::Lt(_, c) => c.to_int().ok().map(|x| current.set_lt(x)),
            AtomicPredicate::Gt(_, c) => c.to_int().ok().map(|x| current.set_gt(x)),
            AtomicPredicate::Lpm(..) => None,
        };
        if let Some(next) = next {
            self.ranges.insert(field, next);
        }
    }

    pub fn implies_true(&self, p: &AtomicPredicate) -> bool {
        let Some(range) = self.ranges.get(p.field()) else {
            return false;
        };
        match p {
            AtomicPredicate::Eq(_, c) => c.to_int().is_ok_and(|x| range.implies_true_eq(x)),
            AtomicPredicate::Lt(_, c) => c.to_int().is_ok_and(|x| range.implies_true_lt(x)),
            AtomicPredicate::Gt(_, c) => c.to_int().is_ok_and(|x| range.implies_true_gt(x)),
            AtomicPredicate::Lpm(..) => false,
        }
    }

    /// Always `Unknown`: never implemented upstream, kept that way here.
    pub fn implies_false(&self, _p: &AtomicPredicate) -> Trilean {
        Trilean::Unknown
    }

    pub fn range(&self, field: &QueryField) -> Option<&ConstRange> {
        self.ranges.get(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Const;

    fn f() -> QueryField {
        QueryField::new("tcp", "dport", 0, 16)
    }

    #[test]
    fn add_then_implies_true() {
        let mut cs = ConstraintSet::new();
        let p = AtomicPredicate::eq(f(), Const::Number(80));
        cs.add_constraint(&p);
        assert!(cs.implies_true(&p));
    }

    #[test]
    fn accumulating_range_narrows() {
        let mut cs = ConstraintSet::new();
        cs.add_constraint(&AtomicPredicate::gt(f(), Const::Number(1023)).unwrap());
        cs.add_constraint(&AtomicPredicate::lt(f(), Const::Number(2000)).unwrap());
        let r = cs.range(&f()).unwrap();
        assert_eq!(r.lo, Some(1024));
        assert_eq!(r.hi, Some(1999));
        assert!(cs.implies_true(&AtomicPredicate::gt(f(), Const::Number(1000)).unwrap()));
    }

    #[test]
    fn lpm_contributes_nothing() {
        let mut cs = ConstraintSet::new();
        let p = AtomicPredicate::lpm(f(), Const::Ipv4(10), Const::Number(8)).unwrap();
        cs.add_constraint(&p);
        assert!(cs.range(&f()).is_none());
    }

    #[test]
    fn same_direction_gt_atoms_keep_the_tighter_bound_regardless_of_order() {
        let mut cs = ConstraintSet::new();
        cs.add_constraint(&AtomicPredicate::gt(f(), Const::Number(2000)).unwrap());
        cs.add_constraint(&AtomicPredicate::gt(f(), Const::Number(1023)).unwrap());
        assert_eq!(cs.range(&f()).unwrap().lo, Some(2001));

        let mut cs_reversed = ConstraintSet::new();
        cs_reversed.add_constraint(&AtomicPredicate::gt(f(), Const::Number(1023)).unwrap());
        cs_reversed.add_constraint(&AtomicPredicate::gt(f(), Const::Number(2000)).unwrap());
        assert_eq!(cs_reversed.range(&f()).unwrap().lo, Some(2001));
    }

    #[test]
    fn same_direction_lt_atoms_keep_the_tighter_bound_regardless_of_order() {
        let mut cs = ConstraintSet::new();
        cs.add_constraint(&AtomicPredicate::lt(f(), Const::Number(50)).unwrap());
        cs.add_constraint(&AtomicPredicate::lt(f(), Const::Number(2000)).unwrap());
        assert_eq!(cs.range(&f()).unwrap().hi, Some(49));

        let mut cs_reversed = ConstraintSet::new();
        cs_reversed.add_constraint(&AtomicPredicate::lt(f(), Const::Number(2000)).unwrap());
        cs_reversed.add_constraint(&AtomicPredicate::lt(f(), Const::Number(50)).unwrap());
        assert_eq!(cs_reversed.range(&f()).unwrap().hi, Some(49));
    }
}
