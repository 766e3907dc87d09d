// Atomic predicates and the structural algebra over them: independence,
// disjointness, subset, and a strict total order used to canonicalize
// formula conjuncts.
//
// This reasoning is syntactic, not semantic: `disjoint`/`subset` returning
// `false` never asserts satisfiability or non-subset-hood, only that the
// structural cases this module knows about didn't match. See spec's open
// question on LPM subset/disjoint (never implemented here, by design).

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::field::QueryField;
use crate::value::{Const, ValueError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtomicPredicate {
    Eq(QueryField, Const),
    Lt(QueryField, Const),
    Gt(QueryField, Const),
    Lpm(QueryField, Const, Const),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateError {
    /// `Lt`/`Gt` applied to a non-`Number` constant.
    NonNumericComparison,
    /// `Lpm` applied to an address that isn't `Ipv4`/`Ipv6`, or a prefix
    /// length that isn't `Number`.
    MalformedLpm,
}

impl std::fmt::Display for PredicateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonNumericComparison => {
                write!(f, "Lt/Gt require a numeric constant")
            }
            Self::MalformedLpm => {
                write!(f, "Lpm requires an address constant and a numeric prefix length")
            }
        }
    }
}

impl std::error::Error for PredicateError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalError {
    MissingAssignment,
    TypeMismatch,
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingAssignment => {
                write!(f, "assignment has no binding for this field")
            }
            Self::TypeMismatch => write!(f, "assignment type disagrees with predicate"),
        }
    }
}

impl std::error::Error for EvalError {}

impl From<ValueError> for EvalError {
    fn from(_: ValueError) -> Self {
        Self::TypeMismatch
    }
}

/// A mapping from fields to concrete values, used to evaluate a predicate
/// against a hypothetical packet.
pub type Assignment = HashMap<QueryField, Const>;

impl AtomicPredicate {
    pub fn eq(field: QueryField, c: Const) -> Self {
        Self::Eq(field, c)
    }

    pub fn lt(field: QueryField, c: Const) -> Result<Self, PredicateError> {
        c.to_int().map_err(|_| PredicateError::NonNumericComparison)?;
        Ok(Self::Lt(field, c))
    }

    pub fn gt(field: QueryField, c: Const) -> Result<Self, PredicateError> {
        c.to_int().map_err(|_| PredicateError::NonNumericComparison)?;
        Ok(Self::Gt(field, c))
    }

    pub fn lpm(field: QueryField, addr: Const, prefix_len: Const) -> Result<Self, PredicateError> {
        let addr_ok = matches!(addr, Const::Ipv4(_) | Const::Ipv6(..));
        let len_ok = prefix_len.to_int().is_ok();
        if !addr_ok || !len_ok {
            return Err(PredicateError::MalformedLpm);
        }
        Ok(Self::Lpm(field, addr, prefix_len))
    }

    pub fn field(&self) -> &QueryField {
        match self {
            Self::Eq(f, _) | Self::Lt(f, _) | Self::Gt(f, _) | Self::Lpm(f, _, _) => f,
        }
    }

    pub fn independent(&self, other: &Self) -> bool {
        self.field() != other.field()
    }

    pub fn disjoint(&self, other: &Self) -> bool {
        if self.independent(other) {
            return false;
        }
        use AtomicPredicate::*;
        match (self, other) {
            (Eq(_, a), Eq(_, b)) => a != b,
            (Eq(_, y), Gt(_, x)) | (Gt(_, x), Eq(_, y)) => {
                matches!((y.to_int(), x.to_int()), (Ok(y), Ok(x)) if y <= x)
            }
            (Eq(_, y), Lt(_, x)) | (Lt(_, x), Eq(_, y)) => {
                matches!((y.to_int(), x.to_int()), (Ok(y), Ok(x)) if y >= x)
            }
            (Lt(_, x), Gt(_, y)) | (Gt(_, y), Lt(_, x)) => {
                matches!((x.to_int(), y.to_int()), (Ok(x), Ok(y)) if x <= y + 1)
            }
            (Lpm(_, a, _), Lpm(_, b, _)) => a != b,
            _ => false,
        }
    }

    pub fn subset(&self, other: &Self) -> bool {
        if self == other {
            return true;
        }
        if self.independent(other) {
            return false;
        }
        use AtomicPredicate::*;
        match (self, other) {
            (Gt(_, x), Gt(_, y)) => {
                matches!((x.to_int(), y.to_int()), (Ok(x), Ok(y)) if x >= y)
            }
            (Lt(_, x), Lt(_, y)) => {
                matches!((x.to_int(), y.to_int()), (Ok(x), Ok(y)) if x <= y)
            }
            (Eq(_, x), Gt(_, y)) => {
                matches!((x.to_int(), y.to_int()), (Ok(x), Ok(y)) if x > y)
            }
            (Eq(_, x), Lt(_, y)) => {
                matches!((x.to_int(), y.to_int()), (Ok(x), Ok(y)) if x < y)
            }
            // IPv4/IPv6 prefix subset-of is an open question upstream;
            // conservatively false rather than guessed.
            _ => false,
        }
    }

    pub fn eval(&self, a: &Assignment) -> Result<bool, EvalError> {
        let v = a.get(self.field()).ok_or(EvalError::MissingAssignment)?;
        use AtomicPredicate::*;
        Ok(match self {
            Eq(_, c) => v == c,
            Lt(_, c) => v.to_int()? < c.to_int()?,
            Gt(_, c) => v.to_int()? > c.to_int()?,
            Lpm(_, addr, len) => within_prefix(v, addr, len)?,
        })
    }

    fn kind_rank(&self) -> u8 {
        // Decision (spec open question 1): within a field, Lt < Gt < Eq <
        // Lpm. Range constraints sort before equality so a `ConstraintSet`
        // accumulating atoms in this order lets an `Eq` win outright over
        // any prior range rather than being clobbered by one. See DESIGN.md.
        match self {
            Self::Lt(..) => 0,
            Self::Gt(..) => 1,
            Self::Eq(..) => 2,
            Self::Lpm(..) => 3,
        }
    }

    fn const_key(&self) -> (&Const, Option<&Const>) {
        match self {
            Self::Eq(_, c) | Self::Lt(_, c) | Self::Gt(_, c) => (c, None),
            Self::Lpm(_, addr, len) => (addr, Some(len)),
        }
    }
}

fn within_prefix(v: &Const, addr: &Const, len: &Const) -> Result<bool, EvalError> {
    let len = len.to_int()?;
    match (v, addr) {
        (Const::Ipv4(v), Const::Ipv4(a)) => {
            let len = len.clamp(0, 32) as u32;
            let mask = if len == 0 { 0 } else { u32::MAX << (32 - len) };
            Ok(v & mask == a & mask)
        }
        (Const::Ipv6(v0, v1, v2, v3), Const::Ipv6(a0, a1, a2, a3)) => {
            let v = [*v0, *v1, *v2, *v3];
            let a = [*a0, *a1, *a2, *a3];
            let mut remaining = len.clamp(0, 128) as u32;
            for i in 0..4 {
                let take = remaining.min(32);
                let mask = if take == 0 { 0 } else { u32::MAX << (32 - take) };
                if v[i] & mask != a[i] & mask {
                    return Ok(false);
                }
                remaining -= take;
            }
            Ok(true)
        }
        _ => Err(EvalError::TypeMismatch),
    }
}

impl PartialOrd for AtomicPredicate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AtomicPredicate {
    fn cmp(&self, other: &Self) -> Ordering {
        let field_ord = self.field().cmp(other.field());
        if field_ord != Ordering::Equal {
            return field_ord;
        }
        let kind_ord = self.kind_rank().cmp(&other.kind_rank());
        if kind_ord != Ordering::Equal {
            return kind_ord;
        }
        let (sa, sl) = self.const_key();
        let (oa, ol) = other.const_key();
        sa.cmp(oa).then_with(|| sl.cmp(&ol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(priority: i64) -> QueryField {
        QueryField::new("ipv4", "dstAddr", priority, 32)
    }

    #[test]
    fn independent_is_false_for_self() {
        let p = AtomicPredicate::eq(f(0), Const::Number(1));
        assert!(!p.independent(&p));
    }

    #[test]
    fn eq_eq_disjoint_iff_different_constants() {
        let a = AtomicPredicate::eq(f(0), Const::Number(1));
        let b = AtomicPredicate::eq(f(0), Const::Number(2));
        assert!(a.disjoint(&b));
        assert!(!a.disjoint(&a.clone()));
    }

    #[test]
    fn lt_gt_disjoint_when_ranges_dont_touch() {
        let lt = AtomicPredicate::lt(f(0), Const::Number(5)).unwrap();
        let gt = AtomicPredicate::gt(f(0), Const::Number(10)).unwrap();
        assert!(lt.disjoint(&gt));

        let gt2 = AtomicPredicate::gt(f(0), Const::Number(3)).unwrap();
        assert!(!lt.disjoint(&gt2));
    }

    #[test]
    fn subset_reflexive_and_antisymmetric() {
        let a = AtomicPredicate::gt(f(0), Const::Number(5)).unwrap();
        let b = AtomicPredicate::gt(f(0), Const::Number(3)).unwrap();
        assert!(a.subset(&b));
        assert!(!b.subset(&a));
        assert!(a.subset(&a.clone()));
    }

    #[test]
    fn eval_errors_on_missing_binding() {
        let p = AtomicPredicate::eq(f(0), Const::Number(1));
        let a = Assignment::new();
        assert_eq!(p.eval(&a), Err(EvalError::MissingAssignment));
    }

    #[test]
    fn eval_matches_disjointness() {
        let lt = AtomicPredicate::lt(f(0), Const::Number(5)).unwrap();
        let gt = AtomicPredicate::gt(f(0), Const::Number(10)).unwrap();
        assert!(lt.disjoint(&gt));
        for x in [-100i128, 0, 4, 5, 6, 10, 11, 100] {
            let mut a = Assignment::new();
            a.insert(f(0), Const::Number(x));
            let both = lt.eval(&a).unwrap() && gt.eval(&a).unwrap();
            assert!(!both);
        }
    }

    #[test]
    fn total_order_is_strict() {
        let atoms = vec![
            AtomicPredicate::eq(f(0), Const::Number(1)),
            AtomicPredicate::eq(f(0), Const::Number(2)),
            AtomicPredicate::lt(f(0), Const::Number(3)).unwrap(),
            AtomicPredicate::gt(f(0), Const::Number(3)).unwrap(),
            AtomicPredicate::lpm(f(0), Const::Ipv4(1), Const::Number(8)).unwrap(),
            AtomicPredicate::eq(f(1), Const::Number(1)),
        ];
        for a in &atoms {
            for b in &atoms {
                assert_eq!(a.cmp(b).reverse(), b.cmp(a));
            }
        }
        assert!(atoms[2] < atoms[3]); // Lt < Gt
        assert!(atoms[2] < atoms[0]); // Lt < Eq
        assert!(atoms[0] < atoms[4]); // Eq < Lpm
    }

    #[test]
    fn lpm_within_prefix() {
        let addr = Const::Ipv4(0x0a00_0000);
        let len = Const::Number(8);
        let p = AtomicPredicate::lpm(f(0), addr, len).unwrap();
        let mut a = Assignment::new();
        a.insert(f(0), Const::Ipv4(0x0a00_0001));
        assert!(p.eval(&a).unwrap());
        a.insert(f(0), Const::Ipv4(0x0b00_0001));
        assert!(!p.eval(&a).unwrap());
    }
}
