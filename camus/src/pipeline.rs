// The abstract (target-independent) pipeline a rule set compiles down to:
// a sequence of per-field transition tables terminating in one actions
// table, threaded by small integer pipeline states.

use crate::field::QueryField;
use crate::rule::Action;
use crate::value::Const;

/// How a single field is matched along one path through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldMatch {
    /// The path does not constrain this field.
    Wildcard,
    Eq(Const),
    /// `< c`, stored post-negation-resolution as a half-open bound.
    Lt(Const),
    /// `> c`.
    Gt(Const),
    /// `Lt` and `Gt` on the same field combine into an inclusive range.
    Range(Const, Const),
    Lpm(Const, Const),
}

/// One entry of a transition table: from `state_in`, matching `matc` on
/// this table's field moves the packet to `state_out`. `priority` ranks
/// entries within the same `state_in` when more than one could match
/// (ternary-shaped matches only; `Eq`/`Wildcard` need no priority since
/// `Eq` is already exact and a lone `Wildcard` never competes).
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state_in: u16,
    pub matc: FieldMatch,
    pub state_out: u16,
    pub priority: Option<i64>,
}

/// One entry of the terminal actions table: packets reaching `state`
/// execute `actions` (already merged across every conjunct that lands
/// there).
#[derive(Debug, Clone, PartialEq)]
pub struct Terminal {
    pub state: u16,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone)]
pub enum AbstractTable {
    Transitions {
        field: QueryField,
        entries: Vec<Transition>,
    },
    Terminal {
        entries: Vec<Terminal>,
    },
}

/// The full target-independent pipeline: one `Transitions` table per
/// field referenced anywhere in the rule set, in ascending
/// `QueryField.priority` order, followed by exactly one `Terminal` table.
#[derive(Debug, Clone, Default)]
pub struct AbstractPipeline {
    pub tables: Vec<AbstractTable>,
}

impl AbstractPipeline {
    pub fn terminal(&self) -> Option<&Vec<Terminal>> {
        self.tables.iter().find_map(|t| match t {
            AbstractTable::Terminal { entries } => Some(entries),
            _ => None,
        })
    }

    pub fn transition_table(&self, field: &QueryField) -> Option<&Vec<Transition>> {
        self.tables.iter().find_map(|t| match t {
            AbstractTable::Transitions { field: f, entries } if f == field => Some(entries),
            _ => None,
        })
    }
}
