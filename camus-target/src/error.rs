// Lowering-phase errors. Unlike `camus::error`, these never carry a source
// location: the abstract pipeline has already left the surface syntax
// behind, so a lowering failure is reported in terms of pipeline state.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LowerError {
    /// A terminal state aggregates a `ForwardPort` action with a
    /// non-forwarding action across two or more rules that happened to
    /// share a prefix. Per-rule action shape is already validated by
    /// `camus::compile`; this catches the case where sharing reintroduces
    /// the same conflict across rules.
    #[error("cannot merge fwd action with other types at state {0}")]
    ActionMerge(u16),

    /// An abstract transition's match shape wasn't one the lowering
    /// recognizes. Spec §8 treats this as an internal assertion failure:
    /// `camus::pipeline::FieldMatch` is a closed enum, so reaching this
    /// means lowering fell out of sync with it.
    #[error("invariant violation: unrecognized match shape in table '{0}'")]
    InvariantViolation(String),
}
