// Typed references to packet header fields.

use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone)]
pub struct QueryField {
    pub header: String,
    pub field: String,
    /// Lower sorts first in the compiled pipeline's field order.
    pub priority: i64,
    pub width_bits: u16,
}

impl QueryField {
    pub fn new(
        header: impl Into<String>,
        field: impl Into<String>,
        priority: i64,
        width_bits: u16,
    ) -> Self {
        Self {
            header: header.into(),
            field: field.into(),
            priority,
            width_bits,
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.header, self.field)
    }
}

// Equality is structural on (header, field); `priority`/`width_bits` are
// metadata about the same field, not part of its identity.
impl PartialEq for QueryField {
    fn eq(&self, other: &Self) -> bool {
        self.header == other.header && self.field == other.field
    }
}

impl Eq for QueryField {}

impl std::hash::Hash for QueryField {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.header.hash(state);
        self.field.hash(state);
    }
}

// Ordering for pipeline layout is by priority only, not by name.
impl PartialOrd for QueryField {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueryField {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.cmp(&other.priority)
    }
}

impl fmt::Display for QueryField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualified_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_priority_and_width() {
        let a = QueryField::new("ipv4", "dstAddr", 10, 32);
        let b = QueryField::new("ipv4", "dstAddr", 99, 8);
        assert_eq!(a, b);
    }

    #[test]
    fn ordering_is_by_priority_only() {
        let a = QueryField::new("eth", "dst", 1, 48);
        let b = QueryField::new("ipv4", "dstAddr", 2, 32);
        assert!(a < b);
    }
}
