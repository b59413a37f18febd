//! Per-model memoization of resolved attributes
//!
//! Each model owns one [`AttributeMemo`]. Entries are tagged with the schema
//! revision they were computed under, so re-registering the schema makes
//! every entry stale without walking the models.

use crate::resolver::ResolvedValue;
use std::collections::HashMap;
use std::fmt;

/// Monotonic version counter for raw attributes and schema registrations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision(pub u64);

impl Revision {
    pub const ZERO: Revision = Revision(0);

    pub fn next(self) -> Revision {
        Revision(self.0 + 1)
    }
}

impl Default for Revision {
    fn default() -> Self {
        Revision::ZERO
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// A memoized attribute resolution
#[derive(Debug, Clone)]
pub struct MemoEntry {
    /// The resolved value
    pub value: ResolvedValue,

    /// Raw-attribute revision of the owning model when this was computed
    pub computed_at: Revision,

    /// Schema revision this was computed under
    pub schema_revision: Revision,
}

impl MemoEntry {
    pub fn new(value: ResolvedValue, computed_at: Revision, schema_revision: Revision) -> Self {
        MemoEntry {
            value,
            computed_at,
            schema_revision,
        }
    }

    /// Check if this entry is still valid under the given schema revision
    pub fn is_verified_for(&self, schema_revision: Revision) -> bool {
        self.schema_revision == schema_revision
    }
}

/// Attribute-name keyed memo table
#[derive(Debug, Default)]
pub struct AttributeMemo {
    entries: HashMap<String, MemoEntry>,
}

impl AttributeMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a cached value if it is valid for the schema revision
    pub fn get(&self, key: &str, schema_revision: Revision) -> Option<ResolvedValue> {
        self.entries
            .get(key)
            .filter(|entry| entry.is_verified_for(schema_revision))
            .map(|entry| entry.value.clone())
    }

    /// Get the full memo entry
    pub fn get_entry(&self, key: &str) -> Option<&MemoEntry> {
        self.entries.get(key)
    }

    /// Memoize a value, keeping an already valid entry
    ///
    /// Returns whichever value ends up stored so that concurrent readers all
    /// observe the same instance.
    pub fn insert(
        &mut self,
        key: &str,
        value: ResolvedValue,
        computed_at: Revision,
        schema_revision: Revision,
    ) -> ResolvedValue {
        if let Some(existing) = self.get(key, schema_revision) {
            return existing;
        }
        self.entries.insert(
            key.to_string(),
            MemoEntry::new(value.clone(), computed_at, schema_revision),
        );
        value
    }

    /// Invalidate an entry (remove it)
    pub fn invalidate(&mut self, key: &str) -> Option<MemoEntry> {
        self.entries.remove(key)
    }

    /// Clear all entries
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get all memoized attribute names
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_revision_ordering() {
        let r1 = Revision(1);
        let r2 = Revision(2);

        assert!(r1 < r2);
        assert_eq!(r1.next(), r2);
        assert_eq!(Revision::default(), Revision::ZERO);
        assert_eq!(r2.to_string(), "r2");
    }

    #[test]
    fn test_memo_basic() {
        let mut memo = AttributeMemo::new();
        memo.insert("title", ResolvedValue::Scalar(json!("Dune")), Revision(1), Revision(1));

        let cached = memo.get("title", Revision(1)).unwrap();
        assert_eq!(cached.as_scalar(), Some(&json!("Dune")));
        assert!(memo.get("author", Revision(1)).is_none());
    }

    #[test]
    fn test_memo_schema_revision_mismatch() {
        let mut memo = AttributeMemo::new();
        memo.insert("title", ResolvedValue::Scalar(json!("Dune")), Revision(1), Revision(1));

        assert!(memo.get("title", Revision(2)).is_none());

        // A stale entry is replaced on insert
        memo.insert("title", ResolvedValue::Scalar(json!("Emma")), Revision(1), Revision(2));
        let cached = memo.get("title", Revision(2)).unwrap();
        assert_eq!(cached.as_scalar(), Some(&json!("Emma")));
    }

    #[test]
    fn test_memo_insert_keeps_valid_entry() {
        let mut memo = AttributeMemo::new();
        let scalar = |value: &str| ResolvedValue::Scalar(json!(value));
        memo.insert("title", scalar("first"), Revision(1), Revision(1));
        let kept = memo.insert("title", scalar("second"), Revision(1), Revision(1));

        assert_eq!(kept.as_scalar(), Some(&json!("first")));
        assert_eq!(memo.len(), 1);
    }

    #[test]
    fn test_memo_invalidate() {
        let mut memo = AttributeMemo::new();
        memo.insert("title", ResolvedValue::Absent, Revision(1), Revision(1));

        assert!(memo.invalidate("title").is_some());
        assert!(memo.invalidate("title").is_none());
        assert!(memo.is_empty());
    }
}
