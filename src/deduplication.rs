// 🔍 Deduplication Policy - natural keys per entity type
//
// Before inserting an unsaved entity the session probes for an existing row
// whose natural-key columns all match (NULL matches NULL). A hit returns the
// stored entity instead of inserting, so re-importing the same export twice
// leaves exactly one row.

use crate::error::{RecordError, Result};
use crate::schema::{EntityKind, SchemaRegistry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// DEFAULT NATURAL KEYS
// ============================================================================

/// Default natural key for transfers (Transaction and Verification)
pub const TRANSFER_NATURAL_KEY: &[&str] = &[
    "date", "sender", "receiver", "amount", "unit", "reference",
];

// ============================================================================
// POLICY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupPolicy {
    /// Entity type → field names compared before insert
    keys: BTreeMap<EntityKind, Vec<String>>,
}

impl DedupPolicy {
    /// Policy with no natural keys: every write of an unsaved entity inserts
    pub fn disabled() -> Self {
        DedupPolicy {
            keys: BTreeMap::new(),
        }
    }

    pub fn set<S: AsRef<str>>(&mut self, kind: EntityKind, fields: &[S]) {
        if fields.is_empty() {
            self.keys.remove(&kind);
        } else {
            let fields = fields.iter().map(|f| f.as_ref().to_string()).collect();
            self.keys.insert(kind, fields);
        }
    }

    pub fn clear(&mut self, kind: EntityKind) {
        self.keys.remove(&kind);
    }

    /// Natural-key fields for `kind`, if dedup applies to it
    pub fn fields(&self, kind: EntityKind) -> Option<&[String]> {
        self.keys.get(&kind).map(Vec::as_slice)
    }

    /// Defaults overridden by `[dedup]` config entries (type name → field names)
    pub fn from_table(table: &BTreeMap<String, Vec<String>>) -> Result<Self> {
        let mut policy = DedupPolicy::default();
        for (name, fields) in table {
            let kind = EntityKind::from_name(name).ok_or_else(|| {
                RecordError::Config(format!("[dedup] names unknown entity type {}", name))
            })?;
            policy.set(kind, fields.as_slice());
        }
        Ok(policy)
    }

    /// Every natural-key field must be a declared content field of an owned type
    pub fn validate(&self, registry: &SchemaRegistry) -> Result<()> {
        for (kind, fields) in &self.keys {
            let schema = registry.entity(*kind)?;
            if schema.report_column.is_none() {
                return Err(RecordError::Schema(format!(
                    "{} rows are append-only and cannot be deduplicated",
                    kind
                )));
            }
            for field in fields {
                if schema.field(field).is_none() {
                    return Err(RecordError::Schema(format!(
                        "dedup key for {} names unknown field {}",
                        kind, field
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Default for DedupPolicy {
    fn default() -> Self {
        let mut policy = DedupPolicy::disabled();
        policy.set(EntityKind::Transaction, TRANSFER_NATURAL_KEY);
        policy.set(EntityKind::Verification, TRANSFER_NATURAL_KEY);
        policy
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = DedupPolicy::default();
        let fields = policy.fields(EntityKind::Transaction).unwrap();
        assert!(fields.iter().any(|f| f == "reference"));
        assert_eq!(fields.len(), 6);
        assert!(policy.fields(EntityKind::Statement).is_none());
        assert!(policy.validate(&SchemaRegistry::standard().unwrap()).is_ok());
    }

    #[test]
    fn test_policy_without_reference() {
        let mut table = BTreeMap::new();
        table.insert(
            "transaction".to_string(),
            vec!["date".to_string(), "sender".to_string(), "amount".to_string()],
        );
        let policy = DedupPolicy::from_table(&table).unwrap();
        assert_eq!(policy.fields(EntityKind::Transaction).unwrap().len(), 3);
        assert_eq!(policy.fields(EntityKind::Verification).unwrap().len(), 6);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mut policy = DedupPolicy::disabled();
        policy.set(EntityKind::Statement, &["date", "merchant"]);
        let err = policy.validate(&SchemaRegistry::standard().unwrap()).unwrap_err();
        assert!(matches!(err, RecordError::Schema(msg) if msg.contains("merchant")));
    }

    #[test]
    fn test_reports_cannot_dedup() {
        let mut policy = DedupPolicy::disabled();
        policy.set(EntityKind::Report, &["category"]);
        assert!(policy.validate(&SchemaRegistry::standard().unwrap()).is_err());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut table = BTreeMap::new();
        table.insert("Merchant".to_string(), vec!["name".to_string()]);
        assert!(matches!(
            DedupPolicy::from_table(&table),
            Err(RecordError::Config(_))
        ));
    }
}
