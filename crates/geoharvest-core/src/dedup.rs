//! Post-harvest reconciliation of duplicates.
//!
//! Entities from different sources that describe the same real-world dataset
//! share a dedup key and land in one [`Bucket`]. [`Deduplicator::reconcile`]
//! turns a bucket into the index operations that leave exactly one merged
//! document in the index and no stale ids behind.
//!
//! # Merge policy
//!
//! ```toml
//! priority = ["registry", "catalog", "seed"]
//!
//! [rules]
//! registry = ["title", "description", "publisher", "spatial", "periodicity"]
//! catalog = ["keywords", "distributions"]
//! seed = "never"
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::AppError;
use crate::model::{DocumentField, IndexOperation, MappedEntity};

// =============================================================================
// Buckets
// =============================================================================

/// Duplicates sharing one dedup key.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub key: String,
    /// Duplicates in harvest order.
    pub entities: Vec<MappedEntity>,
    /// Id the bucket is currently indexed under, if known.
    pub indexed_id: Option<String>,
}

impl Bucket {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            entities: Vec::new(),
            indexed_id: None,
        }
    }

    pub fn with_entity(mut self, entity: MappedEntity) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn with_indexed_id(mut self, id: impl Into<String>) -> Self {
        self.indexed_id = Some(id.into());
        self
    }

    /// The id a reconciled bucket is indexed under: the entity's own id when
    /// the bucket holds one entity, otherwise an id derived from the key.
    pub fn target_id(&self) -> String {
        match self.entities.as_slice() {
            [single] => single.document.id.clone(),
            _ => merged_id(&self.key),
        }
    }
}

/// Deterministic document id for a multi-entity bucket.
pub fn merged_id(key: &str) -> String {
    format!("{:x}", Sha256::digest(key.as_bytes()))
}

/// Dedup key of an entity: the mapper-provided key, else the normalized
/// identifier.
pub fn dedup_key(entity: &MappedEntity) -> String {
    entity
        .document
        .dedup_key
        .as_deref()
        .filter(|k| !k.trim().is_empty())
        .unwrap_or(&entity.identifier)
        .trim()
        .to_lowercase()
}

/// Groups entities into buckets by dedup key, keeping first-seen order of
/// keys and harvest order within a bucket.
///
/// `indexed_ids` maps a dedup key to the id its bucket is currently indexed
/// under.
pub fn build_buckets(
    entities: impl IntoIterator<Item = MappedEntity>,
    indexed_ids: &HashMap<String, String>,
) -> Vec<Bucket> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut buckets: Vec<Bucket> = Vec::new();

    for entity in entities {
        let key = dedup_key(&entity);
        let index = *positions.entry(key.clone()).or_insert_with(|| {
            let mut bucket = Bucket::new(key.clone());
            bucket.indexed_id = indexed_ids.get(&key).cloned();
            buckets.push(bucket);
            buckets.len() - 1
        });
        buckets[index].entities.push(entity);
    }

    buckets
}

// =============================================================================
// Merge Policy
// =============================================================================

/// What a duplicate of one source kind may override on the primary.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "MergeRuleRepr")]
pub enum MergeRule {
    Never,
    Fields(Vec<DocumentField>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MergeRuleRepr {
    Keyword(String),
    Fields(Vec<DocumentField>),
}

impl TryFrom<MergeRuleRepr> for MergeRule {
    type Error = String;

    fn try_from(repr: MergeRuleRepr) -> Result<Self, Self::Error> {
        match repr {
            MergeRuleRepr::Keyword(k) if k.eq_ignore_ascii_case("never") => Ok(MergeRule::Never),
            MergeRuleRepr::Keyword(k) => Err(format!(
                "Unknown merge rule: '{}'. Valid options: never, or a list of fields",
                k
            )),
            MergeRuleRepr::Fields(fields) => Ok(MergeRule::Fields(fields)),
        }
    }
}

/// Source priority order plus per-kind merge rules.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MergePolicy {
    /// Source kinds from most to least authoritative. Unknown kinds rank last.
    #[serde(default = "default_priority")]
    pub priority: Vec<String>,
    /// Merge rule keyed by the duplicate's source kind. Missing kinds never override.
    #[serde(default = "default_rules")]
    pub rules: HashMap<String, MergeRule>,
}

fn default_priority() -> Vec<String> {
    vec![
        "registry".to_string(),
        "catalog".to_string(),
        "seed".to_string(),
    ]
}

fn default_rules() -> HashMap<String, MergeRule> {
    HashMap::from([
        (
            "registry".to_string(),
            MergeRule::Fields(vec![
                DocumentField::Title,
                DocumentField::Description,
                DocumentField::Publisher,
                DocumentField::Spatial,
                DocumentField::Periodicity,
            ]),
        ),
        (
            "catalog".to_string(),
            MergeRule::Fields(vec![DocumentField::Keywords, DocumentField::Distributions]),
        ),
        ("seed".to_string(), MergeRule::Never),
    ])
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            priority: default_priority(),
            rules: default_rules(),
        }
    }
}

impl MergePolicy {
    pub fn from_toml_str(content: &str) -> Result<Self, AppError> {
        toml::from_str(content)
            .map_err(|e| AppError::ConfigError(format!("Invalid merge policy: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self, AppError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!(
                "Failed to read merge policy {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Rank of a source kind; lower is more authoritative.
    pub fn rank(&self, source_kind: &str) -> usize {
        self.priority
            .iter()
            .position(|k| k.eq_ignore_ascii_case(source_kind))
            .unwrap_or(self.priority.len())
    }

    pub fn rule(&self, source_kind: &str) -> &MergeRule {
        self.rules.get(source_kind).unwrap_or(&MergeRule::Never)
    }
}

// =============================================================================
// Deduplicator
// =============================================================================

/// Reconciles buckets into index operations.
#[derive(Debug, Clone, Default)]
pub struct Deduplicator {
    policy: MergePolicy,
}

impl Deduplicator {
    pub fn new(policy: MergePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &MergePolicy {
        &self.policy
    }

    /// Computes the operations for one bucket.
    ///
    /// Deletes always precede the single `index` operation.
    pub fn reconcile(&self, bucket: &Bucket) -> Vec<IndexOperation> {
        let target_id = bucket.target_id();

        let mut live: Vec<&MappedEntity> =
            bucket.entities.iter().filter(|e| !e.document.deleted).collect();
        // Stable sort: ties keep harvest order.
        live.sort_by_key(|e| self.policy.rank(&e.document.metadata.source_kind));

        let Some((primary, duplicates)) = live.split_first() else {
            debug!(key = %bucket.key, "All duplicates deleted at source");
            return Self::delete_indexed(bucket);
        };

        let mut document = primary.document.clone();
        // Least authoritative first, so more authoritative overrides win.
        for duplicate in duplicates.iter().rev() {
            let kind = &duplicate.document.metadata.source_kind;
            if let MergeRule::Fields(fields) = self.policy.rule(kind) {
                for field in fields {
                    document.override_field(*field, &duplicate.document);
                }
            }
        }
        for duplicate in duplicates {
            document.metadata.provenance.push(duplicate.document.id.clone());
        }
        document.id = target_id.clone();

        let mut operations = Vec::new();
        let old_ids = bucket
            .indexed_id
            .iter()
            .chain(bucket.entities.iter().map(|e| &e.document.id));
        for old_id in old_ids {
            let seen = operations.iter().any(|op: &IndexOperation| op.id() == old_id.as_str());
            if *old_id != target_id && !seen {
                operations.push(IndexOperation::Delete { id: old_id.clone() });
            }
        }
        operations.push(IndexOperation::Index {
            id: target_id,
            document: document.sanitized(),
        });
        operations
    }

    /// Deletes whatever a fully deleted bucket left in the index.
    ///
    /// Without a known indexed id, each duplicate may still be indexed under
    /// its own id, so every one of them is deleted.
    fn delete_indexed(bucket: &Bucket) -> Vec<IndexOperation> {
        if let Some(id) = &bucket.indexed_id {
            return vec![IndexOperation::Delete { id: id.clone() }];
        }
        let mut operations: Vec<IndexOperation> = Vec::new();
        for entity in &bucket.entities {
            let id = &entity.document.id;
            if !operations.iter().any(|op| op.id() == id.as_str()) {
                operations.push(IndexOperation::Delete { id: id.clone() });
            }
        }
        operations
    }

    /// Reconciles every bucket, in bucket order.
    pub fn reconcile_all(&self, buckets: &[Bucket]) -> Vec<IndexOperation> {
        buckets.iter().flat_map(|b| self.reconcile(b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CanonicalDocument, HarvestMetadata};

    fn entity(id: &str, kind: &str, title: &str) -> MappedEntity {
        MappedEntity {
            identifier: id.to_string(),
            source: format!("{kind}-source"),
            collection_id: "cat".to_string(),
            document: CanonicalDocument {
                id: id.to_string(),
                identifier: id.to_string(),
                title: title.to_string(),
                metadata: HarvestMetadata {
                    source_kind: kind.to_string(),
                    ..Default::default()
                },
                ..Default::default()
            },
            original_text: String::new(),
        }
    }

    fn deleted(mut entity: MappedEntity) -> MappedEntity {
        entity.document.deleted = true;
        entity
    }

    fn rendered(ops: &[IndexOperation]) -> Vec<String> {
        ops.iter().map(|op| op.to_string()).collect()
    }

    #[test]
    fn test_all_deleted_short_circuits() {
        let bucket = Bucket::new("k")
            .with_entity(deleted(entity("X", "catalog", "a")))
            .with_entity(deleted(entity("Y", "seed", "b")))
            .with_indexed_id("Z");

        let ops = Deduplicator::default().reconcile(&bucket);
        assert_eq!(rendered(&ops), vec!["delete Z"]);
    }

    #[test]
    fn test_all_deleted_without_indexed_id_deletes_each_duplicate() {
        let bucket = Bucket::new("k")
            .with_entity(deleted(entity("X", "catalog", "a")))
            .with_entity(deleted(entity("Y", "seed", "b")));

        let ops = Deduplicator::default().reconcile(&bucket);
        assert_eq!(rendered(&ops), vec!["delete X", "delete Y"]);
        assert!(!ops.iter().any(|op| op.id() == merged_id("k")));
    }

    #[test]
    fn test_single_deleted_entity_deletes_its_own_id() {
        let bucket = Bucket::new("k").with_entity(deleted(entity("X", "catalog", "a")));
        let ops = Deduplicator::default().reconcile(&bucket);
        assert_eq!(rendered(&ops), vec!["delete X"]);
    }

    #[test]
    fn test_id_migration_deletes_old_ids() {
        let bucket = Bucket::new("dataset-1")
            .with_entity(entity("X", "catalog", "From catalog"))
            .with_entity(entity("Y", "seed", "From seed"));
        let z = merged_id("dataset-1");

        let ops = Deduplicator::default().reconcile(&bucket);
        assert_eq!(
            rendered(&ops),
            vec!["delete X".to_string(), "delete Y".to_string(), format!("index {z}")]
        );
    }

    #[test]
    fn test_single_entity_keeps_its_id() {
        let bucket = Bucket::new("k").with_entity(entity("X", "catalog", "t"));
        let ops = Deduplicator::default().reconcile(&bucket);
        assert_eq!(rendered(&ops), vec!["index X"]);
    }

    #[test]
    fn test_primary_follows_priority_and_merge_rules() {
        let mut seed = entity("S", "seed", "Seed title");
        seed.document.keywords = vec!["seed-kw".to_string()];
        let mut catalog = entity("C", "catalog", "Catalog title");
        catalog.document.keywords = vec!["catalog-kw".to_string()];
        let mut registry = entity("R", "registry", "Registry title");
        registry.document.description = Some("authoritative".to_string());

        let bucket = Bucket::new("k")
            .with_entity(seed)
            .with_entity(catalog)
            .with_entity(registry);
        let ops = Deduplicator::default().reconcile(&bucket);

        let IndexOperation::Index { document, .. } = ops.last().unwrap() else {
            panic!("expected index operation last");
        };
        assert_eq!(document.title, "Registry title");
        assert_eq!(document.description.as_deref(), Some("authoritative"));
        assert_eq!(document.keywords, vec!["catalog-kw"]);
        assert_eq!(document.metadata.provenance, vec!["C", "S"]);
    }

    #[test]
    fn test_ties_keep_harvest_order() {
        let bucket = Bucket::new("k")
            .with_entity(entity("first", "catalog", "First"))
            .with_entity(entity("second", "catalog", "Second"));
        let ops = Deduplicator::default().reconcile(&bucket);
        let IndexOperation::Index { document, .. } = ops.last().unwrap() else {
            panic!("expected index operation last");
        };
        assert_eq!(document.identifier, "first");
    }

    #[test]
    fn test_current_id_not_deleted() {
        let z = merged_id("k");
        let bucket = Bucket::new("k")
            .with_entity(entity("X", "catalog", "a"))
            .with_entity(entity("Y", "catalog", "b"))
            .with_indexed_id(z.clone());
        let ops = Deduplicator::default().reconcile(&bucket);
        assert!(!ops.iter().any(|op| op.is_delete() && op.id() == z));
        assert_eq!(ops.len(), 3);
    }

    #[test]
    fn test_emitted_documents_are_sanitized() {
        let mut e = entity("X", "catalog", "t");
        e.document.internal.insert("raw".to_string(), "x".to_string());
        let ops = Deduplicator::default().reconcile(&Bucket::new("k").with_entity(e));
        let IndexOperation::Index { document, .. } = &ops[0] else {
            panic!("expected index operation");
        };
        assert!(document.internal.is_empty());
    }

    #[test]
    fn test_build_buckets_groups_by_key() {
        let mut a = entity("A", "catalog", "a");
        a.document.dedup_key = Some("DS-1".to_string());
        let mut b = entity("B", "seed", "b");
        b.document.dedup_key = Some("ds-1".to_string());
        let c = entity("C", "seed", "c");

        let indexed = HashMap::from([("ds-1".to_string(), "old".to_string())]);
        let buckets = build_buckets(vec![a, b, c], &indexed);

        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].key, "ds-1");
        assert_eq!(buckets[0].entities.len(), 2);
        assert_eq!(buckets[0].indexed_id.as_deref(), Some("old"));
        assert_eq!(buckets[1].key, "c");
    }

    #[test]
    fn test_policy_from_toml() {
        let policy = MergePolicy::from_toml_str(
            r#"
            priority = ["seed", "catalog"]

            [rules]
            seed = ["title"]
            catalog = "never"
            "#,
        )
        .unwrap();

        assert_eq!(policy.rank("seed"), 0);
        assert_eq!(policy.rank("registry"), 2);
        assert_eq!(policy.rule("seed"), &MergeRule::Fields(vec![DocumentField::Title]));
        assert_eq!(policy.rule("catalog"), &MergeRule::Never);
        assert_eq!(policy.rule("unknown"), &MergeRule::Never);
    }

    #[test]
    fn test_policy_rejects_unknown_keyword() {
        let err = MergePolicy::from_toml_str("[rules]\nseed = \"sometimes\"\n").unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }
}
