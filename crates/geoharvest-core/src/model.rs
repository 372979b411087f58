//! Canonical document model and index operations.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codelist::Periodicity;
use crate::geometry::GeometryInformation;

/// A downloadable or accessible representation of a dataset.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Distribution {
    pub url: String,
    pub format: Option<String>,
    pub title: Option<String>,
}

/// Harvest bookkeeping attached to every document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HarvestMetadata {
    /// Name of the source the document was harvested from.
    pub source: String,
    /// Kind of source, used to rank duplicates.
    pub source_kind: String,
    pub catalog_id: String,
    pub harvested_at: DateTime<Utc>,
    /// External ids of duplicates merged into this document.
    #[serde(default)]
    pub provenance: Vec<String>,
}

/// The canonical, source-independent document written to the index.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CanonicalDocument {
    /// Index document id.
    pub id: String,
    /// Stable identifier at the source.
    pub identifier: String,
    /// Key grouping duplicates of one real-world dataset.
    pub dedup_key: Option<String>,
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub license: Option<String>,
    #[serde(default)]
    pub periodicity: Periodicity,
    pub publisher: Option<String>,
    pub modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub distributions: Vec<Distribution>,
    pub spatial: Option<GeometryInformation>,
    /// Set when the record is marked deleted at its source.
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub metadata: HarvestMetadata,
    /// Source-specific fields kept for display.
    #[serde(default)]
    pub extras: BTreeMap<String, String>,
    /// Fields used during harvesting and reconciliation only; stripped before indexing.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub internal: BTreeMap<String, String>,
}

/// Document fields that a merge policy can let a duplicate override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentField {
    Title,
    Description,
    Keywords,
    License,
    Periodicity,
    Publisher,
    Modified,
    Distributions,
    Spatial,
    Extras,
}

impl CanonicalDocument {
    /// Copies one field from `other` when `other` actually has a value for it.
    pub fn override_field(&mut self, field: DocumentField, other: &CanonicalDocument) {
        match field {
            DocumentField::Title => {
                if !other.title.trim().is_empty() {
                    self.title = other.title.clone();
                }
            }
            DocumentField::Description => {
                if other.description.is_some() {
                    self.description = other.description.clone();
                }
            }
            DocumentField::Keywords => {
                if !other.keywords.is_empty() {
                    self.keywords = other.keywords.clone();
                }
            }
            DocumentField::License => {
                if other.license.is_some() {
                    self.license = other.license.clone();
                }
            }
            DocumentField::Periodicity => {
                if other.periodicity != Periodicity::Unknown {
                    self.periodicity = other.periodicity;
                }
            }
            DocumentField::Publisher => {
                if other.publisher.is_some() {
                    self.publisher = other.publisher.clone();
                }
            }
            DocumentField::Modified => {
                if other.modified.is_some() {
                    self.modified = other.modified;
                }
            }
            DocumentField::Distributions => {
                if !other.distributions.is_empty() {
                    self.distributions = other.distributions.clone();
                }
            }
            DocumentField::Spatial => {
                if other.spatial.is_some() {
                    self.spatial = other.spatial.clone();
                }
            }
            DocumentField::Extras => {
                for (k, v) in &other.extras {
                    self.extras.insert(k.clone(), v.clone());
                }
            }
        }
    }

    /// Returns the copy that is safe to index: internal-only fields removed.
    pub fn sanitized(mut self) -> Self {
        self.internal.clear();
        self
    }
}

/// A mapped record ready for the bulk sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedEntity {
    /// Stable identifier at the source.
    pub identifier: String,
    /// Source name.
    pub source: String,
    /// Catalog (collection) the entity belongs to.
    pub collection_id: String,
    pub document: CanonicalDocument,
    /// The raw record text, kept for provenance display.
    pub original_text: String,
}

/// A resolved catalog from the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub id: String,
    pub title: String,
    pub publisher: Option<String>,
}

/// An operation the index backend must apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "lowercase")]
pub enum IndexOperation {
    Index { id: String, document: CanonicalDocument },
    Delete { id: String },
}

impl IndexOperation {
    pub fn id(&self) -> &str {
        match self {
            IndexOperation::Index { id, .. } | IndexOperation::Delete { id } => id,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, IndexOperation::Delete { .. })
    }
}

impl fmt::Display for IndexOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexOperation::Index { id, .. } => write!(f, "index {id}"),
            IndexOperation::Delete { id } => write!(f, "delete {id}"),
        }
    }
}
