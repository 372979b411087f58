//! Catalog registry backed by configuration.

use std::collections::HashMap;

use crate::config::CatalogEntry;
use crate::error::AppError;
use crate::model::Catalog;
use crate::traits::CatalogRegistry;

/// Registry holding a fixed set of catalogs, typically the `[[catalogs]]`
/// table of `sources.toml`.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalogRegistry {
    catalogs: HashMap<String, Catalog>,
}

impl StaticCatalogRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: &[CatalogEntry]) -> Self {
        entries.iter().fold(Self::new(), |registry, entry| {
            registry.with_catalog(Catalog {
                id: entry.id.clone(),
                title: entry.title.clone(),
                publisher: entry.publisher.clone(),
            })
        })
    }

    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalogs.insert(catalog.id.clone(), catalog);
        self
    }

    /// Registers `id` with a title equal to its id, unless already present.
    pub fn ensure(&mut self, id: &str) {
        self.catalogs.entry(id.to_string()).or_insert_with(|| Catalog {
            id: id.to_string(),
            title: id.to_string(),
            publisher: None,
        });
    }

    pub fn len(&self) -> usize {
        self.catalogs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalogs.is_empty()
    }
}

impl CatalogRegistry for StaticCatalogRegistry {
    async fn get_catalog(&self, catalog_id: &str) -> Result<Option<Catalog>, AppError> {
        Ok(self.catalogs.get(catalog_id).cloned())
    }
}
