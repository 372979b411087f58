//! Record extraction: identifier filtering, mapping and sink submission.
//!
//! For each raw record, in order:
//! 1. the identifier is extracted (missing → `identifier` warning, skipped)
//! 2. allow/deny rules are applied (denied → skipped, mapper never built)
//! 3. the mapper builds a canonical document (failure → warning, skipped)
//! 4. harvest metadata is stamped and progress advances
//!
//! A document counts toward the job total once the sink accepts it, or once
//! it is mapped on a dry run.

use futures::future::join_all;
use tracing::debug;

use crate::error::AppError;
use crate::filter::IdentifierFilter;
use crate::model::{HarvestMetadata, MappedEntity};
use crate::progress::{HarvestEvent, ProgressReporter, ProgressTracker};
use crate::summary::{Summary, WarningCategory};
use crate::traits::{BulkSink, MappingContext, RawPage, ResourceDescriptor, SourceClient};

/// Builds the index document id for a record of a catalog.
pub fn document_id(catalog_id: &str, identifier: &str) -> String {
    format!("{}:{}", catalog_id, identifier)
}

/// Per-job record extractor shared by all resource workers.
pub struct RecordExtractor<'a, C: SourceClient, R: ProgressReporter> {
    client: &'a C,
    filter: &'a IdentifierFilter,
    context: &'a MappingContext,
    summary: &'a Summary,
    progress: &'a ProgressTracker,
    reporter: &'a R,
}

impl<'a, C: SourceClient, R: ProgressReporter> RecordExtractor<'a, C, R> {
    pub fn new(
        client: &'a C,
        filter: &'a IdentifierFilter,
        context: &'a MappingContext,
        summary: &'a Summary,
        progress: &'a ProgressTracker,
        reporter: &'a R,
    ) -> Self {
        Self {
            client,
            filter,
            context,
            summary,
            progress,
            reporter,
        }
    }

    pub fn summary(&self) -> &'a Summary {
        self.summary
    }

    /// Lazily maps the records of one page.
    ///
    /// The iterator is single-use; records that are filtered out or fail to
    /// map are recorded in the summary and not yielded.
    pub fn extract<'b>(
        &'b self,
        resource: &'b ResourceDescriptor,
        page: RawPage<C::Record>,
    ) -> impl Iterator<Item = MappedEntity> + 'b {
        page.records
            .into_iter()
            .filter_map(move |record| self.extract_record(resource, record))
    }

    fn extract_record(
        &self,
        resource: &ResourceDescriptor,
        record: C::Record,
    ) -> Option<MappedEntity> {
        let Some(identifier) = self.client.record_identifier(&record) else {
            self.summary.warn(
                WarningCategory::Identifier,
                format!("Record without identifier in resource '{}'", resource.name),
            );
            return None;
        };

        if !self.filter.is_identifier_allowed(&identifier) {
            debug!(identifier = %identifier, "Identifier excluded by rules");
            self.summary.skip(identifier);
            return None;
        }

        let mapper = self.client.create_mapper(record, resource, self.context);
        if mapper.should_be_skipped() {
            self.summary.skip(identifier);
            return None;
        }

        let mut document = match mapper.create_document() {
            Ok(document) => document,
            Err(e) => {
                let category = match e {
                    AppError::GeometryError(_) => WarningCategory::Geometry,
                    _ => WarningCategory::Mapping,
                };
                self.summary
                    .warn(category, format!("Record '{}': {}", identifier, e));
                self.summary.skip(identifier);
                return None;
            }
        };

        let identifier = mapper.identifier().to_string();
        let catalog_id = self.context.catalog.id.clone();
        if document.id.is_empty() {
            document.id = document_id(&catalog_id, &identifier);
        }
        if document.identifier.is_empty() {
            document.identifier = identifier.clone();
        }
        document.metadata = HarvestMetadata {
            source: self.context.source_name.clone(),
            source_kind: self.context.source_kind.clone(),
            catalog_id: catalog_id.clone(),
            harvested_at: self.context.harvested_at,
            provenance: Vec::new(),
        };

        let (done, total) = self.progress.advance();
        self.reporter.report(HarvestEvent::Progress { done, total });

        Some(MappedEntity {
            identifier,
            source: self.context.source_name.clone(),
            collection_id: catalog_id,
            document,
            original_text: mapper.original_text(),
        })
    }

    /// Maps one page and submits the entities to the sink.
    ///
    /// Submissions of the page are awaited together; each rejection becomes a
    /// `sink` warning plus a skipped record, and the others still count. In
    /// dry-run mode nothing is submitted. Returns the number of entities mapped.
    pub async fn process_page<K: BulkSink>(
        &self,
        resource: &ResourceDescriptor,
        page: RawPage<C::Record>,
        sink: &K,
        dry_run: bool,
    ) -> usize {
        let entities: Vec<MappedEntity> = self.extract(resource, page).collect();
        let mapped = entities.len();
        if dry_run || entities.is_empty() {
            for _ in 0..mapped {
                self.summary.record_doc();
            }
            return mapped;
        }

        let submissions = entities.into_iter().map(|entity| {
            let identifier = entity.identifier.clone();
            async move { (identifier, sink.add(entity).await) }
        });

        let mut accepted = 0;
        for (identifier, result) in join_all(submissions).await {
            match result {
                Ok(()) => {
                    accepted += 1;
                    self.summary.record_doc();
                }
                Err(e) => {
                    self.summary.warn(
                        WarningCategory::Sink,
                        format!("Record '{}' rejected: {}", identifier, e),
                    );
                    self.summary.skip(identifier);
                }
            }
        }
        self.summary.record_indexed(accepted);

        mapped
    }
}
