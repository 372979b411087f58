//! Buffered bulk sink and an in-memory index backend.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::error::AppError;
use crate::model::{CanonicalDocument, IndexOperation, MappedEntity};
use crate::traits::{BulkSink, IndexBackend};

/// Default number of buffered entities that triggers a flush.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Sink that buffers entities and writes them to an [`IndexBackend`] in batches.
///
/// Any number of workers may call [`add`](BulkSink::add) concurrently; at
/// most one flush is in flight at a time. A batch the backend fails to apply
/// stays buffered, ahead of newer entities, until a later flush succeeds.
pub struct BufferedSink<B: IndexBackend> {
    backend: B,
    buffer: Mutex<Vec<MappedEntity>>,
    flush_lock: tokio::sync::Mutex<()>,
    batch_size: usize,
    written: AtomicUsize,
}

impl<B: IndexBackend> BufferedSink<B> {
    pub fn new(backend: B) -> Self {
        Self::with_batch_size(backend, DEFAULT_BATCH_SIZE)
    }

    pub fn with_batch_size(backend: B, batch_size: usize) -> Self {
        Self {
            backend,
            buffer: Mutex::new(Vec::new()),
            flush_lock: tokio::sync::Mutex::new(()),
            batch_size: batch_size.max(1),
            written: AtomicUsize::new(0),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Total documents written by all flushes so far.
    pub fn written(&self) -> usize {
        self.written.load(Ordering::Relaxed)
    }

    fn buffered(&self) -> Result<usize, AppError> {
        self.buffer
            .lock()
            .map(|b| b.len())
            .map_err(|_| AppError::SinkError("buffer lock poisoned".to_string()))
    }

    fn take_buffer(&self) -> Result<Vec<MappedEntity>, AppError> {
        self.buffer
            .lock()
            .map(|mut b| std::mem::take(&mut *b))
            .map_err(|_| AppError::SinkError("buffer lock poisoned".to_string()))
    }

    /// Puts a failed batch back in front of anything added since it was taken.
    fn restore_buffer(&self, batch: Vec<MappedEntity>) -> Result<(), AppError> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| AppError::SinkError("buffer lock poisoned".to_string()))?;
        let newer = std::mem::replace(&mut *buffer, batch);
        buffer.extend(newer);
        Ok(())
    }
}

impl<B: IndexBackend> BulkSink for BufferedSink<B> {
    async fn add(&self, entity: MappedEntity) -> Result<(), AppError> {
        let len = {
            let mut buffer = self
                .buffer
                .lock()
                .map_err(|_| AppError::SinkError("buffer lock poisoned".to_string()))?;
            buffer.push(entity);
            buffer.len()
        };
        // The entity is accepted once buffered; a failed batch is retried by
        // the next flush, and the job's final flush reports a lasting failure.
        if len >= self.batch_size {
            if let Err(e) = self.flush().await {
                warn!(error = %e, "Batch flush failed, keeping entities buffered");
            }
        }
        Ok(())
    }

    async fn flush(&self) -> Result<usize, AppError> {
        let _guard = self.flush_lock.lock().await;
        if self.buffered()? == 0 {
            return Ok(0);
        }

        let batch = self.take_buffer()?;
        let operations: Vec<IndexOperation> = batch
            .iter()
            .map(|entity| IndexOperation::Index {
                id: entity.document.id.clone(),
                document: entity.document.clone().sanitized(),
            })
            .collect();

        let count = match self.backend.apply(operations).await {
            Ok(count) => count,
            Err(e) => {
                self.restore_buffer(batch)?;
                return Err(e);
            }
        };
        self.written.fetch_add(count, Ordering::Relaxed);
        debug!(count, "Flushed batch to index");
        Ok(count)
    }
}

/// Index backend that keeps documents in memory, keyed by id.
///
/// Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryIndex {
    documents: Arc<Mutex<BTreeMap<String, CanonicalDocument>>>,
    applied: Arc<Mutex<Vec<String>>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<CanonicalDocument> {
        self.documents.lock().ok()?.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.documents.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<String> {
        self.documents
            .lock()
            .map(|d| d.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Every applied operation in order, rendered as `index <id>` or `delete <id>`.
    pub fn operation_log(&self) -> Vec<String> {
        self.applied.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

impl IndexBackend for MemoryIndex {
    async fn apply(&self, operations: Vec<IndexOperation>) -> Result<usize, AppError> {
        let mut documents = self
            .documents
            .lock()
            .map_err(|_| AppError::SinkError("index lock poisoned".to_string()))?;
        let mut applied = self
            .applied
            .lock()
            .map_err(|_| AppError::SinkError("index lock poisoned".to_string()))?;

        let count = operations.len();
        for operation in operations {
            applied.push(operation.to_string());
            match operation {
                IndexOperation::Index { id, document } => {
                    documents.insert(id, document);
                }
                IndexOperation::Delete { id } => {
                    documents.remove(&id);
                }
            }
        }
        Ok(count)
    }
}
