//! JSON-lines index backend.
//!
//! Every applied [`IndexOperation`] becomes one line, so the output of several
//! harvests can be concatenated and fed to `geoharvest reconcile`.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use geoharvest_core::{AppError, IndexBackend, IndexOperation};

/// Index backend appending operations to a writer as JSON lines.
pub struct JsonlIndex {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonlIndex {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
        }
    }

    /// Creates (or truncates) `path`.
    pub fn create(path: &Path) -> Result<Self, AppError> {
        let file = File::create(path).map_err(|e| {
            AppError::SinkError(format!("Cannot create '{}': {}", path.display(), e))
        })?;
        Ok(Self::new(BufWriter::new(file)))
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Opens `path` when given, stdout otherwise.
    pub fn open(path: Option<&Path>) -> Result<Self, AppError> {
        match path {
            Some(path) => Self::create(path),
            None => Ok(Self::stdout()),
        }
    }
}

impl IndexBackend for JsonlIndex {
    async fn apply(&self, operations: Vec<IndexOperation>) -> Result<usize, AppError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| AppError::SinkError("writer lock poisoned".to_string()))?;

        for operation in &operations {
            serde_json::to_writer(&mut *writer, operation)?;
            writer
                .write_all(b"\n")
                .map_err(|e| AppError::SinkError(e.to_string()))?;
        }
        writer
            .flush()
            .map_err(|e| AppError::SinkError(e.to_string()))?;
        Ok(operations.len())
    }
}

/// Reads the operations of a JSON-lines file, skipping blank lines.
pub fn read_operations(path: &Path) -> Result<Vec<IndexOperation>, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::SinkError(format!("Cannot open '{}': {}", path.display(), e)))?;

    let mut operations = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| AppError::SinkError(e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let operation = serde_json::from_str(&line).map_err(|e| {
            AppError::SinkError(format!("{}:{}: {}", path.display(), number + 1, e))
        })?;
        operations.push(operation);
    }
    Ok(operations)
}
