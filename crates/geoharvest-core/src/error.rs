use thiserror::Error;

use crate::geometry::GeometryError;

/// Application-wide error types.
///
/// This enum represents all possible errors that can occur while harvesting.
/// It uses the `thiserror` crate for ergonomic error handling and automatic
/// conversion from underlying library errors.
///
/// # Error Conversion
///
/// Some errors automatically convert from their source types using `#[from]`:
/// - `serde_json::Error` → `AppError::SerializationError`
/// - `GeometryError` → `AppError::GeometryError`
///
/// # Examples
///
/// ```no_run
/// use geoharvest_core::error::AppError;
///
/// fn example() -> Result<(), AppError> {
///     Err(AppError::Generic("Something went wrong".to_string()))
/// }
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP client request failed.
    ///
    /// This error occurs when HTTP requests fail due to network issues,
    /// unexpected status codes, or unreadable bodies.
    #[error("API Client error: {0}")]
    ClientError(String),

    /// JSON serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// An XML document could not be read.
    #[error("XML error: {0}")]
    XmlError(String),

    /// URL parsing failed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Invalid source URL provided in a job or configuration.
    #[error("Invalid source URL: {0}")]
    InvalidSourceUrl(String),

    /// The capability or description document of a source was unreachable,
    /// unparsable, or had an unexpected root.
    ///
    /// Nothing can be crawled without it, so this always aborts the job.
    #[error("Capabilities error: {0}")]
    CapabilitiesError(String),

    /// A single record could not be mapped into a canonical document.
    #[error("Mapping error: {0}")]
    MappingError(String),

    /// A geometry could not be parsed or transformed.
    #[error("Geometry error: {0}")]
    GeometryError(#[from] GeometryError),

    /// The bulk sink rejected a submission or failed to flush.
    #[error("Sink error: {0}")]
    SinkError(String),

    /// The catalog referenced by a job does not exist in the registry.
    #[error("Catalog not found: {0}")]
    CatalogNotFound(String),

    /// API response contained no data.
    #[error("Empty response from API")]
    EmptyResponse,

    /// Network or connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timeout.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded. Please wait and try again.")]
    RateLimitExceeded,

    /// Configuration file error.
    ///
    /// This error occurs when reading or parsing the configuration file fails,
    /// such as when `sources.toml` is malformed or contains invalid values.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic application error for cases not covered by specific variants.
    #[error("Error: {0}")]
    Generic(String),
}

impl AppError {
    /// Returns a user-friendly error message suitable for CLI output.
    pub fn user_message(&self) -> String {
        match self {
            AppError::ClientError(msg) => {
                if msg.contains("timeout") || msg.contains("timed out") {
                    "Request timed out. The source may be slow or unreachable.\n   Try again later or check the source URL.".to_string()
                } else if msg.contains("connect") {
                    format!(
                        "Cannot connect to source: {}\n   Check your internet connection and the source URL.",
                        msg
                    )
                } else {
                    format!("API error: {}", msg)
                }
            }
            AppError::CapabilitiesError(msg) => {
                format!(
                    "The source did not return a usable capabilities document: {}\n   Check that the URL points to the service endpoint.",
                    msg
                )
            }
            AppError::InvalidSourceUrl(url) => {
                format!(
                    "Invalid source URL: {}\n   Example: https://geoservice.example.org/wfs",
                    url
                )
            }
            AppError::CatalogNotFound(id) => {
                format!(
                    "Catalog '{}' is not registered.\n   Add it to the [[catalogs]] section of sources.toml.",
                    id
                )
            }
            AppError::NetworkError(msg) => {
                format!("Network error: {}\n   Check your internet connection.", msg)
            }
            AppError::Timeout(secs) => {
                format!(
                    "Request timed out after {} seconds.\n   The server may be overloaded. Try again later.",
                    secs
                )
            }
            AppError::RateLimitExceeded => {
                "Too many requests. Please wait a moment and try again.".to_string()
            }
            AppError::EmptyResponse => {
                "The API returned no data. The source may be temporarily unavailable.".to_string()
            }
            AppError::ConfigError(msg) => {
                format!(
                    "Configuration error: {}\n   Check your configuration file.",
                    msg
                )
            }
            _ => self.to_string(),
        }
    }

    /// Returns true if this error is retryable.
    ///
    /// # Examples
    ///
    /// ```
    /// use geoharvest_core::error::AppError;
    ///
    /// let err = AppError::NetworkError("connection reset".to_string());
    /// assert!(err.is_retryable());
    ///
    /// let err = AppError::MappingError("no title".to_string());
    /// assert!(!err.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::NetworkError(_)
                | AppError::Timeout(_)
                | AppError::RateLimitExceeded
                | AppError::ClientError(_)
        )
    }

    /// Returns true if this error makes the whole job unusable.
    ///
    /// Systemic errors move the coordinator to `Failed` and are recorded as
    /// application errors, which tells the caller to roll back the job's writes.
    pub fn is_systemic(&self) -> bool {
        matches!(
            self,
            AppError::CapabilitiesError(_)
                | AppError::CatalogNotFound(_)
                | AppError::InvalidSourceUrl(_)
                | AppError::ConfigError(_)
                | AppError::SinkError(_)
        )
    }
}
