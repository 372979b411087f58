//! Identifier allow/deny filtering.

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::AppError;
use crate::job::IdentifierRules;

/// Decides whether a record identifier may be harvested.
///
/// Deny patterns win. When allow patterns exist, an identifier must match
/// at least one of them.
#[derive(Debug, Clone)]
pub struct IdentifierFilter {
    allow: Option<GlobSet>,
    deny: GlobSet,
}

impl IdentifierFilter {
    /// Builds a filter from job rules.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` for an invalid glob pattern.
    pub fn from_rules(rules: &IdentifierRules) -> Result<Self, AppError> {
        let allow = if rules.allow.is_empty() {
            None
        } else {
            Some(build_globset(&rules.allow)?)
        };
        Ok(Self {
            allow,
            deny: build_globset(&rules.deny)?,
        })
    }

    /// A filter that admits every identifier.
    pub fn allow_all() -> Self {
        Self {
            allow: None,
            deny: GlobSet::empty(),
        }
    }

    pub fn is_identifier_allowed(&self, identifier: &str) -> bool {
        if self.deny.is_match(identifier) {
            return false;
        }
        match &self.allow {
            Some(allow) => allow.is_match(identifier),
            None => true,
        }
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, AppError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            AppError::ConfigError(format!("Invalid identifier pattern '{}': {}", pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| AppError::ConfigError(format!("Invalid identifier patterns: {}", e)))
}
