use thiserror::Error;

use crate::db::CatalogError;
use crate::translate::CompletionError;

/// Failure of one translation request.
///
/// `Display` and `source()` carry the full diagnostic for logs;
/// [`TranslationError::user_message`] is what callers show to end users.
#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("query text is empty")]
    EmptyInput,
    #[error("schema catalog unavailable: {0}")]
    SchemaUnavailable(#[from] CatalogError),
    #[error("the catalog has no tables to ground the query in")]
    NoUsableSchema,
    #[error("completion service failed: {0}")]
    CompletionService(#[from] CompletionError),
}

impl TranslationError {
    /// Stable machine-readable label.
    pub fn kind(&self) -> &'static str {
        match self {
            TranslationError::EmptyInput => "empty_input",
            TranslationError::SchemaUnavailable(_) => "schema_unavailable",
            TranslationError::NoUsableSchema => "no_usable_schema",
            TranslationError::CompletionService(_) => "completion_service_error",
        }
    }

    /// Terse message safe to show outside the process. Never includes
    /// upstream status codes or response bodies.
    pub fn user_message(&self) -> &'static str {
        match self {
            TranslationError::EmptyInput => "Please provide a query description",
            TranslationError::SchemaUnavailable(_) => "Failed to get database tables",
            TranslationError::NoUsableSchema => "The database has no tables to query",
            TranslationError::CompletionService(_) => "Failed to generate SQL",
        }
    }

    /// Whether the caller sent a bad request, as opposed to a failure on
    /// our side or upstream.
    pub fn is_client_error(&self) -> bool {
        matches!(self, TranslationError::EmptyInput)
    }
}
