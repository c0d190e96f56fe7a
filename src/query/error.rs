//! Query error types
//!
//! Structured errors for every stage of execution: option validation,
//! pipeline wiring, aggregate planning, cursor iteration and external
//! delegation.

use std::fmt;

/// Query error with context
#[derive(Debug)]
pub struct QueryError {
    /// Error kind for programmatic handling
    pub kind: QueryErrorKind,
    /// Human-readable message
    pub message: String,
    /// Optional source error
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl QueryError {
    /// Create a new query error
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Add source error for error chaining
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::ValidationError, message)
    }

    /// Create a planning error
    pub fn planning(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::PlanningError, message)
    }

    /// Create an execution error
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::ExecutionError, message)
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Timeout, message)
    }

    /// Create a resource limit error
    pub fn resource_limit(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::ResourceLimit, message)
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::NotFound, message)
    }

    /// Create a cancellation error
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Cancelled, message)
    }

    /// Create an error for an operation on a closed cursor
    pub fn cursor_closed(cursor: &str) -> Self {
        Self::new(
            QueryErrorKind::CursorClosed,
            format!("{} cursor is closed", cursor),
        )
    }

    /// Create an error reported by an external aggregate delegate
    pub fn external(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::External, message)
    }

    /// Create an internal error (schema or invariant violation)
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Internal, message)
    }

    /// True when the error only reports a cancelled query
    pub fn is_cancelled(&self) -> bool {
        self.kind == QueryErrorKind::Cancelled
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for QueryError {
    fn from(e: std::io::Error) -> Self {
        QueryError::execution(format!("I/O failure: {}", e)).with_source(e)
    }
}

/// Categories of query errors for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Invalid options, chunk structure or port wiring
    ValidationError,
    /// Aggregate planning failed (unknown function, bad arguments, bad types)
    PlanningError,
    /// Query execution failed (I/O error, storage failure)
    ExecutionError,
    /// Query exceeded time limit
    Timeout,
    /// Query exceeded resource limits (memory, result size)
    ResourceLimit,
    /// Requested series or data not found
    NotFound,
    /// Query was cancelled by user or system
    Cancelled,
    /// Operation on a cursor that was already closed
    CursorClosed,
    /// External aggregate delegate failed or timed out
    External,
    /// Internal error (bug, unexpected state)
    Internal,
}

impl fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryErrorKind::ValidationError => write!(f, "ValidationError"),
            QueryErrorKind::PlanningError => write!(f, "PlanningError"),
            QueryErrorKind::ExecutionError => write!(f, "ExecutionError"),
            QueryErrorKind::Timeout => write!(f, "Timeout"),
            QueryErrorKind::ResourceLimit => write!(f, "ResourceLimit"),
            QueryErrorKind::NotFound => write!(f, "NotFound"),
            QueryErrorKind::Cancelled => write!(f, "Cancelled"),
            QueryErrorKind::CursorClosed => write!(f, "CursorClosed"),
            QueryErrorKind::External => write!(f, "External"),
            QueryErrorKind::Internal => write!(f, "Internal"),
        }
    }
}

/// Result type alias for query operations
pub type QueryResult<T> = std::result::Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = QueryError::planning("unknown function 'foo'");
        assert_eq!(err.kind, QueryErrorKind::PlanningError);
        assert!(err.message.contains("foo"));
    }

    #[test]
    fn test_error_display() {
        let err = QueryError::validation("chunk size must be positive");
        let display = format!("{}", err);
        assert!(display.contains("ValidationError"));
        assert!(display.contains("chunk size"));
    }

    #[test]
    fn test_error_with_source() {
        use std::error::Error;
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = QueryError::execution("failed to read file").with_source(io_err);
        assert!(err.source().is_some());
    }

    #[test]
    fn test_io_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        let err: QueryError = io_err.into();
        assert_eq!(err.kind, QueryErrorKind::ExecutionError);
        assert!(err.message.contains("short read"));
    }

    #[test]
    fn test_cursor_closed() {
        let err = QueryError::cursor_closed("tagset");
        assert_eq!(err.kind, QueryErrorKind::CursorClosed);
        assert!(!err.is_cancelled());
        assert!(QueryError::cancelled("abort").is_cancelled());
    }
}
