//! Query error types
//!
//! Structured errors for parsing, target resolution, parameter handling and
//! evaluation. Everything except cancellation is reported per target and
//! never aborts sibling targets of the same request.

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

    /// Malformed expression text (unbalanced parentheses, bad clause)
    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::ParseError, message)
    }

    /// Function name not present in the registry
    pub fn unrecognized_function(name: &str) -> Self {
        Self::new(
            QueryErrorKind::UnrecognizedFunction,
            format!("Unrecognized function '{}'", name),
        )
    }

    /// Too few parameters for a function call
    pub fn parameter_count(function: &str, found: usize, expected: usize) -> Self {
        Self::new(
            QueryErrorKind::ParameterCountMismatch,
            format!(
                "Expected {} parameter{} for {}, received {}",
                expected,
                if expected == 1 { "" } else { "s" },
                function,
                found
            ),
        )
    }

    /// Malformed numeric, count, unit or boolean parameter
    pub fn format(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::FormatError, message)
    }

    /// Parameter outside its accepted range
    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::OutOfRange, message)
    }

    /// Named parameter target absent from the source data
    pub fn unresolved_parameter(parameter: &str) -> Self {
        Self::new(
            QueryErrorKind::UnresolvedParameterTarget,
            format!(
                "Parameter '{}' is not a number and no matching target was found in the data set",
                parameter
            ),
        )
    }

    /// Metadata lookup failure
    pub fn resolution(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::ResolutionError, message)
    }

    /// Data source failure while fetching samples
    pub fn data_source(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::DataSourceError, message)
    }

    /// Query cancelled by the caller
    pub fn cancelled() -> Self {
        Self::new(QueryErrorKind::Cancelled, "Query was cancelled")
    }

    /// Unexpected internal state
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Internal, message)
    }

    /// True when the error came from cancellation
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

/// Categories of query errors for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Expression syntax error
    ParseError,
    /// Unknown function name
    UnrecognizedFunction,
    /// Function received fewer parameters than it requires
    ParameterCountMismatch,
    /// Parameter text could not be read as the expected type
    FormatError,
    /// Parameter value outside its accepted range
    OutOfRange,
    /// Named parameter target not found and no default given
    UnresolvedParameterTarget,
    /// Metadata catalog lookup failed
    ResolutionError,
    /// External data source failed
    DataSourceError,
    /// Query was cancelled by user or system
    Cancelled,
    /// Internal error (bug, unexpected state)
    Internal,
}

impl QueryErrorKind {
    /// True for errors caused by the expression text itself
    pub fn is_syntax(&self) -> bool {
        matches!(
            self,
            QueryErrorKind::ParseError
                | QueryErrorKind::UnrecognizedFunction
                | QueryErrorKind::ParameterCountMismatch
        )
    }
}

impl fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryErrorKind::ParseError => write!(f, "ParseError"),
            QueryErrorKind::UnrecognizedFunction => write!(f, "UnrecognizedFunction"),
            QueryErrorKind::ParameterCountMismatch => write!(f, "ParameterCountMismatch"),
            QueryErrorKind::FormatError => write!(f, "FormatError"),
            QueryErrorKind::OutOfRange => write!(f, "OutOfRange"),
            QueryErrorKind::UnresolvedParameterTarget => write!(f, "UnresolvedParameterTarget"),
            QueryErrorKind::ResolutionError => write!(f, "ResolutionError"),
            QueryErrorKind::DataSourceError => write!(f, "DataSourceError"),
            QueryErrorKind::Cancelled => write!(f, "Cancelled"),
            QueryErrorKind::Internal => write!(f, "Internal"),
        }
    }
}

/// Result type alias for query operations
pub type QueryResult<T> = std::result::Result<T, QueryError>;
