use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "adapter.addr", "ttl_secs")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., the key or pattern involved)
    pub details: Option<String>,
    /// Source of the error (e.g., "memory_adapter", "redis_adapter")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for cache-internal conditions.
///
/// None of these ever reach the caller of a read or a mutation: the engine
/// absorbs them. They are surfaced by adapters, serializers and settings so
/// that callers driving those pieces directly can react.
#[derive(Debug, Error)]
pub enum Error {
    /// Key absent or logically expired.
    #[error("Cache miss: {key}")]
    NotFound { key: String },

    /// Storage backend unreachable or erroring.
    #[error("Adapter transport error: {message}{}", format_context(.context))]
    Transport {
        message: String,
        context: ErrorContext,
    },

    #[error("Serialization error: {message}{}", format_context(.context))]
    Serialization {
        message: String,
        context: ErrorContext,
    },

    #[error("Adapter call cancelled")]
    Cancelled,

    #[error("Adapter call exceeded its deadline")]
    Timeout,

    #[error("Adapter is closed")]
    Closed,

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn not_found(key: impl Into<String>) -> Self {
        Error::NotFound { key: key.into() }
    }

    /// Create a new transport error with structured context
    pub fn transport_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Transport {
            message: msg.into(),
            context,
        }
    }

    /// Create a new serialization error with structured context
    pub fn serialization_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Serialization {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Logical miss, as opposed to a failing store.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport { .. } | Error::Closed)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled | Error::Timeout)
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Transport { context, .. }
            | Error::Serialization { context, .. }
            | Error::Configuration { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization_with_context(e.to_string(), ErrorContext::new().with_source("json"))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::configuration_with_context(e.to_string(), ErrorContext::new().with_source("yaml"))
    }
}
