use std::fmt;

/// Pipeline error types.
#[derive(Debug)]
pub enum PipelineError {
    /// The remote service answered 404 for the requested key.
    NotFound(String),
    /// The geocoder returned no candidate for an address.
    NoMatch(String),
    /// Transport failure, timeout, or a non-2xx status other than 404.
    LookupError {
        /// Name of the service that failed.
        service: String,
        /// HTTP status, when the server answered at all.
        status: Option<u16>,
        /// Human readable cause.
        cause: String,
    },
    /// The payload did not have the expected shape.
    MalformedResponse {
        /// Name of the service that produced the payload.
        service: String,
        /// What was wrong with it.
        detail: String,
    },
    /// Invalid configuration value.
    Config(String),
    /// No address survived enrichment; nothing to transform.
    EmptyEnrichment,
    /// Filesystem error while writing snapshots or reports.
    Io(std::io::Error),
    /// JSON (de)serialization error outside of a lookup.
    Serialization(serde_json::Error),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<PipelineError>,
        /// Additional context message.
        context: String,
    },
}

impl PipelineError {
    pub fn lookup(service: &str, status: Option<u16>, cause: impl Into<String>) -> Self {
        PipelineError::LookupError {
            service: service.to_string(),
            status,
            cause: cause.into(),
        }
    }

    pub fn malformed(service: &str, detail: impl Into<String>) -> Self {
        PipelineError::MalformedResponse {
            service: service.to_string(),
            detail: detail.into(),
        }
    }

    /// Whether retrying the same request may succeed.
    ///
    /// Timeouts, connection failures, 429 and 5xx answers qualify. Anything
    /// that describes the data itself (404, no match, bad payload) does not.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::LookupError { status: None, .. } => true,
            PipelineError::LookupError {
                status: Some(code), ..
            } => *code == 429 || (500..600).contains(code),
            PipelineError::WithContext { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::NotFound(msg) => write!(f, "Not found: {}", msg),
            PipelineError::NoMatch(msg) => write!(f, "No match: {}", msg),
            PipelineError::LookupError {
                service,
                status: Some(code),
                cause,
            } => write!(f, "{} returned status {}: {}", service, code, cause),
            PipelineError::LookupError {
                service,
                status: None,
                cause,
            } => write!(f, "{} request failed: {}", service, cause),
            PipelineError::MalformedResponse { service, detail } => {
                write!(f, "Malformed response from {}: {}", service, detail)
            }
            PipelineError::Config(msg) => write!(f, "Configuration error: {}", msg),
            PipelineError::EmptyEnrichment => write!(f, "No enriched data"),
            PipelineError::Io(e) => write!(f, "I/O error: {}", e),
            PipelineError::Serialization(e) => write!(f, "Serialization error: {}", e),
            PipelineError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Io(e) => Some(e),
            PipelineError::Serialization(e) => Some(e),
            PipelineError::WithContext { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(err)
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err)
    }
}

impl From<reqwest::Error> for PipelineError {
    /// Converts a `reqwest::Error` into a `LookupError` without a service name.
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        let cause = if err.is_timeout() {
            "timeout".to_string()
        } else {
            err.to_string()
        };
        PipelineError::LookupError {
            service: "http".to_string(),
            status,
            cause,
        }
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `PipelineError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, PipelineError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, PipelineError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, PipelineError> {
    fn context(self, context: impl Into<String>) -> Result<T, PipelineError> {
        self.map_err(|e| PipelineError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, PipelineError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| PipelineError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}

/// Extension for std::io::Error to add context
impl<T> ResultExt<T> for Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, PipelineError> {
        self.map_err(|e| PipelineError::WithContext {
            source: Box::new(PipelineError::Io(e)),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, PipelineError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| PipelineError::WithContext {
            source: Box::new(PipelineError::Io(e)),
            context: f(),
        })
    }
}
