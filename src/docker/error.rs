//! Error type for Docker engine operations

/// Error type for Docker engine operations
#[derive(Debug)]
pub enum EngineError {
    /// Could not reach the engine (socket missing, connection refused, ...)
    Connection(String),
    /// The engine answered with a non-success status
    Api { status: u16, message: String },
    /// A response stream broke mid-way
    Stream(String),
    /// The engine sent something we could not decode
    Decode(serde_json::Error),
    /// `DOCKER_HOST` could not be understood
    InvalidHost(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Connection(msg) => write!(f, "Docker connection error: {}", msg),
            EngineError::Api { status, message } => {
                write!(f, "Docker API error ({}): {}", status, message)
            }
            EngineError::Stream(msg) => write!(f, "Docker stream error: {}", msg),
            EngineError::Decode(e) => write!(f, "Docker response decode error: {}", e),
            EngineError::InvalidHost(host) => write!(f, "Invalid DOCKER_HOST: {}", host),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl EngineError {
    /// Short variant name, stored as the job error name
    pub fn name(&self) -> &'static str {
        match self {
            EngineError::Connection(_) => "ConnectionError",
            EngineError::Api { .. } => "ApiError",
            EngineError::Stream(_) => "StreamError",
            EngineError::Decode(_) => "DecodeError",
            EngineError::InvalidHost(_) => "InvalidHost",
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Decode(e)
    }
}

impl From<hyper_util::client::legacy::Error> for EngineError {
    fn from(e: hyper_util::client::legacy::Error) -> Self {
        EngineError::Connection(e.to_string())
    }
}

impl From<hyper::Error> for EngineError {
    fn from(e: hyper::Error) -> Self {
        EngineError::Stream(e.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            EngineError::Connection(e.to_string())
        } else {
            EngineError::Stream(e.to_string())
        }
    }
}

impl From<EngineError> for crate::jobs::JobError {
    fn from(e: EngineError) -> Self {
        crate::jobs::JobError::from_error(&e).with_name(e.name())
    }
}
