//! Error types for the proxy engine.

/// Error taxonomy for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },
    #[error("a stump named `{0}` already exists on this instance")]
    DuplicateStumpName(String),
    #[error("port {0} is already in use")]
    PortInUse(u16),
    #[error("failed to bind port {0}: {1}")]
    Bind(u16, String),
    #[error("no server instance with id `{0}`")]
    InstanceNotFound(String),
    #[error("no stump with id `{0}`")]
    StumpNotFound(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

impl EngineError {
    /// Shorthand for an `InvalidArgument` naming the offending parameter.
    pub fn invalid_argument(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    /// The parameter name carried by an `InvalidArgument`, if any.
    pub fn argument_name(&self) -> Option<&'static str> {
        match self {
            Self::InvalidArgument { name, .. } => Some(name),
            _ => None,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
