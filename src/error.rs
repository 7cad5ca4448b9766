use thiserror::Error;

/// Errors produced while binding providers, encoding events and publishing.
///
/// Failures that concern a whole `publish` call (no binding, absent message,
/// encode failure, stopped publisher) are returned to the caller. Failures
/// that concern a single metric or a single listener are logged and isolated.
#[derive(Error, Debug)]
pub enum PublishError {
    /// No transport provider is currently bound.
    #[error("service unavailable: no cloud transport provider is bound")]
    Unavailable,

    /// The publisher has been stopped and no longer accepts work.
    #[error("publisher stopped")]
    Stopped,

    /// An absent or unusable argument was passed in.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A protocol encoder could not build the envelope body.
    #[error("encode failure: {0}")]
    Encode(String),

    /// The encoder chain failed at the byte level.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire bytes could not be decoded back into an envelope.
    #[error("protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Wire bytes decoded but do not form a valid envelope.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// A metric value could not be interpreted as a number.
    #[error("metric `{metric}` is not numeric: {value}")]
    Coercion { metric: String, value: String },

    /// The provider selector produced a malformed filter expression.
    #[error("invalid filter syntax: {0}")]
    FilterSyntax(String),

    /// The bound provider rejected an operation.
    #[error("provider error: {0}")]
    Provider(String),

    /// A configuration value is present but unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A required configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// Configuration document could not be parsed.
    #[error("configuration parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for publisher operations.
pub type Result<T> = std::result::Result<T, PublishError>;
