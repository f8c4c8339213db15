use thiserror::Error;

/// Errors surfaced by the counting pipeline.
///
/// Grouped the way `spec.md` §7 classifies failures: transient I/O that the
/// caller falls back from, malformed input that is skipped, configuration
/// errors that are fatal only at startup, and internal invariant violations
/// that should be impossible by construction.
#[derive(Error, Debug, Clone)]
pub enum Errors {
    /// A KV backend call (`GET`/`SETEX`/`SCAN`) failed or timed out. Transient:
    /// the caller falls back to an in-memory store and continues.
    #[error("KV store call failed: {0}")]
    KvUnavailable(String),

    /// An event sink write failed or timed out. Transient: the batch stays
    /// buffered and is retried on the next flush.
    #[error("event sink call failed: {0}")]
    SinkUnavailable(String),

    /// A detection was missing a required field or had a malformed shape.
    #[error("malformed detection: {0}")]
    MalformedDetection(String),

    /// A zone definition failed validation (`spec.md` §3).
    #[error("invalid zone {0}: {1}")]
    InvalidZone(String, String),

    /// An embedding did not have the expected dimensionality.
    #[error("embedding has {0} dimensions, expected {1}")]
    EmbeddingDimensionMismatch(usize, usize),

    /// Configuration is missing a required field or names an unknown type.
    /// Fatal at startup; never raised mid-run.
    #[error("configuration error: {0}")]
    Config(String),

    /// An invariant the design treats as impossible by construction was
    /// violated. Logged at error level with a state snapshot by the caller;
    /// this variant just carries the description.
    #[error("internal invariant violated: {0}")]
    InvariantViolation(String),
}

pub type Result<T> = std::result::Result<T, Errors>;
