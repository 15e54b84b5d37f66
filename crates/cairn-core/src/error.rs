//! The error taxonomy surfaced by the generation pipeline.
//!
//! Typed variants cover every refusal the pipeline can make; anything
//! unexpected folds into [`GenerationError::Fatal`] via `anyhow`. Surfaces
//! map these onto HTTP statuses and retry hints.

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by generation triggers and the quiz read path.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Another live run holds the owner's single-flight slot.
    #[error("generation already in progress on roadmap {busy_roadmap}")]
    Conflict { busy_roadmap: Uuid },

    /// The roadmap or milestone index does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The roadmap is published; published content never regenerates.
    #[error("roadmap {0} is published and cannot be regenerated")]
    Immutable(Uuid),

    /// The upstream provider refused for quota reasons. Worth retrying
    /// after a pause; everything generated before the refusal is persisted.
    #[error("upstream rate limit: {0}")]
    RateLimited(String),

    /// The upstream provider returned output the pipeline cannot use.
    #[error("malformed upstream output: {0}")]
    MalformedUpstream(String),

    /// Anything else: connectivity, storage, bugs.
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl GenerationError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Whether a client should retry the same request unchanged. Conflicts
    /// clear when the blocking run finishes; rate limits clear on their own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::RateLimited(_))
    }

    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Conflict { .. } => "conflict",
            Self::NotFound(_) => "not_found",
            Self::Immutable(_) => "immutable",
            Self::RateLimited(_) => "rate_limited",
            Self::MalformedUpstream(_) => "malformed_upstream_output",
            Self::Fatal(_) => "internal",
        }
    }
}

/// Markers that identify a quota refusal in upstream error text.
const RATE_LIMIT_MARKERS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "429",
    "quota",
    "too many requests",
    "overloaded",
];

/// Classify an upstream gateway failure by its error text.
///
/// Providers surface quota refusals as message text rather than anything
/// structured, so the retryable/fatal split is a text heuristic.
pub fn classify_upstream_error(err: anyhow::Error) -> GenerationError {
    let text = format!("{err:#}").to_lowercase();
    if RATE_LIMIT_MARKERS.iter().any(|m| text.contains(m)) {
        GenerationError::RateLimited(format!("{err:#}"))
    } else {
        GenerationError::Fatal(err)
    }
}
