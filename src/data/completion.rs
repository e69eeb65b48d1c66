use std::fmt;

/// Errors surfaced by the completion and embedding collaborators.
#[derive(Debug, Clone)]
pub enum ServiceError {
    /// No usable credentials were supplied for the service.
    MissingCredentials(String),
    /// The request could not be sent or the service answered with an error.
    Transport(String),
    /// The service answered, but not in the shape the caller expected.
    InvalidResponse(String),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ServiceError::MissingCredentials(detail) => {
                write!(f, "missing credentials: {}", detail)
            }
            ServiceError::Transport(detail) => write!(f, "transport failure: {}", detail),
            ServiceError::InvalidResponse(detail) => write!(f, "invalid response: {}", detail),
        }
    }
}

impl std::error::Error for ServiceError {}

/// The text-completion collaborator: one prompt in, one text response out.
///
/// The response may be plain structured data or prose containing a single
/// extractable JSON object; callers are responsible for defensive parsing
/// and must treat any failure as "no usable answer", never as a crash.
pub trait CompletionService {
    fn complete(&self, prompt: &str) -> Result<String, ServiceError>;
}

/// Optional embeddings collaborator used for semantic match boosting.
///
/// Implementations must return exactly one vector per input text, in input
/// order. Callers treat a length mismatch the same as an error: semantic
/// scoring is skipped and heuristics carry the run.
pub trait EmbeddingService {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError>;
}
