use std::fmt;
use thiserror::Error;

/// Which external call a provider failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderStage {
    Embed,
    Generate,
}

impl fmt::Display for ProviderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderStage::Embed => f.write_str("embed"),
            ProviderStage::Generate => f.write_str("generate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Transport failures, timeouts, rate limits and 5xx responses.
    Retryable,
    Fatal,
}

/// Error reported by an embedding or language-model adapter.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Retryable,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Fatal,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ProviderErrorKind::Retryable
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() || error.is_connect() || error.is_request() || error.is_body() {
            ProviderError::retryable(error.to_string())
        } else {
            ProviderError::fatal(error.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid extraction schema: {0}")]
    InvalidSchema(String),

    #[error("invalid page scope: {0}")]
    InvalidPageScope(String),

    #[error("embedding dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("{stage} provider failed after {attempts} attempt(s): {source}")]
    Provider {
        stage: ProviderStage,
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error("no index has been built for this session yet")]
    NotReady,
}

impl RagError {
    /// Input errors are reported immediately and must never be retried.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            RagError::InvalidChunkConfig(_)
                | RagError::InvalidArgument(_)
                | RagError::InvalidSchema(_)
                | RagError::InvalidPageScope(_)
                | RagError::DimensionMismatch { .. }
                | RagError::NotReady
        )
    }

    pub fn provider_stage(&self) -> Option<ProviderStage> {
        match self {
            RagError::Provider { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

pub type Result<T, E = RagError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_names_the_failing_stage() {
        let error = RagError::Provider {
            stage: ProviderStage::Embed,
            attempts: 3,
            source: ProviderError::retryable("429 too many requests"),
        };
        assert_eq!(
            error.to_string(),
            "embed provider failed after 3 attempt(s): 429 too many requests"
        );
        assert_eq!(error.provider_stage(), Some(ProviderStage::Embed));
        assert!(!error.is_input_error());
    }

    #[test]
    fn dimension_mismatch_is_an_input_error() {
        let error = RagError::DimensionMismatch {
            expected: 1536,
            actual: 768,
        };
        assert!(error.is_input_error());
        assert_eq!(error.provider_stage(), None);
    }
}
