//! Generation step abstraction
//!
//! The correction loop only knows that a [`Generator`] turns a
//! [`ContextBundle`] into completion text. The HTTP chat-completions client
//! lives in the application crate; tests script their own generators.

use crate::context_packer::ContextBundle;
use async_trait::async_trait;
use thiserror::Error;

/// Why a generation call produced no completion.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("request to language model failed: {0}")]
    RequestFailed(String),

    #[error("language model returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("language model returned an empty completion")]
    EmptyResponse,

    #[error("could not parse language model response: {0}")]
    Parse(String),

    #[error("no API key configured for the language model endpoint")]
    MissingApiKey,
}

/// Produces a candidate artifact (as raw completion text) from a bundle.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, bundle: &ContextBundle) -> Result<String, GenerationError>;
}

#[async_trait]
impl<G: Generator + ?Sized> Generator for std::sync::Arc<G> {
    async fn generate(&self, bundle: &ContextBundle) -> Result<String, GenerationError> {
        (**self).generate(bundle).await
    }
}
