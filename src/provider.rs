use crate::{CallOptions, Error, GenerateResult, Result, StreamResponse};
use std::convert::Infallible;

/// A text generation backend.
///
/// `do_generate` waits for the full answer; `do_stream` returns as soon as the
/// call is underway and yields parts as the backend produces them.
#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    /// Name of the provider that created this model.
    fn provider(&self) -> &str;

    /// Model identifier, if one was selected.
    fn model_id(&self) -> Option<&str>;

    /// Run a generation and return the aggregated result.
    async fn do_generate(&self, options: CallOptions) -> Result<GenerateResult>;

    /// Run a generation and return a live stream of parts.
    async fn do_stream(&self, options: CallOptions) -> Result<StreamResponse>;
}

#[async_trait::async_trait]
impl<M: LanguageModel + ?Sized> LanguageModel for Box<M> {
    fn provider(&self) -> &str {
        (**self).provider()
    }

    fn model_id(&self) -> Option<&str> {
        (**self).model_id()
    }

    async fn do_generate(&self, options: CallOptions) -> Result<GenerateResult> {
        (**self).do_generate(options).await
    }

    async fn do_stream(&self, options: CallOptions) -> Result<StreamResponse> {
        (**self).do_stream(options).await
    }
}

/// A capability object handing out models by id.
pub trait Provider: Send + Sync {
    /// Create a language model. `None` selects the provider's default model.
    fn language_model(&self, model_id: Option<&str>) -> Result<Box<dyn LanguageModel>>;

    /// Embedding models are not offered by the codex backends.
    fn embedding_model(&self, _model_id: Option<&str>) -> Result<Infallible> {
        Err(Error::unsupported(format!(
            "{} does not support embeddings",
            self.name()
        )))
    }

    fn image_model(&self, model_id: Option<&str>) -> Result<Box<dyn LanguageModel>>;

    /// Provider name reported by the models it creates.
    fn name(&self) -> &str;
}
