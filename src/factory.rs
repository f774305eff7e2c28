use crate::config::{resolve_model, CodexConfig, CodexProviderOptions, WireApi};
use crate::provider::{LanguageModel, Provider};
use crate::providers::openai::{OpenAICompatibleModel, ResponsesInstructions};
use crate::{Error, Result};
use tracing::info;

/// Default provider name for HTTP-backed models.
pub const DEFAULT_PROVIDER_NAME: &str = "codex";

/// Provider that talks to the server configured for the Codex CLI.
///
/// The Codex configuration is re-read each time a model is created, so
/// edits to `config.toml` apply to the next model.
#[derive(Debug, Clone, Default)]
pub struct CodexProvider {
    options: CodexProviderOptions,
}

impl CodexProvider {
    pub fn new(options: CodexProviderOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CodexProviderOptions {
        &self.options
    }

    /// A model using the wire API configured for the selected server.
    pub fn model(&self, model_id: Option<&str>) -> Result<Box<dyn LanguageModel>> {
        self.create(model_id, None)
    }

    /// A Responses API model. Calls always carry instructions.
    pub fn responses(&self, model_id: Option<&str>) -> Result<Box<dyn LanguageModel>> {
        self.create(model_id, Some(WireApi::Responses))
    }

    /// A Chat Completions model.
    pub fn chat(&self, model_id: Option<&str>) -> Result<Box<dyn LanguageModel>> {
        self.create(model_id, Some(WireApi::Chat))
    }

    fn create(
        &self,
        model_id: Option<&str>,
        wire_api: Option<WireApi>,
    ) -> Result<Box<dyn LanguageModel>> {
        let config = CodexConfig::load(&self.options)?;
        self.model_from_config(&config, model_id, wire_api)
    }

    /// Build a model from an already resolved configuration.
    pub fn model_from_config(
        &self,
        config: &CodexConfig,
        model_id: Option<&str>,
        wire_api: Option<WireApi>,
    ) -> Result<Box<dyn LanguageModel>> {
        let model = resolve_model(&config.model, model_id);
        if model.is_empty() {
            return Err(Error::config(
                "No model configured (set model in ~/.codex/config.toml or pass a model id)",
            ));
        }
        let base_url = config.request_base_url()?.ok_or_else(|| {
            Error::config("No base_url configured for the selected model provider")
        })?;

        let wire_api = wire_api.unwrap_or(config.wire_api);
        info!(
            provider = %config.provider_id,
            model = %model,
            wire_api = ?wire_api,
            "creating codex model"
        );

        let inner = OpenAICompatibleModel::new(self.name(), model, base_url, wire_api)?
            .with_api_key(config.api_key.clone())
            .with_headers(config.headers.clone());
        Ok(match wire_api {
            WireApi::Responses => Box::new(ResponsesInstructions::new(inner)),
            WireApi::Chat => Box::new(inner),
        })
    }
}

impl Provider for CodexProvider {
    fn name(&self) -> &str {
        self.options.name.as_deref().unwrap_or(DEFAULT_PROVIDER_NAME)
    }

    fn language_model(&self, model_id: Option<&str>) -> Result<Box<dyn LanguageModel>> {
        self.model(model_id)
    }

    /// Served by the same model; the backend decides what to do with image requests.
    fn image_model(&self, model_id: Option<&str>) -> Result<Box<dyn LanguageModel>> {
        self.model(model_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_for_test;
    use tempfile::TempDir;

    fn home(config: &str) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), config).unwrap();
        dir
    }

    #[test]
    fn test_model_id_resolution() {
        let dir = home("model = \"gpt-5.2-codex\"\n");
        let config = load_for_test(dir.path(), &[]).unwrap();
        let provider = CodexProvider::default();

        let model = provider.model_from_config(&config, None, None).unwrap();
        assert_eq!(model.model_id(), Some("gpt-5.2-codex"));
        assert_eq!(model.provider(), "codex");

        let model = provider
            .model_from_config(&config, Some("default"), None)
            .unwrap();
        assert_eq!(model.model_id(), Some("gpt-5.2-codex"));

        let model = provider
            .model_from_config(&config, Some("o4-mini"), Some(WireApi::Chat))
            .unwrap();
        assert_eq!(model.model_id(), Some("o4-mini"));
    }

    fn config_error(result: Result<Box<dyn LanguageModel>>) -> Error {
        match result {
            Err(e) => e,
            Ok(model) => panic!("Expected config error, got model {:?}", model.model_id()),
        }
    }

    #[test]
    fn test_missing_model() {
        let dir = home("model = \"\"\n");
        let config = load_for_test(dir.path(), &[]).unwrap();
        let err = config_error(CodexProvider::default().model_from_config(&config, None, None));
        assert!(matches!(err, Error::Config(ref message) if message.starts_with("No model configured")));
    }

    #[test]
    fn test_missing_base_url() {
        let dir = home("model_provider = \"custom\"\n[model_providers.custom]\nname = \"Custom\"\n");
        let config = load_for_test(dir.path(), &[]).unwrap();
        let err =
            config_error(CodexProvider::default().model_from_config(&config, Some("m"), None));
        assert!(matches!(
            err,
            Error::Config(ref message) if message == "No base_url configured for the selected model provider"
        ));
    }

    #[test]
    fn test_provider_surface() {
        let dir = home("model_provider = \"local\"\n[model_providers.local]\nbase_url = \"http://127.0.0.1:1/v1\"\n");
        let provider = CodexProvider::new(
            CodexProviderOptions::new()
                .name("my-codex")
                .codex_home(dir.path()),
        );

        assert_eq!(provider.name(), "my-codex");
        assert_eq!(
            provider.language_model(Some("m")).unwrap().provider(),
            "my-codex"
        );
        assert!(provider.responses(Some("m")).is_ok());
        assert!(provider.chat(None).is_ok());
        assert!(provider.image_model(None).is_ok());
        assert!(matches!(
            provider.embedding_model(None),
            Err(Error::Unsupported(_))
        ));
    }
}
