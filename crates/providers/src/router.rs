//! Provider router: builds the chat provider and search backend from config.
//!
//! The selection is made once at startup; the same provider instance serves
//! both the orchestration loop and the image describer.

use std::sync::Arc;

use glimpse_config::{AppConfig, ProviderKind, ProviderSelection};
use glimpse_core::provider::Provider;
use glimpse_core::search::SearchBackend;
use tracing::debug;

use crate::anthropic::AnthropicProvider;
use crate::openai_compat::OpenAiCompatProvider;
use crate::valyu::ValyuSearch;

/// Build the provider named by a startup selection.
pub fn build_from_selection(selection: &ProviderSelection) -> Arc<dyn Provider> {
    let base_url = selection
        .api_url
        .clone()
        .unwrap_or_else(|| default_base_url(selection.kind).to_string());

    debug!(provider = selection.kind.name(), base_url = %base_url, model = %selection.model, "Building provider");

    match selection.kind {
        ProviderKind::Anthropic => {
            Arc::new(AnthropicProvider::new(&selection.api_key).with_base_url(base_url))
        }
        ProviderKind::OpenAi | ProviderKind::OpenRouter => Arc::new(OpenAiCompatProvider::new(
            selection.kind.name(),
            base_url,
            &selection.api_key,
        )),
    }
}

/// Build the search backend, if a search credential is configured.
pub fn build_search(config: &AppConfig) -> Option<Arc<dyn SearchBackend>> {
    let api_key = config.search.api_key.clone()?;
    Some(Arc::new(
        ValyuSearch::new(api_key)
            .with_base_url(&config.search.api_url)
            .with_search_type(&config.search.search_type),
    ))
}

/// Get the default base URL for a provider kind.
fn default_base_url(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Anthropic => "https://api.anthropic.com",
        ProviderKind::OpenAi => "https://api.openai.com/v1",
        ProviderKind::OpenRouter => "https://openrouter.ai/api/v1",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selection(kind: ProviderKind, api_url: Option<&str>) -> ProviderSelection {
        ProviderSelection {
            kind,
            api_key: "sk-test".into(),
            api_url: api_url.map(String::from),
            model: kind.default_model().into(),
            vision_model: kind.default_model().into(),
        }
    }

    #[test]
    fn builds_native_anthropic() {
        let provider = build_from_selection(&selection(ProviderKind::Anthropic, None));
        assert_eq!(provider.name(), "anthropic");
    }

    #[test]
    fn builds_openai_compatible_for_openai_and_openrouter() {
        assert_eq!(
            build_from_selection(&selection(ProviderKind::OpenAi, None)).name(),
            "openai"
        );
        assert_eq!(
            build_from_selection(&selection(
                ProviderKind::OpenRouter,
                Some("http://localhost:9999/v1")
            ))
            .name(),
            "openrouter"
        );
    }

    #[test]
    fn default_urls() {
        assert!(default_base_url(ProviderKind::OpenRouter).contains("openrouter.ai"));
        assert!(default_base_url(ProviderKind::OpenAi).contains("api.openai.com"));
    }

    #[test]
    fn search_requires_a_key() {
        let mut config = AppConfig::default();
        assert!(build_search(&config).is_none());

        config.search.api_key = Some("val-test".into());
        let search = build_search(&config).unwrap();
        assert_eq!(search.name(), "valyu");
    }
}
