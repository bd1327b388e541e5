//! Completion-endpoint clients for Parley.
//!
//! All providers implement the `parley_core::Provider` trait. The engine
//! receives one as an injected dependency.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;

use parley_config::AppConfig;
use parley_core::error::ProviderError;

/// Build the configured provider.
///
/// Fails with `NotConfigured` when no API key is available.
pub fn from_config(config: &AppConfig) -> Result<OpenAiCompatProvider, ProviderError> {
    let api_key = config.api_key.clone().ok_or_else(|| {
        ProviderError::NotConfigured(
            "no API key; set PARLEY_API_KEY or OPENROUTER_API_KEY, or api_key in config.toml".into(),
        )
    })?;

    let name = if config.api_url.contains("openrouter.ai") {
        "openrouter"
    } else if config.api_url.contains("api.openai.com") {
        "openai"
    } else {
        "openai_compat"
    };

    Ok(OpenAiCompatProvider::new(name, &config.api_url, api_key)
        .with_timeout(config.engine.completion_timeout()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::Provider;

    #[test]
    fn missing_key_is_not_configured() {
        let result = from_config(&AppConfig::default());
        assert!(matches!(result, Err(ProviderError::NotConfigured(_))));
    }

    #[test]
    fn default_url_selects_openrouter() {
        let config = AppConfig {
            api_key: Some("sk-test".into()),
            ..AppConfig::default()
        };
        let provider = from_config(&config).unwrap();
        assert_eq!(provider.name(), "openrouter");
    }
}
