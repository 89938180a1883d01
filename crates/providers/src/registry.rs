//! Provider registry.
//!
//! Constructs and holds every configured LLM provider instance. A provider
//! that fails to initialize is recorded and skipped rather than aborting
//! startup; its error message has anything secret-shaped masked before it
//! can reach logs or status endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use sb_domain::config::{LlmConfig, ProviderKind};
use sb_domain::error::{Error, Result};

use crate::anthropic::AnthropicProvider;
use crate::credentials::CredentialProvider;
use crate::google::GoogleProvider;
use crate::openai::OpenAiProvider;
use crate::traits::LlmProvider;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProviderRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    default_id: Option<String>,
    init_errors: Vec<ProviderInitError>,
}

/// A provider that failed to initialize.
#[derive(Debug, Clone)]
pub struct ProviderInitError {
    pub provider_id: String,
    pub error: String,
}

/// Mask substrings that look like API keys or bearer tokens.
fn mask_secrets(msg: &str) -> String {
    let mut result = msg.to_owned();
    for word in msg.split(|c: char| c.is_whitespace() || c == '\'' || c == '"' || c == ',') {
        let trimmed = word.trim();
        if trimmed.len() >= 20
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            let masked = format!("{}...{}", &trimmed[..4], &trimmed[trimmed.len() - 4..]);
            result = result.replace(trimmed, &masked);
        }
    }
    result
}

impl ProviderRegistry {
    /// Instantiate every configured provider.
    pub fn from_config(
        config: &LlmConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        let mut init_errors = Vec::new();

        for pc in &config.providers {
            let built: Result<Arc<dyn LlmProvider>> = match pc.kind {
                ProviderKind::Anthropic => {
                    AnthropicProvider::from_config(pc, credentials.clone())
                        .map(|p| Arc::new(p) as Arc<dyn LlmProvider>)
                }
                ProviderKind::Openai => OpenAiProvider::from_config(pc, credentials.clone())
                    .map(|p| Arc::new(p) as Arc<dyn LlmProvider>),
                ProviderKind::Google => GoogleProvider::from_config(pc, credentials.clone())
                    .map(|p| Arc::new(p) as Arc<dyn LlmProvider>),
            };

            match built {
                Ok(provider) => {
                    tracing::info!(provider = %pc.id, kind = ?pc.kind, "LLM provider ready");
                    providers.insert(pc.id.clone(), provider);
                }
                Err(e) => {
                    let masked = mask_secrets(&e.to_string());
                    tracing::warn!(provider = %pc.id, error = %masked, "provider init failed");
                    init_errors.push(ProviderInitError {
                        provider_id: pc.id.clone(),
                        error: masked,
                    });
                }
            }
        }

        Self {
            providers,
            default_id: config.default_provider.clone(),
            init_errors,
        }
    }

    /// Register a provider instance directly (tests, embedders).
    pub fn with_provider(provider: Arc<dyn LlmProvider>) -> Self {
        let id = provider.id().to_owned();
        Self {
            providers: HashMap::from([(id.clone(), provider)]),
            default_id: Some(id),
            init_errors: Vec::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(id).cloned()
    }

    /// Resolve a `provider/model` spec (or bare provider id) to a provider
    /// and optional model override; `None` resolves to the default.
    pub fn resolve(&self, spec: Option<&str>) -> Result<(Arc<dyn LlmProvider>, Option<String>)> {
        if let Some(spec) = spec {
            let provider_id = spec.split('/').next().unwrap_or(spec);
            if let Some(p) = self.get(provider_id) {
                let model = spec.split_once('/').map(|(_, m)| m.to_owned());
                return Ok((p, model));
            }
            return Err(Error::NotReady(format!(
                "no provider matches model spec '{spec}'"
            )));
        }

        if let Some(ref id) = self.default_id {
            if let Some(p) = self.get(id) {
                return Ok((p, None));
            }
        }
        // Any available provider.
        if let Some(p) = self.providers.values().next() {
            return Ok((p.clone(), None));
        }
        Err(Error::NotReady(
            "no LLM providers available; configure at least one under [llm.providers]".into(),
        ))
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn init_errors(&self) -> &[ProviderInitError] {
        &self.init_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentials;
    use sb_domain::config::ProviderConfig;

    fn registry() -> ProviderRegistry {
        let config = LlmConfig {
            providers: vec![
                ProviderConfig {
                    id: "anthropic".into(),
                    kind: ProviderKind::Anthropic,
                    base_url: String::new(),
                    default_model: None,
                    auth_env: "A".into(),
                },
                ProviderConfig {
                    id: "openai".into(),
                    kind: ProviderKind::Openai,
                    base_url: String::new(),
                    default_model: None,
                    auth_env: "B".into(),
                },
            ],
            default_provider: Some("anthropic".into()),
            ..Default::default()
        };
        ProviderRegistry::from_config(&config, Arc::new(StaticCredentials::new("k")))
    }

    #[test]
    fn resolves_spec_with_model() {
        let r = registry();
        let (p, model) = r.resolve(Some("openai/gpt-4o-mini")).unwrap();
        assert_eq!(p.id(), "openai");
        assert_eq!(model.as_deref(), Some("gpt-4o-mini"));
    }

    #[test]
    fn resolves_bare_provider_id() {
        let r = registry();
        let (p, model) = r.resolve(Some("anthropic")).unwrap();
        assert_eq!(p.id(), "anthropic");
        assert!(model.is_none());
    }

    #[test]
    fn none_resolves_default() {
        let r = registry();
        let (p, _) = r.resolve(None).unwrap();
        assert_eq!(p.id(), "anthropic");
    }

    #[test]
    fn unknown_spec_errors() {
        let r = registry();
        assert!(r.resolve(Some("mistral/large")).is_err());
    }

    #[test]
    fn empty_registry_errors_on_resolve() {
        let r = ProviderRegistry::from_config(
            &LlmConfig::default(),
            Arc::new(StaticCredentials::new("k")),
        );
        assert!(r.is_empty());
        assert!(r.resolve(None).is_err());
    }

    #[test]
    fn mask_secrets_redacts_long_tokens() {
        let msg = "auth failed for key sk-ant-REDACTED";
        let masked = mask_secrets(msg);
        assert!(!masked.contains("abcdefghijklmnop"));
        assert!(masked.contains("..."));
    }

    #[test]
    fn mask_secrets_keeps_short_words() {
        assert_eq!(mask_secrets("connection refused"), "connection refused");
    }
}
