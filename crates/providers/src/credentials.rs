//! Credential lookup and the OAuth header policy.
//!
//! The runtime never stores credentials: adapters ask the provider for a
//! secret on every request. A secret is either a long-lived API key or an
//! OAuth-style bearer token, distinguished by prefix. Bearer identities
//! require vendor-specific companion headers; those are data in a table
//! here, not branches scattered through the adapters. Token refresh belongs
//! to whatever issued the token, not to this crate.

use std::collections::HashMap;

use sb_domain::config::{LlmConfig, ProviderKind};
use sb_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Credential types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    /// Long-lived vendor API key; sent via the vendor's key header.
    ApiKey,
    /// Short-lived bearer token; sent as `Authorization: Bearer` plus the
    /// vendor's identity headers.
    OauthBearer,
}

/// A resolved secret plus its classification.
#[derive(Clone)]
pub struct Credential {
    pub secret: String,
    pub kind: CredentialKind,
}

// Manual Debug to keep secrets out of logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("kind", &self.kind)
            .field("secret_len", &self.secret.len())
            .finish()
    }
}

/// Prefixes that mark a secret as an OAuth-style bearer token.
const OAUTH_PREFIXES: &[&str] = &["sk-ant-oat", "oauth:", "eyJ"];

/// Classify a secret by prefix.
pub fn is_oauth_token(secret: &str) -> bool {
    OAUTH_PREFIXES.iter().any(|p| secret.starts_with(p))
}

/// Vendor-specific companion headers required when authenticating with a
/// bearer identity. Keyed by dialect; adapters apply these verbatim.
pub fn identity_headers(kind: ProviderKind) -> &'static [(&'static str, &'static str)] {
    match kind {
        ProviderKind::Anthropic => &[("anthropic-beta", "oauth-2025-04-20")],
        ProviderKind::Openai => &[("openai-beta", "responses=experimental")],
        ProviderKind::Google => &[],
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider trait + environment implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Serves a secret for a provider instance, consulted on every request.
pub trait CredentialProvider: Send + Sync {
    fn get(&self, provider_id: &str) -> Result<Credential>;
}

/// Reads secrets from environment variables named in the provider config.
pub struct EnvCredentials {
    env_by_provider: HashMap<String, String>,
}

impl EnvCredentials {
    pub fn from_config(config: &LlmConfig) -> Self {
        let env_by_provider = config
            .providers
            .iter()
            .map(|p| (p.id.clone(), p.auth_env.clone()))
            .collect();
        Self { env_by_provider }
    }

    /// Direct construction for tests and embedders.
    pub fn with_env(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            env_by_provider: pairs.into_iter().collect(),
        }
    }
}

impl CredentialProvider for EnvCredentials {
    fn get(&self, provider_id: &str) -> Result<Credential> {
        let env_name = self.env_by_provider.get(provider_id).ok_or_else(|| {
            Error::MissingCredential(format!("no auth_env configured for '{provider_id}'"))
        })?;

        let secret = std::env::var(env_name).map_err(|_| {
            Error::MissingCredential(format!(
                "environment variable '{env_name}' not set (provider '{provider_id}')"
            ))
        })?;
        if secret.is_empty() {
            return Err(Error::MissingCredential(format!(
                "environment variable '{env_name}' is empty (provider '{provider_id}')"
            )));
        }

        let kind = if is_oauth_token(&secret) {
            CredentialKind::OauthBearer
        } else {
            CredentialKind::ApiKey
        };
        Ok(Credential { secret, kind })
    }
}

/// Fixed-secret provider for tests.
pub struct StaticCredentials {
    secret: String,
}

impl StaticCredentials {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl CredentialProvider for StaticCredentials {
    fn get(&self, _provider_id: &str) -> Result<Credential> {
        let kind = if is_oauth_token(&self.secret) {
            CredentialKind::OauthBearer
        } else {
            CredentialKind::ApiKey
        };
        Ok(Credential {
            secret: self.secret.clone(),
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_keys_are_not_oauth() {
        assert!(!is_oauth_token("sk-ant-api03-abcdef"));
        assert!(!is_oauth_token("AIzaSyDummy"));
    }

    #[test]
    fn oauth_prefixes_are_recognized() {
        assert!(is_oauth_token("sk-ant-oat01-xyz"));
        assert!(is_oauth_token("oauth:token-value"));
        assert!(is_oauth_token("eyJhbGciOi")); // JWT shape
    }

    #[test]
    fn anthropic_bearer_carries_identity_headers() {
        let headers = identity_headers(ProviderKind::Anthropic);
        assert!(headers.iter().any(|(k, _)| *k == "anthropic-beta"));
    }

    #[test]
    fn google_bearer_needs_no_extra_headers() {
        assert!(identity_headers(ProviderKind::Google).is_empty());
    }

    #[test]
    fn static_credentials_classify_by_prefix() {
        let c = StaticCredentials::new("sk-ant-oat01-abc").get("any").unwrap();
        assert_eq!(c.kind, CredentialKind::OauthBearer);
        let c = StaticCredentials::new("sk-ant-api03-abc").get("any").unwrap();
        assert_eq!(c.kind, CredentialKind::ApiKey);
    }

    #[test]
    fn missing_provider_mapping_errors() {
        let creds = EnvCredentials::with_env(Vec::new());
        let err = creds.get("ghost").unwrap_err();
        assert!(matches!(err, Error::MissingCredential(_)));
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let c = Credential {
            secret: "super-secret-value".into(),
            kind: CredentialKind::ApiKey,
        };
        let rendered = format!("{c:?}");
        assert!(!rendered.contains("super-secret-value"));
    }
}
