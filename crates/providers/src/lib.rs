//! LLM provider adapters.
//!
//! Three wire dialects — anthropic-style, openai-style, google-style — are
//! each reduced to the same provider-agnostic [`StreamEvent`] vocabulary and,
//! through [`StreamCollector`], to one terminal aggregate per inference.
//!
//! [`StreamEvent`]: sb_domain::stream::StreamEvent

pub mod anthropic;
pub mod credentials;
pub mod google;
pub mod openai;
pub mod registry;
mod sse;
pub mod traits;
mod util;

pub use credentials::{Credential, CredentialKind, CredentialProvider, EnvCredentials};
pub use registry::ProviderRegistry;
pub use traits::{ChatAggregate, ChatRequest, LlmProvider, StreamCollector};
