//! Provider trait: the abstraction over model backends.
//!
//! A provider is bound to one model and is addressed by the
//! `"provider/model"` identifier. The runtime only relies on that identifier
//! and on `complete()`; wire formats live in the providers crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Message;

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// One chat turn sent to a provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub messages: Vec<Message>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Overrides the provider's configured limit when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Token usage for one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Cost in USD when the provider reports it
    #[serde(default)]
    pub cost: f64,
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated assistant message
    pub message: Message,

    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// The core Provider trait.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider kind, e.g. "openai".
    fn provider_name(&self) -> &str;

    /// Model name at that provider, e.g. "gpt-4o-mini".
    fn model(&self) -> &str;

    /// `provider/model`
    fn id(&self) -> String {
        format_model_id(self.provider_name(), self.model())
    }

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError>;
}

pub fn format_model_id(provider: &str, model: &str) -> String {
    format!("{provider}/{model}")
}

/// Split a `provider/model` identifier. The model part may itself contain `/`.
pub fn parse_model_id(id: &str) -> Option<(&str, &str)> {
    let (provider, model) = id.split_once('/')?;
    if provider.is_empty() || model.is_empty() {
        return None;
    }
    Some((provider, model))
}
