//! LLM provider backend: resolve Gemini vs OpenAI and make single calls.
//!
//! Provider resolution is a pure lookup done once per run, so every step of
//! a job talks to the same model. The call itself is one
//! `LLMProvider::chat` request: a system message carrying the writing role,
//! then a user message with the prompt and any slide images.

use crate::ai::LlmBackend;
use crate::config::{PipelineConfig, ProviderChoice, ProviderKind};
use crate::error::{PipelineError, Result};
use crate::prompts::SYSTEM_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{
    ChatMessage, CompletionOptions, GeminiProvider, ImageData, LLMProvider, OpenAIProvider,
    ProviderFactory,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Classify a model name by prefix. `None` for unknown families.
pub fn detect_provider(model: &str) -> Option<ProviderKind> {
    let m = model.trim().to_lowercase();
    if m.starts_with("gemini") {
        Some(ProviderKind::Gemini)
    } else if ["gpt", "o1", "o3", "o4", "chatgpt"]
        .iter()
        .any(|p| m.starts_with(p))
    {
        Some(ProviderKind::OpenAi)
    } else {
        None
    }
}

/// Resolve which provider and model a run uses.
///
/// 1. An explicit provider wins.
/// 2. With `Auto`, a model name decides by prefix; unknown names fall back
///    to Gemini with a warning.
/// 3. With neither, the first provider with a configured key wins, Gemini
///    before OpenAI; Gemini when no key is known.
pub fn resolve_provider(
    choice: ProviderChoice,
    model: Option<&str>,
    has_gemini_key: bool,
    has_openai_key: bool,
) -> (ProviderKind, String) {
    let kind = match (choice, model) {
        (ProviderChoice::Gemini, _) => ProviderKind::Gemini,
        (ProviderChoice::OpenAi, _) => ProviderKind::OpenAi,
        (ProviderChoice::Auto, Some(m)) => detect_provider(m).unwrap_or_else(|| {
            warn!("Unknown model family '{}'; defaulting to gemini", m);
            ProviderKind::Gemini
        }),
        (ProviderChoice::Auto, None) => {
            if has_gemini_key || !has_openai_key {
                ProviderKind::Gemini
            } else {
                ProviderKind::OpenAi
            }
        }
    };
    let model = model
        .map(str::to_string)
        .unwrap_or_else(|| kind.default_model().to_string());
    (kind, model)
}

fn env_key(var: &str) -> bool {
    std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false)
}

/// [`LlmBackend`] over an `edgequake_llm` provider.
pub struct ProviderBackend {
    provider: Arc<dyn LLMProvider>,
    label: String,
    options: CompletionOptions,
}

impl ProviderBackend {
    /// Wrap an already constructed provider.
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            label: label.into(),
            options: build_options(config),
        }
    }

    /// Resolve and construct the provider described by `config`.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let has_gemini = config.gemini_api_key.is_some() || env_key("GEMINI_API_KEY");
        let has_openai = config.openai_api_key.is_some() || env_key("OPENAI_API_KEY");
        let (kind, model) =
            resolve_provider(config.provider, config.model.as_deref(), has_gemini, has_openai);

        let explicit_key = match kind {
            ProviderKind::Gemini => config.gemini_api_key.as_deref(),
            ProviderKind::OpenAi => config.openai_api_key.as_deref(),
        };

        // A job's own key never touches the process environment; the
        // factory is only the fallback for keys set there by the operator.
        let provider = match explicit_key {
            Some(key) => keyed_provider(kind, key, &model),
            None => ProviderFactory::create_llm_provider(kind.factory_name(), &model).map_err(|e| {
                PipelineError::ProviderNotConfigured {
                    provider: kind.to_string(),
                    hint: format!(
                        "Set {} or pass --{}-api-key.\nError: {}",
                        kind.key_env_var(),
                        kind.factory_name(),
                        e
                    ),
                }
            })?,
        };

        info!("Using {} model {}", kind, model);
        Ok(Self::new(provider, format!("{kind}/{model}"), config))
    }
}

/// Provider built from a key supplied with the job.
fn keyed_provider(kind: ProviderKind, key: &str, model: &str) -> Arc<dyn LLMProvider> {
    match kind {
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(key).with_model(model)),
        ProviderKind::OpenAi => Arc::new(OpenAIProvider::new(key).with_model(model)),
    }
}

#[async_trait]
impl LlmBackend for ProviderBackend {
    fn name(&self) -> String {
        self.label.clone()
    }

    async fn complete(&self, prompt: &str, images: &[ImageData]) -> Result<String> {
        let start = Instant::now();
        let messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user_with_images(prompt, images.to_vec()),
        ];

        match self.provider.chat(&messages, Some(&self.options)).await {
            Ok(response) => {
                debug!(
                    "{}: {} input tokens, {} output tokens, {:?}",
                    self.label,
                    response.prompt_tokens,
                    response.completion_tokens,
                    start.elapsed()
                );
                Ok(response.content)
            }
            Err(e) => Err(classify_error(&e.to_string())),
        }
    }
}

/// Stand-in for a provider that could not be constructed.
///
/// Runs that only compile or re-run offline steps must not need an API
/// key, so construction failures surface on the first call instead.
#[derive(Debug, Clone)]
pub struct UnavailableBackend {
    provider: String,
    hint: String,
}

impl UnavailableBackend {
    pub fn new(provider: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            hint: hint.into(),
        }
    }
}

#[async_trait]
impl LlmBackend for UnavailableBackend {
    fn name(&self) -> String {
        format!("{} (unconfigured)", self.provider)
    }

    async fn complete(&self, _prompt: &str, _images: &[ImageData]) -> Result<String> {
        Err(PipelineError::ProviderNotConfigured {
            provider: self.provider.clone(),
            hint: self.hint.clone(),
        })
    }
}

/// HTTP status codes that are worth retrying, as whole numbers.
static RE_TRANSIENT_STATUS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:429|5\d\d)\b").unwrap());

/// Billing and plan limits: retrying cannot help.
const PERMANENT_MARKERS: [&str; 3] = ["insufficient_quota", "billing", "exceeded your current quota"];

const TRANSIENT_MARKERS: [&str; 11] = [
    "rate limit",
    "rate_limit",
    "too many requests",
    "resource_exhausted",
    "timeout",
    "timed out",
    "overloaded",
    "unavailable",
    "connection reset",
    "connection closed",
    "error sending request",
];

/// Sort a provider error message into transient or permanent.
pub fn classify_error(message: &str) -> PipelineError {
    let m = message.to_lowercase();
    let permanent = PERMANENT_MARKERS.iter().any(|needle| m.contains(needle));
    let transient = RE_TRANSIENT_STATUS.is_match(&m)
        || TRANSIENT_MARKERS.iter().any(|needle| m.contains(needle));
    if transient && !permanent {
        PipelineError::TransientApi {
            message: message.to_string(),
        }
    } else {
        PipelineError::PermanentApi {
            message: message.to_string(),
            attempts: 1,
        }
    }
}

/// Build `CompletionOptions` from the pipeline config.
fn build_options(config: &PipelineConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}
