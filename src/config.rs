//! Configuration types for a slide-deck-to-document run.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. One struct per run keeps the knobs easy to
//! share across concurrent tasks and easy to log.

use crate::error::PipelineError;
use crate::style::{self, StyleConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Configuration for one pipeline run.
///
/// # Example
/// ```rust
/// use slide2thesis::{PipelineConfig, ProviderChoice};
///
/// let config = PipelineConfig::builder()
///     .provider(ProviderChoice::OpenAi)
///     .model("gpt-4.1")
///     .style("nature")
///     .concurrency(4)
///     .build()
///     .unwrap();
/// assert_eq!(config.style.name, "nature");
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Which LLM provider to use. Default: [`ProviderChoice::Auto`].
    pub provider: ProviderChoice,

    /// Model identifier. `None` uses the provider's default model.
    pub model: Option<String>,

    /// Gemini API key. Falls back to `GEMINI_API_KEY` when `None`.
    pub gemini_api_key: Option<String>,

    /// OpenAI API key. Falls back to `OPENAI_API_KEY` when `None`.
    pub openai_api_key: Option<String>,

    /// Output style. Default: `thesis`.
    pub style: &'static StyleConfig,

    /// Maximum AI sub-tasks in flight within one step. Default: 6.
    ///
    /// Each page description, chapter, citation analysis and lookup is one
    /// sub-task. Lower this when the provider answers with rate-limit errors.
    pub concurrency: usize,

    /// Retries after a transient API failure. Default: 2 (3 attempts total).
    pub max_retries: u32,

    /// Initial retry delay in milliseconds. Default: 1000.
    ///
    /// Doubles after each attempt and is capped at [`Self::max_backoff_ms`];
    /// with the default two retries the waits are 1 s then 2 s.
    pub retry_backoff_ms: u64,

    /// Upper bound on a single retry delay in milliseconds. Default: 10 000.
    pub max_backoff_ms: u64,

    /// Sampling temperature. Default: 0.4.
    pub temperature: f32,

    /// Maximum tokens per completion. Default: 8192.
    ///
    /// Chapters are long; a polished results chapter regularly runs past
    /// 4 000 tokens.
    pub max_tokens: usize,

    /// Rendering DPI used when rasterising each slide. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Maximum rendered image dimension in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// PDF user password for encrypted decks.
    pub password: Option<String>,

    /// Contact email sent with PubMed E-utilities requests.
    pub email: Option<String>,

    /// Results fetched per citation query. Default: 3.
    pub citations_per_query: usize,

    /// Root directory holding `latex/<style>/` template folders. Default: `templates`.
    pub templates_dir: PathBuf,

    /// CSL style file. When set, compilation uses citeproc instead of natbib.
    pub csl_path: Option<PathBuf>,

    /// pandoc executable. Default: `pandoc`.
    pub pandoc_bin: PathBuf,

    /// tectonic executable. Default: `tectonic`.
    pub tectonic_bin: PathBuf,

    /// Overrides the model-extracted title in the metadata document.
    pub title: Option<String>,

    /// Overrides the model-extracted author in the metadata document.
    pub author: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            provider: ProviderChoice::Auto,
            model: None,
            gemini_api_key: None,
            openai_api_key: None,
            style: &style::STYLES[0],
            concurrency: 6,
            max_retries: 2,
            retry_backoff_ms: 1000,
            max_backoff_ms: 10_000,
            temperature: 0.4,
            max_tokens: 8192,
            dpi: 150,
            max_rendered_pixels: 2000,
            password: None,
            email: None,
            citations_per_query: 3,
            templates_dir: PathBuf::from("templates"),
            csl_path: None,
            pandoc_bin: PathBuf::from("pandoc"),
            tectonic_bin: PathBuf::from("tectonic"),
            title: None,
            author: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("gemini_api_key", &self.gemini_api_key.as_ref().map(|_| "<redacted>"))
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "<redacted>"))
            .field("style", &self.style.name)
            .field("concurrency", &self.concurrency)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("dpi", &self.dpi)
            .field("email", &self.email)
            .field("templates_dir", &self.templates_dir)
            .field("csl_path", &self.csl_path)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
            style_name: None,
        }
    }

    /// Builder seeded with this configuration, for per-job overrides.
    pub fn into_builder(self) -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: self,
            style_name: None,
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
    style_name: Option<String>,
}

impl PipelineConfigBuilder {
    pub fn provider(mut self, choice: ProviderChoice) -> Self {
        self.config.provider = choice;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.config.model = (!model.trim().is_empty()).then_some(model);
        self
    }

    pub fn gemini_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.gemini_api_key = Some(key.into()).filter(|k| !k.is_empty());
        self
    }

    pub fn openai_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.openai_api_key = Some(key.into()).filter(|k| !k.is_empty());
        self
    }

    /// Select the output style by registry name; validated in [`Self::build`].
    pub fn style(mut self, name: impl Into<String>) -> Self {
        self.style_name = Some(name.into());
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.config.max_backoff_ms = ms;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.config.email = Some(email.into()).filter(|e| !e.is_empty());
        self
    }

    pub fn citations_per_query(mut self, n: usize) -> Self {
        self.config.citations_per_query = n.clamp(1, 20);
        self
    }

    pub fn templates_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.templates_dir = dir.into();
        self
    }

    pub fn csl_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.csl_path = Some(path.into());
        self
    }

    pub fn pandoc_bin(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pandoc_bin = path.into();
        self
    }

    pub fn tectonic_bin(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.tectonic_bin = path.into();
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.config.title = Some(title.into());
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.config.author = Some(author.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(mut self) -> Result<PipelineConfig, PipelineError> {
        if let Some(name) = self.style_name.take() {
            self.config.style = style::lookup(&name)?;
        }

        let c = &self.config;
        if c.concurrency == 0 {
            return Err(PipelineError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.max_backoff_ms < c.retry_backoff_ms {
            return Err(PipelineError::InvalidConfig(format!(
                "max backoff ({} ms) is shorter than the initial backoff ({} ms)",
                c.max_backoff_ms, c.retry_backoff_ms
            )));
        }
        if c.max_tokens == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Provider selection as given by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderChoice {
    /// Infer from the model name, then from which API keys are configured.
    #[default]
    Auto,
    Gemini,
    #[serde(rename = "openai")]
    OpenAi,
}

impl std::str::FromStr for ProviderChoice {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "auto" => Ok(ProviderChoice::Auto),
            "gemini" | "google" => Ok(ProviderChoice::Gemini),
            "openai" => Ok(ProviderChoice::OpenAi),
            other => Err(PipelineError::InvalidConfig(format!(
                "unknown provider '{other}' (expected auto, gemini or openai)"
            ))),
        }
    }
}

/// A concrete provider after resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    #[serde(rename = "openai")]
    OpenAi,
}

impl ProviderKind {
    /// Name understood by `edgequake_llm::ProviderFactory`.
    pub fn factory_name(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenAi => "openai",
        }
    }

    /// Environment variable the provider reads its key from.
    pub fn key_env_var(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "GEMINI_API_KEY",
            ProviderKind::OpenAi => "OPENAI_API_KEY",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini-2.5-pro",
            ProviderKind::OpenAi => "gpt-4.1",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.factory_name())
    }
}
