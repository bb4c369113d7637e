//! HTTP server binary for slide2thesis.
//!
//! Serves the job API from [`slide2thesis::server`]. Server-wide defaults
//! (API keys, templates, toolchain paths) come from flags and the
//! environment; each submission may override provider, model, style, keys,
//! email and worker count.

use anyhow::{Context, Result};
use clap::Parser;
use slide2thesis::server::{router, AppState};
use slide2thesis::{style, PipelineConfig, ProviderChoice};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Serve the slide2thesis job API.
#[derive(Parser, Debug)]
#[command(
    name = "slide2thesis-server",
    version,
    about = "Serve the slide2thesis job API over HTTP"
)]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "SLIDE2THESIS_BIND", default_value = "127.0.0.1:5000")]
    bind: SocketAddr,

    /// Directory for uploads, working directories and bundles.
    #[arg(long, env = "SLIDE2THESIS_DATA_DIR", default_value = "jobs")]
    data_dir: PathBuf,

    /// Default LLM provider: auto, gemini, openai.
    #[arg(long, env = "SLIDE2THESIS_PROVIDER", default_value = "auto")]
    provider: String,

    /// Default output style.
    #[arg(long, env = "SLIDE2THESIS_STYLE", default_value = style::DEFAULT_STYLE)]
    style: String,

    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// Default contact email for PubMed requests.
    #[arg(long, env = "PUBMED_EMAIL")]
    email: Option<String>,

    /// Directory holding the style templates.
    #[arg(long, env = "SLIDE2THESIS_TEMPLATES", default_value = "templates")]
    templates_dir: PathBuf,

    /// Citation style file applied to every job.
    #[arg(long, env = "SLIDE2THESIS_CSL")]
    csl: Option<PathBuf>,

    #[arg(long, env = "SLIDE2THESIS_PANDOC", default_value = "pandoc")]
    pandoc: PathBuf,

    #[arg(long, env = "SLIDE2THESIS_TECTONIC", default_value = "tectonic")]
    tectonic: PathBuf,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "SLIDE2THESIS_VERBOSE")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let base_config = build_config(&args)?;
    tokio::fs::create_dir_all(&args.data_dir)
        .await
        .with_context(|| format!("Failed to create {}", args.data_dir.display()))?;

    let app = router(AppState::new(&args.data_dir, base_config));
    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("Failed to bind {}", args.bind))?;
    info!(
        "slide2thesis-server listening on http://{} (data in {})",
        args.bind,
        args.data_dir.display()
    );
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

fn build_config(args: &Args) -> Result<PipelineConfig> {
    let provider: ProviderChoice = args.provider.parse().context("Invalid --provider")?;
    let mut builder = PipelineConfig::builder()
        .provider(provider)
        .style(args.style.as_str())
        .templates_dir(&args.templates_dir)
        .pandoc_bin(&args.pandoc)
        .tectonic_bin(&args.tectonic);
    if let Some(key) = &args.gemini_api_key {
        builder = builder.gemini_api_key(key);
    }
    if let Some(key) = &args.openai_api_key {
        builder = builder.openai_api_key(key);
    }
    if let Some(email) = &args.email {
        builder = builder.email(email);
    }
    if let Some(csl) = &args.csl {
        builder = builder.csl_path(csl);
    }
    builder.build().context("Invalid configuration")
}
