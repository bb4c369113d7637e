//! CLI binary for slide2thesis.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig` and a step selection, and renders progress.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use slide2thesis::{
    style, Pipeline, PipelineConfig, PipelineError, PipelineObserver, ProviderChoice, RunSummary,
    Step, StepSelection,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// Terminal observer: one spinner for the running step, switching to a bar
/// while the step reports sub-progress, and one log line per finished step.
struct CliObserver {
    bar: ProgressBar,
    /// Start of the running step, for the elapsed column.
    started: Mutex<Instant>,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(Self::spinner_style());
        bar.set_prefix("Preparing");
        bar.set_message("Opening working directory…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            started: Mutex::new(Instant::now()),
        })
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS)
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len}  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS)
    }

    fn label(step: &str) -> String {
        match Step::from_name(step) {
            Some(s) => format!("[{}/{}] {}", s.number(), Step::ALL.len(), s.describe()),
            None => step.to_string(),
        }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl PipelineObserver for CliObserver {
    fn on_step_start(&self, step: &'static str) {
        self.bar.set_style(Self::spinner_style());
        self.bar.set_length(0);
        self.bar.set_position(0);
        self.bar.set_prefix(step);
        self.bar.set_message(format!("{}…", Self::label(step)));
        *self.started.lock().unwrap() = Instant::now();
    }

    fn on_step_skipped(&self, step: &'static str) {
        self.bar.println(format!(
            "  {} {}  {}",
            dim("↷"),
            Self::label(step),
            dim("outputs present, skipped")
        ));
    }

    fn on_step_complete(&self, step: &'static str) {
        self.bar.println(format!(
            "  {} {}  {}",
            green("✓"),
            Self::label(step),
            dim(&format!("{:.1}s", self.started.lock().unwrap().elapsed().as_secs_f64())),
        ));
    }

    fn on_step_failed(&self, step: &'static str, error: &str) {
        // Truncate very long error messages to keep output tidy.
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(['…']).collect()
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} {}  {}", red("✗"), Self::label(step), red(&msg)));
    }

    fn on_subtask_progress(&self, step: &'static str, done: usize, total: usize, message: &str) {
        if self.bar.length() != Some(total as u64) {
            self.bar.set_style(Self::bar_style());
            self.bar.set_length(total as u64);
            self.bar.set_prefix(step);
            self.bar.reset_eta();
        }
        self.bar.set_position(done as u64);
        self.bar.set_message(message.to_string());
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Full pipeline, thesis style
  slide2thesis talk.pdf

  # Journal paper in the Nature style, with a contact email for PubMed
  slide2thesis talk.pdf --style nature --email you@example.org

  # Regenerate only the citations, reusing everything else
  slide2thesis talk.pdf --add-citations

  # Re-typeset after editing a chapter by hand
  slide2thesis talk.pdf --compile

  # Use OpenAI instead of Gemini
  slide2thesis talk.pdf --provider openai --model gpt-4.1

STEPS (in chain order):
  --extract-text        describe every slide            → pages/, images/, extracted_text.txt
  --categorize-pages    assign pages to sections        → classification.json, *_section.txt
  --generate-chapters   write one chapter per section   → *_chapter.md
  --add-citations       PubMed references               → *_chapter_cited.md, references.bib
  --add-figures         reference slide images          → *_chapter_with_figures.md
  --generate-yaml       title, author, abstracts        → metadata.yaml
  --compile             pandoc + tectonic               → thesis.pdf / paper.pdf

  With no step flag every step runs, skipping those whose outputs exist.
  Step flags always regenerate the selected steps.

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key
  OPENAI_API_KEY          OpenAI API key
  PUBMED_EMAIL            Contact email sent with PubMed requests
  SLIDE2THESIS_PROVIDER   Override provider (auto, gemini, openai)
  SLIDE2THESIS_MODEL      Override model ID
  SLIDE2THESIS_STYLE      Override output style
  PDFIUM_LIB_PATH         Directory containing libpdfium
  RUST_LOG                Log filter, overrides --verbose

  Variables may also be set in a .env file in the current directory.

REQUIREMENTS:
  pandoc with the pandoc-crossref filter, and tectonic, on PATH (or set
  --pandoc / --tectonic). libpdfium next to the binary or in PDFIUM_LIB_PATH.
"#;

/// Turn a PDF slide deck into a thesis or journal paper.
#[derive(Parser, Debug)]
#[command(
    name = "slide2thesis",
    version,
    about = "Turn a PDF slide deck into a thesis or journal paper with LLMs",
    long_about = "Turn a PDF slide deck into a compiled thesis or journal paper. Every slide is \
read by a vision model, pages are sorted into sections, chapters are written and expanded, \
claims are grounded in PubMed references, slide figures are placed, and the result is \
typeset with pandoc and tectonic. Intermediate artifacts stay in the output directory so \
any step can be re-run on its own.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// The slide deck.
    #[arg(required_unless_present = "list_styles")]
    pdf: Option<PathBuf>,

    /// LLM provider: auto, gemini, openai.
    #[arg(long, env = "SLIDE2THESIS_PROVIDER", default_value = "auto")]
    provider: String,

    /// LLM model ID (e.g. gemini-2.5-pro, gpt-4.1).
    #[arg(long, env = "SLIDE2THESIS_MODEL")]
    model: Option<String>,

    /// Output style (see --list-styles).
    #[arg(long, env = "SLIDE2THESIS_STYLE", default_value = style::DEFAULT_STYLE)]
    style: String,

    /// Google Gemini API key.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    /// OpenAI API key.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// Contact email for PubMed requests (and the journal author block).
    #[arg(long, env = "PUBMED_EMAIL")]
    email: Option<String>,

    /// Number of concurrent AI calls within a step.
    #[arg(short, long, env = "SLIDE2THESIS_WORKERS", default_value_t = 6)]
    workers: usize,

    /// Run the extraction step.
    #[arg(long)]
    extract_text: bool,

    /// Run the page classification step.
    #[arg(long)]
    categorize_pages: bool,

    /// Run the chapter generation step.
    #[arg(long)]
    generate_chapters: bool,

    /// Run the citation step.
    #[arg(long)]
    add_citations: bool,

    /// Run the figure step.
    #[arg(long)]
    add_figures: bool,

    /// Run the metadata step.
    #[arg(long)]
    generate_yaml: bool,

    /// Run the compilation step.
    #[arg(long)]
    compile: bool,

    /// Citation style file; switches pandoc from natbib to citeproc.
    #[arg(long, env = "SLIDE2THESIS_CSL")]
    csl: Option<PathBuf>,

    /// Print the available output styles and exit.
    #[arg(long)]
    list_styles: bool,

    /// Directory holding the style templates.
    #[arg(long, env = "SLIDE2THESIS_TEMPLATES", default_value = "templates")]
    templates_dir: PathBuf,

    /// Working directory for artifacts [default: <pdf stem>_debug next to the PDF].
    #[arg(short, long, env = "SLIDE2THESIS_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Retries per AI call on transient failure.
    #[arg(long, env = "SLIDE2THESIS_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Rendering DPI (72–400).
    #[arg(long, env = "SLIDE2THESIS_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// PDF user password for encrypted decks.
    #[arg(long, env = "SLIDE2THESIS_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Document title, instead of the one read off the title slide.
    #[arg(long)]
    title: Option<String>,

    /// Author name, instead of the one read off the title slide.
    #[arg(long)]
    author: Option<String>,

    /// pandoc executable.
    #[arg(long, env = "SLIDE2THESIS_PANDOC", default_value = "pandoc")]
    pandoc: PathBuf,

    /// tectonic executable.
    #[arg(long, env = "SLIDE2THESIS_TECTONIC", default_value = "tectonic")]
    tectonic: PathBuf,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "SLIDE2THESIS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "SLIDE2THESIS_QUIET")]
    quiet: bool,
}

impl Cli {
    fn selection(&self) -> StepSelection {
        let flags = [
            (self.extract_text, Step::Extract),
            (self.categorize_pages, Step::Classify),
            (self.generate_chapters, Step::Chapters),
            (self.add_citations, Step::Citations),
            (self.add_figures, Step::Figures),
            (self.generate_yaml, Step::Metadata),
            (self.compile, Step::Compile),
        ];
        StepSelection::from_steps(flags.into_iter().filter(|(on, _)| *on).map(|(_, s)| s))
    }
}

#[tokio::main]
async fn main() {
    // A missing .env is fine; flags and the environment still apply.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => {}
        Err(e) => {
            // Pipeline errors already carry their cause in the message.
            match e.downcast_ref::<PipelineError>() {
                Some(pe) => eprintln!("{} {pe}", red("✘")),
                None => eprintln!("{} {e:#}", red("✘")),
            }
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    if cli.list_styles {
        print_styles();
        return Ok(());
    }

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.verbose;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let pdf = cli.pdf.clone().context("a PDF path is required")?;
    if !pdf.is_file() {
        anyhow::bail!("PDF file not found: '{}'", pdf.display());
    }
    let workdir = cli.output_dir.clone().unwrap_or_else(|| default_workdir(&pdf));
    let config = build_config(&cli)?;
    let selection = cli.selection();

    let observer = show_progress.then(CliObserver::new);
    let mut pipeline = Pipeline::from_config(config, &workdir, &pdf)
        .await
        .context("Failed to set up the pipeline")?;
    if let Some(obs) = &observer {
        pipeline = pipeline.observer(obs.clone());
    }

    let result = pipeline.run(&selection).await;
    if let Some(obs) = &observer {
        obs.finish();
    }
    let summary = result?;

    if !cli.quiet {
        print_summary(&summary, &workdir);
    }
    Ok(())
}

/// `<stem>_debug` next to the PDF.
fn default_workdir(pdf: &Path) -> PathBuf {
    let stem = pdf
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "slides".into());
    pdf.with_file_name(format!("{stem}_debug"))
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let provider: ProviderChoice = cli.provider.parse().context("Invalid --provider")?;
    let mut builder = PipelineConfig::builder()
        .provider(provider)
        .style(cli.style.as_str())
        .concurrency(cli.workers)
        .max_retries(cli.max_retries)
        .dpi(cli.dpi)
        .templates_dir(&cli.templates_dir)
        .pandoc_bin(&cli.pandoc)
        .tectonic_bin(&cli.tectonic);

    if let Some(model) = &cli.model {
        builder = builder.model(model);
    }
    if let Some(key) = &cli.gemini_api_key {
        builder = builder.gemini_api_key(key);
    }
    if let Some(key) = &cli.openai_api_key {
        builder = builder.openai_api_key(key);
    }
    if let Some(email) = &cli.email {
        builder = builder.email(email);
    }
    if let Some(csl) = &cli.csl {
        builder = builder.csl_path(csl);
    }
    if let Some(password) = &cli.password {
        builder = builder.password(password);
    }
    if let Some(title) = &cli.title {
        builder = builder.title(title);
    }
    if let Some(author) = &cli.author {
        builder = builder.author(author);
    }

    builder.build().context("Invalid configuration")
}

fn print_styles() {
    println!("{}", bold("Available styles:"));
    for s in style::STYLES {
        let marker = if s.name == style::DEFAULT_STYLE {
            dim(" (default)")
        } else {
            String::new()
        };
        println!(
            "  {:<10} class {:<8} {:?} schema, output {}.pdf{}",
            cyan(s.name),
            s.document_class,
            s.metadata_schema,
            s.output_stem,
            marker
        );
    }
}

fn print_summary(summary: &RunSummary, workdir: &Path) {
    eprintln!(
        "{}  {} step(s) run, {} skipped  {} AI call(s)  {}ms",
        green("✔"),
        bold(&summary.executed.len().to_string()),
        summary.skipped.len(),
        summary.ai_calls,
        summary.duration_ms,
    );
    match &summary.output {
        Some(output) => eprintln!("   →  {}", bold(&output.display().to_string())),
        None => eprintln!("   artifacts in {}", dim(&workdir.display().to_string())),
    }
}
