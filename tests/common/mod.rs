//! In-memory collaborators for driving the pipeline without a model, pdfium,
//! PubMed or a TeX installation.

#![allow(dead_code)]

use async_trait::async_trait;
use edgequake_llm::ImageData;
use image::DynamicImage;
use slide2thesis::pipeline::pubmed::{BibliographySource, Paper};
use slide2thesis::pipeline::render::{PageRenderer, RenderedPage};
use slide2thesis::pipeline::toolchain::{BuildRequest, DocumentBuilder};
use slide2thesis::{Collaborators, PipelineConfig, PipelineError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// The sentence every fake chapter contains; citation and figure replies
/// point at it.
pub const CLAIM: &str = "Deep learning improves protein structure prediction.";

// ── Backend ──────────────────────────────────────────────────────────────────

/// Decides whether attempt `n` (1-based) of a prompt fails.
type FailurePlan = Box<dyn Fn(&str, usize) -> Option<PipelineError> + Send + Sync>;

/// Scripted model: replies are chosen by the prompt's opening words.
pub struct FakeBackend {
    calls: AtomicUsize,
    attempts: Mutex<HashMap<String, usize>>,
    fail: FailurePlan,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Self::failing(|_, _| None)
    }

    pub fn failing(
        plan: impl Fn(&str, usize) -> Option<PipelineError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            attempts: Mutex::new(HashMap::new()),
            fail: Box::new(plan),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of requests whose prompt starts with `prefix`.
    pub fn calls_starting_with(&self, prefix: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|(prompt, _)| prompt.starts_with(prefix))
            .map(|(_, n)| *n)
            .sum()
    }
}

fn after<'a>(prompt: &'a str, marker: &str) -> &'a str {
    prompt
        .split_once(marker)
        .map(|(_, rest)| rest)
        .unwrap_or_default()
}

fn reply_for(prompt: &str) -> String {
    if let Some(rest) = prompt.strip_prefix("This is slide ") {
        let page = rest.split_whitespace().next().unwrap_or("0");
        return format!("Slide {page} shows accuracy results for a protein model.");
    }
    if prompt.starts_with("Classify every page") {
        let pages = prompt.matches("\nPage ").count();
        let results: Vec<String> = (3..=pages).map(|p| p.to_string()).collect();
        return format!(
            "Introduction: 1\nRelated Works:\nMethods: 2\nResults: {}\nConclusions:\nAppendix:\nUnrelated:",
            results.join(", ")
        );
    }
    if prompt.starts_with("Write the ") && prompt.contains(" chapter of a thesis") {
        let title = after(prompt, "level-1 heading: # ")
            .lines()
            .next()
            .unwrap_or("Chapter");
        return format!("# {title}\n\n{CLAIM} It builds on decades of work.\n\nA second paragraph.\n");
    }
    if prompt.starts_with("Compare the original page contents") {
        return after(prompt, "**Generated chapter:**\n").to_string();
    }
    if prompt.starts_with("Polish the following thesis chapter") {
        return after(prompt, "Return only the polished chapter.\n\n").to_string();
    }
    if prompt.starts_with("Identify the sentences in this thesis text") {
        return format!(
            r#"{{"sentences": [{{"sentence": "{CLAIM}", "reason": "claim", "key_terms": ["protein structure", "deep learning"]}}]}}"#
        );
    }
    if prompt.starts_with("Identify sentences in the chapter below") {
        return format!(
            r#"{{"figure_references": [{{"sentence": "{CLAIM}", "reason": "chart", "figure_filename": "page_3.png", "figure_caption": "Prediction accuracy"}}]}}"#
        );
    }
    if prompt.starts_with("From the presentation text below") {
        return "Protein Folding with Transformers\nJane Doe\nProf. Alan Smith\nDept. of Biology, Example University"
            .into();
    }
    if prompt.starts_with("Write a concise abstract") {
        return "This work studies protein folding\nwith transformer models.".into();
    }
    if prompt.starts_with("Translate this thesis abstract") {
        return "本研究以轉換器模型探討蛋白質摺疊。".into();
    }
    if prompt.starts_with("Write a heartfelt acknowledgements") {
        return "感謝指導教授的悉心指導。".into();
    }
    if prompt.starts_with("List 4 to 6 keywords") {
        return "protein folding, transformers, deep learning".into();
    }
    "OK".into()
}

#[async_trait]
impl slide2thesis::LlmBackend for FakeBackend {
    fn name(&self) -> String {
        "fake/scripted".into()
    }

    async fn complete(&self, prompt: &str, _images: &[ImageData]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(prompt.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        if let Some(e) = (self.fail)(prompt, attempt) {
            return Err(e);
        }
        Ok(reply_for(prompt))
    }
}

// ── Renderer ─────────────────────────────────────────────────────────────────

/// Renders `pages` blank slides; slide 2 carries one embedded image.
pub struct FakeRenderer {
    pub pages: usize,
}

#[async_trait]
impl PageRenderer for FakeRenderer {
    async fn render(&self, _pdf_path: &Path) -> Result<Vec<RenderedPage>> {
        Ok((1..=self.pages)
            .map(|number| RenderedPage {
                number,
                image: DynamicImage::new_rgb8(8, 6),
                embedded: if number == 2 {
                    vec![DynamicImage::new_rgb8(4, 4)]
                } else {
                    Vec::new()
                },
            })
            .collect())
    }
}

// ── Bibliography ─────────────────────────────────────────────────────────────

/// Every query resolves to the same two papers whose base keys collide.
#[derive(Default)]
pub struct FakeBibliography {
    pub queries: AtomicUsize,
}

pub fn papers() -> Vec<Paper> {
    vec![
        Paper {
            pmid: "111".into(),
            title: "Protein structure prediction".into(),
            authors: vec!["Smith, J".into()],
            journal: "Nature".into(),
            year: "2020".into(),
            doi: Some("10.1/abc".into()),
        },
        Paper {
            pmid: "222".into(),
            title: "Deep learning for proteins".into(),
            authors: vec!["Smith, A".into()],
            journal: "Science".into(),
            year: "2020".into(),
            doi: None,
        },
    ]
}

#[async_trait]
impl BibliographySource for FakeBibliography {
    async fn search(&self, _query: &str, max_results: usize) -> Result<Vec<Paper>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(papers().into_iter().take(max_results).collect())
    }
}

// ── Builder ──────────────────────────────────────────────────────────────────

/// Writes placeholder `.tex` and `.pdf` files instead of running pandoc.
#[derive(Default)]
pub struct FakeBuilder {
    pub requests: Mutex<Vec<BuildRequest>>,
}

#[async_trait]
impl DocumentBuilder for FakeBuilder {
    async fn build(&self, request: &BuildRequest) -> Result<PathBuf> {
        self.requests.lock().unwrap().push(request.clone());
        let tex = request.workdir.join(format!("{}.tex", request.output_stem));
        let pdf = request.workdir.join(format!("{}.pdf", request.output_stem));
        std::fs::write(&tex, "\\documentclass{report}").unwrap();
        std::fs::write(&pdf, b"%PDF-1.5 fake").unwrap();
        Ok(pdf)
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────────

/// Fakes for a deck of `pages` slides.
pub struct Fakes {
    pub backend: Arc<FakeBackend>,
    pub bibliography: Arc<FakeBibliography>,
    pub builder: Arc<FakeBuilder>,
    pub pages: usize,
}

impl Fakes {
    pub fn new(pages: usize) -> Self {
        Self::with_backend(pages, FakeBackend::new())
    }

    pub fn with_backend(pages: usize, backend: Arc<FakeBackend>) -> Self {
        Self {
            backend,
            bibliography: Arc::new(FakeBibliography::default()),
            builder: Arc::new(FakeBuilder::default()),
            pages,
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            backend: self.backend.clone(),
            renderer: Arc::new(FakeRenderer { pages: self.pages }),
            bibliography: self.bibliography.clone(),
            builder: self.builder.clone(),
        }
    }
}

/// Template directory holding every file the registered styles need.
pub fn templates(root: &Path) -> PathBuf {
    let dir = root.join("templates");
    for style in slide2thesis::style::STYLES {
        let style_dir = dir.join(style.template_dir);
        std::fs::create_dir_all(&style_dir).unwrap();
        std::fs::write(style_dir.join(style.template_file), "$body$").unwrap();
        for file in style.required_files {
            std::fs::write(style_dir.join(file), "% stub").unwrap();
        }
    }
    dir
}

/// Fast-retrying configuration for `style`.
pub fn config(style: &str, templates_dir: &Path, workers: usize) -> PipelineConfig {
    PipelineConfig::builder()
        .style(style)
        .concurrency(workers)
        .retry_backoff_ms(1)
        .max_backoff_ms(5)
        .templates_dir(templates_dir)
        .email("lab@example.org")
        .build()
        .unwrap()
}
