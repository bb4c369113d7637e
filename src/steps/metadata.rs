//! Metadata generation: the YAML document the template reads.
//!
//! Title, author and advisor come from the introduction pages; the abstract
//! is written over all chapters. Both calls run concurrently. The thesis
//! schema then adds a Traditional Chinese abstract and acknowledgements, the
//! journal schema a keyword list.

use super::{chapter_set, read_chapters, Step, StepContext, StepOutcome};
use crate::document::{ChapterStage, SectionKind};
use crate::error::{PipelineError, Result};
use crate::prompts;
use crate::store::Artifact;
use crate::style::MetadataSchema;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::info;

const STEP: Step = Step::Metadata;

const FALLBACK_TITLE: &str = "Thesis Title";
const FALLBACK_AUTHOR: &str = "Author Name";

/// Front-matter facts read off the title slide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInfo {
    pub title: String,
    pub author: String,
    pub advisor: Option<String>,
    pub affiliation: Option<String>,
}

static RE_INFO_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:\d+[.)]\s+)?(?:(?:\*\*)?(?:the\s+)?(?:title|author(?:'s name)?|advisor(?:'s name)?|supervisor|affiliation|department and institution)(?:\*\*)?\s*:\s*(?:\*\*)?)?",
    )
    .unwrap()
});

fn info_line(line: Option<&str>) -> Option<String> {
    let line = RE_INFO_LABEL.replace(line?.trim(), "");
    let value = line.trim().trim_matches('*').trim().trim_matches('"').trim();
    let absent = value.is_empty()
        || ["none", "n/a", "not present", "not available", "unknown"]
            .iter()
            .any(|marker| value.eq_ignore_ascii_case(marker));
    (!absent).then(|| value.to_string())
}

/// Parse the four-line info reply. Missing title/author fall back to
/// placeholders; missing advisor/affiliation stay `None`.
pub fn parse_document_info(reply: &str) -> DocumentInfo {
    let mut lines = reply.trim().lines();
    DocumentInfo {
        title: info_line(lines.next()).unwrap_or_else(|| FALLBACK_TITLE.into()),
        author: info_line(lines.next()).unwrap_or_else(|| FALLBACK_AUTHOR.into()),
        advisor: info_line(lines.next()),
        affiliation: info_line(lines.next()),
    }
}

// ── Schemas ──────────────────────────────────────────────────────────────

/// Metadata consumed by the thesis template.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThesisMetadata {
    pub title: String,
    pub author: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supervisor: Option<String>,
    pub date: String,
    pub documentclass: String,
    pub toc: bool,
    #[serde(rename = "toc-depth")]
    pub toc_depth: u8,
    #[serde(rename = "figPrefix")]
    pub fig_prefix: String,
    #[serde(rename = "eqnPrefix")]
    pub eqn_prefix: String,
    #[serde(rename = "tblPrefix")]
    pub tbl_prefix: String,
    #[serde(rename = "secPrefix")]
    pub sec_prefix: String,
    #[serde(rename = "linkReferences")]
    pub link_references: bool,
    #[serde(rename = "abstract")]
    pub abstract_en: String,
    #[serde(rename = "abstract-zh")]
    pub abstract_zh: String,
    #[serde(rename = "acknowledgements-zh")]
    pub acknowledgements_zh: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalAuthor {
    pub given_name: String,
    pub family_name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Affiliation {
    pub department: String,
    pub organization: String,
}

/// Metadata consumed by journal templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalMetadata {
    pub title: String,
    pub authors: Vec<JournalAuthor>,
    pub affiliations: Vec<Affiliation>,
    #[serde(rename = "abstract")]
    pub abstract_en: String,
    pub keywords: Vec<String>,
    pub date: String,
}

/// One of the two schemas.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetadataDocument {
    Thesis(ThesisMetadata),
    Journal(JournalMetadata),
}

impl MetadataDocument {
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| PipelineError::Internal(format!("metadata YAML: {e}")))
    }
}

/// Split "Given Names Family" at the last space.
fn split_name(name: &str) -> (String, String) {
    match name.trim().rsplit_once(' ') {
        Some((given, family)) => (given.trim().to_string(), family.to_string()),
        None => (String::new(), name.trim().to_string()),
    }
}

/// "Department, Institution" → affiliation; a single part is the organisation.
fn split_affiliation(line: &str) -> Affiliation {
    match line.split_once(',') {
        Some((department, organization)) => Affiliation {
            department: department.trim().to_string(),
            organization: organization.trim().to_string(),
        },
        None => Affiliation {
            department: String::new(),
            organization: line.trim().to_string(),
        },
    }
}

fn parse_keywords(reply: &str) -> Vec<String> {
    reply
        .trim()
        .trim_start_matches("Keywords:")
        .split([',', ';', '\n'])
        .map(|k| k.trim().trim_matches('*').trim().to_string())
        .filter(|k| !k.is_empty())
        .collect()
}

/// Abstracts must be one paragraph for the templates.
fn single_paragraph(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Step ─────────────────────────────────────────────────────────────────

pub(crate) async fn run(ctx: &StepContext) -> Result<StepOutcome> {
    let kinds = chapter_set(ctx, ChapterStage::WithFigures, STEP).await?;
    let chapters = read_chapters(ctx, &kinds, ChapterStage::WithFigures, STEP).await?;

    let introduction = if ctx.store.exists(Artifact::Section(SectionKind::Introduction)) {
        ctx.store
            .read(Artifact::Section(SectionKind::Introduction))
            .await?
    } else {
        chapters
            .first()
            .map(|(_, text)| text.clone())
            .unwrap_or_default()
    };
    let content = chapters
        .iter()
        .map(|(_, text)| text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let ai = &ctx.ai;
    let info_prompt = prompts::document_info(&introduction);
    let abstract_prompt = prompts::abstract_en(&content);
    let (info_reply, abstract_reply) = tokio::try_join!(
        ai.generate(&info_prompt, &[]),
        ai.generate(&abstract_prompt, &[]),
    )?;

    let mut info = parse_document_info(&info_reply);
    if let Some(title) = &ctx.config.title {
        info.title = title.clone();
    }
    if let Some(author) = &ctx.config.author {
        info.author = author.clone();
    }
    let abstract_en = single_paragraph(&abstract_reply);
    let date = chrono::Local::now().format("%Y-%m-%d").to_string();
    info!("Metadata for '{}' by {}", info.title, info.author);

    let document = match ctx.config.style.metadata_schema {
        MetadataSchema::Thesis => {
            let zh_prompt = prompts::abstract_zh(&abstract_en);
            let thanks_prompt = prompts::acknowledgements_zh(info.advisor.as_deref());
            let (abstract_zh, acknowledgements) = tokio::try_join!(
                ai.generate(&zh_prompt, &[]),
                ai.generate(&thanks_prompt, &[]),
            )?;
            MetadataDocument::Thesis(ThesisMetadata {
                title: info.title,
                author: info.author,
                supervisor: info.advisor,
                date,
                documentclass: "report".into(),
                toc: true,
                toc_depth: 2,
                fig_prefix: "Figure".into(),
                eqn_prefix: "Equation".into(),
                tbl_prefix: "Table".into(),
                sec_prefix: "Section".into(),
                link_references: true,
                abstract_en,
                abstract_zh: single_paragraph(&abstract_zh),
                acknowledgements_zh: acknowledgements.trim().to_string(),
            })
        }
        MetadataSchema::Journal => {
            let keywords = ai.generate(&prompts::keywords(&abstract_en), &[]).await?;
            let (given_name, family_name) = split_name(&info.author);
            MetadataDocument::Journal(JournalMetadata {
                title: info.title,
                authors: vec![JournalAuthor {
                    given_name,
                    family_name,
                    email: ctx.config.email.clone().unwrap_or_default(),
                }],
                affiliations: info
                    .affiliation
                    .as_deref()
                    .map(split_affiliation)
                    .into_iter()
                    .collect(),
                abstract_en,
                keywords: parse_keywords(&keywords),
                date,
            })
        }
    };

    ctx.store.write(Artifact::Metadata, document.to_yaml()?).await?;
    Ok(StepOutcome {
        artifacts: vec![Artifact::Metadata.name()],
    })
}
