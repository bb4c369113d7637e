//! Figure integration: reference slide images from the chapters.
//!
//! Candidate figures are the images extracted from the deck, each described
//! to the model by the text of the slide it came from. Introduction, methods
//! and results chapters are analysed concurrently; rewriting then runs
//! sequentially in chapter order so figure ids are deterministic and unique
//! across the whole document.

use super::{chapter_set, parse_json_reply, read_chapters, Step, StepContext, StepOutcome};
use crate::document::{ChapterStage, SectionKind};
use crate::error::Result;
use crate::prompts;
use crate::store::{Artifact, IMAGES_DIR};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

const STEP: Step = Step::Figures;

/// The model's suggestion to reference a figure from a sentence.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FigureSuggestion {
    pub sentence: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub figure_filename: String,
    #[serde(default)]
    pub figure_caption: String,
}

#[derive(Debug, Deserialize)]
struct FigureReply {
    #[serde(default)]
    figure_references: Vec<FigureSuggestion>,
}

/// Suggestions from a figure-analysis reply. Unparsable replies yield none.
pub fn parse_suggestions(reply: &str) -> Vec<FigureSuggestion> {
    parse_json_reply::<FigureReply>(reply, "figure analysis")
        .map(|r| r.figure_references)
        .unwrap_or_default()
}

// ── Figure ids ───────────────────────────────────────────────────────────

static RE_ID_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]").unwrap());

/// Document-wide figure ids.
///
/// An id is `{first 3 chars of the chapter slug}-{sanitised file name}`;
/// the same file in the same chapter reuses its id, and an id already taken
/// by another chapter gets a `-1`, `-2`, … suffix.
#[derive(Debug, Default)]
pub struct FigureRegistry {
    ids: HashMap<(SectionKind, String), String>,
    taken: HashSet<String>,
}

impl FigureRegistry {
    pub fn id_for(&mut self, kind: SectionKind, file: &str) -> String {
        if let Some(id) = self.ids.get(&(kind, file.to_string())) {
            return id.clone();
        }
        let prefix: String = kind.slug().chars().take(3).collect();
        let base = format!("{prefix}-{}", RE_ID_CHARS.replace_all(&file.to_lowercase(), "-"));
        let mut id = base.clone();
        let mut n = 0;
        while self.taken.contains(&id) {
            n += 1;
            id = format!("{base}-{n}");
        }
        self.taken.insert(id.clone());
        self.ids.insert((kind, file.to_string()), id.clone());
        id
    }
}

// ── Rewriting ────────────────────────────────────────────────────────────

static RE_PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*\n").unwrap());

/// Insert figure references into one chapter.
///
/// For each suggestion whose sentence occurs in a paragraph, ` (Figure
/// @fig:id)` goes before the sentence's final punctuation and the figure
/// block is placed after that paragraph. A figure is placed at most once
/// per chapter. Suggestions naming files outside `known_files` are ignored.
pub fn insert_figures(
    chapter: &str,
    kind: SectionKind,
    suggestions: &[FigureSuggestion],
    known_files: &HashSet<String>,
    registry: &mut FigureRegistry,
) -> String {
    let mut paragraphs: Vec<String> = RE_PARAGRAPH_BREAK
        .split(chapter.trim_end())
        .map(str::to_string)
        .collect();
    let mut blocks: Vec<Vec<String>> = vec![Vec::new(); paragraphs.len()];
    let mut placed: HashSet<&str> = HashSet::new();

    for suggestion in suggestions {
        let file = suggestion.figure_filename.trim();
        let sentence = suggestion.sentence.trim();
        if sentence.is_empty() {
            continue;
        }
        if !known_files.contains(file) {
            debug!("{}: ignoring suggestion for unknown figure '{}'", kind, file);
            continue;
        }
        let Some(index) = paragraphs.iter().position(|p| p.contains(sentence)) else {
            continue;
        };

        let id = registry.id_for(kind, file);
        if !sentence.contains("Figure @fig:") {
            paragraphs[index] = reference_sentence(&paragraphs[index], sentence, &id);
        }
        if placed.insert(file) {
            let caption = suggestion.figure_caption.trim();
            blocks[index].push(format!("![{caption}]({IMAGES_DIR}/{file}){{#fig:{id}}}"));
        }
    }

    let mut out = String::with_capacity(chapter.len() + 256);
    for (i, paragraph) in paragraphs.iter().enumerate() {
        if i > 0 {
            out.push_str("\n\n");
        }
        out.push_str(paragraph);
        for block in &blocks[i] {
            out.push_str("\n\n");
            out.push_str(block);
        }
    }
    out.push('\n');
    out
}

/// Rewrite the first occurrence of `sentence` in `paragraph` with a figure
/// reference before its closing punctuation.
fn reference_sentence(paragraph: &str, sentence: &str, id: &str) -> String {
    let reference = format!(" (Figure @fig:{id})");
    let replacement = match sentence.char_indices().last() {
        Some((at, c)) if matches!(c, '.' | '?' | '!') => {
            format!("{}{reference}{c}", &sentence[..at])
        }
        _ => format!("{sentence}{reference}"),
    };
    paragraph.replacen(sentence, &replacement, 1)
}

static RE_PAGE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^page_(\d+)").unwrap());

// ── Step ─────────────────────────────────────────────────────────────────

pub(crate) async fn run(ctx: &StepContext) -> Result<StepOutcome> {
    let kinds = chapter_set(ctx, ChapterStage::Cited, STEP).await?;
    let chapters = read_chapters(ctx, &kinds, ChapterStage::Cited, STEP).await?;

    let mut figures: Vec<(String, String)> = Vec::new();
    for file in ctx.store.list(IMAGES_DIR).await? {
        let Some(page) = RE_PAGE_IMAGE
            .captures(&file)
            .and_then(|caps| caps[1].parse::<usize>().ok())
        else {
            continue;
        };
        let text = if ctx.store.exists(Artifact::PageText(page)) {
            ctx.store.read(Artifact::PageText(page)).await?
        } else {
            String::new()
        };
        figures.push((file, text));
    }
    let known: HashSet<String> = figures.iter().map(|(f, _)| f.clone()).collect();
    info!("{} candidate figure(s)", figures.len());

    let targets: Vec<(SectionKind, &str)> = if figures.is_empty() {
        Vec::new()
    } else {
        chapters
            .iter()
            .filter(|(kind, _)| kind.receives_figures())
            .map(|(kind, text)| (*kind, text.as_str()))
            .collect()
    };

    let ai = &ctx.ai;
    let figures = &figures;
    let analysed: Vec<(SectionKind, Vec<FigureSuggestion>)> = ctx
        .runner
        .run_with_progress(
            targets,
            |_, (kind, text)| async move {
                let reply = ai
                    .generate(&prompts::find_figure_references(text, figures), &[])
                    .await?;
                Ok((kind, parse_suggestions(&reply)))
            },
            |done, total| ctx.progress(STEP, done, total, &format!("chapter {done} of {total} analysed")),
        )
        .await?;

    let mut registry = FigureRegistry::default();
    let mut outcome = StepOutcome::default();
    for (kind, text) in &chapters {
        let body = match analysed.iter().find(|(k, _)| k == kind) {
            Some((_, suggestions)) => insert_figures(text, *kind, suggestions, &known, &mut registry),
            None => text.clone(),
        };
        let artifact = Artifact::Chapter(*kind, ChapterStage::WithFigures);
        ctx.store.write(artifact, body).await?;
        outcome.wrote(artifact.name());
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suggestion(sentence: &str, file: &str) -> FigureSuggestion {
        FigureSuggestion {
            sentence: sentence.into(),
            reason: String::new(),
            figure_filename: file.into(),
            figure_caption: "Accuracy over epochs".into(),
        }
    }

    fn known(files: &[&str]) -> HashSet<String> {
        files.iter().map(|f| f.to_string()).collect()
    }

    #[test]
    fn ids_are_unique_across_chapters() {
        let mut registry = FigureRegistry::default();
        let a = registry.id_for(SectionKind::Results, "page_3.png");
        let again = registry.id_for(SectionKind::Results, "page_3.png");
        let b = registry.id_for(SectionKind::RelatedWorks, "page_3.png");
        assert_eq!(a, "res-page-3-png");
        assert_eq!(again, a);
        assert_eq!(b, "rel-page-3-png");
    }

    #[test]
    fn colliding_prefixes_get_numeric_suffix() {
        let mut registry = FigureRegistry::default();
        let a = registry.id_for(SectionKind::Methods, "page_1.png");
        let b = registry.id_for(SectionKind::Methods, "page-1.png");
        assert_eq!(a, "met-page-1-png");
        assert_eq!(b, "met-page-1-png-1");
    }

    #[test]
    fn reference_goes_before_final_punctuation_and_figure_after_paragraph() {
        let chapter = "# Results\n\nAccuracy rises steadily. More text.\n\nNext paragraph.\n";
        let mut registry = FigureRegistry::default();
        let out = insert_figures(
            chapter,
            SectionKind::Results,
            &[suggestion("Accuracy rises steadily.", "page_3.png")],
            &known(&["page_3.png"]),
            &mut registry,
        );
        assert_eq!(
            out,
            "# Results\n\nAccuracy rises steadily (Figure @fig:res-page-3-png). More text.\n\n\
![Accuracy over epochs](images/page_3.png){#fig:res-page-3-png}\n\nNext paragraph.\n"
        );
    }

    #[test]
    fn figure_is_placed_once_per_chapter_and_unknown_files_ignored() {
        let chapter = "First claim.\n\nSecond claim.\n\nThird claim.";
        let mut registry = FigureRegistry::default();
        let out = insert_figures(
            chapter,
            SectionKind::Methods,
            &[
                suggestion("First claim.", "page_2.png"),
                suggestion("Second claim.", "page_2.png"),
                suggestion("Third claim.", "page_9.png"),
            ],
            &known(&["page_2.png"]),
            &mut registry,
        );
        assert_eq!(out.matches("![").count(), 1);
        assert_eq!(out.matches("(Figure @fig:met-page-2-png)").count(), 2);
        assert!(out.contains("Third claim.\n"));
        assert!(!out.contains("page_9"));
    }

    #[test]
    fn suggestions_parse_leniently() {
        let reply = "Here you go:\n{\"figure_references\": [{\"sentence\": \"S.\", \"reason\": \"r\", \"figure_filename\": \"page_1.png\", \"figure_caption\": \"C\"}]}";
        assert_eq!(parse_suggestions(reply).len(), 1);
        assert!(parse_suggestions("{\"unexpected\": true}").is_empty());
    }
}
