//! Document model shared by every step: section kinds, chapter stages,
//! the page classification and the extraction transcript format.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The six section kinds, in canonical chapter order.
///
/// `Ord` follows declaration order, so sorting kinds yields the order in
/// which chapters appear in the compiled document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Introduction,
    RelatedWorks,
    Methods,
    Results,
    Conclusions,
    Appendix,
}

impl SectionKind {
    pub const ALL: [SectionKind; 6] = [
        SectionKind::Introduction,
        SectionKind::RelatedWorks,
        SectionKind::Methods,
        SectionKind::Results,
        SectionKind::Conclusions,
        SectionKind::Appendix,
    ];

    /// Human label used in prompts, e.g. `"related works"`.
    pub fn label(self) -> &'static str {
        match self {
            SectionKind::Introduction => "introduction",
            SectionKind::RelatedWorks => "related works",
            SectionKind::Methods => "methods",
            SectionKind::Results => "results",
            SectionKind::Conclusions => "conclusions",
            SectionKind::Appendix => "appendix",
        }
    }

    /// File-name form of the label, e.g. `"related_works"`.
    pub fn slug(self) -> &'static str {
        match self {
            SectionKind::RelatedWorks => "related_works",
            other => other.label(),
        }
    }

    /// Chapter heading, e.g. `"Related Works"`.
    pub fn title(self) -> &'static str {
        match self {
            SectionKind::Introduction => "Introduction",
            SectionKind::RelatedWorks => "Related Works",
            SectionKind::Methods => "Methods",
            SectionKind::Results => "Results",
            SectionKind::Conclusions => "Conclusions",
            SectionKind::Appendix => "Appendix",
        }
    }

    /// Match the start of a classifier reply line against a kind.
    ///
    /// Accepts singular/plural variants ("Method", "Conclusion", "Related work").
    pub fn from_prefix(text: &str) -> Option<SectionKind> {
        let t = text.trim_start().to_lowercase();
        const STEMS: [(&str, SectionKind); 6] = [
            ("introduction", SectionKind::Introduction),
            ("related work", SectionKind::RelatedWorks),
            ("method", SectionKind::Methods),
            ("result", SectionKind::Results),
            ("conclusion", SectionKind::Conclusions),
            ("appendi", SectionKind::Appendix),
        ];
        STEMS
            .iter()
            .find(|(stem, _)| t.starts_with(stem))
            .map(|(_, kind)| *kind)
    }

    /// Chapters that get literature citations inserted.
    pub fn receives_citations(self) -> bool {
        matches!(
            self,
            SectionKind::Introduction | SectionKind::RelatedWorks | SectionKind::Results
        )
    }

    /// Chapters that get figure references inserted.
    pub fn receives_figures(self) -> bool {
        matches!(
            self,
            SectionKind::Introduction | SectionKind::Methods | SectionKind::Results
        )
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Successive enrichment stages of one logical chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChapterStage {
    Draft,
    Cited,
    WithFigures,
}

impl ChapterStage {
    pub(crate) fn suffix(self) -> &'static str {
        match self {
            ChapterStage::Draft => "chapter",
            ChapterStage::Cited => "chapter_cited",
            ChapterStage::WithFigures => "chapter_with_figures",
        }
    }
}

// ── Classification ───────────────────────────────────────────────────────

/// Pages assigned to one section kind, in reply order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedSection {
    pub kind: SectionKind,
    pub pages: Vec<usize>,
}

/// Section kind → ordered page numbers.
///
/// Every page appears under at most one kind. Pages the model labelled
/// "Unrelated", left out, or invented are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub sections: Vec<ClassifiedSection>,
}

impl Classification {
    /// Kinds with at least one page, in canonical order.
    pub fn kinds(&self) -> Vec<SectionKind> {
        let mut kinds: Vec<SectionKind> = self
            .sections
            .iter()
            .filter(|s| !s.pages.is_empty())
            .map(|s| s.kind)
            .collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }

    pub fn pages_of(&self, kind: SectionKind) -> &[usize] {
        self.sections
            .iter()
            .find(|s| s.kind == kind)
            .map(|s| s.pages.as_slice())
            .unwrap_or(&[])
    }

    /// Every classified page, across all kinds.
    pub fn all_pages(&self) -> impl Iterator<Item = usize> + '_ {
        self.sections.iter().flat_map(|s| s.pages.iter().copied())
    }
}

static RE_PAGE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s*(?:[-–]\s*(\d+))?").expect("valid regex"));

/// Parse the classifier's `Kind: 1, 2, 5-7` reply.
///
/// First claim wins: a page listed under two kinds stays with the first.
/// Page numbers not in `valid_pages` are dropped.
pub fn parse_classification(reply: &str, valid_pages: &[usize]) -> Classification {
    let mut sections: Vec<ClassifiedSection> = Vec::new();
    let mut claimed: Vec<usize> = Vec::new();
    let last_page = valid_pages.iter().copied().max().unwrap_or(0);

    for raw in reply.lines() {
        let line = raw.trim().trim_start_matches(['-', '*', '#', '>']).trim();
        let line = line.replace("**", "");
        let Some(kind) = SectionKind::from_prefix(&line) else {
            continue;
        };
        let Some((_, numbers)) = line.split_once(':') else {
            continue;
        };

        for caps in RE_PAGE_NUMBER.captures_iter(numbers) {
            let start: usize = match caps[1].parse() {
                Ok(n) => n,
                Err(_) => continue,
            };
            let end: usize = caps
                .get(2)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(start)
                .max(start);
            if start > last_page {
                tracing::warn!("classifier listed pages {start}-{end} past the last page; ignoring");
                continue;
            }
            if end > last_page {
                tracing::warn!("classifier range {start}-{end} runs past page {last_page}; truncating");
            }
            for page in start..=end.min(last_page) {
                if !valid_pages.contains(&page) {
                    tracing::warn!("classifier listed unknown page {page}; ignoring");
                    continue;
                }
                if claimed.contains(&page) {
                    tracing::warn!("page {page} already classified; ignoring duplicate under {kind}");
                    continue;
                }
                claimed.push(page);
                match sections.iter_mut().find(|s| s.kind == kind) {
                    Some(section) => section.pages.push(page),
                    None => sections.push(ClassifiedSection {
                        kind,
                        pages: vec![page],
                    }),
                }
            }
        }
    }

    sections.sort_by_key(|s| s.kind);
    Classification { sections }
}

// ── Extraction transcript ────────────────────────────────────────────────

static RE_TRANSCRIPT_PAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\*Page (\d+)\*:\n").expect("valid regex"));

/// Render page texts as the combined `*Page n*:` transcript.
pub fn format_transcript(pages: &[(usize, String)]) -> String {
    let mut out = String::new();
    for (number, text) in pages {
        out.push_str(&format!("*Page {number}*:\n{}\n\n", text.trim()));
    }
    out
}

/// Parse a transcript produced by [`format_transcript`] back into page texts.
pub fn parse_transcript(transcript: &str) -> Vec<(usize, String)> {
    let marks: Vec<(usize, usize, usize)> = RE_TRANSCRIPT_PAGE
        .captures_iter(transcript)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let number = caps[1].parse().ok()?;
            Some((number, whole.start(), whole.end()))
        })
        .collect();

    marks
        .iter()
        .enumerate()
        .map(|(i, &(number, _, body_start))| {
            let body_end = marks.get(i + 1).map(|m| m.1).unwrap_or(transcript.len());
            (number, transcript[body_start..body_end].trim().to_string())
        })
        .collect()
}

/// Render the pages of one section as `Page n:` blocks.
pub fn format_section(pages: &[(usize, &str)]) -> String {
    pages
        .iter()
        .map(|(number, text)| format!("Page {number}:\n{}\n", text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_sort_in_chapter_order() {
        let mut kinds = vec![
            SectionKind::Appendix,
            SectionKind::Methods,
            SectionKind::Introduction,
        ];
        kinds.sort();
        assert_eq!(
            kinds,
            vec![
                SectionKind::Introduction,
                SectionKind::Methods,
                SectionKind::Appendix
            ]
        );
        assert_eq!(SectionKind::RelatedWorks.slug(), "related_works");
    }

    #[test]
    fn classification_never_assigns_a_page_twice() {
        let reply = "Introduction: 1, 2\nMethods: 2, 3\nResults: 4-6\nUnrelated: 7";
        let c = parse_classification(reply, &[1, 2, 3, 4, 5, 6, 7]);

        assert_eq!(c.pages_of(SectionKind::Introduction), &[1, 2]);
        assert_eq!(c.pages_of(SectionKind::Methods), &[3]);
        assert_eq!(c.pages_of(SectionKind::Results), &[4, 5, 6]);

        let mut all: Vec<usize> = c.all_pages().collect();
        let before = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), before, "a page appeared under two kinds");
        assert!(!all.contains(&7));
    }

    #[test]
    fn classification_drops_unknown_pages() {
        let reply = "**Introduction**: 1, 42\n- Conclusion: 3";
        let c = parse_classification(reply, &[1, 2, 3]);
        assert_eq!(c.pages_of(SectionKind::Introduction), &[1]);
        assert_eq!(c.pages_of(SectionKind::Conclusions), &[3]);
        assert!(c.all_pages().all(|p| [1, 2, 3].contains(&p)));
    }

    #[test]
    fn classification_truncates_huge_ranges() {
        let start = std::time::Instant::now();
        let reply = "Introduction: 1-4000000000
Results: 7-18446744073709551615";
        let c = parse_classification(reply, &[1, 2, 3]);
        assert_eq!(c.pages_of(SectionKind::Introduction), &[1, 2, 3]);
        assert!(c.pages_of(SectionKind::Results).is_empty());
        assert!(start.elapsed() < std::time::Duration::from_secs(1));
    }

    #[test]
    fn classification_ignores_prose_lines() {
        let reply = "Here is the classification you asked for.\nRelated Works: 2\nThanks!";
        let c = parse_classification(reply, &[1, 2]);
        assert_eq!(c.kinds(), vec![SectionKind::RelatedWorks]);
    }

    #[test]
    fn transcript_parses_back_in_order() {
        let pages = vec![
            (1, "Title slide".to_string()),
            (2, "Motivation\n\n- point".to_string()),
            (3, "Results".to_string()),
        ];
        let text = format_transcript(&pages);
        assert!(text.starts_with("*Page 1*:\nTitle slide\n\n"));
        assert_eq!(parse_transcript(&text), pages);
    }

    #[test]
    fn section_blocks_are_separated() {
        let s = format_section(&[(3, "alpha"), (5, "beta ")]);
        assert_eq!(s, "Page 3:\nalpha\n\n\nPage 5:\nbeta\n");
    }
}
