//! Citation addition: find claims, look up papers, insert `[@key]` markers.
//!
//! Introduction, related works and results chapters are analysed; the other
//! chapters pass through unchanged so every chapter exists at the cited
//! stage.
//!
//! ## Why assemble sequentially?
//!
//! Analysis and lookups run concurrently, but keys are assigned afterwards
//! in chapter order, candidate order and result order. The same PubMed id
//! therefore always gets the same key, and collision suffixes (`b`, `c`, …)
//! do not depend on which lookup finished first.

use super::{chapter_set, parse_json_reply, read_chapters, Step, StepContext, StepOutcome};
use crate::document::{ChapterStage, SectionKind};
use crate::error::Result;
use crate::pipeline::pubmed::Paper;
use crate::prompts;
use crate::store::Artifact;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{info, warn};

const STEP: Step = Step::Citations;

/// A sentence the model thinks needs a citation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CitationCandidate {
    pub sentence: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub key_terms: Vec<String>,
}

impl CitationCandidate {
    /// PubMed query for this candidate.
    pub fn query(&self) -> String {
        format!("{} [Title/Abstract]", self.key_terms.join(" "))
    }
}

#[derive(Debug, Deserialize)]
struct CitationReply {
    #[serde(default)]
    sentences: Vec<CitationCandidate>,
}

/// Candidates from a citation-analysis reply. Unparsable replies yield none.
pub fn parse_candidates(reply: &str) -> Vec<CitationCandidate> {
    parse_json_reply::<CitationReply>(reply, "citation analysis")
        .map(|r| r.sentences)
        .unwrap_or_default()
        .into_iter()
        .map(|mut c| {
            c.sentence = c.sentence.trim().to_string();
            c
        })
        .filter(|c| !c.sentence.is_empty() && c.key_terms.iter().any(|t| !t.trim().is_empty()))
        .collect()
}

// ── Bibliography ─────────────────────────────────────────────────────────

/// Deduplicated set of BibTeX entries.
///
/// One key per PubMed id. Distinct papers whose base key collides get
/// letter suffixes in insertion order: `smith2020`, `smith2020b`, ….
#[derive(Debug, Default)]
pub struct Bibliography {
    entries: Vec<(String, Paper)>,
    by_pmid: HashMap<String, String>,
}

static RE_KEY_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]").unwrap());

/// `{first author's last name}{year}`, or `pmid{id}{year}` without authors.
pub fn base_key(paper: &Paper) -> String {
    let raw = match paper.authors.first() {
        Some(author) => {
            let last = author.split(',').next().unwrap_or_default();
            format!("{}{}", last.to_lowercase(), paper.year)
        }
        None => format!("pmid{}{}", paper.pmid, paper.year),
    };
    let key = RE_KEY_CHARS.replace_all(&raw, "").to_string();
    if key.is_empty() || key.starts_with(|c: char| c.is_ascii_digit()) {
        format!("pmid{}{}", paper.pmid, key)
    } else {
        key
    }
}

fn key_suffix(n: usize) -> String {
    if n < 26 {
        char::from(b'a' + n as u8).to_string()
    } else {
        format!("x{n}")
    }
}

impl Bibliography {
    /// Key for `paper`, adding an entry the first time its PubMed id is seen.
    pub fn add(&mut self, paper: &Paper) -> String {
        if let Some(key) = self.by_pmid.get(&paper.pmid) {
            return key.clone();
        }
        let base = base_key(paper);
        let mut key = base.clone();
        let mut n = 0;
        while self.entries.iter().any(|(k, _)| *k == key) {
            n += 1;
            key = format!("{base}{}", key_suffix(n));
        }
        self.by_pmid.insert(paper.pmid.clone(), key.clone());
        self.entries.push((key.clone(), paper.clone()));
        key
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// All entries as a BibTeX file.
    pub fn to_bibtex(&self) -> String {
        let mut out = self
            .entries
            .iter()
            .map(|(key, paper)| format_entry(key, paper))
            .collect::<Vec<_>>()
            .join("\n\n");
        if !out.is_empty() {
            out.push('\n');
        }
        out
    }
}

fn escape_bibtex(s: &str) -> String {
    s.replace('&', r"\&")
}

fn format_entry(key: &str, paper: &Paper) -> String {
    let authors: Vec<&str> = paper
        .authors
        .iter()
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .collect();
    let authors = if authors.is_empty() {
        "Unknown Author".to_string()
    } else {
        authors.join(" and ")
    };
    let doi = paper
        .doi
        .as_deref()
        .map(|d| format!("  doi = {{{d}}},\n"))
        .unwrap_or_default();
    format!(
        "@article{{{key},\n  author = {{{authors}}},\n  title = {{{title}}},\n  journal = {{{journal}}},\n  year = {{{year}}},\n{doi}  pmid = {{{pmid}}}\n}}",
        title = escape_bibtex(&paper.title),
        journal = escape_bibtex(&paper.journal),
        year = paper.year,
        pmid = paper.pmid,
    )
}

// ── Insertion ────────────────────────────────────────────────────────────

/// Insert ` [@k1; @k2]` after the first occurrence of `sentence` that is not
/// already followed by a citation. Text is unchanged when no such occurrence
/// exists or `keys` is empty.
pub fn insert_citation(text: &str, sentence: &str, keys: &[String]) -> String {
    if keys.is_empty() || sentence.is_empty() {
        return text.to_string();
    }
    let marker = format!(
        " [{}]",
        keys.iter().map(|k| format!("@{k}")).collect::<Vec<_>>().join("; ")
    );
    for (start, _) in text.match_indices(sentence) {
        let end = start + sentence.len();
        if text[end..].trim_start().starts_with("[@") {
            continue;
        }
        let mut out = String::with_capacity(text.len() + marker.len());
        out.push_str(&text[..end]);
        out.push_str(&marker);
        out.push_str(&text[end..]);
        return out;
    }
    text.to_string()
}

// ── Step ─────────────────────────────────────────────────────────────────

pub(crate) async fn run(ctx: &StepContext) -> Result<StepOutcome> {
    let kinds = chapter_set(ctx, ChapterStage::Draft, STEP).await?;
    let chapters = read_chapters(ctx, &kinds, ChapterStage::Draft, STEP).await?;

    let targets: Vec<(SectionKind, &str)> = chapters
        .iter()
        .filter(|(kind, _)| kind.receives_citations())
        .map(|(kind, text)| (*kind, text.as_str()))
        .collect();

    let ai = &ctx.ai;
    let analysed: Vec<(SectionKind, Vec<CitationCandidate>)> = ctx
        .runner
        .run_all(targets, |_, (kind, text)| async move {
            let reply = ai
                .generate(&prompts::find_citation_sentences(text), &[])
                .await?;
            Ok((kind, parse_candidates(&reply)))
        })
        .await?;

    let queries: Vec<String> = analysed
        .iter()
        .flat_map(|(_, candidates)| candidates.iter().map(CitationCandidate::query))
        .collect();
    info!("Looking up {} citation candidate(s)", queries.len());

    let source = ctx.bibliography.as_ref();
    let per_query = ctx.config.citations_per_query;
    let results: Vec<Vec<Paper>> = ctx
        .runner
        .run_with_progress(
            queries,
            |_, query| async move {
                match source.search(&query, per_query).await {
                    Ok(papers) => Ok(papers),
                    Err(e) => {
                        warn!("{}; continuing without citations for it", e);
                        Ok(Vec::new())
                    }
                }
            },
            |done, total| ctx.progress(STEP, done, total, &format!("lookup {done} of {total}")),
        )
        .await?;

    let mut bibliography = Bibliography::default();
    let mut results = results.into_iter();
    let mut cited: HashMap<SectionKind, String> = HashMap::new();
    for (kind, candidates) in &analysed {
        let mut text = chapters
            .iter()
            .find(|(k, _)| k == kind)
            .map(|(_, t)| t.clone())
            .unwrap_or_default();
        for candidate in candidates {
            let papers = results.next().unwrap_or_default();
            let mut keys: Vec<String> = Vec::new();
            for paper in &papers {
                let key = bibliography.add(paper);
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
            text = insert_citation(&text, &candidate.sentence, &keys);
        }
        cited.insert(*kind, text);
    }

    let mut outcome = StepOutcome::default();
    for (kind, text) in &chapters {
        let artifact = Artifact::Chapter(*kind, ChapterStage::Cited);
        let body = cited.get(kind).unwrap_or(text);
        ctx.store.write(artifact, body).await?;
        outcome.wrote(artifact.name());
    }
    info!("{} bibliography entries", bibliography.len());
    ctx.store
        .write(Artifact::Bibliography, bibliography.to_bibtex())
        .await?;
    outcome.wrote(Artifact::Bibliography.name());
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paper(pmid: &str, first_author: Option<&str>, year: &str) -> Paper {
        Paper {
            pmid: pmid.into(),
            title: "Proteins & folding".into(),
            authors: first_author.map(|a| vec![a.to_string()]).unwrap_or_default(),
            journal: "Cell & Reports".into(),
            year: year.into(),
            doi: None,
        }
    }

    #[test]
    fn base_key_uses_author_and_year() {
        assert_eq!(base_key(&paper("1", Some("O'Brien, K"), "2020")), "obrien2020");
        assert_eq!(base_key(&paper("42", None, "2019")), "pmid422019");
    }

    #[test]
    fn same_pmid_same_key_and_collisions_are_suffixed() {
        let mut bib = Bibliography::default();
        let a = bib.add(&paper("1", Some("Smith, J"), "2020"));
        let b = bib.add(&paper("2", Some("Smith, A"), "2020"));
        let c = bib.add(&paper("3", Some("Smith, K"), "2020"));
        let again = bib.add(&paper("1", Some("Smith, J"), "2020"));
        assert_eq!((a.as_str(), b.as_str(), c.as_str()), ("smith2020", "smith2020b", "smith2020c"));
        assert_eq!(again, "smith2020");
        assert_eq!(bib.len(), 3);
    }

    #[test]
    fn bibtex_entry_escapes_ampersands_and_omits_missing_doi() {
        let mut bib = Bibliography::default();
        bib.add(&paper("7", Some("Lee, H"), "2018"));
        let out = bib.to_bibtex();
        assert!(out.starts_with("@article{lee2018,\n  author = {Lee, H},"));
        assert!(out.contains(r"title = {Proteins \& folding}"));
        assert!(out.contains(r"journal = {Cell \& Reports}"));
        assert!(!out.contains("doi"));
        assert!(out.ends_with("  pmid = {7}\n}\n"));
        assert_eq!(Bibliography::default().to_bibtex(), "");
    }

    #[test]
    fn citation_goes_after_first_uncited_occurrence() {
        let text = "Cells divide. [@a2000] Later, cells divide. Cells divide.";
        let out = insert_citation(text, "Cells divide.", &["b2001".into(), "c2002".into()]);
        assert_eq!(
            out,
            "Cells divide. [@a2000] Later, cells divide. Cells divide. [@b2001; @c2002]"
        );
        assert_eq!(insert_citation("Nothing here.", "Missing.", &["k".into()]), "Nothing here.");
    }

    #[test]
    fn candidates_need_a_sentence_and_terms() {
        let reply = r#"```json
{"sentences": [
  {"sentence": "  Deep nets fold proteins. ", "reason": "claim", "key_terms": ["protein folding", "deep learning"]},
  {"sentence": "No terms.", "reason": "claim", "key_terms": []}
]}
```"#;
        let candidates = parse_candidates(reply);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].sentence, "Deep nets fold proteins.");
        assert_eq!(
            candidates[0].query(),
            "protein folding deep learning [Title/Abstract]"
        );
        assert!(parse_candidates("I could not find any.").is_empty());
    }
}
