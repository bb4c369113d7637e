//! Prompts for every AI call the pipeline makes.
//!
//! Centralising the wording here keeps the steps about *flow* (what is read,
//! what is written, what runs concurrently) and lets unit tests inspect the
//! prompts directly without a model.
//!
//! Builders take already-loaded text and return the complete user prompt;
//! [`SYSTEM_PROMPT`] is sent as the system message of every call.

use crate::document::SectionKind;

/// System message for every call.
pub const SYSTEM_PROMPT: &str = "You are an expert academic writer and editor who turns \
research presentations into graduate-level theses and journal papers. Follow the \
requested output format exactly and do not add commentary around it.";

// ── Extraction ───────────────────────────────────────────────────────────

/// Describe one slide image.
pub fn describe_page(page: usize, total: usize) -> String {
    format!(
        r#"This is slide {page} of {total} from a research presentation. Write a detailed description that captures the slide's entire content.

1. Explain any figure, chart or diagram the way a figure legend would, then summarise its key message.
2. Explain any equation first, then restate it in Markdown math ($ inline, $$ display) after the paragraph.
3. Explain any table like a table legend, then reproduce it as a Markdown table after the paragraph.
4. If the title, author or advisor name is clearly visible, state it. Otherwise say nothing about them.
5. Ignore slide numbers, logos and repeated footers.
6. Write in Markdown and close with a one-sentence summary of the slide."#
    )
}

// ── Classification ───────────────────────────────────────────────────────

/// Partition page texts into section kinds.
pub fn classify_pages(pages: &[(usize, String)]) -> String {
    let mut prompt = String::from(
        r#"Classify every page of this academic presentation into exactly one of: Introduction, Related Works, Methods, Results, Conclusions, Appendix, Unrelated.

Reply with ONLY these lines, listing page numbers after each label:
Introduction: [page numbers]
Related Works: [page numbers]
Methods: [page numbers]
Results: [page numbers]
Conclusions: [page numbers]
Appendix: [page numbers]
Unrelated: [page numbers]

Pages of one category are usually contiguous. When unsure, use the category of the neighbouring pages. Only clearly unrelated slides (a closing "thank you", for example) are Unrelated; slides in the middle of the deck never are.

Pages:
"#,
    );
    for (number, text) in pages {
        prompt.push_str(&format!("\nPage {number}:\n{}\n", text.trim()));
    }
    prompt
}

// ── Chapters ─────────────────────────────────────────────────────────────

fn chapter_guidelines(kind: SectionKind) -> &'static str {
    match kind {
        SectionKind::Introduction => {
            "- Give the background a reader needs to understand the research problem.\n\
             - Introduce every keyword and concept that appears in the pages, expanding on them from your own knowledge.\n\
             - Describe the importance, impact and open challenges of the problem.\n\
             - End with a concise statement of the research problem and the goal of the work.\n\
             - Write 5 to 6 paragraphs."
        }
        SectionKind::RelatedWorks => {
            "- Present the prior work in the pages and its limitations.\n\
             - Extend the literature review from your own knowledge.\n\
             - Write 3 to 4 paragraphs."
        }
        SectionKind::Methods => {
            "- Do not drop any detail from the pages; describe each part as fully as possible and expand it from your own knowledge."
        }
        SectionKind::Results => {
            "- Present each result page in detail and summarise its key message at the end of the paragraph or section.\n\
             - Describe figures and tables as the main text of a scientific paper would."
        }
        SectionKind::Conclusions => {
            "- Summarise the main findings, their interpretation, the implications and future directions.\n\
             - Write 3 to 4 paragraphs."
        }
        SectionKind::Appendix => {
            "- This is supplementary material. Write a legend for each figure and table; reproduce tables in Markdown."
        }
    }
}

/// First draft of one chapter from its section text.
pub fn draft_chapter(kind: SectionKind, section: &str) -> String {
    let label = kind.label();
    format!(
        r#"Write the {label} chapter of a thesis from the presentation pages below. Integrate, refine and expand the material into a coherent chapter.

General rules:
1. Organise the chapter in Markdown with clear sections and subsections.
2. Add transitions or background where the pages leave gaps.
3. Use a formal, precise academic tone.
4. Wrap inline equations in $ and displayed equations in $$.
5. Never mention slides, page numbers or figure numbers.
6. Start with the chapter title as a level-1 heading: # {title}

Chapter rules:
{guidelines}

Pages for the {label} chapter:

{section}"#,
        title = kind.title(),
        guidelines = chapter_guidelines(kind),
    )
}

/// Compare a draft with its source pages and add whatever is missing.
pub fn expand_chapter(section: &str, draft: &str) -> String {
    format!(
        r#"Compare the original page contents with the generated chapter below.
1. Find any content from the original pages that the chapter leaves out.
2. Add it to the chapter, keeping the existing flow, style and Markdown structure.
3. Return the complete expanded chapter in Markdown.

**Original contents:**
{section}

**Generated chapter:**
{draft}"#
    )
}

/// Final editorial pass over a chapter.
pub fn polish_chapter(chapter: &str) -> String {
    format!(
        r#"Polish the following thesis chapter to a high academic standard.
1. Rewrite any slide-style language as thesis prose.
2. Keep every technical detail, equation and heading.
3. Keep the Markdown structure; equations stay in $ and $$.
4. Make the sections flow naturally into each other.
5. Remove editing artifacts such as "Here is the expanded chapter".

Return only the polished chapter.

{chapter}"#
    )
}

// ── Citations ────────────────────────────────────────────────────────────

/// Find sentences that need a citation.
pub fn find_citation_sentences(chapter: &str) -> String {
    format!(
        r#"Identify the sentences in this thesis text that should carry a citation: factual claims, established concepts, known challenges and specific examples. Never place citations inside equations.

Reply with ONLY a JSON object of this form:
{{
  "sentences": [
    {{
      "sentence": "exact sentence from the text",
      "reason": "why it needs a citation",
      "key_terms": ["term1", "term2"]
    }}
  ]
}}

Text:
{chapter}"#
    )
}

// ── Figures ──────────────────────────────────────────────────────────────

/// Match chapter sentences to available figures.
///
/// `figures` pairs each image file name with the text of the slide it came from.
pub fn find_figure_references(chapter: &str, figures: &[(String, String)]) -> String {
    let mut context = String::new();
    for (file, text) in figures {
        context.push_str(&format!("Figure {file}:\n{}\n\n", text.trim()));
    }
    format!(
        r#"Identify sentences in the chapter below that should reference one of the available figures. Good candidates describe visual data or results, experimental setups that are easier to show than tell, visual comparisons or trends, or use phrases like "as shown" or "illustrates". Skip plain lists and sentences where the visual is not the point.

Available figures (file name and the slide text it came from):

{context}
Reply with ONLY a JSON object of this form, using a file name from the list above:
{{
  "figure_references": [
    {{
      "sentence": "exact sentence from the chapter",
      "reason": "why the figure belongs here",
      "figure_filename": "page_3.png",
      "figure_caption": "descriptive caption"
    }}
  ]
}}

Chapter:
{chapter}"#
    )
}

// ── Metadata ─────────────────────────────────────────────────────────────

/// Title, author, advisor and affiliation, one per line.
pub fn document_info(introduction: &str) -> String {
    format!(
        r#"From the presentation text below, extract:
1. the title of the work
2. the author's name
3. the advisor's name (empty line if absent)
4. the author's department and institution (empty line if absent)

These usually appear on the first page. Reply with exactly these four lines and nothing else.

Text:
{introduction}"#
    )
}

/// English abstract over all chapters, one paragraph.
pub fn abstract_en(chapters: &str) -> String {
    format!(
        "Write a concise abstract (250 to 300 words) for the work below as ONE paragraph. \
Reply with the abstract only.\n\nContent:\n{chapters}"
    )
}

/// Traditional Chinese translation of the abstract.
pub fn abstract_zh(abstract_en: &str) -> String {
    format!(
        r#"Translate this thesis abstract into Traditional Chinese. Keep the formal academic tone, the technical terms and the single-paragraph structure. Reply with the translation only.

{abstract_en}"#
    )
}

/// Traditional Chinese acknowledgements for a graduating student.
pub fn acknowledgements_zh(advisor: Option<&str>) -> String {
    let advisor = advisor
        .map(|a| format!(" The advisor is {a}."))
        .unwrap_or_default();
    format!(
        "Write a heartfelt acknowledgements section (誌謝) in Traditional Chinese, 200 to 300 words, \
for a student about to graduate. Thank the advisor for guidance, the family for support, \
lab mates and classmates for help, and the university for its resources.{advisor} \
Reply with the text only, without a title."
    )
}

/// Comma-separated keywords for a journal paper.
pub fn keywords(abstract_en: &str) -> String {
    format!(
        "List 4 to 6 keywords for a paper with this abstract. Reply with one comma-separated line.\n\n{abstract_en}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_prompt_lists_every_page() {
        let prompt = classify_pages(&[(1, "Title".into()), (2, "Motivation".into())]);
        assert!(prompt.contains("Page 1:\nTitle"));
        assert!(prompt.contains("Page 2:\nMotivation"));
        assert!(prompt.contains("Unrelated: [page numbers]"));
    }

    #[test]
    fn draft_prompt_names_the_chapter_heading() {
        let prompt = draft_chapter(SectionKind::RelatedWorks, "Page 4:\nPrior art");
        assert!(prompt.contains("# Related Works"));
        assert!(prompt.contains("Page 4:\nPrior art"));
    }

    #[test]
    fn figure_prompt_carries_file_names() {
        let prompt = find_figure_references(
            "Accuracy improves.",
            &[("page_3.png".into(), "Accuracy chart".into())],
        );
        assert!(prompt.contains("Figure page_3.png:\nAccuracy chart"));
        assert!(prompt.contains("\"figure_references\""));
    }
}
