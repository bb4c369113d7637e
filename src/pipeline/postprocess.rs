//! Post-processing: deterministic cleanup of model-written Markdown.
//!
//! Even well-prompted models wrap replies in ```` ```markdown ```` fences,
//! open with "Here is the polished chapter:", mix `\( \)` and `$ $` math,
//! or emit Windows line endings. These rules fix such quirks without
//! touching content, so prompts can stay focused on *what* to write.
//!
//! ## Rule Order
//!
//! Line endings are normalised before anything else so every later regex
//! sees `\n`; fences and preambles are removed before heading spacing so
//! the chapter title is detected on clean input.

use once_cell::sync::Lazy;
use regex::Regex;

/// Clean a chapter draft or polish reply.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF → LF)
/// 2. Strip outer markdown fences
/// 3. Drop a conversational preamble line before the first heading
/// 4. Normalise math delimiters (`\[…\]` → `$$…$$`, `\(…\)` → `$…$`)
/// 5. Trim trailing whitespace per line
/// 6. Collapse 3+ consecutive blank lines down to 2
/// 7. Ensure heading lines have a blank line before them
/// 8. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 9. Ensure the text ends with exactly one newline
pub fn clean_markdown(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = strip_markdown_fences(&s);
    let s = drop_preamble(&s);
    let s = normalise_math_delimiters(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = normalise_heading_spacing(&s);
    let s = remove_invisible_chars(&s);
    ensure_final_newline(&s)
}

/// Prepend `# {title}` when the chapter does not start with a level-1 heading.
pub fn ensure_chapter_heading(chapter: &str, title: &str) -> String {
    let first = chapter.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    if first.starts_with("# ") {
        chapter.to_string()
    } else {
        format!("# {title}\n\n{}", chapter.trim_start())
    }
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Strip outer markdown fences ──────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\n(.*)\n```\s*$").unwrap());

fn strip_markdown_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 3: Drop conversational preamble ─────────────────────────────────────

static RE_PREAMBLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(here is|here's|below is|sure|certainly|okay)\b[^\n]*:\s*$").unwrap()
});

fn drop_preamble(input: &str) -> String {
    let trimmed = input.trim_start();
    match trimmed.split_once('\n') {
        Some((first, rest)) if RE_PREAMBLE.is_match(first.trim()) => rest.to_string(),
        _ => input.to_string(),
    }
}

// ── Rule 4: Normalise math delimiters ────────────────────────────────────────

static RE_DISPLAY_MATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\\\[(.+?)\\\]").unwrap());
static RE_INLINE_MATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\\((.+?)\\\)").unwrap());

fn normalise_math_delimiters(input: &str) -> String {
    let s = RE_DISPLAY_MATH.replace_all(input, |caps: &regex::Captures<'_>| {
        format!("$${}$$", caps[1].trim())
    });
    RE_INLINE_MATH
        .replace_all(&s, |caps: &regex::Captures<'_>| format!("${}$", caps[1].trim()))
        .to_string()
}

// ── Rule 5: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 6: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").to_string()
}

// ── Rule 7: Normalise heading spacing ────────────────────────────────────────

fn is_heading(line: &str) -> bool {
    let hashes = line.chars().take_while(|&c| c == '#').count();
    (1..=6).contains(&hashes) && line[hashes..].starts_with(' ')
}

fn normalise_heading_spacing(input: &str) -> String {
    let mut result = String::with_capacity(input.len() + 64);
    let mut in_code = false;
    for (i, line) in input.lines().enumerate() {
        if line.trim_start().starts_with("```") {
            in_code = !in_code;
        }
        if !in_code && is_heading(line) && i > 0 {
            let trimmed = result.trim_end_matches('\n');
            result.truncate(trimmed.len());
            result.push_str("\n\n");
        }
        result.push_str(line);
        result.push('\n');
    }
    result
}

// ── Rule 8: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 9: Ensure file ends with single newline ─────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{}\n", trimmed)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fences_with_and_without_language() {
        assert_eq!(strip_markdown_fences("```markdown\n# Hello\nWorld\n```"), "# Hello\nWorld");
        assert_eq!(strip_markdown_fences("```\n# Hello\n```"), "# Hello");
        assert_eq!(strip_markdown_fences("# Hello"), "# Hello");
    }

    #[test]
    fn drops_polite_preamble_only() {
        assert_eq!(
            drop_preamble("Here is the polished chapter:\n# Methods\nText"),
            "# Methods\nText"
        );
        let body = "Here we describe the setup.\nMore.";
        assert_eq!(drop_preamble(body), body);
    }

    #[test]
    fn math_delimiters_become_dollars() {
        let s = normalise_math_delimiters(r"Energy \( E = mc^2 \) and \[ a^2 + b^2 = c^2 \]");
        assert_eq!(s, "Energy $E = mc^2$ and $$a^2 + b^2 = c^2$$");
    }

    #[test]
    fn heading_spacing_skips_code_blocks() {
        let input = "text\n## Section\n```\n# comment\n```";
        let out = normalise_heading_spacing(input);
        assert!(out.contains("text\n\n## Section"));
        assert!(out.contains("```\n# comment\n```"));
    }

    #[test]
    fn hashtag_is_not_a_heading() {
        assert!(!is_heading("#hashtag"));
        assert!(is_heading("### Results"));
    }

    #[test]
    fn chapter_heading_is_added_once() {
        assert_eq!(ensure_chapter_heading("Body", "Results"), "# Results\n\nBody");
        assert_eq!(ensure_chapter_heading("# Results\nBody", "Results"), "# Results\nBody");
    }

    #[test]
    fn clean_markdown_full_pipeline() {
        let input = "```markdown\n# Introduction\r\n\r\nSome text\u{200B}   \n\n\n\n\n\n## Background\nMore\n```";
        let result = clean_markdown(input);
        assert!(result.starts_with("# Introduction"));
        assert!(result.ends_with("More\n"));
        assert!(!result.contains("\n\n\n\n"));
        assert!(!result.contains('\u{200B}'));
    }
}
