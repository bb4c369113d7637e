//! Output style registry.
//!
//! A style names the LaTeX template, the class/bibliography files that must
//! sit next to the generated `.tex`, and which metadata schema the template
//! reads. Templates themselves are assets found under the configured
//! templates directory at `{template_dir}/{template_file}`.

use crate::error::{PipelineError, Result};
use serde::Serialize;

/// Which metadata document shape a template consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataSchema {
    /// Single author + supervisor, bilingual abstract, acknowledgements.
    Thesis,
    /// Structured author list with affiliations and keywords.
    Journal,
}

/// Static description of one output style.
#[derive(Debug, Clone, Serialize)]
pub struct StyleConfig {
    pub name: &'static str,
    pub document_class: &'static str,
    pub class_options: &'static [&'static str],
    /// Directory (relative to the templates root) holding the template and
    /// required files.
    pub template_dir: &'static str,
    pub template_file: &'static str,
    pub bibliography_style: &'static str,
    /// Files copied into the working directory before compilation.
    pub required_files: &'static [&'static str],
    pub metadata_schema: MetadataSchema,
    /// Stem of the `.tex`/`.pdf` outputs.
    pub output_stem: &'static str,
}

pub static STYLES: &[StyleConfig] = &[
    StyleConfig {
        name: "thesis",
        document_class: "Thesis",
        class_options: &[],
        template_dir: "latex/thesis",
        template_file: "thesis-template.tex",
        bibliography_style: "plain",
        required_files: &["Thesis.cls", "lstpatch.sty", "CCU.pdf"],
        metadata_schema: MetadataSchema::Thesis,
        output_stem: "thesis",
    },
    StyleConfig {
        name: "nature",
        document_class: "sn-jnl",
        class_options: &["pdflatex", "sn-nature"],
        template_dir: "latex/nature",
        template_file: "nature-template.tex",
        bibliography_style: "sn-nature",
        required_files: &["sn-jnl.cls", "sn-nature.bst"],
        metadata_schema: MetadataSchema::Journal,
        output_stem: "paper",
    },
];

pub const DEFAULT_STYLE: &str = "thesis";

/// Look up a style by name (case-insensitive).
pub fn lookup(name: &str) -> Result<&'static StyleConfig> {
    let wanted = name.trim().to_lowercase();
    STYLES.iter().find(|s| s.name == wanted).ok_or_else(|| {
        PipelineError::InvalidConfig(format!(
            "unknown style '{name}'; available: {}",
            names().collect::<Vec<_>>().join(", ")
        ))
    })
}

/// Registered style names, in registry order.
pub fn names() -> impl Iterator<Item = &'static str> {
    STYLES.iter().map(|s| s.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let s = lookup("Nature").unwrap();
        assert_eq!(s.document_class, "sn-jnl");
        assert_eq!(s.metadata_schema, MetadataSchema::Journal);
        assert_eq!(s.output_stem, "paper");
    }

    #[test]
    fn unknown_style_lists_alternatives() {
        let err = lookup("ieee").unwrap_err().to_string();
        assert!(err.contains("thesis"), "got: {err}");
        assert!(err.contains("nature"), "got: {err}");
    }

    #[test]
    fn default_style_is_registered() {
        assert!(lookup(DEFAULT_STYLE).is_ok());
        assert_eq!(names().count(), STYLES.len());
    }
}
