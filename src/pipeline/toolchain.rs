//! Typesetting: pandoc (Markdown → LaTeX) then tectonic (LaTeX → PDF).
//!
//! Both tools run as subprocesses with the working directory as `cwd`, so
//! relative image paths, the bibliography and the class files copied there
//! all resolve. stderr is captured and returned verbatim on failure.

use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Everything needed to typeset one document.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Directory holding every input; tools run here.
    pub workdir: PathBuf,
    /// Chapter files relative to `workdir`, in document order.
    pub chapters: Vec<String>,
    pub metadata: String,
    pub bibliography: String,
    /// Template file name relative to `workdir`.
    pub template: String,
    /// CSL file; switches from natbib to citeproc when set.
    pub csl: Option<PathBuf>,
    /// Stem of the `.tex` and `.pdf` outputs.
    pub output_stem: String,
}

/// Turns chapters + metadata into a compiled document.
#[async_trait]
pub trait DocumentBuilder: Send + Sync {
    /// Build the document and return the path of the compiled PDF.
    async fn build(&self, request: &BuildRequest) -> Result<PathBuf>;
}

/// pandoc + tectonic on `PATH` (or at configured locations).
#[derive(Debug, Clone)]
pub struct PandocToolchain {
    pandoc: PathBuf,
    tectonic: PathBuf,
}

impl PandocToolchain {
    pub fn new(pandoc: impl Into<PathBuf>, tectonic: impl Into<PathBuf>) -> Self {
        Self {
            pandoc: pandoc.into(),
            tectonic: tectonic.into(),
        }
    }

    /// pandoc arguments for `request`.
    pub fn pandoc_args(request: &BuildRequest) -> Vec<String> {
        let mut args = vec![
            format!("--metadata-file={}", request.metadata),
            format!("--template={}", request.template),
            "-s".to_string(),
            "-o".to_string(),
            format!("{}.tex", request.output_stem),
            "--filter".to_string(),
            "pandoc-crossref".to_string(),
        ];
        match &request.csl {
            Some(csl) => {
                args.push("--citeproc".to_string());
                args.push(format!("--csl={}", csl.display()));
            }
            None => args.push("--natbib".to_string()),
        }
        args.push("--pdf-engine=xelatex".to_string());
        args.push("--resource-path=.".to_string());
        args.push(format!("--bibliography={}", request.bibliography));
        args.extend(request.chapters.iter().cloned());
        args
    }
}

#[async_trait]
impl DocumentBuilder for PandocToolchain {
    async fn build(&self, request: &BuildRequest) -> Result<PathBuf> {
        info!("pandoc: {} chapter(s) → {}.tex", request.chapters.len(), request.output_stem);
        run_tool(&self.pandoc, &Self::pandoc_args(request), &request.workdir).await?;

        let tex = format!("{}.tex", request.output_stem);
        info!("tectonic: {} → {}.pdf", tex, request.output_stem);
        run_tool(&self.tectonic, &[tex], &request.workdir).await?;

        Ok(request.workdir.join(format!("{}.pdf", request.output_stem)))
    }
}

/// Run `program args…` in `cwd`; non-zero exit or spawn failure becomes
/// [`PipelineError::ExternalToolFailure`] carrying stderr.
async fn run_tool(program: &Path, args: &[String], cwd: &Path) -> Result<()> {
    let tool = program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string());
    debug!("running {} {:?}", tool, args);

    let output = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| PipelineError::ExternalToolFailure {
            tool: tool.clone(),
            status: None,
            stderr: format!("failed to start '{}': {}", program.display(), e),
        })?;

    if !output.status.success() {
        return Err(PipelineError::ExternalToolFailure {
            tool,
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(csl: Option<PathBuf>) -> BuildRequest {
        BuildRequest {
            workdir: PathBuf::from("/tmp/job"),
            chapters: vec![
                "introduction_chapter_with_figures.md".into(),
                "results_chapter_with_figures.md".into(),
            ],
            metadata: "metadata.yaml".into(),
            bibliography: "references.bib".into(),
            template: "thesis-template.tex".into(),
            csl,
            output_stem: "thesis".into(),
        }
    }

    #[test]
    fn natbib_without_csl() {
        let args = PandocToolchain::pandoc_args(&request(None));
        assert!(args.contains(&"--natbib".to_string()));
        assert!(!args.contains(&"--citeproc".to_string()));
        assert_eq!(args.last().unwrap(), "results_chapter_with_figures.md");
        assert!(args.contains(&"--metadata-file=metadata.yaml".to_string()));
    }

    #[test]
    fn citeproc_with_csl() {
        let args = PandocToolchain::pandoc_args(&request(Some(PathBuf::from("apa.csl"))));
        assert!(args.contains(&"--citeproc".to_string()));
        assert!(args.contains(&"--csl=apa.csl".to_string()));
        assert!(!args.contains(&"--natbib".to_string()));
    }

    #[tokio::test]
    async fn missing_binary_is_external_tool_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_tool(
            Path::new("definitely-not-a-real-pandoc"),
            &["--version".to_string()],
            dir.path(),
        )
        .await
        .unwrap_err();
        match err {
            PipelineError::ExternalToolFailure { tool, status, stderr } => {
                assert_eq!(tool, "definitely-not-a-real-pandoc");
                assert_eq!(status, None);
                assert!(stderr.contains("failed to start"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
