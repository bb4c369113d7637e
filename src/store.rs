//! Directory-backed content store.
//!
//! Every artifact lives in the job's working directory under a stable,
//! human-readable file name. The file name *is* the address: steps decide
//! whether to skip work by checking [`ContentStore::exists`], and a user can
//! delete one file to force just that artifact to be regenerated.
//!
//! Writes are atomic (temp file + rename) so an interrupted run never leaves
//! a half-written artifact that a later run would mistake for a finished one.

use crate::document::{ChapterStage, SectionKind};
use crate::error::{PipelineError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Logical artifact names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact<'a> {
    /// Extracted text of page `n` (1-based).
    PageText(usize),
    /// Full-slide render of page `n`.
    PageImage(usize),
    /// Embedded raster image `k` (1-based) of page `n`.
    EmbeddedImage(usize, usize),
    /// All page texts as one `*Page n*:` transcript.
    ExtractedText,
    Classification,
    Section(SectionKind),
    Chapter(SectionKind, ChapterStage),
    Bibliography,
    Metadata,
    /// LaTeX intermediate, named by output stem.
    LatexSource(&'a str),
    /// Compiled PDF, named by output stem.
    Document(&'a str),
}

/// Directory holding page and embedded images.
pub const IMAGES_DIR: &str = "images";

impl Artifact<'_> {
    /// File name relative to the working directory.
    pub fn name(&self) -> String {
        match self {
            Artifact::PageText(n) => format!("pages/page_{n}.md"),
            Artifact::PageImage(n) => format!("{IMAGES_DIR}/page_{n}.png"),
            Artifact::EmbeddedImage(n, k) => format!("{IMAGES_DIR}/page_{n}_img_{k}.png"),
            Artifact::ExtractedText => "extracted_text.txt".into(),
            Artifact::Classification => "classification.json".into(),
            Artifact::Section(kind) => format!("{}_section.txt", kind.slug()),
            Artifact::Chapter(kind, stage) => format!("{}_{}.md", kind.slug(), stage.suffix()),
            Artifact::Bibliography => "references.bib".into(),
            Artifact::Metadata => "metadata.yaml".into(),
            Artifact::LatexSource(stem) => format!("{stem}.tex"),
            Artifact::Document(stem) => format!("{stem}.pdf"),
        }
    }
}

/// Keyed artifact store rooted at a job's working directory.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Open (and create if needed) the store at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| PipelineError::store(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn exists(&self, artifact: Artifact<'_>) -> bool {
        self.path_of(&artifact.name()).is_file()
    }

    pub async fn read(&self, artifact: Artifact<'_>) -> Result<String> {
        let path = self.path_of(&artifact.name());
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| PipelineError::store(path, e))
    }

    pub async fn read_bytes(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path_of(name);
        tokio::fs::read(&path)
            .await
            .map_err(|e| PipelineError::store(path, e))
    }

    /// Read an artifact a step depends on, reporting absence as
    /// [`PipelineError::MissingDependency`].
    pub async fn require(&self, step: &'static str, artifact: Artifact<'_>) -> Result<String> {
        if !self.exists(artifact) {
            return Err(PipelineError::MissingDependency {
                step,
                artifact: artifact.name(),
            });
        }
        self.read(artifact).await
    }

    pub async fn write(&self, artifact: Artifact<'_>, content: impl AsRef<[u8]>) -> Result<()> {
        self.write_named(&artifact.name(), content).await
    }

    /// Overwrite `name`, creating parent directories.
    pub async fn write_named(&self, name: &str, content: impl AsRef<[u8]>) -> Result<()> {
        let path = self.path_of(name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::store(parent, e))?;
        }

        let mut tmp_path = path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);
        tokio::fs::write(&tmp_path, content.as_ref())
            .await
            .map_err(|e| PipelineError::store(&tmp_path, e))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| PipelineError::store(&path, e))?;

        debug!("wrote {} ({} bytes)", name, content.as_ref().len());
        Ok(())
    }

    /// Copy an external file into the store under `name`.
    pub async fn import(&self, source: &Path, name: &str) -> Result<()> {
        let bytes = tokio::fs::read(source)
            .await
            .map_err(|e| PipelineError::store(source, e))?;
        self.write_named(name, bytes).await
    }

    /// File names (not paths) directly under `dir`, sorted. Empty if `dir`
    /// does not exist.
    pub async fn list(&self, dir: &str) -> Result<Vec<String>> {
        let path = self.path_of(dir);
        let mut entries = match tokio::fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PipelineError::store(path, e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::store(&path, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().is_file() && !name.ends_with(".tmp") {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}
