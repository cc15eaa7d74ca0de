//! Source-text ingestion for parameter extraction.
//!
//! Papers arrive as already-extracted text; binary formats are rejected.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

/// Instruction used when the caller gives none.
pub const DEFAULT_EXTRACTION_PROMPT: &str =
    "Extract the parameters of the fiducial simulation described in the paper.";

/// Extensions that need a text-extraction step first.
const BINARY_EXTENSIONS: &[&str] = &["pdf", "ps", "djvu", "doc", "docx"];

/// A paper's text plus where it came from.
#[derive(Debug, Clone)]
pub struct SourceText {
    pub path: PathBuf,
    pub text: String,
}

impl SourceText {
    /// File name without extension, used to name the written outputs.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("paper")
            .to_string()
    }
}

pub fn read_source(path: &Path) -> Result<SourceText> {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        if BINARY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
            bail!(
                "{} is a .{} file; extract its text first (e.g. `pdftotext`) and pass the .txt",
                path.display(),
                ext
            );
        }
    }

    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read paper {}", path.display()))?;
    let text = String::from_utf8(bytes)
        .with_context(|| format!("{} is not UTF-8 text", path.display()))?;
    if text.trim().is_empty() {
        bail!("{} contains no text", path.display());
    }

    Ok(SourceText {
        path: path.to_path_buf(),
        text,
    })
}

/// Goal text for an extraction task: the instruction followed by the paper.
pub fn extraction_goal(source: &SourceText, instruction: Option<&str>) -> String {
    let instruction = instruction
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_EXTRACTION_PROMPT);
    format!(
        "{}\n\nPaper ({}):\n\n{}",
        instruction,
        source.path.display(),
        source.text.trim()
    )
}
