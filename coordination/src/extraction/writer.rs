//! Persisted layout of parameter extraction results
//!
//! A successful run writes, per section, `<stem>_<section>.json`
//! (`{"source": ..., "parameters": {...}}`) and a `<stem>.<section>` file of
//! `Key = value` lines that MP-GenIC / MP-Gadget read directly, plus the run
//! report as `<stem>_report.json`. An exhausted run writes only
//! `<stem>_diagnostics.json`. Either way the files of the other result for
//! the same stem are removed first, so one directory never holds both.

use crate::error::{CoordinationError, CoordinationResult};
use crate::extraction::validator::ValidatedParameters;
use crate::persist::write_atomic;
use crate::report::RunReport;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::info;

/// Files written for one section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionFiles {
    pub section: String,
    pub json: PathBuf,
    pub param_file: PathBuf,
}

/// Where a successful extraction landed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterFiles {
    pub sections: Vec<SectionFiles>,
}

impl ParameterFiles {
    /// The `Key = value` file of a section.
    pub fn param_file(&self, section: &str) -> Option<&Path> {
        self.sections
            .iter()
            .find(|s| s.section == section)
            .map(|s| s.param_file.as_path())
    }

    pub fn all_paths(&self) -> impl Iterator<Item = &Path> {
        self.sections
            .iter()
            .flat_map(|s| [s.json.as_path(), s.param_file.as_path()])
    }
}

/// Path of the diagnostics report for `stem`.
pub fn diagnostics_path(output_dir: &Path, stem: &str) -> PathBuf {
    output_dir.join(format!("{}_diagnostics.json", stem))
}

/// Path of the run report kept next to successful parameter files.
pub fn report_path(output_dir: &Path, stem: &str) -> PathBuf {
    output_dir.join(format!("{}_report.json", stem))
}

/// Every file an extraction for `stem` may have left in `output_dir`.
pub fn result_paths<'a>(
    output_dir: &Path,
    stem: &str,
    sections: impl IntoIterator<Item = &'a str>,
) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = sections
        .into_iter()
        .flat_map(|section| {
            [
                output_dir.join(format!("{}_{}.json", stem, section)),
                output_dir.join(format!("{}.{}", stem, section)),
            ]
        })
        .collect();
    paths.push(report_path(output_dir, stem));
    paths.push(diagnostics_path(output_dir, stem));
    paths
}

/// Remove whatever an earlier extraction for `stem` wrote. Returns the
/// paths that existed.
pub fn clear_results<'a>(
    output_dir: &Path,
    stem: &str,
    sections: impl IntoIterator<Item = &'a str>,
) -> CoordinationResult<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for path in result_paths(output_dir, stem, sections) {
        match std::fs::remove_file(&path) {
            Ok(()) => removed.push(path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CoordinationError::persist(&path, e)),
        }
    }
    if !removed.is_empty() {
        info!(count = removed.len(), stem, "Removed results of an earlier extraction");
    }
    Ok(removed)
}

/// Render a section as `Key = value` lines.
pub fn render_param_file(section: &crate::extraction::validator::ValidatedSection) -> String {
    let mut text = String::new();
    for entry in &section.entries {
        text.push_str(&format!("{} = {}\n", entry.name, entry.value));
    }
    text
}

/// Write every section of `params` under `output_dir`.
pub fn write_parameters(
    params: &ValidatedParameters,
    output_dir: &Path,
    stem: &str,
    source: &str,
) -> CoordinationResult<ParameterFiles> {
    let mut files = ParameterFiles::default();
    for section in &params.sections {
        let json_path = output_dir.join(format!("{}_{}.json", stem, section.name));
        let document = json!({
            "source": source,
            "parameters": section.to_json_map(),
        });
        write_atomic(&json_path, serde_json::to_string_pretty(&document)?.as_bytes())?;

        let param_path = output_dir.join(format!("{}.{}", stem, section.name));
        write_atomic(&param_path, render_param_file(section).as_bytes())?;

        info!(section = %section.name, json = %json_path.display(), "Saved parameters");
        files.sections.push(SectionFiles {
            section: section.name.clone(),
            json: json_path,
            param_file: param_path,
        });
    }
    Ok(files)
}

/// Write the run report of a successful extraction.
pub fn write_report<A: Serialize>(
    report: &RunReport<A>,
    output_dir: &Path,
    stem: &str,
) -> CoordinationResult<PathBuf> {
    let path = report_path(output_dir, stem);
    report.write_json(&path)?;
    info!(path = %path.display(), "Saved run report");
    Ok(path)
}

/// Write the run report of an exhausted run as diagnostics.
pub fn write_diagnostics<A: Serialize>(
    report: &RunReport<A>,
    output_dir: &Path,
    stem: &str,
) -> CoordinationResult<PathBuf> {
    let path = diagnostics_path(output_dir, stem);
    report.write_json(&path)?;
    info!(path = %path.display(), "Saved diagnostics");
    Ok(path)
}
