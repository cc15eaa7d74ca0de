//! End-to-end workflows behind the CLI subcommands.
//!
//! Each workflow builds a task, runs it through a correction loop wired from
//! [`AgentConfig`], and persists whatever the terminal result calls for.

use crate::config::AgentConfig;
use crate::ingest::{extraction_goal, read_source};
use anyhow::{bail, Context, Result};
use sim_coordination::extraction::{
    clear_results, write_diagnostics, write_parameters, write_report,
};
use sim_coordination::visualization::{
    density_field_task, list_snapshots, power_spectrum_task, DensityFieldRequest,
    PowerSpectrumRequest,
};
use sim_coordination::{
    slurm, CorrectionLoop, Generator, ParameterFiles, ParameterJudge, ParameterSchema, RunReport,
    ScriptArtifact, ScriptJudge, TaskKind, TaskSpec, ValidatedParameters, DEFAULT_BUDGET,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// File name of the run report written next to plot outputs.
pub const RUN_REPORT_NAME: &str = "run_report.json";

/// What to do with the SLURM job script after a successful extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SlurmAction {
    #[default]
    Skip,
    Write,
    Submit,
}

#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub paper: PathBuf,
    pub output_dir: PathBuf,
    pub instruction: Option<String>,
    /// TOML schema replacing the built-in MP-Gadget one
    pub schema: Option<PathBuf>,
    pub slurm: SlurmAction,
}

impl ExtractRequest {
    pub fn new(paper: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            paper: paper.into(),
            output_dir: output_dir.into(),
            instruction: None,
            schema: None,
            slurm: SlurmAction::Skip,
        }
    }
}

#[derive(Debug)]
pub struct ExtractionOutcome {
    pub report: RunReport<ValidatedParameters>,
    /// Parameter files, present only on success
    pub files: Option<ParameterFiles>,
    /// Run report with the attempt history, present only on success
    pub report_path: Option<PathBuf>,
    /// Diagnostics file, present only when the budget was exhausted
    pub diagnostics: Option<PathBuf>,
    pub slurm_script: Option<PathBuf>,
    pub job_id: Option<String>,
}

impl ExtractionOutcome {
    pub fn is_success(&self) -> bool {
        self.report.is_success()
    }
}

#[derive(Debug)]
pub struct PlotOutcome {
    pub report: RunReport<ScriptArtifact>,
    pub report_path: PathBuf,
}

impl PlotOutcome {
    pub fn is_success(&self) -> bool {
        self.report.is_success()
    }

    pub fn outputs(&self) -> &[PathBuf] {
        self.report
            .artifact()
            .map(|a| a.outputs.as_slice())
            .unwrap_or_default()
    }
}

fn budget(config: &AgentConfig) -> u32 {
    config.correction.max_iterations.unwrap_or(DEFAULT_BUDGET)
}

/// Extract simulation parameters from a paper's text.
pub async fn extract<G: Generator>(
    config: &AgentConfig,
    generator: G,
    request: &ExtractRequest,
) -> Result<ExtractionOutcome> {
    let source = read_source(&request.paper)?;
    let schema = match &request.schema {
        Some(path) => ParameterSchema::load(path)
            .with_context(|| format!("Failed to load schema {}", path.display()))?,
        None => ParameterSchema::mp_gadget(),
    };
    std::fs::create_dir_all(&request.output_dir).with_context(|| {
        format!(
            "Failed to create output directory {}",
            request.output_dir.display()
        )
    })?;

    let sections: Vec<String> = schema.section_names().map(str::to_string).collect();
    let task = TaskSpec::builder(
        TaskKind::ParameterExtraction,
        extraction_goal(&source, request.instruction.as_deref()),
        &request.output_dir,
    )
    .constraint(format!(
        "Answer with one JSON object whose top-level sections are: {}.",
        sections.join(", ")
    ))
    .budget(budget(config))
    .param("source", source.path.display())
    .build()?;

    info!(paper = %source.path.display(), sections = ?sections, "Extracting parameters");
    let looper = CorrectionLoop::new(
        generator,
        ParameterJudge::new(Arc::new(schema)),
        config.assembler(),
    )
    .with_config(config.correction());
    let report = looper.run(&task).await;
    let stem = source.stem();
    clear_results(&request.output_dir, &stem, sections.iter().map(String::as_str))?;

    let Some(params) = report.artifact() else {
        let diagnostics = write_diagnostics(&report, &request.output_dir, &stem)?;
        warn!(path = %diagnostics.display(), "Parameter extraction exhausted its budget");
        return Ok(ExtractionOutcome {
            report,
            files: None,
            report_path: None,
            diagnostics: Some(diagnostics),
            slurm_script: None,
            job_id: None,
        });
    };

    let files = write_parameters(
        params,
        &request.output_dir,
        &stem,
        &source.path.display().to_string(),
    )?;
    let report_path = write_report(&report, &request.output_dir, &stem)?;

    let mut slurm_script = None;
    let mut job_id = None;
    if request.slurm != SlurmAction::Skip {
        let (Some(genic), Some(gadget)) = (files.param_file("genic"), files.param_file("gadget"))
        else {
            bail!("A SLURM script needs both `genic` and `gadget` sections");
        };
        let script = slurm::write_script(&config.slurm, &request.output_dir, genic, gadget)?;
        if request.slurm == SlurmAction::Submit {
            job_id = Some(slurm::submit(&script).await?);
        }
        slurm_script = Some(script);
    }

    Ok(ExtractionOutcome {
        report,
        files: Some(files),
        report_path: Some(report_path),
        diagnostics: None,
        slurm_script,
        job_id,
    })
}

/// Plot the power spectrum nearest `redshift` from a simulation output directory.
pub async fn plot_power_spectrum<G: Generator>(
    config: &AgentConfig,
    generator: G,
    sim_output_dir: &Path,
    redshift: f64,
    output: Option<&Path>,
    working_dir: &Path,
) -> Result<PlotOutcome> {
    let mut request = PowerSpectrumRequest::new(sim_output_dir, redshift, working_dir);
    if let Some(output) = output {
        request.output = output.to_path_buf();
    }
    request.budget = budget(config);
    let task = power_spectrum_task(&request)?;

    let looper = CorrectionLoop::new(
        generator,
        ScriptJudge::new(config.sandbox()?),
        config.assembler(),
    )
    .with_config(config.correction());
    run_script_task(&looper, &task).await
}

#[derive(Debug, Clone)]
pub struct DensityFieldJob {
    pub sim_output_dir: PathBuf,
    /// Snapshot directory name; the first `PART_*` when unset
    pub snapshot: Option<String>,
    pub comparison: Option<PathBuf>,
    pub particle_type: u8,
    pub output_dir: PathBuf,
}

/// Render a projected density field of one snapshot, with reference retrieval.
pub async fn plot_density_field<G: Generator>(
    config: &AgentConfig,
    generator: G,
    job: &DensityFieldJob,
) -> Result<PlotOutcome> {
    let snapshot = match &job.snapshot {
        Some(name) => job.sim_output_dir.join(name),
        None => list_snapshots(&job.sim_output_dir)?
            .into_iter()
            .next()
            .with_context(|| {
                format!("No PART_* snapshots in {}", job.sim_output_dir.display())
            })?,
    };

    let mut request = DensityFieldRequest::new(&snapshot, &job.output_dir);
    request.particle_type = job.particle_type;
    request.comparison = job.comparison.clone();
    request.budget = budget(config);
    let task = density_field_task(&request)?;

    let assembler = config.retrieval_assembler()?;
    if !assembler.has_corpus() {
        warn!("No reference corpus configured; density field prompts carry no examples");
    }
    let looper = CorrectionLoop::new(generator, ScriptJudge::new(config.sandbox()?), assembler)
        .with_config(config.correction());
    run_script_task(&looper, &task).await
}

async fn run_script_task<G: Generator>(
    looper: &CorrectionLoop<G, ScriptJudge>,
    task: &TaskSpec,
) -> Result<PlotOutcome> {
    let report = looper.run(task).await;

    std::fs::create_dir_all(task.working_dir()).with_context(|| {
        format!(
            "Failed to recreate working directory {}",
            task.working_dir().display()
        )
    })?;
    let report_path = task.working_dir().join(RUN_REPORT_NAME);
    report.write_json(&report_path)?;
    info!(path = %report_path.display(), "{}", report.summary());

    Ok(PlotOutcome {
        report,
        report_path,
    })
}
