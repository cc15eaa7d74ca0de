//! `sim-agents` command line
//!
//! ```bash
//! # Parameters from a paper (already converted to text), plus a SLURM script
//! sim-agents extract paper.txt --output-dir runs/paper --slurm
//!
//! # Plots from simulation output
//! sim-agents plot-power-spectrum output/ --redshift 0.5
//! sim-agents plot-density-field output/ --snapshot PART_004 --output-dir plots/
//!
//! # Local endpoint, tighter budget
//! SIM_LLM_URL=http://localhost:8080/v1 sim-agents --max-iterations 2 check-endpoint
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use sim_agents::config::AgentConfig;
use sim_agents::llm::{check_endpoint, ChatCompletionsGenerator};
use sim_agents::workflows::{self, DensityFieldJob, ExtractRequest, SlurmAction};
use std::path::PathBuf;
use tracing::{error, info};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file (overrides SIM_* environment variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Maximum attempts per task (overrides SIM_MAX_ITERATIONS and the config file)
    #[arg(long, global = true)]
    max_iterations: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract MP-Gadget parameters from a paper's text
    Extract {
        /// Paper as plain text
        paper: PathBuf,

        #[arg(long, default_value = "output")]
        output_dir: PathBuf,

        /// Instruction replacing the default one (e.g. which run to extract)
        #[arg(long)]
        custom_prompt: Option<String>,

        /// Parameter schema in TOML (defaults to the built-in MP-Gadget schema)
        #[arg(long)]
        schema: Option<PathBuf>,

        /// Write a SLURM job script next to the parameter files
        #[arg(long, default_value_t = false)]
        slurm: bool,

        /// Submit the SLURM script with sbatch (implies --slurm)
        #[arg(long, default_value_t = false)]
        submit: bool,
    },

    /// Plot the power spectrum at a redshift
    PlotPowerSpectrum {
        /// Directory holding powerspectrum-<scale_factor>.txt files
        sim_output_dir: PathBuf,

        #[arg(long)]
        redshift: f64,

        /// Output image name
        #[arg(long)]
        output: Option<PathBuf>,

        /// Directory the script runs in and writes to
        #[arg(long, default_value = "visualization")]
        working_dir: PathBuf,
    },

    /// Render a projected density field of a snapshot
    PlotDensityField {
        /// Directory holding PART_* snapshots
        sim_output_dir: PathBuf,

        /// Snapshot directory name (default: first PART_*)
        #[arg(long)]
        snapshot: Option<String>,

        /// Second snapshot rendered side by side
        #[arg(long)]
        compare: Option<PathBuf>,

        #[arg(long, default_value_t = 1)]
        particle_type: u8,

        #[arg(long, default_value = "visualization")]
        output_dir: PathBuf,

        /// Reference corpus directory (overrides retrieval.corpus_dir)
        #[arg(long)]
        corpus_dir: Option<PathBuf>,
    },

    /// Check that the language model endpoint answers
    CheckEndpoint,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = AgentConfig::load(args.config.as_deref())?;
    if let Some(n) = args.max_iterations {
        if n == 0 {
            bail!("--max-iterations must be at least 1");
        }
        config.correction.max_iterations = Some(n);
    }

    match args.command {
        Command::Extract {
            paper,
            output_dir,
            custom_prompt,
            schema,
            slurm,
            submit,
        } => {
            let request = ExtractRequest {
                instruction: custom_prompt,
                schema,
                slurm: match (slurm, submit) {
                    (_, true) => SlurmAction::Submit,
                    (true, false) => SlurmAction::Write,
                    (false, false) => SlurmAction::Skip,
                },
                ..ExtractRequest::new(paper, output_dir)
            };
            let generator = ChatCompletionsGenerator::from_settings(&config.llm)?;
            let outcome = workflows::extract(&config, generator, &request).await?;

            info!("{}", outcome.report.summary());
            if let Some(files) = &outcome.files {
                for path in files.all_paths() {
                    println!("{}", path.display());
                }
            }
            if let Some(report) = &outcome.report_path {
                println!("{}", report.display());
            }
            if let Some(script) = &outcome.slurm_script {
                println!("{}", script.display());
            }
            if let Some(job_id) = &outcome.job_id {
                println!("Submitted batch job {}", job_id);
            }
            if let Some(diagnostics) = &outcome.diagnostics {
                error!(path = %diagnostics.display(), "Extraction failed");
                std::process::exit(1);
            }
        }

        Command::PlotPowerSpectrum {
            sim_output_dir,
            redshift,
            output,
            working_dir,
        } => {
            let generator = ChatCompletionsGenerator::from_settings(&config.llm)?;
            let outcome = workflows::plot_power_spectrum(
                &config,
                generator,
                &sim_output_dir,
                redshift,
                output.as_deref(),
                &working_dir,
            )
            .await?;
            finish_plot(&outcome);
        }

        Command::PlotDensityField {
            sim_output_dir,
            snapshot,
            compare,
            particle_type,
            output_dir,
            corpus_dir,
        } => {
            if corpus_dir.is_some() {
                config.retrieval.corpus_dir = corpus_dir;
            }
            let job = DensityFieldJob {
                sim_output_dir,
                snapshot,
                comparison: compare,
                particle_type,
                output_dir,
            };
            let generator = ChatCompletionsGenerator::from_settings(&config.llm)?;
            let outcome = workflows::plot_density_field(&config, generator, &job).await?;
            finish_plot(&outcome);
        }

        Command::CheckEndpoint => {
            if check_endpoint(&config.llm).await {
                info!(url = %config.llm.url, "Endpoint reachable");
            } else {
                error!(url = %config.llm.url, "Endpoint unreachable");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn finish_plot(outcome: &workflows::PlotOutcome) {
    for path in outcome.outputs() {
        println!("{}", path.display());
    }
    if !outcome.is_success() {
        error!(report = %outcome.report_path.display(), "{}", outcome.report.summary());
        std::process::exit(1);
    }
}
