//! SLURM batch scripts for MP-GenIC + MP-Gadget runs
//!
//! Renders the job script that generates initial conditions and then evolves
//! them, writes it next to the parameter files, and optionally submits it.

use crate::error::{CoordinationError, CoordinationResult};
use crate::persist::write_atomic;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Name of the rendered script inside the run directory.
pub const SCRIPT_NAME: &str = "script.slurm";

/// Scheduler and installation settings for one simulation job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlurmSettings {
    pub job_name: String,
    pub partition: String,
    pub nodes: u32,
    pub ntasks: u32,
    pub cpus_per_task: u32,
    /// Wall-clock limit, `HH:MM:SS`
    pub time: String,
    pub mem_per_cpu: String,
    /// Mail on job end when set
    pub email: Option<String>,
    /// MP-Gadget checkout containing `genic/MP-GenIC` and `gadget/MP-Gadget`
    pub mp_gadget_root: PathBuf,
    /// `module load` lines emitted before running
    pub modules: Vec<String>,
}

impl Default for SlurmSettings {
    fn default() -> Self {
        Self {
            job_name: "mp-gadget".into(),
            partition: "RM".into(),
            nodes: 1,
            ntasks: 2,
            cpus_per_task: 14,
            time: "16:00:00".into(),
            mem_per_cpu: "8G".into(),
            email: None,
            mp_gadget_root: PathBuf::from("/path/to/MP-Gadget"),
            modules: Vec::new(),
        }
    }
}

/// Render the batch script for a run directory holding the two parameter files.
pub fn render_script(
    settings: &SlurmSettings,
    working_dir: &Path,
    genic_file: &Path,
    gadget_file: &Path,
) -> String {
    let mut script = String::from("#!/bin/bash\n");
    script.push_str(&format!("#SBATCH --partition={}\n", settings.partition));
    script.push_str(&format!(
        "#SBATCH --output={}\n",
        working_dir.join("run.out").display()
    ));
    script.push_str(&format!("#SBATCH --job-name={}\n", settings.job_name));
    script.push_str(&format!("#SBATCH --time={}\n", settings.time));
    script.push_str(&format!("#SBATCH -N {}\n", settings.nodes));
    script.push_str(&format!("#SBATCH --ntasks={}\n", settings.ntasks));
    script.push_str(&format!("#SBATCH --cpus-per-task={}\n", settings.cpus_per_task));
    if let Some(email) = &settings.email {
        script.push_str("#SBATCH --mail-type=END\n");
        script.push_str(&format!("#SBATCH --mail-user={}\n", email));
    }
    script.push_str(&format!("#SBATCH --mem-per-cpu={}\n\n", settings.mem_per_cpu));

    for module in &settings.modules {
        script.push_str(&format!("module load {}\n", module));
    }
    if !settings.modules.is_empty() {
        script.push('\n');
    }

    script.push_str(&format!("export OMP_NUM_THREADS={}\n", settings.cpus_per_task));
    script.push_str("export I_MPI_JOB_RESPECT_PROCESS_PLACEMENT=0\n\n");
    script.push_str(&format!("ROOT={}\n", settings.mp_gadget_root.display()));
    script.push_str(&format!("cd {}\n\n", working_dir.display()));

    script.push_str("echo \"Generating initial conditions\"\ndate\n");
    script.push_str(&format!(
        "mpirun -np {} $ROOT/genic/MP-GenIC {} || exit 1\n",
        settings.ntasks,
        genic_file.display()
    ));
    script.push_str("echo \"Running MP-Gadget\"\ndate\n");
    script.push_str(&format!(
        "mpirun -np {} $ROOT/gadget/MP-Gadget {} || exit 1\n",
        settings.ntasks,
        gadget_file.display()
    ));
    script.push_str("echo \"Finished\"\ndate\n");
    script
}

/// Render and write `script.slurm` into `working_dir`.
pub fn write_script(
    settings: &SlurmSettings,
    working_dir: &Path,
    genic_file: &Path,
    gadget_file: &Path,
) -> CoordinationResult<PathBuf> {
    let path = working_dir.join(SCRIPT_NAME);
    let script = render_script(settings, working_dir, genic_file, gadget_file);
    write_atomic(&path, script.as_bytes())?;
    tracing::info!(path = %path.display(), "Wrote SLURM script");
    Ok(path)
}

/// Submit a script with `sbatch --parsable` and return the job id.
pub async fn submit(script_path: &Path) -> CoordinationResult<String> {
    let output = Command::new("sbatch")
        .arg("--parsable")
        .arg(script_path)
        .output()
        .await
        .map_err(|e| CoordinationError::Slurm(format!("failed to run sbatch: {}", e)))?;

    if !output.status.success() {
        return Err(CoordinationError::Slurm(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let job_id = parse_job_id(&stdout).ok_or_else(|| {
        CoordinationError::Slurm(format!("failed to parse job id from: {}", stdout.trim()))
    })?;
    tracing::info!(job_id = %job_id, "Submitted SLURM job");
    Ok(job_id)
}

/// `--parsable` prints `jobid[;cluster]`; plain sbatch prints `Submitted batch job <id>`.
fn parse_job_id(stdout: &str) -> Option<String> {
    let last = stdout.split_whitespace().last()?;
    let id = last.split(';').next()?;
    id.chars()
        .all(|c| c.is_ascii_digit())
        .then(|| id.to_string())
        .filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_script() {
        let settings = SlurmSettings {
            email: Some("astro@example.org".into()),
            modules: vec!["intel/2022.1.2".into()],
            ..SlurmSettings::default()
        };
        let dir = Path::new("/scratch/run1");
        let script = render_script(
            &settings,
            dir,
            &dir.join("paper.genic"),
            &dir.join("paper.gadget"),
        );

        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("#SBATCH --partition=RM"));
        assert!(script.contains("#SBATCH --output=/scratch/run1/run.out"));
        assert!(script.contains("#SBATCH --mail-user=astro@example.org"));
        assert!(script.contains("module load intel/2022.1.2"));
        assert!(script
            .contains("mpirun -np 2 $ROOT/genic/MP-GenIC /scratch/run1/paper.genic || exit 1"));
        let genic = script.find("MP-GenIC").unwrap();
        let gadget = script.find("gadget/MP-Gadget").unwrap();
        assert!(genic < gadget);
    }

    #[test]
    fn test_no_mail_lines_without_email() {
        let dir = Path::new("/run");
        let script = render_script(&SlurmSettings::default(), dir, &dir.join("a"), &dir.join("b"));
        assert!(!script.contains("mail"));
    }

    #[test]
    fn test_write_script() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_script(
            &SlurmSettings::default(),
            tmp.path(),
            &tmp.path().join("p.genic"),
            &tmp.path().join("p.gadget"),
        )
        .unwrap();
        assert_eq!(path, tmp.path().join(SCRIPT_NAME));
        assert!(std::fs::read_to_string(path).unwrap().contains("MP-Gadget"));
    }

    #[test]
    fn test_parse_job_id() {
        assert_eq!(parse_job_id("12345\n").as_deref(), Some("12345"));
        assert_eq!(parse_job_id("12345;cluster\n").as_deref(), Some("12345"));
        assert_eq!(parse_job_id("Submitted batch job 987").as_deref(), Some("987"));
        assert_eq!(parse_job_id("error"), None);
        assert_eq!(parse_job_id(""), None);
    }
}
