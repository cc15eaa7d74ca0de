//! Task builders for the two plotting workflows
//!
//! Both produce a [`TaskSpec`] for the script correction loop: a power
//! spectrum plot from `powerspectrum-<a>.txt` files, and a gaepsi2 density
//! field image of a `PART_*` snapshot.

use crate::error::{CoordinationError, CoordinationResult};
use crate::task::{TaskKind, TaskSpec, DEFAULT_BUDGET};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static POWER_SPECTRUM_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^powerspectrum-([0-9]*\.?[0-9]+(?:[eE][-+]?[0-9]+)?)\.txt$")
        .expect("power spectrum file regex should compile")
});

pub const DEFAULT_POWER_SPECTRUM_OUTPUT: &str = "pspec.png";

/// Dark matter in MP-Gadget snapshots.
pub const DEFAULT_PARTICLE_TYPE: u8 = 1;

pub fn scale_factor_to_redshift(scale_factor: f64) -> f64 {
    1.0 / scale_factor - 1.0
}

/// A `powerspectrum-<a>.txt` file found on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerSpectrumFile {
    pub path: PathBuf,
    pub scale_factor: f64,
    pub redshift: f64,
}

/// Power spectrum files in `dir`, ordered by scale factor.
pub fn list_power_spectra(dir: &Path) -> CoordinationResult<Vec<PowerSpectrumFile>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(captures) = POWER_SPECTRUM_FILE.captures(name) else {
            continue;
        };
        let Ok(scale_factor) = captures[1].parse::<f64>() else {
            continue;
        };
        if scale_factor <= 0.0 {
            continue;
        }
        files.push(PowerSpectrumFile {
            path: entry.path(),
            scale_factor,
            redshift: scale_factor_to_redshift(scale_factor),
        });
    }
    files.sort_by(|a, b| a.scale_factor.total_cmp(&b.scale_factor));
    Ok(files)
}

/// The file whose redshift is closest to `redshift`.
pub fn nearest_power_spectrum(
    files: &[PowerSpectrumFile],
    redshift: f64,
) -> Option<&PowerSpectrumFile> {
    files
        .iter()
        .min_by(|a, b| (a.redshift - redshift).abs().total_cmp(&(b.redshift - redshift).abs()))
}

/// `PART_*` snapshot directories in `dir`, sorted by name.
pub fn list_snapshots(dir: &Path) -> CoordinationResult<Vec<PathBuf>> {
    let mut snapshots: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_dir()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("PART_"))
        })
        .collect();
    snapshots.sort();
    Ok(snapshots)
}

/// Output file name for a density field image.
pub fn density_field_output_name(snapshot_name: &str, particle_type: u8) -> String {
    format!("density_field_{}_type{}.png", snapshot_name, particle_type)
}

fn absolute(dir: &Path) -> CoordinationResult<PathBuf> {
    std::fs::canonicalize(dir).map_err(|e| {
        CoordinationError::InvalidTask(format!("{} is not accessible: {}", dir.display(), e))
    })
}

#[derive(Debug, Clone)]
pub struct PowerSpectrumRequest {
    /// Directory holding `powerspectrum-<a>.txt`
    pub sim_output_dir: PathBuf,
    pub redshift: f64,
    /// Output image, relative to `working_dir` unless absolute
    pub output: PathBuf,
    pub working_dir: PathBuf,
    pub budget: u32,
}

impl PowerSpectrumRequest {
    pub fn new(
        sim_output_dir: impl Into<PathBuf>,
        redshift: f64,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            sim_output_dir: sim_output_dir.into(),
            redshift,
            output: PathBuf::from(DEFAULT_POWER_SPECTRUM_OUTPUT),
            working_dir: working_dir.into(),
            budget: DEFAULT_BUDGET,
        }
    }
}

pub fn power_spectrum_task(request: &PowerSpectrumRequest) -> CoordinationResult<TaskSpec> {
    if !request.redshift.is_finite() || request.redshift < 0.0 {
        return Err(CoordinationError::InvalidTask(format!(
            "redshift must be a non-negative number, got {}",
            request.redshift
        )));
    }
    let sim_dir = absolute(&request.sim_output_dir)?;
    let available = list_power_spectra(&sim_dir)?;
    let nearest = nearest_power_spectrum(&available, request.redshift).ok_or_else(|| {
        CoordinationError::InvalidTask(format!(
            "no powerspectrum-<scale_factor>.txt files in {}",
            sim_dir.display()
        ))
    })?;

    let output_name = request.output.display().to_string();
    let goal = format!(
        "I would like to plot the power spectrum at redshift {z}, using the power spectrum files in this folder:\n\
         {dir}\n\
         The files are named powerspectrum-<scale_factor>.txt. Convert the scale factor in the file name to redshift with \
         redshift = 1 / scale_factor - 1. If the exact redshift is not available, use the nearest one; \
         the nearest file here is {file} (z = {nearest_z:.3}).\n\
         Save the plot as \"{output}\", use the correct scale for each axis and label the redshift on the plot.",
        z = request.redshift,
        dir = sim_dir.display(),
        file = nearest.path.display(),
        nearest_z = nearest.redshift,
        output = output_name,
    );

    TaskSpec::builder(TaskKind::Plot, goal, &request.working_dir)
        .output(&request.output)
        .constraint("Use log-log axes for P(k) against k.")
        .constraint(format!("Label the plot with the redshift (z = {:.3}).", nearest.redshift))
        .budget(request.budget)
        .param("redshift", request.redshift)
        .param("power_spectrum_file", nearest.path.display())
        .build()
}

#[derive(Debug, Clone)]
pub struct DensityFieldRequest {
    /// `PART_*` snapshot directory
    pub snapshot: PathBuf,
    /// Second snapshot rendered side by side (e.g. a super-resolution run)
    pub comparison: Option<PathBuf>,
    pub particle_type: u8,
    /// Where the image is written; also the script's working directory
    pub output_dir: PathBuf,
    pub budget: u32,
}

impl DensityFieldRequest {
    pub fn new(snapshot: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            snapshot: snapshot.into(),
            comparison: None,
            particle_type: DEFAULT_PARTICLE_TYPE,
            output_dir: output_dir.into(),
            budget: DEFAULT_BUDGET,
        }
    }
}

pub fn density_field_task(request: &DensityFieldRequest) -> CoordinationResult<TaskSpec> {
    let snapshot = absolute(&request.snapshot)?;
    let snapshot_name = snapshot
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            CoordinationError::InvalidTask(format!("{} has no usable name", snapshot.display()))
        })?
        .to_string();
    let output = density_field_output_name(&snapshot_name, request.particle_type);

    let goal = match &request.comparison {
        Some(other) => {
            let other = absolute(other)?;
            format!(
                "Write Python code (using the bigfile and gaepsi2 libraries) that loads the snapshots located at \
                 {a} and {b}, reads particle type {t}, computes a 3-D density field for each snapshot over the full \
                 simulation volume with constant smoothing length, puts the centre of the view at the centre of the box, \
                 and saves the figure as {output} with the two snapshots side by side.",
                a = snapshot.display(),
                b = other.display(),
                t = request.particle_type,
                output = output,
            )
        }
        None => format!(
            "Write Python code (using the bigfile and gaepsi2 libraries) that loads the snapshot located at {a}, \
             reads particle type {t}, computes a 3-D density field for the full simulation volume, puts the centre \
             of the view at the centre of the box, and saves the plot as {output}.",
            a = snapshot.display(),
            t = request.particle_type,
            output = output,
        ),
    };

    TaskSpec::builder(TaskKind::DensityField, goal, &request.output_dir)
        .output(&output)
        .constraint("Make the background black.")
        .constraint("Label the redshift on the plot (read it from the snapshot header).")
        .budget(request.budget)
        .param("snapshot", &snapshot_name)
        .param("particle_type", request.particle_type)
        .build()
}
