//! hspec command-line front end.
//!
//! Thin wrapper over the session command interface: inspect cubes, extract
//! spectra, export CSV and PNG snapshots, and replay JSON command scripts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use thiserror::Error;

use hspec::config::{AppConfig, ConfigError, LogLevel};
use hspec::data::synthetic;
use hspec::error::{FormatError, SourceError};
use hspec::export::{self, Bands, CsvOptions};
use hspec::session::RecomputePolicy;
use hspec::session::command::parse_script;
use hspec::{Mode, Pixel, PreprocessingFlags, RecomputeWorker, SessionState, SourceId, WavelengthRange};

/// How long `run` waits for the background recompute before giving up.
const WORKER_TIMEOUT: Duration = Duration::from_secs(120);

type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Session(#[from] hspec::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("Invalid script: {0}")]
    Script(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Usage(String),
}

/// Hyperspectral spectrum explorer.
#[derive(Parser)]
#[command(name = "hspec")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (error, warn, info, debug, trace); overrides the config file
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Preprocessing switches shared by several subcommands.
#[derive(clap::Args, Clone, Copy)]
struct FlagArgs {
    /// Show absorbance instead of reflectance
    #[arg(long)]
    absorbance: bool,

    /// Median denoise
    #[arg(long)]
    denoise: bool,

    /// Savitzky-Golay smoothing
    #[arg(long)]
    smoothing: bool,

    /// Standard Normal Variate
    #[arg(long)]
    snv: bool,
}

impl FlagArgs {
    fn apply(self, session: &mut SessionState) {
        if self.absorbance {
            session.set_mode(Mode::Absorbance);
        }
        session.set_flags(PreprocessingFlags {
            denoise: self.denoise,
            smoothing: self.smoothing,
            snv: self.snv,
        });
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show dimensions and wavelengths of a cube
    Info {
        /// Cube file (.hdr or .npy)
        input: PathBuf,
    },

    /// Print the spectrum of one pixel as CSV
    Spectrum {
        /// Cube file
        input: PathBuf,

        /// Pixel row
        #[arg(long)]
        row: u32,

        /// Pixel column
        #[arg(long)]
        col: u32,

        /// Wavelength window
        #[arg(long, num_args = 2, value_names = ["MIN", "MAX"])]
        range: Option<Vec<f64>>,

        #[command(flatten)]
        flags: FlagArgs,
    },

    /// Export the spectra of a saved session as CSV
    ExportCsv {
        /// Session snapshot (.json)
        session: PathBuf,

        /// Output CSV file
        #[arg(short, long)]
        output: PathBuf,

        /// Add std columns for polygons
        #[arg(long)]
        std: bool,

        /// Write `#` comment lines with the session settings
        #[arg(long)]
        comments: bool,
    },

    /// Render a band or RGB composite to PNG
    Render {
        /// Cube file, or a session snapshot (.json) to draw its annotations
        input: PathBuf,

        /// Output PNG file
        #[arg(short, long)]
        output: PathBuf,

        /// Band index for a grayscale image
        #[arg(long, conflicts_with = "rgb")]
        band: Option<usize>,

        /// Three band indices for an RGB composite
        #[arg(long, num_args = 3, value_names = ["R", "G", "B"])]
        rgb: Option<Vec<usize>>,

        /// Source id when rendering a session (defaults to the first source)
        #[arg(long)]
        source: Option<String>,

        /// Draw annotations
        #[arg(long)]
        overlay: bool,

        /// Render absorbance
        #[arg(long)]
        absorbance: bool,
    },

    /// Run a JSON command script against a session
    Run {
        /// Script: a JSON array of commands or one command per line
        script: PathBuf,

        /// Session snapshot to start from
        #[arg(long)]
        session: Option<PathBuf>,

        /// Save the resulting session here
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Write a synthetic test cube as .npy plus a wavelength sidecar
    Synth {
        /// Output .npy file
        output: PathBuf,

        #[arg(long, default_value = "64")]
        rows: usize,

        #[arg(long, default_value = "64")]
        cols: usize,

        #[arg(long, default_value = "50")]
        bands: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::load_from_default_path(),
    };
    let level = cli.log_level.unwrap_or(config.preferences.log_level);
    env_logger::Builder::new()
        .filter_level(level.to_level_filter())
        .parse_default_env()
        .init();
    log::debug!("Log level {}", level.name());

    match cli.command {
        Commands::Info { input } => info(&config, &input),
        Commands::Spectrum {
            input,
            row,
            col,
            range,
            flags,
        } => spectrum(&config, &input, Pixel::new(row, col), range, flags),
        Commands::ExportCsv {
            session,
            output,
            std,
            comments,
        } => {
            let mut state = load_session(&config, &session)?;
            state.refresh();
            let options = CsvOptions {
                include_std: std || config.export.include_std,
                comments: comments || config.export.comments,
            };
            let columns = export::export_csv(&state, &output, &options)
                .map_err(hspec::Error::from)?;
            println!("Wrote {} columns to {}", columns, output.display());
            Ok(())
        }
        Commands::Render {
            input,
            output,
            band,
            rgb,
            source,
            overlay,
            absorbance,
        } => {
            let bands = match (band, rgb) {
                (Some(band), _) => Bands::Gray(band),
                (None, Some(rgb)) => match rgb.as_slice() {
                    &[r, g, b] => Bands::Rgb([r, g, b]),
                    _ => return Err(CliError::Usage("--rgb takes three bands".to_string())),
                },
                (None, None) => Bands::Gray(0),
            };
            render(&config, &input, &output, bands, source, overlay, absorbance)
        }
        Commands::Run {
            script,
            session,
            save,
        } => run(&config, &script, session.as_deref(), save.as_deref()),
        Commands::Synth {
            output,
            rows,
            cols,
            bands,
        } => {
            let (data, wavelengths) = synthetic::generate_test_cube(rows, cols, bands);
            synthetic::write_npy_cube(&output, &data, &wavelengths)?;
            println!("Wrote {}x{}x{} cube to {}", rows, cols, bands, output.display());
            Ok(())
        }
    }
}

fn new_session(config: &AppConfig) -> Result<SessionState> {
    SessionState::from_config(config).map_err(|e| CliError::Usage(e.to_string()))
}

fn load_session(config: &AppConfig, path: &Path) -> Result<SessionState> {
    let mut session = new_session(config)?;
    let report = session.load_snapshot(path)?;
    for unresolved in &report.unresolved {
        eprintln!(
            "warning: source {} ({}) unavailable: {}",
            unresolved.id,
            unresolved.path.display(),
            unresolved.error
        );
    }
    Ok(session)
}

fn info(config: &AppConfig, input: &Path) -> Result<()> {
    let mut session = new_session(config)?;
    let id = session.open_source(input)?;
    let source = session.require_source(&id)?;
    let shape = source.shape();
    let wavelengths = source.wavelengths();

    println!("path:        {}", input.display());
    println!("shape:       {} rows x {} cols x {} bands", shape.rows, shape.cols, shape.bands);
    if let (Some(first), Some(last)) = (wavelengths.first(), wavelengths.last()) {
        println!("wavelengths: {} .. {}", first, last);
    }
    println!("scale:       {}", source.reflectance_scale());
    Ok(())
}

fn spectrum(
    config: &AppConfig,
    input: &Path,
    pixel: Pixel,
    range: Option<Vec<f64>>,
    flags: FlagArgs,
) -> Result<()> {
    let mut session = new_session(config)?;
    session.set_recompute_policy(RecomputePolicy::Deferred);
    let id = session.open_source(input)?;
    flags.apply(&mut session);
    if let Some(range) = range {
        let (min, max) = match range.as_slice() {
            &[min, max] => (min, max),
            _ => return Err(CliError::Usage("--range takes two values".to_string())),
        };
        session.set_wavelength_range(WavelengthRange::new(min, max).map_err(CliError::Usage)?);
    }

    let point = session.add_point(&id, pixel, "")?;
    session.refresh();
    let annotation = session
        .annotations()
        .get(&point)
        .ok_or_else(|| CliError::Usage("point vanished".to_string()))?;
    let Some((wavelengths, values)) = annotation.derived.spectrum() else {
        return Err(CliError::Usage(format!(
            "no spectrum at ({}, {}): {:?}",
            pixel.row, pixel.col, annotation.derived
        )));
    };

    println!("wavelength,{}", session.mode());
    for (wavelength, value) in wavelengths.iter().zip(values.iter()) {
        println!("{},{}", wavelength, value);
    }
    Ok(())
}

fn render(
    config: &AppConfig,
    input: &Path,
    output: &Path,
    bands: Bands,
    source: Option<String>,
    overlay: bool,
    absorbance: bool,
) -> Result<()> {
    let is_session = input
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let (mut session, source_id) = if is_session {
        let session = load_session(config, input)?;
        let source_id = match source {
            Some(id) => SourceId::new(id),
            None => session
                .sources()
                .first()
                .map(|s| s.id.clone())
                .ok_or_else(|| CliError::Usage("session has no sources".to_string()))?,
        };
        (session, source_id)
    } else {
        let mut session = new_session(config)?;
        let id = session.open_source(input)?;
        (session, id)
    };
    if absorbance {
        session.set_mode(Mode::Absorbance);
    }

    export::export_png(&session, &source_id, bands, overlay, output)?;
    println!("Wrote {}", output.display());
    Ok(())
}

fn run(config: &AppConfig, script: &Path, start: Option<&Path>, save: Option<&Path>) -> Result<()> {
    let commands = parse_script(&std::fs::read_to_string(script)?)?;
    let mut session = match start {
        Some(path) => load_session(config, path)?,
        None => new_session(config)?,
    };

    for command in commands {
        let output = session.execute(command)?;
        println!("{}", serde_json::to_string(&output)?);
    }

    if session.recompute_policy() == RecomputePolicy::Deferred {
        let mut worker = RecomputeWorker::spawn(config.preferences.worker_threads)?;
        worker.submit(session.recompute_request());
        if let Some(result) = worker.wait_result(WORKER_TIMEOUT) {
            let applied = session.apply_recompute(result);
            log::info!("Background recompute updated {} annotations", applied);
        }
    }

    if let Some(path) = save {
        session.save_snapshot(path)?;
    }
    Ok(())
}
