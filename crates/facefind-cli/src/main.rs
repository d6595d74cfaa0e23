use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use facefind_core::{load_rgb, DistanceMetric, FaceAnalyzer};
use facefind_hw::Camera;
use facefind_index::{refresh, resolve_root, IndexStore, RefreshSummary};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;
mod grid;
mod reference;
mod search;

use config::Config;
use reference::{Reference, ReferenceSource};
use search::{SearchOutcome, SearchRequest};

#[derive(Parser)]
#[command(name = "facefind", version, about = "Find photos of a person in a folder")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Directory containing the SCRFD and ArcFace ONNX models
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// Embedding cache database
    #[arg(long, global = true)]
    index: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct ReferenceArgs {
    /// Reference photo of the person to look for
    #[arg(long, value_name = "PATH")]
    image: Option<PathBuf>,

    /// Take the reference photo with the camera
    #[arg(long)]
    camera: bool,
}

impl ReferenceArgs {
    fn source(&self) -> ReferenceSource {
        match &self.image {
            Some(path) => ReferenceSource::Upload(path.clone()),
            None => ReferenceSource::Camera,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Find photos in FOLDER showing the person in the reference photo
    Find {
        folder: PathBuf,

        #[command(flatten)]
        reference: ReferenceArgs,

        /// Distance metric (cosine, euclidean_l2)
        #[arg(long)]
        metric: Option<DistanceMetric>,

        /// Maximum distance for a match (defaults per metric)
        #[arg(long)]
        threshold: Option<f32>,

        /// Show at most N matches
        #[arg(long, value_name = "N")]
        top: Option<usize>,

        /// Match against the cached index without re-scanning the folder
        #[arg(long)]
        no_refresh: bool,

        /// Print results as JSON
        #[arg(long)]
        json: bool,

        /// Also write a contact sheet of the matches to this PNG
        #[arg(long, value_name = "PNG")]
        sheet: Option<PathBuf>,

        /// Keep a camera-captured reference at this path
        #[arg(long, value_name = "PATH", requires = "camera")]
        save_reference: Option<PathBuf>,
    },
    /// Analyze new and changed photos in FOLDER
    Index {
        folder: PathBuf,

        /// Drop the folder's cached entries and analyze everything again
        #[arg(long)]
        rebuild: bool,
    },
    /// Take a still with the camera and save it as JPEG
    Capture { out: PathBuf },
    /// List the faces found in one image
    Detect { image: PathBuf },
    /// List V4L2 capture devices
    Devices,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = Config::load()?;
    if let Some(dir) = cli.model_dir {
        config.model_dir = dir;
    }
    if let Some(path) = cli.index {
        config.index_path = path;
    }

    match cli.command {
        Commands::Find {
            folder,
            reference,
            metric,
            threshold,
            top,
            no_refresh,
            json,
            sheet,
            save_reference,
        } => {
            if let Some(m) = metric {
                config.metric = m;
            }
            if threshold.is_some() {
                // An explicit threshold applies to whichever metric is in effect.
                config.threshold = threshold;
            } else if metric.is_some() {
                config.threshold = None;
            }
            config.validate()?;

            let (folder, reference) =
                prepare_find(&folder, &reference.source(), &config, save_reference.as_deref())?;
            let mut analyzer = load_analyzer(&config)?;
            let mut store = open_store(&config)?;

            if !json {
                println!("Finding matching photos...");
            }
            let request = SearchRequest {
                folder,
                reference: reference.path.clone(),
                metric: config.metric,
                threshold: config.threshold(),
                top,
                refresh: !no_refresh,
            };
            let outcome = search::run(&mut analyzer, &mut store, &request)?;

            if let Some(summary) = &outcome.refresh {
                report_refresh(summary);
            }
            report_find(
                &outcome,
                json,
                sheet.as_deref(),
                &config,
                &mut io::stdout().lock(),
                &mut io::stderr().lock(),
            )?;
            if reference.is_temporary() {
                tracing::debug!(path = %reference.path.display(), "removing captured reference");
            }
        }
        Commands::Index { folder, rebuild } => {
            let folder = resolve_root(&folder)?;
            let mut analyzer = load_analyzer(&config)?;
            let mut store = open_store(&config)?;

            if rebuild {
                let dropped = store.remove_under(&folder)?;
                tracing::info!(images = dropped, "cleared cached entries");
            }
            let summary = refresh(&mut store, &mut analyzer, &folder)?;
            println!(
                "{}: {} added, {} updated, {} removed, {} unchanged, {} unreadable",
                folder.display(),
                summary.added,
                summary.replaced,
                summary.removed,
                summary.unchanged,
                summary.failed
            );
        }
        Commands::Capture { out } => {
            let image = reference::capture(&config)?;
            reference::store_capture(&image, Some(&out))?;
            println!("Saved {}x{} capture to {}", image.width(), image.height(), out.display());
        }
        Commands::Detect { image } => {
            let mut analyzer = load_analyzer(&config)?;
            let rgb = load_rgb(&image)?;
            let faces = analyzer.represent(&rgb)?;

            if faces.is_empty() {
                println!("No faces detected in {}", image.display());
            }
            for (i, face) in faces.iter().enumerate() {
                let b = &face.bbox;
                println!(
                    "face {i}: x={:.0} y={:.0} w={:.0} h={:.0} confidence={:.3}",
                    b.x, b.y, b.width, b.height, b.confidence
                );
            }
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
    }

    Ok(())
}

fn load_analyzer(config: &Config) -> Result<FaceAnalyzer> {
    FaceAnalyzer::load(&config.model_dir, config.detector_options())
        .with_context(|| format!("could not load face models from {}", config.model_dir.display()))
}

fn open_store(config: &Config) -> Result<IndexStore> {
    IndexStore::open(&config.index_path)
        .with_context(|| format!("could not open index {}", config.index_path.display()))
}

fn report_refresh(summary: &RefreshSummary) {
    if summary.changed() {
        tracing::info!(
            added = summary.added,
            replaced = summary.replaced,
            removed = summary.removed,
            "index updated"
        );
    }
    if summary.failed > 0 {
        eprintln!("warning: {} photos could not be read and were skipped", summary.failed);
    }
}

/// Check the folder, then acquire the reference. A bad folder fails before
/// the camera is touched or anything is written.
fn prepare_find(
    folder: &Path,
    source: &ReferenceSource,
    config: &Config,
    save_reference: Option<&Path>,
) -> Result<(PathBuf, Reference)> {
    let folder = resolve_root(folder)?;
    let reference = reference::acquire(source, config, save_reference)?;
    Ok((folder, reference))
}

/// Print search results to `out`. In JSON mode `out` carries only the JSON
/// document and status lines go to `status`.
fn report_find(
    outcome: &SearchOutcome,
    json: bool,
    sheet: Option<&Path>,
    config: &Config,
    out: &mut dyn Write,
    status: &mut dyn Write,
) -> Result<()> {
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(outcome)?)?;
    } else if outcome.matches.is_empty() {
        writeln!(out, "No matching photos found.")?;
    } else {
        writeln!(out, "Found {} matching photos:", outcome.matches.len())?;
        writeln!(out, "{}", grid::terminal_grid(&outcome.matches, config.grid_columns))?;
    }

    if let Some(path) = sheet {
        let (image, failures) =
            grid::contact_sheet(&outcome.matches, config.grid_columns, config.thumbnail_size);
        image
            .save_with_format(path, image::ImageFormat::Png)
            .with_context(|| format!("could not write contact sheet {}", path.display()))?;
        if !failures.is_empty() {
            writeln!(
                status,
                "warning: {} photos could not be shown in the contact sheet",
                failures.len()
            )?;
        }
        let notice = if json { &mut *status } else { &mut *out };
        writeln!(notice, "Contact sheet written to {}", path.display())?;
    }
    Ok(())
}
