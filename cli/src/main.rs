//! # particlelab CLI
//!
//! Command-line front end for the particle-segmentation pipeline core.
//! HTTP transport and SQL persistence are external collaborators the spec
//! declares out of scope (spec.md §1); this binary is the stand-in driver
//! that exercises the pipeline end to end against a filesystem-backed
//! [`FsStore`] instead of a server.
//!
//! Commands mirror the HTTP surface in spec.md §6: `image`/`run` manage the
//! two upstream entities, `stage execute`/`stage preview` drive S1–S10,
//! `artifact` inspects and edits committed versions, and `history`
//! export/imports a run's lineage as a self-contained archive.
//!
//! All commands print JSON to stdout; human-readable mode is used when
//! stdout is a TTY and `--json` was not given.

mod codec;

use clap::{Args, Parser, Subcommand};
use codec::PngCodec;
use particlelab_core::model::{ArtifactFile, ImageRecord, Run, StageId};
use particlelab_core::preview;
use particlelab_core::resolver::Lineage;
use particlelab_core::stages::{self, Execution};
use particlelab_core::store::fs::FsStore;
use particlelab_core::store::{ArtifactStore, ImageRepository, RunRepository};
use particlelab_core::{now_rfc3339, OperationResponse, ParticleError, Result, Settings};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::process::exit;
use time::OffsetDateTime;

// ============================================================================
// Output format
// ============================================================================

#[derive(Clone, Copy, Debug)]
enum OutputFormat {
    Human,
    Json,
}

fn determine_output_format(json_flag: bool) -> OutputFormat {
    if json_flag {
        OutputFormat::Json
    } else if atty::is(atty::Stream::Stdout) {
        OutputFormat::Human
    } else {
        OutputFormat::Json
    }
}

fn emit_json<T: Serialize>(data: T, start: OffsetDateTime, end: OffsetDateTime) -> Result<()> {
    let response = OperationResponse::new(data, start, end)?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

// ============================================================================
// Top-level CLI structure
// ============================================================================

/// particlelab - versioned microscopy particle-segmentation pipeline
#[derive(Parser)]
#[command(
    name = "particlelab",
    version,
    about = "Versioned microscopy particle-segmentation pipeline",
    long_about = "Drives a reproducible image-analysis pipeline for microscopy particle\n\
                  segmentation: upload a grayscale image, open a run, and advance through\n\
                  ten ordered stages (calibration, intensity adjustment, denoise, binarize,\n\
                  manual edit, morphological recovery, hole handling, contour extraction,\n\
                  polygonization, watershed split). Every stage execution commits a new,\n\
                  immutable, versioned artifact; prior versions stay readable.",
    after_help = "EXAMPLES:\n  \
                  particlelab image upload sample.png\n  \
                  particlelab run create --image img-xxxx --name \"trial 1\"\n  \
                  particlelab stage execute run-xxxx 1 --params '{\"crop_bottom_px\":40,\"um_per_px\":0.5}'\n  \
                  particlelab stage preview run-xxxx 4 --params '{\"mode\":\"simple\"}' --out preview.png\n  \
                  particlelab artifact list run-xxxx\n  \
                  particlelab history export run-xxxx --out history.json"
)]
struct CliArgs {
    /// Storage root (default: $PARTICLELAB_STORAGE_ROOT or ./storage)
    #[arg(long, global = true, value_name = "PATH")]
    storage_root: Option<PathBuf>,

    /// Output JSON (default: auto-detect based on TTY)
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Manage uploaded source images
    Image {
        #[command(subcommand)]
        action: ImageAction,
    },
    /// Manage analysis runs over an image
    Run {
        #[command(subcommand)]
        action: RunAction,
    },
    /// Execute or preview a pipeline stage
    Stage {
        #[command(subcommand)]
        action: StageAction,
    },
    /// Inspect, rename, or delete committed artifacts
    Artifact {
        #[command(subcommand)]
        action: ArtifactAction,
    },
    /// Export or import a run's version history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
}

// ============================================================================
// Image subcommand
// ============================================================================

#[derive(Subcommand)]
enum ImageAction {
    /// Upload a PNG image and create its Image record
    Upload(ImageUploadArgs),
    /// List all uploaded images
    List,
    /// Get one image's metadata
    Get(IdArgs),
    /// Write an image's original bytes to a file
    Original(ImageOriginalArgs),
    /// Delete an image, cascading to its runs and artifacts
    Delete(IdArgs),
}

#[derive(Args)]
struct ImageUploadArgs {
    /// Path to a PNG file on disk
    path: PathBuf,
}

#[derive(Args)]
struct ImageOriginalArgs {
    id: String,
    /// File to write the original bytes to
    #[arg(long)]
    out: PathBuf,
}

#[derive(Args)]
struct IdArgs {
    id: String,
}

fn guess_mime(filename: &str) -> String {
    match filename.rsplit('.').next().unwrap_or("").to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "tif" | "tiff" => "image/tiff",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
    .to_string()
}

fn handle_image_upload(args: ImageUploadArgs, settings: &Settings, fmt: OutputFormat) -> Result<()> {
    let start = OffsetDateTime::now_utc();
    let bytes = std::fs::read(&args.path)
        .map_err(|e| ParticleError::invalid_input(format!("cannot read {}: {e}", args.path.display())))?;

    let store = FsStore::open(&settings.storage_root)?;
    let codec = PngCodec;
    let gray = codec.decode_gray(&bytes)?;

    let filename = args
        .path
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("upload.png")
        .to_string();
    let content_type = guess_mime(&filename);
    let image_id = store.allocate_id("img");
    let storage_path = ImageRepository::write_original(&store, &image_id, &filename, &bytes)?;
    let record = ImageRecord {
        id: image_id,
        filename,
        content_type,
        width: gray.width as u32,
        height: gray.height as u32,
        storage_path,
        created_at: now_rfc3339()?,
    };
    ImageRepository::insert(&store, record.clone())?;

    let end = OffsetDateTime::now_utc();
    match fmt {
        OutputFormat::Human => {
            println!(
                "image {} uploaded ({}x{})",
                record.id, record.width, record.height
            );
            Ok(())
        }
        OutputFormat::Json => emit_json(record, start, end),
    }
}

fn handle_image_list(settings: &Settings, fmt: OutputFormat) -> Result<()> {
    let start = OffsetDateTime::now_utc();
    let store = FsStore::open(&settings.storage_root)?;
    let images = store.list()?;
    let end = OffsetDateTime::now_utc();
    match fmt {
        OutputFormat::Human => {
            for image in &images {
                println!("{}  {}  {}x{}", image.id, image.filename, image.width, image.height);
            }
            Ok(())
        }
        OutputFormat::Json => emit_json(images, start, end),
    }
}

fn handle_image_get(args: IdArgs, settings: &Settings, fmt: OutputFormat) -> Result<()> {
    let start = OffsetDateTime::now_utc();
    let store = FsStore::open(&settings.storage_root)?;
    let image = ImageRepository::get(&store, &args.id)?;
    let end = OffsetDateTime::now_utc();
    match fmt {
        OutputFormat::Human => {
            println!("{}", serde_json::to_string_pretty(&image)?);
            Ok(())
        }
        OutputFormat::Json => emit_json(image, start, end),
    }
}

fn handle_image_original(args: ImageOriginalArgs, settings: &Settings, fmt: OutputFormat) -> Result<()> {
    let start = OffsetDateTime::now_utc();
    let store = FsStore::open(&settings.storage_root)?;
    let image = ImageRepository::get(&store, &args.id)?;
    let bytes = store.read_original(&image)?;
    std::fs::write(&args.out, &bytes)?;
    let end = OffsetDateTime::now_utc();
    let data = json!({"image_id": image.id, "bytes_written": bytes.len(), "out": args.out});
    match fmt {
        OutputFormat::Human => {
            println!("wrote {} bytes to {}", bytes.len(), args.out.display());
            Ok(())
        }
        OutputFormat::Json => emit_json(data, start, end),
    }
}

fn handle_image_delete(args: IdArgs, settings: &Settings, fmt: OutputFormat) -> Result<()> {
    let start = OffsetDateTime::now_utc();
    let store = FsStore::open(&settings.storage_root)?;
    ImageRepository::get(&store, &args.id)?; // 404 if missing, before we touch anything
    store.delete_image_cascade(&args.id)?;
    let end = OffsetDateTime::now_utc();
    let data = json!({"deleted_image_id": args.id});
    match fmt {
        OutputFormat::Human => {
            println!("deleted image {}", args.id);
            Ok(())
        }
        OutputFormat::Json => emit_json(data, start, end),
    }
}

// ============================================================================
// Run subcommand
// ============================================================================

#[derive(Subcommand)]
enum RunAction {
    /// Start a new analysis run over an image
    Create(RunCreateArgs),
    /// List runs, optionally filtered by image
    List(RunListArgs),
    /// Get one run's metadata
    Get(IdArgs),
}

#[derive(Args)]
struct RunCreateArgs {
    #[arg(long)]
    image: String,
    #[arg(long)]
    name: Option<String>,
}

#[derive(Args)]
struct RunListArgs {
    #[arg(long)]
    image: Option<String>,
}

fn handle_run_create(args: RunCreateArgs, settings: &Settings, fmt: OutputFormat) -> Result<()> {
    let start = OffsetDateTime::now_utc();
    let store = FsStore::open(&settings.storage_root)?;
    ImageRepository::get(&store, &args.image)?; // 404 if the image does not exist
    let run_id = store.allocate_id("run");
    let run = Run {
        id: run_id,
        image_id: args.image,
        name: args.name,
        created_at: now_rfc3339()?,
    };
    RunRepository::insert(&store, run.clone())?;
    let end = OffsetDateTime::now_utc();
    match fmt {
        OutputFormat::Human => {
            println!("run {} created over image {}", run.id, run.image_id);
            Ok(())
        }
        OutputFormat::Json => emit_json(run, start, end),
    }
}

fn handle_run_list(args: RunListArgs, settings: &Settings, fmt: OutputFormat) -> Result<()> {
    let start = OffsetDateTime::now_utc();
    let store = FsStore::open(&settings.storage_root)?;
    let runs = match &args.image {
        Some(image_id) => store.list_by_image(image_id)?,
        None => {
            let mut all = Vec::new();
            for image in store.list()? {
                all.extend(store.list_by_image(&image.id)?);
            }
            all
        }
    };
    let end = OffsetDateTime::now_utc();
    match fmt {
        OutputFormat::Human => {
            for run in &runs {
                println!("{}  image={}  {}", run.id, run.image_id, run.name.as_deref().unwrap_or(""));
            }
            Ok(())
        }
        OutputFormat::Json => emit_json(runs, start, end),
    }
}

fn handle_run_get(args: IdArgs, settings: &Settings, fmt: OutputFormat) -> Result<()> {
    let start = OffsetDateTime::now_utc();
    let store = FsStore::open(&settings.storage_root)?;
    let run = RunRepository::get(&store, &args.id)?;
    let end = OffsetDateTime::now_utc();
    match fmt {
        OutputFormat::Human => {
            println!("{}", serde_json::to_string_pretty(&run)?);
            Ok(())
        }
        OutputFormat::Json => emit_json(run, start, end),
    }
}

// ============================================================================
// Stage subcommand
// ============================================================================

#[derive(Subcommand)]
enum StageAction {
    /// Run a stage, committing a new versioned artifact
    Execute(StageArgs),
    /// Dry-run a stage (S3/S4/S6/S7/S9/S10 only) without committing
    Preview(StagePreviewArgs),
}

#[derive(Args)]
struct StageArgs {
    /// Run id
    run_id: String,
    /// Stage id: one of 1..10, or 45 for the 4.5 passthrough
    stage: u8,
    /// Params as an inline JSON object (default: `{}`)
    #[arg(long, conflicts_with = "params_file")]
    params: Option<String>,
    /// Params read from a JSON file
    #[arg(long)]
    params_file: Option<PathBuf>,
}

#[derive(Args)]
struct StagePreviewArgs {
    run_id: String,
    stage: u8,
    #[arg(long, conflicts_with = "params_file")]
    params: Option<String>,
    #[arg(long)]
    params_file: Option<PathBuf>,
    /// Write the preview bytes (PNG or JSON) to this file
    #[arg(long)]
    out: Option<PathBuf>,
}

fn load_params(inline: Option<&str>, file: Option<&PathBuf>) -> Result<serde_json::Value> {
    match (inline, file) {
        (Some(raw), None) => serde_json::from_str(raw)
            .map_err(|e| ParticleError::invalid_input(format!("invalid --params JSON: {e}"))),
        (None, Some(path)) => {
            let bytes = std::fs::read(path)
                .map_err(|e| ParticleError::invalid_input(format!("cannot read {}: {e}", path.display())))?;
            serde_json::from_slice(&bytes)
                .map_err(|e| ParticleError::invalid_input(format!("invalid params file JSON: {e}")))
        }
        (None, None) => Ok(json!({})),
        (Some(_), Some(_)) => unreachable!("clap enforces --params/--params-file are mutually exclusive"),
    }
}

fn open_execution(settings: &Settings) -> Result<(FsStore, PngCodec)> {
    Ok((FsStore::open(&settings.storage_root)?, PngCodec))
}

fn handle_stage_execute(args: StageArgs, settings: &Settings, fmt: OutputFormat) -> Result<()> {
    let start = OffsetDateTime::now_utc();
    let (store, codec) = open_execution(settings)?;
    let exec = Execution { store: &store, codec: &codec, images: &store, runs: &store };
    let stage = StageId::new(args.stage)?;
    let params = load_params(args.params.as_deref(), args.params_file.as_ref())?;

    let artifact = stages::execute(&exec, &args.run_id, stage, &params)?;
    let end = OffsetDateTime::now_utc();
    match fmt {
        OutputFormat::Human => {
            println!(
                "step {} v{} committed: artifact {}",
                artifact.stage_id, artifact.version, artifact.id
            );
            Ok(())
        }
        OutputFormat::Json => emit_json(artifact, start, end),
    }
}

fn handle_stage_preview(args: StagePreviewArgs, settings: &Settings, fmt: OutputFormat) -> Result<()> {
    let start = OffsetDateTime::now_utc();
    let (store, codec) = open_execution(settings)?;
    let exec = Execution { store: &store, codec: &codec, images: &store, runs: &store };
    let stage = StageId::new(args.stage)?;
    let params = load_params(args.params.as_deref(), args.params_file.as_ref())?;

    let artifacts = store.list_for_run(&args.run_id)?;
    let lineage = Lineage::build(&artifacts);
    lineage.check_prerequisite(stage)?;

    let output = match stage.value() {
        3 => preview::preview_s3(&exec, &lineage, &params)?,
        4 => preview::preview_s4(&exec, &lineage, &params)?,
        6 => preview::preview_s6(&exec, &lineage, &params)?,
        7 => preview::preview_s7(&exec, &lineage, &params)?,
        9 => preview::preview_s9(&exec, &lineage, &params)?,
        10 => preview::preview_s10(&exec, &lineage, &params)?,
        other => {
            return Err(ParticleError::invalid_input(format!(
                "step {other} has no preview renderer"
            )))
        }
    };

    if let Some(out) = &args.out {
        std::fs::write(out, &output.bytes)?;
    }
    let end = OffsetDateTime::now_utc();
    let summary = json!({
        "content_type": output.content_type,
        "bytes_len": output.bytes.len(),
        "params": output.params,
        "written_to": args.out,
    });
    match fmt {
        OutputFormat::Human => {
            println!(
                "preview step {} -> {} ({} bytes){}",
                stage,
                output.content_type,
                output.bytes.len(),
                args.out.as_ref().map(|p| format!(", wrote {}", p.display())).unwrap_or_default()
            );
            Ok(())
        }
        OutputFormat::Json => emit_json(summary, start, end),
    }
}

// ============================================================================
// Artifact subcommand
// ============================================================================

#[derive(Subcommand)]
enum ArtifactAction {
    /// List a run's artifacts, grouped by stage, each stage version-descending
    List(RunIdArgs),
    /// Get one artifact's metadata
    Get(IdArgs),
    /// Write one of an artifact's files to disk
    File(ArtifactFileArgs),
    /// Rename a version (renames every artifact sharing the triple)
    Rename(ArtifactRenameArgs),
    /// Delete a version (deletes every artifact sharing the triple)
    Delete(IdArgs),
}

#[derive(Args)]
struct RunIdArgs {
    run_id: String,
}

#[derive(Args)]
struct ArtifactFileArgs {
    id: String,
    #[arg(long)]
    file_index: usize,
    #[arg(long)]
    out: PathBuf,
}

#[derive(Args)]
struct ArtifactRenameArgs {
    id: String,
    name: String,
}

fn handle_artifact_list(args: RunIdArgs, settings: &Settings, fmt: OutputFormat) -> Result<()> {
    let start = OffsetDateTime::now_utc();
    let store = FsStore::open(&settings.storage_root)?;
    let grouped = store.list_grouped(&args.run_id)?;
    let end = OffsetDateTime::now_utc();
    match fmt {
        OutputFormat::Human => {
            for (stage, artifacts) in &grouped {
                println!("step {stage}:");
                for artifact in artifacts {
                    println!("  v{}  {}  {}", artifact.version, artifact.id, artifact.artifact_type);
                }
            }
            Ok(())
        }
        OutputFormat::Json => {
            let as_value: Vec<_> = grouped
                .into_iter()
                .map(|(stage, artifacts)| json!({"stage": stage, "artifacts": artifacts}))
                .collect();
            emit_json(as_value, start, end)
        }
    }
}

fn handle_artifact_get(args: IdArgs, settings: &Settings, fmt: OutputFormat) -> Result<()> {
    let start = OffsetDateTime::now_utc();
    let store = FsStore::open(&settings.storage_root)?;
    let artifact = ArtifactStore::get(&store, &args.id)?;
    let end = OffsetDateTime::now_utc();
    match fmt {
        OutputFormat::Human => {
            println!("{}", serde_json::to_string_pretty(&artifact)?);
            Ok(())
        }
        OutputFormat::Json => emit_json(artifact, start, end),
    }
}

fn handle_artifact_file(args: ArtifactFileArgs, settings: &Settings, fmt: OutputFormat) -> Result<()> {
    let start = OffsetDateTime::now_utc();
    let store = FsStore::open(&settings.storage_root)?;
    let artifact = ArtifactStore::get(&store, &args.id)?;
    let (bytes, meta): (Vec<u8>, ArtifactFile) = store.get_file(&artifact, args.file_index)?;
    std::fs::write(&args.out, &bytes)?;
    let end = OffsetDateTime::now_utc();
    let data = json!({"filename": meta.filename, "mime_type": meta.mime_type, "bytes_written": bytes.len()});
    match fmt {
        OutputFormat::Human => {
            println!("wrote {} ({} bytes) to {}", meta.filename, bytes.len(), args.out.display());
            Ok(())
        }
        OutputFormat::Json => emit_json(data, start, end),
    }
}

fn handle_artifact_rename(args: ArtifactRenameArgs, settings: &Settings, fmt: OutputFormat) -> Result<()> {
    let start = OffsetDateTime::now_utc();
    let store = FsStore::open(&settings.storage_root)?;
    store.rename_version(&args.id, &args.name)?;
    let artifact = ArtifactStore::get(&store, &args.id)?;
    let end = OffsetDateTime::now_utc();
    match fmt {
        OutputFormat::Human => {
            println!("renamed version to \"{}\"", args.name);
            Ok(())
        }
        OutputFormat::Json => emit_json(artifact, start, end),
    }
}

fn handle_artifact_delete(args: IdArgs, settings: &Settings, fmt: OutputFormat) -> Result<()> {
    let start = OffsetDateTime::now_utc();
    let store = FsStore::open(&settings.storage_root)?;
    ArtifactStore::get(&store, &args.id)?;
    store.delete_version(&args.id)?;
    let end = OffsetDateTime::now_utc();
    let data = json!({"deleted_artifact_id": args.id});
    match fmt {
        OutputFormat::Human => {
            println!("deleted version containing artifact {}", args.id);
            Ok(())
        }
        OutputFormat::Json => emit_json(data, start, end),
    }
}

// ============================================================================
// History subcommand
// ============================================================================

#[derive(Subcommand)]
enum HistoryAction {
    /// Export a run's stage 1..8 history as a self-contained JSON archive
    Export(HistoryExportArgs),
    /// Import a previously exported archive into a (usually different) run
    Import(HistoryImportArgs),
}

#[derive(Args)]
struct HistoryExportArgs {
    run_id: String,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args)]
struct HistoryImportArgs {
    run_id: String,
    /// Path to a JSON file previously produced by `history export`
    file: PathBuf,
}

fn handle_history_export(args: HistoryExportArgs, settings: &Settings, fmt: OutputFormat) -> Result<()> {
    let start = OffsetDateTime::now_utc();
    let store = FsStore::open(&settings.storage_root)?;
    let document = store.export_history(&args.run_id)?;
    if let Some(out) = &args.out {
        std::fs::write(out, serde_json::to_vec_pretty(&document)?)?;
    }
    let end = OffsetDateTime::now_utc();
    match fmt {
        OutputFormat::Human => {
            println!(
                "exported {} artifacts from run {}{}",
                document.artifacts.len(),
                args.run_id,
                args.out.as_ref().map(|p| format!(" -> {}", p.display())).unwrap_or_default()
            );
            Ok(())
        }
        OutputFormat::Json => emit_json(document, start, end),
    }
}

fn handle_history_import(args: HistoryImportArgs, settings: &Settings, fmt: OutputFormat) -> Result<()> {
    let start = OffsetDateTime::now_utc();
    let store = FsStore::open(&settings.storage_root)?;
    RunRepository::get(&store, &args.run_id)?; // 404 if the target run does not exist
    let bytes = std::fs::read(&args.file)
        .map_err(|e| ParticleError::invalid_input(format!("cannot read {}: {e}", args.file.display())))?;
    let document = serde_json::from_slice(&bytes)?;
    let imported_count = store.import_history(&args.run_id, &document)?;
    let end = OffsetDateTime::now_utc();
    let data = json!({"run_id": args.run_id, "imported_count": imported_count});
    match fmt {
        OutputFormat::Human => {
            println!("imported {imported_count} artifacts into run {}", args.run_id);
            Ok(())
        }
        OutputFormat::Json => emit_json(data, start, end),
    }
}

// ============================================================================
// Dispatch and entry point
// ============================================================================

fn run_command(cmd: Cmd, settings: &Settings, fmt: OutputFormat) -> Result<()> {
    match cmd {
        Cmd::Image { action } => match action {
            ImageAction::Upload(args) => handle_image_upload(args, settings, fmt),
            ImageAction::List => handle_image_list(settings, fmt),
            ImageAction::Get(args) => handle_image_get(args, settings, fmt),
            ImageAction::Original(args) => handle_image_original(args, settings, fmt),
            ImageAction::Delete(args) => handle_image_delete(args, settings, fmt),
        },
        Cmd::Run { action } => match action {
            RunAction::Create(args) => handle_run_create(args, settings, fmt),
            RunAction::List(args) => handle_run_list(args, settings, fmt),
            RunAction::Get(args) => handle_run_get(args, settings, fmt),
        },
        Cmd::Stage { action } => match action {
            StageAction::Execute(args) => handle_stage_execute(args, settings, fmt),
            StageAction::Preview(args) => handle_stage_preview(args, settings, fmt),
        },
        Cmd::Artifact { action } => match action {
            ArtifactAction::List(args) => handle_artifact_list(args, settings, fmt),
            ArtifactAction::Get(args) => handle_artifact_get(args, settings, fmt),
            ArtifactAction::File(args) => handle_artifact_file(args, settings, fmt),
            ArtifactAction::Rename(args) => handle_artifact_rename(args, settings, fmt),
            ArtifactAction::Delete(args) => handle_artifact_delete(args, settings, fmt),
        },
        Cmd::History { action } => match action {
            HistoryAction::Export(args) => handle_history_export(args, settings, fmt),
            HistoryAction::Import(args) => handle_history_import(args, settings, fmt),
        },
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();
    let fmt = determine_output_format(args.json);

    let mut settings = Settings::from_env();
    if let Some(root) = args.storage_root {
        settings.storage_root = root;
    }

    if let Err(e) = run_command(args.cmd, &settings, fmt) {
        let exit_code = e.exit_code();
        let error_output = serde_json::to_string_pretty(&e).unwrap_or_else(|_| {
            let fallback = json!({"error": e.to_string(), "exit_code": exit_code});
            serde_json::to_string_pretty(&fallback).unwrap_or_else(|_| format!("{{\"error\":\"{e}\"}}"))
        });
        eprintln!("{error_output}");
        exit(exit_code);
    }
}
