//! Artifact store (C2): versioned artifacts keyed by `(run, stage, version)`,
//! JSON params, file lists, export/import with base64-embedded payloads, and
//! lineage remap on import.
//!
//! `ArtifactStore`/`ImageRepository`/`RunRepository` are traits so that HTTP
//! transport and SQL persistence remain external collaborators (spec.md §1);
//! [`fs::FsStore`] is the filesystem-backed, JSON-ledger implementation used
//! by the `cli` crate and by this crate's own tests, standing in for the SQL
//! collaborator the way the teacher's `scan_file`/`write_sidecar` operate
//! directly against the filesystem without a database.

pub mod fs;

use crate::model::{Artifact, ImageRecord, Run, StageId};
use crate::{ParticleError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A single file inside a history export, base64-embedded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedFile {
    pub filename: String,
    pub mime_type: String,
    pub data_base64: String,
}

/// One artifact record inside a history export. Mirrors [`Artifact`] but
/// keeps `source_artifact_id` as its own field (the id gets remapped on
/// import, but the original is retained for traceability).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedArtifact {
    pub source_artifact_id: String,
    pub step_id: u8,
    pub version: u32,
    pub artifact_type: String,
    pub params: serde_json::Value,
    pub created_at: String,
    pub files: Vec<ExportedFile>,
}

/// The full history-export document, spec.md §6's schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDocument {
    pub schema_version: u32,
    pub export_steps: Vec<u8>,
    pub run_id: String,
    pub image_id: String,
    pub exported_at: String,
    pub artifacts: Vec<ExportedArtifact>,
}

/// Stages included in history export/import, per spec.md §4.2: stages 1..8
/// only (9/10/45 are excluded from the portable history format).
pub const EXPORT_STAGES: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];

/// Resolves `relative` against `root`, rejecting any path that canonicalizes
/// outside `root` (path traversal). `root` itself must already exist;
/// `relative`'s parent directories need not.
pub fn resolve_under_root(root: &Path, relative: &Path) -> Result<PathBuf> {
    let candidate = root.join(relative);
    let root_canon = root
        .canonicalize()
        .map_err(|e| ParticleError::internal(format!("storage root unavailable: {e}")))?;

    // The candidate file may not exist yet (we're about to write it); walk up
    // to the first existing ancestor to canonicalize safely, then reattach
    // the remaining (non-existent) suffix components.
    let mut existing = candidate.clone();
    let mut suffix: Vec<std::ffi::OsString> = Vec::new();
    while !existing.exists() {
        match existing.file_name() {
            Some(name) => {
                suffix.push(name.to_os_string());
                if !existing.pop() {
                    break;
                }
            }
            None => break,
        }
    }
    let existing_canon = existing
        .canonicalize()
        .map_err(|e| ParticleError::internal(format!("failed to resolve path: {e}")))?;
    if !existing_canon.starts_with(&root_canon) {
        return Err(ParticleError::invalid_input(
            "path escapes storage root",
        ));
    }
    let mut resolved = existing_canon;
    for component in suffix.into_iter().rev() {
        resolved.push(component);
    }
    Ok(resolved)
}

/// Operations on the three persisted entities (C2) plus images/runs, as a
/// trait boundary so HTTP/SQL layers remain external collaborators.
pub trait ArtifactStore: Send + Sync {
    /// Mints a fresh artifact/image/run id. The store owns the id scheme
    /// (content-addressed or otherwise); callers never construct ids
    /// themselves.
    fn allocate_id(&self, prefix: &str) -> String;

    /// Removes a directory (and everything under it) that a failed commit
    /// already wrote files into, so no orphaned bytes survive a rolled-back
    /// stage execution (spec.md §5 "if the commit fails, all files written
    /// by this execution must be deleted").
    fn remove_dir(&self, dir: &Path) -> Result<()>;

    /// `1 + max(existing versions for (run, stage))`, or `1` if none.
    fn next_version(&self, run_id: &str, stage: StageId) -> Result<u32>;

    /// The on-disk directory an artifact's files should be written under,
    /// per the stage-specific layout in spec.md §6 (version-keyed for
    /// stages 2/3, id-keyed otherwise).
    fn artifact_dir(&self, run_id: &str, stage: StageId, version: u32, artifact_id: &str)
        -> PathBuf;

    /// Writes `bytes` to `filename` under `dir` atomically (temp file +
    /// rename), creating `dir` if needed, and returns the recorded file
    /// entry. `dir` must already be `resolve_under_root`-safe (callers pass
    /// the result of [`ArtifactStore::artifact_dir`], itself rooted).
    fn write_file(&self, dir: &Path, filename: &str, bytes: &[u8], mime: &str)
        -> Result<(crate::model::ArtifactFile, PathBuf)>;

    /// Atomically persists `artifact`'s row. Files must already be written
    /// underneath the path [`ArtifactStore::artifact_dir`] returned.
    fn commit(&self, artifact: Artifact) -> Result<Artifact>;

    fn get(&self, artifact_id: &str) -> Result<Artifact>;

    fn list_for_run(&self, run_id: &str) -> Result<Vec<Artifact>>;

    /// Artifacts grouped by stage, each stage's artifacts sorted by version
    /// descending, then by creation timestamp descending within a version.
    fn list_grouped(&self, run_id: &str) -> Result<Vec<(StageId, Vec<Artifact>)>>;

    /// Resolves `files[index]` against the storage root and returns its
    /// bytes alongside its recorded metadata.
    fn get_file(&self, artifact: &Artifact, index: usize) -> Result<(Vec<u8>, crate::model::ArtifactFile)>;

    /// Sets `params.version_name` for every artifact sharing
    /// `artifact_id`'s `(run, stage, version)` triple.
    fn rename_version(&self, artifact_id: &str, new_name: &str) -> Result<()>;

    /// Deletes every artifact sharing `artifact_id`'s `(run, stage, version)`
    /// triple, then removes each now-orphaned directory.
    fn delete_version(&self, artifact_id: &str) -> Result<()>;

    /// Deletes every artifact belonging to `run_id` and its on-disk
    /// directories (used by image cascade-delete).
    fn delete_run_artifacts(&self, run_id: &str) -> Result<()>;

    fn export_history(&self, run_id: &str) -> Result<ExportDocument>;

    /// Imports a previously exported history into `run_id`, allocating new
    /// artifact ids and fresh per-stage versions, remapping every
    /// `_artifact_id`-suffixed reference. Returns the imported-artifact
    /// count. Malformed items fail the whole import.
    fn import_history(&self, run_id: &str, doc: &ExportDocument) -> Result<usize>;
}

pub trait ImageRepository: Send + Sync {
    fn insert(&self, image: ImageRecord) -> Result<()>;
    fn get(&self, id: &str) -> Result<ImageRecord>;
    fn list(&self) -> Result<Vec<ImageRecord>>;
    /// Deletes the image record and its original file. Cascading to runs and
    /// artifacts is the caller's responsibility (composing with
    /// [`RunRepository`] and [`ArtifactStore`]), since the data-model
    /// invariant spans all three tables.
    fn delete(&self, id: &str) -> Result<()>;
    /// Reads `image.storage_path`'s bytes, resolved safely under the
    /// storage root. Stage 1 is the only executor that needs the original
    /// source bytes directly (every later stage consumes a prior artifact).
    fn read_original(&self, image: &ImageRecord) -> Result<Vec<u8>>;
    /// Writes the original upload's bytes under `<image_id>/original/<filename>`
    /// and returns the storage-relative path recorded on the `ImageRecord`.
    fn write_original(&self, image_id: &str, filename: &str, bytes: &[u8]) -> Result<String>;
}

pub trait RunRepository: Send + Sync {
    fn insert(&self, run: Run) -> Result<()>;
    fn get(&self, id: &str) -> Result<Run>;
    fn list_by_image(&self, image_id: &str) -> Result<Vec<Run>>;
    fn delete(&self, id: &str) -> Result<()>;
}
