//! Stage executors (C4): the ten (plus 4.5) pipeline stages, each
//! normalizing its params, resolving its inputs through the [`Lineage`],
//! running its kernels, and committing a new artifact version.
//!
//! Every executor is orchestration over [`crate::kernels`]; this module's
//! job is wiring, not algorithms. [`execute`] is the single entry point a
//! caller (the `cli` crate) drives; it builds the lineage once, enforces
//! the prerequisite graph, dispatches to the stage-specific module, and
//! logs entry/exit the way the ambient stack requires.

mod s1;
pub(crate) mod s10;
mod s2;
pub(crate) mod s3;
pub(crate) mod s4;
mod s45;
mod s5;
pub(crate) mod s6;
pub(crate) mod s7;
mod s8;
pub(crate) mod s9;
#[cfg(test)]
pub(crate) mod test_support;

use crate::model::{Artifact, ArtifactFile, StageId};
use crate::resolver::Lineage;
use crate::store::{ArtifactStore, ImageRepository, RunRepository};
use crate::{now_rfc3339, ImageCodec, ParticleError, Result};
use serde::{Deserialize, Serialize};

/// One contour emitted by S8 and consumed by S9: an integer-pixel boundary
/// loop tagged `solid` (particle outline) or `pore` (void/hole outline).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ContourRecord {
    pub id: u32,
    pub bbox: [i64; 4],
    pub points: Vec<(i64, i64)>,
    pub kind: String,
}

/// One smoothed, resampled polygon emitted by S9 and consumed by S10.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PolygonRecord {
    pub id: u32,
    pub kind: String,
    pub points: Vec<(f64, f64)>,
}

/// The external collaborators a stage executor needs: the artifact store,
/// the image codec, and the image/run repositories (stage 1 only, to reach
/// the original upload bytes via its owning run).
pub struct Execution<'a> {
    pub store: &'a dyn ArtifactStore,
    pub codec: &'a dyn ImageCodec,
    pub images: &'a dyn ImageRepository,
    pub runs: &'a dyn RunRepository,
}

/// Runs `stage` for `run_id` against `params`, enforcing the prerequisite
/// graph first. Builds the lineage index fresh each call (spec.md §4.3:
/// "a small in-memory lineage index built once per request").
pub fn execute(
    exec: &Execution,
    run_id: &str,
    stage: StageId,
    params: &serde_json::Value,
) -> Result<Artifact> {
    let artifacts = exec.store.list_for_run(run_id)?;
    let lineage = Lineage::build(&artifacts);
    lineage.check_prerequisite(stage)?;

    tracing::debug!(stage = %stage, run = run_id, "stage execute start");
    let result = match stage.value() {
        1 => s1::execute(exec, run_id, &lineage, params),
        2 => s2::execute(exec, run_id, &lineage, params),
        3 => s3::execute(exec, run_id, &lineage, params),
        4 => s4::execute(exec, run_id, &lineage, params),
        45 => s45::execute(exec, run_id, &lineage, params),
        5 => s5::execute(exec, run_id, &lineage, params),
        6 => s6::execute(exec, run_id, &lineage, params),
        7 => s7::execute(exec, run_id, &lineage, params),
        8 => s8::execute(exec, run_id, &lineage, params),
        9 => s9::execute(exec, run_id, &lineage, params),
        10 => s10::execute(exec, run_id, &lineage, params),
        other => Err(ParticleError::internal(format!("no executor for stage {other}"))),
    };

    match &result {
        Ok(artifact) => tracing::info!(stage = %stage, artifact = %artifact.id, "stage execute committed"),
        Err(error) => tracing::warn!(stage = %stage, %error, "stage execute failed"),
    }
    result
}

/// A file about to be written to the artifact directory: filename, bytes,
/// mime type.
pub(crate) struct OutFile {
    pub filename: &'static str,
    pub bytes: Vec<u8>,
    pub mime: &'static str,
}

impl OutFile {
    pub(crate) fn new(filename: &'static str, bytes: Vec<u8>, mime: &'static str) -> Self {
        Self { filename, bytes, mime }
    }
}

/// Writes every file in `files` under a fresh `(run, stage)` version
/// directory and commits the resulting artifact row. Rolls back (removes
/// the directory) if the final commit fails, per spec.md §5.
pub(crate) fn commit(
    exec: &Execution,
    run_id: &str,
    stage: StageId,
    artifact_type: &str,
    params: serde_json::Value,
    files: Vec<OutFile>,
) -> Result<Artifact> {
    let version = exec.store.next_version(run_id, stage)?;
    let artifact_id = exec.store.allocate_id("art");
    let dir = exec.store.artifact_dir(run_id, stage, version, &artifact_id);

    let mut recorded: Vec<ArtifactFile> = Vec::with_capacity(files.len());
    for file in &files {
        match exec.store.write_file(&dir, file.filename, &file.bytes, file.mime) {
            Ok((meta, _path)) => recorded.push(meta),
            Err(error) => {
                let _ = exec.store.remove_dir(&dir);
                return Err(error);
            }
        }
    }

    let artifact = Artifact {
        id: artifact_id,
        run_id: run_id.to_string(),
        stage_id: stage,
        version,
        artifact_type: artifact_type.to_string(),
        params,
        files: recorded,
        created_at: now_rfc3339()?,
    };

    match exec.store.commit(artifact) {
        Ok(artifact) => Ok(artifact),
        Err(error) => {
            let _ = exec.store.remove_dir(&dir);
            Err(error)
        }
    }
}

/// Reads and decodes `artifact.files[index]` as a grayscale buffer.
pub(crate) fn load_gray(
    exec: &Execution,
    artifact: &Artifact,
    index: usize,
) -> Result<crate::kernels::GrayImage> {
    let (bytes, _) = exec.store.get_file(artifact, index)?;
    exec.codec.decode_gray(&bytes)
}

/// Reads and decodes `artifact.files[index]` as a binary mask.
pub(crate) fn load_mask(
    exec: &Execution,
    artifact: &Artifact,
    index: usize,
) -> Result<crate::kernels::Mask> {
    let (bytes, _) = exec.store.get_file(artifact, index)?;
    exec.codec.decode_mask(&bytes)
}

/// Reads and parses `artifact.files[index]` as JSON into `T`.
pub(crate) fn load_json<T: serde::de::DeserializeOwned>(
    exec: &Execution,
    artifact: &Artifact,
    index: usize,
) -> Result<T> {
    let (bytes, _) = exec.store.get_file(artifact, index)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Finds the index of the first file on `artifact` whose name equals
/// `filename`, or `not_found`.
pub(crate) fn file_index(artifact: &Artifact, filename: &str) -> Result<usize> {
    artifact
        .files
        .iter()
        .position(|f| f.filename == filename)
        .ok_or_else(|| {
            ParticleError::not_found(format!(
                "artifact {} has no file named {filename}",
                artifact.id
            ))
        })
}

/// Fills background components (4-connected) that don't touch the image
/// border and whose area is at most `max_area_px`. Shared by S6 (optional
/// hole fill before expansion) and S7 (hole_mode fill_all/fill_small).
pub(crate) fn fill_enclosed_holes(
    mask: &crate::kernels::Mask,
    max_area_px: usize,
) -> crate::kernels::Mask {
    use crate::kernels::components::connected_components;
    use crate::kernels::Mask;

    let inverted = Mask {
        width: mask.width,
        height: mask.height,
        data: mask.data.iter().map(|&v| (v == 0) as u8).collect(),
    };
    let background_components = connected_components(&inverted, 1);
    let (w, h) = (mask.width, mask.height);

    let mut filled = mask.clone();
    for component in &background_components {
        if component.area() > max_area_px {
            continue;
        }
        let touches_border = component.pixels.iter().any(|&idx| {
            let x = idx % w;
            let y = idx / w;
            x == 0 || y == 0 || x == w - 1 || y == h - 1
        });
        if touches_border {
            continue;
        }
        for &idx in &component.pixels {
            filled.data[idx] = 1;
        }
    }
    filled
}
