//! The three persisted entities (§3 of the pipeline design): `ImageRecord`,
//! `Run`, `Artifact`, plus the `StageId` newtype that names where in the
//! pipeline an artifact was produced.

use crate::{ParticleError, Result, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A stage id in `{1..10, 45}`. Represented as a validated newtype rather
/// than an 11-variant enum because 45 ("4.5", an auxiliary passthrough
/// between stages 4 and 5) is not part of a contiguous range, and several
/// call sites (prerequisite graph, on-disk path formatting) treat the id
/// as a small integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(u8);

impl StageId {
    pub const S1: StageId = StageId(1);
    pub const S2: StageId = StageId(2);
    pub const S3: StageId = StageId(3);
    pub const S4: StageId = StageId(4);
    pub const S5: StageId = StageId(5);
    pub const S45: StageId = StageId(45);
    pub const S6: StageId = StageId(6);
    pub const S7: StageId = StageId(7);
    pub const S8: StageId = StageId(8);
    pub const S9: StageId = StageId(9);
    pub const S10: StageId = StageId(10);

    const VALID: [u8; 11] = [1, 2, 3, 4, 5, 45, 6, 7, 8, 9, 10];

    /// Validates `n` against the fixed stage-id domain.
    pub fn new(n: u8) -> Result<Self> {
        if Self::VALID.contains(&n) {
            Ok(StageId(n))
        } else {
            Err(ParticleError::invalid_input(format!(
                "unknown stage id {n}"
            )))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// On-disk directory component, e.g. `step4` or `step_45`. Stages 2 and
    /// 3 use the underscore-prefixed, version-keyed layout (`step_<n>/v<k>`);
    /// the rest are keyed by artifact id (`step<n>/<artifact_id>`), per the
    /// on-disk layout in the external interfaces section.
    pub fn uses_version_directory(self) -> bool {
        matches!(self.0, 2 | 3)
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An uploaded source image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    pub filename: String,
    pub content_type: String,
    pub width: u32,
    pub height: u32,
    /// Path of the original bytes, relative to the storage root.
    pub storage_path: String,
    pub created_at: Timestamp,
}

/// An independent analysis session over one image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub image_id: String,
    pub name: Option<String>,
    pub created_at: Timestamp,
}

/// A file produced by a stage execution.
///
/// `path` is relative to `storage_root` and is resolved as-is by
/// `get_file`/`export_history` — it is the on-disk location, which for
/// imported history lives under `history_import/...` rather than the
/// directory `artifact_dir()` would compute for a fresh execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactFile {
    pub filename: String,
    pub mime_type: String,
    pub path: String,
}

/// An immutable, versioned output of one stage execution.
///
/// `params` is a free-form JSON object; values at keys ending in
/// `_artifact_id` are upstream-artifact references that must point into the
/// same run (enforced by the resolver, not by this struct).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub run_id: String,
    pub stage_id: StageId,
    pub version: u32,
    pub artifact_type: String,
    pub params: serde_json::Value,
    pub files: Vec<ArtifactFile>,
    pub created_at: Timestamp,
}

impl Artifact {
    /// Reads `params.version_name`, the one mutable field on an artifact.
    pub fn version_name(&self) -> Option<&str> {
        self.params.get("version_name").and_then(|v| v.as_str())
    }

    /// Collects every `..._artifact_id` reference recorded in `params`,
    /// keyed by the JSON field name that held it.
    pub fn artifact_id_refs(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        collect_artifact_id_refs(&self.params, &mut out);
        out
    }
}

fn collect_artifact_id_refs(value: &serde_json::Value, out: &mut BTreeMap<String, String>) {
    match value {
        serde_json::Value::Object(map) => {
            for (k, v) in map {
                if k.ends_with("_artifact_id") {
                    if let Some(s) = v.as_str() {
                        out.insert(k.clone(), s.to_string());
                    }
                }
                collect_artifact_id_refs(v, out);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                collect_artifact_id_refs(item, out);
            }
        }
        _ => {}
    }
}
