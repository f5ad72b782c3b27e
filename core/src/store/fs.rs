//! Filesystem-backed `ArtifactStore`/`ImageRepository`/`RunRepository`,
//! standing in for the SQL collaborator spec.md §1 declares external. State
//! lives in a single JSON ledger file (`<storage_root>/ledger.json`),
//! written atomically (temp file + fsync + rename) with one rotated backup,
//! generalizing the teacher's `write_sidecar`/`rotate_backups` pattern
//! (`core/src/scan.rs`) from per-image sidecars to one run-wide ledger.
//! Artifact files are content, not metadata, and are written the same way.

use super::{
    resolve_under_root, ArtifactStore, ExportDocument, ExportedArtifact, ExportedFile,
    ImageRepository, RunRepository, EXPORT_STAGES,
};
use crate::model::{Artifact, ArtifactFile, ImageRecord, Run, StageId};
use crate::{now_rfc3339, ParticleError, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

const BASE64: base64::engine::general_purpose::GeneralPurpose =
    base64::engine::general_purpose::STANDARD;

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generates a short, practically-unique id by hashing a monotonic counter
/// together with the current instant. Not cryptographically meaningful —
/// just collision-resistant enough for artifact/image/run ids in a
/// single-process demo store.
fn new_id(prefix: &str) -> String {
    let n = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    let mut hasher = blake3::Hasher::new();
    hasher.update(&n.to_le_bytes());
    hasher.update(&nanos.to_le_bytes());
    let hex = hasher.finalize().to_hex();
    format!("{prefix}-{}", &hex.as_str()[..16])
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct Ledger {
    images: Vec<ImageRecord>,
    runs: Vec<Run>,
    artifacts: Vec<Artifact>,
}

pub struct FsStore {
    storage_root: PathBuf,
    ledger: Mutex<Ledger>,
}

impl FsStore {
    /// Opens (or initializes) a store rooted at `storage_root`, creating the
    /// directory and an empty ledger if neither exists yet.
    pub fn open(storage_root: impl Into<PathBuf>) -> Result<Self> {
        let storage_root = storage_root.into();
        fs::create_dir_all(&storage_root)?;
        let ledger_path = storage_root.join("ledger.json");
        let ledger = if ledger_path.exists() {
            let bytes = fs::read(&ledger_path)?;
            serde_json::from_slice(&bytes)?
        } else {
            Ledger::default()
        };
        Ok(Self {
            storage_root,
            ledger: Mutex::new(ledger),
        })
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    fn ledger_path(&self) -> PathBuf {
        self.storage_root.join("ledger.json")
    }

    /// Atomically persists the ledger: write to `.tmp`, fsync, rename over
    /// the previous file after rotating it to `.bak`.
    fn persist(&self, ledger: &Ledger) -> Result<()> {
        let path = self.ledger_path();
        let tmp_path = path.with_extension("json.tmp");
        let bak_path = path.with_extension("json.bak");

        let json = serde_json::to_string_pretty(ledger)?;
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        if path.exists() {
            let _ = fs::rename(&path, &bak_path);
        }
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// Deletes the image/run/artifact cascade rooted at `image_id`: every
    /// run over the image, every artifact in those runs, and the on-disk
    /// directories, per the data-model cascade invariant (spec.md §3).
    pub fn delete_image_cascade(&self, image_id: &str) -> Result<()> {
        let mut ledger = self.ledger.lock().unwrap();
        let run_ids: Vec<String> = ledger
            .runs
            .iter()
            .filter(|r| r.image_id == image_id)
            .map(|r| r.id.clone())
            .collect();

        for run_id in &run_ids {
            let run_dir = self.storage_root.join(run_id);
            if run_dir.exists() {
                fs::remove_dir_all(&run_dir)?;
            }
            ledger.artifacts.retain(|a| &a.run_id != run_id);
        }
        ledger.runs.retain(|r| r.image_id != image_id);

        let image = ledger.images.iter().find(|i| i.id == image_id).cloned();
        if let Some(image) = image {
            let image_dir = self.storage_root.join(image_id);
            if image_dir.exists() {
                let _ = fs::remove_dir_all(&image_dir);
            }
            let _ = image; // storage_path lived under image_dir, already removed
        }
        ledger.images.retain(|i| i.id != image_id);

        self.persist(&ledger)
    }

    fn write_atomic(&self, abs_path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = abs_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = abs_path.with_extension("tmp_write");
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, abs_path)?;
        Ok(())
    }
}

impl ArtifactStore for FsStore {
    fn allocate_id(&self, prefix: &str) -> String {
        new_id(prefix)
    }

    fn remove_dir(&self, dir: &Path) -> Result<()> {
        let abs_dir = self.storage_root.join(dir);
        if abs_dir.exists() {
            fs::remove_dir_all(&abs_dir)?;
        }
        Ok(())
    }

    fn next_version(&self, run_id: &str, stage: StageId) -> Result<u32> {
        let ledger = self.ledger.lock().unwrap();
        let max = ledger
            .artifacts
            .iter()
            .filter(|a| a.run_id == run_id && a.stage_id == stage)
            .map(|a| a.version)
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    fn artifact_dir(
        &self,
        run_id: &str,
        stage: StageId,
        version: u32,
        artifact_id: &str,
    ) -> PathBuf {
        if stage.uses_version_directory() {
            PathBuf::from(run_id)
                .join(format!("step_{}", stage.value()))
                .join(format!("v{version}"))
        } else {
            PathBuf::from(run_id)
                .join(format!("step{}", stage.value()))
                .join(artifact_id)
        }
    }

    fn write_file(
        &self,
        dir: &Path,
        filename: &str,
        bytes: &[u8],
        mime: &str,
    ) -> Result<(ArtifactFile, PathBuf)> {
        let abs_dir = resolve_under_root_for_write(&self.storage_root, dir)?;
        let abs_path = abs_dir.join(filename);
        self.write_atomic(&abs_path, bytes)?;
        let relative_path = dir.join(filename).to_string_lossy().replace('\\', "/");
        Ok((
            ArtifactFile {
                filename: filename.to_string(),
                mime_type: mime.to_string(),
                path: relative_path,
            },
            abs_path,
        ))
    }

    fn commit(&self, artifact: Artifact) -> Result<Artifact> {
        let mut ledger = self.ledger.lock().unwrap();
        ledger.artifacts.push(artifact.clone());
        self.persist(&ledger)?;
        Ok(artifact)
    }

    fn get(&self, artifact_id: &str) -> Result<Artifact> {
        let ledger = self.ledger.lock().unwrap();
        ledger
            .artifacts
            .iter()
            .find(|a| a.id == artifact_id)
            .cloned()
            .ok_or_else(|| ParticleError::not_found(format!("artifact {artifact_id} not found")))
    }

    fn list_for_run(&self, run_id: &str) -> Result<Vec<Artifact>> {
        let ledger = self.ledger.lock().unwrap();
        Ok(ledger
            .artifacts
            .iter()
            .filter(|a| a.run_id == run_id)
            .cloned()
            .collect())
    }

    fn list_grouped(&self, run_id: &str) -> Result<Vec<(StageId, Vec<Artifact>)>> {
        let ledger = self.ledger.lock().unwrap();
        let mut grouped: BTreeMap<StageId, Vec<Artifact>> = BTreeMap::new();
        for artifact in ledger.artifacts.iter().filter(|a| a.run_id == run_id) {
            grouped.entry(artifact.stage_id).or_default().push(artifact.clone());
        }
        for versions in grouped.values_mut() {
            versions.sort_by(|a, b| {
                b.version
                    .cmp(&a.version)
                    .then_with(|| b.created_at.cmp(&a.created_at))
            });
        }
        Ok(grouped.into_iter().collect())
    }

    fn get_file(&self, artifact: &Artifact, index: usize) -> Result<(Vec<u8>, ArtifactFile)> {
        let file = artifact
            .files
            .get(index)
            .cloned()
            .ok_or_else(|| ParticleError::not_found(format!("file index {index} out of range")))?;
        let abs_path = resolve_under_root(&self.storage_root, Path::new(&file.path))?;
        if !abs_path.exists() {
            return Err(ParticleError::not_found(format!(
                "file {} missing on disk",
                file.filename
            )));
        }
        let bytes = fs::read(&abs_path)?;
        Ok((bytes, file))
    }

    fn rename_version(&self, artifact_id: &str, new_name: &str) -> Result<()> {
        let mut ledger = self.ledger.lock().unwrap();
        let target = ledger
            .artifacts
            .iter()
            .find(|a| a.id == artifact_id)
            .cloned()
            .ok_or_else(|| ParticleError::not_found(format!("artifact {artifact_id} not found")))?;

        for artifact in ledger.artifacts.iter_mut().filter(|a| {
            a.run_id == target.run_id && a.stage_id == target.stage_id && a.version == target.version
        }) {
            if let serde_json::Value::Object(map) = &mut artifact.params {
                map.insert(
                    "version_name".to_string(),
                    serde_json::Value::String(new_name.to_string()),
                );
            } else {
                artifact.params = serde_json::json!({ "version_name": new_name });
            }
        }
        self.persist(&ledger)
    }

    fn delete_version(&self, artifact_id: &str) -> Result<()> {
        let mut ledger = self.ledger.lock().unwrap();
        let target = ledger
            .artifacts
            .iter()
            .find(|a| a.id == artifact_id)
            .cloned()
            .ok_or_else(|| ParticleError::not_found(format!("artifact {artifact_id} not found")))?;

        let siblings: Vec<Artifact> = ledger
            .artifacts
            .iter()
            .filter(|a| {
                a.run_id == target.run_id
                    && a.stage_id == target.stage_id
                    && a.version == target.version
            })
            .cloned()
            .collect();

        for sibling in &siblings {
            let dir = self.artifact_dir(
                &sibling.run_id,
                sibling.stage_id,
                sibling.version,
                &sibling.id,
            );
            let abs_dir = self.storage_root.join(&dir);
            if abs_dir.exists() {
                fs::remove_dir_all(&abs_dir)?;
            }
        }

        ledger.artifacts.retain(|a| {
            !(a.run_id == target.run_id
                && a.stage_id == target.stage_id
                && a.version == target.version)
        });
        self.persist(&ledger)
    }

    fn delete_run_artifacts(&self, run_id: &str) -> Result<()> {
        let mut ledger = self.ledger.lock().unwrap();
        let run_dir = self.storage_root.join(run_id);
        if run_dir.exists() {
            fs::remove_dir_all(&run_dir)?;
        }
        ledger.artifacts.retain(|a| a.run_id != run_id);
        self.persist(&ledger)
    }

    fn export_history(&self, run_id: &str) -> Result<ExportDocument> {
        let ledger = self.ledger.lock().unwrap();
        let run = ledger
            .runs
            .iter()
            .find(|r| r.id == run_id)
            .cloned()
            .ok_or_else(|| ParticleError::not_found(format!("run {run_id} not found")))?;

        let mut artifacts: Vec<Artifact> = ledger
            .artifacts
            .iter()
            .filter(|a| a.run_id == run_id && EXPORT_STAGES.contains(&a.stage_id.value()))
            .cloned()
            .collect();
        artifacts.sort_by_key(|a| (a.stage_id.value(), a.version));
        drop(ledger);

        let mut exported = Vec::with_capacity(artifacts.len());
        for artifact in &artifacts {
            let mut files = Vec::with_capacity(artifact.files.len());
            for file in &artifact.files {
                let abs_path = match resolve_under_root(&self.storage_root, Path::new(&file.path)) {
                    Ok(p) => p,
                    Err(_) => {
                        tracing::warn!(artifact = %artifact.id, file = %file.filename, "skipping unresolvable file on export");
                        continue;
                    }
                };
                match fs::read(&abs_path) {
                    Ok(bytes) => files.push(ExportedFile {
                        filename: file.filename.clone(),
                        mime_type: file.mime_type.clone(),
                        data_base64: BASE64.encode(bytes),
                    }),
                    Err(_) => {
                        tracing::warn!(artifact = %artifact.id, file = %file.filename, "file missing on disk, skipped in export");
                    }
                }
            }
            exported.push(ExportedArtifact {
                source_artifact_id: artifact.id.clone(),
                step_id: artifact.stage_id.value(),
                version: artifact.version,
                artifact_type: artifact.artifact_type.clone(),
                params: artifact.params.clone(),
                created_at: artifact.created_at.clone(),
                files,
            });
        }

        Ok(ExportDocument {
            schema_version: 1,
            export_steps: EXPORT_STAGES.to_vec(),
            run_id: run.id,
            image_id: run.image_id,
            exported_at: now_rfc3339()?,
            artifacts: exported,
        })
    }

    fn import_history(&self, run_id: &str, doc: &ExportDocument) -> Result<usize> {
        if doc.schema_version != 1 {
            return Err(ParticleError::invalid_input(format!(
                "unsupported schema_version {}",
                doc.schema_version
            )));
        }

        // Validate every item up front (base64 decode + stage id) so a
        // malformed item fails the whole import before anything is written.
        // (filename, mime_type, decoded bytes) — path is only known once written.
        let mut decoded: Vec<Vec<(String, String, Vec<u8>)>> = Vec::with_capacity(doc.artifacts.len());
        for item in &doc.artifacts {
            StageId::new(item.step_id)?;
            let mut files = Vec::with_capacity(item.files.len());
            for file in &item.files {
                let bytes = BASE64.decode(&file.data_base64)?;
                files.push((file.filename.clone(), file.mime_type.clone(), bytes));
            }
            decoded.push(files);
        }

        // First pass: allocate fresh ids for every item so the remap table
        // is complete before any params are rewritten.
        let id_map: BTreeMap<String, String> = doc
            .artifacts
            .iter()
            .map(|item| (item.source_artifact_id.clone(), new_id("art")))
            .collect();

        let mut written_dirs: Vec<PathBuf> = Vec::new();
        let mut new_artifacts = Vec::with_capacity(doc.artifacts.len());

        for (item, files) in doc.artifacts.iter().zip(decoded.iter()) {
            let stage = StageId::new(item.step_id)?;
            let new_artifact_id = id_map.get(&item.source_artifact_id).unwrap().clone();
            let version = self.next_version(run_id, stage)?;

            let mut params = item.params.clone();
            remap_artifact_id_refs(&mut params, &id_map);

            let dir = PathBuf::from(run_id)
                .join("history_import")
                .join(format!("step_{}", stage.value()))
                .join(format!("v{version}"))
                .join(&new_artifact_id);

            let write_result: Result<Vec<ArtifactFile>> = (|| {
                let abs_dir = resolve_under_root_for_write(&self.storage_root, &dir)?;
                let mut written = Vec::with_capacity(files.len());
                for (filename, mime_type, bytes) in files {
                    let basename = Path::new(filename)
                        .file_name()
                        .ok_or_else(|| ParticleError::invalid_input("empty filename in import"))?
                        .to_string_lossy()
                        .to_string();
                    let abs_path = abs_dir.join(&basename);
                    self.write_atomic(&abs_path, bytes)?;
                    let relative_path = dir.join(&basename).to_string_lossy().replace('\\', "/");
                    written.push(ArtifactFile {
                        filename: basename,
                        mime_type: mime_type.clone(),
                        path: relative_path,
                    });
                }
                Ok(written)
            })();

            let files = match write_result {
                Ok(f) => f,
                Err(e) => {
                    for d in &written_dirs {
                        let _ = fs::remove_dir_all(d);
                    }
                    let abs_dir = self.storage_root.join(&dir);
                    let _ = fs::remove_dir_all(&abs_dir);
                    return Err(e);
                }
            };
            written_dirs.push(self.storage_root.join(&dir));

            new_artifacts.push(Artifact {
                id: new_artifact_id,
                run_id: run_id.to_string(),
                stage_id: stage,
                version,
                artifact_type: item.artifact_type.clone(),
                params,
                files,
                created_at: now_rfc3339()?,
            });
        }

        let count = new_artifacts.len();
        let mut ledger = self.ledger.lock().unwrap();
        ledger.artifacts.extend(new_artifacts);
        self.persist(&ledger)?;
        Ok(count)
    }
}

/// Like [`resolve_under_root`] but for a directory that may not yet exist;
/// creates it (and ancestors) first so canonicalization always succeeds.
fn resolve_under_root_for_write(root: &Path, relative: &Path) -> Result<PathBuf> {
    let abs = root.join(relative);
    fs::create_dir_all(&abs)?;
    resolve_under_root(root, relative)
}

/// Walks a JSON value tree, replacing any string whose immediate parent key
/// ends with `_artifact_id` per the remap table. No other heuristic is
/// applied (spec.md §9 REDESIGN FLAGS "History import remap").
fn remap_artifact_id_refs(value: &mut serde_json::Value, id_map: &BTreeMap<String, String>) {
    match value {
        serde_json::Value::Object(map) => {
            for (k, v) in map.iter_mut() {
                if k.ends_with("_artifact_id") {
                    if let serde_json::Value::String(s) = v {
                        if let Some(new_id) = id_map.get(s) {
                            *s = new_id.clone();
                        }
                    }
                }
                remap_artifact_id_refs(v, id_map);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                remap_artifact_id_refs(item, id_map);
            }
        }
        _ => {}
    }
}

impl ImageRepository for FsStore {
    fn insert(&self, image: ImageRecord) -> Result<()> {
        let mut ledger = self.ledger.lock().unwrap();
        ledger.images.push(image);
        self.persist(&ledger)
    }

    fn get(&self, id: &str) -> Result<ImageRecord> {
        let ledger = self.ledger.lock().unwrap();
        ledger
            .images
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or_else(|| ParticleError::not_found(format!("image {id} not found")))
    }

    fn list(&self) -> Result<Vec<ImageRecord>> {
        let ledger = self.ledger.lock().unwrap();
        Ok(ledger.images.clone())
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.delete_image_cascade(id)
    }

    fn read_original(&self, image: &ImageRecord) -> Result<Vec<u8>> {
        let abs_path = resolve_under_root(&self.storage_root, Path::new(&image.storage_path))?;
        Ok(fs::read(abs_path)?)
    }

    fn write_original(&self, image_id: &str, filename: &str, bytes: &[u8]) -> Result<String> {
        let relative = PathBuf::from(image_id).join("original").join(filename);
        let abs_path = resolve_under_root_for_write(
            &self.storage_root,
            relative.parent().unwrap(),
        )?
        .join(filename);
        self.write_atomic(&abs_path, bytes)?;
        Ok(relative.to_string_lossy().replace('\\', "/"))
    }
}

impl RunRepository for FsStore {
    fn insert(&self, run: Run) -> Result<()> {
        let mut ledger = self.ledger.lock().unwrap();
        ledger.runs.push(run);
        self.persist(&ledger)
    }

    fn get(&self, id: &str) -> Result<Run> {
        let ledger = self.ledger.lock().unwrap();
        ledger
            .runs
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| ParticleError::not_found(format!("run {id} not found")))
    }

    fn list_by_image(&self, image_id: &str) -> Result<Vec<Run>> {
        let ledger = self.ledger.lock().unwrap();
        Ok(ledger
            .runs
            .iter()
            .filter(|r| r.image_id == image_id)
            .cloned()
            .collect())
    }

    fn delete(&self, id: &str) -> Result<()> {
        let mut ledger = self.ledger.lock().unwrap();
        let run_dir = self.storage_root.join(id);
        if run_dir.exists() {
            fs::remove_dir_all(&run_dir)?;
        }
        ledger.artifacts.retain(|a| a.run_id != id);
        ledger.runs.retain(|r| r.id != id);
        self.persist(&ledger)
    }
}

/// Allocates a fresh id with the given prefix. Exposed for callers (stage
/// executors, CLI) that need to mint image/run/artifact ids outside the
/// store's own insert paths.
pub fn generate_id(prefix: &str) -> String {
    new_id(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StageId;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, FsStore) {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn next_version_starts_at_one_and_increments() {
        let (_dir, store) = open_store();
        assert_eq!(store.next_version("run1", StageId::S1).unwrap(), 1);
        let artifact = Artifact {
            id: "a1".into(),
            run_id: "run1".into(),
            stage_id: StageId::S1,
            version: 1,
            artifact_type: "calibration".into(),
            params: serde_json::json!({}),
            files: vec![],
            created_at: "2026-01-01T00:00:00Z".into(),
        };
        store.commit(artifact).unwrap();
        assert_eq!(store.next_version("run1", StageId::S1).unwrap(), 2);
    }

    #[test]
    fn write_file_rejects_path_traversal() {
        let (_dir, store) = open_store();
        let dir = store.artifact_dir("run1", StageId::S4, 1, "a1");
        let result = store.write_file(
            Path::new("run1/../../etc"),
            "passwd",
            b"x",
            "text/plain",
        );
        assert!(result.is_err());
        let _ = dir;
    }

    #[test]
    fn write_and_read_file_round_trips() {
        let (_dir, store) = open_store();
        let dir = store.artifact_dir("run1", StageId::S4, 1, "a1");
        let (file_meta, _path) = store
            .write_file(&dir, "mask.png", b"pngbytes", "image/png")
            .unwrap();
        let artifact = Artifact {
            id: "a1".into(),
            run_id: "run1".into(),
            stage_id: StageId::S4,
            version: 1,
            artifact_type: "mask".into(),
            params: serde_json::json!({}),
            files: vec![file_meta],
            created_at: "2026-01-01T00:00:00Z".into(),
        };
        let artifact = store.commit(artifact).unwrap();
        let (bytes, meta) = store.get_file(&artifact, 0).unwrap();
        assert_eq!(bytes, b"pngbytes");
        assert_eq!(meta.filename, "mask.png");
    }

    #[test]
    fn rename_version_touches_only_shared_triple() {
        let (_dir, store) = open_store();
        for (id, version) in [("a1", 1), ("a2", 2)] {
            store
                .commit(Artifact {
                    id: id.into(),
                    run_id: "run1".into(),
                    stage_id: StageId::S4,
                    version,
                    artifact_type: "mask".into(),
                    params: serde_json::json!({}),
                    files: vec![],
                    created_at: "2026-01-01T00:00:00Z".into(),
                })
                .unwrap();
        }
        store.rename_version("a1", "my version").unwrap();
        let a1 = store.get("a1").unwrap();
        let a2 = store.get("a2").unwrap();
        assert_eq!(a1.version_name(), Some("my version"));
        assert_eq!(a2.version_name(), None);
    }

    #[test]
    fn delete_version_removes_only_matching_triple() {
        let (_dir, store) = open_store();
        for (id, version) in [("a1", 1), ("a2", 2)] {
            let dir = store.artifact_dir("run1", StageId::S4, version, id);
            let (f, _) = store.write_file(&dir, "mask.png", b"x", "image/png").unwrap();
            store
                .commit(Artifact {
                    id: id.into(),
                    run_id: "run1".into(),
                    stage_id: StageId::S4,
                    version,
                    artifact_type: "mask".into(),
                    params: serde_json::json!({}),
                    files: vec![f],
                    created_at: "2026-01-01T00:00:00Z".into(),
                })
                .unwrap();
        }
        store.delete_version("a1").unwrap();
        assert!(store.get("a1").is_err());
        assert!(store.get("a2").is_ok());
    }

    #[test]
    fn export_then_import_round_trips_artifact_count() {
        let (_dir, store) = open_store();
        store
            .insert(ImageRecord {
                id: "img1".into(),
                filename: "x.png".into(),
                content_type: "image/png".into(),
                width: 10,
                height: 10,
                storage_path: "img1/original/x.png".into(),
                created_at: "2026-01-01T00:00:00Z".into(),
            })
            .unwrap();
        RunRepository::insert(
            &store,
            Run {
                id: "run1".into(),
                image_id: "img1".into(),
                name: None,
                created_at: "2026-01-01T00:00:00Z".into(),
            },
        )
        .unwrap();

        let dir = store.artifact_dir("run1", StageId::S4, 1, "a1");
        let (f, _) = store.write_file(&dir, "mask.png", b"maskbytes", "image/png").unwrap();
        store
            .commit(Artifact {
                id: "a1".into(),
                run_id: "run1".into(),
                stage_id: StageId::S4,
                version: 1,
                artifact_type: "mask".into(),
                params: serde_json::json!({"seed_sensitivity": 50}),
                files: vec![f],
                created_at: "2026-01-01T00:00:00Z".into(),
            })
            .unwrap();

        let doc = store.export_history("run1").unwrap();
        assert_eq!(doc.artifacts.len(), 1);

        RunRepository::insert(
            &store,
            Run {
                id: "run2".into(),
                image_id: "img1".into(),
                name: None,
                created_at: "2026-01-01T00:00:00Z".into(),
            },
        )
        .unwrap();
        let imported = store.import_history("run2", &doc).unwrap();
        assert_eq!(imported, 1);

        let run2_artifacts = store.list_for_run("run2").unwrap();
        assert_eq!(run2_artifacts.len(), 1);
        let (bytes, _) = store.get_file(&run2_artifacts[0], 0).unwrap();
        assert_eq!(bytes, b"maskbytes");
    }

    #[test]
    fn import_remaps_artifact_id_references() {
        let (_dir, store) = open_store();
        RunRepository::insert(
            &store,
            Run {
                id: "run1".into(),
                image_id: "img1".into(),
                name: None,
                created_at: "2026-01-01T00:00:00Z".into(),
            },
        )
        .unwrap();

        let doc = ExportDocument {
            schema_version: 1,
            export_steps: EXPORT_STAGES.to_vec(),
            run_id: "run1".into(),
            image_id: "img1".into(),
            exported_at: "2026-01-01T00:00:00Z".into(),
            artifacts: vec![
                ExportedArtifact {
                    source_artifact_id: "orig-a4".into(),
                    step_id: 4,
                    version: 1,
                    artifact_type: "mask".into(),
                    params: serde_json::json!({}),
                    created_at: "2026-01-01T00:00:00Z".into(),
                    files: vec![],
                },
                ExportedArtifact {
                    source_artifact_id: "orig-a5".into(),
                    step_id: 5,
                    version: 1,
                    artifact_type: "mask".into(),
                    params: serde_json::json!({"base_mask_artifact_id": "orig-a4"}),
                    created_at: "2026-01-01T00:00:00Z".into(),
                    files: vec![],
                },
            ],
        };

        RunRepository::insert(
            &store,
            Run {
                id: "run2".into(),
                image_id: "img1".into(),
                name: None,
                created_at: "2026-01-01T00:00:00Z".into(),
            },
        )
        .unwrap();
        store.import_history("run2", &doc).unwrap();

        let artifacts = store.list_for_run("run2").unwrap();
        let s4 = artifacts.iter().find(|a| a.stage_id == StageId::S4).unwrap();
        let s5 = artifacts.iter().find(|a| a.stage_id == StageId::S5).unwrap();
        let referenced = s5.params.get("base_mask_artifact_id").unwrap().as_str().unwrap();
        assert_eq!(referenced, s4.id);
        assert_ne!(referenced, "orig-a4");
    }

    #[test]
    fn delete_image_cascades_to_runs_and_artifacts() {
        let (_dir, store) = open_store();
        store
            .insert(ImageRecord {
                id: "img1".into(),
                filename: "x.png".into(),
                content_type: "image/png".into(),
                width: 10,
                height: 10,
                storage_path: "img1/original/x.png".into(),
                created_at: "2026-01-01T00:00:00Z".into(),
            })
            .unwrap();
        RunRepository::insert(
            &store,
            Run {
                id: "run1".into(),
                image_id: "img1".into(),
                name: None,
                created_at: "2026-01-01T00:00:00Z".into(),
            },
        )
        .unwrap();
        store
            .commit(Artifact {
                id: "a1".into(),
                run_id: "run1".into(),
                stage_id: StageId::S1,
                version: 1,
                artifact_type: "calibration".into(),
                params: serde_json::json!({}),
                files: vec![],
                created_at: "2026-01-01T00:00:00Z".into(),
            })
            .unwrap();

        ImageRepository::delete(&store, "img1").unwrap();
        assert!(ImageRepository::get(&store, "img1").is_err());
        assert!(RunRepository::get(&store, "run1").is_err());
        assert!(store.get("a1").is_err());
    }
}
