//! Stage 4.5 — auxiliary passthrough between stages 4 and 5: re-emits the
//! Step-5 mask verbatim under its own artifact id, with an optional
//! free-text `note`. Exists so the client can branch a named checkpoint off
//! a manual edit without creating another Step-5 version.

use super::{commit, file_index, load_mask, Execution, OutFile};
use crate::params::S45Params;
use crate::resolver::Lineage;
use crate::{Result, StageId};
use serde_json::json;

pub(crate) fn execute(
    exec: &Execution,
    run_id: &str,
    lineage: &Lineage,
    params: &serde_json::Value,
) -> Result<crate::model::Artifact> {
    let parsed = S45Params::from_json(params)?;

    let input = lineage.resolve_input(StageId::S45, parsed.mask_artifact_id.as_deref())?;
    let idx = file_index(input, "step5_mask_edited.png")?;
    let mask = load_mask(exec, input, idx)?;
    let mask_bytes = exec.codec.encode_mask(&mask)?;

    let params_json = json!({
        "mask_artifact_id": input.id,
        "note": parsed.note,
    });

    commit(
        exec,
        run_id,
        StageId::S45,
        "auxiliary_passthrough",
        params_json,
        vec![OutFile::new("step45_mask.png", mask_bytes, "image/png")],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Artifact, ArtifactFile, ImageRecord, Run};
    use crate::stages::test_support::FakeCodec;
    use crate::store::fs::FsStore;
    use crate::store::{ArtifactStore, ImageRepository, RunRepository};
    use crate::kernels::Mask;
    use tempfile::TempDir;

    #[test]
    fn passes_through_step5_mask_unchanged() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        let codec = FakeCodec;
        let exec = Execution {
            store: &store,
            codec: &codec,
            images: &store,
            runs: &store,
        };

        store
            .insert(ImageRecord {
                id: "img1".into(),
                filename: "x.png".into(),
                content_type: "image/png".into(),
                width: 4,
                height: 4,
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

        let mut mask = Mask::new(4, 4);
        mask.set(1, 1, true);
        let mask_bytes = exec.codec.encode_mask(&mask).unwrap();
        let dir5 = store.artifact_dir(
            "run1",
            StageId::S5,
            1,
            "art-s5",
        );
        let (file_meta, _) = store.write_file(&dir5, "step5_mask_edited.png", &mask_bytes, "image/png").unwrap();
        let s5 = store
            .commit(Artifact {
                id: "art-s5".into(),
                run_id: "run1".into(),
                stage_id: StageId::S5,
                version: 1,
                artifact_type: "manual_edit".into(),
                params: serde_json::json!({}),
                files: vec![file_meta],
                created_at: "2026-01-01T00:00:00Z".into(),
            })
            .unwrap();

        let artifacts = vec![s5];
        let lineage = Lineage::build(&artifacts);
        let out = execute(&exec, "run1", &lineage, &serde_json::json!({"note": "checkpoint a"})).unwrap();
        assert_eq!(out.params["note"], "checkpoint a");
        let idx = file_index(&out, "step45_mask.png").unwrap();
        let loaded = load_mask(&exec, &out, idx).unwrap();
        assert_eq!(loaded, mask);
        let _ : &[ArtifactFile] = &out.files;
    }
}
