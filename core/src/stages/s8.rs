//! Stage 8 — Contour extraction: traces outer polygons from the chosen
//! solid mask (Step 5 or Step 6), then merges in pore contours (kind
//! `pore`) derived from the matching or latest Step-7 artifact's
//! `outer AND NOT solid` region. Has no single prerequisite stage (spec.md
//! §4.3: stage 8 is always runnable); the executor resolves its own inputs.

use super::{commit, file_index, load_mask, ContourRecord, Execution, OutFile};
use crate::kernels::contour::{bbox, signed_area, trace_contours};
use crate::model::{Artifact, StageId};
use crate::params::S8Params;
use crate::resolver::Lineage;
use crate::{ParticleError, Result};
use serde_json::json;

pub(crate) fn execute(
    exec: &Execution,
    run_id: &str,
    lineage: &Lineage,
    params: &serde_json::Value,
) -> Result<Artifact> {
    let parsed = S8Params::from_json(params)?;

    let mask_source = resolve_mask_source(lineage, parsed.mask_artifact_id.as_deref())?;
    let mask_filename = match mask_source.stage_id {
        StageId::S6 => "step6_recovered_mask.png",
        StageId::S5 => "step5_mask_edited.png",
        other => {
            return Err(ParticleError::invalid_input(format!(
                "mask_artifact_id must reference a step 5 or step 6 artifact, got step {other}"
            )))
        }
    };
    let idx = file_index(mask_source, mask_filename)?;
    let solid_mask = load_mask(exec, mask_source, idx)?;

    let pore_source = resolve_pore_source(lineage, parsed.pore_artifact_id.as_deref(), mask_source)?;
    let pore_mask = match pore_source {
        Some(s7) => {
            let solid_idx = file_index(s7, "mask_solid.png")?;
            let outer_idx = file_index(s7, "mask_outer.png")?;
            let solid = load_mask(exec, s7, solid_idx)?;
            let outer = load_mask(exec, s7, outer_idx)?;
            Some(outer.subtract(&solid))
        }
        None => None,
    };

    let mut contours: Vec<ContourRecord> = trace_contours(&solid_mask)
        .into_iter()
        .filter(|loop_pts| signed_area(loop_pts) > 0.0)
        .map(|points| build_record(points, "solid"))
        .collect();

    if let Some(pore_mask) = &pore_mask {
        contours.extend(
            trace_contours(pore_mask)
                .into_iter()
                .filter(|loop_pts| signed_area(loop_pts) > 0.0)
                .map(|points| build_record(points, "pore")),
        );
    }

    contours.sort_by(|a, b| {
        a.bbox[1]
            .cmp(&b.bbox[1])
            .then(a.bbox[0].cmp(&b.bbox[0]))
            .then(kind_rank(&a.kind).cmp(&kind_rank(&b.kind)))
    });
    for (i, contour) in contours.iter_mut().enumerate() {
        contour.id = (i + 1) as u32;
    }

    let contours_bytes = serde_json::to_vec_pretty(&contours)?;

    let params_json = json!({
        "mask_artifact_id": mask_source.id,
        "pore_artifact_id": pore_source.map(|a| a.id.clone()),
        "solid_count": contours.iter().filter(|c| c.kind == "solid").count(),
        "pore_count": contours.iter().filter(|c| c.kind == "pore").count(),
    });

    commit(
        exec,
        run_id,
        StageId::S8,
        "contours",
        params_json,
        vec![OutFile::new(
            "contours.json",
            contours_bytes,
            "application/json",
        )],
    )
}

fn kind_rank(kind: &str) -> u8 {
    if kind == "solid" {
        0
    } else {
        1
    }
}

fn build_record(points: Vec<(i64, i64)>, kind: &str) -> ContourRecord {
    let (min_x, min_y, max_x, max_y) = bbox(&points);
    ContourRecord {
        id: 0,
        bbox: [min_x, min_y, max_x, max_y],
        points,
        kind: kind.to_string(),
    }
}

fn resolve_mask_source<'a>(
    lineage: &Lineage<'a>,
    explicit: Option<&str>,
) -> Result<&'a Artifact> {
    if let Some(id) = explicit {
        return lineage
            .get(id)
            .ok_or_else(|| ParticleError::not_found(format!("artifact {id} not found")));
    }
    if let Some(s6) = lineage.latest(StageId::S6) {
        return Ok(s6);
    }
    if let Some(s5) = lineage.latest(StageId::S5) {
        return Ok(s5);
    }
    Err(ParticleError::prerequisite_unmet(
        "contour extraction requires a step 5 or step 6 artifact",
    ))
}

fn resolve_pore_source<'a>(
    lineage: &Lineage<'a>,
    explicit: Option<&str>,
    mask_source: &Artifact,
) -> Result<Option<&'a Artifact>> {
    if let Some(id) = explicit {
        let artifact = lineage
            .get(id)
            .ok_or_else(|| ParticleError::not_found(format!("artifact {id} not found")))?;
        if artifact.stage_id != StageId::S7 {
            return Err(ParticleError::invalid_input(format!(
                "pore_artifact_id must reference a step 7 artifact, got step {}",
                artifact.stage_id
            )));
        }
        return Ok(Some(artifact));
    }
    let matching = lineage
        .all_of(StageId::S7)
        .iter()
        .rev()
        .find(|a| a.params.get("mask_artifact_id").and_then(|v| v.as_str()) == Some(mask_source.id.as_str()))
        .copied();
    Ok(matching.or_else(|| lineage.latest(StageId::S7)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::Mask;
    use crate::model::{ArtifactFile, ImageRecord, Run};
    use crate::stages::test_support::FakeCodec;
    use crate::store::fs::FsStore;
    use crate::store::{ArtifactStore, ImageRepository, RunRepository};
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (FsStore, FakeCodec) {
        let store = FsStore::open(dir.path()).unwrap();
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
        (store, FakeCodec)
    }

    fn commit_mask(store: &FsStore, codec: &FakeCodec, stage: StageId, id: &str, filename: &str, mask: &Mask, params: serde_json::Value) -> Artifact {
        let bytes = codec.encode_mask(mask).unwrap();
        let dir = store.artifact_dir("run1", stage, 1, id);
        let (meta, _) = store.write_file(&dir, filename, &bytes, "image/png").unwrap();
        store
            .commit(Artifact {
                id: id.into(),
                run_id: "run1".into(),
                stage_id: stage,
                version: 1,
                artifact_type: "mask".into(),
                params,
                files: vec![meta],
                created_at: "2026-01-01T00:00:00Z".into(),
            })
            .unwrap()
    }

    #[test]
    fn traces_solid_contour_from_step6_mask() {
        let dir = TempDir::new().unwrap();
        let (store, codec) = setup(&dir);
        let exec = Execution {
            store: &store,
            codec: &codec,
            images: &store,
            runs: &store,
        };

        let mut mask = Mask::new(10, 10);
        for y in 2..7 {
            for x in 2..7 {
                mask.set(x, y, true);
            }
        }
        let s6 = commit_mask(&store, &codec, StageId::S6, "art-s6", "step6_recovered_mask.png", &mask, json!({}));

        let artifacts = vec![s6];
        let lineage = Lineage::build(&artifacts);
        let out = execute(&exec, "run1", &lineage, &json!({})).unwrap();
        assert_eq!(out.params["solid_count"], 1);
        assert_eq!(out.params["pore_count"], 0);

        let idx = file_index(&out, "contours.json").unwrap();
        let (bytes, _) = exec.store.get_file(&out, idx).unwrap();
        let contours: Vec<ContourRecord> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(contours.len(), 1);
        assert_eq!(contours[0].id, 1);
        assert_eq!(contours[0].kind, "solid");
    }

    #[test]
    fn merges_pore_contours_from_matching_step7() {
        let dir = TempDir::new().unwrap();
        let (store, codec) = setup(&dir);
        let exec = Execution {
            store: &store,
            codec: &codec,
            images: &store,
            runs: &store,
        };

        let mut solid = Mask::new(10, 10);
        for y in 1..9 {
            for x in 1..9 {
                solid.set(x, y, true);
            }
        }
        let mut outer = solid.clone();
        for y in 4..6 {
            for x in 4..6 {
                outer.set(x, y, true);
            }
        }
        // Solid has a 2x2 hole that `outer` fills in.
        let mut solid_with_hole = outer.clone();
        for y in 4..6 {
            for x in 4..6 {
                solid_with_hole.set(x, y, false);
            }
        }

        let s6 = commit_mask(&store, &codec, StageId::S6, "art-s6", "step6_recovered_mask.png", &solid_with_hole, json!({}));

        let dir7 = store.artifact_dir("run1", StageId::S7, 1, "art-s7");
        let solid_bytes = codec.encode_mask(&solid_with_hole).unwrap();
        let outer_bytes = codec.encode_mask(&outer).unwrap();
        let (solid_meta, _) = store.write_file(&dir7, "mask_solid.png", &solid_bytes, "image/png").unwrap();
        let (outer_meta, _) = store.write_file(&dir7, "mask_outer.png", &outer_bytes, "image/png").unwrap();
        let s7 = store
            .commit(Artifact {
                id: "art-s7".into(),
                run_id: "run1".into(),
                stage_id: StageId::S7,
                version: 1,
                artifact_type: "hole_closing".into(),
                params: json!({"mask_artifact_id": "art-s6"}),
                files: vec![solid_meta, outer_meta],
                created_at: "2026-01-01T00:00:00Z".into(),
            })
            .unwrap();

        let artifacts = vec![s6, s7];
        let lineage = Lineage::build(&artifacts);
        let out = execute(&exec, "run1", &lineage, &json!({})).unwrap();
        assert_eq!(out.params["pore_count"], 1);
        let _: &[ArtifactFile] = &out.files;
    }
}
