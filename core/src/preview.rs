//! Preview renderers (C5): side-effect-free dry-run variants of the
//! executors for stages 3, 4, 6, 7, 9, 10 (the stages whose params are rich
//! enough to warrant a cheap look-before-you-commit render). Each function
//! here resolves the same inputs a call to `stages::execute` would and
//! calls the exact same `compute()` the executor calls, so a preview at
//! full resolution is byte-identical to the artifact `execute()` would
//! commit. Nothing in this module touches the artifact store or allocates
//! a version; a preview is thrown away the moment the response is sent.
//!
//! Stage 3's `quality_mode` doubles as a preview-size budget
//! ([`crate::params::QualityMode::preview_max_edge`]): the source is
//! downscaled to that edge length before the algorithm runs and the result
//! upscaled back, trading per-pixel fidelity for interactive latency on
//! large images. The other previewed stages run at full resolution, since
//! their cost is dominated by mask-sized work rather than per-pixel
//! filtering.

use crate::kernels::{upscale_to, GrayImage, Mask};
use crate::params::{PreviewLayer, S10Params, S3Params, S4Params, S6Params, S7Params, S9Params};
use crate::resolver::Lineage;
use crate::stages::{self, file_index, load_gray, load_json, load_mask, ContourRecord, Execution, PolygonRecord};
use crate::{Result, StageId};
use serde_json::json;

/// A preview call's result: the bytes a caller would show (PNG image or, for
/// S9's `Secondary` layer, the polygon JSON itself) plus the params fragment
/// the matching `execute()` call would have recorded.
pub struct PreviewOutput {
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
    pub params: serde_json::Value,
}

/// Reads the optional `layer` field off a preview request, defaulting to
/// [`PreviewLayer::Primary`].
fn layer_of(params: &serde_json::Value) -> Result<PreviewLayer> {
    match params.get("layer") {
        Some(v) => Ok(serde_json::from_value(v.clone())?),
        None => Ok(PreviewLayer::default()),
    }
}

/// Resizes `mask` to `(width, height)` (nearest-neighbor), re-binarizing at
/// the canonical `>= 128` threshold after the resize.
fn resize_mask(mask: &Mask, width: usize, height: usize) -> Mask {
    let gray = GrayImage {
        width: mask.width,
        height: mask.height,
        data: mask.to_gray_bytes(),
    };
    Mask::from_gray_threshold(&upscale_to(&gray, width, height))
}

/// Step 3 preview — denoise. `layer = primary` returns the denoised image,
/// `secondary` returns the exclude mask actually applied.
pub fn preview_s3(exec: &Execution, lineage: &Lineage, params: &serde_json::Value) -> Result<PreviewOutput> {
    let raw = S3Params::from_json(params)?;
    raw.validate_exclude_roi()?;
    let normalized = raw.normalize()?;
    let layer = layer_of(params)?;

    let explicit = params.get("input_artifact_id").and_then(|v| v.as_str());
    let input = lineage.resolve_input(StageId::S3, explicit)?;
    let idx = file_index(input, "step2_preview.png")?;
    let source = load_gray(exec, input, idx)?;

    let exclude_mask = match &raw.exclude_mask_base64 {
        Some(b64) => {
            use base64::Engine;
            let bytes = base64::engine::general_purpose::STANDARD.decode(b64)?;
            Some(exec.codec.decode_mask(&bytes)?)
        }
        None => None,
    };

    let max_edge = normalized.quality_mode.preview_max_edge();
    let (scaled_source, scale) = crate::kernels::downscale_longest_edge(&source, max_edge);
    let scaled_exclude =
        exclude_mask.map(|m| resize_mask(&m, scaled_source.width, scaled_source.height));

    let result = stages::s3::compute(&scaled_source, &normalized, scaled_exclude)?;

    let (final_image, exclude_out) = if scale < 1.0 {
        (
            upscale_to(&result.final_image, source.width, source.height),
            resize_mask(&result.exclude_mask, source.width, source.height),
        )
    } else {
        (result.final_image, result.exclude_mask)
    };

    let (bytes, content_type) = match layer {
        PreviewLayer::Primary => (exec.codec.encode_gray(&final_image)?, "image/png"),
        PreviewLayer::Secondary => (exec.codec.encode_mask(&exclude_out)?, "image/png"),
    };

    Ok(PreviewOutput {
        content_type,
        bytes,
        params: json!({
            "input_artifact_id": input.id,
            "preview_scale": scale,
            "qc": result.qc_json,
        }),
    })
}

/// Step 4 preview — binarization.
pub fn preview_s4(exec: &Execution, lineage: &Lineage, params: &serde_json::Value) -> Result<PreviewOutput> {
    let raw = S4Params::from_json(params)?;
    let normalized = raw.normalize()?;

    let input = lineage.resolve_input(StageId::S4, raw.denoise_artifact_id.as_deref())?;
    let idx = file_index(input, "step3_denoised.png")?;
    let source = load_gray(exec, input, idx)?;
    let um_per_px = lineage.calibration_um_per_px()?;

    let exclude_mask = match input.files.iter().position(|f| f.filename == "step3_exclude_mask.png") {
        Some(exclude_idx) => Some(load_mask(exec, input, exclude_idx)?),
        None => None,
    };

    let result = stages::s4::compute(&source, &normalized, um_per_px, exclude_mask.as_ref());
    let bytes = exec.codec.encode_mask(&result.mask)?;

    Ok(PreviewOutput {
        content_type: "image/png",
        bytes,
        params: json!({"input_artifact_id": input.id, "qc": result.qc_json}),
    })
}

/// Step 6 preview — morphological recovery.
pub fn preview_s6(exec: &Execution, lineage: &Lineage, params: &serde_json::Value) -> Result<PreviewOutput> {
    let raw = S6Params::from_json(params)?;
    let normalized = raw.normalize();

    let input = lineage.resolve_input(StageId::S6, raw.mask_artifact_id.as_deref())?;
    let idx = file_index(input, "step5_mask_edited.png")?;
    let mask = load_mask(exec, input, idx)?;

    let s4 = lineage.walk_chain_or_latest(input, "base_mask_artifact_id", StageId::S4)?;
    let s3 = lineage.walk_chain_or_latest(s4, "input_artifact_id", StageId::S3)?;
    let source_idx = file_index(s3, "step3_denoised.png")?;
    let source = load_gray(exec, s3, source_idx)?;
    let um_per_px = lineage.calibration_um_per_px()?;

    let result = stages::s6::compute(&source, &mask, &normalized, um_per_px)?;
    let bytes = exec.codec.encode_mask(&result.mask)?;

    Ok(PreviewOutput {
        content_type: "image/png",
        bytes,
        params: json!({"mask_artifact_id": input.id, "qc": result.qc_json}),
    })
}

/// Step 7 preview — hole handling + closing. `layer = primary` returns the
/// `outer` mask (the one Step 8 will consume by default), `secondary`
/// returns the untouched `solid` mask.
pub fn preview_s7(exec: &Execution, lineage: &Lineage, params: &serde_json::Value) -> Result<PreviewOutput> {
    let raw = S7Params::from_json(params)?;
    let normalized = raw.normalize()?;
    let layer = layer_of(params)?;

    let input = lineage.resolve_input(StageId::S7, raw.mask_artifact_id.as_deref())?;
    let idx = file_index(input, "step6_recovered_mask.png")?;
    let solid = load_mask(exec, input, idx)?;
    let um_per_px = lineage.calibration_um_per_px()?;

    let result = stages::s7::compute(&solid, &normalized, um_per_px);
    let bytes = match layer {
        PreviewLayer::Primary => exec.codec.encode_mask(&result.outer)?,
        PreviewLayer::Secondary => exec.codec.encode_mask(&result.solid)?,
    };

    Ok(PreviewOutput {
        content_type: "image/png",
        bytes,
        params: json!({"mask_artifact_id": input.id, "qc": result.qc_json}),
    })
}

/// Step 9 preview — polygonization. `layer = primary` returns the rendered
/// preview PNG, `secondary` returns the polygon set itself as JSON.
pub fn preview_s9(exec: &Execution, lineage: &Lineage, params: &serde_json::Value) -> Result<PreviewOutput> {
    let raw = S9Params::from_json(params)?;
    let normalized = raw.normalize();
    let layer = layer_of(params)?;

    let input = lineage.resolve_input(StageId::S9, raw.contour_artifact_id.as_deref())?;
    let idx = file_index(input, "contours.json")?;
    let contours: Vec<ContourRecord> = load_json(exec, input, idx)?;

    let polygons = stages::s9::compute_polygons(&contours, &normalized);

    match layer {
        PreviewLayer::Secondary => Ok(PreviewOutput {
            content_type: "application/json",
            bytes: serde_json::to_vec_pretty(&polygons)?,
            params: json!({"contour_artifact_id": input.id, "polygon_count": polygons.len()}),
        }),
        PreviewLayer::Primary => {
            let (width, height) = stages::s9::canvas_dims(exec, lineage, input, &contours);
            let background = stages::s9::resolve_background(exec, lineage, width, height);
            let preview = stages::s9::render_preview(&background, &polygons);
            let bytes = exec.codec.encode_gray(&preview)?;
            Ok(PreviewOutput {
                content_type: "image/png",
                bytes,
                params: json!({"contour_artifact_id": input.id, "polygon_count": polygons.len()}),
            })
        }
    }
}

/// Step 10 preview — watershed split. `layer = primary` returns the
/// boundary overlay, `secondary` returns the color-packed label
/// visualization.
pub fn preview_s10(exec: &Execution, lineage: &Lineage, params: &serde_json::Value) -> Result<PreviewOutput> {
    let raw = S10Params::from_json(params)?;
    let normalized = raw.normalize();
    let layer = layer_of(params)?;

    let input = lineage.resolve_input(StageId::S10, raw.polygon_artifact_id.as_deref())?;
    let idx = file_index(input, "polygons.json")?;
    let polygons: Vec<PolygonRecord> = load_json(exec, input, idx)?;

    let (width, height) = stages::s10::canvas_dims(exec, lineage, input, &polygons);
    let edge_context = stages::s10::resolve_edge_context(exec, lineage, raw.grayscale_artifact_id.as_deref(), width, height);
    let grayscale_requested_but_missing = edge_context.is_none() && raw.grayscale_artifact_id.is_some();
    let background = stages::s10::resolve_background(exec, lineage, width, height);

    let result = stages::s10::compute(
        &polygons,
        &normalized,
        width,
        height,
        edge_context.as_ref(),
        &background,
        grayscale_requested_but_missing,
    );

    let (bytes, content_type) = match layer {
        PreviewLayer::Primary => (exec.codec.encode_gray(&result.boundary_overlay)?, "image/png"),
        PreviewLayer::Secondary => (exec.codec.encode_rgb(width, height, &result.labels_vis)?, "image/png"),
    };

    Ok(PreviewOutput {
        content_type,
        bytes,
        params: json!({
            "polygon_artifact_id": input.id,
            "qc": {
                "polygon_count": polygons.len(),
                "label_count": result.label_count,
                "split_line_count": result.split_lines.len(),
                "warnings": result.warnings,
            },
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::GrayImage;
    use crate::model::{ImageRecord, Run};
    use crate::stages::test_support::FakeCodec;
    use crate::store::fs::FsStore;
    use crate::store::{ArtifactStore, ImageRepository, RunRepository};
    use tempfile::TempDir;

    fn setup(store: &FsStore) {
        store
            .insert(ImageRecord {
                id: "img1".into(),
                filename: "x.png".into(),
                content_type: "image/png".into(),
                width: 24,
                height: 24,
                storage_path: "img1/original/x.png".into(),
                created_at: "2026-01-01T00:00:00Z".into(),
            })
            .unwrap();
        RunRepository::insert(
            store,
            Run { id: "run1".into(), image_id: "img1".into(), name: None, created_at: "2026-01-01T00:00:00Z".into() },
        )
        .unwrap();
    }

    fn commit_step2(store: &FsStore, codec: &FakeCodec) -> crate::model::Artifact {
        let mut image = GrayImage::new(24, 24);
        for y in 0..24 {
            for x in 0..24 {
                image.set(x, y, (((x + y) * 11) % 255) as u8);
            }
        }
        let bytes = codec.encode_gray(&image).unwrap();
        let dir = store.artifact_dir("run1", StageId::S2, 1, "art-s2");
        let (meta, _) = store.write_file(&dir, "step2_preview.png", &bytes, "image/png").unwrap();
        store
            .commit(crate::model::Artifact {
                id: "art-s2".into(),
                run_id: "run1".into(),
                stage_id: StageId::S2,
                version: 1,
                artifact_type: "intensity".into(),
                params: json!({}),
                files: vec![meta],
                created_at: "2026-01-01T00:00:00Z".into(),
            })
            .unwrap()
    }

    #[test]
    fn s3_preview_at_full_resolution_matches_execute() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        let codec = FakeCodec;
        setup(&store);
        let s2 = commit_step2(&store, &codec);
        let artifacts = vec![s2];
        let lineage = Lineage::build(&artifacts);
        let exec = Execution { store: &store, codec: &codec, images: &store, runs: &store };

        let request = json!({"strength": 40.0, "edge_protect": 20.0, "quality_mode": "accurate"});
        let preview = preview_s3(&exec, &lineage, &request).unwrap();
        let executed = stages::execute(&exec, "run1", StageId::S3, &request).unwrap();

        let idx = file_index(&executed, "step3_denoised.png").unwrap();
        let (committed_bytes, _) = store.get_file(&executed, idx).unwrap();
        assert_eq!(preview.bytes, committed_bytes);
    }

    #[test]
    fn s9_preview_secondary_layer_returns_polygon_json() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        let codec = FakeCodec;
        setup(&store);

        let contour = ContourRecord {
            id: 1,
            bbox: [0, 0, 10, 10],
            points: vec![(0, 0), (10, 0), (10, 10), (0, 10)],
            kind: "solid".into(),
        };
        let bytes = serde_json::to_vec(&[contour]).unwrap();
        let dir8 = store.artifact_dir("run1", StageId::S8, 1, "art-s8");
        let (meta, _) = store.write_file(&dir8, "contours.json", &bytes, "application/json").unwrap();
        let s8 = store
            .commit(crate::model::Artifact {
                id: "art-s8".into(),
                run_id: "run1".into(),
                stage_id: StageId::S8,
                version: 1,
                artifact_type: "contours".into(),
                params: json!({}),
                files: vec![meta],
                created_at: "2026-01-01T00:00:00Z".into(),
            })
            .unwrap();
        let artifacts = vec![s8];
        let lineage = Lineage::build(&artifacts);
        let exec = Execution { store: &store, codec: &codec, images: &store, runs: &store };

        let preview = preview_s9(&exec, &lineage, &json!({"layer": "secondary"})).unwrap();
        assert_eq!(preview.content_type, "application/json");
        let polygons: Vec<PolygonRecord> = serde_json::from_slice(&preview.bytes).unwrap();
        assert_eq!(polygons.len(), 1);
    }
}
