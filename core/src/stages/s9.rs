//! Stage 9 — Polygonization: resamples each Step-8 contour to uniform
//! arc-length spacing, smooths it with a circular moving average, densifies
//! long edges, and rounds to 3 decimals. Emits the polygon set plus a
//! preview rendered over a grayscale background.

use super::{commit, file_index, load_gray, load_json, load_mask, ContourRecord, Execution, OutFile, PolygonRecord};
use crate::kernels::bresenham::line;
use crate::kernels::contour::{densify, resample_uniform, round3, smooth_circular, FPoint};
use crate::kernels::GrayImage;
use crate::model::Artifact;
use crate::params::{S9Normalized, S9Params};
use crate::resolver::Lineage;
use crate::{Result, StageId};
use serde_json::json;

/// Resamples, smooths, densifies and rounds every contour. Pure: no store,
/// no codec, no commit; shared by [`execute`] and the Step-9 preview
/// renderer (`crate::preview`).
pub(crate) fn compute_polygons(contours: &[ContourRecord], normalized: &S9Normalized) -> Vec<PolygonRecord> {
    let smooth_radius = (normalized.smooth_level / 100.0 * 6.0).round() as usize;

    contours
        .iter()
        .map(|contour| {
            let fpoints: Vec<FPoint> = contour
                .points
                .iter()
                .map(|&(x, y)| (x as f64, y as f64))
                .collect();
            let resampled = resample_uniform(&fpoints, normalized.resample_step_px);
            let smoothed = smooth_circular(&resampled, smooth_radius);
            let densified = densify(&smoothed, normalized.max_vertex_gap_px);
            let rounded = round3(&densified);
            PolygonRecord {
                id: contour.id,
                kind: contour.kind.clone(),
                points: rounded,
            }
        })
        .collect()
}

pub(crate) fn execute(
    exec: &Execution,
    run_id: &str,
    lineage: &Lineage,
    params: &serde_json::Value,
) -> Result<Artifact> {
    let raw = S9Params::from_json(params)?;
    let normalized = raw.normalize();

    let input = lineage.resolve_input(StageId::S9, raw.contour_artifact_id.as_deref())?;
    let idx = file_index(input, "contours.json")?;
    let contours: Vec<ContourRecord> = load_json(exec, input, idx)?;

    let polygons = compute_polygons(&contours, &normalized);

    let (width, height) = canvas_dims(exec, lineage, input, &contours);
    let background = resolve_background(exec, lineage, width, height);
    let preview = render_preview(&background, &polygons);

    let polygons_bytes = serde_json::to_vec_pretty(&polygons)?;
    let preview_bytes = exec.codec.encode_gray(&preview)?;

    let params_json = json!({
        "contour_artifact_id": input.id,
        "resample_step_px": normalized.resample_step_px,
        "smooth_level": normalized.smooth_level,
        "max_vertex_gap_px": normalized.max_vertex_gap_px,
        "polygon_count": polygons.len(),
    });

    commit(
        exec,
        run_id,
        StageId::S9,
        "polygons",
        params_json,
        vec![
            OutFile::new("polygons.json", polygons_bytes, "application/json"),
            OutFile::new("step9_preview.png", preview_bytes, "image/png"),
        ],
    )
}

/// Recovers the canvas dimensions the contours were traced in by following
/// the Step-8 artifact's recorded mask reference; falls back to the union
/// bounding box of the contours themselves if that chain is broken.
pub(crate) fn canvas_dims(
    exec: &Execution,
    lineage: &Lineage,
    contour_artifact: &Artifact,
    contours: &[ContourRecord],
) -> (usize, usize) {
    let mask_id = contour_artifact
        .params
        .get("mask_artifact_id")
        .and_then(|v| v.as_str());
    if let Some(id) = mask_id {
        if let Some(mask_artifact) = lineage.get(id) {
            let filename = match mask_artifact.stage_id {
                StageId::S6 => Some("step6_recovered_mask.png"),
                StageId::S5 => Some("step5_mask_edited.png"),
                _ => None,
            };
            if let Some(filename) = filename {
                if let Ok(idx) = file_index(mask_artifact, filename) {
                    if let Ok(mask) = load_mask(exec, mask_artifact, idx) {
                        return (mask.width, mask.height);
                    }
                }
            }
        }
    }
    let max_x = contours.iter().map(|c| c.bbox[2]).max().unwrap_or(0).max(0);
    let max_y = contours.iter().map(|c| c.bbox[3]).max().unwrap_or(0).max(0);
    ((max_x + 1).max(1) as usize, (max_y + 1).max(1) as usize)
}

/// The best available grayscale backdrop for a polygon preview: the
/// denoised Step-3 image, then the Step-2 preview, then a blank canvas.
pub(crate) fn resolve_background(exec: &Execution, lineage: &Lineage, width: usize, height: usize) -> GrayImage {
    let candidate = lineage
        .latest(StageId::S3)
        .and_then(|a| file_index(a, "step3_denoised.png").ok().map(|idx| (a, idx)))
        .or_else(|| {
            lineage
                .latest(StageId::S2)
                .and_then(|a| file_index(a, "step2_preview.png").ok().map(|idx| (a, idx)))
        })
        .and_then(|(a, idx)| load_gray(exec, a, idx).ok());

    match candidate {
        Some(img) if img.width == width && img.height == height => img,
        _ => GrayImage::new(width, height),
    }
}

pub(crate) fn render_preview(background: &GrayImage, polygons: &[PolygonRecord]) -> GrayImage {
    let mut out = background.clone();
    for polygon in polygons {
        let n = polygon.points.len();
        if n < 2 {
            continue;
        }
        for i in 0..n {
            let (x0, y0) = polygon.points[i];
            let (x1, y1) = polygon.points[(i + 1) % n];
            for (x, y) in line(x0.round() as i64, y0.round() as i64, x1.round() as i64, y1.round() as i64) {
                if out.in_bounds(x, y) {
                    out.set(x as usize, y as usize, 255);
                }
            }
        }
    }
    out
}
