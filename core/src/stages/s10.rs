//! Stage 10 — Watershed split: splits each Step-9 polygon that represents
//! fused particles into separate labels via a local priority-flood
//! watershed seeded at distance-transform peaks, then traces the boundary
//! between adjacent labels into split-line polylines.

use super::{commit, file_index, load_gray, load_mask, Execution, OutFile, PolygonRecord};
use crate::kernels::bresenham::line;
use crate::kernels::clampf;
use crate::kernels::components::connected_components;
use crate::kernels::contour::{rasterize_polygon, trace_contours, FPoint};
use crate::kernels::distance::city_block_distance;
use crate::kernels::sobel::sobel_magnitude;
use crate::kernels::thinning::skeletonize;
use crate::kernels::watershed::{find_local_maxima, priority_flood};
use crate::kernels::{GrayImage, Mask};
use crate::model::Artifact;
use crate::params::S10Params;
use crate::resolver::Lineage;
use crate::{Result, StageId};
use serde::Serialize;
use serde_json::json;

const PAD: i64 = 2;

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SplitLineRecord {
    id: u32,
    polygon_id: u32,
    points: Vec<(i64, i64)>,
}

struct LocalSplit {
    origin: (i64, i64),
    labels: Vec<u32>,
    width: usize,
    height: usize,
    label_count: u32,
}

pub(crate) struct Computed {
    pub labels_u16: Vec<u16>,
    pub segmented_mask: Mask,
    pub boundary_overlay: GrayImage,
    pub labels_vis: Vec<u8>,
    pub split_lines: Vec<SplitLineRecord>,
    pub label_count: u32,
    pub warnings: Vec<String>,
}

/// Runs the watershed-split algorithm over every polygon and renders the
/// boundary overlay. Pure: no store, no codec, no commit; shared by
/// [`execute`] and the Step-10 preview renderer (`crate::preview`).
pub(crate) fn compute(
    polygons: &[PolygonRecord],
    normalized: &crate::params::S10Normalized,
    width: usize,
    height: usize,
    edge_context: Option<&EdgeContext>,
    background: &GrayImage,
    grayscale_requested_but_missing: bool,
) -> Computed {
    let mut labels_u16 = vec![0u16; width * height];
    let mut split_lines: Vec<SplitLineRecord> = Vec::new();
    let mut next_label: u32 = 1;
    let mut warnings: Vec<String> = Vec::new();
    if grayscale_requested_but_missing {
        warnings.push("grayscale context requested but unavailable; edge term dropped".into());
    }

    let mut split_line_id: u32 = 1;
    for polygon in polygons {
        let split = split_polygon(&polygon.points, normalized, edge_context);
        for y in 0..split.height {
            for x in 0..split.width {
                let local = split.labels[y * split.width + x];
                if local == 0 {
                    continue;
                }
                let gx = split.origin.0 + x as i64;
                let gy = split.origin.1 + y as i64;
                if gx < 0 || gy < 0 || gx as usize >= width || gy as usize >= height {
                    continue;
                }
                labels_u16[gy as usize * width + gx as usize] = (next_label + local - 1) as u16;
            }
        }
        if split.label_count > 1 {
            for line_points in boundary_split_lines(&split) {
                let global: Vec<(i64, i64)> = line_points
                    .into_iter()
                    .map(|(x, y)| (split.origin.0 + x, split.origin.1 + y))
                    .collect();
                split_lines.push(SplitLineRecord {
                    id: split_line_id,
                    polygon_id: polygon.id,
                    points: global,
                });
                split_line_id += 1;
            }
        }
        next_label += split.label_count;
    }

    let label_count = next_label - 1;

    let mut segmented_mask = Mask::new(width, height);
    for (i, &v) in labels_u16.iter().enumerate() {
        segmented_mask.data[i] = (v != 0) as u8;
    }

    let boundary_overlay = render_boundary_overlay(background, &split_lines);
    let labels_vis = pack_labels_vis(&labels_u16, width, height);

    Computed {
        labels_u16,
        segmented_mask,
        boundary_overlay,
        labels_vis,
        split_lines,
        label_count,
        warnings,
    }
}

pub(crate) fn execute(
    exec: &Execution,
    run_id: &str,
    lineage: &Lineage,
    params: &serde_json::Value,
) -> Result<Artifact> {
    let raw = S10Params::from_json(params)?;
    let normalized = raw.normalize();

    let input = lineage.resolve_input(StageId::S10, raw.polygon_artifact_id.as_deref())?;
    let idx = file_index(input, "polygons.json")?;
    let polygons: Vec<PolygonRecord> = super::load_json(exec, input, idx)?;

    let (width, height) = canvas_dims(exec, lineage, input, &polygons);
    let edge_context = resolve_edge_context(exec, lineage, raw.grayscale_artifact_id.as_deref(), width, height);
    let grayscale_requested_but_missing = edge_context.is_none() && raw.grayscale_artifact_id.is_some();
    if grayscale_requested_but_missing {
        tracing::warn!(run = run_id, "step 10: grayscale context unavailable, edge term dropped");
    }
    let background = resolve_background(exec, lineage, width, height);

    let result = compute(
        &polygons,
        &normalized,
        width,
        height,
        edge_context.as_ref(),
        &background,
        grayscale_requested_but_missing,
    );

    let labels_bytes = exec.codec.encode_gray16_le(width, height, &result.labels_u16)?;
    let labels_vis_bytes = exec.codec.encode_rgb(width, height, &result.labels_vis)?;
    let segmented_bytes = exec.codec.encode_mask(&result.segmented_mask)?;
    let boundary_bytes = exec.codec.encode_gray(&result.boundary_overlay)?;
    let split_lines_bytes = serde_json::to_vec_pretty(&result.split_lines)?;

    let qc_json = json!({
        "polygon_count": polygons.len(),
        "label_count": result.label_count,
        "split_line_count": result.split_lines.len(),
        "split_disabled": normalized.split_strength <= 0.0,
        "warnings": result.warnings,
    });

    let params_json = json!({
        "polygon_artifact_id": input.id,
        "grayscale_artifact_id": raw.grayscale_artifact_id,
        "split_strength": normalized.split_strength,
        "min_center_distance_px": normalized.min_center_distance_px,
        "min_particle_area": normalized.min_particle_area,
        "qc": qc_json,
    });
    let qc_file_bytes = serde_json::to_vec_pretty(&qc_json)?;

    commit(
        exec,
        run_id,
        StageId::S10,
        "watershed_split",
        params_json,
        vec![
            OutFile::new("labels.png", labels_bytes, "image/png"),
            OutFile::new("labels_vis.png", labels_vis_bytes, "image/png"),
            OutFile::new("segmented_mask.png", segmented_bytes, "image/png"),
            OutFile::new("boundary_overlay.png", boundary_bytes, "image/png"),
            OutFile::new("split_lines.json", split_lines_bytes, "application/json"),
            OutFile::new("qc.json", qc_file_bytes, "application/json"),
        ],
    )
}

/// Splits a single polygon's rasterized interior into 1..k local labels.
fn split_polygon(
    points: &[FPoint],
    normalized: &crate::params::S10Normalized,
    edge_context: Option<&EdgeContext>,
) -> LocalSplit {
    let (min_x, min_y, max_x, max_y) = float_bbox(points);
    let ox = min_x.floor() as i64 - PAD;
    let oy = min_y.floor() as i64 - PAD;
    let w = ((max_x.ceil() as i64 - ox) + PAD).max(1) as usize;
    let h = ((max_y.ceil() as i64 - oy) + PAD).max(1) as usize;

    let local_points: Vec<FPoint> = points.iter().map(|&(x, y)| (x - ox as f64, y - oy as f64)).collect();
    let mask = rasterize_polygon(&local_points, w, h);

    if normalized.split_strength <= 0.0 || mask.foreground_count() == 0 {
        return LocalSplit {
            origin: (ox, oy),
            labels: mask.data.iter().map(|&v| v as u32).collect(),
            width: w,
            height: h,
            label_count: (mask.foreground_count() > 0) as u32,
        };
    }

    let dist = city_block_distance(&mask);
    let ratio = normalized.split_strength / 100.0;
    let seed_h = clampf(4.5 - ratio * 3.5, 1.0, 4.5);

    let edge_field = edge_context.map(|ctx| ctx.crop(ox, oy, w, h));
    let edge_weight = if edge_field.is_some() {
        clampf(0.08 + ratio * 0.37, 0.0, 0.45)
    } else {
        0.0
    };

    let (labels, label_count) = run_watershed(
        &mask,
        &dist,
        edge_field.as_deref(),
        edge_weight,
        seed_h,
        normalized.min_center_distance_px,
    );

    let (labels, label_count) = if label_count <= 1 {
        let (retry_labels, retry_count) = run_watershed(
            &mask,
            &dist,
            edge_field.as_deref(),
            edge_weight,
            seed_h * 0.7,
            normalized.min_center_distance_px * 0.8,
        );
        if retry_count > label_count {
            (retry_labels, retry_count)
        } else {
            (labels, label_count)
        }
    } else {
        (labels, label_count)
    };

    let (labels, label_count) = remove_small_labels(&mask, labels, label_count, normalized.min_particle_area);

    LocalSplit {
        origin: (ox, oy),
        labels,
        width: w,
        height: h,
        label_count,
    }
}

fn run_watershed(
    mask: &Mask,
    dist: &[u32],
    edge_field: Option<&[f64]>,
    edge_weight: f64,
    min_height: f64,
    min_spacing: f64,
) -> (Vec<u32>, u32) {
    let mut peaks = find_local_maxima(dist, mask.width, mask.height, min_height, min_spacing);
    if peaks.is_empty() {
        if let Some(peak) = argmax(dist, mask.width, mask.height) {
            peaks.push(peak);
        }
    }
    if peaks.is_empty() {
        return (vec![0u32; mask.width * mask.height], 0);
    }
    let markers: Vec<Vec<(usize, usize)>> = peaks.into_iter().map(|p| vec![p]).collect();
    let label_count = markers.len() as u32;
    let labels = priority_flood(mask, &markers, dist, edge_field, edge_weight);
    (labels, label_count)
}

fn argmax(dist: &[u32], width: usize, height: usize) -> Option<(usize, usize)> {
    let (mut best_idx, mut best_val) = (None, 0u32);
    for (i, &v) in dist.iter().enumerate() {
        if v > best_val {
            best_val = v;
            best_idx = Some(i);
        }
    }
    best_idx.map(|i| (i % width, i / width))
}

/// Drops labels with area below `min_area`; restores the full mask as a
/// single label if that would remove every label.
fn remove_small_labels(mask: &Mask, mut labels: Vec<u32>, label_count: u32, min_area: f64) -> (Vec<u32>, u32) {
    if label_count == 0 {
        return (labels, 0);
    }
    let mut areas = vec![0usize; (label_count + 1) as usize];
    for &l in &labels {
        if l > 0 {
            areas[l as usize] += 1;
        }
    }
    let mut remap = vec![0u32; (label_count + 1) as usize];
    let mut next = 1u32;
    for (label, &area) in areas.iter().enumerate().skip(1) {
        if area as f64 >= min_area {
            remap[label] = next;
            next += 1;
        }
    }
    let kept = next - 1;
    if kept == 0 {
        let restored: Vec<u32> = mask.data.iter().map(|&v| v as u32).collect();
        return (restored, (mask.foreground_count() > 0) as u32);
    }
    for l in &mut labels {
        *l = remap[*l as usize];
    }
    (labels, kept)
}

/// Traces the boundary between differently-labeled regions of a split
/// polygon, skeletonizes it, and extracts the longest path (graph diameter
/// via two BFS passes) per connected boundary component — its endpoints
/// snapped to the nearest point on the polygon's outer contour.
fn boundary_split_lines(split: &LocalSplit) -> Vec<Vec<(i64, i64)>> {
    let (w, h) = (split.width, split.height);
    let mut boundary = Mask::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let here = split.labels[y * w + x];
            if here == 0 {
                continue;
            }
            let mut touches_other = false;
            for (dx, dy) in [(1i64, 0i64), (-1, 0), (0, 1), (0, -1)] {
                let nx = x as i64 + dx;
                let ny = y as i64 + dy;
                if nx < 0 || ny < 0 || nx as usize >= w || ny as usize >= h {
                    continue;
                }
                let other = split.labels[ny as usize * w + nx as usize];
                if other != 0 && other != here {
                    touches_other = true;
                }
            }
            if touches_other {
                boundary.set(x, y, true);
            }
        }
    }
    if boundary.foreground_count() == 0 {
        return Vec::new();
    }

    let skeleton = skeletonize(&boundary);
    let mut full_mask = Mask::new(w, h);
    for (i, &l) in split.labels.iter().enumerate() {
        full_mask.data[i] = (l != 0) as u8;
    }
    let outer = trace_contours(&full_mask)
        .into_iter()
        .find(|loop_pts| crate::kernels::contour::signed_area(loop_pts) > 0.0)
        .unwrap_or_default();

    let components = connected_components(&skeleton, 1);
    let mut lines = Vec::new();
    for component in &components {
        let pixels: Vec<(usize, usize)> = component.pixels.iter().map(|&i| (i % w, i / w)).collect();
        if let Some(mut path) = longest_path(&pixels) {
            if let Some(&first) = path.first() {
                path[0] = snap_to_contour(first, &outer);
            }
            if let Some(last) = path.last().copied() {
                let last_idx = path.len() - 1;
                path[last_idx] = snap_to_contour(last, &outer);
            }
            lines.push(path.into_iter().map(|(x, y)| (x as i64, y as i64)).collect());
        }
    }
    lines
}

/// Graph diameter of a thin pixel component via two BFS passes: farthest
/// point from an arbitrary start, then farthest point from that point.
fn longest_path(pixels: &[(usize, usize)]) -> Option<Vec<(usize, usize)>> {
    use std::collections::{HashMap, VecDeque};
    if pixels.is_empty() {
        return None;
    }
    let set: std::collections::HashSet<(usize, usize)> = pixels.iter().copied().collect();

    let bfs = |start: (usize, usize)| -> HashMap<(usize, usize), (usize, usize)> {
        let mut parent: HashMap<(usize, usize), (usize, usize)> = HashMap::new();
        let mut visited: std::collections::HashSet<(usize, usize)> = std::collections::HashSet::new();
        let mut queue = VecDeque::new();
        visited.insert(start);
        queue.push_back(start);
        while let Some((x, y)) = queue.pop_front() {
            for (dx, dy) in [(-1i64, -1i64), (0, -1), (1, -1), (-1, 0), (1, 0), (-1, 1), (0, 1), (1, 1)] {
                let nx = x as i64 + dx;
                let ny = y as i64 + dy;
                if nx < 0 || ny < 0 {
                    continue;
                }
                let next = (nx as usize, ny as usize);
                if set.contains(&next) && !visited.contains(&next) {
                    visited.insert(next);
                    parent.insert(next, (x, y));
                    queue.push_back(next);
                }
            }
        }
        parent
    };

    let start = pixels[0];
    let parents_a = bfs(start);
    let far_a = *parents_a.keys().max_by_key(|p| path_len(&parents_a, start, **p)).unwrap_or(&start);
    let parents_b = bfs(far_a);
    let far_b = *parents_b.keys().max_by_key(|p| path_len(&parents_b, far_a, **p)).unwrap_or(&far_a);

    let mut path = vec![far_b];
    let mut current = far_b;
    while current != far_a {
        match parents_b.get(&current) {
            Some(&p) => {
                path.push(p);
                current = p;
            }
            None => break,
        }
    }
    path.reverse();
    Some(path)
}

fn path_len(parents: &std::collections::HashMap<(usize, usize), (usize, usize)>, root: (usize, usize), mut node: (usize, usize)) -> usize {
    let mut len = 0;
    while node != root {
        match parents.get(&node) {
            Some(&p) => {
                node = p;
                len += 1;
            }
            None => break,
        }
    }
    len
}

fn snap_to_contour(point: (usize, usize), outer: &[(i64, i64)]) -> (usize, usize) {
    if outer.is_empty() {
        return point;
    }
    let (px, py) = (point.0 as i64, point.1 as i64);
    let nearest = outer
        .iter()
        .min_by_key(|&&(ox, oy)| (ox - px).pow(2) + (oy - py).pow(2))
        .copied()
        .unwrap_or((px, py));
    (nearest.0.max(0) as usize, nearest.1.max(0) as usize)
}

fn float_bbox(points: &[FPoint]) -> (f64, f64, f64, f64) {
    let mut min_x = f64::MAX;
    let mut min_y = f64::MAX;
    let mut max_x = f64::MIN;
    let mut max_y = f64::MIN;
    for &(x, y) in points {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    if points.is_empty() {
        (0.0, 0.0, 0.0, 0.0)
    } else {
        (min_x, min_y, max_x, max_y)
    }
}

pub(crate) struct EdgeContext {
    magnitude: GrayImage,
}

impl EdgeContext {
    fn crop(&self, ox: i64, oy: i64, w: usize, h: usize) -> Vec<f64> {
        let mut out = vec![0.0f64; w * h];
        for y in 0..h {
            for x in 0..w {
                out[y * w + x] = self.magnitude.get(ox + x as i64, oy + y as i64) as f64;
            }
        }
        out
    }
}

pub(crate) fn resolve_edge_context(
    exec: &Execution,
    lineage: &Lineage,
    explicit: Option<&str>,
    width: usize,
    height: usize,
) -> Option<EdgeContext> {
    let source = explicit
        .and_then(|id| lineage.get(id))
        .or_else(|| lineage.latest(StageId::S3))?;
    let idx = file_index(source, "step3_denoised.png").ok()?;
    let gray = load_gray(exec, source, idx).ok()?;
    if gray.width != width || gray.height != height {
        return None;
    }
    Some(EdgeContext { magnitude: sobel_magnitude(&gray) })
}

pub(crate) fn resolve_background(exec: &Execution, lineage: &Lineage, width: usize, height: usize) -> GrayImage {
    let candidate = lineage
        .latest(StageId::S3)
        .and_then(|a| file_index(a, "step3_denoised.png").ok().map(|idx| (a, idx)))
        .and_then(|(a, idx)| load_gray(exec, a, idx).ok());
    match candidate {
        Some(img) if img.width == width && img.height == height => img,
        _ => GrayImage::new(width, height),
    }
}

fn render_boundary_overlay(background: &GrayImage, split_lines: &[SplitLineRecord]) -> GrayImage {
    let mut out = background.clone();
    for split_line in split_lines {
        let n = split_line.points.len();
        for i in 0..n.saturating_sub(1) {
            let (x0, y0) = split_line.points[i];
            let (x1, y1) = split_line.points[i + 1];
            for (x, y) in line(x0, y0, x1, y1) {
                if out.in_bounds(x, y) {
                    out.set(x as usize, y as usize, 255);
                }
            }
        }
    }
    out
}

fn pack_labels_vis(labels: &[u16], width: usize, height: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(width * height * 3);
    for &label in labels {
        let v = label as u32;
        out.push((v & 0xFF) as u8);
        out.push(((v >> 8) & 0xFF) as u8);
        out.push(((v >> 16) & 0xFF) as u8);
    }
    out
}

/// Recovers the canvas dimensions polygons were traced in by following the
/// Step-9 artifact's `contour_artifact_id` back to the Step-8 artifact, then
/// to its source mask; falls back to the union bounding box of the polygons.
pub(crate) fn canvas_dims(exec: &Execution, lineage: &Lineage, polygon_artifact: &Artifact, polygons: &[PolygonRecord]) -> (usize, usize) {
    let dims = polygon_artifact
        .params
        .get("contour_artifact_id")
        .and_then(|v| v.as_str())
        .and_then(|id| lineage.get(id))
        .and_then(|s8| {
            let mask_id = s8.params.get("mask_artifact_id").and_then(|v| v.as_str())?;
            let mask_artifact = lineage.get(mask_id)?;
            let filename = match mask_artifact.stage_id {
                StageId::S6 => "step6_recovered_mask.png",
                StageId::S5 => "step5_mask_edited.png",
                _ => return None,
            };
            let idx = file_index(mask_artifact, filename).ok()?;
            load_mask(exec, mask_artifact, idx).ok().map(|m| (m.width, m.height))
        });
    if let Some(dims) = dims {
        return dims;
    }
    let all_points: Vec<FPoint> = polygons.iter().flat_map(|p| p.points.iter().copied()).collect();
    let (_, _, max_x, max_y) = float_bbox(&all_points);
    ((max_x.ceil() as i64 + 1).max(1) as usize, (max_y.ceil() as i64 + 1).max(1) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ImageRecord, Run};
    use crate::stages::test_support::FakeCodec;
    use crate::store::fs::FsStore;
    use crate::store::{ArtifactStore, ImageRepository, RunRepository};
    use tempfile::TempDir;

    fn commit_polygons(store: &FsStore, polygons: &[PolygonRecord]) -> Artifact {
        let bytes = serde_json::to_vec(polygons).unwrap();
        let dir = store.artifact_dir("run1", StageId::S9, 1, "art-s9");
        let (meta, _) = store.write_file(&dir, "polygons.json", &bytes, "application/json").unwrap();
        store
            .commit(Artifact {
                id: "art-s9".into(),
                run_id: "run1".into(),
                stage_id: StageId::S9,
                version: 1,
                artifact_type: "polygons".into(),
                params: json!({}),
                files: vec![meta],
                created_at: "2026-01-01T00:00:00Z".into(),
            })
            .unwrap()
    }

    fn square_polygon(id: u32, ox: f64, oy: f64, side: f64) -> PolygonRecord {
        PolygonRecord {
            id,
            kind: "solid".into(),
            points: vec![(ox, oy), (ox + side, oy), (ox + side, oy + side), (ox, oy + side)],
        }
    }

    #[test]
    fn split_disabled_yields_one_label_per_polygon() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        let codec = FakeCodec;
        let exec = Execution { store: &store, codec: &codec, images: &store, runs: &store };

        store
            .insert(ImageRecord {
                id: "img1".into(),
                filename: "x.png".into(),
                content_type: "image/png".into(),
                width: 50,
                height: 50,
                storage_path: "img1/original/x.png".into(),
                created_at: "2026-01-01T00:00:00Z".into(),
            })
            .unwrap();
        RunRepository::insert(&store, Run { id: "run1".into(), image_id: "img1".into(), name: None, created_at: "2026-01-01T00:00:00Z".into() }).unwrap();

        let polygons = vec![square_polygon(1, 5.0, 5.0, 20.0)];
        let s9 = commit_polygons(&store, &polygons);
        let artifacts = vec![s9];
        let lineage = Lineage::build(&artifacts);

        let out = execute(&exec, "run1", &lineage, &json!({"split_strength": 0.0})).unwrap();
        assert_eq!(out.params["qc"]["label_count"], 1);
        assert_eq!(out.params["qc"]["split_disabled"], true);
    }

    #[test]
    fn splits_two_tangent_squares_fused_into_one_polygon() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        let codec = FakeCodec;
        let exec = Execution { store: &store, codec: &codec, images: &store, runs: &store };

        store
            .insert(ImageRecord {
                id: "img1".into(),
                filename: "x.png".into(),
                content_type: "image/png".into(),
                width: 60,
                height: 60,
                storage_path: "img1/original/x.png".into(),
                created_at: "2026-01-01T00:00:00Z".into(),
            })
            .unwrap();
        RunRepository::insert(&store, Run { id: "run1".into(), image_id: "img1".into(), name: None, created_at: "2026-01-01T00:00:00Z".into() }).unwrap();

        // Two 20x20 squares sharing one edge column -> one fused polygon.
        let fused = PolygonRecord {
            id: 1,
            kind: "solid".into(),
            points: vec![(5.0, 5.0), (45.0, 5.0), (45.0, 25.0), (5.0, 25.0)],
        };
        let s9 = commit_polygons(&store, &[fused]);
        let artifacts = vec![s9];
        let lineage = Lineage::build(&artifacts);

        let out = execute(
            &exec,
            "run1",
            &lineage,
            &json!({"split_strength": 80.0, "min_center_distance_px": 6.0, "min_particle_area": 1.0}),
        )
        .unwrap();
        let label_count = out.params["qc"]["label_count"].as_u64().unwrap();
        assert!(label_count >= 2, "expected a split, got {label_count}");
    }
}
