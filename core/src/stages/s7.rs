//! Stage 7 — Hole handling + closing: derives an `outer` mask (holes filled
//! per `hole_mode`) from the Step-6 `solid` mask, optionally closes it, then
//! re-unions the solid mask back in so closing's erosion pass can never
//! drop a solid pixel. Reports porosity.
//!
//! [`compute`] is the pure algorithm shared by [`execute`] and the Step-7
//! preview renderer (`crate::preview`).

use super::{commit, file_index, load_mask, Execution, OutFile};
use crate::kernels::components::connected_components;
use crate::kernels::morphology::closing;
use crate::kernels::{clampf, Mask};
use crate::params::{HoleMode, S7Normalized, S7Params};
use crate::resolver::Lineage;
use crate::{Result, StageId};
use serde_json::json;

pub(crate) struct Computed {
    pub solid: Mask,
    pub outer: Mask,
    pub qc_json: serde_json::Value,
}

/// Runs the hole-fill + closing algorithm. Pure: no store, no codec, no
/// commit.
pub(crate) fn compute(solid: &Mask, normalized: &S7Normalized, um_per_px: f64) -> Computed {
    let outer_filled = match normalized.hole_mode {
        HoleMode::Keep => solid.clone(),
        HoleMode::FillAll => fill_holes(solid, usize::MAX),
        HoleMode::FillSmall => {
            let max_area_px = (normalized.max_hole_area_um2 / (um_per_px * um_per_px)).ceil().max(0.0) as usize;
            fill_holes(solid, max_area_px)
        }
    };

    let radius = clampf((normalized.closing_radius_um / um_per_px).round(), 0.0, 128.0) as i64;
    let outer_closed = closing(&outer_filled, radius);
    let outer = outer_closed.union(solid);

    let solid_area = solid.foreground_count();
    let outer_area = outer.foreground_count();
    let porosity = if outer_area > 0 {
        (outer_area - solid_area) as f64 / outer_area as f64
    } else {
        0.0
    };

    let qc_json = json!({
        "closing_radius_px": radius,
        "solid_area_px": solid_area,
        "outer_area_px": outer_area,
        "porosity": porosity,
    });

    Computed {
        solid: solid.clone(),
        outer,
        qc_json,
    }
}

pub(crate) fn execute(
    exec: &Execution,
    run_id: &str,
    lineage: &Lineage,
    params: &serde_json::Value,
) -> Result<crate::model::Artifact> {
    let raw = S7Params::from_json(params)?;
    let normalized = raw.normalize()?;

    let input = lineage.resolve_input(StageId::S7, raw.mask_artifact_id.as_deref())?;
    let idx = file_index(input, "step6_recovered_mask.png")?;
    let solid = load_mask(exec, input, idx)?;

    let um_per_px = lineage.calibration_um_per_px()?;

    let result = compute(&solid, &normalized, um_per_px);

    let solid_bytes = exec.codec.encode_mask(&result.solid)?;
    let outer_bytes = exec.codec.encode_mask(&result.outer)?;

    let params_json = json!({
        "mask_artifact_id": input.id,
        "hole_mode": match normalized.hole_mode {
            HoleMode::FillAll => "fill_all",
            HoleMode::FillSmall => "fill_small",
            HoleMode::Keep => "keep",
        },
        "max_hole_area_um2": normalized.max_hole_area_um2,
        "closing_radius_um": normalized.closing_radius_um,
        "qc": result.qc_json,
    });

    let metrics_bytes = serde_json::to_vec_pretty(&result.qc_json)?;

    commit(
        exec,
        run_id,
        StageId::S7,
        "hole_closing",
        params_json,
        vec![
            OutFile::new("mask_solid.png", solid_bytes, "image/png"),
            OutFile::new("mask_outer.png", outer_bytes, "image/png"),
            OutFile::new("metrics.json", metrics_bytes, "application/json"),
        ],
    )
}

/// Fills background components (4-connected) that don't touch the image
/// border and whose area is at most `max_area_px`.
fn fill_holes(mask: &Mask, max_area_px: usize) -> Mask {
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
