//! Stage 2 — Intensity adjustment: autocontrast, brightness/contrast,
//! gamma, then optional CLAHE approximation, applied in that order.

use super::{commit, file_index, load_gray, Execution, OutFile};
use crate::kernels::lut::{apply_lut, autocontrast_lut, brightness_contrast_lut, gamma_lut};
use crate::kernels::clahe::clahe_approximate;
use crate::params::S2Params;
use crate::resolver::Lineage;
use crate::{Result, StageId};
use serde_json::json;

pub(crate) fn execute(
    exec: &Execution,
    run_id: &str,
    lineage: &Lineage,
    params: &serde_json::Value,
) -> Result<crate::model::Artifact> {
    let explicit = params.get("input_artifact_id").and_then(|v| v.as_str());
    let input = lineage.resolve_input(StageId::S2, explicit)?;
    let idx = file_index(input, "step1_preview.png")?;
    let source = load_gray(exec, input, idx)?;

    let raw = S2Params::from_json(params)?;
    let normalized = raw.normalize()?;

    let mut image = apply_lut(
        &source,
        &autocontrast_lut(&source, normalized.black_clip_pct, normalized.white_clip_pct),
    );
    image = apply_lut(
        &image,
        &brightness_contrast_lut(normalized.brightness, normalized.contrast_factor),
    );
    image = apply_lut(&image, &gamma_lut(normalized.gamma));
    if normalized.clahe_strength > 0.0 {
        image = clahe_approximate(&image, normalized.clahe_strength, normalized.clahe_tile.to_kernel());
    }

    let preview_bytes = exec.codec.encode_gray(&image)?;

    let params_json = json!({
        "input_artifact_id": input.id,
        "black_clip_pct": normalized.black_clip_pct,
        "white_clip_pct": normalized.white_clip_pct,
        "brightness": normalized.brightness,
        "contrast_factor": normalized.contrast_factor,
        "gamma": normalized.gamma,
        "clahe_strength": normalized.clahe_strength,
    });

    commit(
        exec,
        run_id,
        StageId::S2,
        "intensity",
        params_json,
        vec![OutFile::new("step2_preview.png", preview_bytes, "image/png")],
    )
}
