//! Stage 6 — Morphological recovery: grows the Step-5 mask outward into
//! background pixels that look like the same material (intensity within
//! k·σ of the foreground mean, low Sobel gradient), bounded by a µm
//! expansion budget, then optionally fills small holes and drops debris.
//!
//! [`compute`] is the pure algorithm shared by [`execute`] and the Step-6
//! preview renderer (`crate::preview`).

use super::{commit, fill_enclosed_holes, file_index, load_gray, load_mask, Execution, OutFile};
use crate::kernels::clampf;
use crate::kernels::components::remove_small_components;
use crate::kernels::distance::city_block_distance_outside;
use crate::kernels::sobel::{mean_magnitude_in_mask, sobel_magnitude};
use crate::kernels::{GrayImage, Mask};
use crate::params::{S6Normalized, S6Params};
use crate::resolver::Lineage;
use crate::{ParticleError, Result, StageId};
use serde_json::json;

pub(crate) struct Computed {
    pub mask: Mask,
    pub qc_json: serde_json::Value,
}

/// Runs the morphological-recovery algorithm. Pure: no store, no codec, no
/// commit.
pub(crate) fn compute(
    source: &GrayImage,
    mask: &Mask,
    normalized: &S6Normalized,
    um_per_px: f64,
) -> Result<Computed> {
    let foreground: Vec<f64> = source
        .data
        .iter()
        .zip(mask.data.iter())
        .filter(|(_, &m)| m != 0)
        .map(|(&v, _)| v as f64)
        .collect();
    if foreground.is_empty() {
        return Err(ParticleError::invalid_input(
            "마스크에 전경 픽셀이 없어 형태학적 복원을 수행할 수 없습니다.",
        ));
    }
    let mu = foreground.iter().sum::<f64>() / foreground.len() as f64;
    let variance = foreground.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / foreground.len() as f64;
    let sigma = variance.sqrt();

    let sens = normalized.expand_sensitivity / 100.0;
    let edge = normalized.edge_sensitivity / 100.0;
    let k_sigma = clampf(2.3 - sens * 1.8, 0.5, 2.3);
    let intensity_threshold = clampf(mu - k_sigma * sigma, 0.0, 255.0);

    let mean_gradient = mean_magnitude_in_mask(source, mask);
    let grad_max = clampf(mean_gradient * (2.2 - edge * 1.4) + (18.0 - edge * 10.0), 4.0, 220.0);

    let max_expand_px = clampf((normalized.max_expand_um / um_per_px).round(), 0.0, 512.0) as u32;
    let dist_outside = city_block_distance_outside(mask);
    let sobel = sobel_magnitude(source);

    let mut grown = mask.clone();
    for i in 0..grown.data.len() {
        if mask.data[i] != 0 {
            continue;
        }
        let d = dist_outside[i];
        if d == 0 || d > max_expand_px {
            continue;
        }
        if source.data[i] as f64 >= intensity_threshold && sobel.data[i] as f64 <= grad_max {
            grown.data[i] = 1;
        }
    }

    if normalized.fill_holes {
        let max_hole_area = clampf(((max_expand_px + 1) as f64).powi(2) * 0.4, 4.0, 4000.0) as usize;
        grown = fill_enclosed_holes(&grown, max_hole_area);
    }

    let min_component = if max_expand_px <= 2 {
        1
    } else {
        clampf((max_expand_px as f64 * 0.8).round(), 1.0, 36.0) as usize
    };
    let cleaned = remove_small_components(&grown, min_component);

    let qc_json = json!({
        "mu": mu,
        "sigma": sigma,
        "k_sigma": k_sigma,
        "intensity_threshold": intensity_threshold,
        "grad_max": grad_max,
        "max_expand_px": max_expand_px,
        "foreground_ratio": cleaned.foreground_count() as f64 / cleaned.data.len().max(1) as f64,
    });

    Ok(Computed { mask: cleaned, qc_json })
}

pub(crate) fn execute(
    exec: &Execution,
    run_id: &str,
    lineage: &Lineage,
    params: &serde_json::Value,
) -> Result<crate::model::Artifact> {
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

    let result = compute(&source, &mask, &normalized, um_per_px)?;
    let mask_bytes = exec.codec.encode_mask(&result.mask)?;

    let params_json = json!({
        "mask_artifact_id": input.id,
        "expand_sensitivity": normalized.expand_sensitivity,
        "max_expand_um": normalized.max_expand_um,
        "edge_sensitivity": normalized.edge_sensitivity,
        "fill_holes": normalized.fill_holes,
        "qc": result.qc_json,
    });
    let params_file_bytes = serde_json::to_vec_pretty(&params_json)?;
    let qc_file_bytes = serde_json::to_vec_pretty(&result.qc_json)?;

    commit(
        exec,
        run_id,
        StageId::S6,
        "morphological_recovery",
        params_json,
        vec![
            OutFile::new("step6_recovered_mask.png", mask_bytes, "image/png"),
            OutFile::new("params.json", params_file_bytes, "application/json"),
            OutFile::new("qc.json", qc_file_bytes, "application/json"),
        ],
    )
}
