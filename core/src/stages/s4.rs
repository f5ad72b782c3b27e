//! Stage 4 — Binarization: simple (single Otsu-offset threshold) or
//! structure-based (separate seed/candidate thresholds gated by gradient or
//! local-contrast) segmentation, followed by geodesic growth, small-area
//! removal, and exclude-mask subtraction.
//!
//! [`compute`] is the pure algorithm shared by [`execute`] and the Step-4
//! preview renderer (`crate::preview`).

use super::{commit, file_index, load_gray, load_mask, Execution, OutFile};
use crate::kernels::blur::gaussian_blur;
use crate::kernels::components::geodesic_reconstruct;
use crate::kernels::components::remove_small_components;
use crate::kernels::otsu::otsu_threshold;
use crate::kernels::sobel::sobel_magnitude;
use crate::kernels::{clampf, GrayImage, Mask};
use crate::params::{BinarizeMode, S4Normalized, S4Params};
use crate::resolver::Lineage;
use crate::{Result, StageId};
use serde_json::json;

pub(crate) struct Computed {
    pub mask: Mask,
    pub qc_json: serde_json::Value,
}

/// Runs the binarization algorithm. Pure: no store, no codec, no commit.
pub(crate) fn compute(
    source: &GrayImage,
    normalized: &S4Normalized,
    um_per_px: f64,
    exclude_mask: Option<&Mask>,
) -> Computed {
    let otsu = otsu_threshold(source) as f64;
    let sensitivity_shift = (50.0 - normalized.seed_sensitivity) / 50.0;

    let (seed, candidate, detail) = match normalized.mode {
        BinarizeMode::Simple => {
            let threshold = clampf(otsu + sensitivity_shift * 22.0, 0.0, 255.0);
            let mask = threshold_mask(source, threshold);
            (
                mask.clone(),
                mask,
                json!({"mode": "simple", "otsu": otsu, "threshold": threshold}),
            )
        }
        BinarizeMode::Structure => {
            let seed_threshold = clampf(otsu + sensitivity_shift * 26.0, 0.0, 255.0);
            let candidate_threshold = clampf(otsu + sensitivity_shift * 34.0, 0.0, 255.0);
            let sigma = 0.45 * normalized.structure_scale_px;
            let blurred = gaussian_blur(source, sigma);
            let gradient = sobel_magnitude(source);

            let mut candidate = Mask::new(source.width, source.height);
            let mut seed = Mask::new(source.width, source.height);
            for i in 0..source.data.len() {
                let value = source.data[i] as f64;
                let local_contrast = (value - blurred.data[i] as f64).abs();
                let is_candidate = value > candidate_threshold
                    && (gradient.data[i] as f64 > normalized.gradient_threshold
                        || local_contrast > normalized.contrast_threshold);
                candidate.data[i] = is_candidate as u8;
                seed.data[i] = (is_candidate && value > seed_threshold) as u8;
            }
            (
                seed,
                candidate,
                json!({
                    "mode": "structure",
                    "otsu": otsu,
                    "seed_threshold": seed_threshold,
                    "candidate_threshold": candidate_threshold,
                    "gradient_threshold": normalized.gradient_threshold,
                    "contrast_threshold": normalized.contrast_threshold,
                    "structure_scale_px": normalized.structure_scale_px,
                }),
            )
        }
    };

    let grown = geodesic_reconstruct(&seed, &candidate);

    let min_pixels = (normalized.min_area_um2 / (um_per_px * um_per_px)).ceil().max(0.0) as usize;
    let cleaned = remove_small_components(&grown, min_pixels);

    let excluded = match exclude_mask {
        Some(exclude_mask) => cleaned.subtract(exclude_mask),
        None => cleaned,
    };

    let foreground_ratio = excluded.foreground_count() as f64 / (excluded.width * excluded.height).max(1) as f64;

    let qc_json = json!({
        "foreground_ratio": foreground_ratio,
        "min_area_px": min_pixels,
        "detail": detail,
    });

    Computed { mask: excluded, qc_json }
}

pub(crate) fn execute(
    exec: &Execution,
    run_id: &str,
    lineage: &Lineage,
    params: &serde_json::Value,
) -> Result<crate::model::Artifact> {
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

    let result = compute(&source, &normalized, um_per_px, exclude_mask.as_ref());

    let mask_bytes = exec.codec.encode_mask(&result.mask)?;

    let params_json = json!({
        "input_artifact_id": input.id,
        "mode": match normalized.mode { BinarizeMode::Simple => "simple", BinarizeMode::Structure => "structure" },
        "seed_sensitivity": normalized.seed_sensitivity,
        "min_area_um2": normalized.min_area_um2,
        "gradient_threshold": normalized.gradient_threshold,
        "contrast_threshold": normalized.contrast_threshold,
        "structure_scale_px": normalized.structure_scale_px,
        "qc": result.qc_json,
    });

    let params_file_bytes = serde_json::to_vec_pretty(&params_json)?;
    let qc_file_bytes = serde_json::to_vec_pretty(&result.qc_json)?;

    commit(
        exec,
        run_id,
        StageId::S4,
        "binarization",
        params_json,
        vec![
            OutFile::new("step4_mask.png", mask_bytes, "image/png"),
            OutFile::new("params.json", params_file_bytes, "application/json"),
            OutFile::new("qc.json", qc_file_bytes, "application/json"),
        ],
    )
}

fn threshold_mask(image: &GrayImage, threshold: f64) -> Mask {
    let mut mask = Mask::new(image.width, image.height);
    for i in 0..image.data.len() {
        mask.data[i] = (image.data[i] as f64 >= threshold) as u8;
    }
    mask
}
