//! Stage 3 — Denoise: bilateral or NLM approximation, edge-preserving
//! composite against the source, optional exclude-mask passthrough, and a
//! noise/edge QC report. Neither denoise method is a C1 kernel in its own
//! right; both are orchestration over the blur/median/Sobel kernels.
//!
//! [`compute`] is the pure algorithm shared by [`execute`] and the Step-3
//! preview renderer (`crate::preview`); it never touches the artifact store.

use super::{commit, file_index, load_gray, Execution, OutFile};
use crate::kernels::blur::{box_blur, gaussian_blur};
use crate::kernels::laplacian::laplacian_variance;
use crate::kernels::morphology::median_filter;
use crate::kernels::sobel::sobel_magnitude;
use crate::kernels::{clampf, GrayImage, Mask};
use crate::params::{DenoiseMethod, QualityMode, S3Normalized, S3Params};
use crate::resolver::Lineage;
use crate::{ParticleError, Result, StageId};
use serde_json::json;

/// The result of running the denoise algorithm, before encoding to bytes or
/// committing: the final image, the exclude mask actually applied, and the
/// method/QC JSON fragments that feed into both the executor's and the
/// preview renderer's params.
pub(crate) struct Computed {
    pub final_image: GrayImage,
    pub exclude_mask: Mask,
    pub qc_json: serde_json::Value,
}

/// Runs the denoise algorithm and QC computation. Pure: no store, no codec,
/// no commit. `exclude_mask_base64` is decoded by the caller (it needs the
/// codec) and passed in already as a `Mask`, or `None` for an all-clear mask.
pub(crate) fn compute(
    source: &GrayImage,
    normalized: &S3Normalized,
    exclude_mask: Option<Mask>,
) -> Result<Computed> {
    let ratio = normalized.strength / 100.0;
    let edge = normalized.edge_protect / 100.0;
    let accurate = normalized.quality_mode == QualityMode::Accurate;

    let (filtered, method_qc) = match normalized.method {
        DenoiseMethod::Bilateral => {
            let sigma_space = clampf(1.4 + ratio * 7.2, 1.0, 8.5) * (1.0 - edge * 0.25);
            let sigma_color = clampf(10.0 + ratio * 96.0, 4.0, 110.0) * (1.0 - edge * 0.72);
            let radius = clampf(
                (1.8 * sigma_space).round() + if accurate { 1.0 } else { 0.0 },
                1.0,
                7.0,
            );
            let blurred = gaussian_blur(source, sigma_space);
            (
                blurred,
                json!({"method": "bilateral", "sigma_space": sigma_space, "sigma_color": sigma_color, "radius": radius}),
            )
        }
        DenoiseMethod::Nlm => {
            let h = clampf(2.0 + ratio * 30.0, 1.0, 24.0) * (1.0 - edge * 0.75);
            let patch_radius: i64 = if accurate { 2 } else { 1 };
            let median_radius = 1 + clampf((h / 8.0).round(), 0.0, 3.0) as i64;
            let alpha = clampf(h / 24.0, 0.08, 0.88);
            let median = median_filter(source, median_radius);
            let boxed = box_blur(source, patch_radius);
            let blended = blend(&median, &boxed, alpha);
            (
                blended,
                json!({"method": "nlm", "h": h, "patch_radius": patch_radius, "median_radius": median_radius, "alpha": alpha}),
            )
        }
    };

    let composite = edge_preserving_composite(source, &filtered, normalized.edge_protect);

    let exclude_mask = exclude_mask.unwrap_or_else(|| Mask::new(source.width, source.height));
    if exclude_mask.width != source.width || exclude_mask.height != source.height {
        return Err(ParticleError::invalid_input(
            "exclude_mask 크기가 소스 이미지와 일치하지 않습니다.",
        ));
    }

    let final_image = apply_exclude_mask(source, &composite, &exclude_mask);

    let var_before = laplacian_variance(source);
    let var_after = laplacian_variance(&final_image);
    let noise_reduction_pct = if var_before > 0.0 {
        clampf((var_before - var_after) / var_before * 100.0, -100.0, 100.0)
    } else {
        0.0
    };

    let sobel_before = sobel_magnitude(source).mean();
    let sobel_after = sobel_magnitude(&final_image).mean();
    let edge_preserve_pct = if sobel_before > 0.0 {
        clampf(sobel_after / sobel_before * 100.0, 0.0, 200.0)
    } else {
        100.0
    };

    let qc_json = json!({
        "noise_reduction_pct": noise_reduction_pct,
        "noise_reduction_label": bucket_label(noise_reduction_pct),
        "edge_preserve_pct": edge_preserve_pct,
        "edge_preserve_label": bucket_label(edge_preserve_pct),
        "method": method_qc,
    });

    Ok(Computed {
        final_image,
        exclude_mask,
        qc_json,
    })
}

/// Decodes `raw.exclude_mask_base64` (if present) using `codec`.
fn decode_exclude_mask(exec: &Execution, raw: &S3Params) -> Result<Option<Mask>> {
    match &raw.exclude_mask_base64 {
        Some(b64) => {
            use base64::Engine;
            let bytes = base64::engine::general_purpose::STANDARD.decode(b64)?;
            Ok(Some(exec.codec.decode_mask(&bytes)?))
        }
        None => Ok(None),
    }
}

pub(crate) fn execute(
    exec: &Execution,
    run_id: &str,
    lineage: &Lineage,
    params: &serde_json::Value,
) -> Result<crate::model::Artifact> {
    let raw = S3Params::from_json(params)?;
    raw.validate_exclude_roi()?;
    let normalized = raw.normalize()?;

    let explicit = params.get("input_artifact_id").and_then(|v| v.as_str());
    let input = lineage.resolve_input(StageId::S3, explicit)?;
    let idx = file_index(input, "step2_preview.png")?;
    let source = load_gray(exec, input, idx)?;

    let exclude_mask = decode_exclude_mask(exec, &raw)?;
    let result = compute(&source, &normalized, exclude_mask)?;

    let denoised_bytes = exec.codec.encode_gray(&result.final_image)?;
    let mask_bytes = exec.codec.encode_mask(&result.exclude_mask)?;

    let params_json = json!({
        "input_artifact_id": input.id,
        "method": match normalized.method { DenoiseMethod::Bilateral => "bilateral", DenoiseMethod::Nlm => "nlm" },
        "quality_mode": match normalized.quality_mode { QualityMode::Fast => "fast", QualityMode::Accurate => "accurate" },
        "strength": normalized.strength,
        "edge_protect": normalized.edge_protect,
        "exclude_roi": raw.exclude_roi,
        "qc": result.qc_json,
    });

    commit(
        exec,
        run_id,
        StageId::S3,
        "denoise",
        params_json,
        vec![
            OutFile::new("step3_denoised.png", denoised_bytes, "image/png"),
            OutFile::new("step3_exclude_mask.png", mask_bytes, "image/png"),
            OutFile::new(
                "qc.json",
                serde_json::to_vec_pretty(&result.qc_json)?,
                "application/json",
            ),
        ],
    )
}

fn blend(a: &GrayImage, b: &GrayImage, alpha: f64) -> GrayImage {
    let mut out = GrayImage::new(a.width, a.height);
    for i in 0..a.data.len() {
        let v = a.data[i] as f64 * alpha + b.data[i] as f64 * (1.0 - alpha);
        out.data[i] = v.round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Keeps more of the original pixel wherever local edge strength (Sobel
/// magnitude on the source) is high, scaled by `edge_protect` (0..100).
fn edge_preserving_composite(source: &GrayImage, filtered: &GrayImage, edge_protect: f64) -> GrayImage {
    let edges = sobel_magnitude(source);
    let edge_max = edges.data.iter().cloned().max().unwrap_or(1).max(1) as f64;
    let mut out = GrayImage::new(source.width, source.height);
    for i in 0..source.data.len() {
        let edge_strength = edges.data[i] as f64 / edge_max;
        let keep_original = clampf(edge_strength * (edge_protect / 100.0) * 1.5, 0.0, 1.0);
        let v = filtered.data[i] as f64 * (1.0 - keep_original) + source.data[i] as f64 * keep_original;
        out.data[i] = v.round().clamp(0.0, 255.0) as u8;
    }
    out
}

fn apply_exclude_mask(source: &GrayImage, filtered: &GrayImage, mask: &Mask) -> GrayImage {
    let mut out = filtered.clone();
    for i in 0..out.data.len() {
        if mask.data[i] != 0 {
            out.data[i] = source.data[i];
        }
    }
    out
}

fn bucket_label(pct: f64) -> &'static str {
    if pct >= 60.0 {
        "high"
    } else if pct >= 25.0 {
        "moderate"
    } else {
        "low"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ImageRecord, Run};
    use crate::stages::test_support::FakeCodec;
    use crate::store::fs::FsStore;
    use crate::store::{ArtifactStore, ImageRepository, RunRepository};
    use tempfile::TempDir;

    fn setup(store: &FsStore, width: usize, height: usize) {
        store
            .insert(ImageRecord {
                id: "img1".into(),
                filename: "x.png".into(),
                content_type: "image/png".into(),
                width: width as u32,
                height: height as u32,
                storage_path: "img1/original/x.png".into(),
                created_at: "2026-01-01T00:00:00Z".into(),
            })
            .unwrap();
        RunRepository::insert(
            store,
            Run {
                id: "run1".into(),
                image_id: "img1".into(),
                name: None,
                created_at: "2026-01-01T00:00:00Z".into(),
            },
        )
        .unwrap();
    }

    fn commit_step2(store: &FsStore, codec: &FakeCodec, image: &GrayImage) -> crate::model::Artifact {
        let bytes = codec.encode_gray(image).unwrap();
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
    fn zero_strength_full_edge_protect_preserves_variance() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        let codec = FakeCodec;
        setup(&store, 20, 20);

        let mut source = GrayImage::new(20, 20);
        for y in 0..20 {
            for x in 0..20 {
                source.set(x, y, (((x + y) * 13) % 255) as u8);
            }
        }
        let s2 = commit_step2(&store, &codec, &source);
        let artifacts = vec![s2];
        let lineage = Lineage::build(&artifacts);

        let exec = Execution { store: &store, codec: &codec, images: &store, runs: &store };
        let out = execute(
            &exec,
            "run1",
            &lineage,
            &json!({"strength": 0.0, "edge_protect": 100.0}),
        )
        .unwrap();

        let noise_reduction = out.params["qc"]["noise_reduction_pct"].as_f64().unwrap();
        assert!(noise_reduction.abs() < 5.0, "got {noise_reduction}");
    }

    #[test]
    fn downscale_then_upscale_preserves_dimensions() {
        let image = GrayImage::filled(400, 300, 100);
        let (down, scale) = crate::kernels::downscale_longest_edge(&image, 200);
        assert!(down.width <= 200 && down.height <= 200);
        assert!(scale < 1.0);
        let up = crate::kernels::upscale_to(&down, 400, 300);
        assert_eq!((up.width, up.height), (400, 300));
    }
}
