//! Stage 1 — Calibration: crop the scale-bar region and record µm/px.

use super::{commit, Execution, OutFile};
use crate::kernels::GrayImage;
use crate::params::S1Params;
use crate::resolver::Lineage;
use crate::{ParticleError, Result, StageId};
use serde_json::json;

pub(crate) fn execute(
    exec: &Execution,
    run_id: &str,
    _lineage: &Lineage,
    params: &serde_json::Value,
) -> Result<crate::model::Artifact> {
    let parsed = S1Params::from_json(params)?;

    let run = exec.runs.get(run_id)?;
    let image = exec.images.get(&run.image_id)?;
    let bytes = exec.images.read_original(&image)?;
    let source = exec.codec.decode_gray(&bytes)?;

    if parsed.crop_bottom_px as usize >= source.height {
        return Err(ParticleError::invalid_input(
            "crop_bottom_px는 이미지 높이보다 작아야 합니다.",
        ));
    }
    let cropped_height = source.height - parsed.crop_bottom_px as usize;
    let cropped = crop_bottom(&source, cropped_height);
    let preview_bytes = exec.codec.encode_gray(&cropped)?;

    let um_per_px = parsed.um_per_px.unwrap(); // validated non-empty by from_json

    let calibration_json = json!({
        "crop_bottom_px": parsed.crop_bottom_px,
        "um_per_px": um_per_px,
        "measurement": parsed.measurement.as_ref().map(|m| json!({
            "ax": m.ax, "ay": m.ay, "bx": m.bx, "by": m.by,
            "pixel_distance": m.pixel_distance, "real_um": m.real_um,
        })),
        "preview_height": cropped_height,
        "preview_width": cropped.width,
    });

    commit(
        exec,
        run_id,
        StageId::S1,
        "calibration",
        calibration_json,
        vec![
            OutFile::new("step1_preview.png", preview_bytes, "image/png"),
            OutFile::new(
                "calibration.json",
                serde_json::to_vec_pretty(&json!({
                    "um_per_px": um_per_px,
                    "crop_bottom_px": parsed.crop_bottom_px,
                }))?,
                "application/json",
            ),
        ],
    )
}

fn crop_bottom(source: &GrayImage, height: usize) -> GrayImage {
    let mut out = GrayImage::new(source.width, height);
    for y in 0..height {
        for x in 0..source.width {
            out.set(x, y, source.get(x as i64, y as i64));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ImageRecord;
    use crate::stages::test_support::FakeCodec;
    use crate::store::fs::FsStore;
    use crate::store::{ArtifactStore, ImageRepository, RunRepository};
    use tempfile::TempDir;

    #[test]
    fn crop_bottom_px_equal_to_height_fails() {
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
                height: 10,
                storage_path: "img1/original/x.png".into(),
                created_at: "2026-01-01T00:00:00Z".into(),
            })
            .unwrap();
        let fixture = crate::stages::test_support::gray_bytes(&codec, &GrayImage::filled(4, 10, 128));
        store.write_original("img1", "x.png", &fixture).unwrap();
        RunRepository::insert(
            &store,
            crate::model::Run {
                id: "run1".into(),
                image_id: "img1".into(),
                name: None,
                created_at: "2026-01-01T00:00:00Z".into(),
            },
        )
        .unwrap();

        let bad = serde_json::json!({"crop_bottom_px": 10, "um_per_px": 0.5});
        let err = execute(&exec, "run1", &Lineage::build(&[]), &bad).unwrap_err();
        assert!(matches!(err, ParticleError::InvalidInput { .. }));

        let good = serde_json::json!({"crop_bottom_px": 9, "um_per_px": 0.5});
        let artifact = execute(&exec, "run1", &Lineage::build(&[]), &good).unwrap();
        assert_eq!(artifact.params["preview_height"], 1);
    }
}
