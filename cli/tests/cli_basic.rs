//! Integration tests for the `particlelab` CLI binary: end-to-end exercises
//! of image upload, run creation, stage execute/preview, artifact
//! inspection, and history export/import, each driven against a throwaway
//! `--storage-root` so tests never touch a shared filesystem location.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::TempDir;

/// Writes a flat-gray 8-bit grayscale PNG fixture to `path`, the smallest
/// input the `image upload` / stage-1 calibration path needs to decode.
fn write_test_png(path: &std::path::Path, width: u32, height: u32, value: u8) {
    let file = std::fs::File::create(path).unwrap();
    let mut encoder = png::Encoder::new(std::io::BufWriter::new(file), width, height);
    encoder.set_color(png::ColorType::Grayscale);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header().unwrap();
    writer
        .write_image_data(&vec![value; (width * height) as usize])
        .unwrap();
}

fn particlelab() -> Command {
    Command::cargo_bin("particlelab").unwrap()
}

// ============================================================================
// Help and version
// ============================================================================

#[test]
fn test_help() {
    particlelab()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("particle-segmentation pipeline"));
}

#[test]
fn test_version() {
    particlelab()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("particlelab"));
}

#[test]
fn test_stage_help() {
    particlelab()
        .args(["stage", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Execute or preview a pipeline stage"));
}

// ============================================================================
// Image lifecycle
// ============================================================================

#[test]
fn test_image_upload_list_get_original() {
    let storage = TempDir::new().unwrap();
    let png_path = storage.path().join("sample.png");
    write_test_png(&png_path, 8, 6, 120);

    let upload = particlelab()
        .args(["--storage-root"])
        .arg(storage.path())
        .args(["--json", "image", "upload"])
        .arg(&png_path)
        .output()
        .unwrap();
    assert!(upload.status.success(), "{}", String::from_utf8_lossy(&upload.stderr));
    let uploaded: serde_json::Value = serde_json::from_slice(&upload.stdout).unwrap();
    let image_id = uploaded["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(uploaded["data"]["width"], 8);
    assert_eq!(uploaded["data"]["height"], 6);

    particlelab()
        .arg("--storage-root")
        .arg(storage.path())
        .args(["--json", "image", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains(image_id.as_str()));

    particlelab()
        .arg("--storage-root")
        .arg(storage.path())
        .args(["--json", "image", "get", &image_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"filename\": \"sample.png\""));

    let out_path = storage.path().join("roundtrip.png");
    particlelab()
        .arg("--storage-root")
        .arg(storage.path())
        .args(["--json", "image", "original", &image_id, "--out"])
        .arg(&out_path)
        .assert()
        .success();
    assert!(out_path.exists());
}

#[test]
fn test_image_get_missing_is_not_found() {
    let storage = TempDir::new().unwrap();
    particlelab()
        .arg("--storage-root")
        .arg(storage.path())
        .args(["--json", "image", "get", "img-does-not-exist"])
        .assert()
        .failure()
        .code(404)
        .stderr(predicate::str::contains("not_found"));
}

#[test]
fn test_image_delete_cascades_to_runs() {
    let storage = TempDir::new().unwrap();
    let png_path = storage.path().join("sample.png");
    write_test_png(&png_path, 4, 4, 50);

    let image_id = upload_image(&storage, &png_path);
    let run_id = create_run(&storage, &image_id, None);

    particlelab()
        .arg("--storage-root")
        .arg(storage.path())
        .args(["--json", "image", "delete", &image_id])
        .assert()
        .success();

    particlelab()
        .arg("--storage-root")
        .arg(storage.path())
        .args(["--json", "run", "get", &run_id])
        .assert()
        .failure()
        .code(404);
}

// ============================================================================
// Run lifecycle
// ============================================================================

fn upload_image(storage: &TempDir, png_path: &std::path::Path) -> String {
    let output = particlelab()
        .arg("--storage-root")
        .arg(storage.path())
        .args(["--json", "image", "upload"])
        .arg(png_path)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    value["data"]["id"].as_str().unwrap().to_string()
}

fn create_run(storage: &TempDir, image_id: &str, name: Option<&str>) -> String {
    let mut cmd = particlelab();
    cmd.arg("--storage-root")
        .arg(storage.path())
        .args(["--json", "run", "create", "--image", image_id]);
    if let Some(name) = name {
        cmd.args(["--name", name]);
    }
    let output = cmd.output().unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    value["data"]["id"].as_str().unwrap().to_string()
}

#[test]
fn test_run_create_requires_existing_image() {
    let storage = TempDir::new().unwrap();
    particlelab()
        .arg("--storage-root")
        .arg(storage.path())
        .args(["--json", "run", "create", "--image", "img-missing"])
        .assert()
        .failure()
        .code(404);
}

#[test]
fn test_run_create_list_get() {
    let storage = TempDir::new().unwrap();
    let png_path = storage.path().join("sample.png");
    write_test_png(&png_path, 6, 6, 90);
    let image_id = upload_image(&storage, &png_path);
    let run_id = create_run(&storage, &image_id, Some("trial 1"));

    particlelab()
        .arg("--storage-root")
        .arg(storage.path())
        .args(["--json", "run", "list", "--image", &image_id])
        .assert()
        .success()
        .stdout(predicate::str::contains(run_id.as_str()));

    particlelab()
        .arg("--storage-root")
        .arg(storage.path())
        .args(["--json", "run", "get", &run_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("trial 1"));
}

// ============================================================================
// Stage execution and the prerequisite graph
// ============================================================================

fn execute_stage(storage: &TempDir, run_id: &str, stage: &str, params: &str) -> serde_json::Value {
    let output = particlelab()
        .arg("--storage-root")
        .arg(storage.path())
        .args(["--json", "stage", "execute", run_id, stage, "--params", params])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_stage_execute_without_prerequisite_is_conflict() {
    let storage = TempDir::new().unwrap();
    let png_path = storage.path().join("sample.png");
    write_test_png(&png_path, 10, 10, 100);
    let image_id = upload_image(&storage, &png_path);
    let run_id = create_run(&storage, &image_id, None);

    // Step 2 requires a committed step-1 artifact.
    particlelab()
        .arg("--storage-root")
        .arg(storage.path())
        .args(["--json", "stage", "execute", &run_id, "2", "--params", "{}"])
        .assert()
        .failure()
        .code(409)
        .stderr(predicate::str::contains("prerequisite_unmet"));
}

#[test]
fn test_calibration_round_trip_matches_two_point_measurement() {
    let storage = TempDir::new().unwrap();
    let png_path = storage.path().join("sample.png");
    write_test_png(&png_path, 1024, 768, 100);
    let image_id = upload_image(&storage, &png_path);
    let run_id = create_run(&storage, &image_id, None);

    let params = serde_json::json!({
        "crop_bottom_px": 40,
        "measurement": {
            "ax": 10.0, "ay": 100.0, "bx": 910.0, "by": 100.0,
            "pixel_distance": 900.0, "real_um": 450.0
        }
    })
    .to_string();

    let artifact = execute_stage(&storage, &run_id, "1", &params);
    assert_eq!(artifact["data"]["params"]["um_per_px"], 0.5);
    assert_eq!(artifact["data"]["params"]["preview_height"], 728);
}

#[test]
fn test_stage_preview_leaves_no_artifact_behind() {
    let storage = TempDir::new().unwrap();
    let png_path = storage.path().join("sample.png");
    write_test_png(&png_path, 12, 12, 128);
    let image_id = upload_image(&storage, &png_path);
    let run_id = create_run(&storage, &image_id, None);

    execute_stage(&storage, &run_id, "1", r#"{"crop_bottom_px": 1, "um_per_px": 0.5}"#);
    execute_stage(&storage, &run_id, "2", "{}");
    execute_stage(&storage, &run_id, "3", r#"{"strength": 40, "edge_protect": 20}"#);

    let before = particlelab()
        .arg("--storage-root")
        .arg(storage.path())
        .args(["--json", "artifact", "list", &run_id])
        .output()
        .unwrap();
    let before_json: serde_json::Value = serde_json::from_slice(&before.stdout).unwrap();

    particlelab()
        .arg("--storage-root")
        .arg(storage.path())
        .args(["--json", "stage", "preview", &run_id, "4", "--params", "{}"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"content_type\": \"image/png\""));

    let after = particlelab()
        .arg("--storage-root")
        .arg(storage.path())
        .args(["--json", "artifact", "list", &run_id])
        .output()
        .unwrap();
    let after_json: serde_json::Value = serde_json::from_slice(&after.stdout).unwrap();
    assert_eq!(before_json["data"], after_json["data"], "preview must not commit a new artifact");
}

#[test]
fn test_stage_execute_unknown_stage_id_is_invalid() {
    let storage = TempDir::new().unwrap();
    let png_path = storage.path().join("sample.png");
    write_test_png(&png_path, 8, 8, 77);
    let image_id = upload_image(&storage, &png_path);
    let run_id = create_run(&storage, &image_id, None);

    particlelab()
        .arg("--storage-root")
        .arg(storage.path())
        .args(["--json", "stage", "execute", &run_id, "11", "--params", "{}"])
        .assert()
        .failure()
        .code(422);
}

// ============================================================================
// Artifacts: list/get/file/rename/delete
// ============================================================================

#[test]
fn test_artifact_rename_and_delete() {
    let storage = TempDir::new().unwrap();
    let png_path = storage.path().join("sample.png");
    write_test_png(&png_path, 16, 16, 64);
    let image_id = upload_image(&storage, &png_path);
    let run_id = create_run(&storage, &image_id, None);

    let artifact = execute_stage(&storage, &run_id, "1", r#"{"crop_bottom_px": 2, "um_per_px": 1.0}"#);
    let artifact_id = artifact["data"]["id"].as_str().unwrap().to_string();

    particlelab()
        .arg("--storage-root")
        .arg(storage.path())
        .args(["--json", "artifact", "rename", &artifact_id, "first pass"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"version_name\": \"first pass\""));

    let out_path = storage.path().join("step1_preview.png");
    particlelab()
        .arg("--storage-root")
        .arg(storage.path())
        .args(["--json", "artifact", "file", &artifact_id, "--file-index", "0", "--out"])
        .arg(&out_path)
        .assert()
        .success();
    assert!(out_path.exists());

    particlelab()
        .arg("--storage-root")
        .arg(storage.path())
        .args(["--json", "artifact", "delete", &artifact_id])
        .assert()
        .success();

    particlelab()
        .arg("--storage-root")
        .arg(storage.path())
        .args(["--json", "artifact", "get", &artifact_id])
        .assert()
        .failure()
        .code(404);
}

// ============================================================================
// History export/import round trip
// ============================================================================

#[test]
fn test_history_export_import_round_trip() {
    let storage = TempDir::new().unwrap();
    let png_path = storage.path().join("sample.png");
    write_test_png(&png_path, 20, 20, 110);
    let image_id = upload_image(&storage, &png_path);
    let source_run = create_run(&storage, &image_id, Some("source"));

    execute_stage(&storage, &source_run, "1", r#"{"crop_bottom_px": 2, "um_per_px": 0.8}"#);
    execute_stage(&storage, &source_run, "2", "{}");
    execute_stage(&storage, &source_run, "3", r#"{"strength": 30, "edge_protect": 50}"#);
    execute_stage(&storage, &source_run, "4", r#"{"mode": "simple"}"#);

    let export_path = storage.path().join("history.json");
    particlelab()
        .arg("--storage-root")
        .arg(storage.path())
        .args(["--json", "history", "export", &source_run, "--out"])
        .arg(&export_path)
        .assert()
        .success();
    assert!(export_path.exists());

    let target_run = create_run(&storage, &image_id, Some("target"));
    let import = particlelab()
        .arg("--storage-root")
        .arg(storage.path())
        .args(["--json", "history", "import", &target_run])
        .arg(&export_path)
        .output()
        .unwrap();
    assert!(import.status.success(), "{}", String::from_utf8_lossy(&import.stderr));
    let value: serde_json::Value = serde_json::from_slice(&import.stdout).unwrap();
    assert_eq!(value["data"]["imported_count"], 4);

    particlelab()
        .arg("--storage-root")
        .arg(storage.path())
        .args(["--json", "artifact", "list", &target_run])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"stage\": 4"));
}

#[test]
fn test_history_import_rejects_unreadable_file() {
    let storage = TempDir::new().unwrap();
    let png_path = storage.path().join("sample.png");
    write_test_png(&png_path, 4, 4, 10);
    let image_id = upload_image(&storage, &png_path);
    let run_id = create_run(&storage, &image_id, None);

    let mut bogus = std::fs::File::create(storage.path().join("bogus.json")).unwrap();
    writeln!(bogus, "not json").unwrap();

    particlelab()
        .arg("--storage-root")
        .arg(storage.path())
        .args(["--json", "history", "import", &run_id])
        .arg(storage.path().join("bogus.json"))
        .assert()
        .failure()
        .code(422);
}

// ============================================================================
// JSON output shape
// ============================================================================

#[test]
fn test_json_output_envelope_structure() {
    let storage = TempDir::new().unwrap();
    let png_path = storage.path().join("sample.png");
    write_test_png(&png_path, 5, 5, 5);

    let output = particlelab()
        .arg("--storage-root")
        .arg(storage.path())
        .args(["--json", "image", "upload"])
        .arg(&png_path)
        .output()
        .unwrap();

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(json["started_at"].is_string());
    assert!(json["finished_at"].is_string());
    assert!(json["duration_ms"].is_number());
    assert!(json["data"]["id"].is_string());
}
