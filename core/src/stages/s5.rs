//! Stage 5 — Manual edit: accepts a client-edited mask PNG verbatim, after
//! validating it matches the source mask's dimensions and is strictly
//! binary. Emits it unchanged — no pixel logic of its own.

use super::{commit, file_index, load_mask, Execution, OutFile};
use crate::params::S5Params;
use crate::resolver::Lineage;
use crate::{ParticleError, Result, StageId};
use serde_json::json;

pub(crate) fn execute(
    exec: &Execution,
    run_id: &str,
    lineage: &Lineage,
    params: &serde_json::Value,
) -> Result<crate::model::Artifact> {
    let parsed = S5Params::from_json(params)?;
    let brush_mode = parsed.brush_mode()?;
    let brush_size = parsed.brush_size();

    let input = lineage.resolve_input(StageId::S5, parsed.base_mask_artifact_id.as_deref())?;
    let idx = file_index(input, "step4_mask.png")?;
    let source_mask = load_mask(exec, input, idx)?;

    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(parsed.edited_mask_base64.trim())
        .map_err(|e| ParticleError::invalid_input(format!("edited_mask_base64 디코딩 실패: {e}")))?;
    let decoded = exec.codec.decode_gray(&bytes)?;

    if decoded.width != source_mask.width || decoded.height != source_mask.height {
        return Err(ParticleError::invalid_input(
            "편집된 마스크 크기가 원본 마스크와 일치하지 않습니다.",
        ));
    }
    if decoded.data.iter().any(|&v| v != 0 && v != 255) {
        return Err(ParticleError::invalid_input(
            "편집된 마스크는 0 또는 255 값만 포함해야 합니다.",
        ));
    }

    let params_json = json!({
        "base_mask_artifact_id": input.id,
        "brush_mode": match brush_mode {
            crate::params::BrushMode::Delete => "delete",
            crate::params::BrushMode::Restore => "restore",
        },
        "brush_size": brush_size,
    });

    commit(
        exec,
        run_id,
        StageId::S5,
        "manual_edit",
        params_json,
        vec![OutFile::new("step5_mask_edited.png", bytes, "image/png")],
    )
}
