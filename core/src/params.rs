//! Per-stage parameter schemas (C6): strongly-typed records with their own
//! validator, replacing the "dynamic params dictionary" pattern the source
//! service uses. Each `normalize()` clamps numeric fields silently and
//! rejects unknown enum values as `invalid_input` with a Korean-localized
//! message, matching the source service's validation-error wording where it
//! is known; fields not recovered with exact Korean wording fall back to
//! English. Unknown JSON fields are ignored (serde's default behavior for a
//! struct without `deny_unknown_fields`).

use crate::kernels::clahe::ClaheTile;
use crate::{ParticleError, Result};
use serde::Deserialize;
use serde_json::Value;

#[inline]
fn clamp(v: f64, lo: f64, hi: f64) -> f64 {
    if v.is_nan() {
        lo
    } else {
        v.max(lo).min(hi)
    }
}

/// Looks up an ASCII-alias case-insensitively or a Korean literal
/// exact-match, per SPEC_FULL.md 4.6's description of how the source
/// service resolves localized enum aliases.
fn resolve_alias<'a>(raw: &str, table: &[(&'a [&'a str], &'a str)]) -> Option<&'a str> {
    let lowered = raw.to_lowercase();
    for (aliases, canonical) in table {
        if aliases.iter().any(|a| a.eq_ignore_ascii_case(&lowered) || *a == raw) {
            return Some(canonical);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// S1 — Calibration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TwoPointMeasurement {
    pub ax: f64,
    pub ay: f64,
    pub bx: f64,
    pub by: f64,
    pub pixel_distance: f64,
    pub real_um: f64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct S1Params {
    pub crop_bottom_px: u32,
    #[serde(default)]
    pub um_per_px: Option<f64>,
    #[serde(default)]
    pub measurement: Option<TwoPointMeasurement>,
}

impl S1Params {
    pub fn from_json(value: &Value) -> Result<Self> {
        let mut p: S1Params = serde_json::from_value(value.clone())?;
        if let Some(m) = &p.measurement {
            if m.pixel_distance <= 0.0 || m.real_um <= 0.0 {
                return Err(ParticleError::invalid_input(
                    "측정 길이는 0보다 커야 합니다.", // "measurement lengths must be > 0"
                ));
            }
            p.um_per_px = Some(m.real_um / m.pixel_distance);
        }
        match p.um_per_px {
            Some(v) if v > 0.0 => {}
            _ => {
                return Err(ParticleError::invalid_input(
                    "스케일(um_per_px)을 확인할 수 없습니다.", // "scale could not be determined"
                ))
            }
        }
        Ok(p)
    }
}

// ---------------------------------------------------------------------------
// S2 — Intensity adjustment
// ---------------------------------------------------------------------------

fn default_white_clip() -> f64 {
    99.5
}
fn default_black_clip() -> f64 {
    0.5
}
fn default_one() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaheTileParam {
    Auto,
    Small,
    Medium,
    Large,
}

impl Default for ClaheTileParam {
    fn default() -> Self {
        ClaheTileParam::Auto
    }
}

impl ClaheTileParam {
    pub fn parse(raw: &str) -> Result<Self> {
        const TABLE: &[(&[&str], &str)] = &[
            (&["auto", "자동"], "auto"),
            (&["small", "작게"], "small"),
            (&["medium", "보통"], "medium"),
            (&["large", "크게"], "large"),
        ];
        match resolve_alias(raw, TABLE) {
            Some("auto") => Ok(ClaheTileParam::Auto),
            Some("small") => Ok(ClaheTileParam::Small),
            Some("medium") => Ok(ClaheTileParam::Medium),
            Some("large") => Ok(ClaheTileParam::Large),
            _ => Err(ParticleError::invalid_input(format!(
                "알 수 없는 clahe_tile 값: {raw}"
            ))),
        }
    }

    pub fn to_kernel(self) -> ClaheTile {
        match self {
            ClaheTileParam::Auto => ClaheTile::Auto,
            ClaheTileParam::Small => ClaheTile::Small,
            ClaheTileParam::Medium => ClaheTile::Medium,
            ClaheTileParam::Large => ClaheTile::Large,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct S2Params {
    #[serde(default = "default_black_clip")]
    pub black_clip_pct: f64,
    #[serde(default = "default_white_clip")]
    pub white_clip_pct: f64,
    #[serde(default)]
    pub brightness: f64,
    #[serde(default = "default_one")]
    pub contrast_factor: f64,
    #[serde(default = "default_one")]
    pub gamma: f64,
    #[serde(default)]
    pub clahe_strength: f64,
    #[serde(default)]
    pub clahe_tile: Option<String>,
}

impl Default for S2Params {
    fn default() -> Self {
        Self {
            black_clip_pct: default_black_clip(),
            white_clip_pct: default_white_clip(),
            brightness: 0.0,
            contrast_factor: default_one(),
            gamma: default_one(),
            clahe_strength: 0.0,
            clahe_tile: None,
        }
    }
}

pub struct S2Normalized {
    pub black_clip_pct: f64,
    pub white_clip_pct: f64,
    pub brightness: f64,
    pub contrast_factor: f64,
    pub gamma: f64,
    pub clahe_strength: f64,
    pub clahe_tile: ClaheTileParam,
}

impl S2Params {
    pub fn from_json(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Clamps numeric fields and auto-corrects `white_clip_pct` when it does
    /// not exceed `black_clip_pct` (§4.4 S2 invariant).
    pub fn normalize(&self) -> Result<S2Normalized> {
        let black_clip_pct = clamp(self.black_clip_pct, 0.0, 20.0);
        let mut white_clip_pct = clamp(self.white_clip_pct, 80.0, 100.0);
        if white_clip_pct <= black_clip_pct {
            white_clip_pct = (95.0_f64).max(black_clip_pct + 1.0);
        }
        let clahe_tile = match &self.clahe_tile {
            Some(raw) => ClaheTileParam::parse(raw)?,
            None => ClaheTileParam::Auto,
        };
        Ok(S2Normalized {
            black_clip_pct,
            white_clip_pct,
            brightness: clamp(self.brightness, -100.0, 100.0),
            contrast_factor: clamp(self.contrast_factor, 0.2, 3.0),
            gamma: clamp(self.gamma, 0.2, 3.0),
            clahe_strength: clamp(self.clahe_strength, 0.0, 10.0),
            clahe_tile,
        })
    }
}

// ---------------------------------------------------------------------------
// S3 — Denoise
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenoiseMethod {
    Bilateral,
    Nlm,
}

impl DenoiseMethod {
    pub fn parse(raw: &str) -> Result<Self> {
        const TABLE: &[(&[&str], &str)] = &[
            (&["bilateral", "양방향"], "bilateral"),
            (&["nlm", "비지역평균"], "nlm"),
        ];
        match resolve_alias(raw, TABLE) {
            Some("bilateral") => Ok(DenoiseMethod::Bilateral),
            Some("nlm") => Ok(DenoiseMethod::Nlm),
            _ => Err(ParticleError::invalid_input(format!(
                "알 수 없는 denoise method: {raw}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityMode {
    Fast,
    Accurate,
}

impl QualityMode {
    pub fn parse(raw: &str) -> Result<Self> {
        const TABLE: &[(&[&str], &str)] = &[
            (&["fast", "빠름", "(빠름)"], "fast"),
            (&["accurate", "정확", "(정확)"], "accurate"),
        ];
        match resolve_alias(raw, TABLE) {
            Some("fast") => Ok(QualityMode::Fast),
            Some("accurate") => Ok(QualityMode::Accurate),
            _ => Err(ParticleError::invalid_input(format!(
                "알 수 없는 quality_mode 값: {raw}"
            ))),
        }
    }

    pub fn preview_max_edge(self) -> u32 {
        match self {
            QualityMode::Fast => 900,
            QualityMode::Accurate => 1200,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct S3Params {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub quality_mode: Option<String>,
    #[serde(default)]
    pub strength: Option<f64>,
    #[serde(default)]
    pub edge_protect: Option<f64>,
    #[serde(default)]
    pub exclude_mask_base64: Option<String>,
    /// Opaque passthrough: sanitized shape only, never rasterized against
    /// pixels (spec.md §9 Open Question — intentionally unapplied).
    #[serde(default)]
    pub exclude_roi: Option<Value>,
}

pub struct S3Normalized {
    pub method: DenoiseMethod,
    pub quality_mode: QualityMode,
    pub strength: f64,
    pub edge_protect: f64,
}

impl S3Params {
    pub fn from_json(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn normalize(&self) -> Result<S3Normalized> {
        let method = match &self.method {
            Some(raw) => DenoiseMethod::parse(raw)?,
            None => DenoiseMethod::Bilateral,
        };
        let quality_mode = match &self.quality_mode {
            Some(raw) => QualityMode::parse(raw)?,
            None => QualityMode::Fast,
        };
        Ok(S3Normalized {
            method,
            quality_mode,
            strength: clamp(self.strength.unwrap_or(50.0), 0.0, 100.0),
            edge_protect: clamp(self.edge_protect.unwrap_or(50.0), 0.0, 100.0),
        })
    }

    /// Validates `exclude_roi`'s shape (array of tagged rect/polygon/brush
    /// objects) without interpreting it further.
    pub fn validate_exclude_roi(&self) -> Result<()> {
        let Some(roi) = &self.exclude_roi else {
            return Ok(());
        };
        let items = roi.as_array().ok_or_else(|| {
            ParticleError::invalid_input("exclude_roi는 배열이어야 합니다.")
        })?;
        for item in items {
            let kind = item.get("kind").and_then(Value::as_str).ok_or_else(|| {
                ParticleError::invalid_input("exclude_roi 항목에 kind가 없습니다.")
            })?;
            if !matches!(kind, "rect" | "polygon" | "brush") {
                return Err(ParticleError::invalid_input(format!(
                    "알 수 없는 exclude_roi kind: {kind}"
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// S4 — Binarization
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinarizeMode {
    Simple,
    Structure,
}

impl BinarizeMode {
    pub fn parse(raw: &str) -> Result<Self> {
        const TABLE: &[(&[&str], &str)] = &[
            (&["simple", "단순"], "simple"),
            (&["structure", "구조"], "structure"),
        ];
        match resolve_alias(raw, TABLE) {
            Some("simple") => Ok(BinarizeMode::Simple),
            Some("structure") => Ok(BinarizeMode::Structure),
            _ => Err(ParticleError::invalid_input(format!(
                "알 수 없는 binarize mode: {raw}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct S4Params {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub seed_sensitivity: Option<f64>,
    #[serde(default)]
    pub min_area_um2: Option<f64>,
    #[serde(default)]
    pub gradient_threshold: Option<f64>,
    #[serde(default)]
    pub contrast_threshold: Option<f64>,
    #[serde(default)]
    pub structure_scale_px: Option<f64>,
    #[serde(default)]
    pub denoise_artifact_id: Option<String>,
}

pub struct S4Normalized {
    pub mode: BinarizeMode,
    pub seed_sensitivity: f64,
    pub min_area_um2: f64,
    pub gradient_threshold: f64,
    pub contrast_threshold: f64,
    pub structure_scale_px: f64,
}

impl S4Params {
    pub fn from_json(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn normalize(&self) -> Result<S4Normalized> {
        let mode = match &self.mode {
            Some(raw) => BinarizeMode::parse(raw)?,
            None => BinarizeMode::Simple,
        };
        Ok(S4Normalized {
            mode,
            seed_sensitivity: clamp(self.seed_sensitivity.unwrap_or(50.0), 0.0, 100.0),
            min_area_um2: self.min_area_um2.unwrap_or(2.0).max(0.0),
            // Not pinned by the recovered defaults table in SPEC_FULL.md
            // §4.6; engineering defaults, noted in DESIGN.md.
            gradient_threshold: self.gradient_threshold.unwrap_or(30.0).max(0.0),
            contrast_threshold: self.contrast_threshold.unwrap_or(15.0).max(0.0),
            structure_scale_px: self.structure_scale_px.unwrap_or(5.0).max(0.5),
        })
    }
}

// ---------------------------------------------------------------------------
// S5 — Manual edit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrushMode {
    Delete,
    Restore,
}

impl BrushMode {
    pub fn parse(raw: &str) -> Result<Self> {
        const TABLE: &[(&[&str], &str)] = &[
            (&["delete", "erase", "삭제"], "삭제"),
            (&["restore", "복원"], "복원"),
        ];
        match resolve_alias(raw, TABLE) {
            Some("삭제") => Ok(BrushMode::Delete),
            Some("복원") => Ok(BrushMode::Restore),
            _ => Err(ParticleError::invalid_input(format!(
                "알 수 없는 brush_mode 값: {raw}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct S5Params {
    pub edited_mask_base64: String,
    #[serde(default)]
    pub brush_mode: Option<String>,
    #[serde(default)]
    pub brush_size: Option<f64>,
    #[serde(default)]
    pub base_mask_artifact_id: Option<String>,
}

impl S5Params {
    pub fn from_json(value: &Value) -> Result<Self> {
        let p: S5Params = serde_json::from_value(value.clone())?;
        if p.edited_mask_base64.trim().is_empty() {
            return Err(ParticleError::invalid_input(
                "편집된 마스크 데이터가 비어 있습니다.",
            ));
        }
        Ok(p)
    }

    pub fn brush_mode(&self) -> Result<BrushMode> {
        match &self.brush_mode {
            Some(raw) => BrushMode::parse(raw),
            None => Ok(BrushMode::Restore),
        }
    }

    pub fn brush_size(&self) -> f64 {
        self.brush_size.unwrap_or(10.0).max(1.0)
    }
}

// ---------------------------------------------------------------------------
// S6 — Morphological recovery
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct S6Params {
    #[serde(default)]
    pub expand_sensitivity: Option<f64>,
    #[serde(default)]
    pub max_expand_um: Option<f64>,
    #[serde(default)]
    pub edge_sensitivity: Option<f64>,
    #[serde(default)]
    pub fill_holes: Option<bool>,
    #[serde(default)]
    pub mask_artifact_id: Option<String>,
}

pub struct S6Normalized {
    pub expand_sensitivity: f64,
    pub max_expand_um: f64,
    pub edge_sensitivity: f64,
    pub fill_holes: bool,
}

impl S6Params {
    pub fn from_json(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn normalize(&self) -> S6Normalized {
        S6Normalized {
            expand_sensitivity: clamp(self.expand_sensitivity.unwrap_or(50.0), 0.0, 100.0),
            max_expand_um: self.max_expand_um.unwrap_or(2.0).max(0.0),
            edge_sensitivity: clamp(self.edge_sensitivity.unwrap_or(50.0), 0.0, 100.0),
            fill_holes: self.fill_holes.unwrap_or(false),
        }
    }
}

// ---------------------------------------------------------------------------
// S7 — Hole handling + closing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoleMode {
    FillAll,
    FillSmall,
    Keep,
}

impl HoleMode {
    pub fn parse(raw: &str) -> Result<Self> {
        const TABLE: &[(&[&str], &str)] = &[
            (
                &["fill_all", "모든 공극 채우기(추천)", "모든 공극 채우기"],
                "fill_all",
            ),
            (&["fill_small", "작은 공극만 채우기"], "fill_small"),
            (&["keep", "공극 유지"], "keep"),
        ];
        match resolve_alias(raw, TABLE) {
            Some("fill_all") => Ok(HoleMode::FillAll),
            Some("fill_small") => Ok(HoleMode::FillSmall),
            Some("keep") => Ok(HoleMode::Keep),
            _ => Err(ParticleError::invalid_input(format!(
                "알 수 없는 hole_mode 값: {raw}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct S7Params {
    #[serde(default)]
    pub hole_mode: Option<String>,
    #[serde(default)]
    pub max_hole_area_um2: Option<f64>,
    #[serde(default)]
    pub closing_radius_um: Option<f64>,
    #[serde(default)]
    pub mask_artifact_id: Option<String>,
}

pub struct S7Normalized {
    pub hole_mode: HoleMode,
    pub max_hole_area_um2: f64,
    pub closing_radius_um: f64,
}

impl S7Params {
    pub fn from_json(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn normalize(&self) -> Result<S7Normalized> {
        let hole_mode = match &self.hole_mode {
            Some(raw) => HoleMode::parse(raw)?,
            None => HoleMode::FillAll,
        };
        if hole_mode == HoleMode::FillSmall && self.max_hole_area_um2.is_none() {
            return Err(ParticleError::invalid_input(
                "fill_small 모드에는 max_hole_area_um2가 필요합니다.",
            ));
        }
        Ok(S7Normalized {
            hole_mode,
            max_hole_area_um2: self.max_hole_area_um2.unwrap_or(5.0).max(0.0),
            closing_radius_um: self.closing_radius_um.unwrap_or(0.0).max(0.0),
        })
    }
}

// ---------------------------------------------------------------------------
// S8 — Contour extraction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct S8Params {
    #[serde(default)]
    pub mask_artifact_id: Option<String>,
    #[serde(default)]
    pub pore_artifact_id: Option<String>,
}

impl S8Params {
    pub fn from_json(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }
}

// ---------------------------------------------------------------------------
// S9 — Polygonization
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct S9Params {
    #[serde(default)]
    pub resample_step_px: Option<f64>,
    #[serde(default)]
    pub smooth_level: Option<f64>,
    #[serde(default)]
    pub max_vertex_gap_px: Option<f64>,
    #[serde(default)]
    pub contour_artifact_id: Option<String>,
}

pub struct S9Normalized {
    pub resample_step_px: f64,
    pub smooth_level: f64,
    pub max_vertex_gap_px: f64,
}

impl S9Params {
    pub fn from_json(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn normalize(&self) -> S9Normalized {
        S9Normalized {
            resample_step_px: self.resample_step_px.unwrap_or(3.0).max(0.5),
            smooth_level: clamp(self.smooth_level.unwrap_or(30.0), 0.0, 100.0),
            max_vertex_gap_px: self.max_vertex_gap_px.unwrap_or(8.0).max(0.5),
        }
    }
}

// ---------------------------------------------------------------------------
// S10 — Watershed split
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct S10Params {
    #[serde(default)]
    pub split_strength: Option<f64>,
    #[serde(default)]
    pub min_center_distance_px: Option<f64>,
    #[serde(default)]
    pub min_particle_area: Option<f64>,
    #[serde(default)]
    pub polygon_artifact_id: Option<String>,
    #[serde(default)]
    pub grayscale_artifact_id: Option<String>,
}

pub struct S10Normalized {
    pub split_strength: f64,
    pub min_center_distance_px: f64,
    pub min_particle_area: f64,
}

impl S10Params {
    pub fn from_json(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn normalize(&self) -> S10Normalized {
        S10Normalized {
            split_strength: clamp(self.split_strength.unwrap_or(50.0), 0.0, 100.0),
            min_center_distance_px: self.min_center_distance_px.unwrap_or(8.0).max(1.0),
            min_particle_area: self.min_particle_area.unwrap_or(20.0).max(0.0),
        }
    }
}

// ---------------------------------------------------------------------------
// S45 — auxiliary passthrough
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct S45Params {
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub mask_artifact_id: Option<String>,
}

impl S45Params {
    pub fn from_json(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }
}

/// Which of a stage's multiple preview artifacts a preview call returns
/// (e.g. solid vs outer, denoised vs exclude-mask). No localized alias is
/// observed for this field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewLayer {
    Primary,
    Secondary,
}

impl Default for PreviewLayer {
    fn default() -> Self {
        PreviewLayer::Primary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s2_autocorrects_white_below_black() {
        let params = S2Params {
            black_clip_pct: 10.0,
            white_clip_pct: 5.0,
            ..S2Params::default()
        };
        let n = params.normalize().unwrap();
        assert!(n.white_clip_pct > n.black_clip_pct);
    }

    #[test]
    fn hole_mode_aliases_resolve() {
        assert_eq!(HoleMode::parse("fill_all").unwrap(), HoleMode::FillAll);
        assert_eq!(
            HoleMode::parse("모든 공극 채우기(추천)").unwrap(),
            HoleMode::FillAll
        );
        assert_eq!(HoleMode::parse("공극 유지").unwrap(), HoleMode::Keep);
        assert!(HoleMode::parse("bogus").is_err());
    }

    #[test]
    fn brush_mode_aliases_resolve() {
        assert_eq!(BrushMode::parse("delete").unwrap(), BrushMode::Delete);
        assert_eq!(BrushMode::parse("복원").unwrap(), BrushMode::Restore);
        assert_eq!(BrushMode::parse("RESTORE").unwrap(), BrushMode::Restore);
    }

    #[test]
    fn quality_mode_preview_edge() {
        assert_eq!(QualityMode::Fast.preview_max_edge(), 900);
        assert_eq!(QualityMode::Accurate.preview_max_edge(), 1200);
    }

    #[test]
    fn s1_requires_positive_measurement() {
        let bad = serde_json::json!({
            "crop_bottom_px": 10,
            "measurement": {"ax":0.0,"ay":0.0,"bx":1.0,"by":0.0,"pixel_distance":0.0,"real_um":5.0}
        });
        assert!(S1Params::from_json(&bad).is_err());
    }

    #[test]
    fn s1_derives_scale_from_measurement() {
        let good = serde_json::json!({
            "crop_bottom_px": 10,
            "measurement": {"ax":10.0,"ay":100.0,"bx":910.0,"by":100.0,"pixel_distance":900.0,"real_um":450.0}
        });
        let p = S1Params::from_json(&good).unwrap();
        assert_eq!(p.um_per_px, Some(0.5));
    }

    #[test]
    fn s5_rejects_empty_mask() {
        let bad = serde_json::json!({ "edited_mask_base64": "" });
        assert!(S5Params::from_json(&bad).is_err());
    }

    #[test]
    fn s7_fill_small_requires_area() {
        let params = S7Params {
            hole_mode: Some("fill_small".to_string()),
            ..S7Params::default()
        };
        assert!(params.normalize().is_err());
    }
}
