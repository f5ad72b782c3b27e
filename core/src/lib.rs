//! # particlelab-core
//!
//! Core library for a versioned, reproducible microscopy particle-segmentation
//! pipeline. A user uploads a grayscale microscopy image, then advances through
//! a fixed ordered set of stages; each stage consumes artifacts produced by
//! earlier stages and emits a new, immutable, versioned artifact.
//!
//! ## Architecture
//!
//! - **kernels** — pixel-level algorithms (Otsu, Sobel, CLAHE, connected
//!   components, distance transform, thinning, contour tracing, Dijkstra,
//!   watershed). Pure, deterministic, side-effect-free.
//! - **model** — the three persisted entities (`Image`, `Run`, `Artifact`).
//! - **store** — the versioned artifact store contract and a filesystem-backed
//!   implementation.
//! - **resolver** — the stage prerequisite graph and input-artifact resolution.
//! - **params** — per-stage parameter schemas, clamps, and localized aliases.
//! - **stages** — the ten stage executors (S1–S10), orchestrating kernels.
//! - **preview** — side-effect-free dry-run variants of the executors.
//!
//! HTTP transport, SQL persistence, raw filesystem primitives, and the image
//! codec are external collaborators; this crate only defines the traits they
//! must satisfy and never binds to a concrete server or database.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

pub mod codec;
pub mod config;
pub mod kernels;
pub mod model;
pub mod params;
pub mod preview;
pub mod resolver;
pub mod stages;
pub mod store;

pub use codec::ImageCodec;
pub use config::Settings;
pub use model::{Artifact, ImageRecord, Run, StageId};

/// Standard result type for all particlelab operations.
pub type Result<T> = std::result::Result<T, ParticleError>;

/// RFC3339-formatted timestamp string, used throughout for `created_at`/`exported_at`.
pub type Timestamp = String;

/// Formats the current instant as RFC3339, mapping formatting failure to `internal`
/// (this should never happen for a valid `OffsetDateTime`).
pub fn now_rfc3339() -> Result<Timestamp> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|e| ParticleError::Internal {
            message: format!("failed to format timestamp: {e}"),
        })
}

/// Generic wrapper for operation results that includes timing metadata, used by
/// the CLI to report stage-execute/preview timing consistently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResponse<T> {
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    pub duration_ms: u64,
    pub data: T,
}

impl<T> OperationResponse<T> {
    /// Builds a response from two instants, automatically computing `duration_ms`.
    ///
    /// Returns `ParticleError::Internal` if RFC3339 formatting fails (should never
    /// happen with valid `OffsetDateTime` values).
    pub fn new(data: T, started_at: OffsetDateTime, finished_at: OffsetDateTime) -> Result<Self> {
        let duration_ms = (finished_at - started_at).whole_milliseconds().max(0) as u64;

        let started_at_str = started_at
            .format(&time::format_description::well_known::Rfc3339)
            .map_err(|e| ParticleError::Internal {
                message: format!("failed to format started_at: {e}"),
            })?;
        let finished_at_str = finished_at
            .format(&time::format_description::well_known::Rfc3339)
            .map_err(|e| ParticleError::Internal {
                message: format!("failed to format finished_at: {e}"),
            })?;

        Ok(Self {
            started_at: started_at_str,
            finished_at: finished_at_str,
            duration_ms,
            data,
        })
    }
}

/// Structured error type for all particlelab operations.
///
/// Maps to the error taxonomy of the stage pipeline:
///
/// - `not_found` (404) — entity missing (image, run, artifact, file on disk).
/// - `invalid_input` (422) — schema violation, enum violation, bad base64, size
///   mismatch, non-binary mask, param out of hard bound.
/// - `prerequisite_unmet` (409) — required predecessor stage has no artifact, or
///   µm/px unreadable.
/// - `conflict` (409) — concurrent version collision.
/// - `internal` (500) — unexpected kernel or I/O failure.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParticleError {
    #[serde(rename = "not_found")]
    NotFound { message: String },
    #[serde(rename = "invalid_input")]
    InvalidInput { message: String },
    #[serde(rename = "prerequisite_unmet")]
    PrerequisiteUnmet { message: String },
    #[serde(rename = "conflict")]
    Conflict { message: String },
    #[serde(rename = "internal")]
    Internal { message: String },
}

impl fmt::Display for ParticleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParticleError::NotFound { message } => write!(f, "not found: {message}"),
            ParticleError::InvalidInput { message } => write!(f, "invalid input: {message}"),
            ParticleError::PrerequisiteUnmet { message } => {
                write!(f, "prerequisite unmet: {message}")
            }
            ParticleError::Conflict { message } => write!(f, "conflict: {message}"),
            ParticleError::Internal { message } => write!(f, "internal error: {message}"),
        }
    }
}

impl std::error::Error for ParticleError {}

impl From<std::io::Error> for ParticleError {
    fn from(err: std::io::Error) -> Self {
        ParticleError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ParticleError {
    fn from(err: serde_json::Error) -> Self {
        ParticleError::InvalidInput {
            message: format!("JSON error: {err}"),
        }
    }
}

impl From<base64::DecodeError> for ParticleError {
    fn from(err: base64::DecodeError) -> Self {
        ParticleError::InvalidInput {
            message: format!("base64 error: {err}"),
        }
    }
}

impl ParticleError {
    pub fn not_found(message: impl Into<String>) -> Self {
        ParticleError::NotFound {
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        ParticleError::InvalidInput {
            message: message.into(),
        }
    }

    pub fn prerequisite_unmet(message: impl Into<String>) -> Self {
        ParticleError::PrerequisiteUnmet {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ParticleError::Conflict {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ParticleError::Internal {
            message: message.into(),
        }
    }

    /// HTTP-status-shaped exit code, for CLI process exit and (if fronted by
    /// HTTP) status mapping: 404/422/409/409/500.
    pub fn exit_code(&self) -> i32 {
        match self {
            ParticleError::NotFound { .. } => 404,
            ParticleError::InvalidInput { .. } => 422,
            ParticleError::PrerequisiteUnmet { .. } => 409,
            ParticleError::Conflict { .. } => 409,
            ParticleError::Internal { .. } => 500,
        }
    }
}
