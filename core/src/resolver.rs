//! Stage resolver (C3): the prerequisite graph, input-artifact resolution,
//! and calibration lookup.
//!
//! Per spec REDESIGN FLAGS, the prerequisite graph is a tagged variant (the
//! `StageId` newtype) plus a static adjacency function, replacing an ad-hoc
//! graph encoded in request-handling code. Deep reference walks (S6/S7/S8
//! following `input_artifact_id` / `base_mask_artifact_id` back through
//! history) are replaced by a small in-memory lineage index built once per
//! request from this run's artifact rows, keyed by artifact id.

use crate::model::{Artifact, StageId};
use crate::{ParticleError, Result};
use std::collections::HashMap;

/// `stage -> required predecessor`, per spec.md §4.3. Stages 1 and 8 have no
/// entry (always runnable).
pub fn prerequisite_of(stage: StageId) -> Option<StageId> {
    match stage.value() {
        2 => Some(StageId::S1),
        3 => Some(StageId::S2),
        4 => Some(StageId::S3),
        5 => Some(StageId::S4),
        45 => Some(StageId::S5),
        6 => Some(StageId::S5),
        7 => Some(StageId::S6),
        9 => Some(StageId::S8),
        10 => Some(StageId::S9),
        _ => None,
    }
}

/// A per-run in-memory index over every committed artifact, built once per
/// request and reused for every lookup the resolver needs during that
/// request (prerequisite checks, explicit-id resolution, lineage walks,
/// calibration lookup).
pub struct Lineage<'a> {
    by_id: HashMap<&'a str, &'a Artifact>,
    /// Stage -> versions sorted ascending, for cheap "latest" lookups.
    by_stage: HashMap<StageId, Vec<&'a Artifact>>,
}

impl<'a> Lineage<'a> {
    pub fn build(artifacts: &'a [Artifact]) -> Self {
        let mut by_id = HashMap::new();
        let mut by_stage: HashMap<StageId, Vec<&Artifact>> = HashMap::new();
        for artifact in artifacts {
            by_id.insert(artifact.id.as_str(), artifact);
            by_stage.entry(artifact.stage_id).or_default().push(artifact);
        }
        for versions in by_stage.values_mut() {
            versions.sort_by_key(|a| a.version);
        }
        Lineage { by_id, by_stage }
    }

    pub fn get(&self, id: &str) -> Option<&'a Artifact> {
        self.by_id.get(id).copied()
    }

    /// The highest-version committed artifact for `stage`, or `None` if this
    /// run has never executed it.
    pub fn latest(&self, stage: StageId) -> Option<&'a Artifact> {
        self.by_stage.get(&stage).and_then(|v| v.last()).copied()
    }

    /// Every committed artifact for `stage`, version ascending.
    pub fn all_of(&self, stage: StageId) -> &[&'a Artifact] {
        self.by_stage.get(&stage).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Enforces that `stage`'s prerequisite (if any) has a committed
    /// artifact in this run.
    pub fn check_prerequisite(&self, stage: StageId) -> Result<()> {
        if let Some(required) = prerequisite_of(stage) {
            if self.latest(required).is_none() {
                return Err(ParticleError::prerequisite_unmet(format!(
                    "step {stage} requires a committed step {required} artifact"
                )));
            }
        }
        Ok(())
    }

    /// Resolves the input artifact for `stage`: an explicit id must belong
    /// to this run and to `stage`'s prerequisite stage; otherwise the latest
    /// artifact of the prerequisite stage is used.
    pub fn resolve_input(
        &self,
        stage: StageId,
        explicit_id: Option<&str>,
    ) -> Result<&'a Artifact> {
        let required = prerequisite_of(stage).ok_or_else(|| {
            ParticleError::internal(format!("step {stage} has no prerequisite to resolve"))
        })?;

        if let Some(id) = explicit_id {
            let artifact = self
                .get(id)
                .ok_or_else(|| ParticleError::not_found(format!("artifact {id} not found")))?;
            if artifact.stage_id != required {
                return Err(ParticleError::invalid_input(format!(
                    "artifact {id} is step {}, expected step {required}",
                    artifact.stage_id
                )));
            }
            return Ok(artifact);
        }

        self.latest(required).ok_or_else(|| {
            ParticleError::prerequisite_unmet(format!(
                "step {stage} requires a committed step {required} artifact"
            ))
        })
    }

    /// Walks the `key` reference recorded in `start`'s params (e.g.
    /// `base_mask_artifact_id`) back through history until an artifact of
    /// `target_stage` is found. Falls back to the latest artifact of
    /// `target_stage` if any link in the chain is missing, per spec.md §4.3.
    pub fn walk_chain(
        &self,
        start: &'a Artifact,
        key: &str,
        target_stage: StageId,
    ) -> Option<&'a Artifact> {
        let mut current = start;
        // Bounded by the number of artifacts in the run to guarantee
        // termination even on a (should-never-happen) reference cycle.
        let max_hops = self.by_id.len() + 1;
        for _ in 0..max_hops {
            if current.stage_id == target_stage {
                return Some(current);
            }
            let next_id = current.params.get(key).and_then(|v| v.as_str())?;
            current = self.get(next_id)?;
        }
        None
    }

    /// Walks `key` from `start`, falling back to the latest artifact of
    /// `target_stage` when the chain is broken.
    pub fn walk_chain_or_latest(
        &self,
        start: &'a Artifact,
        key: &str,
        target_stage: StageId,
    ) -> Result<&'a Artifact> {
        if let Some(found) = self.walk_chain(start, key, target_stage) {
            return Ok(found);
        }
        self.latest(target_stage).ok_or_else(|| {
            ParticleError::prerequisite_unmet(format!(
                "no step {target_stage} artifact found while resolving lineage for {}",
                start.id
            ))
        })
    }

    /// `um_per_px` from the latest Stage-1 artifact's params. A zero or
    /// negative value, or a missing Stage-1 artifact, is an error.
    pub fn calibration_um_per_px(&self) -> Result<f64> {
        let s1 = self
            .latest(StageId::S1)
            .ok_or_else(|| ParticleError::prerequisite_unmet("no calibration (step 1) artifact"))?;
        let value = s1
            .params
            .get("um_per_px")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| ParticleError::invalid_input("step 1 artifact missing um_per_px"))?;
        if value <= 0.0 {
            return Err(ParticleError::invalid_input(
                "um_per_px must be greater than zero",
            ));
        }
        Ok(value)
    }
}
