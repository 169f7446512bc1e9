//! Stage advancement gates.
//!
//! Entering stages 2 through 5 requires minimum scale scores. A forward move
//! whose gate is not met is not applied directly: the salesperson must
//! confirm the whole checklist of the stage the deal is leaving first.
//! Backward moves and moves to the same stage are always allowed, including
//! out of `Closed`.

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::opportunity::{Opportunity, OpportunityPatch};
use crate::scale::{Scale, ScaleSet};
use crate::stage::{self, ChecklistConfirmation, ChecklistItem, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Threshold {
    pub scale: Scale,
    pub minimum: u8,
}

#[derive(Debug, Serialize)]
pub struct Gate {
    pub target: u8,
    pub thresholds: &'static [Threshold],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UnmetThreshold {
    pub scale: Scale,
    pub minimum: u8,
    pub actual: u8,
}

static GATES: [Gate; 4] = [
    Gate {
        target: 2,
        thresholds: &[
            Threshold { scale: Scale::Pain, minimum: 5 },
            Threshold { scale: Scale::Power, minimum: 4 },
        ],
    },
    Gate {
        target: 3,
        thresholds: &[Threshold { scale: Scale::Vision, minimum: 5 }],
    },
    Gate {
        target: 4,
        thresholds: &[Threshold { scale: Scale::Value, minimum: 6 }],
    },
    Gate {
        target: 5,
        thresholds: &[
            Threshold { scale: Scale::Control, minimum: 7 },
            Threshold { scale: Scale::Purchase, minimum: 6 },
        ],
    },
];

impl Gate {
    pub fn is_met(&self, scales: &ScaleSet) -> bool {
        self.thresholds
            .iter()
            .all(|t| scales.score(t.scale) >= t.minimum)
    }

    pub fn unmet(&self, scales: &ScaleSet) -> Vec<UnmetThreshold> {
        self.thresholds
            .iter()
            .filter(|t| scales.score(t.scale) < t.minimum)
            .map(|t| UnmetThreshold {
                scale: t.scale,
                minimum: t.minimum,
                actual: scales.score(t.scale),
            })
            .collect()
    }
}

/// Numeric gate for entering `target`, if it has one.
pub fn entry_gate(target: u8) -> Option<&'static Gate> {
    GATES.iter().find(|g| g.target == target)
}

/// Ungated targets always pass. A gated target is never met by an
/// opportunity without qualification data.
pub fn meets_entry_gate(opportunity: &Opportunity, target: u8) -> bool {
    let Some(gate) = entry_gate(target) else {
        return true;
    };
    match &opportunity.scales {
        Some(scales) => gate.is_met(scales),
        None => false,
    }
}

/// Whether the outbound thresholds of `from_stage` are satisfied.
pub fn can_advance(opportunity: &Opportunity, from_stage: u8) -> bool {
    meets_entry_gate(opportunity, from_stage.saturating_add(1))
}

/// Stage change to write: target stage, its catalog probability, and the
/// date of the move.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageTransition {
    pub stage: u8,
    pub probability: f64,
    pub last_update: NaiveDate,
}

impl StageTransition {
    pub fn to(target: &Stage, today: NaiveDate) -> Self {
        Self {
            stage: target.id,
            probability: f64::from(target.probability),
            last_update: today,
        }
    }

    pub fn to_patch(&self) -> OpportunityPatch {
        OpportunityPatch {
            stage: Some(self.stage),
            probability: Some(self.probability),
            last_update: Some(self.last_update),
            ..Default::default()
        }
    }
}

/// A forward move held back until the leaving stage's checklist is confirmed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingStageMove {
    pub opportunity_id: Uuid,
    pub from_stage: u8,
    pub target_stage: u8,
    pub checklist: &'static [ChecklistItem],
    pub unmet: Vec<UnmetThreshold>,
}

impl PendingStageMove {
    pub fn checklist_stage(&self) -> Option<&'static Stage> {
        stage::stage(self.from_stage)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageMove {
    Direct(StageTransition),
    RequiresChecklist(PendingStageMove),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("stage {0} does not exist")]
    UnknownStage(u8),
    #[error("checklist for stage {stage} is incomplete: missing {}", missing.join(", "))]
    ChecklistIncomplete { stage: u8, missing: Vec<String> },
    #[error("opportunity moved from stage {expected} to {actual} before the checklist was confirmed")]
    StaleMove { expected: u8, actual: u8 },
}

pub fn plan_stage_move(
    opportunity: &Opportunity,
    target: u8,
    today: NaiveDate,
) -> Result<StageMove, GateError> {
    let target_stage = stage::stage(target).ok_or(GateError::UnknownStage(target))?;

    if target > opportunity.stage && !can_advance(opportunity, opportunity.stage) {
        let unmet = match (entry_gate(opportunity.stage.saturating_add(1)), &opportunity.scales) {
            (Some(gate), Some(scales)) => gate.unmet(scales),
            (Some(gate), None) => gate.unmet(&ScaleSet::zeroed()),
            (None, _) => Vec::new(),
        };
        let checklist = stage::stage(opportunity.stage)
            .map(|s| s.checklist)
            .unwrap_or(&[]);
        return Ok(StageMove::RequiresChecklist(PendingStageMove {
            opportunity_id: opportunity.id,
            from_stage: opportunity.stage,
            target_stage: target,
            checklist,
            unmet,
        }));
    }

    Ok(StageMove::Direct(StageTransition::to(target_stage, today)))
}

/// Releases a held-back move once every checklist item of the leaving stage
/// is confirmed.
pub fn confirm_pending_move(
    pending: &PendingStageMove,
    confirmation: &ChecklistConfirmation,
    today: NaiveDate,
) -> Result<StageTransition, GateError> {
    let target = stage::stage(pending.target_stage)
        .ok_or(GateError::UnknownStage(pending.target_stage))?;
    let missing: Vec<String> = pending
        .checklist
        .iter()
        .filter(|item| !confirmation.is_confirmed(item.key))
        .map(|item| item.key.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(GateError::ChecklistIncomplete {
            stage: pending.from_stage,
            missing,
        });
    }
    Ok(StageTransition::to(target, today))
}
