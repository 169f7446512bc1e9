//! Core domain model, scale normalization, and stage gating for Dealgate.

pub mod filter;
pub mod gate;
pub mod metrics;
pub mod opportunity;
pub mod scale;
pub mod stage;

pub use filter::{dashboard_scope, is_admin, visible_to, InactivityFilter, OpportunityFilter};
pub use gate::{
    can_advance, confirm_pending_move, entry_gate, meets_entry_gate, plan_stage_move, Gate,
    GateError, PendingStageMove, StageMove, StageTransition, Threshold, UnmetThreshold,
};
pub use metrics::{
    days_since, is_stale, weighted_value, HealthBand, HealthScore, PortfolioMetrics,
    StageBreakdown, Staleness, STALE_CRITICAL_DAYS, STALE_WARNING_DAYS,
};
pub use opportunity::{
    NewOpportunity, Opportunity, OpportunityDraft, OpportunityPatch, Priority, ValidationError,
    Vendor,
};
pub use scale::{
    decode_scale_set, normalize_scale_set, score_of, Scale, ScaleDefinition, ScaleScore, ScaleSet,
    ScaleSetFormat, MAX_SCORE,
};
pub use stage::{
    open_stages, probability_for, stage, stages, ChecklistConfirmation, ChecklistItem, Stage,
    CLOSED_STAGE, FIRST_STAGE,
};

pub const CRATE_NAME: &str = "dealgate-core";
