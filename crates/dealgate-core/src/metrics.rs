//! Health scores, portfolio aggregates, and inactivity classification.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

use crate::opportunity::Opportunity;
use crate::stage;

pub const STALE_WARNING_DAYS: i64 = 7;
pub const STALE_CRITICAL_DAYS: i64 = 30;

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthBand {
    Healthy,
    AtRisk,
    Critical,
}

/// Mean of an opportunity's six scale scores; 0 without qualification data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HealthScore {
    pub mean: f64,
}

impl HealthScore {
    pub fn of(opportunity: &Opportunity) -> Self {
        Self {
            mean: opportunity.scales.as_ref().map(|s| s.mean()).unwrap_or(0.0),
        }
    }

    pub fn rounded(&self) -> u8 {
        self.mean.round().clamp(0.0, 10.0) as u8
    }

    pub fn band(&self) -> HealthBand {
        match self.rounded() {
            7.. => HealthBand::Healthy,
            4..=6 => HealthBand::AtRisk,
            _ => HealthBand::Critical,
        }
    }

    pub fn readout(&self) -> String {
        format!("{:.1}", self.mean)
    }
}

pub fn weighted_value(opportunity: &Opportunity) -> f64 {
    opportunity.value * opportunity.probability / 100.0
}

#[derive(Debug, Clone, Serialize)]
pub struct StageBreakdown {
    pub stage_id: u8,
    pub name: &'static str,
    pub probability: u8,
    pub count: usize,
    pub value: f64,
    pub weighted_value: f64,
    pub members: Vec<Opportunity>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioMetrics {
    pub total_value: f64,
    pub weighted_value: f64,
    pub count: usize,
    pub average_score: f64,
    pub average_probability: f64,
    pub stages: Vec<StageBreakdown>,
}

impl PortfolioMetrics {
    pub fn compute(opportunities: &[Opportunity]) -> Self {
        let count = opportunities.len();
        let total_value = opportunities.iter().map(|o| o.value).sum();
        let weighted = opportunities.iter().map(weighted_value).sum();
        let (average_score, average_probability) = if count == 0 {
            (0.0, 0.0)
        } else {
            let scores: f64 = opportunities.iter().map(|o| HealthScore::of(o).mean).sum();
            let probabilities: f64 = opportunities.iter().map(|o| o.probability).sum();
            (scores / count as f64, probabilities / count as f64)
        };

        let stages = stage::open_stages()
            .iter()
            .map(|s| {
                let members: Vec<Opportunity> = opportunities
                    .iter()
                    .filter(|o| o.stage == s.id)
                    .cloned()
                    .collect();
                StageBreakdown {
                    stage_id: s.id,
                    name: s.name,
                    probability: s.probability,
                    count: members.len(),
                    value: members.iter().map(|o| o.value).sum(),
                    weighted_value: members.iter().map(weighted_value).sum(),
                    members,
                }
            })
            .collect();

        Self {
            total_value,
            weighted_value: weighted,
            count,
            average_score,
            average_probability,
            stages,
        }
    }
}

/// Whole days between `now` and the start (UTC) of `last_update`, rounded up.
pub fn days_since(last_update: NaiveDate, now: DateTime<Utc>) -> i64 {
    let anchor = last_update.and_time(NaiveTime::MIN).and_utc();
    let millis = (now - anchor).num_milliseconds().abs();
    (millis + MILLIS_PER_DAY - 1) / MILLIS_PER_DAY
}

pub fn is_stale(last_update: NaiveDate, now: DateTime<Utc>, threshold_days: i64) -> bool {
    days_since(last_update, now) >= threshold_days
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Staleness {
    Fresh,
    Warning,
    Critical,
}

impl Staleness {
    pub fn classify(last_update: NaiveDate, now: DateTime<Utc>) -> Self {
        let days = days_since(last_update, now);
        if days >= STALE_CRITICAL_DAYS {
            Staleness::Critical
        } else if days >= STALE_WARNING_DAYS {
            Staleness::Warning
        } else {
            Staleness::Fresh
        }
    }
}
