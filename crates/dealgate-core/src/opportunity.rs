//! Opportunity records, user submissions, and partial updates.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::gate::StageTransition;
use crate::scale::{decode_scale_set, ScaleSet, ScaleSetFormat};
use crate::stage::{self, Stage, FIRST_STAGE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    /// Accepts the current names and the legacy `baja`/`media`/`alta`;
    /// anything else is `Medium`.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" | "baja" => Priority::Low,
            "high" | "alta" => Priority::High,
            _ => Priority::Medium,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = JsonValue::deserialize(deserializer)?;
        Ok(raw.as_str().map(Priority::parse_lenient).unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub client: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub value: f64,
    #[serde(default = "default_stage")]
    pub stage: u8,
    #[serde(default)]
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    #[serde(deserialize_with = "lenient_date")]
    pub last_update: NaiveDate,
    #[serde(default)]
    pub next_action: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub probability: f64,
    #[serde(default, deserialize_with = "lenient_opt_date")]
    pub expected_close: Option<NaiveDate>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub power_sponsor: Option<String>,
    #[serde(default)]
    pub sponsor: Option<String>,
    #[serde(default)]
    pub influencer: Option<String>,
    #[serde(default)]
    pub support_contact: Option<String>,
    #[serde(default = "zeroed_scales", deserialize_with = "normalized_scales")]
    pub scales: Option<ScaleSet>,
}

impl Opportunity {
    pub fn stage_definition(&self) -> Option<&'static Stage> {
        stage::stage(self.stage)
    }

    pub fn apply_transition(&mut self, transition: &StageTransition) {
        self.stage = transition.stage;
        self.probability = transition.probability;
        self.last_update = transition.last_update;
    }

    pub fn apply_patch(&mut self, patch: &OpportunityPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(client) = &patch.client {
            self.client = client.clone();
        }
        if let Some(vendor) = &patch.vendor {
            self.vendor = vendor.clone();
        }
        if let Some(value) = patch.value {
            self.value = value;
        }
        if let Some(stage) = patch.stage {
            self.stage = stage;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(probability) = patch.probability {
            self.probability = probability;
        }
        if let Some(last_update) = patch.last_update {
            self.last_update = last_update;
        }
        if let Some(next_action) = &patch.next_action {
            self.next_action = next_action.clone();
        }
        if let Some(expected_close) = patch.expected_close {
            self.expected_close = expected_close;
        }
        if let Some(product) = &patch.product {
            self.product = product.clone();
        }
        if let Some(industry) = &patch.industry {
            self.industry = industry.clone();
        }
        if let Some(power_sponsor) = &patch.power_sponsor {
            self.power_sponsor = power_sponsor.clone();
        }
        if let Some(sponsor) = &patch.sponsor {
            self.sponsor = sponsor.clone();
        }
        if let Some(influencer) = &patch.influencer {
            self.influencer = influencer.clone();
        }
        if let Some(support_contact) = &patch.support_contact {
            self.support_contact = support_contact.clone();
        }
        if let Some(scales) = &patch.scales {
            self.scales = Some(scales.clone());
        }
    }
}

/// Partial update. Outer `None` leaves a field untouched; for nullable
/// columns `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpportunityPatch {
    pub name: Option<String>,
    pub client: Option<String>,
    pub vendor: Option<String>,
    pub value: Option<f64>,
    pub stage: Option<u8>,
    pub priority: Option<Priority>,
    pub probability: Option<f64>,
    pub last_update: Option<NaiveDate>,
    pub next_action: Option<Option<String>>,
    pub expected_close: Option<Option<NaiveDate>>,
    pub product: Option<Option<String>>,
    pub industry: Option<Option<String>>,
    pub power_sponsor: Option<Option<String>>,
    pub sponsor: Option<Option<String>>,
    pub influencer: Option<Option<String>>,
    pub support_contact: Option<Option<String>>,
    pub scales: Option<ScaleSet>,
}

impl OpportunityPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Form submission for creating or editing an opportunity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpportunityDraft {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub client: String,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub value: f64,
    #[serde(default = "default_stage")]
    pub stage: u8,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub expected_close: Option<NaiveDate>,
    #[serde(default)]
    pub next_action: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub power_sponsor: Option<String>,
    #[serde(default)]
    pub sponsor: Option<String>,
    #[serde(default)]
    pub influencer: Option<String>,
    #[serde(default)]
    pub support_contact: Option<String>,
    #[serde(default)]
    pub scales: Option<ScaleSet>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("name is required")]
    MissingName,
    #[error("client is required")]
    MissingClient,
    #[error("value must be a positive amount, got {0}")]
    NonPositiveValue(f64),
    #[error("stage {0} does not exist")]
    UnknownStage(u8),
}

impl OpportunityDraft {
    pub fn new(name: impl Into<String>, client: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            client: client.into(),
            value,
            stage: FIRST_STAGE,
            ..Default::default()
        }
    }

    /// Checks required fields and derives the stored probability from the
    /// stage catalog.
    pub fn validate(
        &self,
        default_vendor: &str,
        today: NaiveDate,
    ) -> Result<NewOpportunity, ValidationError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ValidationError::MissingName);
        }
        let client = self.client.trim();
        if client.is_empty() {
            return Err(ValidationError::MissingClient);
        }
        if !self.value.is_finite() || self.value <= 0.0 {
            return Err(ValidationError::NonPositiveValue(self.value));
        }
        let stage = stage::stage(self.stage).ok_or(ValidationError::UnknownStage(self.stage))?;

        let vendor = trimmed(&self.vendor).unwrap_or_else(|| default_vendor.to_string());

        Ok(NewOpportunity {
            name: name.to_string(),
            client: client.to_string(),
            vendor,
            value: self.value,
            stage: stage.id,
            priority: self.priority,
            probability: f64::from(stage.probability),
            last_update: today,
            next_action: trimmed(&self.next_action),
            expected_close: self.expected_close,
            product: trimmed(&self.product),
            industry: trimmed(&self.industry),
            power_sponsor: trimmed(&self.power_sponsor),
            sponsor: trimmed(&self.sponsor),
            influencer: trimmed(&self.influencer),
            support_contact: trimmed(&self.support_contact),
            scales: self.scales.clone().unwrap_or_default(),
        })
    }
}

/// A validated submission, ready for the store to assign an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOpportunity {
    pub name: String,
    pub client: String,
    pub vendor: String,
    pub value: f64,
    pub stage: u8,
    pub priority: Priority,
    pub probability: f64,
    pub last_update: NaiveDate,
    pub next_action: Option<String>,
    pub expected_close: Option<NaiveDate>,
    pub product: Option<String>,
    pub industry: Option<String>,
    pub power_sponsor: Option<String>,
    pub sponsor: Option<String>,
    pub influencer: Option<String>,
    pub support_contact: Option<String>,
    pub scales: ScaleSet,
}

impl NewOpportunity {
    pub fn into_opportunity(self, id: Uuid, created_at: DateTime<Utc>) -> Opportunity {
        Opportunity {
            id,
            name: self.name,
            client: self.client,
            vendor: self.vendor,
            value: self.value,
            stage: self.stage,
            priority: self.priority,
            created_at,
            last_update: self.last_update,
            next_action: self.next_action,
            probability: self.probability,
            expected_close: self.expected_close,
            product: self.product,
            industry: self.industry,
            power_sponsor: self.power_sponsor,
            sponsor: self.sponsor,
            influencer: self.influencer,
            support_contact: self.support_contact,
            scales: Some(self.scales),
        }
    }

    /// Full-record patch used when an edit form is saved.
    pub fn into_patch(self) -> OpportunityPatch {
        OpportunityPatch {
            name: Some(self.name),
            client: Some(self.client),
            vendor: Some(self.vendor),
            value: Some(self.value),
            stage: Some(self.stage),
            priority: Some(self.priority),
            probability: Some(self.probability),
            last_update: Some(self.last_update),
            next_action: Some(self.next_action),
            expected_close: Some(self.expected_close),
            product: Some(self.product),
            industry: Some(self.industry),
            power_sponsor: Some(self.power_sponsor),
            sponsor: Some(self.sponsor),
            influencer: Some(self.influencer),
            support_contact: Some(self.support_contact),
            scales: Some(self.scales),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vendor {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

impl Vendor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: None,
            role: None,
            is_admin: false,
        }
    }
}

fn trimmed(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

fn default_stage() -> u8 {
    FIRST_STAGE
}

fn zeroed_scales() -> Option<ScaleSet> {
    Some(ScaleSet::zeroed())
}

/// Numbers or numeric strings; anything else is 0.
pub fn number_or_zero(raw: &JsonValue) -> f64 {
    match raw {
        JsonValue::Number(n) => n.as_f64().unwrap_or(0.0),
        JsonValue::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()).unwrap_or(0.0),
        _ => 0.0,
    }
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let raw = JsonValue::deserialize(deserializer)?;
    Ok(number_or_zero(&raw))
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok().or_else(|| {
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|ts| ts.with_timezone(&Utc).date_naive())
    })
}

fn lenient_date<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_date(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid date `{raw}`")))
}

fn lenient_opt_date<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<NaiveDate>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_date))
}

fn normalized_scales<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<ScaleSet>, D::Error> {
    let raw = JsonValue::deserialize(deserializer)?;
    let (scales, format) = decode_scale_set(&raw);
    if format == ScaleSetFormat::LegacyNumeric {
        debug!("legacy numeric scales upgraded to the canonical shape");
    }
    Ok(Some(scales))
}
