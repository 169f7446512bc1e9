//! The six qualification scales and the decoder for persisted scale data.
//!
//! Scale data has been stored in two shapes over time: the canonical shape,
//! where every dimension is an object `{ "score": n, "description": "..." }`,
//! and an older flat shape holding a bare number per dimension. Either shape
//! may use the canonical English keys or the legacy keys (`dor`, `poder`,
//! ...). [`decode_scale_set`] tries the known shapes in a fixed order and
//! falls back to a zeroed set, so nothing downstream ever sees a partial or
//! out-of-range score.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

pub const MAX_SCORE: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scale {
    Pain,
    Power,
    Vision,
    Value,
    Control,
    Purchase,
}

impl Scale {
    pub const ALL: [Scale; 6] = [
        Scale::Pain,
        Scale::Power,
        Scale::Vision,
        Scale::Value,
        Scale::Control,
        Scale::Purchase,
    ];

    /// Canonical persisted key.
    pub fn key(self) -> &'static str {
        match self {
            Scale::Pain => "pain",
            Scale::Power => "power",
            Scale::Vision => "vision",
            Scale::Value => "value",
            Scale::Control => "control",
            Scale::Purchase => "purchase",
        }
    }

    /// Key used by records written before the canonical names existed.
    pub fn legacy_key(self) -> &'static str {
        match self {
            Scale::Pain => "dor",
            Scale::Power => "poder",
            Scale::Vision => "visao",
            Scale::Value => "valor",
            Scale::Control => "controle",
            Scale::Purchase => "compras",
        }
    }

    /// Lookup order used by the decoder.
    pub fn aliases(self) -> [&'static str; 2] {
        [self.key(), self.legacy_key()]
    }

    pub fn definition(self) -> &'static ScaleDefinition {
        &SCALE_DEFINITIONS[self as usize]
    }

    pub fn level_text(self, score: u8) -> &'static str {
        self.definition().levels[usize::from(score.min(MAX_SCORE))]
    }
}

impl std::fmt::Display for Scale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Display metadata for one scale: its name, qualifying questions, and what
/// each score from 0 to 10 means.
#[derive(Debug, Serialize)]
pub struct ScaleDefinition {
    pub scale: Scale,
    pub name: &'static str,
    pub summary: &'static str,
    pub questions: [&'static str; 4],
    pub levels: [&'static str; 11],
}

pub static SCALE_DEFINITIONS: [ScaleDefinition; 6] = [
    ScaleDefinition {
        scale: Scale::Pain,
        name: "PAIN",
        summary: "Pain identified and admitted",
        questions: [
            "Does the customer admit the problem?",
            "Is the problem costing money?",
            "Are the consequences measurable?",
            "Is there urgency to solve it?",
        ],
        levels: [
            "No need or pain identified by the customer",
            "Seller assumes the customer's needs",
            "Contact admits a need",
            "Contact admits the reasons and symptoms causing pain",
            "Contact admits pain",
            "Seller documents pain and contact agrees",
            "Contact formalizes the decision maker's needs",
            "Decision maker admits needs",
            "Decision maker admits the reasons and symptoms causing pain",
            "Decision maker admits pain",
            "Seller documents pain and the decision maker agrees",
        ],
    },
    ScaleDefinition {
        scale: Scale::Power,
        name: "POWER",
        summary: "Access to the decision maker",
        questions: [
            "Do you know the final decision maker?",
            "Do you have direct access to the decision maker?",
            "Does the decision maker join the meetings?",
            "Is the decision process mapped?",
        ],
        levels: [
            "Decision maker not yet identified",
            "Decision process revealed by the contact",
            "Potential decision maker identified",
            "Contact grants the request for access to the decision maker",
            "Decision maker reached",
            "Decision maker agrees to explore the opportunity",
            "Decision and purchase process confirmed by the decision maker",
            "Decision maker agrees to a proof of value",
            "Decision maker agrees with the proposal content",
            "Decision maker confirms verbal approval",
            "Decision maker formally approves internally",
        ],
    },
    ScaleDefinition {
        scale: Scale::Vision,
        name: "VISION",
        summary: "Solution vision built",
        questions: [
            "Does the customer see value in the solution?",
            "Are the benefits clear?",
            "Does the solution resolve the pain?",
            "Can the customer picture the implementation?",
        ],
        levels: [
            "No vision, or a competitor's vision, established",
            "Contact's vision created in product terms",
            "Contact's vision created in situation/problem/implication terms",
            "Differentiated vision created with the contact",
            "Differentiated vision documented with the contact",
            "Documentation agreed by the contact",
            "Decision maker's vision created in product terms",
            "Decision maker's vision created in situation/problem/implication terms",
            "Differentiated vision created with the decision maker",
            "Differentiated vision documented with the decision maker",
            "Documentation agreed by the decision maker",
        ],
    },
    ScaleDefinition {
        scale: Scale::Value,
        name: "VALUE",
        summary: "ROI and benefits validated",
        questions: [
            "Was the ROI calculated?",
            "Does the customer agree with the ROI?",
            "Does the value justify the investment?",
            "Are the benefits measurable?",
        ],
        levels: [
            "Contact explores the solution but no value identified",
            "Seller identifies a business value proposition",
            "Contact agrees to explore the value proposition",
            "Decision maker agrees to explore the value proposition",
            "Value criteria established with the decision maker",
            "Value discovery conducted against the decision maker's vision",
            "Value analysis conducted by the seller (demo)",
            "Value analysis conducted by the contact (trial)",
            "Decision maker agrees with the value analysis",
            "Value analysis conclusion documented by the seller",
            "Decision maker confirms the analysis conclusions in writing",
        ],
    },
    ScaleDefinition {
        scale: Scale::Control,
        name: "CONTROL",
        summary: "Control of the process",
        questions: [
            "Are you driving the process?",
            "Are the next steps defined?",
            "Is the timeline agreed?",
            "Are the competitors identified?",
        ],
        levels: [
            "No documented follow-up of the conversation with the contact",
            "First vision sent to the contact",
            "First vision agreed or modified by the contact",
            "First vision sent to the decision maker",
            "First vision agreed or modified by the decision maker",
            "Seller receives approval to explore value",
            "Evaluation plan sent to the decision maker",
            "Decision maker agrees with or modifies the evaluation",
            "Evaluation plan carried out (when applicable)",
            "Evaluation result approved by the decision maker",
            "Decision maker approves the proposal for final negotiation",
        ],
    },
    ScaleDefinition {
        scale: Scale::Purchase,
        name: "PURCHASE",
        summary: "Purchasing process",
        questions: [
            "Is the purchasing process mapped?",
            "Is the budget approved?",
            "Is procurement involved?",
            "Is the required paperwork known?",
        ],
        levels: [
            "Purchasing process unknown",
            "Purchasing process clarified by the contact",
            "Purchasing process confirmed by the decision maker",
            "Commercial terms validated with the customer",
            "Proposal presented to the customer",
            "Negotiation started with procurement",
            "Commercial terms approved and formalized",
            "Contract signed",
            "Purchase order received",
            "Invoice issued",
            "Payment made",
        ],
    },
];

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "RawScaleScore")]
pub struct ScaleScore {
    pub score: u8,
    pub description: String,
}

impl ScaleScore {
    pub fn new(score: i64, description: impl Into<String>) -> Self {
        Self {
            score: score.clamp(0, i64::from(MAX_SCORE)) as u8,
            description: description.into(),
        }
    }

    /// Truncates and clamps; non-finite input scores 0. Truncating keeps
    /// integer gate thresholds exact: 4.5 stays below 5.
    pub fn from_f64(raw: f64, description: impl Into<String>) -> Self {
        let score = if raw.is_finite() {
            raw.trunc().clamp(0.0, f64::from(MAX_SCORE)) as u8
        } else {
            0
        };
        Self {
            score,
            description: description.into(),
        }
    }
}

#[derive(Deserialize)]
struct RawScaleScore {
    #[serde(default)]
    score: f64,
    #[serde(default)]
    description: Option<String>,
}

impl From<RawScaleScore> for ScaleScore {
    fn from(raw: RawScaleScore) -> Self {
        ScaleScore::from_f64(raw.score, raw.description.unwrap_or_default())
    }
}

/// All six dimensions. Deserializing goes through [`normalize_scale_set`], so
/// any JSON value yields a complete set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ScaleSet {
    pub pain: ScaleScore,
    pub power: ScaleScore,
    pub vision: ScaleScore,
    pub value: ScaleScore,
    pub control: ScaleScore,
    pub purchase: ScaleScore,
}

impl ScaleSet {
    pub fn zeroed() -> Self {
        Self::default()
    }

    pub fn from_scores(scores: [u8; 6]) -> Self {
        let mut set = Self::zeroed();
        for (scale, score) in Scale::ALL.into_iter().zip(scores) {
            set.get_mut(scale).score = score.min(MAX_SCORE);
        }
        set
    }

    pub fn get(&self, scale: Scale) -> &ScaleScore {
        match scale {
            Scale::Pain => &self.pain,
            Scale::Power => &self.power,
            Scale::Vision => &self.vision,
            Scale::Value => &self.value,
            Scale::Control => &self.control,
            Scale::Purchase => &self.purchase,
        }
    }

    pub fn get_mut(&mut self, scale: Scale) -> &mut ScaleScore {
        match scale {
            Scale::Pain => &mut self.pain,
            Scale::Power => &mut self.power,
            Scale::Vision => &mut self.vision,
            Scale::Value => &mut self.value,
            Scale::Control => &mut self.control,
            Scale::Purchase => &mut self.purchase,
        }
    }

    pub fn set(&mut self, scale: Scale, score: ScaleScore) {
        *self.get_mut(scale) = score;
    }

    pub fn score(&self, scale: Scale) -> u8 {
        self.get(scale).score
    }

    pub fn scores(&self) -> [u8; 6] {
        Scale::ALL.map(|scale| self.score(scale))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Scale, &ScaleScore)> {
        Scale::ALL.into_iter().map(move |scale| (scale, self.get(scale)))
    }

    /// Unweighted arithmetic mean of the six scores.
    pub fn mean(&self) -> f64 {
        let total: u32 = self.scores().iter().map(|s| u32::from(*s)).sum();
        f64::from(total) / Scale::ALL.len() as f64
    }
}

impl<'de> Deserialize<'de> for ScaleSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = JsonValue::deserialize(deserializer)?;
        Ok(normalize_scale_set(&raw))
    }
}

/// Which persisted shape a scale set was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleSetFormat {
    Canonical,
    LegacyNumeric,
    Empty,
}

pub fn normalize_scale_set(raw: &JsonValue) -> ScaleSet {
    decode_scale_set(raw).0
}

pub fn decode_scale_set(raw: &JsonValue) -> (ScaleSet, ScaleSetFormat) {
    let Some(obj) = raw.as_object() else {
        if !raw.is_null() {
            debug!(kind = json_kind(raw), "scale data is not an object; using zeroed scales");
        }
        return (ScaleSet::zeroed(), ScaleSetFormat::Empty);
    };

    if let Some(set) = decode_canonical(obj) {
        return (set, ScaleSetFormat::Canonical);
    }
    if let Some(set) = decode_legacy_numeric(obj) {
        return (set, ScaleSetFormat::LegacyNumeric);
    }

    if !obj.is_empty() {
        debug!(keys = obj.len(), "unrecognized scale data shape; using zeroed scales");
    }
    (ScaleSet::zeroed(), ScaleSetFormat::Empty)
}

fn decode_canonical(obj: &Map<String, JsonValue>) -> Option<ScaleSet> {
    let entries = Scale::ALL.map(|scale| canonical_entry(obj, scale));
    if entries.iter().all(Option::is_none) {
        return None;
    }

    let mut set = ScaleSet::zeroed();
    for (scale, entry) in Scale::ALL.into_iter().zip(entries) {
        let score = match entry {
            Some(entry) => {
                let description = entry
                    .get("description")
                    .and_then(JsonValue::as_str)
                    .unwrap_or_default();
                let raw = entry.get("score").and_then(JsonValue::as_f64).unwrap_or(0.0);
                ScaleScore::from_f64(raw, description)
            }
            // Mixed records keep their bare numbers.
            None => ScaleScore::from_f64(numeric_alias(obj, scale), ""),
        };
        set.set(scale, score);
    }
    Some(set)
}

/// First non-zero bare number under the scale's aliases, canonical key first.
fn numeric_alias(obj: &Map<String, JsonValue>, scale: Scale) -> f64 {
    scale
        .aliases()
        .into_iter()
        .filter_map(|key| obj.get(key).and_then(JsonValue::as_f64))
        .find(|value| *value != 0.0)
        .unwrap_or(0.0)
}

fn canonical_entry(obj: &Map<String, JsonValue>, scale: Scale) -> Option<&Map<String, JsonValue>> {
    scale.aliases().into_iter().find_map(|key| {
        obj.get(key)
            .and_then(JsonValue::as_object)
            .filter(|entry| entry.get("score").is_some_and(JsonValue::is_number))
    })
}

fn decode_legacy_numeric(obj: &Map<String, JsonValue>) -> Option<ScaleSet> {
    let has_numbers = Scale::ALL
        .iter()
        .any(|scale| scale.aliases().iter().any(|key| obj.get(*key).is_some_and(JsonValue::is_number)));
    if !has_numbers {
        return None;
    }

    let mut set = ScaleSet::zeroed();
    for scale in Scale::ALL {
        // A zero under the canonical key does not hide a populated legacy key.
        set.set(scale, ScaleScore::from_f64(numeric_alias(obj, scale), ""));
    }
    Some(set)
}

/// Numeric score from a raw number, a `{score, ...}` object, or nothing.
/// Anything else scores 0.
pub fn score_of(value: Option<&JsonValue>) -> f64 {
    match value {
        Some(JsonValue::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(JsonValue::Object(entry)) => entry
            .get("score")
            .and_then(JsonValue::as_f64)
            .unwrap_or(0.0),
        _ => 0.0,
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assert_complete(set: &ScaleSet) {
        for (_, entry) in set.iter() {
            assert!(entry.score <= MAX_SCORE);
        }
        assert_eq!(set.iter().count(), 6);
    }

    #[test]
    fn non_object_input_yields_zeroed_set() {
        for raw in [json!(null), json!(7), json!("pain"), json!([1, 2, 3]), json!(true)] {
            let (set, format) = decode_scale_set(&raw);
            assert_eq!(set, ScaleSet::zeroed());
            assert_eq!(format, ScaleSetFormat::Empty);
        }
    }

    #[test]
    fn canonical_shape_is_kept_and_missing_dimensions_are_filled() {
        let raw = json!({
            "pain": {"score": 6, "description": "CFO admits losses"},
            "power": {"score": 4, "description": ""},
            "vision": {"score": 3}
        });
        let (set, format) = decode_scale_set(&raw);
        assert_eq!(format, ScaleSetFormat::Canonical);
        assert_eq!(set.pain, ScaleScore::new(6, "CFO admits losses"));
        assert_eq!(set.power.score, 4);
        assert_eq!(set.vision.score, 3);
        assert_eq!(set.vision.description, "");
        assert_eq!(set.purchase, ScaleScore::default());
        assert_complete(&set);
    }

    #[test]
    fn canonical_shape_under_legacy_keys_is_recognized() {
        let raw = json!({
            "dor": {"score": 5, "description": "d"},
            "poder": {"score": 4, "description": "p"},
            "visao": {"score": 2, "description": ""},
            "valor": {"score": 1, "description": ""},
            "controle": {"score": 0, "description": ""},
            "compras": {"score": 9, "description": ""}
        });
        let set = normalize_scale_set(&raw);
        assert_eq!(set.scores(), [5, 4, 2, 1, 0, 9]);
        assert_eq!(set.pain.description, "d");
    }

    #[test]
    fn canonical_scores_are_clamped_and_truncated() {
        let raw = json!({
            "pain": {"score": 14, "description": ""},
            "power": {"score": -3, "description": ""},
            "vision": {"score": 4.6, "description": ""}
        });
        let set = normalize_scale_set(&raw);
        assert_eq!(set.pain.score, 10);
        assert_eq!(set.power.score, 0);
        assert_eq!(set.vision.score, 4);
    }

    #[test]
    fn legacy_fractions_never_round_up() {
        let set = normalize_scale_set(&json!({"dor": 4.5, "poder": 4.99, "valor": 6.0}));
        assert_eq!(set.scores(), [4, 4, 0, 6, 0, 0]);
    }

    #[test]
    fn mixed_shapes_keep_bare_numbers() {
        let raw = json!({
            "pain": {"score": 6, "description": "x"},
            "power": 4,
            "pain_extra": 9,
            "visao": 3,
            "value": 0,
            "valor": 7
        });
        let (set, format) = decode_scale_set(&raw);
        assert_eq!(format, ScaleSetFormat::Canonical);
        assert_eq!(set.pain, ScaleScore::new(6, "x"));
        assert_eq!(set.scores(), [6, 4, 3, 7, 0, 0]);
        assert_eq!(set.power.description, "");
    }

    #[test]
    fn legacy_numeric_fields_are_rebuilt() {
        let raw = json!({"dor": 7, "power": 3, "valor": 6});
        let (set, format) = decode_scale_set(&raw);
        assert_eq!(format, ScaleSetFormat::LegacyNumeric);
        assert_eq!(set.scores(), [7, 3, 0, 6, 0, 0]);
        assert!(set.iter().all(|(_, entry)| entry.description.is_empty()));
    }

    #[test]
    fn legacy_numeric_zero_falls_through_to_next_alias() {
        let raw = json!({"pain": 0, "dor": 8});
        assert_eq!(normalize_scale_set(&raw).pain.score, 8);
    }

    #[test]
    fn unknown_object_shape_falls_back_to_zeroed() {
        let raw = json!({"pain": "high", "notes": {"score": "n/a"}});
        let (set, format) = decode_scale_set(&raw);
        assert_eq!(set, ScaleSet::zeroed());
        assert_eq!(format, ScaleSetFormat::Empty);
    }

    #[test]
    fn score_of_is_total() {
        assert_eq!(score_of(None), 0.0);
        assert_eq!(score_of(Some(&json!(null))), 0.0);
        assert_eq!(score_of(Some(&json!(7))), 7.0);
        assert_eq!(score_of(Some(&json!({"score": 4, "description": "x"}))), 4.0);
        assert_eq!(score_of(Some(&json!({"description": "no score"}))), 0.0);
        assert_eq!(score_of(Some(&json!("5"))), 0.0);
    }

    #[test]
    fn deserializing_a_scale_set_normalizes() {
        let set: ScaleSet = serde_json::from_value(json!({"vision": 9})).unwrap();
        assert_eq!(set.vision.score, 9);
        let set: ScaleSet = serde_json::from_value(json!("garbage")).unwrap();
        assert_eq!(set, ScaleSet::zeroed());
    }

    #[test]
    fn serialized_form_uses_canonical_keys() {
        let value = serde_json::to_value(ScaleSet::from_scores([1, 2, 3, 4, 5, 6])).unwrap();
        assert_eq!(value["purchase"], json!({"score": 6, "description": ""}));
        assert!(value.get("compras").is_none());
    }

    #[test]
    fn level_text_clamps_score() {
        assert_eq!(Scale::Purchase.level_text(7), "Contract signed");
        assert_eq!(Scale::Purchase.level_text(42), "Payment made");
        assert_eq!(Scale::Power.definition().name, "POWER");
    }

    #[test]
    fn mean_is_unweighted() {
        let set = ScaleSet::from_scores([6, 4, 5, 6, 7, 6]);
        assert!((set.mean() - 34.0 / 6.0).abs() < f64::EPSILON);
    }
}
