//! Static pipeline stage catalog.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const FIRST_STAGE: u8 = 1;
pub const CLOSED_STAGE: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChecklistItem {
    pub label: &'static str,
    pub key: &'static str,
}

#[derive(Debug, Serialize)]
pub struct Stage {
    pub id: u8,
    pub name: &'static str,
    /// Probability of close, in percent, assigned when a deal enters the stage.
    pub probability: u8,
    pub requirements: &'static [&'static str],
    pub checklist: &'static [ChecklistItem],
}

impl Stage {
    pub fn is_closed(&self) -> bool {
        self.id == CLOSED_STAGE
    }

    pub fn checklist_keys(&self) -> impl Iterator<Item = &'static str> {
        self.checklist.iter().map(|item| item.key)
    }

    pub fn missing_checklist_items(&self, confirmation: &ChecklistConfirmation) -> Vec<&'static str> {
        self.checklist_keys()
            .filter(|key| !confirmation.is_confirmed(key))
            .collect()
    }

    pub fn checklist_complete(&self, confirmation: &ChecklistConfirmation) -> bool {
        self.checklist_keys().all(|key| confirmation.is_confirmed(key))
    }
}

const fn item(label: &'static str, key: &'static str) -> ChecklistItem {
    ChecklistItem { label, key }
}

static STAGES: [Stage; 6] = [
    Stage {
        id: 1,
        name: "Prospecting",
        probability: 0,
        requirements: &["Customer pain identified", "Initial contact established"],
        checklist: &[
            item("Identified the potential company", "company_identified"),
            item("Researched the customer's business", "business_researched"),
            item("Identified a contact person", "contact_identified"),
            item("Made first contact", "first_contact"),
        ],
    },
    Stage {
        id: 2,
        name: "Qualification",
        probability: 20,
        requirements: &["PAIN score >= 5", "POWER score >= 4", "Budget confirmed"],
        checklist: &[
            item("Customer admits the problem (PAIN >= 5)", "pain_admitted"),
            item("Decision maker identified (POWER >= 4)", "decision_maker_identified"),
            item("Available budget confirmed", "budget_confirmed"),
            item("Project timeline defined", "timeline_defined"),
            item("Decision criteria understood", "decision_criteria_understood"),
        ],
    },
    Stage {
        id: 3,
        name: "Presentation",
        probability: 40,
        requirements: &["VISION score >= 5", "Presentation scheduled", "Stakeholders defined"],
        checklist: &[
            item("Solution vision created (VISION >= 5)", "vision_created"),
            item("Demo or presentation delivered", "demo_delivered"),
            item("All stakeholders present", "stakeholders_present"),
            item("Main objections identified", "objections_identified"),
            item("Next steps agreed", "next_steps_agreed"),
        ],
    },
    Stage {
        id: 4,
        name: "Validation/Trial",
        probability: 75,
        requirements: &["VALUE score >= 6", "Trial or POC executed", "ROI validated"],
        checklist: &[
            item("POC or trial started", "poc_started"),
            item("Success criteria defined", "success_criteria_defined"),
            item("ROI calculated and validated (VALUE >= 6)", "roi_validated"),
            item("Results documented", "results_documented"),
            item("Technical approval obtained", "technical_approval"),
        ],
    },
    Stage {
        id: 5,
        name: "Negotiation",
        probability: 90,
        requirements: &["CONTROL score >= 7", "PURCHASE score >= 6", "Proposal sent"],
        checklist: &[
            item("Commercial proposal sent", "proposal_sent"),
            item("Terms negotiated (PURCHASE >= 6)", "terms_negotiated"),
            item("Process under control (CONTROL >= 7)", "process_control"),
            item("Verbal approval received", "verbal_approval"),
            item("Contract in legal review", "legal_review"),
        ],
    },
    Stage {
        id: 6,
        name: "Closed",
        probability: 100,
        requirements: &["Contract signed", "Payment processed"],
        checklist: &[
            item("Contract signed", "contract_signed"),
            item("Purchase order issued", "purchase_order_issued"),
            item("Kickoff scheduled", "kickoff_scheduled"),
            item("Payment processed", "payment_processed"),
        ],
    },
];

pub fn stages() -> &'static [Stage] {
    &STAGES
}

pub fn stage(id: u8) -> Option<&'static Stage> {
    STAGES.iter().find(|s| s.id == id)
}

/// Every stage before `Closed`; the funnel is drawn over these.
pub fn open_stages() -> &'static [Stage] {
    &STAGES[..STAGES.len() - 1]
}

pub fn probability_for(id: u8) -> Option<u8> {
    stage(id).map(|s| s.probability)
}

/// Manual confirmations ticked off by a salesperson, keyed by checklist key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChecklistConfirmation(BTreeMap<String, bool>);

impl ChecklistConfirmation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn confirm(&mut self, key: impl Into<String>) -> &mut Self {
        self.0.insert(key.into(), true);
        self
    }

    pub fn toggle(&mut self, key: impl Into<String>) {
        let entry = self.0.entry(key.into()).or_insert(false);
        *entry = !*entry;
    }

    pub fn confirm_all(stage: &Stage) -> Self {
        let mut confirmation = Self::new();
        for key in stage.checklist_keys() {
            confirmation.confirm(key);
        }
        confirmation
    }

    pub fn is_confirmed(&self, key: &str) -> bool {
        self.0.get(key).copied().unwrap_or(false)
    }
}

impl FromIterator<(String, bool)> for ChecklistConfirmation {
    fn from_iter<I: IntoIterator<Item = (String, bool)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_ordered_with_fixed_probabilities() {
        let ids: Vec<u8> = stages().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
        let probabilities: Vec<u8> = stages().iter().map(|s| s.probability).collect();
        assert_eq!(probabilities, vec![0, 20, 40, 75, 90, 100]);
    }

    #[test]
    fn every_stage_has_a_checklist() {
        for s in stages() {
            assert!(!s.checklist.is_empty(), "stage {} has no checklist", s.id);
        }
        let closing: Vec<&str> = stage(CLOSED_STAGE).unwrap().checklist_keys().collect();
        assert_eq!(
            closing,
            vec!["contract_signed", "purchase_order_issued", "kickoff_scheduled", "payment_processed"]
        );
    }

    #[test]
    fn open_stages_excludes_closed() {
        assert_eq!(open_stages().len(), 5);
        assert!(open_stages().iter().all(|s| !s.is_closed()));
    }

    #[test]
    fn lookup_outside_catalog_is_none() {
        assert!(stage(0).is_none());
        assert!(stage(7).is_none());
        assert_eq!(probability_for(4), Some(75));
    }

    #[test]
    fn checklist_completion_tracks_every_key() {
        let prospecting = stage(1).unwrap();
        let mut confirmation = ChecklistConfirmation::new();
        confirmation.confirm("company_identified").confirm("business_researched");
        assert!(!prospecting.checklist_complete(&confirmation));
        assert_eq!(
            prospecting.missing_checklist_items(&confirmation),
            vec!["contact_identified", "first_contact"]
        );

        confirmation.toggle("contact_identified");
        confirmation.confirm("first_contact");
        assert!(prospecting.checklist_complete(&confirmation));

        confirmation.toggle("first_contact");
        assert!(!prospecting.checklist_complete(&confirmation));
    }

    #[test]
    fn confirmation_deserializes_from_plain_map() {
        let confirmation: ChecklistConfirmation =
            serde_json::from_str(r#"{"first_contact": true, "contact_identified": false}"#).unwrap();
        assert!(confirmation.is_confirmed("first_contact"));
        assert!(!confirmation.is_confirmed("contact_identified"));
        assert!(!confirmation.is_confirmed("missing"));
    }
}
