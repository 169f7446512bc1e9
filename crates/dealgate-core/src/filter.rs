//! List filters and per-salesperson visibility.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::{is_stale, STALE_CRITICAL_DAYS, STALE_WARNING_DAYS};
use crate::opportunity::{Opportunity, Vendor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InactivityFilter {
    #[default]
    #[serde(rename = "all")]
    All,
    #[serde(rename = "7days")]
    Over7Days,
    #[serde(rename = "30days")]
    Over30Days,
}

impl InactivityFilter {
    pub fn threshold_days(self) -> Option<i64> {
        match self {
            InactivityFilter::All => None,
            InactivityFilter::Over7Days => Some(STALE_WARNING_DAYS),
            InactivityFilter::Over30Days => Some(STALE_CRITICAL_DAYS),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InactivityFilter::All => "all",
            InactivityFilter::Over7Days => "7days",
            InactivityFilter::Over30Days => "30days",
        }
    }
}

impl FromStr for InactivityFilter {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "" | "all" => Ok(InactivityFilter::All),
            "7days" => Ok(InactivityFilter::Over7Days),
            "30days" => Ok(InactivityFilter::Over30Days),
            other => Err(format!("unknown inactivity filter `{other}` (expected all, 7days or 30days)")),
        }
    }
}

impl fmt::Display for InactivityFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpportunityFilter {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub stage: Option<u8>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub inactivity: InactivityFilter,
}

impl OpportunityFilter {
    pub fn matches(&self, opportunity: &Opportunity, now: DateTime<Utc>) -> bool {
        if let Some(term) = self.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let term = term.to_lowercase();
            let hit = [
                Some(opportunity.name.as_str()),
                Some(opportunity.client.as_str()),
                opportunity.product.as_deref(),
            ]
            .into_iter()
            .flatten()
            .any(|field| field.to_lowercase().contains(&term));
            if !hit {
                return false;
            }
        }
        if self.stage.is_some_and(|stage| stage != opportunity.stage) {
            return false;
        }
        if let Some(vendor) = self.vendor.as_deref().filter(|v| !v.is_empty()) {
            if opportunity.vendor != vendor {
                return false;
            }
        }
        match self.inactivity.threshold_days() {
            Some(days) => is_stale(opportunity.last_update, now, days),
            None => true,
        }
    }

    pub fn apply<'a>(
        &self,
        opportunities: impl IntoIterator<Item = &'a Opportunity>,
        now: DateTime<Utc>,
    ) -> Vec<Opportunity> {
        opportunities
            .into_iter()
            .filter(|o| self.matches(o, now))
            .cloned()
            .collect()
    }
}

pub fn is_admin(current_user: &str, vendors: &[Vendor]) -> bool {
    vendors
        .iter()
        .any(|v| v.is_admin && v.name == current_user)
}

/// Admins and an unset user see the whole book; everyone else sees their own deals.
pub fn visible_to(
    opportunities: &[Opportunity],
    current_user: Option<&str>,
    vendors: &[Vendor],
) -> Vec<Opportunity> {
    match current_user {
        Some(user) if !is_admin(user, vendors) => opportunities
            .iter()
            .filter(|o| o.vendor == user)
            .cloned()
            .collect(),
        _ => opportunities.to_vec(),
    }
}

pub fn dashboard_scope(
    opportunities: &[Opportunity],
    current_user: Option<&str>,
    vendors: &[Vendor],
    vendor_selection: Option<&str>,
) -> Vec<Opportunity> {
    let visible = visible_to(opportunities, current_user, vendors);
    match vendor_selection.filter(|v| !v.is_empty()) {
        Some(vendor) => visible.into_iter().filter(|o| o.vendor == vendor).collect(),
        None => visible,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opportunity::OpportunityDraft;
    use chrono::{NaiveDate, TimeZone};
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 15, 12, 0, 0).unwrap()
    }

    fn opp(name: &str, client: &str, vendor: &str, stage: u8, last_update: NaiveDate) -> Opportunity {
        let mut draft = OpportunityDraft::new(name, client, 1_000.0);
        draft.stage = stage;
        draft.vendor = Some(vendor.to_string());
        draft
            .validate("Ana", last_update)
            .unwrap()
            .into_opportunity(Uuid::new_v4(), now())
    }

    fn vendors() -> Vec<Vendor> {
        let mut boss = Vendor::new("Tomás");
        boss.is_admin = true;
        vec![boss, Vendor::new("Jordi"), Vendor::new("Carlos")]
    }

    fn book() -> Vec<Opportunity> {
        let recent = NaiveDate::from_ymd_opt(2026, 10, 14).unwrap();
        let old = NaiveDate::from_ymd_opt(2026, 9, 1).unwrap();
        let mut with_product = opp("Renewal", "Globex", "Carlos", 3, recent);
        with_product.product = Some("Analytics Suite".into());
        vec![
            opp("Deal A", "Acme", "Jordi", 1, old),
            opp("Deal B", "Initech", "Jordi", 2, recent),
            with_product,
        ]
    }

    #[test]
    fn inactivity_filter_parses_known_values() {
        assert_eq!("all".parse::<InactivityFilter>(), Ok(InactivityFilter::All));
        assert_eq!("7days".parse::<InactivityFilter>(), Ok(InactivityFilter::Over7Days));
        assert_eq!("30days".parse::<InactivityFilter>(), Ok(InactivityFilter::Over30Days));
        assert!("weekly".parse::<InactivityFilter>().is_err());
        let decoded: InactivityFilter = serde_json::from_str("\"30days\"").unwrap();
        assert_eq!(decoded, InactivityFilter::Over30Days);
    }

    #[test]
    fn search_is_case_insensitive_over_name_client_and_product() {
        let book = book();
        let by_client = OpportunityFilter {
            search: Some("acME".into()),
            ..Default::default()
        };
        assert_eq!(by_client.apply(&book, now()).len(), 1);

        let by_product = OpportunityFilter {
            search: Some("analytics".into()),
            ..Default::default()
        };
        let hits = by_product.apply(&book, now());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Renewal");

        let blank = OpportunityFilter {
            search: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(blank.apply(&book, now()).len(), 3);
    }

    #[test]
    fn stage_vendor_and_inactivity_combine() {
        let book = book();
        let filter = OpportunityFilter {
            vendor: Some("Jordi".into()),
            inactivity: InactivityFilter::Over30Days,
            ..Default::default()
        };
        let hits = filter.apply(&book, now());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Deal A");

        let filter = OpportunityFilter {
            stage: Some(2),
            ..Default::default()
        };
        assert_eq!(filter.apply(&book, now())[0].name, "Deal B");
    }

    #[test]
    fn salespeople_see_only_their_own_deals() {
        let book = book();
        let vendors = vendors();
        assert_eq!(visible_to(&book, Some("Jordi"), &vendors).len(), 2);
        assert_eq!(visible_to(&book, Some("Carlos"), &vendors).len(), 1);
        assert_eq!(visible_to(&book, Some("Tomás"), &vendors).len(), 3);
        assert_eq!(visible_to(&book, None, &vendors).len(), 3);
        assert!(is_admin("Tomás", &vendors));
        assert!(!is_admin("Jordi", &vendors));
    }

    #[test]
    fn dashboard_scope_narrows_by_selected_vendor() {
        let book = book();
        let vendors = vendors();
        assert_eq!(dashboard_scope(&book, Some("Tomás"), &vendors, Some("Carlos")).len(), 1);
        assert_eq!(dashboard_scope(&book, Some("Tomás"), &vendors, Some("")).len(), 3);
        assert!(dashboard_scope(&book, Some("Jordi"), &vendors, Some("Carlos")).is_empty());
    }
}
