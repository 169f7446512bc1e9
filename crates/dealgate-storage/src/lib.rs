//! Opportunity persistence, change feed, vendor roster, and session file for Dealgate.

use async_trait::async_trait;
use dealgate_core::{NewOpportunity, Opportunity, OpportunityPatch, Vendor};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

pub mod memory;
pub mod postgres;
pub mod roster;
pub mod session;

pub use memory::MemoryOpportunityStore;
pub use postgres::{PgOpportunityStore, CHANGE_CHANNEL};
pub use roster::VendorRoster;
pub use session::SessionStore;

pub const CRATE_NAME: &str = "dealgate-storage";

/// Capacity of the in-process change feed before slow subscribers lag.
pub const CHANGE_FEED_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    #[serde(default)]
    pub id: Option<Uuid>,
}

impl ChangeEvent {
    pub fn opportunities(kind: ChangeKind, id: Uuid) -> Self {
        Self {
            table: "opportunities".to_string(),
            kind,
            id: Some(id),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("opportunity {0} not found")]
    NotFound(Uuid),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("could not decode stored record: {0}")]
    Decode(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait OpportunityStore: Send + Sync {
    /// Every opportunity, highest value first, normalized on the way out.
    async fn list_opportunities(&self) -> Result<Vec<Opportunity>, StoreError>;

    /// Active rows of the explicit vendor table. Empty when none are configured.
    async fn vendor_table(&self) -> Result<Vec<Vendor>, StoreError>;

    /// Non-empty vendor names referenced by opportunities, sorted and deduplicated.
    async fn distinct_vendor_names(&self) -> Result<Vec<String>, StoreError>;

    async fn insert(&self, record: NewOpportunity) -> Result<Opportunity, StoreError>;

    async fn update(&self, id: Uuid, patch: OpportunityPatch) -> Result<Opportunity, StoreError>;

    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;
}

/// Vendor table first, then names found on opportunities, then the roster
/// defaults. Failures along the way fall through to the next source.
pub async fn resolve_vendors(store: &dyn OpportunityStore, roster: &VendorRoster) -> Vec<Vendor> {
    match store.vendor_table().await {
        Ok(vendors) if !vendors.is_empty() => {
            debug!(count = vendors.len(), "vendors resolved from vendor table");
            return vendors
                .into_iter()
                .map(|mut v| {
                    v.is_admin = v.is_admin || roster.is_admin(&v.name);
                    v
                })
                .collect();
        }
        Ok(_) => {}
        Err(err) => warn!(error = %err, "vendor table unavailable; falling back to opportunity vendors"),
    }

    match store.distinct_vendor_names().await {
        Ok(names) if !names.is_empty() => {
            debug!(count = names.len(), "vendors resolved from opportunities");
            return names.iter().map(|name| roster.vendor(name)).collect();
        }
        Ok(_) => {}
        Err(err) => warn!(error = %err, "could not list opportunity vendors; using default roster"),
    }

    roster.default_vendors()
}
