use async_trait::async_trait;
use chrono::Utc;
use dealgate_core::{NewOpportunity, Opportunity, OpportunityPatch, Vendor};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::{ChangeEvent, ChangeKind, OpportunityStore, StoreError, CHANGE_FEED_CAPACITY};

/// Process-local store used by tests and `--memory` mode.
#[derive(Debug)]
pub struct MemoryOpportunityStore {
    rows: RwLock<Vec<Opportunity>>,
    vendors: Vec<Vendor>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Default for MemoryOpportunityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryOpportunityStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            rows: RwLock::new(Vec::new()),
            vendors: Vec::new(),
            changes,
        }
    }

    pub fn with_opportunities(self, rows: Vec<Opportunity>) -> Self {
        Self {
            rows: RwLock::new(rows),
            ..self
        }
    }

    pub fn with_vendor_table(self, vendors: Vec<Vendor>) -> Self {
        Self { vendors, ..self }
    }

    fn notify(&self, kind: ChangeKind, id: Uuid) {
        // No subscribers is fine.
        let _ = self.changes.send(ChangeEvent::opportunities(kind, id));
    }
}

#[async_trait]
impl OpportunityStore for MemoryOpportunityStore {
    async fn list_opportunities(&self) -> Result<Vec<Opportunity>, StoreError> {
        let mut rows = self.rows.read().await.clone();
        rows.sort_by(|a, b| b.value.total_cmp(&a.value));
        Ok(rows)
    }

    async fn vendor_table(&self) -> Result<Vec<Vendor>, StoreError> {
        Ok(self.vendors.clone())
    }

    async fn distinct_vendor_names(&self) -> Result<Vec<String>, StoreError> {
        let rows = self.rows.read().await;
        let mut names: Vec<String> = rows
            .iter()
            .map(|o| o.vendor.trim())
            .filter(|v| !v.is_empty())
            .map(ToString::to_string)
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn insert(&self, record: NewOpportunity) -> Result<Opportunity, StoreError> {
        let opportunity = record.into_opportunity(Uuid::new_v4(), Utc::now());
        self.rows.write().await.push(opportunity.clone());
        self.notify(ChangeKind::Insert, opportunity.id);
        Ok(opportunity)
    }

    async fn update(&self, id: Uuid, patch: OpportunityPatch) -> Result<Opportunity, StoreError> {
        let updated = {
            let mut rows = self.rows.write().await;
            let row = rows
                .iter_mut()
                .find(|o| o.id == id)
                .ok_or(StoreError::NotFound(id))?;
            row.apply_patch(&patch);
            row.clone()
        };
        self.notify(ChangeKind::Update, id);
        Ok(updated)
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        {
            let mut rows = self.rows.write().await;
            let before = rows.len();
            rows.retain(|o| o.id != id);
            if rows.len() == before {
                return Err(StoreError::NotFound(id));
            }
        }
        self.notify(ChangeKind::Delete, id);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealgate_core::OpportunityDraft;

    fn record(name: &str, value: f64) -> NewOpportunity {
        OpportunityDraft::new(name, "Acme", value)
            .validate("Jordi", Utc::now().date_naive())
            .expect("valid draft")
    }

    #[tokio::test]
    async fn list_is_ordered_by_value_descending() {
        let store = MemoryOpportunityStore::new();
        store.insert(record("small", 10.0)).await.expect("insert");
        store.insert(record("large", 1_000.0)).await.expect("insert");
        store.insert(record("medium", 100.0)).await.expect("insert");

        let names: Vec<String> = store
            .list_opportunities()
            .await
            .expect("list")
            .into_iter()
            .map(|o| o.name)
            .collect();
        assert_eq!(names, vec!["large", "medium", "small"]);
    }

    #[tokio::test]
    async fn every_mutation_is_broadcast() {
        let store = MemoryOpportunityStore::new();
        let mut feed = store.subscribe();

        let created = store.insert(record("Deal", 10.0)).await.expect("insert");
        let patch = OpportunityPatch {
            value: Some(20.0),
            ..Default::default()
        };
        let updated = store.update(created.id, patch).await.expect("update");
        assert_eq!(updated.value, 20.0);
        store.delete(created.id).await.expect("delete");

        let kinds: Vec<ChangeKind> = vec![
            feed.recv().await.expect("insert event").kind,
            feed.recv().await.expect("update event").kind,
            feed.recv().await.expect("delete event").kind,
        ];
        assert_eq!(kinds, vec![ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete]);
    }

    #[tokio::test]
    async fn missing_rows_report_not_found() {
        let store = MemoryOpportunityStore::new();
        let id = Uuid::new_v4();
        assert!(matches!(
            store.update(id, OpportunityPatch::default()).await,
            Err(StoreError::NotFound(missing)) if missing == id
        ));
        assert!(matches!(store.delete(id).await, Err(StoreError::NotFound(_))));
    }
}
