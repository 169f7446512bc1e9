//! Postgres-backed store with a LISTEN/NOTIFY change feed.

use std::time::Duration;

use async_trait::async_trait;
use dealgate_core::{NewOpportunity, Opportunity, OpportunityPatch, Vendor};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgListener, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{ChangeEvent, OpportunityStore, StoreError, CHANGE_FEED_CAPACITY};

/// Channel the row trigger in `migrations/` notifies on.
pub const CHANGE_CHANNEL: &str = "opportunities_changes";

#[derive(Debug, Clone)]
pub struct PgOpportunityStore {
    pool: PgPool,
    changes: broadcast::Sender<ChangeEvent>,
}

impl PgOpportunityStore {
    pub fn new(pool: PgPool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self { pool, changes }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }

    /// Forwards trigger notifications into the broadcast feed. A lost
    /// connection is retried with backoff; the task ends when the pool closes.
    pub async fn listen_for_changes(&self) -> Result<JoinHandle<()>, StoreError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(CHANGE_CHANNEL).await?;
        let changes = self.changes.clone();

        let task = async move {
            let mut backoff = LISTEN_RETRY_MIN;
            loop {
                let notification = match listener.recv().await {
                    Ok(notification) => {
                        backoff = LISTEN_RETRY_MIN;
                        notification
                    }
                    Err(sqlx::Error::PoolClosed) => {
                        info!("pool closed; change listener stopping");
                        break;
                    }
                    Err(err) => {
                        warn!(error = %err, retry_in = ?backoff, "change listener lost its connection");
                        tokio::time::sleep(backoff).await;
                        backoff = next_backoff(backoff);
                        continue;
                    }
                };
                match serde_json::from_str::<ChangeEvent>(notification.payload()) {
                    Ok(event) => {
                        debug!(kind = ?event.kind, id = ?event.id, "row change");
                        let _ = changes.send(event);
                    }
                    Err(err) => warn!(error = %err, payload = notification.payload(), "unreadable change payload"),
                }
            }
        };
        Ok(tokio::spawn(task.instrument(info_span!("pg_change_feed", channel = CHANGE_CHANNEL))))
    }
}

const LISTEN_RETRY_MIN: Duration = Duration::from_millis(500);
const LISTEN_RETRY_MAX: Duration = Duration::from_secs(30);

fn next_backoff(current: Duration) -> Duration {
    current.saturating_mul(2).min(LISTEN_RETRY_MAX)
}

fn decode_record(row: &PgRow) -> Result<Opportunity, StoreError> {
    let record: JsonValue = row.try_get("record")?;
    serde_json::from_value(record).map_err(|err| StoreError::Decode(err.to_string()))
}

#[async_trait]
impl OpportunityStore for PgOpportunityStore {
    async fn list_opportunities(&self) -> Result<Vec<Opportunity>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT to_jsonb(o) AS record
              FROM opportunities o
             ORDER BY o.value DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            match decode_record(row) {
                Ok(opportunity) => out.push(opportunity),
                Err(err) => warn!(error = %err, "skipping undecodable opportunity row"),
            }
        }
        Ok(out)
    }

    async fn vendor_table(&self) -> Result<Vec<Vendor>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT name, email, role, is_admin
              FROM vendors
             WHERE is_active
             ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(Vendor {
                name: row.try_get("name")?,
                email: row.try_get("email")?,
                role: row.try_get("role")?,
                is_admin: row.try_get("is_admin")?,
            });
        }
        Ok(out)
    }

    async fn distinct_vendor_names(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT vendor
              FROM opportunities
             WHERE vendor IS NOT NULL AND btrim(vendor) <> ''
             ORDER BY vendor
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("vendor").map_err(StoreError::from))
            .collect()
    }

    async fn insert(&self, record: NewOpportunity) -> Result<Opportunity, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO opportunities (
                id, name, client, vendor, value, stage, priority, probability,
                last_update, next_action, expected_close, product, industry,
                power_sponsor, sponsor, influencer, support_contact, scales
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            RETURNING to_jsonb(opportunities) AS record
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.name)
        .bind(record.client)
        .bind(record.vendor)
        .bind(record.value)
        .bind(i16::from(record.stage))
        .bind(record.priority.as_str())
        .bind(record.probability)
        .bind(record.last_update)
        .bind(record.next_action)
        .bind(record.expected_close)
        .bind(record.product)
        .bind(record.industry)
        .bind(record.power_sponsor)
        .bind(record.sponsor)
        .bind(record.influencer)
        .bind(record.support_contact)
        .bind(Json(record.scales))
        .fetch_one(&self.pool)
        .await?;
        decode_record(&row)
    }

    async fn update(&self, id: Uuid, patch: OpportunityPatch) -> Result<Opportunity, StoreError> {
        let mut builder = QueryBuilder::<Postgres>::new("UPDATE opportunities SET ");
        {
            let mut set = builder.separated(", ");
            set.push("updated_at = NOW()");
            if let Some(name) = patch.name {
                set.push("name = ").push_bind_unseparated(name);
            }
            if let Some(client) = patch.client {
                set.push("client = ").push_bind_unseparated(client);
            }
            if let Some(vendor) = patch.vendor {
                set.push("vendor = ").push_bind_unseparated(vendor);
            }
            if let Some(value) = patch.value {
                set.push("value = ").push_bind_unseparated(value);
            }
            if let Some(stage) = patch.stage {
                set.push("stage = ").push_bind_unseparated(i16::from(stage));
            }
            if let Some(priority) = patch.priority {
                set.push("priority = ").push_bind_unseparated(priority.as_str());
            }
            if let Some(probability) = patch.probability {
                set.push("probability = ").push_bind_unseparated(probability);
            }
            if let Some(last_update) = patch.last_update {
                set.push("last_update = ").push_bind_unseparated(last_update);
            }
            if let Some(next_action) = patch.next_action {
                set.push("next_action = ").push_bind_unseparated(next_action);
            }
            if let Some(expected_close) = patch.expected_close {
                set.push("expected_close = ").push_bind_unseparated(expected_close);
            }
            if let Some(product) = patch.product {
                set.push("product = ").push_bind_unseparated(product);
            }
            if let Some(industry) = patch.industry {
                set.push("industry = ").push_bind_unseparated(industry);
            }
            if let Some(power_sponsor) = patch.power_sponsor {
                set.push("power_sponsor = ").push_bind_unseparated(power_sponsor);
            }
            if let Some(sponsor) = patch.sponsor {
                set.push("sponsor = ").push_bind_unseparated(sponsor);
            }
            if let Some(influencer) = patch.influencer {
                set.push("influencer = ").push_bind_unseparated(influencer);
            }
            if let Some(support_contact) = patch.support_contact {
                set.push("support_contact = ").push_bind_unseparated(support_contact);
            }
            if let Some(scales) = patch.scales {
                set.push("scales = ").push_bind_unseparated(Json(scales));
            }
        }
        builder
            .push(" WHERE id = ")
            .push_bind(id)
            .push(" RETURNING to_jsonb(opportunities) AS record");

        let row = builder
            .build()
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        decode_record(&row)
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM opportunities WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}
