use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use uuid::Uuid;

use crate::app::ports::SubscriptionStore;
use crate::domain::{ContainerType, DataProductType, Subscription};
use crate::error::StoreError;

const COLUMNS: &str = "id, created_at, updated_at, service_mrn, service_url, container_type, \
                       data_product_type, data_reference, subscription_id, mms_subject";

/// SQLite-backed subscription registry.
pub struct SqliteSubscriptionStore {
    conn: Mutex<Connection>,
}

impl SqliteSubscriptionStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS subscriptions (
                id                 INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at         TEXT,
                updated_at         TEXT,
                service_mrn        TEXT NOT NULL UNIQUE,
                service_url        TEXT NOT NULL,
                container_type     INTEGER,
                data_product_type  TEXT,
                data_reference     TEXT,
                subscription_id    TEXT,
                mms_subject        TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_subscriptions_subscription_id
                ON subscriptions (subscription_id);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn query_one(
        conn: &Connection,
        clause: &str,
        value: &str,
    ) -> Result<Option<Subscription>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM subscriptions WHERE {clause} = ?1");
        let row = conn
            .query_row(&sql, params![value], SubscriptionRow::read)
            .optional()?;
        row.map(Subscription::try_from).transpose()
    }
}

/// Raw column values, converted to a [`Subscription`] outside of rusqlite's row callback.
struct SubscriptionRow {
    id: i64,
    created_at: Option<String>,
    updated_at: Option<String>,
    service_mrn: String,
    service_url: String,
    container_type: Option<i64>,
    data_product_type: Option<String>,
    data_reference: Option<String>,
    subscription_id: Option<String>,
    mms_subject: String,
}

impl SubscriptionRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            created_at: row.get(1)?,
            updated_at: row.get(2)?,
            service_mrn: row.get(3)?,
            service_url: row.get(4)?,
            container_type: row.get(5)?,
            data_product_type: row.get(6)?,
            data_reference: row.get(7)?,
            subscription_id: row.get(8)?,
            mms_subject: row.get(9)?,
        })
    }
}

fn parse_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    value
        .map(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| StoreError::Corrupt(format!("timestamp '{raw}': {e}")))
        })
        .transpose()
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = StoreError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Subscription {
            id: Some(row.id),
            created_at: parse_timestamp(row.created_at)?,
            updated_at: parse_timestamp(row.updated_at)?,
            container_type: row
                .container_type
                .map(ContainerType::try_from)
                .transpose()
                .map_err(StoreError::Corrupt)?,
            data_product_type: row.data_product_type.as_deref().map(DataProductType::parse),
            data_reference: row.data_reference,
            subscription_id: row
                .subscription_id
                .map(|raw| {
                    Uuid::parse_str(&raw)
                        .map_err(|e| StoreError::Corrupt(format!("subscription id '{raw}': {e}")))
                })
                .transpose()?,
            service_mrn: row.service_mrn,
            service_url: row.service_url,
            mms_subject: row.mms_subject,
        })
    }
}

fn is_constraint_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(failure, _) if failure.code == ErrorCode::ConstraintViolation
    )
}

impl SubscriptionStore for SqliteSubscriptionStore {
    fn get(&self, service_mrn: &str) -> Result<Option<Subscription>, StoreError> {
        Self::query_one(&self.conn(), "service_mrn", service_mrn)
    }

    fn get_by_subscription_id(&self, subscription_id: Uuid) -> Result<Option<Subscription>, StoreError> {
        Self::query_one(&self.conn(), "subscription_id", &subscription_id.to_string())
    }

    fn list(&self) -> Result<Vec<Subscription>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM subscriptions ORDER BY id"))?;
        let rows = stmt
            .query_map([], SubscriptionRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(Subscription::try_from).collect()
    }

    fn insert(&self, subscription: &Subscription) -> Result<Subscription, StoreError> {
        let conn = self.conn();
        let result = conn.execute(
            "INSERT INTO subscriptions (created_at, updated_at, service_mrn, service_url, container_type, \
             data_product_type, data_reference, subscription_id, mms_subject) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                subscription.created_at.map(|t| t.to_rfc3339()),
                subscription.updated_at.map(|t| t.to_rfc3339()),
                subscription.service_mrn,
                subscription.service_url,
                subscription.container_type.map(|c| c as i64),
                subscription.data_product_type.map(|d| d.as_str()),
                subscription.data_reference,
                subscription.subscription_id.map(|id| id.to_string()),
                subscription.mms_subject,
            ],
        );
        match result {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                return Err(StoreError::AlreadyExists(subscription.service_mrn.clone()))
            }
            Err(e) => return Err(e.into()),
        }
        Self::query_one(&conn, "service_mrn", &subscription.service_mrn)?
            .ok_or_else(|| StoreError::Corrupt("inserted subscription vanished".into()))
    }

    fn upsert(&self, subscription: &Subscription) -> Result<Subscription, StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO subscriptions (created_at, updated_at, service_mrn, service_url, container_type, \
             data_product_type, data_reference, subscription_id, mms_subject) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
             ON CONFLICT(service_mrn) DO UPDATE SET \
                updated_at = excluded.updated_at, \
                service_url = excluded.service_url, \
                container_type = excluded.container_type, \
                data_product_type = excluded.data_product_type, \
                data_reference = excluded.data_reference, \
                subscription_id = excluded.subscription_id, \
                mms_subject = excluded.mms_subject",
            params![
                subscription.created_at.map(|t| t.to_rfc3339()),
                subscription.updated_at.map(|t| t.to_rfc3339()),
                subscription.service_mrn,
                subscription.service_url,
                subscription.container_type.map(|c| c as i64),
                subscription.data_product_type.map(|d| d.as_str()),
                subscription.data_reference,
                subscription.subscription_id.map(|id| id.to_string()),
                subscription.mms_subject,
            ],
        )?;
        Self::query_one(&conn, "service_mrn", &subscription.service_mrn)?
            .ok_or_else(|| StoreError::Corrupt("upserted subscription vanished".into()))
    }

    fn delete(&self, service_mrn: &str) -> Result<bool, StoreError> {
        let removed = self.conn().execute(
            "DELETE FROM subscriptions WHERE service_mrn = ?1",
            params![service_mrn],
        )?;
        Ok(removed > 0)
    }
}

/// Process-local registry for tests and ephemeral deployments.
#[derive(Default)]
pub struct InMemorySubscriptionStore {
    inner: Mutex<InMemoryState>,
}

#[derive(Default)]
struct InMemoryState {
    next_id: i64,
    by_mrn: HashMap<String, Subscription>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl InMemoryState {
    fn assign_id(&mut self, subscription: &Subscription) -> Subscription {
        self.next_id += 1;
        let mut stored = subscription.clone();
        stored.id = Some(self.next_id);
        stored
    }
}

impl SubscriptionStore for InMemorySubscriptionStore {
    fn get(&self, service_mrn: &str) -> Result<Option<Subscription>, StoreError> {
        Ok(self.state().by_mrn.get(service_mrn).cloned())
    }

    fn get_by_subscription_id(&self, subscription_id: Uuid) -> Result<Option<Subscription>, StoreError> {
        Ok(self
            .state()
            .by_mrn
            .values()
            .find(|s| s.subscription_id == Some(subscription_id))
            .cloned())
    }

    fn list(&self) -> Result<Vec<Subscription>, StoreError> {
        let mut all: Vec<Subscription> = self.state().by_mrn.values().cloned().collect();
        all.sort_by_key(|s| s.id);
        Ok(all)
    }

    fn insert(&self, subscription: &Subscription) -> Result<Subscription, StoreError> {
        let mut state = self.state();
        if state.by_mrn.contains_key(&subscription.service_mrn) {
            return Err(StoreError::AlreadyExists(subscription.service_mrn.clone()));
        }
        let stored = state.assign_id(subscription);
        state.by_mrn.insert(stored.service_mrn.clone(), stored.clone());
        Ok(stored)
    }

    fn upsert(&self, subscription: &Subscription) -> Result<Subscription, StoreError> {
        let mut state = self.state();
        let stored = match state.by_mrn.get(&subscription.service_mrn) {
            Some(existing) => Subscription {
                id: existing.id,
                created_at: existing.created_at,
                ..subscription.clone()
            },
            None => state.assign_id(subscription),
        };
        state.by_mrn.insert(stored.service_mrn.clone(), stored.clone());
        Ok(stored)
    }

    fn delete(&self, service_mrn: &str) -> Result<bool, StoreError> {
        Ok(self.state().by_mrn.remove(service_mrn).is_some())
    }
}
