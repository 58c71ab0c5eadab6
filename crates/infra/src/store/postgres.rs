//! Postgres-backed ledger store.
//!
//! One unit of work is one SQL transaction. The item's row in
//! `inventory_snapshots` is the lock: it is created on demand and taken with
//! `SELECT ... FOR UPDATE` under a transaction-local `lock_timeout`.
//!
//! ## Error Mapping
//!
//! | PostgreSQL Error Code | LedgerStoreError | Scenario |
//! |-----------------------|------------------|----------|
//! | `55P03` (lock_not_available) | `LockTimeout` / `Conflict` | Snapshot row held past `lock_timeout` |
//! | `40P01` (deadlock_detected) | `Conflict` | Two units locking in opposite order |
//! | `40001` (serialization_failure) | `Conflict` | Concurrent replay collision |
//! | `23505` (unique_violation) | `Conflict` | Concurrent snapshot creation |
//! | other / pool / network | `Backend` | |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{instrument, Span};
use uuid::Uuid;

use stockbook_core::{EventId, ItemId, PartyId};
use stockbook_ledger::{
    CostUpdate, InventorySnapshot, Item, LedgerEvent, NewLedgerEvent, OperationKind,
};

use super::{ItemLedgerTx, LedgerStore, LedgerStoreError};

const SCHEMA: &str = include_str!("../../migrations/0001_stock_ledger.sql");

const EVENT_COLUMNS: &str = "id, item_id, party_id, kind, event_date, quantity, unit_price, \
     total_price, description, cogs, is_cogs_provisional";

/// Postgres-backed ledger store.
///
/// `Send + Sync`; all statements go through the SQLx pool.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str) -> Result<Self, LedgerStoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the ledger tables if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), LedgerStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    /// Insert or update catalog data for an item.
    #[instrument(skip(self, item), fields(item_id = %item.id), err)]
    pub async fn register_item(&self, item: &Item) -> Result<(), LedgerStoreError> {
        sqlx::query(
            r#"
            INSERT INTO items (id, name, is_consignment, commission_amount, commission_percent)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                is_consignment = EXCLUDED.is_consignment,
                commission_amount = EXCLUDED.commission_amount,
                commission_percent = EXCLUDED.commission_percent
            "#,
        )
        .bind(item.id.as_uuid())
        .bind(&item.name)
        .bind(item.is_consignment)
        .bind(item.commission_amount)
        .bind(item.commission_percent)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("register_item", e))?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    type Tx = PostgresItemTx;

    #[instrument(
        skip(self),
        fields(item_id = %item_id, timeout_ms = timeout.as_millis() as u64),
        err
    )]
    async fn lock_item(
        &self,
        item_id: ItemId,
        timeout: Duration,
    ) -> Result<Self::Tx, LedgerStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // SET does not take bind parameters.
        let set_timeout = format!("SET LOCAL lock_timeout = '{}ms'", timeout.as_millis().max(1));
        sqlx::query(&set_timeout)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;

        let item = sqlx::query_as::<_, ItemRow>(
            r#"
            SELECT id, name, is_consignment, commission_amount, commission_percent
            FROM items
            WHERE id = $1
            "#,
        )
        .bind(item_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_item", e))?
        .ok_or(LedgerStoreError::ItemNotFound(item_id))?;

        sqlx::query(
            "INSERT INTO inventory_snapshots (item_id) VALUES ($1) ON CONFLICT (item_id) DO NOTHING",
        )
        .bind(item_id.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_lock_error(item_id, e))?;

        let snapshot = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT quantity_on_hand, last_acquisition_cost, average_cost
            FROM inventory_snapshots
            WHERE item_id = $1
            FOR UPDATE
            "#,
        )
        .bind(item_id.as_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_lock_error(item_id, e))?;

        Ok(PostgresItemTx {
            tx,
            item: item.into(),
            snapshot: snapshot.into(),
        })
    }

    async fn item_ids(&self) -> Result<Vec<ItemId>, LedgerStoreError> {
        let ids: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM items ORDER BY id")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("item_ids", e))?;
        Ok(ids.into_iter().map(ItemId::from_uuid).collect())
    }

    async fn snapshot(&self, item_id: ItemId) -> Result<InventorySnapshot, LedgerStoreError> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT quantity_on_hand, last_acquisition_cost, average_cost
            FROM inventory_snapshots
            WHERE item_id = $1
            "#,
        )
        .bind(item_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("snapshot", e))?;
        Ok(row.map(Into::into).unwrap_or_default())
    }

    #[instrument(skip(self), fields(item_id = %item_id, event_count), err)]
    async fn events(&self, item_id: ItemId) -> Result<Vec<LedgerEvent>, LedgerStoreError> {
        let query = format!(
            "SELECT {EVENT_COLUMNS} FROM ledger_events WHERE item_id = $1 ORDER BY event_date, id"
        );
        let rows = sqlx::query_as::<_, EventRow>(&query)
            .bind(item_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("events", e))?;

        Span::current().record("event_count", rows.len());
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

/// Unit of work over one item, backed by an open SQL transaction.
///
/// Dropping it without [`ItemLedgerTx::commit`] rolls the transaction back.
#[derive(Debug)]
pub struct PostgresItemTx {
    tx: Transaction<'static, Postgres>,
    item: Item,
    snapshot: InventorySnapshot,
}

#[async_trait]
impl ItemLedgerTx for PostgresItemTx {
    fn item(&self) -> &Item {
        &self.item
    }

    fn snapshot(&self) -> InventorySnapshot {
        self.snapshot
    }

    async fn latest_event_date(&mut self) -> Result<Option<NaiveDate>, LedgerStoreError> {
        sqlx::query_scalar("SELECT MAX(event_date) FROM ledger_events WHERE item_id = $1")
            .bind(self.item.id.as_uuid())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("latest_event_date", e))
    }

    async fn insert_event(
        &mut self,
        event: &NewLedgerEvent,
    ) -> Result<LedgerEvent, LedgerStoreError> {
        let query = format!(
            r#"
            INSERT INTO ledger_events
                (item_id, party_id, kind, event_date, quantity, unit_price, total_price, description)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {EVENT_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, EventRow>(&query)
            .bind(event.item_id.as_uuid())
            .bind(event.party_id.map(Uuid::from))
            .bind(event.kind.code())
            .bind(event.event_date)
            .bind(event.quantity)
            .bind(event.unit_price)
            .bind(event.total_price)
            .bind(event.description.as_deref())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_event", e))?;
        Ok(row.into())
    }

    async fn delete_event(&mut self, event_id: EventId) -> Result<(), LedgerStoreError> {
        let result = sqlx::query("DELETE FROM ledger_events WHERE id = $1 AND item_id = $2")
            .bind(event_id.get())
            .bind(self.item.id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_event", e))?;
        if result.rows_affected() == 0 {
            return Err(LedgerStoreError::EventNotFound(event_id));
        }
        Ok(())
    }

    async fn load_events(&mut self) -> Result<Vec<LedgerEvent>, LedgerStoreError> {
        let query = format!(
            "SELECT {EVENT_COLUMNS} FROM ledger_events WHERE item_id = $1 ORDER BY event_date, id"
        );
        let rows = sqlx::query_as::<_, EventRow>(&query)
            .bind(self.item.id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("load_events", e))?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn write_costs(&mut self, updates: &[CostUpdate]) -> Result<(), LedgerStoreError> {
        if updates.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = updates.iter().map(|u| u.event_id.get()).collect();
        let cogs: Vec<Option<i64>> = updates.iter().map(|u| u.cogs).collect();
        let provisional: Vec<bool> = updates.iter().map(|u| u.is_provisional).collect();

        let result = sqlx::query(
            r#"
            UPDATE ledger_events AS e
            SET cogs = u.cogs, is_cogs_provisional = u.provisional
            FROM UNNEST($1::bigint[], $2::bigint[], $3::bool[]) AS u(id, cogs, provisional)
            WHERE e.id = u.id AND e.item_id = $4
            "#,
        )
        .bind(&ids)
        .bind(&cogs)
        .bind(&provisional)
        .bind(self.item.id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("write_costs", e))?;

        if result.rows_affected() != updates.len() as u64 {
            return Err(LedgerStoreError::Conflict(format!(
                "cost write-back touched {} of {} events",
                result.rows_affected(),
                updates.len()
            )));
        }
        Ok(())
    }

    async fn save_snapshot(
        &mut self,
        snapshot: &InventorySnapshot,
    ) -> Result<(), LedgerStoreError> {
        sqlx::query(
            r#"
            UPDATE inventory_snapshots
            SET quantity_on_hand = $2,
                last_acquisition_cost = $3,
                average_cost = $4,
                updated_at = NOW()
            WHERE item_id = $1
            "#,
        )
        .bind(self.item.id.as_uuid())
        .bind(snapshot.quantity_on_hand)
        .bind(snapshot.last_acquisition_cost)
        .bind(snapshot.average_cost)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_snapshot", e))?;
        self.snapshot = *snapshot;
        Ok(())
    }

    async fn commit(self) -> Result<(), LedgerStoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }
}

#[derive(Debug, FromRow)]
struct ItemRow {
    id: Uuid,
    name: String,
    is_consignment: bool,
    commission_amount: Option<i64>,
    commission_percent: Option<Decimal>,
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        Item {
            id: ItemId::from_uuid(row.id),
            name: row.name,
            is_consignment: row.is_consignment,
            commission_amount: row.commission_amount,
            commission_percent: row.commission_percent,
        }
    }
}

#[derive(Debug, FromRow)]
struct SnapshotRow {
    quantity_on_hand: i64,
    last_acquisition_cost: Option<i64>,
    average_cost: Option<i64>,
}

impl From<SnapshotRow> for InventorySnapshot {
    fn from(row: SnapshotRow) -> Self {
        InventorySnapshot {
            quantity_on_hand: row.quantity_on_hand,
            last_acquisition_cost: row.last_acquisition_cost,
            average_cost: row.average_cost,
        }
    }
}

#[derive(Debug, FromRow)]
struct EventRow {
    id: i64,
    item_id: Uuid,
    party_id: Option<Uuid>,
    kind: String,
    event_date: NaiveDate,
    quantity: i64,
    unit_price: i64,
    total_price: i64,
    description: Option<String>,
    cogs: Option<i64>,
    is_cogs_provisional: bool,
}

impl From<EventRow> for LedgerEvent {
    fn from(row: EventRow) -> Self {
        LedgerEvent {
            id: EventId::new(row.id),
            item_id: ItemId::from_uuid(row.item_id),
            party_id: row.party_id.map(PartyId::from_uuid),
            kind: OperationKind::from_code(&row.kind),
            event_date: row.event_date,
            quantity: row.quantity,
            unit_price: row.unit_price,
            total_price: row.total_price,
            description: row.description,
            cogs: row.cogs,
            is_cogs_provisional: row.is_cogs_provisional,
        }
    }
}

/// Like [`map_sqlx_error`], but a lock wait past `lock_timeout` names the item.
fn map_lock_error(item_id: ItemId, err: sqlx::Error) -> LedgerStoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("55P03") {
            return LedgerStoreError::LockTimeout { item_id };
        }
    }
    map_sqlx_error("lock_item", err)
}

/// Map SQLx errors to `LedgerStoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // lock_not_available, deadlock_detected, serialization_failure
                Some("55P03") | Some("40P01") | Some("40001") => LedgerStoreError::Conflict(msg),
                // Unique violation
                Some("23505") => LedgerStoreError::Conflict(msg),
                _ => LedgerStoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            LedgerStoreError::Backend(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::RowNotFound => {
            LedgerStoreError::Backend(format!("unexpected row not found in {}", operation))
        }
        _ => LedgerStoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}
