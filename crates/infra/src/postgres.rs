//! Postgres-backed stock store.
//!
//! Persists balances and movements in PostgreSQL with the ledger's two
//! structural guarantees pushed down to the database:
//!
//! - the unique active-triple invariant is a partial unique index over
//!   `(product_id, warehouse_id, variant)` where `NOT deleted`;
//! - the balance write and the movement append are one transaction, with the
//!   balance row locked `FOR UPDATE`, so the movement's previous/new pair is
//!   exact with respect to the committed write order. This replaces the CAS
//!   retry loop the in-memory path uses; contention blocks on the row lock
//!   instead of retrying.
//!
//! ## Error Mapping
//!
//! | SQLx error | Postgres code | DomainError | Scenario |
//! |------------|---------------|-------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Duplicate active identity triple |
//! | Database (check violation) | `23514` | `Validation` | Negative quantity/reorder point reached the database |
//! | RowNotFound | N/A | `NotFound` | Balance missing or soft-deleted |
//! | anything else | N/A | `Unexpected` | Pool closed, network failure, decode failure |
//!
//! `Unexpected` keeps the internal detail in the log (`tracing::error`) and
//! surfaces an opaque message, per the error-handling contract.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use std::sync::Arc;
use tracing::{error, instrument};
use uuid::Uuid;

use stockledger_core::{
    ActorId, BalanceId, DomainError, DomainResult, MovementId, Page, PageRequest, ProductId,
    WarehouseId,
};
use stockledger_ledger::{
    BalanceIdentity, BalancePatch, BalanceRecord, MovementKind, MovementRecord, NewBalance,
    OnInsufficientStock, decide,
};

use crate::adjustment::AdjustmentOutcome;
use crate::balance_store::BalanceFilter;

/// Schema for the two ledger tables. Idempotent; safe to run at startup.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS stock_balances (
    id UUID PRIMARY KEY,
    product_id UUID NOT NULL,
    variant TEXT,
    warehouse_id UUID NOT NULL,
    quantity BIGINT NOT NULL CHECK (quantity >= 0),
    reorder_point BIGINT NOT NULL CHECK (reorder_point >= 0),
    deleted BOOLEAN NOT NULL DEFAULT FALSE,
    version BIGINT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS stock_balances_active_identity
    ON stock_balances (product_id, warehouse_id, (coalesce(variant, '')))
    WHERE NOT deleted;

CREATE TABLE IF NOT EXISTS stock_movements (
    id UUID PRIMARY KEY,
    balance_id UUID NOT NULL REFERENCES stock_balances (id),
    product_id UUID NOT NULL,
    variant TEXT,
    warehouse_id UUID NOT NULL,
    kind TEXT NOT NULL,
    delta BIGINT NOT NULL,
    requested_delta BIGINT NOT NULL,
    previous_quantity BIGINT NOT NULL,
    new_quantity BIGINT NOT NULL CHECK (new_quantity = previous_quantity + delta),
    notes TEXT,
    actor UUID,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS stock_movements_balance
    ON stock_movements (balance_id, created_at);
"#;

const BALANCE_COLUMNS: &str = "id, product_id, variant, warehouse_id, quantity, reorder_point, deleted, version, created_at, updated_at";

/// Postgres adapter for balances and movements.
///
/// One adapter owns both tables because the adjustment transaction spans
/// them. The surface mirrors the `BalanceStore`/`MovementLog` contracts
/// method for method, asynchronously; the API layer composes it directly.
#[derive(Debug, Clone)]
pub struct PostgresStockStore {
    pool: Arc<PgPool>,
}

impl PostgresStockStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the ledger tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn run_migrations(&self) -> DomainResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("run_migrations", e))?;
        Ok(())
    }

    #[instrument(skip(self, new), fields(product_id = %new.product_id), err)]
    pub async fn create(&self, new: NewBalance) -> DomainResult<BalanceRecord> {
        let record = BalanceRecord::create(BalanceId::new(), new, Utc::now())?;

        sqlx::query(
            r#"
            INSERT INTO stock_balances (
                id, product_id, variant, warehouse_id, quantity,
                reorder_point, deleted, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(Uuid::from(record.id))
        .bind(Uuid::from(record.product_id))
        .bind(&record.variant)
        .bind(Uuid::from(record.warehouse_id))
        .bind(record.quantity)
        .bind(record.reorder_point)
        .bind(record.deleted)
        .bind(record.version as i64)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                DomainError::conflict(
                    "an active balance already exists for this product, variant and warehouse",
                )
            } else {
                map_sqlx_error("create_balance", e)
            }
        })?;

        Ok(record)
    }

    #[instrument(skip(self), fields(balance_id = %id), err)]
    pub async fn get(&self, id: BalanceId) -> DomainResult<BalanceRecord> {
        let row = sqlx::query(&format!(
            "SELECT {BALANCE_COLUMNS} FROM stock_balances WHERE id = $1 AND NOT deleted"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_balance", e))?;

        match row {
            Some(row) => balance_from_row(&row),
            None => Err(DomainError::NotFound),
        }
    }

    #[instrument(skip(self, filter, page), err)]
    pub async fn list(
        &self,
        filter: &BalanceFilter,
        page: PageRequest,
    ) -> DomainResult<Page<BalanceRecord>> {
        let product = filter.product_id.map(Uuid::from);
        let warehouse = filter.warehouse_id.map(Uuid::from);

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM stock_balances
            WHERE NOT deleted
              AND ($1::uuid IS NULL OR product_id = $1)
              AND ($2::uuid IS NULL OR warehouse_id = $2)
            "#,
        )
        .bind(product)
        .bind(warehouse)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_balances", e))?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {BALANCE_COLUMNS} FROM stock_balances
            WHERE NOT deleted
              AND ($1::uuid IS NULL OR product_id = $1)
              AND ($2::uuid IS NULL OR warehouse_id = $2)
            ORDER BY created_at, id
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(product)
        .bind(warehouse)
        .bind(page.limit as i64)
        .bind(page.offset() as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_balances", e))?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            items.push(balance_from_row(row)?);
        }

        Ok(Page {
            items,
            page: page.page,
            limit: page.limit,
            total: total as u64,
        })
    }

    #[instrument(skip(self, patch), fields(balance_id = %id), err)]
    pub async fn patch(&self, id: BalanceId, patch: BalancePatch) -> DomainResult<BalanceRecord> {
        if let Some(reorder_point) = patch.reorder_point {
            if reorder_point < 0 {
                return Err(DomainError::validation("reorder point cannot be negative"));
            }
        }

        let row = sqlx::query(&format!(
            r#"
            UPDATE stock_balances
            SET reorder_point = COALESCE($2, reorder_point),
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND NOT deleted
            RETURNING {BALANCE_COLUMNS}
            "#
        ))
        .bind(Uuid::from(id))
        .bind(patch.reorder_point)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("patch_balance", e))?;

        match row {
            Some(row) => balance_from_row(&row),
            None => Err(DomainError::NotFound),
        }
    }

    #[instrument(skip(self), fields(balance_id = %id), err)]
    pub async fn soft_delete(&self, id: BalanceId) -> DomainResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE stock_balances
            SET deleted = TRUE, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND NOT deleted
            "#,
        )
        .bind(Uuid::from(id))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("soft_delete_balance", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound);
        }
        Ok(())
    }

    /// Ledgered adjustment: balance update and movement append in one
    /// transaction, with the balance row locked for the duration.
    #[instrument(
        skip(self, notes, actor),
        fields(balance_id = %id, kind = %kind),
        err
    )]
    pub async fn apply_adjustment(
        &self,
        id: BalanceId,
        kind: MovementKind,
        requested_delta: i64,
        policy: OnInsufficientStock,
        notes: Option<String>,
        actor: Option<ActorId>,
    ) -> DomainResult<AdjustmentOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_adjustment", e))?;

        let row = sqlx::query(&format!(
            "SELECT {BALANCE_COLUMNS} FROM stock_balances WHERE id = $1 AND NOT deleted FOR UPDATE"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_balance", e))?;

        let record = match row {
            Some(row) => balance_from_row(&row)?,
            None => return Err(DomainError::NotFound),
        };

        // Same pure decision as the in-memory path; the row lock stands in
        // for the version check.
        let decision = decide(record.quantity, requested_delta, policy)?;

        let updated_row = sqlx::query(&format!(
            r#"
            UPDATE stock_balances
            SET quantity = $2, version = version + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING {BALANCE_COLUMNS}
            "#
        ))
        .bind(Uuid::from(id))
        .bind(decision.new_quantity)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("write_balance", e))?;
        let updated = balance_from_row(&updated_row)?;

        let movement = MovementRecord::ledgered(
            MovementId::new(),
            &updated,
            kind,
            decision.previous_quantity,
            decision.applied_delta,
            decision.requested_delta,
            notes,
            actor,
            Utc::now(),
        );

        sqlx::query(
            r#"
            INSERT INTO stock_movements (
                id, balance_id, product_id, variant, warehouse_id, kind,
                delta, requested_delta, previous_quantity, new_quantity,
                notes, actor, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(Uuid::from(movement.id))
        .bind(Uuid::from(movement.balance_id))
        .bind(Uuid::from(movement.product_id))
        .bind(&movement.variant)
        .bind(Uuid::from(movement.warehouse_id))
        .bind(movement.kind.as_str())
        .bind(movement.delta)
        .bind(movement.requested_delta)
        .bind(movement.previous_quantity)
        .bind(movement.new_quantity)
        .bind(&movement.notes)
        .bind(movement.actor.map(Uuid::from))
        .bind(movement.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("append_movement", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_adjustment", e))?;

        Ok(AdjustmentOutcome {
            balance: updated,
            movement,
        })
    }

    #[instrument(skip(self), fields(product_id = %product_id), err)]
    pub async fn list_active_for_product(
        &self,
        product_id: ProductId,
    ) -> DomainResult<Vec<BalanceRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {BALANCE_COLUMNS} FROM stock_balances
            WHERE product_id = $1 AND NOT deleted
            ORDER BY created_at, id
            "#
        ))
        .bind(Uuid::from(product_id))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_active_for_product", e))?;

        rows.iter().map(balance_from_row).collect()
    }

    #[instrument(skip(self), err)]
    pub async fn snapshot_active(&self) -> DomainResult<Vec<BalanceRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {BALANCE_COLUMNS} FROM stock_balances
            WHERE NOT deleted
            ORDER BY created_at, id
            "#
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("snapshot_active", e))?;

        rows.iter().map(balance_from_row).collect()
    }

    /// Sum of active quantities for one product, pushed down to the database.
    #[instrument(skip(self), fields(product_id = %product_id), err)]
    pub async fn product_total(&self, product_id: ProductId) -> DomainResult<i64> {
        sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(quantity), 0)::bigint
            FROM stock_balances
            WHERE product_id = $1 AND NOT deleted
            "#,
        )
        .bind(Uuid::from(product_id))
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("product_total", e))
    }

    #[instrument(skip(self), fields(balance_id = %balance_id), err)]
    pub async fn list_movements(&self, balance_id: BalanceId) -> DomainResult<Vec<MovementRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT
                id, balance_id, product_id, variant, warehouse_id, kind,
                delta, requested_delta, previous_quantity, new_quantity,
                notes, actor, created_at
            FROM stock_movements
            WHERE balance_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(Uuid::from(balance_id))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_movements", e))?;

        let mut movements = Vec::with_capacity(rows.len());
        for row in rows {
            let raw = MovementRow::from_row(&row)
                .map_err(|e| map_sqlx_error("decode_movement", e))?;
            movements.push(MovementRecord::try_from(raw)?);
        }
        Ok(movements)
    }

    /// History for one identity triple, spanning every balance record that
    /// ever held it (soft-deleted generations included).
    #[instrument(skip(self, identity), fields(product_id = %identity.product_id), err)]
    pub async fn list_movements_for_identity(
        &self,
        identity: &BalanceIdentity,
    ) -> DomainResult<Vec<MovementRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT
                id, balance_id, product_id, variant, warehouse_id, kind,
                delta, requested_delta, previous_quantity, new_quantity,
                notes, actor, created_at
            FROM stock_movements
            WHERE product_id = $1
              AND warehouse_id = $2
              AND coalesce(variant, '') = coalesce($3, '')
            ORDER BY created_at, id
            "#,
        )
        .bind(Uuid::from(identity.product_id))
        .bind(Uuid::from(identity.warehouse_id))
        .bind(&identity.variant)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_movements_for_identity", e))?;

        let mut movements = Vec::with_capacity(rows.len());
        for row in rows {
            let raw = MovementRow::from_row(&row)
                .map_err(|e| map_sqlx_error("decode_movement", e))?;
            movements.push(MovementRecord::try_from(raw)?);
        }
        Ok(movements)
    }
}

fn balance_from_row(row: &PgRow) -> DomainResult<BalanceRecord> {
    let read = || -> Result<BalanceRecord, sqlx::Error> {
        Ok(BalanceRecord {
            id: BalanceId::from_uuid(row.try_get("id")?),
            product_id: ProductId::from_uuid(row.try_get("product_id")?),
            variant: row.try_get("variant")?,
            warehouse_id: WarehouseId::from_uuid(row.try_get("warehouse_id")?),
            quantity: row.try_get("quantity")?,
            reorder_point: row.try_get("reorder_point")?,
            deleted: row.try_get("deleted")?,
            version: row.try_get::<i64, _>("version")? as u64,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    };
    read().map_err(|e| map_sqlx_error("decode_balance", e))
}

#[derive(Debug)]
struct MovementRow {
    id: Uuid,
    balance_id: Uuid,
    product_id: Uuid,
    variant: Option<String>,
    warehouse_id: Uuid,
    kind: String,
    delta: i64,
    requested_delta: i64,
    previous_quantity: i64,
    new_quantity: i64,
    notes: Option<String>,
    actor: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for MovementRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(MovementRow {
            id: row.try_get("id")?,
            balance_id: row.try_get("balance_id")?,
            product_id: row.try_get("product_id")?,
            variant: row.try_get("variant")?,
            warehouse_id: row.try_get("warehouse_id")?,
            kind: row.try_get("kind")?,
            delta: row.try_get("delta")?,
            requested_delta: row.try_get("requested_delta")?,
            previous_quantity: row.try_get("previous_quantity")?,
            new_quantity: row.try_get("new_quantity")?,
            notes: row.try_get("notes")?,
            actor: row.try_get("actor")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<MovementRow> for MovementRecord {
    type Error = DomainError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        Ok(MovementRecord {
            id: MovementId::from_uuid(row.id),
            balance_id: BalanceId::from_uuid(row.balance_id),
            product_id: ProductId::from_uuid(row.product_id),
            variant: row.variant,
            warehouse_id: WarehouseId::from_uuid(row.warehouse_id),
            kind: row.kind.parse()?,
            delta: row.delta,
            requested_delta: row.requested_delta,
            previous_quantity: row.previous_quantity,
            new_quantity: row.new_quantity,
            notes: row.notes,
            actor: row.actor.map(ActorId::from_uuid),
            created_at: row.created_at,
        })
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> DomainError {
    match &err {
        sqlx::Error::RowNotFound => DomainError::NotFound,
        sqlx::Error::Database(db_err) => {
            match db_err.code().as_deref() {
                Some("23505") => DomainError::conflict(format!(
                    "unique constraint violated in {operation}"
                )),
                Some("23514") => DomainError::validation(format!(
                    "check constraint violated in {operation}"
                )),
                _ => {
                    error!(operation, error = %db_err.message(), "database failure");
                    DomainError::unexpected(format!("storage failure in {operation}"))
                }
            }
        }
        other => {
            error!(operation, error = %other, "storage failure");
            DomainError::unexpected(format!("storage failure in {operation}"))
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_ledger::AdjustOp;

    // Exercises the live-database path end to end. Needs DATABASE_URL to
    // point at a scratch Postgres:
    //   DATABASE_URL=postgres://localhost/stockledger_test cargo test -- --ignored
    #[tokio::test]
    #[ignore]
    async fn round_trips_against_a_live_database() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = PgPool::connect(&url).await.expect("connect");
        let store = PostgresStockStore::new(pool);
        store.run_migrations().await.expect("migrations");

        let record = store
            .create(NewBalance {
                product_id: ProductId::new(),
                variant: Some("750ml".into()),
                warehouse_id: WarehouseId::new(),
                quantity: 15,
                reorder_point: 10,
            })
            .await
            .expect("create");

        let outcome = store
            .apply_adjustment(
                record.id,
                MovementKind::Adjustment,
                AdjustOp::Deduct.signed(6),
                OnInsufficientStock::Reject,
                Some("cycle count".into()),
                None,
            )
            .await
            .expect("adjust");
        assert_eq!(outcome.balance.quantity, 9);
        assert_eq!(outcome.movement.previous_quantity, 15);

        let err = store
            .apply_adjustment(
                record.id,
                MovementKind::Adjustment,
                -10,
                OnInsufficientStock::Reject,
                None,
                None,
            )
            .await
            .expect_err("overdraw");
        assert!(matches!(err, DomainError::InsufficientStock { .. }));

        let movements = store.list_movements(record.id).await.expect("movements");
        assert_eq!(movements.len(), 1);
        assert!(movements[0].is_consistent());

        let by_identity = store
            .list_movements_for_identity(&record.identity())
            .await
            .expect("identity movements");
        assert_eq!(by_identity.len(), 1);

        assert_eq!(
            store.product_total(record.product_id).await.expect("total"),
            9
        );

        store.soft_delete(record.id).await.expect("soft delete");
        assert_eq!(
            store.get(record.id).await.expect_err("deleted"),
            DomainError::NotFound
        );
    }
}
