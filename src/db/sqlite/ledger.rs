use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::common::{parse_decimal, parse_uuid, units_from_db, units_to_db};
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{DebitOutcome, LedgerRepo},
    },
    models::{
        Balance, BillingEvent, BillingEventFilter, BillingStatus, ChargeMetadata, CostSource,
        CreateBillingEvent,
    },
};

const DEFAULT_HISTORY_LIMIT: i64 = 100;

pub struct SqliteLedgerRepo {
    pool: SqlitePool,
}

impl SqliteLedgerRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> DbResult<BillingEvent> {
        let cost_source: String = row.get("cost_source");
        let status: String = row.get("status");
        let margin: i64 = row.get("profit_margin_percent");

        Ok(BillingEvent {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            user_id: parse_uuid(&row.get::<String, _>("user_id"))?,
            model_name: row.get("model_name"),
            input_units: units_from_db(row.get("input_units")),
            output_units: units_from_db(row.get("output_units")),
            total_units: units_from_db(row.get("total_units")),
            units_estimated: row.get("units_estimated"),
            input_cost: parse_decimal(&row.get::<String, _>("input_cost"))?,
            output_cost: parse_decimal(&row.get::<String, _>("output_cost"))?,
            total_cost: parse_decimal(&row.get::<String, _>("total_cost"))?,
            cost_source: CostSource::from_str(&cost_source),
            points_deducted: row.get("points_deducted"),
            exchange_rate_snapshot: parse_decimal(&row.get::<String, _>("exchange_rate_snapshot"))?,
            profit_margin_percent: u32::try_from(margin).map_err(|_| {
                DbError::Internal(format!("Invalid profit margin in database: {}", margin))
            })?,
            minimum_applied: row.get("minimum_applied"),
            status: BillingStatus::from_str(&status),
            failure_reason: row.get("failure_reason"),
            created_at: row.get("created_at"),
        })
    }

    fn row_to_balance(row: &sqlx::sqlite::SqliteRow) -> DbResult<Balance> {
        Ok(Balance {
            user_id: parse_uuid(&row.get::<String, _>("user_id"))?,
            balance: row.get("balance"),
            updated_at: row.get("updated_at"),
        })
    }

    /// Insert an event on the given connection so debits can share a transaction.
    async fn insert_event_on(
        conn: &mut SqliteConnection,
        input: CreateBillingEvent,
        now: DateTime<Utc>,
    ) -> DbResult<BillingEvent> {
        let id = Uuid::new_v4();
        let m = input.metadata;

        sqlx::query(
            r#"
            INSERT INTO billing_events (
                id, user_id, model_name, input_units, output_units, total_units,
                units_estimated, input_cost, output_cost, total_cost, cost_source,
                points_deducted, exchange_rate_snapshot, profit_margin_percent,
                minimum_applied, status, failure_reason, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(input.user_id.to_string())
        .bind(&m.model_name)
        .bind(units_to_db(m.input_units))
        .bind(units_to_db(m.output_units))
        .bind(units_to_db(m.total_units))
        .bind(m.units_estimated)
        .bind(m.input_cost.to_string())
        .bind(m.output_cost.to_string())
        .bind(m.total_cost.to_string())
        .bind(m.cost_source.as_str())
        .bind(input.points_deducted)
        .bind(m.exchange_rate_snapshot.to_string())
        .bind(i64::from(m.profit_margin_percent))
        .bind(m.minimum_applied)
        .bind(input.status.as_str())
        .bind(&input.failure_reason)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(BillingEvent {
            id,
            user_id: input.user_id,
            model_name: m.model_name,
            input_units: m.input_units,
            output_units: m.output_units,
            total_units: m.total_units,
            units_estimated: m.units_estimated,
            input_cost: m.input_cost,
            output_cost: m.output_cost,
            total_cost: m.total_cost,
            cost_source: m.cost_source,
            points_deducted: input.points_deducted,
            exchange_rate_snapshot: m.exchange_rate_snapshot,
            profit_margin_percent: m.profit_margin_percent,
            minimum_applied: m.minimum_applied,
            status: input.status,
            failure_reason: input.failure_reason,
            created_at: now,
        })
    }
}

#[async_trait]
impl LedgerRepo for SqliteLedgerRepo {
    async fn debit(
        &self,
        user_id: Uuid,
        points: i64,
        metadata: ChargeMetadata,
    ) -> DbResult<DebitOutcome> {
        if points <= 0 {
            return Err(DbError::Validation(format!(
                "Debit amount must be positive, got {}",
                points
            )));
        }

        let now = Utc::now();
        let user = user_id.to_string();

        // Dropping the transaction on an early return rolls it back.
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE balances
            SET balance = balance - ?, updated_at = ?
            WHERE user_id = ? AND balance >= ?
            "#,
        )
        .bind(points)
        .bind(now)
        .bind(&user)
        .bind(points)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let available: Option<i64> =
                sqlx::query_scalar("SELECT balance FROM balances WHERE user_id = ?")
                    .bind(&user)
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return Ok(DebitOutcome::Insufficient {
                available: available.unwrap_or(0),
            });
        }

        let new_balance: i64 = sqlx::query_scalar("SELECT balance FROM balances WHERE user_id = ?")
            .bind(&user)
            .fetch_one(&mut *tx)
            .await?;

        let event = Self::insert_event_on(
            &mut *tx,
            CreateBillingEvent::completed(user_id, metadata, points),
            now,
        )
        .await?;

        tx.commit().await?;

        Ok(DebitOutcome::Debited { event, new_balance })
    }

    async fn insert_event(&self, input: CreateBillingEvent) -> DbResult<BillingEvent> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_event_on(&mut *conn, input, Utc::now()).await
    }

    async fn credit(&self, user_id: Uuid, points: i64) -> DbResult<Balance> {
        if points <= 0 {
            return Err(DbError::Validation(format!(
                "Credit amount must be positive, got {}",
                points
            )));
        }

        let row = sqlx::query(
            r#"
            INSERT INTO balances (user_id, balance, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT (user_id) DO UPDATE SET
                balance = balance + excluded.balance,
                updated_at = excluded.updated_at
            RETURNING user_id, balance, updated_at
            "#,
        )
        .bind(user_id.to_string())
        .bind(points)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_balance(&row)
    }

    async fn get_balance(&self, user_id: Uuid) -> DbResult<Option<Balance>> {
        let row = sqlx::query("SELECT user_id, balance, updated_at FROM balances WHERE user_id = ?")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_balance).transpose()
    }

    async fn get_event(&self, id: Uuid) -> DbResult<Option<BillingEvent>> {
        let row = sqlx::query("SELECT * FROM billing_events WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_event).transpose()
    }

    async fn list_events(&self, filter: &BillingEventFilter) -> DbResult<Vec<BillingEvent>> {
        let mut conditions = Vec::new();
        let mut params: Vec<String> = Vec::new();

        if let Some(user_id) = &filter.user_id {
            conditions.push("user_id = ?");
            params.push(user_id.to_string());
        }
        if let Some(model_name) = &filter.model_name {
            conditions.push("model_name = ?");
            params.push(model_name.clone());
        }
        if let Some(status) = &filter.status {
            conditions.push("status = ?");
            params.push(status.as_str().to_string());
        }
        if let Some(from) = &filter.from {
            conditions.push("created_at >= ?");
            params.push(from.to_rfc3339());
        }
        if let Some(to) = &filter.to {
            conditions.push("created_at < ?");
            params.push(to.to_rfc3339());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let sql = format!(
            "SELECT * FROM billing_events {} ORDER BY created_at DESC, id DESC LIMIT ?",
            where_clause
        );

        let mut query = sqlx::query(&sql);
        for param in &params {
            query = query.bind(param);
        }
        let rows = query
            .bind(filter.limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_event).collect()
    }
}
