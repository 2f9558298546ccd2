use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::common::{parse_decimal, parse_uuid};
use crate::{
    db::{error::DbResult, repos::ExchangeRateRepo},
    models::ExchangeRate,
};

pub struct SqliteExchangeRateRepo {
    pool: SqlitePool,
}

impl SqliteExchangeRateRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_rate(row: &sqlx::sqlite::SqliteRow) -> DbResult<ExchangeRate> {
        Ok(ExchangeRate {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            points_per_unit: parse_decimal(&row.get::<String, _>("points_per_unit"))?,
            effective_at: row.get("effective_at"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl ExchangeRateRepo for SqliteExchangeRateRepo {
    async fn record(
        &self,
        points_per_unit: Decimal,
        effective_at: DateTime<Utc>,
    ) -> DbResult<ExchangeRate> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO exchange_rates (id, points_per_unit, effective_at, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(points_per_unit.to_string())
        .bind(effective_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(ExchangeRate {
            id,
            points_per_unit,
            effective_at,
            created_at: now,
        })
    }

    async fn effective_at(&self, at: DateTime<Utc>) -> DbResult<Option<ExchangeRate>> {
        let row = sqlx::query(
            r#"
            SELECT id, points_per_unit, effective_at, created_at
            FROM exchange_rates
            WHERE effective_at <= ?
            ORDER BY effective_at DESC, created_at DESC
            LIMIT 1
            "#,
        )
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_rate).transpose()
    }

    async fn list(&self, limit: i64) -> DbResult<Vec<ExchangeRate>> {
        let rows = sqlx::query(
            r#"
            SELECT id, points_per_unit, effective_at, created_at
            FROM exchange_rates
            ORDER BY effective_at DESC, created_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_rate).collect()
    }
}
