use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::common::{parse_decimal, parse_uuid};
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::PriceRecordRepo,
    },
    models::{
        CreatePriceRecord, PriceOrigin, PriceRecord, ServiceKind, UpdatePriceRecord, model_key,
    },
};

const SELECT_COLUMNS: &str = r#"
    SELECT id, model_name, input_unit_price, output_unit_price, is_active,
           origin, service_kind, fixed_fee, created_at, updated_at
    FROM price_records
"#;

pub struct SqlitePriceRecordRepo {
    pool: SqlitePool,
}

impl SqlitePriceRecordRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> DbResult<PriceRecord> {
        let origin: String = row.get("origin");
        let service_kind: String = row.get("service_kind");
        let fixed_fee: Option<String> = row.get("fixed_fee");

        Ok(PriceRecord {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            model_name: row.get("model_name"),
            input_unit_price: parse_decimal(&row.get::<String, _>("input_unit_price"))?,
            output_unit_price: parse_decimal(&row.get::<String, _>("output_unit_price"))?,
            is_active: row.get("is_active"),
            origin: PriceOrigin::from_str(&origin),
            service_kind: ServiceKind::from_str(&service_kind),
            fixed_fee: fixed_fee.as_deref().map(parse_decimal).transpose()?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    async fn get_required(&self, id: Uuid) -> DbResult<PriceRecord> {
        self.get_by_id(id).await?.ok_or(DbError::NotFound)
    }
}

#[async_trait]
impl PriceRecordRepo for SqlitePriceRecordRepo {
    async fn create(&self, input: CreatePriceRecord) -> DbResult<PriceRecord> {
        let id = Uuid::new_v4();
        let now = chrono::Utc::now();
        let model_name = input.model_name.trim().to_string();

        sqlx::query(
            r#"
            INSERT INTO price_records (
                id, model_name, model_key, input_unit_price, output_unit_price,
                is_active, origin, service_kind, fixed_fee, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&model_name)
        .bind(model_key(&model_name))
        .bind(input.input_unit_price.to_string())
        .bind(input.output_unit_price.to_string())
        .bind(input.origin.as_str())
        .bind(input.service_kind.as_str())
        .bind(input.fixed_fee.map(|f| f.to_string()))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DbError::Conflict(format!(
                    "Model '{}' already has an {} price record",
                    model_name,
                    input.origin.as_str()
                ))
            }
            _ => DbError::from(e),
        })?;

        Ok(PriceRecord {
            id,
            model_name,
            input_unit_price: input.input_unit_price,
            output_unit_price: input.output_unit_price,
            is_active: true,
            origin: input.origin,
            service_kind: input.service_kind,
            fixed_fee: input.fixed_fee,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<PriceRecord>> {
        let query = format!("{} WHERE id = ?", SELECT_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn get_by_model(
        &self,
        model_name: &str,
        origin: PriceOrigin,
    ) -> DbResult<Option<PriceRecord>> {
        let query = format!("{} WHERE model_key = ? AND origin = ?", SELECT_COLUMNS);
        let row = sqlx::query(&query)
            .bind(model_key(model_name))
            .bind(origin.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn list(&self, include_inactive: bool) -> DbResult<Vec<PriceRecord>> {
        let query = if include_inactive {
            format!("{} ORDER BY created_at ASC, id ASC", SELECT_COLUMNS)
        } else {
            format!(
                "{} WHERE is_active = 1 ORDER BY created_at ASC, id ASC",
                SELECT_COLUMNS
            )
        };
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn update(&self, id: Uuid, input: UpdatePriceRecord) -> DbResult<PriceRecord> {
        let existing = self.get_required(id).await?;
        let now = chrono::Utc::now();

        let service_kind = input.service_kind.unwrap_or(existing.service_kind);
        let fixed_fee = input.fixed_fee.or(existing.fixed_fee);
        if service_kind == ServiceKind::FixedFee && fixed_fee.is_none() {
            return Err(DbError::Validation(
                "Fixed-fee records require a fixed_fee".into(),
            ));
        }

        sqlx::query(
            r#"
            UPDATE price_records
            SET input_unit_price = ?, output_unit_price = ?, service_kind = ?,
                fixed_fee = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(
            input
                .input_unit_price
                .unwrap_or(existing.input_unit_price)
                .to_string(),
        )
        .bind(
            input
                .output_unit_price
                .unwrap_or(existing.output_unit_price)
                .to_string(),
        )
        .bind(service_kind.as_str())
        .bind(fixed_fee.map(|f| f.to_string()))
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        self.get_required(id).await
    }

    async fn set_active(&self, id: Uuid, is_active: bool) -> DbResult<PriceRecord> {
        let result =
            sqlx::query("UPDATE price_records SET is_active = ?, updated_at = ? WHERE id = ?")
                .bind(is_active)
                .bind(chrono::Utc::now())
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }

        self.get_required(id).await
    }

    async fn ensure(&self, input: CreatePriceRecord) -> DbResult<(PriceRecord, bool)> {
        let now = chrono::Utc::now();
        let model_name = input.model_name.trim().to_string();

        let result = sqlx::query(
            r#"
            INSERT INTO price_records (
                id, model_name, model_key, input_unit_price, output_unit_price,
                is_active, origin, service_kind, fixed_fee, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?, ?, ?)
            ON CONFLICT (model_key, origin) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&model_name)
        .bind(model_key(&model_name))
        .bind(input.input_unit_price.to_string())
        .bind(input.output_unit_price.to_string())
        .bind(input.origin.as_str())
        .bind(input.service_kind.as_str())
        .bind(input.fixed_fee.map(|f| f.to_string()))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let created = result.rows_affected() > 0;
        let record = self
            .get_by_model(&model_name, input.origin)
            .await?
            .ok_or_else(|| DbError::Internal("Upsert failed to retrieve result".to_string()))?;

        Ok((record, created))
    }
}
