use async_trait::async_trait;
use sqlx::{PgPool, Row};

use cronbeat_core::{SchedulerError, SchedulerResult};
use cronbeat_domain::{DestinationCategory, DestinationConfig, DestinationRepository};

/// 分发目标配置表的Postgres实现
pub struct PostgresDestinationRepository {
    pool: PgPool,
}

impl PostgresDestinationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_destination(row: &sqlx::postgres::PgRow) -> SchedulerResult<DestinationConfig> {
        let category: i16 = row.try_get("category")?;
        let category = DestinationCategory::from_i16(category).ok_or_else(|| {
            SchedulerError::DatabaseOperation(format!("invalid destination category: {category}"))
        })?;

        let port: i32 = row.try_get("port")?;

        Ok(DestinationConfig {
            id: row.try_get("id")?,
            category,
            transport: row.try_get("transport")?,
            username: row.try_get("username")?,
            password: row.try_get("password")?,
            host: row.try_get("host")?,
            port: port as u16,
            virtual_host: row.try_get("virtual_host")?,
        })
    }
}

#[async_trait]
impl DestinationRepository for PostgresDestinationRepository {
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<DestinationConfig>> {
        let row = sqlx::query(
            "SELECT id, category, transport, username, password, host, port, virtual_host \
             FROM destination_configs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_destination(&r)).transpose()
    }
}
