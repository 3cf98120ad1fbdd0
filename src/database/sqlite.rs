use std::{collections::HashMap, str::FromStr};

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions},
    query::Query,
    Sqlite, SqlitePool,
};

use crate::{
    database::{
        table::daily_snapshot::{self, DailySnapshotRow, INSERT_CHUNK},
        SnapshotStore, SqlValue,
    },
    logging,
};

/// 本機 SQLite，每次執行開一個連線，用完即關
pub struct SqliteStore {
    pool: SqlitePool,
    table: String,
}

impl SqliteStore {
    pub async fn connect(url: &str, table: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid sqlite url {}", url))?
            .create_if_missing(true);
        // 記憶體資料庫只存在於單一連線，不能讓連線池回收
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open {}", url))?;

        Ok(SqliteStore {
            pool,
            table: table.to_string(),
        })
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: SqlValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Integer(v) => query.bind(v),
        SqlValue::Real(v) => query.bind(v),
        SqlValue::Text(v) => query.bind(v),
    }
}

#[async_trait]
impl SnapshotStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn table(&self) -> &str {
        &self.table
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Failed to SELECT 1 from sqlite")?;
        Ok(())
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(&daily_snapshot::create_table_sql(&self.table))
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to create table {}", self.table))?;
        sqlx::query(&daily_snapshot::create_index_sql(&self.table))
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to create index on {}", self.table))?;
        Ok(())
    }

    async fn replace_snapshot(&self, trade_date: &str, rows: &[DailySnapshotRow]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query(&daily_snapshot::delete_sql(&self.table))
            .bind(trade_date)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to delete({}) from {}", trade_date, self.table))?
            .rows_affected();

        let mut inserted = 0;
        for chunk in rows.chunks(INSERT_CHUNK) {
            let sql = daily_snapshot::insert_sql(&self.table, chunk.len());
            let mut query = sqlx::query(&sql);
            for row in chunk {
                for value in row.values() {
                    query = bind_value(query, value);
                }
            }

            inserted += query
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to insert({}) into {}", trade_date, self.table))?
                .rows_affected();
        }

        // 提前返回時 tx 被 drop 會自動 rollback
        tx.commit().await?;

        logging::info_file_async(format!(
            "{} {}: deleted {} rows, inserted {} rows",
            self.table, trade_date, deleted, inserted
        ));

        Ok(inserted)
    }

    async fn previous_trade_date(&self, trade_date: &str) -> Result<Option<String>> {
        let previous: Option<String> =
            sqlx::query_scalar(&daily_snapshot::previous_trade_date_sql(&self.table))
                .bind(trade_date)
                .fetch_one(&self.pool)
                .await?;
        Ok(previous)
    }

    async fn volumes_on(&self, trade_date: &str) -> Result<HashMap<String, i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(&daily_snapshot::volumes_sql(&self.table))
            .bind(trade_date)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }

    async fn latest_trade_dates(&self, limit: usize) -> Result<Vec<String>> {
        let dates: Vec<String> =
            sqlx::query_scalar(&daily_snapshot::latest_trade_dates_sql(&self.table))
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?;
        Ok(dates)
    }

    async fn fetch_snapshot(&self, trade_date: &str) -> Result<Vec<DailySnapshotRow>> {
        let rows = sqlx::query_as::<_, DailySnapshotRow>(&daily_snapshot::select_sql(&self.table))
            .bind(trade_date)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn count_on(&self, trade_date: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(&daily_snapshot::count_sql(&self.table))
            .bind(trade_date)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
