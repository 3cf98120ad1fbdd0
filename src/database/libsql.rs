//! Turso / libsql 的 Hrana over HTTP (v2) 用戶端。
//!
//! 每次呼叫都是一個獨立的 pipeline：`baton` 為 null，最後附上 `close`，
//! 所以不需要維持連線狀態。

use std::{collections::HashMap, time::Duration};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use concat_string::concat_string;
use reqwest::{
    header::{self, HeaderValue},
    Client,
};
use serde::{Deserialize, Serialize};

use crate::{
    database::{
        table::daily_snapshot::{self, DailySnapshotRow, INSERT_CHUNK},
        SnapshotStore, SqlValue,
    },
    logging,
};

/// Hrana 的值，整數以字串傳遞避免精度問題
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Value {
    Null,
    Integer { value: String },
    Float { value: f64 },
    Text { value: String },
    Blob { base64: String },
}

impl From<SqlValue> for Value {
    fn from(value: SqlValue) -> Self {
        match value {
            SqlValue::Null => Value::Null,
            SqlValue::Integer(v) => Value::Integer {
                value: v.to_string(),
            },
            SqlValue::Real(v) => Value::Float { value: v },
            SqlValue::Text(v) => Value::Text { value: v },
        }
    }
}

impl From<Value> for SqlValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Integer { value } => SqlValue::Integer(value.parse().unwrap_or(0)),
            Value::Float { value } => SqlValue::Real(value),
            Value::Text { value } => SqlValue::Text(value),
            Value::Blob { base64 } => SqlValue::Text(base64),
        }
    }
}

#[derive(Serialize, Debug, Clone)]
struct Stmt {
    sql: String,
    args: Vec<Value>,
    want_rows: bool,
}

impl Stmt {
    fn new(sql: impl Into<String>, args: Vec<SqlValue>, want_rows: bool) -> Self {
        Stmt {
            sql: sql.into(),
            args: args.into_iter().map(Value::from).collect(),
            want_rows,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BatchCond {
    Ok { step: usize },
    Not { cond: Box<BatchCond> },
}

#[derive(Serialize, Debug, Clone)]
struct BatchStep {
    #[serde(skip_serializing_if = "Option::is_none")]
    condition: Option<BatchCond>,
    stmt: Stmt,
}

#[derive(Serialize, Debug, Clone, Default)]
struct Batch {
    steps: Vec<BatchStep>,
}

impl Batch {
    /// 加入一個步驟並回傳它的索引
    fn push(&mut self, condition: Option<BatchCond>, stmt: Stmt) -> usize {
        self.steps.push(BatchStep { condition, stmt });
        self.steps.len() - 1
    }
}

#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamRequest {
    Execute { stmt: Stmt },
    Batch { batch: Batch },
    Close,
}

#[derive(Serialize, Debug)]
struct PipelineRequest {
    baton: Option<String>,
    requests: Vec<StreamRequest>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
struct HranaError {
    message: String,
    code: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
struct StmtResult {
    rows: Vec<Vec<Value>>,
    affected_row_count: u64,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
struct BatchResult {
    step_results: Vec<Option<StmtResult>>,
    step_errors: Vec<Option<HranaError>>,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamResponse {
    Execute {
        result: StmtResult,
    },
    Batch {
        result: BatchResult,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamResult {
    Ok { response: StreamResponse },
    Error { error: HranaError },
}

#[derive(Deserialize, Debug)]
struct PipelineResponse {
    #[serde(default)]
    results: Vec<StreamResult>,
}

/// 寫入結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Replaced {
    deleted: u64,
    inserted: u64,
}

/// 先刪後寫的條件式批次：BEGIN，之後每一步都要求前一步成功，
/// COMMIT 沒有成功時執行 ROLLBACK。
fn replace_batch(table: &str, trade_date: &str, rows: &[DailySnapshotRow]) -> (Batch, ReplaceSteps) {
    let mut batch = Batch::default();
    let begin = batch.push(None, Stmt::new("BEGIN", Vec::new(), false));
    let delete = batch.push(
        Some(BatchCond::Ok { step: begin }),
        Stmt::new(
            daily_snapshot::delete_sql(table),
            vec![SqlValue::Text(trade_date.to_string())],
            false,
        ),
    );

    let mut previous = delete;
    let mut inserts = Vec::new();
    for chunk in rows.chunks(INSERT_CHUNK) {
        let args = chunk.iter().flat_map(DailySnapshotRow::values).collect();
        previous = batch.push(
            Some(BatchCond::Ok { step: previous }),
            Stmt::new(daily_snapshot::insert_sql(table, chunk.len()), args, false),
        );
        inserts.push(previous);
    }

    let commit = batch.push(
        Some(BatchCond::Ok { step: previous }),
        Stmt::new("COMMIT", Vec::new(), false),
    );
    batch.push(
        Some(BatchCond::Not {
            cond: Box::new(BatchCond::Ok { step: commit }),
        }),
        Stmt::new("ROLLBACK", Vec::new(), false),
    );

    (
        batch,
        ReplaceSteps {
            delete,
            inserts,
            commit,
        },
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ReplaceSteps {
    delete: usize,
    inserts: Vec<usize>,
    commit: usize,
}

/// 任一步驟出錯或 COMMIT 沒有執行都視為失敗
fn check_replace(result: &BatchResult, steps: &ReplaceSteps) -> Result<Replaced> {
    if let Some((step, error)) = result
        .step_errors
        .iter()
        .enumerate()
        .find_map(|(i, e)| e.as_ref().map(|e| (i, e)))
    {
        bail!(
            "Batch step {} failed: {} ({})",
            step,
            error.message,
            error.code.as_deref().unwrap_or("-")
        );
    }

    let affected = |step: usize| -> Option<u64> {
        result
            .step_results
            .get(step)
            .and_then(Option::as_ref)
            .map(|r| r.affected_row_count)
    };

    if affected(steps.commit).is_none() {
        bail!("Batch was not committed");
    }

    Ok(Replaced {
        deleted: affected(steps.delete).unwrap_or(0),
        inserted: steps.inserts.iter().filter_map(|s| affected(*s)).sum(),
    })
}

/// 遠端 libsql，透過 `{base}/v2/pipeline` 存取
pub struct LibSqlStore {
    client: Client,
    pipeline_url: String,
    authorization: HeaderValue,
    table: String,
}

impl LibSqlStore {
    pub fn new(base_url: &str, auth_token: &str, table: &str) -> Result<Self> {
        // 寫入大批資料時比爬蟲的請求慢，使用獨立的 client
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .gzip(true)
            .build()
            .map_err(|why| anyhow!("Failed to create libsql client: {:?}", why))?;

        let mut authorization = HeaderValue::from_str(&concat_string!("Bearer ", auth_token))
            .map_err(|_| anyhow!("The auth token contains invalid characters"))?;
        authorization.set_sensitive(true);

        Ok(LibSqlStore {
            client,
            pipeline_url: concat_string!(base_url.trim_end_matches('/'), "/v2/pipeline"),
            authorization,
            table: table.to_string(),
        })
    }

    async fn pipeline(&self, mut requests: Vec<StreamRequest>) -> Result<Vec<StreamResponse>> {
        requests.push(StreamRequest::Close);
        let body = PipelineRequest {
            baton: None,
            requests,
        };

        let res = self
            .client
            .post(&self.pipeline_url)
            .header(header::AUTHORIZATION, self.authorization.clone())
            .json(&body)
            .send()
            .await
            .map_err(|why| anyhow!("Failed to send to {} because {:?}", self.pipeline_url, why))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|why| anyhow!("Error reading response body: {:?}", why))?;

        if !status.is_success() {
            bail!(
                "libsql answered {}: {}",
                status,
                text.chars().take(300).collect::<String>()
            );
        }

        decode_pipeline(&text)
    }

    async fn execute(&self, stmt: Stmt) -> Result<StmtResult> {
        let sql = stmt.sql.clone();
        match self
            .pipeline(vec![StreamRequest::Execute { stmt }])
            .await?
            .into_iter()
            .next()
        {
            Some(StreamResponse::Execute { result }) => Ok(result),
            other => Err(anyhow!("Unexpected response for '{}': {:?}", sql, other)),
        }
    }

    async fn query(&self, sql: String, args: Vec<SqlValue>) -> Result<Vec<Vec<SqlValue>>> {
        Ok(self
            .execute(Stmt::new(sql, args, true))
            .await?
            .rows
            .into_iter()
            .map(|row| row.into_iter().map(SqlValue::from).collect())
            .collect())
    }
}

/// 解析 pipeline 回應，任一個請求失敗即回傳錯誤
fn decode_pipeline(text: &str) -> Result<Vec<StreamResponse>> {
    let res: PipelineResponse = serde_json::from_str(text).map_err(|why| {
        anyhow!(
            "Error parsing libsql response({}): {:?}",
            text.chars().take(300).collect::<String>(),
            why
        )
    })?;

    res.results
        .into_iter()
        .map(|result| match result {
            StreamResult::Ok { response } => Ok(response),
            StreamResult::Error { error } => Err(anyhow!(
                "libsql error: {} ({})",
                error.message,
                error.code.as_deref().unwrap_or("-")
            )),
        })
        .collect()
}

#[async_trait]
impl SnapshotStore for LibSqlStore {
    fn name(&self) -> &'static str {
        "libsql"
    }

    fn table(&self) -> &str {
        &self.table
    }

    async fn ping(&self) -> Result<()> {
        self.execute(Stmt::new("SELECT 1", Vec::new(), true)).await?;
        Ok(())
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.pipeline(vec![
            StreamRequest::Execute {
                stmt: Stmt::new(daily_snapshot::create_table_sql(&self.table), Vec::new(), false),
            },
            StreamRequest::Execute {
                stmt: Stmt::new(daily_snapshot::create_index_sql(&self.table), Vec::new(), false),
            },
        ])
        .await?;
        Ok(())
    }

    async fn replace_snapshot(&self, trade_date: &str, rows: &[DailySnapshotRow]) -> Result<u64> {
        let (batch, steps) = replace_batch(&self.table, trade_date, rows);
        let result = match self
            .pipeline(vec![StreamRequest::Batch { batch }])
            .await?
            .into_iter()
            .next()
        {
            Some(StreamResponse::Batch { result }) => result,
            other => bail!("Unexpected response for batch: {:?}", other),
        };

        let replaced = check_replace(&result, &steps)?;
        logging::info_file_async(format!(
            "{} {}: deleted {} rows, inserted {} rows",
            self.table, trade_date, replaced.deleted, replaced.inserted
        ));

        Ok(replaced.inserted)
    }

    async fn previous_trade_date(&self, trade_date: &str) -> Result<Option<String>> {
        let rows = self
            .query(
                daily_snapshot::previous_trade_date_sql(&self.table),
                vec![SqlValue::Text(trade_date.to_string())],
            )
            .await?;

        Ok(rows
            .first()
            .and_then(|row| row.first())
            .and_then(SqlValue::as_opt_text))
    }

    async fn volumes_on(&self, trade_date: &str) -> Result<HashMap<String, i64>> {
        let rows = self
            .query(
                daily_snapshot::volumes_sql(&self.table),
                vec![SqlValue::Text(trade_date.to_string())],
            )
            .await?;

        Ok(rows
            .iter()
            .filter(|row| row.len() >= 2)
            .map(|row| (row[0].as_text(), row[1].as_i64()))
            .collect())
    }

    async fn latest_trade_dates(&self, limit: usize) -> Result<Vec<String>> {
        let rows = self
            .query(
                daily_snapshot::latest_trade_dates_sql(&self.table),
                vec![SqlValue::Integer(limit as i64)],
            )
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| row.first().and_then(SqlValue::as_opt_text))
            .collect())
    }

    async fn fetch_snapshot(&self, trade_date: &str) -> Result<Vec<DailySnapshotRow>> {
        let rows = self
            .query(
                daily_snapshot::select_sql(&self.table),
                vec![SqlValue::Text(trade_date.to_string())],
            )
            .await?;

        rows.iter()
            .map(|row| DailySnapshotRow::from_values(row))
            .collect()
    }

    async fn count_on(&self, trade_date: &str) -> Result<i64> {
        let rows = self
            .query(
                daily_snapshot::count_sql(&self.table),
                vec![SqlValue::Text(trade_date.to_string())],
            )
            .await?;

        Ok(rows
            .first()
            .and_then(|row| row.first())
            .map(SqlValue::as_i64)
            .unwrap_or(0))
    }

    async fn close(&self) {
        logging::debug_file_async(format!("libsql store {} closed", self.table));
    }
}
