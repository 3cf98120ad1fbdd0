use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    config,
    database::{libsql::LibSqlStore, sqlite::SqliteStore, table::daily_snapshot::DailySnapshotRow},
    logging,
};

/// 透過 HTTP 存取的遠端 libsql (Turso)
pub mod libsql;
/// 本機 SQLite 檔案或記憶體資料庫
pub mod sqlite;
pub mod table;

static TABLE_NAME: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$"));

/// 兩種資料庫共用的參數值
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    pub fn as_i64(&self) -> i64 {
        match self {
            SqlValue::Integer(v) => *v,
            SqlValue::Real(v) => *v as i64,
            SqlValue::Text(v) => v.trim().parse().unwrap_or(0),
            SqlValue::Null => 0,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            SqlValue::Integer(v) => *v as f64,
            SqlValue::Real(v) => *v,
            SqlValue::Text(v) => v.trim().parse().unwrap_or(0.0),
            SqlValue::Null => 0.0,
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            SqlValue::Integer(v) => v.to_string(),
            SqlValue::Real(v) => v.to_string(),
            SqlValue::Text(v) => v.clone(),
            SqlValue::Null => String::new(),
        }
    }

    pub fn as_opt_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            other => Some(other.as_text()),
        }
    }
}

/// 快照資料表的存取介面，本機與遠端各一個實作
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    fn name(&self) -> &'static str;

    fn table(&self) -> &str;

    /// SELECT 1，確認連線與驗證資訊
    async fn ping(&self) -> Result<()>;

    /// 建立資料表與 (trade_date, code) 索引
    async fn ensure_schema(&self) -> Result<()>;

    /// 在同一個交易內刪除該交易日的全部資料後寫入 `rows`，任一步失敗即整批回復。
    ///
    /// 回傳寫入的列數。
    async fn replace_snapshot(&self, trade_date: &str, rows: &[DailySnapshotRow]) -> Result<u64>;

    /// 早於 `trade_date` 的最近一個交易日
    async fn previous_trade_date(&self, trade_date: &str) -> Result<Option<String>>;

    /// 代碼 => 成交量
    async fn volumes_on(&self, trade_date: &str) -> Result<HashMap<String, i64>>;

    /// 最近的交易日，新的在前
    async fn latest_trade_dates(&self, limit: usize) -> Result<Vec<String>>;

    async fn fetch_snapshot(&self, trade_date: &str) -> Result<Vec<DailySnapshotRow>>;

    async fn count_on(&self, trade_date: &str) -> Result<i64>;

    async fn close(&self);

    /// 前一個交易日的 代碼 => 成交量，沒有更早的資料時為空
    async fn prior_volumes(&self, trade_date: &str) -> Result<HashMap<String, i64>> {
        match self.previous_trade_date(trade_date).await? {
            Some(previous) => {
                logging::info_file_async(format!(
                    "prior volumes of {} come from {}",
                    trade_date, previous
                ));
                self.volumes_on(&previous).await
            }
            None => Ok(HashMap::new()),
        }
    }
}

/// 連線目標
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Hrana over HTTP 的基底網址，不含結尾斜線與查詢字串
    Remote(String),
    /// sqlx 可接受的 sqlite: 網址
    Local(String),
}

/// 把各種寫法的資料庫網址統一成一種
pub fn parse_endpoint(url: &str) -> Result<Endpoint> {
    let url = url.trim();

    if url.starts_with("sqlite:") {
        return Ok(Endpoint::Local(url.to_string()));
    }

    if let Some(rest) = url.strip_prefix("file:") {
        return Ok(Endpoint::Local(format!("sqlite:{}", rest)));
    }

    let (scheme, rest) = match url.split_once("://") {
        Some(parts) => parts,
        None => bail!("Unsupported database url '{}'", url),
    };

    let scheme = match scheme.to_ascii_lowercase().as_str() {
        "libsql" | "wss" | "https" => "https",
        "ws" | "http" => "http",
        other => bail!("Unsupported database url scheme '{}'", other),
    };

    let host = rest
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('/');

    if host.is_empty() {
        bail!("Database url '{}' has no host", url);
    }

    Ok(Endpoint::Remote(format!("{}://{}", scheme, host)))
}

/// 資料表名稱直接放進 SQL，只接受識別字
pub fn validate_table_name(table: &str) -> Result<()> {
    match TABLE_NAME.as_ref() {
        Ok(re) if re.is_match(table) => Ok(()),
        Ok(_) => bail!("Invalid table name '{}'", table),
        Err(why) => bail!("Failed to compile table name pattern because {:?}", why),
    }
}

/// 依設定建立連線並以 SELECT 1 確認可用
pub async fn connect(settings: &config::Store) -> Result<Box<dyn SnapshotStore>> {
    settings.validate()?;
    validate_table_name(&settings.table)?;

    let store: Box<dyn SnapshotStore> = match parse_endpoint(&settings.url)? {
        Endpoint::Remote(base) => Box::new(LibSqlStore::new(
            &base,
            &settings.auth_token,
            &settings.table,
        )?),
        Endpoint::Local(url) => Box::new(SqliteStore::connect(&url, &settings.table).await?),
    };

    store.ping().await?;
    logging::info_file_async(format!(
        "Connected to {} store, table {}",
        store.name(),
        store.table()
    ));

    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(
            parse_endpoint("libsql://mystocks-demo.turso.io").unwrap(),
            Endpoint::Remote("https://mystocks-demo.turso.io".to_string())
        );
        assert_eq!(
            parse_endpoint(" libsql://mystocks-demo.turso.io/?authToken=abc&secure=true ").unwrap(),
            Endpoint::Remote("https://mystocks-demo.turso.io".to_string())
        );
        assert_eq!(
            parse_endpoint("wss://db.example.com/").unwrap(),
            Endpoint::Remote("https://db.example.com".to_string())
        );
        assert_eq!(
            parse_endpoint("ws://127.0.0.1:8080").unwrap(),
            Endpoint::Remote("http://127.0.0.1:8080".to_string())
        );
        assert_eq!(
            parse_endpoint("https://db.example.com").unwrap(),
            Endpoint::Remote("https://db.example.com".to_string())
        );
        assert_eq!(
            parse_endpoint("sqlite::memory:").unwrap(),
            Endpoint::Local("sqlite::memory:".to_string())
        );
        assert_eq!(
            parse_endpoint("file:data/stocks.db").unwrap(),
            Endpoint::Local("sqlite:data/stocks.db".to_string())
        );
    }

    #[test]
    fn test_parse_endpoint_rejects() {
        assert!(parse_endpoint("sqlite+libsql://db.example.com").is_err());
        assert!(parse_endpoint("postgres://localhost/db").is_err());
        assert!(parse_endpoint("db.example.com").is_err());
        assert!(parse_endpoint("libsql://").is_err());
    }

    #[test]
    fn test_validate_table_name() {
        assert!(validate_table_name("daily_snapshots").is_ok());
        assert!(validate_table_name("Npaystocks").is_ok());
        assert!(validate_table_name("daily snapshots").is_err());
        assert!(validate_table_name("x; DROP TABLE y").is_err());
        assert!(validate_table_name("1abc").is_err());
    }

    #[test]
    fn test_sql_value_conversions() {
        assert_eq!(SqlValue::Text(" 42 ".to_string()).as_i64(), 42);
        assert_eq!(SqlValue::Real(1.9).as_i64(), 1);
        assert_eq!(SqlValue::Integer(3).as_f64(), 3.0);
        assert_eq!(SqlValue::Null.as_text(), "");
        assert_eq!(SqlValue::Null.as_opt_text(), None);
        assert_eq!(SqlValue::Integer(20260129).as_opt_text().unwrap(), "20260129");
    }

    #[tokio::test]
    async fn test_connect_local() {
        let settings = config::Store {
            url: "sqlite::memory:".to_string(),
            auth_token: String::new(),
            table: "daily_snapshots".to_string(),
        };
        let store = connect(&settings).await.unwrap();
        assert_eq!(store.name(), "sqlite");
        store.close().await;

        let bad = config::Store {
            table: "bad name".to_string(),
            ..settings
        };
        assert!(connect(&bad).await.is_err());
    }
}
