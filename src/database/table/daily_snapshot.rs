use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::{database::SqlValue, util::map::Keyable};

/// 每次 INSERT 的列數，19 欄 × 50 列不超過 SQLite 的 999 個參數上限
pub const INSERT_CHUNK: usize = 50;

/// 依資料表欄位順序排列
pub const COLUMNS: [&str; 19] = [
    "trade_date",
    "code",
    "name",
    "market",
    "sector",
    "open",
    "high",
    "low",
    "close",
    "price_change",
    "change_rate",
    "volume",
    "prev_volume",
    "market_cap",
    "shares",
    "foreign_net",
    "institution_net",
    "individual_net",
    "margin_ratio",
];

/// 每日快照，一個交易日一檔證券一列。
///
/// 同一交易日只會有一份完整名單，重跑時整批刪除後重新寫入。
#[derive(sqlx::FromRow, Serialize, Debug, Clone, PartialEq, Default)]
pub struct DailySnapshotRow {
    /// YYYYMMDD
    pub trade_date: String,
    pub code: String,
    pub name: String,
    pub market: String,
    pub sector: String,
    pub open: i64,
    pub high: i64,
    pub low: i64,
    pub close: i64,
    pub price_change: i64,
    /// 漲跌幅 (%)
    pub change_rate: f64,
    pub volume: i64,
    /// 前一個交易日的成交量，沒有資料時為 0
    pub prev_volume: i64,
    /// 已換算成設定的單位
    pub market_cap: i64,
    pub shares: i64,
    pub foreign_net: i64,
    pub institution_net: i64,
    pub individual_net: i64,
    /// 保留欄位，目前固定為 0
    pub margin_ratio: f64,
}

impl DailySnapshotRow {
    /// 依 `COLUMNS` 順序輸出要綁定的值
    pub fn values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Text(self.trade_date.clone()),
            SqlValue::Text(self.code.clone()),
            SqlValue::Text(self.name.clone()),
            SqlValue::Text(self.market.clone()),
            SqlValue::Text(self.sector.clone()),
            SqlValue::Integer(self.open),
            SqlValue::Integer(self.high),
            SqlValue::Integer(self.low),
            SqlValue::Integer(self.close),
            SqlValue::Integer(self.price_change),
            SqlValue::Real(self.change_rate),
            SqlValue::Integer(self.volume),
            SqlValue::Integer(self.prev_volume),
            SqlValue::Integer(self.market_cap),
            SqlValue::Integer(self.shares),
            SqlValue::Integer(self.foreign_net),
            SqlValue::Integer(self.institution_net),
            SqlValue::Integer(self.individual_net),
            SqlValue::Real(self.margin_ratio),
        ]
    }

    /// 由 `COLUMNS` 順序的一列值還原，遠端資料庫的查詢結果使用
    pub fn from_values(values: &[SqlValue]) -> Result<Self> {
        if values.len() != COLUMNS.len() {
            return Err(anyhow!(
                "Expected {} columns but got {}",
                COLUMNS.len(),
                values.len()
            ));
        }

        Ok(DailySnapshotRow {
            trade_date: values[0].as_text(),
            code: values[1].as_text(),
            name: values[2].as_text(),
            market: values[3].as_text(),
            sector: values[4].as_text(),
            open: values[5].as_i64(),
            high: values[6].as_i64(),
            low: values[7].as_i64(),
            close: values[8].as_i64(),
            price_change: values[9].as_i64(),
            change_rate: values[10].as_f64(),
            volume: values[11].as_i64(),
            prev_volume: values[12].as_i64(),
            market_cap: values[13].as_i64(),
            shares: values[14].as_i64(),
            foreign_net: values[15].as_i64(),
            institution_net: values[16].as_i64(),
            individual_net: values[17].as_i64(),
            margin_ratio: values[18].as_f64(),
        })
    }
}

impl Keyable for DailySnapshotRow {
    /// 同一交易日內以代碼區分
    fn key(&self) -> String {
        self.code.clone()
    }
}

pub fn create_table_sql(table: &str) -> String {
    format!(
        r#"CREATE TABLE IF NOT EXISTS {table} (
    trade_date TEXT NOT NULL,
    code TEXT NOT NULL,
    name TEXT NOT NULL,
    market TEXT NOT NULL DEFAULT '',
    sector TEXT NOT NULL DEFAULT '',
    open INTEGER NOT NULL DEFAULT 0,
    high INTEGER NOT NULL DEFAULT 0,
    low INTEGER NOT NULL DEFAULT 0,
    close INTEGER NOT NULL DEFAULT 0,
    price_change INTEGER NOT NULL DEFAULT 0,
    change_rate REAL NOT NULL DEFAULT 0,
    volume INTEGER NOT NULL DEFAULT 0,
    prev_volume INTEGER NOT NULL DEFAULT 0,
    market_cap INTEGER NOT NULL DEFAULT 0,
    shares INTEGER NOT NULL DEFAULT 0,
    foreign_net INTEGER NOT NULL DEFAULT 0,
    institution_net INTEGER NOT NULL DEFAULT 0,
    individual_net INTEGER NOT NULL DEFAULT 0,
    margin_ratio REAL NOT NULL DEFAULT 0
)"#
    )
}

/// 一般索引，唯一性由先刪後寫保證
pub fn create_index_sql(table: &str) -> String {
    format!("CREATE INDEX IF NOT EXISTS idx_{table}_trade_date_code ON {table} (trade_date, code)")
}

/// `rows` 列的多列 INSERT
pub fn insert_sql(table: &str, rows: usize) -> String {
    let placeholders = format!("({})", vec!["?"; COLUMNS.len()].join(", "));
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        table,
        COLUMNS.join(", "),
        vec![placeholders; rows].join(", ")
    )
}

pub fn delete_sql(table: &str) -> String {
    format!("DELETE FROM {table} WHERE trade_date = ?")
}

pub fn previous_trade_date_sql(table: &str) -> String {
    format!("SELECT MAX(trade_date) FROM {table} WHERE trade_date < ?")
}

pub fn volumes_sql(table: &str) -> String {
    format!("SELECT code, volume FROM {table} WHERE trade_date = ?")
}

pub fn latest_trade_dates_sql(table: &str) -> String {
    format!("SELECT DISTINCT trade_date FROM {table} ORDER BY trade_date DESC LIMIT ?")
}

/// 依寫入順序取回，也就是名單原本的順序
pub fn select_sql(table: &str) -> String {
    format!(
        "SELECT {} FROM {} WHERE trade_date = ? ORDER BY rowid",
        COLUMNS.join(", "),
        table
    )
}

pub fn count_sql(table: &str) -> String {
    format!("SELECT COUNT(*) FROM {table} WHERE trade_date = ?")
}
