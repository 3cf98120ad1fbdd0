use anyhow::{anyhow, Result};
use chrono::{Datelike, FixedOffset, NaiveDate, Utc, Weekday};

/// 交易日字串格式，例：20260129
pub const TRADE_DATE_FORMAT: &str = "%Y%m%d";
/// Naver 投資人動向表格的日期格式，例：2026.01.29
pub const DISPLAY_DATE_FORMAT: &str = "%Y.%m.%d";

const KST_OFFSET_SECS: i32 = 9 * 3600;

/// A trait representing the weekend concept.
pub trait Weekend {
    /// Returns `true` if the date is on a Saturday or Sunday.
    fn is_weekend(&self) -> bool;
}

impl Weekend for NaiveDate {
    fn is_weekend(&self) -> bool {
        matches!(self.weekday(), Weekday::Sat | Weekday::Sun)
    }
}

/// 交易日在不同來源間的字串表示
pub trait TradeDate {
    /// YYYYMMDD
    fn to_trade_date(&self) -> String;
    /// YYYY.MM.DD
    fn to_display_date(&self) -> String;
}

impl TradeDate for NaiveDate {
    fn to_trade_date(&self) -> String {
        self.format(TRADE_DATE_FORMAT).to_string()
    }

    fn to_display_date(&self) -> String {
        self.format(DISPLAY_DATE_FORMAT).to_string()
    }
}

/// 以韓國時間 (UTC+9) 取得今天的日期
pub fn korea_today() -> NaiveDate {
    match FixedOffset::east_opt(KST_OFFSET_SECS) {
        Some(kst) => Utc::now().with_timezone(&kst).date_naive(),
        None => Utc::now().date_naive(),
    }
}

/// 解析 YYYYMMDD 格式的交易日
pub fn parse_trade_date(s: &str) -> Result<NaiveDate> {
    let s = s.trim();
    if s.len() != 8 || !s.chars().all(|c| c.is_ascii_digit()) {
        return Err(anyhow!("Trade date '{}' is not in YYYYMMDD form", s));
    }

    NaiveDate::parse_from_str(s, TRADE_DATE_FORMAT)
        .map_err(|why| anyhow!("Failed to parse trade date '{}' because {:?}", s, why))
}

/// 依序採用 指令列參數、設定檔、今天 決定交易日
pub fn resolve_trade_date(cli: Option<&str>, configured: &str) -> Result<NaiveDate> {
    match cli.map(str::trim).filter(|s| !s.is_empty()) {
        Some(date) => parse_trade_date(date),
        None if !configured.trim().is_empty() => parse_trade_date(configured),
        None => Ok(korea_today()),
    }
}
