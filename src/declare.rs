use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

use crate::util::map::Keyable;

/// 投資人類別
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Display, EnumString, EnumIter, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Investor {
    /// 외국인 9000
    Foreign,
    /// 기관합계 7050
    Institution,
    /// 개인 8000
    Individual,
}

impl Investor {
    /// KRX 統計資料的投資人代碼 (invstTpCd)
    pub fn krx_code(&self) -> &'static str {
        match self {
            Investor::Foreign => "9000",
            Investor::Institution => "7050",
            Investor::Individual => "8000",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Investor::Foreign => "외국인",
            Investor::Institution => "기관합계",
            Investor::Individual => "개인",
        }
    }

    pub fn iterator() -> impl Iterator<Item = Self> {
        Self::iter()
    }
}

/// 查詢範圍 (mktId)
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Display, EnumString, Serialize, Deserialize, Default,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MarketScope {
    /// 全部
    #[default]
    All,
    /// 유가증권시장
    Kospi,
    /// 코스닥
    Kosdaq,
    /// 코넥스
    Konex,
}

impl MarketScope {
    pub fn krx_id(&self) -> &'static str {
        match self {
            MarketScope::All => "ALL",
            MarketScope::Kospi => "STK",
            MarketScope::Kosdaq => "KSQ",
            MarketScope::Konex => "KNX",
        }
    }
}

/// 投資人淨買賣量的資料來源
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Display, EnumString, Serialize, Deserialize, Default,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FlowSourceKind {
    /// KRX 統計，每個投資人類別一次查全部
    #[default]
    Bulk,
    /// 逐檔爬取 Naver 的投資人動向頁
    Scrape,
}

/// 單一交易日的個股行情
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SecurityQuote {
    /// 종목코드
    pub code: String,
    pub name: String,
    /// KOSPI、KOSDAQ、KOSDAQ GLOBAL、KONEX
    pub market: String,
    /// 소속부，可能為空
    pub sector: String,
    pub open: i64,
    pub high: i64,
    pub low: i64,
    /// 無法解析時為 None，合併前會被剔除
    pub close: Option<i64>,
    pub change: i64,
    /// 漲跌幅 (%)
    pub change_rate: Decimal,
    pub volume: i64,
    /// 未縮減單位的市值
    pub market_cap: i64,
    pub shares: i64,
}

impl Keyable for SecurityQuote {
    fn key(&self) -> String {
        self.code.clone()
    }
}

/// 三種投資人類別各自的 代碼 => 淨買賣量
#[derive(Debug, Clone, Default)]
pub struct InvestorFlows {
    flows: HashMap<Investor, HashMap<String, i64>>,
}

impl InvestorFlows {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn insert(&mut self, investor: Investor, flow: HashMap<String, i64>) {
        self.flows.insert(investor, flow);
    }

    /// 取得淨買賣量，沒有資料時為 0
    pub fn net(&self, investor: Investor, code: &str) -> i64 {
        self.flows
            .get(&investor)
            .and_then(|flow| flow.get(code))
            .copied()
            .unwrap_or(0)
    }

    /// 各類別有資料的證券數
    pub fn len(&self, investor: Investor) -> usize {
        self.flows.get(&investor).map_or(0, HashMap::len)
    }
}
