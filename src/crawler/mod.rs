use std::{collections::HashMap, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{
    config,
    crawler::{
        krx::{listing::KrxListing, net_purchase::KrxNetPurchase},
        naver::investor_trend::NaverInvestorTrend,
    },
    declare::{FlowSourceKind, Investor, InvestorFlows, SecurityQuote},
    logging,
};

/// 欄位名稱比對
pub mod column;
/// 한국거래소 정보데이터시스템
pub mod krx;
/// 네이버 금융
pub mod naver;

/// 取得指定交易日所有上市證券的行情
#[async_trait]
pub trait ListingSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// 來源無法連線或回傳空清單時回傳錯誤，整個流程會中止
    async fn fetch_listing(&self, date: NaiveDate) -> Result<Vec<SecurityQuote>>;
}

/// 取得投資人類別的淨買賣量
#[async_trait]
pub trait FlowSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// 回傳 代碼 => 淨買賣量，`codes` 是 listing 取得的代碼，批次來源可忽略
    async fn fetch(
        &self,
        date: NaiveDate,
        investor: Investor,
        codes: &[String],
    ) -> Result<HashMap<String, i64>>;

    /// 取得三種投資人類別，單一類別失敗時當作沒有資料
    async fn fetch_all(&self, date: NaiveDate, codes: &[String]) -> InvestorFlows {
        let mut flows = InvestorFlows::new();

        for investor in Investor::iterator() {
            match self.fetch(date, investor, codes).await {
                Ok(flow) => {
                    logging::info_file_async(format!(
                        "{} {} 淨買賣量 {} 筆",
                        self.name(),
                        investor,
                        flow.len()
                    ));
                    flows.insert(investor, flow);
                }
                Err(why) => {
                    logging::warn_file_async(format!(
                        "Failed to fetch {} flow from {} because {:?}",
                        investor,
                        self.name(),
                        why
                    ));
                }
            }
        }

        flows
    }
}

pub fn listing_source(settings: &config::Crawler) -> Box<dyn ListingSource> {
    Box::new(KrxListing::new(
        settings.market,
        settings.listing_retries,
        Duration::from_millis(settings.listing_retry_delay_ms),
    ))
}

pub fn flow_source(kind: FlowSourceKind, settings: &config::Crawler) -> Box<dyn FlowSource> {
    match kind {
        FlowSourceKind::Bulk => Box::new(KrxNetPurchase::new(settings.market)),
        FlowSourceKind::Scrape => Box::new(NaverInvestorTrend::new(
            settings.concurrency,
            Duration::from_secs(settings.request_timeout_secs),
        )),
    }
}
