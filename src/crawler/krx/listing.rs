use std::{future::Future, time::Duration};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio_retry::{strategy::FixedInterval, Retry};

use crate::{
    crawler::{krx, ListingSource},
    declare::{MarketScope, SecurityQuote},
    logging,
    util::{datetime::TradeDate, text},
};

const BLD: &str = "dbms/MDC/STAT/standard/MDCSTAT01501";

#[derive(Serialize, Deserialize, Debug, Default)]
struct ListingResponse {
    #[serde(rename = "OutBlock_1", default)]
    pub out_block: Vec<ListingItem>,
}

/// 전종목 시세的一列，數值皆為含千分位的字串
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
#[serde(default)]
struct ListingItem {
    #[serde(rename = "ISU_SRT_CD")]
    pub code: String,
    #[serde(rename = "ISU_ABBRV")]
    pub name: String,
    #[serde(rename = "MKT_NM")]
    pub market: String,
    #[serde(rename = "SECT_TP_NM")]
    pub sector: String,
    #[serde(rename = "TDD_CLSPRC")]
    pub close: String,
    #[serde(rename = "CMPPREVDD_PRC")]
    pub change: String,
    #[serde(rename = "FLUC_RT")]
    pub change_rate: String,
    #[serde(rename = "TDD_OPNPRC")]
    pub open: String,
    #[serde(rename = "TDD_HGPRC")]
    pub high: String,
    #[serde(rename = "TDD_LWPRC")]
    pub low: String,
    #[serde(rename = "ACC_TRDVOL")]
    pub volume: String,
    #[serde(rename = "MKTCAP")]
    pub market_cap: String,
    #[serde(rename = "LIST_SHRS")]
    pub shares: String,
}

impl ListingItem {
    fn into_quote(self) -> SecurityQuote {
        SecurityQuote {
            code: self.code.trim().to_string(),
            name: self.name.trim().to_string(),
            market: self.market.trim().to_string(),
            sector: self.sector.trim().to_string(),
            open: text::parse_i64_or_zero(&self.open),
            high: text::parse_i64_or_zero(&self.high),
            low: text::parse_i64_or_zero(&self.low),
            // 停牌或資料缺漏時為 "-"，交給合併階段剔除
            close: text::parse_i64(&self.close, None).ok(),
            change: text::parse_i64_or_zero(&self.change),
            change_rate: text::parse_decimal(&self.change_rate, None).unwrap_or(Decimal::ZERO),
            volume: text::parse_i64_or_zero(&self.volume),
            market_cap: text::parse_i64_or_zero(&self.market_cap),
            shares: text::parse_i64_or_zero(&self.shares),
        }
    }
}

/// 解析 전종목 시세 的回應本文
fn parse(body: ListingResponse) -> Vec<SecurityQuote> {
    body.out_block
        .into_iter()
        .filter(|item| !item.code.trim().is_empty())
        .map(ListingItem::into_quote)
        .collect()
}

/// 抓取指定交易日全部上市證券的收盤行情
pub async fn visit(date: NaiveDate, market: MarketScope) -> Result<Vec<SecurityQuote>> {
    let trade_date = date.to_trade_date();
    let params = [
        ("mktId", market.krx_id()),
        ("trdDd", trade_date.as_str()),
        ("share", "1"),
        ("money", "1"),
        ("csvxls_isNo", "false"),
    ];
    let body = krx::fetch_json::<ListingResponse>(BLD, &params).await?;
    let quotes = parse(body);

    if quotes.is_empty() {
        return Err(anyhow!(
            "KRX returned an empty listing for {} ({})",
            trade_date,
            market
        ));
    }

    Ok(quotes)
}

/// KRX 전종목 시세，失敗時以固定間隔重試
pub struct KrxListing {
    market: MarketScope,
    retries: usize,
    delay: Duration,
}

impl KrxListing {
    pub fn new(market: MarketScope, retries: usize, delay: Duration) -> Self {
        KrxListing {
            market,
            retries,
            delay,
        }
    }
}

#[async_trait]
impl ListingSource for KrxListing {
    fn name(&self) -> &'static str {
        "krx"
    }

    async fn fetch_listing(&self, date: NaiveDate) -> Result<Vec<SecurityQuote>> {
        let market = self.market;
        fetch_with_retry(date, self.retries, self.delay, move || visit(date, market)).await
    }
}

/// 第一次失敗後最多再試 retries 次，每次間隔 delay
async fn fetch_with_retry<F, Fut>(
    date: NaiveDate,
    retries: usize,
    delay: Duration,
    mut attempt: F,
) -> Result<Vec<SecurityQuote>>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<Vec<SecurityQuote>>> + Send,
{
    let strategy = FixedInterval::new(delay).take(retries);

    Retry::spawn(strategy, || {
        let fut = attempt();
        async move {
            fut.await.map_err(|why| {
                logging::warn_file_async(format!(
                    "Failed to fetch KRX listing for {} because {:?}",
                    date, why
                ));
                why
            })
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rust_decimal_macros::dec;

    use super::*;

    const FIXTURE: &str = r#"{
        "OutBlock_1": [
            {
                "ISU_SRT_CD": "005930", "ISU_CD": "KR7005930003", "ISU_ABBRV": "삼성전자",
                "MKT_NM": "KOSPI", "SECT_TP_NM": "", "TDD_CLSPRC": "71,500",
                "FLUC_TP_CD": "1", "CMPPREVDD_PRC": "1,200", "FLUC_RT": "1.71",
                "TDD_OPNPRC": "70,400", "TDD_HGPRC": "71,800", "TDD_LWPRC": "70,100",
                "ACC_TRDVOL": "12,345,678", "ACC_TRDVAL": "880,000,000,000",
                "MKTCAP": "426,834,551,975,000", "LIST_SHRS": "5,969,782,550", "MKT_ID": "STK"
            },
            {
                "ISU_SRT_CD": "950130", "ISU_ABBRV": "엑세스바이오",
                "MKT_NM": "KOSDAQ GLOBAL", "SECT_TP_NM": "외국기업(소속부없음)",
                "TDD_CLSPRC": "-", "CMPPREVDD_PRC": "-150", "FLUC_RT": "-2.10",
                "TDD_OPNPRC": "0", "TDD_HGPRC": "0", "TDD_LWPRC": "0",
                "ACC_TRDVOL": "0", "MKTCAP": "0", "LIST_SHRS": "38,000,000"
            },
            { "ISU_SRT_CD": "", "ISU_ABBRV": "" }
        ],
        "CURRENT_DATETIME": "2026.01.29 PM 04:30:00"
    }"#;

    #[test]
    fn test_parse() {
        let body: ListingResponse = serde_json::from_str(FIXTURE).unwrap();
        let quotes = parse(body);

        assert_eq!(quotes.len(), 2);

        let samsung = &quotes[0];
        assert_eq!(samsung.code, "005930");
        assert_eq!(samsung.name, "삼성전자");
        assert_eq!(samsung.market, "KOSPI");
        assert_eq!(samsung.sector, "");
        assert_eq!(samsung.close, Some(71_500));
        assert_eq!(samsung.change, 1_200);
        assert_eq!(samsung.change_rate, dec!(1.71));
        assert_eq!(samsung.open, 70_400);
        assert_eq!(samsung.volume, 12_345_678);
        assert_eq!(samsung.market_cap, 426_834_551_975_000);
        assert_eq!(samsung.shares, 5_969_782_550);

        let halted = &quotes[1];
        assert_eq!(halted.close, None);
        assert_eq!(halted.change, -150);
        assert_eq!(halted.change_rate, dec!(-2.10));
    }

    #[test]
    fn test_parse_missing_block() {
        let body: ListingResponse = serde_json::from_str(r#"{"RESULT":"LOGOUT"}"#).unwrap();
        assert!(parse(body).is_empty());
    }

    async fn flaky_listing(failures: usize, retries: usize) -> (Result<Vec<SecurityQuote>>, usize) {
        let calls = AtomicUsize::new(0);
        let date = NaiveDate::from_ymd_opt(2026, 1, 29).unwrap();

        let result = fetch_with_retry(date, retries, Duration::from_millis(1), || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < failures {
                    Err(anyhow!("KRX returned HTTP 503"))
                } else {
                    Ok(vec![SecurityQuote {
                        code: "005930".to_string(),
                        ..Default::default()
                    }])
                }
            }
        })
        .await;

        (result, calls.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn test_fetch_with_retry_recovers() {
        let (result, calls) = flaky_listing(0, 3).await;
        assert_eq!(result.unwrap().len(), 1);
        assert_eq!(calls, 1);

        let (result, calls) = flaky_listing(3, 3).await;
        assert_eq!(result.unwrap()[0].code, "005930");
        assert_eq!(calls, 4);
    }

    #[tokio::test]
    async fn test_fetch_with_retry_gives_up() {
        let (result, calls) = flaky_listing(4, 3).await;
        assert!(result.unwrap_err().to_string().contains("503"));
        assert_eq!(calls, 4);

        let (result, calls) = flaky_listing(1, 0).await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    #[ignore]
    async fn test_visit() {
        dotenv::dotenv().ok();
        logging::debug_file_async("開始 krx::listing::visit".to_string());

        let date = NaiveDate::from_ymd_opt(2026, 1, 29).unwrap();
        match KrxListing::new(MarketScope::All, 3, Duration::from_secs(2))
            .fetch_listing(date)
            .await
        {
            Ok(list) => {
                logging::debug_file_async(format!("listing: {}", list.len()));
            }
            Err(why) => {
                logging::debug_file_async(format!("Failed to visit because {:?}", why));
            }
        }

        logging::debug_file_async("結束 krx::listing::visit".to_string());
    }
}
