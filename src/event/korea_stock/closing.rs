use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::NaiveDate;

use crate::{
    calculation::snapshot::{self, SnapshotOptions},
    config,
    crawler::{self, FlowSource, ListingSource},
    database::{self, SnapshotStore},
    declare::{FlowSourceKind, Investor},
    logging,
    util::datetime::{self, TradeDate, Weekend},
};

/// 韓股收盤後要進行的事情，回傳寫入的列數
pub async fn execute(date: Option<&str>, source: Option<FlowSourceKind>) -> Result<usize> {
    let date = datetime::resolve_trade_date(date, &config::SETTINGS.pipeline.trade_date)?;
    execute_on(date, source).await
}

/// 給排程使用，一律收集韓國時間的當日，不受 TRADE_DATE 影響
pub async fn execute_today() -> Result<()> {
    let rows = execute_on(scheduled_trade_date(), None).await?;
    logging::info_file_async(format!("scheduled closing wrote {} rows", rows));
    Ok(())
}

fn scheduled_trade_date() -> NaiveDate {
    datetime::korea_today()
}

async fn execute_on(date: NaiveDate, source: Option<FlowSourceKind>) -> Result<usize> {
    let settings = &config::SETTINGS;
    let kind = source.unwrap_or(settings.crawler.flow_source);

    // 先確認資料庫可用，避免爬完才發現設定錯誤
    let store = database::connect(&settings.store).await?;
    let listing = crawler::listing_source(&settings.crawler);
    let flow = crawler::flow_source(kind, &settings.crawler);
    let options = SnapshotOptions::from(&settings.pipeline);

    let result = aggregate(
        date,
        listing.as_ref(),
        flow.as_ref(),
        store.as_ref(),
        &options,
    )
    .await;
    store.close().await;

    result
}

/// 抓取行情與投資人淨買賣量，合併後整批取代該交易日的快照
pub async fn aggregate(
    date: NaiveDate,
    listing: &dyn ListingSource,
    flow: &dyn FlowSource,
    store: &dyn SnapshotStore,
    options: &SnapshotOptions,
) -> Result<usize> {
    let trade_date = date.to_trade_date();
    if date.is_weekend() {
        logging::warn_file_async(format!("{} is a weekend, the listing may be empty", trade_date));
    }

    store
        .ensure_schema()
        .await
        .with_context(|| format!("Failed to prepare table {}", store.table()))?;

    let quotes = listing
        .fetch_listing(date)
        .await
        .with_context(|| format!("Failed to fetch the listing of {} from {}", trade_date, listing.name()))?;
    logging::info_console(format!("{} {} 종목 수집 완료", trade_date, quotes.len()));

    let codes: Vec<String> = quotes.iter().map(|q| q.code.clone()).collect();
    let flows = flow.fetch_all(date, &codes).await;
    for investor in Investor::iterator() {
        logging::info_file_async(format!(
            "{} {}({}) flow entries from {}: {}",
            trade_date,
            investor.name(),
            investor,
            flow.name(),
            flows.len(investor)
        ));
    }

    let prior_volumes = if options.backfill_prior_volume {
        store.prior_volumes(&trade_date).await?
    } else {
        HashMap::new()
    };

    let rows = snapshot::merge(date, &quotes, &flows, &prior_volumes, options);
    if rows.is_empty() {
        logging::warn_file_async(format!("{} has no valid rows to store", trade_date));
    }

    let inserted = store
        .replace_snapshot(&trade_date, &rows)
        .await
        .with_context(|| format!("Failed to store the snapshot of {}", trade_date))?;
    logging::info_console(format!(
        "{} {} 저장 완료 ({} rows)",
        trade_date,
        store.table(),
        inserted
    ));

    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    use crate::{database::sqlite::SqliteStore, declare::SecurityQuote};

    use super::*;

    struct FakeListing {
        volume: i64,
    }

    #[async_trait]
    impl ListingSource for FakeListing {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn fetch_listing(&self, _date: NaiveDate) -> Result<Vec<SecurityQuote>> {
            Ok(vec![
                SecurityQuote {
                    code: "005930".to_string(),
                    name: "삼성전자".to_string(),
                    market: "KOSPI".to_string(),
                    close: Some(71_500),
                    change: 1_200,
                    change_rate: dec!(1.71),
                    volume: self.volume,
                    market_cap: 426_834_551_975_000,
                    shares: 5_969_782_550,
                    ..Default::default()
                },
                SecurityQuote {
                    code: "000660".to_string(),
                    name: "SK하이닉스".to_string(),
                    market: "KOSPI".to_string(),
                    close: Some(180_000),
                    change: -2_000,
                    change_rate: dec!(-1.1),
                    volume: 3_000,
                    ..Default::default()
                },
                SecurityQuote {
                    code: "999999".to_string(),
                    name: "정리매매".to_string(),
                    close: None,
                    ..Default::default()
                },
            ])
        }
    }

    struct FailingListing;

    #[async_trait]
    impl ListingSource for FailingListing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn fetch_listing(&self, _date: NaiveDate) -> Result<Vec<SecurityQuote>> {
            Err(anyhow!("connection refused"))
        }
    }

    #[derive(Default)]
    struct FakeFlow {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FlowSource for FakeFlow {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn fetch(
            &self,
            _date: NaiveDate,
            investor: Investor,
            _codes: &[String],
        ) -> Result<HashMap<String, i64>> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(match investor {
                Investor::Foreign => HashMap::from([("005930".to_string(), 120)]),
                Investor::Institution => HashMap::from([("005930".to_string(), -40)]),
                Investor::Individual => HashMap::from([("005930".to_string(), -80)]),
            })
        }
    }

    async fn store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:", "daily_snapshots")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_aggregate_twice_keeps_one_row_per_code() {
        let store = store().await;
        let flow = FakeFlow::default();
        let options = SnapshotOptions::default();
        let date = NaiveDate::from_ymd_opt(2026, 1, 29).unwrap();

        let first = aggregate(date, &FakeListing { volume: 10_000 }, &flow, &store, &options)
            .await
            .unwrap();
        let count_first = store.count_on("20260129").await.unwrap();
        let second = aggregate(date, &FakeListing { volume: 10_000 }, &flow, &store, &options)
            .await
            .unwrap();
        let count_second = store.count_on("20260129").await.unwrap();

        assert_eq!(first, 2);
        assert_eq!(second, 2);
        assert_eq!(count_first, 2);
        assert_eq!(count_first, count_second);
        assert_eq!(flow.calls.load(Ordering::Relaxed), 6);

        let rows = store.fetch_snapshot("20260129").await.unwrap();
        assert_eq!(rows[0].code, "005930");
        assert_eq!(rows[0].foreign_net, 120);
        assert_eq!(rows[0].institution_net, -40);
        assert_eq!(rows[0].individual_net, -80);
        assert_eq!(rows[0].market_cap, 4_268_345);
        assert_eq!(rows[1].code, "000660");
        assert_eq!(rows[1].foreign_net, 0);
    }

    #[tokio::test]
    async fn test_aggregate_backfills_prior_volume() {
        let store = store().await;
        let flow = FakeFlow::default();
        let options = SnapshotOptions::default();

        let monday = NaiveDate::from_ymd_opt(2026, 1, 26).unwrap();
        let tuesday = NaiveDate::from_ymd_opt(2026, 1, 27).unwrap();

        aggregate(monday, &FakeListing { volume: 500 }, &flow, &store, &options)
            .await
            .unwrap();
        aggregate(tuesday, &FakeListing { volume: 9_000 }, &flow, &store, &options)
            .await
            .unwrap();

        let rows = store.fetch_snapshot("20260127").await.unwrap();
        assert_eq!(rows[0].prev_volume, 500);
        assert_eq!(rows[1].prev_volume, 3_000);

        let first_day = store.fetch_snapshot("20260126").await.unwrap();
        assert!(first_day.iter().all(|r| r.prev_volume == 0));
    }

    #[tokio::test]
    async fn test_listing_failure_writes_nothing() {
        let store = store().await;
        let flow = FakeFlow::default();
        let date = NaiveDate::from_ymd_opt(2026, 1, 29).unwrap();

        let result = aggregate(date, &FailingListing, &flow, &store, &SnapshotOptions::default()).await;

        assert!(result.is_err());
        assert_eq!(flow.calls.load(Ordering::Relaxed), 0);
        assert_eq!(store.count_on("20260129").await.unwrap(), 0);
    }

    #[test]
    fn test_scheduled_trade_date_ignores_fixed_override() {
        let fixed = datetime::resolve_trade_date(None, "20200102").unwrap();

        assert_eq!(scheduled_trade_date(), datetime::korea_today());
        assert_ne!(scheduled_trade_date(), fixed);
    }

    #[tokio::test]
    #[ignore]
    async fn test_execute() {
        dotenv::dotenv().ok();
        let _ = rustls::crypto::ring::default_provider().install_default();
        logging::debug_file_async("開始 event::korea_stock::closing::execute".to_string());

        match execute(None, None).await {
            Ok(rows) => {
                logging::debug_file_async(format!("closing wrote {} rows", rows));
            }
            Err(why) => {
                logging::debug_file_async(format!(
                    "Failed to event::korea_stock::closing::execute because {:?}",
                    why
                ));
            }
        }

        logging::debug_file_async("結束 event::korea_stock::closing::execute".to_string());
    }
}
