use std::{env, path::PathBuf, str::FromStr};

use anyhow::{bail, Result};
use config::{Config as config_config, File as config_file};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::{
    declare::{FlowSourceKind, MarketScope},
    logging,
};

const CONFIG_PATH: &str = "app.json";

#[derive(Serialize, Deserialize, Default, Debug, Clone)]
pub struct App {
    #[serde(default)]
    pub store: Store,
    #[serde(default)]
    pub crawler: Crawler,
    #[serde(default)]
    pub pipeline: Pipeline,
}

const TURSO_DB_URL: &str = "TURSO_DB_URL";
const TURSO_AUTH_TOKEN: &str = "TURSO_AUTH_TOKEN";
const STORE_TABLE: &str = "STORE_TABLE";

/// 快照資料庫的連線設定
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Store {
    /// libsql://、https://、sqlite:、file: 皆可
    pub url: String,
    pub auth_token: String,
    pub table: String,
}

impl Default for Store {
    fn default() -> Self {
        Store {
            url: String::new(),
            auth_token: String::new(),
            table: "daily_snapshots".to_string(),
        }
    }
}

const FLOW_SOURCE: &str = "FLOW_SOURCE";
const CRAWLER_MARKET: &str = "CRAWLER_MARKET";
const CRAWLER_CONCURRENCY: &str = "CRAWLER_CONCURRENCY";
const CRAWLER_REQUEST_TIMEOUT_SECS: &str = "CRAWLER_REQUEST_TIMEOUT_SECS";
const CRAWLER_REQUEST_DELAY_MS: &str = "CRAWLER_REQUEST_DELAY_MS";
const LISTING_RETRIES: &str = "LISTING_RETRIES";
const LISTING_RETRY_DELAY_MS: &str = "LISTING_RETRY_DELAY_MS";

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Crawler {
    pub flow_source: FlowSourceKind,
    pub market: MarketScope,
    /// 逐檔爬取時同時進行的請求上限
    pub concurrency: usize,
    pub request_timeout_secs: u64,
    pub request_delay_ms: u64,
    pub listing_retries: usize,
    pub listing_retry_delay_ms: u64,
}

impl Default for Crawler {
    fn default() -> Self {
        Crawler {
            flow_source: FlowSourceKind::Bulk,
            market: MarketScope::All,
            concurrency: 20,
            request_timeout_secs: 3,
            request_delay_ms: 100,
            listing_retries: 3,
            listing_retry_delay_ms: 2000,
        }
    }
}

const MARKET_CAP_SCALE: &str = "MARKET_CAP_SCALE";
const BACKFILL_PRIOR_VOLUME: &str = "BACKFILL_PRIOR_VOLUME";
const RISING_ONLY: &str = "RISING_ONLY";
const TRADE_DATE: &str = "TRADE_DATE";
const PIPELINE_SCHEDULE: &str = "PIPELINE_SCHEDULE";

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Pipeline {
    /// 市值換算單位，預設為億
    pub market_cap_scale: i64,
    pub backfill_prior_volume: bool,
    pub rising_only: bool,
    /// YYYYMMDD，空字串代表今天
    pub trade_date: String,
    /// 常駐模式的排程 (UTC)
    pub schedule: String,
}

impl Default for Pipeline {
    fn default() -> Self {
        Pipeline {
            market_cap_scale: 100_000_000,
            backfill_prior_volume: true,
            rising_only: false,
            trade_date: String::new(),
            // 15:40 KST
            schedule: "0 40 6 * * Mon-Fri".to_string(),
        }
    }
}

pub static SETTINGS: Lazy<App> = Lazy::new(|| {
    App::get().unwrap_or_else(|why| {
        logging::error_console(format!(
            "I can't read the config context because {:?}, fall back to env",
            why
        ));
        App::default().override_with_env()
    })
});

impl App {
    fn get() -> Result<Self> {
        let config_path = config_path();
        if config_path.exists() {
            let config: App = config_config::builder()
                .add_source(config_file::from(config_path))
                .build()?
                .try_deserialize()?;
            return Ok(config.override_with_env());
        }

        Ok(App::default().override_with_env())
    }

    /// 將來自於 env 的設定值覆蓋掉 json 上的設定值
    fn override_with_env(mut self) -> Self {
        if let Ok(url) = env::var(TURSO_DB_URL) {
            self.store.url = url.trim().to_string();
        }

        if let Ok(token) = env::var(TURSO_AUTH_TOKEN) {
            self.store.auth_token = token.trim().to_string();
        }

        if let Ok(table) = env::var(STORE_TABLE) {
            self.store.table = table;
        }

        override_parsed(FLOW_SOURCE, &mut self.crawler.flow_source);
        override_parsed(CRAWLER_MARKET, &mut self.crawler.market);
        override_parsed(CRAWLER_CONCURRENCY, &mut self.crawler.concurrency);
        override_parsed(
            CRAWLER_REQUEST_TIMEOUT_SECS,
            &mut self.crawler.request_timeout_secs,
        );
        override_parsed(CRAWLER_REQUEST_DELAY_MS, &mut self.crawler.request_delay_ms);
        override_parsed(LISTING_RETRIES, &mut self.crawler.listing_retries);
        override_parsed(
            LISTING_RETRY_DELAY_MS,
            &mut self.crawler.listing_retry_delay_ms,
        );

        override_parsed(MARKET_CAP_SCALE, &mut self.pipeline.market_cap_scale);
        override_parsed(
            BACKFILL_PRIOR_VOLUME,
            &mut self.pipeline.backfill_prior_volume,
        );
        override_parsed(RISING_ONLY, &mut self.pipeline.rising_only);

        if let Ok(date) = env::var(TRADE_DATE) {
            self.pipeline.trade_date = date.trim().to_string();
        }

        if let Ok(schedule) = env::var(PIPELINE_SCHEDULE) {
            self.pipeline.schedule = schedule;
        }

        self
    }
}

impl Store {
    /// 檢查必要的連線資訊是否存在，遠端資料庫另外需要 token
    pub fn validate(&self) -> Result<()> {
        let url = self.url.trim();
        if url.is_empty() {
            bail!("{} is not set", TURSO_DB_URL);
        }

        let is_local = url.starts_with("sqlite:") || url.starts_with("file:");
        if !is_local && self.auth_token.is_empty() {
            bail!("{} is not set for {}", TURSO_AUTH_TOKEN, self.url);
        }

        Ok(())
    }
}

/// 環境變數存在但格式錯誤時保留原值並記錄
fn override_parsed<T: FromStr>(key: &str, target: &mut T) {
    if let Ok(raw) = env::var(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => {
                logging::warn_file_async(format!("Ignore invalid {}={}", key, raw));
            }
        }
    }
}

/// 回傳設定檔的路徑
fn config_path() -> PathBuf {
    PathBuf::from(CONFIG_PATH)
}
