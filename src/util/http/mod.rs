use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use once_cell::sync::{Lazy, OnceCell};
use reqwest::{header, Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;

use crate::{config, logging::Logger, util};

pub mod element;
pub mod user_agent;

/// A semaphore for limiting concurrent requests.
///
/// 上限即設定中的 crawler.concurrency，逐檔爬取時不會超過這個數量。
static SEMAPHORE: Lazy<Semaphore> =
    Lazy::new(|| Semaphore::new(config::SETTINGS.crawler.concurrency.max(1)));

/// A singleton instance of the reqwest client.
static CLIENT: OnceCell<Client> = OnceCell::new();

static LOGGER: Lazy<Logger> = Lazy::new(|| Logger::new("http"));

/// Force decoding a response body as EUC-KR regardless of its `Content-Type`.
#[async_trait]
pub trait TextForceEucKr {
    async fn text_force_euc_kr(self) -> Result<String>;
}

#[async_trait]
impl TextForceEucKr for Response {
    async fn text_force_euc_kr(self) -> Result<String> {
        Ok(util::text::euc_kr_2_utf8(self.bytes().await?.as_ref()))
    }
}

/// Returns the reqwest client singleton instance or creates one if it doesn't exist.
fn get_client() -> Result<&'static Client> {
    CLIENT.get_or_try_init(|| {
        Client::builder()
            // ===== 壓縮 =====
            .brotli(true)
            .gzip(true)
            .zstd(true)
            // ===== 超時設置 =====
            // 單筆請求可再以 timeout 參數縮短
            .connect_timeout(Duration::from_secs(8))
            .timeout(Duration::from_secs(30))
            .tcp_nodelay(true)
            .tcp_keepalive(Duration::from_secs(60))
            // ===== 連接池 =====
            .pool_max_idle_per_host(config::SETTINGS.crawler.concurrency.max(1))
            .pool_idle_timeout(Duration::from_secs(90))
            // ===== Cookie 和重定向 =====
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .referer(true)
            .user_agent(user_agent::next_ua())
            .build()
            .map_err(|e| anyhow!("Failed to create reqwest client: {:?}", e))
    })
}

/// Performs an HTTP GET request and decodes the body as EUC-KR.
///
/// # Arguments
///
/// * `url`: The URL to send the GET request to.
/// * `headers`: An optional set of headers to include with the request.
/// * `timeout`: Overrides the client wide timeout for this request only.
pub async fn get_use_euc_kr(
    url: &str,
    headers: Option<header::HeaderMap>,
    timeout: Option<Duration>,
) -> Result<String> {
    send(Method::GET, url, headers, timeout, None::<fn(RequestBuilder) -> RequestBuilder>)
        .await?
        .text_force_euc_kr()
        .await
        .map_err(|e| anyhow!("Error parsing response text use EUC-KR: {:?}", e))
}

/// Performs an HTTP POST request with form data and deserializes the JSON response.
///
/// The body is read as text first so that a non JSON answer (a login page,
/// a rate limit notice) shows up in the error message.
pub async fn post_form_json<RES: DeserializeOwned>(
    url: &str,
    headers: Option<header::HeaderMap>,
    params: &[(&str, &str)],
) -> Result<RES> {
    let res = send(
        Method::POST,
        url,
        headers,
        None,
        Some(|rb: RequestBuilder| rb.form(params)),
    )
    .await?;
    let res_body = res
        .text()
        .await
        .map_err(|e| anyhow!("Error reading response body: {}", e))?;

    serde_json::from_str(&res_body).map_err(|e| {
        anyhow!(
            "Error parsing response JSON({}): {:?}",
            res_body.chars().take(200).collect::<String>(),
            e
        )
    })
}

/// Sends a single HTTP request while holding a permit of the global semaphore.
///
/// There is no retry here: callers decide their own policy. Per-security
/// scraping absorbs failures, the listing fetch retries with a fixed delay.
///
/// # Errors
///
/// Returns an error when the request cannot be sent, times out, or the
/// server answers with a non success status.
async fn send(
    method: Method,
    url: &str,
    headers: Option<header::HeaderMap>,
    timeout: Option<Duration>,
    body: Option<impl FnOnce(RequestBuilder) -> RequestBuilder>,
) -> Result<Response> {
    let visit_log = format!("{method}:{url}");
    let client = get_client()?;
    let mut rb = client.request(method, url);

    if let Some(h) = headers {
        rb = rb.headers(h);
    }

    if let Some(t) = timeout {
        rb = rb.timeout(t);
    }

    if let Some(body_fn) = body {
        rb = body_fn(rb);
    }

    let permit = SEMAPHORE
        .acquire()
        .await
        .map_err(|why| anyhow!("Failed to acquire request permit because {:?}", why))?;
    let start = Instant::now();
    let res = rb.send().await;
    let elapsed = start.elapsed().as_millis();

    // 請求延遲，避免被目標網站封禁
    let delay = config::SETTINGS.crawler.request_delay_ms;
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    drop(permit);

    match res.and_then(Response::error_for_status) {
        Ok(response) => {
            LOGGER.info(format!("{} {} ms", visit_log, elapsed));
            Ok(response)
        }
        Err(why) => {
            LOGGER.error(format!("{} failed because {:?}. {} ms", visit_log, why, elapsed));
            Err(anyhow!("Failed to send request to {} because {:?}", url, why))
        }
    }
}
