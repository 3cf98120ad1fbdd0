use anyhow::Result;
use concat_string::concat_string;
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;

use crate::util::http::{self, user_agent};

/// 전종목 시세
pub mod listing;
/// 투자자별 순매수
pub mod net_purchase;

const HOST: &str = "data.krx.co.kr";
const JSON_PATH: &str = "/comm/bldAttendant/getJsonData.cmd";
const REFERER: &str = "https://data.krx.co.kr/contents/MDC/MDI/mdiLoader/index.cmd?menuId=MDC0201";

/// KRX 會檢查 Referer 與 XHR 標頭，缺少時回傳 LOGOUT
pub(super) fn build_headers() -> HeaderMap {
    let mut h = HeaderMap::with_capacity(5);
    h.insert(
        header::ACCEPT,
        HeaderValue::from_static("application/json, text/javascript, */*; q=0.01"),
    );
    h.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("ko-KR,ko;q=0.9,en-US;q=0.8,en;q=0.7"),
    );
    h.insert(header::REFERER, HeaderValue::from_static(REFERER));
    h.insert("X-Requested-With", HeaderValue::from_static("XMLHttpRequest"));
    h.insert(header::USER_AGENT, HeaderValue::from_static(user_agent::next_ua()));

    h
}

/// 送出 bld 查詢並解析 JSON
pub(super) async fn fetch_json<RES: DeserializeOwned>(
    bld: &str,
    params: &[(&str, &str)],
) -> Result<RES> {
    let url = concat_string!("https://", HOST, JSON_PATH);
    let mut form: Vec<(&str, &str)> = Vec::with_capacity(params.len() + 2);
    form.push(("bld", bld));
    form.push(("locale", "ko_KR"));
    form.extend_from_slice(params);

    http::post_form_json::<RES>(&url, Some(build_headers()), &form).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_headers() {
        let h = build_headers();
        assert_eq!(h.get("X-Requested-With").unwrap(), "XMLHttpRequest");
        assert!(REFERER.contains(HOST));
        assert_eq!(h.get(header::REFERER).unwrap(), REFERER);
    }
}
