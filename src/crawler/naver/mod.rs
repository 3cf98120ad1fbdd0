use reqwest::header::{self, HeaderMap, HeaderValue};

use crate::util::http::user_agent;

/// 외국인·기관 순매매 거래량
pub mod investor_trend;

const HOST: &str = "finance.naver.com";

fn build_headers() -> HeaderMap {
    let mut h = HeaderMap::with_capacity(4);
    h.insert(
        header::ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    h.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("ko-KR,ko;q=0.9,en-US;q=0.8,en;q=0.7"),
    );
    h.insert(header::REFERER, HeaderValue::from_static("https://finance.naver.com/"));
    h.insert(header::USER_AGENT, HeaderValue::from_static(user_agent::next_ua()));

    h
}
