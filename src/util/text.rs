use std::{collections::HashSet, str::FromStr};

use anyhow::{anyhow, Result};
use rust_decimal::Decimal;

/// KRX 與 Naver 數字欄位常見的千分位、正號、百分比等字元
const NUMBER_ESCAPE_CHAR: &[char] = &[',', '+', '%', ' ', '"', '\n', '\t', '\u{a0}'];

/// Decodes an EUC-KR (CP949) encoded body into a UTF-8 `String`.
///
/// Naver Finance item pages are served as EUC-KR; malformed sequences are
/// replaced rather than rejected so that a single bad byte does not discard
/// the whole page.
pub fn euc_kr_2_utf8(data: &[u8]) -> String {
    let (text, _, had_errors) = encoding_rs::EUC_KR.decode(data);
    if had_errors {
        crate::logging::debug_file_async(
            "EUC-KR body contained malformed sequences".to_string(),
        );
    }

    text.into_owned()
}

/// Parses a decimal value from a given string.
///
/// Thousands separators, a leading `+` and the other characters in
/// `NUMBER_ESCAPE_CHAR` are removed before parsing.
///
/// # Example
///
/// ```
/// let s = "-0.69";
/// let decimal_value = parse_decimal(s, None).unwrap();
/// ```
pub fn parse_decimal(s: &str, escape_chars: Option<Vec<char>>) -> Result<Decimal> {
    let cleaned = clean_escape_chars(s, escape_chars);
    Decimal::from_str(&cleaned)
        .map_err(|why| anyhow!("Failed to parse '{}' as Decimal because {:?}", cleaned, why))
}

/// Parses an `i64` value from a given string such as `"1,234"` or `"+5,678"`.
///
/// Values with a fractional part are rejected.
pub fn parse_i64(s: &str, escape_chars: Option<Vec<char>>) -> Result<i64> {
    let cleaned = clean_escape_chars(s, escape_chars);
    i64::from_str(&cleaned)
        .map_err(|why| anyhow!("Failed to parse '{}' as i64 because: {:?}", cleaned, why))
}

/// 解析失敗時回傳 0，用於非關鍵欄位
pub fn parse_i64_or_zero(s: &str) -> i64 {
    parse_i64(s, None).unwrap_or(0)
}

/// Removes a set of escape characters from a given string.
///
/// # Example
///
/// ```
/// let clean_s = clean_escape_chars("1,234원", Some(vec!['원']));
/// assert_eq!(clean_s, "1234");
/// ```
pub(crate) fn clean_escape_chars(s: &str, escape_chars: Option<Vec<char>>) -> String {
    let mut combined: Vec<char> = NUMBER_ESCAPE_CHAR.to_vec();
    if let Some(ec) = escape_chars {
        combined.extend(ec);
    }

    let filters = combined.iter().collect::<HashSet<_>>();
    s.chars().filter(|c| !filters.contains(c)).collect()
}

/// 合併連續空白並去除前後空白
pub fn squeeze_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
