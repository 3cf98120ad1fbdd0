use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{
    crawler::{
        column::{Column, Pattern},
        krx, FlowSource,
    },
    declare::{Investor, MarketScope},
    util::{datetime::TradeDate, text},
};

const BLD: &str = "dbms/MDC/STAT/standard/MDCSTAT02401";

const CODE: Column = Column::new(
    "security code",
    &[
        Pattern::Exact("ISU_SRT_CD"),
        Pattern::Contains("SRT_CD"),
        Pattern::Contains("종목코드"),
    ],
    Some(0),
);

/// 淨買量 (股數)，欄位名稱在不同版本間會變動
const NET_QUANTITY: Column = Column::new(
    "net purchase quantity",
    &[
        Pattern::Exact("NETBID_TRDVOL"),
        Pattern::Contains("NETBID_TRDVOL"),
        Pattern::Contains("순매수거래량"),
        Pattern::Contains("NETBID"),
        Pattern::Contains("순매수"),
    ],
    Some(4),
);

/// 欄位順序即為第一列的鍵順序 (serde_json preserve_order)
#[derive(Deserialize, Debug, Default)]
struct NetPurchaseResponse {
    #[serde(default, alias = "OutBlock_1")]
    pub output: Vec<Map<String, Value>>,
}

fn value_to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => text::parse_i64(s, None).ok(),
        _ => None,
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// 依欄位名稱找出代碼與淨買量，回傳 代碼 => 淨買量
fn parse(body: NetPurchaseResponse) -> Result<HashMap<String, i64>> {
    let first = match body.output.first() {
        None => return Ok(HashMap::new()),
        Some(first) => first,
    };

    let headers: Vec<&str> = first.keys().map(String::as_str).collect();
    let code = CODE
        .locate("krx", &headers)
        .ok_or_else(|| anyhow!("No security code column in {:?}", headers))?;
    let net = NET_QUANTITY
        .locate("krx", &headers)
        .ok_or_else(|| anyhow!("No net purchase column in {:?}", headers))?;

    let code_key = headers[code.index].to_string();
    let net_key = headers[net.index].to_string();
    let mut flow = HashMap::with_capacity(body.output.len());

    for row in &body.output {
        let code = match row.get(&code_key).map(value_to_string) {
            Some(code) if !code.is_empty() => code,
            _ => continue,
        };

        if let Some(quantity) = row.get(&net_key).and_then(value_to_i64) {
            flow.insert(code, quantity);
        }
    }

    Ok(flow)
}

/// 抓取單一投資人類別在指定交易日全部證券的淨買量
pub async fn visit(
    date: NaiveDate,
    investor: Investor,
    market: MarketScope,
) -> Result<HashMap<String, i64>> {
    let trade_date = date.to_trade_date();
    let params = [
        ("mktId", market.krx_id()),
        ("invstTpCd", investor.krx_code()),
        ("strtDd", trade_date.as_str()),
        ("endDd", trade_date.as_str()),
        ("share", "1"),
        ("money", "1"),
        ("csvxls_isNo", "false"),
    ];
    let body = krx::fetch_json::<NetPurchaseResponse>(BLD, &params).await?;

    parse(body)
}

/// KRX 투자자별 순매수상위종목，每個投資人類別一次請求
pub struct KrxNetPurchase {
    market: MarketScope,
}

impl KrxNetPurchase {
    pub fn new(market: MarketScope) -> Self {
        KrxNetPurchase { market }
    }
}

#[async_trait]
impl FlowSource for KrxNetPurchase {
    fn name(&self) -> &'static str {
        "krx"
    }

    async fn fetch(
        &self,
        date: NaiveDate,
        investor: Investor,
        _codes: &[String],
    ) -> Result<HashMap<String, i64>> {
        visit(date, investor, self.market).await
    }
}

#[cfg(test)]
mod tests {
    use crate::logging;

    use super::*;

    #[test]
    fn test_parse_named_columns() {
        let json = r#"{"output":[
            {"ISU_SRT_CD":"005930","ISU_NM":"삼성전자","ASK_TRDVOL":"1,000","BID_TRDVOL":"1,120",
             "NETBID_TRDVOL":"120","ASK_TRDVAL":"71,500,000","BID_TRDVAL":"80,080,000","NETBID_TRDVAL":"8,580,000"},
            {"ISU_SRT_CD":"000660","ISU_NM":"SK하이닉스","ASK_TRDVOL":"540","BID_TRDVOL":"500",
             "NETBID_TRDVOL":"-40","ASK_TRDVAL":"1","BID_TRDVAL":"1","NETBID_TRDVAL":"-5,000,000"}
        ]}"#;
        let body: NetPurchaseResponse = serde_json::from_str(json).unwrap();
        let flow = parse(body).unwrap();

        assert_eq!(flow.len(), 2);
        assert_eq!(flow["005930"], 120);
        assert_eq!(flow["000660"], -40);
    }

    #[test]
    fn test_parse_renamed_columns() {
        // 淨買量改名後仍以包含 NETBID 的名稱比對
        let json = r#"{"OutBlock_1":[
            {"ISU_SRT_CD":"005930","ISU_NM":"삼성전자","NETBID_QTY":"+3,000","NETBID_AMT":"1"}
        ]}"#;
        let body: NetPurchaseResponse = serde_json::from_str(json).unwrap();
        let flow = parse(body).unwrap();

        assert_eq!(flow["005930"], 3_000);
    }

    #[test]
    fn test_parse_positional_fallback() {
        let json = r#"{"output":[
            {"c0":"035720","c1":"카카오","c2":"10","c3":"15","c4":"5"},
            {"c0":"","c1":"합계","c2":"10","c3":"15","c4":"5"}
        ]}"#;
        let body: NetPurchaseResponse = serde_json::from_str(json).unwrap();
        let flow = parse(body).unwrap();

        assert_eq!(flow.len(), 1);
        assert_eq!(flow["035720"], 5);
    }

    #[test]
    fn test_parse_empty_and_numeric() {
        let empty: NetPurchaseResponse = serde_json::from_str(r#"{"output":[]}"#).unwrap();
        assert!(parse(empty).unwrap().is_empty());

        let numeric: NetPurchaseResponse = serde_json::from_str(
            r#"{"output":[{"ISU_SRT_CD":"005930","NETBID_TRDVOL":-77}]}"#,
        )
        .unwrap();
        assert_eq!(parse(numeric).unwrap()["005930"], -77);
    }

    #[tokio::test]
    #[ignore]
    async fn test_visit() {
        dotenv::dotenv().ok();
        logging::debug_file_async("開始 krx::net_purchase::visit".to_string());

        let date = NaiveDate::from_ymd_opt(2026, 1, 29).unwrap();
        match visit(date, Investor::Foreign, MarketScope::All).await {
            Ok(flow) => {
                logging::debug_file_async(format!("flow: {}", flow.len()));
            }
            Err(why) => {
                logging::debug_file_async(format!("Failed to visit because {:?}", why));
            }
        }

        logging::debug_file_async("結束 krx::net_purchase::visit".to_string());
    }
}
