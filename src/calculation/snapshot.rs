use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use rust_decimal::{prelude::ToPrimitive, Decimal};

use crate::{
    config,
    database::table::daily_snapshot::DailySnapshotRow,
    declare::{Investor, InvestorFlows, SecurityQuote},
    logging,
    util::{datetime::TradeDate, map::Keyable},
};

/// 合併時的可調參數
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotOptions {
    pub market_cap_scale: i64,
    pub backfill_prior_volume: bool,
    pub rising_only: bool,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        SnapshotOptions {
            market_cap_scale: 100_000_000,
            backfill_prior_volume: true,
            rising_only: false,
        }
    }
}

impl From<&config::Pipeline> for SnapshotOptions {
    fn from(pipeline: &config::Pipeline) -> Self {
        SnapshotOptions {
            market_cap_scale: pipeline.market_cap_scale,
            backfill_prior_volume: pipeline.backfill_prior_volume,
            rising_only: pipeline.rising_only,
        }
    }
}

/// 市值換算成設定的單位，無條件捨去
pub fn scale_market_cap(market_cap: i64, scale: i64) -> i64 {
    if scale <= 0 {
        return market_cap;
    }

    market_cap.div_euclid(scale)
}

/// 沒有名稱或收盤價的證券視為下市或無效資料
fn is_valid(quote: &SecurityQuote) -> bool {
    !quote.name.trim().is_empty() && quote.close.is_some()
}

/// 以 listing 為主，依代碼左連接三種投資人的淨買賣量，缺少的補 0。
///
/// 輸出保留 listing 的順序，同一代碼只保留第一筆。
pub fn merge(
    date: NaiveDate,
    quotes: &[SecurityQuote],
    flows: &InvestorFlows,
    prior_volumes: &HashMap<String, i64>,
    options: &SnapshotOptions,
) -> Vec<DailySnapshotRow> {
    let trade_date = date.to_trade_date();
    let mut seen = HashSet::with_capacity(quotes.len());
    let mut rows = Vec::with_capacity(quotes.len());
    let mut invalid = 0;

    for quote in quotes {
        let close = match quote.close {
            Some(close) if is_valid(quote) => close,
            _ => {
                invalid += 1;
                continue;
            }
        };

        if options.rising_only && quote.change_rate <= Decimal::ZERO {
            continue;
        }

        if !seen.insert(quote.key()) {
            continue;
        }

        let prev_volume = if options.backfill_prior_volume {
            prior_volumes.get(&quote.code).copied().unwrap_or(0)
        } else {
            0
        };

        rows.push(DailySnapshotRow {
            trade_date: trade_date.clone(),
            code: quote.code.clone(),
            name: quote.name.trim().to_string(),
            market: quote.market.clone(),
            sector: quote.sector.clone(),
            open: quote.open,
            high: quote.high,
            low: quote.low,
            close,
            price_change: quote.change,
            change_rate: quote.change_rate.to_f64().unwrap_or(0.0),
            volume: quote.volume,
            prev_volume,
            market_cap: scale_market_cap(quote.market_cap, options.market_cap_scale),
            shares: quote.shares,
            foreign_net: flows.net(Investor::Foreign, &quote.code),
            institution_net: flows.net(Investor::Institution, &quote.code),
            individual_net: flows.net(Investor::Individual, &quote.code),
            margin_ratio: 0.0,
        });
    }

    if invalid > 0 {
        logging::info_file_async(format!(
            "{}: dropped {} securities without name or close price",
            trade_date, invalid
        ));
    }

    rows
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 29).unwrap()
    }

    fn quote(code: &str, close: Option<i64>, volume: i64) -> SecurityQuote {
        SecurityQuote {
            code: code.to_string(),
            name: format!("name-{}", code),
            market: "KOSPI".to_string(),
            close,
            volume,
            change_rate: dec!(1.5),
            ..Default::default()
        }
    }

    #[test]
    fn test_left_join_fills_zero() {
        let quotes = vec![quote("A", Some(100), 10)];
        let mut flows = InvestorFlows::new();
        flows.insert(Investor::Foreign, HashMap::from([("A".to_string(), 5)]));
        flows.insert(Investor::Institution, HashMap::new());
        flows.insert(
            Investor::Individual,
            HashMap::from([("A".to_string(), -5), ("UNLISTED".to_string(), 9)]),
        );

        let rows = merge(date(), &quotes, &flows, &HashMap::new(), &SnapshotOptions::default());

        assert_eq!(rows.len(), 1);
        let a = &rows[0];
        assert_eq!(a.trade_date, "20260129");
        assert_eq!(a.code, "A");
        assert_eq!(a.close, 100);
        assert_eq!(a.volume, 10);
        assert_eq!(a.foreign_net, 5);
        assert_eq!(a.institution_net, 0);
        assert_eq!(a.individual_net, -5);
        assert_eq!(a.margin_ratio, 0.0);
    }

    #[test]
    fn test_missing_flows_are_zero() {
        let quotes = vec![quote("A", Some(100), 10), quote("B", Some(200), 20)];
        let rows = merge(
            date(),
            &quotes,
            &InvestorFlows::new(),
            &HashMap::new(),
            &SnapshotOptions::default(),
        );

        assert_eq!(rows.len(), 2);
        assert!(rows
            .iter()
            .all(|r| r.foreign_net == 0 && r.institution_net == 0 && r.individual_net == 0));
    }

    #[test]
    fn test_one_row_per_valid_listing_entry() {
        let mut unnamed = quote("C", Some(300), 30);
        unnamed.name = " ".to_string();
        let quotes = vec![
            quote("A", Some(100), 10),
            quote("B", None, 20),
            unnamed,
            quote("D", Some(400), 40),
            quote("A", Some(101), 11),
        ];

        let rows = merge(
            date(),
            &quotes,
            &InvestorFlows::new(),
            &HashMap::new(),
            &SnapshotOptions::default(),
        );
        let codes: Vec<&str> = rows.iter().map(|r| r.code.as_str()).collect();

        assert_eq!(codes, vec!["A", "D"]);
        assert_eq!(rows[0].close, 100);
    }

    #[test]
    fn test_prior_volume_by_code() {
        let quotes = vec![quote("A", Some(100), 10), quote("B", Some(200), 20)];
        let prior = HashMap::from([("A".to_string(), 7)]);

        let rows = merge(date(), &quotes, &InvestorFlows::new(), &prior, &SnapshotOptions::default());
        assert_eq!(rows[0].prev_volume, 7);
        assert_eq!(rows[1].prev_volume, 0);

        let options = SnapshotOptions {
            backfill_prior_volume: false,
            ..Default::default()
        };
        let rows = merge(date(), &quotes, &InvestorFlows::new(), &prior, &options);
        assert_eq!(rows[0].prev_volume, 0);
    }

    #[test]
    fn test_rising_only() {
        let mut falling = quote("B", Some(200), 20);
        falling.change_rate = dec!(-0.5);
        let mut flat = quote("C", Some(300), 30);
        flat.change_rate = dec!(0);
        let quotes = vec![quote("A", Some(100), 10), falling, flat];

        let options = SnapshotOptions {
            rising_only: true,
            ..Default::default()
        };
        let rows = merge(date(), &quotes, &InvestorFlows::new(), &HashMap::new(), &options);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].code, "A");
        assert_eq!(rows[0].change_rate, 1.5);
    }

    #[test]
    fn test_scale_market_cap() {
        assert_eq!(scale_market_cap(123_456_789_012, 100_000_000), 1234);
        assert_eq!(scale_market_cap(99_999_999, 100_000_000), 0);
        assert_eq!(scale_market_cap(500, 0), 500);

        let mut q = quote("A", Some(100), 10);
        q.market_cap = 123_456_789_012;
        let rows = merge(
            date(),
            &[q],
            &InvestorFlows::new(),
            &HashMap::new(),
            &SnapshotOptions::default(),
        );
        assert_eq!(rows[0].market_cap, 1234);
    }
}
