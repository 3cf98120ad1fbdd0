use std::{collections::HashMap, future::Future, time::Duration};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use concat_string::concat_string;
use futures::{stream, StreamExt};
use scraper::{ElementRef, Html};

use crate::{
    crawler::{
        column::{Column, Pattern},
        naver, FlowSource,
    },
    declare::{Investor, InvestorFlows},
    logging,
    util::{
        datetime::TradeDate,
        http::{self, element},
        text,
    },
};

const DATE: Column = Column::new(
    "date",
    &[Pattern::Exact("날짜"), Pattern::Contains("날짜")],
    Some(0),
);

const INSTITUTION: Column = Column::new(
    "institution net",
    &[Pattern::Contains("기관 순매매"), Pattern::Contains("기관")],
    Some(5),
);

const FOREIGN: Column = Column::new(
    "foreign net",
    &[Pattern::Contains("외국인 순매매"), Pattern::Contains("외국인")],
    Some(6),
);

/// 單一證券在某一天的淨買賣量
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trend {
    pub foreign: i64,
    pub institution: i64,
    /// 頁面沒有個人欄位，以 -(外資 + 機構) 推算
    pub individual: i64,
}

impl Trend {
    pub fn new(foreign: i64, institution: i64) -> Self {
        Trend {
            foreign,
            institution,
            individual: -(foreign + institution),
        }
    }

    pub fn net(&self, investor: Investor) -> i64 {
        match investor {
            Investor::Foreign => self.foreign,
            Investor::Institution => self.institution,
            Investor::Individual => self.individual,
        }
    }
}

/// 把兩層表頭展開成單層，上下兩層以空白連接，例如 "외국인 순매매량"
fn flatten_headers(header_rows: &[Vec<ElementRef>]) -> Vec<String> {
    // grid[row][col]
    let mut grid: Vec<Vec<Option<String>>> = vec![Vec::new(); header_rows.len()];

    for (r, cells) in header_rows.iter().enumerate() {
        let mut c = 0;
        for cell in cells {
            while grid[r].get(c).is_some_and(Option::is_some) {
                c += 1;
            }

            let label = element::cell_text(cell);
            let row_span = element::span_attr(cell, "rowspan");
            let col_span = element::span_attr(cell, "colspan");

            for rr in r..(r + row_span).min(header_rows.len()) {
                for cc in c..c + col_span {
                    if grid[rr].len() <= cc {
                        grid[rr].resize(cc + 1, None);
                    }
                    grid[rr][cc] = Some(label.clone());
                }
            }

            c += col_span;
        }
    }

    let width = grid.iter().map(Vec::len).max().unwrap_or(0);
    (0..width)
        .map(|c| {
            let mut tiers: Vec<&str> = Vec::with_capacity(grid.len());
            for row in &grid {
                if let Some(Some(label)) = row.get(c) {
                    if !label.is_empty() && tiers.last() != Some(&label.as_str()) {
                        tiers.push(label);
                    }
                }
            }
            tiers.join(" ")
        })
        .collect()
}

/// 從投資人動向頁取出指定日期那一列，找不到該日期時回傳 None
pub fn parse_trend(html: &str, display_date: &str) -> Result<Option<Trend>> {
    let document = Html::parse_document(html);
    let table_selector = element::selector("table.type2")?;
    let tr_selector = element::selector("tr")?;
    let th_selector = element::selector("th")?;
    let td_selector = element::selector("td")?;

    let tables: Vec<ElementRef> = document.select(&table_selector).collect();
    let mut target = None;
    let mut header_rows: Vec<Vec<ElementRef>> = Vec::new();

    for table in tables.iter() {
        let rows: Vec<Vec<ElementRef>> = table
            .select(&tr_selector)
            .map(|tr| tr.select(&th_selector).collect::<Vec<_>>())
            .filter(|ths| !ths.is_empty())
            .collect();
        let headers = flatten_headers(&rows);
        if headers.iter().any(|h| h.contains("날짜")) && headers.iter().any(|h| h.contains("외국인")) {
            target = Some(*table);
            header_rows = rows;
            break;
        }
    }

    // 表頭無法辨識時用第二個 type2 表格
    let table = match target.or_else(|| tables.get(1).copied()) {
        Some(table) => table,
        None => return Err(anyhow!("No investor trend table in page")),
    };

    let headers = flatten_headers(&header_rows);
    let date_col = DATE.locate("naver", &headers).map(|l| l.index).unwrap_or(0);
    let institution_col = INSTITUTION
        .locate("naver", &headers)
        .map(|l| l.index)
        .unwrap_or(5);
    let foreign_col = FOREIGN.locate("naver", &headers).map(|l| l.index).unwrap_or(6);
    let needed = date_col.max(institution_col).max(foreign_col);

    for tr in table.select(&tr_selector) {
        let cells: Vec<ElementRef> = tr.select(&td_selector).collect();
        if cells.len() <= needed {
            continue;
        }

        if element::cell_text(&cells[date_col]) != display_date {
            continue;
        }

        let institution = text::parse_i64(&element::cell_text(&cells[institution_col]), None)?;
        let foreign = text::parse_i64(&element::cell_text(&cells[foreign_col]), None)?;

        return Ok(Some(Trend::new(foreign, institution)));
    }

    Ok(None)
}

/// 抓取單一證券的投資人動向頁
pub async fn visit(code: &str, date: NaiveDate, timeout: Duration) -> Result<Option<Trend>> {
    let url = concat_string!("https://", naver::HOST, "/item/frgn.naver?code=", code);
    let html = http::get_use_euc_kr(&url, Some(naver::build_headers()), Some(timeout)).await?;

    parse_trend(&html, &date.to_display_date())
}

/// 逐檔爬取 Naver 금융 的외국인·기관 순매매
pub struct NaverInvestorTrend {
    concurrency: usize,
    timeout: Duration,
}

impl NaverInvestorTrend {
    pub fn new(concurrency: usize, timeout: Duration) -> Self {
        NaverInvestorTrend {
            concurrency: concurrency.max(1),
            timeout,
        }
    }

    async fn collect(&self, date: NaiveDate, codes: &[String]) -> HashMap<String, Trend> {
        let timeout = self.timeout;
        gather(date, codes, self.concurrency, move |code| async move {
            visit(&code, date, timeout).await
        })
        .await
    }
}

/// 最多同時 concurrency 檔，單檔失敗或缺少該日只記錄，不影響其他證券
async fn gather<F, Fut>(
    date: NaiveDate,
    codes: &[String],
    concurrency: usize,
    fetch: F,
) -> HashMap<String, Trend>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<Option<Trend>>>,
{
    let results = stream::iter(codes.iter().cloned())
        .map(|code| {
            let pending = fetch(code.clone());
            async move { (code, pending.await) }
        })
        .buffer_unordered(concurrency.max(1))
        .collect::<Vec<(String, Result<Option<Trend>>)>>()
        .await;

    let mut trends = HashMap::with_capacity(results.len());
    let mut missing = 0;
    let mut failed = 0;

    for (code, result) in results {
        match result {
            Ok(Some(trend)) => {
                trends.insert(code, trend);
            }
            Ok(None) => missing += 1,
            Err(why) => {
                failed += 1;
                logging::debug_file_async(format!(
                    "Failed to fetch investor trend of {} because {:?}",
                    code, why
                ));
            }
        }
    }

    logging::info_file_async(format!(
        "naver investor trend {}: {} found, {} without the date, {} failed",
        date.to_display_date(),
        trends.len(),
        missing,
        failed
    ));

    trends
}

#[async_trait]
impl FlowSource for NaverInvestorTrend {
    fn name(&self) -> &'static str {
        "naver"
    }

    async fn fetch(
        &self,
        date: NaiveDate,
        investor: Investor,
        codes: &[String],
    ) -> Result<HashMap<String, i64>> {
        Ok(self
            .collect(date, codes)
            .await
            .into_iter()
            .map(|(code, trend)| (code, trend.net(investor)))
            .collect())
    }

    /// 一個頁面同時有外資與機構，每檔只抓一次
    async fn fetch_all(&self, date: NaiveDate, codes: &[String]) -> InvestorFlows {
        let trends = self.collect(date, codes).await;
        let mut flows = InvestorFlows::new();

        for investor in Investor::iterator() {
            flows.insert(
                investor,
                trends
                    .iter()
                    .map(|(code, trend)| (code.clone(), trend.net(investor)))
                    .collect(),
            );
        }

        flows
    }
}
