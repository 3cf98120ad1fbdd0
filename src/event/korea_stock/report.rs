use std::io::{self, Write};

use anyhow::Result;

use crate::{
    calculation::screen::{self, SURGE_MULTIPLE},
    config,
    database::{self, table::daily_snapshot::DailySnapshotRow, SnapshotStore},
};

/// 每個篩選最多列出的筆數
const REPORT_LIMIT: usize = 30;

/// 讀取最近兩個交易日的快照並輸出報表
pub async fn execute() -> Result<()> {
    let store = database::connect(&config::SETTINGS.store).await?;
    let result = render(store.as_ref(), &mut io::stdout()).await;
    store.close().await;

    result
}

pub async fn render<W: Write + Send>(store: &dyn SnapshotStore, out: &mut W) -> Result<()> {
    let dates = store.latest_trade_dates(2).await?;
    let today_date = match dates.first() {
        Some(date) => date.clone(),
        None => {
            writeln!(out, "{} has no snapshots yet", store.table())?;
            return Ok(());
        }
    };

    let today = store.fetch_snapshot(&today_date).await?;
    let (yesterday_date, yesterday) = match dates.get(1) {
        Some(date) => (Some(date.as_str()), store.fetch_snapshot(date).await?),
        None => (None, Vec::new()),
    };

    write_report(out, &today_date, &today, yesterday_date, &yesterday)?;
    Ok(())
}

fn write_report<W: Write>(
    out: &mut W,
    today_date: &str,
    today: &[DailySnapshotRow],
    yesterday_date: Option<&str>,
    yesterday: &[DailySnapshotRow],
) -> io::Result<()> {
    writeln!(
        out,
        "== {} ({} rows), previous {} ({} rows) ==",
        today_date,
        today.len(),
        yesterday_date.unwrap_or("-"),
        yesterday.len()
    )?;

    writeln!(out)?;
    writeln!(out, "-- 거래량 급증 (> {}x) --", SURGE_MULTIPLE)?;
    writeln!(
        out,
        "{:<8} {:<20} {:>12} {:>14} {:>14} {:>8}",
        "code", "name", "close", "volume", "prev volume", "ratio"
    )?;
    for surge in screen::volume_surge(today, yesterday, SURGE_MULTIPLE)
        .iter()
        .take(REPORT_LIMIT)
    {
        writeln!(
            out,
            "{:<8} {:<20} {:>12} {:>14} {:>14} {:>8.1}",
            surge.row.code,
            surge.row.name,
            surge.row.close,
            surge.row.volume,
            surge.yesterday_volume,
            surge.ratio
        )?;
    }

    writeln!(out)?;
    writeln!(out, "-- 하락 중 외국인·기관 순매수 --")?;
    writeln!(
        out,
        "{:<8} {:<20} {:>12} {:>8} {:>12} {:>12}",
        "code", "name", "change", "rate", "foreign", "institution"
    )?;
    for row in screen::falling_with_buying(today).iter().take(REPORT_LIMIT) {
        writeln!(
            out,
            "{:<8} {:<20} {:>12} {:>8.2} {:>12} {:>12}",
            row.code, row.name, row.price_change, row.change_rate, row.foreign_net, row.institution_net
        )?;
    }

    Ok(())
}
