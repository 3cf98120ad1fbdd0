use std::cmp::Ordering;

use crate::{database::table::daily_snapshot::DailySnapshotRow, util::map};

/// 成交量暴增的倍數門檻
pub const SURGE_MULTIPLE: i64 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct Surge<'a> {
    pub row: &'a DailySnapshotRow,
    pub yesterday_volume: i64,
    pub ratio: f64,
}

/// 今日成交量超過昨日 `multiple` 倍的證券，依倍數由大到小排序。
///
/// 昨日沒有資料或成交量為 0 的不列入。
pub fn volume_surge<'a>(
    today: &'a [DailySnapshotRow],
    yesterday: &[DailySnapshotRow],
    multiple: i64,
) -> Vec<Surge<'a>> {
    let previous = map::to_key_map(yesterday);
    let mut surges: Vec<Surge> = today
        .iter()
        .filter_map(|row| {
            let yesterday_volume = previous.get(&row.code)?.volume;
            if yesterday_volume <= 0 || row.volume <= yesterday_volume.saturating_mul(multiple) {
                return None;
            }

            Some(Surge {
                row,
                yesterday_volume,
                ratio: row.volume as f64 / yesterday_volume as f64,
            })
        })
        .collect();

    surges.sort_by(|a, b| b.ratio.partial_cmp(&a.ratio).unwrap_or(Ordering::Equal));
    surges
}

/// 股價下跌但外資或機構買超，依兩者合計由大到小排序
pub fn falling_with_buying(rows: &[DailySnapshotRow]) -> Vec<&DailySnapshotRow> {
    let mut picked: Vec<&DailySnapshotRow> = rows
        .iter()
        .filter(|r| r.price_change < 0 && (r.foreign_net > 0 || r.institution_net > 0))
        .collect();

    picked.sort_by_key(|r| std::cmp::Reverse(r.foreign_net + r.institution_net));
    picked
}
