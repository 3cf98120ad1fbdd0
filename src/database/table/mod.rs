/// 每日快照
pub mod daily_snapshot;
