/// 收盤後的資料收集
pub mod closing;
/// 最近兩個交易日的報表
pub mod report;
