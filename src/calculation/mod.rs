/// 報表用的篩選
pub mod screen;
/// 合併行情與投資人淨買賣量
pub mod snapshot;
