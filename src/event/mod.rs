/// 韓股
pub mod korea_stock;
