//! 上游回應的欄位名稱會隨版本改變，這裡依序比對候選名稱，
//! 都不符合時才退回固定位置，並回報是用哪一種方式找到的。

use std::fmt;

use crate::logging;

/// 欄位名稱的候選規則
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// 名稱完全相同
    Exact(&'static str),
    /// 名稱包含此字串
    Contains(&'static str),
}

impl Pattern {
    fn matches(&self, header: &str) -> bool {
        let header = header.trim();
        match self {
            Pattern::Exact(name) => header == *name,
            Pattern::Contains(marker) => header.contains(marker),
        }
    }
}

/// 實際採用的比對方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Name(Pattern),
    Position(usize),
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Name(Pattern::Exact(name)) => write!(f, "exact name '{}'", name),
            Strategy::Name(Pattern::Contains(marker)) => write!(f, "name containing '{}'", marker),
            Strategy::Position(index) => write!(f, "fallback position {}", index),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Located {
    pub index: usize,
    pub strategy: Strategy,
}

impl Located {
    pub fn is_fallback(&self) -> bool {
        matches!(self.strategy, Strategy::Position(_))
    }
}

/// 一個欄位的查找規則：依序嘗試 `patterns`，最後才用 `fallback` 位置
#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub label: &'static str,
    pub patterns: &'static [Pattern],
    pub fallback: Option<usize>,
}

impl Column {
    pub const fn new(
        label: &'static str,
        patterns: &'static [Pattern],
        fallback: Option<usize>,
    ) -> Self {
        Column {
            label,
            patterns,
            fallback,
        }
    }

    /// 純比對，不寫日誌
    pub fn find<S: AsRef<str>>(&self, headers: &[S]) -> Option<Located> {
        for pattern in self.patterns {
            if let Some(index) = headers.iter().position(|h| pattern.matches(h.as_ref())) {
                return Some(Located {
                    index,
                    strategy: Strategy::Name(*pattern),
                });
            }
        }

        self.fallback
            .filter(|index| *index < headers.len())
            .map(|index| Located {
                index,
                strategy: Strategy::Position(index),
            })
    }

    /// 比對並記錄結果，退回固定位置時寫入警告
    pub fn locate<S: AsRef<str>>(&self, source: &str, headers: &[S]) -> Option<Located> {
        let located = self.find(headers);
        match &located {
            Some(l) if l.is_fallback() => {
                let names: Vec<&str> = headers.iter().map(AsRef::as_ref).collect();
                logging::warn_file_async(format!(
                    "{} column '{}' matched by {} (headers: {:?})",
                    source, self.label, l.strategy, names
                ));
            }
            Some(l) => {
                logging::debug_file_async(format!(
                    "{} column '{}' matched by {}",
                    source, self.label, l.strategy
                ));
            }
            None => {
                let names: Vec<&str> = headers.iter().map(AsRef::as_ref).collect();
                logging::warn_file_async(format!(
                    "{} column '{}' not found (headers: {:?})",
                    source, self.label, names
                ));
            }
        }

        located
    }
}
