use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local, TimeDelta};
use rayon::prelude::*;

use crate::logging;

/// 預設單檔最大大小：10 MB
const DEFAULT_MAX_SIZE: u64 = 10 * 1024 * 1024;
/// 預設保留天數：7 天
const DEFAULT_MAX_AGE_DAYS: i64 = 7;

/// 依日期與檔案大小輪轉的日誌檔寫入器。
///
/// 只給單一寫入線程持有，所以不需要鎖。
pub struct Rotate {
    /// 檔名模式，例如 "log/%Y-%m-%d_default_info.log"
    pattern: String,
    /// 目前的基礎檔名（由日期決定，不含 generation）
    base_fn: String,
    /// 目前的完整檔名
    current_fn: PathBuf,
    writer: Option<BufWriter<File>>,
    /// 同一天內的世代編號，只增不減
    generation: u32,
    max_size: u64,
    current_size: u64,
    max_age: TimeDelta,
    /// 日期之後的固定檔名，例如 "_default_info" 與 "log"，清理時只動這些檔案
    owned_stem: String,
    owned_ext: String,
}

impl Rotate {
    pub fn new(pattern: String) -> Self {
        Self::with_options(pattern, DEFAULT_MAX_SIZE, DEFAULT_MAX_AGE_DAYS)
    }

    pub fn with_options(pattern: String, max_size: u64, max_age_days: i64) -> Self {
        let (owned_stem, owned_ext) = owned_suffix(&pattern);
        Rotate {
            pattern,
            base_fn: String::new(),
            current_fn: PathBuf::new(),
            writer: None,
            generation: 0,
            max_size,
            current_size: 0,
            max_age: TimeDelta::try_days(max_age_days).unwrap_or(TimeDelta::days(7)),
            owned_stem,
            owned_ext,
        }
    }

    /// 寫入一段已格式化的日誌，必要時先換日或換世代。
    pub fn write_msg(&mut self, now: DateTime<Local>, msg: &[u8]) -> Result<()> {
        let base_fn = now.format(&self.pattern).to_string();

        if base_fn != self.base_fn || self.writer.is_none() {
            self.base_fn = base_fn;
            self.generation = 0;
            self.open()?;
            self.cleanup(now);
        }

        if self.current_size > 0 && self.current_size + msg.len() as u64 > self.max_size {
            self.generation += 1;
            self.open()?;
        }

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow!("log writer is not opened: {}", self.current_fn.display()))?;
        writer.write_all(msg)?;
        self.current_size += msg.len() as u64;

        Ok(())
    }

    pub fn flush(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(why) = writer.flush() {
                logging::error_console(format!(
                    "Failed to flush {} because {:?}",
                    self.current_fn.display(),
                    why
                ));
            }
        }
    }

    /// generation = 0: "log/2026-01-29_app.log"
    /// generation = 2: "log/2026-01-29_app.2.log"
    fn generation_fn(&self) -> PathBuf {
        let path = Path::new(&self.base_fn);
        if self.generation == 0 {
            return path.to_path_buf();
        }

        let parent = path.parent().unwrap_or(Path::new(""));
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("log");
        let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("log");

        parent.join(format!("{}.{}.{}", stem, self.generation, ext))
    }

    fn open(&mut self) -> Result<()> {
        self.flush();

        let filename = self.generation_fn();
        if let Some(parent) = filename.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&filename)?;

        self.current_size = file.metadata().map(|m| m.len()).unwrap_or(0);
        self.writer = Some(BufWriter::with_capacity(4096, file));
        self.current_fn = filename;

        Ok(())
    }

    /// 刪除同目錄下由這個模式產生且超過保留天數的檔案
    fn cleanup(&self, now: DateTime<Local>) {
        let files = match files_in_directory(&self.current_fn) {
            Ok(files) => files,
            Err(why) => {
                logging::error_console(format!("Failed to list log directory because {:?}", why));
                return;
            }
        };

        let cut_off = (now - self.max_age).timestamp().max(0) as u64;
        let expired: Vec<PathBuf> = files
            .into_iter()
            .filter(|file| is_owned(file, &self.owned_stem, &self.owned_ext))
            .filter(|file| {
                fs::metadata(file)
                    .and_then(|metadata| metadata.modified())
                    .ok()
                    .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
                    .is_some_and(|since| since.as_secs() <= cut_off)
            })
            .collect();

        expired
            .par_iter()
            .with_min_len(num_cpus::get())
            .for_each(|file| {
                if let Err(why) = fs::remove_file(file) {
                    logging::error_console(format!(
                        "couldn't remove the file({}). because {:?}",
                        file.display(),
                        why
                    ));
                }
            });
    }
}

impl Drop for Rotate {
    fn drop(&mut self) {
        self.flush();
    }
}

/// 取出檔名模式最後一個日期格式之後的部分，拆成 stem 與副檔名
fn owned_suffix(pattern: &str) -> (String, String) {
    let name = Path::new(pattern)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(pattern);
    let tail = match name.rfind('%') {
        Some(i) => name.get(i + 2..).unwrap_or(""),
        None => name,
    };

    match tail.rsplit_once('.') {
        Some((stem, ext)) => (stem.to_string(), ext.to_string()),
        None => (tail.to_string(), String::new()),
    }
}

/// "2026-01-29_app.log" 與 "2026-01-29_app.2.log" 都屬於 ("_app", "log")
fn is_owned(file: &Path, owned_stem: &str, owned_ext: &str) -> bool {
    if owned_stem.is_empty() && owned_ext.is_empty() {
        return false;
    }

    let Some(name) = file.file_name().and_then(|s| s.to_str()) else {
        return false;
    };

    let stem = if owned_ext.is_empty() {
        name
    } else {
        match name
            .strip_suffix(owned_ext)
            .and_then(|s| s.strip_suffix('.'))
        {
            Some(stem) => stem,
            None => return false,
        }
    };

    let stem = match stem.rsplit_once('.') {
        Some((head, generation))
            if !generation.is_empty() && generation.bytes().all(|b| b.is_ascii_digit()) =>
        {
            head
        }
        _ => stem,
    };

    stem.ends_with(owned_stem)
}

fn files_in_directory(file_path: &Path) -> Result<Vec<PathBuf>, io::Error> {
    let parent_dir = file_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    let mut files = Vec::new();
    for entry in fs::read_dir(parent_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_pattern(name: &str) -> (PathBuf, String) {
        let dir = std::env::temp_dir().join(format!(
            "krx-rotate-{}-{}",
            name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        let pattern = format!("{}/%Y-%m-%d_{}.log", dir.display(), name);
        (dir, pattern)
    }

    #[test]
    fn test_generation_filename() {
        let mut r = Rotate::new("log/%Y-%m-%d_app.log".to_string());
        r.base_fn = "log/2026-01-29_app.log".to_string();
        assert_eq!(r.generation_fn(), PathBuf::from("log/2026-01-29_app.log"));

        r.generation = 2;
        assert_eq!(r.generation_fn(), PathBuf::from("log/2026-01-29_app.2.log"));
    }

    #[test]
    fn test_owned_suffix() {
        assert_eq!(
            owned_suffix("log/%Y-%m-%d_default_info.log"),
            ("_default_info".to_string(), "log".to_string())
        );
        assert_eq!(owned_suffix("app.log"), ("app".to_string(), "log".to_string()));

        let (stem, ext) = owned_suffix("log/%Y-%m-%d_http_warn.log");
        assert!(is_owned(Path::new("log/2026-01-29_http_warn.log"), &stem, &ext));
        assert!(is_owned(Path::new("log/2026-01-29_http_warn.12.log"), &stem, &ext));
        assert!(!is_owned(Path::new("log/2026-01-29_http_info.log"), &stem, &ext));
        assert!(!is_owned(Path::new("log/2026-01-29_http_warn.log.bak"), &stem, &ext));
        assert!(!is_owned(Path::new(".env"), &stem, &ext));
        assert!(!is_owned(Path::new("app.json"), &stem, &ext));
    }

    #[test]
    fn test_cleanup_only_removes_own_files() {
        let (dir, pattern) = temp_pattern("cleanup");
        fs::create_dir_all(&dir).unwrap();
        for name in [
            "2026-01-01_cleanup.log",
            "2026-01-01_cleanup.3.log",
            "2026-01-01_other.log",
            "app.json",
            ".env",
        ] {
            fs::write(dir.join(name), b"x").unwrap();
        }

        let mut r = Rotate::with_options(pattern, 1024, 1);
        r.current_fn = dir.join("2026-01-05_cleanup.log");
        r.cleanup(Local::now() + TimeDelta::try_days(3).unwrap());

        let mut left: Vec<String> = fs::read_dir(&dir)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        left.sort();
        assert_eq!(left, vec![".env", "2026-01-01_other.log", "app.json"]);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_size_rotation_never_overwrites() {
        let (dir, pattern) = temp_pattern("size");
        let mut r = Rotate::with_options(pattern, 512, 7);
        let now = Local::now();

        for i in 0..50 {
            let msg = format!("Line {:03} - {}\r\n", i, "X".repeat(50));
            r.write_msg(now, msg.as_bytes()).unwrap();
        }
        r.flush();

        assert!(r.generation >= 3, "generation: {}", r.generation);

        let files = fs::read_dir(&dir).unwrap().flatten().count();
        assert_eq!(files as u32, r.generation + 1);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_date_rotation_resets_generation() {
        let (dir, pattern) = temp_pattern("date");
        let mut r = Rotate::with_options(pattern, 64, 30);
        let mut now = Local::now();

        for _ in 0..4 {
            r.write_msg(now, "0123456789012345678901234567890123456789\r\n".as_bytes())
                .unwrap();
        }
        assert!(r.generation > 0);

        now += TimeDelta::try_days(1).unwrap();
        r.write_msg(now, b"next day\r\n").unwrap();
        assert_eq!(r.generation, 0);

        drop(r);
        let _ = fs::remove_dir_all(&dir);
    }
}
