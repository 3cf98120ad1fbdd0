use std::{fmt::Write as _, thread, time::Duration};

use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use strum::{AsRefStr, Display};
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedSender},
    oneshot,
};

use crate::logging::rotate::Rotate;

pub mod rotate;

static LOGGER: Lazy<Logger> = Lazy::new(|| Logger::new("default"));

/// 所有以名稱建立的 Logger，`flush` 時會一併等待
static REGISTRY: Lazy<std::sync::Mutex<Vec<UnboundedSender<Command>>>> =
    Lazy::new(Default::default);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Level {
    Info,
    Warn,
    Error,
    Debug,
}

enum Command {
    Write(LogMessage),
    Flush(oneshot::Sender<()>),
}

pub struct LogMessage {
    pub level: Level,
    pub msg: String,
    pub created_at: DateTime<Local>,
}

impl LogMessage {
    pub fn new(level: Level, msg: String) -> Self {
        LogMessage {
            level,
            msg,
            created_at: Local::now(),
        }
    }
}

/// 每個等級各自一個檔案與寫入線程
pub struct Logger {
    info_writer: UnboundedSender<Command>,
    warn_writer: UnboundedSender<Command>,
    error_writer: UnboundedSender<Command>,
    debug_writer: UnboundedSender<Command>,
}

impl Logger {
    pub fn new(log_name: &str) -> Self {
        Logger {
            info_writer: Self::create_writer(log_name, Level::Info),
            warn_writer: Self::create_writer(log_name, Level::Warn),
            error_writer: Self::create_writer(log_name, Level::Error),
            debug_writer: Self::create_writer(log_name, Level::Debug),
        }
    }

    pub fn info(&self, log: String) {
        self.send(Level::Info, log, &self.info_writer);
    }

    pub fn warn(&self, log: String) {
        self.send(Level::Warn, log, &self.warn_writer);
    }

    pub fn error(&self, log: String) {
        self.send(Level::Error, log, &self.error_writer);
    }

    pub fn debug(&self, log: String) {
        self.send(Level::Debug, log, &self.debug_writer);
    }

    fn send(&self, level: Level, msg: String, writer: &UnboundedSender<Command>) {
        if let Err(why) = writer.send(Command::Write(LogMessage::new(level, msg))) {
            error_console(format!("Failed to send log message because {}", why));
        }
    }

    fn create_writer(log_name: &str, level: Level) -> UnboundedSender<Command> {
        let (tx, mut rx) = unbounded_channel::<Command>();
        let pattern = format!("log/%Y-%m-%d_{}_{}.log", log_name, level.as_ref());

        // 寫入檔案的操作使用另一個線程處理
        let spawned = thread::Builder::new()
            .name(format!("log-{}-{}", log_name, level.as_ref()))
            .spawn(move || {
                let mut rotate = Rotate::new(pattern);
                let mut line = String::with_capacity(4096);

                while let Some(command) = rx.blocking_recv() {
                    match command {
                        Command::Write(received) => {
                            if writeln!(
                                &mut line,
                                "{} {} {}",
                                received.created_at.format("%F %X%.6f"),
                                received.level,
                                received.msg
                            )
                            .is_err()
                            {
                                continue;
                            }

                            if rx.is_empty() || line.len() >= 4096 {
                                write_out(&mut rotate, &mut line);
                            }
                        }
                        Command::Flush(done) => {
                            write_out(&mut rotate, &mut line);
                            let _ = done.send(());
                        }
                    }
                }

                write_out(&mut rotate, &mut line);
            });

        if let Err(why) = spawned {
            error_console(format!("Failed to spawn log writer because {:?}", why));
        }

        if let Ok(mut registry) = REGISTRY.lock() {
            registry.push(tx.clone());
        }

        tx
    }
}

fn write_out(rotate: &mut Rotate, line: &mut String) {
    if line.is_empty() {
        return;
    }

    if let Err(why) = rotate.write_msg(Local::now(), line.as_bytes()) {
        error_console(format!(
            "Failed to write to log file. because:{:#?}\r\nmsg:{}",
            why, line
        ));
    }

    rotate.flush();
    line.clear();
}

/// 等待所有寫入線程把緩衝區寫進檔案，程式結束前呼叫。
pub async fn flush() {
    let writers: Vec<UnboundedSender<Command>> = match REGISTRY.lock() {
        Ok(registry) => registry.clone(),
        Err(_) => return,
    };

    for writer in writers {
        let (done_tx, done_rx) = oneshot::channel();
        if writer.send(Command::Flush(done_tx)).is_ok() {
            let _ = tokio::time::timeout(Duration::from_secs(2), done_rx).await;
        }
    }
}

pub fn info_file_async(log: String) {
    LOGGER.info(log);
}

pub fn warn_file_async(log: String) {
    LOGGER.warn(log);
}

pub fn error_file_async(log: String) {
    LOGGER.error(log);
}

pub fn debug_file_async(log: String) {
    LOGGER.debug(log);
}

pub fn info_console(log: String) {
    println!(
        "{} Info {}",
        Local::now().format("%Y-%m-%d %H:%M:%S.%3f"),
        log
    );
}

pub fn error_console(log: String) {
    eprintln!(
        "{} Error {}",
        Local::now().format("%Y-%m-%d %H:%M:%S.%3f"),
        log
    );
}
