use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_cron_scheduler::JobScheduler;

use crate::declare::FlowSourceKind;

pub mod calculation;
pub mod config;
pub mod crawler;
pub mod database;
pub mod declare;
pub mod event;
pub mod logging;
pub mod scheduler;
pub mod util;

#[cfg(all(target_os = "linux", target_env = "musl"))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(
    name = "krx_stock_crawler",
    about = "Collects KRX daily quotes and investor net purchases into a SQLite-compatible store"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, merge and store the snapshot of one trade date (default command).
    Run {
        /// Trade date (YYYYMMDD). Defaults to TRADE_DATE or today in Korea.
        #[arg(long)]
        date: Option<String>,

        /// Investor flow source: bulk or scrape. Defaults to FLOW_SOURCE.
        #[arg(long)]
        source: Option<FlowSourceKind>,
    },
    /// Print the volume surge and falling-with-buying screens of the two latest trade dates.
    Report,
    /// Stay running and collect every weekday on the configured cron schedule.
    Schedule,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        logging::error_console("Failed to install the rustls crypto provider".to_string());
    }

    let command = match parse_command(std::env::args_os()) {
        Ok(command) => command,
        Err(why) if !why.use_stderr() => {
            // --help
            let _ = why.print();
            return ExitCode::SUCCESS;
        }
        Err(why) => {
            let _ = why.print();
            return ExitCode::FAILURE;
        }
    };

    let result = run(command).await;
    let code = match &result {
        Ok(_) => ExitCode::SUCCESS,
        Err(why) => {
            logging::error_console(format!("{:#}", why));
            logging::error_file_async(format!("{:?}", why));
            ExitCode::FAILURE
        }
    };

    logging::flush().await;
    code
}

/// 沒有子指令時等同 run
fn parse_command<I, T>(args: I) -> Result<Commands, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = Cli::try_parse_from(args)?;
    Ok(cli.command.unwrap_or(Commands::Run {
        date: None,
        source: None,
    }))
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Run { date, source } => {
            let rows = event::korea_stock::closing::execute(date.as_deref(), source).await?;
            logging::info_console(format!("완료: {} rows", rows));
        }
        Commands::Report => event::korea_stock::report::execute().await?,
        Commands::Schedule => {
            let sched = JobScheduler::new().await?;
            scheduler::start(&sched).await?;
            tokio::signal::ctrl_c().await?;
            logging::info_console("KrxStockCrawler 已停止".to_string());
        }
    }

    Ok(())
}
