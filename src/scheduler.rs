use std::{env, future::Future};

use anyhow::{Error, Result};
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::{config, event::korea_stock::closing, logging};

/// 啟動排程
pub async fn start(sched: &JobScheduler) -> Result<()> {
    //                 sec  min   hour   day of month   month   day of week
    // UTC 時間，預設 "0 40 6 * * Mon-Fri" 即韓國時間 15:40
    let expression = config::SETTINGS.pipeline.schedule.as_str();
    sched.add(create_job(expression, closing::execute_today)?).await?;
    sched.start().await?;

    logging::info_console(format!(
        "KrxStockCrawler 已啟動 ({}) Rust OS/Arch: {}/{}",
        expression,
        env::consts::OS,
        env::consts::ARCH
    ));

    Ok(())
}

fn create_job<F, Fut>(cron_expr: &str, task: F) -> Result<Job>
where
    F: Fn() -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send,
{
    let expression = cron_expr.to_string();
    Ok(Job::new_async(cron_expr, move |_uuid, _l| {
        let task = task.clone();
        let expression = expression.clone();
        Box::pin(async move {
            if let Err(why) = task().await {
                logging::error_file_async(format!(
                    "Failed to execute task({}) because {:?}",
                    expression, why
                ));
            }
        })
    })?)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn noop() -> Result<()> {
        Ok(())
    }

    #[tokio::test]
    async fn test_create_job() {
        assert!(create_job("0 40 6 * * Mon-Fri", noop).is_ok());
        assert!(create_job("every weekday", noop).is_err());
    }

    #[tokio::test]
    #[ignore]
    async fn test_start() {
        dotenv::dotenv().ok();
        let sched = JobScheduler::new().await.unwrap();
        start(&sched).await.unwrap();
    }
}
