use std::path::PathBuf;

use anyhow::bail;
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

/// 获取当前时间 (UTC)
pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// 初始化日志
pub fn init_log(log: Option<PathBuf>) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber_builder = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .with_thread_names(true);
    let (non_blocking, guard) = if let Some(log) = log {
        // output to file，daily rotate, non-blocking
        if !log.is_dir() {
            bail!("log path {} is not a directory", log.display());
        }
        let file_appender = tracing_appender::rolling::daily(log, "course_server.log");
        tracing_appender::non_blocking(file_appender)
    } else {
        // output to stdout
        tracing_appender::non_blocking(std::io::stdout())
    };
    tracing::subscriber::set_global_default(subscriber_builder.with_writer(non_blocking).finish())?;
    Ok(guard)
}

/// Integer form of `round(done / total * 100)`, clamped to 0..=100.
pub fn percentage(done: i64, total: i64) -> i64 {
    if total <= 0 || done <= 0 {
        return 0;
    }
    let done = done.min(total);
    (200 * done + total) / (2 * total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_rounds_half_up() {
        assert_eq!(percentage(0, 4), 0);
        assert_eq!(percentage(1, 2), 50);
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(1, 8), 13);
        assert_eq!(percentage(3, 3), 100);
    }

    #[test]
    fn percentage_clamps() {
        assert_eq!(percentage(5, 0), 0);
        assert_eq!(percentage(7, 3), 100);
        assert_eq!(percentage(-1, 3), 0);
    }

    #[test]
    fn percentage_is_monotonic() {
        for total in 1..=25 {
            let mut last = 0;
            for done in 0..=total {
                let p = percentage(done, total);
                assert!(p >= last);
                assert_eq!(p, ((done as f64 / total as f64) * 100.0).round() as i64);
                last = p;
            }
        }
    }
}
