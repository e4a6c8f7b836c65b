//! 日志维护任务: 午夜翻滚, 历史压缩, 过期删除.

use super::{LoggingConfig, build_current_log_path};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDate, TimeZone, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};
use tokio::runtime::Handle;
use tracing::{debug, error};

/// 一次清理的结果
#[derive(Debug, Default, PartialEq, Eq)]
pub(super) struct CleanupReport {
    /// 删除的过期文件数
    pub removed: usize,
    /// 新压缩的历史文件数
    pub compressed: usize,
}

pub(super) fn spawn_log_maintenance_task(
    handle: &Handle,
    config: LoggingConfig,
    rotate_requested: Arc<AtomicBool>,
) {
    handle.spawn(async move {
        let mut cleanup_interval =
            tokio::time::interval(Duration::from_secs(config.cleanup_interval_seconds));

        if let Err(err) = touch_current_log(&config) {
            error!("初始化当前日志文件失败: {}", err);
        }
        run_cleanup(&config, "启动时");

        let mut next_rollover_at = next_rollover_instant();
        loop {
            tokio::select! {
                _ = cleanup_interval.tick() => run_cleanup(&config, "定时"),
                _ = tokio::time::sleep_until(next_rollover_at) => {
                    match touch_current_log(&config) {
                        Ok(()) => rotate_requested.store(true, Ordering::Release),
                        Err(err) => error!("日志翻滚失败: {}", err),
                    }
                    run_cleanup(&config, "翻滚后");
                    next_rollover_at = next_rollover_instant();
                }
            }
        }
    });
}

fn run_cleanup(config: &LoggingConfig, stage: &str) {
    match cleanup_logs(config, Local::now().date_naive()) {
        Ok(report) if report != CleanupReport::default() => {
            debug!(
                "{}清理日志: 删除 {} 个, 压缩 {} 个",
                stage, report.removed, report.compressed
            );
        }
        Ok(_) => {}
        Err(err) => error!("{}清理日志失败: {}", stage, err),
    }
}

fn next_rollover_instant() -> tokio::time::Instant {
    let wait = until_next_midnight(Local::now()).unwrap_or_else(|err| {
        error!("计算下一次翻滚时间失败: {}", err);
        Duration::from_secs(1)
    });
    tokio::time::Instant::now() + wait
}

/// 确保当天日志文件存在
fn touch_current_log(config: &LoggingConfig) -> Result<()> {
    let directory = Path::new(&config.directory);
    fs::create_dir_all(directory)?;
    let today = Local::now().date_naive();
    let current_path = build_current_log_path(directory, &config.file_prefix, today);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&current_path)
        .with_context(|| format!("创建当前日志文件失败, path={}", current_path.display()))?;
    Ok(())
}

/// 删除早于保留期的日志, 压缩今天以前的未压缩日志
fn cleanup_logs(config: &LoggingConfig, today: NaiveDate) -> Result<CleanupReport> {
    let directory = Path::new(&config.directory);
    let mut report = CleanupReport::default();
    if !directory.exists() {
        return Ok(report);
    }

    let cutoff = today - ChronoDuration::days(config.retention_days);
    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().to_string();
        let Some((date, compressed)) = parse_rotated_log_name(&file_name, &config.file_prefix)
        else {
            continue;
        };

        let path = entry.path();
        if date < cutoff {
            match fs::remove_file(&path) {
                Ok(()) => report.removed += 1,
                Err(err) => error!("删除过期日志失败, path={}: {}", path.display(), err),
            }
        } else if config.compress_history && !compressed && date < today {
            match compress_to_gz(&path) {
                Ok(true) => report.compressed += 1,
                Ok(false) => {}
                Err(err) => error!("压缩日志失败: {:#}", err),
            }
        }
    }

    Ok(report)
}

/// 压缩为 `<file>.gz` 并删除原文件; 目标已存在时跳过, 返回 false
fn compress_to_gz(path: &Path) -> Result<bool> {
    let gz_path = PathBuf::from(format!("{}.gz", path.display()));
    if gz_path.exists() {
        return Ok(false);
    }

    let mut input =
        File::open(path).with_context(|| format!("打开待压缩日志失败, path={}", path.display()))?;
    let output = File::create(&gz_path)
        .with_context(|| format!("创建压缩日志失败, path={}", gz_path.display()))?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;

    fs::remove_file(path)
        .with_context(|| format!("删除已压缩日志失败, path={}", path.display()))?;
    Ok(true)
}

/// 解析 `<prefix>.YYYY-MM-DD.log[.gz]`, 返回 (日期, 是否已压缩)
fn parse_rotated_log_name(file_name: &str, prefix: &str) -> Option<(NaiveDate, bool)> {
    let rest = file_name.strip_prefix(prefix)?.strip_prefix('.')?;
    let (date_part, compressed) = match rest.strip_suffix(".log.gz") {
        Some(date_part) => (date_part, true),
        None => (rest.strip_suffix(".log")?, false),
    };
    if date_part.len() != 10 {
        return None;
    }
    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
    Some((date, compressed))
}

fn until_next_midnight(now: DateTime<Local>) -> Result<Duration> {
    let next_date = now.date_naive() + ChronoDuration::days(1);
    let next_midnight = next_date
        .and_hms_opt(0, 0, 0)
        .context("计算下一次日志翻滚时间失败")?;
    let next_local = Local
        .from_local_datetime(&next_midnight)
        .earliest()
        .context("转换本地时间失败")?;
    let target = SystemTime::from(next_local.with_timezone(&Utc));
    Ok(target
        .duration_since(SystemTime::from(now.with_timezone(&Utc)))
        .unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    fn temp_config(temp_dir: &TempDir, compress_history: bool) -> LoggingConfig {
        LoggingConfig {
            directory: temp_dir.path().to_string_lossy().to_string(),
            file_prefix: "worker".to_string(),
            retention_days: 7,
            compress_history,
            cleanup_interval_seconds: 60,
            ..LoggingConfig::default()
        }
    }

    fn new_temp_dir() -> TempDir {
        match TempDir::new() {
            Ok(temp_dir) => temp_dir,
            Err(err) => panic!("创建临时目录失败: {}", err),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        match NaiveDate::from_ymd_opt(y, m, d) {
            Some(date) => date,
            None => panic!("测试日期非法"),
        }
    }

    #[test]
    fn test_parse_rotated_log_name() {
        let prefix = "worker";
        assert_eq!(
            parse_rotated_log_name("worker.2026-02-06.log", prefix),
            Some((date(2026, 2, 6), false))
        );
        assert_eq!(
            parse_rotated_log_name("worker.2026-02-06.log.gz", prefix),
            Some((date(2026, 2, 6), true))
        );
        assert!(parse_rotated_log_name("worker.log", prefix).is_none());
        assert!(parse_rotated_log_name("other.2026-02-06.log", prefix).is_none());
        assert!(parse_rotated_log_name("worker.2026-2-6.log", prefix).is_none());
    }

    #[test]
    fn test_touch_current_log_creates_empty_file() {
        let temp_dir = new_temp_dir();
        let config = temp_config(&temp_dir, true);

        let touched = touch_current_log(&config);
        assert!(touched.is_ok(), "创建当前日志文件失败: {:?}", touched.err());
        // 再次调用不截断已有文件
        assert!(touch_current_log(&config).is_ok());

        let today = Local::now().date_naive();
        let current_path =
            build_current_log_path(Path::new(&config.directory), &config.file_prefix, today);
        let len = current_path.metadata().map(|m| m.len()).ok();
        assert_eq!(len, Some(0));
    }

    #[test]
    fn test_cleanup_removes_expired_and_compresses_history() {
        let temp_dir = new_temp_dir();
        let config = temp_config(&temp_dir, true);
        let dir = temp_dir.path();
        let today = date(2026, 3, 20);

        let write = |name: &str, content: &str| {
            assert!(fs::write(dir.join(name), content).is_ok());
        };
        write("worker.2026-03-01.log", "expired");
        write("worker.2026-03-01.log.gz", "expired-gz");
        write("worker.2026-03-18.log", "history line");
        write("worker.2026-03-20.log", "today");
        write("unrelated.txt", "keep");

        let report = cleanup_logs(&config, today);
        let report = match report {
            Ok(report) => report,
            Err(err) => panic!("清理日志失败: {}", err),
        };
        assert_eq!(
            report,
            CleanupReport {
                removed: 2,
                compressed: 1
            }
        );

        assert!(!dir.join("worker.2026-03-01.log").exists());
        assert!(!dir.join("worker.2026-03-01.log.gz").exists());
        assert!(!dir.join("worker.2026-03-18.log").exists());
        assert!(dir.join("worker.2026-03-20.log").exists(), "当天日志不应压缩");
        assert!(dir.join("unrelated.txt").exists());

        let gz = File::open(dir.join("worker.2026-03-18.log.gz"));
        let mut decoded = String::new();
        match gz {
            Ok(file) => {
                assert!(GzDecoder::new(file).read_to_string(&mut decoded).is_ok());
            }
            Err(err) => panic!("打开压缩日志失败: {}", err),
        }
        assert_eq!(decoded, "history line");
    }

    #[test]
    fn test_cleanup_without_compression() {
        let temp_dir = new_temp_dir();
        let config = temp_config(&temp_dir, false);
        let dir = temp_dir.path();
        assert!(fs::write(dir.join("worker.2026-03-18.log"), "history").is_ok());

        let report = cleanup_logs(&config, date(2026, 3, 20)).ok();
        assert_eq!(report, Some(CleanupReport::default()));
        assert!(dir.join("worker.2026-03-18.log").exists());
    }

    #[test]
    fn test_until_next_midnight_within_a_day() {
        let wait = until_next_midnight(Local::now());
        match wait {
            Ok(wait) => assert!(wait <= Duration::from_secs(25 * 3600)),
            Err(err) => panic!("计算翻滚时间失败: {}", err),
        }
    }
}
