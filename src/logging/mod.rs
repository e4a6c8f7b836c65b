//! 日志系统.
//!
//! 库 crate 只通过 `log` 门面输出日志, 这里负责安装订阅器:
//! - 控制台层: 彩色, 默认 debug 级别
//! - 文件层: 按日期命名 (`<prefix>.YYYY-MM-DD.log`), 非阻塞写入
//! - 维护任务: 午夜切换新文件, 压缩历史文件, 删除过期文件
//!
//! `log` 记录经 tracing-subscriber 的 `tracing-log` 桥接进入同一套输出.

use anyhow::{Context, Result, ensure};
use chrono::{Datelike, Local, NaiveDate, Timelike};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, FormatEvent, FormatFields, format::Writer},
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

mod task;

/// 日志配置
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 文件日志过滤规则 (EnvFilter 语法, 如 `"info,qiao_surface=debug"`)
    pub level: String,
    /// 控制台日志过滤规则
    pub console_level: String,
    /// 日志目录
    pub directory: String,
    /// 日志文件名前缀
    pub file_prefix: String,
    /// 历史日志保留天数
    pub retention_days: i64,
    /// 是否 gzip 压缩历史日志
    pub compress_history: bool,
    /// 清理检查间隔 (秒)
    pub cleanup_interval_seconds: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console_level: "debug".to_string(),
            directory: "logs".to_string(),
            file_prefix: "qiao".to_string(),
            retention_days: 30,
            compress_history: true,
            cleanup_interval_seconds: 3600,
        }
    }
}

impl LoggingConfig {
    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.file_prefix.is_empty(), "日志文件前缀不能为空");
        ensure!(
            !self.file_prefix.contains(['/', '\\']),
            "日志文件前缀不能包含路径分隔符: {}",
            self.file_prefix
        );
        ensure!(
            self.retention_days >= 1,
            "日志保留天数必须至少为 1, 实际为 {}",
            self.retention_days
        );
        ensure!(self.cleanup_interval_seconds > 0, "日志清理间隔不能为 0");
        EnvFilter::try_new(&self.level)
            .with_context(|| format!("文件日志级别非法: {}", self.level))?;
        EnvFilter::try_new(&self.console_level)
            .with_context(|| format!("控制台日志级别非法: {}", self.console_level))?;
        Ok(())
    }
}

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// 初始化全局日志
///
/// 只能调用一次. 在 tokio 运行时内调用时启动日志维护任务, 否则只写当天文件.
pub fn init(config: LoggingConfig) -> Result<()> {
    config.validate()?;
    std::fs::create_dir_all(&config.directory)
        .with_context(|| format!("创建日志目录失败, path={}", config.directory))?;

    let rotate_requested = Arc::new(AtomicBool::new(false));
    let file_appender = DailyFileWriter::new(
        Path::new(&config.directory),
        &config.file_prefix,
        Arc::clone(&rotate_requested),
    )?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = fmt::Layer::default()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .event_format(ConsoleFormatter)
        .with_filter(EnvFilter::new(&config.console_level));

    let file_layer = fmt::Layer::default()
        .with_writer(non_blocking)
        .with_ansi(false)
        .event_format(FileFormatter)
        .with_filter(EnvFilter::new(&config.level));

    Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("日志系统已经初始化")?;
    LOG_GUARD.set(guard).ok();

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => task::spawn_log_maintenance_task(&handle, config, rotate_requested),
        Err(_) => tracing::warn!("未在 tokio 运行时内初始化日志, 不进行日志翻滚与清理"),
    }

    Ok(())
}

/// 当天日志文件写入器, 收到翻滚请求后重新打开新日期的文件
struct DailyFileWriter {
    directory: PathBuf,
    prefix: String,
    rotate_requested: Arc<AtomicBool>,
    file: File,
}

impl DailyFileWriter {
    fn new(directory: &Path, prefix: &str, rotate_requested: Arc<AtomicBool>) -> Result<Self> {
        let today = Local::now().date_naive();
        let file = open_append_file(&build_current_log_path(directory, prefix, today))?;
        Ok(Self {
            directory: directory.to_path_buf(),
            prefix: prefix.to_string(),
            rotate_requested,
            file,
        })
    }

    fn reopen(&mut self) -> std::io::Result<()> {
        let today = Local::now().date_naive();
        let path = build_current_log_path(&self.directory, &self.prefix, today);
        self.file = open_append_file(&path).map_err(std::io::Error::other)?;
        Ok(())
    }
}

impl Write for DailyFileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.rotate_requested.swap(false, Ordering::AcqRel) {
            self.reopen()?;
        }
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

fn open_append_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("打开日志文件失败, path={}", path.display()))
}

pub(crate) fn build_current_log_path(directory: &Path, prefix: &str, date: NaiveDate) -> PathBuf {
    directory.join(format!("{}.{}.log", prefix, date.format("%Y-%m-%d")))
}

/// 写入 `[MM-DD HH:MM:SS.mmm] ` 前缀
fn write_timestamp(writer: &mut Writer<'_>) -> std::fmt::Result {
    let now = Local::now();
    write!(
        writer,
        "[{:02}-{:02} {:02}:{:02}:{:02}.{:03}] ",
        now.month(),
        now.day(),
        now.hour(),
        now.minute(),
        now.second(),
        now.timestamp_subsec_millis()
    )
}

/// 当前线程名; 执行器工作线程以执行器名称命名
fn thread_label() -> String {
    let current = std::thread::current();
    current
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("{:?}", current.id()))
}

struct ConsoleFormatter;

impl<S, N> FormatEvent<S, N> for ConsoleFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let meta = event.metadata();
        write_timestamp(&mut writer)?;
        let color = match *meta.level() {
            tracing::Level::ERROR => "\x1b[31m",
            tracing::Level::WARN => "\x1b[33m",
            tracing::Level::INFO => "\x1b[32m",
            _ => "\x1b[34m",
        };
        write!(
            writer,
            "{}{:5}\x1b[0m ({}) {} > ",
            color,
            meta.level().to_string(),
            thread_label(),
            meta.target()
        )?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

struct FileFormatter;

impl<S, N> FormatEvent<S, N> for FileFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let meta = event.metadata();
        write_timestamp(&mut writer)?;
        write!(
            writer,
            "{:5} ({}) {} > ",
            meta.level().to_string(),
            thread_label(),
            meta.target()
        )?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
