//! 运行配置.
//!
//! 从 JSON 文件加载, 缺省字段使用默认值:
//!
//! ```json
//! {
//!   "logging": { "level": "info", "directory": "logs", "file_prefix": "qiao" },
//!   "pool": { "capacity": 8, "fourcc": "NV12", "width": 1920, "height": 1080 }
//! }
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::logging::LoggingConfig;
use qiao_surface::PoolConfig;

/// 顶层配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct QiaoConfig {
    /// 日志配置
    pub logging: LoggingConfig,
    /// 表面池配置
    pub pool: PoolConfig,
}

impl QiaoConfig {
    /// 从 JSON 文件加载并校验
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败, path={}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("配置文件无效, path={}", path.display()))
    }

    /// 从 JSON 文本加载并校验
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text).context("解析 JSON 配置失败")?;
        config.validate()?;
        Ok(config)
    }

    /// 校验全部子配置
    pub fn validate(&self) -> Result<()> {
        self.logging.validate().context("logging 配置无效")?;
        self.pool.validate().context("pool 配置无效")?;
        Ok(())
    }
}
