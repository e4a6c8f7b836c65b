//! 表面分配器与池配置.
//!
//! 表面由硬件驱动持有, 池只管理不透明的 [`SurfaceId`]. 分配和释放都是批量的:
//! 创建池时一次分配全部表面, 池销毁时一次归还.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use log::{debug, warn};
use qiao_core::{QiaoError, QiaoResult};
use serde::{Deserialize, Serialize};

/// 硬件表面标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// 像素格式 FourCC
///
/// 按小端打包, 与硬件加速 API 的约定一致. 序列化为 4 字符字符串 (如 `"NV12"`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fourcc(u32);

impl Fourcc {
    /// 4:2:0 半平面 8 位
    pub const NV12: Self = Self::from_bytes(*b"NV12");
    /// 4:2:0 半平面 10 位
    pub const P010: Self = Self::from_bytes(*b"P010");
    /// 4:2:0 三平面 8 位
    pub const I420: Self = Self::from_bytes(*b"I420");

    /// 由 4 个字符构造
    pub const fn from_bytes(code: [u8; 4]) -> Self {
        Self(u32::from_le_bytes(code))
    }

    /// 打包后的数值
    pub fn value(self) -> u32 {
        self.0
    }

    /// 还原为 4 个字符
    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl TryFrom<String> for Fourcc {
    type Error = QiaoError;

    fn try_from(code: String) -> QiaoResult<Self> {
        let bytes: [u8; 4] = code.as_bytes().try_into().map_err(|_| {
            QiaoError::InvalidArgument(format!("FourCC 必须是 4 个字符: {:?}", code))
        })?;
        if !bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            return Err(QiaoError::InvalidArgument(format!(
                "FourCC 包含非法字符: {:?}",
                code
            )));
        }
        Ok(Self::from_bytes(bytes))
    }
}

impl From<Fourcc> for String {
    fn from(fourcc: Fourcc) -> Self {
        fourcc.to_string()
    }
}

impl fmt::Display for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.to_bytes() {
            write!(f, "{}", char::from(b))?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fourcc({})", self)
    }
}

/// 表面池配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// 表面数量
    pub capacity: usize,
    /// 像素格式
    pub fourcc: Fourcc,
    /// 宽度 (像素)
    pub width: u32,
    /// 高度 (像素)
    pub height: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 8,
            fourcc: Fourcc::NV12,
            width: 1920,
            height: 1080,
        }
    }
}

impl PoolConfig {
    /// 创建指定尺寸与容量的 NV12 配置
    pub fn new(capacity: usize, width: u32, height: u32) -> Self {
        Self {
            capacity,
            width,
            height,
            ..Self::default()
        }
    }

    /// 校验配置
    pub fn validate(&self) -> QiaoResult<()> {
        if self.capacity == 0 {
            return Err(QiaoError::InvalidArgument("表面池容量不能为 0".into()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(QiaoError::InvalidArgument(format!(
                "表面尺寸非法: {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

/// 表面分配器
///
/// 由硬件后端实现; 池创建时调用 `bulk_allocate`, 池及其全部租约释放后调用 `bulk_free`.
pub trait SurfaceAllocator: Send + Sync {
    /// 按配置一次分配 `config.capacity` 个表面
    fn bulk_allocate(&self, config: &PoolConfig) -> QiaoResult<Vec<SurfaceId>>;

    /// 归还一批表面
    fn bulk_free(&self, surfaces: &[SurfaceId]);
}

#[derive(Debug, Clone, Copy)]
enum AllocMode {
    Normal,
    Fail,
    Short(usize),
}

/// 顺序编号的软件分配器
///
/// 不接触任何硬件, 依次发放递增的表面 ID. 用于无硬件环境与测试,
/// 也可以模拟分配失败和部分分配.
pub struct SequentialAllocator {
    next: AtomicU64,
    mode: AllocMode,
    live: Mutex<BTreeSet<SurfaceId>>,
}

impl SequentialAllocator {
    /// 从 ID 1 开始发放
    pub fn new() -> Self {
        Self::with_mode(AllocMode::Normal)
    }

    /// 每次分配都失败
    pub fn failing() -> Self {
        Self::with_mode(AllocMode::Fail)
    }

    /// 每次分配都比请求少 `missing` 个
    pub fn short_by(missing: usize) -> Self {
        Self::with_mode(AllocMode::Short(missing))
    }

    fn with_mode(mode: AllocMode) -> Self {
        Self {
            next: AtomicU64::new(1),
            mode,
            live: Mutex::new(BTreeSet::new()),
        }
    }

    /// 当前尚未归还的表面
    pub fn live_surfaces(&self) -> Vec<SurfaceId> {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }
}

impl Default for SequentialAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl SurfaceAllocator for SequentialAllocator {
    fn bulk_allocate(&self, config: &PoolConfig) -> QiaoResult<Vec<SurfaceId>> {
        let count = match self.mode {
            AllocMode::Normal => config.capacity,
            AllocMode::Fail => {
                return Err(QiaoError::OutOfMemory(format!(
                    "无法分配 {} 个 {} {}x{} 表面",
                    config.capacity, config.fourcc, config.width, config.height
                )));
            }
            AllocMode::Short(missing) => config.capacity.saturating_sub(missing),
        };

        let first = self.next.fetch_add(count as u64, Ordering::Relaxed);
        let ids: Vec<SurfaceId> = (first..first + count as u64).map(SurfaceId).collect();
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(ids.iter().copied());
        debug!(
            "分配 {} 个 {} {}x{} 表面",
            ids.len(),
            config.fourcc,
            config.width,
            config.height
        );
        Ok(ids)
    }

    fn bulk_free(&self, surfaces: &[SurfaceId]) {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        for id in surfaces {
            if !live.remove(id) {
                warn!("归还未分配的表面 {}", id);
            }
        }
        debug!("归还 {} 个表面", surfaces.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_pack_and_display() {
        assert_eq!(Fourcc::NV12.value(), 0x3231_564E);
        assert_eq!(Fourcc::NV12.to_string(), "NV12");
        assert_eq!(format!("{:?}", Fourcc::P010), "Fourcc(P010)");
    }

    #[test]
    fn test_fourcc_from_string() {
        assert_eq!(Fourcc::try_from("I420".to_string()).unwrap(), Fourcc::I420);
        assert!(Fourcc::try_from("NV1".to_string()).is_err());
        assert!(Fourcc::try_from("NV\n2".to_string()).is_err());
    }

    #[test]
    fn test_pool_config_deserialize_with_defaults() {
        let config: PoolConfig =
            serde_json::from_str(r#"{ "capacity": 4, "fourcc": "P010" }"#).unwrap();
        assert_eq!(config.capacity, 4);
        assert_eq!(config.fourcc, Fourcc::P010);
        assert_eq!((config.width, config.height), (1920, 1080));

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains(r#""fourcc":"P010""#));
    }

    #[test]
    fn test_pool_config_reject_bad_fourcc() {
        let result = serde_json::from_str::<PoolConfig>(r#"{ "fourcc": "TOOLONG" }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_pool_config_validate() {
        assert!(PoolConfig::default().validate().is_ok());
        assert!(PoolConfig::new(0, 64, 64).validate().is_err());
        assert!(PoolConfig::new(2, 0, 64).validate().is_err());
    }

    #[test]
    fn test_sequential_allocator() {
        let alloc = SequentialAllocator::new();
        let config = PoolConfig::new(3, 64, 64);
        let a = alloc.bulk_allocate(&config).unwrap();
        let b = alloc.bulk_allocate(&config).unwrap();
        assert_eq!(a, vec![SurfaceId(1), SurfaceId(2), SurfaceId(3)]);
        assert_eq!(b[0], SurfaceId(4));
        assert_eq!(alloc.live_surfaces().len(), 6);

        alloc.bulk_free(&a);
        assert_eq!(alloc.live_surfaces(), b);
    }

    #[test]
    fn test_sequential_allocator_failure_modes() {
        let config = PoolConfig::new(4, 64, 64);
        assert!(matches!(
            SequentialAllocator::failing().bulk_allocate(&config),
            Err(QiaoError::OutOfMemory(_))
        ));
        assert_eq!(
            SequentialAllocator::short_by(1)
                .bulk_allocate(&config)
                .unwrap()
                .len(),
            3
        );
    }
}
