//! 设备注册表.
//!
//! 按兼容性谓词复用已经打开的设备 (渲染节点, 显示连接等). 注册表只保存弱引用,
//! 全部使用者释放设备后条目即过期, 在下一次查找时被清理.
//!
//! 注册表是显式对象, 由管线根对象持有并向下传递, 不使用进程级全局变量.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use log::debug;

use crate::QiaoResult;

/// 可登记到 [`DeviceRegistry`] 的设备
pub trait RegistryEntry: Send + Sync {
    /// 查找/创建设备时的请求描述
    type Request: ?Sized;

    /// 本设备能否满足请求
    fn is_compatible(&self, request: &Self::Request) -> bool;
}

/// 设备注册表
pub struct DeviceRegistry<D: RegistryEntry> {
    entries: Mutex<Vec<Weak<D>>>,
}

impl<D: RegistryEntry> DeviceRegistry<D> {
    /// 创建空注册表
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// 查找兼容的存活设备, 找不到时调用 `create` 创建并登记
    ///
    /// 创建过程在注册表锁内进行, 并发请求不会重复创建兼容设备.
    pub fn get_or_create<F>(&self, request: &D::Request, create: F) -> QiaoResult<Arc<D>>
    where
        F: FnOnce(&D::Request) -> QiaoResult<D>,
    {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|weak| weak.strong_count() > 0);

        let found = entries
            .iter()
            .filter_map(Weak::upgrade)
            .find(|device| device.is_compatible(request));
        if let Some(device) = found {
            return Ok(device);
        }

        let device = Arc::new(create(request)?);
        entries.push(Arc::downgrade(&device));
        debug!("注册表新建设备, 当前条目数: {}", entries.len());
        Ok(device)
    }

    /// 存活设备数量
    pub fn live_count(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

impl<D: RegistryEntry> Default for DeviceRegistry<D> {
    fn default() -> Self {
        Self::new()
    }
}
