//! 表面租约与输出帧.

use std::fmt;

use crate::allocator::{Fourcc, SurfaceId};

type ReleaseFn = Box<dyn FnOnce(SurfaceId) + Send + 'static>;

/// 表面租约
///
/// 持有一个表面的某一阶段使用权. 租约只能移动不能复制, 析构时自动调用释放回调,
/// 把该阶段的标志位清除; 所有阶段都释放后表面回到空闲列表.
pub struct Lease {
    id: SurfaceId,
    release: Option<ReleaseFn>,
}

impl Lease {
    pub(crate) fn new(id: SurfaceId, release: impl FnOnce(SurfaceId) + Send + 'static) -> Self {
        Self {
            id,
            release: Some(Box::new(release)),
        }
    }

    /// 表面 ID
    pub fn id(&self) -> SurfaceId {
        self.id
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release(self.id);
        }
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease").field("id", &self.id).finish_non_exhaustive()
    }
}

/// 输出裁剪区域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    /// 覆盖整个表面的裁剪区域
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// 消费方取得的输出帧
///
/// 帧持有渲染租约, 丢弃帧即结束渲染阶段.
#[derive(Debug)]
pub struct OutputFrame {
    /// 渲染租约
    pub lease: Lease,
    /// 显示时间戳
    pub timestamp: i64,
    /// 有效显示区域
    pub crop: CropRect,
    /// 像素格式
    pub fourcc: Fourcc,
}

impl OutputFrame {
    /// 表面 ID
    pub fn id(&self) -> SurfaceId {
        self.lease.id()
    }
}
