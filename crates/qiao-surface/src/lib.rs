//! # qiao-surface
//!
//! Qiao 硬件编解码垫片表面 (surface) 池.
//!
//! 管理生产方与消费方之间共享的少量硬件图像缓冲区:
//! - 阻塞获取, 可全局取消 (`set_waitable(false)`)
//! - 多阶段状态跟踪, 所有阶段释放前表面不会被复用
//! - FIFO 输出队列与 flush/排空语义
//! - 租约 ([`Lease`]) 析构时自动回收

pub mod allocator;
pub mod lease;
pub mod pool;
pub mod state;

// 重导出常用类型
pub use allocator::{Fourcc, PoolConfig, SequentialAllocator, SurfaceAllocator, SurfaceId};
pub use lease::{CropRect, Lease, OutputFrame};
pub use pool::SurfacePool;
pub use state::{SurfaceState, Transition};
