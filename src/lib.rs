//! # Qiao (桥)
//!
//! 硬件加速编解码垫片核心: 解析压缩码流, 驱动外部硬件加速引擎完成实际解码.
//!
//! 与硬件无关的部分集中在这里:
//! - **码流读取**: 逐位读取语法元素, 透明去除防竞争字节
//! - **表面池**: 生产方与消费方共享的少量硬件图像缓冲区的生命周期管理
//! - **执行器**: 单工作线程任务队列
//! - **解码管线**: 把上述组件与硬件引擎串起来
//!
//! # 快速开始
//!
//! ```rust
//! use std::sync::Arc;
//! use qiao::surface::{PoolConfig, SequentialAllocator, SurfacePool};
//!
//! let pool = SurfacePool::create(PoolConfig::new(4, 1280, 720), Arc::new(SequentialAllocator::new()))
//!     .unwrap();
//! let target = pool.acquire_blocking().unwrap();
//! pool.output(&target, 0).unwrap();
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `qiao-core` | 错误类型, 比特流读写, 执行器, 设备注册表 |
//! | `qiao-codec` | 码流单元分割与语法元素读取 |
//! | `qiao-surface` | 表面池与租约 |

/// 核心类型与工具
pub use qiao_core as core;

/// 码流解析
pub use qiao_codec as codec;

/// 表面池
pub use qiao_surface as surface;

pub mod config;
pub mod logging;
pub mod pipeline;

pub use config::QiaoConfig;
pub use pipeline::{
    DecodePipeline, DecodeWorker, HardwareEngine, PictureInfo, PipelineStats, StreamFormat,
    UnitOutcome,
};

/// 获取 Qiao 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
