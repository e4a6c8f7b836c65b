//! 统一错误类型定义.
//!
//! 所有 Qiao crate 共用的错误类型, 支持跨模块传播.

use thiserror::Error;

/// Qiao 统一错误类型
#[derive(Debug, Error)]
pub enum QiaoError {
    /// 无效参数
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 无效数据 (损坏的码流等)
    #[error("无效数据: {0}")]
    InvalidData(String),

    /// 已到达当前码流单元末尾
    #[error("已到达流末尾")]
    Eof,

    /// 表面分配失败
    #[error("内存分配失败: {0}")]
    OutOfMemory(String),

    /// 表面未处于已分配状态 (重复释放或释放未知表面)
    #[error("表面 0x{0:x} 未被分配")]
    NotAllocated(u64),

    /// 非法的状态迁移
    #[error("非法状态: {0}")]
    InvalidState(String),

    /// 执行器已停止或未启动
    #[error("执行器不可用: {0}")]
    ExecutorStopped(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 内部错误 (不应发生)
    #[error("内部错误: {0}")]
    Internal(String),
}

impl QiaoError {
    /// 是否为可恢复的码流错误
    ///
    /// 码流单元读取失败时, 调用方应丢弃该单元并继续处理下一个.
    pub fn is_stream_error(&self) -> bool {
        matches!(self, Self::Eof | Self::InvalidData(_))
    }
}

/// Qiao 统一 Result 类型
pub type QiaoResult<T> = Result<T, QiaoError>;
