//! 表面状态与状态转换.
//!
//! 表面状态是一组标志位, 空集表示空闲 (FREE). 每个标志对应一个仍在使用该表面的阶段,
//! 所有阶段都释放后表面才会回到空闲列表.
//!
//! ```text
//! FREE → ACQUIRED → ACQUIRED|QUEUED_FOR_OUTPUT → (清除 QUEUED, 置 RENDERING) → FREE
//! ```
//!
//! 任何修改都先经过 [`SurfaceState::apply`] 校验, 非法转换返回错误且不改变状态.

use bitflags::bitflags;
use qiao_core::{QiaoError, QiaoResult};

bitflags! {
    /// 表面状态标志位
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SurfaceState: u8 {
        /// 已被生产方取得, 作为解码/编码目标
        const ACQUIRED          = 1 << 0;
        /// 已排入输出队列, 等待消费方取走
        const QUEUED_FOR_OUTPUT = 1 << 1;
        /// 消费方正在使用 (显示/拷贝/下载)
        const RENDERING         = 1 << 2;
    }
}

/// 状态转换
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// 从空闲列表取出
    Acquire,
    /// 排入输出队列
    QueueOutput,
    /// 消费方取走输出
    BeginRender,
    /// 某个阶段释放, 清除对应标志
    Release(SurfaceState),
}

impl SurfaceState {
    /// 是否空闲
    pub fn is_free(self) -> bool {
        self.is_empty()
    }

    /// 校验并应用状态转换, 返回新状态
    pub fn apply(self, transition: Transition) -> QiaoResult<Self> {
        let next = match transition {
            Transition::Acquire if self.is_empty() => Some(Self::ACQUIRED),
            Transition::QueueOutput if self == Self::ACQUIRED => {
                Some(Self::ACQUIRED | Self::QUEUED_FOR_OUTPUT)
            }
            Transition::BeginRender
                if self.contains(Self::QUEUED_FOR_OUTPUT) && !self.contains(Self::RENDERING) =>
            {
                Some((self - Self::QUEUED_FOR_OUTPUT) | Self::RENDERING)
            }
            Transition::Release(flag)
                if flag.bits().count_ones() == 1 && self.contains(flag) =>
            {
                Some(self - flag)
            }
            _ => None,
        };

        next.ok_or_else(|| {
            QiaoError::InvalidState(format!("非法的表面状态转换: {:?} -> {:?}", self, transition))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_lifecycle() {
        let s = SurfaceState::empty();
        assert!(s.is_free());
        let s = s.apply(Transition::Acquire).unwrap();
        assert_eq!(s, SurfaceState::ACQUIRED);
        let s = s.apply(Transition::QueueOutput).unwrap();
        assert_eq!(s, SurfaceState::ACQUIRED | SurfaceState::QUEUED_FOR_OUTPUT);
        let s = s.apply(Transition::Release(SurfaceState::ACQUIRED)).unwrap();
        assert_eq!(s, SurfaceState::QUEUED_FOR_OUTPUT);
        let s = s.apply(Transition::BeginRender).unwrap();
        assert_eq!(s, SurfaceState::RENDERING);
        let s = s.apply(Transition::Release(SurfaceState::RENDERING)).unwrap();
        assert!(s.is_free());
    }

    #[test]
    fn test_render_before_decode_release() {
        let s = SurfaceState::ACQUIRED | SurfaceState::QUEUED_FOR_OUTPUT;
        let s = s.apply(Transition::BeginRender).unwrap();
        assert_eq!(s, SurfaceState::ACQUIRED | SurfaceState::RENDERING);
        let s = s.apply(Transition::Release(SurfaceState::RENDERING)).unwrap();
        assert_eq!(s, SurfaceState::ACQUIRED);
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(SurfaceState::ACQUIRED.apply(Transition::Acquire).is_err());
        assert!(SurfaceState::empty().apply(Transition::QueueOutput).is_err());
        assert!(SurfaceState::RENDERING.apply(Transition::QueueOutput).is_err());
        assert!(
            (SurfaceState::ACQUIRED | SurfaceState::QUEUED_FOR_OUTPUT)
                .apply(Transition::QueueOutput)
                .is_err()
        );
        assert!(SurfaceState::ACQUIRED.apply(Transition::BeginRender).is_err());
        assert!(
            SurfaceState::ACQUIRED
                .apply(Transition::Release(SurfaceState::RENDERING))
                .is_err()
        );
        assert!(
            SurfaceState::empty()
                .apply(Transition::Release(SurfaceState::ACQUIRED))
                .is_err()
        );
    }

    #[test]
    fn test_release_requires_single_flag() {
        let s = SurfaceState::ACQUIRED | SurfaceState::QUEUED_FOR_OUTPUT;
        assert!(s.apply(Transition::Release(s)).is_err());
        assert!(s.apply(Transition::Release(SurfaceState::empty())).is_err());
    }
}
