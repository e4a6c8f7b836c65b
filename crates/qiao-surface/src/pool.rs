//! 表面池.
//!
//! 管理一小组固定数量的硬件表面, 在生产方 (解码/编码管线) 与消费方 (显示/输出) 之间流转:
//!
//! ```text
//!   acquire_blocking ──► Lease(ACQUIRED) ──► output() ──► 输出队列 (FIFO)
//!          ▲                                                   │
//!          │                                              take_output()
//!      空闲列表 ◄── 所有标志清除 ◄── Lease 析构 ◄── OutputFrame(RENDERING)
//! ```
//!
//! 全部状态由一把互斥锁保护, 只有 `acquire_blocking` 会在条件变量上等待.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use log::{debug, error};
use qiao_core::{QiaoError, QiaoResult};

use crate::allocator::{PoolConfig, SurfaceAllocator, SurfaceId};
use crate::lease::{CropRect, Lease, OutputFrame};
use crate::state::{SurfaceState, Transition};

/// 已分配表面的记录
#[derive(Debug, Clone, Copy)]
struct SlotRecord {
    state: SurfaceState,
    timestamp: i64,
    crop: CropRect,
}

struct PoolState {
    /// 空闲表面 (FIFO)
    free: VecDeque<SurfaceId>,
    /// 已分配表面
    allocated: HashMap<SurfaceId, SlotRecord>,
    /// 输出队列, 按 output() 调用顺序
    output: VecDeque<SurfaceId>,
    /// 为 false 时获取操作立即返回 None
    waitable: bool,
    /// 每次 set_waitable(false) 加一, 阻塞中的获取据此判断等待期间是否被取消过
    cancel_generation: u64,
    /// flush 后仍有表面未归还
    draining: bool,
}

struct PoolShared {
    config: PoolConfig,
    surfaces: Vec<SurfaceId>,
    allocator: Arc<dyn SurfaceAllocator>,
    state: Mutex<PoolState>,
    /// 有表面回到空闲列表, 或池变为不可等待
    available: Condvar,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 租约析构时调用: 清除一个阶段标志
    fn recycle(&self, id: SurfaceId, flag: SurfaceState) -> QiaoResult<()> {
        let mut guard = self.lock();
        self.release_locked(&mut guard, id, flag)
    }

    /// 在持锁状态下清除标志, 状态变空时归还空闲列表
    ///
    /// 先校验再修改, 失败时簿记保持不变.
    fn release_locked(
        &self,
        state: &mut PoolState,
        id: SurfaceId,
        flag: SurfaceState,
    ) -> QiaoResult<()> {
        let Some(record) = state.allocated.get_mut(&id) else {
            error!("回收未分配的表面 {} (flag={:?})", id, flag);
            return Err(QiaoError::NotAllocated(id.0));
        };

        let next = record
            .state
            .apply(Transition::Release(flag))
            .inspect_err(|err| error!("表面 {}: {}", id, err))?;
        record.state = next;

        if next.is_free() {
            state.allocated.remove(&id);
            state.free.push_back(id);
            self.available.notify_one();

            if state.draining && state.allocated.is_empty() {
                state.draining = false;
                debug!("表面池排空完成");
            }
        }
        Ok(())
    }
}

impl Drop for PoolShared {
    fn drop(&mut self) {
        debug!("表面池销毁, 归还 {} 个表面", self.surfaces.len());
        self.allocator.bulk_free(&self.surfaces);
    }
}

/// 表面池
///
/// `SurfacePool` 是共享句柄, 克隆后可分别交给生产方与消费方线程.
/// 表面在最后一个句柄和最后一个租约都释放后才归还分配器.
///
/// # 示例
/// ```
/// use std::sync::Arc;
/// use qiao_surface::{PoolConfig, SequentialAllocator, SurfacePool};
///
/// let pool = SurfacePool::create(PoolConfig::new(2, 64, 64), Arc::new(SequentialAllocator::new())).unwrap();
/// let target = pool.acquire_blocking().unwrap();
/// pool.output(&target, 40).unwrap();
/// drop(target);
///
/// let frame = pool.take_output().unwrap();
/// assert_eq!(frame.timestamp, 40);
/// drop(frame);
/// assert_eq!(pool.free_count(), 2);
/// ```
#[derive(Clone)]
pub struct SurfacePool {
    shared: Arc<PoolShared>,
}

impl SurfacePool {
    /// 创建表面池, 一次分配 `config.capacity` 个表面
    ///
    /// 分配器返回的数量不符或出现重复 ID 时, 已分配的表面会被归还, 返回错误.
    pub fn create(config: PoolConfig, allocator: Arc<dyn SurfaceAllocator>) -> QiaoResult<Self> {
        config.validate()?;

        let surfaces = allocator.bulk_allocate(&config).inspect_err(|err| {
            error!("表面分配失败: {}", err);
        })?;

        let unique: HashSet<SurfaceId> = surfaces.iter().copied().collect();
        if surfaces.len() != config.capacity || unique.len() != surfaces.len() {
            allocator.bulk_free(&surfaces);
            error!(
                "分配器返回 {} 个表面 ({} 个不重复), 需要 {} 个",
                surfaces.len(),
                unique.len(),
                config.capacity
            );
            return Err(QiaoError::OutOfMemory(format!(
                "表面分配不完整: 需要 {}, 实际 {}",
                config.capacity,
                unique.len()
            )));
        }

        debug!(
            "表面池创建: {} x {} {}x{}",
            config.capacity, config.fourcc, config.width, config.height
        );
        let state = PoolState {
            free: surfaces.iter().copied().collect(),
            allocated: HashMap::with_capacity(surfaces.len()),
            output: VecDeque::with_capacity(surfaces.len()),
            waitable: true,
            cancel_generation: 0,
            draining: false,
        };
        Ok(Self {
            shared: Arc::new(PoolShared {
                config,
                surfaces,
                allocator,
                state: Mutex::new(state),
                available: Condvar::new(),
            }),
        })
    }

    /// 获取一个空闲表面, 没有空闲表面时阻塞等待
    ///
    /// 池不可等待 (`set_waitable(false)`) 时返回 `None`. 等待期间发生过取消同样返回 `None`,
    /// 即使取消之后池又被设回可等待.
    pub fn acquire_blocking(&self) -> Option<Lease> {
        let mut state = self.shared.lock();
        let generation = state.cancel_generation;
        let id = loop {
            if !state.waitable || state.cancel_generation != generation {
                return None;
            }
            if let Some(id) = self.take_free(&mut state) {
                break id;
            }
            debug!("无空闲表面, 等待回收");
            state = self
                .shared
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        };
        drop(state);
        Some(self.lease(id, SurfaceState::ACQUIRED))
    }

    /// 获取一个空闲表面, 不阻塞
    pub fn try_acquire(&self) -> Option<Lease> {
        let mut state = self.shared.lock();
        if !state.waitable {
            return None;
        }
        self.take_free(&mut state)
            .map(|id| self.lease(id, SurfaceState::ACQUIRED))
    }

    /// 将解码完成的表面排入输出队列, 裁剪区域为整个表面
    pub fn output(&self, lease: &Lease, timestamp: i64) -> QiaoResult<()> {
        let crop = CropRect::full(self.shared.config.width, self.shared.config.height);
        self.output_cropped(lease, timestamp, crop)
    }

    /// 将解码完成的表面排入输出队列
    ///
    /// 表面必须恰好处于 ACQUIRED 状态.
    pub fn output_cropped(&self, lease: &Lease, timestamp: i64, crop: CropRect) -> QiaoResult<()> {
        let id = lease.id();
        let mut guard = self.shared.lock();
        let state = &mut *guard;

        let Some(record) = state.allocated.get_mut(&id) else {
            error!("输出未分配的表面 {}", id);
            return Err(QiaoError::NotAllocated(id.0));
        };
        let next = record
            .state
            .apply(Transition::QueueOutput)
            .inspect_err(|err| error!("表面 {}: {}", id, err))?;

        record.state = next;
        record.timestamp = timestamp;
        record.crop = crop;
        state.output.push_back(id);
        Ok(())
    }

    /// 取出最早排队的输出帧, 不阻塞
    pub fn take_output(&self) -> Option<OutputFrame> {
        let mut guard = self.shared.lock();
        let state = &mut *guard;

        while let Some(id) = state.output.pop_front() {
            let Some(record) = state.allocated.get_mut(&id) else {
                error!("输出队列中的表面 {} 未被分配", id);
                continue;
            };
            match record.state.apply(Transition::BeginRender) {
                Ok(next) => {
                    record.state = next;
                    let (timestamp, crop) = (record.timestamp, record.crop);
                    return Some(OutputFrame {
                        lease: self.lease(id, SurfaceState::RENDERING),
                        timestamp,
                        crop,
                        fourcc: self.shared.config.fourcc,
                    });
                }
                Err(err) => error!("表面 {}: {}", id, err),
            }
        }
        None
    }

    /// 设置池是否可等待
    ///
    /// 设为 false 时唤醒所有阻塞的获取操作, 它们以及之后的获取都返回 `None`.
    pub fn set_waitable(&self, waitable: bool) {
        let mut state = self.shared.lock();
        state.waitable = waitable;
        debug!("表面池 waitable={}", waitable);
        if !waitable {
            state.cancel_generation += 1;
            self.shared.available.notify_all();
        }
    }

    /// 清空输出队列
    ///
    /// 队列中每个表面释放 QUEUED_FOR_OUTPUT 阶段. 之后仍有表面被占用时进入排空状态,
    /// 最后一个表面归还后自动退出. flush 不是取消, 不影响阻塞中的获取.
    pub fn flush(&self) {
        let mut guard = self.shared.lock();
        let state = &mut *guard;

        let queued: Vec<SurfaceId> = state.output.drain(..).collect();
        for id in &queued {
            // 失败已记录日志, 继续处理剩余表面
            let _ = self
                .shared
                .release_locked(state, *id, SurfaceState::QUEUED_FOR_OUTPUT);
        }

        if !state.allocated.is_empty() {
            state.draining = true;
        }
        debug!(
            "表面池 flush: 丢弃 {} 个输出, 仍占用 {} 个",
            queued.len(),
            state.allocated.len()
        );
    }

    /// 池配置
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// 表面总数
    pub fn capacity(&self) -> usize {
        self.shared.surfaces.len()
    }

    /// 全部表面 ID (分配顺序)
    pub fn surface_ids(&self) -> &[SurfaceId] {
        &self.shared.surfaces
    }

    /// 空闲表面数
    pub fn free_count(&self) -> usize {
        self.shared.lock().free.len()
    }

    /// 已分配 (至少一个阶段占用) 的表面数
    pub fn allocated_count(&self) -> usize {
        self.shared.lock().allocated.len()
    }

    /// 输出队列长度
    pub fn pending_output(&self) -> usize {
        self.shared.lock().output.len()
    }

    /// 查询表面状态; 空闲表面返回空集, 不属于本池的 ID 返回 `None`
    pub fn state_of(&self, id: SurfaceId) -> Option<SurfaceState> {
        let state = self.shared.lock();
        match state.allocated.get(&id) {
            Some(record) => Some(record.state),
            None if state.free.contains(&id) => Some(SurfaceState::empty()),
            None => None,
        }
    }

    /// 是否处于排空状态
    pub fn is_draining(&self) -> bool {
        self.shared.lock().draining
    }

    /// 是否可等待
    pub fn is_waitable(&self) -> bool {
        self.shared.lock().waitable
    }

    /// 从空闲列表头部取出表面并登记为 ACQUIRED
    fn take_free(&self, state: &mut PoolState) -> Option<SurfaceId> {
        let id = *state.free.front()?;
        let acquired = match SurfaceState::empty().apply(Transition::Acquire) {
            Ok(acquired) => acquired,
            Err(err) => {
                error!("表面 {}: {}", id, err);
                return None;
            }
        };
        state.free.pop_front();
        state.allocated.insert(
            id,
            SlotRecord {
                state: acquired,
                timestamp: 0,
                crop: CropRect::full(self.shared.config.width, self.shared.config.height),
            },
        );
        Some(id)
    }

    fn lease(&self, id: SurfaceId, flag: SurfaceState) -> Lease {
        let shared = Arc::clone(&self.shared);
        Lease::new(id, move |id| {
            // 失败已在 release_locked 中记录
            let _ = shared.recycle(id, flag);
        })
    }
}
