//! 解码管线.
//!
//! 把码流读取, 硬件引擎与表面池串起来. 对每个码流单元:
//!
//! 1. 用 [`NalReader`] 交给引擎解析, 损坏的单元记数后跳过
//! 2. 从表面池取得目标表面租约 (可能阻塞)
//! 3. 引擎在目标表面上提交解码
//! 4. 表面排入输出队列, 释放解码租约
//!
//! [`DecodeWorker`] 在单独的执行器线程上运行管线, 生产方线程只负责投递码流.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use qiao_codec::parsers::{split_annex_b, split_length_prefixed};
use qiao_codec::{CodecUnit, NalReader};
use qiao_core::{EmulationRule, Executor, QiaoResult};
use qiao_surface::{CropRect, SurfaceId, SurfacePool};
use tracing::{debug, error, warn};

/// 引擎解析出的待解码图像
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PictureInfo {
    /// 显示时间戳
    pub timestamp: i64,
    /// 有效显示区域; `None` 表示整个表面
    pub crop: Option<CropRect>,
}

/// 硬件加速引擎
///
/// 负责字段语义与参数缓冲区映射, 管线只负责调度.
pub trait HardwareEngine: Send + 'static {
    /// 解析一个码流单元, 返回需要解码的图像; 参数集等不产生图像的单元返回 `None`
    fn parse_unit(&mut self, reader: &mut NalReader<'_>) -> QiaoResult<Option<PictureInfo>>;

    /// 在目标表面上提交解码
    fn submit(
        &mut self,
        unit: &CodecUnit,
        picture: &PictureInfo,
        target: SurfaceId,
    ) -> QiaoResult<()>;
}

/// 码流封装格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    /// 起始码分隔
    AnnexB,
    /// 长度前缀, 参数为长度字段字节数 (1-4)
    LengthPrefixed(usize),
}

/// 单个码流单元的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    /// 已解码并排入输出队列
    Decoded(SurfaceId),
    /// 单元不产生图像
    NoPicture,
    /// 单元损坏, 已跳过
    Skipped,
    /// 表面池已取消等待
    Cancelled,
}

/// 管线统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// 已解码图像数
    pub decoded: u64,
    /// 不产生图像的单元数
    pub no_picture: u64,
    /// 跳过的损坏单元数
    pub skipped: u64,
    /// 因取消而未解码的单元数
    pub cancelled: u64,
}

/// 管线计数器, 解码线程更新, 其他线程随时读取
#[derive(Debug, Default)]
struct StatsCounters {
    decoded: AtomicU64,
    no_picture: AtomicU64,
    skipped: AtomicU64,
    cancelled: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            decoded: self.decoded.load(Ordering::Relaxed),
            no_picture: self.no_picture.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

/// 解码管线
pub struct DecodePipeline<E: HardwareEngine> {
    engine: E,
    pool: SurfacePool,
    rule: EmulationRule,
    stats: Arc<StatsCounters>,
}

impl<E: HardwareEngine> DecodePipeline<E> {
    /// 创建管线, 使用 H.264/H.265 防竞争规则
    pub fn new(engine: E, pool: SurfacePool) -> Self {
        Self::with_rule(engine, pool, EmulationRule::ThreeByte)
    }

    /// 创建管线, 指定码流单元的防竞争规则
    pub fn with_rule(engine: E, pool: SurfacePool, rule: EmulationRule) -> Self {
        Self {
            engine,
            pool,
            rule,
            stats: Arc::new(StatsCounters::default()),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn pool(&self) -> &SurfacePool {
        &self.pool
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.snapshot()
    }

    /// 处理一个码流单元
    ///
    /// 码流损坏 (截断, 非法语法) 不是错误, 记为 [`UnitOutcome::Skipped`];
    /// 其余错误 (池使用错误, 引擎内部错误) 向上返回.
    pub fn decode_unit(&mut self, unit: &CodecUnit) -> QiaoResult<UnitOutcome> {
        let mut reader = unit.reader_with_rule(self.rule);
        let picture = match self.engine.parse_unit(&mut reader) {
            Ok(Some(picture)) => picture,
            Ok(None) => {
                StatsCounters::bump(&self.stats.no_picture);
                return Ok(UnitOutcome::NoPicture);
            }
            Err(err) if err.is_stream_error() => {
                warn!("跳过损坏的码流单元, offset={}, len={}: {}", unit.offset, unit.len(), err);
                StatsCounters::bump(&self.stats.skipped);
                return Ok(UnitOutcome::Skipped);
            }
            Err(err) => return Err(err),
        };

        let Some(target) = self.pool.acquire_blocking() else {
            debug!("表面池已取消, 放弃 offset={} 的单元", unit.offset);
            StatsCounters::bump(&self.stats.cancelled);
            return Ok(UnitOutcome::Cancelled);
        };

        match self.engine.submit(unit, &picture, target.id()) {
            Ok(()) => {}
            Err(err) if err.is_stream_error() => {
                warn!("引擎拒绝码流单元, offset={}: {}", unit.offset, err);
                StatsCounters::bump(&self.stats.skipped);
                return Ok(UnitOutcome::Skipped);
            }
            Err(err) => return Err(err),
        }

        match picture.crop {
            Some(crop) => self.pool.output_cropped(&target, picture.timestamp, crop)?,
            None => self.pool.output(&target, picture.timestamp)?,
        }
        StatsCounters::bump(&self.stats.decoded);
        Ok(UnitOutcome::Decoded(target.id()))
    }

    /// 分割并处理一段码流
    ///
    /// 遇到取消时立即停止, 剩余单元不再处理.
    pub fn decode_stream(&mut self, data: &Bytes, format: StreamFormat) -> QiaoResult<()> {
        let units = match format {
            StreamFormat::AnnexB => split_annex_b(data),
            StreamFormat::LengthPrefixed(length_size) => {
                match split_length_prefixed(data, length_size) {
                    Ok(units) => units,
                    Err(err) if err.is_stream_error() => {
                        warn!("跳过损坏的长度前缀数据, len={}: {}", data.len(), err);
                        StatsCounters::bump(&self.stats.skipped);
                        return Ok(());
                    }
                    Err(err) => return Err(err),
                }
            }
        };

        for unit in &units {
            if self.decode_unit(unit)? == UnitOutcome::Cancelled {
                break;
            }
        }
        Ok(())
    }
}

/// 在执行器线程上运行的解码管线
pub struct DecodeWorker<E: HardwareEngine> {
    executor: Executor,
    pipeline: Arc<Mutex<DecodePipeline<E>>>,
    pool: SurfacePool,
    stats: Arc<StatsCounters>,
}

impl<E: HardwareEngine> DecodeWorker<E> {
    /// 启动工作线程
    pub fn start(name: &str, pipeline: DecodePipeline<E>) -> QiaoResult<Self> {
        let pool = pipeline.pool().clone();
        let stats = Arc::clone(&pipeline.stats);
        Ok(Self {
            executor: Executor::spawn(name)?,
            pipeline: Arc::new(Mutex::new(pipeline)),
            pool,
            stats,
        })
    }

    /// 输出端使用的表面池
    pub fn pool(&self) -> &SurfacePool {
        &self.pool
    }

    /// 投递一段码流, 立即返回
    pub fn post_stream(&self, data: Bytes, format: StreamFormat) -> QiaoResult<()> {
        let pipeline = Arc::clone(&self.pipeline);
        self.executor.post(move || {
            if let Err(err) = lock(&pipeline).decode_stream(&data, format) {
                error!("解码码流失败: {}", err);
            }
        })
    }

    /// 等待之前投递的码流全部处理完毕, 返回统计
    pub fn sync(&self) -> QiaoResult<PipelineStats> {
        let pipeline = Arc::clone(&self.pipeline);
        self.executor.send(move || lock(&pipeline).stats())
    }

    /// 在之前投递的码流处理完后清空输出队列
    pub fn flush(&self) -> QiaoResult<()> {
        let pool = self.pool.clone();
        self.executor.send(move || pool.flush())
    }

    /// 当前统计 (不等待队列)
    ///
    /// 不获取管线锁, 工作线程阻塞在获取表面上时也立即返回.
    pub fn stats(&self) -> PipelineStats {
        self.stats.snapshot()
    }

    /// 取消并停止
    ///
    /// 先让表面池不可等待, 阻塞在获取表面上的解码任务随即返回, 再等待工作线程退出.
    pub fn stop(&self) {
        self.pool.set_waitable(false);
        self.executor.stop();
    }
}

impl<E: HardwareEngine> Drop for DecodeWorker<E> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<E: HardwareEngine>(
    pipeline: &Mutex<DecodePipeline<E>>,
) -> MutexGuard<'_, DecodePipeline<E>> {
    pipeline.lock().unwrap_or_else(PoisonError::into_inner)
}
