//! 比特流游标.
//!
//! 从字节缓冲区中按位读取数据 (MSB first), 并在读取过程中透明地移除编码器插入的
//! 防竞争字节 (emulation prevention byte).
//!
//! 防竞争字节的识别是逐字节推进的状态机: 统计连续的 0x00 字节 (最多计到 2),
//! 计数恰为 2 时遇到 0x03 即视为填充字节并丢弃, 计数归零. 必须严格按码流顺序
//! 逐字节判定, 否则 `00 00 03 00 00 03` 这类连续序列会被误判.

use crate::{QiaoError, QiaoResult};

/// 每次预取进缓存的最大净字节数
const CACHE_BYTES: u32 = 8;

/// 防竞争字节识别规则
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmulationRule {
    /// 原始字节, 不存在防竞争字节 (VP8/VP9 帧头等)
    #[default]
    None,
    /// H.264/H.265 NAL 规则: 两个 0x00 之后的 0x03 一律为防竞争字节
    ThreeByte,
    /// VC-1 RBDU 规则: 两个 0x00 之后的 0x03, 仅当其后仍有字节且该字节 <= 0x03 时才是防竞争字节
    Rbdu,
}

/// 比特流游标
///
/// 读取失败 (数据不足) 时游标状态保持不变, 调用方可以据此丢弃当前码流单元.
///
/// # 示例
/// ```
/// use qiao_core::bitreader::{BitCursor, EmulationRule};
///
/// let data = [0x00, 0x00, 0x03, 0x01, 0xA5];
/// let mut bc = BitCursor::with_rule(&data, EmulationRule::ThreeByte);
/// assert_eq!(bc.read_bits(24).unwrap(), 0x000001);
/// assert_eq!(bc.read_bits(8).unwrap(), 0xA5);
/// assert_eq!(bc.position(), 32);
/// ```
#[derive(Debug, Clone)]
pub struct BitCursor<'a> {
    /// 源数据 (含防竞争字节)
    data: &'a [u8],
    /// 当前生效的防竞争字节规则
    rule: EmulationRule,
    /// 下一个待装入缓存的源字节索引
    load_pos: usize,
    /// 已去除防竞争字节的预取位, 低 `bits_in_cache` 位有效
    cache: u64,
    /// 缓存中剩余的有效位数
    bits_in_cache: u32,
    /// 连续 0x00 字节计数 (饱和于 2)
    zero_run: u8,
    /// 已消费的真实数据位数
    bits_consumed: usize,
}

impl<'a> BitCursor<'a> {
    /// 创建不识别防竞争字节的游标
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_rule(data, EmulationRule::None)
    }

    /// 以指定规则创建游标
    pub fn with_rule(data: &'a [u8], rule: EmulationRule) -> Self {
        Self {
            data,
            rule,
            load_pos: 0,
            cache: 0,
            bits_in_cache: 0,
            zero_run: 0,
            bits_consumed: 0,
        }
    }

    /// 当前生效的防竞争字节规则
    pub fn rule(&self) -> EmulationRule {
        self.rule
    }

    /// 已读取的真实数据位数 (不含防竞争字节)
    pub fn position(&self) -> usize {
        self.bits_consumed
    }

    /// 当前是否位于字节边界
    pub fn is_byte_aligned(&self) -> bool {
        self.bits_consumed % 8 == 0
    }

    /// 是否还有可读的数据位
    pub fn has_more_bits(&self) -> bool {
        if self.bits_in_cache > 0 {
            return true;
        }
        let mut probe = self.clone();
        probe.refill()
    }

    /// 读取 1 个位
    pub fn read_bit(&mut self) -> QiaoResult<u32> {
        self.read_bits(1)
    }

    /// 读取 1 个位并转换为布尔值
    pub fn read_flag(&mut self) -> QiaoResult<bool> {
        Ok(self.read_bits(1)? == 1)
    }

    /// 读取 N 个位 (最多 32 位)
    ///
    /// 按大端位序读取, 返回值的低 N 位有效. 剩余有效位不足时返回 [`QiaoError::Eof`],
    /// 且不消耗任何数据.
    pub fn read_bits(&mut self, n: u32) -> QiaoResult<u32> {
        if n == 0 {
            return Ok(0);
        }
        if n > 32 {
            return Err(QiaoError::InvalidArgument(format!(
                "read_bits: n={} 超过 32 位",
                n,
            )));
        }

        let saved = self.clone();
        match self.take_bits(n) {
            Some(value) => Ok(value),
            None => {
                *self = saved;
                Err(QiaoError::Eof)
            }
        }
    }

    /// 窥视 N 个位 (不移动位置)
    pub fn peek_bits(&self, n: u32) -> QiaoResult<u32> {
        let mut probe = self.clone();
        probe.read_bits(n)
    }

    /// 跳过 N 个位
    ///
    /// 剩余位数不足时返回 [`QiaoError::Eof`], 游标保持不变.
    pub fn skip_bits(&mut self, n: usize) -> QiaoResult<()> {
        let saved = self.clone();
        let mut remaining = n;
        while remaining > 0 {
            let chunk = remaining.min(32) as u32;
            if self.take_bits(chunk).is_none() {
                *self = saved;
                return Err(QiaoError::Eof);
            }
            remaining -= chunk as usize;
        }
        Ok(())
    }

    /// 对齐到下一个字节边界
    ///
    /// 如果当前已在字节边界, 则不做任何事.
    pub fn align_to_byte(&mut self) -> QiaoResult<()> {
        let pad = (8 - self.bits_consumed % 8) % 8;
        self.skip_bits(pad)
    }

    /// 从缓存中取出 N 个位, 缓存耗尽时按需补充
    fn take_bits(&mut self, n: u32) -> Option<u32> {
        let mut value: u64 = 0;
        let mut remaining = n;

        while remaining > 0 {
            if self.bits_in_cache == 0 && !self.refill() {
                return None;
            }
            let take = remaining.min(self.bits_in_cache);
            let shift = self.bits_in_cache - take;
            let bits = (self.cache >> shift) & low_mask(take);

            value = (value << take) | bits;
            self.bits_in_cache -= take;
            self.cache &= low_mask(self.bits_in_cache);
            remaining -= take;
        }

        self.bits_consumed += n as usize;
        Some(value as u32)
    }

    /// 向缓存装入最多 8 个净字节, 丢弃其间的防竞争字节
    ///
    /// 仅在缓存为空时调用. 返回是否装入了数据.
    fn refill(&mut self) -> bool {
        let mut cache = 0u64;
        let mut loaded = 0u32;

        while loaded < CACHE_BYTES && self.load_pos < self.data.len() {
            let index = self.load_pos;
            self.load_pos += 1;
            if self.is_emulation_byte(index) {
                continue;
            }
            cache = (cache << 8) | u64::from(self.data[index]);
            loaded += 1;
        }

        self.cache = cache;
        self.bits_in_cache = loaded * 8;
        loaded > 0
    }

    /// 推进防竞争字节状态机, 判定 `index` 处的字节是否应当丢弃
    fn is_emulation_byte(&mut self, index: usize) -> bool {
        if self.rule == EmulationRule::None {
            return false;
        }

        let value = self.data[index];
        if value == 0x03 && self.zero_run == 2 {
            let stuffing = match self.rule {
                EmulationRule::Rbdu => self.data.get(index + 1).is_some_and(|&next| next <= 0x03),
                _ => true,
            };
            if stuffing {
                self.zero_run = 0;
                return true;
            }
        }

        if value == 0x00 {
            self.zero_run = (self.zero_run + 1).min(2);
        } else {
            self.zero_run = 0;
        }
        false
    }
}

fn low_mask(n: u32) -> u64 {
    if n >= 64 { u64::MAX } else { (1u64 << n) - 1 }
}
