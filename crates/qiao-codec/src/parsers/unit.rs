//! 码流单元分割与格式转换.
//!
//! # Annex B 格式
//!
//! 使用起始码 (start code) 分隔码流单元:
//! - 3 字节起始码: `00 00 01`
//! - 4 字节起始码: `00 00 00 01`
//!
//! # 长度前缀格式
//!
//! 每个单元前是 1-4 字节的大端长度字段 (MP4/MKV 中常见的 4 字节):
//! ```text
//! [length: N bytes BE] [unit data: length bytes]
//! ```
//!
//! 分割只负责切出字节范围, 不解释单元头部, 也不赋予编解码器语义.

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use log::debug;
use qiao_core::{BitCursor, EmulationRule, QiaoError, QiaoResult};

use super::reader::NalReader;

/// 分割出的码流单元 (不含起始码或长度前缀)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecUnit {
    /// 单元数据, 与输入缓冲区共享内存
    pub data: Bytes,
    /// 单元在输入缓冲区中的字节偏移
    pub offset: usize,
}

impl CodecUnit {
    /// 单元字节数
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 以 H.264/H.265 规则创建该单元的语法读取器
    pub fn reader(&self) -> NalReader<'_> {
        NalReader::new(&self.data)
    }

    /// 以指定防竞争规则创建该单元的语法读取器
    pub fn reader_with_rule(&self, rule: EmulationRule) -> NalReader<'_> {
        NalReader::with_rule(&self.data, rule)
    }
}

/// 从 Annex B 字节流中分割出所有码流单元
///
/// 支持 3 字节与 4 字节起始码, 两种可以混用. 每个单元尾部的 0 字节 (trailing_zero_8bits)
/// 会被去掉, 去掉后为空的单元被忽略. 第一个起始码之前的数据被丢弃.
pub fn split_annex_b(data: &Bytes) -> Vec<CodecUnit> {
    let offsets = find_start_codes(data);
    let leading = offsets.first().copied().unwrap_or(data.len());
    if leading > 0 {
        debug!("Annex B: 丢弃首个起始码之前的 {} 字节", leading);
    }
    let mut units = Vec::with_capacity(offsets.len());

    for (i, &start) in offsets.iter().enumerate() {
        let end = offsets.get(i + 1).copied().unwrap_or(data.len());

        let unit_start = start + start_code_len(&data[start..]);
        if unit_start >= end {
            continue;
        }

        let mut unit_end = end;
        while unit_end > unit_start && data[unit_end - 1] == 0x00 {
            unit_end -= 1;
        }

        if unit_end > unit_start {
            units.push(CodecUnit {
                data: data.slice(unit_start..unit_end),
                offset: unit_start,
            });
        }
    }

    units
}

/// 从长度前缀数据中提取码流单元
///
/// `length_size` 取 1-4 (来自容器配置记录, 如 avcC 的 lengthSizeMinusOne + 1).
/// 长度为 0 的单元被忽略; 声明长度超出剩余数据时返回错误.
pub fn split_length_prefixed(data: &Bytes, length_size: usize) -> QiaoResult<Vec<CodecUnit>> {
    check_length_size(length_size)?;

    let mut units = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        if pos + length_size > data.len() {
            return Err(QiaoError::InvalidData(format!(
                "长度字段截断, offset={}, remain={}",
                pos,
                data.len() - pos
            )));
        }
        let unit_len = BigEndian::read_uint(&data[pos..pos + length_size], length_size) as usize;
        pos += length_size;

        if unit_len > data.len() - pos {
            return Err(QiaoError::InvalidData(format!(
                "单元数据截断, offset={}, declared_len={}, remain={}",
                pos,
                unit_len,
                data.len() - pos
            )));
        }

        if unit_len > 0 {
            units.push(CodecUnit {
                data: data.slice(pos..pos + unit_len),
                offset: pos,
            });
        }
        pos += unit_len;
    }

    Ok(units)
}

/// 将 Annex B 格式转换为长度前缀格式
pub fn annex_b_to_length_prefixed(data: &Bytes, length_size: usize) -> QiaoResult<Vec<u8>> {
    check_length_size(length_size)?;
    let max_len = (1u64 << (8 * length_size)) - 1;

    let units = split_annex_b(data);
    let mut out = Vec::with_capacity(data.len() + units.len() * length_size);
    let mut prefix = [0u8; 4];

    for unit in &units {
        let len = unit.len() as u64;
        if len > max_len {
            return Err(QiaoError::InvalidData(format!(
                "单元过长, 无法用 {} 字节表示长度: len={}",
                length_size, len
            )));
        }
        BigEndian::write_uint(&mut prefix[..length_size], len, length_size);
        out.extend_from_slice(&prefix[..length_size]);
        out.extend_from_slice(&unit.data);
    }

    Ok(out)
}

/// 将长度前缀格式转换为 Annex B 格式 (4 字节起始码)
pub fn length_prefixed_to_annex_b(data: &Bytes, length_size: usize) -> QiaoResult<Vec<u8>> {
    let units = split_length_prefixed(data, length_size)?;
    let mut out = Vec::with_capacity(data.len() + units.len() * 4);

    for unit in &units {
        out.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
        out.extend_from_slice(&unit.data);
    }

    Ok(out)
}

/// 跳过开头的起始码 (若有)
pub fn skip_start_code(data: &[u8]) -> &[u8] {
    &data[start_code_len(data)..]
}

/// 向 RBSP 中插入防竞争字节
///
/// 连续两个 0x00 之后若下一字节 <= 0x03, 插入 0x03; 负载以两个 0x00 结尾时也追加 0x03.
pub fn add_emulation_prevention(rbsp: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rbsp.len() + rbsp.len() / 64 + 1);
    let mut zero_run = 0;

    for &byte in rbsp {
        if zero_run == 2 && byte <= 0x03 {
            out.push(0x03);
            zero_run = 0;
        }
        out.push(byte);
        if byte == 0x00 {
            zero_run += 1;
        } else {
            zero_run = 0;
        }
    }

    if zero_run == 2 {
        out.push(0x03);
    }
    out
}

/// 按指定规则移除防竞争字节, 返回净数据
///
/// 与 [`BitCursor`] 使用同一个状态机, 结果与逐位读取看到的数据完全一致.
pub fn strip_emulation_prevention(data: &[u8], rule: EmulationRule) -> Vec<u8> {
    let mut cursor = BitCursor::with_rule(data, rule);
    let mut out = Vec::with_capacity(data.len());
    while let Ok(byte) = cursor.read_bits(8) {
        out.push(byte as u8);
    }
    out
}

fn check_length_size(length_size: usize) -> QiaoResult<()> {
    if (1..=4).contains(&length_size) {
        Ok(())
    } else {
        Err(QiaoError::InvalidArgument(format!(
            "长度前缀字节数非法: {}",
            length_size
        )))
    }
}

/// 查找所有起始码的位置
fn find_start_codes(data: &[u8]) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut i = 0;

    while i + 2 < data.len() {
        if data[i] == 0x00 && data[i + 1] == 0x00 {
            if data[i + 2] == 0x01 {
                positions.push(i);
                i += 3;
                continue;
            } else if i + 3 < data.len() && data[i + 2] == 0x00 && data[i + 3] == 0x01 {
                positions.push(i);
                i += 4;
                continue;
            }
        }
        i += 1;
    }

    positions
}

/// 开头起始码的长度 (0, 3 或 4)
fn start_code_len(data: &[u8]) -> usize {
    if data.starts_with(&[0x00, 0x00, 0x00, 0x01]) {
        4
    } else if data.starts_with(&[0x00, 0x00, 0x01]) {
        3
    } else {
        0
    }
}
