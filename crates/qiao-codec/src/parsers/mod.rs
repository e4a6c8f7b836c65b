//! 码流解析器.
//!
//! 提供与具体编解码器无关的码流处理能力:
//! - Annex B / 长度前缀格式的单元分割与互相转换
//! - 防竞争字节的插入与移除
//! - 单元内语法元素读取 (定长字段, Exp-Golomb, RBSP 尾部)

pub mod reader;
pub mod unit;

pub use reader::NalReader;
pub use unit::{
    CodecUnit, add_emulation_prevention, annex_b_to_length_prefixed, length_prefixed_to_annex_b,
    skip_start_code, split_annex_b, split_length_prefixed, strip_emulation_prevention,
};
