//! # qiao-codec
//!
//! Qiao 硬件编解码垫片码流解析库.
//!
//! 负责把压缩码流切成码流单元, 并在单元内读取语法元素. 字段的编解码器语义以及
//! 向硬件参数缓冲区的映射由硬件引擎实现, 不在本 crate 范围内.
//!
//! ## 使用示例
//!
//! ```rust
//! use bytes::Bytes;
//! use qiao_codec::parsers::split_annex_b;
//!
//! let stream = Bytes::from_static(&[0x00, 0x00, 0x01, 0x67, 0x80, 0x00, 0x00, 0x01, 0x68, 0xC0]);
//! let units = split_annex_b(&stream);
//! assert_eq!(units.len(), 2);
//!
//! let mut reader = units[0].reader();
//! assert_eq!(reader.read_bits(8).unwrap(), 0x67);
//! reader.rbsp_trailing_bits().unwrap();
//! ```

pub mod parsers;

// 重导出常用类型
pub use parsers::{CodecUnit, NalReader};
