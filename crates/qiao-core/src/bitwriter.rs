//! 比特流写入器.
//!
//! 向字节缓冲区按位写入数据 (MSB first), 与 [`BitCursor`](crate::bitreader::BitCursor) 对应.
//! 编码端用它生成参数集与切片头等语法元素, 写出的是去除防竞争字节之前的 RBSP.

/// 比特流写入器
///
/// # 示例
/// ```
/// use qiao_core::bitwriter::BitWriter;
///
/// let mut bw = BitWriter::new();
/// bw.write_bits(0b1011, 4);
/// bw.write_ue(0); // 单个 1 位
/// bw.write_bits(0b001, 3);
/// assert_eq!(bw.finish(), vec![0b10111001]);
/// ```
pub struct BitWriter {
    /// 输出缓冲区
    data: Vec<u8>,
    /// 当前字节 (正在填充)
    current_byte: u8,
    /// 当前字节中已填充的位数 (0-7)
    bit_count: u8,
}

impl BitWriter {
    /// 创建新的比特流写入器
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// 以指定容量创建比特流写入器
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            current_byte: 0,
            bit_count: 0,
        }
    }

    /// 获取已写入的总位数
    pub fn bits_written(&self) -> usize {
        self.data.len() * 8 + self.bit_count as usize
    }

    /// 当前是否位于字节边界
    pub fn is_byte_aligned(&self) -> bool {
        self.bit_count == 0
    }

    /// 写入 1 个位
    pub fn write_bit(&mut self, bit: u32) {
        self.current_byte = (self.current_byte << 1) | (bit & 1) as u8;
        self.bit_count += 1;
        if self.bit_count >= 8 {
            self.data.push(self.current_byte);
            self.current_byte = 0;
            self.bit_count = 0;
        }
    }

    /// 写入布尔标志位
    pub fn write_flag(&mut self, flag: bool) {
        self.write_bit(u32::from(flag));
    }

    /// 写入 N 个位 (最多 32 位)
    ///
    /// 值的低 N 位被写入, 高位在前 (大端).
    pub fn write_bits(&mut self, value: u32, n: u32) {
        debug_assert!(n <= 32, "write_bits: n={} 超过 32 位", n);

        let mut remaining = n;
        while remaining > 0 {
            let available = 8 - self.bit_count as u32;
            let to_write = remaining.min(available);

            let shift = remaining - to_write;
            let mask = (1u32 << to_write) - 1;
            let bits = ((value >> shift) & mask) as u8;

            if to_write >= 8 {
                // 整字节写入 (bit_count 必定为 0)
                self.current_byte = bits;
            } else {
                self.current_byte = (self.current_byte << to_write) | bits;
            }
            self.bit_count += to_write as u8;

            if self.bit_count >= 8 {
                self.data.push(self.current_byte);
                self.current_byte = 0;
                self.bit_count = 0;
            }

            remaining -= to_write;
        }
    }

    /// 写入无符号 Exp-Golomb 编码值 ue(v)
    ///
    /// `value + 1` 的有效位数为 `k + 1`, 先写 `k` 个 0, 再写 `value + 1` 本身.
    pub fn write_ue(&mut self, value: u32) {
        let code = u64::from(value) + 1;
        let len = 64 - code.leading_zeros();
        let leading_zeros = len - 1;
        for _ in 0..leading_zeros {
            self.write_bit(0);
        }
        // code 最多 33 位, 拆成最高位与低 32 位
        if len > 32 {
            self.write_bit(1);
            self.write_bits(code as u32, 32);
        } else {
            self.write_bits(code as u32, len);
        }
    }

    /// 写入有符号 Exp-Golomb 编码值 se(v)
    ///
    /// 映射: 0→0, 1→1, -1→2, 2→3, -2→4, ...
    pub fn write_se(&mut self, value: i32) {
        let magnitude = u64::from(value.unsigned_abs());
        let code = if value > 0 {
            magnitude * 2 - 1
        } else {
            magnitude * 2
        };
        debug_assert!(code <= u64::from(u32::MAX - 1), "write_se: value={} 超出范围", value);
        self.write_ue(code as u32);
    }

    /// 写入 rbsp_trailing_bits: 1 个停止位, 再用 0 填充到字节边界
    pub fn write_trailing_bits(&mut self) {
        self.write_bit(1);
        self.align_to_byte();
    }

    /// 对齐到字节边界 (用 0 填充)
    pub fn align_to_byte(&mut self) {
        if self.bit_count > 0 {
            let pad = 8 - self.bit_count;
            self.current_byte <<= pad;
            self.data.push(self.current_byte);
            self.current_byte = 0;
            self.bit_count = 0;
        }
    }

    /// 写入完整字节
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        if self.bit_count == 0 {
            // 快速路径: 已对齐
            self.data.extend_from_slice(bytes);
        } else {
            for &b in bytes {
                self.write_bits(u32::from(b), 8);
            }
        }
    }

    /// 完成写入, 返回字节数据
    ///
    /// 如果当前不在字节边界, 自动用 0 填充.
    pub fn finish(mut self) -> Vec<u8> {
        self.align_to_byte();
        self.data
    }
}

impl Default for BitWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitreader::BitCursor;

    #[test]
    fn test_write_bits_cross_byte() {
        let mut bw = BitWriter::new();
        bw.write_bits(0b101, 3);
        bw.write_bits(0b11001100, 8);
        bw.write_bits(0b10101, 5);
        assert_eq!(bw.finish(), vec![0b10111001, 0b10010101]);
    }

    #[test]
    fn test_write_bits_32_bit() {
        let mut bw = BitWriter::new();
        bw.write_bits(0xFF00FF00, 32);
        assert_eq!(bw.finish(), vec![0xFF, 0x00, 0xFF, 0x00]);
    }

    #[test]
    fn test_write_ue_small_values() {
        // 0 → 1, 1 → 010, 2 → 011, 3 → 00100
        let mut bw = BitWriter::new();
        bw.write_ue(0);
        bw.write_ue(1);
        bw.write_ue(2);
        bw.write_ue(3);
        assert_eq!(bw.bits_written(), 1 + 3 + 3 + 5);
        assert_eq!(bw.finish(), vec![0b1010_0110, 0b0100_0000]);
    }

    #[test]
    fn test_write_ue_max_value() {
        let mut bw = BitWriter::new();
        bw.write_ue(u32::MAX - 1);
        // 31 个前导 0 + 32 位码字
        assert_eq!(bw.bits_written(), 63);
    }

    #[test]
    fn test_write_se_mapping() {
        let mut bw = BitWriter::new();
        bw.write_se(1); // ue(1) = 010
        bw.write_se(-1); // ue(2) = 011
        bw.write_se(0); // ue(0) = 1
        assert_eq!(bw.bits_written(), 7);
        assert_eq!(bw.finish(), vec![0b0100_1110]);
    }

    #[test]
    fn test_write_trailing_bits() {
        let mut bw = BitWriter::new();
        bw.write_bits(0b101, 3);
        bw.write_trailing_bits();
        assert!(bw.is_byte_aligned());
        assert_eq!(bw.finish(), vec![0b1011_0000]);
    }

    #[test]
    fn test_write_bytes_unaligned() {
        let mut bw = BitWriter::new();
        bw.write_flag(true);
        bw.write_bytes(&[0xFF]);
        assert_eq!(bw.finish(), vec![0xFF, 0x80]);
    }

    #[test]
    fn test_read_write_roundtrip_bits() {
        let mut bw = BitWriter::new();
        bw.write_bits(5, 3);
        bw.write_bits(1000, 10);
        bw.write_bits(0, 1);
        bw.write_bits(65535, 16);
        let data = bw.finish();

        let mut bc = BitCursor::new(&data);
        assert_eq!(bc.read_bits(3).unwrap(), 5);
        assert_eq!(bc.read_bits(10).unwrap(), 1000);
        assert_eq!(bc.read_bits(1).unwrap(), 0);
        assert_eq!(bc.read_bits(16).unwrap(), 65535);
    }
}
