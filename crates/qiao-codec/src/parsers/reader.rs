//! 码流单元语法元素读取器.
//!
//! 在 [`BitCursor`] 之上提供 Exp-Golomb 解码, RBSP 尾部判定等通用语法读取能力.
//! 只负责"怎么读", 不赋予任何字段编解码器语义.

use qiao_core::{BitCursor, EmulationRule, QiaoError, QiaoResult};

use super::unit::skip_start_code;

/// 码流单元读取器
///
/// 每个码流单元构造一个新的读取器, 读取器之间不共享状态.
/// 任何读取失败都不会消耗数据, 调用方应将失败视为"该单元损坏, 跳过".
///
/// # 示例
/// ```
/// use qiao_codec::parsers::NalReader;
///
/// // 起始码 + ue(3)=00100 + se(-1)=011 + 停止位与对齐
/// let data = [0x00, 0x00, 0x01, 0b0010_0011, 0b1000_0000];
/// let mut r = NalReader::new(&data);
/// assert_eq!(r.read_ue().unwrap(), 3);
/// assert_eq!(r.read_se().unwrap(), -1);
/// assert!(!r.more_rbsp_data());
/// r.rbsp_trailing_bits().unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct NalReader<'a> {
    cursor: BitCursor<'a>,
}

impl<'a> NalReader<'a> {
    /// 以 H.264/H.265 防竞争规则创建读取器, 自动跳过开头的起始码
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_rule(data, EmulationRule::ThreeByte)
    }

    /// 以 VC-1 RBDU 防竞争规则创建读取器
    pub fn rbdu(data: &'a [u8]) -> Self {
        Self::with_rule(data, EmulationRule::Rbdu)
    }

    /// 以指定防竞争规则创建读取器
    pub fn with_rule(data: &'a [u8], rule: EmulationRule) -> Self {
        Self {
            cursor: BitCursor::with_rule(skip_start_code(data), rule),
        }
    }

    /// 底层比特流游标
    pub fn cursor(&self) -> &BitCursor<'a> {
        &self.cursor
    }

    /// 已读取的真实数据位数 (不含防竞争字节)
    pub fn position(&self) -> usize {
        self.cursor.position()
    }

    /// 当前是否位于字节边界
    pub fn is_byte_aligned(&self) -> bool {
        self.cursor.is_byte_aligned()
    }

    /// 读取 N 个位 (1-32)
    pub fn read_bits(&mut self, n: u32) -> QiaoResult<u32> {
        self.cursor.read_bits(n)
    }

    /// 读取 1 个位
    pub fn read_bit(&mut self) -> QiaoResult<u32> {
        self.cursor.read_bit()
    }

    /// 读取 1 个标志位
    pub fn read_flag(&mut self) -> QiaoResult<bool> {
        self.cursor.read_flag()
    }

    /// 窥视 N 个位 (不移动位置)
    pub fn peek_bits(&self, n: u32) -> QiaoResult<u32> {
        self.cursor.peek_bits(n)
    }

    /// 跳过 N 个位
    pub fn skip_bits(&mut self, n: usize) -> QiaoResult<()> {
        self.cursor.skip_bits(n)
    }

    /// 读取无符号 Exp-Golomb 编码值 ue(v)
    ///
    /// 统计前导零个数 k, 跳过 1 位, 再读 k 位后缀, 值为 `2^k - 1 + 后缀`.
    pub fn read_ue(&mut self) -> QiaoResult<u32> {
        let saved = self.cursor.clone();
        let result = self.read_ue_code();
        if result.is_err() {
            self.cursor = saved;
        }
        result
    }

    /// 读取不超过 `max` 的 ue(v), 超出范围视为码流损坏
    pub fn read_ue_max(&mut self, max: u32) -> QiaoResult<u32> {
        let saved = self.cursor.clone();
        let value = self.read_ue()?;
        if value > max {
            self.cursor = saved;
            return Err(QiaoError::InvalidData(format!(
                "ue(v) 超出范围: value={}, max={}",
                value, max
            )));
        }
        Ok(value)
    }

    /// 读取有符号 Exp-Golomb 编码值 se(v)
    pub fn read_se(&mut self) -> QiaoResult<i32> {
        let code = i64::from(self.read_ue()?);
        // 映射: 0→0, 1→1, 2→-1, 3→2, 4→-2, ...
        let magnitude = (code + 1) / 2;
        let value = if code & 1 == 1 { magnitude } else { -magnitude };
        Ok(value as i32)
    }

    /// 当前位置之后是否还有 RBSP 尾部之外的数据
    ///
    /// RBSP 以一个停止位 1 加若干 0 结尾, 因此剩余数据中 1 的个数大于 1 时才有有效数据.
    pub fn more_rbsp_data(&self) -> bool {
        let mut probe = self.cursor.clone();
        let mut ones = 0u32;

        let head = ((8 - probe.position() % 8) % 8) as u32;
        match probe.read_bits(head) {
            Ok(bits) => ones += bits.count_ones(),
            Err(_) => return false,
        }
        while ones <= 1 {
            match probe.read_bits(8) {
                Ok(byte) => ones += byte.count_ones(),
                Err(_) => break,
            }
        }
        ones > 1
    }

    /// 消费 rbsp_trailing_bits: 停止位 1, 再以 0 填充到字节边界
    ///
    /// 失败时位置保持不变.
    pub fn rbsp_trailing_bits(&mut self) -> QiaoResult<()> {
        let saved = self.cursor.clone();
        let result = self.read_trailing_bits();
        if result.is_err() {
            self.cursor = saved;
        }
        result
    }

    fn read_trailing_bits(&mut self) -> QiaoResult<()> {
        if self.cursor.read_bit()? != 1 {
            return Err(QiaoError::InvalidData(
                "rbsp_stop_one_bit 不为 1".into(),
            ));
        }
        while !self.cursor.is_byte_aligned() {
            if self.cursor.read_bit()? != 0 {
                return Err(QiaoError::InvalidData(
                    "rbsp_alignment_zero_bit 不为 0".into(),
                ));
            }
        }
        Ok(())
    }

    fn read_ue_code(&mut self) -> QiaoResult<u32> {
        let mut leading_zeros = 0u32;
        while self.cursor.read_bit()? == 0 {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(QiaoError::InvalidData("Exp-Golomb 前导零过多".into()));
            }
        }

        if leading_zeros == 0 {
            return Ok(0);
        }

        let suffix = self.cursor.read_bits(leading_zeros)?;
        Ok(((1u64 << leading_zeros) - 1 + u64::from(suffix)) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qiao_core::BitWriter;

    #[test]
    fn test_read_ue_known_codes() {
        // 1 | 010 | 011 | 00100 | 00111
        let data = [0b1010_0110, 0b0100_0011, 0b1000_0000];
        let mut r = NalReader::new(&data);
        assert_eq!(r.read_ue().unwrap(), 0);
        assert_eq!(r.read_ue().unwrap(), 1);
        assert_eq!(r.read_ue().unwrap(), 2);
        assert_eq!(r.read_ue().unwrap(), 3);
        assert_eq!(r.read_ue().unwrap(), 6);
    }

    #[test]
    fn test_ue_roundtrip_representative_values() {
        let values = [0u32, 1, 2, 7, 127, 1 << 20, u32::MAX - 1];
        let mut bw = BitWriter::new();
        for &v in &values {
            bw.write_ue(v);
        }
        bw.write_trailing_bits();
        let data = bw.finish();

        let mut r = NalReader::with_rule(&data, EmulationRule::None);
        for &v in &values {
            assert_eq!(r.read_ue().unwrap(), v);
        }
        r.rbsp_trailing_bits().unwrap();
    }

    #[test]
    fn test_se_roundtrip_representative_values() {
        let values = [0i32, 1, -1, 2, -2, 1000, -1000];
        let mut bw = BitWriter::new();
        for &v in &values {
            bw.write_se(v);
        }
        let data = bw.finish();

        let mut r = NalReader::with_rule(&data, EmulationRule::None);
        for &v in &values {
            assert_eq!(r.read_se().unwrap(), v);
        }
    }

    #[test]
    fn test_ue_too_many_leading_zeros() {
        let data = [0u8, 0, 0, 0, 0x80];
        let mut r = NalReader::with_rule(&data, EmulationRule::None);
        assert!(matches!(r.read_ue(), Err(QiaoError::InvalidData(_))));
        assert_eq!(r.position(), 0);
    }

    #[test]
    fn test_ue_truncated_mid_code_is_recoverable() {
        // 00000001 后缀需要 7 位, 但只剩 0 位
        let data = [0b0000_0001];
        let mut r = NalReader::with_rule(&data, EmulationRule::None);
        assert!(matches!(r.read_ue(), Err(QiaoError::Eof)));
        assert_eq!(r.position(), 0, "失败的读取不应消耗数据");
        assert_eq!(r.read_bits(8).unwrap(), 1);
    }

    #[test]
    fn test_read_ue_max() {
        // ue(6) = 00111
        let data = [0b0011_1000];
        let mut r = NalReader::with_rule(&data, EmulationRule::None);
        assert!(r.read_ue_max(5).is_err());
        assert_eq!(r.position(), 0);
        assert_eq!(r.read_ue_max(6).unwrap(), 6);
    }

    #[test]
    fn test_exp_golomb_through_emulation_bytes() {
        // 净数据: 00 00 01 → 23 个 0 之后是 1, 即 ue 的前导零为 23
        let mut bw = BitWriter::new();
        bw.write_ue((1 << 23) - 1 + 5);
        bw.write_trailing_bits();
        let data = bw.finish();
        assert_eq!(&data[..3], &[0x00, 0x00, 0x01]);

        // 编码器在第二个 0x00 之后插入 0x03
        let mut escaped = vec![0x00, 0x00, 0x03];
        escaped.extend_from_slice(&data[2..]);
        let mut r = NalReader::with_rule(&escaped, EmulationRule::ThreeByte);
        assert_eq!(r.read_ue().unwrap(), (1 << 23) - 1 + 5);
        r.rbsp_trailing_bits().unwrap();
        assert_eq!(r.position(), data.len() * 8);
    }

    #[test]
    fn test_start_code_skipped() {
        let data = [0x00, 0x00, 0x00, 0x01, 0xA5];
        let mut r = NalReader::new(&data);
        assert_eq!(r.read_bits(8).unwrap(), 0xA5);
    }

    #[test]
    fn test_more_rbsp_data() {
        // 有效数据 101 + 停止位 1 + 0000
        let data = [0b1011_0000];
        let mut r = NalReader::with_rule(&data, EmulationRule::None);
        assert!(r.more_rbsp_data());
        r.read_bits(3).unwrap();
        assert!(!r.more_rbsp_data());
        r.rbsp_trailing_bits().unwrap();
        assert!(!r.more_rbsp_data());
    }

    #[test]
    fn test_more_rbsp_data_ignores_trailing_zero_bytes() {
        // 停止位之后跟着 cabac_zero_word
        let data = [0b1100_0000, 0x00, 0x00];
        let mut r = NalReader::with_rule(&data, EmulationRule::None);
        assert!(r.more_rbsp_data());
        r.read_bit().unwrap();
        assert!(!r.more_rbsp_data());
    }

    #[test]
    fn test_more_rbsp_data_across_bytes() {
        let data = [0b0000_0001, 0b1000_0000];
        let mut r = NalReader::with_rule(&data, EmulationRule::None);
        r.read_bits(2).unwrap();
        assert!(r.more_rbsp_data());
    }

    #[test]
    fn test_rbsp_trailing_bits_rejects_bad_padding() {
        let data = [0b1010_0000];
        let mut r = NalReader::with_rule(&data, EmulationRule::None);
        r.read_bits(1).unwrap();
        // 下一位是 0, 不是停止位
        assert!(matches!(r.rbsp_trailing_bits(), Err(QiaoError::InvalidData(_))));

        assert_eq!(r.position(), 1);

        let data = [0b1100_0000];
        let mut r = NalReader::with_rule(&data, EmulationRule::None);
        // 停止位 1 之后填充位出现 1
        assert!(matches!(r.rbsp_trailing_bits(), Err(QiaoError::InvalidData(_))));
        assert_eq!(r.position(), 0);
        // 失败后仍可从原位置重新读取
        assert_eq!(r.read_bits(2).unwrap(), 0b11);
    }

    #[test]
    fn test_rbdu_reader() {
        let data = [0x00, 0x00, 0x03, 0x02, 0x00, 0x00, 0x03];
        let mut r = NalReader::rbdu(&data);
        assert_eq!(r.read_bits(24).unwrap(), 0x000002);
        assert_eq!(r.read_bits(24).unwrap(), 0x000003);
    }
}
