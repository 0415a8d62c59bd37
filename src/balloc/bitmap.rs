//! 位图操作

/// 测试位图中某一位是否被设置
pub fn test_bit(bitmap: &[u8], index: u32) -> bool {
    let byte_index = (index / 8) as usize;
    let bit_offset = (index % 8) as u8;

    if byte_index >= bitmap.len() {
        return false;
    }

    (bitmap[byte_index] & (1 << bit_offset)) != 0
}

/// 设置位图中的某一位，越界时返回 false
pub fn set_bit(bitmap: &mut [u8], index: u32) -> bool {
    let byte_index = (index / 8) as usize;
    match bitmap.get_mut(byte_index) {
        Some(byte) => {
            *byte |= 1 << (index % 8);
            true
        }
        None => false,
    }
}

/// 清除位图中的某一位，越界时返回 false
pub fn clear_bit(bitmap: &mut [u8], index: u32) -> bool {
    let byte_index = (index / 8) as usize;
    match bitmap.get_mut(byte_index) {
        Some(byte) => {
            *byte &= !(1 << (index % 8));
            true
        }
        None => false,
    }
}

/// 在 `[start, end)` 中查找第一个空闲位
pub fn find_first_zero(bitmap: &[u8], start: u32, end: u32) -> Option<u32> {
    let max_bits = (bitmap.len() * 8) as u32;
    let end = end.min(max_bits);

    (start..end).find(|&i| !test_bit(bitmap, i))
}

/// 统计 `[start, end)` 中被设置的位数
pub fn count_ones(bitmap: &[u8], start: u32, end: u32) -> u32 {
    let max_bits = (bitmap.len() * 8) as u32;
    (start..end.min(max_bits)).filter(|&i| test_bit(bitmap, i)).count() as u32
}
