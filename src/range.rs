//! 区间类型
//!
//! 字节偏移、逻辑块号和设备块号上的半开区间 `[start, end)`。

use core::fmt;

/// 字节区间 `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteRange {
    start: u64,
    end: u64,
}

impl ByteRange {
    /// 创建字节区间
    ///
    /// `start > end` 是调用者 bug，直接 panic。
    pub fn new(start: u64, end: u64) -> Self {
        assert!(start <= end, "ByteRange start {} > end {}", start, end);
        Self { start, end }
    }

    /// 由块区间换算
    pub fn from_blocks(range: BlockRange, block_size: u32) -> Self {
        let bs = block_size as u64;
        Self::new(range.start() * bs, range.end() * bs)
    }

    /// 起始偏移
    pub fn start(&self) -> u64 {
        self.start
    }

    /// 结束偏移（不含）
    pub fn end(&self) -> u64 {
        self.end
    }

    /// 长度
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// 逻辑块区间 `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockRange {
    start: u64,
    end: u64,
}

impl BlockRange {
    /// 创建块区间
    pub fn new(start: u64, end: u64) -> Self {
        assert!(start <= end, "BlockRange start {} > end {}", start, end);
        Self { start, end }
    }

    /// 覆盖给定字节区间的最小块区间（结束向上取整）
    pub fn covering(range: ByteRange, block_size: u32) -> Self {
        let bs = block_size as u64;
        Self::new(range.start() / bs, range.end().div_ceil(bs))
    }

    /// 起始块
    pub fn start(&self) -> u64 {
        self.start
    }

    /// 结束块（不含）
    pub fn end(&self) -> u64 {
        self.end
    }

    /// 块数
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// 设备块区间
///
/// 要么是一段连续的已分配设备块，要么是一段连续的空洞，不会混合。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceBlockRange {
    range: BlockRange,
    mapped: bool,
}

impl DeviceBlockRange {
    /// 已分配的连续区间
    pub fn mapped(block: u64, count: u64) -> Self {
        Self {
            range: BlockRange::new(block, block + count),
            mapped: true,
        }
    }

    /// 长度为 `count` 的空洞
    pub fn unmapped(count: u64) -> Self {
        Self {
            range: BlockRange::new(0, count),
            mapped: false,
        }
    }

    /// 起始设备块，仅在 `is_mapped()` 时有意义
    pub fn block(&self) -> u64 {
        debug_assert!(self.mapped, "block() on an unmapped range");
        self.range.start()
    }

    /// 块数
    pub fn count(&self) -> u64 {
        self.range.len()
    }

    /// 是否已分配
    pub fn is_mapped(&self) -> bool {
        self.mapped
    }
}
