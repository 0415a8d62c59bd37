//! 数据块分配
//!
//! 数据区的分配位图。块号是相对于数据区起点的指针值，
//! 0 号块保留，用来表示空洞。

mod bitmap;

use crate::consts::RESERVED_DATA_BLOCK;
use crate::error::{Error, ErrorKind, Result};
use alloc::vec;
use alloc::vec::Vec;

/// 数据块分配位图
#[derive(Debug, Clone)]
pub struct BlockBitmap {
    bits: Vec<u8>,
    /// 数据块总数
    total: u32,
    /// 下一次搜索的起点
    hint: u32,
}

impl BlockBitmap {
    /// 创建位图，保留 0 号块
    pub fn new(total: u32) -> Self {
        let mut bits = vec![0u8; (total as usize).div_ceil(8)];
        bitmap::set_bit(&mut bits, RESERVED_DATA_BLOCK);
        Self { bits, total, hint: 1 }
    }

    /// 分配一个空闲块
    ///
    /// 从上次分配的位置向后搜索，到末尾后回绕。
    pub fn allocate(&mut self) -> Result<u32> {
        let found = bitmap::find_first_zero(&self.bits, self.hint, self.total)
            .or_else(|| bitmap::find_first_zero(&self.bits, 1, self.hint));

        match found {
            Some(block) => {
                bitmap::set_bit(&mut self.bits, block);
                self.hint = block + 1;
                log::trace!("[BALLOC] allocated data block {}", block);
                Ok(block)
            }
            None => Err(Error::new(ErrorKind::NoSpace, "no free data blocks")),
        }
    }

    /// 释放一个块
    pub fn free(&mut self, block: u32) -> Result<()> {
        if block == RESERVED_DATA_BLOCK || block >= self.total {
            return Err(Error::new(ErrorKind::InvalidInput, "free of an invalid data block"));
        }
        if !bitmap::test_bit(&self.bits, block) {
            return Err(Error::new(ErrorKind::Corrupted, "double free of a data block"));
        }
        bitmap::clear_bit(&mut self.bits, block);
        log::trace!("[BALLOC] freed data block {}", block);
        Ok(())
    }

    /// 块是否已分配
    pub fn is_allocated(&self, block: u32) -> bool {
        bitmap::test_bit(&self.bits, block)
    }

    /// 已分配块数（不含保留块）
    pub fn allocated_count(&self) -> u32 {
        bitmap::count_ones(&self.bits, 1, self.total)
    }

    /// 数据块总数
    pub fn total(&self) -> u32 {
        self.total
    }
}
