//! 测试辅助：内存块设备

use crate::block::BlockDevice;
use crate::error::{Error, ErrorKind, Result};
use alloc::vec::Vec;

/// 内存中的块设备，扇区大小固定为 512
pub(crate) struct MockDevice {
    pub(crate) block_size: u32,
    pub(crate) sector_size: u32,
    total_blocks: u64,
    storage: Vec<u8>,
    /// 读取该逻辑块时返回 I/O 错误
    pub(crate) fail_reads_at: Option<u64>,
    /// 写入该逻辑块时返回 I/O 错误
    pub(crate) fail_writes_at: Option<u64>,
}

impl MockDevice {
    pub(crate) fn new(total_blocks: u64, block_size: u32) -> Self {
        Self {
            block_size,
            sector_size: 512,
            total_blocks,
            storage: alloc::vec![0u8; (total_blocks * block_size as u64) as usize],
            fail_reads_at: None,
            fail_writes_at: None,
        }
    }

    /// 读取逻辑块的原始内容（绕过 BlockDev）
    pub(crate) fn block(&self, lba: u64) -> &[u8] {
        let bs = self.block_size as usize;
        let start = lba as usize * bs;
        &self.storage[start..start + bs]
    }

    /// 读取逻辑块中第 `index` 个小端 u32
    pub(crate) fn pointer(&self, lba: u64, index: usize) -> u32 {
        let b = self.block(lba);
        u32::from_le_bytes([b[index * 4], b[index * 4 + 1], b[index * 4 + 2], b[index * 4 + 3]])
    }

    fn to_block(&self, sector: u64) -> u64 {
        sector * self.sector_size as u64 / self.block_size as u64
    }
}

impl BlockDevice for MockDevice {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    fn read_blocks(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize> {
        if self.fail_reads_at == Some(self.to_block(lba)) {
            return Err(Error::new(ErrorKind::Io, "injected read failure"));
        }
        let start = (lba * self.sector_size as u64) as usize;
        let len = (count * self.sector_size) as usize;
        buf[..len].copy_from_slice(&self.storage[start..start + len]);
        Ok(len)
    }

    fn write_blocks(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<usize> {
        if self.fail_writes_at == Some(self.to_block(lba)) {
            return Err(Error::new(ErrorKind::Io, "injected write failure"));
        }
        let start = (lba * self.sector_size as u64) as usize;
        let len = (count * self.sector_size) as usize;
        self.storage[start..start + len].copy_from_slice(&buf[..len]);
        Ok(len)
    }
}
