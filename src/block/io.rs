//! 块 I/O 操作实现

use super::{BlockDev, BlockDevice};
use crate::error::{Error, ErrorKind, Result};

impl<D: BlockDevice> BlockDev<D> {
    /// 读取单个逻辑块
    ///
    /// 如果启用了缓存，优先从缓存读取；缓存未命中则从设备读取并填充缓存。
    ///
    /// # 参数
    ///
    /// * `lba` - 逻辑块地址
    /// * `buf` - 目标缓冲区（大小至少为 block_size）
    pub fn read_block(&mut self, lba: u64, buf: &mut [u8]) -> Result<()> {
        let block_size = self.block_size() as usize;

        if buf.len() < block_size {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "buffer too small for block",
            ));
        }

        self.inc_read_count();

        if let Some(cache) = &mut self.bcache {
            if let Some(data) = cache.lookup(lba) {
                buf[..block_size].copy_from_slice(data);
                return Ok(());
            }
        }

        // 缓存未命中或无缓存 - 从设备读取
        let pba = self.logical_to_physical(lba);
        let count = self.sectors_per_block();
        self.inc_physical_read_count();
        self.device_mut().read_blocks(pba, count, &mut buf[..block_size])?;

        if let Some(cache) = &mut self.bcache {
            cache.insert_clean(lba, &buf[..block_size])?;
        }

        Ok(())
    }

    /// 写入单个逻辑块
    ///
    /// 如果启用了缓存，写入缓存并标记为脏，等待 [`flush`](Self::flush)；
    /// 否则直接写入设备。
    ///
    /// # 参数
    ///
    /// * `lba` - 逻辑块地址
    /// * `buf` - 源数据缓冲区（大小至少为 block_size）
    pub fn write_block(&mut self, lba: u64, buf: &[u8]) -> Result<()> {
        let block_size = self.block_size() as usize;

        if buf.len() < block_size {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "buffer too small for block",
            ));
        }

        self.inc_write_count();

        if let Some(cache) = &mut self.bcache {
            return cache.write_dirty(lba, &buf[..block_size]);
        }

        let pba = self.logical_to_physical(lba);
        let count = self.sectors_per_block();
        self.inc_physical_write_count();
        self.device_mut().write_blocks(pba, count, &buf[..block_size])?;
        Ok(())
    }
}
