//! 块缓存实现（基于 lru crate）

use crate::{
    block::BlockDevice,
    error::{Error, ErrorKind, Result},
};

use super::buffer::CacheBuffer;
use alloc::collections::BTreeSet; // 使用BTreeSet因为no_std环境
use alloc::vec::Vec;
use core::num::NonZeroUsize;
use lru::LruCache;

/// 缓存统计信息
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// 总访问次数
    pub total_accesses: u64,
    /// 缓存命中次数
    pub hits: u64,
    /// 缓存未命中次数
    pub misses: u64,
    /// 脏块写回次数
    pub writebacks: u64,
    /// 当前脏块数量
    pub dirty_blocks: usize,
}

/// 块缓存
///
/// ```text
/// struct BlockCache {
///     cache: LruCache<u64, CacheBuffer>,  // O(1)，自动LRU
///     dirty_set: BTreeSet<u64>,           // 追踪脏块
/// }
/// ```
pub struct BlockCache {
    /// LRU缓存核心：自动管理块的生命周期和访问顺序
    cache: LruCache<u64, CacheBuffer>,

    /// 脏块集合：追踪需要写回的块
    dirty_set: BTreeSet<u64>,

    /// 块大小（字节）
    block_size: usize,

    /// 统计信息
    stats: CacheStats,
}

impl BlockCache {
    /// 创建新的块缓存
    ///
    /// # 参数
    ///
    /// * `capacity` - 缓存容量（块数量），必须大于 0
    /// * `block_size` - 块大小（字节）
    pub fn new(capacity: usize, block_size: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or(Error::new(
            ErrorKind::InvalidInput,
            "cache capacity must be non-zero",
        ))?;

        Ok(Self {
            cache: LruCache::new(capacity),
            dirty_set: BTreeSet::new(),
            block_size,
            stats: CacheStats::default(),
        })
    }

    /// 查找块数据，命中时更新LRU顺序
    pub fn lookup(&mut self, lba: u64) -> Option<&[u8]> {
        self.stats.total_accesses += 1;

        match self.cache.get(&lba) {
            Some(buf) if buf.is_uptodate() => {
                self.stats.hits += 1;
                log::trace!("[CACHE] lookup LBA={:#x} HIT", lba);
                Some(&buf.data)
            }
            _ => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// 插入从设备读取的干净块
    pub fn insert_clean(&mut self, lba: u64, data: &[u8]) -> Result<()> {
        let block_size = self.block_size;
        let buf = self.slot(lba)?;
        buf.data.copy_from_slice(&data[..block_size]);
        buf.mark_uptodate();
        Ok(())
    }

    /// 写入块数据并标记为脏
    pub fn write_dirty(&mut self, lba: u64, data: &[u8]) -> Result<()> {
        let block_size = self.block_size;
        let buf = self.slot(lba)?;
        buf.data.copy_from_slice(&data[..block_size]);
        buf.mark_uptodate();
        buf.mark_dirty();

        if self.dirty_set.insert(lba) {
            log::debug!("[CACHE] mark_dirty LBA={:#x}, total_dirty={}", lba, self.dirty_set.len());
        }
        Ok(())
    }

    /// 获取（必要时分配）块的缓存槽位
    fn slot(&mut self, lba: u64) -> Result<&mut CacheBuffer> {
        if !self.cache.contains(&lba) {
            if self.cache.len() >= self.cache.cap().get() {
                self.evict_for_new_block()?;
            }
            self.cache.put(lba, CacheBuffer::new(lba, self.block_size));
            log::debug!("[CACHE] LBA={:#x} NEW block inserted", lba);
        }

        self.cache.get_mut(&lba).ok_or(Error::new(
            ErrorKind::Corrupted,
            "cache slot vanished after insert",
        ))
    }

    /// 驱逐一个块为新块腾出空间
    ///
    /// 从LRU端开始查找第一个非脏块。绝不驱逐脏块。
    fn evict_for_new_block(&mut self) -> Result<()> {
        // iter() 按 MRU 到 LRU 顺序遍历
        let victim = self
            .cache
            .iter()
            .rev()
            .map(|(k, _)| *k)
            .find(|lba| !self.dirty_set.contains(lba));

        match victim {
            Some(lba) => {
                self.cache.pop(&lba);
                log::debug!("[CACHE] Evicted clean block LBA={:#x}", lba);
                Ok(())
            }
            None => {
                log::error!("[CACHE] Cannot evict: all {} blocks are dirty", self.cache.len());
                Err(Error::new(
                    ErrorKind::NoSpace,
                    "All cache blocks are dirty, flush before writing",
                ))
            }
        }
    }

    /// 刷新所有脏块到磁盘
    ///
    /// # 返回
    ///
    /// 写回的块数量
    pub fn flush_all<D: BlockDevice>(&mut self, device: &mut D, sector_size: u32) -> Result<usize> {
        let dirty_lbas: Vec<u64> = self.dirty_set.iter().copied().collect();
        log::debug!("[CACHE] Flushing {} dirty blocks", dirty_lbas.len());

        let sectors = (self.block_size / sector_size as usize) as u32;
        for &lba in &dirty_lbas {
            if let Some(buf) = self.cache.peek_mut(&lba) {
                device.write_blocks(lba * sectors as u64, sectors, &buf.data)?;
                buf.clear_dirty();
            }
            self.dirty_set.remove(&lba);
            self.stats.writebacks += 1;
        }

        Ok(dirty_lbas.len())
    }

    /// 获取缓存统计信息
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.dirty_blocks = self.dirty_set.len();
        stats
    }

    /// 获取当前缓存块数量
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// 检查缓存是否为空
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl core::fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BlockCache")
            .field("capacity", &self.cache.cap())
            .field("len", &self.cache.len())
            .field("dirty_count", &self.dirty_set.len())
            .field("block_size", &self.block_size)
            .field("stats", &self.stats)
            .finish()
    }
}
