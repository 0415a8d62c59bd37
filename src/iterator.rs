//! 文件块游标
//!
//! 顺序遍历文件块指针，读取或修改当前位置的指针值，批量查询连续区间，
//! 并在离开一张已被清空的间接表时释放它。
//!
//! ## 设计说明
//!
//! 1. **修改只落在内存** - `set_blk` 通过 lazy buffer 修改表内容，只记录脏表，
//!    真正的写回在 [`BlockIterator::flush`] 中完成
//! 2. **延迟释放** - 表是否为空只在游标离开该表时检查
//! 3. **inode 由调用者持久化** - 游标只修改内存中的 inode

use crate::{
    block::{BlockDev, BlockDevice},
    consts::*,
    error::{Error, ErrorKind, Result},
    lazy::Flusher,
    mapper::{FileMapper, Slot},
    range::{BlockRange, ByteRange},
    transaction::PendingWork,
};
use alloc::boxed::Box;
use alloc::collections::BTreeSet;

/// 文件块游标
pub struct BlockIterator<'a, D> {
    mapper: FileMapper<'a>,
    bdev: &'a mut BlockDev<D>,
    transaction: Option<&'a mut dyn PendingWork>,
    /// 当前文件块
    file_block: u64,
    /// 当前位置的指针值
    blk: u32,
    /// 自上次 flush 以来修改过的表（间接指针空间索引）
    dirty_tables: BTreeSet<u64>,
    /// 当前表中是否有非零项被清零
    leaf_cleared: bool,
    /// 当前二级间接表下是否有子表被释放
    doubly_cleared: bool,
}

impl<'a, D: BlockDevice> BlockIterator<'a, D> {
    /// 在 `start` 处创建游标
    ///
    /// 不分配任何块。没有事务的游标只能读。
    pub fn init(
        mut mapper: FileMapper<'a>,
        bdev: &'a mut BlockDev<D>,
        transaction: Option<&'a mut dyn PendingWork>,
        start: u64,
    ) -> Result<Self> {
        if start >= mapper.geometry().max_blocks() {
            return Err(Error::new(ErrorKind::OutOfRange, "iterator start beyond max_blocks"));
        }

        let blk = mapper.read_slot(bdev, start)?;
        log::trace!("[ITER] init at file block {} (blk {})", start, blk);
        Ok(Self {
            mapper,
            bdev,
            transaction,
            file_block: start,
            blk,
            dirty_tables: BTreeSet::new(),
            leaf_cleared: false,
            doubly_cleared: false,
        })
    }

    /// 当前文件块
    pub fn file_block(&self) -> u64 {
        self.file_block
    }

    /// 当前位置的指针值，0 表示空洞
    pub fn blk(&self) -> u32 {
        self.blk
    }

    fn max_blocks(&self) -> u64 {
        self.mapper.geometry().max_blocks()
    }

    /// 修改当前位置的指针
    ///
    /// 只修改内存，不做设备 I/O。
    pub fn set_blk(&mut self, value: u32) -> Result<()> {
        if self.transaction.is_none() {
            return Err(Error::new(ErrorKind::NotSupported, "set_blk without a transaction"));
        }
        if self.file_block >= self.max_blocks() {
            return Err(Error::new(ErrorKind::BadState, "set_blk past the end of the file"));
        }

        let old = match self.mapper.locate(self.file_block)? {
            Slot::Direct(i) => self.mapper.set_direct(i, value),
            Slot::Table { table, entry } => {
                self.mapper.load_table(self.bdev, table, true)?;

                let dirty = &mut self.dirty_tables;
                let flusher: Flusher<'_> = Box::new(move |_: ByteRange, _: &[u8]| {
                    dirty.insert(table);
                    Ok(())
                });
                let mut view = self.mapper.table_view_mut(table, flusher)?;
                let old = view.update(entry, |_| value)?;
                view.flush()?;

                if old != 0 && value == 0 {
                    self.leaf_cleared = true;
                }
                old
            }
        };

        log::trace!("[ITER] file block {}: {} -> {}", self.file_block, old, value);
        self.blk = value;
        Ok(())
    }

    /// 从当前位置开始、设备上连续（或全是空洞）的块数
    ///
    /// 结果不超过 `max`，也不超过文件末尾。可以跨越表的边界。
    pub fn contiguous_block_count(&mut self, max: Option<u64>) -> Result<u64> {
        let remaining = self.max_blocks() - self.file_block;
        let limit = max.map_or(remaining, |m| m.min(remaining));
        if limit == 0 {
            return Ok(0);
        }

        let end = self.file_block + limit;
        let first = self.mapper.map(self.bdev, BlockRange::new(self.file_block, end))?;
        let mut count = first.count();
        while count < limit {
            let next = self.mapper.map(self.bdev, BlockRange::new(self.file_block + count, end))?;
            let continues = match (first.is_mapped(), next.is_mapped()) {
                (false, false) => true,
                (true, true) => next.block() == first.block() + count,
                _ => false,
            };
            if !continues {
                break;
            }
            count += next.count();
        }
        Ok(count.min(limit))
    }

    /// 前进 `n` 个文件块
    ///
    /// 可以停在文件末尾（`max_blocks`），此时 `blk()` 为 0。
    /// 离开一张被清空的表时释放它，必要时再释放其所属的二级间接表。
    pub fn advance(&mut self, n: u64) -> Result<()> {
        let max = self.max_blocks();
        let Some(target) = self.file_block.checked_add(n).filter(|&t| t <= max) else {
            return Err(Error::new(ErrorKind::BadState, "advance past max_blocks"));
        };
        if n == 0 {
            return Ok(());
        }

        let next = if target < max {
            Some(self.mapper.locate(target)?)
        } else {
            None
        };
        if let Slot::Table { table, .. } = self.mapper.locate(self.file_block)? {
            let next_table = match next {
                Some(Slot::Table { table, .. }) => Some(table),
                _ => None,
            };
            if next_table != Some(table) {
                self.leave_table(table, next_table)?;
            }
        }

        self.file_block = target;
        self.blk = if target < max {
            self.mapper.read_slot(self.bdev, target)?
        } else {
            0
        };
        Ok(())
    }

    /// 离开表 `table`，下一个位置位于 `next_table`（不在表中时为 `None`）
    fn leave_table(&mut self, table: u64, next_table: Option<u64>) -> Result<()> {
        let cleared = core::mem::take(&mut self.leaf_cleared);
        let Some(transaction) = self.transaction.as_deref_mut() else {
            return Ok(());
        };

        if cleared && self.mapper.table_is_zero(self.bdev, table)? {
            self.dirty_tables.remove(&table);
            if self.mapper.release_table(self.bdev, transaction, table)? {
                log::debug!("[ITER] released empty indirect table {}", table);
                if self.mapper.parent_of(table).is_some() {
                    self.doubly_cleared = true;
                }
            }
        }

        let Some(j) = self.mapper.parent_of(table) else {
            return Ok(());
        };
        if next_table.and_then(|t| self.mapper.parent_of(t)) == Some(j) {
            return Ok(());
        }

        let cleared = core::mem::take(&mut self.doubly_cleared);
        if cleared && self.mapper.doubly_table_is_zero(self.bdev, j)? {
            let index = (MINFS_INDIRECT + j) as u64;
            if self.mapper.release_table(self.bdev, transaction, index)? {
                log::debug!("[ITER] released empty doubly-indirect table {}", j);
            }
        }
        Ok(())
    }

    /// 写回自上次 flush 以来修改过的所有表
    ///
    /// 全零且没有存储块的表被跳过。inode 本身不会被写回。
    pub fn flush(&mut self) -> Result<()> {
        let Some(transaction) = self.transaction.as_deref_mut() else {
            return Err(Error::new(ErrorKind::NotSupported, "flush without a transaction"));
        };

        log::debug!("[ITER] flushing {} dirty tables", self.dirty_tables.len());
        while let Some(&table) = self.dirty_tables.first() {
            self.mapper.flush_table(self.bdev, transaction, table)?;
            self.dirty_tables.remove(&table);
        }
        self.mapper.flush_pinned(transaction)
    }
}

impl<D> Drop for BlockIterator<'_, D> {
    fn drop(&mut self) {
        if !self.dirty_tables.is_empty() {
            log::warn!("[ITER] dropped with {} unflushed tables", self.dirty_tables.len());
        }
    }
}
