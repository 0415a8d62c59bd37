//! 文件块映射器
//!
//! 文件块号空间分三段：
//!
//! ```text
//! [0, N₁)                           直接块，指针在 inode.dnum
//! [N₁, N₁+N₂·N_e)                   一级间接：(t, off) = divmod(fb - N₁, N_e)
//! [N₁+N₂·N_e, N₁+N₂·N_e+N₃·N_e²)    二级间接：(j, i, off) = divmod²(fb - ..., N_e)
//! ```
//!
//! 间接表的内容通过 lazy buffer 读写。一级间接表 `t` 位于间接指针
//! 空间索引 `t`，二级间接表 `j` 下的第 `i` 张子表位于索引
//! `N₂+N₃+j·N_e+i`，它们的存储块都由 [`IndirectMapper`] 解析。

use super::{coalesce, IndirectMapper, Mapper, PinnedTables};
use crate::{
    block::{BlockDev, BlockDevice},
    consts::*,
    error::{Error, ErrorKind, Result},
    geometry::Geometry,
    inode::Inode,
    lazy::{enqueue_metadata, BufferView, Flusher, LazyBuffer, MappedReader},
    range::{BlockRange, ByteRange, DeviceBlockRange},
    transaction::PendingWork,
};
use alloc::boxed::Box;

/// 文件块指针所在的槽位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    /// `inode.dnum[i]`
    Direct(usize),
    /// 间接表 `table`（间接指针空间索引）的第 `entry` 项
    Table { table: u64, entry: usize },
}

/// 文件块映射器
pub struct FileMapper<'a> {
    geometry: Geometry,
    inode: &'a mut Inode,
    pinned: &'a mut PinnedTables,
    lazy: &'a mut LazyBuffer,
}

impl<'a> FileMapper<'a> {
    /// 创建映射器
    pub fn new(
        geometry: Geometry,
        inode: &'a mut Inode,
        pinned: &'a mut PinnedTables,
        lazy: &'a mut LazyBuffer,
    ) -> Self {
        Self {
            geometry,
            inode,
            pinned,
            lazy,
        }
    }

    /// 文件系统几何参数
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// 当前 inode
    pub fn inode(&self) -> &Inode {
        &*self.inode
    }

    /// 拆出间接指针映射器和 lazy buffer
    fn split(&mut self) -> (IndirectMapper<'_>, &mut LazyBuffer) {
        (
            IndirectMapper::new(self.geometry, &mut *self.inode, &mut *self.pinned),
            &mut *self.lazy,
        )
    }

    /// 定位文件块 `fb` 的指针槽位
    pub(crate) fn locate(&self, fb: u64) -> Result<Slot> {
        if fb >= self.geometry.max_blocks() {
            return Err(Error::new(ErrorKind::OutOfRange, "file block beyond max_blocks"));
        }
        if fb < MINFS_DIRECT as u64 {
            return Ok(Slot::Direct(fb as usize));
        }

        let ne = self.geometry.entries_per_table();
        let rel = fb - self.geometry.indirect_start();
        if fb < self.geometry.doubly_indirect_start() {
            return Ok(Slot::Table {
                table: rel / ne,
                entry: (rel % ne) as usize,
            });
        }

        let rel = fb - self.geometry.doubly_indirect_start();
        let j = rel / (ne * ne);
        let rem = rel % (ne * ne);
        Ok(Slot::Table {
            table: self.geometry.doubly_children_start() + j * ne + rem / ne,
            entry: (rem % ne) as usize,
        })
    }

    /// 间接表 `table` 所属的二级间接表
    pub(crate) fn parent_of(&self, table: u64) -> Option<usize> {
        let children = self.geometry.doubly_children_start();
        (table >= children).then(|| ((table - children) / self.geometry.entries_per_table()) as usize)
    }

    /// 表在 lazy buffer 中的字节范围
    fn table_range(&self, table: u64) -> ByteRange {
        ByteRange::from_blocks(BlockRange::new(table, table + 1), self.geometry.block_size())
    }

    /// 把表 `table` 读入 lazy buffer
    ///
    /// 表未加载且没有存储块时：`create` 为 false 返回 `false`，
    /// 不扩展缓冲区；否则加载一张全零表。
    pub(crate) fn load_table<D: BlockDevice>(
        &mut self,
        bdev: &mut BlockDev<D>,
        table: u64,
        create: bool,
    ) -> Result<bool> {
        let range = self.table_range(table);
        if self.lazy.is_loaded(range) {
            return Ok(true);
        }

        let (mut indirect, lazy) = self.split();
        if !create {
            let storage = indirect.map(bdev, BlockRange::new(table, table + 1))?;
            if !storage.is_mapped() {
                return Ok(false);
            }
        }

        log::trace!("[MAPPER] loading indirect table {}", table);
        let mut reader = MappedReader::new(bdev, Mapper::Indirect(indirect));
        lazy.read(range, &mut reader)?;
        Ok(true)
    }

    /// 已加载表的只读视图
    pub(crate) fn table_view(&self, table: u64) -> Result<BufferView<'_, u32>> {
        self.lazy.view(self.table_range(table))
    }

    /// 已加载表的可写视图
    pub(crate) fn table_view_mut<'s>(
        &'s mut self,
        table: u64,
        flusher: Flusher<'s>,
    ) -> Result<BufferView<'s, u32>> {
        let range = self.table_range(table);
        self.lazy.view_mut(range, flusher)
    }

    /// 文件块 `fb` 的指针值，空洞为 0
    pub(crate) fn read_slot<D: BlockDevice>(&mut self, bdev: &mut BlockDev<D>, fb: u64) -> Result<u32> {
        match self.locate(fb)? {
            Slot::Direct(i) => Ok(self.inode.dnum[i]),
            Slot::Table { table, entry } => {
                if !self.load_table(bdev, table, false)? {
                    return Ok(0);
                }
                Ok(self.table_view(table)?.get(entry))
            }
        }
    }

    /// 修改直接块指针，返回旧值
    pub(crate) fn set_direct(&mut self, index: usize, value: u32) -> u32 {
        core::mem::replace(&mut self.inode.dnum[index], value)
    }

    /// 表 `table` 是否全为 0（未加载且无存储的表视为全 0）
    pub(crate) fn table_is_zero<D: BlockDevice>(&mut self, bdev: &mut BlockDev<D>, table: u64) -> Result<bool> {
        if !self.load_table(bdev, table, false)? {
            return Ok(true);
        }
        Ok(self.table_view(table)?.iter().all(|p| p == 0))
    }

    /// 二级间接表 `j` 是否全为 0
    pub(crate) fn doubly_table_is_zero<D: BlockDevice>(&mut self, bdev: &mut BlockDev<D>, j: usize) -> Result<bool> {
        let (mut indirect, _) = self.split();
        indirect.doubly_table_is_zero(bdev, j)
    }

    /// 只读映射
    pub fn map<D: BlockDevice>(
        &mut self,
        bdev: &mut BlockDev<D>,
        range: BlockRange,
    ) -> Result<DeviceBlockRange> {
        if range.is_empty() {
            return Err(Error::new(ErrorKind::InvalidInput, "map of an empty range"));
        }

        let geometry = self.geometry;
        match self.locate(range.start())? {
            Slot::Direct(i) => {
                let end = range.end().min(MINFS_DIRECT as u64) as usize;
                Ok(coalesce(&geometry, self.inode.dnum[i..end].iter().copied()))
            }
            Slot::Table { table, entry } => {
                let remaining = geometry.entries_per_table() - entry as u64;
                let count = range.len().min(remaining) as usize;
                if !self.load_table(bdev, table, false)? {
                    return Ok(DeviceBlockRange::unmapped(count as u64));
                }

                let view = self.table_view(table)?;
                let run = coalesce(&geometry, (entry..entry + count).map(|i| view.get(i)));
                Ok(run)
            }
        }
    }

    /// 带分配的映射
    ///
    /// 写入表项时，表本身没有存储块的话会一并分配。
    pub fn map_for_write<D: BlockDevice>(
        &mut self,
        bdev: &mut BlockDev<D>,
        transaction: &mut dyn PendingWork,
        range: BlockRange,
    ) -> Result<(DeviceBlockRange, bool)> {
        if range.is_empty() {
            return Err(Error::new(ErrorKind::InvalidInput, "map of an empty range"));
        }

        let geometry = self.geometry;
        match self.locate(range.start())? {
            Slot::Direct(i) => {
                if self.inode.dnum[i] != 0 {
                    return Ok((DeviceBlockRange::mapped(geometry.device_block(self.inode.dnum[i]), 1), false));
                }

                let block = transaction.allocate_block()?;
                log::debug!("[MAPPER] allocated direct block {} for file block {}", block, i);
                self.inode.dnum[i] = block;
                self.inode.block_count += 1;
                Ok((DeviceBlockRange::mapped(geometry.device_block(block), 1), true))
            }
            Slot::Table { table, entry } => {
                self.load_table(bdev, table, true)?;
                let current = self.table_view(table)?.get(entry);
                if current != 0 {
                    return Ok((DeviceBlockRange::mapped(geometry.device_block(current), 1), false));
                }

                let block = transaction.allocate_block()?;
                log::debug!(
                    "[MAPPER] allocated data block {} for file block {} (table {}, entry {})",
                    block,
                    range.start(),
                    table,
                    entry
                );
                self.inode.block_count += 1;
                self.write_entry(bdev, transaction, table, entry, block)?;
                Ok((DeviceBlockRange::mapped(geometry.device_block(block), 1), true))
            }
        }
    }

    /// 写入表项并立即写回该表
    fn write_entry<D: BlockDevice>(
        &mut self,
        bdev: &mut BlockDev<D>,
        transaction: &mut dyn PendingWork,
        table: u64,
        entry: usize,
        value: u32,
    ) -> Result<()> {
        let block_size = self.geometry.block_size();
        let range = self.table_range(table);
        let (indirect, lazy) = self.split();

        let dev = &mut *bdev;
        let txn = &mut *transaction;
        let mut mapper = Mapper::Indirect(indirect);
        let flusher: Flusher<'_> = Box::new(move |range: ByteRange, bytes: &[u8]| {
            LazyBuffer::write_back(block_size, &mut *dev, &mut *txn, &mut mapper, range, bytes, &mut enqueue_metadata)
        });

        let mut view = lazy.view_mut::<u32>(range, flusher)?;
        view.set(entry, value)?;
        view.flush()
    }

    /// 写回表 `table`
    ///
    /// 全零且没有存储块的表直接跳过，不分配。
    pub(crate) fn flush_table<D: BlockDevice>(
        &mut self,
        bdev: &mut BlockDev<D>,
        transaction: &mut dyn PendingWork,
        table: u64,
    ) -> Result<()> {
        let range = self.table_range(table);
        if !self.lazy.is_loaded(range) {
            return Ok(());
        }

        let zero = self.table_view(table)?.iter().all(|p| p == 0);
        let (mut indirect, lazy) = self.split();
        if zero && !indirect.map(bdev, BlockRange::new(table, table + 1))?.is_mapped() {
            log::trace!("[MAPPER] skipping empty unbacked table {}", table);
            return Ok(());
        }

        log::debug!("[MAPPER] flushing indirect table {}", table);
        lazy.flush(bdev, transaction, &mut Mapper::Indirect(indirect), range, &mut enqueue_metadata)
    }

    /// 释放间接指针空间索引 `index` 处的表
    pub(crate) fn release_table<D: BlockDevice>(
        &mut self,
        bdev: &mut BlockDev<D>,
        transaction: &mut dyn PendingWork,
        index: u64,
    ) -> Result<bool> {
        let (mut indirect, _) = self.split();
        indirect.release(bdev, transaction, index)
    }

    /// 写回常驻的二级间接表
    pub fn flush_pinned(&mut self, transaction: &mut dyn PendingWork) -> Result<()> {
        let (mut indirect, _) = self.split();
        indirect.flush(transaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balloc::BlockBitmap;
    use crate::test_utils::MockDevice;
    use crate::transaction::SimpleTransaction;
    use alloc::vec;
    use byteorder::{ByteOrder, LittleEndian};

    const DAT: u64 = 8;

    struct Fixture {
        bdev: BlockDev<MockDevice>,
        geometry: Geometry,
        inode: Inode,
        pinned: PinnedTables,
        lazy: LazyBuffer,
    }

    impl Fixture {
        fn new() -> Self {
            let mut bdev = BlockDev::new(MockDevice::new(512, 512)).unwrap();
            let lazy = LazyBuffer::create(&mut bdev, "indirect-1", 512).unwrap();
            Self {
                bdev,
                geometry: Geometry::new(512, DAT).unwrap(),
                inode: Inode::default(),
                pinned: PinnedTables::new(),
                lazy,
            }
        }

        /// 新的映射器，不共享任何缓存
        fn fresh(&mut self) -> (FileMapper<'_>, &mut BlockDev<MockDevice>) {
            self.pinned = PinnedTables::new();
            self.lazy.shrink(0);
            (
                FileMapper::new(self.geometry, &mut self.inode, &mut self.pinned, &mut self.lazy),
                &mut self.bdev,
            )
        }

        fn write_table(&mut self, pointer: u32, entries: &[(usize, u32)]) {
            let mut table = vec![0u8; 512];
            for &(i, v) in entries {
                LittleEndian::write_u32(&mut table[i * 4..i * 4 + 4], v);
            }
            self.bdev.write_block(DAT + pointer as u64, &table).unwrap();
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = self.lazy.detach(&mut self.bdev);
        }
    }

    #[test]
    fn test_locate_zones() {
        let mut f = Fixture::new();
        let (m, _) = f.fresh();
        let g = *m.geometry();
        let ne = g.entries_per_table();

        assert_eq!(m.locate(3).unwrap(), Slot::Direct(3));
        assert_eq!(m.locate(16).unwrap(), Slot::Table { table: 0, entry: 0 });
        assert_eq!(m.locate(16 + ne + 5).unwrap(), Slot::Table { table: 1, entry: 5 });

        let d = g.doubly_indirect_start();
        assert_eq!(m.locate(d).unwrap(), Slot::Table { table: 32, entry: 0 });
        assert_eq!(m.locate(d + 2 * ne + 7).unwrap(), Slot::Table { table: 34, entry: 7 });
        assert_eq!(m.parent_of(34), Some(0));
        assert_eq!(m.parent_of(30), None);
        assert_eq!(m.locate(g.max_blocks()).unwrap_err().kind(), ErrorKind::OutOfRange);
    }

    #[test]
    fn test_map_direct_slot() {
        let mut f = Fixture::new();
        f.inode.dnum[0] = 17;
        let (mut m, bdev) = f.fresh();

        let r = m.map(bdev, BlockRange::new(0, 1)).unwrap();
        assert_eq!(r, DeviceBlockRange::mapped(DAT + 17, 1));
    }

    #[test]
    fn test_map_indirect_slot() {
        let mut f = Fixture::new();
        f.inode.inum[0] = 17;
        f.write_table(17, &[(0, 19)]);
        let (mut m, bdev) = f.fresh();

        let r = m.map(bdev, BlockRange::new(16, 17)).unwrap();
        assert_eq!(r, DeviceBlockRange::mapped(DAT + 19, 1));
    }

    #[test]
    fn test_map_coalesces_runs() {
        let mut f = Fixture::new();
        f.inode.dnum[2] = 40;
        f.inode.dnum[3] = 41;
        f.inode.dnum[4] = 42;
        f.inode.dnum[5] = 50;
        f.inode.inum[0] = 17;
        f.write_table(17, &[(0, 60), (1, 61), (5, 70)]);
        let (mut m, bdev) = f.fresh();

        assert_eq!(m.map(bdev, BlockRange::new(0, 16)).unwrap(), DeviceBlockRange::unmapped(2));
        assert_eq!(m.map(bdev, BlockRange::new(2, 16)).unwrap(), DeviceBlockRange::mapped(DAT + 40, 3));
        // 直接块的空洞不跨入间接区域
        assert_eq!(m.map(bdev, BlockRange::new(6, 100)).unwrap(), DeviceBlockRange::unmapped(10));
        assert_eq!(m.map(bdev, BlockRange::new(16, 100)).unwrap(), DeviceBlockRange::mapped(DAT + 60, 2));
        assert_eq!(m.map(bdev, BlockRange::new(18, 100)).unwrap(), DeviceBlockRange::unmapped(3));
        assert_eq!(m.map(bdev, BlockRange::new(18, 19)).unwrap(), DeviceBlockRange::unmapped(1));
    }

    #[test]
    fn test_map_unbacked_table_does_not_grow_buffer() {
        let mut f = Fixture::new();
        let (mut m, bdev) = f.fresh();
        let d = m.geometry().doubly_indirect_start();

        let r = m.map(bdev, BlockRange::new(d, d + 1000)).unwrap();
        assert_eq!(r, DeviceBlockRange::unmapped(128));
        drop(m);
        assert_eq!(f.lazy.capacity_blocks(), 1);
        assert_eq!(f.bdev.physical_read_count(), 0);
    }

    #[test]
    fn test_map_out_of_range_regardless_of_inode() {
        let mut f = Fixture::new();
        f.inode.dnum = [5; MINFS_DIRECT];
        f.inode.inum = [6; MINFS_INDIRECT];
        f.inode.dinum = [7; MINFS_DOUBLY_INDIRECT];
        let max = f.geometry.max_blocks();
        let mut bitmap = BlockBitmap::new(64);
        let mut trans = SimpleTransaction::begin(&mut bitmap);
        let (mut m, bdev) = f.fresh();

        let range = BlockRange::new(max, max + 1);
        assert_eq!(m.map(bdev, range).unwrap_err().kind(), ErrorKind::OutOfRange);
        assert_eq!(m.map_for_write(bdev, &mut trans, range).unwrap_err().kind(), ErrorKind::OutOfRange);
    }

    #[test]
    fn test_direct_write_persists_across_mappers() {
        let mut f = Fixture::new();
        let mut bitmap = BlockBitmap::new(64);
        let mut trans = SimpleTransaction::begin(&mut bitmap);

        let mut blocks = vec![];
        {
            let (mut m, bdev) = f.fresh();
            for fb in 0..MINFS_DIRECT as u64 {
                let (r, allocated) = m.map_for_write(bdev, &mut trans, BlockRange::new(fb, fb + 1)).unwrap();
                assert!(allocated);
                blocks.push(r);
            }
        }
        trans.commit(&mut f.bdev).unwrap();

        let (mut m, bdev) = f.fresh();
        for (fb, expected) in blocks.into_iter().enumerate() {
            let fb = fb as u64;
            let r = m.map(bdev, BlockRange::new(fb, fb + 1)).unwrap();
            assert!(r.is_mapped());
            assert_eq!(r, expected);
        }
        assert_eq!(m.inode().block_count, MINFS_DIRECT as u32);
    }

    #[test]
    fn test_write_allocates_indirect_table() {
        let mut f = Fixture::new();
        let mut bitmap = BlockBitmap::new(64);
        let mut trans = SimpleTransaction::begin(&mut bitmap);

        let fb = 16 + 128 + 3;
        let data = {
            let (mut m, bdev) = f.fresh();
            let (r, allocated) = m.map_for_write(bdev, &mut trans, BlockRange::new(fb, fb + 1)).unwrap();
            assert!(allocated);

            let (again, allocated) = m.map_for_write(bdev, &mut trans, BlockRange::new(fb, fb + 1)).unwrap();
            assert!(!allocated);
            assert_eq!(again, r);
            r
        };

        // 数据块和表块各一个
        assert_eq!(f.inode.block_count, 2);
        assert_ne!(f.inode.inum[1], 0);
        trans.commit(&mut f.bdev).unwrap();
        let table = DAT + f.inode.inum[1] as u64;
        assert_eq!(DAT + f.bdev.device().pointer(table, 3) as u64, data.block());

        let (mut m, bdev) = f.fresh();
        assert_eq!(m.map(bdev, BlockRange::new(fb, fb + 1)).unwrap(), data);
    }

    #[test]
    fn test_write_last_block_allocates_every_level() {
        let mut f = Fixture::new();
        let mut bitmap = BlockBitmap::new(64);
        let mut trans = SimpleTransaction::begin(&mut bitmap);
        let last = f.geometry.max_blocks() - 1;

        let data = {
            let (mut m, bdev) = f.fresh();
            let (r, allocated) = m.map_for_write(bdev, &mut trans, BlockRange::new(last, last + 1)).unwrap();
            assert!(allocated);
            r
        };
        assert_eq!(f.inode.block_count, 3);
        assert!(!f.pinned.is_dirty());
        trans.commit(&mut f.bdev).unwrap();

        let doubly = DAT + f.inode.dinum[0] as u64;
        let inner = f.bdev.device().pointer(doubly, 127);
        assert_ne!(f.inode.dinum[0], 0);
        assert_ne!(inner, 0);
        let leaf = f.bdev.device().pointer(DAT + inner as u64, 127);
        assert_eq!(DAT + leaf as u64, data.block());

        let (mut m, bdev) = f.fresh();
        assert_eq!(m.map(bdev, BlockRange::new(last, last + 1)).unwrap(), data);
    }
}
