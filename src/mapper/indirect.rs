//! 间接指针映射器
//!
//! 把 inode 的间接指针数组视为一维地址空间：
//!
//! ```text
//! [0, N₂)                  inode.inum[i]      一级间接表
//! [N₂, N₂+N₃)              inode.dinum[j]     二级间接表
//! [N₂+N₃, N₂+N₃+N₃·N_e)    二级间接表 j 的第 k 项（索引 N₂+N₃+j·N_e+k）
//! ```
//!
//! 映射结果是存放对应间接表的设备块。二级间接表的内容直接从设备读取
//! 并常驻在 [`PinnedTables`] 中，不经过 lazy buffer。

use super::coalesce;
use crate::{
    block::{BlockDev, BlockDevice},
    consts::*,
    error::{Error, ErrorKind, Result},
    geometry::Geometry,
    inode::Inode,
    range::{BlockRange, DeviceBlockRange},
    transaction::{Operation, OperationType, PendingWork},
};
use alloc::vec;
use alloc::vec::Vec;
use byteorder::{ByteOrder, LittleEndian};

/// 一个常驻的二级间接表
#[derive(Debug, Clone)]
struct PinnedTable {
    data: Vec<u8>,
    dirty: bool,
}

impl PinnedTable {
    fn entry(&self, index: u64) -> u32 {
        let offset = index as usize * BLOCK_POINTER_SIZE;
        LittleEndian::read_u32(&self.data[offset..offset + BLOCK_POINTER_SIZE])
    }

    fn set_entry(&mut self, index: u64, value: u32) {
        let offset = index as usize * BLOCK_POINTER_SIZE;
        LittleEndian::write_u32(&mut self.data[offset..offset + BLOCK_POINTER_SIZE], value);
        self.dirty = true;
    }

    fn is_zero(&self) -> bool {
        self.data.iter().all(|&b| b == 0)
    }
}

/// 常驻的二级间接表
///
/// 每个文件最多 N₃ 个，首次访问时从设备读取一次。
#[derive(Debug, Clone)]
pub struct PinnedTables {
    tables: Vec<Option<PinnedTable>>,
}

impl Default for PinnedTables {
    fn default() -> Self {
        Self {
            tables: vec![None; MINFS_DOUBLY_INDIRECT],
        }
    }
}

impl PinnedTables {
    /// 创建空的表集合
    pub fn new() -> Self {
        Self::default()
    }

    /// 表 `j` 是否已常驻
    pub fn is_loaded(&self, j: usize) -> bool {
        self.tables[j].is_some()
    }

    /// 是否有未写回的修改
    pub fn is_dirty(&self) -> bool {
        self.tables.iter().flatten().any(|t| t.dirty)
    }

    /// 取得表 `j`，必要时从设备读取
    fn load<D: BlockDevice>(
        &mut self,
        bdev: &mut BlockDev<D>,
        geometry: &Geometry,
        j: usize,
        pointer: u32,
    ) -> Result<&mut PinnedTable> {
        let slot = &mut self.tables[j];
        if slot.is_none() {
            let mut data = vec![0u8; geometry.block_size() as usize];
            if pointer != 0 {
                log::trace!("[MAPPER] reading doubly-indirect table {} from block {}", j, pointer);
                bdev.read_block(geometry.device_block(pointer), &mut data)?;
            }
            *slot = Some(PinnedTable { data, dirty: false });
        }

        slot.as_mut().ok_or(Error::new(ErrorKind::Corrupted, "pinned table missing"))
    }

    /// 安装一张新分配的全零表，无需读取设备
    fn install_empty(&mut self, geometry: &Geometry, j: usize) {
        self.tables[j] = Some(PinnedTable {
            data: vec![0u8; geometry.block_size() as usize],
            dirty: true,
        });
    }

    /// 丢弃表 `j`（其存储块已被释放）
    fn evict(&mut self, j: usize) {
        self.tables[j] = None;
    }
}

/// 间接指针映射器
pub struct IndirectMapper<'a> {
    geometry: Geometry,
    inode: &'a mut Inode,
    pinned: &'a mut PinnedTables,
}

/// 间接指针空间中的槽位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PointerSlot {
    /// `inode.inum[i]`
    Indirect(usize),
    /// `inode.dinum[j]`
    Doubly(usize),
    /// 二级间接表 `j` 的第 `k` 项
    DoublyChild(usize, u64),
}

impl<'a> IndirectMapper<'a> {
    /// 创建映射器
    pub fn new(geometry: Geometry, inode: &'a mut Inode, pinned: &'a mut PinnedTables) -> Self {
        Self {
            geometry,
            inode,
            pinned,
        }
    }

    /// 定位间接指针空间中的索引
    fn locate(&self, index: u64) -> Result<PointerSlot> {
        if index >= self.geometry.indirect_pointer_count() {
            return Err(Error::new(
                ErrorKind::OutOfRange,
                "indirect pointer index beyond addressable space",
            ));
        }

        let children = self.geometry.doubly_children_start();
        Ok(if index < MINFS_INDIRECT as u64 {
            PointerSlot::Indirect(index as usize)
        } else if index < children {
            PointerSlot::Doubly((index - MINFS_INDIRECT as u64) as usize)
        } else {
            let rel = index - children;
            let ne = self.geometry.entries_per_table();
            PointerSlot::DoublyChild((rel / ne) as usize, rel % ne)
        })
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

        let start = range.start();
        let geometry = self.geometry;
        match self.locate(start)? {
            PointerSlot::Indirect(i) => {
                let end = range.end().min(MINFS_INDIRECT as u64) as usize;
                Ok(coalesce(&geometry, self.inode.inum[i..end].iter().copied()))
            }
            PointerSlot::Doubly(j) => {
                let end = (range.end().min(geometry.doubly_children_start())
                    - MINFS_INDIRECT as u64) as usize;
                Ok(coalesce(&geometry, self.inode.dinum[j..end].iter().copied()))
            }
            PointerSlot::DoublyChild(j, k) => {
                let ne = geometry.entries_per_table();
                let count = (range.end() - start).min(ne - k);
                let pointer = self.inode.dinum[j];
                if pointer == 0 && !self.pinned.is_loaded(j) {
                    // 整张二级间接表都是空洞
                    return Ok(DeviceBlockRange::unmapped(count));
                }

                let table = self.pinned.load(bdev, &geometry, j, pointer)?;
                Ok(coalesce(&geometry, (k..k + count).map(|i| table.entry(i))))
            }
        }
    }

    /// 带分配的映射
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
        let slot = self.locate(range.start())?;
        let current = self.read_slot(bdev, slot)?;
        if current != 0 {
            return Ok((DeviceBlockRange::mapped(geometry.device_block(current), 1), false));
        }

        if let PointerSlot::DoublyChild(j, _) = slot {
            if self.inode.dinum[j] == 0 {
                let block = transaction.allocate_block()?;
                log::debug!("[MAPPER] allocated doubly-indirect table {} at block {}", j, block);
                self.inode.dinum[j] = block;
                self.inode.block_count += 1;
                self.pinned.install_empty(&geometry, j);
            }
        }

        let block = transaction.allocate_block()?;
        log::debug!("[MAPPER] allocated indirect table storage for index {} at block {}", range.start(), block);
        self.write_slot(bdev, slot, block)?;
        if let PointerSlot::Doubly(j) = slot {
            // 新分配的表不读设备，直接视为全零
            self.pinned.install_empty(&geometry, j);
        }
        self.inode.block_count += 1;
        Ok((DeviceBlockRange::mapped(geometry.device_block(block), 1), true))
    }

    fn read_slot<D: BlockDevice>(&mut self, bdev: &mut BlockDev<D>, slot: PointerSlot) -> Result<u32> {
        Ok(match slot {
            PointerSlot::Indirect(i) => self.inode.inum[i],
            PointerSlot::Doubly(j) => self.inode.dinum[j],
            PointerSlot::DoublyChild(j, k) => {
                let pointer = self.inode.dinum[j];
                if pointer == 0 && !self.pinned.is_loaded(j) {
                    return Ok(0);
                }
                self.pinned.load(bdev, &self.geometry, j, pointer)?.entry(k)
            }
        })
    }

    fn write_slot<D: BlockDevice>(
        &mut self,
        bdev: &mut BlockDev<D>,
        slot: PointerSlot,
        value: u32,
    ) -> Result<()> {
        match slot {
            PointerSlot::Indirect(i) => self.inode.inum[i] = value,
            PointerSlot::Doubly(j) => self.inode.dinum[j] = value,
            PointerSlot::DoublyChild(j, k) => {
                let pointer = self.inode.dinum[j];
                self.pinned.load(bdev, &self.geometry, j, pointer)?.set_entry(k, value);
            }
        }
        Ok(())
    }

    /// 释放索引 `index` 处的表存储块，并清空父槽位
    ///
    /// 槽位本来就是空洞时返回 `false`。
    pub(crate) fn release<D: BlockDevice>(
        &mut self,
        bdev: &mut BlockDev<D>,
        transaction: &mut dyn PendingWork,
        index: u64,
    ) -> Result<bool> {
        let slot = self.locate(index)?;
        let pointer = self.read_slot(bdev, slot)?;
        if pointer == 0 {
            return Ok(false);
        }

        log::debug!("[MAPPER] releasing table at index {} (block {})", index, pointer);
        transaction.deallocate_block(pointer);
        self.write_slot(bdev, slot, 0)?;
        self.inode.block_count = self.inode.block_count.saturating_sub(1);
        if let PointerSlot::Doubly(j) = slot {
            self.pinned.evict(j);
        }
        Ok(true)
    }

    /// 二级间接表 `j` 的所有条目是否都为 0
    pub(crate) fn doubly_table_is_zero<D: BlockDevice>(
        &mut self,
        bdev: &mut BlockDev<D>,
        j: usize,
    ) -> Result<bool> {
        let pointer = self.inode.dinum[j];
        if pointer == 0 && !self.pinned.is_loaded(j) {
            return Ok(true);
        }
        Ok(self.pinned.load(bdev, &self.geometry, j, pointer)?.is_zero())
    }

    /// 把脏的二级间接表排队写回
    pub fn flush(&mut self, transaction: &mut dyn PendingWork) -> Result<()> {
        for (j, table) in self.pinned.tables.iter_mut().enumerate() {
            let Some(table) = table.as_mut().filter(|t| t.dirty) else {
                continue;
            };

            let pointer = self.inode.dinum[j];
            if pointer == 0 {
                return Err(Error::new(
                    ErrorKind::Corrupted,
                    "dirty doubly-indirect table without storage",
                ));
            }

            log::debug!("[MAPPER] flushing doubly-indirect table {} to block {}", j, pointer);
            // 清除在前：写回期间的再次修改由下一次 flush 处理
            table.dirty = false;
            transaction.enqueue_metadata(
                Operation {
                    kind: OperationType::Write,
                    vmo_offset: (MINFS_INDIRECT + j) as u64,
                    dev_offset: self.geometry.device_block(pointer),
                    length: 1,
                },
                &table.data,
            );
        }
        Ok(())
    }
}
