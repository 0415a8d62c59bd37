//! 块映射器
//!
//! 两种映射器共享同一组操作：
//!
//! - [`IndirectMapper`]：间接指针空间 → 存放间接表本身的设备块
//! - [`FileMapper`]：文件块号 → 数据块所在的设备块
//!
//! 只有这两种变体，调用点固定，所以用枚举分派而不是 trait 对象。

mod file;
mod indirect;

pub use file::FileMapper;
pub use indirect::{IndirectMapper, PinnedTables};

pub(crate) use file::Slot;

use crate::{
    block::{BlockDev, BlockDevice},
    error::Result,
    geometry::Geometry,
    range::{BlockRange, DeviceBlockRange},
    transaction::PendingWork,
};

/// 映射器
pub enum Mapper<'a> {
    /// 间接指针空间映射器
    Indirect(IndirectMapper<'a>),
    /// 文件块映射器
    File(FileMapper<'a>),
}

impl Mapper<'_> {
    /// 只读映射
    ///
    /// 返回从 `range.start()` 开始、不超过 `range.end()` 的最长区间：
    /// 要么设备块连续且全部已分配，要么全部是空洞。
    pub fn map<D: BlockDevice>(
        &mut self,
        bdev: &mut BlockDev<D>,
        range: BlockRange,
    ) -> Result<DeviceBlockRange> {
        match self {
            Mapper::Indirect(m) => m.map(bdev, range),
            Mapper::File(m) => m.map(bdev, range),
        }
    }

    /// 带分配的映射
    ///
    /// `range.start()` 处为空洞时分配一个块并返回 `(区间, true)`，
    /// 否则返回单块区间和 `false`。每次调用最多分配一个块。
    pub fn map_for_write<D: BlockDevice>(
        &mut self,
        bdev: &mut BlockDev<D>,
        transaction: &mut dyn PendingWork,
        range: BlockRange,
    ) -> Result<(DeviceBlockRange, bool)> {
        match self {
            Mapper::Indirect(m) => m.map_for_write(bdev, transaction, range),
            Mapper::File(m) => m.map_for_write(bdev, transaction, range),
        }
    }

    /// 写回映射器自己缓存的元数据（二级间接表）
    pub fn flush(&mut self, transaction: &mut dyn PendingWork) -> Result<()> {
        match self {
            Mapper::Indirect(m) => m.flush(transaction),
            Mapper::File(m) => m.flush_pinned(transaction),
        }
    }
}

/// 合并以第一个指针开头的连续区间
///
/// `slots` 至少产生一个元素。合并在极性改变（空洞/已分配）
/// 或设备块不连续处停止。
pub(crate) fn coalesce(geometry: &Geometry, mut slots: impl Iterator<Item = u32>) -> DeviceBlockRange {
    let Some(first) = slots.next() else {
        return DeviceBlockRange::unmapped(0);
    };

    let mut count = 1u64;
    if first == 0 {
        count += slots.take_while(|&p| p == 0).count() as u64;
        return DeviceBlockRange::unmapped(count);
    }

    let mut expected = first as u64 + 1;
    for pointer in slots {
        if pointer as u64 != expected {
            break;
        }
        count += 1;
        expected += 1;
    }
    DeviceBlockRange::mapped(geometry.device_block(first), count)
}
