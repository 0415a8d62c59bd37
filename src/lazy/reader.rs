//! 按需读取
//!
//! [`LazyReader`] 记录 lazy buffer 中哪些块已经从设备读入，
//! [`BlockReader`] 负责真正把缺失的块读进来。

use crate::{
    block::{BlockDev, BlockDevice},
    error::{Error, ErrorKind, Result},
    mapper::Mapper,
    range::BlockRange,
};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

/// 不相交、不相邻的块区间集合
#[derive(Debug, Default, Clone)]
pub(crate) struct RangeSet {
    /// start -> end
    ranges: BTreeMap<u64, u64>,
}

impl RangeSet {
    /// 并入 `range`，与相邻或重叠的区间合并
    pub(crate) fn insert(&mut self, range: BlockRange) {
        if range.is_empty() {
            return;
        }

        let mut start = range.start();
        let mut end = range.end();
        let touching: Vec<(u64, u64)> = self
            .ranges
            .range(..=end)
            .rev()
            .take_while(|&(_, &e)| e >= start)
            .map(|(&s, &e)| (s, e))
            .collect();
        for (s, e) in touching {
            self.ranges.remove(&s);
            start = start.min(s);
            end = end.max(e);
        }
        self.ranges.insert(start, end);
    }

    /// 去掉 `range` 覆盖的部分
    pub(crate) fn remove(&mut self, range: BlockRange) {
        if range.is_empty() {
            return;
        }

        let overlapping: Vec<(u64, u64)> = self
            .ranges
            .range(..range.end())
            .filter(|&(_, &e)| e > range.start())
            .map(|(&s, &e)| (s, e))
            .collect();
        for (s, e) in overlapping {
            self.ranges.remove(&s);
            if s < range.start() {
                self.ranges.insert(s, range.start());
            }
            if e > range.end() {
                self.ranges.insert(range.end(), e);
            }
        }
    }

    /// `range` 是否被完全覆盖
    pub(crate) fn contains(&self, range: BlockRange) -> bool {
        if range.is_empty() {
            return true;
        }
        self.ranges
            .range(..=range.start())
            .next_back()
            .is_some_and(|(_, &e)| e >= range.end())
    }

    /// `range` 中尚未覆盖的子区间，按起点排序
    pub(crate) fn gaps(&self, range: BlockRange) -> Vec<BlockRange> {
        let mut gaps = Vec::new();
        let mut cursor = range.start();
        for (&s, &e) in self.ranges.range(..range.end()) {
            if e <= cursor {
                continue;
            }
            if s > cursor {
                gaps.push(BlockRange::new(cursor, s));
            }
            cursor = e;
        }
        if cursor < range.end() {
            gaps.push(BlockRange::new(cursor, range.end()));
        }
        gaps
    }
}

/// 已加载区间的记录
#[derive(Debug, Default)]
pub struct LazyReader {
    loaded: RangeSet,
}

impl LazyReader {
    /// 创建空记录
    pub fn new() -> Self {
        Self::default()
    }

    /// `blocks` 是否已全部加载
    pub fn is_loaded(&self, blocks: BlockRange) -> bool {
        self.loaded.contains(blocks)
    }

    pub(crate) fn missing(&self, blocks: BlockRange) -> Vec<BlockRange> {
        self.loaded.gaps(blocks)
    }

    pub(crate) fn mark_loaded(&mut self, blocks: BlockRange) {
        self.loaded.insert(blocks);
    }

    /// 忘记从 `block` 开始的所有加载记录
    pub(crate) fn forget_from(&mut self, block: u64) {
        self.loaded.remove(BlockRange::new(block, u64::MAX));
    }
}

/// 把 lazy buffer 的块读入内存
pub trait BlockReader {
    /// 读取 `blocks`，`buf` 正好覆盖这些块
    fn read(&mut self, blocks: BlockRange, buf: &mut [u8]) -> Result<()>;
}

/// 通过映射器从设备读取，空洞读为全零
pub struct MappedReader<'b, 'm, D> {
    bdev: &'b mut BlockDev<D>,
    mapper: Mapper<'m>,
}

impl<'b, 'm, D: BlockDevice> MappedReader<'b, 'm, D> {
    /// 创建读取器
    pub fn new(bdev: &'b mut BlockDev<D>, mapper: Mapper<'m>) -> Self {
        Self { bdev, mapper }
    }
}

impl<D: BlockDevice> BlockReader for MappedReader<'_, '_, D> {
    fn read(&mut self, blocks: BlockRange, buf: &mut [u8]) -> Result<()> {
        let block_size = self.bdev.block_size() as usize;
        let mut cursor = blocks.start();
        while cursor < blocks.end() {
            let run = self.mapper.map(self.bdev, BlockRange::new(cursor, blocks.end()))?;
            if run.count() == 0 {
                return Err(Error::new(ErrorKind::Corrupted, "mapper returned an empty run"));
            }

            let start = (cursor - blocks.start()) as usize * block_size;
            let chunk = &mut buf[start..start + run.count() as usize * block_size];
            if run.is_mapped() {
                log::trace!("[LAZY] reading {} blocks at {} from device block {}", run.count(), cursor, run.block());
                for (i, block) in chunk.chunks_exact_mut(block_size).enumerate() {
                    self.bdev.read_block(run.block() + i as u64, block)?;
                }
            } else {
                chunk.fill(0);
            }
            cursor += run.count();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use crate::inode::Inode;
    use crate::mapper::{IndirectMapper, PinnedTables};
    use crate::test_utils::MockDevice;
    use alloc::vec;

    fn r(start: u64, end: u64) -> BlockRange {
        BlockRange::new(start, end)
    }

    #[test]
    fn test_range_set_merges() {
        let mut set = RangeSet::default();
        set.insert(r(0, 2));
        set.insert(r(4, 6));
        assert!(!set.contains(r(0, 6)));
        assert_eq!(set.gaps(r(0, 8)), vec![r(2, 4), r(6, 8)]);

        set.insert(r(2, 4));
        assert!(set.contains(r(0, 6)));
        assert_eq!(set.ranges.len(), 1);
    }

    #[test]
    fn test_range_set_remove_splits() {
        let mut set = RangeSet::default();
        set.insert(r(0, 10));
        set.remove(r(3, 5));
        assert!(set.contains(r(0, 3)));
        assert!(set.contains(r(5, 10)));
        assert_eq!(set.gaps(r(0, 10)), vec![r(3, 5)]);

        set.remove(r(1, u64::MAX));
        assert_eq!(set.gaps(r(0, 4)), vec![r(1, 4)]);
    }

    #[test]
    fn test_mapped_reader_zero_fills_holes() {
        let mut bdev = BlockDev::new(MockDevice::new(64, 512)).unwrap();
        bdev.write_block(4 + 17, &[0xAB; 512]).unwrap();

        let g = Geometry::new(512, 4).unwrap();
        let mut inode = Inode::default();
        inode.inum[1] = 17;
        let mut pinned = PinnedTables::new();
        let mapper = Mapper::Indirect(IndirectMapper::new(g, &mut inode, &mut pinned));

        let mut buf = vec![0xFFu8; 3 * 512];
        MappedReader::new(&mut bdev, mapper).read(r(0, 3), &mut buf).unwrap();
        assert!(buf[..512].iter().all(|&b| b == 0));
        assert!(buf[512..1024].iter().all(|&b| b == 0xAB));
        assert!(buf[1024..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_mapped_reader_propagates_io_error() {
        let mut device = MockDevice::new(64, 512);
        device.fail_reads_at = Some(4 + 17);
        let mut bdev = BlockDev::new(device).unwrap();

        let g = Geometry::new(512, 4).unwrap();
        let mut inode = Inode::default();
        inode.inum[0] = 17;
        let mut pinned = PinnedTables::new();
        let mapper = Mapper::Indirect(IndirectMapper::new(g, &mut inode, &mut pinned));

        let mut buf = vec![0u8; 512];
        let err = MappedReader::new(&mut bdev, mapper).read(r(0, 1), &mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
