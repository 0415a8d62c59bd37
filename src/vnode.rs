//! 内存中的文件对象
//!
//! 每个文件独占一组映射状态：inode 的块指针、lazy 间接文件和常驻的
//! 二级间接表。映射器和游标都是从这里借出的短期视图。

use crate::{
    block::{BlockDev, BlockDevice},
    error::{Error, ErrorKind, Result},
    geometry::Geometry,
    inode::Inode,
    iterator::BlockIterator,
    lazy::LazyBuffer,
    mapper::{FileMapper, IndirectMapper, PinnedTables},
    range::BlockRange,
    transaction::{Operation, OperationType, PendingWork},
};
use alloc::format;

/// 文件的映射状态
///
/// 关闭前必须调用 [`Vnode::close`]，把 lazy 间接文件从设备注销。
#[derive(Debug)]
pub struct Vnode {
    ino: u32,
    geometry: Geometry,
    inode: Inode,
    indirect_file: LazyBuffer,
    pinned: PinnedTables,
}

impl Vnode {
    /// 打开文件
    ///
    /// # 参数
    ///
    /// * `bdev` - 块设备，块大小必须与 `geometry` 一致
    /// * `geometry` - 文件系统几何参数
    /// * `ino` - inode 编号，用于命名间接文件
    /// * `inode` - 已从磁盘解析的 inode
    pub fn open<D: BlockDevice>(
        bdev: &mut BlockDev<D>,
        geometry: Geometry,
        ino: u32,
        inode: Inode,
    ) -> Result<Self> {
        if bdev.block_size() != geometry.block_size() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "device block size does not match the filesystem",
            ));
        }

        let name = format!("indirect-{}", ino);
        let indirect_file = LazyBuffer::create(bdev, &name, geometry.block_size())?;
        Ok(Self {
            ino,
            geometry,
            inode,
            indirect_file,
            pinned: PinnedTables::new(),
        })
    }

    /// 关闭文件，返回（可能已修改的）inode 供调用者持久化
    pub fn close<D: BlockDevice>(mut self, bdev: &mut BlockDev<D>) -> Result<Inode> {
        self.indirect_file.detach(bdev)?;
        Ok(self.inode)
    }

    /// inode 编号
    pub fn ino(&self) -> u32 {
        self.ino
    }

    /// 几何参数
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// inode 的块指针
    pub fn inode(&self) -> &Inode {
        &self.inode
    }

    /// inode 的块指针（可变）
    pub fn inode_mut(&mut self) -> &mut Inode {
        &mut self.inode
    }

    /// 文件块映射器
    pub fn file_mapper(&mut self) -> FileMapper<'_> {
        FileMapper::new(
            self.geometry,
            &mut self.inode,
            &mut self.pinned,
            &mut self.indirect_file,
        )
    }

    /// 间接指针映射器
    pub fn indirect_mapper(&mut self) -> IndirectMapper<'_> {
        IndirectMapper::new(self.geometry, &mut self.inode, &mut self.pinned)
    }

    /// 在 `start` 处创建游标
    pub fn iterator<'s, D: BlockDevice>(
        &'s mut self,
        bdev: &'s mut BlockDev<D>,
        transaction: Option<&'s mut dyn PendingWork>,
        start: u64,
    ) -> Result<BlockIterator<'s, D>> {
        BlockIterator::init(self.file_mapper(), bdev, transaction, start)
    }

    /// 丢弃从第 `blocks` 个表开始缓存的间接表
    ///
    /// 之后访问这些表会重新从设备读取。
    pub fn shrink_indirect(&mut self, blocks: u64) {
        self.indirect_file.shrink(blocks);
    }

    /// 读取文件块 `fb`，空洞读为全零
    pub fn read_block<D: BlockDevice>(&mut self, bdev: &mut BlockDev<D>, fb: u64, buf: &mut [u8]) -> Result<()> {
        let block_size = self.geometry.block_size() as usize;
        if buf.len() < block_size {
            return Err(Error::new(ErrorKind::InvalidInput, "buffer too small for block"));
        }

        let run = self.file_mapper().map(bdev, BlockRange::new(fb, fb + 1))?;
        if run.is_mapped() {
            bdev.read_block(run.block(), buf)
        } else {
            buf[..block_size].fill(0);
            Ok(())
        }
    }

    /// 写入文件块 `fb`
    ///
    /// 需要时分配数据块（以及途经的间接表），数据作为事务的数据写排队。
    /// 返回是否分配了新的数据块。
    pub fn write_block<D: BlockDevice>(
        &mut self,
        bdev: &mut BlockDev<D>,
        transaction: &mut dyn PendingWork,
        fb: u64,
        data: &[u8],
    ) -> Result<bool> {
        let block_size = self.geometry.block_size() as usize;
        if data.len() != block_size {
            return Err(Error::new(ErrorKind::InvalidInput, "data must be exactly one block"));
        }

        let (run, allocated) = self
            .file_mapper()
            .map_for_write(bdev, transaction, BlockRange::new(fb, fb + 1))?;
        transaction.enqueue_data(
            Operation {
                kind: OperationType::Write,
                vmo_offset: fb,
                dev_offset: run.block(),
                length: 1,
            },
            data,
        );
        Ok(allocated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balloc::BlockBitmap;
    use crate::test_utils::MockDevice;
    use crate::transaction::SimpleTransaction;
    use alloc::vec;

    const DAT: u64 = 8;

    fn setup() -> (BlockDev<MockDevice>, Geometry, BlockBitmap) {
        let bdev = BlockDev::new(MockDevice::new(512, 512)).unwrap();
        (bdev, Geometry::new(512, DAT).unwrap(), BlockBitmap::new(64))
    }

    fn reopen(vnode: Vnode, bdev: &mut BlockDev<MockDevice>) -> Vnode {
        let geometry = *vnode.geometry();
        let ino = vnode.ino();
        let inode = vnode.close(bdev).unwrap();
        Vnode::open(bdev, geometry, ino, inode).unwrap()
    }

    #[test]
    fn test_open_checks_block_size() {
        let mut bdev = BlockDev::new(MockDevice::new(16, 1024)).unwrap();
        let g = Geometry::new(512, 0).unwrap();
        let err = Vnode::open(&mut bdev, g, 1, Inode::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_open_attaches_indirect_file() {
        let (mut bdev, g, _) = setup();
        let vnode = Vnode::open(&mut bdev, g, 7, Inode::default()).unwrap();
        assert_eq!(bdev.attached_names().collect::<vec::Vec<_>>(), ["indirect-7"]);
        vnode.close(&mut bdev).unwrap();
        assert_eq!(bdev.attached_names().count(), 0);
    }

    #[test]
    fn test_write_then_read_blocks() {
        let (mut bdev, g, mut bitmap) = setup();
        let mut vnode = Vnode::open(&mut bdev, g, 1, Inode::default()).unwrap();
        let fbs = [0u64, 20, g.doubly_indirect_start() + 3];

        let mut trans = SimpleTransaction::begin(&mut bitmap);
        for (i, &fb) in fbs.iter().enumerate() {
            let data = vec![i as u8 + 1; 512];
            assert!(vnode.write_block(&mut bdev, &mut trans, fb, &data).unwrap());
        }
        assert!(!vnode.write_block(&mut bdev, &mut trans, 0, &[1u8; 512]).unwrap());
        trans.commit(&mut bdev).unwrap();

        let mut vnode = reopen(vnode, &mut bdev);
        let mut buf = vec![0xFFu8; 512];
        for (i, &fb) in fbs.iter().enumerate() {
            vnode.read_block(&mut bdev, fb, &mut buf).unwrap();
            assert!(buf.iter().all(|&b| b == i as u8 + 1));
        }
        vnode.read_block(&mut bdev, 21, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
        vnode.close(&mut bdev).unwrap();
    }

    #[test]
    fn test_set_blk_round_trip_in_every_zone() {
        let (mut bdev, g, mut bitmap) = setup();
        let mut vnode = Vnode::open(&mut bdev, g, 1, Inode::default()).unwrap();
        let cases = [(3u64, 100u32), (16 + 5, 101), (g.doubly_indirect_start() + 130, 102)];

        let mut trans = SimpleTransaction::begin(&mut bitmap);
        {
            let mut it = vnode.iterator(&mut bdev, Some(&mut trans), cases[0].0).unwrap();
            for &(fb, value) in &cases {
                it.advance(fb - it.file_block()).unwrap();
                it.set_blk(value).unwrap();
                assert_eq!(it.blk(), value);
            }
            it.flush().unwrap();
        }
        trans.commit(&mut bdev).unwrap();

        let mut vnode = reopen(vnode, &mut bdev);
        for &(fb, value) in &cases {
            let it = vnode.iterator(&mut bdev, None, fb).unwrap();
            assert_eq!(it.blk(), value);
        }
        vnode.close(&mut bdev).unwrap();
    }

    #[test]
    fn test_iterator_requires_transaction_to_modify() {
        let (mut bdev, g, _) = setup();
        let mut vnode = Vnode::open(&mut bdev, g, 1, Inode::default()).unwrap();
        {
            let mut it = vnode.iterator(&mut bdev, None, 0).unwrap();
            assert_eq!(it.set_blk(5).unwrap_err().kind(), ErrorKind::NotSupported);
            assert_eq!(it.flush().unwrap_err().kind(), ErrorKind::NotSupported);
        }
        vnode.close(&mut bdev).unwrap();
    }

    #[test]
    fn test_iterator_bounds() {
        let (mut bdev, g, mut bitmap) = setup();
        let max = g.max_blocks();
        let mut vnode = Vnode::open(&mut bdev, g, 1, Inode::default()).unwrap();

        let Err(err) = vnode.iterator(&mut bdev, None, max) else {
            panic!("iterator at max_blocks should fail");
        };
        assert_eq!(err.kind(), ErrorKind::OutOfRange);

        let mut trans = SimpleTransaction::begin(&mut bitmap);
        {
            let mut it = vnode.iterator(&mut bdev, Some(&mut trans), max - 1).unwrap();
            assert_eq!(it.advance(2).unwrap_err().kind(), ErrorKind::BadState);
            it.advance(1).unwrap();
            assert_eq!(it.file_block(), max);
            assert_eq!(it.blk(), 0);
            assert_eq!(it.contiguous_block_count(None).unwrap(), 0);
            assert_eq!(it.set_blk(1).unwrap_err().kind(), ErrorKind::BadState);
            assert_eq!(it.advance(1).unwrap_err().kind(), ErrorKind::BadState);
        }
        drop(trans);
        vnode.close(&mut bdev).unwrap();
    }

    #[test]
    fn test_contiguous_block_count_crosses_zones() {
        let (mut bdev, g, mut bitmap) = setup();
        let mut vnode = Vnode::open(&mut bdev, g, 1, Inode::default()).unwrap();

        // 分配顺序：fb14→1, fb15→2, fb16→3（表 0 存储→4）, fb17→5
        let mut trans = SimpleTransaction::begin(&mut bitmap);
        for fb in 14..18 {
            vnode.write_block(&mut bdev, &mut trans, fb, &[0u8; 512]).unwrap();
        }
        trans.commit(&mut bdev).unwrap();
        assert_eq!(vnode.inode().inum[0], 4);

        let mut it = vnode.iterator(&mut bdev, None, 14).unwrap();
        assert_eq!(it.contiguous_block_count(None).unwrap(), 3);
        assert_eq!(it.contiguous_block_count(Some(2)).unwrap(), 2);

        it.advance(3).unwrap();
        assert_eq!(it.blk(), 5);
        assert_eq!(it.contiguous_block_count(None).unwrap(), 1);

        it.advance(1).unwrap();
        assert_eq!(it.blk(), 0);
        assert_eq!(it.contiguous_block_count(Some(500)).unwrap(), 500);
        assert_eq!(it.contiguous_block_count(None).unwrap(), g.max_blocks() - 18);
        drop(it);
        vnode.close(&mut bdev).unwrap();
    }

    /// 写入 fb 16、17（同在一级间接表 0 中）并提交
    fn vnode_with_two_indirect_blocks(bdev: &mut BlockDev<MockDevice>, g: Geometry, bitmap: &mut BlockBitmap) -> Vnode {
        let mut vnode = Vnode::open(bdev, g, 1, Inode::default()).unwrap();
        let mut trans = SimpleTransaction::begin(bitmap);
        vnode.write_block(bdev, &mut trans, 16, &[1u8; 512]).unwrap();
        vnode.write_block(bdev, &mut trans, 17, &[2u8; 512]).unwrap();
        trans.commit(bdev).unwrap();
        assert_eq!(vnode.inode().block_count, 3);
        vnode
    }

    #[test]
    fn test_advance_releases_cleared_table() {
        let (mut bdev, g, mut bitmap) = setup();
        let mut vnode = vnode_with_two_indirect_blocks(&mut bdev, g, &mut bitmap);
        let table = vnode.inode().inum[0];

        let mut trans = SimpleTransaction::begin(&mut bitmap);
        {
            let mut it = vnode.iterator(&mut bdev, Some(&mut trans), 16).unwrap();
            it.set_blk(0).unwrap();
            it.advance(1).unwrap();
            it.set_blk(0).unwrap();
            it.advance(127).unwrap();
            assert_eq!(it.file_block(), 144);
            it.flush().unwrap();
        }
        assert_eq!(trans.freed(), [table]);
        assert_eq!(trans.metadata_ops().count(), 0);
        assert_eq!(vnode.inode().inum[0], 0);
        assert_eq!(vnode.inode().block_count, 2);
        trans.commit(&mut bdev).unwrap();
        assert!(!bitmap.is_allocated(table));

        let mut vnode = reopen(vnode, &mut bdev);
        let mut buf = vec![0xFFu8; 512];
        vnode.read_block(&mut bdev, 17, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
        vnode.close(&mut bdev).unwrap();
    }

    #[test]
    fn test_advance_keeps_table_with_live_entries() {
        let (mut bdev, g, mut bitmap) = setup();
        let mut vnode = vnode_with_two_indirect_blocks(&mut bdev, g, &mut bitmap);
        let table = vnode.inode().inum[0];

        let mut trans = SimpleTransaction::begin(&mut bitmap);
        {
            let mut it = vnode.iterator(&mut bdev, Some(&mut trans), 16).unwrap();
            it.set_blk(0).unwrap();
            it.advance(128).unwrap();
            it.flush().unwrap();
        }
        assert!(trans.freed().is_empty());
        assert_eq!(vnode.inode().inum[0], table);
        trans.commit(&mut bdev).unwrap();
        assert_eq!(bdev.device().pointer(DAT + table as u64, 0), 0);
        assert_ne!(bdev.device().pointer(DAT + table as u64, 1), 0);
        vnode.close(&mut bdev).unwrap();
    }

    #[test]
    fn test_advance_releases_doubly_indirect_chain() {
        let (mut bdev, g, mut bitmap) = setup();
        let d = g.doubly_indirect_start();
        let mut vnode = Vnode::open(&mut bdev, g, 1, Inode::default()).unwrap();

        let mut trans = SimpleTransaction::begin(&mut bitmap);
        vnode.write_block(&mut bdev, &mut trans, d, &[9u8; 512]).unwrap();
        trans.commit(&mut bdev).unwrap();
        let doubly = vnode.inode().dinum[0];
        let child = bdev.device().pointer(DAT + doubly as u64, 0);
        assert_eq!(vnode.inode().block_count, 3);

        let mut trans = SimpleTransaction::begin(&mut bitmap);
        {
            let mut it = vnode.iterator(&mut bdev, Some(&mut trans), d).unwrap();
            it.set_blk(0).unwrap();
            it.advance(g.max_blocks() - d).unwrap();
            it.flush().unwrap();
        }
        assert_eq!(trans.freed(), [child, doubly]);
        assert_eq!(vnode.inode().dinum[0], 0);
        assert_eq!(vnode.inode().block_count, 1);
        trans.commit(&mut bdev).unwrap();
        vnode.close(&mut bdev).unwrap();
    }

    #[test]
    fn test_advance_keeps_doubly_indirect_with_live_child() {
        let (mut bdev, g, mut bitmap) = setup();
        let d = g.doubly_indirect_start();
        let ne = g.entries_per_table();
        let mut vnode = Vnode::open(&mut bdev, g, 1, Inode::default()).unwrap();

        // 二级间接表下两张子表各有一项
        let mut trans = SimpleTransaction::begin(&mut bitmap);
        vnode.write_block(&mut bdev, &mut trans, d, &[1u8; 512]).unwrap();
        vnode.write_block(&mut bdev, &mut trans, d + ne, &[2u8; 512]).unwrap();
        trans.commit(&mut bdev).unwrap();
        let doubly = vnode.inode().dinum[0];
        let first = bdev.device().pointer(DAT + doubly as u64, 0);
        let second = bdev.device().pointer(DAT + doubly as u64, 1);
        assert_ne!(second, 0);
        assert_eq!(vnode.inode().block_count, 5);

        let mut trans = SimpleTransaction::begin(&mut bitmap);
        {
            let mut it = vnode.iterator(&mut bdev, Some(&mut trans), d).unwrap();
            it.set_blk(0).unwrap();
            it.advance(ne).unwrap();
            assert_ne!(it.blk(), 0);
            it.flush().unwrap();
        }
        assert_eq!(trans.freed(), [first]);
        assert_eq!(vnode.inode().dinum[0], doubly);
        assert_eq!(vnode.inode().block_count, 4);

        // 清空的子表指针随二级间接表写回
        let ops: vec::Vec<_> = trans.metadata_ops().copied().collect();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].dev_offset, DAT + doubly as u64);
        trans.commit(&mut bdev).unwrap();
        assert_eq!(bdev.device().pointer(DAT + doubly as u64, 0), 0);
        assert_eq!(bdev.device().pointer(DAT + doubly as u64, 1), second);

        let mut vnode = reopen(vnode, &mut bdev);
        let mut buf = vec![0u8; 512];
        vnode.read_block(&mut bdev, d + ne, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 2));
        vnode.close(&mut bdev).unwrap();
    }

    #[test]
    fn test_shrink_forces_fresh_read() {
        let (mut bdev, g, mut bitmap) = setup();
        let mut vnode = vnode_with_two_indirect_blocks(&mut bdev, g, &mut bitmap);
        let mut buf = vec![0u8; 512];

        vnode.shrink_indirect(0);
        let before = bdev.physical_read_count();
        vnode.read_block(&mut bdev, 16, &mut buf).unwrap();
        // 表一次，数据一次
        assert_eq!(bdev.physical_read_count(), before + 2);

        vnode.read_block(&mut bdev, 17, &mut buf).unwrap();
        assert_eq!(bdev.physical_read_count(), before + 3);

        vnode.shrink_indirect(0);
        vnode.read_block(&mut bdev, 17, &mut buf).unwrap();
        assert_eq!(bdev.physical_read_count(), before + 5);
        assert!(buf.iter().all(|&b| b == 2));
        vnode.close(&mut bdev).unwrap();
    }
}
