//! Inode 中的块指针
//!
//! 映射核心只关心 inode 的三组常驻指针数组和块计数。
//! inode 本身由调用者持有和持久化。

use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};
use byteorder::{ByteOrder, LittleEndian};

/// inode 的块指针部分
///
/// 所有指针都是相对于数据区的块号，0 表示空洞。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    /// 已分配块数（数据块与间接表块）
    pub block_count: u32,
    /// 直接块指针
    pub dnum: [u32; MINFS_DIRECT],
    /// 一级间接表指针
    pub inum: [u32; MINFS_INDIRECT],
    /// 二级间接表指针
    pub dinum: [u32; MINFS_DOUBLY_INDIRECT],
}

impl Default for Inode {
    fn default() -> Self {
        Self {
            block_count: 0,
            dnum: [0; MINFS_DIRECT],
            inum: [0; MINFS_INDIRECT],
            dinum: [0; MINFS_DOUBLY_INDIRECT],
        }
    }
}

impl Inode {
    /// 从小端编码解析
    ///
    /// 布局：`block_count`，`dnum[N₁]`，`inum[N₂]`，`dinum[N₃]`
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < MINFS_INODE_SIZE {
            return Err(Error::new(ErrorKind::InvalidInput, "inode buffer too small"));
        }

        let mut inode = Self {
            block_count: LittleEndian::read_u32(&buf[0..4]),
            ..Self::default()
        };
        let mut offset = 4;
        for slots in [&mut inode.dnum[..], &mut inode.inum[..], &mut inode.dinum[..]] {
            let end = offset + slots.len() * BLOCK_POINTER_SIZE;
            LittleEndian::read_u32_into(&buf[offset..end], slots);
            offset = end;
        }
        Ok(inode)
    }

    /// 编码为小端字节
    pub fn encode(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < MINFS_INODE_SIZE {
            return Err(Error::new(ErrorKind::InvalidInput, "inode buffer too small"));
        }

        LittleEndian::write_u32(&mut buf[0..4], self.block_count);
        let mut offset = 4;
        for slots in [&self.dnum[..], &self.inum[..], &self.dinum[..]] {
            let end = offset + slots.len() * BLOCK_POINTER_SIZE;
            LittleEndian::write_u32_into(slots, &mut buf[offset..end]);
            offset = end;
        }
        Ok(())
    }
}
