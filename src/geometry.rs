//! 文件块地址空间几何参数
//!
//! 每个间接表的条目数 N_e 由块大小推导（`block_size / 4`），
//! 其余指针数量是磁盘格式常量。

use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};

/// 地址空间几何参数
///
/// 文件块索引空间划分为三个连续区域：
///
/// ```text
/// [0, N₁)                               直接块
/// [N₁, N₁ + N₂·N_e)                     一级间接
/// [N₁ + N₂·N_e, N₁ + N₂·N_e + N₃·N_e²)  二级间接
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// 逻辑块大小（字节）
    block_size: u32,
    /// 每个间接表的条目数 (N_e = block_size / 4)
    entries_per_table: u64,
    /// 数据区在设备上的起始块号
    dat_block_offset: u64,
}

impl Geometry {
    /// 创建几何参数
    ///
    /// # 参数
    ///
    /// * `block_size` - 文件系统块大小，必须是 4 的倍数且不小于 64
    /// * `dat_block_offset` - 数据区起始设备块号
    pub fn new(block_size: u32, dat_block_offset: u64) -> Result<Self> {
        if block_size < 64 || block_size as usize % BLOCK_POINTER_SIZE != 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "block size must be a multiple of the pointer size",
            ));
        }

        Ok(Self {
            block_size,
            entries_per_table: (block_size as usize / BLOCK_POINTER_SIZE) as u64,
            dat_block_offset,
        })
    }

    /// 逻辑块大小
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// 每个间接表的条目数
    pub fn entries_per_table(&self) -> u64 {
        self.entries_per_table
    }

    /// 数据区起始设备块号
    pub fn dat_block_offset(&self) -> u64 {
        self.dat_block_offset
    }

    /// 将相对块指针转换为设备块号
    pub fn device_block(&self, pointer: u32) -> u64 {
        self.dat_block_offset + pointer as u64
    }

    /// 一级间接区域的起始文件块
    pub fn indirect_start(&self) -> u64 {
        MINFS_DIRECT as u64
    }

    /// 二级间接区域的起始文件块
    pub fn doubly_indirect_start(&self) -> u64 {
        self.indirect_start() + MINFS_INDIRECT as u64 * self.entries_per_table
    }

    /// 文件可寻址的最大块数 (`N₁ + N₂·N_e + N₃·N_e²`)
    pub fn max_blocks(&self) -> u64 {
        self.doubly_indirect_start()
            + MINFS_DOUBLY_INDIRECT as u64 * self.entries_per_table * self.entries_per_table
    }

    /// 间接指针空间中第一个二级间接子表的索引 (`N₂ + N₃`)
    pub fn doubly_children_start(&self) -> u64 {
        (MINFS_INDIRECT + MINFS_DOUBLY_INDIRECT) as u64
    }

    /// 间接指针空间的大小 (`N₂ + N₃ + N₃·N_e`)
    ///
    /// 该空间中的索引同时也是对应间接表在 lazy 间接文件中的虚拟块号。
    pub fn indirect_pointer_count(&self) -> u64 {
        self.doubly_children_start() + MINFS_DOUBLY_INDIRECT as u64 * self.entries_per_table
    }
}

impl Default for Geometry {
    fn default() -> Self {
        let entries = (MINFS_BLOCK_SIZE as usize / BLOCK_POINTER_SIZE) as u64;
        Self {
            block_size: MINFS_BLOCK_SIZE,
            entries_per_table: entries,
            dat_block_offset: 0,
        }
    }
}
