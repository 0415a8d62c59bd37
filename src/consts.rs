//! 磁盘格式常量定义
//!
//! 这些值由磁盘格式版本固定，不可在运行时修改。
//! 每个间接表的条目数 N_e 由块大小决定，见 [`Geometry`](crate::Geometry)。

//=============================================================================
// 基础常量
//=============================================================================

/// 默认逻辑块大小（8192 字节）
pub const MINFS_BLOCK_SIZE: u32 = 8192;

/// 块指针大小（字节），磁盘上为小端 u32
pub const BLOCK_POINTER_SIZE: usize = 4;

//=============================================================================
// Inode 指针布局
//=============================================================================

/// inode 中直接块指针数量 (N₁)
pub const MINFS_DIRECT: usize = 16;

/// inode 中一级间接表指针数量 (N₂)
pub const MINFS_INDIRECT: usize = 31;

/// inode 中二级间接表指针数量 (N₃)
pub const MINFS_DOUBLY_INDIRECT: usize = 1;

/// inode 磁盘编码大小（字节）
///
/// `block_count` + 三组指针数组
pub const MINFS_INODE_SIZE: usize =
    4 + (MINFS_DIRECT + MINFS_INDIRECT + MINFS_DOUBLY_INDIRECT) * BLOCK_POINTER_SIZE;

//=============================================================================
// 数据块分配
//=============================================================================

/// 保留的数据块号，指针值 0 表示空洞
pub const RESERVED_DATA_BLOCK: u32 = 0;
