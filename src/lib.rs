//! minfs_core: minfs 文件块地址转换核心
//!
//! 给定文件的逻辑块号，经由直接/一级间接/二级间接三级指针解析（写入时分配）
//! 对应的设备块。间接表按需加载到 lazy buffer，修改通过调用者持有的
//! 事务排队写回。
//!
//! # 示例
//!
//! ```rust,ignore
//! use minfs_core::{BlockBitmap, BlockDev, Geometry, Inode, SimpleTransaction, Vnode};
//!
//! let mut bdev = BlockDev::new(my_device)?;
//! let geometry = Geometry::new(8192, dat_block_offset)?;
//! let mut vnode = Vnode::open(&mut bdev, geometry, ino, inode)?;
//!
//! let mut trans = SimpleTransaction::begin(&mut bitmap);
//! vnode.write_block(&mut bdev, &mut trans, 42, &data)?;
//! trans.commit(&mut bdev)?;
//!
//! let inode = vnode.close(&mut bdev)?;
//! ```
//!
//! # 模块结构
//!
//! - [`error`] - 错误类型定义
//! - [`block`] - 块设备抽象和 I/O 操作
//! - [`cache`] - 块缓存
//! - [`mapper`] - 间接指针映射器和文件块映射器
//! - [`lazy`] - 按需加载的间接表缓冲区
//! - [`iterator`] - 文件块游标
//! - [`vnode`] - 文件的映射状态

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

// ===== 核心模块 =====

/// 错误处理
pub mod error;

/// 块设备抽象
pub mod block;

/// 常量定义
pub mod consts;

/// 文件系统几何参数
pub mod geometry;

/// 区间类型
pub mod range;

/// Inode 块指针
pub mod inode;

/// 块缓存
pub mod cache;

/// 块分配
pub mod balloc;

/// Transaction 系统
pub mod transaction;

/// 块映射器
pub mod mapper;

/// 间接表按需缓存
pub mod lazy;

/// 文件块游标
pub mod iterator;

/// 文件对象
pub mod vnode;

#[cfg(test)]
mod test_utils;

// ===== 公共导出 =====

// 错误处理
pub use error::{Error, ErrorKind, Result};

// 块设备
pub use block::{AttachId, BlockDev, BlockDevice};

// 几何参数与区间
pub use geometry::Geometry;
pub use range::{BlockRange, ByteRange, DeviceBlockRange};

// Inode
pub use inode::Inode;

// Cache
pub use cache::{BlockCache, CacheBuffer, CacheFlags, CacheStats};

// 块分配
pub use balloc::BlockBitmap;

// Transaction
pub use transaction::{Operation, OperationType, PendingWork, SimpleTransaction, TransactionState};

// 映射
pub use mapper::{FileMapper, IndirectMapper, Mapper, PinnedTables};
pub use lazy::{BlockReader, BufferView, LazyBuffer, LazyReader, MappedReader, ViewElement};
pub use iterator::BlockIterator;
pub use vnode::Vnode;
