//! Transaction 系统
//!
//! 映射核心只通过 [`PendingWork`] 向事务排队工作：分配/释放数据块、
//! 排队元数据写和数据写。事务由调用者持有，可以跨多个文件批量累积，
//! 核心从不提交或回滚事务。
//!
//! ## 模块结构
//!
//! - `simple` - 简化的事务实现（不使用 journal）
//!
//! ```rust,ignore
//! use minfs_core::transaction::SimpleTransaction;
//!
//! let mut trans = SimpleTransaction::begin(&mut bitmap);
//! vnode.write_block(&mut bdev, &mut trans, 0, &data)?;
//! trans.commit(&mut bdev)?;
//! ```

mod simple;

pub use simple::{SimpleTransaction, TransactionState};

/// 排队操作的类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    /// 写入设备
    Write,
}

/// 一次排队的块操作
///
/// `vmo_offset` 是源缓冲区内的块偏移，`dev_offset` 是目标设备块号，
/// `length` 以块为单位。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    /// 操作类型
    pub kind: OperationType,
    /// 缓冲区内的起始块
    pub vmo_offset: u64,
    /// 设备起始块
    pub dev_offset: u64,
    /// 块数
    pub length: u64,
}

/// 事务接口
///
/// `enqueue_*` 传入的 `buffer` 正好覆盖 `op.length` 个块；
/// 实现必须在返回前复制其内容，调用者随后可以继续修改缓冲区。
pub trait PendingWork {
    /// 分配一个数据块，返回相对于数据区的块指针（非 0）
    fn allocate_block(&mut self) -> crate::Result<u32>;

    /// 释放一个数据块
    fn deallocate_block(&mut self, block: u32);

    /// 排队一次元数据写
    fn enqueue_metadata(&mut self, op: Operation, buffer: &[u8]);

    /// 排队一次数据写
    fn enqueue_data(&mut self, op: Operation, buffer: &[u8]);
}
