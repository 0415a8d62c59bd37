//! 简化的事务系统实现
//!
//! ⚠️ **重要警告**：此实现不提供崩溃恢复保证！
//!
//! ## 工作原理
//!
//! 1. **分配**: 立即在位图中标记，提交前失败则在 drop 时归还
//! 2. **排队**: 记录元数据写和数据写，复制缓冲区内容
//! 3. **释放**: 延迟到提交时生效，避免同一事务内重用刚释放的块
//! 4. **提交**: 先写元数据，再写数据，最后应用释放
//!
//! ## 限制
//!
//! - ❌ 无崩溃恢复保证
//! - ❌ 无原子性保证（部分写入可能发生）

use super::{Operation, PendingWork};
use crate::{
    balloc::BlockBitmap,
    block::{BlockDev, BlockDevice},
    error::{Error, ErrorKind, Result},
};
use alloc::vec::Vec;

/// 排队的写操作及其数据快照
#[derive(Debug, Clone)]
struct QueuedWrite {
    op: Operation,
    data: Vec<u8>,
}

/// 事务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// 事务活跃，可以进行修改
    Active,

    /// 事务已提交
    Committed,

    /// 事务已回滚
    Aborted,
}

/// 简化的事务系统
///
/// ⚠️ 不提供崩溃一致性保证，仅用于开发和测试
pub struct SimpleTransaction<'a> {
    /// 数据块位图
    bitmap: &'a mut BlockBitmap,

    /// 本事务分配的块
    allocated: Vec<u32>,

    /// 待释放的块
    freed: Vec<u32>,

    /// 排队的元数据写
    metadata: Vec<QueuedWrite>,

    /// 排队的数据写
    data: Vec<QueuedWrite>,

    /// 事务状态
    state: TransactionState,
}

impl<'a> SimpleTransaction<'a> {
    /// 开始新事务
    pub fn begin(bitmap: &'a mut BlockBitmap) -> Self {
        Self {
            bitmap,
            allocated: Vec::new(),
            freed: Vec::new(),
            metadata: Vec::new(),
            data: Vec::new(),
            state: TransactionState::Active,
        }
    }

    /// 提交事务
    ///
    /// ⚠️ **注意**：这个实现不提供原子性保证！
    /// 如果在写入过程中失败，已写入的块不会回滚。
    ///
    /// # 参数
    ///
    /// * `bdev` - 目标块设备
    pub fn commit<D: BlockDevice>(mut self, bdev: &mut BlockDev<D>) -> Result<()> {
        let block_size = bdev.block_size() as usize;

        log::debug!(
            "[TXN] commit: {} metadata ops, {} data ops, {} allocated, {} freed",
            self.metadata.len(),
            self.data.len(),
            self.allocated.len(),
            self.freed.len()
        );

        let writes = core::mem::take(&mut self.metadata)
            .into_iter()
            .chain(core::mem::take(&mut self.data));

        for write in writes {
            for i in 0..write.op.length {
                let start = i as usize * block_size;
                let chunk = &write.data[start..start + block_size];
                if let Err(e) = bdev.write_block(write.op.dev_offset + i, chunk) {
                    self.state = TransactionState::Aborted;
                    return Err(Error::with_cause(
                        ErrorKind::Io,
                        "Failed to write block during commit",
                        e,
                    ));
                }
            }
        }

        self.allocated.clear();
        self.state = TransactionState::Committed;

        for block in core::mem::take(&mut self.freed) {
            self.bitmap.free(block)?;
        }
        Ok(())
    }

    /// 回滚事务
    ///
    /// 丢弃排队的写入，归还本事务分配的块。
    pub fn abort(mut self) {
        self.abort_internal();
    }

    fn abort_internal(&mut self) {
        if self.state != TransactionState::Active {
            return;
        }
        for block in self.allocated.drain(..) {
            if let Err(e) = self.bitmap.free(block) {
                log::warn!("[TXN] abort: failed to return block {}: {}", block, e);
            }
        }
        self.freed.clear();
        self.metadata.clear();
        self.data.clear();
        self.state = TransactionState::Aborted;
    }

    /// 获取事务状态
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// 本事务分配的块
    pub fn allocated(&self) -> &[u32] {
        &self.allocated
    }

    /// 待释放的块
    pub fn freed(&self) -> &[u32] {
        &self.freed
    }

    /// 排队的元数据写
    pub fn metadata_ops(&self) -> impl Iterator<Item = &Operation> {
        self.metadata.iter().map(|w| &w.op)
    }

    /// 排队的数据写
    pub fn data_ops(&self) -> impl Iterator<Item = &Operation> {
        self.data.iter().map(|w| &w.op)
    }

    fn queue(op: Operation, buffer: &[u8]) -> QueuedWrite {
        QueuedWrite {
            op,
            data: buffer.to_vec(),
        }
    }
}

impl PendingWork for SimpleTransaction<'_> {
    fn allocate_block(&mut self) -> Result<u32> {
        let block = self.bitmap.allocate()?;
        self.allocated.push(block);
        Ok(block)
    }

    fn deallocate_block(&mut self, block: u32) {
        log::debug!("[TXN] deallocate data block {}", block);
        self.freed.push(block);
    }

    fn enqueue_metadata(&mut self, op: Operation, buffer: &[u8]) {
        log::trace!("[TXN] enqueue metadata {:?}", op);
        self.metadata.push(Self::queue(op, buffer));
    }

    fn enqueue_data(&mut self, op: Operation, buffer: &[u8]) {
        log::trace!("[TXN] enqueue data {:?}", op);
        self.data.push(Self::queue(op, buffer));
    }
}

impl Drop for SimpleTransaction<'_> {
    /// 自动回滚未提交的事务
    fn drop(&mut self) {
        self.abort_internal();
    }
}
