//! 按需加载的块缓冲区

use super::{
    reader::{BlockReader, LazyReader},
    view::{BufferView, Flusher, ViewElement},
};
use crate::{
    block::{AttachId, BlockDev, BlockDevice},
    error::{Error, ErrorKind, Result},
    mapper::Mapper,
    range::{BlockRange, ByteRange},
    transaction::{Operation, OperationType, PendingWork},
};
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;

/// 按需加载的块缓冲区
///
/// 缓冲区按块增长，只有首次访问的块才会从设备读取。
/// 销毁前必须调用 [`LazyBuffer::detach`]，drop 时不做任何 I/O。
#[derive(Debug)]
pub struct LazyBuffer {
    name: String,
    block_size: u32,
    buffer: Vec<u8>,
    reader: LazyReader,
    attach_id: Option<AttachId>,
}

impl LazyBuffer {
    /// 创建缓冲区并在设备上注册
    ///
    /// 初始容量为一个块，且尚未加载任何内容。
    pub fn create<D: BlockDevice>(bdev: &mut BlockDev<D>, name: &str, block_size: u32) -> Result<Self> {
        if block_size == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "zero block size"));
        }
        if block_size != bdev.block_size() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "lazy buffer block size differs from the device",
            ));
        }

        let attach_id = bdev.attach(name)?;
        log::debug!("[LAZY] created buffer '{}' ({} byte blocks)", name, block_size);
        Ok(Self {
            name: name.to_string(),
            block_size,
            buffer: vec![0u8; block_size as usize],
            reader: LazyReader::new(),
            attach_id: Some(attach_id),
        })
    }

    /// 从设备注销
    pub fn detach<D: BlockDevice>(&mut self, bdev: &mut BlockDev<D>) -> Result<()> {
        let Some(id) = self.attach_id.take() else {
            return Err(Error::new(ErrorKind::BadState, "lazy buffer already detached"));
        };
        log::debug!("[LAZY] detaching buffer '{}'", self.name);
        bdev.detach(id)
    }

    /// 缓冲区名字
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 块大小
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// 当前容量（块数）
    pub fn capacity_blocks(&self) -> u64 {
        (self.buffer.len() / self.block_size as usize) as u64
    }

    /// `range` 覆盖的块是否都已加载
    pub fn is_loaded(&self, range: ByteRange) -> bool {
        self.reader.is_loaded(BlockRange::covering(range, self.block_size))
    }

    /// 确保 `range` 已加载
    ///
    /// 已加载的部分不会重新读取。需要时先把缓冲区扩展到
    /// `ceil(range.end / block_size)` 个块。
    pub fn read<R: BlockReader>(&mut self, range: ByteRange, reader: &mut R) -> Result<()> {
        if range.is_empty() {
            return Ok(());
        }

        let blocks = BlockRange::covering(range, self.block_size);
        if self.reader.is_loaded(blocks) {
            return Ok(());
        }

        let required = blocks.end() as usize * self.block_size as usize;
        if self.buffer.len() < required {
            log::trace!("[LAZY] '{}' grows to {} blocks", self.name, blocks.end());
            self.buffer.resize(required, 0);
        }

        let bs = self.block_size as usize;
        for gap in self.reader.missing(blocks) {
            let bytes = &mut self.buffer[gap.start() as usize * bs..gap.end() as usize * bs];
            reader.read(gap, bytes)?;
            self.reader.mark_loaded(gap);
        }
        Ok(())
    }

    /// 只读视图，`range` 必须已加载
    pub fn view<T: ViewElement>(&self, range: ByteRange) -> Result<BufferView<'_, T>> {
        self.check_loaded(range)?;
        let bytes = &self.buffer[range.start() as usize..range.end() as usize];
        Ok(BufferView::read_only(bytes, range))
    }

    /// 可写视图，`range` 必须已加载
    pub fn view_mut<'a, T: ViewElement>(
        &'a mut self,
        range: ByteRange,
        flusher: Flusher<'a>,
    ) -> Result<BufferView<'a, T>> {
        self.check_loaded(range)?;
        let bytes = &mut self.buffer[range.start() as usize..range.end() as usize];
        Ok(BufferView::read_write(bytes, range, flusher))
    }

    fn check_loaded(&self, range: ByteRange) -> Result<()> {
        if range.end() as usize > self.buffer.len() || !self.is_loaded(range) {
            return Err(Error::new(ErrorKind::BadState, "view over bytes that are not loaded"));
        }
        Ok(())
    }

    /// 把 `range` 覆盖的块写回
    ///
    /// 参见 [`LazyBuffer::write_back`]。
    pub fn flush<D, W>(
        &mut self,
        bdev: &mut BlockDev<D>,
        transaction: &mut dyn PendingWork,
        mapper: &mut Mapper<'_>,
        range: ByteRange,
        writer: &mut W,
    ) -> Result<()>
    where
        D: BlockDevice,
        W: FnMut(&mut dyn PendingWork, &[u8], BlockRange, u64) -> Result<()>,
    {
        let blocks = BlockRange::covering(range, self.block_size);
        let aligned = ByteRange::from_blocks(blocks, self.block_size);
        self.check_loaded(aligned)?;

        let bytes = &self.buffer[aligned.start() as usize..aligned.end() as usize];
        Self::write_back(self.block_size, bdev, transaction, mapper, aligned, bytes, writer)
    }

    /// 把块对齐的 `range`（内容为 `bytes`）写回设备
    ///
    /// 逐块调用 `mapper.map_for_write` 取得目标（需要时分配），
    /// 设备上连续的块合并成一段，每段调用一次
    /// `writer(transaction, bytes, block_range, device_block)`。
    /// 最后刷新映射器自己缓存的元数据。
    ///
    /// 第一个错误立即返回，已经写出的段不会回滚。
    pub fn write_back<D, W>(
        block_size: u32,
        bdev: &mut BlockDev<D>,
        transaction: &mut dyn PendingWork,
        mapper: &mut Mapper<'_>,
        range: ByteRange,
        bytes: &[u8],
        writer: &mut W,
    ) -> Result<()>
    where
        D: BlockDevice,
        W: FnMut(&mut dyn PendingWork, &[u8], BlockRange, u64) -> Result<()>,
    {
        let bs = block_size as u64;
        if range.start() % bs != 0 || range.end() % bs != 0 || bytes.len() as u64 != range.len() {
            return Err(Error::new(ErrorKind::InvalidInput, "write back of an unaligned range"));
        }

        let blocks = BlockRange::new(range.start() / bs, range.end() / bs);
        let mut emit = |transaction: &mut dyn PendingWork, start: u64, device: u64, count: u64| {
            let offset = ((start - blocks.start()) * bs) as usize;
            let chunk = &bytes[offset..offset + (count * bs) as usize];
            log::trace!("[LAZY] writing blocks [{}, {}) to device block {}", start, start + count, device);
            writer(transaction, chunk, BlockRange::new(start, start + count), device)
        };

        // (起始块, 设备块, 块数)
        let mut run: Option<(u64, u64, u64)> = None;
        for block in blocks.start()..blocks.end() {
            let (target, _) = mapper.map_for_write(bdev, transaction, BlockRange::new(block, blocks.end()))?;
            run = match run {
                Some((start, device, count)) if device + count == target.block() => {
                    Some((start, device, count + 1))
                }
                Some((start, device, count)) => {
                    emit(transaction, start, device, count)?;
                    Some((block, target.block(), 1))
                }
                None => Some((block, target.block(), 1)),
            };
        }
        if let Some((start, device, count)) = run {
            emit(transaction, start, device, count)?;
        }

        mapper.flush(transaction)
    }

    /// 收缩到 `block_count` 个块
    ///
    /// 从 `block_count` 开始的块都被视为未加载，再次访问会重新从设备读取。
    /// 底层存储只截断不扩展，且至少保留一个块。
    pub fn shrink(&mut self, block_count: u64) {
        self.reader.forget_from(block_count);

        let keep = block_count.max(1);
        let bytes = keep as usize * self.block_size as usize;
        if self.buffer.len() > bytes {
            log::debug!("[LAZY] '{}' shrinks to {} blocks", self.name, keep);
            self.buffer.truncate(bytes);
            self.buffer.shrink_to_fit();
        }
    }
}

impl Drop for LazyBuffer {
    fn drop(&mut self) {
        if self.attach_id.is_some() {
            log::warn!("[LAZY] buffer '{}' dropped while still attached", self.name);
        }
    }
}

/// 把一段块排队为元数据写
///
/// 用作 [`LazyBuffer::flush`] 的 writer：缓冲区内的块号作为
/// `vmo_offset`，目标设备块作为 `dev_offset`。
pub fn enqueue_metadata(
    transaction: &mut dyn PendingWork,
    bytes: &[u8],
    blocks: BlockRange,
    device_block: u64,
) -> Result<()> {
    transaction.enqueue_metadata(
        Operation {
            kind: OperationType::Write,
            vmo_offset: blocks.start(),
            dev_offset: device_block,
            length: blocks.len(),
        },
        bytes,
    );
    Ok(())
}
