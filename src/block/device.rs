//! 块设备核心类型

use crate::error::{Error, ErrorKind, Result};
use alloc::collections::BTreeMap;
use alloc::string::String;

/// 块设备接口
///
/// 实现此 trait 以提供底层块设备访问。`BlockDev` 负责把文件系统的逻辑块
/// 换算为设备扇区，映射核心只看到逻辑块。
///
/// # 示例
///
/// ```rust,ignore
/// use minfs_core::{BlockDevice, Result};
///
/// struct RamDisk {
///     storage: Vec<u8>,
/// }
///
/// impl BlockDevice for RamDisk {
///     fn block_size(&self) -> u32 { 8192 }
///     fn sector_size(&self) -> u32 { 512 }
///     fn total_blocks(&self) -> u64 { (self.storage.len() / 8192) as u64 }
///
///     fn read_blocks(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize> {
///         // 实现扇区读取
///         Ok(count as usize * 512)
///     }
///
///     fn write_blocks(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<usize> {
///         // 实现扇区写入
///         Ok(count as usize * 512)
///     }
/// }
/// ```
pub trait BlockDevice {
    /// 逻辑块大小
    fn block_size(&self) -> u32;

    /// 物理扇区大小（通常 512）
    fn sector_size(&self) -> u32;

    /// 总块数
    fn total_blocks(&self) -> u64;

    /// 读取扇区
    ///
    /// # 参数
    ///
    /// * `lba` - 起始扇区号
    /// * `count` - 要读取的扇区数
    /// * `buf` - 目标缓冲区（大小至少为 count * sector_size）
    fn read_blocks(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize>;

    /// 写入扇区
    ///
    /// # 参数
    ///
    /// * `lba` - 起始扇区号
    /// * `count` - 要写入的扇区数
    /// * `buf` - 源缓冲区（大小至少为 count * sector_size）
    fn write_blocks(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<usize>;

    /// 刷新设备缓存
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// 附加到块设备上的缓冲区句柄
///
/// 由 [`BlockDev::attach`] 返回，[`BlockDev::detach`] 时归还。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct AttachId(u32);

/// 块设备包装器
///
/// 为映射核心提供块级访问：逻辑块到扇区的换算、可选的 LRU 块缓存、
/// 以及 lazy buffer 的注册表。
///
/// BlockDev 本身不包含内部锁，同一文件的映射操作由调用者串行化。
pub struct BlockDev<D> {
    /// 底层设备
    device: D,
    /// 逻辑读取次数（包括缓存命中）
    read_count: u64,
    /// 逻辑写入次数（包括缓存写入）
    write_count: u64,
    /// 物理读取次数（实际设备操作）
    physical_read_count: u64,
    /// 物理写入次数（实际设备操作）
    physical_write_count: u64,
    /// 已附加的缓冲区
    attached: BTreeMap<AttachId, String>,
    /// 下一个附加 ID
    next_attach_id: u32,
    /// 块缓存（可选）
    pub(super) bcache: Option<crate::cache::BlockCache>,
}

impl<D: BlockDevice> BlockDev<D> {
    /// 创建新的块设备包装器（无缓存）
    pub fn new(device: D) -> Result<Self> {
        let block_size = device.block_size();
        let sector_size = device.sector_size();

        // 验证块大小是扇区大小的整数倍
        if sector_size == 0 || block_size % sector_size != 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Block size must be a multiple of sector size",
            ));
        }

        Ok(Self {
            device,
            read_count: 0,
            write_count: 0,
            physical_read_count: 0,
            physical_write_count: 0,
            attached: BTreeMap::new(),
            next_attach_id: 1,
            bcache: None,
        })
    }

    /// 创建带缓存的块设备包装器
    ///
    /// # 参数
    ///
    /// * `device` - 底层块设备
    /// * `cache_blocks` - 缓存块数量
    pub fn new_with_cache(device: D, cache_blocks: usize) -> Result<Self> {
        let mut bd = Self::new(device)?;
        let block_size = bd.block_size() as usize;
        bd.bcache = Some(crate::cache::BlockCache::new(cache_blocks, block_size)?);
        Ok(bd)
    }

    /// 获取底层设备的引用
    pub fn device(&self) -> &D {
        &self.device
    }

    /// 获取底层设备的可变引用
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// 获取逻辑块大小
    pub fn block_size(&self) -> u32 {
        self.device.block_size()
    }

    /// 获取总块数
    pub fn total_blocks(&self) -> u64 {
        self.device.total_blocks()
    }

    /// 获取逻辑读取次数（包括缓存命中）
    pub fn read_count(&self) -> u64 {
        self.read_count
    }

    /// 获取逻辑写入次数（包括缓存写入）
    pub fn write_count(&self) -> u64 {
        self.write_count
    }

    /// 获取物理读取次数（实际设备操作）
    pub fn physical_read_count(&self) -> u64 {
        self.physical_read_count
    }

    /// 获取物理写入次数（实际设备操作）
    pub fn physical_write_count(&self) -> u64 {
        self.physical_write_count
    }

    /// 注册一个缓冲区
    ///
    /// lazy buffer 在创建时附加，在销毁前必须调用 [`detach`](Self::detach)。
    pub fn attach(&mut self, name: &str) -> Result<AttachId> {
        let id = AttachId(self.next_attach_id);
        self.next_attach_id = self.next_attach_id.checked_add(1).ok_or(Error::new(
            ErrorKind::NoSpace,
            "attach id space exhausted",
        ))?;
        self.attached.insert(id, String::from(name));
        log::debug!("[BDEV] attach {:?} name={}", id, name);
        Ok(id)
    }

    /// 注销缓冲区
    pub fn detach(&mut self, id: AttachId) -> Result<()> {
        match self.attached.remove(&id) {
            Some(name) => {
                log::debug!("[BDEV] detach {:?} name={}", id, name);
                Ok(())
            }
            None => Err(Error::new(
                ErrorKind::InvalidInput,
                "detach of an unknown buffer",
            )),
        }
    }

    /// 当前附加的缓冲区名称
    pub fn attached_names(&self) -> impl Iterator<Item = &str> {
        self.attached.values().map(String::as_str)
    }

    /// 刷新所有脏缓存块并刷新底层设备
    pub fn flush(&mut self) -> Result<usize> {
        let mut written = 0;
        if let Some(cache) = &mut self.bcache {
            let sector_size = self.device.sector_size();
            written = cache.flush_all(&mut self.device, sector_size)?;
            self.physical_write_count += written as u64;
        }
        self.device.flush()?;
        Ok(written)
    }

    // 内部辅助方法

    /// 将逻辑块地址转换为物理扇区地址
    pub(super) fn logical_to_physical(&self, lba: u64) -> u64 {
        let block_size = self.device.block_size() as u64;
        let sector_size = self.device.sector_size() as u64;
        lba * block_size / sector_size
    }

    /// 每个逻辑块包含的物理扇区数
    pub(super) fn sectors_per_block(&self) -> u32 {
        self.device.block_size() / self.device.sector_size()
    }

    /// 增加读计数
    pub(super) fn inc_read_count(&mut self) {
        self.read_count += 1;
    }

    /// 增加写计数
    pub(super) fn inc_write_count(&mut self) {
        self.write_count += 1;
    }

    /// 增加物理读计数
    pub(super) fn inc_physical_read_count(&mut self) {
        self.physical_read_count += 1;
    }

    /// 增加物理写计数
    pub(super) fn inc_physical_write_count(&mut self) {
        self.physical_write_count += 1;
    }
}
