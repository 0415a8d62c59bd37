//! 类型化的缓冲区视图

use crate::{
    error::{Error, ErrorKind, Result},
    range::ByteRange,
};
use alloc::boxed::Box;
use byteorder::{ByteOrder, LittleEndian};
use core::marker::PhantomData;

/// 视图刷新回调
///
/// 参数是视图覆盖的字节范围（在 lazy buffer 内的偏移）和当前内容。
pub type Flusher<'a> = Box<dyn FnMut(ByteRange, &[u8]) -> Result<()> + 'a>;

/// 可以按固定宽度小端编码存放在视图中的元素
pub trait ViewElement: Copy {
    /// 编码后的字节数
    const SIZE: usize;

    /// 从 `SIZE` 个字节解码
    fn decode(bytes: &[u8]) -> Self;

    /// 编码到 `SIZE` 个字节
    fn encode(self, bytes: &mut [u8]);
}

impl ViewElement for u32 {
    const SIZE: usize = 4;

    fn decode(bytes: &[u8]) -> Self {
        LittleEndian::read_u32(bytes)
    }

    fn encode(self, bytes: &mut [u8]) {
        LittleEndian::write_u32(bytes, self)
    }
}

impl ViewElement for u64 {
    const SIZE: usize = 8;

    fn decode(bytes: &[u8]) -> Self {
        LittleEndian::read_u64(bytes)
    }

    fn encode(self, bytes: &mut [u8]) {
        LittleEndian::write_u64(bytes, self)
    }
}

enum Bytes<'a> {
    Shared(&'a [u8]),
    Exclusive(&'a mut [u8]),
}

impl Bytes<'_> {
    fn as_slice(&self) -> &[u8] {
        match self {
            Bytes::Shared(b) => b,
            Bytes::Exclusive(b) => b,
        }
    }
}

/// lazy buffer 某段字节上的 `T` 数组视图
///
/// 可写视图带一个脏标记和刷新回调。[`BufferView::flush`] 先清除脏标记
/// 再调用回调，回调运行期间的修改会被下一次 flush 捕获。
pub struct BufferView<'a, T: ViewElement> {
    bytes: Bytes<'a>,
    range: ByteRange,
    dirty: bool,
    flusher: Option<Flusher<'a>>,
    _marker: PhantomData<T>,
}

impl<'a, T: ViewElement> BufferView<'a, T> {
    pub(crate) fn read_only(bytes: &'a [u8], range: ByteRange) -> Self {
        Self {
            bytes: Bytes::Shared(bytes),
            range,
            dirty: false,
            flusher: None,
            _marker: PhantomData,
        }
    }

    pub(crate) fn read_write(bytes: &'a mut [u8], range: ByteRange, flusher: Flusher<'a>) -> Self {
        Self {
            bytes: Bytes::Exclusive(bytes),
            range,
            dirty: false,
            flusher: Some(flusher),
            _marker: PhantomData,
        }
    }

    /// 元素个数
    pub fn len(&self) -> usize {
        self.bytes.as_slice().len() / T::SIZE
    }

    /// 是否为空视图
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 视图覆盖的字节范围
    pub fn range(&self) -> ByteRange {
        self.range
    }

    /// 是否有未刷新的修改
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// 读取第 `index` 个元素
    ///
    /// # Panics
    ///
    /// `index >= len()` 时 panic
    pub fn get(&self, index: usize) -> T {
        assert!(index < self.len(), "view index {} out of bounds", index);
        let offset = index * T::SIZE;
        T::decode(&self.bytes.as_slice()[offset..offset + T::SIZE])
    }

    /// 依次产出所有元素
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }

    /// 写入第 `index` 个元素并标记为脏
    ///
    /// 只读视图返回 `NotSupported`。
    pub fn set(&mut self, index: usize, value: T) -> Result<()> {
        assert!(index < self.len(), "view index {} out of bounds", index);
        let Bytes::Exclusive(bytes) = &mut self.bytes else {
            return Err(Error::new(ErrorKind::NotSupported, "write through a read-only view"));
        };

        let offset = index * T::SIZE;
        value.encode(&mut bytes[offset..offset + T::SIZE]);
        self.dirty = true;
        Ok(())
    }

    /// 用 `f` 更新第 `index` 个元素，返回旧值
    pub fn update(&mut self, index: usize, f: impl FnOnce(T) -> T) -> Result<T> {
        let old = self.get(index);
        self.set(index, f(old))?;
        Ok(old)
    }

    /// 刷新视图
    ///
    /// 只有视图为脏时才调用刷新回调，回调的错误原样返回。
    /// 在只读视图或没有回调的视图上调用是使用错误。
    pub fn flush(&mut self) -> Result<()> {
        let (Bytes::Exclusive(bytes), Some(flusher)) = (&self.bytes, self.flusher.as_mut()) else {
            log::warn!("[LAZY] flush on a view without a flusher ({:?})", self.range);
            return Err(Error::new(ErrorKind::NotSupported, "view has no flusher"));
        };

        if !self.dirty {
            return Ok(());
        }
        self.dirty = false;
        flusher(self.range, &bytes[..])
    }
}

impl<T: ViewElement> Drop for BufferView<'_, T> {
    fn drop(&mut self) {
        if self.dirty {
            log::warn!("[LAZY] dropping dirty view over {:?}, changes not flushed", self.range);
        }
    }
}
