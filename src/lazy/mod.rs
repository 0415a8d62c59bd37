//! 间接表的按需缓存
//!
//! 每个文件的所有间接表被看作一个虚拟的“间接文件”：第 `t` 个块就是
//! 间接指针空间中索引 `t` 对应的表。[`LazyBuffer`] 只在首次访问某个表时
//! 才从设备读取它，修改通过 [`BufferView`] 完成，再经由映射器写回。
//!
//! - `buffer` - 可增长的块缓冲区和写回路径
//! - `reader` - 已加载区间记录与设备读取器
//! - `view` - 类型化视图

mod buffer;
mod reader;
mod view;

pub use buffer::{enqueue_metadata, LazyBuffer};
pub use reader::{BlockReader, LazyReader, MappedReader};
pub use view::{BufferView, Flusher, ViewElement};
