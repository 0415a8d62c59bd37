//! 块缓存模块
//!
//! `BlockDev` 可选的写回缓存，使用 `lru` crate 提供 LRU 驱逐。
//!
//! # 主要组件
//!
//! - [`CacheBuffer`] - 单个缓存块，包含数据和 [`CacheFlags`]
//! - [`BlockCache`] - 块缓存管理器
//! - [`CacheStats`] - 缓存统计信息
//!
//! 脏块永远不会被驱逐；缓存被脏块占满时 `write_dirty` 返回 `NoSpace`，
//! 调用者应先 `BlockDev::flush`。

mod buffer;
mod block_cache;

pub use buffer::{CacheBuffer, CacheFlags};
pub use block_cache::{BlockCache, CacheStats};
