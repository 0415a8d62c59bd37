//! 块设备抽象
//!
//! 映射核心的外部协作者：把文件系统逻辑块读写到底层设备。
//! block/device.rs 提供设备接口与包装器，以及 lazy buffer 的附加/注销；
//! block/io.rs 提供经过缓存的单块读写。

mod device;
mod io;

pub use device::{AttachId, BlockDevice, BlockDev};
