//! 错误类型定义
//!
//! 提供块映射核心的错误类型。所有操作在遇到第一个错误时立即返回，
//! 不做本地重试，也不做静默截断。

use core::fmt;

/// 块映射操作错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: &'static str,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// I/O 错误（由块设备原样传递）
    Io,
    /// 无效参数
    InvalidInput,
    /// 索引超出可寻址空间（调用者 bug 或磁盘指针损坏）
    OutOfRange,
    /// 对象已越过其可寻址末尾
    BadState,
    /// 当前对象不支持该操作
    NotSupported,
    /// 空间不足
    NoSpace,
    /// 元数据损坏
    Corrupted,
}

impl Error {
    /// 创建新错误
    pub const fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self { kind, message }
    }

    /// 创建带原因的错误（简化版，忽略 cause）
    ///
    /// 注意：在 no_std 环境下，cause 参数只会被记录到日志
    pub fn with_cause(kind: ErrorKind, message: &'static str, cause: impl fmt::Debug) -> Self {
        log::debug!("{:?}: {} (cause: {:?})", kind, message, cause);
        Self { kind, message }
    }

    /// 获取错误类型
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 获取错误消息
    pub const fn message(&self) -> &'static str {
        self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result 类型别名
pub type Result<T> = core::result::Result<T, Error>;
