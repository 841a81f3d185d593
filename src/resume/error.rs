//! 断点续传模块错误类型
//!
//! 所有 I/O 与锁错误均以返回值形式传播给直接调用方，不使用 panic。
//! 格式/版本错误（`InvalidFormat`/`UnsupportedVersion`）由检测到的
//! 层负责删除数据+索引文件并重置为首次运行状态后再向上传播，
//! 损坏的续传库自愈为空库而不是永久卡死。

use std::io;
use std::path::PathBuf;

/// 续传模块统一结果类型
pub type ResumeResult<T> = Result<T, ResumeError>;

/// 续传模块错误
#[derive(Debug)]
pub enum ResumeError {
    /// 续传库尚未打开，或文件无法打开
    OpenFile(PathBuf),
    /// 进程间锁获取失败（重试耗尽），携带底层错误详情
    Locking(String),
    /// 非法的记录类型（如以 Done 作为存储类型）
    InvalidResumeType,
    /// 记录未分配远端文件 ID，拒绝持久化
    NoFileId,
    /// 编码后的记录超出索引槽位预留长度
    IndexRecord { reserved: u32, needed: u32 },
    /// 文件格式版本低于最低支持版本
    UnsupportedVersion(u32),
    /// 记录行格式损坏（字段缺失、数值解析失败、解密失败等）
    MalformedRecord(String),
    /// 文件头或索引格式损坏
    InvalidFormat(String),
    /// 底层系统 I/O 错误
    SystemIo(io::Error),
}

impl std::fmt::Display for ResumeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResumeError::OpenFile(path) => write!(f, "续传文件未打开: {:?}", path),
            ResumeError::Locking(msg) => write!(f, "获取进程间锁失败: {}", msg),
            ResumeError::InvalidResumeType => write!(f, "非法的续传记录类型"),
            ResumeError::NoFileId => write!(f, "记录未分配远端文件 ID，拒绝持久化"),
            ResumeError::IndexRecord { reserved, needed } => write!(
                f,
                "记录超出索引槽位预留长度: 预留 {} 字节, 需要 {} 字节",
                reserved, needed
            ),
            ResumeError::UnsupportedVersion(ver) => {
                write!(f, "不支持的续传文件格式版本: {}", ver)
            }
            ResumeError::MalformedRecord(msg) => write!(f, "记录行格式损坏: {}", msg),
            ResumeError::InvalidFormat(msg) => write!(f, "续传文件格式损坏: {}", msg),
            ResumeError::SystemIo(e) => write!(f, "系统 I/O 错误: {}", e),
        }
    }
}

impl std::error::Error for ResumeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResumeError::SystemIo(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ResumeError {
    fn from(e: io::Error) -> Self {
        ResumeError::SystemIo(e)
    }
}

impl ResumeError {
    /// 是否为格式/版本错误（触发删除重建策略的错误类别）
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            ResumeError::UnsupportedVersion(_) | ResumeError::InvalidFormat(_)
        )
    }
}
