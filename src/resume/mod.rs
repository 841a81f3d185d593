//! 断点续传持久化模块
//!
//! 该模块负责续传进度的持久化与恢复，让中断的上传/下载在崩溃
//! 重启后能从最后已知的字节偏移继续，包括：
//! - 记录编解码：`|` 分隔文本行，带版本号与可选加密
//! - 索引管理：逻辑槽位到数据文件字节区间的映射
//! - 进程间锁：多个客户端实例并发访问同一续传文件的串行化
//! - 续传库：记录的加载、查找、原地更新、追加与压缩
//!
//! ## 设计原则
//!
//! 1. **原地更新**: 记录创建时按文件大小预留进度字段的填充宽度，
//!    进度检查点只覆写固定长度的槽位，不重写整个文件
//! 2. **惰性压缩**: 完成的记录先标记 Done，攒到某次清除时一并
//!    物理移除
//! 3. **删除重建**: 检测到格式/版本损坏时删除数据+索引文件重新
//!    开始，不做部分修复——放弃续传状态换取健壮性
//!
//! ## 文件结构
//!
//! ```text
//! resume/
//! ├── resumeUpload.dat      # 上传续传数据
//! ├── resumeUpload.idx      # 上传续传索引
//! ├── resumeDownload.dat    # 下载续传数据
//! └── resumeDownload.idx    # 下载续传索引
//! ```
//!
//! ## 使用示例
//!
//! ```ignore
//! use clouddisk_resume::config::ResumeConfig;
//! use clouddisk_resume::resume::{ResumeKind, ResumeStore, SeedCipher};
//! use std::sync::Arc;
//!
//! let config = ResumeConfig::default();
//! let mut store = ResumeStore::new(&data_dir, ResumeKind::Upload, config, Arc::new(SeedCipher))?;
//! store.open()?;
//!
//! // 传输开始前：查找或创建记录
//! let (mut record, found) = store.find_or_create_upload("/data/movie.mp4", true, false)?;
//!
//! // 服务端分配 ID 后定期持久化进度
//! record.remote_file_id = 42;
//! record.bytes_transferred = 1024 * 1024;
//! store.persist(&mut record)?;
//!
//! // 传输完成后清除记录
//! record.mark_done();
//! store.persist(&mut record)?;
//! ```

pub mod cipher;
pub mod codec;
pub mod error;
pub mod index;
pub mod linefile;
pub mod lock;
pub mod store;
pub mod types;

// 导出核心类型
pub use types::{
    IndexSlot, IntervalStage, ResumeKind, ResumeRecord, DOWNLOAD_DATA_FILE, DOWNLOAD_INDEX_FILE,
    MIN_SUPPORTED_VERSION, RESUME_FORMAT_VERSION, UPLOAD_DATA_FILE, UPLOAD_INDEX_FILE,
};

// 导出错误类型
pub use error::{ResumeError, ResumeResult};

// 导出加密接口
pub use cipher::{RecordCipher, SeedCipher};

// 导出编解码操作
pub use codec::{decode, encode, DOWNLOAD_FIELD_COUNT, UPLOAD_FIELD_COUNT};

// 导出进程间锁
pub use lock::{InterprocessLock, InterprocessLockGuard, DOWNLOAD_RESUME_LOCK, UPLOAD_RESUME_LOCK};

// 导出续传库
pub use store::ResumeStore;
