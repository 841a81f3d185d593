// CloudDisk Resume Rust Library
// 云盘客户端断点续传核心库

// 配置管理模块
pub mod config;

// 日志系统模块
pub mod logging;

// 断点续传持久化模块
pub mod resume;

// 导出常用类型
pub use config::{AppConfig, LogConfig, ResumeConfig};
pub use logging::{init_logging, LogGuard};
pub use resume::{
    IntervalStage, RecordCipher, ResumeError, ResumeKind, ResumeRecord, ResumeResult, ResumeStore,
    SeedCipher,
};
