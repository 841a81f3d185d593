//! 断点续传模块核心类型定义
//!
//! 定义续传记录持久化所需的所有数据结构

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ResumeConfig;

/// 当前续传文件格式版本
pub const RESUME_FORMAT_VERSION: u32 = 2;

/// 最低支持的文件格式版本（0/1 为旧版格式，明确拒绝）
pub const MIN_SUPPORTED_VERSION: u32 = 2;

/// 记录行字段分隔符
pub const FIELD_SEPARATOR: char = '|';

/// 填充字段使用的字符
pub const PAD_CHAR: char = '*';

/// i64 十进制最大位数（下载记录进度字段的填充宽度基准）
pub const MAX_I64_DIGITS: usize = 19;

/// 上传续传数据文件名
pub const UPLOAD_DATA_FILE: &str = "resumeUpload.dat";
/// 上传续传索引文件名
pub const UPLOAD_INDEX_FILE: &str = "resumeUpload.idx";
/// 下载续传数据文件名
pub const DOWNLOAD_DATA_FILE: &str = "resumeDownload.dat";
/// 下载续传索引文件名
pub const DOWNLOAD_INDEX_FILE: &str = "resumeDownload.idx";

/// 续传记录类型
///
/// `Done` 表示记录已逻辑删除，等待下一次压缩时物理移除
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeKind {
    /// 上传记录
    Upload,
    /// 下载记录
    Download,
    /// 已完成（逻辑删除）
    Done,
}

impl ResumeKind {
    /// 获取类型的持久化编码
    pub fn as_code(&self) -> u8 {
        match self {
            ResumeKind::Upload => 0,
            ResumeKind::Download => 1,
            ResumeKind::Done => 2,
        }
    }

    /// 从持久化编码解析
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ResumeKind::Upload),
            1 => Some(ResumeKind::Download),
            2 => Some(ResumeKind::Done),
            _ => None,
        }
    }

    /// 获取类型的显示名称
    pub fn as_str(&self) -> &'static str {
        match self {
            ResumeKind::Upload => "upload",
            ResumeKind::Download => "download",
            ResumeKind::Done => "done",
        }
    }

    /// 获取该类型对应的数据文件名
    ///
    /// `Done` 不是独立的存储类型，调用方需保证只传入 Upload/Download
    pub fn data_file_name(&self) -> &'static str {
        match self {
            ResumeKind::Download => DOWNLOAD_DATA_FILE,
            _ => UPLOAD_DATA_FILE,
        }
    }

    /// 获取该类型对应的索引文件名
    pub fn index_file_name(&self) -> &'static str {
        match self {
            ResumeKind::Download => DOWNLOAD_INDEX_FILE,
            _ => UPLOAD_INDEX_FILE,
        }
    }
}

impl std::fmt::Display for ResumeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 重试间隔阶段
///
/// 每个阶段映射到配置表中的一个等待时长（`ResumeConfig::interval_stage_waits`）。
/// 阶段顺序与等待时长不保证单调递增，按配置表原样使用。
///
/// 阶段按固定环转移：Stage5 → Done → Undefined → Stage1 → ...
/// 即到达 Done 后不饱和，继续回绕（重置退避的无限重试语义）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalStage {
    /// 未定义（尚未进入退避调度）
    Undefined,
    Stage1,
    Stage2,
    Stage3,
    Stage4,
    Stage5,
    /// 调度完成
    Done,
}

impl IntervalStage {
    /// 获取阶段的持久化编码
    pub fn as_code(&self) -> u8 {
        match self {
            IntervalStage::Undefined => 0,
            IntervalStage::Stage1 => 1,
            IntervalStage::Stage2 => 2,
            IntervalStage::Stage3 => 3,
            IntervalStage::Stage4 => 4,
            IntervalStage::Stage5 => 5,
            IntervalStage::Done => 6,
        }
    }

    /// 从持久化编码解析
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(IntervalStage::Undefined),
            1 => Some(IntervalStage::Stage1),
            2 => Some(IntervalStage::Stage2),
            3 => Some(IntervalStage::Stage3),
            4 => Some(IntervalStage::Stage4),
            5 => Some(IntervalStage::Stage5),
            6 => Some(IntervalStage::Done),
            _ => None,
        }
    }

    /// 转移到下一阶段（环形转移，Done 之后回绕到 Undefined）
    pub fn advance(&self) -> Self {
        match self {
            IntervalStage::Undefined => IntervalStage::Stage1,
            IntervalStage::Stage1 => IntervalStage::Stage2,
            IntervalStage::Stage2 => IntervalStage::Stage3,
            IntervalStage::Stage3 => IntervalStage::Stage4,
            IntervalStage::Stage4 => IntervalStage::Stage5,
            IntervalStage::Stage5 => IntervalStage::Done,
            IntervalStage::Done => IntervalStage::Undefined,
        }
    }

    /// 获取当前阶段对应的等待时长
    ///
    /// Undefined 和 Done 阶段没有等待时长，返回零
    pub fn wait_duration(&self, config: &ResumeConfig) -> Duration {
        match self {
            IntervalStage::Undefined | IntervalStage::Done => Duration::ZERO,
            stage => {
                let idx = (stage.as_code() - 1) as usize;
                let secs = config
                    .interval_stage_waits
                    .get(idx)
                    .copied()
                    .unwrap_or_default();
                Duration::from_secs(secs)
            }
        }
    }
}

/// 生成文件版本头行：`Ver: <int>`
pub fn version_header_line() -> String {
    format!("Ver: {}", RESUME_FORMAT_VERSION)
}

/// 解析文件版本头行
pub fn parse_version_header(line: &str) -> Option<u32> {
    line.trim().strip_prefix("Ver:")?.trim().parse().ok()
}

/// 索引槽位
///
/// 描述数据文件中为一条记录预留的字节区间。
/// 槽位在索引文件中只追加；`length` 在创建时固定，
/// 之后只能通过整库重写改变（原地更新依赖记录自身的填充字段）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSlot {
    /// 记录行在数据文件中的起始字节偏移
    pub position: u64,
    /// 槽位预留的字节长度（含行尾换行符）
    pub length: u32,
}

impl IndexSlot {
    /// 序列化为索引行格式：`{position},{length}`
    pub fn to_index_line(&self) -> String {
        format!("{},{}", self.position, self.length)
    }

    /// 从索引行格式解析
    pub fn from_index_line(line: &str) -> Option<Self> {
        let (pos, len) = line.trim().split_once(',')?;
        Some(Self {
            position: pos.parse().ok()?,
            length: len.parse().ok()?,
        })
    }
}

/// 续传记录
///
/// 一条进行中传输的持久化快照，以本地文件路径为逻辑键。
/// 上传与下载共用一个结构，`kind` 区分；仅上传使用的字段
/// （`file_size`、`add_metadata`、`create_hash`、`last_modified`）
/// 在下载记录中保持默认值。
///
/// `slot_index` 不参与持久化，每次加载时根据索引槽位重新计算。
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeRecord {
    /// 记录类型（Done 表示逻辑删除）
    pub kind: ResumeKind,

    /// 本地文件路径（逻辑键，原样保存不做裁剪）
    pub file_path: String,

    /// 远端文件 ID（0 表示服务端尚未分配）
    pub remote_file_id: i64,

    /// 已传输字节数
    pub bytes_transferred: i64,

    /// 当前重试间隔阶段
    pub interval_stage: IntervalStage,

    /// 首次尝试时间（Unix 秒）
    pub first_attempt: i64,

    /// 最后一次尝试时间（Unix 秒）
    pub last_attempt: i64,

    /// 传输开始时的文件大小（仅上传）
    pub file_size: i64,

    /// 是否附加元数据（仅上传）
    pub add_metadata: bool,

    /// 是否生成校验哈希（仅上传）
    pub create_hash: bool,

    /// 文件最后修改时间（Unix 秒，仅上传）
    pub last_modified: i64,

    /// 在索引槽位列表中的位置，-1 表示尚未分配槽位。不持久化。
    pub slot_index: i32,
}

impl ResumeRecord {
    /// 创建上传记录
    ///
    /// `remote_file_id` 初始为 0，由服务端分配后再持久化
    pub fn new_upload(
        file_path: String,
        file_size: i64,
        last_modified: i64,
        add_metadata: bool,
        create_hash: bool,
    ) -> Self {
        let now = Utc::now().timestamp();
        Self {
            kind: ResumeKind::Upload,
            file_path,
            remote_file_id: 0,
            bytes_transferred: 0,
            interval_stage: IntervalStage::Undefined,
            first_attempt: now,
            last_attempt: now,
            file_size,
            add_metadata,
            create_hash,
            last_modified,
            slot_index: -1,
        }
    }

    /// 创建下载记录
    pub fn new_download(file_path: String, remote_file_id: i64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            kind: ResumeKind::Download,
            file_path,
            remote_file_id,
            bytes_transferred: 0,
            interval_stage: IntervalStage::Undefined,
            first_attempt: now,
            last_attempt: now,
            file_size: 0,
            add_metadata: false,
            create_hash: false,
            last_modified: 0,
            slot_index: -1,
        }
    }

    /// 更新最后尝试时间
    pub fn touch(&mut self) {
        self.last_attempt = Utc::now().timestamp();
    }

    /// 标记记录完成（逻辑删除，等待压缩）
    pub fn mark_done(&mut self) {
        self.kind = ResumeKind::Done;
        self.interval_stage = IntervalStage::Done;
    }

    /// 是否已逻辑删除
    pub fn is_done(&self) -> bool {
        self.kind == ResumeKind::Done
    }

    /// 路径是否匹配（不区分大小写）
    pub fn matches_path(&self, path: &str) -> bool {
        self.file_path.eq_ignore_ascii_case(path)
    }
}
