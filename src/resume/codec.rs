//! 续传记录编解码
//!
//! 实现单条续传记录与 `|` 分隔文本行之间的转换，带版本号与可选加密
//!
//! ## 行格式（版本 2）
//!
//! 上传记录：
//! ```text
//! version|encFlag|resumeType|fileID|filePath|fileSize|addMetadata|createHash|lastModified|bytesRead|pad|intervalStage|firstAttempt|lastAttempt|
//! ```
//!
//! 下载记录：
//! ```text
//! version|encFlag|resumeType|fileID|filePath|bytesReceived|pad|intervalStage|firstAttempt|lastAttempt|
//! ```
//!
//! - 数值字段为十进制 ASCII，时间为 Unix 秒
//! - `pad` 为 `*` 重复若干次的填充字段，语义上被忽略，仅用于
//!   保证进度字段增长后编码长度不变（槽位原地更新的前提）
//! - 若 `encFlag` 为 1，`resumeType` 起的全部内容经加密器变换；
//!   版本号与加密标志本身永不加密，解码器先读它们再决定如何处理
//!
//! 路径字段原样保存不做裁剪。路径中不允许出现分隔符 `|`，
//! 这是格式的已知限制，编解码器不做检测。

use tracing::warn;

use super::cipher::RecordCipher;
use super::error::{ResumeError, ResumeResult};
use super::types::{
    IntervalStage, ResumeKind, ResumeRecord, FIELD_SEPARATOR, MAX_I64_DIGITS,
    MIN_SUPPORTED_VERSION, PAD_CHAR, RESUME_FORMAT_VERSION,
};

/// 上传记录的期望字段总数（含版本号与加密标志，短于此为损坏）
pub const UPLOAD_FIELD_COUNT: usize = 15;

/// 下载记录的期望字段总数（含版本号与加密标志，短于此为损坏）
pub const DOWNLOAD_FIELD_COUNT: usize = 9;

// ============================================================================
// 编码
// ============================================================================

/// 编码一条续传记录为文本行
///
/// # Arguments
/// * `record` - 待编码的记录（`kind` 可以是 Done，按 `layout` 的布局输出）
/// * `layout` - 记录布局（Upload 或 Download，Done 非法）
/// * `encrypt` - 是否加密记录主体
/// * `k1`, `k2` - 加密种子
/// * `cipher` - 加密实现
///
/// # Returns
/// 不含换行符的单行记录文本
pub fn encode(
    record: &ResumeRecord,
    layout: ResumeKind,
    encrypt: bool,
    k1: i64,
    k2: i64,
    cipher: &dyn RecordCipher,
) -> ResumeResult<String> {
    let body = match layout {
        ResumeKind::Upload => encode_upload_body(record),
        ResumeKind::Download => encode_download_body(record),
        ResumeKind::Done => return Err(ResumeError::InvalidResumeType),
    };

    let tail = if encrypt {
        cipher.encrypt(&body, k1, k2)
    } else {
        body
    };

    Ok(format!(
        "{ver}{sep}{enc}{sep}{tail}",
        ver = RESUME_FORMAT_VERSION,
        sep = FIELD_SEPARATOR,
        enc = u8::from(encrypt),
        tail = tail
    ))
}

/// 编码上传记录主体
///
/// 填充字段宽度 = 文件大小字段位宽 - 进度字段位宽，
/// 保证进度从 0 涨到文件大小的任何时刻编码长度都不变
fn encode_upload_body(record: &ResumeRecord) -> String {
    let size_str = record.file_size.to_string();
    let read_str = record.bytes_transferred.to_string();
    let pad = pad_field(size_str.len().saturating_sub(read_str.len()));

    format!(
        "{rtype}|{id}|{path}|{size}|{am}|{ch}|{mtime}|{read}|{pad}|{stage}|{first}|{last}|",
        rtype = record.kind.as_code(),
        id = record.remote_file_id,
        path = record.file_path,
        size = size_str,
        am = u8::from(record.add_metadata),
        ch = u8::from(record.create_hash),
        mtime = record.last_modified,
        read = read_str,
        pad = pad,
        stage = record.interval_stage.as_code(),
        first = record.first_attempt,
        last = record.last_attempt,
    )
}

/// 编码下载记录主体
///
/// 下载记录没有总大小字段，填充宽度以 i64 最大位宽为基准
fn encode_download_body(record: &ResumeRecord) -> String {
    let received_str = record.bytes_transferred.to_string();
    let pad = pad_field(MAX_I64_DIGITS.saturating_sub(received_str.len()));

    format!(
        "{rtype}|{id}|{path}|{received}|{pad}|{stage}|{first}|{last}|",
        rtype = record.kind.as_code(),
        id = record.remote_file_id,
        path = record.file_path,
        received = received_str,
        pad = pad,
        stage = record.interval_stage.as_code(),
        first = record.first_attempt,
        last = record.last_attempt,
    )
}

fn pad_field(width: usize) -> String {
    std::iter::repeat(PAD_CHAR).take(width).collect()
}

// ============================================================================
// 解码
// ============================================================================

/// 解码一条续传记录
///
/// 先读版本号与加密标志（这两个字段永不加密），版本低于最低支持
/// 版本返回 [`ResumeError::UnsupportedVersion`]；按需解密后再分割，
/// 字段数不足期望值返回 [`ResumeError::MalformedRecord`]。
/// 填充字段被读取但语义上忽略。
///
/// # Arguments
/// * `line` - 记录行（不含换行符）
/// * `layout` - 期望的记录布局（Upload 或 Download）
/// * `k1`, `k2` - 加密种子
/// * `cipher` - 加密实现
pub fn decode(
    line: &str,
    layout: ResumeKind,
    k1: i64,
    k2: i64,
    cipher: &dyn RecordCipher,
) -> ResumeResult<ResumeRecord> {
    let expected = match layout {
        ResumeKind::Upload => UPLOAD_FIELD_COUNT,
        ResumeKind::Download => DOWNLOAD_FIELD_COUNT,
        ResumeKind::Done => return Err(ResumeError::InvalidResumeType),
    };

    let (ver_str, rest) = line
        .split_once(FIELD_SEPARATOR)
        .ok_or_else(|| ResumeError::MalformedRecord("缺少版本字段".to_string()))?;
    let version: u32 = ver_str
        .parse()
        .map_err(|_| ResumeError::MalformedRecord(format!("版本号无效: {:?}", ver_str)))?;
    if version < MIN_SUPPORTED_VERSION {
        return Err(ResumeError::UnsupportedVersion(version));
    }

    let (enc_str, tail) = rest
        .split_once(FIELD_SEPARATOR)
        .ok_or_else(|| ResumeError::MalformedRecord("缺少加密标志字段".to_string()))?;
    let encrypted = match enc_str {
        "0" => false,
        "1" => true,
        other => {
            return Err(ResumeError::MalformedRecord(format!(
                "加密标志无效: {:?}",
                other
            )))
        }
    };

    let body = if encrypted {
        cipher.decrypt(tail, k1, k2)?
    } else {
        tail.to_string()
    };

    let fields: Vec<&str> = body.split(FIELD_SEPARATOR).collect();
    // 版本号与加密标志计入字段总数
    if fields.len() + 2 < expected {
        warn!(
            "记录字段数不足: 期望至少 {}, 实际 {}",
            expected,
            fields.len() + 2
        );
        return Err(ResumeError::MalformedRecord(format!(
            "字段数不足: 期望至少 {}, 实际 {}",
            expected,
            fields.len() + 2
        )));
    }

    match layout {
        ResumeKind::Upload => decode_upload_fields(&fields),
        ResumeKind::Download => decode_download_fields(&fields),
        ResumeKind::Done => unreachable!(),
    }
}

fn decode_upload_fields(fields: &[&str]) -> ResumeResult<ResumeRecord> {
    Ok(ResumeRecord {
        kind: parse_kind(field(fields, 0, "resumeType")?)?,
        remote_file_id: parse_i64(field(fields, 1, "fileID")?, "fileID")?,
        file_path: field(fields, 2, "filePath")?.to_string(),
        file_size: parse_i64(field(fields, 3, "fileSize")?, "fileSize")?,
        add_metadata: parse_flag(field(fields, 4, "addMetadata")?, "addMetadata")?,
        create_hash: parse_flag(field(fields, 5, "createHash")?, "createHash")?,
        last_modified: parse_i64(field(fields, 6, "lastModified")?, "lastModified")?,
        bytes_transferred: parse_i64(field(fields, 7, "bytesRead")?, "bytesRead")?,
        // 第 8 位为填充字段，读取但忽略
        interval_stage: parse_stage(field(fields, 9, "intervalStage")?)?,
        first_attempt: parse_i64(field(fields, 10, "firstAttempt")?, "firstAttempt")?,
        last_attempt: parse_i64(field(fields, 11, "lastAttempt")?, "lastAttempt")?,
        slot_index: -1,
    })
}

fn decode_download_fields(fields: &[&str]) -> ResumeResult<ResumeRecord> {
    Ok(ResumeRecord {
        kind: parse_kind(field(fields, 0, "resumeType")?)?,
        remote_file_id: parse_i64(field(fields, 1, "fileID")?, "fileID")?,
        file_path: field(fields, 2, "filePath")?.to_string(),
        bytes_transferred: parse_i64(field(fields, 3, "bytesReceived")?, "bytesReceived")?,
        // 第 4 位为填充字段，读取但忽略
        interval_stage: parse_stage(field(fields, 5, "intervalStage")?)?,
        first_attempt: parse_i64(field(fields, 6, "firstAttempt")?, "firstAttempt")?,
        last_attempt: parse_i64(field(fields, 7, "lastAttempt")?, "lastAttempt")?,
        file_size: 0,
        add_metadata: false,
        create_hash: false,
        last_modified: 0,
        slot_index: -1,
    })
}

fn field<'a>(fields: &[&'a str], idx: usize, name: &str) -> ResumeResult<&'a str> {
    fields
        .get(idx)
        .copied()
        .ok_or_else(|| ResumeError::MalformedRecord(format!("缺少 {} 字段", name)))
}

fn parse_kind(field: &str) -> ResumeResult<ResumeKind> {
    let code: u8 = field
        .parse()
        .map_err(|_| ResumeError::MalformedRecord(format!("记录类型无效: {:?}", field)))?;
    ResumeKind::from_code(code).ok_or(ResumeError::InvalidResumeType)
}

fn parse_stage(field: &str) -> ResumeResult<IntervalStage> {
    let code: u8 = field
        .parse()
        .map_err(|_| ResumeError::MalformedRecord(format!("间隔阶段无效: {:?}", field)))?;
    IntervalStage::from_code(code)
        .ok_or_else(|| ResumeError::MalformedRecord(format!("间隔阶段超出范围: {}", code)))
}

fn parse_i64(field: &str, name: &str) -> ResumeResult<i64> {
    field
        .parse()
        .map_err(|_| ResumeError::MalformedRecord(format!("{} 字段无效: {:?}", name, field)))
}

fn parse_flag(field: &str, name: &str) -> ResumeResult<bool> {
    match field {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(ResumeError::MalformedRecord(format!(
            "{} 字段无效: {:?}",
            name, other
        ))),
    }
}

// ============================================================================
// 单元测试
// ============================================================================
