//! 索引文件操作
//!
//! 索引文件维护逻辑槽位到数据文件字节区间的映射，
//! 记录在数据文件中的定位完全由索引驱动
//!
//! ## 文件格式
//!
//! ```text
//! Ver: 2
//! {position},{length}
//! {position},{length}
//! ...
//! ```
//!
//! 槽位只追加：新增记录时追加一行，移除记录时由上层重建整个
//! 记录列表后整体重写。

use tracing::{debug, warn};

use super::error::{ResumeError, ResumeResult};
use super::linefile::LineFile;
use super::types::{parse_version_header, version_header_line, IndexSlot, MIN_SUPPORTED_VERSION};

/// 加载索引文件中的全部槽位
///
/// 文件不存在或长度为零视为首次运行，返回空列表而非错误。
/// 头部或槽位行损坏返回格式错误（由上层执行删除重建策略）。
pub fn load(file: &LineFile) -> ResumeResult<Vec<IndexSlot>> {
    if !file.exists() || file.len()? == 0 {
        debug!("索引文件为空: {:?}", file.path());
        return Ok(Vec::new());
    }

    let lines = file.read_lines()?;

    let header = lines
        .first()
        .ok_or_else(|| ResumeError::InvalidFormat("索引文件缺少版本头".to_string()))?;
    let version = parse_version_header(header).ok_or_else(|| {
        ResumeError::InvalidFormat(format!("索引文件版本头无效: {:?}", header))
    })?;
    if version < MIN_SUPPORTED_VERSION {
        warn!("索引文件版本过旧: {} ({:?})", version, file.path());
        return Err(ResumeError::UnsupportedVersion(version));
    }

    let mut slots = Vec::with_capacity(lines.len().saturating_sub(1));
    for line in lines.iter().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        let slot = IndexSlot::from_index_line(line).ok_or_else(|| {
            ResumeError::InvalidFormat(format!("索引槽位行无效: {:?}", line))
        })?;
        slots.push(slot);
    }

    debug!("已加载 {} 个索引槽位 ({:?})", slots.len(), file.path());

    Ok(slots)
}

/// 整体重写索引文件
///
/// 截断后写入版本头和全部槽位（压缩后槽位偏移全部变化，只能整体重写）
pub fn save(file: &LineFile, slots: &[IndexSlot]) -> ResumeResult<()> {
    let mut content = version_header_line();
    content.push('\n');
    for slot in slots {
        content.push_str(&slot.to_index_line());
        content.push('\n');
    }

    file.write_all(&content)?;

    debug!("已重写索引文件: {} 个槽位 ({:?})", slots.len(), file.path());

    Ok(())
}

/// 追加一个槽位
///
/// 文件为空时先写入版本头（首次运行路径）
pub fn append_slot(file: &LineFile, slot: &IndexSlot) -> ResumeResult<()> {
    if file.len()? == 0 {
        let mut header = version_header_line();
        header.push('\n');
        file.write_all(&header)?;
    }

    file.append_line(&slot.to_index_line())?;

    debug!(
        "已追加索引槽位: 偏移 {} 长度 {} ({:?})",
        slot.position,
        slot.length,
        file.path()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, LineFile) {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let file = LineFile::new(dir.path().join("resumeUpload.idx"));
        (dir, file)
    }

    #[test]
    fn test_load_missing_file() {
        let (_dir, file) = setup();
        // 首次运行：文件不存在不是错误
        assert!(load(&file).unwrap().is_empty());
    }

    #[test]
    fn test_load_empty_file() {
        let (_dir, file) = setup();
        file.write_all("").unwrap();
        assert!(load(&file).unwrap().is_empty());
    }

    #[test]
    fn test_append_and_load() {
        let (_dir, file) = setup();

        append_slot(
            &file,
            &IndexSlot {
                position: 20,
                length: 100,
            },
        )
        .unwrap();
        append_slot(
            &file,
            &IndexSlot {
                position: 120,
                length: 80,
            },
        )
        .unwrap();

        let slots = load(&file).unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].position, 20);
        assert_eq!(slots[0].length, 100);
        assert_eq!(slots[1].position, 120);
        assert_eq!(slots[1].length, 80);

        // 版本头只写一次
        let lines = file.read_lines().unwrap();
        assert_eq!(lines[0], "Ver: 2");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_save_rewrites_whole_file() {
        let (_dir, file) = setup();

        for i in 0..5 {
            append_slot(
                &file,
                &IndexSlot {
                    position: i * 50,
                    length: 50,
                },
            )
            .unwrap();
        }

        // 压缩后整体重写为两个新槽位
        let compacted = vec![
            IndexSlot {
                position: 20,
                length: 64,
            },
            IndexSlot {
                position: 84,
                length: 64,
            },
        ];
        save(&file, &compacted).unwrap();

        let slots = load(&file).unwrap();
        assert_eq!(slots, compacted);
    }

    #[test]
    fn test_legacy_version_rejected() {
        let (_dir, file) = setup();
        file.write_all("Ver: 1\n10,20\n").unwrap();

        let result = load(&file);
        assert!(matches!(result, Err(ResumeError::UnsupportedVersion(1))));
    }

    #[test]
    fn test_corrupt_header_rejected() {
        let (_dir, file) = setup();
        file.write_all("not a header\n10,20\n").unwrap();

        let result = load(&file);
        assert!(matches!(result, Err(ResumeError::InvalidFormat(_))));
    }

    #[test]
    fn test_corrupt_slot_line_rejected() {
        let (_dir, file) = setup();
        file.write_all("Ver: 2\n10,20\ngarbage\n").unwrap();

        let result = load(&file);
        assert!(matches!(result, Err(ResumeError::InvalidFormat(_))));
    }
}
