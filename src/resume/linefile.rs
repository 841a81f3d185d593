//! 行式文件读写抽象
//!
//! 数据文件与索引文件共用的定位读写层，把所有偏移运算收拢在
//! 一个类型里：按偏移读一行（长度受限）、末尾追加一行、按偏移
//! 原地覆写一行。
//!
//! 读取按槽位长度截断，槽位尾部的陈旧字节（原地覆写留下的）
//! 在首个换行符处被丢弃。

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::{ResumeError, ResumeResult};

/// 行式文件
///
/// 不持有文件句柄，每次操作独立打开；调用方负责在进程间锁内使用。
#[derive(Debug, Clone)]
pub struct LineFile {
    path: PathBuf,
}

impl LineFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// 文件字节长度，文件不存在视为 0
    pub fn len(&self) -> ResumeResult<u64> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// 读取文件开头的前 `n` 行（不含换行符）
    pub fn read_first_lines(&self, n: usize) -> ResumeResult<Vec<String>> {
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);

        let mut lines = Vec::with_capacity(n);
        for line in reader.lines().take(n) {
            lines.push(line?);
        }
        Ok(lines)
    }

    /// 读取文件的全部行（不含换行符）
    pub fn read_lines(&self) -> ResumeResult<Vec<String>> {
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);

        let mut lines = Vec::new();
        for line in reader.lines() {
            lines.push(line?);
        }
        Ok(lines)
    }

    /// 按偏移读取一行，最多读 `max_len` 字节
    ///
    /// 在读取区间内遇到的首个换行符处截断；区间尾部的陈旧字节
    /// 被丢弃。读不到任何内容视为索引与数据不一致。
    pub fn read_line_at(&self, offset: u64, max_len: u32) -> ResumeResult<String> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;

        let mut buf = Vec::with_capacity(max_len as usize);
        file.take(u64::from(max_len)).read_to_end(&mut buf)?;

        if buf.is_empty() {
            return Err(ResumeError::InvalidFormat(format!(
                "索引指向的数据越界: 偏移 {} 超出文件 {:?}",
                offset, self.path
            )));
        }

        if let Some(newline) = buf.iter().position(|&b| b == b'\n') {
            buf.truncate(newline);
        }

        String::from_utf8(buf)
            .map_err(|e| ResumeError::MalformedRecord(format!("记录行非 UTF-8: {}", e)))
    }

    /// 在文件末尾追加一行
    ///
    /// # Returns
    /// 该行的起始字节偏移
    pub fn append_line(&self, line: &str) -> ResumeResult<u64> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let offset = file.metadata()?.len();
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;

        debug!("已追加行: 偏移 {} 长度 {} ({:?})", offset, line.len(), self.path);

        Ok(offset)
    }

    /// 在指定偏移原地覆写一行
    ///
    /// 写入内容（含换行符）不得超过 `max_len` 字节；
    /// 新行比预留区间短时，区间尾部保留陈旧字节，由长度受限的
    /// 读取丢弃。
    pub fn overwrite_at(&self, offset: u64, line: &str, max_len: u32) -> ResumeResult<()> {
        let needed = line.len() as u32 + 1;
        if needed > max_len {
            return Err(ResumeError::IndexRecord {
                reserved: max_len,
                needed,
            });
        }

        let mut file = OpenOptions::new().write(true).open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;

        debug!("已覆写行: 偏移 {} 长度 {} ({:?})", offset, line.len(), self.path);

        Ok(())
    }

    /// 截断并整体重写文件内容
    pub fn write_all(&self, content: &str) -> ResumeResult<()> {
        let mut file = File::create(&self.path)?;
        file.write_all(content.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// 删除文件
    ///
    /// # Returns
    /// - `Ok(true)` - 文件已删除
    /// - `Ok(false)` - 文件不存在
    pub fn remove(&self) -> ResumeResult<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("已删除文件: {:?}", self.path);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
