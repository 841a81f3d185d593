//! 续传库
//!
//! 管理一对数据+索引文件（按传输类型区分），实现断点续传记录的
//! 加载、查找、原地更新、追加与压缩。崩溃重启后可从最后一次
//! 持久化的字节进度继续传输；多个客户端进程实例并发访问时由
//! 进程间锁串行化。
//!
//! ## 数据文件格式
//!
//! ```text
//! Ver: 2
//! {encryptSeedLow} {encryptSeedHigh}
//!
//! {len}|{record-line}
//! {len}|{record-line}
//! ...
//! ```
//!
//! `{len}` 为后续记录行的十进制字节长度，与索引文件冗余，
//! 读取时作为一致性校验。
//!
//! ## 状态机
//!
//! `Closed -> Opening -> Ready -> Closed`。所有操作在 `Ready`
//! 状态下执行，每个操作在其全程持有本类型对应的进程间锁。
//!
//! ## 失败语义
//!
//! 格式/版本错误在 [`ResumeStore::open`] 中检测到时，删除数据与
//! 索引文件并重置为首次运行状态后再传播错误——损坏的续传库
//! 放弃续传状态换取自愈，不做部分修复。

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::ResumeConfig;

use super::cipher::RecordCipher;
use super::codec;
use super::error::{ResumeError, ResumeResult};
use super::index;
use super::linefile::LineFile;
use super::lock::{InterprocessLock, DOWNLOAD_RESUME_LOCK, UPLOAD_RESUME_LOCK};
use super::types::{
    parse_version_header, version_header_line, IndexSlot, ResumeKind, ResumeRecord,
    FIELD_SEPARATOR, MIN_SUPPORTED_VERSION,
};

/// 续传库状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreState {
    Closed,
    Opening,
    Ready,
}

/// 续传库
///
/// 一个实例管理一种传输类型（上传或下载）的数据+索引文件对。
/// 由调用方（传输编排层）显式构造并持有，不使用全局单例。
pub struct ResumeStore {
    kind: ResumeKind,
    dir: PathBuf,
    data_file: LineFile,
    index_file: LineFile,
    lock: Arc<InterprocessLock>,
    config: ResumeConfig,
    cipher: Arc<dyn RecordCipher>,
    /// 内存中的槽位列表，与索引文件保持同步
    slots: Vec<IndexSlot>,
    /// 加密种子对，写入数据文件头，本会话所有编解码共用
    seeds: (i64, i64),
    /// 首次运行标记（文件不存在或长度为零）
    first_run: bool,
    state: StoreState,
}

impl std::fmt::Debug for ResumeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResumeStore")
            .field("kind", &self.kind)
            .field("dir", &self.dir)
            .field("slots", &self.slots.len())
            .field("first_run", &self.first_run)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ResumeStore {
    /// 创建续传库实例（不做 I/O，调用 [`ResumeStore::open`] 后方可使用）
    ///
    /// # Arguments
    /// * `base_dir` - 应用数据目录（`config.resume_dir` 为相对路径时相对于此目录）
    /// * `kind` - 传输类型，Upload 或 Download（Done 非法）
    /// * `config` - 续传配置
    /// * `cipher` - 记录加密实现
    pub fn new(
        base_dir: &Path,
        kind: ResumeKind,
        config: ResumeConfig,
        cipher: Arc<dyn RecordCipher>,
    ) -> ResumeResult<Self> {
        if kind == ResumeKind::Done {
            return Err(ResumeError::InvalidResumeType);
        }

        let dir = if Path::new(&config.resume_dir).is_absolute() {
            PathBuf::from(&config.resume_dir)
        } else {
            base_dir.join(&config.resume_dir)
        };

        let lock_name = match kind {
            ResumeKind::Download => DOWNLOAD_RESUME_LOCK,
            _ => UPLOAD_RESUME_LOCK,
        };
        let lock = Arc::new(InterprocessLock::new(
            lock_name,
            config.lock_max_retries,
            config.lock_retry_delay_ms,
        ));

        let data_file = LineFile::new(dir.join(kind.data_file_name()));
        let index_file = LineFile::new(dir.join(kind.index_file_name()));

        Ok(Self {
            kind,
            dir,
            data_file,
            index_file,
            lock,
            config,
            cipher,
            slots: Vec::new(),
            seeds: (0, 0),
            first_run: true,
            state: StoreState::Closed,
        })
    }

    /// 传输类型
    pub fn kind(&self) -> ResumeKind {
        self.kind
    }

    /// 是否为首次运行（打开时无历史数据）
    pub fn first_run(&self) -> bool {
        self.first_run
    }

    /// 当前加载的记录槽位数
    pub fn record_count(&self) -> usize {
        self.slots.len()
    }

    /// 数据文件路径
    pub fn data_path(&self) -> &Path {
        self.data_file.path()
    }

    // ========================================================================
    // 打开与关闭
    // ========================================================================

    /// 打开续传库
    ///
    /// 读取并校验数据文件头（版本号、加密种子对），加载索引。
    /// 文件不存在或为空进入首次运行状态，跳过校验并生成新种子。
    ///
    /// 检测到格式/版本错误时删除数据与索引文件、重置为首次运行，
    /// 然后传播错误；再次调用 `open` 将以空库成功打开。
    pub fn open(&mut self) -> ResumeResult<()> {
        self.state = StoreState::Opening;

        fs::create_dir_all(&self.dir)?;

        let lock = Arc::clone(&self.lock);
        let _guard = lock.guard()?;

        match self.open_locked() {
            Ok(()) => {
                self.state = StoreState::Ready;
                Ok(())
            }
            Err(e) if e.is_format_error() => {
                warn!("续传库格式不可用，删除重建: {} ({:?})", e, self.data_file.path());
                self.reset_files();
                self.state = StoreState::Closed;
                Err(e)
            }
            Err(e) => {
                self.state = StoreState::Closed;
                Err(e)
            }
        }
    }

    fn open_locked(&mut self) -> ResumeResult<()> {
        if !self.data_file.exists() || self.data_file.len()? == 0 {
            self.first_run = true;
            self.seeds = generate_seeds();
            self.slots = Vec::new();
            info!("续传库首次运行: {:?}", self.data_file.path());
            return Ok(());
        }

        let header = self.data_file.read_first_lines(2)?;

        let ver_line = header
            .first()
            .ok_or_else(|| ResumeError::InvalidFormat("数据文件缺少版本头".to_string()))?;
        let version = parse_version_header(ver_line).ok_or_else(|| {
            ResumeError::InvalidFormat(format!("数据文件版本头无效: {:?}", ver_line))
        })?;
        if version < MIN_SUPPORTED_VERSION {
            return Err(ResumeError::UnsupportedVersion(version));
        }

        let seed_line = header
            .get(1)
            .ok_or_else(|| ResumeError::InvalidFormat("数据文件缺少加密种子行".to_string()))?;
        self.seeds = parse_seed_line(seed_line)?;

        self.slots = index::load(&self.index_file)?;
        self.first_run = false;

        debug!(
            "续传库已打开: {} 条记录 ({:?})",
            self.slots.len(),
            self.data_file.path()
        );

        Ok(())
    }

    /// 关闭续传库（纯状态转换，不持有文件句柄）
    pub fn close(&mut self) {
        self.state = StoreState::Closed;
        self.slots.clear();
        debug!("续传库已关闭: {:?}", self.data_file.path());
    }

    /// 删除数据与索引文件并重置为首次运行状态（尽力而为）
    fn reset_files(&mut self) {
        if let Err(e) = self.data_file.remove() {
            warn!("删除数据文件失败: {}", e);
        }
        if let Err(e) = self.index_file.remove() {
            warn!("删除索引文件失败: {}", e);
        }
        self.slots.clear();
        self.seeds = generate_seeds();
        self.first_run = true;
    }

    fn ensure_ready(&self) -> ResumeResult<()> {
        if self.state != StoreState::Ready {
            return Err(ResumeError::OpenFile(self.data_file.path().to_path_buf()));
        }
        Ok(())
    }

    // ========================================================================
    // 查找
    // ========================================================================

    /// 按本地文件路径查找记录
    ///
    /// 顺序扫描全部槽位并逐条懒解码。上传记录额外比对本地文件的
    /// 当前大小与修改时间（文件变过就不再续传）；下载记录只比对
    /// 路径。路径比较不区分大小写。
    ///
    /// 多条记录共享同一路径时返回首个匹配（既定的歧义行为，
    /// 不做唯一性约束）。
    pub fn find(&mut self, path: &str) -> ResumeResult<Option<ResumeRecord>> {
        self.ensure_ready()?;

        let lock = Arc::clone(&self.lock);
        let _guard = lock.guard()?;

        self.find_locked(path)
    }

    fn find_locked(&mut self, path: &str) -> ResumeResult<Option<ResumeRecord>> {
        let live = if self.kind == ResumeKind::Upload {
            match local_file_stat(path) {
                Ok(stat) => Some(stat),
                Err(e) => {
                    warn!("读取本地文件信息失败，跳过匹配: {} ({})", path, e);
                    return Ok(None);
                }
            }
        } else {
            None
        };

        for idx in 0..self.slots.len() {
            let record = self.read_record_at(idx)?;
            if record.is_done() {
                continue;
            }
            if !record.matches_path(path) {
                continue;
            }
            if let Some((size, mtime)) = live {
                if record.file_size != size || record.last_modified != mtime {
                    continue;
                }
            }
            debug!("已命中续传记录: 槽位 {} ({})", idx, path);
            return Ok(Some(record));
        }

        Ok(None)
    }

    /// 查找上传记录，未命中时创建新记录
    ///
    /// 新记录的大小与修改时间取自本地文件系统，`slot_index` 为 -1，
    /// `remote_file_id` 为 0（首次持久化前由服务端分配）。
    ///
    /// # Returns
    /// `(记录, 是否命中已有记录)`
    pub fn find_or_create_upload(
        &mut self,
        path: &str,
        add_metadata: bool,
        create_hash: bool,
    ) -> ResumeResult<(ResumeRecord, bool)> {
        if self.kind != ResumeKind::Upload {
            return Err(ResumeError::InvalidResumeType);
        }
        self.ensure_ready()?;

        let lock = Arc::clone(&self.lock);
        let _guard = lock.guard()?;

        if let Some(record) = self.find_locked(path)? {
            return Ok((record, true));
        }

        let (size, mtime) = local_file_stat(path)?;
        let record =
            ResumeRecord::new_upload(path.to_string(), size, mtime, add_metadata, create_hash);

        debug!("未命中，创建新上传记录: {}", path);

        Ok((record, false))
    }

    /// 查找下载记录，未命中时创建新记录
    ///
    /// # Returns
    /// `(记录, 是否命中已有记录)`
    pub fn find_or_create_download(
        &mut self,
        path: &str,
        remote_file_id: i64,
    ) -> ResumeResult<(ResumeRecord, bool)> {
        if self.kind != ResumeKind::Download {
            return Err(ResumeError::InvalidResumeType);
        }
        self.ensure_ready()?;

        let lock = Arc::clone(&self.lock);
        let _guard = lock.guard()?;

        if let Some(record) = self.find_locked(path)? {
            return Ok((record, true));
        }

        let record = ResumeRecord::new_download(path.to_string(), remote_file_id);

        debug!("未命中，创建新下载记录: {}", path);

        Ok((record, false))
    }

    /// 加载全部存活记录（恢复扫描，供编排层启动时重新入队）
    pub fn load_all(&mut self) -> ResumeResult<Vec<ResumeRecord>> {
        self.ensure_ready()?;

        let lock = Arc::clone(&self.lock);
        let _guard = lock.guard()?;

        let mut records = Vec::with_capacity(self.slots.len());
        for idx in 0..self.slots.len() {
            let record = self.read_record_at(idx)?;
            if !record.is_done() {
                records.push(record);
            }
        }

        debug!("已加载 {} 条存活记录", records.len());

        Ok(records)
    }

    // ========================================================================
    // 持久化
    // ========================================================================

    /// 持久化一条记录
    ///
    /// - `remote_file_id == 0` 的记录拒绝写入（返回 [`ResumeError::NoFileId`]，
    ///   库不变）：没拿到服务端 ID 的传输不留孤儿记录
    /// - `kind == Done` 的记录转交 [`ResumeStore::clear_record`]
    /// - 已有槽位（`slot_index >= 0`）原地覆写；覆写前以磁盘上的
    ///   索引为准重新校验槽位（其他进程可能已重写续传库），
    ///   越界视为锁定冲突，调用方应整体重试
    /// - 新记录（`slot_index < 0`）追加到数据文件末尾并分配新槽位，
    ///   成功后回写 `record.slot_index`
    pub fn persist(&mut self, record: &mut ResumeRecord) -> ResumeResult<()> {
        self.ensure_ready()?;

        if record.remote_file_id == 0 {
            debug!("记录未分配远端文件 ID，跳过持久化: {}", record.file_path);
            return Err(ResumeError::NoFileId);
        }

        if record.is_done() {
            return self.clear_record(record);
        }

        let lock = Arc::clone(&self.lock);
        let _guard = lock.guard()?;

        // 以磁盘上的槽位列表为准，防御 open 之后的外部变更
        self.slots = index::load(&self.index_file)?;

        let line = self.encode_line(record)?;

        if record.slot_index >= 0 {
            let idx = record.slot_index as usize;
            let slot = self.slots.get(idx).copied().ok_or_else(|| {
                ResumeError::Locking(format!(
                    "槽位索引越界: {} (当前 {} 个槽位)，续传库疑似已被其他进程重写",
                    record.slot_index,
                    self.slots.len()
                ))
            })?;

            self.data_file.overwrite_at(slot.position, &line, slot.length)?;

            debug!("已原地更新记录: 槽位 {} ({})", idx, record.file_path);
        } else {
            if self.first_run || self.data_file.len()? == 0 {
                self.write_header()?;
                self.first_run = false;
            }

            let offset = self.data_file.append_line(&line)?;
            let slot = IndexSlot {
                position: offset,
                length: line.len() as u32 + 1,
            };
            index::append_slot(&self.index_file, &slot)?;
            self.slots.push(slot);
            record.slot_index = (self.slots.len() - 1) as i32;

            debug!(
                "已追加新记录: 槽位 {} 偏移 {} ({})",
                record.slot_index, offset, record.file_path
            );
        }

        Ok(())
    }

    /// 清除一条记录（整库重写压缩）
    ///
    /// 写回当前加载的全部记录，跳过 `record` 所在槽位以及所有已
    /// 标记 Done 的记录——压缩是惰性的，攒到某次清除一并执行。
    /// 重写后槽位偏移全部变化，调用方持有的其他记录需重新查找。
    ///
    /// 每次清除为 O(n)；续传库预期只保存少量进行中的传输。
    pub fn clear_record(&mut self, record: &ResumeRecord) -> ResumeResult<()> {
        self.ensure_ready()?;

        let lock = Arc::clone(&self.lock);
        let _guard = lock.guard()?;

        self.slots = index::load(&self.index_file)?;
        if self.slots.is_empty() {
            debug!("续传库为空，无记录可清除: {}", record.file_path);
            return Ok(());
        }

        let mut kept = Vec::with_capacity(self.slots.len());
        for idx in 0..self.slots.len() {
            if idx as i32 == record.slot_index {
                continue;
            }
            let rec = self.read_record_at(idx)?;
            if rec.is_done() {
                continue;
            }
            kept.push(rec);
        }

        self.rewrite_all(&kept)?;

        info!(
            "已清除记录并压缩: 保留 {} 条 ({})",
            kept.len(),
            record.file_path
        );

        Ok(())
    }

    /// 删除本类型的全部续传数据（数据与索引文件整体删除）
    ///
    /// 用于"全部完成"的批量清理，比逐条重写更直接
    pub fn clear_all(&mut self) -> ResumeResult<()> {
        self.ensure_ready()?;

        let lock = Arc::clone(&self.lock);
        let _guard = lock.guard()?;

        self.data_file.remove()?;
        self.index_file.remove()?;
        self.slots.clear();
        self.first_run = true;

        info!("已删除全部续传数据: {:?}", self.data_file.path());

        Ok(())
    }

    /// 清理过期记录
    ///
    /// 丢弃最后尝试时间早于 `max_age` 之前的记录（顺带压缩掉
    /// Done 记录），返回清理的过期记录数
    pub fn clear_expired(&mut self, max_age: chrono::Duration) -> ResumeResult<usize> {
        self.ensure_ready()?;

        let lock = Arc::clone(&self.lock);
        let _guard = lock.guard()?;

        self.slots = index::load(&self.index_file)?;
        if self.slots.is_empty() {
            return Ok(0);
        }

        let cutoff = (Utc::now() - max_age).timestamp();

        let mut kept = Vec::with_capacity(self.slots.len());
        let mut expired = 0;
        let mut done = 0;
        for idx in 0..self.slots.len() {
            let rec = self.read_record_at(idx)?;
            if rec.is_done() {
                done += 1;
                continue;
            }
            if rec.last_attempt < cutoff {
                info!(
                    "清理过期续传记录: {} (最后尝试 {})",
                    rec.file_path, rec.last_attempt
                );
                expired += 1;
                continue;
            }
            kept.push(rec);
        }

        if expired == 0 && done == 0 {
            return Ok(0);
        }

        self.rewrite_all(&kept)?;

        Ok(expired)
    }

    // ========================================================================
    // 内部工具
    // ========================================================================

    /// 读取并解码一个槽位的记录，`slot_index` 设为槽位位置
    fn read_record_at(&self, idx: usize) -> ResumeResult<ResumeRecord> {
        let slot = self.slots[idx];
        let line = self.data_file.read_line_at(slot.position, slot.length)?;

        let (len_str, record_line) = line.split_once(FIELD_SEPARATOR).ok_or_else(|| {
            ResumeError::InvalidFormat(format!("记录行缺少长度前缀: 槽位 {}", idx))
        })?;
        let expected_len: usize = len_str.parse().map_err(|_| {
            ResumeError::InvalidFormat(format!("记录长度前缀无效: {:?}", len_str))
        })?;
        // 长度前缀与索引冗余，读取时交叉校验
        if expected_len != record_line.len() {
            return Err(ResumeError::InvalidFormat(format!(
                "记录长度前缀不一致: 前缀 {} 实际 {} (槽位 {})",
                expected_len,
                record_line.len(),
                idx
            )));
        }

        let mut record = codec::decode(
            record_line,
            self.kind,
            self.seeds.0,
            self.seeds.1,
            self.cipher.as_ref(),
        )?;
        record.slot_index = idx as i32;

        Ok(record)
    }

    /// 编码记录为带长度前缀的数据文件行（不含换行符）
    fn encode_line(&self, record: &ResumeRecord) -> ResumeResult<String> {
        let body = codec::encode(
            record,
            self.kind,
            self.config.encrypt_records,
            self.seeds.0,
            self.seeds.1,
            self.cipher.as_ref(),
        )?;
        Ok(format!("{}{}{}", body.len(), FIELD_SEPARATOR, body))
    }

    /// 写入数据文件头（版本行、种子行、空行）
    fn write_header(&self) -> ResumeResult<()> {
        let content = format!(
            "{}\n{} {}\n\n",
            version_header_line(),
            self.seeds.0,
            self.seeds.1
        );
        self.data_file.write_all(&content)
    }

    /// 整库重写：头部 + 全部记录，并整体重写索引
    fn rewrite_all(&mut self, records: &[ResumeRecord]) -> ResumeResult<()> {
        let mut content = format!(
            "{}\n{} {}\n\n",
            version_header_line(),
            self.seeds.0,
            self.seeds.1
        );

        let mut slots = Vec::with_capacity(records.len());
        for record in records {
            let line = self.encode_line(record)?;
            slots.push(IndexSlot {
                position: content.len() as u64,
                length: line.len() as u32 + 1,
            });
            content.push_str(&line);
            content.push('\n');
        }

        self.data_file.write_all(&content)?;
        index::save(&self.index_file, &slots)?;
        self.slots = slots;
        self.first_run = false;

        Ok(())
    }
}

/// 由当前时间生成加密种子对（首次运行路径）
fn generate_seeds() -> (i64, i64) {
    let now = Utc::now();
    (now.timestamp_millis(), i64::from(now.timestamp_subsec_nanos()))
}

/// 解析数据文件头的种子行：`{seedLow} {seedHigh}`
fn parse_seed_line(line: &str) -> ResumeResult<(i64, i64)> {
    let mut parts = line.split_whitespace();
    let k1 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ResumeError::InvalidFormat(format!("加密种子行无效: {:?}", line)))?;
    let k2 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ResumeError::InvalidFormat(format!("加密种子行无效: {:?}", line)))?;
    Ok((k1, k2))
}

/// 读取本地文件的大小与修改时间（Unix 秒）
fn local_file_stat(path: &str) -> std::io::Result<(i64, i64)> {
    let meta = fs::metadata(path)?;
    let size = meta.len() as i64;
    let mtime = chrono::DateTime::<Utc>::from(meta.modified()?).timestamp();
    Ok((size, mtime))
}

// ============================================================================
// 单元测试
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resume::cipher::SeedCipher;
    use std::io::Write;
    use tempfile::TempDir;

    fn test_config() -> ResumeConfig {
        ResumeConfig {
            lock_max_retries: 3,
            lock_retry_delay_ms: 1,
            ..ResumeConfig::default()
        }
    }

    fn make_store(base: &Path, kind: ResumeKind) -> ResumeStore {
        ResumeStore::new(base, kind, test_config(), Arc::new(SeedCipher)).unwrap()
    }

    fn open_store(base: &Path, kind: ResumeKind) -> ResumeStore {
        let mut store = make_store(base, kind);
        store.open().unwrap();
        store
    }

    /// 创建一个带内容的本地文件（上传匹配需要真实的大小/修改时间）
    fn write_local_file(dir: &Path, name: &str, content: &[u8]) -> String {
        let path = dir.join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_open_first_run() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path(), ResumeKind::Download);

        assert!(store.first_run());
        assert_eq!(store.record_count(), 0);
    }

    #[test]
    fn test_persist_requires_open() {
        let tmp = TempDir::new().unwrap();
        let mut store = make_store(tmp.path(), ResumeKind::Download);

        let mut record = ResumeRecord::new_download("/a".to_string(), 1);
        assert!(matches!(
            store.persist(&mut record),
            Err(ResumeError::OpenFile(_))
        ));
    }

    #[test]
    fn test_no_file_id_guard() {
        // remote_file_id == 0 拒绝持久化且库不变
        let tmp = TempDir::new().unwrap();
        let mut store = open_store(tmp.path(), ResumeKind::Download);

        let mut record = ResumeRecord::new_download("/data/a.bin".to_string(), 0);
        assert!(matches!(
            store.persist(&mut record),
            Err(ResumeError::NoFileId)
        ));
        assert!(!store.data_path().exists());
        assert_eq!(record.slot_index, -1);
    }

    #[test]
    fn test_persist_append_assigns_slot() {
        let tmp = TempDir::new().unwrap();
        let mut store = open_store(tmp.path(), ResumeKind::Download);

        let mut record = ResumeRecord::new_download("/data/a.bin".to_string(), 42);
        store.persist(&mut record).unwrap();

        assert_eq!(record.slot_index, 0);
        assert_eq!(store.record_count(), 1);

        // 数据文件头已写入
        let content = fs::read_to_string(store.data_path()).unwrap();
        assert!(content.starts_with("Ver: 2\n"));
    }

    #[test]
    fn test_append_then_find_across_reopen() {
        let tmp = TempDir::new().unwrap();

        {
            let mut store = open_store(tmp.path(), ResumeKind::Download);
            let (mut record, found) = store
                .find_or_create_download("/save/movie.mkv", 42)
                .unwrap();
            assert!(!found);
            assert_eq!(record.slot_index, -1);

            record.bytes_transferred = 12345;
            store.persist(&mut record).unwrap();
            assert!(record.slot_index >= 0);
        }

        // 重新打开后可以找回，进度保留
        let mut store = open_store(tmp.path(), ResumeKind::Download);
        assert!(!store.first_run());
        let found = store.find("/save/movie.mkv").unwrap().unwrap();
        assert_eq!(found.remote_file_id, 42);
        assert_eq!(found.bytes_transferred, 12345);
        assert_eq!(found.slot_index, 0);
    }

    #[test]
    fn test_upload_find_matches_size_and_mtime() {
        let tmp = TempDir::new().unwrap();
        let local = write_local_file(tmp.path(), "upload.bin", b"0123456789");

        let mut store = open_store(tmp.path(), ResumeKind::Upload);
        let (mut record, found) = store.find_or_create_upload(&local, true, false).unwrap();
        assert!(!found);
        assert_eq!(record.file_size, 10);

        record.remote_file_id = 7;
        store.persist(&mut record).unwrap();

        // 文件未变：命中
        let (again, found) = store.find_or_create_upload(&local, true, false).unwrap();
        assert!(found);
        assert_eq!(again.remote_file_id, 7);

        // 文件内容变化（大小不同）：不再命中
        std::thread::sleep(std::time::Duration::from_millis(10));
        let mut file = fs::OpenOptions::new().append(true).open(&local).unwrap();
        file.write_all(b"more").unwrap();
        drop(file);

        let (fresh, found) = store.find_or_create_upload(&local, true, false).unwrap();
        assert!(!found);
        assert_eq!(fresh.remote_file_id, 0);
        assert_eq!(fresh.file_size, 14);
    }

    #[test]
    fn test_find_is_case_insensitive() {
        let tmp = TempDir::new().unwrap();
        let mut store = open_store(tmp.path(), ResumeKind::Download);

        let mut record = ResumeRecord::new_download("/Data/File.BIN".to_string(), 5);
        store.persist(&mut record).unwrap();

        assert!(store.find("/data/file.bin").unwrap().is_some());
    }

    #[test]
    fn test_idempotent_persist() {
        // 同一记录重复持久化，磁盘内容逐字节一致
        let tmp = TempDir::new().unwrap();
        let mut store = open_store(tmp.path(), ResumeKind::Download);

        let mut record = ResumeRecord::new_download("/data/a.bin".to_string(), 42);
        record.bytes_transferred = 1024;
        store.persist(&mut record).unwrap();

        let before = fs::read(store.data_path()).unwrap();
        let index_before = fs::read(store.data_path().with_extension("idx")).unwrap();

        store.persist(&mut record).unwrap();

        let after = fs::read(store.data_path()).unwrap();
        let index_after = fs::read(store.data_path().with_extension("idx")).unwrap();
        assert_eq!(before, after);
        assert_eq!(index_before, index_after);
    }

    #[test]
    fn test_progress_update_in_place() {
        // 进度更新原地覆写，文件长度与槽位数不变
        let tmp = TempDir::new().unwrap();
        let local = write_local_file(tmp.path(), "big.bin", &vec![0u8; 98765]);

        let mut store = open_store(tmp.path(), ResumeKind::Upload);
        let (mut record, _) = store.find_or_create_upload(&local, false, false).unwrap();
        record.remote_file_id = 9;
        store.persist(&mut record).unwrap();

        let len_initial = fs::metadata(store.data_path()).unwrap().len();

        for progress in [1i64, 4096, 98765] {
            record.bytes_transferred = progress;
            store.persist(&mut record).unwrap();
        }

        assert_eq!(fs::metadata(store.data_path()).unwrap().len(), len_initial);
        assert_eq!(store.record_count(), 1);

        // 最终进度可读回
        let found = store.find(&local).unwrap().unwrap();
        assert_eq!(found.bytes_transferred, 98765);
    }

    #[test]
    fn test_sequential_appends_do_not_overlap() {
        // 两次持久化（各自完整经历加锁/解锁）产生两个不重叠的槽位
        let tmp = TempDir::new().unwrap();
        let mut store = open_store(tmp.path(), ResumeKind::Download);

        let mut r1 = ResumeRecord::new_download("/a".to_string(), 1);
        store.persist(&mut r1).unwrap();
        let mut r2 = ResumeRecord::new_download("/b".to_string(), 2);
        store.persist(&mut r2).unwrap();

        assert_eq!(store.slots.len(), 2);
        let (s1, s2) = (store.slots[0], store.slots[1]);
        assert!(s1.position + u64::from(s1.length) <= s2.position);

        // 第二个进程视角：重新打开也看到两个槽位
        let store2 = open_store(tmp.path(), ResumeKind::Download);
        assert_eq!(store2.record_count(), 2);
    }

    #[test]
    fn test_stale_slot_index_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut store = open_store(tmp.path(), ResumeKind::Download);

        let mut record = ResumeRecord::new_download("/a".to_string(), 1);
        record.slot_index = 99; // 指向不存在的槽位
        assert!(matches!(
            store.persist(&mut record),
            Err(ResumeError::Locking(_))
        ));
    }

    #[test]
    fn test_clear_record_compaction() {
        // 持久化 3 条，清除第 2 条，重开后剩第 1、3 条且槽位重排
        let tmp = TempDir::new().unwrap();
        let mut store = open_store(tmp.path(), ResumeKind::Download);

        let mut records = Vec::new();
        for (i, path) in ["/a", "/b", "/c"].iter().enumerate() {
            let mut r = ResumeRecord::new_download(path.to_string(), (i + 1) as i64);
            store.persist(&mut r).unwrap();
            records.push(r);
        }

        store.clear_record(&records[1]).unwrap();

        let mut store = open_store(tmp.path(), ResumeKind::Download);
        let all = store.load_all().unwrap();
        let paths: Vec<_> = all.iter().map(|r| r.file_path.as_str()).collect();
        assert_eq!(paths, vec!["/a", "/c"]);
        assert_eq!(all[0].slot_index, 0);
        assert_eq!(all[1].slot_index, 1);

        assert!(store.find("/b").unwrap().is_none());
    }

    #[test]
    fn test_done_records_compacted_lazily() {
        // Done 记录在下一次清除时一并移除
        let tmp = TempDir::new().unwrap();
        let mut store = open_store(tmp.path(), ResumeKind::Download);

        let mut r1 = ResumeRecord::new_download("/a".to_string(), 1);
        store.persist(&mut r1).unwrap();
        let mut r2 = ResumeRecord::new_download("/b".to_string(), 2);
        store.persist(&mut r2).unwrap();
        let mut r3 = ResumeRecord::new_download("/c".to_string(), 3);
        store.persist(&mut r3).unwrap();

        // 标记 /a 完成并重新持久化：转交清除路径
        r1.mark_done();
        store.persist(&mut r1).unwrap();

        let all = store.load_all().unwrap();
        let paths: Vec<_> = all.iter().map(|r| r.file_path.as_str()).collect();
        assert_eq!(paths, vec!["/b", "/c"]);
    }

    #[test]
    fn test_clear_all_deletes_files() {
        let tmp = TempDir::new().unwrap();
        let mut store = open_store(tmp.path(), ResumeKind::Download);

        let mut record = ResumeRecord::new_download("/a".to_string(), 1);
        store.persist(&mut record).unwrap();
        assert!(store.data_path().exists());

        store.clear_all().unwrap();

        assert!(!store.data_path().exists());
        assert!(store.first_run());
        assert_eq!(store.record_count(), 0);
    }

    #[test]
    fn test_legacy_version_triggers_delete_and_fresh_start() {
        let tmp = TempDir::new().unwrap();

        // 先造一个版本 1 的旧库
        let resume_dir = tmp.path().join("resume");
        fs::create_dir_all(&resume_dir).unwrap();
        fs::write(resume_dir.join("resumeDownload.dat"), "Ver: 1\n11 22\n\n").unwrap();
        fs::write(resume_dir.join("resumeDownload.idx"), "Ver: 1\n").unwrap();

        let mut store = make_store(tmp.path(), ResumeKind::Download);
        let result = store.open();
        assert!(matches!(result, Err(ResumeError::UnsupportedVersion(1))));

        // 两个文件都已删除
        assert!(!resume_dir.join("resumeDownload.dat").exists());
        assert!(!resume_dir.join("resumeDownload.idx").exists());

        // 再次打开：以空库成功
        store.open().unwrap();
        assert!(store.first_run());
    }

    #[test]
    fn test_corrupt_header_triggers_delete() {
        let tmp = TempDir::new().unwrap();

        let resume_dir = tmp.path().join("resume");
        fs::create_dir_all(&resume_dir).unwrap();
        fs::write(resume_dir.join("resumeDownload.dat"), "garbage content\n").unwrap();

        let mut store = make_store(tmp.path(), ResumeKind::Download);
        assert!(matches!(
            store.open(),
            Err(ResumeError::InvalidFormat(_))
        ));
        assert!(!resume_dir.join("resumeDownload.dat").exists());

        store.open().unwrap();
        assert!(store.first_run());
    }

    #[test]
    fn test_encrypted_store_roundtrip_across_reopen() {
        // 默认配置开启加密：种子写入文件头，重开后用头里的种子解码
        let tmp = TempDir::new().unwrap();

        {
            let mut store = open_store(tmp.path(), ResumeKind::Download);
            assert!(store.config.encrypt_records);
            let mut record = ResumeRecord::new_download("/secret/path.bin".to_string(), 99);
            record.bytes_transferred = 555;
            store.persist(&mut record).unwrap();

            // 路径不以明文出现在数据文件中
            let content = fs::read_to_string(store.data_path()).unwrap();
            assert!(!content.contains("/secret/path.bin"));
        }

        let mut store = open_store(tmp.path(), ResumeKind::Download);
        let found = store.find("/secret/path.bin").unwrap().unwrap();
        assert_eq!(found.remote_file_id, 99);
        assert_eq!(found.bytes_transferred, 555);
    }

    #[test]
    fn test_plaintext_store() {
        let tmp = TempDir::new().unwrap();

        let config = ResumeConfig {
            encrypt_records: false,
            ..test_config()
        };
        let mut store =
            ResumeStore::new(tmp.path(), ResumeKind::Download, config, Arc::new(SeedCipher))
                .unwrap();
        store.open().unwrap();

        let mut record = ResumeRecord::new_download("/plain/path.bin".to_string(), 3);
        store.persist(&mut record).unwrap();

        let content = fs::read_to_string(store.data_path()).unwrap();
        assert!(content.contains("/plain/path.bin"));
    }

    #[test]
    fn test_clear_expired() {
        let tmp = TempDir::new().unwrap();
        let mut store = open_store(tmp.path(), ResumeKind::Download);

        let mut old = ResumeRecord::new_download("/old".to_string(), 1);
        old.last_attempt = (Utc::now() - chrono::Duration::days(60)).timestamp();
        store.persist(&mut old).unwrap();

        let mut fresh = ResumeRecord::new_download("/fresh".to_string(), 2);
        store.persist(&mut fresh).unwrap();

        let removed = store.clear_expired(chrono::Duration::days(30)).unwrap();
        assert_eq!(removed, 1);

        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].file_path, "/fresh");

        // 没有可清理的记录时不重写
        let removed = store.clear_expired(chrono::Duration::days(30)).unwrap();
        assert_eq!(removed, 0);
    }

    #[test]
    fn test_duplicate_paths_first_match_wins() {
        // 重复路径时首个匹配命中（既定歧义行为）
        let tmp = TempDir::new().unwrap();
        let mut store = open_store(tmp.path(), ResumeKind::Download);

        let mut r1 = ResumeRecord::new_download("/dup".to_string(), 1);
        r1.bytes_transferred = 100;
        store.persist(&mut r1).unwrap();

        let mut r2 = ResumeRecord::new_download("/dup".to_string(), 2);
        r2.bytes_transferred = 200;
        store.persist(&mut r2).unwrap();

        let found = store.find("/dup").unwrap().unwrap();
        assert_eq!(found.remote_file_id, 1);
        assert_eq!(found.slot_index, 0);
    }

    #[test]
    fn test_done_store_kind_rejected() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            ResumeStore::new(
                tmp.path(),
                ResumeKind::Done,
                test_config(),
                Arc::new(SeedCipher)
            ),
            Err(ResumeError::InvalidResumeType)
        ));
    }
}
