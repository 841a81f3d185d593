//! 进程间互斥锁
//!
//! 以固定名称标识的跨进程互斥原语，同名锁在整机范围内互斥。
//! 每种续传类型一个模块级常量名：同一台机器上所有客户端实例的
//! 上传续传 I/O 串行在同一把锁上（粗粒度是有意为之的取舍，
//! 不按文件细分）。
//!
//! 底层为锁文件上的 fs2 咨询锁。进程内支持重入：同一持有对象上的
//! 嵌套加锁通过计数器实现，物理锁只在最外层加锁时获取、
//! 最外层解锁时释放。

use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::error::{ResumeError, ResumeResult};

/// 上传续传锁名称（整机范围）
pub const UPLOAD_RESUME_LOCK: &str = "clouddisk-resume-upload";

/// 下载续传锁名称（整机范围）
pub const DOWNLOAD_RESUME_LOCK: &str = "clouddisk-resume-download";

/// 进程间互斥锁
///
/// # Example
/// ```ignore
/// let lock = InterprocessLock::new(UPLOAD_RESUME_LOCK, 50, 10);
/// let _guard = lock.guard()?;
/// // ... 持锁执行文件 I/O ...
/// ```
pub struct InterprocessLock {
    name: String,
    lock_path: PathBuf,
    max_retries: u32,
    retry_delay: Duration,
    inner: Mutex<LockInner>,
}

struct LockInner {
    /// 持有物理锁的文件句柄，None 表示未持锁
    file: Option<File>,
    /// 重入计数，物理锁只在 0 -> 1 时获取、1 -> 0 时释放
    count: u32,
    /// 陈旧锁文件清理只在本对象首次物理加锁前执行一次
    stale_cleanup_done: bool,
}

impl InterprocessLock {
    /// 创建进程间锁
    ///
    /// # Arguments
    /// * `name` - 锁名称，锁文件为 `{temp_dir}/{name}.lock`
    /// * `max_retries` - 获取失败的最大重试次数
    /// * `retry_delay_ms` - 重试间隔（毫秒）
    pub fn new(name: &str, max_retries: u32, retry_delay_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            lock_path: std::env::temp_dir().join(format!("{}.lock", name)),
            max_retries,
            retry_delay: Duration::from_millis(retry_delay_ms),
            inner: Mutex::new(LockInner {
                file: None,
                count: 0,
                stale_cleanup_done: false,
            }),
        }
    }

    /// 获取锁名称
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 加锁
    ///
    /// 首次物理加锁前移除同名的陈旧锁文件（崩溃恢复启发式——
    /// 接受误删另一个存活进程所持锁文件的风险）；之后创建/打开
    /// 锁文件，失败时按配置重试；句柄就绪后先做有界的非阻塞
    /// 加锁重试，耗尽则回退为一次阻塞加锁。
    ///
    /// 同一对象上的嵌套加锁只递增计数，不会死锁。
    pub fn lock(&self) -> ResumeResult<()> {
        let mut inner = self.inner.lock();

        if inner.count > 0 {
            inner.count += 1;
            return Ok(());
        }

        if !inner.stale_cleanup_done {
            inner.stale_cleanup_done = true;
            match fs::remove_file(&self.lock_path) {
                Ok(()) => debug!("已移除陈旧锁文件: {:?}", self.lock_path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => debug!("移除陈旧锁文件失败（忽略）: {}", e),
            }
        }

        let file = self.open_lock_file()?;

        let mut locked = false;
        for _ in 0..self.max_retries {
            match fs2::FileExt::try_lock_exclusive(&file) {
                Ok(()) => {
                    locked = true;
                    break;
                }
                Err(_) => thread::sleep(self.retry_delay),
            }
        }
        if !locked {
            // 最后一次机会：阻塞等待
            fs2::FileExt::lock_exclusive(&file).map_err(|e| {
                ResumeError::Locking(format!("锁 {} 阻塞获取失败: {}", self.name, e))
            })?;
        }

        inner.file = Some(file);
        inner.count = 1;

        debug!("已获取进程间锁: {}", self.name);

        Ok(())
    }

    /// 解锁
    ///
    /// 重入计数归零时释放并销毁物理锁句柄
    pub fn unlock(&self) {
        let mut inner = self.inner.lock();

        if inner.count == 0 {
            warn!("锁 {} 解锁次数多于加锁次数", self.name);
            return;
        }

        inner.count -= 1;
        if inner.count == 0 {
            if let Some(file) = inner.file.take() {
                if let Err(e) = fs2::FileExt::unlock(&file) {
                    warn!("释放进程间锁 {} 失败: {}", self.name, e);
                }
            }
            debug!("已释放进程间锁: {}", self.name);
        }
    }

    /// 获取 RAII 风格的锁守卫
    pub fn guard(&self) -> ResumeResult<InterprocessLockGuard<'_>> {
        self.lock()?;
        Ok(InterprocessLockGuard { lock: self })
    }

    /// 创建/打开锁文件，失败时按配置重试
    fn open_lock_file(&self) -> ResumeResult<File> {
        let mut last_err = None;

        for attempt in 0..self.max_retries.max(1) {
            match OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&self.lock_path)
            {
                Ok(file) => return Ok(file),
                Err(e) => {
                    debug!(
                        "创建锁文件失败 (尝试 {}/{}): {}",
                        attempt + 1,
                        self.max_retries,
                        e
                    );
                    last_err = Some(e);
                    thread::sleep(self.retry_delay);
                }
            }
        }

        Err(ResumeError::Locking(format!(
            "锁 {} 创建锁文件失败: {}",
            self.name,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}

impl std::fmt::Debug for InterprocessLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("InterprocessLock")
            .field("name", &self.name)
            .field("lock_path", &self.lock_path)
            .field("count", &inner.count)
            .finish_non_exhaustive()
    }
}

/// 进程间锁守卫，析构时自动解锁
pub struct InterprocessLockGuard<'a> {
    lock: &'a InterprocessLock,
}

impl Drop for InterprocessLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
