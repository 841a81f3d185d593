// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 续传配置
    #[serde(default)]
    pub resume: ResumeConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 续传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeConfig {
    /// 续传文件存储目录（相对于应用数据目录或绝对路径）
    #[serde(default = "default_resume_dir")]
    pub resume_dir: String,

    /// 是否加密续传记录
    #[serde(default = "default_encrypt_records")]
    pub encrypt_records: bool,

    /// 进程间锁获取失败的最大重试次数
    #[serde(default = "default_lock_max_retries")]
    pub lock_max_retries: u32,

    /// 进程间锁重试间隔（毫秒）
    #[serde(default = "default_lock_retry_delay_ms")]
    pub lock_retry_delay_ms: u64,

    /// 重试间隔阶段等待表（秒），Stage1 到 Stage5
    ///
    /// 阶段与等待时长的映射不保证单调递增，按原样使用
    #[serde(default = "default_interval_stage_waits")]
    pub interval_stage_waits: Vec<u64>,

    /// 续传记录保留天数（最后尝试早于此天数的记录可被清理）
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
}

fn default_resume_dir() -> String {
    "resume".to_string()
}

fn default_encrypt_records() -> bool {
    true
}

fn default_lock_max_retries() -> u32 {
    50
}

fn default_lock_retry_delay_ms() -> u64 {
    10
}

fn default_interval_stage_waits() -> Vec<u64> {
    // 5s, 30s, 5m, 10s, 1h
    vec![5, 30, 300, 10, 3600]
}

fn default_retention_days() -> u64 {
    30
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            resume_dir: default_resume_dir(),
            encrypt_records: default_encrypt_records(),
            lock_max_retries: default_lock_max_retries(),
            lock_retry_delay_ms: default_lock_retry_delay_ms(),
            interval_stage_waits: default_interval_stage_waits(),
            retention_days: default_retention_days(),
        }
    }
}

impl ResumeConfig {
    /// 验证续传配置
    ///
    /// # 返回值
    /// - Ok(()): 配置有效
    /// - Err: 配置无效
    pub fn validate(&self) -> Result<()> {
        if self.resume_dir.trim().is_empty() {
            anyhow::bail!("续传目录不能为空");
        }

        if self.interval_stage_waits.len() != 5 {
            anyhow::bail!(
                "重试间隔等待表必须包含 5 个阶段，当前 {} 个",
                self.interval_stage_waits.len()
            );
        }

        if self.lock_max_retries == 0 {
            anyhow::bail!("锁重试次数必须大于 0");
        }

        Ok(())
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        config
            .resume
            .validate()
            .context("配置文件中的续传配置验证失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        self.resume
            .validate()
            .context("保存配置失败：续传配置无效")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        fs::write(path, content).context("Failed to write config file")?;

        tracing::info!("配置已保存: {:?}", path);

        Ok(())
    }
}
