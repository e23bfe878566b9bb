// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

use crate::uploader::RetryPolicy;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// 单文件最大重试次数上限
pub const MAX_RETRIES_LIMIT: u32 = 20;

/// 客户端密钥环境变量（配置文件中留空时读取）
pub const CLIENT_SECRET_ENV: &str = "EVIDENCE_UPLOADER_CLIENT_SECRET";

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 远程文档存储配置
    #[serde(default)]
    pub remote: RemoteConfig,
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 迁移配置（本地证据目录 -> 远程文档库）
    #[serde(default)]
    pub migration: MigrationConfig,
    /// 🔥 日志配置
    #[serde(default)]
    pub log: LogConfig,
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

/// 远程文档存储配置
#[derive(Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// 身份认证服务地址
    #[serde(default = "default_authority_host")]
    pub authority_host: String,
    /// 租户 ID
    #[serde(default)]
    pub tenant_id: String,
    /// 应用（客户端）ID
    #[serde(default)]
    pub client_id: String,
    /// 客户端密钥，留空时从环境变量读取
    #[serde(default)]
    pub client_secret: String,
    /// 令牌作用域
    #[serde(default = "default_scope")]
    pub scope: String,
    /// 文档存储 API 根地址
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// 站点 URL，如 https://contoso.sharepoint.com/sites/evidence
    #[serde(default)]
    pub site_url: String,
    /// 首选文档库名称
    #[serde(default = "default_drive_name")]
    pub drive_name: String,
    /// 文档库内的基础目录（所有上传都落在该目录下）
    #[serde(default)]
    pub base_path: String,
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_authority_host() -> String {
    "https://login.microsoftonline.com".to_string()
}

fn default_scope() -> String {
    "https://graph.microsoft.com/.default".to_string()
}

fn default_api_base() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}

fn default_drive_name() -> String {
    "Documents".to_string()
}

fn default_request_timeout_secs() -> u64 {
    100
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            authority_host: default_authority_host(),
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            scope: default_scope(),
            api_base: default_api_base(),
            site_url: String::new(),
            drive_name: default_drive_name(),
            base_path: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

// 手动实现 Debug，避免密钥出现在日志中
impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("authority_host", &self.authority_host)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("scope", &self.scope)
            .field("api_base", &self.api_base)
            .field("site_url", &self.site_url)
            .field("drive_name", &self.drive_name)
            .field("base_path", &self.base_path)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl RemoteConfig {
    /// 请求超时
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// 获取客户端密钥（配置优先，其次环境变量）
    pub fn resolve_client_secret(&self) -> Option<String> {
        if !self.client_secret.is_empty() {
            return Some(self.client_secret.clone());
        }
        std::env::var(CLIENT_SECRET_ENV)
            .ok()
            .filter(|secret| !secret.is_empty())
    }

    /// 验证远程配置
    pub fn validate(&self) -> Result<()> {
        if self.site_url.trim().is_empty() {
            anyhow::bail!("remote.site_url 不能为空");
        }
        if self.tenant_id.trim().is_empty() {
            anyhow::bail!("remote.tenant_id 不能为空");
        }
        if self.client_id.trim().is_empty() {
            anyhow::bail!("remote.client_id 不能为空");
        }
        Ok(())
    }
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 批量上传最大并发数
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// 单文件最大重试次数（总尝试次数 = max_retries + 1）
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 限流冷却时间（秒），与重试次数无关
    #[serde(default = "default_rate_limit_cooldown_secs")]
    pub rate_limit_cooldown_secs: u64,
    /// 指数退避序列（秒），超出部分沿用最后一个值
    #[serde(default = "default_backoff_schedule_secs")]
    pub backoff_schedule_secs: Vec<u64>,
}

fn default_max_concurrency() -> usize {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_rate_limit_cooldown_secs() -> u64 {
    30
}

fn default_backoff_schedule_secs() -> Vec<u64> {
    vec![2, 4, 8]
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_retries: default_max_retries(),
            rate_limit_cooldown_secs: default_rate_limit_cooldown_secs(),
            backoff_schedule_secs: default_backoff_schedule_secs(),
        }
    }
}

impl UploadConfig {
    /// 根据配置构建重试策略
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_secs(self.rate_limit_cooldown_secs),
            self.backoff_schedule_secs
                .iter()
                .map(|secs| Duration::from_secs(*secs))
                .collect(),
        )
    }

    /// 验证上传配置
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            anyhow::bail!("upload.max_concurrency 必须大于 0");
        }
        if self.backoff_schedule_secs.is_empty() {
            anyhow::bail!("upload.backoff_schedule_secs 不能为空");
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            anyhow::bail!(
                "upload.max_retries 不能超过 {}（当前 {}）",
                MAX_RETRIES_LIMIT,
                self.max_retries
            );
        }
        Ok(())
    }
}

/// 迁移配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// 本地证据文件根目录
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,
    /// 跳过隐藏文件
    #[serde(default = "default_skip_hidden")]
    pub skip_hidden: bool,
    /// 单文件最大大小（字节），超过则跳过
    #[serde(default)]
    pub max_file_size: Option<u64>,
    /// 允许的扩展名（为空表示不限制）
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    /// 批次报告输出目录
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
    /// 每批最多文件数
    #[serde(default = "default_batch_max_files")]
    pub batch_max_files: usize,
    /// 每批文件总大小上限（字节），决定同时驻留内存的数据量
    #[serde(default = "default_batch_max_bytes")]
    pub batch_max_bytes: u64,
}

fn default_source_dir() -> PathBuf {
    PathBuf::from("data/evidence")
}

fn default_skip_hidden() -> bool {
    true
}

fn default_allowed_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "pdf"]
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_batch_max_files() -> usize {
    200
}

fn default_batch_max_bytes() -> u64 {
    256 * 1024 * 1024
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            source_dir: default_source_dir(),
            skip_hidden: default_skip_hidden(),
            max_file_size: None,
            allowed_extensions: default_allowed_extensions(),
            report_dir: default_report_dir(),
            batch_max_files: default_batch_max_files(),
            batch_max_bytes: default_batch_max_bytes(),
        }
    }
}

impl MigrationConfig {
    /// 验证迁移配置
    pub fn validate(&self) -> Result<()> {
        if self.batch_max_files == 0 {
            anyhow::bail!("migration.batch_max_files 必须大于 0");
        }
        if self.batch_max_bytes == 0 {
            anyhow::bail!("migration.batch_max_bytes 必须大于 0");
        }
        Ok(())
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        config
            .upload
            .validate()
            .context("配置文件中的上传参数验证失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.upload
            .validate()
            .context("保存配置失败：上传参数无效")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create config directory")?;
            }
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);

        Ok(())
    }

    /// 加载或创建默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {}", e);
                let default_config = Self::default();

                // 首次启动：写出一份模板，方便填写租户和站点信息
                if !std::path::Path::new(path).exists() {
                    if let Err(e) = default_config.save_to_file(path).await {
                        tracing::error!("保存默认配置失败: {}", e);
                    }
                }

                default_config
            }
        }
    }

    /// 启动前完整校验
    pub fn validate(&self) -> Result<()> {
        self.remote.validate()?;
        self.upload.validate()?;
        self.migration.validate()?;
        Ok(())
    }
}
