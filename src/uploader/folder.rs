//! 本地证据文件夹扫描
//!
//! 负责:
//! - 递归扫描本地文件夹（保留目录结构）
//! - 按隐藏文件、大小、扩展名过滤
//! - 将扫描结果转换为上传任务

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::MigrationConfig;
use crate::uploader::task::UploadTask;

/// 文件扫描结果
#[derive(Debug, Clone)]
pub struct ScannedFile {
    /// 本地文件路径
    pub local_path: PathBuf,
    /// 相对于扫描根目录的路径（用于构建远程路径）
    pub relative_path: PathBuf,
    /// 文件大小（字节）
    pub size: u64,
}

impl ScannedFile {
    /// 远程目标目录：相对路径的父目录，统一使用 `/` 分隔
    pub fn destination_folder(&self) -> String {
        self.relative_path
            .parent()
            .map(path_to_remote)
            .unwrap_or_default()
    }

    /// 文件名
    pub fn file_name(&self) -> String {
        self.relative_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// 读取文件内容并生成上传任务（关联标记为相对路径）
    pub async fn into_task(self) -> Result<UploadTask> {
        let content = tokio::fs::read(&self.local_path)
            .await
            .with_context(|| format!("读取文件失败: {}", self.local_path.display()))?;

        Ok(UploadTask::new(self.destination_folder(), self.file_name(), content)
            .with_metadata(path_to_remote(&self.relative_path)))
    }
}

/// 文件夹扫描配置
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// 跳过隐藏文件（以.开头的文件和文件夹）
    pub skip_hidden: bool,
    /// 最大文件大小（字节），超过此大小的文件将被跳过
    pub max_file_size: Option<u64>,
    /// 允许的扩展名（不区分大小写，空表示全部）
    pub allowed_extensions: Vec<String>,
}

impl ScanOptions {
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self {
            skip_hidden: config.skip_hidden,
            max_file_size: config.max_file_size,
            allowed_extensions: config.allowed_extensions.clone(),
        }
    }

    fn extension_allowed(&self, path: &Path) -> bool {
        if self.allowed_extensions.is_empty() {
            return true;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.allowed_extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }
}

/// 文件夹扫描器
pub struct FolderScanner {
    options: ScanOptions,
}

impl FolderScanner {
    /// 创建默认配置的扫描器
    pub fn new() -> Self {
        Self {
            options: ScanOptions::default(),
        }
    }

    /// 创建自定义配置的扫描器
    pub fn with_options(options: ScanOptions) -> Self {
        Self { options }
    }

    /// 递归扫描文件夹
    ///
    /// # 返回
    /// 扫描到的所有文件，按相对路径排序
    pub fn scan<P: AsRef<Path>>(&self, root_path: P) -> Result<Vec<ScannedFile>> {
        let root_path = root_path.as_ref();

        if !root_path.exists() {
            anyhow::bail!("扫描路径不存在: {}", root_path.display());
        }
        if !root_path.is_dir() {
            anyhow::bail!("扫描路径不是文件夹: {}", root_path.display());
        }

        info!("开始扫描文件夹: {}", root_path.display());

        let skip_hidden = self.options.skip_hidden;
        let walker = WalkDir::new(root_path)
            .follow_links(false)
            .into_iter()
            // 根目录本身不参与隐藏判断
            .filter_entry(|entry| !(skip_hidden && entry.depth() > 0 && is_hidden(entry)));

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("读取目录条目失败，已跳过: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            if !self.options.extension_allowed(path) {
                debug!("跳过不支持的文件类型: {}", path.display());
                continue;
            }

            let size = entry
                .metadata()
                .with_context(|| format!("读取文件元数据失败: {}", path.display()))?
                .len();

            if let Some(max_size) = self.options.max_file_size {
                if size > max_size {
                    warn!("跳过超大文件: {} ({})", path.display(), format_bytes(size));
                    continue;
                }
            }

            let relative_path = path
                .strip_prefix(root_path)
                .with_context(|| {
                    format!(
                        "计算相对路径失败: {} (root: {})",
                        path.display(),
                        root_path.display()
                    )
                })?
                .to_path_buf();

            debug!("扫描到文件: {} ({})", relative_path.display(), format_bytes(size));

            files.push(ScannedFile {
                local_path: path.to_path_buf(),
                relative_path,
                size,
            });
        }

        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

        info!(
            "文件夹扫描完成: {} 个文件，总大小 {}",
            files.len(),
            format_bytes(files.iter().map(|f| f.size).sum())
        );

        Ok(files)
    }
}

impl Default for FolderScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// 按文件数和总大小把扫描结果切分为多个批次（保持原有顺序）
///
/// 超过 max_bytes 的单个文件独占一个批次
pub fn plan_batches(
    files: Vec<ScannedFile>,
    max_files: usize,
    max_bytes: u64,
) -> Vec<Vec<ScannedFile>> {
    let max_files = max_files.max(1);
    let mut batches = Vec::new();
    let mut current: Vec<ScannedFile> = Vec::new();
    let mut current_bytes = 0u64;

    for file in files {
        let full = current.len() >= max_files
            || (!current.is_empty() && current_bytes.saturating_add(file.size) > max_bytes);
        if full {
            batches.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes = current_bytes.saturating_add(file.size);
        current.push(file);
    }

    if !current.is_empty() {
        batches.push(current);
    }

    batches
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

/// 本地相对路径 -> 远程路径（`/` 分隔）
fn path_to_remote(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// 格式化字节大小
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
