//! 远程目录解析
//!
//! 负责:
//! - 规范化远程路径、清理文件名中的非法字符
//! - 逐级检查并创建远程目录（幂等，同名冲突视为已存在）

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::auth::RemoteCredential;
use crate::remote::{DocumentStore, FolderCreation, RemoteError};

/// 文档库不接受的字符：" * : < > ? / \ | 以及控制字符
fn is_invalid_char(c: char) -> bool {
    matches!(c, '"' | '*' | ':' | '<' | '>' | '?' | '/' | '\\' | '|') || c.is_control()
}

/// 清理单个名称（文件名或目录名）
///
/// 非法字符替换为 `_`，去掉首尾空白和末尾的点，结果为空时返回 `_`
pub fn sanitize_name(name: &str) -> String {
    let replaced: String = name
        .trim()
        .chars()
        .map(|c| if is_invalid_char(c) { '_' } else { c })
        .collect();
    let cleaned = replaced.trim_end_matches(['.', ' ']);
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned.to_string()
    }
}

/// 拆分路径为清理后的目录段
///
/// `\` 视为 `/`，忽略空段和 `.`
pub fn split_segments(path: &str) -> Vec<String> {
    path.split(['/', '\\'])
        .map(str::trim)
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .map(sanitize_name)
        .collect()
}

/// 规范化远程路径：a\\b//c/ -> a/b/c
pub fn normalize_remote_path(path: &str) -> String {
    split_segments(path).join("/")
}

/// 拼接基础目录和相对目录
pub fn join_remote_path(base: &str, relative: &str) -> String {
    let mut segments = split_segments(base);
    segments.extend(split_segments(relative));
    segments.join("/")
}

/// 远程目录解析器
#[derive(Clone)]
pub struct PathResolver {
    store: Arc<dyn DocumentStore>,
}

impl PathResolver {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// 确保远程目录存在
    ///
    /// 每一级目录做一次存在性检查，不存在则在上一级下创建。
    /// 创建冲突视为已存在；其他创建失败只记录日志并停止创建更深的目录，
    /// 后续上传会给出明确的失败原因。存在性检查失败会返回错误，交由上传重试处理。
    ///
    /// # 返回
    /// 本次新建的目录数
    pub async fn ensure_path(
        &self,
        credential: &RemoteCredential,
        drive_id: &str,
        full_path: &str,
        cancel: &CancellationToken,
    ) -> Result<usize, RemoteError> {
        let segments = split_segments(full_path);
        if segments.is_empty() {
            return Ok(0);
        }

        let mut parent = String::new();
        let mut created = 0;

        for segment in segments {
            if cancel.is_cancelled() {
                debug!("目录创建已取消: {}", full_path);
                return Ok(created);
            }

            let current = if parent.is_empty() {
                segment.clone()
            } else {
                format!("{}/{}", parent, segment)
            };

            if !self.store.folder_exists(credential, drive_id, &current).await? {
                match self
                    .store
                    .create_folder(credential, drive_id, &parent, &segment)
                    .await
                {
                    Ok(FolderCreation::Created) => {
                        created += 1;
                        debug!("创建远程目录: {}", current);
                    }
                    Ok(FolderCreation::AlreadyExists) => {
                        debug!("远程目录已存在（并发创建）: {}", current);
                    }
                    Err(e) => {
                        warn!("创建远程目录失败，跳过: path={}, 错误: {}", current, e);
                        return Ok(created);
                    }
                }
            }

            parent = current;
        }

        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploader::testing::{credential, MockStore};

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("seal:42?.jpg"), "seal_42_.jpg");
        assert_eq!(sanitize_name("  report.pdf  "), "report.pdf");
        assert_eq!(sanitize_name("folder..."), "folder");
        assert_eq!(sanitize_name("a|b\"c"), "a_b_c");
        assert_eq!(sanitize_name("..."), "_");
        assert_eq!(sanitize_name(""), "_");
    }

    #[test]
    fn test_normalize_and_join() {
        assert_eq!(normalize_remote_path("\\Seals\\2024//Q1/"), "Seals/2024/Q1");
        assert_eq!(normalize_remote_path("./a/./b"), "a/b");
        assert_eq!(normalize_remote_path(""), "");
        assert_eq!(join_remote_path("Evidence", "HR/1001"), "Evidence/HR/1001");
        assert_eq!(join_remote_path("", "HR"), "HR");
        assert_eq!(join_remote_path("Evidence", ""), "Evidence");
    }

    #[tokio::test]
    async fn test_ensure_path_creates_each_segment() {
        let store = Arc::new(MockStore::new());
        let resolver = PathResolver::new(store.clone());

        let created = resolver
            .ensure_path(&credential(), "drive", "Seals/2024/Q1", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(created, 3);
        assert_eq!(
            store.created_log(),
            vec!["Seals", "Seals/2024", "Seals/2024/Q1"]
        );

        // 再次调用不会重复创建
        let created = resolver
            .ensure_path(&credential(), "drive", "Seals/2024/Q1", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(created, 0);
        assert_eq!(store.created_log().len(), 3);
    }

    #[tokio::test]
    async fn test_ensure_empty_path_is_noop() {
        let store = Arc::new(MockStore::new());
        let resolver = PathResolver::new(store.clone());

        let created = resolver
            .ensure_path(&credential(), "drive", "  / ", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(created, 0);
        assert_eq!(store.lookup_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_ensure_path_is_idempotent() {
        let store = Arc::new(MockStore::new());
        let first = PathResolver::new(store.clone());
        let second = PathResolver::new(store.clone());
        let cancel = CancellationToken::new();
        let credential = credential();

        let (a, b) = tokio::join!(
            first.ensure_path(&credential, "drive", "HR/Employees/1001", &cancel),
            second.ensure_path(&credential, "drive", "HR/Employees/1001", &cancel),
        );
        assert!(a.is_ok());
        assert!(b.is_ok());

        // 每一级目录只被创建一次，冲突按已存在处理
        let mut log = store.created_log();
        log.sort();
        assert_eq!(log, vec!["HR", "HR/Employees", "HR/Employees/1001"]);
        assert!(store.conflict_count() > 0);
        assert!(store.has_folder("HR/Employees/1001"));
    }

    #[tokio::test]
    async fn test_creation_failure_is_not_fatal() {
        let store = Arc::new(MockStore::new());
        store.fail_folder_creation("Signage", RemoteError::status(403, "denied"));
        let resolver = PathResolver::new(store.clone());

        let created = resolver
            .ensure_path(&credential(), "drive", "Signage/Screens", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(created, 0);
        assert!(!store.has_folder("Signage/Screens"));
    }

    #[tokio::test]
    async fn test_lookup_failure_is_returned() {
        let store = Arc::new(MockStore::new());
        store.fail_lookups(RemoteError::status(429, "slow down"));
        let resolver = PathResolver::new(store.clone());

        let result = resolver
            .ensure_path(&credential(), "drive", "POD", &CancellationToken::new())
            .await;

        assert_eq!(result.unwrap_err().status_code(), Some(429));
    }
}
