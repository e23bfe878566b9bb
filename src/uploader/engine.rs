// 单文件上传引擎
//
// 核心功能：
// 1. 每次尝试重新获取访问令牌（重试之间可能相隔数十秒）
// 2. 解析站点和文档库（按站点缓存）
// 3. 逐级确保远程目录存在
// 4. 覆盖写上传文件内容
// 5. 失败分类 + 重试策略决定等待时间，等待期间响应取消

use dashmap::DashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::{RemoteCredential, TokenProvider};
use crate::config::RemoteConfig;
use crate::remote::{select_default_drive, DocumentStore, DriveItem, DriveTarget, RemoteError};
use crate::uploader::events::{emit, BatchEvent, ProgressSink};
use crate::uploader::path::{join_remote_path, normalize_remote_path, sanitize_name, PathResolver};
use crate::uploader::retry::{classify_failure, RetryDecision, RetryPolicy};
use crate::uploader::task::UploadOutcome;

/// 上传目标位置
#[derive(Debug, Clone)]
pub struct UploadTarget {
    /// 站点 URL
    pub site_url: String,
    /// 首选文档库名称
    pub drive_name: String,
    /// 文档库内的基础目录
    pub base_path: String,
}

impl UploadTarget {
    pub fn new(site_url: impl Into<String>) -> Self {
        Self {
            site_url: site_url.into(),
            drive_name: "Documents".to_string(),
            base_path: String::new(),
        }
    }

    pub fn with_drive_name(mut self, drive_name: impl Into<String>) -> Self {
        self.drive_name = drive_name.into();
        self
    }

    /// 基础目录（规范化后保存）
    pub fn with_base_path(mut self, base_path: impl AsRef<str>) -> Self {
        self.base_path = normalize_remote_path(base_path.as_ref());
        self
    }

    pub fn from_config(config: &RemoteConfig) -> Self {
        Self::new(config.site_url.clone())
            .with_drive_name(config.drive_name.clone())
            .with_base_path(config.base_path.clone())
    }
}

/// 单次尝试的失败原因
enum AttemptFailure {
    Remote(RemoteError),
    Cancelled,
}

impl From<RemoteError> for AttemptFailure {
    fn from(e: RemoteError) -> Self {
        AttemptFailure::Remote(e)
    }
}

/// 上传引擎
///
/// 可在多个并发任务间共享（`Arc<UploadEngine>`），内部只有文档库缓存是共享可变状态
pub struct UploadEngine {
    /// 远程文档存储
    store: Arc<dyn DocumentStore>,
    /// 令牌提供者
    tokens: Arc<dyn TokenProvider>,
    /// 目录解析器
    resolver: PathResolver,
    /// 上传目标
    target: UploadTarget,
    /// 重试策略
    policy: RetryPolicy,
    /// 站点 URL -> 文档库
    drive_cache: DashMap<String, DriveTarget>,
}

impl UploadEngine {
    /// 创建上传引擎（使用默认重试策略）
    pub fn new(
        store: Arc<dyn DocumentStore>,
        tokens: Arc<dyn TokenProvider>,
        target: UploadTarget,
    ) -> Self {
        Self {
            resolver: PathResolver::new(store.clone()),
            store,
            tokens,
            target,
            policy: RetryPolicy::default(),
            drive_cache: DashMap::new(),
        }
    }

    /// 指定重试策略
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn target(&self) -> &UploadTarget {
        &self.target
    }

    /// 计算远程目录和远程文件路径
    pub fn remote_location(&self, folder: &str, file_name: &str) -> (String, String) {
        let remote_folder = join_remote_path(&self.target.base_path, folder);
        let remote_name = sanitize_name(file_name);
        let remote_path = if remote_folder.is_empty() {
            remote_name
        } else {
            format!("{}/{}", remote_folder, remote_name)
        };
        (remote_folder, remote_path)
    }

    /// 上传单个文件（带重试）
    ///
    /// 普通上传失败不会返回错误，统一记录在 `UploadOutcome` 中
    pub async fn upload_with_retry(
        &self,
        folder: &str,
        file_name: &str,
        content: &[u8],
        max_retries: u32,
    ) -> UploadOutcome {
        self.upload_with_cancel(
            folder,
            file_name,
            content,
            max_retries,
            &CancellationToken::new(),
            None,
        )
        .await
    }

    /// 上传单个文件（带重试、取消和进度事件）
    ///
    /// 取消在每次尝试前、每个远程调用前以及退避等待期间检查
    pub async fn upload_with_cancel(
        &self,
        folder: &str,
        file_name: &str,
        content: &[u8],
        max_retries: u32,
        cancel: &CancellationToken,
        progress: Option<&ProgressSink>,
    ) -> UploadOutcome {
        let started = Instant::now();
        let policy = self.policy.clone().with_max_retries(max_retries);
        let (remote_folder, remote_path) = self.remote_location(folder, file_name);
        let mut last_kind = None;

        debug!(
            "开始上传: file={}, remote={}, size={}",
            file_name,
            remote_path,
            content.len()
        );

        for attempt in 0..=max_retries {
            // 检查取消（attempt 为已完成的尝试次数）
            if cancel.is_cancelled() {
                info!("上传已取消: {}", remote_path);
                return UploadOutcome::cancelled(
                    folder,
                    file_name,
                    &remote_path,
                    attempt,
                    started.elapsed(),
                    last_kind,
                );
            }

            match self
                .attempt_upload(&remote_folder, &remote_path, content, cancel)
                .await
            {
                Ok(item) => {
                    info!(
                        "✓ 上传成功: {} (第 {} 次尝试, id={})",
                        remote_path,
                        attempt.saturating_add(1),
                        item.id
                    );
                    return UploadOutcome::succeeded(
                        folder,
                        file_name,
                        &remote_path,
                        attempt.saturating_add(1),
                        started.elapsed(),
                    );
                }
                Err(AttemptFailure::Cancelled) => {
                    info!("上传已取消: {}", remote_path);
                    return UploadOutcome::cancelled(
                        folder,
                        file_name,
                        &remote_path,
                        attempt.saturating_add(1),
                        started.elapsed(),
                        last_kind,
                    );
                }
                Err(AttemptFailure::Remote(e)) => {
                    let kind = classify_failure(&e);
                    last_kind = Some(kind);

                    match policy.decide(kind, attempt) {
                        RetryDecision::Retry { after } => {
                            warn!(
                                "上传失败，等待 {}ms 后重试 ({}/{}): {}, 类型: {}, 错误: {}",
                                after.as_millis(),
                                attempt.saturating_add(1),
                                max_retries,
                                remote_path,
                                kind,
                                e
                            );
                            emit(
                                progress,
                                BatchEvent::AttemptFailed {
                                    file_name: file_name.to_string(),
                                    attempt: attempt.saturating_add(1),
                                    kind,
                                    retry_in_ms: after.as_millis() as u64,
                                    error: e.to_string(),
                                },
                            );

                            // 退避等待不占用线程，取消时立即返回
                            tokio::select! {
                                _ = tokio::time::sleep(after) => {}
                                _ = cancel.cancelled() => {
                                    info!("退避等待期间取消: {}", remote_path);
                                    return UploadOutcome::cancelled(
                                        folder,
                                        file_name,
                                        &remote_path,
                                        attempt.saturating_add(1),
                                        started.elapsed(),
                                        last_kind,
                                    );
                                }
                            }
                        }
                        RetryDecision::GiveUp => {
                            error!(
                                "上传失败，已达最大重试次数 ({}): {}, 类型: {}, 错误: {}",
                                max_retries, remote_path, kind, e
                            );
                            return UploadOutcome::failed(
                                folder,
                                file_name,
                                &remote_path,
                                attempt.saturating_add(1),
                                started.elapsed(),
                                Some(kind),
                                format!("[{}] {}", kind, e),
                            );
                        }
                    }
                }
            }
        }

        // decide() 在 attempt == max_retries 时必然放弃，正常不会走到这里
        UploadOutcome::failed(
            folder,
            file_name,
            &remote_path,
            max_retries.saturating_add(1),
            started.elapsed(),
            last_kind,
            "上传失败",
        )
    }

    /// 单次上传尝试
    async fn attempt_upload(
        &self,
        remote_folder: &str,
        remote_path: &str,
        content: &[u8],
        cancel: &CancellationToken,
    ) -> Result<DriveItem, AttemptFailure> {
        // 1. 获取新令牌
        let credential = self.tokens.acquire_token().await?;

        // 2. 解析文档库
        if cancel.is_cancelled() {
            return Err(AttemptFailure::Cancelled);
        }
        let drive = self.resolve_drive(&credential).await?;

        // 3. 确保目录存在
        if cancel.is_cancelled() {
            return Err(AttemptFailure::Cancelled);
        }
        let created = self
            .resolver
            .ensure_path(&credential, &drive.drive_id, remote_folder, cancel)
            .await?;
        if created > 0 {
            debug!("已创建 {} 级远程目录: {}", created, remote_folder);
        }

        // 4. 上传内容
        if cancel.is_cancelled() {
            return Err(AttemptFailure::Cancelled);
        }
        let item = self
            .store
            .upload_content(&credential, &drive.drive_id, remote_path, content.to_vec())
            .await?;

        Ok(item)
    }

    /// 解析站点的默认文档库（成功结果按站点缓存）
    pub async fn resolve_drive(
        &self,
        credential: &RemoteCredential,
    ) -> Result<DriveTarget, RemoteError> {
        let site_url = &self.target.site_url;

        if let Some(cached) = self.drive_cache.get(site_url).map(|entry| entry.clone()) {
            return Ok(cached);
        }

        let site_id = self.store.resolve_site(credential, site_url).await?;
        let drives = self.store.list_drives(credential, &site_id).await?;
        let drive = select_default_drive(&drives, &self.target.drive_name)
            .ok_or_else(|| RemoteError::DriveNotFound(site_url.clone()))?;

        let target = DriveTarget {
            site_id,
            drive_id: drive.id.clone(),
        };

        info!(
            "文档库解析完成: site={} ({}), drive={} ({})",
            site_url, target.site_id, drive.name, target.drive_id
        );
        self.drive_cache.insert(site_url.clone(), target.clone());

        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploader::retry::FailureKind;
    use crate::uploader::task::OutcomeStatus;
    use crate::uploader::testing::{MockStore, StaticTokens};
    use std::time::Duration;

    fn engine(store: Arc<MockStore>, tokens: Arc<StaticTokens>) -> UploadEngine {
        UploadEngine::new(
            store,
            tokens,
            UploadTarget::new("https://contoso.sharepoint.com/sites/evidence")
                .with_base_path("Evidence"),
        )
    }

    fn unavailable() -> RemoteError {
        RemoteError::status(503, "Service Unavailable")
    }

    fn throttled() -> RemoteError {
        RemoteError::status(429, "Too Many Requests")
    }

    #[tokio::test]
    async fn test_upload_first_attempt() {
        let store = Arc::new(MockStore::new());
        let tokens = Arc::new(StaticTokens::new());
        let engine = engine(store.clone(), tokens.clone());

        let outcome = engine
            .upload_with_retry("Seals/2024", "seal-0001.jpg", b"jpeg", 3)
            .await;

        assert_eq!(outcome.status, OutcomeStatus::Succeeded);
        assert_eq!(outcome.attempt_count, 1);
        assert!(outcome.error_message.is_none());
        assert_eq!(outcome.remote_path, "Evidence/Seals/2024/seal-0001.jpg");
        assert!(store.uploaded("Evidence/Seals/2024/seal-0001.jpg"));
        assert!(store.has_folder("Evidence/Seals/2024"));
        assert_eq!(tokens.acquired(), 1);
    }

    #[tokio::test]
    async fn test_file_name_is_sanitized() {
        let store = Arc::new(MockStore::new());
        let engine = engine(store.clone(), Arc::new(StaticTokens::new()));

        let outcome = engine
            .upload_with_retry("", "POD 12:30?.pdf", b"%PDF", 0)
            .await;

        assert!(outcome.is_success());
        // 结果保留原始文件名，远程路径使用清理后的名称
        assert_eq!(outcome.file_name, "POD 12:30?.pdf");
        assert!(store.uploaded("Evidence/POD 12_30_.pdf"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_retries_on_service_unavailable() {
        let store = Arc::new(MockStore::new());
        store.fail_always("broken.pdf", unavailable());
        let tokens = Arc::new(StaticTokens::new());
        let engine = engine(store.clone(), tokens.clone());

        let outcome = engine.upload_with_retry("HR", "broken.pdf", b"x", 3).await;

        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(outcome.attempt_count, 4);
        assert_eq!(store.upload_attempts("broken.pdf"), 4);
        assert_eq!(outcome.failure_kind, Some(FailureKind::ServiceUnavailable));
        assert!(outcome.error_message.unwrap().contains("503"));
        // 每次尝试都重新获取令牌
        assert_eq!(tokens.acquired(), 4);
        // 2 + 4 + 8
        assert!(outcome.elapsed >= Duration::from_secs(14));
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_success_stops_retrying() {
        let store = Arc::new(MockStore::new());
        store.script_failures("seal.jpg", vec![unavailable()]);
        let engine = engine(store.clone(), Arc::new(StaticTokens::new()));

        let outcome = engine.upload_with_retry("Seals", "seal.jpg", b"x", 3).await;

        assert_eq!(outcome.status, OutcomeStatus::Succeeded);
        assert_eq!(outcome.attempt_count, 2);
        assert_eq!(store.upload_attempts("seal.jpg"), 2);
        assert!(outcome.elapsed >= Duration::from_secs(2));
        assert!(outcome.elapsed < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_cooldown_is_independent_of_attempt() {
        let store = Arc::new(MockStore::new());
        store.script_failures("first.jpg", vec![throttled()]);
        store.script_failures("second.jpg", vec![unavailable(), throttled()]);
        let engine = engine(store.clone(), Arc::new(StaticTokens::new()));

        let first = engine.upload_with_retry("", "first.jpg", b"x", 3).await;
        assert!(first.is_success());
        assert!(first.elapsed >= Duration::from_secs(30));
        assert!(first.elapsed < Duration::from_secs(31));

        // 第 2 次失败是限流：仍然是 30s，而不是退避序列中的 4s
        let second = engine.upload_with_retry("", "second.jpg", b"x", 3).await;
        assert!(second.is_success());
        assert_eq!(second.attempt_count, 3);
        assert!(second.elapsed >= Duration::from_secs(32));
        assert!(second.elapsed < Duration::from_secs(33));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_follows_schedule() {
        let store = Arc::new(MockStore::new());
        store.script_failures("pod.pdf", vec![unavailable(), unavailable()]);
        let engine = engine(store.clone(), Arc::new(StaticTokens::new()));

        let outcome = engine.upload_with_retry("POD", "pod.pdf", b"x", 3).await;

        assert_eq!(outcome.attempt_count, 3);
        // 2s + 4s
        assert!(outcome.elapsed >= Duration::from_secs(6));
        assert!(outcome.elapsed < Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_retry_budget_does_not_overflow() {
        let store = Arc::new(MockStore::new());
        store.script_failures("seal.jpg", vec![unavailable()]);
        let engine = engine(store.clone(), Arc::new(StaticTokens::new()));

        let outcome = engine
            .upload_with_retry("", "seal.jpg", b"x", u32::MAX)
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempt_count, 2);
        assert_eq!(
            RetryPolicy::default()
                .with_max_retries(u32::MAX)
                .decide(FailureKind::Other, u32::MAX),
            RetryDecision::GiveUp
        );
    }

    #[tokio::test]
    async fn test_base_path_is_normalized() {
        let store = Arc::new(MockStore::new());
        let engine = UploadEngine::new(
            store.clone(),
            Arc::new(StaticTokens::new()),
            UploadTarget::new("https://contoso.sharepoint.com/sites/evidence")
                .with_base_path("\\Evidence\\2024//"),
        );

        let outcome = engine.upload_with_retry("HR", "a.pdf", b"x", 0).await;

        assert_eq!(engine.target().base_path, "Evidence/2024");
        assert_eq!(outcome.remote_path, "Evidence/2024/HR/a.pdf");
        assert!(store.uploaded("Evidence/2024/HR/a.pdf"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retried() {
        let store = Arc::new(MockStore::new());
        store.script_failures("slow.png", vec![RemoteError::Timeout("operation timed out".into())]);
        let engine = engine(store.clone(), Arc::new(StaticTokens::new()));

        let outcome = engine.upload_with_retry("", "slow.png", b"x", 1).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempt_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_failure_counts_as_attempt() {
        let store = Arc::new(MockStore::new());
        let tokens = Arc::new(StaticTokens::new());
        tokens.fail_next(throttled());
        let engine = engine(store.clone(), tokens.clone());

        let outcome = engine.upload_with_retry("", "badge.png", b"x", 2).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempt_count, 2);
        assert_eq!(tokens.acquired(), 2);
        assert_eq!(store.upload_attempts("badge.png"), 1);
    }

    #[tokio::test]
    async fn test_drive_resolution_is_cached() {
        let store = Arc::new(MockStore::new());
        let engine = engine(store.clone(), Arc::new(StaticTokens::new()));

        for name in ["a.jpg", "b.jpg", "c.jpg"] {
            assert!(engine.upload_with_retry("HR", name, b"x", 0).await.is_success());
        }

        assert_eq!(store.site_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_drive_resolution_is_not_cached() {
        let store = Arc::new(MockStore::new());
        store.fail_site_resolution_once(unavailable());
        let engine = engine(store.clone(), Arc::new(StaticTokens::new()));

        let outcome = engine.upload_with_retry("HR", "a.jpg", b"x", 1).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempt_count, 2);
        assert_eq!(store.site_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let store = Arc::new(MockStore::new());
        store.fail_always("stuck.pdf", unavailable());
        let engine = engine(store.clone(), Arc::new(StaticTokens::new()));
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                cancel.cancel();
            })
        };

        let outcome = engine
            .upload_with_cancel("", "stuck.pdf", b"x", 3, &cancel, None)
            .await;
        canceller.await.unwrap();

        assert_eq!(outcome.status, OutcomeStatus::Cancelled);
        assert_eq!(outcome.attempt_count, 1);
        assert_eq!(outcome.failure_kind, Some(FailureKind::ServiceUnavailable));
        assert!(outcome.elapsed < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let store = Arc::new(MockStore::new());
        let engine = engine(store.clone(), Arc::new(StaticTokens::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = engine
            .upload_with_cancel("", "never.pdf", b"x", 3, &cancel, None)
            .await;

        assert!(outcome.is_cancelled());
        assert_eq!(outcome.attempt_count, 1);
        assert_eq!(store.upload_attempts("never.pdf"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_failed_events() {
        let store = Arc::new(MockStore::new());
        store.script_failures("seal.jpg", vec![throttled()]);
        let engine = engine(store.clone(), Arc::new(StaticTokens::new()));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let outcome = engine
            .upload_with_cancel("", "seal.jpg", b"x", 3, &CancellationToken::new(), Some(&tx))
            .await;
        assert!(outcome.is_success());

        match rx.try_recv().unwrap() {
            BatchEvent::AttemptFailed {
                attempt,
                kind,
                retry_in_ms,
                ..
            } => {
                assert_eq!(attempt, 1);
                assert_eq!(kind, FailureKind::RateLimited);
                assert_eq!(retry_in_ms, 30_000);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }
}
