// 上传模块
//
// - retry: 失败分类与重试策略
// - path: 远程路径规范化与逐级建目录
// - engine: 单文件上传（令牌、文档库解析、建目录、重试、取消）
// - manager: 批量上传（Semaphore 限流，JoinSet 收集结果）
// - folder: 本地证据文件夹扫描

pub mod engine;
pub mod error;
pub mod events;
pub mod folder;
pub mod manager;
pub mod path;
pub mod retry;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{UploadEngine, UploadTarget};
pub use error::UploadError;
pub use events::{BatchEvent, ProgressSink};
pub use folder::{format_bytes, plan_batches, FolderScanner, ScanOptions, ScannedFile};
pub use manager::{UploadManager, DEFAULT_MAX_CONCURRENCY};
pub use path::{join_remote_path, normalize_remote_path, sanitize_name, PathResolver};
pub use retry::{classify_failure, FailureKind, RetryDecision, RetryPolicy};
pub use task::{BatchReport, OutcomeStatus, UploadOutcome, UploadTask};
