// 调用方参数错误
//
// 普通上传失败不会走到这里，它们记录在 UploadOutcome 中

/// 批量上传参数错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    /// 并发数必须大于 0
    #[error("并发数无效: {0}（必须大于 0）")]
    InvalidConcurrency(usize),
    /// 任务参数无效
    #[error("第 {index} 个任务无效: {reason}")]
    InvalidTask { index: usize, reason: String },
}
