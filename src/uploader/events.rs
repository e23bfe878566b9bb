//! 批量上传进度事件
//!
//! 事件通过调用方传入的 channel 推送，作用域仅限一次批量调用

use serde::Serialize;
use tokio::sync::mpsc;

use crate::uploader::retry::FailureKind;
use crate::uploader::task::UploadOutcome;

/// 进度接收端（由调用方创建并持有 Receiver）
pub type ProgressSink = mpsc::UnboundedSender<BatchEvent>;

/// 批量上传事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum BatchEvent {
    /// 批次开始
    BatchStarted { batch_id: String, total: usize },
    /// 任务获得并发许可，开始上传
    TaskStarted { batch_id: String, file_name: String },
    /// 某次尝试失败，即将重试
    AttemptFailed {
        file_name: String,
        /// 失败的尝试序号（从 1 开始）
        attempt: u32,
        kind: FailureKind,
        retry_in_ms: u64,
        error: String,
    },
    /// 任务结束
    TaskFinished { batch_id: String, outcome: UploadOutcome },
    /// 批次结束
    BatchFinished {
        batch_id: String,
        succeeded: usize,
        failed: usize,
        cancelled: usize,
        elapsed_ms: u64,
    },
}

/// 推送事件；接收端已关闭时静默丢弃
pub(crate) fn emit(sink: Option<&ProgressSink>, event: BatchEvent) {
    if let Some(sink) = sink {
        let _ = sink.send(event);
    }
}
