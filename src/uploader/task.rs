// 上传任务、结果与批次报告

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::uploader::retry::FailureKind;

/// 上传任务
///
/// 内容使用 `Arc<[u8]>` 共享，批量调度时克隆任务不会复制文件数据
#[derive(Debug, Clone)]
pub struct UploadTask {
    /// 目标目录（相对于基础目录，空字符串表示基础目录本身）
    pub destination_folder: String,
    /// 文件名
    pub file_name: String,
    /// 文件内容
    pub content: Arc<[u8]>,
    /// 调用方关联标记（不透明）
    pub metadata: Option<String>,
}

impl UploadTask {
    /// 创建上传任务
    pub fn new(
        destination_folder: impl Into<String>,
        file_name: impl Into<String>,
        content: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            destination_folder: destination_folder.into(),
            file_name: file_name.into(),
            content: content.into(),
            metadata: None,
        }
    }

    /// 附加关联标记
    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    /// 文件大小
    pub fn size(&self) -> usize {
        self.content.len()
    }
}

/// 结果状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    /// 上传成功
    Succeeded,
    /// 重试耗尽后失败
    Failed,
    /// 因取消而中止（计入失败）
    Cancelled,
}

/// 单个任务的最终结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadOutcome {
    /// 文件名（任务中的原始文件名）
    pub file_name: String,
    /// 目标目录（任务中的原始目录）
    pub destination_folder: String,
    /// 远程完整路径
    pub remote_path: String,
    /// 调用方关联标记
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    /// 状态
    pub status: OutcomeStatus,
    /// 错误信息（仅失败/取消时存在）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// 最后一次失败的类型
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    /// 尝试次数（>= 1）
    pub attempt_count: u32,
    /// 耗时
    pub elapsed: Duration,
}

impl UploadOutcome {
    fn base(task_folder: &str, file_name: &str, remote_path: &str, attempt_count: u32, elapsed: Duration) -> Self {
        Self {
            file_name: file_name.to_string(),
            destination_folder: task_folder.to_string(),
            remote_path: remote_path.to_string(),
            metadata: None,
            status: OutcomeStatus::Succeeded,
            error_message: None,
            failure_kind: None,
            attempt_count: attempt_count.max(1),
            elapsed,
        }
    }

    /// 成功结果
    pub fn succeeded(
        destination_folder: &str,
        file_name: &str,
        remote_path: &str,
        attempt_count: u32,
        elapsed: Duration,
    ) -> Self {
        Self::base(destination_folder, file_name, remote_path, attempt_count, elapsed)
    }

    /// 失败结果
    pub fn failed(
        destination_folder: &str,
        file_name: &str,
        remote_path: &str,
        attempt_count: u32,
        elapsed: Duration,
        kind: Option<FailureKind>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status: OutcomeStatus::Failed,
            error_message: Some(message.into()),
            failure_kind: kind,
            ..Self::base(destination_folder, file_name, remote_path, attempt_count, elapsed)
        }
    }

    /// 取消结果
    pub fn cancelled(
        destination_folder: &str,
        file_name: &str,
        remote_path: &str,
        attempt_count: u32,
        elapsed: Duration,
        last_kind: Option<FailureKind>,
    ) -> Self {
        Self {
            status: OutcomeStatus::Cancelled,
            error_message: Some("上传已取消".to_string()),
            failure_kind: last_kind,
            ..Self::base(destination_folder, file_name, remote_path, attempt_count, elapsed)
        }
    }

    /// 附加关联标记
    pub fn with_metadata(mut self, metadata: Option<String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// 是否成功
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Succeeded
    }

    /// 是否被取消
    pub fn is_cancelled(&self) -> bool {
        self.status == OutcomeStatus::Cancelled
    }
}

/// 批次报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// 批次 ID
    pub batch_id: String,
    /// 开始时间
    pub started_at: DateTime<Utc>,
    /// 任务总数
    pub total_count: usize,
    /// 成功数
    pub succeeded_count: usize,
    /// 失败数（含取消）
    pub failed_count: usize,
    /// 各任务结果（按完成顺序）
    pub outcomes: Vec<UploadOutcome>,
    /// 批次总耗时
    pub total_elapsed: Duration,
}

impl BatchReport {
    /// 由结果列表汇总
    pub fn from_outcomes(
        batch_id: String,
        started_at: DateTime<Utc>,
        outcomes: Vec<UploadOutcome>,
        total_elapsed: Duration,
    ) -> Self {
        let succeeded_count = outcomes.iter().filter(|o| o.is_success()).count();
        Self {
            batch_id,
            started_at,
            total_count: outcomes.len(),
            succeeded_count,
            failed_count: outcomes.len() - succeeded_count,
            outcomes,
            total_elapsed,
        }
    }

    /// 成功率（空批次为 0）
    pub fn success_rate(&self) -> f64 {
        if self.total_count == 0 {
            0.0
        } else {
            self.succeeded_count as f64 / self.total_count as f64
        }
    }

    /// 取消数
    pub fn cancelled_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_cancelled()).count()
    }

    /// 失败（含取消）的结果
    pub fn failed_outcomes(&self) -> impl Iterator<Item = &UploadOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// 从原始任务中挑出失败的部分，用于补传
    pub fn retry_tasks(&self, tasks: &[UploadTask]) -> Vec<UploadTask> {
        tasks
            .iter()
            .filter(|task| {
                self.failed_outcomes().any(|o| {
                    o.file_name == task.file_name && o.destination_folder == task.destination_folder
                })
            })
            .cloned()
            .collect()
    }
}
