// 批量上传管理器
//
// 调度策略：
// - 每个任务一个并发单元（JoinSet），Semaphore 控制同时上传的文件数
// - 单个文件重试耗尽不影响其他文件，批次总是处理全部任务
// - 结果按完成顺序收集，由 join_next 逐个取回，不共享可变列表
// - 取消令牌在等待许可、每次尝试前、退避等待期间生效

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::uploader::engine::UploadEngine;
use crate::uploader::error::UploadError;
use crate::uploader::events::{emit, BatchEvent, ProgressSink};
use crate::uploader::task::{BatchReport, UploadOutcome, UploadTask};

/// 默认批量并发数
pub const DEFAULT_MAX_CONCURRENCY: usize = 5;

/// 批量上传管理器
#[derive(Clone)]
pub struct UploadManager {
    /// 单文件上传引擎（所有并发单元共享）
    engine: Arc<UploadEngine>,
    /// 单文件最大重试次数
    max_retries: u32,
}

impl UploadManager {
    /// 创建管理器，重试次数取引擎策略中的值
    pub fn new(engine: Arc<UploadEngine>) -> Self {
        let max_retries = engine.policy().max_retries();
        Self {
            engine,
            max_retries,
        }
    }

    /// 指定单文件最大重试次数
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn engine(&self) -> &Arc<UploadEngine> {
        &self.engine
    }

    /// 单文件上传（批次之外的一次性上传）
    pub async fn upload_one(&self, task: &UploadTask) -> UploadOutcome {
        self.engine
            .upload_with_retry(
                &task.destination_folder,
                &task.file_name,
                &task.content,
                self.max_retries,
            )
            .await
            .with_metadata(task.metadata.clone())
    }

    /// 批量上传
    ///
    /// # 参数
    /// * `tasks` - 上传任务（只读）
    /// * `max_concurrency` - 最大并发数（必须大于 0）
    /// * `cancel` - 取消令牌
    ///
    /// # 返回
    /// 批次报告；只有参数错误会返回 Err
    pub async fn upload_batch(
        &self,
        tasks: &[UploadTask],
        max_concurrency: usize,
        cancel: CancellationToken,
    ) -> Result<BatchReport, UploadError> {
        self.upload_batch_with_progress(tasks, max_concurrency, cancel, None)
            .await
    }

    /// 批量上传（带进度事件）
    pub async fn upload_batch_with_progress(
        &self,
        tasks: &[UploadTask],
        max_concurrency: usize,
        cancel: CancellationToken,
        progress: Option<ProgressSink>,
    ) -> Result<BatchReport, UploadError> {
        validate_batch(&self.engine, tasks, max_concurrency)?;

        let batch_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let started = Instant::now();
        let total = tasks.len();

        info!(
            "[批量上传] 开始: batch={}, 文件数={}, 并发数={}, 最大重试={}",
            batch_id, total, max_concurrency, self.max_retries
        );
        emit(
            progress.as_ref(),
            BatchEvent::BatchStarted {
                batch_id: batch_id.clone(),
                total,
            },
        );

        // 信号量控制并发数
        let semaphore = Arc::new(Semaphore::new(max_concurrency));

        // JoinSet 管理并发任务，返回 (任务序号, 结果)
        let mut join_set: JoinSet<(usize, UploadOutcome)> = JoinSet::new();

        for (index, task) in tasks.iter().cloned().enumerate() {
            let engine = self.engine.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let progress = progress.clone();
            let batch_id = batch_id.clone();
            let max_retries = self.max_retries;

            join_set.spawn(async move {
                // 等待许可，期间可被取消
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };

                let Some(_permit) = permit else {
                    let (_, remote_path) =
                        engine.remote_location(&task.destination_folder, &task.file_name);
                    let outcome = UploadOutcome::cancelled(
                        &task.destination_folder,
                        &task.file_name,
                        &remote_path,
                        1,
                        Duration::ZERO,
                        None,
                    )
                    .with_metadata(task.metadata.clone());
                    return (index, outcome);
                };

                emit(
                    progress.as_ref(),
                    BatchEvent::TaskStarted {
                        batch_id,
                        file_name: task.file_name.clone(),
                    },
                );

                let outcome = engine
                    .upload_with_cancel(
                        &task.destination_folder,
                        &task.file_name,
                        &task.content,
                        max_retries,
                        &cancel,
                        progress.as_ref(),
                    )
                    .await
                    .with_metadata(task.metadata.clone());

                // _permit 在此释放
                (index, outcome)
            });
        }

        let mut outcomes = Vec::with_capacity(total);
        let mut pending: HashSet<usize> = (0..total).collect();

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    pending.remove(&index);
                    emit(
                        progress.as_ref(),
                        BatchEvent::TaskFinished {
                            batch_id: batch_id.clone(),
                            outcome: outcome.clone(),
                        },
                    );
                    outcomes.push(outcome);
                }
                Err(e) => {
                    // 任务 panic，结果在下面补记
                    error!("[批量上传] 上传任务异常: {}", e);
                }
            }
        }

        // 异常退出的任务记为失败，保证每个任务都有结果
        let mut lost: Vec<usize> = pending.into_iter().collect();
        lost.sort_unstable();
        for index in lost {
            let task = &tasks[index];
            let (_, remote_path) = self
                .engine
                .remote_location(&task.destination_folder, &task.file_name);
            warn!("[批量上传] 任务异常退出，记为失败: {}", remote_path);
            outcomes.push(
                UploadOutcome::failed(
                    &task.destination_folder,
                    &task.file_name,
                    &remote_path,
                    1,
                    Duration::ZERO,
                    None,
                    "上传任务异常退出",
                )
                .with_metadata(task.metadata.clone()),
            );
        }

        let report = BatchReport::from_outcomes(batch_id.clone(), started_at, outcomes, started.elapsed());

        info!(
            "[批量上传] 完成: batch={}, 成功={}, 失败={}, 取消={}, 成功率={:.1}%, 耗时={:.1}s",
            batch_id,
            report.succeeded_count,
            report.failed_count,
            report.cancelled_count(),
            report.success_rate() * 100.0,
            report.total_elapsed.as_secs_f64()
        );
        emit(
            progress.as_ref(),
            BatchEvent::BatchFinished {
                batch_id,
                succeeded: report.succeeded_count,
                failed: report.failed_count,
                cancelled: report.cancelled_count(),
                elapsed_ms: report.total_elapsed.as_millis() as u64,
            },
        );

        Ok(report)
    }
}

/// 参数检查
///
/// 清理后的远程路径必须互不相同，否则后上传的文件会覆盖先上传的文件。
/// 文档库路径不区分大小写，比较时统一转为小写
fn validate_batch(
    engine: &UploadEngine,
    tasks: &[UploadTask],
    max_concurrency: usize,
) -> Result<(), UploadError> {
    if max_concurrency == 0 {
        return Err(UploadError::InvalidConcurrency(max_concurrency));
    }

    let mut seen: HashMap<String, usize> = HashMap::with_capacity(tasks.len());

    for (index, task) in tasks.iter().enumerate() {
        if task.file_name.trim().is_empty() {
            return Err(UploadError::InvalidTask {
                index,
                reason: "文件名为空".to_string(),
            });
        }

        let (_, remote_path) = engine.remote_location(&task.destination_folder, &task.file_name);
        if let Some(first) = seen.insert(remote_path.to_lowercase(), index) {
            return Err(UploadError::InvalidTask {
                index,
                reason: format!("远程路径与第 {} 个任务重复: {}", first, remote_path),
            });
        }
    }

    Ok(())
}
