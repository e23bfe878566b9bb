use anyhow::Context;
use evidence_uploader::{
    auth::ClientCredentialsProvider,
    config::{AppConfig, LogConfig, DEFAULT_CONFIG_PATH},
    logging,
    remote::DriveClient,
    uploader::{
        format_bytes, plan_batches, BatchEvent, BatchReport, FolderScanner, ScanOptions,
        UploadEngine, UploadManager, UploadTarget,
    },
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 加载日志配置
///
/// 日志系统要先于完整配置初始化，这里只读取 [log] 表，失败时返回默认配置
async fn load_log_config(config_path: &str) -> LogConfig {
    if let Ok(content) = tokio::fs::read_to_string(config_path).await {
        if let Ok(config) = toml::from_str::<toml::Value>(&content) {
            if let Some(log_table) = config.get("log") {
                if let Ok(log_config) = log_table.clone().try_into::<LogConfig>() {
                    return log_config;
                }
            }
        }
    }

    LogConfig::default()
}

/// 消费进度事件并输出日志
async fn log_progress(mut rx: mpsc::UnboundedReceiver<BatchEvent>) {
    let mut total = 0usize;
    let mut finished = 0usize;

    while let Some(event) = rx.recv().await {
        match event {
            BatchEvent::BatchStarted { total: count, .. } => total = count,
            BatchEvent::TaskFinished { outcome, .. } => {
                finished += 1;
                if outcome.is_success() {
                    info!(
                        "[{}/{}] ✓ {} (尝试 {} 次)",
                        finished, total, outcome.remote_path, outcome.attempt_count
                    );
                } else {
                    warn!(
                        "[{}/{}] ✗ {}: {}",
                        finished,
                        total,
                        outcome.remote_path,
                        outcome.error_message.as_deref().unwrap_or("未知错误")
                    );
                }
            }
            _ => {}
        }
    }
}

/// 保存批次报告: report_dir/batch-<id>.json
async fn write_report(report_dir: &Path, report: &BatchReport) -> anyhow::Result<PathBuf> {
    tokio::fs::create_dir_all(report_dir)
        .await
        .with_context(|| format!("创建报告目录失败: {}", report_dir.display()))?;

    let path = report_dir.join(format!("batch-{}.json", report.batch_id));
    let content = serde_json::to_string_pretty(report).context("序列化批次报告失败")?;
    tokio::fs::write(&path, content)
        .await
        .with_context(|| format!("写入批次报告失败: {}", path.display()))?;

    Ok(path)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 先加载日志配置（必须保持 _log_guard 存活）
    let log_config = load_log_config(DEFAULT_CONFIG_PATH).await;
    let _log_guard = logging::init_logging(&log_config);

    info!("Evidence Uploader v{} 启动中...", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load_or_default(DEFAULT_CONFIG_PATH).await;
    config.validate().context("配置校验失败")?;

    // 远程组件
    let tokens = Arc::new(ClientCredentialsProvider::from_config(&config.remote)?);
    let store = Arc::new(DriveClient::from_config(&config.remote)?);
    let engine = UploadEngine::new(store, tokens, UploadTarget::from_config(&config.remote))
        .with_policy(config.upload.retry_policy());
    let engine = Arc::new(engine);
    let manager = UploadManager::new(Arc::clone(&engine));

    // 扫描本地证据文件
    let scanner = FolderScanner::with_options(ScanOptions::from_config(&config.migration));
    let files = scanner.scan(&config.migration.source_dir)?;

    if files.is_empty() {
        info!("没有需要上传的文件: {}", config.migration.source_dir.display());
        return Ok(());
    }

    // 批次内的重复由 UploadManager 拒绝，这里检查跨批次的远程路径冲突
    let mut seen: HashMap<String, PathBuf> = HashMap::with_capacity(files.len());
    for file in &files {
        let (_, remote_path) =
            engine.remote_location(&file.destination_folder(), &file.file_name());
        if let Some(first) = seen.insert(remote_path.to_lowercase(), file.local_path.clone()) {
            anyhow::bail!(
                "远程路径冲突: {} 与 {} 都会上传到 {}",
                first.display(),
                file.local_path.display(),
                remote_path
            );
        }
    }

    // Ctrl-C 取消批次
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("收到中断信号，正在取消上传...");
                cancel.cancel();
            }
        });
    }

    // 按文件数和总大小分批，每次只把当前批次的文件读入内存
    let batches = plan_batches(
        files,
        config.migration.batch_max_files,
        config.migration.batch_max_bytes,
    );
    let batch_count = batches.len();

    let mut succeeded = 0usize;
    let mut failed = 0usize;
    let mut cancelled = 0usize;

    for (index, batch) in batches.into_iter().enumerate() {
        if cancel.is_cancelled() {
            warn!("批次已取消，剩余 {} 个批次未执行", batch_count - index);
            break;
        }

        let mut tasks = Vec::with_capacity(batch.len());
        for file in batch {
            let local_path = file.local_path.clone();
            match file.into_task().await {
                Ok(task) => tasks.push(task),
                Err(e) => warn!("读取文件失败，已跳过: {}: {:#}", local_path.display(), e),
            }
        }

        if tasks.is_empty() {
            continue;
        }

        let total_bytes: u64 = tasks.iter().map(|t| t.size() as u64).sum();
        info!(
            "开始第 {}/{} 批: {} 个文件，共 {}",
            index + 1,
            batch_count,
            tasks.len(),
            format_bytes(total_bytes)
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let progress = tokio::spawn(log_progress(rx));

        let report = manager
            .upload_batch_with_progress(
                &tasks,
                config.upload.max_concurrency,
                cancel.clone(),
                Some(tx),
            )
            .await?;

        // 所有发送端随批次结束而释放，进度任务随之退出
        if let Err(e) = progress.await {
            warn!("进度日志任务异常: {}", e);
        }

        let report_path = write_report(&config.migration.report_dir, &report).await?;
        info!("批次报告已保存: {}", report_path.display());

        succeeded += report.succeeded_count;
        failed += report.failed_count;
        cancelled += report.cancelled_count();
    }

    if failed > 0 {
        error!(
            "{} 个文件上传失败（其中取消 {} 个），补传时可重新运行",
            failed, cancelled
        );
        anyhow::bail!("{} 个文件上传失败", failed);
    }

    info!("全部 {} 个文件上传成功", succeeded);
    Ok(())
}
