// 重试策略
//
// 纯函数：(失败类型, 尝试序号, 策略常量) -> 重试决策
// - 限流：固定冷却时间，与尝试序号无关（远端限流窗口基本是固定时长）
// - 服务不可用 / 超时 / 其他：按固定序列指数退避，超出序列后保持最后一个值
// - attempt >= max_retries 时放弃

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::remote::RemoteError;

/// 默认最大重试次数
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// 限流冷却时间（秒）
pub const RATE_LIMIT_COOLDOWN_SECS: u64 = 30;

/// 默认退避序列（秒）
pub const DEFAULT_BACKOFF_SCHEDULE_SECS: [u64; 3] = [2, 4, 8];

/// 失败类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// 远端限流（429）
    RateLimited,
    /// 远端暂时不可用（503）
    ServiceUnavailable,
    /// 本地请求超时
    Timeout,
    /// 未分类错误
    Other,
}

impl FailureKind {
    /// 日志/错误信息中使用的标签
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::RateLimited => "限流",
            FailureKind::ServiceUnavailable => "服务不可用",
            FailureKind::Timeout => "超时",
            FailureKind::Other => "未分类错误",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 重试决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// 等待 after 后重试
    Retry { after: Duration },
    /// 放弃
    GiveUp,
}

/// 错误分类
///
/// 429 -> 限流，503 -> 服务不可用，本地超时 -> 超时，其余 -> 未分类
pub fn classify_failure(error: &RemoteError) -> FailureKind {
    match error {
        RemoteError::Status { status: 429, .. } => FailureKind::RateLimited,
        RemoteError::Status { status: 503, .. } => FailureKind::ServiceUnavailable,
        RemoteError::Timeout(_) => FailureKind::Timeout,
        _ => FailureKind::Other,
    }
}

/// 重试策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    rate_limit_cooldown: Duration,
    backoff_schedule: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_RETRIES,
            Duration::from_secs(RATE_LIMIT_COOLDOWN_SECS),
            default_backoff_schedule(),
        )
    }
}

fn default_backoff_schedule() -> Vec<Duration> {
    DEFAULT_BACKOFF_SCHEDULE_SECS
        .iter()
        .map(|secs| Duration::from_secs(*secs))
        .collect()
}

impl RetryPolicy {
    /// 创建策略；退避序列为空时使用默认序列
    pub fn new(max_retries: u32, rate_limit_cooldown: Duration, backoff_schedule: Vec<Duration>) -> Self {
        let backoff_schedule = if backoff_schedule.is_empty() {
            default_backoff_schedule()
        } else {
            backoff_schedule
        };

        Self {
            max_retries,
            rate_limit_cooldown,
            backoff_schedule,
        }
    }

    /// 替换最大重试次数
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn rate_limit_cooldown(&self) -> Duration {
        self.rate_limit_cooldown
    }

    /// 第 attempt 次失败后的退避时长（超出序列保持最后一个值）
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let index = (attempt as usize).min(self.backoff_schedule.len() - 1);
        self.backoff_schedule[index]
    }

    /// 根据失败类型和尝试序号（从 0 开始）给出决策
    pub fn decide(&self, kind: FailureKind, attempt: u32) -> RetryDecision {
        if attempt >= self.max_retries {
            return RetryDecision::GiveUp;
        }

        let after = match kind {
            FailureKind::RateLimited => self.rate_limit_cooldown,
            FailureKind::ServiceUnavailable | FailureKind::Timeout | FailureKind::Other => {
                self.backoff_for(attempt)
            }
        };

        RetryDecision::Retry { after }
    }
}
