// 远程文档存储 API 数据类型

use serde::{Deserialize, Serialize};

/// 远程调用错误
///
/// 只描述"发生了什么"，是否重试由上传器的重试策略决定
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// 服务端返回非 2xx 状态码
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    /// 本地请求超时
    #[error("请求超时: {0}")]
    Timeout(String),
    /// 连接、DNS 等传输层错误
    #[error("网络请求失败: {0}")]
    Transport(String),
    /// 响应体无法解析
    #[error("响应解析失败: {0}")]
    Decode(String),
    /// 站点下没有可用的文档库
    #[error("未找到文档库: {0}")]
    DriveNotFound(String),
}

impl RemoteError {
    /// 构造状态码错误
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        RemoteError::Status {
            status,
            message: message.into(),
        }
    }

    /// 返回 HTTP 状态码（如果有）
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RemoteError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RemoteError::Timeout(e.to_string())
        } else if e.is_decode() {
            RemoteError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            RemoteError::status(status.as_u16(), e.to_string())
        } else {
            RemoteError::Transport(e.to_string())
        }
    }
}

/// 站点信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteInfo {
    /// 站点 ID
    pub id: String,
    /// 显示名称
    #[serde(default, rename = "displayName")]
    pub display_name: Option<String>,
    /// 站点 Web 地址
    #[serde(default, rename = "webUrl")]
    pub web_url: Option<String>,
}

/// 文档库（Drive）信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveInfo {
    /// 文档库 ID
    pub id: String,
    /// 文档库名称
    #[serde(default)]
    pub name: String,
    /// 文档库类型（documentLibrary / personal / business）
    #[serde(default, rename = "driveType")]
    pub drive_type: Option<String>,
}

/// 文档库列表响应
#[derive(Debug, Clone, Deserialize)]
pub struct DriveListResponse {
    #[serde(default)]
    pub value: Vec<DriveInfo>,
}

/// 文档库中的文件或文件夹
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveItem {
    /// 条目 ID
    #[serde(default)]
    pub id: String,
    /// 条目名称
    #[serde(default)]
    pub name: String,
    /// 文件大小（字节）
    #[serde(default)]
    pub size: Option<u64>,
    /// Web 访问地址
    #[serde(default, rename = "webUrl")]
    pub web_url: Option<String>,
}

/// 服务端错误响应体 {"error": {"code": "...", "message": "..."}}
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// 创建文件夹结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderCreation {
    /// 新建成功
    Created,
    /// 同名文件夹已存在（包括并发创建产生的冲突）
    AlreadyExists,
}

/// 上传目标：站点 + 文档库
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveTarget {
    pub site_id: String,
    pub drive_id: String,
}

/// 选择默认文档库
///
/// 优先级：名称匹配（忽略大小写） > 第一个 documentLibrary > 第一个
pub fn select_default_drive<'a>(drives: &'a [DriveInfo], preferred_name: &str) -> Option<&'a DriveInfo> {
    if !preferred_name.is_empty() {
        if let Some(drive) = drives
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(preferred_name))
        {
            return Some(drive);
        }
    }

    drives
        .iter()
        .find(|d| d.drive_type.as_deref() == Some("documentLibrary"))
        .or_else(|| drives.first())
}
