// 远程文档存储 HTTP 客户端

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use crate::auth::RemoteCredential;
use crate::config::RemoteConfig;
use crate::remote::{
    ApiErrorResponse, DocumentStore, DriveInfo, DriveItem, DriveListResponse, FolderCreation,
    RemoteError, SiteInfo,
};

/// 文档库 HTTP 客户端
#[derive(Debug, Clone)]
pub struct DriveClient {
    /// HTTP客户端
    client: Client,
    /// API 根地址（不含末尾 /）
    api_base: String,
}

impl DriveClient {
    /// 创建新的客户端
    ///
    /// # 参数
    /// * `api_base` - API 根地址，如 https://graph.microsoft.com/v1.0
    /// * `timeout` - 单次请求超时
    pub fn new(api_base: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        info!(
            "初始化文档库客户端: api={}, timeout={}s",
            api_base,
            timeout.as_secs()
        );

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    /// 从配置创建
    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        Self::new(&config.api_base, config.request_timeout())
    }

    /// 构造站点查询 URL
    ///
    /// - https://host -> {api}/sites/host
    /// - https://host/sites/x -> {api}/sites/host:/sites/x
    fn site_lookup_url(&self, site_url: &str) -> Result<String, RemoteError> {
        let parsed = Url::parse(site_url)
            .map_err(|e| RemoteError::Decode(format!("站点 URL 无效: {}: {}", site_url, e)))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| RemoteError::Decode(format!("站点 URL 缺少主机名: {}", site_url)))?;

        let relative = parsed.path().trim_matches('/');
        if relative.is_empty() {
            Ok(format!("{}/sites/{}", self.api_base, host))
        } else {
            Ok(format!("{}/sites/{}:/{}", self.api_base, host, relative))
        }
    }

    /// 文档库内路径寻址 URL：{api}/drives/{id}/root:/{path}
    fn item_url(&self, drive_id: &str, path: &str) -> String {
        format!(
            "{}/drives/{}/root:/{}",
            self.api_base,
            urlencoding::encode(drive_id),
            encode_path(path)
        )
    }

    /// 子项集合 URL（根目录不能使用路径寻址）
    fn children_url(&self, drive_id: &str, parent_path: &str) -> String {
        if parent_path.is_empty() {
            format!(
                "{}/drives/{}/root/children",
                self.api_base,
                urlencoding::encode(drive_id)
            )
        } else {
            format!("{}:/children", self.item_url(drive_id, parent_path))
        }
    }
}

/// 逐段编码路径，保留分隔符
fn encode_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// 将非 2xx 响应转换为错误，提取服务端 error.message
async fn error_from_response(response: Response) -> RemoteError {
    let status = response.status();
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => return RemoteError::from(e),
    };

    let message = serde_json::from_str::<ApiErrorResponse>(&body)
        .map(|parsed| {
            if parsed.error.code.is_empty() {
                parsed.error.message
            } else {
                format!("{} - {}", parsed.error.code, parsed.error.message)
            }
        })
        .unwrap_or(body);

    RemoteError::status(status.as_u16(), message)
}

#[async_trait]
impl DocumentStore for DriveClient {
    async fn resolve_site(
        &self,
        credential: &RemoteCredential,
        site_url: &str,
    ) -> Result<String, RemoteError> {
        let url = self.site_lookup_url(site_url)?;
        debug!("解析站点: {}", url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(credential.access_token())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let site: SiteInfo = response.json().await?;
        info!("站点解析成功: {} -> {}", site_url, site.id);
        Ok(site.id)
    }

    async fn list_drives(
        &self,
        credential: &RemoteCredential,
        site_id: &str,
    ) -> Result<Vec<DriveInfo>, RemoteError> {
        let url = format!(
            "{}/sites/{}/drives",
            self.api_base,
            urlencoding::encode(site_id)
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(credential.access_token())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let drives: DriveListResponse = response.json().await?;
        debug!("站点 {} 共 {} 个文档库", site_id, drives.value.len());
        Ok(drives.value)
    }

    async fn folder_exists(
        &self,
        credential: &RemoteCredential,
        drive_id: &str,
        path: &str,
    ) -> Result<bool, RemoteError> {
        let response = self
            .client
            .get(self.item_url(drive_id, path))
            .bearer_auth(credential.access_token())
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(error_from_response(response).await),
        }
    }

    async fn create_folder(
        &self,
        credential: &RemoteCredential,
        drive_id: &str,
        parent_path: &str,
        name: &str,
    ) -> Result<FolderCreation, RemoteError> {
        // conflictBehavior=fail：同名时返回 409，不自动重命名
        let body = json!({
            "name": name,
            "folder": {},
            "@microsoft.graph.conflictBehavior": "fail",
        });

        let response = self
            .client
            .post(self.children_url(drive_id, parent_path))
            .bearer_auth(credential.access_token())
            .json(&body)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(FolderCreation::Created),
            StatusCode::CONFLICT => Ok(FolderCreation::AlreadyExists),
            _ => Err(error_from_response(response).await),
        }
    }

    async fn upload_content(
        &self,
        credential: &RemoteCredential,
        drive_id: &str,
        path: &str,
        content: Vec<u8>,
    ) -> Result<DriveItem, RemoteError> {
        let size = content.len();
        let url = format!("{}:/content", self.item_url(drive_id, path));
        debug!("上传文件: path={}, size={}", path, size);

        let response = self
            .client
            .put(&url)
            .bearer_auth(credential.access_token())
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(content)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let item: DriveItem = response.json().await?;
        debug!("上传成功: path={}, id={}", path, item.id);
        Ok(item)
    }
}
