// 令牌获取
//
// 使用 OAuth2 client credentials 流程向身份认证服务换取访问令牌

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::auth::{RemoteCredential, TokenResponse};
use crate::config::RemoteConfig;
use crate::remote::{ApiErrorResponse, RemoteError};

/// 令牌提供者
///
/// 实现必须可重入：上传器会在多个并发任务中同时调用
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// 获取一个新的访问令牌
    async fn acquire_token(&self) -> Result<RemoteCredential, RemoteError>;
}

/// client credentials 令牌提供者
pub struct ClientCredentialsProvider {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
}

impl ClientCredentialsProvider {
    /// 创建令牌提供者
    pub fn new(
        authority_host: &str,
        tenant_id: &str,
        client_id: &str,
        client_secret: &str,
        scope: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            token_url: format!(
                "{}/{}/oauth2/v2.0/token",
                authority_host.trim_end_matches('/'),
                urlencoding::encode(tenant_id)
            ),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            scope: scope.to_string(),
        })
    }

    /// 从配置创建（密钥缺失时报错）
    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        let secret = config.resolve_client_secret().with_context(|| {
            format!(
                "未配置客户端密钥：请填写 remote.client_secret 或设置环境变量 {}",
                crate::config::CLIENT_SECRET_ENV
            )
        })?;

        Self::new(
            &config.authority_host,
            &config.tenant_id,
            &config.client_id,
            &secret,
            &config.scope,
            config.request_timeout(),
        )
    }

    /// 令牌端点
    pub fn token_url(&self) -> &str {
        &self.token_url
    }
}

#[async_trait]
impl TokenProvider for ClientCredentialsProvider {
    async fn acquire_token(&self) -> Result<RemoteCredential, RemoteError> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];

        let response = self.client.post(&self.token_url).form(&form).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // 身份服务错误格式：{"error": "...", "error_description": "..."}
            #[derive(serde::Deserialize)]
            struct OAuthError {
                #[serde(default)]
                error: String,
                #[serde(default)]
                error_description: String,
            }
            let message = serde_json::from_str::<OAuthError>(&body)
                .map(|e| format!("{} - {}", e.error, e.error_description))
                .or_else(|_| {
                    serde_json::from_str::<ApiErrorResponse>(&body).map(|e| e.error.message)
                })
                .unwrap_or(body);
            return Err(RemoteError::status(status.as_u16(), message));
        }

        let token: TokenResponse = response.json().await?;
        let credential = RemoteCredential::from(token);
        debug!("获取访问令牌成功, 过期时间={}", credential.expires_at());
        Ok(credential)
    }
}
