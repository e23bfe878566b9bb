// 认证模块数据类型定义

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

/// 令牌有效期上限（秒）
pub const MAX_TOKEN_LIFETIME_SECS: i64 = 24 * 60 * 60;

/// 远程访问凭证（短期 Bearer Token）
///
/// 每次上传尝试都重新获取，不跨重试缓存
#[derive(Clone)]
pub struct RemoteCredential {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl RemoteCredential {
    /// 创建凭证
    pub fn new(access_token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at,
        }
    }

    /// 根据有效期（秒）创建凭证
    ///
    /// 有效期来自身份服务，先限制在 [0, MAX_TOKEN_LIFETIME_SECS] 内
    pub fn expiring_in(access_token: impl Into<String>, expires_in_secs: i64) -> Self {
        let lifetime = Duration::seconds(expires_in_secs.clamp(0, MAX_TOKEN_LIFETIME_SECS));
        let now = Utc::now();
        let expires_at = now.checked_add_signed(lifetime).unwrap_or(now);
        Self::new(access_token, expires_at)
    }

    /// 访问令牌
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// 过期时间
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

}

impl std::fmt::Debug for RemoteCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCredential")
            .field("access_token", &"***")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// OAuth2 令牌响应
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    /// 有效期（秒）
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

impl From<TokenResponse> for RemoteCredential {
    fn from(response: TokenResponse) -> Self {
        RemoteCredential::expiring_in(response.access_token, response.expires_in)
    }
}
