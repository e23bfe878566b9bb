// 认证模块：远程文档存储的访问令牌

pub mod provider;
pub mod types;

pub use provider::{ClientCredentialsProvider, TokenProvider};
pub use types::{RemoteCredential, TokenResponse};
