// Evidence Uploader Library
// 证据文件批量迁移上传核心库

// 认证模块
pub mod auth;

// 配置管理模块
pub mod config;

// 日志模块
pub mod logging;

// 远程文档存储模块
pub mod remote;

// 上传引擎模块
pub mod uploader;

// 导出常用类型
pub use auth::{ClientCredentialsProvider, RemoteCredential, TokenProvider};
pub use config::AppConfig;
pub use remote::{DocumentStore, DriveClient, RemoteError};
pub use uploader::{
    BatchReport, RetryPolicy, UploadEngine, UploadError, UploadManager, UploadOutcome,
    UploadTarget, UploadTask,
};
