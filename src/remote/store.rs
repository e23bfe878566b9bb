// 远程文档存储接口
//
// 上传器只依赖这个 trait，HTTP 实现见 client.rs，测试使用内存实现

use async_trait::async_trait;

use crate::auth::RemoteCredential;
use crate::remote::{DriveInfo, DriveItem, FolderCreation, RemoteError};

/// 远程文档存储
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// 根据站点 URL 解析站点 ID
    async fn resolve_site(
        &self,
        credential: &RemoteCredential,
        site_url: &str,
    ) -> Result<String, RemoteError>;

    /// 列出站点下的文档库
    async fn list_drives(
        &self,
        credential: &RemoteCredential,
        site_id: &str,
    ) -> Result<Vec<DriveInfo>, RemoteError>;

    /// 检查文件夹是否存在（path 相对于文档库根目录，不以 / 开头）
    async fn folder_exists(
        &self,
        credential: &RemoteCredential,
        drive_id: &str,
        path: &str,
    ) -> Result<bool, RemoteError>;

    /// 在 parent_path 下创建名为 name 的文件夹
    ///
    /// parent_path 为空表示文档库根目录；同名冲突返回 `FolderCreation::AlreadyExists`
    async fn create_folder(
        &self,
        credential: &RemoteCredential,
        drive_id: &str,
        parent_path: &str,
        name: &str,
    ) -> Result<FolderCreation, RemoteError>;

    /// 上传文件内容（覆盖写）
    async fn upload_content(
        &self,
        credential: &RemoteCredential,
        drive_id: &str,
        path: &str,
        content: Vec<u8>,
    ) -> Result<DriveItem, RemoteError>;
}
