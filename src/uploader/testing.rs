// 测试用内存文档库和令牌提供者

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::auth::{RemoteCredential, TokenProvider};
use crate::remote::{DocumentStore, DriveInfo, DriveItem, FolderCreation, RemoteError};

pub(crate) fn credential() -> RemoteCredential {
    RemoteCredential::expiring_in("test-token", 3600)
}

/// 固定令牌，记录获取次数，可注入一次性失败
pub(crate) struct StaticTokens {
    acquired: AtomicUsize,
    failures: Mutex<VecDeque<RemoteError>>,
}

impl StaticTokens {
    pub(crate) fn new() -> Self {
        Self {
            acquired: AtomicUsize::new(0),
            failures: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn fail_next(&self, error: RemoteError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub(crate) fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for StaticTokens {
    async fn acquire_token(&self) -> Result<RemoteCredential, RemoteError> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(credential())
    }
}

#[derive(Default)]
struct MockState {
    folders: HashSet<String>,
    created_log: Vec<String>,
    conflicts: usize,
    lookups: usize,
    site_calls: usize,
    /// 远程路径 -> 成功上传次数
    uploads: HashMap<String, usize>,
    /// 文件名 -> 上传尝试次数
    attempts: HashMap<String, usize>,
    /// 文件名 -> 依次返回的失败
    scripted: HashMap<String, VecDeque<RemoteError>>,
    /// 文件名 -> 每次都返回的失败
    always_fail: HashMap<String, RemoteError>,
    all_uploads_fail: Option<RemoteError>,
    folder_failures: HashMap<String, RemoteError>,
    lookup_failure: Option<RemoteError>,
    site_failures: VecDeque<RemoteError>,
}

/// 内存文档库
///
/// 目录以集合保存；上传按文件名（路径最后一段）注入失败，并统计并发峰值
pub(crate) struct MockStore {
    state: Mutex<MockState>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    upload_delay: Duration,
}

impl MockStore {
    pub(crate) fn new() -> Self {
        Self::with_upload_delay(Duration::ZERO)
    }

    pub(crate) fn with_upload_delay(upload_delay: Duration) -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            upload_delay,
        }
    }

    pub(crate) fn script_failures(&self, file_name: &str, failures: Vec<RemoteError>) {
        self.state
            .lock()
            .unwrap()
            .scripted
            .insert(file_name.to_string(), failures.into());
    }

    pub(crate) fn fail_always(&self, file_name: &str, error: RemoteError) {
        self.state
            .lock()
            .unwrap()
            .always_fail
            .insert(file_name.to_string(), error);
    }

    pub(crate) fn fail_all_uploads(&self, error: RemoteError) {
        self.state.lock().unwrap().all_uploads_fail = Some(error);
    }

    pub(crate) fn fail_folder_creation(&self, path: &str, error: RemoteError) {
        self.state
            .lock()
            .unwrap()
            .folder_failures
            .insert(path.to_string(), error);
    }

    pub(crate) fn fail_lookups(&self, error: RemoteError) {
        self.state.lock().unwrap().lookup_failure = Some(error);
    }

    pub(crate) fn fail_site_resolution_once(&self, error: RemoteError) {
        self.state.lock().unwrap().site_failures.push_back(error);
    }

    pub(crate) fn created_log(&self) -> Vec<String> {
        self.state.lock().unwrap().created_log.clone()
    }

    pub(crate) fn conflict_count(&self) -> usize {
        self.state.lock().unwrap().conflicts
    }

    pub(crate) fn lookup_count(&self) -> usize {
        self.state.lock().unwrap().lookups
    }

    pub(crate) fn site_calls(&self) -> usize {
        self.state.lock().unwrap().site_calls
    }

    pub(crate) fn has_folder(&self, path: &str) -> bool {
        self.state.lock().unwrap().folders.contains(path)
    }

    pub(crate) fn uploaded(&self, path: &str) -> bool {
        self.state.lock().unwrap().uploads.contains_key(path)
    }

    pub(crate) fn upload_attempts(&self, file_name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .attempts
            .get(file_name)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for MockStore {
    async fn resolve_site(
        &self,
        _credential: &RemoteCredential,
        _site_url: &str,
    ) -> Result<String, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.site_calls += 1;
        match state.site_failures.pop_front() {
            Some(error) => Err(error),
            None => Ok("site-1".to_string()),
        }
    }

    async fn list_drives(
        &self,
        _credential: &RemoteCredential,
        _site_id: &str,
    ) -> Result<Vec<DriveInfo>, RemoteError> {
        Ok(vec![DriveInfo {
            id: "drive-1".to_string(),
            name: "Documents".to_string(),
            drive_type: Some("documentLibrary".to_string()),
        }])
    }

    async fn folder_exists(
        &self,
        _credential: &RemoteCredential,
        _drive_id: &str,
        path: &str,
    ) -> Result<bool, RemoteError> {
        let exists = {
            let mut state = self.state.lock().unwrap();
            state.lookups += 1;
            if let Some(error) = state.lookup_failure.clone() {
                return Err(error);
            }
            state.folders.contains(path)
        };
        // 先读后让出，模拟并发请求看到过期状态
        tokio::task::yield_now().await;
        Ok(exists)
    }

    async fn create_folder(
        &self,
        _credential: &RemoteCredential,
        _drive_id: &str,
        parent_path: &str,
        name: &str,
    ) -> Result<FolderCreation, RemoteError> {
        let full = if parent_path.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", parent_path, name)
        };

        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.folder_failures.get(&full).cloned() {
            return Err(error);
        }
        if !parent_path.is_empty() && !state.folders.contains(parent_path) {
            return Err(RemoteError::status(404, "parent folder not found"));
        }
        if state.folders.contains(&full) {
            state.conflicts += 1;
            return Ok(FolderCreation::AlreadyExists);
        }
        state.folders.insert(full.clone());
        state.created_log.push(full);
        Ok(FolderCreation::Created)
    }

    async fn upload_content(
        &self,
        _credential: &RemoteCredential,
        _drive_id: &str,
        path: &str,
        content: Vec<u8>,
    ) -> Result<DriveItem, RemoteError> {
        let name = path.rsplit('/').next().unwrap_or(path).to_string();

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        if !self.upload_delay.is_zero() {
            tokio::time::sleep(self.upload_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut state = self.state.lock().unwrap();
        *state.attempts.entry(name.clone()).or_insert(0) += 1;

        if let Some(error) = state.all_uploads_fail.clone() {
            return Err(error);
        }
        if let Some(error) = state.always_fail.get(&name).cloned() {
            return Err(error);
        }
        if let Some(error) = state.scripted.get_mut(&name).and_then(|q| q.pop_front()) {
            return Err(error);
        }

        *state.uploads.entry(path.to_string()).or_insert(0) += 1;
        Ok(DriveItem {
            id: format!("item-{}", name),
            name,
            size: Some(content.len() as u64),
            web_url: None,
        })
    }
}
