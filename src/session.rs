//! 存储会话工厂：每个请求打开一次会话，执行单个操作后关闭。
//!
//! 连接与认证阶段受 `open_timeout` 约束；操作一旦开始就运行到结束，
//! 传输过程中的停滞由会话实现自身的空闲超时（套接字读写超时）兜底。

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, SystemTime};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::staging::StagedFile;

/// 后端连接、认证或传输失败，携带原始错误文本（仅用于日志与脱敏）。
#[derive(Debug, Clone)]
pub struct SessionError {
    message: String,
}

impl SessionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for SessionError {}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::new(err.to_string())
    }
}

/// 远端目录中的一个条目。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// 已认证的后端会话。
pub trait StorageSession: Send {
    fn list(&mut self) -> Result<Vec<RemoteEntry>, SessionError>;
    fn upload(&mut self, remote_name: &str, local_path: &Path) -> Result<u64, SessionError>;
    fn download(&mut self, remote_name: &str, local_path: &Path) -> Result<u64, SessionError>;
    fn delete(&mut self, remote_name: &str) -> Result<(), SessionError>;
    /// 关闭会话；消费自身，保证只调用一次。
    fn close(self: Box<Self>) -> Result<(), SessionError>;
}

/// 打开新会话的能力（连接 + 认证）。
pub trait SessionFactory: Send + Sync + 'static {
    fn open(&self, username: &str, password: &str)
    -> Result<Box<dyn StorageSession>, SessionError>;
}

/// 单次会话中执行的操作。暂存文件随操作一起移入阻塞任务，任务结束时才释放。
#[derive(Debug)]
pub enum Operation {
    Verify,
    List,
    Upload {
        remote_name: String,
        staged: StagedFile,
    },
    Download {
        remote_name: String,
        staged: StagedFile,
    },
    Delete {
        remote_name: String,
    },
}

impl Operation {
    fn name(&self) -> &'static str {
        match self {
            Operation::Verify => "verify",
            Operation::List => "list",
            Operation::Upload { .. } => "upload",
            Operation::Download { .. } => "download",
            Operation::Delete { .. } => "delete",
        }
    }
}

#[derive(Debug)]
pub enum OperationOutput {
    Done,
    Entries(Vec<RemoteEntry>),
    Uploaded(u64),
    Downloaded { staged: StagedFile, bytes: u64 },
}

const PHASE_OPENING: u8 = 0;
const PHASE_RUNNING: u8 = 1;
const PHASE_ABANDONED: u8 = 2;

/// 以异步方式驱动阻塞会话。
pub struct StorageClient {
    factory: Arc<dyn SessionFactory>,
    open_timeout: Duration,
}

impl StorageClient {
    pub fn new(factory: Arc<dyn SessionFactory>, open_timeout: Duration) -> Self {
        Self {
            factory,
            open_timeout,
        }
    }

    /// 打开会话、执行一个操作并关闭会话。
    ///
    /// 打开阶段超时则放弃该请求，阻塞任务随后只关闭会话、不再执行操作；
    /// 操作开始后等待其真实结果，返回值始终与后端实际发生的一致。
    pub async fn run(
        &self,
        username: &str,
        password: &str,
        operation: Operation,
    ) -> Result<OperationOutput, SessionError> {
        let factory = self.factory.clone();
        let username = username.to_string();
        let password = password.to_string();
        let op_name = operation.name();
        let phase = Arc::new(AtomicU8::new(PHASE_OPENING));
        let (started_tx, started_rx) = oneshot::channel();

        let task_phase = phase.clone();
        let task = tokio::task::spawn_blocking(move || {
            run_blocking(
                factory.as_ref(),
                &username,
                &password,
                operation,
                &task_phase,
                started_tx,
            )
        });

        // 打开失败时发送端被丢弃，同样直接等待任务结果。
        if tokio::time::timeout(self.open_timeout, started_rx)
            .await
            .is_err()
            && phase
                .compare_exchange(
                    PHASE_OPENING,
                    PHASE_ABANDONED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
        {
            warn!(
                operation = op_name,
                timeout_secs = self.open_timeout.as_secs(),
                "storage session open timeout"
            );
            return Err(SessionError::new("connection timeout"));
        }

        match task.await {
            Ok(result) => result,
            Err(join_err) => {
                warn!(operation = op_name, error = %join_err, "storage task aborted");
                Err(SessionError::new("storage task aborted"))
            }
        }
    }

    /// 仅验证凭据：打开后立即关闭。
    pub async fn verify(&self, username: &str, password: &str) -> Result<(), SessionError> {
        self.run(username, password, Operation::Verify)
            .await
            .map(|_| ())
    }

    pub async fn list(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Vec<RemoteEntry>, SessionError> {
        into_entries(self.run(username, password, Operation::List).await?)
    }

    /// 上传暂存文件；暂存文件在传输结束后删除。
    pub async fn upload(
        &self,
        username: &str,
        password: &str,
        remote_name: &str,
        staged: StagedFile,
    ) -> Result<u64, SessionError> {
        let operation = Operation::Upload {
            remote_name: remote_name.to_string(),
            staged,
        };
        into_uploaded(self.run(username, password, operation).await?)
    }

    /// 下载到暂存文件并交还给调用方；失败或调用方提前放弃时由阻塞任务删除。
    pub async fn download(
        &self,
        username: &str,
        password: &str,
        remote_name: &str,
        staged: StagedFile,
    ) -> Result<(StagedFile, u64), SessionError> {
        let operation = Operation::Download {
            remote_name: remote_name.to_string(),
            staged,
        };
        into_downloaded(self.run(username, password, operation).await?)
    }

    pub async fn delete(
        &self,
        username: &str,
        password: &str,
        remote_name: &str,
    ) -> Result<(), SessionError> {
        let operation = Operation::Delete {
            remote_name: remote_name.to_string(),
        };
        self.run(username, password, operation).await.map(|_| ())
    }
}

fn unexpected(output: &OperationOutput) -> SessionError {
    SessionError::new(format!("unexpected storage output: {output:?}"))
}

fn into_entries(output: OperationOutput) -> Result<Vec<RemoteEntry>, SessionError> {
    match output {
        OperationOutput::Entries(entries) => Ok(entries),
        other => Err(unexpected(&other)),
    }
}

fn into_uploaded(output: OperationOutput) -> Result<u64, SessionError> {
    match output {
        OperationOutput::Uploaded(bytes) => Ok(bytes),
        other => Err(unexpected(&other)),
    }
}

fn into_downloaded(output: OperationOutput) -> Result<(StagedFile, u64), SessionError> {
    match output {
        OperationOutput::Downloaded { staged, bytes } => Ok((staged, bytes)),
        other => Err(unexpected(&other)),
    }
}

fn run_blocking(
    factory: &dyn SessionFactory,
    username: &str,
    password: &str,
    operation: Operation,
    phase: &AtomicU8,
    started: oneshot::Sender<()>,
) -> Result<OperationOutput, SessionError> {
    let op_name = operation.name();
    let mut session = factory.open(username, password)?;

    if phase
        .compare_exchange(
            PHASE_OPENING,
            PHASE_RUNNING,
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .is_err()
    {
        debug!(username, operation = op_name, "request abandoned before operation");
        if let Err(err) = session.close() {
            warn!(username, error = %err, "storage session close failed");
        }
        return Err(SessionError::new("connection timeout"));
    }
    let _ = started.send(());
    debug!(username, operation = op_name, "storage session opened");

    let result = match operation {
        Operation::Verify => Ok(OperationOutput::Done),
        Operation::List => session.list().map(OperationOutput::Entries),
        Operation::Upload {
            remote_name,
            staged,
        } => session
            .upload(&remote_name, staged.path())
            .map(OperationOutput::Uploaded),
        Operation::Download {
            remote_name,
            staged,
        } => session
            .download(&remote_name, staged.path())
            .map(|bytes| OperationOutput::Downloaded { staged, bytes }),
        Operation::Delete { remote_name } => {
            session.delete(&remote_name).map(|_| OperationOutput::Done)
        }
    };

    // 关闭失败只在操作成功时记录，操作失败时以原始错误为准。
    if let (Ok(_), Err(err)) = (&result, session.close()) {
        warn!(username, error = %err, "storage session close failed");
    }
    result
}

#[cfg(test)]
pub mod memory {
    //! 测试用的内存后端，记录会话的打开与关闭次数。

    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    pub struct MemoryBackend {
        pub users: Mutex<BTreeMap<String, String>>,
        pub files: Mutex<BTreeMap<String, Vec<u8>>>,
        pub opened: AtomicUsize,
        pub closed: AtomicUsize,
        pub open_delay: Mutex<Option<Duration>>,
        pub op_delay: Mutex<Option<Duration>>,
    }

    impl MemoryBackend {
        pub fn with_user(username: &str, password: &str) -> Arc<Self> {
            let backend = Self::default();
            backend
                .users
                .lock()
                .expect("users lock")
                .insert(username.to_string(), password.to_string());
            Arc::new(backend)
        }

        pub fn put(&self, name: &str, data: &[u8]) {
            self.files
                .lock()
                .expect("files lock")
                .insert(name.to_string(), data.to_vec());
        }

        pub fn get(&self, name: &str) -> Option<Vec<u8>> {
            self.files.lock().expect("files lock").get(name).cloned()
        }

        pub fn opened(&self) -> usize {
            self.opened.load(Ordering::SeqCst)
        }

        pub fn closed(&self) -> usize {
            self.closed.load(Ordering::SeqCst)
        }

        fn pause(delay: &Mutex<Option<Duration>>) {
            let delay = *delay.lock().expect("delay lock");
            if let Some(delay) = delay {
                std::thread::sleep(delay);
            }
        }
    }

    pub struct MemoryFactory(pub Arc<MemoryBackend>);

    impl SessionFactory for MemoryFactory {
        fn open(
            &self,
            username: &str,
            password: &str,
        ) -> Result<Box<dyn StorageSession>, SessionError> {
            MemoryBackend::pause(&self.0.open_delay);
            let users = self.0.users.lock().expect("users lock");
            match users.get(username) {
                Some(expected) if expected == password => {}
                _ => return Err(SessionError::new("530 Login incorrect.")),
            }
            self.0.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MemorySession {
                backend: self.0.clone(),
            }))
        }
    }

    struct MemorySession {
        backend: Arc<MemoryBackend>,
    }

    impl StorageSession for MemorySession {
        fn list(&mut self) -> Result<Vec<RemoteEntry>, SessionError> {
            let files = self.backend.files.lock().expect("files lock");
            Ok(files
                .iter()
                .map(|(name, data)| RemoteEntry {
                    name: name.clone(),
                    size: data.len() as u64,
                    modified: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)),
                })
                .collect())
        }

        fn upload(&mut self, remote_name: &str, local_path: &Path) -> Result<u64, SessionError> {
            MemoryBackend::pause(&self.backend.op_delay);
            let data = std::fs::read(local_path)?;
            let len = data.len() as u64;
            self.backend.put(remote_name, &data);
            Ok(len)
        }

        fn download(&mut self, remote_name: &str, local_path: &Path) -> Result<u64, SessionError> {
            MemoryBackend::pause(&self.backend.op_delay);
            let data = self
                .backend
                .get(remote_name)
                .ok_or_else(|| SessionError::new("550 No such file or directory"))?;
            std::fs::write(local_path, &data)?;
            Ok(data.len() as u64)
        }

        fn delete(&mut self, remote_name: &str) -> Result<(), SessionError> {
            MemoryBackend::pause(&self.backend.op_delay);
            self.backend
                .files
                .lock()
                .expect("files lock")
                .remove(remote_name)
                .map(|_| ())
                .ok_or_else(|| SessionError::new("550 No such file or directory"))
        }

        fn close(self: Box<Self>) -> Result<(), SessionError> {
            self.backend.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    pub fn client(backend: &Arc<MemoryBackend>) -> StorageClient {
        StorageClient::new(
            Arc::new(MemoryFactory(backend.clone())),
            Duration::from_secs(5),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::memory::{MemoryBackend, MemoryFactory, client};
    use super::*;

    #[tokio::test]
    async fn verify_closes_session() {
        let backend = MemoryBackend::with_user("bob", "");
        let client = client(&backend);

        client.verify("bob", "").await.expect("verify");
        assert_eq!(backend.opened(), 1);
        assert_eq!(backend.closed(), 1);
    }

    #[tokio::test]
    async fn rejected_login_opens_nothing() {
        let backend = MemoryBackend::with_user("bob", "secret");
        let client = client(&backend);

        let err = client.verify("bob", "wrong").await.expect_err("should fail");
        assert!(err.message().contains("530"));
        assert_eq!(backend.opened(), 0);
        assert_eq!(backend.closed(), 0);
    }

    #[tokio::test]
    async fn failed_operation_still_closes_session() {
        let backend = MemoryBackend::with_user("bob", "");
        let client = client(&backend);

        let err = client
            .delete("bob", "", "missing.txt")
            .await
            .expect_err("should fail");
        assert!(err.message().contains("550"));
        assert_eq!(backend.opened(), 1);
        assert_eq!(backend.closed(), 1);
    }

    #[tokio::test]
    async fn list_returns_backend_entries() {
        let backend = MemoryBackend::with_user("bob", "");
        backend.put("a.txt", b"hello");
        let client = client(&backend);

        let entries = client.list("bob", "").await.expect("list");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a.txt");
        assert_eq!(entries[0].size, 5);
    }

    fn slow_client(backend: &Arc<MemoryBackend>) -> StorageClient {
        StorageClient::new(
            Arc::new(MemoryFactory(backend.clone())),
            Duration::from_millis(100),
        )
    }

    fn staging_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).expect("read dir").count() == 0
    }

    #[tokio::test]
    async fn slow_open_is_abandoned_without_running_operation() {
        let backend = MemoryBackend::with_user("bob", "");
        backend.put("keep.txt", b"x");
        *backend.open_delay.lock().expect("delay lock") = Some(Duration::from_millis(300));
        let client = slow_client(&backend);

        let err = client
            .delete("bob", "", "keep.txt")
            .await
            .expect_err("should time out");
        assert_eq!(err.message(), "connection timeout");

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(backend.get("keep.txt").is_some());
        assert_eq!(backend.opened(), 1);
        assert_eq!(backend.closed(), 1);
    }

    #[tokio::test]
    async fn long_transfer_reports_backend_outcome() {
        let temp = tempfile::tempdir().expect("tempdir");
        let backend = MemoryBackend::with_user("bob", "");
        *backend.op_delay.lock().expect("delay lock") = Some(Duration::from_millis(300));
        let client = slow_client(&backend);

        let staged = StagedFile::write(temp.path(), "up", b"large payload")
            .await
            .expect("stage");
        let bytes = client
            .upload("bob", "", "big.bin", staged)
            .await
            .expect("upload outlasting the open deadline");

        assert_eq!(bytes, 13);
        assert_eq!(backend.get("big.bin").as_deref(), Some(b"large payload".as_slice()));
        assert_eq!(backend.closed(), 1);
        assert!(staging_is_empty(temp.path()));
    }

    #[tokio::test]
    async fn abandoned_download_cleans_staging_when_task_ends() {
        let temp = tempfile::tempdir().expect("tempdir");
        let backend = MemoryBackend::with_user("bob", "");
        backend.put("slow.bin", b"payload");
        *backend.op_delay.lock().expect("delay lock") = Some(Duration::from_millis(300));
        let client = slow_client(&backend);

        // 调用方在传输完成前放弃（例如客户端断开）。
        let staged = StagedFile::allocate(temp.path(), "dl");
        let dropped = tokio::time::timeout(
            Duration::from_millis(150),
            client.download("bob", "", "slow.bin", staged),
        )
        .await;
        assert!(dropped.is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(backend.closed(), 1);
        assert!(staging_is_empty(temp.path()));
    }

    #[tokio::test]
    async fn download_hands_back_staged_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let backend = MemoryBackend::with_user("bob", "");
        backend.put("a.bin", b"abc");
        let client = client(&backend);

        let (staged, bytes) = client
            .download("bob", "", "a.bin", StagedFile::allocate(temp.path(), "dl"))
            .await
            .expect("download");
        assert_eq!(bytes, 3);
        assert_eq!(std::fs::read(staged.path()).expect("read"), b"abc");
        drop(staged);
        assert!(staging_is_empty(temp.path()));
    }

    #[test]
    fn mismatched_output_is_an_error() {
        let err = into_entries(OperationOutput::Done).expect_err("should fail");
        assert!(err.message().starts_with("unexpected storage output"));
        assert!(into_uploaded(OperationOutput::Entries(Vec::new())).is_err());
        assert!(into_downloaded(OperationOutput::Uploaded(1)).is_err());
    }
}
