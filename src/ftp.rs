//! 基于 suppaftp 的 FTPS 会话实现。

use rustls::ClientConfig;
use std::fs::File;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use suppaftp::list::File as ListEntry;
use suppaftp::types::FileType;
use suppaftp::{FtpError, RustlsConnector, RustlsFtpStream};
use tracing::debug;

use crate::session::{RemoteEntry, SessionError, SessionFactory, StorageSession};

/// 连接固定后端主机的会话工厂。
pub struct FtpSessionFactory {
    host: String,
    port: u16,
    timeout: Duration,
    tls: Arc<ClientConfig>,
}

impl FtpSessionFactory {
    pub fn new(host: String, port: u16, timeout: Duration, tls: Arc<ClientConfig>) -> Self {
        Self {
            host,
            port,
            timeout,
            tls,
        }
    }

    fn resolve(&self) -> Result<SocketAddr, SessionError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| SessionError::new("connection failed: backend address unresolved"))
    }
}

impl SessionFactory for FtpSessionFactory {
    fn open(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Box<dyn StorageSession>, SessionError> {
        let addr = self.resolve()?;
        let stream = RustlsFtpStream::connect_timeout(addr, self.timeout).map_err(ftp_error)?;
        apply_idle_timeout(stream.get_ref(), self.timeout)?;

        let mut stream = stream
            .into_secure(RustlsConnector::from(self.tls.clone()), &self.host)
            .map_err(ftp_error)?;
        stream.login(username, password).map_err(ftp_error)?;
        stream.transfer_type(FileType::Binary).map_err(ftp_error)?;
        Ok(Box::new(FtpSession {
            stream,
            idle_timeout: self.timeout,
        }))
    }
}

struct FtpSession {
    stream: RustlsFtpStream,
    idle_timeout: Duration,
}

/// 控制连接与数据连接都设置读写超时，传输停滞超过 `timeout` 即失败。
fn apply_idle_timeout(socket: &TcpStream, timeout: Duration) -> Result<(), SessionError> {
    socket.set_read_timeout(Some(timeout))?;
    socket.set_write_timeout(Some(timeout))?;
    Ok(())
}

impl StorageSession for FtpSession {
    fn list(&mut self) -> Result<Vec<RemoteEntry>, SessionError> {
        let lines = self.stream.list(None).map_err(ftp_error)?;
        Ok(parse_listing(&lines))
    }

    fn upload(&mut self, remote_name: &str, local_path: &Path) -> Result<u64, SessionError> {
        let mut file = File::open(local_path)?;
        let mut data = self.stream.put_with_stream(remote_name).map_err(ftp_error)?;
        apply_idle_timeout(data.get_ref(), self.idle_timeout)?;
        let copied = std::io::copy(&mut file, &mut data)?;
        self.stream.finalize_put_stream(data).map_err(ftp_error)?;
        Ok(copied)
    }

    fn download(&mut self, remote_name: &str, local_path: &Path) -> Result<u64, SessionError> {
        let mut data = self.stream.retr_as_stream(remote_name).map_err(ftp_error)?;
        apply_idle_timeout(data.get_ref(), self.idle_timeout)?;
        let mut file = File::create(local_path)?;
        let copied = std::io::copy(&mut data, &mut file)?;
        self.stream.finalize_retr_stream(data).map_err(ftp_error)?;
        Ok(copied)
    }

    fn delete(&mut self, remote_name: &str) -> Result<(), SessionError> {
        self.stream.rm(remote_name).map_err(ftp_error)
    }

    fn close(mut self: Box<Self>) -> Result<(), SessionError> {
        self.stream.quit().map_err(ftp_error)
    }
}

fn ftp_error(err: FtpError) -> SessionError {
    SessionError::new(err.to_string())
}

/// 解析 LIST 输出，跳过无法识别的行与 `.`/`..`。
fn parse_listing(lines: &[String]) -> Vec<RemoteEntry> {
    lines
        .iter()
        .filter_map(|line| match ListEntry::from_str(line) {
            Ok(entry) => Some(entry),
            Err(err) => {
                debug!(line, error = ?err, "skip unparsable list line");
                None
            }
        })
        .filter(|entry| entry.name() != "." && entry.name() != "..")
        .map(|entry| RemoteEntry {
            name: entry.name().to_string(),
            size: entry.size() as u64,
            modified: Some(entry.modified()),
        })
        .collect()
}
