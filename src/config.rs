//! CLI 参数与桥接服务默认配置。

use clap::Parser;
use shadow_rs::formatcp;
use std::path::PathBuf;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const DEFAULT_HTTP_PORT: u16 = 3001;
pub const DEFAULT_FTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_FTP_PORT: u16 = 21;
pub const DEFAULT_FTP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_STAGING_DIR: &str = ".bridge/staging";
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;
pub const DEFAULT_RATE_LIMIT_MAX: u32 = 100;
pub const DEFAULT_MAX_CONNECTIONS_PER_IP: u32 = 5;
pub const DEFAULT_UPLOAD_MAX_SIZE: u64 = 100 * 1024 * 1024;
pub const RATE_PRUNE_INTERVAL_SECS: u64 = 300;
pub const STAGING_CLEAN_INTERVAL_SECS: u64 = 900;
pub const STAGING_TTL_SECS: u64 = 60 * 60;
/// multipart 头部与分隔符允许的额外字节。
pub const MULTIPART_OVERHEAD: u64 = 64 * 1024;
pub const JSON_BODY_LIMIT: u64 = 64 * 1024;

/// 上传大小上限与暂存目录。
#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub max_upload_size: u64,
    pub staging_dir: PathBuf,
}

/// CLI arguments and environment configuration for the bridge.
#[derive(Parser, Debug)]
#[command(name = "ftp-bridge", version = VERSION_INFO, about = "HTTP/JSON to FTPS bridge")]
pub struct Args {
    #[arg(
        short = 'b',
        long,
        env = "BRIDGE_BIND",
        default_value = "0.0.0.0",
        help = "Bind address for the HTTP API"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "BRIDGE_PORT",
        default_value_t = DEFAULT_HTTP_PORT,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        long,
        env = "BRIDGE_FTP_HOST",
        default_value = DEFAULT_FTP_HOST,
        help = "Backend FTPS host"
    )]
    pub ftp_host: String,
    #[arg(
        long,
        env = "BRIDGE_FTP_PORT",
        default_value_t = DEFAULT_FTP_PORT,
        help = "Backend FTPS port"
    )]
    pub ftp_port: u16,
    #[arg(
        long,
        env = "BRIDGE_FTP_TIMEOUT_SECS",
        default_value_t = DEFAULT_FTP_TIMEOUT_SECS,
        help = "Backend connect/login deadline and per-socket idle timeout in seconds"
    )]
    pub ftp_timeout_secs: u64,
    #[arg(
        short = 's',
        long,
        env = "BRIDGE_STAGING_DIR",
        default_value = DEFAULT_STAGING_DIR,
        help = "Directory for per-request upload/download staging files"
    )]
    pub staging_dir: String,
    #[arg(
        long,
        env = "BRIDGE_RATE_LIMIT_WINDOW_SECS",
        default_value_t = DEFAULT_RATE_LIMIT_WINDOW_SECS,
        help = "Rate limit window in seconds"
    )]
    pub rate_limit_window_secs: u64,
    #[arg(
        long,
        env = "BRIDGE_RATE_LIMIT_MAX",
        default_value_t = DEFAULT_RATE_LIMIT_MAX,
        help = "Max requests per client within one window"
    )]
    pub rate_limit_max: u32,
    #[arg(
        long,
        env = "BRIDGE_MAX_CONNECTIONS_PER_IP",
        default_value_t = DEFAULT_MAX_CONNECTIONS_PER_IP,
        help = "Max concurrent in-flight requests per client"
    )]
    pub max_connections_per_ip: u32,
    #[arg(
        long,
        env = "BRIDGE_UPLOAD_MAX_SIZE",
        default_value_t = DEFAULT_UPLOAD_MAX_SIZE,
        help = "Max upload size in bytes"
    )]
    pub upload_max_size: u64,
}
