//! 错误分类。
//!
//! 每个操作返回显式的错误种类，调用方按种类决定重试、切换镜像或中止批次。

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::config::ConfigError;

pub type Result<T> = std::result::Result<T, KmoeError>;

#[derive(Debug, Error)]
pub enum KmoeError {
    // 认证
    #[error("login required")]
    LoginRequired,
    #[error("session expired, please login again")]
    SessionExpired,
    #[error("{0}")]
    Auth(String),

    // 网络
    #[error("{0}")]
    Network(String),
    #[error("all mirrors exhausted (tried: {}): {last_error}", mirrors_tried.join(", "))]
    MirrorExhausted {
        mirrors_tried: Vec<String>,
        last_error: String,
    },
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("failed to parse {url}: {message}")]
    Parse { url: String, message: String },

    // 下载
    #[error("{0}")]
    Download(String),
    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("comic not found: {0}")]
    ComicNotFound(String),
    #[error("volume not found: {0}")]
    VolumeNotFound(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("io error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid json at {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl KmoeError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::LoginRequired | Self::SessionExpired | Self::Auth(_)
        )
    }

    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::MirrorExhausted { .. } | Self::RateLimited(_)
        )
    }

    pub fn is_download(&self) -> bool {
        matches!(self, Self::Download(_) | Self::QuotaExhausted(_))
    }

    pub fn is_quota_exhausted(&self) -> bool {
        matches!(self, Self::QuotaExhausted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_message_lists_mirrors_in_order() {
        let err = KmoeError::MirrorExhausted {
            mirrors_tried: vec!["kxx.moe".into(), "kzz.moe".into()],
            last_error: "HTTP 503".into(),
        };
        assert_eq!(
            err.to_string(),
            "all mirrors exhausted (tried: kxx.moe, kzz.moe): HTTP 503"
        );
        assert!(err.is_network());
        assert!(!err.is_download());
    }

    #[test]
    fn quota_exhaustion_is_a_download_error() {
        let err = KmoeError::QuotaExhausted("額度不足".into());
        assert!(err.is_download());
        assert!(err.is_quota_exhausted());
        assert!(!KmoeError::Download("x".into()).is_quota_exhausted());
        assert!(KmoeError::SessionExpired.is_auth());
    }
}
