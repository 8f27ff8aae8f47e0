//! 下载相关的数据模型：格式、单卷/批量结果与取消令牌。

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::base_system::context::FORMAT_NAMES;
use crate::base_system::errors::{KmoeError, Result};
use crate::network_parser::models::Volume;

/// 站点下载接口的格式编码（`mobi=` 参数）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DownloadFormat {
    Mobi = 1,
    Epub = 2,
}

impl DownloadFormat {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn extension(self) -> &'static str {
        match self {
            DownloadFormat::Mobi => "mobi",
            DownloadFormat::Epub => "epub",
        }
    }
}

impl fmt::Display for DownloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for DownloadFormat {
    type Err = KmoeError;

    fn from_str(s: &str) -> Result<Self> {
        resolve_format(s)
    }
}

/// 大小写不敏感地解析格式名。
pub fn resolve_format(format_str: &str) -> Result<DownloadFormat> {
    match format_str.trim().to_ascii_lowercase().as_str() {
        "mobi" => Ok(DownloadFormat::Mobi),
        "epub" => Ok(DownloadFormat::Epub),
        _ => Err(KmoeError::Download(format!(
            "Invalid download format: {format_str:?}. Valid formats: {}",
            FORMAT_NAMES.join(", ")
        ))),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadResult {
    pub path: PathBuf,
    pub volume: Volume,
    pub skipped: bool,
    pub size_bytes: u64,
}

/// 批量下载结果；`errors` 为 (vol_id, 错误)，均按输入顺序排列。
#[derive(Debug, Default)]
pub struct BatchDownloadResult {
    pub results: Vec<DownloadResult>,
    pub errors: Vec<(String, KmoeError)>,
}

impl BatchDownloadResult {
    pub fn downloaded(&self) -> usize {
        self.results.iter().filter(|r| !r.skipped).count()
    }

    pub fn skipped(&self) -> usize {
        self.results.iter().filter(|r| r.skipped).count()
    }

    /// 本次实际下载的字节数（跳过的卷不计）。
    pub fn downloaded_bytes(&self) -> u64 {
        self.results
            .iter()
            .filter(|r| !r.skipped)
            .map(|r| r.size_bytes)
            .sum()
    }
}

/// 协作式取消令牌：只在任务开始前检查，进行中的传输不会被打断。
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// 令牌被额度不足触发后，排队任务返回的错误。
    pub fn cancelled_error(&self) -> KmoeError {
        KmoeError::QuotaExhausted("Cancelled: quota exhausted".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_resolution_is_case_insensitive() {
        assert_eq!(resolve_format("EPUB").unwrap(), DownloadFormat::Epub);
        assert_eq!(resolve_format("epub").unwrap(), resolve_format("Epub").unwrap());
        assert_eq!(resolve_format("mobi").unwrap().code(), 1);
        assert_eq!(DownloadFormat::Epub.code(), 2);
        assert_eq!("MOBI".parse::<DownloadFormat>().unwrap().to_string(), "mobi");
        assert!(matches!(resolve_format("pdf"), Err(KmoeError::Download(_))));
    }

    #[test]
    fn clones_share_cancellation() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());

        token.clone().cancel();
        assert!(token.is_cancelled());
        assert!(token.cancelled_error().is_quota_exhausted());
        assert_eq!(
            token.cancelled_error().to_string(),
            "quota exhausted: Cancelled: quota exhausted"
        );
    }
}
