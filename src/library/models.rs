//! 本地书库的持久化模型。
//!
//! 每个漫画目录下的 `library.json` 是 `LibraryEntry`，书库根目录的
//! `library.json` 是由全部条目投影出来的 `LibraryIndex`。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::network_parser::models::ComicMeta;

pub const LIBRARY_FILE_NAME: &str = "library.json";
pub const INDEX_VERSION: &str = "1.0";

/// 已下载的一卷；(vol_id, format) 唯一。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadedVolume {
    pub vol_id: String,
    pub title: String,
    pub format: String,
    /// 相对漫画目录的文件名；压缩包内的文件记为 `archive.zip/member`
    pub filename: String,
    #[serde(with = "time::serde::rfc3339")]
    pub downloaded_at: OffsetDateTime,
    #[serde(default)]
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryEntry {
    pub book_id: String,
    #[serde(default)]
    pub comic_id: String,
    pub title: String,
    pub meta: ComicMeta,
    #[serde(default)]
    pub downloaded_volumes: Vec<DownloadedVolume>,
    #[serde(default)]
    pub total_volumes: usize,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_checked: Option<OffsetDateTime>,
    #[serde(default)]
    pub is_complete: bool,
}

impl LibraryEntry {
    pub fn new(meta: ComicMeta, comic_id: &str) -> Self {
        Self {
            book_id: meta.book_id.clone(),
            comic_id: comic_id.to_string(),
            title: meta.title.clone(),
            meta,
            downloaded_volumes: Vec::new(),
            total_volumes: 0,
            last_checked: None,
            is_complete: false,
        }
    }

    /// 目录命名用的 ID：comic_id 为空时退回 book_id。
    pub fn dir_id(&self) -> &str {
        if self.comic_id.is_empty() {
            &self.book_id
        } else {
            &self.comic_id
        }
    }

    pub fn find_downloaded(&self, vol_id: &str, format: &str) -> Option<&DownloadedVolume> {
        self.downloaded_volumes
            .iter()
            .find(|v| v.vol_id == vol_id && v.format == format)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryIndexEntry {
    pub book_id: String,
    pub title: String,
    pub dir_name: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub total_volumes: usize,
    #[serde(default)]
    pub downloaded_volumes: usize,
    #[serde(default)]
    pub is_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryIndex {
    #[serde(default = "index_version")]
    pub version: String,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(default)]
    pub comics: Vec<LibraryIndexEntry>,
}

fn index_version() -> String {
    INDEX_VERSION.to_string()
}

/// 扫描得到的书籍文件。`archive_path` 非空表示位于压缩包内，`disk_path` 即该压缩包。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub name: String,
    pub size: u64,
    pub disk_path: PathBuf,
    pub archive_path: Option<PathBuf>,
}

impl ScannedFile {
    pub fn loose(name: &str, size: u64, disk_path: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            size,
            disk_path,
            archive_path: None,
        }
    }

    pub fn in_archive(name: &str, size: u64, archive: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            size,
            disk_path: archive.clone(),
            archive_path: Some(archive),
        }
    }

    /// 记录到 `library.json` 的相对文件名。
    pub fn record_name(&self) -> String {
        match self
            .archive_path
            .as_ref()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
        {
            Some(archive) => format!("{archive}/{}", self.name),
            None => self.name.clone(),
        }
    }
}
