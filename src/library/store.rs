//! `library.json` 的读写与根索引重建。
//!
//! 每个漫画目录的条目是唯一的事实来源；根索引只是投影，可随时删除重建。

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::models::{
    DownloadedVolume, INDEX_VERSION, LIBRARY_FILE_NAME, LibraryEntry, LibraryIndex,
    LibraryIndexEntry,
};
use crate::base_system::comic_paths::comic_dir_path;
use crate::base_system::errors::{KmoeError, Result};
use crate::network_parser::models::{ComicDetail, Volume};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

pub struct LibraryStore {
    root: PathBuf,
    index_rebuilds: AtomicUsize,
}

impl LibraryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index_rebuilds: AtomicUsize::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 漫画目录（不创建）。
    pub fn comic_dir(&self, comic_id: &str, title: &str) -> PathBuf {
        comic_dir_path(&self.root, comic_id, title)
    }

    pub fn entry_dir(&self, entry: &LibraryEntry) -> PathBuf {
        self.comic_dir(entry.dir_id(), &entry.title)
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(LIBRARY_FILE_NAME)
    }

    /// 文件不存在或无法解析时返回 `None`（后者记录警告）。
    pub fn load_entry(&self, comic_id: &str, title: &str) -> Option<LibraryEntry> {
        self.load_entry_in(&self.comic_dir(comic_id, title))
    }

    pub fn load_entry_in(&self, dir: &Path) -> Option<LibraryEntry> {
        let path = dir.join(LIBRARY_FILE_NAME);
        if !path.exists() {
            return None;
        }
        match read_json(&path) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(target: "library", path = %path.display(), "读取书库条目失败: {err}");
                None
            }
        }
    }

    /// 写入条目所属目录的 `library.json`（必要时创建目录）。
    ///
    /// 批量操作传 `update_index = false`，结束后统一调用一次 `update_root_index`。
    pub fn save_entry(&self, entry: &LibraryEntry, update_index: bool) -> Result<()> {
        let dir = self.entry_dir(entry);
        self.write_entry_in(&dir, entry)?;
        if update_index {
            self.update_root_index();
        }
        Ok(())
    }

    /// 写入指定目录（导入时目录名尚未规范化）。
    pub fn write_entry_in(&self, dir: &Path, entry: &LibraryEntry) -> Result<()> {
        fs::create_dir_all(dir).map_err(|e| KmoeError::io(dir, e))?;
        write_json(&dir.join(LIBRARY_FILE_NAME), entry)
    }

    pub fn is_volume_downloaded(&self, comic_id: &str, title: &str, vol_id: &str, format: &str) -> bool {
        self.load_entry(comic_id, title)
            .is_some_and(|e| e.find_downloaded(vol_id, format).is_some())
    }

    /// 扫描根目录下所有带 `library.json` 的子目录；损坏的条目跳过。
    pub fn list_library(&self) -> Vec<LibraryEntry> {
        let Ok(read_dir) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut dirs: Vec<PathBuf> = read_dir
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();

        dirs.iter()
            .filter_map(|dir| {
                let path = dir.join(LIBRARY_FILE_NAME);
                if !path.exists() {
                    return None;
                }
                match read_json::<LibraryEntry>(&path) {
                    Ok(entry) => Some(entry),
                    Err(err) => {
                        warn!(target: "library", path = %path.display(), "跳过损坏的书库条目: {err}");
                        None
                    }
                }
            })
            .collect()
    }

    pub fn load_index(&self) -> Option<LibraryIndex> {
        let path = self.index_path();
        if !path.exists() {
            return None;
        }
        match read_json(&path) {
            Ok(index) => Some(index),
            Err(err) => {
                warn!(target: "library", path = %path.display(), "读取根索引失败: {err}");
                None
            }
        }
    }

    pub fn save_index(&self, entries: &[LibraryEntry]) -> Result<LibraryIndex> {
        let comics = entries
            .iter()
            .map(|entry| LibraryIndexEntry {
                book_id: entry.book_id.clone(),
                title: entry.title.clone(),
                dir_name: self
                    .entry_dir(entry)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                authors: entry.meta.authors.clone(),
                status: entry.meta.status.clone(),
                total_volumes: entry.total_volumes,
                downloaded_volumes: entry.downloaded_volumes.len(),
                is_complete: entry.is_complete,
            })
            .collect();
        let index = LibraryIndex {
            version: INDEX_VERSION.to_string(),
            updated_at: OffsetDateTime::now_utc(),
            comics,
        };
        fs::create_dir_all(&self.root).map_err(|e| KmoeError::io(&self.root, e))?;
        write_json(&self.index_path(), &index)?;
        Ok(index)
    }

    /// 全量扫描并重写根索引。
    pub fn rebuild_index(&self) -> Result<LibraryIndex> {
        self.index_rebuilds.fetch_add(1, Ordering::SeqCst);
        let entries = self.list_library();
        self.save_index(&entries)
    }

    /// 同 `rebuild_index`，失败只记录日志。
    pub fn update_root_index(&self) {
        match self.rebuild_index() {
            Ok(index) => {
                debug!(target: "library", comics = index.comics.len(), "根索引已更新");
            }
            Err(err) => warn!(target: "library", "更新根索引失败: {err}"),
        }
    }

    /// 本实例累计重建根索引的次数。
    pub fn index_rebuilds(&self) -> usize {
        self.index_rebuilds.load(Ordering::SeqCst)
    }
}

/// 插入下载记录；同一 (vol_id, format) 的旧记录被替换。
pub fn add_downloaded_volume(entry: &mut LibraryEntry, record: DownloadedVolume) {
    entry
        .downloaded_volumes
        .retain(|v| !(v.vol_id == record.vol_id && v.format == record.format));
    entry.downloaded_volumes.push(record);
}

/// 用远端详情刷新条目：元数据、总卷数、完成状态与检查时间；下载记录原样保留。
pub fn refresh_entry_from_detail(entry: &LibraryEntry, detail: &ComicDetail) -> LibraryEntry {
    let downloaded: HashSet<&str> = entry
        .downloaded_volumes
        .iter()
        .map(|v| v.vol_id.as_str())
        .collect();
    let total = detail.volumes.len();
    let is_complete = total > 0
        && detail
            .volumes
            .iter()
            .all(|v| downloaded.contains(v.vol_id.as_str()));

    let comic_id = if entry.comic_id.is_empty() {
        detail.meta.comic_id.clone()
    } else {
        entry.comic_id.clone()
    };

    LibraryEntry {
        book_id: entry.book_id.clone(),
        comic_id,
        title: detail.meta.title.clone(),
        meta: detail.meta.clone(),
        downloaded_volumes: entry.downloaded_volumes.clone(),
        total_volumes: total,
        last_checked: Some(OffsetDateTime::now_utc()),
        is_complete,
    }
}

/// 需要（重新）下载的卷：未记录、文件缺失，或小于预期大小的一半。
///
/// 预期大小未知（≤ 0）时不按大小判断。
pub fn find_stale_volumes(comic_dir: &Path, entry: &LibraryEntry, detail: &ComicDetail) -> Vec<String> {
    let downloaded: HashMap<&str, &DownloadedVolume> = entry
        .downloaded_volumes
        .iter()
        .map(|v| (v.vol_id.as_str(), v))
        .collect();

    let mut seen = HashSet::new();
    let mut stale = Vec::new();
    for volume in &detail.volumes {
        if !seen.insert(volume.vol_id.as_str()) {
            continue;
        }
        let Some(record) = downloaded.get(volume.vol_id.as_str()) else {
            stale.push(volume.vol_id.clone());
            continue;
        };
        if is_stale_record(comic_dir, record, volume) {
            stale.push(volume.vol_id.clone());
        }
    }
    stale
}

fn is_stale_record(comic_dir: &Path, record: &DownloadedVolume, volume: &Volume) -> bool {
    let path = comic_dir.join(&record.filename);
    let actual = match fs::metadata(&path) {
        Ok(meta) => meta.len(),
        // 压缩包内的卷：压缩包仍在即视为存在，不做大小检查
        Err(_) => {
            return !path
                .parent()
                .filter(|p| *p != comic_dir)
                .is_some_and(|archive| archive.is_file());
        }
    };
    let expected_mb = volume.expected_mb(&record.format);
    expected_mb > 0.0 && (actual as f64) < expected_mb * BYTES_PER_MB * 0.5
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).map_err(|e| KmoeError::io(path, e))?;
    serde_json::from_str(&raw).map_err(|source| KmoeError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// 先写临时文件再改名，避免中断时留下半截 JSON。
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(|source| KmoeError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp = path.with_extension("json.part");
    fs::write(&tmp, text).map_err(|e| KmoeError::io(&tmp, e))?;
    let _ = fs::remove_file(path);
    fs::rename(&tmp, path).map_err(|e| KmoeError::io(path, e))
}
