//! 单卷与批量下载编排。
//!
//! 单卷下载拆成两步：`fetch_volume` 只做跳过判断与传输，`record_volume` 写入
//! `library.json`。批量下载时工作线程只调用前者，条目写入全部由协调线程串行完成，
//! 同一漫画的 `library.json` 不会被并发改写。

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use crossbeam_channel as channel;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use super::models::{BatchDownloadResult, CancelToken, DownloadFormat, DownloadResult};
use super::progress::{DownloadObserver, Outcome};
use crate::base_system::comic_paths::volume_filename;
use crate::base_system::errors::{KmoeError, Result};
use crate::library::models::{DownloadedVolume, LibraryEntry};
use crate::library::store::{LibraryStore, add_downloaded_volume, refresh_entry_from_detail};
use crate::network_parser::comic::find_volume;
use crate::network_parser::models::{ComicDetail, Volume};
use crate::network_parser::network::MirrorClient;
use crate::network_parser::transport::Transport;

/// 默认尝试的下载线路。
pub const DEFAULT_LINES: [u8; 2] = [0, 1];
/// 已有文件与预期大小相差不超过该值（MB）时视为完好。
const SIZE_TOLERANCE_MB: f64 = 10.0;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

pub struct DownloadContext<'a, T: Transport> {
    pub client: &'a MirrorClient<T>,
    pub store: &'a LibraryStore,
    pub workers: usize,
}

/// 已传输（或跳过）但尚未写入书库的一卷。
#[derive(Debug, Clone)]
pub struct FetchedVolume {
    pub volume: Volume,
    pub filename: String,
    pub path: PathBuf,
    pub skipped: bool,
    pub size_bytes: u64,
}

impl FetchedVolume {
    fn into_result(self) -> DownloadResult {
        DownloadResult {
            path: self.path,
            volume: self.volume,
            skipped: self.skipped,
            size_bytes: self.size_bytes,
        }
    }
}

/// 逐条线路请求 CDN 地址；至少一条成功即可。
///
/// 全部失败时返回最后一个错误；任一线路报额度不足则原样返回该错误，便于批量下载据此取消。
pub fn get_download_urls<T: Transport>(
    client: &MirrorClient<T>,
    book_id: &str,
    vol_id: &str,
    fmt: DownloadFormat,
    lines: &[u8],
) -> Result<Vec<String>> {
    let mut urls = Vec::with_capacity(lines.len());
    let mut last_error = None;
    let mut quota_error = None;
    for &line in lines {
        match client.get_download_url(book_id, vol_id, fmt.code(), line) {
            Ok(url) => {
                debug!(target: "download", vol_id, line, "已获取下载地址");
                urls.push(url);
            }
            Err(err) => {
                warn!(target: "download", vol_id, line, "线路获取下载地址失败: {err}");
                if err.is_quota_exhausted() {
                    quota_error = Some(err);
                } else {
                    last_error = Some(err);
                }
            }
        }
    }

    if !urls.is_empty() {
        return Ok(urls);
    }
    if let Some(err) = quota_error {
        return Err(err);
    }
    match last_error {
        Some(err) => Err(KmoeError::Download(format!(
            "Failed to get download URL for volume {vol_id} from all lines {lines:?}: {err}"
        ))),
        None => Err(KmoeError::Download(format!(
            "No download line configured for volume {vol_id}"
        ))),
    }
}

/// 已记录且文件存在，并且预期大小未知或与实际相差不超过 10 MB。
fn should_skip(
    entry: Option<&LibraryEntry>,
    volume: &Volume,
    fmt: DownloadFormat,
    dest: &Path,
) -> bool {
    let recorded = entry.is_some_and(|e| {
        e.find_downloaded(&volume.vol_id, fmt.extension())
            .is_some()
    });
    if !recorded {
        return false;
    }
    let Ok(meta) = fs::metadata(dest) else {
        return false;
    };
    let expected_mb = volume.expected_mb(fmt.extension());
    if expected_mb > 0.0 {
        let actual_mb = meta.len() as f64 / BYTES_PER_MB;
        if (actual_mb - expected_mb).abs() > SIZE_TOLERANCE_MB {
            return false;
        }
    }
    true
}

/// 跳过判断 + 传输，不写书库。`entry` 为当前的书库条目快照。
pub fn fetch_volume<T: Transport>(
    client: &MirrorClient<T>,
    comic_dir: &Path,
    detail: &ComicDetail,
    entry: Option<&LibraryEntry>,
    vol_id: &str,
    fmt: DownloadFormat,
    observer: &dyn DownloadObserver,
) -> Result<FetchedVolume> {
    let volume = find_volume(detail, vol_id)?.clone();
    let filename = volume_filename(&detail.meta.title, &volume.title, fmt.extension());
    let dest = comic_dir.join(&filename);

    if should_skip(entry, &volume, fmt, &dest) {
        info!(target: "download", vol_id, format = %fmt, "卷已下载，跳过");
        let size_bytes = fs::metadata(&dest).map(|m| m.len()).unwrap_or(0);
        return Ok(FetchedVolume {
            volume,
            filename,
            path: dest,
            skipped: true,
            size_bytes,
        });
    }

    let urls = get_download_urls(client, &detail.meta.book_id, vol_id, fmt, &DEFAULT_LINES)?;

    info!(
        target: "download",
        book_id = %detail.meta.book_id,
        vol_id,
        title = %volume.title,
        format = %fmt,
        "开始下载"
    );
    observer.started(&volume);

    let mut last_error = None;
    let mut written = None;
    for url in &urls {
        let result = client.download_file(
            url,
            &dest,
            &mut |total| observer.total(vol_id, total),
            &mut |n| observer.advanced(vol_id, n),
        );
        match result {
            Ok(n) => {
                written = Some(n);
                break;
            }
            Err(err) => {
                warn!(target: "download", vol_id, "下载失败，尝试下一个地址: {err}");
                last_error = Some(err);
            }
        }
    }

    let Some(written) = written else {
        let cause = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no url".to_string());
        return Err(KmoeError::Download(format!(
            "Failed to download volume {vol_id} ({}): {cause}",
            volume.title
        )));
    };

    let size_bytes = fs::metadata(&dest).map(|m| m.len()).unwrap_or(written);
    info!(target: "download", vol_id, size_bytes, path = %dest.display(), "卷下载完成");
    Ok(FetchedVolume {
        volume,
        filename,
        path: dest,
        skipped: false,
        size_bytes,
    })
}

/// 写入下载记录（同一 vol_id+format 只保留一条），按远端详情刷新后保存。
///
/// 不更新根索引，由调用方决定时机。
pub fn record_volume(
    store: &LibraryStore,
    entry: Option<&LibraryEntry>,
    detail: &ComicDetail,
    fetched: &FetchedVolume,
    fmt: DownloadFormat,
) -> Result<LibraryEntry> {
    let mut entry = entry
        .cloned()
        .unwrap_or_else(|| LibraryEntry::new(detail.meta.clone(), detail.dir_id()));
    add_downloaded_volume(
        &mut entry,
        DownloadedVolume {
            vol_id: fetched.volume.vol_id.clone(),
            title: fetched.volume.title.clone(),
            format: fmt.extension().to_string(),
            filename: fetched.filename.clone(),
            downloaded_at: OffsetDateTime::now_utc(),
            size_bytes: fetched.size_bytes,
        },
    );
    let entry = refresh_entry_from_detail(&entry, detail);
    store.save_entry(&entry, false)?;
    Ok(entry)
}

/// 下载单卷并更新书库与根索引。
pub fn download_volume<T: Transport>(
    ctx: &DownloadContext<'_, T>,
    detail: &ComicDetail,
    vol_id: &str,
    fmt: DownloadFormat,
    observer: &dyn DownloadObserver,
) -> Result<DownloadResult> {
    let comic_dir = ctx.store.comic_dir(detail.dir_id(), &detail.meta.title);
    let entry = ctx.store.load_entry_in(&comic_dir);
    let fetched = fetch_volume(
        ctx.client,
        &comic_dir,
        detail,
        entry.as_ref(),
        vol_id,
        fmt,
        observer,
    )?;
    if !fetched.skipped {
        record_volume(ctx.store, entry.as_ref(), detail, &fetched, fmt)?;
        ctx.store.update_root_index();
    }
    Ok(fetched.into_result())
}

/// 批量下载并在结束时重建一次根索引。
pub fn download_volumes<T: Transport>(
    ctx: &DownloadContext<'_, T>,
    detail: &ComicDetail,
    vol_ids: &[String],
    fmt: DownloadFormat,
    cancel: &CancelToken,
    observer: &dyn DownloadObserver,
) -> BatchDownloadResult {
    let batch = download_batch(ctx, detail, vol_ids, fmt, cancel, observer);
    ctx.store.update_root_index();
    batch
}

/// 以 `ctx.workers` 个线程批量下载；单卷失败互不影响，不更新根索引。
///
/// 遇到额度不足时取消令牌，之后才开始的任务直接以同样的错误结束。
pub fn download_batch<T: Transport>(
    ctx: &DownloadContext<'_, T>,
    detail: &ComicDetail,
    vol_ids: &[String],
    fmt: DownloadFormat,
    cancel: &CancelToken,
    observer: &dyn DownloadObserver,
) -> BatchDownloadResult {
    let comic_dir = ctx.store.comic_dir(detail.dir_id(), &detail.meta.title);
    let mut entry = ctx.store.load_entry_in(&comic_dir);
    let snapshot = entry.clone();

    // 重复的 vol_id 会写同一个目标文件
    let mut seen = HashSet::new();
    let ids: Vec<&str> = vol_ids
        .iter()
        .map(String::as_str)
        .filter(|id| seen.insert(*id))
        .collect();
    let mut slots: Vec<Option<Result<DownloadResult>>> = ids.iter().map(|_| None).collect();
    let workers = ctx.workers.clamp(1, ids.len().max(1));

    let (tx, rx) = channel::unbounded::<(usize, &str)>();
    let (tx_evt, rx_evt) = channel::unbounded::<(usize, Result<FetchedVolume>)>();
    for task in ids.iter().copied().enumerate() {
        let _ = tx.send(task);
    }
    drop(tx);

    debug!(target: "download", volumes = ids.len(), workers, "批量下载开始");

    thread::scope(|s| {
        for _ in 0..workers {
            let rx = rx.clone();
            let tx_evt = tx_evt.clone();
            let snapshot = snapshot.as_ref();
            let comic_dir = comic_dir.as_path();
            s.spawn(move || {
                for (idx, vol_id) in rx.iter() {
                    let res = if cancel.is_cancelled() {
                        Err(cancel.cancelled_error())
                    } else {
                        let res = fetch_volume(
                            ctx.client, comic_dir, detail, snapshot, vol_id, fmt, observer,
                        );
                        if let Err(err) = &res
                            && err.is_quota_exhausted()
                        {
                            warn!(target: "download", vol_id, "额度不足，取消剩余任务");
                            cancel.cancel();
                        }
                        res
                    };
                    if tx_evt.send((idx, res)).is_err() {
                        return;
                    }
                }
            });
        }
        drop(tx_evt);

        for (idx, res) in rx_evt.iter() {
            let vol_id = ids[idx];
            let res = res.and_then(|fetched| {
                if !fetched.skipped {
                    entry = Some(record_volume(
                        ctx.store,
                        entry.as_ref(),
                        detail,
                        &fetched,
                        fmt,
                    )?);
                }
                Ok(fetched.into_result())
            });
            match &res {
                Ok(r) if r.skipped => observer.finished(vol_id, Outcome::Skipped),
                Ok(_) => observer.finished(vol_id, Outcome::Downloaded),
                Err(err) => {
                    error!(target: "download", vol_id, "卷下载失败: {err}");
                    observer.finished(vol_id, Outcome::Failed);
                }
            }
            slots[idx] = Some(res);
        }
    });

    let mut batch = BatchDownloadResult::default();
    for (vol_id, slot) in ids.iter().zip(slots) {
        match slot {
            Some(Ok(result)) => batch.results.push(result),
            Some(Err(err)) => batch.errors.push((vol_id.to_string(), err)),
            None => batch.errors.push((
                vol_id.to_string(),
                KmoeError::Download("worker exited before reporting".to_string()),
            )),
        }
    }

    info!(
        target: "download",
        downloaded = batch.downloaded(),
        skipped = batch.skipped(),
        failed = batch.errors.len(),
        "批量下载结束"
    );
    batch
}
