//! download 子命令、带进度条的批量下载与结果汇总。

use anyhow::Result;

use super::App;
use super::table::Table;
use crate::base_system::comic_paths::{format_size, normalize_comic_ref};
use crate::download::downloader::{download_batch, download_volumes};
use crate::download::models::{BatchDownloadResult, CancelToken, DownloadFormat, resolve_format};
use crate::download::progress::CliProgress;
use crate::network_parser::auth::{SessionState, check_session};
use crate::network_parser::comic::get_comic_detail;
use crate::network_parser::models::ComicDetail;

/// 命令行参数优先，否则用配置里的默认格式。
pub(super) fn pick_format(app: &App, fmt: Option<&str>) -> Result<DownloadFormat> {
    Ok(resolve_format(fmt.unwrap_or(app.config.default_format.as_str()))?)
}

/// 单个漫画的一批下载，显示进度条；不更新根索引。
pub(super) fn run_with_progress(
    app: &App,
    detail: &ComicDetail,
    vol_ids: &[String],
    fmt: DownloadFormat,
) -> BatchDownloadResult {
    let progress = CliProgress::new(vol_ids.len());
    let cancel = CancelToken::new();
    let batch = download_batch(&app.download_ctx(), detail, vol_ids, fmt, &cancel, &progress);
    progress.finish();
    batch
}

pub(super) fn print_summary(batch: &BatchDownloadResult) {
    let mut table = Table::new("Download Results").headers(&["Volume", "Status", "Size"]);
    for r in &batch.results {
        let status = if r.skipped { "skipped" } else { "downloaded" };
        table.row([r.volume.title.clone(), status.to_string(), format_size(r.size_bytes)]);
    }
    for (vol_id, err) in &batch.errors {
        table.row([vol_id.clone(), format!("error: {err}"), String::new()]);
    }
    table.print();

    let mut parts = vec![format!("{} downloaded", batch.downloaded())];
    if batch.skipped() > 0 {
        parts.push(format!("{} skipped", batch.skipped()));
    }
    if !batch.errors.is_empty() {
        parts.push(format!("{} failed", batch.errors.len()));
    }
    println!(
        "\nTotal: {} ({})",
        parts.join(", "),
        format_size(batch.downloaded_bytes())
    );
}

/// `-V 1001,1002`；空项忽略。
fn parse_volume_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn download(app: &App, comic_ref: &str, volumes: Option<&str>, fmt: Option<&str>) -> Result<()> {
    let fmt = pick_format(app, fmt)?;
    let comic_id = normalize_comic_ref(comic_ref);

    app.apply_session();
    let detail = get_comic_detail(&app.client, &comic_id)?;

    let vol_ids = match volumes {
        Some(raw) => parse_volume_list(raw),
        None => detail.volumes.iter().map(|v| v.vol_id.clone()).collect(),
    };
    if vol_ids.is_empty() {
        println!("No volumes to download.");
        return Ok(());
    }

    match check_session(&app.client, &app.sessions)? {
        SessionState::Valid(user) => {
            let remaining = user.remaining_mb();
            println!(
                "Quota: {remaining:.1} / {:.1} MB remaining",
                user.quota_free_month
            );
            if remaining <= 0.0 {
                println!("Warning: quota may be exhausted");
            }
        }
        SessionState::Invalid => println!("Warning: session expired, downloads may be rejected"),
        SessionState::Absent => println!("Warning: not logged in, downloads may be rejected"),
    }

    println!(
        "Downloading {} volume(s) of {} as {} ...",
        vol_ids.len(),
        detail.meta.title,
        fmt.extension().to_ascii_uppercase()
    );
    let progress = CliProgress::new(vol_ids.len());
    let batch = download_volumes(
        &app.download_ctx(),
        &detail,
        &vol_ids,
        fmt,
        &CancelToken::new(),
        &progress,
    );
    progress.finish();

    print_summary(&batch);
    Ok(())
}
