//! library / update / scan / link。

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use tracing::{info, warn};

use super::download::{pick_format, print_summary, run_with_progress};
use super::table::Table;
use super::{App, confirm};
use crate::base_system::comic_paths::normalize_comic_ref;
use crate::base_system::context::expand_home;
use crate::download::models::BatchDownloadResult;
use crate::library::matcher::match_files_to_volumes;
use crate::library::models::{LibraryEntry, ScannedFile};
use crate::library::scanner::{detect_title_from_directory, import_directory, scan_book_files};
use crate::library::store::{find_stale_volumes, refresh_entry_from_detail};
use crate::network_parser::comic::get_comic_detail;
use crate::network_parser::models::{ComicDetail, SearchResult};
use crate::network_parser::search::search;

fn volume_cell(downloaded: usize, total: usize) -> String {
    if total > 0 {
        format!("{downloaded}/{total}")
    } else {
        downloaded.to_string()
    }
}

fn yes_no(v: bool) -> &'static str {
    if v { "Yes" } else { "No" }
}

fn print_unmatched(unmatched: &[ScannedFile]) {
    if unmatched.is_empty() {
        return;
    }
    println!("  Unmatched files: {}", unmatched.len());
    for file in unmatched {
        println!("    - {}", file.name);
    }
}

/// 优先读根索引；索引缺失或为空时逐个扫描条目。
pub fn library(app: &App) -> Result<()> {
    let mut table = Table::new("Local Library").headers(&["ID", "Title", "Volumes", "Complete"]);

    match app.store.load_index().filter(|index| !index.comics.is_empty()) {
        Some(index) => {
            for c in index.comics {
                table.row([
                    c.book_id,
                    c.title,
                    volume_cell(c.downloaded_volumes, c.total_volumes),
                    yes_no(c.is_complete).to_string(),
                ]);
            }
        }
        None => {
            for entry in app.store.list_library() {
                table.row([
                    entry.book_id.clone(),
                    entry.title.clone(),
                    volume_cell(entry.downloaded_volumes.len(), entry.total_volumes),
                    yes_no(entry.is_complete).to_string(),
                ]);
            }
        }
    }

    if table.is_empty() {
        println!("Library is empty.");
    } else {
        table.print();
    }
    Ok(())
}

struct PendingUpdate {
    entry: LibraryEntry,
    detail: ComicDetail,
    stale: Vec<String>,
}

pub fn update(
    app: &App,
    comic_id: Option<&str>,
    fmt: Option<&str>,
    all: bool,
    dry_run: bool,
    yes: bool,
) -> Result<()> {
    if comic_id.is_none() && !all {
        bail!("Specify a COMIC_ID or use --all/-a.");
    }
    let fmt = pick_format(app, fmt)?;

    let mut entries = app.store.list_library();
    if entries.is_empty() {
        println!("Library is empty. Nothing to update.");
        return Ok(());
    }
    if let Some(wanted) = comic_id.filter(|_| !all) {
        let wanted = normalize_comic_ref(wanted);
        entries.retain(|e| e.comic_id == wanted || e.book_id == wanted);
        if entries.is_empty() {
            bail!("Comic {wanted} not found in library.");
        }
    }

    app.apply_session();

    let mut updates = Vec::new();
    for entry in entries {
        let detail = match get_comic_detail(&app.client, entry.dir_id()) {
            Ok(detail) => detail,
            Err(err) => {
                warn!(target: "library", title = %entry.title, "获取详情失败: {err}");
                println!("Skip {}: {err}", entry.title);
                continue;
            }
        };

        let refreshed = refresh_entry_from_detail(&entry, &detail);
        app.store.save_entry(&refreshed, false)?;

        let stale = find_stale_volumes(&app.store.entry_dir(&refreshed), &refreshed, &detail);
        if stale.is_empty() {
            println!(
                "{}: up to date ({}/{})",
                refreshed.title,
                refreshed.downloaded_volumes.len(),
                refreshed.total_volumes
            );
        } else {
            updates.push(PendingUpdate {
                entry: refreshed,
                detail,
                stale,
            });
        }
    }

    if updates.is_empty() {
        println!("Everything is up to date.");
        app.store.update_root_index();
        return Ok(());
    }

    println!();
    let mut table = Table::new("Available Updates").headers(&["Title", "Current", "New Volumes"]);
    for u in &updates {
        table.row([
            u.entry.title.clone(),
            format!("{}/{}", u.entry.downloaded_volumes.len(), u.entry.total_volumes),
            u.stale.len().to_string(),
        ]);
    }
    table.print();
    let total_new: usize = updates.iter().map(|u| u.stale.len()).sum();
    println!("\n{} comic(s), {total_new} new volume(s)", updates.len());

    if dry_run {
        println!("Dry run: no downloads performed.");
        app.store.update_root_index();
        return Ok(());
    }
    if !yes && !confirm("Download new volumes?")? {
        println!("Cancelled.");
        app.store.update_root_index();
        return Ok(());
    }

    let mut all_results = BatchDownloadResult::default();
    for u in &updates {
        println!("\n{}: downloading {} volume(s) ...", u.entry.title, u.stale.len());
        let batch = run_with_progress(app, &u.detail, &u.stale, fmt);
        all_results.results.extend(batch.results);
        all_results.errors.extend(batch.errors);
    }
    app.store.update_root_index();

    print_summary(&all_results);
    Ok(())
}

/// 搜索结果中优先取标题完全一致的一项，否则取第一项。
fn best_match<'a>(results: &'a [SearchResult], title: &str) -> Option<&'a SearchResult> {
    results
        .iter()
        .find(|r| r.title == title)
        .or_else(|| results.first())
}

/// 下载根目录下尚未登记的子目录及推断出的标题。
fn untracked_dirs(app: &App, root: &Path) -> Result<Vec<(PathBuf, String)>> {
    let mut children: Vec<PathBuf> = fs::read_dir(root)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    children.sort();

    let mut found = Vec::new();
    for child in children {
        let name = child
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Some(entry) = app.store.load_entry_in(&child)
            && !entry.book_id.is_empty()
        {
            println!("Skip {name} (already tracked: {})", entry.book_id);
            continue;
        }
        match detect_title_from_directory(&child) {
            Some(title) => found.push((child, title)),
            None => println!("Skip {name} (no recognizable files)"),
        }
    }
    Ok(found)
}

pub fn scan(app: &App, dry_run: bool) -> Result<()> {
    let root = app.store.root();
    if !root.is_dir() {
        bail!("Download directory does not exist: {}", root.display());
    }

    let dirs = untracked_dirs(app, root)?;
    if dirs.is_empty() {
        println!("All directories are already tracked.");
        if !dry_run {
            app.store.rebuild_index()?;
        }
        return Ok(());
    }

    println!("\nFound {} directory(ies) to scan:\n", dirs.len());
    app.apply_session();

    for (dir, title) in &dirs {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        println!("{name} -> title: {title}");

        let response = match search(&app.client, title, 1, &app.config.preferred_language) {
            Ok(response) => response,
            Err(err) => {
                println!("  Search failed: {err}");
                continue;
            }
        };
        let Some(matched) = best_match(&response.results, title) else {
            println!("  No search results");
            continue;
        };
        println!("  Matched: {} - {}", matched.comic_id, matched.title);

        let detail = match get_comic_detail(&app.client, &matched.comic_id) {
            Ok(detail) => detail,
            Err(err) => {
                println!("  Detail fetch failed: {err}");
                continue;
            }
        };

        if dry_run {
            let files = scan_book_files(dir);
            let result = match_files_to_volumes(&files, &detail.volumes);
            println!(
                "  Files: {}, Matched volumes: {}/{}",
                files.len(),
                result.matched.len(),
                detail.volumes.len()
            );
            print_unmatched(&result.unmatched);
            let canonical = app.store.comic_dir(&matched.comic_id, &detail.meta.title);
            if *dir != canonical
                && let Some(new_name) = canonical.file_name()
            {
                println!("  Rename: {name} -> {}", new_name.to_string_lossy());
            }
            println!();
            continue;
        }

        match import_directory(&app.store, dir, &matched.comic_id, &detail) {
            Ok((entry, unmatched)) => {
                println!(
                    "  Imported: {} volumes (complete: {})",
                    entry.downloaded_volumes.len(),
                    yes_no(entry.is_complete)
                );
                print_unmatched(&unmatched);
            }
            Err(err) => println!("  Import failed: {err}"),
        }
    }

    if dry_run {
        println!("\nDry run complete. No changes made.");
    } else {
        app.store.rebuild_index()?;
        info!(target: "library", dirs = dirs.len(), "扫描完成");
        println!("\nScan complete. Root index updated.");
    }
    Ok(())
}

pub fn link(app: &App, directory: &str, comic_ref: &str) -> Result<()> {
    let dir = expand_home(directory);
    if !dir.is_dir() {
        bail!("Directory does not exist: {}", dir.display());
    }
    let comic_id = normalize_comic_ref(comic_ref);

    app.apply_session();
    let detail = get_comic_detail(&app.client, &comic_id)?;
    let (entry, unmatched) = import_directory(&app.store, &dir, &comic_id, &detail)?;

    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    println!("Linked {name}");
    println!("  Book ID: {}", entry.book_id);
    println!("  Title: {}", entry.title);
    println!("  Matched volumes: {}", entry.downloaded_volumes.len());
    print_unmatched(&unmatched);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, title: &str) -> SearchResult {
        SearchResult {
            comic_id: id.into(),
            title: title.into(),
            authors: Vec::new(),
            cover_url: String::new(),
            last_update: String::new(),
            score: None,
            status: String::new(),
            language: String::new(),
        }
    }

    #[test]
    fn exact_title_wins_over_first_result() {
        let results = vec![result("a1", "棋魂 外傳"), result("b2", "棋魂")];
        assert_eq!(best_match(&results, "棋魂").unwrap().comic_id, "b2");
        assert_eq!(best_match(&results, "火影").unwrap().comic_id, "a1");
        assert!(best_match(&[], "棋魂").is_none());
    }

    #[test]
    fn volume_counts() {
        assert_eq!(volume_cell(3, 10), "3/10");
        assert_eq!(volume_cell(3, 0), "3");
    }
}
