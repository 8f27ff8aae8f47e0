//! search / info。

use anyhow::Result;

use super::App;
use super::table::Table;
use crate::base_system::comic_paths::normalize_comic_ref;
use crate::network_parser::comic::get_comic_detail;
use crate::network_parser::search::{search as site_search, sort_by_language_and_score};

fn or_na(text: &str) -> &str {
    if text.is_empty() { "N/A" } else { text }
}

fn size_cell(mb: f64) -> String {
    if mb > 0.0 {
        format!("{mb:.1} MB")
    } else {
        "-".to_string()
    }
}

pub fn search(app: &App, keyword: &str, page: u32, language: Option<&str>) -> Result<()> {
    let language = language.unwrap_or(app.config.preferred_language.as_str());
    app.apply_session();
    let response = site_search(&app.client, keyword, page.max(1), language)?;

    if response.results.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    let mut table = Table::new(&format!("Search Results for '{keyword}'")).headers(&[
        "ID", "Title", "Authors", "Update", "Score", "Status", "Language",
    ]);
    for r in sort_by_language_and_score(response.results, language) {
        let score = match r.score {
            Some(s) if s > 0.0 => format!("{s:.1}"),
            _ => "N/A".to_string(),
        };
        table.row([
            r.comic_id,
            r.title,
            r.authors.join(", "),
            r.last_update,
            score,
            r.status,
            r.language,
        ]);
    }
    table.print();
    println!("Page {} of {}", response.current_page, response.total_pages);
    Ok(())
}

pub fn info(app: &App, comic_ref: &str) -> Result<()> {
    let comic_id = normalize_comic_ref(comic_ref);
    app.apply_session();
    let detail = get_comic_detail(&app.client, &comic_id)?;
    let meta = &detail.meta;

    println!("== Comic {} ==", detail.dir_id());
    println!("Title: {}", meta.title);
    println!("Authors: {}", or_na(&meta.authors.join(", ")));
    println!("Status: {}", or_na(&meta.status));
    println!("Region: {}", or_na(&meta.region));
    println!("Language: {}", or_na(&meta.language));
    println!("Categories: {}", or_na(&meta.categories.join(", ")));
    if let Some(score) = meta.score {
        println!("Score: {score}");
    }
    if !meta.description.is_empty() {
        println!("\n{}", meta.description);
    }
    println!();

    if detail.volumes.is_empty() {
        println!("No volumes available.");
        return Ok(());
    }

    let mut table = Table::new("Volumes").headers(&["#", "Vol ID", "Title", "MOBI", "EPUB"]);
    let mut total_mobi = 0.0;
    let mut total_epub = 0.0;
    for (idx, vol) in detail.volumes.iter().enumerate() {
        total_mobi += vol.size_mobi_mb;
        total_epub += vol.size_epub_mb;
        table.row([
            (idx + 1).to_string(),
            vol.vol_id.clone(),
            vol.title.clone(),
            size_cell(vol.size_mobi_mb),
            size_cell(vol.size_epub_mb),
        ]);
    }
    table.print();
    println!(
        "Total: {} volumes, MOBI {total_mobi:.1} MB, EPUB {total_epub:.1} MB",
        detail.volumes.len()
    );
    Ok(())
}
