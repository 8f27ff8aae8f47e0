//! 关键词搜索与按语言分类浏览。

use std::cmp::Ordering;
use std::fmt::Write as _;

use super::models::{SearchResponse, SearchResult};
use super::network::MirrorClient;
use super::parser::parse_search_results;
use super::transport::Transport;
use crate::base_system::errors::Result;

pub const SEARCH_TEMPLATE: &str = "https://{domain}/list.php?s={keyword}";
pub const CATEGORY_BROWSE_TEMPLATE: &str = "https://{domain}/l/{filters}/{page}.htm";

/// 配置中的语言代码 → 站点分类接口代码。
fn api_language(code: &str) -> &str {
    match code {
        "ch" => "chn",
        "jp" => "jpn",
        "en" => "eng",
        "oth" => "oth",
        other => other,
    }
}

/// 配置中的语言代码 → 搜索结果里的语言标记。
fn display_language(code: &str) -> Option<&'static str> {
    match code {
        "ch" => Some("中文"),
        "jp" => Some("日語"),
        "en" => Some("英文"),
        _ => None,
    }
}

/// `language` 为 `all` 时走 `list.php`，否则走带语言过滤的分类浏览。
pub fn search<T: Transport>(
    client: &MirrorClient<T>,
    keyword: &str,
    page: u32,
    language: &str,
) -> Result<SearchResponse> {
    let encoded = percent_encode(keyword);
    let resp = if language != "all" {
        let filters = format!(
            "{encoded},all,all,sortpoint,{},all,BL,0,0",
            api_language(language)
        );
        let page = page.to_string();
        client.get(
            CATEGORY_BROWSE_TEMPLATE,
            &[("filters", filters.as_str()), ("page", page.as_str())],
        )?
    } else if page > 1 {
        let page = page.to_string();
        client.get(
            &format!("{SEARCH_TEMPLATE}&page={{page}}"),
            &[("keyword", encoded.as_str()), ("page", page.as_str())],
        )?
    } else {
        client.get(SEARCH_TEMPLATE, &[("keyword", encoded.as_str())])?
    };
    Ok(parse_search_results(&resp.body))
}

/// 首选语言在前，其余按评分降序；无评分按 0 计。排序稳定。
pub fn sort_by_language_and_score(
    mut results: Vec<SearchResult>,
    preferred_language: &str,
) -> Vec<SearchResult> {
    let preferred = display_language(preferred_language);
    let rank = |r: &SearchResult| u8::from(Some(r.language.as_str()) != preferred);
    results.sort_by(|a, b| {
        rank(a).cmp(&rank(b)).then_with(|| {
            let (sa, sb) = (a.score.unwrap_or(0.0), b.score.unwrap_or(0.0));
            sb.partial_cmp(&sa).unwrap_or(Ordering::Equal)
        })
    });
    results
}

/// URL 路径/查询参数编码：保留字母数字与 `-_.~`，其余按 UTF-8 字节转义。
pub fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(byte as char);
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}
