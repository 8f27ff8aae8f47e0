//! 站点数据模型（详情页、卷信息、搜索结果、用户状态）。

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComicMeta {
    pub book_id: String,
    #[serde(default)]
    pub comic_id: String,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub cover_url: String,
    #[serde(default)]
    pub description: String,
}

/// 远端卷描述，只读。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub vol_id: String,
    pub title: String,
    #[serde(default = "one")]
    pub file_count: u32,
    #[serde(default)]
    pub size_mobi_mb: f64,
    #[serde(default)]
    pub size_epub_mb: f64,
}

fn one() -> u32 {
    1
}

impl Volume {
    pub fn new(vol_id: &str, title: &str) -> Self {
        Self {
            vol_id: vol_id.to_string(),
            title: title.to_string(),
            file_count: 1,
            size_mobi_mb: 0.0,
            size_epub_mb: 0.0,
        }
    }

    /// 指定格式的预期大小（MB），未知为 0。
    pub fn expected_mb(&self, format_name: &str) -> f64 {
        if format_name.eq_ignore_ascii_case("epub") {
            self.size_epub_mb
        } else {
            self.size_mobi_mb
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComicDetail {
    pub meta: ComicMeta,
    pub volumes: Vec<Volume>,
}

impl ComicDetail {
    /// 用于目录命名的 ID：优先 URL 形式的 comic_id。
    pub fn dir_id(&self) -> &str {
        if self.meta.comic_id.is_empty() {
            &self.meta.book_id
        } else {
            &self.meta.comic_id
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub comic_id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub cover_url: String,
    pub last_update: String,
    pub score: Option<f64>,
    pub status: String,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub total_pages: u32,
    pub current_page: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserStatus {
    pub uin: String,
    pub username: String,
    pub level: u32,
    pub is_vip: bool,
    pub quota_now: f64,
    /// 以下三项单位为 MB
    pub quota_free_month: f64,
    pub quota_remaining: f64,
    pub quota_extra: f64,
}

impl UserStatus {
    pub fn remaining_mb(&self) -> f64 {
        self.quota_remaining + self.quota_extra
    }
}
