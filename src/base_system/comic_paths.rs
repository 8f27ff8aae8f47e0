//! 文件名清洗、目录命名与容量换算。

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

const MAX_NAME_CHARS: usize = 200;

static RE_SIZE: OnceLock<Regex> = OnceLock::new();
static RE_COMIC_URL: OnceLock<Regex> = OnceLock::new();

/// 将任意字符串清洗为可用的文件名。
///
/// `/\:*?"<>|` 替换为 `_`，去掉首尾空白与点号，最多保留 200 个字符；
/// 清洗后为空时返回 `unnamed`。
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => ch,
        })
        .collect();

    let trimmed = trim_name(&replaced);
    let mut cleaned: String = trimmed.chars().take(MAX_NAME_CHARS).collect();
    // 截断后可能重新露出尾部空白/点号
    cleaned = trim_name(&cleaned).to_string();

    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

fn trim_name(s: &str) -> &str {
    s.trim_matches(|c: char| c.is_whitespace() || c == '.')
}

/// 漫画目录名：`{清洗后的标题}_{comic_id}`。
pub fn comic_dir_name(comic_id: &str, title: &str) -> String {
    format!("{}_{}", sanitize_filename(title), comic_id)
}

pub fn comic_dir_path(root: &Path, comic_id: &str, title: &str) -> PathBuf {
    root.join(comic_dir_name(comic_id, title))
}

/// 卷文件名：`[Kmoe][{清洗后的标题}]{卷标题}.{扩展名}`。
pub fn volume_filename(comic_title: &str, volume_title: &str, extension: &str) -> String {
    format!(
        "[Kmoe][{}]{}.{}",
        sanitize_filename(comic_title),
        volume_title,
        extension
    )
}

/// 解析 "52.3 MB" 这类容量字符串为字节数，无法识别时返回 0。
pub fn parse_size(text: &str) -> u64 {
    let re = RE_SIZE.get_or_init(|| {
        Regex::new(r"^\s*([0-9]+\.?[0-9]*)\s*([A-Za-z]+)\s*$").expect("compile RE_SIZE")
    });
    let Some(caps) = re.captures(text) else {
        return 0;
    };
    let Ok(value) = caps[1].parse::<f64>() else {
        return 0;
    };
    let multiplier: u64 = match caps[2].to_ascii_uppercase().as_str() {
        "B" => 1,
        "KB" => 1024,
        "MB" => 1024 * 1024,
        "GB" => 1024 * 1024 * 1024,
        "TB" => 1024 * 1024 * 1024 * 1024,
        _ => return 0,
    };
    (value * multiplier as f64) as u64
}

pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if bytes < 1024 {
        format!("{bytes} B")
    } else if b < KB * KB {
        format!("{:.1} KB", b / KB)
    } else if b < KB * KB * KB {
        format!("{:.1} MB", b / (KB * KB))
    } else {
        format!("{:.1} GB", b / (KB * KB * KB))
    }
}

/// 从 `https://kxx.moe/c/18488.htm` 形式的链接中取出漫画 ID。
pub fn extract_comic_id_from_url(url: &str) -> Option<String> {
    let re = RE_COMIC_URL
        .get_or_init(|| Regex::new(r"/c/([^/]+?)\.htm").expect("compile RE_COMIC_URL"));
    re.captures(url).map(|c| c[1].to_string())
}

/// 输入既可以是漫画 ID，也可以是详情页链接。
pub fn normalize_comic_ref(input: &str) -> String {
    let trimmed = input.trim();
    extract_comic_id_from_url(trimmed).unwrap_or_else(|| trimmed.to_string())
}
