//! 站点页面解析。
//!
//! 站点数据大多嵌在内联脚本里（`var bookid = "…"`、`disp_divinfo(…)`、
//! `postMessage("volinfo=…")`），这里全部用正则提取，不依赖 DOM。

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use super::models::{ComicDetail, ComicMeta, SearchResponse, SearchResult, UserStatus, Volume};

const JS_TARGET_VARS: [&str; 7] = [
    "bookid",
    "uin",
    "ulevel",
    "is_vip",
    "quota_now",
    "bookstatus",
    "device_mailto",
];

// ── 正则缓存 ────────────────────────────────────────────────────

fn re_js_vars() -> &'static [Regex; 3] {
    static R: OnceLock<[Regex; 3]> = OnceLock::new();
    R.get_or_init(|| {
        [
            Regex::new(r#"var\s+(\w+)\s*=\s*["']([^"']*)["']"#).expect("compile RE_JS_QUOTED"),
            Regex::new(r#"var\s+(\w+)\s*=\s*parseInt\s*\(\s*["']([^"']*)["']"#)
                .expect("compile RE_JS_PARSEINT"),
            Regex::new(r"var\s+(\w+)\s*=\s*(\d+(?:\.\d+)?)\s*;").expect("compile RE_JS_NUMBER"),
        ]
    })
}

fn re_book_data() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| {
        Regex::new(r#"window\.iframe_action2\.location\.href\s*=\s*"(/book_data\.php\?h=[^"]+)""#)
            .expect("compile RE_BOOK_DATA")
    })
}

fn re_volinfo() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| {
        Regex::new(r#"parent\.postMessage\s*\(\s*"volinfo=([^"]+)""#).expect("compile RE_VOLINFO")
    })
}

fn re_title() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("compile RE_TITLE"))
}

fn re_title_suffix() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"\s*\[.*$").expect("compile RE_TITLE_SUFFIX"))
}

fn re_author_td() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| {
        Regex::new(
            r#"(?is)<td\b[^>]*class\s*=\s*["'][^"']*\bauthor\b[^"']*["'][^>]*>.*?<a\b[^>]*>(.*?)</a>"#,
        )
        .expect("compile RE_AUTHOR_TD")
    })
}

fn re_body() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"(?is)<body\b[^>]*>(.*)</body>").expect("compile RE_BODY"))
}

fn re_region() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"地區：(\S+)").expect("compile RE_REGION"))
}

fn re_language() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"語言：(\S+)").expect("compile RE_LANGUAGE"))
}

fn re_score() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| {
        Regex::new(
            r#"(?is)<table\b[^>]*class\s*=\s*["'][^"']*\bbook_score\b[^"']*["'][^>]*>.*?<font\b[^>]*style\s*=\s*["'][^"']*font-size:30px[^"']*["'][^>]*>\s*([^<]*?)\s*</font>"#,
        )
        .expect("compile RE_SCORE")
    })
}

fn re_description() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| {
        Regex::new(
            r#"getElementById\s*\(\s*"div_desc_content"\s*\)\s*\.innerHTML\s*=\s*"([^"]*)""#,
        )
        .expect("compile RE_DESCRIPTION")
    })
}

fn re_cover() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| {
        Regex::new(r#"(?is)<img\b[^>]*?\bsrc\s*=\s*["']([^"']*cover[^"']*)["']"#)
            .expect("compile RE_COVER")
    })
}

fn re_divinfo() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| {
        let pattern = concat!(
            r#"disp_divinfo\s*\(\s*"div_info_"\s*\+\s*"\d+"\s*,\s*"#,
            r#""([^"]+)"\s*,\s*"#,  // url
            r#""([^"]+)"\s*,\s*"#,  // cover
            r#""[^"]*"\s*,\s*"#,    // 边框颜色
            r#""([^"]*)"\s*,\s*"#,  // tag_jp，空值表示日语
            r#""([^"]*)"\s*,\s*"#,  // tag_en
            r#""([^"]*)"\s*,\s*"#,  // tag_end，空值表示完结
            r#""([^"]*)"\s*,\s*"#,  // tag_brk
            r#""([^"]*)"\s*,\s*"#,  // score
            r#""([^"]*)"\s*,\s*"#,  // title，可能带 <b>
            r#""([^"]*)"\s*,\s*"#,  // author
            r#""([^"]*)"\s*,\s*"#,  // 最新卷
            r#""([^"]*)"\s*\)"#,    // 更新日期
        );
        Regex::new(pattern).expect("compile RE_DIVINFO")
    })
}

fn re_comic_url() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"/c/([^/]+)\.htm").expect("compile RE_COMIC_URL"))
}

fn re_tags() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"(?s)<[^>]+>").expect("compile RE_TAGS"))
}

fn re_divpage() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| {
        Regex::new(r#"disp_divpage\s*\(\s*"[^"]*"\s*,\s*"[^"]*"\s*,\s*"?(\d+)"?"#)
            .expect("compile RE_DIVPAGE")
    })
}

fn re_page_now() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r#"var\s+page_now\s*=\s*"(\d+)""#).expect("compile RE_PAGE_NOW"))
}

fn re_quota() -> &'static [Regex; 3] {
    static R: OnceLock<[Regex; 3]> = OnceLock::new();
    R.get_or_init(|| {
        [
            Regex::new(r"Lv\d+\s*每月額度\s*:\s*&nbsp;\s*([0-9.]+)\s*M")
                .expect("compile RE_QUOTA_MONTH"),
            Regex::new(r"剩餘\s*:\s*&nbsp;\s*([0-9.]+)\s*M").expect("compile RE_QUOTA_REMAINING"),
            Regex::new(r"額外額度剩餘\s*:\s*&nbsp;\s*([0-9.]+)\s*M")
                .expect("compile RE_QUOTA_EXTRA"),
        ]
    })
}

// ── 提取函数 ────────────────────────────────────────────────────

fn capture<'h>(re: &Regex, html: &'h str) -> Option<&'h str> {
    re.captures(html).and_then(|c| c.get(1)).map(|m| m.as_str())
}

fn strip_tags(raw: &str) -> String {
    re_tags().replace_all(raw, "").trim().to_string()
}

/// 内联脚本里的关键变量。三种写法按顺序匹配，后匹配到的覆盖先前的值。
pub fn extract_js_variables(html: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for re in re_js_vars() {
        for caps in re.captures_iter(html) {
            let name = &caps[1];
            if JS_TARGET_VARS.contains(&name) {
                vars.insert(name.to_string(), caps[2].to_string());
            }
        }
    }
    vars
}

/// 详情页中加载卷列表的 `book_data.php` 相对路径。
pub fn extract_book_data_url(html: &str) -> Option<String> {
    capture(re_book_data(), html).map(str::to_string)
}

/// 解析 `book_data.php` 返回的 `volinfo=` 记录。
///
/// 字段：`[0]` 卷 ID，`[5]` 标题，`[6]` 页数；12 个字段以上时 `[9]` 为 MOBI 大小、
/// `[11]` 为 EPUB 大小（MB）。不足 7 个字段的记录忽略。
pub fn parse_volume_data(html: &str) -> Vec<Volume> {
    re_volinfo()
        .captures_iter(html)
        .filter_map(|caps| {
            let parts: Vec<&str> = caps[1].split(',').collect();
            if parts.len() < 7 {
                return None;
            }
            let mut volume = Volume::new(parts[0], parts[5]);
            volume.file_count = parts[6].trim().parse().unwrap_or(1);
            if parts.len() >= 12 {
                volume.size_mobi_mb = parts[9].trim().parse().unwrap_or(0.0);
                volume.size_epub_mb = parts[11].trim().parse().unwrap_or(0.0);
            }
            Some(volume)
        })
        .collect()
}

/// 详情页基础信息；卷列表需另行请求 `book_data.php`。
pub fn parse_comic_detail(html: &str) -> ComicDetail {
    let vars = extract_js_variables(html);

    let mut title = String::new();
    let mut authors = Vec::new();
    if let Some(raw) = capture(re_title(), html) {
        // "SAKAMOTO DAYS 坂本日常 : 鈴木祐鬥 [Kindle漫畫|epub漫畫] [kxx.moe]"
        let text = re_title_suffix().replace(raw.trim(), "");
        match text.split_once(" : ") {
            Some((t, a)) => {
                title = t.trim().to_string();
                authors.push(a.trim().to_string());
            }
            None => title = text.trim().to_string(),
        }
    }

    if let Some(name) = capture(re_author_td(), html).map(strip_tags) {
        if !name.is_empty() && !authors.contains(&name) {
            authors = vec![name];
        }
    }

    let body_text = capture(re_body(), html)
        .map(|b| re_tags().replace_all(b, " ").into_owned())
        .unwrap_or_default();
    let region = capture(re_region(), &body_text).unwrap_or_default().to_string();
    let language = capture(re_language(), &body_text)
        .unwrap_or_default()
        .to_string();

    let score = capture(re_score(), html).and_then(|s| s.parse::<f64>().ok());

    let description = capture(re_description(), html)
        .map(|d| d.replace("<br />", "\n").replace("<br/>", "\n"))
        .unwrap_or_default();

    let cover_url = capture(re_cover(), html).unwrap_or_default().to_string();

    ComicDetail {
        meta: ComicMeta {
            book_id: vars.get("bookid").cloned().unwrap_or_default(),
            comic_id: String::new(),
            title,
            authors,
            status: vars.get("bookstatus").cloned().unwrap_or_default(),
            region,
            language,
            categories: Vec::new(),
            score,
            cover_url,
            description,
        },
        volumes: Vec::new(),
    }
}

/// 搜索 / 分类列表页。结果由 `disp_divinfo(…)` 调用渲染，
/// 标记字段为空字符串时表示该标记成立。
pub fn parse_search_results(html: &str) -> SearchResponse {
    let results: Vec<SearchResult> = re_divinfo()
        .captures_iter(html)
        .map(|caps| {
            let url = &caps[1];
            let (tag_jp, tag_en, tag_end, tag_brk) = (&caps[3], &caps[4], &caps[5], &caps[6]);
            let status = if tag_end.is_empty() {
                "完結"
            } else if tag_brk.is_empty() {
                "停更"
            } else {
                "連載"
            };
            let language = if tag_jp.is_empty() {
                "日語"
            } else if tag_en.is_empty() {
                "英文"
            } else {
                "中文"
            };
            let author = &caps[9];
            let latest = &caps[10];
            let update_date = &caps[11];

            SearchResult {
                comic_id: capture(re_comic_url(), url).unwrap_or_default().to_string(),
                title: re_tags().replace_all(&caps[8], "").into_owned(),
                authors: if author.is_empty() {
                    Vec::new()
                } else {
                    vec![author.to_string()]
                },
                cover_url: caps[2].to_string(),
                last_update: if update_date.is_empty() {
                    latest.to_string()
                } else {
                    format!("{latest} ({update_date})")
                },
                score: Some(&caps[7])
                    .filter(|s| !s.is_empty())
                    .and_then(|s| s.parse().ok()),
                status: status.to_string(),
                language: language.to_string(),
            }
        })
        .collect();

    let total_pages = capture(re_divpage(), html)
        .and_then(|p| p.parse().ok())
        .unwrap_or(if results.is_empty() { 0 } else { 1 });
    let current_page = capture(re_page_now(), html)
        .and_then(|p| p.parse().ok())
        .unwrap_or(1);

    SearchResponse {
        results,
        total_pages,
        current_page,
    }
}

/// `my.php` 中的额度信息：(每月额度, 剩余, 额外剩余)，单位 MB；缺失为 0。
pub fn parse_my_page_quota(html: &str) -> (f64, f64, f64) {
    let [month, remaining, extra] = re_quota();
    let value = |re: &Regex| {
        capture(re, html)
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.0)
    };
    (value(month), value(remaining), value(extra))
}

/// 从页面脚本变量构造用户状态；额度明细另由 `my.php` 补充。
pub fn parse_user_status(html: &str) -> UserStatus {
    let vars = extract_js_variables(html);
    let get = |k: &str| vars.get(k).map(String::as_str).unwrap_or_default();

    let uin = get("uin").to_string();
    UserStatus {
        username: uin.clone(),
        uin,
        level: get("ulevel").parse().unwrap_or(0),
        is_vip: get("is_vip") == "1",
        quota_now: get("quota_now").parse().unwrap_or(0.0),
        ..UserStatus::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DETAIL_HTML: &str = r#"<html><head>
<title>SAKAMOTO DAYS 坂本日常 : 鈴木祐鬥 [Kindle漫畫|epub漫畫] [kxx.moe]</title>
<script>
var bookid = "18488";
var bookstatus = "連載";
var ulevel = parseInt("3");
var quota_now = 12.5;
function load_bookdata() {
  window.iframe_action2.location.href = "/book_data.php?h=abc123XYZ";
}
document.getElementById("div_desc_content").innerHTML = "第一行<br />第二行";
</script></head>
<body>
<img src="https://kxx.moe/images/cover/18488.jpg" class="img_book">
<table><tr><td class="author">作者：<a href="/author/1.htm">鈴木祐斗</a></td></tr></table>
<div>地區：日本</div><div>語言：中文</div>
<table class="book_score"><tr><td><font style="font-size:30px;color:red"> 9.3 </font></td></tr></table>
</body></html>"#;

    #[test]
    fn js_variables_cover_all_assignment_forms() {
        let vars = extract_js_variables(DETAIL_HTML);
        assert_eq!(vars["bookid"], "18488");
        assert_eq!(vars["ulevel"], "3");
        assert_eq!(vars["quota_now"], "12.5");
        assert!(!vars.contains_key("page_now"));
    }

    #[test]
    fn detail_page_fields() {
        let detail = parse_comic_detail(DETAIL_HTML);
        let meta = &detail.meta;
        assert_eq!(meta.book_id, "18488");
        assert_eq!(meta.title, "SAKAMOTO DAYS 坂本日常");
        assert_eq!(meta.authors, vec!["鈴木祐斗"]);
        assert_eq!(meta.status, "連載");
        assert_eq!(meta.region, "日本");
        assert_eq!(meta.language, "中文");
        assert_eq!(meta.score, Some(9.3));
        assert_eq!(meta.description, "第一行\n第二行");
        assert_eq!(meta.cover_url, "https://kxx.moe/images/cover/18488.jpg");
        assert!(detail.volumes.is_empty());
        assert_eq!(
            extract_book_data_url(DETAIL_HTML).as_deref(),
            Some("/book_data.php?h=abc123XYZ")
        );
    }

    #[test]
    fn detail_without_author_separator() {
        let detail = parse_comic_detail("<title>只有標題 [kxx.moe]</title>");
        assert_eq!(detail.meta.title, "只有標題");
        assert!(detail.meta.authors.is_empty());
        assert_eq!(detail.meta.score, None);
    }

    #[test]
    fn volinfo_records() {
        let html = r#"
parent.postMessage("volinfo=1001,0,0,單行本,1,卷 01,190,190,0.0,88.2,36.9,85.4,,2023-03-20", "*");
parent.postMessage("volinfo=1002,0,0,單行本,2,卷 02,x", "*");
parent.postMessage("volinfo=1003,0,0,短", "*");
"#;
        let vols = parse_volume_data(html);
        assert_eq!(vols.len(), 2);
        assert_eq!(vols[0].vol_id, "1001");
        assert_eq!(vols[0].title, "卷 01");
        assert_eq!(vols[0].file_count, 190);
        assert_eq!(vols[0].size_mobi_mb, 88.2);
        assert_eq!(vols[0].size_epub_mb, 85.4);
        assert_eq!(vols[1].file_count, 1);
        assert_eq!(vols[1].size_epub_mb, 0.0);
    }

    const SEARCH_HTML: &str = r##"<script>
var page_now = "2";
disp_divinfo("div_info_"+"1", "https://kxx.moe/c/18488.htm", "https://kxx.moe/cover/1.jpg", "#fff", "x", "x", "", "x", "9.1", "<b>SAKAMOTO</b> DAYS", "鈴木祐斗", "卷 15", "2024-01-02");
disp_divinfo("div_info_"+"2", "https://kxx.moe/c/abc.htm", "https://kxx.moe/cover/2.jpg", "#fff", "", "x", "x", "", "", "坂本", "", "話 100", "");
disp_divinfo("div_info_"+"3", "https://kxx.moe/c/zz9.htm", "https://kxx.moe/cover/3.jpg", "#fff", "x", "", "x", "x", "7", "Sakamoto EN", "Suzuki", "Vol 3", "2023-05-01");
disp_divpage("div_page", "/list.php?s=sakamoto", "5");
</script>"##;

    #[test]
    fn search_results_flags_and_paging() {
        let resp = parse_search_results(SEARCH_HTML);
        assert_eq!(resp.results.len(), 3);
        assert_eq!(resp.total_pages, 5);
        assert_eq!(resp.current_page, 2);

        let first = &resp.results[0];
        assert_eq!(first.comic_id, "18488");
        assert_eq!(first.title, "SAKAMOTO DAYS");
        assert_eq!(first.status, "完結");
        assert_eq!(first.language, "中文");
        assert_eq!(first.score, Some(9.1));
        assert_eq!(first.last_update, "卷 15 (2024-01-02)");

        let second = &resp.results[1];
        assert_eq!(second.status, "停更");
        assert_eq!(second.language, "日語");
        assert_eq!(second.score, None);
        assert!(second.authors.is_empty());
        assert_eq!(second.last_update, "話 100");

        let third = &resp.results[2];
        assert_eq!(third.status, "連載");
        assert_eq!(third.language, "英文");
    }

    #[test]
    fn empty_search_has_zero_pages() {
        let resp = parse_search_results("<html>沒有結果</html>");
        assert!(resp.results.is_empty());
        assert_eq!(resp.total_pages, 0);
        assert_eq!(resp.current_page, 1);
    }

    #[test]
    fn quota_breakdown() {
        let html = "Lv2 每月額度 : &nbsp; 1024.0 M ... 剩餘 : &nbsp; 300.5 M ... 額外額度剩餘 : &nbsp; 50 M";
        let (month, remaining, extra) = parse_my_page_quota(html);
        assert_eq!(month, 1024.0);
        assert_eq!(remaining, 300.5);
        assert_eq!(extra, 50.0);
        assert_eq!(parse_my_page_quota("nothing"), (0.0, 0.0, 0.0));
    }

    #[test]
    fn user_status_from_variables() {
        let html = r#"var uin = "778899"; var ulevel = parseInt("4"); var is_vip = "1"; var quota_now = 88.5;"#;
        let status = parse_user_status(html);
        assert_eq!(status.uin, "778899");
        assert_eq!(status.username, "778899");
        assert_eq!(status.level, 4);
        assert!(status.is_vip);
        assert_eq!(status.quota_now, 88.5);
        assert_eq!(status.quota_remaining, 0.0);
    }
}
