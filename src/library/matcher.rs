//! 本地文件与远端卷的匹配。
//!
//! 按输入文件顺序贪心匹配，先到先得；已匹配的卷不会再被匹配。

use std::sync::OnceLock;

use regex::Regex;

use super::models::ScannedFile;
use crate::network_parser::models::Volume;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchResult {
    pub matched: Vec<(ScannedFile, Volume)>,
    pub unmatched: Vec<ScannedFile>,
}

fn re_bracket_name() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| {
        Regex::new(
            r"^\[(?:Mox|Kmoe)\]\[([^\]]+)\](.+?)(?:\.kepub)?\.(?:epub|mobi|zip|tar(?:\.gz)?|tgz)$",
        )
        .expect("compile RE_BRACKET_NAME")
    })
}

fn re_book_ext() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| {
        Regex::new(r"(?i)(?:\.kepub)?\.(?:epub|mobi|zip|tar(?:\.gz)?|tgz)$")
            .expect("compile RE_BOOK_EXT")
    })
}

fn re_bracket_prefix() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| {
        Regex::new(r"^\[(?:Mox|Kmoe)\]\[[^\]]+\](.+)$").expect("compile RE_BRACKET_PREFIX")
    })
}

fn re_trailing_volume() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| {
        Regex::new(r"(?i)((?:卷|第|Vol\.?|Chapter|Ch\.?)\s*\d+(?:\s*\-\s*\d+)?(?:\s*\(.+?\))?)$")
            .expect("compile RE_TRAILING_VOLUME")
    })
}

/// `[Kmoe][漫画名]卷名.epub` → (漫画名, 卷名)。
pub fn extract_title_from_filename(filename: &str) -> Option<(String, String)> {
    let caps = re_bracket_name().captures(filename)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

/// 去掉全部空白，使 "卷 01" 与 "卷01" 等价。
pub fn normalize_volume_title(title: &str) -> String {
    title.chars().filter(|c| !c.is_whitespace()).collect()
}

/// 从各种命名习惯中取出卷标题。
///
/// 依次尝试：`[Kmoe][标题]卷名`、最后一个 ` - ` / ` _ ` / ` — ` 之后的部分、
/// 结尾的 `卷|第|Vol.|Chapter|Ch.` + 数字。取出的部分为空白时返回 `None`。
pub fn extract_volume_title(filename: &str) -> Option<String> {
    raw_volume_title(filename).filter(|t| !normalize_volume_title(t).is_empty())
}

fn raw_volume_title(filename: &str) -> Option<String> {
    let name = re_book_ext().replace(filename, "");

    if let Some(caps) = re_bracket_prefix().captures(&name) {
        return Some(caps[1].to_string());
    }

    for sep in [" - ", " _ ", " — "] {
        if let Some((_, tail)) = name.rsplit_once(sep) {
            return Some(tail.to_string());
        }
    }

    re_trailing_volume()
        .captures(&name)
        .map(|caps| caps[1].to_string())
}

pub fn match_files_to_volumes(files: &[ScannedFile], volumes: &[Volume]) -> MatchResult {
    // 规范化标题 → 卷；重名时保留最后一个，顺序按首次出现
    let mut lookup: Vec<(String, &Volume)> = Vec::new();
    for volume in volumes {
        let norm = normalize_volume_title(&volume.title);
        match lookup.iter_mut().find(|(k, _)| *k == norm) {
            Some(slot) => slot.1 = volume,
            None => lookup.push((norm, volume)),
        }
    }
    let exact = |norm: &str| lookup.iter().find(|(k, _)| k == norm).map(|(_, v)| *v);

    let mut result = MatchResult::default();
    let mut taken: Vec<&str> = Vec::new();

    for file in files {
        if let Some((_, vol_title)) = extract_title_from_filename(&file.name) {
            if let Some(volume) = exact(&normalize_volume_title(&vol_title)) {
                if !taken.contains(&volume.vol_id.as_str()) {
                    taken.push(&volume.vol_id);
                    result.matched.push((file.clone(), volume.clone()));
                    continue;
                }
            }
        }

        let Some(vol_title) = extract_volume_title(&file.name) else {
            result.unmatched.push(file.clone());
            continue;
        };
        let norm = normalize_volume_title(&vol_title);

        if let Some(volume) = exact(&norm) {
            if !taken.contains(&volume.vol_id.as_str()) {
                taken.push(&volume.vol_id);
                result.matched.push((file.clone(), volume.clone()));
                continue;
            }
        }

        let fuzzy = lookup.iter().find(|(k, v)| {
            !taken.contains(&v.vol_id.as_str()) && (k.contains(&norm) || norm.contains(k.as_str()))
        });
        match fuzzy {
            Some((_, volume)) => {
                taken.push(&volume.vol_id);
                result.matched.push((file.clone(), (*volume).clone()));
            }
            None => result.unmatched.push(file.clone()),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn file(name: &str) -> ScannedFile {
        ScannedFile::loose(name, 1, PathBuf::from(name))
    }

    fn volumes(titles: &[(&str, &str)]) -> Vec<Volume> {
        titles.iter().map(|(id, t)| Volume::new(id, t)).collect()
    }

    fn pairs(result: &MatchResult) -> Vec<(String, String)> {
        result
            .matched
            .iter()
            .map(|(f, v)| (f.name.clone(), v.vol_id.clone()))
            .collect()
    }

    #[test]
    fn bracket_names() {
        assert_eq!(
            extract_title_from_filename("[Mox][棋魂]卷01.kepub.epub"),
            Some(("棋魂".into(), "卷01".into()))
        );
        assert_eq!(
            extract_title_from_filename("[Kmoe][蠟筆小新]卷 01.epub"),
            Some(("蠟筆小新".into(), "卷 01".into()))
        );
        assert_eq!(extract_title_from_filename("蠟筆小新 卷01.epub"), None);
    }

    #[test]
    fn volume_title_heuristics() {
        assert_eq!(extract_volume_title("[Kmoe][T]Vol 01.EPUB").as_deref(), Some("Vol 01"));
        assert_eq!(extract_volume_title("Title - Vol 01.epub").as_deref(), Some("Vol 01"));
        assert_eq!(extract_volume_title("A - B _ 第3話.mobi").as_deref(), Some("B _ 第3話"));
        assert_eq!(extract_volume_title("Some Title 卷01.epub").as_deref(), Some("卷01"));
        assert_eq!(extract_volume_title("x vol.12-13 (end).mobi").as_deref(), Some("vol.12-13 (end)"));
        assert_eq!(extract_volume_title("random.epub"), None);
        assert_eq!(extract_volume_title("Title - .epub"), None);
        assert_eq!(extract_volume_title("Title -  .mobi"), None);
    }

    #[test]
    fn empty_separator_tail_stays_unmatched() {
        let vols = volumes(&[("1", "卷 01")]);
        let files = [file("Title - .epub"), file("Title - 卷01.epub")];
        let result = match_files_to_volumes(&files, &vols);
        assert_eq!(pairs(&result), vec![("Title - 卷01.epub".to_string(), "1".to_string())]);
        let unmatched: Vec<_> = result.unmatched.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(unmatched, vec!["Title - .epub"]);
    }

    #[test]
    fn exact_bracket_matches_are_deterministic() {
        let vols = volumes(&[("1", "卷 01"), ("2", "卷 02")]);
        let files = [file("[Kmoe][X]卷 02.epub"), file("[Mox][X]卷01.mobi")];
        let result = match_files_to_volumes(&files, &vols);
        assert_eq!(
            pairs(&result),
            vec![
                ("[Kmoe][X]卷 02.epub".to_string(), "2".to_string()),
                ("[Mox][X]卷01.mobi".to_string(), "1".to_string()),
            ]
        );
        assert!(result.unmatched.is_empty());
    }

    #[test]
    fn first_fit_and_fuzzy_fallback() {
        let vols = volumes(&[("1", "卷 01"), ("2", "卷 02 (完)")]);
        let files = [
            file("[Kmoe][X]卷 01.epub"),
            file("[Kmoe][X]卷01.mobi"), // 卷 01 已被占用，剩余的卷也不包含它
            file("Title - 卷 02.epub"),
            file("notes.epub"),
        ];
        let result = match_files_to_volumes(&files, &vols);
        assert_eq!(
            pairs(&result),
            vec![
                ("[Kmoe][X]卷 01.epub".to_string(), "1".to_string()),
                ("Title - 卷 02.epub".to_string(), "2".to_string()),
            ]
        );
        let unmatched: Vec<_> = result.unmatched.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(unmatched, vec!["[Kmoe][X]卷01.mobi", "notes.epub"]);
    }

    #[test]
    fn fuzzy_containment_either_direction() {
        let vols = volumes(&[("1", "卷 01 (完)"), ("2", "第2話")]);
        let files = [file("Title - 卷01.epub"), file("Title - 第2話 特別篇.epub")];
        let result = match_files_to_volumes(&files, &vols);
        assert_eq!(
            pairs(&result),
            vec![
                ("Title - 卷01.epub".to_string(), "1".to_string()),
                ("Title - 第2話 特別篇.epub".to_string(), "2".to_string()),
            ]
        );
    }
}
