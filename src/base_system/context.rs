//! 全局配置结构（Config）与默认值。
//!
//! 该模块同时提供生成 `config.yml` 的字段元信息，以及 `status` 命令展示用的字段列表。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::{ConfigError, ConfigSpec, FieldMeta};

pub const MIRROR_DOMAINS: [&str; 3] = ["kxx.moe", "kzz.moe", "koz.moe"];
pub const LANGUAGE_CODES: [&str; 5] = ["all", "ch", "jp", "en", "oth"];
pub const FORMAT_NAMES: [&str; 2] = ["epub", "mobi"];

const MIN_WORKERS: usize = 1;
const MAX_WORKERS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // 保存配置
    #[serde(default = "default_download_dir")]
    pub download_dir: String,
    #[serde(default = "default_format")]
    pub default_format: String,

    // 网络配置
    #[serde(default = "default_preferred_mirror")]
    pub preferred_mirror: String,
    #[serde(default = "default_true")]
    pub mirror_failover: bool,
    #[serde(default = "default_rate_limit_delay")]
    pub rate_limit_delay: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    // 搜索与下载
    #[serde(default = "default_preferred_language")]
    pub preferred_language: String,
    #[serde(default = "default_max_download_workers")]
    pub max_download_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            default_format: default_format(),
            preferred_mirror: default_preferred_mirror(),
            mirror_failover: default_true(),
            rate_limit_delay: default_rate_limit_delay(),
            max_retries: default_max_retries(),
            request_timeout: default_request_timeout(),
            preferred_language: default_preferred_language(),
            max_download_workers: default_max_download_workers(),
        }
    }
}

impl ConfigSpec for Config {
    const FILE_NAME: &'static str = "config.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 9] = [
            FieldMeta {
                name: "download_dir",
                description: "漫画库根目录（支持 ~ 开头）",
            },
            FieldMeta {
                name: "default_format",
                description: "默认下载格式, 可选: [epub, mobi]",
            },
            FieldMeta {
                name: "preferred_mirror",
                description: "首选镜像, 可选: [kxx.moe, kzz.moe, koz.moe]",
            },
            FieldMeta {
                name: "mirror_failover",
                description: "镜像不可用时是否自动切换到其它镜像",
            },
            FieldMeta {
                name: "rate_limit_delay",
                description: "两次请求之间的最小间隔（秒）",
            },
            FieldMeta {
                name: "max_retries",
                description: "单个镜像上连接失败的最大重试次数",
            },
            FieldMeta {
                name: "request_timeout",
                description: "请求超时时间（秒）",
            },
            FieldMeta {
                name: "preferred_language",
                description: "搜索语言偏好, 可选: [all, ch, jp, en, oth]",
            },
            FieldMeta {
                name: "max_download_workers",
                description: "同时下载的卷数 (1-10)",
            },
        ];
        &FIELDS
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let format = self.default_format.to_ascii_lowercase();
        if !FORMAT_NAMES.contains(&format.as_str()) {
            return Err(ConfigError::Validation(format!(
                "default_format must be one of {:?}, got {:?}",
                FORMAT_NAMES, self.default_format
            )));
        }
        let language = self.preferred_language.to_ascii_lowercase();
        if !LANGUAGE_CODES.contains(&language.as_str()) {
            return Err(ConfigError::Validation(format!(
                "preferred_language must be one of {:?}, got {:?}",
                LANGUAGE_CODES, self.preferred_language
            )));
        }
        // 无法换算为 Duration 的值一律拒绝
        if Duration::try_from_secs_f64(self.rate_limit_delay).is_err() {
            return Err(ConfigError::Validation(format!(
                "rate_limit_delay must be a finite number >= 0, got {}",
                self.rate_limit_delay
            )));
        }
        Ok(())
    }
}

impl Config {
    /// 展开 `~` 后的漫画库根目录。
    pub fn download_root(&self) -> PathBuf {
        expand_home(&self.download_dir)
    }

    pub fn workers(&self) -> usize {
        self.max_download_workers.clamp(MIN_WORKERS, MAX_WORKERS)
    }

    pub fn rate_limit(&self) -> Duration {
        Duration::try_from_secs_f64(self.rate_limit_delay).unwrap_or_default()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout.max(1))
    }

    /// 首选镜像在前，其余内置镜像按固定顺序排在后面。
    pub fn mirror_list(&self) -> Vec<String> {
        let preferred = self.preferred_mirror.trim();
        let mut mirrors = Vec::with_capacity(MIRROR_DOMAINS.len() + 1);
        if !preferred.is_empty() {
            mirrors.push(preferred.to_string());
        }
        for domain in MIRROR_DOMAINS {
            if domain != preferred {
                mirrors.push(domain.to_string());
            }
        }
        mirrors
    }

    pub fn set_workers(&mut self, n: usize) {
        self.max_download_workers = n.clamp(MIN_WORKERS, MAX_WORKERS);
    }

    /// 用于 `status` 展示的（名称, 值）列表。
    pub fn display_rows(&self) -> Vec<(String, String)> {
        DISPLAY_ROWS
            .iter()
            .map(|row| {
                let label = match row.hint {
                    Some(hint) => format!("{} ({})", row.label, hint),
                    None => row.label.to_string(),
                };
                (label, (row.format)(self))
            })
            .collect()
    }
}

struct DisplayRow {
    label: &'static str,
    hint: Option<&'static str>,
    format: fn(&Config) -> String,
}

fn yes_no(v: bool) -> String {
    if v { "Yes" } else { "No" }.to_string()
}

const DISPLAY_ROWS: &[DisplayRow] = &[
    DisplayRow {
        label: "Download Dir",
        hint: None,
        format: |c| c.download_root().display().to_string(),
    },
    DisplayRow {
        label: "Default Format",
        hint: Some("epub/mobi"),
        format: |c| c.default_format.clone(),
    },
    DisplayRow {
        label: "Preferred Mirror",
        hint: Some("kxx.moe/kzz.moe/koz.moe"),
        format: |c| c.preferred_mirror.clone(),
    },
    DisplayRow {
        label: "Mirror Failover",
        hint: None,
        format: |c| yes_no(c.mirror_failover),
    },
    DisplayRow {
        label: "Rate Limit Delay",
        hint: None,
        format: |c| format!("{}s", c.rate_limit_delay),
    },
    DisplayRow {
        label: "Max Retries",
        hint: None,
        format: |c| c.max_retries.to_string(),
    },
    DisplayRow {
        label: "Request Timeout",
        hint: None,
        format: |c| format!("{}s", c.request_timeout),
    },
    DisplayRow {
        label: "Preferred Language",
        hint: Some("all/ch/jp/en/oth"),
        format: |c| c.preferred_language.clone(),
    },
    DisplayRow {
        label: "Max Download Workers",
        hint: Some("1-10"),
        format: |c| c.max_download_workers.to_string(),
    },
];

pub fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf())
}

/// 将 `~` / `~/xxx` 展开到用户主目录；无法确定主目录时原样返回。
pub fn expand_home(raw: &str) -> PathBuf {
    let raw = raw.trim();
    let rest = if raw == "~" {
        Some("")
    } else {
        raw.strip_prefix("~/").or_else(|| raw.strip_prefix("~\\"))
    };
    match (rest, home_dir()) {
        (Some(rest), Some(home)) if rest.is_empty() => home,
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(raw),
    }
}

/// 数据目录（config.yml / session / logs）：显式传入优先，否则 `~/.config/kmoe`。
pub fn data_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir.to_path_buf();
    }
    home_dir()
        .map(|home| home.join(".config").join("kmoe"))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_true() -> bool {
    true
}

fn default_download_dir() -> String {
    "~/kmoe-library".to_string()
}

fn default_format() -> String {
    "epub".to_string()
}

fn default_preferred_mirror() -> String {
    MIRROR_DOMAINS[0].to_string()
}

fn default_rate_limit_delay() -> f64 {
    1.0
}

fn default_max_retries() -> u32 {
    3
}

fn default_request_timeout() -> u64 {
    30
}

fn default_preferred_language() -> String {
    "all".to_string()
}

fn default_max_download_workers() -> usize {
    2
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_system::config::load_or_create_with_base;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn preferred_mirror_leads_without_duplicates() {
        let mut cfg = Config::default();
        assert_eq!(cfg.mirror_list(), vec!["kxx.moe", "kzz.moe", "koz.moe"]);

        cfg.preferred_mirror = "koz.moe".into();
        assert_eq!(cfg.mirror_list(), vec!["koz.moe", "kxx.moe", "kzz.moe"]);

        cfg.preferred_mirror = "mirror.example".into();
        assert_eq!(cfg.mirror_list().len(), 4);
        assert_eq!(cfg.mirror_list()[0], "mirror.example");
    }

    #[test]
    fn workers_are_clamped() {
        let mut cfg = Config::default();
        cfg.max_download_workers = 0;
        assert_eq!(cfg.workers(), 1);
        cfg.max_download_workers = 64;
        assert_eq!(cfg.workers(), 10);
        cfg.set_workers(7);
        assert_eq!(cfg.max_download_workers, 7);
    }

    #[test]
    fn unknown_format_is_rejected_on_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yml");
        fs::write(&path, "default_format: pdf\n").unwrap();
        assert!(load_or_create_with_base::<Config>(Some(&path), None).is_err());
    }

    #[test]
    fn non_finite_rate_limit_is_rejected_on_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yml");
        for value in [".inf", ".nan", "-0.5", "1e300"] {
            fs::write(&path, format!("rate_limit_delay: {value}\n")).unwrap();
            assert!(
                load_or_create_with_base::<Config>(Some(&path), None).is_err(),
                "rate_limit_delay: {value}"
            );
        }

        let mut cfg = Config::default();
        cfg.rate_limit_delay = f64::INFINITY;
        assert_eq!(cfg.rate_limit(), Duration::ZERO);
        cfg.rate_limit_delay = 0.25;
        assert_eq!(cfg.rate_limit(), Duration::from_millis(250));
    }

    #[test]
    fn display_rows_cover_every_field() {
        let rows = Config::default().display_rows();
        assert_eq!(rows.len(), Config::fields().len());
        assert!(rows.contains(&("Mirror Failover".to_string(), "Yes".to_string())));
        assert!(rows.contains(&("Rate Limit Delay".to_string(), "1s".to_string())));
        assert!(rows.contains(&(
            "Max Download Workers (1-10)".to_string(),
            "2".to_string()
        )));
    }

    #[test]
    fn plain_paths_are_not_expanded() {
        assert_eq!(expand_home("/srv/manga"), PathBuf::from("/srv/manga"));
        assert_eq!(expand_home("manga~"), PathBuf::from("manga~"));
        if let Some(home) = home_dir() {
            assert_eq!(expand_home("~/kmoe-library"), home.join("kmoe-library"));
        }
    }
}
