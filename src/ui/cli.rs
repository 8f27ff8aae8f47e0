//! 命令行子命令实现。
//!
//! 子模块：
//! - `account`   — login / status
//! - `browse`    — search / info
//! - `download`  — download 与批量进度/汇总
//! - `library`   — library / update / scan / link
//! - `table`     — 终端表格

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::base_system::config::{ConfigSpec, load_or_create_with_base, write_with_comments};
use crate::base_system::context::Config;
use crate::base_system::session::FileSessionStore;
use crate::download::downloader::DownloadContext;
use crate::library::store::LibraryStore;
use crate::network_parser::auth::apply_session;
use crate::network_parser::network::{MirrorClient, MirrorPolicy};
use crate::network_parser::transport::ReqwestTransport;

mod account;
mod browse;
mod download;
mod library;
mod table;

pub use account::{login, status};
pub use browse::{info, search};
pub use download::download;
pub use library::{library, link, scan, update};

/// 一次命令执行所需的全部状态。
pub struct App {
    pub config: Config,
    pub data_dir: PathBuf,
    pub client: MirrorClient<ReqwestTransport>,
    pub sessions: FileSessionStore,
    pub store: LibraryStore,
}

impl App {
    pub fn load(data_dir: &Path) -> Result<Self> {
        let config = load_or_create_with_base::<Config>(None, Some(data_dir))
            .with_context(|| format!("加载配置失败: {}", data_dir.display()))?;
        let transport = ReqwestTransport::new(config.timeout(), config.mirror_list())
            .context("初始化 HTTP 客户端失败")?;
        let client = MirrorClient::new(transport, MirrorPolicy::from_config(&config));
        let store = LibraryStore::new(config.download_root());
        Ok(Self {
            sessions: FileSessionStore::in_dir(data_dir),
            data_dir: data_dir.to_path_buf(),
            config,
            client,
            store,
        })
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join(Config::FILE_NAME)
    }

    pub fn save_config(&self) -> Result<()> {
        write_with_comments(&self.config, &self.config_path())
            .with_context(|| format!("保存配置失败: {}", self.config_path().display()))
    }

    /// 载入本地会话（没有也不报错，未登录的请求由站点决定结果）。
    pub fn apply_session(&self) -> bool {
        apply_session(&self.client, &self.sessions)
    }

    pub fn download_ctx(&self) -> DownloadContext<'_, ReqwestTransport> {
        DownloadContext {
            client: &self.client,
            store: &self.store,
            workers: self.config.workers(),
        }
    }
}

pub(crate) fn read_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush().ok();
    let stdin = io::stdin();
    let mut line = String::new();
    stdin.lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// 带默认值的提示；直接回车取默认值。
pub(crate) fn prompt_default(label: &str, default: &str) -> Result<String> {
    let input = read_line(&format!("{label} [{default}]: "))?;
    Ok(if input.is_empty() {
        default.to_string()
    } else {
        input
    })
}

pub(crate) fn confirm(prompt: &str) -> Result<bool> {
    let input = read_line(&format!("{prompt} [y/N]: "))?;
    Ok(matches!(input.to_ascii_lowercase().as_str(), "y" | "yes"))
}
