//! Kmoe Manga Downloader（kmoe 漫画下载与书库管理）Rust 实现。
//!
//! 本 crate 负责：登录与会话、搜索与详情解析、按卷下载 EPUB/MOBI、本地书库的登记与增量更新。
//!
//! 代码结构（读代码入口）：
//! - `base_system`：配置/日志/会话/路径等基础设施
//! - `network_parser`：镜像站请求、HTML 解析、登录与配额
//! - `download`：多线程按卷下载、进度与结果汇总
//! - `library`：`library.json` 与根索引、目录扫描与文件匹配
//! - `ui`：命令行子命令

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::debug;

mod base_system;
mod download;
mod library;
mod network_parser;
mod ui;

use base_system::context::data_dir;
use base_system::logging::{LogOptions, LogSystem};
use ui::cli::App;

#[derive(Debug, Parser)]
#[command(name = "kmoe")]
#[command(version, about = "Kmoe manga downloader and library manager")]
struct Cli {
    /// 启用调试日志输出（同时输出到终端）
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,

    /// 数据目录路径（存放 config.yml、session.dat 和 logs）
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 登录并保存会话，随后交互式设置常用配置
    Login {
        #[arg(short, long)]
        username: String,
        /// 不提供时从终端读取
        #[arg(short, long)]
        password: Option<String>,
    },
    /// 显示会话状态、配额与当前配置
    Status,
    /// 按关键字搜索漫画
    Search {
        keyword: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
        /// all / ch / jp / en / oth，缺省取配置
        #[arg(long)]
        lang: Option<String>,
    },
    /// 显示漫画详情与卷列表
    Info {
        /// 漫画 ID 或详情页 URL
        comic_id: String,
    },
    /// 下载指定漫画的卷（缺省为全部）
    Download {
        comic_id: String,
        /// 逗号分隔的卷 ID
        #[arg(short = 'V', long)]
        volumes: Option<String>,
        /// epub / mobi，缺省取配置
        #[arg(short, long)]
        format: Option<String>,
    },
    /// 列出本地书库
    Library,
    /// 检查书库中的漫画是否有新卷并下载
    Update {
        comic_id: Option<String>,
        #[arg(short, long)]
        format: Option<String>,
        /// 检查全部漫画
        #[arg(short, long, default_value_t = false)]
        all: bool,
        /// 只列出待下载的卷
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// 跳过确认
        #[arg(short, long, default_value_t = false)]
        yes: bool,
    },
    /// 扫描下载目录，登记尚未入库的漫画目录
    Scan {
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// 把已有目录关联到指定漫画
    Link { directory: String, comic_id: String },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("错误: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let data_dir = data_dir(cli.data_dir.as_deref());
    let _log = init_logging(cli.debug, &data_dir)?;
    debug!(target: "startup", data_dir = %data_dir.display(), "数据目录");

    let mut app = App::load(&data_dir)?;

    match cli.command {
        Command::Login { username, password } => {
            ui::cli::login(&mut app, &username, password.as_deref())
        }
        Command::Status => ui::cli::status(&app),
        Command::Search {
            keyword,
            page,
            lang,
        } => ui::cli::search(&app, &keyword, page, lang.as_deref()),
        Command::Info { comic_id } => ui::cli::info(&app, &comic_id),
        Command::Download {
            comic_id,
            volumes,
            format,
        } => ui::cli::download(&app, &comic_id, volumes.as_deref(), format.as_deref()),
        Command::Library => ui::cli::library(&app),
        Command::Update {
            comic_id,
            format,
            all,
            dry_run,
            yes,
        } => ui::cli::update(
            &app,
            comic_id.as_deref(),
            format.as_deref(),
            all,
            dry_run,
            yes,
        ),
        Command::Scan { dry_run } => ui::cli::scan(&app, dry_run),
        Command::Link {
            directory,
            comic_id,
        } => ui::cli::link(&app, &directory, &comic_id),
    }
}

/// 终端日志只在 `--debug` 时输出，避免打乱进度条。
fn init_logging(debug: bool, base_dir: &Path) -> Result<LogSystem> {
    let opts = LogOptions {
        debug,
        use_color: true,
        archive_on_exit: true,
        console: debug,
    };
    LogSystem::init_with_base(opts, Some(base_dir)).map_err(|e| anyhow!(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn update_flags_parse() {
        let cli = Cli::try_parse_from(["kmoe", "update", "-a", "--dry-run", "-f", "mobi"]).unwrap();
        match cli.command {
            Command::Update {
                comic_id,
                format,
                all,
                dry_run,
                yes,
            } => {
                assert!(comic_id.is_none());
                assert_eq!(format.as_deref(), Some("mobi"));
                assert!(all && dry_run && !yes);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["kmoe", "download", "18488", "-V", "1001,1002", "--debug"]).unwrap();
        assert!(cli.debug);
        assert!(matches!(cli.command, Command::Download { volumes: Some(v), .. } if v == "1001,1002"));
    }
}
