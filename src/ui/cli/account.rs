//! login / status。

use anyhow::Result;
use tracing::info;

use super::table::Table;
use super::{App, prompt_default, read_line};
use crate::base_system::context::LANGUAGE_CODES;
use crate::download::models::resolve_format;
use crate::network_parser::auth::{SessionState, check_session, login as site_login};
use crate::network_parser::models::UserStatus;

pub(super) fn user_rows(table: &mut Table, user: &UserStatus) {
    let name = if user.username.is_empty() {
        &user.uin
    } else {
        &user.username
    };
    table.row(["Username", name.as_str()]);
    table.row(["Level".to_string(), user.level.to_string()]);
    table.row(["VIP", if user.is_vip { "Yes" } else { "No" }]);
    let quota = if user.quota_free_month > 0.0 {
        format!(
            "{:.1} / {:.1} MB (remaining: {:.1} + extra: {:.1} MB)",
            user.remaining_mb(),
            user.quota_free_month,
            user.quota_remaining,
            user.quota_extra
        )
    } else {
        format!("{:.1} GB", user.quota_now)
    };
    table.row(["Quota".to_string(), quota]);
}

pub fn login(app: &mut App, username: &str, password: Option<&str>) -> Result<()> {
    let password = match password {
        Some(p) if !p.is_empty() => p.to_string(),
        _ => read_line("Password: ")?,
    };

    let user = site_login(&app.client, &app.sessions, username, &password)?;

    let mut table = Table::new("Login Successful");
    user_rows(&mut table, &user);
    table.print();
    println!();

    configure_interactively(app)
}

/// 登录后交互式设置常用配置项并保存。
fn configure_interactively(app: &mut App) -> Result<()> {
    println!("Configuration");
    let config = &mut app.config;

    config.download_dir = prompt_default("Download directory", &config.download_dir)?;

    let format = prompt_default("Default format (epub/mobi)", &config.default_format)?;
    match resolve_format(&format) {
        Ok(fmt) => config.default_format = fmt.to_string(),
        Err(_) => println!("无效的格式 {format:?}，保持 {}", config.default_format),
    }

    let language = prompt_default(
        "Preferred language (all/ch/jp/en/oth)",
        &config.preferred_language,
    )?
    .to_ascii_lowercase();
    if LANGUAGE_CODES.contains(&language.as_str()) {
        config.preferred_language = language;
    } else {
        println!("无效的语言 {language:?}，保持 {}", config.preferred_language);
    }

    let workers = prompt_default(
        "Max download workers (1-10)",
        &config.max_download_workers.to_string(),
    )?;
    config.set_workers(workers.parse().unwrap_or(2));

    app.save_config()?;
    info!(target: "config", path = %app.config_path().display(), "配置已保存");
    println!("Configuration saved.");
    Ok(())
}

pub fn status(app: &App) -> Result<()> {
    match check_session(&app.client, &app.sessions)? {
        SessionState::Valid(user) => {
            let mut table = Table::new("Session Status");
            user_rows(&mut table, &user);
            table.print();
        }
        SessionState::Invalid => println!("Session expired. Please login again."),
        SessionState::Absent => println!("Not logged in."),
    }
    println!();

    println!("Config: {}", app.config_path().display());
    let mut table = Table::new("Configuration");
    for (label, value) in app.config.display_rows() {
        table.row([label, value]);
    }
    table.print();
    Ok(())
}
