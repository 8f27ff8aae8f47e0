//! 登录、会话校验与用户额度。

use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info, warn};

use super::models::UserStatus;
use super::network::MirrorClient;
use super::parser::parse_my_page_quota;
use super::transport::Transport;
use crate::base_system::errors::{KmoeError, Result};
use crate::base_system::session::{SessionLoad, SessionStore};

pub const LOGIN_TEMPLATE: &str = "https://{domain}/login_do.php";
pub const HOME_TEMPLATE: &str = "https://{domain}/";
pub const MY_TEMPLATE: &str = "https://{domain}/my.php";

/// 会话检查结果。
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Valid(UserStatus),
    /// 有 cookie，但首页已不再显示登录态
    Invalid,
    /// 没有可用的本地会话
    Absent,
}

fn re_level() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"Lv(\d+)").expect("compile RE_LEVEL"))
}

fn re_uin() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"/u/(\d+)/").expect("compile RE_UIN"))
}

fn is_logged_in_page(html: &str) -> bool {
    html.contains("my.php")
}

pub fn login<T: Transport>(
    client: &MirrorClient<T>,
    store: &dyn SessionStore,
    email: &str,
    password: &str,
) -> Result<UserStatus> {
    client.post(
        LOGIN_TEMPLATE,
        &[],
        &[("email", email), ("passwd", password), ("keepalive", "on")],
    )?;
    let cookies = client.transport().cookies();

    let home = client.get(HOME_TEMPLATE, &[])?;
    if home.body.contains("login.php") && !is_logged_in_page(&home.body) {
        warn!(target: "auth", "登录失败：首页仍显示登录入口");
        return Err(KmoeError::Auth(
            "Login failed: invalid credentials or server error".to_string(),
        ));
    }

    store.save(&cookies)?;
    info!(target: "auth", cookies = cookies.len(), "登录成功，会话已保存");
    Ok(build_user_status(client, &home.body))
}

/// 将本地会话载入传输层的 cookie 存储；返回是否载入了会话。
pub fn apply_session<T: Transport>(client: &MirrorClient<T>, store: &dyn SessionStore) -> bool {
    match store.load() {
        SessionLoad::Present(cookies) if !cookies.is_empty() => {
            client.transport().set_cookies(&cookies);
            true
        }
        SessionLoad::Unreadable => {
            warn!(target: "auth", "本地会话不可用（可能来自其它机器或已损坏）");
            false
        }
        _ => false,
    }
}

pub fn check_session<T: Transport>(
    client: &MirrorClient<T>,
    store: &dyn SessionStore,
) -> Result<SessionState> {
    if !apply_session(client, store) {
        return Ok(SessionState::Absent);
    }
    let home = client.get(HOME_TEMPLATE, &[])?;
    if !is_logged_in_page(&home.body) {
        debug!(target: "auth", "会话已失效");
        return Ok(SessionState::Invalid);
    }
    Ok(SessionState::Valid(build_user_status(client, &home.body)))
}

/// 需要登录态的命令入口：会话缺失为 `LoginRequired`，失效为 `SessionExpired`。
pub fn ensure_logged_in<T: Transport>(
    client: &MirrorClient<T>,
    store: &dyn SessionStore,
) -> Result<UserStatus> {
    match check_session(client, store)? {
        SessionState::Valid(status) => Ok(status),
        SessionState::Invalid => Err(KmoeError::SessionExpired),
        SessionState::Absent => Err(KmoeError::LoginRequired),
    }
}

/// 从首页解析等级、UIN、VIP；额度取自 `my.php`，失败时为 0。
fn build_user_status<T: Transport>(client: &MirrorClient<T>, home_html: &str) -> UserStatus {
    let level = re_level()
        .captures(home_html)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0);
    let uin = re_uin()
        .captures(home_html)
        .map(|c| c[1].to_string())
        .unwrap_or_default();
    let is_vip = home_html.contains("VIP会员") || home_html.contains("VIP會員");

    let (quota_free_month, quota_remaining, quota_extra) = match client.get(MY_TEMPLATE, &[]) {
        Ok(resp) => parse_my_page_quota(&resp.body),
        Err(err) => {
            debug!(target: "auth", "获取额度失败，按 0 处理: {err}");
            (0.0, 0.0, 0.0)
        }
    };

    UserStatus {
        username: uin.clone(),
        uin,
        level,
        is_vip,
        quota_now: 0.0,
        quota_free_month,
        quota_remaining,
        quota_extra,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_system::session::CookieMap;
    use crate::base_system::session::testing::MemorySessionStore;
    use crate::network_parser::network::MirrorPolicy;
    use crate::network_parser::transport::testing::{MockTransport, Reply};
    use std::time::Duration;

    const HOME_IN: &str = r#"<a href="/u/778899/">me</a> Lv3 VIP會員 <a href="/my.php">我的</a>"#;
    const HOME_OUT: &str = r#"<a href="/login.php">登入</a>"#;
    const MY_PAGE: &str = "Lv3 每月額度 : &nbsp; 2048 M 剩餘 : &nbsp; 1000.5 M 額外額度剩餘 : &nbsp; 24 M";

    fn client(transport: MockTransport) -> MirrorClient<MockTransport> {
        MirrorClient::new(
            transport,
            MirrorPolicy {
                mirrors: vec!["kxx.moe".into()],
                failover: true,
                max_retries: 1,
                rate_limit: Duration::ZERO,
                backoff_base: Duration::ZERO,
            },
        )
    }

    #[test]
    fn login_saves_cookies_and_reads_quota() {
        let c = client(
            MockTransport::new()
                .route("login_do.php", vec![Reply::ok("ok")])
                .route("my.php", vec![Reply::ok(MY_PAGE)])
                .route("kxx.moe/", vec![Reply::ok(HOME_IN)]),
        );
        let store = MemorySessionStore::default();

        let status = login(&c, &store, "a@b.c", "pw").unwrap();
        assert_eq!(status.uin, "778899");
        assert_eq!(status.level, 3);
        assert!(status.is_vip);
        assert_eq!(status.quota_remaining, 1000.5);
        assert_eq!(status.remaining_mb(), 1024.5);

        let saved = store.state.lock().unwrap().clone().unwrap();
        assert_eq!(saved.get("VLIBSID").map(String::as_str), Some("session"));
    }

    #[test]
    fn rejected_login_keeps_store_empty() {
        let c = client(
            MockTransport::new()
                .route("login_do.php", vec![Reply::ok("")])
                .route("kxx.moe/", vec![Reply::ok(HOME_OUT)]),
        );
        let store = MemorySessionStore::default();
        assert!(matches!(
            login(&c, &store, "a@b.c", "bad"),
            Err(KmoeError::Auth(_))
        ));
        assert!(store.state.lock().unwrap().is_none());
    }

    #[test]
    fn quota_failure_degrades_to_zero() {
        let c = client(
            MockTransport::new()
                .route("login_do.php", vec![Reply::ok("")])
                .route("my.php", vec![Reply::Fail("boom".into())])
                .route("kxx.moe/", vec![Reply::ok(HOME_IN)]),
        );
        let status = login(&c, &MemorySessionStore::default(), "a", "b").unwrap();
        assert_eq!(status.quota_free_month, 0.0);
        assert_eq!(status.remaining_mb(), 0.0);
    }

    #[test]
    fn session_tri_state() {
        let store = MemorySessionStore::default();
        let c = client(MockTransport::new().route("kxx.moe/", vec![Reply::ok(HOME_OUT)]));
        assert_eq!(check_session(&c, &store).unwrap(), SessionState::Absent);
        assert!(c.transport().requests().is_empty());
        assert!(matches!(
            ensure_logged_in(&c, &store),
            Err(KmoeError::LoginRequired)
        ));

        store
            .save(&CookieMap::from([("VLIBSID".to_string(), "old".to_string())]))
            .unwrap();
        assert_eq!(check_session(&c, &store).unwrap(), SessionState::Invalid);
        assert!(matches!(
            ensure_logged_in(&c, &store),
            Err(KmoeError::SessionExpired)
        ));

        let c = client(
            MockTransport::new()
                .route("my.php", vec![Reply::ok(MY_PAGE)])
                .route("kxx.moe/", vec![Reply::ok(HOME_IN)]),
        );
        match check_session(&c, &store).unwrap() {
            SessionState::Valid(status) => assert_eq!(status.uin, "778899"),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(
            c.transport().cookies().get("VLIBSID").map(String::as_str),
            Some("old")
        );
    }
}
