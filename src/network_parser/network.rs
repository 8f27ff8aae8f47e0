//! 多镜像 HTTP 客户端：重试、退避、镜像切换与全局限速。

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, warn};

use super::transport::{HttpResponse, Transport, TransportError};
use crate::base_system::context::Config;
use crate::base_system::errors::{KmoeError, Result};

/// 视为“镜像不健康”的状态码：不在该镜像上重试，直接切换下一个。
pub const FAILOVER_STATUS_CODES: [u16; 4] = [404, 502, 503, 504];

pub const DOWNLOAD_URL_TEMPLATE: &str =
    "https://{domain}/getdownurl.php?b={book_id}&v={vol_id}&mobi={fmt}&vip={line}&json=1";

const CHUNK_SIZE: usize = 8192;
const QUOTA_EXHAUSTED_MARKER: &str = "額度不足";

#[derive(Debug, Clone)]
pub struct MirrorPolicy {
    pub mirrors: Vec<String>,
    pub failover: bool,
    pub max_retries: u32,
    pub rate_limit: Duration,
    /// 第 n 次连接失败后的等待时间为 `backoff_base * 2^n`。
    pub backoff_base: Duration,
}

impl MirrorPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            mirrors: config.mirror_list(),
            failover: config.mirror_failover,
            max_retries: config.max_retries,
            rate_limit: config.rate_limit(),
            backoff_base: Duration::from_millis(500),
        }
    }
}

pub struct MirrorClient<T: Transport> {
    transport: T,
    policy: MirrorPolicy,
    active: Mutex<String>,
    last_request: Mutex<Option<Instant>>,
}

impl<T: Transport> MirrorClient<T> {
    pub fn new(transport: T, policy: MirrorPolicy) -> Self {
        let active = policy
            .mirrors
            .first()
            .cloned()
            .unwrap_or_else(|| "kxx.moe".to_string());
        Self {
            transport,
            policy,
            active: Mutex::new(active),
            last_request: Mutex::new(None),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn active_mirror(&self) -> String {
        self.active
            .lock()
            .map(|a| a.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn mirrors(&self) -> &[String] {
        &self.policy.mirrors
    }

    pub fn get(&self, template: &str, params: &[(&str, &str)]) -> Result<HttpResponse> {
        self.request_with_failover(template, params, None)
    }

    pub fn post(
        &self,
        template: &str,
        params: &[(&str, &str)],
        form: &[(&str, &str)],
    ) -> Result<HttpResponse> {
        self.request_with_failover(template, params, Some(form))
    }

    /// 本次请求的镜像顺序：当前活跃镜像在前；关闭切换时只尝试活跃镜像。
    fn candidates(&self) -> Vec<String> {
        let active = self.active_mirror();
        let mut list = vec![active.clone()];
        if self.policy.failover {
            list.extend(self.policy.mirrors.iter().filter(|m| **m != active).cloned());
        }
        list
    }

    fn request_with_failover(
        &self,
        template: &str,
        params: &[(&str, &str)],
        form: Option<&[(&str, &str)]>,
    ) -> Result<HttpResponse> {
        let retries = self.policy.max_retries.max(1);
        let mut tried: Vec<String> = Vec::new();
        let mut last_error = String::from("no mirror attempted");

        for mirror in self.candidates() {
            if !tried.contains(&mirror) {
                tried.push(mirror.clone());
            }
            let url = render_template(template, &mirror, params);

            for attempt in 0..retries {
                self.throttle();
                debug!(target: "mirror", %mirror, attempt, "请求 {url}");
                let result = match form {
                    Some(form) => self.transport.post_form(&url, form),
                    None => self.transport.get(&url),
                };
                self.mark_request_end();

                match result {
                    Ok(resp) if FAILOVER_STATUS_CODES.contains(&resp.status) => {
                        warn!(target: "mirror", %mirror, status = resp.status, "镜像返回异常状态，切换下一个");
                        last_error = format!("{mirror} returned HTTP {}", resp.status);
                        break;
                    }
                    Ok(resp) => {
                        self.promote(&mirror);
                        return Ok(resp);
                    }
                    Err(TransportError::Connect(msg)) => {
                        warn!(target: "mirror", %mirror, attempt, "连接失败: {msg}");
                        last_error = format!("{mirror}: {msg}");
                        if attempt + 1 < retries {
                            self.sleep_backoff(attempt);
                        }
                    }
                    Err(TransportError::Request(msg)) => {
                        warn!(target: "mirror", %mirror, "请求失败: {msg}");
                        last_error = format!("{mirror}: {msg}");
                        break;
                    }
                }
            }
        }

        Err(KmoeError::MirrorExhausted {
            mirrors_tried: tried,
            last_error,
        })
    }

    fn promote(&self, mirror: &str) {
        let Ok(mut active) = self.active.lock() else {
            return;
        };
        if *active != mirror {
            info!(target: "mirror", from = %active.as_str(), to = %mirror, "切换活跃镜像");
            *active = mirror.to_string();
        }
    }

    /// 全局限速：距离上一次请求结束不足 `rate_limit` 时阻塞等待。
    /// 持锁等待，使并发请求在这里串行化。
    fn throttle(&self) {
        let min_gap = self.policy.rate_limit;
        if let Ok(mut last) = self.last_request.lock() {
            if let Some(prev) = *last {
                let elapsed = prev.elapsed();
                if elapsed < min_gap {
                    std::thread::sleep(min_gap - elapsed);
                }
            }
            *last = Some(Instant::now());
        }
    }

    fn mark_request_end(&self) {
        if let Ok(mut last) = self.last_request.lock() {
            *last = Some(Instant::now());
        }
    }

    fn sleep_backoff(&self, attempt: u32) {
        let factor = 2u32.saturating_pow(attempt);
        let wait = self.policy.backoff_base.saturating_mul(factor);
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
    }

    /// 向 getdownurl.php 请求带签名的 CDN 地址。
    pub fn get_download_url(
        &self,
        book_id: &str,
        vol_id: &str,
        format_code: u8,
        line: u8,
    ) -> Result<String> {
        let fmt = format_code.to_string();
        let line = line.to_string();
        let resp = self.get(
            DOWNLOAD_URL_TEMPLATE,
            &[
                ("book_id", book_id),
                ("vol_id", vol_id),
                ("fmt", fmt.as_str()),
                ("line", line.as_str()),
            ],
        )?;
        let text = resp.body.trim();
        let url = if text.starts_with('{') {
            parse_download_envelope(text)?
        } else {
            text.to_string()
        };

        if url.starts_with("http") {
            Ok(url)
        } else if url.starts_with('/') {
            Ok(format!("https://{}{}", self.active_mirror(), url))
        } else {
            Err(KmoeError::Network(format!(
                "unexpected download API response: {}",
                preview(text)
            )))
        }
    }

    /// 流式下载到 `dest`（先写 `.part` 再改名）。
    ///
    /// `on_total` 在开始传输前以 Content-Length 调用一次（长度未知或为 0 时不调用），
    /// `on_chunk` 每写入一块调用一次。
    pub fn download_file(
        &self,
        url: &str,
        dest: &Path,
        on_total: &mut dyn FnMut(u64),
        on_chunk: &mut dyn FnMut(u64),
    ) -> Result<u64> {
        self.throttle();
        let resp = self.transport.get_stream(url);
        self.mark_request_end();
        let mut resp = resp.map_err(|e| KmoeError::Download(format!("Download failed: {e}")))?;

        if !(200..300).contains(&resp.status) {
            return Err(KmoeError::Download(format!(
                "Download failed with status {}",
                resp.status
            )));
        }

        if let Some(total) = resp.content_length.filter(|n| *n > 0) {
            on_total(total);
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| KmoeError::io(parent, e))?;
        }
        let part = part_path(dest);
        let written = match stream_to_file(&mut resp.body, &part, on_chunk) {
            Ok(n) => n,
            Err(err) => {
                let _ = fs::remove_file(&part);
                return Err(err);
            }
        };
        let _ = fs::remove_file(dest);
        fs::rename(&part, dest).map_err(|e| KmoeError::io(dest, e))?;
        Ok(written)
    }
}

fn stream_to_file(
    body: &mut dyn Read,
    part: &Path,
    on_chunk: &mut dyn FnMut(u64),
) -> Result<u64> {
    let mut file = File::create(part).map_err(|e| KmoeError::io(part, e))?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut written = 0u64;
    loop {
        let n = match body.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(KmoeError::Download(format!("Download failed: {e}"))),
        };
        file.write_all(&buf[..n]).map_err(|e| KmoeError::io(part, e))?;
        written += n as u64;
        on_chunk(n as u64);
    }
    file.flush().map_err(|e| KmoeError::io(part, e))?;
    Ok(written)
}

fn part_path(dest: &Path) -> std::path::PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// JSON 信封：`{error}` 或 `{code, url?, msg?}`，code 为 200 时成功。
fn parse_download_envelope(text: &str) -> Result<String> {
    let data: Value = serde_json::from_str(text).map_err(|e| KmoeError::Parse {
        url: "getdownurl.php".to_string(),
        message: e.to_string(),
    })?;
    if let Some(err) = data.get("error") {
        let msg = err.as_str().map(str::to_string).unwrap_or_else(|| err.to_string());
        return Err(KmoeError::Network(format!("Download API error: {msg}")));
    }
    let code = data.get("code").and_then(Value::as_i64).unwrap_or(0);
    if code != 200 {
        let msg = data
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error");
        if msg.contains(QUOTA_EXHAUSTED_MARKER) {
            return Err(KmoeError::QuotaExhausted(msg.to_string()));
        }
        return Err(KmoeError::Network(format!(
            "Download API error (code {code}): {msg}"
        )));
    }
    match data.get("url").and_then(Value::as_str) {
        Some(url) if !url.is_empty() => Ok(url.to_string()),
        _ => Err(KmoeError::Network(format!(
            "Download API returned empty URL: {}",
            preview(text)
        ))),
    }
}

fn preview(text: &str) -> String {
    text.chars().take(100).collect()
}

/// 替换 `{domain}` 与 `{key}` 占位符；未提供的占位符原样保留。
pub fn render_template(template: &str, domain: &str, params: &[(&str, &str)]) -> String {
    let mut out = template.replace("{domain}", domain);
    for (key, value) in params {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network_parser::transport::testing::{MockTransport, Reply};
    use tempfile::TempDir;

    fn policy(failover: bool) -> MirrorPolicy {
        MirrorPolicy {
            mirrors: vec!["kxx.moe".into(), "kzz.moe".into(), "koz.moe".into()],
            failover,
            max_retries: 3,
            rate_limit: Duration::ZERO,
            backoff_base: Duration::ZERO,
        }
    }

    const PAGE: &str = "https://{domain}/c/{comic_id}.htm";

    #[test]
    fn fails_over_and_promotes_the_first_healthy_mirror() {
        let transport = MockTransport::new()
            .route("kxx.moe", vec![Reply::status(503)])
            .route("kzz.moe", vec![Reply::Connect])
            .route("koz.moe", vec![Reply::ok("hello")]);
        let client = MirrorClient::new(transport, policy(true));

        let resp = client.get(PAGE, &[("comic_id", "42")]).unwrap();
        assert_eq!(resp.body, "hello");
        assert_eq!(resp.url, "https://koz.moe/c/42.htm");
        assert_eq!(client.active_mirror(), "koz.moe");

        // 503 不重试；连接失败重试满 3 次
        assert_eq!(client.transport().count_matching("kxx.moe"), 1);
        assert_eq!(client.transport().count_matching("kzz.moe"), 3);

        // 粘性：下一次从 koz.moe 开始
        client.get(PAGE, &[("comic_id", "43")]).unwrap();
        assert!(client.transport().requests().last().unwrap().contains("koz.moe/c/43"));
    }

    #[test]
    fn exhaustion_lists_each_mirror_once_in_order() {
        let transport = MockTransport::new()
            .route("kxx.moe", vec![Reply::Connect])
            .route("kzz.moe", vec![Reply::status(404)])
            .route("koz.moe", vec![Reply::Fail("tls handshake".into())]);
        let client = MirrorClient::new(transport, policy(true));

        match client.get(PAGE, &[("comic_id", "1")]) {
            Err(KmoeError::MirrorExhausted { mirrors_tried, .. }) => {
                assert_eq!(mirrors_tried, vec!["kxx.moe", "kzz.moe", "koz.moe"]);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(client.active_mirror(), "kxx.moe");
    }

    #[test]
    fn without_failover_only_the_active_mirror_is_tried() {
        let transport = MockTransport::new()
            .route("kxx.moe", vec![Reply::status(502)])
            .route("kzz.moe", vec![Reply::ok("never")]);
        let client = MirrorClient::new(transport, policy(false));

        match client.get(PAGE, &[("comic_id", "1")]) {
            Err(KmoeError::MirrorExhausted { mirrors_tried, .. }) => {
                assert_eq!(mirrors_tried, vec!["kxx.moe"]);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(client.transport().count_matching("kzz.moe"), 0);
    }

    #[test]
    fn transient_connect_errors_recover_on_the_same_mirror() {
        let transport = MockTransport::new().route(
            "kxx.moe",
            vec![Reply::Connect, Reply::Connect, Reply::ok("third time")],
        );
        let client = MirrorClient::new(transport, policy(true));
        let resp = client.get(PAGE, &[("comic_id", "9")]).unwrap();
        assert_eq!(resp.body, "third time");
        assert_eq!(client.transport().requests().len(), 3);
    }

    #[test]
    fn non_failover_statuses_are_returned_to_the_caller() {
        let transport = MockTransport::new().route("kxx.moe", vec![Reply::status(403)]);
        let client = MirrorClient::new(transport, policy(true));
        let resp = client.get(PAGE, &[("comic_id", "9")]).unwrap();
        assert_eq!(resp.status, 403);
    }

    #[test]
    fn rate_limit_spaces_out_requests() {
        let transport = MockTransport::new().route("kxx.moe", vec![Reply::ok("x")]);
        let mut p = policy(true);
        p.rate_limit = Duration::from_millis(40);
        let client = MirrorClient::new(transport, p);

        let start = Instant::now();
        for _ in 0..3 {
            client.get(PAGE, &[("comic_id", "1")]).unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    fn url_client(reply: Reply) -> MirrorClient<MockTransport> {
        MirrorClient::new(
            MockTransport::new().route("getdownurl.php", vec![reply]),
            policy(true),
        )
    }

    #[test]
    fn download_url_accepts_bare_relative_and_json_forms() {
        let c = url_client(Reply::ok("  https://cdn.example/f.epub\n"));
        assert_eq!(
            c.get_download_url("1", "2", 2, 0).unwrap(),
            "https://cdn.example/f.epub"
        );
        assert!(c.transport().requests()[0]
            .ends_with("https://kxx.moe/getdownurl.php?b=1&v=2&mobi=2&vip=0&json=1"));

        let c = url_client(Reply::ok("/dl/f.epub?sig=1"));
        assert_eq!(
            c.get_download_url("1", "2", 2, 1).unwrap(),
            "https://kxx.moe/dl/f.epub?sig=1"
        );

        let c = url_client(Reply::ok(r#"{"code":200,"url":"https://cdn.example/g.mobi"}"#));
        assert_eq!(
            c.get_download_url("1", "2", 1, 0).unwrap(),
            "https://cdn.example/g.mobi"
        );
    }

    #[test]
    fn download_url_errors_are_classified() {
        let c = url_client(Reply::ok(r#"{"code":500,"msg":"今日下載額度不足"}"#));
        assert!(matches!(
            c.get_download_url("1", "2", 2, 0),
            Err(KmoeError::QuotaExhausted(_))
        ));

        let c = url_client(Reply::ok(r#"{"code":500,"msg":"busy"}"#));
        assert!(matches!(
            c.get_download_url("1", "2", 2, 0),
            Err(KmoeError::Network(m)) if m.contains("code 500")
        ));

        let c = url_client(Reply::ok(r#"{"error":"not logged in"}"#));
        assert!(matches!(
            c.get_download_url("1", "2", 2, 0),
            Err(KmoeError::Network(_))
        ));

        let c = url_client(Reply::ok(r#"{"code":200,"url":""}"#));
        assert!(c.get_download_url("1", "2", 2, 0).is_err());

        let c = url_client(Reply::ok("<html>login</html>"));
        assert!(c.get_download_url("1", "2", 2, 0).is_err());
    }

    #[test]
    fn streaming_reports_total_and_chunks() {
        let payload = vec![7u8; 20_000];
        let transport =
            MockTransport::new().route("cdn.example", vec![Reply::Bytes(200, payload.clone())]);
        let client = MirrorClient::new(transport, policy(true));
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("nested").join("v.epub");

        let mut total = 0;
        let mut seen = 0;
        let written = client
            .download_file(
                "https://cdn.example/v.epub",
                &dest,
                &mut |t| total = t,
                &mut |n| seen += n,
            )
            .unwrap();

        assert_eq!(written, 20_000);
        assert_eq!(total, 20_000);
        assert_eq!(seen, 20_000);
        assert_eq!(fs::read(&dest).unwrap(), payload);
        assert!(!part_path(&dest).exists());
    }

    #[test]
    fn streaming_http_errors_are_download_failures() {
        let transport = MockTransport::new().route("cdn.example", vec![Reply::status(403)]);
        let client = MirrorClient::new(transport, policy(true));
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("v.epub");

        let err = client
            .download_file("https://cdn.example/v.epub", &dest, &mut |_| {}, &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, KmoeError::Download(m) if m.contains("403")));
        assert!(!dest.exists());
    }

    #[test]
    fn templates_keep_unknown_placeholders() {
        assert_eq!(
            render_template("https://{domain}/l/{filters}/{page}.htm", "kxx.moe", &[("page", "2")]),
            "https://kxx.moe/l/{filters}/2.htm"
        );
    }
}
