//! HTTP 传输层。
//!
//! `MirrorClient` 只依赖 `Transport` trait：生产环境使用 reqwest 阻塞客户端，
//! 测试使用按 URL 路由的脚本化实现。

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONNECTION, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Url;
use thiserror::Error;

use crate::base_system::session::CookieMap;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// 连接级失败（DNS、拒绝连接、超时），可在同一镜像上重试。
    #[error("connection error: {0}")]
    Connect(String),
    /// 其它请求失败，直接放弃当前镜像。
    #[error("request error: {0}")]
    Request(String),
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub url: String,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub struct StreamResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub body: Box<dyn Read + Send>,
}

pub trait Transport: Send + Sync {
    fn get(&self, url: &str) -> Result<HttpResponse, TransportError>;
    fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<HttpResponse, TransportError>;
    fn get_stream(&self, url: &str) -> Result<StreamResponse, TransportError>;
    fn cookies(&self) -> CookieMap;
    fn set_cookies(&self, cookies: &CookieMap);
}

pub struct ReqwestTransport {
    client: Client,
    jar: Arc<Jar>,
    cookie_hosts: Vec<String>,
}

impl ReqwestTransport {
    /// `cookie_hosts` 为需要共享登录 cookie 的镜像域名。
    pub fn new(timeout: Duration, cookie_hosts: Vec<String>) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("zh-TW,zh;q=0.9,en-US;q=0.8,en;q=0.7"),
        );
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .default_headers(headers)
            .cookie_provider(Arc::clone(&jar))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            jar,
            cookie_hosts,
        })
    }

    fn host_urls(&self) -> impl Iterator<Item = Url> + '_ {
        self.cookie_hosts
            .iter()
            .filter_map(|h| Url::parse(&format!("https://{h}/")).ok())
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_connect() || err.is_timeout() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Request(err.to_string())
    }
}

fn into_response(resp: reqwest::blocking::Response) -> Result<HttpResponse, TransportError> {
    let status = resp.status().as_u16();
    let url = resp.url().to_string();
    let body = resp.text().map_err(classify)?;
    Ok(HttpResponse { status, url, body })
}

impl Transport for ReqwestTransport {
    fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        into_response(self.client.get(url).send().map_err(classify)?)
    }

    fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<HttpResponse, TransportError> {
        into_response(self.client.post(url).form(form).send().map_err(classify)?)
    }

    fn get_stream(&self, url: &str) -> Result<StreamResponse, TransportError> {
        let resp = self.client.get(url).send().map_err(classify)?;
        Ok(StreamResponse {
            status: resp.status().as_u16(),
            content_length: resp.content_length(),
            body: Box::new(resp),
        })
    }

    fn cookies(&self) -> CookieMap {
        let mut out = CookieMap::new();
        for url in self.host_urls() {
            let Some(header) = self.jar.cookies(&url) else {
                continue;
            };
            let Ok(text) = header.to_str() else {
                continue;
            };
            for pair in text.split(';') {
                if let Some((k, v)) = pair.trim().split_once('=') {
                    out.entry(k.to_string()).or_insert_with(|| v.to_string());
                }
            }
        }
        out
    }

    fn set_cookies(&self, cookies: &CookieMap) {
        for url in self.host_urls() {
            for (name, value) in cookies {
                self.jar
                    .add_cookie_str(&format!("{name}={value}; Path=/"), &url);
            }
        }
    }
}
