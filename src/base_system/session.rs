//! 登录会话（cookie）持久化。
//!
//! `session.dat` 为 base64(nonce || 密文)，密文由 AES-256-GCM 加密 cookie JSON 得到，
//! 密钥取本机身份（主机名 + 用户名）的 SHA-256。换机器或文件损坏时解密失败，视为不可用。

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::errors::{KmoeError, Result};

pub const SESSION_FILE_NAME: &str = "session.dat";

const NONCE_LEN: usize = 12;

pub type CookieMap = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionLoad {
    Present(CookieMap),
    Missing,
    Unreadable,
}

pub trait SessionStore: Send + Sync {
    fn load(&self) -> SessionLoad;
    fn save(&self, cookies: &CookieMap) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

pub struct FileSessionStore {
    path: PathBuf,
    cipher: Aes256Gcm,
}

impl FileSessionStore {
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::with_machine_key(data_dir.join(SESSION_FILE_NAME), machine_identity())
    }

    pub fn with_machine_key(path: PathBuf, machine_key: String) -> Self {
        let key = Sha256::digest(machine_key.as_bytes());
        Self {
            path,
            cipher: Aes256Gcm::new(&key),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn seal(&self, cookies: &CookieMap) -> Result<String> {
        let json = serde_json::to_vec(cookies).map_err(|source| KmoeError::Json {
            path: self.path.clone(),
            source,
        })?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, json.as_slice())
            .map_err(|_| KmoeError::Auth("failed to encrypt session".to_string()))?;

        let mut blob = nonce.to_vec();
        blob.extend_from_slice(&sealed);
        Ok(BASE64.encode(blob))
    }

    fn open(&self, raw: &[u8]) -> Option<CookieMap> {
        let text = std::str::from_utf8(raw).ok()?;
        let blob = BASE64.decode(text.trim()).ok()?;
        if blob.len() <= NONCE_LEN {
            return None;
        }
        let (nonce, sealed) = blob.split_at(NONCE_LEN);
        let json = self.cipher.decrypt(Nonce::from_slice(nonce), sealed).ok()?;
        serde_json::from_slice(&json).ok()
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> SessionLoad {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return SessionLoad::Missing,
            Err(err) => {
                warn!(target: "auth", path = %self.path.display(), "读取会话文件失败: {err}");
                return SessionLoad::Unreadable;
            }
        };
        match self.open(&raw) {
            Some(cookies) => SessionLoad::Present(cookies),
            None => {
                debug!(target: "auth", "会话文件解密失败，忽略");
                SessionLoad::Unreadable
            }
        }
    }

    fn save(&self, cookies: &CookieMap) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| KmoeError::io(parent, e))?;
        }
        let blob = self.seal(cookies)?;
        fs::write(&self.path, blob).map_err(|e| KmoeError::io(&self.path, e))
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(KmoeError::io(&self.path, err)),
        }
    }
}

/// 本机身份：主机名 + 当前用户名。
pub fn machine_identity() -> String {
    let host = ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .find_map(|k| std::env::var(k).ok())
        .or_else(|| fs::read_to_string("/etc/hostname").ok())
        .unwrap_or_default();
    let user = ["USER", "USERNAME", "LOGNAME"]
        .iter()
        .find_map(|k| std::env::var(k).ok())
        .unwrap_or_default();
    format!("{}{}", host.trim(), user.trim())
}
