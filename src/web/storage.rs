//! LocalStorage 封装模块
//!
//! 使用 `web_sys::Storage` 提供简洁的本地存储接口，并据此持久化会话凭据。

use crate::identity::{CredentialStore, SESSION_STORAGE_KEY, StoredSession};
use tracing::warn;

/// 本地存储操作封装
pub struct LocalStorage;

impl LocalStorage {
    fn storage() -> Option<web_sys::Storage> {
        web_sys::window()?.local_storage().ok()?
    }

    /// 获取存储的字符串值，键不存在或出错时返回 `None`
    pub fn get(key: &str) -> Option<String> {
        Self::storage()?.get_item(key).ok()?
    }

    pub fn set(key: &str, value: &str) -> bool {
        Self::storage()
            .and_then(|s| s.set_item(key, value).ok())
            .is_some()
    }

    pub fn delete(key: &str) -> bool {
        Self::storage()
            .and_then(|s| s.remove_item(key).ok())
            .is_some()
    }
}

/// Keeps the refresh credential across page reloads.
pub struct LocalCredentialStore {
    key: String,
}

impl Default for LocalCredentialStore {
    fn default() -> Self {
        Self::new(SESSION_STORAGE_KEY)
    }
}

impl LocalCredentialStore {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
        }
    }
}

impl CredentialStore for LocalCredentialStore {
    fn load(&self) -> Option<StoredSession> {
        let raw = LocalStorage::get(&self.key)?;
        match serde_json::from_str(&raw) {
            Ok(session) => Some(session),
            Err(err) => {
                // 损坏的记录直接丢弃
                warn!(error = %err, "discarding unreadable stored session");
                LocalStorage::delete(&self.key);
                None
            }
        }
    }

    fn save(&self, session: &StoredSession) {
        match serde_json::to_string(session) {
            Ok(raw) => {
                if !LocalStorage::set(&self.key, &raw) {
                    warn!("localStorage unavailable, session not persisted");
                }
            }
            Err(err) => warn!(error = %err, "session not persisted"),
        }
    }

    fn clear(&self) {
        LocalStorage::delete(&self.key);
    }
}
