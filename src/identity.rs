//! 身份认证模块
//!
//! 通过 `IdentityProvider` 抽象外部身份服务，会话与账号流程不直接依赖 Firebase。

pub mod firebase;

use crate::broadcast::SubscriptionId;
use crate::error::Result;
use futures::channel::mpsc::UnboundedReceiver;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use unimatch_shared::Identity;

pub use firebase::FirebaseIdentityClient;

/// 身份快照流：登录、恢复、刷新或资料变更后为 `Some`，登出或注销后为 `None`
pub type StateChanges = UnboundedReceiver<Option<Identity>>;

// =========================================================
// 核心抽象层 (Identity Provider Abstraction)
// =========================================================

#[async_trait::async_trait(?Send)]
pub trait IdentityProvider {
    async fn create_account(&self, email: &str, password: &str) -> Result<Identity>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity>;

    async fn sign_out(&self) -> Result<()>;

    async fn send_verification_email(&self) -> Result<()>;

    async fn send_password_reset(&self, email: &str) -> Result<()>;

    /// 删除当前身份并结束会话
    async fn delete_identity(&self) -> Result<()>;

    /// 资料 API 使用的短期 Bearer 凭证。临近过期或 `force_refresh` 时刷新。
    async fn bearer_token(&self, force_refresh: bool) -> Result<String>;

    /// 更新显示名并通知订阅者
    async fn update_display_name(&self, display_name: &str) -> Result<Identity>;

    /// 从身份服务重新读取身份 (获取最新的 `email_verified`) 并通知订阅者
    async fn reload(&self) -> Result<Identity>;

    /// 恢复持久化的会话。总会发出一次状态变化，无法恢复时为 `None`。
    async fn restore(&self) -> Result<Option<Identity>>;

    fn current(&self) -> Option<Identity>;

    fn subscribe(&self) -> (SubscriptionId, StateChanges);

    fn unsubscribe(&self, id: SubscriptionId);
}

// =========================================================
// 会话持久化 (Credential Store)
// =========================================================

pub const SESSION_STORAGE_KEY: &str = "unimatch_session";

/// 页面刷新后保留的内容：刷新凭证与账号 id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSession {
    pub user_id: String,
    pub refresh_token: String,
}

pub trait CredentialStore {
    fn load(&self) -> Option<StoredSession>;
    fn save(&self, session: &StoredSession);
    fn clear(&self);
}

/// Process-local store for native hosts and tests.
#[derive(Default)]
pub struct MemoryCredentialStore {
    session: RefCell<Option<StoredSession>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: StoredSession) -> Self {
        Self {
            session: RefCell::new(Some(session)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Option<StoredSession> {
        self.session.borrow().clone()
    }

    fn save(&self, session: &StoredSession) {
        *self.session.borrow_mut() = Some(session.clone());
    }

    fn clear(&self) {
        *self.session.borrow_mut() = None;
    }
}

impl<T: CredentialStore + ?Sized> CredentialStore for std::rc::Rc<T> {
    fn load(&self) -> Option<StoredSession> {
        (**self).load()
    }

    fn save(&self, session: &StoredSession) {
        (**self).save(session)
    }

    fn clear(&self) {
        (**self).clear()
    }
}
