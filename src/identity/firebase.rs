//! Firebase Authentication over its REST API.
//!
//! `accounts:*` calls live under the identity toolkit endpoint and the token
//! refresh under the secure-token endpoint; both take `?key=<api key>`.

use super::{CredentialStore, IdentityProvider, StateChanges, StoredSession};
use crate::broadcast::{Broadcaster, SubscriptionId};
use crate::config::RuntimeConfig;
use crate::error::{AppError, IdentityErrorCode, Result};
use crate::request::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use std::cell::RefCell;
use std::time::Duration;
use tracing::{debug, info, warn};
use unimatch_shared::{Identity, Timestamp};

// =========================================================
// 常量定义
// =========================================================

/// Tokens are refreshed this long before they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

// =========================================================
// 传输类型 (Wire Types)
// =========================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<String>,
}

/// The secure-token endpoint answers in snake_case.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<AccountInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountInfo {
    local_id: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    display_name: Option<String>,
}

impl From<AccountInfo> for Identity {
    fn from(info: AccountInfo) -> Self {
        Identity {
            id: info.local_id,
            email: info.email,
            email_verified: info.email_verified,
            display_name: info.display_name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

fn token_lifetime(expires_in: Option<&str>) -> Duration {
    Duration::from_secs(
        expires_in
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS),
    )
}

fn provider_error(resp: &HttpResponse) -> AppError {
    match serde_json::from_str::<ErrorEnvelope>(&resp.body) {
        Ok(envelope) => IdentityErrorCode::from_provider(&envelope.error.message).into(),
        Err(_) => AppError::api(resp.status, format!("HTTP error! status: {}", resp.status)),
    }
}

// =========================================================
// 会话状态
// =========================================================

#[derive(Debug, Clone)]
struct ActiveSession {
    identity: Identity,
    id_token: String,
    refresh_token: String,
    expires_at: Timestamp,
}

impl ActiveSession {
    fn needs_refresh(&self, now: Timestamp) -> bool {
        now + REFRESH_MARGIN >= self.expires_at
    }
}

// =========================================================
// 实现层: Firebase 客户端
// =========================================================

pub struct FirebaseIdentityClient<C, S> {
    http: C,
    store: S,
    api_key: String,
    identity_endpoint: String,
    token_endpoint: String,
    session: RefCell<Option<ActiveSession>>,
    changes: Broadcaster<Option<Identity>>,
}

impl<C, S> FirebaseIdentityClient<C, S>
where
    C: HttpClient,
    S: CredentialStore,
{
    pub fn new(http: C, store: S, config: &RuntimeConfig) -> Self {
        Self::with_endpoints(
            http,
            store,
            config.api_key(),
            &config.identity_endpoint,
            &config.token_endpoint,
        )
    }

    pub fn with_endpoints(
        http: C,
        store: S,
        api_key: &str,
        identity_endpoint: &str,
        token_endpoint: &str,
    ) -> Self {
        Self {
            http,
            store,
            api_key: api_key.to_string(),
            identity_endpoint: identity_endpoint.trim_end_matches('/').to_string(),
            token_endpoint: token_endpoint.trim_end_matches('/').to_string(),
            session: RefCell::new(None),
            changes: Broadcaster::new(),
        }
    }

    fn accounts_url(&self, op: &str) -> String {
        format!("{}/accounts:{}?key={}", self.identity_endpoint, op, self.api_key)
    }

    fn token_url(&self) -> String {
        format!("{}/token?key={}", self.token_endpoint, self.api_key)
    }

    async fn call<T: DeserializeOwned>(&self, url: String, body: Value) -> Result<T> {
        let req = HttpRequest::new(&url, HttpMethod::Post).with_body(body);
        let resp = self.http.send(req).await?;
        if !resp.is_success() {
            return Err(provider_error(&resp));
        }
        resp.json()
    }

    async fn lookup(&self, id_token: &str) -> Result<Identity> {
        let resp: LookupResponse = self
            .call(self.accounts_url("lookup"), json!({ "idToken": id_token }))
            .await?;
        resp.users
            .into_iter()
            .next()
            .map(Identity::from)
            .ok_or(AppError::Identity(IdentityErrorCode::UserNotFound))
    }

    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<RefreshResponse> {
        self.call(
            self.token_url(),
            json!({ "grant_type": "refresh_token", "refresh_token": refresh_token }),
        )
        .await
    }

    fn snapshot(&self) -> Option<ActiveSession> {
        self.session.borrow().clone()
    }

    fn is_current_user(&self, id: &str) -> bool {
        self.session
            .borrow()
            .as_ref()
            .is_some_and(|s| s.identity.id == id)
    }

    /// 建立新会话，持久化刷新凭证并通知订阅者
    fn establish(
        &self,
        identity: Identity,
        id_token: String,
        refresh_token: String,
        expires_in: Option<&str>,
    ) -> Identity {
        self.store.save(&StoredSession {
            user_id: identity.id.clone(),
            refresh_token: refresh_token.clone(),
        });
        *self.session.borrow_mut() = Some(ActiveSession {
            identity: identity.clone(),
            id_token,
            refresh_token,
            expires_at: Timestamp::now() + token_lifetime(expires_in),
        });
        self.changes.publish(Some(identity.clone()));
        identity
    }

    fn end_session(&self) {
        *self.session.borrow_mut() = None;
        self.store.clear();
        self.changes.publish(None);
    }

    /// 更新当前会话的身份资料并通知订阅者
    fn replace_identity(&self, identity: &Identity) {
        let replaced = match self.session.borrow_mut().as_mut() {
            Some(session) if session.identity.id == identity.id => {
                session.identity = identity.clone();
                true
            }
            _ => false,
        };
        if replaced {
            self.changes.publish(Some(identity.clone()));
        }
    }

    async fn resume(&self, stored: &StoredSession) -> Result<Identity> {
        let refreshed = self.exchange_refresh_token(&stored.refresh_token).await?;
        if let Some(uid) = &refreshed.user_id {
            if uid != &stored.user_id {
                return Err(AppError::Identity(IdentityErrorCode::SessionExpired));
            }
        }
        let identity = self.lookup(&refreshed.id_token).await?;
        Ok(self.establish(
            identity,
            refreshed.id_token,
            refreshed.refresh_token,
            refreshed.expires_in.as_deref(),
        ))
    }
}

#[async_trait::async_trait(?Send)]
impl<C, S> IdentityProvider for FirebaseIdentityClient<C, S>
where
    C: HttpClient,
    S: CredentialStore,
{
    async fn create_account(&self, email: &str, password: &str) -> Result<Identity> {
        let auth: AuthResponse = self
            .call(
                self.accounts_url("signUp"),
                json!({ "email": email, "password": password, "returnSecureToken": true }),
            )
            .await?;

        info!(uid = %auth.local_id, "identity created");
        let identity = Identity {
            id: auth.local_id,
            email: auth.email.unwrap_or_else(|| email.to_string()),
            email_verified: false,
            display_name: auth.display_name.filter(|n| !n.is_empty()),
        };
        Ok(self.establish(
            identity,
            auth.id_token,
            auth.refresh_token,
            auth.expires_in.as_deref(),
        ))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity> {
        let auth: AuthResponse = self
            .call(
                self.accounts_url("signInWithPassword"),
                json!({ "email": email, "password": password, "returnSecureToken": true }),
            )
            .await?;

        // signInWithPassword 不返回 emailVerified，需要再查一次
        let identity = match self.lookup(&auth.id_token).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(error = %e, "account lookup after sign-in failed");
                Identity {
                    id: auth.local_id.clone(),
                    email: auth.email.clone().unwrap_or_else(|| email.to_string()),
                    email_verified: false,
                    display_name: auth.display_name.clone().filter(|n| !n.is_empty()),
                }
            }
        };

        info!(uid = %identity.id, "signed in");
        Ok(self.establish(
            identity,
            auth.id_token,
            auth.refresh_token,
            auth.expires_in.as_deref(),
        ))
    }

    async fn sign_out(&self) -> Result<()> {
        debug!("signing out");
        self.end_session();
        Ok(())
    }

    async fn send_verification_email(&self) -> Result<()> {
        let token = self.bearer_token(false).await?;
        let _: Value = self
            .call(
                self.accounts_url("sendOobCode"),
                json!({ "requestType": "VERIFY_EMAIL", "idToken": token }),
            )
            .await?;
        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> Result<()> {
        let _: Value = self
            .call(
                self.accounts_url("sendOobCode"),
                json!({ "requestType": "PASSWORD_RESET", "email": email }),
            )
            .await?;
        Ok(())
    }

    async fn delete_identity(&self) -> Result<()> {
        let token = self.bearer_token(false).await?;
        let _: Value = self
            .call(self.accounts_url("delete"), json!({ "idToken": token }))
            .await?;
        info!("identity deleted");
        self.end_session();
        Ok(())
    }

    async fn bearer_token(&self, force_refresh: bool) -> Result<String> {
        let session = self.snapshot().ok_or(AppError::NotAuthenticated)?;
        if !force_refresh && !session.needs_refresh(Timestamp::now()) {
            return Ok(session.id_token);
        }

        debug!(uid = %session.identity.id, "refreshing id token");
        let refreshed = match self.exchange_refresh_token(&session.refresh_token).await {
            Ok(r) => r,
            Err(e @ AppError::Identity(_)) => {
                warn!(error = %e, "refresh credential rejected, ending session");
                if self.is_current_user(&session.identity.id) {
                    self.end_session();
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        // 刷新期间用户可能已经登出
        if !self.is_current_user(&session.identity.id) {
            return Err(AppError::NotAuthenticated);
        }

        let identity = self.snapshot().map(|s| s.identity).unwrap_or(session.identity);
        let id_token = refreshed.id_token.clone();
        self.establish(
            identity,
            refreshed.id_token,
            refreshed.refresh_token,
            refreshed.expires_in.as_deref(),
        );
        Ok(id_token)
    }

    async fn update_display_name(&self, display_name: &str) -> Result<Identity> {
        let token = self.bearer_token(false).await?;
        let _: Value = self
            .call(
                self.accounts_url("update"),
                json!({
                    "idToken": token,
                    "displayName": display_name,
                    "returnSecureToken": false
                }),
            )
            .await?;

        let mut identity = self.current().ok_or(AppError::NotAuthenticated)?;
        identity.display_name = Some(display_name.to_string());
        self.replace_identity(&identity);
        Ok(identity)
    }

    async fn reload(&self) -> Result<Identity> {
        let token = self.bearer_token(false).await?;
        let identity = self.lookup(&token).await?;
        if !self.is_current_user(&identity.id) {
            return Err(AppError::NotAuthenticated);
        }
        self.replace_identity(&identity);
        Ok(identity)
    }

    async fn restore(&self) -> Result<Option<Identity>> {
        let Some(stored) = self.store.load() else {
            self.changes.publish(None);
            return Ok(None);
        };

        match self.resume(&stored).await {
            Ok(identity) => {
                info!(uid = %identity.id, "session restored");
                Ok(Some(identity))
            }
            Err(e) => {
                warn!(error = %e, "could not restore session");
                self.end_session();
                Ok(None)
            }
        }
    }

    fn current(&self) -> Option<Identity> {
        self.session.borrow().as_ref().map(|s| s.identity.clone())
    }

    fn subscribe(&self) -> (SubscriptionId, StateChanges) {
        self.changes.subscribe()
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.changes.unsubscribe(id)
    }
}
