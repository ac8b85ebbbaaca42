//! Test doubles shared by the workflow tests: an in-memory identity provider,
//! an HTTP backend that implements the profile/match API, and a hand-driven
//! ticker.

use crate::broadcast::{Broadcaster, SubscriptionId};
use crate::error::{AppError, IdentityErrorCode, Result};
use crate::identity::{IdentityProvider, StateChanges};
use crate::request::{HttpBody, HttpClient, HttpMethod, HttpRequest, HttpResponse};
use crate::ticker::Ticker;
use futures::StreamExt;
use futures::channel::mpsc::{UnboundedSender, unbounded};
use futures::stream::LocalBoxStream;
use serde::Serialize;
use serde_json::json;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::time::Duration;
use unimatch_shared::chrono::Utc;
use unimatch_shared::protocol::*;
use unimatch_shared::{Identity, Match, Profile, ProfilePatch};

pub const API_BASE: &str = "http://api.test/api";

pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

// =========================================================
// FakeIdentity
// =========================================================

pub struct FakeIdentity {
    current: RefCell<Option<Identity>>,
    // email -> (password, identity)
    accounts: RefCell<HashMap<String, (String, Identity)>>,
    changes: Broadcaster<Option<Identity>>,
    fail_next: RefCell<Option<AppError>>,
    next_id: Cell<u32>,
    // 记录调用过的操作
    pub calls: RefCell<Vec<String>>,
}

impl FakeIdentity {
    pub fn new() -> Self {
        Self {
            current: RefCell::new(None),
            accounts: RefCell::new(HashMap::new()),
            changes: Broadcaster::new(),
            fail_next: RefCell::new(None),
            next_id: Cell::new(1),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn add_account(&self, id: &str, email: &str, password: &str, verified: bool) -> Identity {
        let identity = Identity {
            id: id.to_string(),
            email: email.to_string(),
            email_verified: verified,
            display_name: None,
        };
        self.accounts
            .borrow_mut()
            .insert(email.to_string(), (password.to_string(), identity.clone()));
        identity
    }

    /// Signs in without credentials and notifies subscribers.
    pub fn force_sign_in(&self, id: &str, email: &str) -> Identity {
        let identity = self.add_account(id, email, "password", true);
        *self.current.borrow_mut() = Some(identity.clone());
        self.changes.publish(Some(identity.clone()));
        identity
    }

    pub fn set_verified(&self, email: &str) {
        if let Some((_, identity)) = self.accounts.borrow_mut().get_mut(email) {
            identity.email_verified = true;
        }
    }

    pub fn fail_next(&self, err: AppError) {
        *self.fail_next.borrow_mut() = Some(err);
    }

    pub fn emit_refresh(&self) {
        self.changes.publish(self.current.borrow().clone());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn enter(&self, op: &str) -> Result<()> {
        self.calls.borrow_mut().push(op.to_string());
        match self.fail_next.borrow_mut().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn signed_in(&self) -> Result<Identity> {
        self.current.borrow().clone().ok_or(AppError::NotAuthenticated)
    }
}

#[async_trait::async_trait(?Send)]
impl IdentityProvider for FakeIdentity {
    async fn create_account(&self, email: &str, password: &str) -> Result<Identity> {
        self.enter("create_account")?;
        if self.accounts.borrow().contains_key(email) {
            return Err(IdentityErrorCode::EmailExists.into());
        }
        let id = format!("u{}", self.next_id.get());
        self.next_id.set(self.next_id.get() + 1);
        let identity = self.add_account(&id, email, password, false);
        *self.current.borrow_mut() = Some(identity.clone());
        self.changes.publish(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity> {
        self.enter("sign_in")?;
        let identity = match self.accounts.borrow().get(email) {
            None => return Err(IdentityErrorCode::UserNotFound.into()),
            Some((stored, _)) if stored != password => {
                return Err(IdentityErrorCode::WrongPassword.into());
            }
            Some((_, identity)) => identity.clone(),
        };
        *self.current.borrow_mut() = Some(identity.clone());
        self.changes.publish(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<()> {
        self.enter("sign_out")?;
        *self.current.borrow_mut() = None;
        self.changes.publish(None);
        Ok(())
    }

    async fn send_verification_email(&self) -> Result<()> {
        self.enter("send_verification_email")?;
        self.signed_in().map(|_| ())
    }

    async fn send_password_reset(&self, email: &str) -> Result<()> {
        self.enter("send_password_reset")?;
        if !self.accounts.borrow().contains_key(email) {
            return Err(IdentityErrorCode::UserNotFound.into());
        }
        Ok(())
    }

    async fn delete_identity(&self) -> Result<()> {
        self.enter("delete_identity")?;
        let me = self.signed_in()?;
        self.accounts.borrow_mut().remove(&me.email);
        *self.current.borrow_mut() = None;
        self.changes.publish(None);
        Ok(())
    }

    async fn bearer_token(&self, _force_refresh: bool) -> Result<String> {
        if let Some(err) = self.fail_next.borrow_mut().take() {
            return Err(err);
        }
        self.signed_in().map(|me| format!("token-{}", me.id))
    }

    async fn update_display_name(&self, display_name: &str) -> Result<Identity> {
        self.enter("update_display_name")?;
        let mut me = self.signed_in()?;
        me.display_name = Some(display_name.to_string());
        if let Some((_, stored)) = self.accounts.borrow_mut().get_mut(&me.email) {
            stored.display_name = me.display_name.clone();
        }
        *self.current.borrow_mut() = Some(me.clone());
        self.changes.publish(Some(me.clone()));
        Ok(me)
    }

    async fn reload(&self) -> Result<Identity> {
        self.enter("reload")?;
        let me = self.signed_in()?;
        let fresh = self
            .accounts
            .borrow()
            .get(&me.email)
            .map(|(_, identity)| identity.clone())
            .unwrap_or(me);
        *self.current.borrow_mut() = Some(fresh.clone());
        self.changes.publish(Some(fresh.clone()));
        Ok(fresh)
    }

    async fn restore(&self) -> Result<Option<Identity>> {
        let current = self.current.borrow().clone();
        self.changes.publish(current.clone());
        Ok(current)
    }

    fn current(&self) -> Option<Identity> {
        self.current.borrow().clone()
    }

    fn subscribe(&self) -> (SubscriptionId, StateChanges) {
        self.changes.subscribe()
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.changes.unsubscribe(id)
    }
}

// =========================================================
// FakeBackend: 内存版资料/匹配 API
// =========================================================

pub struct FakeBackend {
    pub users: RefCell<HashMap<String, Profile>>,
    pub likes: RefCell<Vec<(String, String)>>,
    pub passes: RefCell<Vec<(String, String)>>,
    pub matches: RefCell<Vec<Match>>,
    pub reports: RefCell<Vec<ReportUserRequest>>,
    pub blocks: RefCell<Vec<(String, String)>>,
    pub heartbeats: Cell<usize>,
    // 覆盖候选列表，用于测试客户端过滤
    pub candidates_override: RefCell<Option<Vec<Profile>>>,
    // (Method, Path) 调用记录
    pub requests: RefCell<Vec<(HttpMethod, String)>>,
    // 每个请求响应前让出的次数，用于制造交错
    pub latency: Cell<usize>,
    failures: RefCell<HashMap<String, (u16, String)>>,
    network_down: Cell<bool>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            users: RefCell::new(HashMap::new()),
            likes: RefCell::new(Vec::new()),
            passes: RefCell::new(Vec::new()),
            matches: RefCell::new(Vec::new()),
            reports: RefCell::new(Vec::new()),
            blocks: RefCell::new(Vec::new()),
            heartbeats: Cell::new(0),
            candidates_override: RefCell::new(None),
            requests: RefCell::new(Vec::new()),
            latency: Cell::new(0),
            failures: RefCell::new(HashMap::new()),
            network_down: Cell::new(false),
        }
    }

    pub fn add_user(&self, profile: Profile) {
        self.users.borrow_mut().insert(profile.id.clone(), profile);
    }

    /// A user whose profile is complete and active.
    pub fn add_complete_user(&self, id: &str, first_name: &str) -> Profile {
        let mut profile = Profile::new(id);
        profile.first_name = first_name.to_string();
        profile.last_name = "Test".to_string();
        profile.email = Some(format!("{}@uom.lk", id));
        profile.profile_completed = true;
        self.add_user(profile.clone());
        profile
    }

    pub fn user(&self, id: &str) -> Option<Profile> {
        self.users.borrow().get(id).cloned()
    }

    pub fn fail(&self, path: &str, status: u16, message: &str) {
        self.failures
            .borrow_mut()
            .insert(path.to_string(), (status, message.to_string()));
    }

    pub fn recover(&self, path: &str) {
        self.failures.borrow_mut().remove(path);
    }

    pub fn set_network_down(&self, down: bool) {
        self.network_down.set(down);
    }

    pub fn count(&self, method: HttpMethod, path: &str) -> usize {
        self.requests
            .borrow()
            .iter()
            .filter(|(m, p)| *m == method && p == path)
            .count()
    }

    fn ok<T: Serialize>(data: T) -> HttpResponse {
        HttpResponse {
            status: 200,
            body: json!({ "status": "success", "data": data }).to_string(),
        }
    }

    fn ack() -> HttpResponse {
        HttpResponse {
            status: 200,
            body: json!({ "status": "success" }).to_string(),
        }
    }

    fn error(status: u16, message: &str) -> HttpResponse {
        HttpResponse {
            status,
            body: json!({ "status": "error", "message": message }).to_string(),
        }
    }

    fn caller(req: &HttpRequest) -> Option<String> {
        req.headers
            .get("Authorization")
            .and_then(|h| h.strip_prefix("Bearer token-"))
            .map(str::to_string)
    }

    fn body<T: serde::de::DeserializeOwned>(req: &HttpRequest) -> Option<T> {
        req.json_body().and_then(|s| serde_json::from_str(s).ok())
    }

    fn query(url: &str) -> HashMap<String, String> {
        url.split_once('?')
            .map(|(_, q)| q)
            .unwrap_or_default()
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn user_response(&self, uid: &str) -> HttpResponse {
        match self.user(uid) {
            Some(user) => Self::ok(UserData { user }),
            None => Self::error(404, "User not found"),
        }
    }

    fn patch_user(&self, uid: &str, patch: &ProfilePatch) -> HttpResponse {
        let mut users = self.users.borrow_mut();
        match users.get_mut(uid) {
            Some(user) => {
                user.apply(patch);
                Self::ok(UserData { user: user.clone() })
            }
            None => Self::error(404, "User not found"),
        }
    }

    fn route(&self, method: HttpMethod, path: &str, req: &HttpRequest) -> HttpResponse {
        // 注册接口用 body 中的 idToken 识别用户
        if method == HttpMethod::Post && path == RegisterRequest::PATH {
            let Some(reg) = Self::body::<RegisterRequest>(req) else {
                return Self::error(400, "Invalid body");
            };
            let Some(uid) = reg.id_token.strip_prefix("token-").map(str::to_string) else {
                return Self::error(401, "Invalid token");
            };
            if self.users.borrow().contains_key(&uid) {
                return Self::error(409, "User already exists");
            }
            let mut user = Profile::new(uid.clone());
            user.email = Some(reg.profile_data.email);
            user.first_name = reg.profile_data.first_name;
            user.last_name = reg.profile_data.last_name;
            user.display_name = reg.profile_data.display_name;
            self.add_user(user.clone());
            return HttpResponse {
                status: 201,
                body: json!({ "status": "success", "data": { "user": user } }).to_string(),
            };
        }

        let Some(uid) = Self::caller(req) else {
            return Self::error(401, "Unauthorized");
        };

        match (method, path) {
            (HttpMethod::Post, LoginRequest::PATH) | (HttpMethod::Get, CurrentUserRequest::PATH) => {
                self.user_response(&uid)
            }
            (HttpMethod::Post, LogoutRequest::PATH) => Self::ack(),
            (HttpMethod::Get, ProfileStatusRequest::PATH) => match self.user(&uid) {
                Some(user) => Self::ok(ProfileStatus {
                    profile_completed: user.profile_completed,
                    needs_onboarding: !user.profile_completed,
                    user: Some(user),
                }),
                None => Self::error(404, "User not found"),
            },
            (HttpMethod::Put, UpdateProfileRequest::PATH) => {
                let patch: ProfilePatch = Self::body(req).unwrap_or_default();
                self.patch_user(&uid, &patch)
            }
            (HttpMethod::Post, CompleteProfileRequest::PATH) => {
                let mut patch: ProfilePatch = Self::body(req).unwrap_or_default();
                patch.profile_completed = Some(true);
                self.patch_user(&uid, &patch)
            }
            (HttpMethod::Post, HeartbeatRequest::PATH) => {
                self.heartbeats.set(self.heartbeats.get() + 1);
                if let Some(user) = self.users.borrow_mut().get_mut(&uid) {
                    user.last_seen = Some(Utc::now());
                }
                Self::ack()
            }
            (HttpMethod::Post, ReportUserRequest::PATH) => match Self::body(req) {
                Some(report) => {
                    self.reports.borrow_mut().push(report);
                    Self::ack()
                }
                None => Self::error(400, "Invalid body"),
            },
            (HttpMethod::Post, BlockUserRequest::PATH) => {
                match Self::body::<BlockUserRequest>(req) {
                    Some(block) => {
                        self.blocks.borrow_mut().push((uid, block.blocked_user_id));
                        Self::ack()
                    }
                    None => Self::error(400, "Invalid body"),
                }
            }
            (HttpMethod::Post, PROFILE_IMAGE_UPLOAD_PATH) => match &req.body {
                Some(HttpBody::Multipart(form)) => {
                    let Some((_, file)) = form.files.iter().find(|(n, _)| n == PROFILE_IMAGE_FIELD)
                    else {
                        return Self::error(400, "No image uploaded");
                    };
                    let image_url = format!("https://cdn.test/{}/{}", uid, file.file_name);
                    let patch = ProfilePatch {
                        profile_image: Some(image_url.clone()),
                        ..Default::default()
                    };
                    self.patch_user(&uid, &patch);
                    Self::ok(ImageUpload { image_url })
                }
                _ => Self::error(400, "No image uploaded"),
            },
            (HttpMethod::Get, PotentialMatchesRequest::PATH) => {
                let limit = Self::query(&req.url)
                    .get("limit")
                    .and_then(|l| l.parse().ok())
                    .unwrap_or(10);
                let matches = match self.candidates_override.borrow().clone() {
                    Some(list) => list,
                    None => self.server_candidates(&uid, limit),
                };
                Self::ok(CandidateList { matches })
            }
            (HttpMethod::Post, LikeRequest::PATH) => match Self::body::<LikeRequest>(req) {
                Some(like) => self.record_like(&uid, &like.user_id),
                None => Self::error(400, "Invalid body"),
            },
            (HttpMethod::Post, PassRequest::PATH) => match Self::body::<PassRequest>(req) {
                Some(pass) => {
                    self.passes.borrow_mut().push((uid, pass.user_id));
                    Self::ack()
                }
                None => Self::error(400, "Invalid body"),
            },
            (HttpMethod::Get, MatchesRequest::PATH) => {
                let users = self.users.borrow();
                let matches: Vec<Match> = self
                    .matches
                    .borrow()
                    .iter()
                    .filter_map(|m| {
                        let other = m.other_user_id(&uid)?;
                        let mut m = m.clone();
                        m.other_user = users.get(other).cloned();
                        Some(m)
                    })
                    .collect();
                Self::ok(MatchList { matches })
            }
            _ => Self::error(404, "Route not found"),
        }
    }

    fn server_candidates(&self, uid: &str, limit: usize) -> Vec<Profile> {
        let decided: Vec<String> = self
            .likes
            .borrow()
            .iter()
            .chain(self.passes.borrow().iter())
            .filter(|(from, _)| from == uid)
            .map(|(_, to)| to.clone())
            .collect();
        let mut candidates: Vec<Profile> = self
            .users
            .borrow()
            .values()
            .filter(|p| p.id != uid && p.profile_completed && p.is_active)
            .filter(|p| !decided.contains(&p.id))
            .cloned()
            .collect();
        candidates.sort_by(|a, b| a.id.cmp(&b.id));
        candidates.truncate(limit);
        candidates
    }

    fn record_like(&self, from: &str, to: &str) -> HttpResponse {
        if !self.users.borrow().contains_key(to) {
            return Self::error(404, "User not found");
        }
        let mut likes = self.likes.borrow_mut();
        if !likes.iter().any(|(f, t)| f == from && t == to) {
            likes.push((from.to_string(), to.to_string()));
        }
        let mutual = likes.iter().any(|(f, t)| f == to && t == from);
        drop(likes);

        if !mutual {
            return Self::ok(LikeOutcome::default());
        }

        let mut matches = self.matches.borrow_mut();
        let existing = matches.iter().find(|m| m.joins(from, to)).cloned();
        let created = match existing {
            Some(m) => m,
            None => {
                let m = Match {
                    id: format!("m{}", matches.len() + 1),
                    user_ids: [from.to_string(), to.to_string()],
                    created_at: Some(Utc::now()),
                    ..Default::default()
                };
                matches.push(m.clone());
                m
            }
        };
        Self::ok(LikeOutcome {
            is_match: true,
            created_match: Some(created),
        })
    }
}

#[async_trait::async_trait(?Send)]
impl HttpClient for FakeBackend {
    async fn send(&self, req: HttpRequest) -> Result<HttpResponse> {
        let Some(rest) = req.url.strip_prefix(API_BASE) else {
            return Err(AppError::network(format!("unknown host: {}", req.url)));
        };
        let path = rest.split('?').next().unwrap_or_default().to_string();
        self.requests.borrow_mut().push((req.method, path.clone()));

        for _ in 0..self.latency.get() {
            tokio::task::yield_now().await;
        }

        if self.network_down.get() {
            return Err(AppError::network("connection refused"));
        }
        if let Some((status, message)) = self.failures.borrow().get(&path) {
            return Ok(Self::error(*status, message));
        }
        Ok(self.route(req.method, &path, &req))
    }
}

// =========================================================
// ManualTicker
// =========================================================

#[derive(Default)]
pub struct ManualTicker {
    senders: RefCell<Vec<UnboundedSender<()>>>,
    pub periods: RefCell<Vec<Duration>>,
}

impl ManualTicker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&self) {
        self.senders
            .borrow_mut()
            .retain(|tx| tx.unbounded_send(()).is_ok());
    }

    /// Number of tick streams still held by a consumer.
    pub fn active(&self) -> usize {
        let mut senders = self.senders.borrow_mut();
        senders.retain(|tx| !tx.is_closed());
        senders.len()
    }
}

impl Ticker for ManualTicker {
    fn ticks(&self, period: Duration) -> LocalBoxStream<'static, ()> {
        let (tx, rx) = unbounded();
        self.senders.borrow_mut().push(tx);
        self.periods.borrow_mut().push(period);
        rx.boxed_local()
    }
}
