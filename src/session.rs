//! 会话存储
//!
//! 缓存当前身份与资料，供各页面读取：
//! - 身份变化触发资料同步
//! - 写入方以补丁合并资料，不整体替换
//! - 登录期间定时发送心跳

use crate::api::ProfileApi;
use crate::broadcast::{Broadcaster, SubscriptionId};
use crate::error::Result;
use crate::identity::{IdentityProvider, StateChanges};
use crate::request::HttpClient;
use crate::ticker::Ticker;
use futures::StreamExt;
use futures::channel::mpsc::UnboundedReceiver;
use futures::future::{Either, select};
use futures::stream::LocalBoxStream;
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info, warn};
use unimatch_shared::{Identity, Profile, ProfilePatch};

#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub identity: Option<Identity>,
    pub profile: Option<Profile>,
    /// 首次身份变化处理完之前为 true
    pub is_loading: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            identity: None,
            profile: None,
            is_loading: true,
        }
    }
}

impl SessionState {
    pub fn is_profile_complete(&self) -> bool {
        self.profile.as_ref().is_some_and(|p| p.profile_completed)
    }
}

enum RunEvent {
    Change(Option<Option<Identity>>),
    Tick(bool),
}

pub struct SessionStore<C> {
    identity: Rc<dyn IdentityProvider>,
    api: Rc<ProfileApi<C>>,
    state: RefCell<SessionState>,
    watchers: Broadcaster<SessionState>,
    changes: RefCell<Option<StateChanges>>,
    subscription: Cell<Option<SubscriptionId>>,
    // 每次身份变化递增，过期的同步结果直接丢弃
    generation: Cell<u64>,
    registered: RefCell<HashSet<String>>,
    heartbeat_interval: Duration,
}

impl<C: HttpClient> SessionStore<C> {
    pub fn new(
        identity: Rc<dyn IdentityProvider>,
        api: Rc<ProfileApi<C>>,
        heartbeat_interval: Duration,
    ) -> Self {
        let watchers = Broadcaster::new();
        watchers.publish(SessionState::default());
        Self {
            identity,
            api,
            state: RefCell::new(SessionState::default()),
            watchers,
            changes: RefCell::new(None),
            subscription: Cell::new(None),
            generation: Cell::new(0),
            registered: RefCell::new(HashSet::new()),
            heartbeat_interval,
        }
    }

    // =========================================================
    // 生命周期 (Lifecycle)
    // =========================================================

    /// 订阅身份变化 (可重复调用)
    pub fn init(&self) {
        if self.subscription.get().is_some() {
            return;
        }
        let (id, changes) = self.identity.subscribe();
        self.subscription.set(Some(id));
        *self.changes.borrow_mut() = Some(changes);
        debug!("session store subscribed to identity changes");
    }

    /// 取消订阅。正在运行的 `run()` 会收到流结束并退出，心跳定时器随之释放。
    pub fn dispose(&self) {
        if let Some(id) = self.subscription.take() {
            self.identity.unsubscribe(id);
        }
        self.changes.borrow_mut().take();
        debug!("session store disposed");
    }

    /// 处理队列中已有的全部变化，返回处理数量
    pub async fn process_pending(&self) -> usize {
        let mut handled = 0;
        loop {
            let next = self
                .changes
                .borrow_mut()
                .as_mut()
                .and_then(|rx| rx.try_next().ok().flatten());
            match next {
                Some(change) => {
                    self.handle_identity_change(change).await;
                    handled += 1;
                }
                None => return handled,
            }
        }
    }

    /// 主循环：处理身份变化与心跳，直到 `dispose()`
    pub async fn run<T: Ticker + ?Sized>(&self, ticker: &T) {
        let Some(mut changes) = self.changes.borrow_mut().take() else {
            warn!("session store run() called before init()");
            return;
        };
        let mut heartbeat: Option<LocalBoxStream<'static, ()>> = None;

        loop {
            let signed_in = self.state.borrow().identity.is_some();
            if signed_in && heartbeat.is_none() {
                debug!(interval = ?self.heartbeat_interval, "starting heartbeat");
                heartbeat = Some(ticker.ticks(self.heartbeat_interval));
                self.send_heartbeat().await;
            } else if !signed_in && heartbeat.is_some() {
                debug!("stopping heartbeat");
                heartbeat = None;
            }

            let event = match heartbeat.as_mut() {
                Some(ticks) => match select(changes.next(), ticks.next()).await {
                    Either::Left((change, _)) => RunEvent::Change(change),
                    Either::Right((tick, _)) => RunEvent::Tick(tick.is_some()),
                },
                None => RunEvent::Change(changes.next().await),
            };

            match event {
                RunEvent::Change(Some(change)) => self.handle_identity_change(change).await,
                RunEvent::Change(None) => break,
                RunEvent::Tick(true) => self.send_heartbeat().await,
                RunEvent::Tick(false) => {
                    warn!("heartbeat ticker ended");
                    heartbeat = Some(futures::stream::pending().boxed_local());
                }
            }
        }
        debug!("session loop finished");
    }

    // =========================================================
    // 身份同步 (Identity Sync)
    // =========================================================

    pub async fn handle_identity_change(&self, change: Option<Identity>) {
        let generation = self.generation.get() + 1;
        self.generation.set(generation);

        let Some(identity) = change else {
            info!("signed out");
            self.update(|state| {
                state.identity = None;
                state.profile = None;
                state.is_loading = false;
            });
            return;
        };

        self.update(|state| {
            if state.profile.as_ref().is_some_and(|p| p.id != identity.id) {
                state.profile = None;
            }
            state.identity = Some(identity.clone());
        });

        let profile = self.sync_profile(&identity).await;
        if self.generation.get() != generation {
            debug!(user = %identity.id, "dropping stale profile sync");
            return;
        }

        self.update(|state| {
            state.profile = profile;
            state.is_loading = false;
        });
    }

    async fn sync_profile(&self, identity: &Identity) -> Option<Profile> {
        let err = match self.api.login().await {
            Ok(profile) => return Some(profile),
            Err(err) => err,
        };

        let first_attempt = err.is_user_not_found()
            && self.registered.borrow_mut().insert(identity.id.clone());
        if !first_attempt {
            warn!(user = %identity.id, error = %err, "profile sync failed");
            return None;
        }

        // 注册时使用最新的身份 (显示名可能已更新)
        let latest = self
            .identity
            .current()
            .filter(|current| current.id == identity.id)
            .unwrap_or_else(|| identity.clone());
        info!(user = %identity.id, "no profile on server, registering");
        match self.api.register(&latest).await {
            Ok(profile) => Some(profile),
            Err(err) => {
                warn!(user = %identity.id, error = %err, "automatic registration failed");
                None
            }
        }
    }

    // =========================================================
    // 写入 (Writers)
    // =========================================================

    /// 将补丁合并进缓存的资料
    pub fn patch_profile(&self, patch: &ProfilePatch) {
        self.update(|state| match state.profile.as_mut() {
            Some(profile) => profile.apply(patch),
            None => debug!("patch ignored, no cached profile"),
        });
    }

    /// 重新拉取当前用户的资料
    pub async fn refresh_profile(&self) -> Result<Option<Profile>> {
        if self.current_identity().is_none() {
            return Ok(None);
        }
        let generation = self.generation.get();
        let profile = self.api.current_user().await?;
        if self.generation.get() == generation {
            self.update(|state| state.profile = Some(profile.clone()));
        }
        Ok(Some(profile))
    }

    pub async fn send_heartbeat(&self) {
        match self.api.heartbeat().await {
            Ok(()) => debug!("heartbeat sent"),
            Err(err) => warn!(error = %err, "heartbeat failed"),
        }
    }

    fn update(&self, f: impl FnOnce(&mut SessionState)) {
        let snapshot = {
            let mut state = self.state.borrow_mut();
            f(&mut state);
            state.clone()
        };
        self.watchers.publish(snapshot);
    }

    // =========================================================
    // 读取 (Readers)
    // =========================================================

    pub fn current_identity(&self) -> Option<Identity> {
        self.state.borrow().identity.clone()
    }

    pub fn current_profile(&self) -> Option<Profile> {
        self.state.borrow().profile.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// 状态快照流，首个元素为当前状态
    pub fn watch(&self) -> (SubscriptionId, UnboundedReceiver<SessionState>) {
        self.watchers.subscribe()
    }

    pub fn unwatch(&self, id: SubscriptionId) {
        self.watchers.unsubscribe(id)
    }
}
