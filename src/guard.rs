//! 路由守卫与导航器
//!
//! 检查顺序固定：配置 → 会话加载 → 身份 → 服务端资料状态。
//! 结论确定之前视图始终为 `Loading`，受保护内容不会提前显示。

pub mod route;

use crate::api::ProfileApi;
use crate::error::Result;
use crate::request::HttpClient;
use crate::session::{SessionState, SessionStore};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::{debug, info, warn};
use unimatch_shared::protocol::ProfileStatus;

pub use route::AppRoute;

/// 外壳应渲染的视图
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Loading,
    Show(AppRoute),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Allow(AppRoute),
    Redirect(AppRoute),
    /// 会话尚未确定
    Wait,
    /// 本地检查已通过，等待服务端结论
    CheckProfileStatus(AppRoute),
}

/// 守卫的本地部分，不访问网络
pub fn evaluate(route: AppRoute, setup_required: bool, session: &SessionState) -> GuardDecision {
    if setup_required {
        return GuardDecision::Allow(AppRoute::SetupRequired);
    }
    match route {
        AppRoute::SetupRequired | AppRoute::NotFound => {
            return GuardDecision::Redirect(AppRoute::Landing);
        }
        _ => {}
    }

    let gated = route.requires_identity() || route.should_redirect_when_authenticated();
    if gated && session.is_loading {
        return GuardDecision::Wait;
    }

    let signed_in = session.identity.is_some();
    if route.requires_identity() && !signed_in {
        return GuardDecision::Redirect(AppRoute::auth_failure_redirect());
    }
    if route.should_redirect_when_authenticated() && signed_in {
        return GuardDecision::Redirect(AppRoute::auth_success_redirect());
    }
    if route.requires_complete_profile() {
        return GuardDecision::CheckProfileStatus(route);
    }
    GuardDecision::Allow(route)
}

/// 需要完整资料的路由的服务端判定，出错按未完成处理
pub fn resolve_profile_status(route: AppRoute, status: &Result<ProfileStatus>) -> GuardDecision {
    match status {
        Ok(status) if status.profile_completed => GuardDecision::Allow(route),
        Ok(_) => GuardDecision::Redirect(AppRoute::incomplete_profile_redirect()),
        Err(err) => {
            warn!(error = %err, "profile status check failed, treating as incomplete");
            GuardDecision::Redirect(AppRoute::incomplete_profile_redirect())
        }
    }
}

// =========================================================
// 导航器 (Navigator)
// =========================================================

// 重定向链的上限，防止配置错误导致死循环
const MAX_REDIRECTS: usize = 4;

pub struct Navigator<C> {
    session: Rc<SessionStore<C>>,
    api: Rc<ProfileApi<C>>,
    setup_required: bool,
    requested: Cell<AppRoute>,
    view: RefCell<View>,
    navigation: Cell<u64>,
}

impl<C: HttpClient> Navigator<C> {
    pub fn new(session: Rc<SessionStore<C>>, api: Rc<ProfileApi<C>>, setup_required: bool) -> Self {
        Self {
            session,
            api,
            setup_required,
            requested: Cell::new(AppRoute::default()),
            view: RefCell::new(View::Loading),
            navigation: Cell::new(0),
        }
    }

    pub fn view(&self) -> View {
        *self.view.borrow()
    }

    /// 最近一次请求的路由 (重定向之前)
    pub fn requested(&self) -> AppRoute {
        self.requested.get()
    }

    pub async fn navigate(&self, path: &str) -> View {
        self.navigate_to(AppRoute::from_path(path)).await
    }

    /// Re-runs the guards for the last requested route, e.g. after the
    /// session finished loading or the identity changed.
    pub async fn reevaluate(&self) -> View {
        self.navigate_to(self.requested.get()).await
    }

    pub async fn navigate_to(&self, target: AppRoute) -> View {
        let navigation = self.navigation.get() + 1;
        self.navigation.set(navigation);
        self.requested.set(target);

        let mut route = target;
        for _ in 0..MAX_REDIRECTS {
            let decision = evaluate(route, self.setup_required, &self.session.snapshot());
            let decision = match decision {
                GuardDecision::CheckProfileStatus(gated) => {
                    self.set_view(View::Loading);
                    let status = self.api.profile_status().await;
                    if self.navigation.get() != navigation {
                        debug!(route = %gated, "dropping stale guard result");
                        return self.view();
                    }
                    resolve_profile_status(gated, &status)
                }
                other => other,
            };

            match decision {
                GuardDecision::Allow(allowed) => {
                    self.set_view(View::Show(allowed));
                    return self.view();
                }
                GuardDecision::Redirect(next) => {
                    info!(from = %route, to = %next, "redirecting");
                    route = next;
                }
                GuardDecision::Wait | GuardDecision::CheckProfileStatus(_) => {
                    self.set_view(View::Loading);
                    return self.view();
                }
            }
        }

        warn!(route = %target, "redirect limit reached");
        self.set_view(View::Show(AppRoute::Landing));
        self.view()
    }

    fn set_view(&self, view: View) {
        *self.view.borrow_mut() = view;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityProvider;
    use crate::testing::{API_BASE, FakeBackend, FakeIdentity, settle};
    use std::time::Duration;
    use unimatch_shared::protocol::{ApiRequest, ProfileStatusRequest};
    use unimatch_shared::{Identity, Profile};

    fn signed_in(completed: bool) -> SessionState {
        let mut profile = Profile::new("u1");
        profile.profile_completed = completed;
        SessionState {
            identity: Some(Identity {
                id: "u1".into(),
                email: "alice@uom.lk".into(),
                email_verified: true,
                display_name: None,
            }),
            profile: Some(profile),
            is_loading: false,
        }
    }

    fn signed_out() -> SessionState {
        SessionState {
            is_loading: false,
            ..Default::default()
        }
    }

    // ---------------------------------------------------------
    // evaluate()
    // ---------------------------------------------------------

    #[test]
    fn test_setup_required_wins_everywhere() {
        for route in [AppRoute::Landing, AppRoute::Dashboard, AppRoute::Login] {
            assert_eq!(
                evaluate(route, true, &signed_in(true)),
                GuardDecision::Allow(AppRoute::SetupRequired)
            );
        }
    }

    #[test]
    fn test_loading_waits_for_gated_routes_only() {
        let loading = SessionState::default();
        assert_eq!(evaluate(AppRoute::Chats, false, &loading), GuardDecision::Wait);
        assert_eq!(evaluate(AppRoute::Login, false, &loading), GuardDecision::Wait);
        assert_eq!(
            evaluate(AppRoute::Landing, false, &loading),
            GuardDecision::Allow(AppRoute::Landing)
        );
    }

    #[test]
    fn test_identity_gate() {
        assert_eq!(
            evaluate(AppRoute::ProfileSetup, false, &signed_out()),
            GuardDecision::Redirect(AppRoute::Login)
        );
        assert_eq!(
            evaluate(AppRoute::Dashboard, false, &signed_out()),
            GuardDecision::Redirect(AppRoute::Login)
        );
        assert_eq!(
            evaluate(AppRoute::ProfileSetup, false, &signed_in(false)),
            GuardDecision::Allow(AppRoute::ProfileSetup)
        );
    }

    #[test]
    fn test_cached_flag_never_skips_server_check() {
        assert_eq!(
            evaluate(AppRoute::Chats, false, &signed_in(true)),
            GuardDecision::CheckProfileStatus(AppRoute::Chats)
        );
    }

    #[test]
    fn test_auth_pages_redirect_when_signed_in() {
        assert_eq!(
            evaluate(AppRoute::Signup, false, &signed_in(false)),
            GuardDecision::Redirect(AppRoute::Dashboard)
        );
        assert_eq!(
            evaluate(AppRoute::Login, false, &signed_out()),
            GuardDecision::Allow(AppRoute::Login)
        );
    }

    #[test]
    fn test_unknown_paths_go_home() {
        assert_eq!(
            evaluate(AppRoute::NotFound, false, &signed_out()),
            GuardDecision::Redirect(AppRoute::Landing)
        );
    }

    #[test]
    fn test_status_failure_fails_closed() {
        let err = Err(crate::error::AppError::network("offline"));
        assert_eq!(
            resolve_profile_status(AppRoute::Dashboard, &err),
            GuardDecision::Redirect(AppRoute::ProfileSetup)
        );
    }

    // ---------------------------------------------------------
    // Navigator
    // ---------------------------------------------------------

    struct Fixture {
        identity: Rc<FakeIdentity>,
        backend: Rc<FakeBackend>,
        session: Rc<SessionStore<Rc<FakeBackend>>>,
        navigator: Navigator<Rc<FakeBackend>>,
    }

    fn fixture() -> Fixture {
        let identity = Rc::new(FakeIdentity::new());
        let backend = Rc::new(FakeBackend::new());
        let api = Rc::new(ProfileApi::new(backend.clone(), API_BASE, identity.clone()));
        let session = Rc::new(SessionStore::new(
            identity.clone(),
            api.clone(),
            Duration::from_secs(300),
        ));
        session.init();
        let navigator = Navigator::new(session.clone(), api, false);
        Fixture {
            identity,
            backend,
            session,
            navigator,
        }
    }

    async fn sign_in(f: &Fixture, completed: bool) {
        let mut profile = f.backend.add_complete_user("u1", "Alice");
        profile.profile_completed = completed;
        f.backend.add_user(profile);
        f.identity.force_sign_in("u1", "alice@uom.lk");
        f.session.process_pending().await;
    }

    #[tokio::test]
    async fn test_loading_then_redirect_to_login() {
        let f = fixture();
        assert_eq!(f.navigator.navigate("/chats").await, View::Loading);

        f.identity.restore().await.unwrap();
        f.session.process_pending().await;
        assert_eq!(f.navigator.reevaluate().await, View::Show(AppRoute::Login));
        assert_eq!(f.navigator.requested(), AppRoute::Chats);
    }

    #[tokio::test]
    async fn test_complete_profile_is_admitted() {
        let f = fixture();
        sign_in(&f, true).await;
        assert_eq!(
            f.navigator.navigate("/dashboard").await,
            View::Show(AppRoute::Dashboard)
        );
    }

    #[tokio::test]
    async fn test_server_check_overrides_cached_flag() {
        let f = fixture();
        sign_in(&f, true).await;
        assert!(f.session.snapshot().is_profile_complete());

        f.backend.users.borrow_mut().get_mut("u1").unwrap().profile_completed = false;
        assert_eq!(
            f.navigator.navigate("/chats").await,
            View::Show(AppRoute::ProfileSetup)
        );
    }

    #[tokio::test]
    async fn test_status_error_redirects_to_setup() {
        let f = fixture();
        sign_in(&f, true).await;
        f.backend.fail(ProfileStatusRequest::PATH, 503, "Service unavailable");

        assert_eq!(
            f.navigator.navigate("/dashboard").await,
            View::Show(AppRoute::ProfileSetup)
        );
    }

    #[tokio::test]
    async fn test_view_is_loading_during_server_check() {
        let f = fixture();
        sign_in(&f, true).await;
        f.backend.latency.set(50);

        tokio::join!(f.navigator.navigate("/chats"), async {
            settle().await;
            assert_eq!(f.navigator.view(), View::Loading);
        });
        assert_eq!(f.navigator.view(), View::Show(AppRoute::Chats));
    }

    #[tokio::test]
    async fn test_newer_navigation_wins() {
        let f = fixture();
        sign_in(&f, false).await;
        f.backend.latency.set(5);

        let (slow, fast) = tokio::join!(
            f.navigator.navigate("/dashboard"),
            f.navigator.navigate("/")
        );

        assert_eq!(fast, View::Show(AppRoute::Landing));
        assert_eq!(slow, View::Show(AppRoute::Landing));
        assert_eq!(f.navigator.view(), View::Show(AppRoute::Landing));
    }

    #[tokio::test]
    async fn test_login_page_bounces_to_dashboard() {
        let f = fixture();
        sign_in(&f, true).await;
        assert_eq!(
            f.navigator.navigate("/login").await,
            View::Show(AppRoute::Dashboard)
        );
    }

    #[tokio::test]
    async fn test_setup_required_navigator() {
        let f = fixture();
        let api = Rc::new(ProfileApi::new(
            f.backend.clone(),
            API_BASE,
            f.identity.clone(),
        ));
        let navigator = Navigator::new(f.session.clone(), api, true);
        assert_eq!(
            navigator.navigate("/dashboard").await,
            View::Show(AppRoute::SetupRequired)
        );
    }
}
