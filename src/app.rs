//! 组合根
//!
//! 由 `RuntimeConfig` 构建所有服务，各服务只创建一次并以引用共享，不使用全局状态。

use crate::account::AccountService;
use crate::api::ProfileApi;
use crate::browse::MatchWorkflow;
use crate::config::RuntimeConfig;
use crate::guard::Navigator;
use crate::identity::firebase::FirebaseIdentityClient;
use crate::identity::{CredentialStore, IdentityProvider};
use crate::matches::MatchesList;
use crate::onboarding::ProfileWizard;
use crate::request::HttpClient;
use crate::session::SessionStore;
use crate::settings::SettingsService;
use crate::ticker::Ticker;
use std::rc::Rc;
use tracing::{info, warn};

pub struct AppContext<C> {
    pub config: RuntimeConfig,
    pub identity: Rc<dyn IdentityProvider>,
    pub api: Rc<ProfileApi<C>>,
    pub session: Rc<SessionStore<C>>,
    pub navigator: Navigator<C>,
    pub accounts: AccountService<C>,
    pub settings: SettingsService<C>,
    pub matches: MatchesList<C>,
}

impl<C: HttpClient + Clone + 'static> AppContext<C> {
    /// 使用 Firebase 身份客户端，与 API 共用 `http`
    pub fn new<S: CredentialStore + 'static>(config: RuntimeConfig, http: C, store: S) -> Self {
        let identity: Rc<dyn IdentityProvider> =
            Rc::new(FirebaseIdentityClient::new(http.clone(), store, &config));
        Self::with_identity(config, http, identity)
    }
}

impl<C: HttpClient> AppContext<C> {
    pub fn with_identity(config: RuntimeConfig, http: C, identity: Rc<dyn IdentityProvider>) -> Self {
        let missing = config.missing_credentials();
        if !missing.is_empty() {
            warn!(?missing, "identity provider not configured, showing setup screen");
        }

        let api = Rc::new(ProfileApi::new(http, &config.api_url, identity.clone()));
        let session = Rc::new(SessionStore::new(
            identity.clone(),
            api.clone(),
            config.heartbeat_interval,
        ));
        let navigator = Navigator::new(session.clone(), api.clone(), !missing.is_empty());
        let accounts = AccountService::new(
            identity.clone(),
            api.clone(),
            session.clone(),
            &config.university_domain,
        );
        let settings = SettingsService::new(api.clone(), session.clone());
        let matches = MatchesList::new(api.clone());

        Self {
            config,
            identity,
            api,
            session,
            navigator,
            accounts,
            settings,
            matches,
        }
    }

    pub fn setup_required(&self) -> bool {
        !self.config.is_identity_configured()
    }

    /// 订阅会话并恢复已持久化的身份
    pub async fn start(&self) {
        self.session.init();
        match self.identity.restore().await {
            Ok(Some(identity)) => info!(user = %identity.id, "session restored"),
            Ok(None) => info!("no stored session"),
            Err(err) => warn!(error = %err, "session restore failed"),
        }
        self.session.process_pending().await;
    }

    /// 会话主循环，直到 `shutdown()`
    pub async fn run<T: Ticker + ?Sized>(&self, ticker: &T) {
        self.session.run(ticker).await
    }

    pub fn shutdown(&self) {
        self.session.dispose();
    }

    /// 创建资料向导，并预填会话中已有的资料
    pub fn profile_wizard(&self) -> ProfileWizard<C> {
        let wizard = ProfileWizard::new(
            self.api.clone(),
            self.session.clone(),
            self.config.completion_policy,
        );
        if let Some(profile) = self.session.current_profile() {
            wizard.preload_from(&profile);
        }
        wizard
    }

    /// 当前用户的候选浏览；未登录时为 `None`
    pub fn match_workflow(&self) -> Option<MatchWorkflow<C>> {
        let me = self.session.current_identity()?;
        Some(MatchWorkflow::new(self.api.clone(), &me.id))
    }
}
