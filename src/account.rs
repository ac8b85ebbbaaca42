//! 账号流程：注册、登录、登出、重置密码、邮箱验证与注销
//!
//! 凭证先在本地校验，通过后才会请求身份服务。

use crate::api::ProfileApi;
use crate::error::{AppError, Result};
use crate::guard::AppRoute;
use crate::identity::IdentityProvider;
use crate::request::HttpClient;
use crate::session::SessionStore;
use regex::Regex;
use std::cell::Cell;
use std::rc::Rc;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{info, warn};
use unimatch_shared::{Identity, Timestamp};

pub const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";
pub const MIN_PASSWORD_LEN: usize = 6;
pub const VERIFICATION_RESEND_COOLDOWN: Duration = Duration::from_secs(60);

pub const MSG_MISSING_FIELDS: &str = "Please fill in all fields";
pub const MSG_INVALID_EMAIL: &str = "Please enter a valid email address";
pub const MSG_SIGNUP_DOMAIN: &str = "Only University of Moratuwa email addresses are allowed";
pub const MSG_SHORT_PASSWORD: &str = "Password must be at least 6 characters";
pub const MSG_RESEND_COOLDOWN: &str = "Please wait before requesting another verification email";

static EMAIL_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(EMAIL_PATTERN).ok());

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.as_ref().is_some_and(|re| re.is_match(email))
}

pub fn is_university_email(email: &str, domain: &str) -> bool {
    email
        .to_ascii_lowercase()
        .ends_with(&format!("@{}", domain.to_ascii_lowercase()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialForm {
    Signup,
    Login,
}

/// 本地凭证校验，顺序与界面提示一致
pub fn check_credentials(
    form: CredentialForm,
    email: &str,
    password: &str,
    domain: &str,
) -> Result<()> {
    let email = email.trim();
    if email.is_empty() || password.is_empty() {
        return Err(AppError::validation(MSG_MISSING_FIELDS));
    }
    if !is_valid_email(email) {
        return Err(AppError::validation(MSG_INVALID_EMAIL));
    }
    if !is_university_email(email, domain) {
        return Err(AppError::validation(match form {
            CredentialForm::Signup => MSG_SIGNUP_DOMAIN.to_string(),
            CredentialForm::Login => format!(
                "Please use your University of Moratuwa email address (@{})",
                domain
            ),
        }));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(MSG_SHORT_PASSWORD));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoginOutcome {
    pub identity: Identity,
    /// 资料完整时进入聊天，否则进入资料向导
    pub next: AppRoute,
}

pub struct AccountService<C> {
    identity: Rc<dyn IdentityProvider>,
    api: Rc<ProfileApi<C>>,
    session: Rc<SessionStore<C>>,
    university_domain: String,
    verification_sent_at: Cell<Option<Timestamp>>,
}

impl<C: HttpClient> AccountService<C> {
    pub fn new(
        identity: Rc<dyn IdentityProvider>,
        api: Rc<ProfileApi<C>>,
        session: Rc<SessionStore<C>>,
        university_domain: &str,
    ) -> Self {
        Self {
            identity,
            api,
            session,
            university_domain: university_domain.to_string(),
            verification_sent_at: Cell::new(None),
        }
    }

    pub async fn signup(&self, email: &str, password: &str, display_name: &str) -> Result<Identity> {
        if display_name.trim().is_empty() {
            return Err(AppError::validation(MSG_MISSING_FIELDS));
        }
        check_credentials(CredentialForm::Signup, email, password, &self.university_domain)?;

        let mut identity = self.identity.create_account(email.trim(), password).await?;
        info!(user = %identity.id, "account created");

        match self.identity.update_display_name(display_name.trim()).await {
            Ok(updated) => identity = updated,
            Err(err) => warn!(error = %err, "setting display name failed"),
        }
        match self.identity.send_verification_email().await {
            Ok(()) => self.verification_sent_at.set(Some(Timestamp::now())),
            Err(err) => warn!(error = %err, "sending verification email failed"),
        }
        Ok(identity)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome> {
        check_credentials(CredentialForm::Login, email, password, &self.university_domain)?;

        let identity = self.identity.sign_in(email.trim(), password).await?;
        let complete = match self.api.profile_status().await {
            Ok(status) => status.profile_completed,
            Err(err) => {
                warn!(error = %err, "profile status unavailable after login");
                self.session
                    .current_profile()
                    .is_some_and(|p| p.id == identity.id && p.profile_completed)
            }
        };

        let next = if complete {
            AppRoute::Chats
        } else {
            AppRoute::ProfileSetup
        };
        info!(user = %identity.id, next = %next, "signed in");
        Ok(LoginOutcome { identity, next })
    }

    /// 先通知 API (失败忽略)，再结束身份会话
    pub async fn logout(&self) -> Result<()> {
        if self.identity.current().is_some()
            && let Err(err) = self.api.logout().await
        {
            warn!(error = %err, "api logout failed");
        }
        self.identity.sign_out().await
    }

    pub async fn reset_password(&self, email: &str) -> Result<()> {
        let email = email.trim();
        if email.is_empty() {
            return Err(AppError::validation(MSG_MISSING_FIELDS));
        }
        if !is_valid_email(email) {
            return Err(AppError::validation(MSG_INVALID_EMAIL));
        }
        self.identity.send_password_reset(email).await
    }

    /// 距离可再次发送验证邮件的剩余时间
    pub fn resend_available_in(&self) -> Duration {
        let Some(sent) = self.verification_sent_at.get() else {
            return Duration::ZERO;
        };
        let ready = (sent + VERIFICATION_RESEND_COOLDOWN).as_millis();
        let left = ready - Timestamp::now().as_millis();
        Duration::from_millis(u64::try_from(left).unwrap_or(0))
    }

    pub async fn resend_verification(&self) -> Result<()> {
        if !self.resend_available_in().is_zero() {
            return Err(AppError::validation(MSG_RESEND_COOLDOWN));
        }
        self.identity.send_verification_email().await?;
        self.verification_sent_at.set(Some(Timestamp::now()));
        Ok(())
    }

    /// 重新加载身份并返回邮箱是否已验证
    pub async fn check_email_verified(&self) -> Result<bool> {
        Ok(self.identity.reload().await?.email_verified)
    }

    pub async fn delete_account(&self) -> Result<()> {
        let Some(me) = self.identity.current() else {
            return Err(AppError::NotAuthenticated);
        };
        self.identity.delete_identity().await?;
        info!(user = %me.id, "account deleted");
        Ok(())
    }
}
