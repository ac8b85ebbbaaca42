//! 路由定义模块 - 领域模型
//!
//! 纯业务逻辑，不依赖 DOM。定义应用的所有路由及其守卫属性。

use std::fmt::Display;

/// 应用路由枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AppRoute {
    /// 落地页 (默认路由)
    #[default]
    Landing,
    Login,
    Signup,
    EmailVerification,
    /// 资料填写向导 (需要认证)
    ProfileSetup,
    /// 控制面板 (需要认证 + 完整资料)
    Dashboard,
    /// 聊天 (需要认证 + 完整资料)
    Chats,
    /// 身份服务未配置
    SetupRequired,
    /// 页面未找到
    NotFound,
}

impl AppRoute {
    /// 将 URL path 解析为路由枚举
    pub fn from_path(path: &str) -> Self {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        match path.trim_end_matches('/') {
            "" => Self::Landing,
            "/login" => Self::Login,
            "/signup" => Self::Signup,
            "/email-verification" => Self::EmailVerification,
            "/profile-setup" => Self::ProfileSetup,
            "/dashboard" => Self::Dashboard,
            "/chats" => Self::Chats,
            "/setup" => Self::SetupRequired,
            _ => Self::NotFound,
        }
    }

    /// 获取路由对应的 URL path
    pub fn to_path(&self) -> &'static str {
        match self {
            Self::Landing => "/",
            Self::Login => "/login",
            Self::Signup => "/signup",
            Self::EmailVerification => "/email-verification",
            Self::ProfileSetup => "/profile-setup",
            Self::Dashboard => "/dashboard",
            Self::Chats => "/chats",
            Self::SetupRequired => "/setup",
            Self::NotFound => "/404",
        }
    }

    /// 该路由是否需要已登录的身份
    pub fn requires_identity(&self) -> bool {
        matches!(self, Self::ProfileSetup | Self::Dashboard | Self::Chats)
    }

    /// 该路由是否需要服务端确认资料已完成
    pub fn requires_complete_profile(&self) -> bool {
        matches!(self, Self::Dashboard | Self::Chats)
    }

    /// 已认证用户是否应该离开此路由（登录、注册页）
    pub fn should_redirect_when_authenticated(&self) -> bool {
        matches!(self, Self::Login | Self::Signup)
    }

    /// 认证失败时的重定向目标
    pub fn auth_failure_redirect() -> Self {
        Self::Login
    }

    /// 认证成功时的重定向目标（从登录页）
    pub fn auth_success_redirect() -> Self {
        Self::Dashboard
    }

    /// 资料未完成时的重定向目标
    pub fn incomplete_profile_redirect() -> Self {
        Self::ProfileSetup
    }
}

impl Display for AppRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_path())
    }
}
