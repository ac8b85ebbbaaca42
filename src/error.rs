use thiserror::Error;

// =========================================================
// 身份服务错误码 (Identity Error Codes)
// =========================================================

/// 身份服务错误码，只保留账号页面需要区分的几类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityErrorCode {
    EmailExists,
    InvalidEmail,
    WeakPassword,
    WrongPassword,
    UserNotFound,
    UserDisabled,
    TooManyAttempts,
    SessionExpired,
    Unknown,
}

impl IdentityErrorCode {
    /// Parses a provider message such as `"WEAK_PASSWORD : Password should be
    /// at least 6 characters"`. Only the part before the first colon is used.
    pub fn from_provider(raw: &str) -> Self {
        let code = raw.split(':').next().unwrap_or_default().trim();
        match code {
            "EMAIL_EXISTS" => Self::EmailExists,
            "INVALID_EMAIL" | "MISSING_EMAIL" => Self::InvalidEmail,
            "WEAK_PASSWORD" => Self::WeakPassword,
            "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" | "MISSING_PASSWORD" => {
                Self::WrongPassword
            }
            "EMAIL_NOT_FOUND" | "USER_NOT_FOUND" => Self::UserNotFound,
            "USER_DISABLED" => Self::UserDisabled,
            "TOO_MANY_ATTEMPTS_TRY_LATER" => Self::TooManyAttempts,
            "TOKEN_EXPIRED"
            | "INVALID_ID_TOKEN"
            | "INVALID_REFRESH_TOKEN"
            | "CREDENTIAL_TOO_OLD_LOGIN_AGAIN"
            | "USER_MISMATCH" => Self::SessionExpired,
            _ => Self::Unknown,
        }
    }

    /// 账号页面显示的提示文本
    pub fn message(&self) -> &'static str {
        match self {
            Self::EmailExists => "An account with this email already exists",
            Self::InvalidEmail => "Please enter a valid email address",
            Self::WeakPassword => "Password should be at least 6 characters",
            Self::WrongPassword => "Incorrect email or password",
            Self::UserNotFound => "No account found with this email",
            Self::UserDisabled => "This account has been disabled",
            Self::TooManyAttempts => "Too many attempts. Please try again later",
            Self::SessionExpired => "Your session has expired. Please log in again",
            Self::Unknown => "An unexpected error occurred. Please try again.",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmailExists => "EMAIL_EXISTS",
            Self::InvalidEmail => "INVALID_EMAIL",
            Self::WeakPassword => "WEAK_PASSWORD",
            Self::WrongPassword => "WRONG_PASSWORD",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::UserDisabled => "USER_DISABLED",
            Self::TooManyAttempts => "TOO_MANY_ATTEMPTS",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::Unknown => "IDENTITY_ERROR",
        }
    }
}

// =========================================================
// 核心错误类型 (Application Error)
// =========================================================

/// 应用错误。均不致命：各流程将其并入自身状态，会话同步则视为无资料。
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AppError {
    /// 本地校验失败，不会发出请求
    #[error("{0}")]
    Validation(String),

    #[error("{}", .0.message())]
    Identity(IdentityErrorCode),

    /// 资料/匹配 API 返回非 2xx
    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("No user logged in")]
    NotAuthenticated,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// 获取对应的 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) | AppError::Serialization(_) => 400,
            AppError::Identity(code) => match code {
                IdentityErrorCode::UserNotFound => 404,
                IdentityErrorCode::EmailExists => 409,
                IdentityErrorCode::TooManyAttempts => 429,
                IdentityErrorCode::WrongPassword
                | IdentityErrorCode::SessionExpired
                | IdentityErrorCode::UserDisabled => 401,
                IdentityErrorCode::InvalidEmail | IdentityErrorCode::WeakPassword => 400,
                IdentityErrorCode::Unknown => 502,
            },
            AppError::Api { status, .. } => *status,
            AppError::NotAuthenticated => 401,
            AppError::Network(_) => 503,
            AppError::Config(_) => 500,
        }
    }

    /// 获取机器可读的错误代码
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "INVALID_INPUT",
            AppError::Identity(code) => code.as_str(),
            AppError::Api { .. } => "API_ERROR",
            AppError::Network(_) => "NETWORK_ERROR",
            AppError::Serialization(_) => "JSON_PARSE_ERROR",
            AppError::NotAuthenticated => "UNAUTHORIZED",
            AppError::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Whether the remote API or the identity provider reported that the
    /// user does not exist. Triggers first-login registration.
    pub fn is_user_not_found(&self) -> bool {
        match self {
            AppError::Identity(IdentityErrorCode::UserNotFound) => true,
            AppError::Api { status, message } => {
                *status == 404 || message.to_ascii_lowercase().contains("user not found")
            }
            _ => false,
        }
    }
}

impl From<IdentityErrorCode> for AppError {
    fn from(code: IdentityErrorCode) -> Self {
        AppError::Identity(code)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
