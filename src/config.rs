use crate::onboarding::CompletionPolicy;
use std::time::Duration;
use unimatch_shared::{DEFAULT_API_URL, DEFAULT_UNIVERSITY_DOMAIN};

// =========================================================
// 动态运行时配置 (Runtime Configuration)
// =========================================================

/// 这些是默认值，环境中没有定义对应变量时使用
pub const DEFAULT_IDENTITY_ENDPOINT: &str = "https://identitytoolkit.googleapis.com/v1";
pub const DEFAULT_TOKEN_ENDPOINT: &str = "https://securetoken.googleapis.com/v1";
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 300;

/// Value shipped in the sample `.env`; treated as "not configured".
const PLACEHOLDER_API_KEY: &str = "your-actual-firebase-api-key";

/// 运行时配置结构体
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub firebase_api_key: Option<String>,
    pub firebase_project_id: Option<String>,
    pub firebase_auth_domain: Option<String>,
    pub api_url: String,
    pub university_domain: String,
    pub heartbeat_interval: Duration,
    pub completion_policy: CompletionPolicy,
    pub identity_endpoint: String,
    pub token_endpoint: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl RuntimeConfig {
    /// Builds the configuration from an arbitrary variable source. Empty values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            firebase_api_key: var("FIREBASE_API_KEY"),
            firebase_project_id: var("FIREBASE_PROJECT_ID"),
            firebase_auth_domain: var("FIREBASE_AUTH_DOMAIN"),

            api_url: var("API_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),

            university_domain: var("UNIVERSITY_DOMAIN")
                .map(|v| v.trim_start_matches('@').to_ascii_lowercase())
                .unwrap_or_else(|| DEFAULT_UNIVERSITY_DOMAIN.to_string()),

            heartbeat_interval: Duration::from_secs(
                var("HEARTBEAT_INTERVAL_SECS")
                    .and_then(|v| v.parse::<u64>().ok())
                    .filter(|secs| *secs > 0)
                    .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            ),

            completion_policy: var("COMPLETION_POLICY")
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),

            identity_endpoint: var("IDENTITY_ENDPOINT")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_IDENTITY_ENDPOINT.to_string()),

            token_endpoint: var("TOKEN_ENDPOINT")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_TOKEN_ENDPOINT.to_string()),
        }
    }

    /// Reads the process environment.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the variables baked in at build time; a browser has no
    /// process environment.
    #[cfg(target_arch = "wasm32")]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| {
            let value = match name {
                "FIREBASE_API_KEY" => option_env!("FIREBASE_API_KEY"),
                "FIREBASE_PROJECT_ID" => option_env!("FIREBASE_PROJECT_ID"),
                "FIREBASE_AUTH_DOMAIN" => option_env!("FIREBASE_AUTH_DOMAIN"),
                "API_URL" => option_env!("API_URL"),
                "UNIVERSITY_DOMAIN" => option_env!("UNIVERSITY_DOMAIN"),
                "HEARTBEAT_INTERVAL_SECS" => option_env!("HEARTBEAT_INTERVAL_SECS"),
                "COMPLETION_POLICY" => option_env!("COMPLETION_POLICY"),
                "IDENTITY_ENDPOINT" => option_env!("IDENTITY_ENDPOINT"),
                "TOKEN_ENDPOINT" => option_env!("TOKEN_ENDPOINT"),
                _ => None,
            };
            value.map(str::to_string)
        })
    }

    /// Names of the identity-provider variables that are missing or still hold
    /// the sample placeholder.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        match self.firebase_api_key.as_deref() {
            None | Some(PLACEHOLDER_API_KEY) => missing.push("FIREBASE_API_KEY"),
            Some(_) => {}
        }
        if self.firebase_project_id.is_none() {
            missing.push("FIREBASE_PROJECT_ID");
        }
        missing
    }

    pub fn is_identity_configured(&self) -> bool {
        self.missing_credentials().is_empty()
    }

    pub fn api_key(&self) -> &str {
        self.firebase_api_key.as_deref().unwrap_or_default()
    }
}
