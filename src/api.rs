//! 资料/匹配 API 客户端
//!
//! 所有调用都经过 `execute`：附加 Bearer 凭证，发送 JSON 请求体，
//! 再解包 `{status, message, data}` 信封。

use crate::error::{AppError, Result};
use crate::identity::IdentityProvider;
use crate::request::{FilePart, HttpClient, HttpMethod, HttpRequest, HttpResponse, MultipartForm};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::rc::Rc;
use tracing::{debug, warn};
use unimatch_shared::protocol::*;
use unimatch_shared::{HEADER_AUTHORIZATION, Identity, Match, Profile, ProfilePatch};

pub struct ProfileApi<C> {
    http: C,
    base_url: String,
    identity: Rc<dyn IdentityProvider>,
}

impl<C: HttpClient> ProfileApi<C> {
    pub fn new(http: C, base_url: &str, identity: Rc<dyn IdentityProvider>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            identity,
        }
    }

    fn url(&self, path: &str, query: &[(&'static str, String)]) -> String {
        let mut url = format!("{}{}", self.base_url, path);
        for (i, (key, value)) in query.iter().enumerate() {
            url.push(if i == 0 { '?' } else { '&' });
            url.push_str(key);
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        url
    }

    async fn authorization(&self) -> Result<String> {
        let token = self.identity.bearer_token(false).await?;
        Ok(format!("Bearer {}", token))
    }

    async fn execute<R: ApiRequest>(&self, req: &R) -> Result<R::Response> {
        let url = self.url(R::PATH, &req.query());
        let mut http_req = HttpRequest::new(&url, R::METHOD);

        if R::AUTHENTICATED {
            http_req = http_req.with_header(HEADER_AUTHORIZATION, &self.authorization().await?);
        }
        if R::METHOD != HttpMethod::Get {
            http_req = http_req.with_body(serde_json::to_value(req)?);
        }

        debug!(path = R::PATH, "api request");
        let resp = self.http.send(http_req).await?;
        read_envelope(R::PATH, resp, R::ACKNOWLEDGEMENT)
    }

    // =========================================================
    // 认证 (Auth)
    // =========================================================

    /// 为新身份创建远端资料
    pub async fn register(&self, identity: &Identity) -> Result<Profile> {
        let (first_name, last_name) = identity.name_parts();
        let req = RegisterRequest {
            id_token: self.identity.bearer_token(false).await?,
            profile_data: RegistrationProfile {
                first_name,
                last_name,
                email: identity.email.clone(),
                display_name: identity.display_name.clone(),
            },
        };
        Ok(self.execute(&req).await?.user)
    }

    /// 同步当前身份与远端资料
    pub async fn login(&self) -> Result<Profile> {
        let req = LoginRequest {
            id_token: self.identity.bearer_token(false).await?,
        };
        Ok(self.execute(&req).await?.user)
    }

    pub async fn current_user(&self) -> Result<Profile> {
        Ok(self.execute(&CurrentUserRequest).await?.user)
    }

    pub async fn logout(&self) -> Result<()> {
        self.execute(&LogoutRequest).await.map(|_| ())
    }

    /// 路由守卫使用的资料完成状态 (以服务端为准)
    pub async fn profile_status(&self) -> Result<ProfileStatus> {
        self.execute(&ProfileStatusRequest).await
    }

    // =========================================================
    // 资料 (Profile)
    // =========================================================

    pub async fn update_profile(&self, patch: &ProfilePatch) -> Result<Profile> {
        Ok(self
            .execute(&UpdateProfileRequest(patch.clone()))
            .await?
            .user)
    }

    pub async fn complete_profile(&self, patch: &ProfilePatch) -> Result<Profile> {
        Ok(self
            .execute(&CompleteProfileRequest(patch.clone()))
            .await?
            .user)
    }

    /// 返回存储后的图片 URL
    pub async fn upload_profile_image(&self, file: FilePart) -> Result<String> {
        let url = self.url(PROFILE_IMAGE_UPLOAD_PATH, &[]);
        let req = HttpRequest::new(&url, HttpMethod::Post)
            .with_header(HEADER_AUTHORIZATION, &self.authorization().await?)
            .with_multipart(MultipartForm::new().file(PROFILE_IMAGE_FIELD, file));

        let resp = self.http.send(req).await?;
        let upload: ImageUpload = read_envelope(PROFILE_IMAGE_UPLOAD_PATH, resp, false)?;
        if upload.image_url.is_empty() {
            return Err(AppError::serialization("upload response has no imageUrl"));
        }
        Ok(upload.image_url)
    }

    pub async fn heartbeat(&self) -> Result<()> {
        self.execute(&HeartbeatRequest).await.map(|_| ())
    }

    pub async fn report_user(&self, user_id: &str, reason: &str, description: &str) -> Result<()> {
        let req = ReportUserRequest {
            reported_user_id: user_id.to_string(),
            reason: reason.to_string(),
            description: description.to_string(),
        };
        self.execute(&req).await.map(|_| ())
    }

    pub async fn block_user(&self, user_id: &str) -> Result<()> {
        let req = BlockUserRequest {
            blocked_user_id: user_id.to_string(),
        };
        self.execute(&req).await.map(|_| ())
    }

    // =========================================================
    // 匹配 (Matching)
    // =========================================================

    pub async fn potential_matches(
        &self,
        limit: usize,
        preferences: &MatchPreferences,
    ) -> Result<Vec<Profile>> {
        let req = PotentialMatchesRequest {
            limit,
            preferences: preferences.clone(),
        };
        Ok(self.execute(&req).await?.matches)
    }

    pub async fn like(&self, user_id: &str) -> Result<LikeOutcome> {
        self.execute(&LikeRequest {
            user_id: user_id.to_string(),
        })
        .await
    }

    pub async fn pass(&self, user_id: &str) -> Result<()> {
        self.execute(&PassRequest {
            user_id: user_id.to_string(),
        })
        .await
        .map(|_| ())
    }

    pub async fn matches(&self) -> Result<Vec<Match>> {
        Ok(self.execute(&MatchesRequest).await?.matches)
    }
}

/// 解包响应中的 `data`。
///
/// 非 2xx 时返回 `Api` 错误，消息依次取 `message`、原始文本、状态码。
/// 成功但缺少 `data` 时，只有确认类接口 (`acknowledgement`) 视为成功。
fn read_envelope<T: DeserializeOwned + Default>(
    path: &str,
    resp: HttpResponse,
    acknowledgement: bool,
) -> Result<T> {
    if !resp.is_success() {
        let message = match serde_json::from_str::<Envelope<Value>>(&resp.body) {
            Ok(envelope) => envelope.message,
            Err(_) => Some(resp.body.trim().to_string()),
        }
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("HTTP error! status: {}", resp.status));

        warn!(path, status = resp.status, %message, "api request failed");
        return Err(AppError::api(resp.status, message));
    }

    let data = if resp.body.trim().is_empty() {
        None
    } else {
        resp.json::<Envelope<T>>()?.data
    };
    match data {
        Some(data) => Ok(data),
        None if acknowledgement => Ok(T::default()),
        None => {
            warn!(path, status = resp.status, "api reply has no data");
            Err(AppError::serialization("response has no data"))
        }
    }
}
