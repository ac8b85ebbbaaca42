use crate::{Gender, Match, Profile, ProfilePatch};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// HTTP Methods for API Requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

/// A trait that defines the request-response relationship and metadata for an API endpoint.
pub trait ApiRequest: Serialize + DeserializeOwned {
    /// Payload found under `data` in the response envelope.
    type Response: Serialize + DeserializeOwned + Default;
    /// The URL path, relative to the API base URL.
    const PATH: &'static str;
    /// The HTTP method.
    const METHOD: HttpMethod;
    /// Whether the bearer credential is attached.
    const AUTHENTICATED: bool = true;
    /// Whether a success reply without `data` is complete on its own.
    const ACKNOWLEDGEMENT: bool = false;

    /// Query string pairs for GET endpoints.
    fn query(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }
}

/// Wire envelope shared by every endpoint: `{status, message, data}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: Some("success".to_string()),
            message: None,
            data: Some(data),
        }
    }
}

/// Empty acknowledgement payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ack {}

// =========================================================
// Response payloads
// =========================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserData {
    pub user: Profile,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileStatus {
    #[serde(default)]
    pub profile_completed: bool,
    #[serde(default)]
    pub needs_onboarding: bool,
    #[serde(default)]
    pub user: Option<Profile>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateList {
    #[serde(default)]
    pub matches: Vec<Profile>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeOutcome {
    #[serde(default)]
    pub is_match: bool,
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub created_match: Option<Match>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchList {
    #[serde(default)]
    pub matches: Vec<Match>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageUpload {
    pub image_url: String,
}

// =========================================================
// Auth endpoints
// =========================================================

/// Profile bootstrap sent on first registration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationProfile {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Creates the remote profile for a freshly created identity.
/// Carries the ID token in the body instead of the header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub id_token: String,
    pub profile_data: RegistrationProfile,
}

impl ApiRequest for RegisterRequest {
    type Response = UserData;
    const PATH: &'static str = "/auth/firebase/register";
    const METHOD: HttpMethod = HttpMethod::Post;
    const AUTHENTICATED: bool = false;
}

/// Syncs the identity with its remote profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub id_token: String,
}

impl ApiRequest for LoginRequest {
    type Response = UserData;
    const PATH: &'static str = "/auth/firebase/login";
    const METHOD: HttpMethod = HttpMethod::Post;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUserRequest;

impl ApiRequest for CurrentUserRequest {
    type Response = UserData;
    const PATH: &'static str = "/auth/firebase/me";
    const METHOD: HttpMethod = HttpMethod::Get;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoutRequest;

impl ApiRequest for LogoutRequest {
    type Response = Ack;
    const ACKNOWLEDGEMENT: bool = true;
    const PATH: &'static str = "/auth/firebase/logout";
    const METHOD: HttpMethod = HttpMethod::Post;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileStatusRequest;

impl ApiRequest for ProfileStatusRequest {
    type Response = ProfileStatus;
    const PATH: &'static str = "/auth/profile-status";
    const METHOD: HttpMethod = HttpMethod::Get;
}

// =========================================================
// Profile endpoints
// =========================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateProfileRequest(pub ProfilePatch);

impl ApiRequest for UpdateProfileRequest {
    type Response = UserData;
    const PATH: &'static str = "/users/profile";
    const METHOD: HttpMethod = HttpMethod::Put;
}

/// Marks the profile complete server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompleteProfileRequest(pub ProfilePatch);

impl ApiRequest for CompleteProfileRequest {
    type Response = UserData;
    const PATH: &'static str = "/profiles/complete";
    const METHOD: HttpMethod = HttpMethod::Post;
}

/// Updates last-seen while a session is open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest;

impl ApiRequest for HeartbeatRequest {
    type Response = Ack;
    const ACKNOWLEDGEMENT: bool = true;
    const PATH: &'static str = "/users/heartbeat";
    const METHOD: HttpMethod = HttpMethod::Post;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportUserRequest {
    pub reported_user_id: String,
    pub reason: String,
    #[serde(default)]
    pub description: String,
}

impl ApiRequest for ReportUserRequest {
    type Response = Ack;
    const ACKNOWLEDGEMENT: bool = true;
    const PATH: &'static str = "/users/report";
    const METHOD: HttpMethod = HttpMethod::Post;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockUserRequest {
    pub blocked_user_id: String,
}

impl ApiRequest for BlockUserRequest {
    type Response = Ack;
    const ACKNOWLEDGEMENT: bool = true;
    const PATH: &'static str = "/users/block";
    const METHOD: HttpMethod = HttpMethod::Post;
}

/// Multipart endpoint; not an `ApiRequest` because the body is not JSON.
pub const PROFILE_IMAGE_UPLOAD_PATH: &str = "/users/upload-profile-image";
pub const PROFILE_IMAGE_FIELD: &str = "profileImage";

// =========================================================
// Matching endpoints
// =========================================================

/// Optional filters forwarded to the candidate query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchPreferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faculty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_age: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PotentialMatchesRequest {
    pub limit: usize,
    #[serde(flatten)]
    pub preferences: MatchPreferences,
}

impl ApiRequest for PotentialMatchesRequest {
    type Response = CandidateList;
    const PATH: &'static str = "/matching/potential";
    const METHOD: HttpMethod = HttpMethod::Get;

    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![("limit", self.limit.to_string())];
        let prefs = &self.preferences;
        if let Some(faculty) = &prefs.faculty {
            query.push(("faculty", faculty.clone()));
        }
        if let Some(gender) = prefs.gender {
            query.push(("gender", gender.as_str().to_string()));
        }
        if let Some(min) = prefs.min_age {
            query.push(("minAge", min.to_string()));
        }
        if let Some(max) = prefs.max_age {
            query.push(("maxAge", max.to_string()));
        }
        query
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeRequest {
    pub user_id: String,
}

impl ApiRequest for LikeRequest {
    type Response = LikeOutcome;
    const PATH: &'static str = "/matching/like";
    const METHOD: HttpMethod = HttpMethod::Post;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassRequest {
    pub user_id: String,
}

impl ApiRequest for PassRequest {
    type Response = Ack;
    const ACKNOWLEDGEMENT: bool = true;
    const PATH: &'static str = "/matching/pass";
    const METHOD: HttpMethod = HttpMethod::Post;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchesRequest;

impl ApiRequest for MatchesRequest {
    type Response = MatchList;
    const PATH: &'static str = "/matching/matches";
    const METHOD: HttpMethod = HttpMethod::Get;
}
