//! 设置与资料编辑
//!
//! 每次修改先提交到服务端，成功后才合并进会话；保存失败时缓存的资料保持不变。

use crate::api::ProfileApi;
use crate::error::{AppError, Result};
use crate::onboarding::Step;
use crate::onboarding::rules::{self, RANGE_RULES};
use crate::request::{FilePart, HttpClient};
use crate::session::SessionStore;
use serde_json::Value;
use std::rc::Rc;
use tracing::{debug, info};
use unimatch_shared::ProfilePatch;

pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

pub struct SettingsService<C> {
    api: Rc<ProfileApi<C>>,
    session: Rc<SessionStore<C>>,
}

impl<C: HttpClient> SettingsService<C> {
    pub fn new(api: Rc<ProfileApi<C>>, session: Rc<SessionStore<C>>) -> Self {
        Self { api, session }
    }

    pub async fn update_privacy(&self, show_email: bool, show_phone: bool) -> Result<()> {
        let patch = ProfilePatch {
            show_email: Some(show_email),
            show_phone: Some(show_phone),
            ..Default::default()
        };
        self.persist(&patch).await
    }

    /// 保存任意资料字段，适用范围规则；空补丁直接返回
    pub async fn update_profile(&self, patch: &ProfilePatch) -> Result<()> {
        if patch.is_empty() {
            debug!("empty profile patch, nothing to save");
            return Ok(());
        }
        check_ranges(patch)?;
        self.persist(patch).await
    }

    /// 上传头像并返回其 URL
    pub async fn upload_profile_image(&self, file: FilePart) -> Result<String> {
        if !file.content_type.starts_with("image/") {
            return Err(AppError::validation("Please select an image file"));
        }
        if file.bytes.is_empty() || file.bytes.len() > MAX_IMAGE_BYTES {
            return Err(AppError::validation("Image must be smaller than 5MB"));
        }

        let image_url = self.api.upload_profile_image(file).await?;
        self.session.patch_profile(&ProfilePatch {
            profile_image: Some(image_url.clone()),
            ..Default::default()
        });
        info!(url = %image_url, "profile image updated");
        Ok(image_url)
    }

    pub async fn report_user(&self, user_id: &str, reason: &str, description: &str) -> Result<()> {
        if reason.trim().is_empty() {
            return Err(AppError::validation("Please select a reason"));
        }
        self.api.report_user(user_id, reason.trim(), description.trim()).await
    }

    pub async fn block_user(&self, user_id: &str) -> Result<()> {
        self.api.block_user(user_id).await
    }

    async fn persist(&self, patch: &ProfilePatch) -> Result<()> {
        self.api.update_profile(patch).await?;
        self.session.patch_profile(patch);
        Ok(())
    }
}

fn check_ranges(patch: &ProfilePatch) -> Result<()> {
    let Ok(Value::Object(data)) = serde_json::to_value(patch) else {
        return Ok(());
    };
    let violation = Step::ALL
        .into_iter()
        .flat_map(|step| rules::evaluate(RANGE_RULES, step, &data))
        .next();
    match violation {
        Some(v) => Err(AppError::validation(v.message)),
        None => Ok(()),
    }
}
