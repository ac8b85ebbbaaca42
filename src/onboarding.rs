//! 资料完善向导
//!
//! `transition` 即完整的状态机：输入当前状态、事件与草稿，输出下一状态与待执行的副作用。
//! `ProfileWizard` 负责对 API 与会话执行这些副作用，并把结果作为事件回送。

pub mod rules;

use crate::api::ProfileApi;
use crate::error::{AppError, Result};
use crate::request::HttpClient;
use crate::session::SessionStore;
use rules::{Check, LENIENT_RULES, RANGE_RULES, Rule, STRICT_RULES};
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;
use tracing::{debug, info, warn};
use unimatch_shared::chrono::NaiveDate;
use unimatch_shared::{Gender, INTEREST_CATALOGUE, Profile, ProfilePatch};

pub use rules::REQUIRED_FIELDS_MESSAGE;

// =========================================================
// 步骤与策略 (Steps & Policy)
// =========================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Step {
    Personal = 1,
    Academic = 2,
    Details = 3,
    Privacy = 4,
}

impl Step {
    pub const ALL: [Step; 4] = [Step::Personal, Step::Academic, Step::Details, Step::Privacy];

    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn from_number(n: u8) -> Option<Step> {
        Self::ALL.get(usize::from(n).checked_sub(1)?).copied()
    }

    pub fn next(self) -> Option<Step> {
        Self::from_number(self.number() + 1)
    }

    pub fn prev(self) -> Option<Step> {
        Self::from_number(self.number() - 1)
    }

    pub fn is_last(self) -> bool {
        self == Step::Privacy
    }
}

/// 向导要求的必填范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionPolicy {
    /// 只要求姓和名
    #[default]
    Lenient,
    /// 除隐私外每一步都有必填字段
    Strict,
}

impl CompletionPolicy {
    pub fn rules(self) -> impl Iterator<Item = &'static Rule> {
        let required = match self {
            CompletionPolicy::Lenient => LENIENT_RULES,
            CompletionPolicy::Strict => STRICT_RULES,
        };
        required.iter().chain(RANGE_RULES.iter())
    }

    pub fn has_required_fields(self, step: Step) -> bool {
        self.rules()
            .any(|rule| rule.step == step && rule.check == Check::Required)
    }
}

impl FromStr for CompletionPolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(CompletionPolicy::Lenient),
            "strict" => Ok(CompletionPolicy::Strict),
            other => Err(AppError::Config(format!("unknown completion policy: {}", other))),
        }
    }
}

impl fmt::Display for CompletionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionPolicy::Lenient => f.write_str("lenient"),
            CompletionPolicy::Strict => f.write_str("strict"),
        }
    }
}

// =========================================================
// 表单草稿 (Draft)
// =========================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersonalInfo {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<Gender>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcademicInfo {
    pub student_id: String,
    pub faculty: String,
    pub department: String,
    pub year_of_study: Option<u8>,
    pub semester: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileDetails {
    pub bio: String,
    pub interests: BTreeSet<String>,
    pub looking_for: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrivacySettings {
    pub show_email: bool,
    pub show_phone: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileDraft {
    pub personal: PersonalInfo,
    pub academic: AcademicInfo,
    pub details: ProfileDetails,
    pub privacy: PrivacySettings,
}

fn trimmed(value: &str) -> String {
    value.trim().to_string()
}

impl ProfileDraft {
    pub fn from_profile(profile: &Profile) -> Self {
        Self {
            personal: PersonalInfo {
                first_name: profile.first_name.clone(),
                last_name: profile.last_name.clone(),
                date_of_birth: profile.date_of_birth.map(|dt| dt.date_naive()),
                gender: profile.gender,
            },
            academic: AcademicInfo {
                student_id: profile.student_id.clone().unwrap_or_default(),
                faculty: profile.faculty.clone().unwrap_or_default(),
                department: profile.department.clone().unwrap_or_default(),
                year_of_study: profile.year_of_study,
                semester: profile.semester,
            },
            details: ProfileDetails {
                bio: profile.bio.clone(),
                interests: profile.interests.clone(),
                looking_for: profile.looking_for.clone(),
            },
            privacy: PrivacySettings {
                show_email: profile.show_email,
                show_phone: profile.show_phone,
            },
        }
    }

    /// 切换目录中的兴趣，未知名称忽略
    pub fn toggle_interest(&mut self, interest: &str) -> bool {
        if !INTEREST_CATALOGUE.contains(&interest) {
            return false;
        }
        if !self.details.interests.remove(interest) {
            self.details.interests.insert(interest.to_string());
        }
        true
    }

    /// 某一步拥有的全部字段，已清空的文本与兴趣同样发送
    pub fn step_patch(&self, step: Step) -> ProfilePatch {
        match step {
            Step::Personal => ProfilePatch {
                first_name: Some(trimmed(&self.personal.first_name)),
                last_name: Some(trimmed(&self.personal.last_name)),
                date_of_birth: self
                    .personal
                    .date_of_birth
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|dt| dt.and_utc()),
                gender: self.personal.gender,
                ..Default::default()
            },
            Step::Academic => ProfilePatch {
                student_id: Some(trimmed(&self.academic.student_id)),
                faculty: Some(trimmed(&self.academic.faculty)),
                department: Some(trimmed(&self.academic.department)),
                year_of_study: self.academic.year_of_study,
                semester: self.academic.semester,
                ..Default::default()
            },
            Step::Details => ProfilePatch {
                bio: Some(self.details.bio.clone()),
                interests: Some(self.details.interests.clone()),
                looking_for: Some(trimmed(&self.details.looking_for)),
                ..Default::default()
            },
            Step::Privacy => ProfilePatch {
                show_email: Some(self.privacy.show_email),
                show_phone: Some(self.privacy.show_phone),
                ..Default::default()
            },
        }
    }

    /// 所有步骤中非空的字段，用于完成资料
    pub fn full_patch(&self) -> ProfilePatch {
        let mut patch = ProfilePatch::default();
        for step in Step::ALL {
            patch.merge(&self.step_patch(step));
        }
        patch.without_blanks()
    }
}

/// 校验草稿中的一步。缺少必填字段优先于范围错误，并返回固定的必填提示。
pub fn validate_step(step: Step, draft: &ProfileDraft, policy: CompletionPolicy) -> Result<()> {
    let data = match serde_json::to_value(draft.step_patch(step)) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    let violations = rules::evaluate(policy.rules(), step, &data);
    let first = violations
        .iter()
        .find(|v| v.check == Check::Required)
        .or(violations.first());
    match first {
        Some(violation) => Err(AppError::validation(violation.message)),
        None => Ok(()),
    }
}

// =========================================================
// 状态机 (State Machine)
// =========================================================

/// 当前步骤保存成功后的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Advance,
    SkipToFinal,
    Submit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Editing,
    Saving { step: Step, intent: Intent },
    Completing,
    Completed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WizardState {
    pub step: Step,
    pub phase: Phase,
    pub error: Option<String>,
}

impl Default for WizardState {
    fn default() -> Self {
        Self {
            step: Step::Personal,
            phase: Phase::Editing,
            error: None,
        }
    }
}

impl WizardState {
    pub fn is_busy(&self) -> bool {
        matches!(self.phase, Phase::Saving { .. } | Phase::Completing)
    }

    pub fn is_completed(&self) -> bool {
        self.phase == Phase::Completed
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WizardEvent {
    Next,
    Back,
    GoTo(Step),
    SkipToFinal,
    Submit,
    StepSaved { step: Step },
    StepFailed { step: Step, message: String },
    Completed,
    CompleteFailed { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum WizardEffect {
    PersistStep { step: Step, patch: ProfilePatch },
    CompleteProfile(ProfilePatch),
    PatchSession(ProfilePatch),
    Finished,
}

pub fn transition(
    state: &WizardState,
    event: WizardEvent,
    draft: &ProfileDraft,
    policy: CompletionPolicy,
) -> (WizardState, Vec<WizardEffect>) {
    let unchanged = || (state.clone(), Vec::new());

    match (state.phase, event) {
        (Phase::Editing, WizardEvent::Next) if state.step.is_last() => {
            leave_step(state, Intent::Submit, draft, policy)
        }
        (Phase::Editing, WizardEvent::Next) => leave_step(state, Intent::Advance, draft, policy),
        (Phase::Editing, WizardEvent::SkipToFinal) if !state.step.is_last() => {
            leave_step(state, Intent::SkipToFinal, draft, policy)
        }
        (Phase::Editing, WizardEvent::Submit) if state.step.is_last() => {
            leave_step(state, Intent::Submit, draft, policy)
        }

        (Phase::Editing, WizardEvent::Back) => match state.step.prev() {
            Some(prev) => (
                WizardState {
                    step: prev,
                    phase: Phase::Editing,
                    error: None,
                },
                Vec::new(),
            ),
            None => unchanged(),
        },
        (Phase::Editing, WizardEvent::GoTo(target)) if target <= state.step => (
            WizardState {
                step: target,
                phase: Phase::Editing,
                error: None,
            },
            Vec::new(),
        ),

        (Phase::Saving { step, intent }, WizardEvent::StepSaved { step: saved }) if saved == step => {
            step_saved(step, intent, draft, policy)
        }
        (Phase::Saving { step, .. }, WizardEvent::StepFailed { step: failed, message })
            if failed == step =>
        {
            (
                WizardState {
                    step,
                    phase: Phase::Editing,
                    error: Some(message),
                },
                Vec::new(),
            )
        }

        (Phase::Completing, WizardEvent::Completed) => {
            let mut patch = draft.full_patch();
            patch.profile_completed = Some(true);
            (
                WizardState {
                    step: state.step,
                    phase: Phase::Completed,
                    error: None,
                },
                vec![WizardEffect::PatchSession(patch), WizardEffect::Finished],
            )
        }
        (Phase::Completing, WizardEvent::CompleteFailed { message }) => (
            WizardState {
                step: state.step,
                phase: Phase::Editing,
                error: Some(message),
            },
            Vec::new(),
        ),

        // 过期或重复的事件：保持原状
        _ => unchanged(),
    }
}

fn leave_step(
    state: &WizardState,
    intent: Intent,
    draft: &ProfileDraft,
    policy: CompletionPolicy,
) -> (WizardState, Vec<WizardEffect>) {
    if let Err(err) = validate_step(state.step, draft, policy) {
        return (
            WizardState {
                step: state.step,
                phase: Phase::Editing,
                error: Some(err.to_string()),
            },
            Vec::new(),
        );
    }

    (
        WizardState {
            step: state.step,
            phase: Phase::Saving {
                step: state.step,
                intent,
            },
            error: None,
        },
        vec![WizardEffect::PersistStep {
            step: state.step,
            patch: draft.step_patch(state.step),
        }],
    )
}

fn step_saved(
    step: Step,
    intent: Intent,
    draft: &ProfileDraft,
    policy: CompletionPolicy,
) -> (WizardState, Vec<WizardEffect>) {
    let saved = WizardEffect::PatchSession(draft.step_patch(step));
    let editing = |step| WizardState {
        step,
        phase: Phase::Editing,
        error: None,
    };

    match intent {
        Intent::Advance => (editing(step.next().unwrap_or(step)), vec![saved]),
        Intent::SkipToFinal => (editing(Step::Privacy), vec![saved]),
        Intent::Submit => {
            let failing = Step::ALL
                .into_iter()
                .filter(|s| *s < step && policy.has_required_fields(*s))
                .find_map(|s| validate_step(s, draft, policy).err().map(|err| (s, err)));

            match failing {
                Some((back_to, err)) => (
                    WizardState {
                        step: back_to,
                        phase: Phase::Editing,
                        error: Some(err.to_string()),
                    },
                    vec![saved],
                ),
                None => (
                    WizardState {
                        step,
                        phase: Phase::Completing,
                        error: None,
                    },
                    vec![saved, WizardEffect::CompleteProfile(draft.full_patch())],
                ),
            }
        }
    }
}

// =========================================================
// 异步驱动 (Driver)
// =========================================================

pub struct ProfileWizard<C> {
    api: Rc<ProfileApi<C>>,
    session: Rc<SessionStore<C>>,
    policy: CompletionPolicy,
    state: RefCell<WizardState>,
    draft: RefCell<ProfileDraft>,
}

impl<C: HttpClient> ProfileWizard<C> {
    pub fn new(
        api: Rc<ProfileApi<C>>,
        session: Rc<SessionStore<C>>,
        policy: CompletionPolicy,
    ) -> Self {
        Self {
            api,
            session,
            policy,
            state: RefCell::new(WizardState::default()),
            draft: RefCell::new(ProfileDraft::default()),
        }
    }

    /// 用 `profile` 中已保存的值重新从第一步开始
    pub fn preload_from(&self, profile: &Profile) {
        *self.draft.borrow_mut() = ProfileDraft::from_profile(profile);
        *self.state.borrow_mut() = WizardState::default();
    }

    pub fn state(&self) -> WizardState {
        self.state.borrow().clone()
    }

    pub fn draft(&self) -> ProfileDraft {
        self.draft.borrow().clone()
    }

    pub fn policy(&self) -> CompletionPolicy {
        self.policy
    }

    /// 编辑草稿，保存进行中时忽略
    pub fn edit(&self, f: impl FnOnce(&mut ProfileDraft)) -> bool {
        if self.state.borrow().is_busy() {
            return false;
        }
        f(&mut self.draft.borrow_mut());
        true
    }

    pub async fn next(&self) -> WizardState {
        self.dispatch(WizardEvent::Next).await
    }

    pub async fn back(&self) -> WizardState {
        self.dispatch(WizardEvent::Back).await
    }

    pub async fn go_to(&self, step: Step) -> WizardState {
        self.dispatch(WizardEvent::GoTo(step)).await
    }

    pub async fn skip_to_final(&self) -> WizardState {
        self.dispatch(WizardEvent::SkipToFinal).await
    }

    pub async fn submit(&self) -> WizardState {
        self.dispatch(WizardEvent::Submit).await
    }

    async fn dispatch(&self, event: WizardEvent) -> WizardState {
        let mut queue = VecDeque::from([event]);

        while let Some(event) = queue.pop_front() {
            let (next, effects) = {
                let state = self.state.borrow();
                let draft = self.draft.borrow();
                transition(&state, event, &draft, self.policy)
            };
            *self.state.borrow_mut() = next;

            for effect in effects {
                if let Some(follow_up) = self.run_effect(effect).await {
                    queue.push_back(follow_up);
                }
            }
        }

        self.state()
    }

    async fn run_effect(&self, effect: WizardEffect) -> Option<WizardEvent> {
        match effect {
            WizardEffect::PersistStep { step, patch } => {
                debug!(step = step.number(), "saving profile step");
                Some(match self.api.update_profile(&patch).await {
                    Ok(_) => WizardEvent::StepSaved { step },
                    Err(err) => {
                        warn!(step = step.number(), error = %err, "profile step save failed");
                        WizardEvent::StepFailed {
                            step,
                            message: err.to_string(),
                        }
                    }
                })
            }
            WizardEffect::CompleteProfile(patch) => {
                Some(match self.api.complete_profile(&patch).await {
                    Ok(_) => WizardEvent::Completed,
                    Err(err) => {
                        warn!(error = %err, "profile completion failed");
                        WizardEvent::CompleteFailed {
                            message: err.to_string(),
                        }
                    }
                })
            }
            WizardEffect::PatchSession(patch) => {
                self.session.patch_profile(&patch);
                None
            }
            WizardEffect::Finished => {
                info!("profile completed");
                None
            }
        }
    }
}
